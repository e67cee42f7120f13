//! Field-level change sets.

use chrono::NaiveDate;
use courtsync_state::CasePatch;
use serde::{Deserialize, Serialize};

/// Case fields the court source is authoritative for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    Stage,
    NextHearingDate,
}

impl TrackedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedField::Stage => "stage",
            TrackedField::NextHearingDate => "next_hearing_date",
        }
    }
}

impl std::fmt::Display for TrackedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a tracked field. Tagged so date-shaped stage text stays text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Date(NaiveDate),
    Text(String),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Date(d) => write!(f, "{d}"),
        }
    }
}

/// One field moving from `old` to `new`. `new` is never empty: a change set
/// cannot blank a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: TrackedField,
    pub old: Option<FieldValue>,
    pub new: FieldValue,
}

/// Ordered list of field changes (stage first, then next hearing date).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    changes: Vec<FieldChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, change: FieldChange) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldChange> {
        self.changes.iter()
    }

    pub fn get(&self, field: TrackedField) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }

    /// The storage patch that realises this change set.
    pub fn to_patch(&self) -> CasePatch {
        let mut patch = CasePatch::default();
        for change in &self.changes {
            match (&change.field, &change.new) {
                (TrackedField::Stage, FieldValue::Text(s)) => patch.stage = Some(s.clone()),
                (TrackedField::NextHearingDate, FieldValue::Date(d)) => {
                    patch.next_hearing_date = Some(*d)
                }
                // Mismatched pairs are never produced by the detector.
                _ => {}
            }
        }
        patch
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a FieldChange;
    type IntoIter = std::slice::Iter<'a, FieldChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

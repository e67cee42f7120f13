//! Change detection between a stored case and a fetched court snapshot.
//!
//! `diff` is pure: the result depends only on its two arguments. Only the
//! fields the court is authoritative for (stage, next hearing date) are
//! compared, and a missing value in the snapshot never clears a stored one.

use courtsync_state::CaseRecord;

use crate::domain::{ChangeSet, CourtStatusSnapshot, FieldChange, FieldValue, TrackedField};

/// Compute the field-level changes needed to align `record` with `snapshot`.
pub fn diff(record: &CaseRecord, snapshot: &CourtStatusSnapshot) -> ChangeSet {
    let mut changes = ChangeSet::new();

    if let Some(stage) = &snapshot.stage {
        if record.stage.as_ref() != Some(stage) {
            changes.push(FieldChange {
                field: TrackedField::Stage,
                old: record.stage.clone().map(FieldValue::Text),
                new: FieldValue::Text(stage.clone()),
            });
        }
    }

    if let Some(date) = snapshot.next_hearing_date {
        if record.next_hearing_date != Some(date) {
            changes.push(FieldChange {
                field: TrackedField::NextHearingDate,
                old: record.next_hearing_date.map(FieldValue::Date),
                new: FieldValue::Date(date),
            });
        }
    }

    changes
}

//! SurrealDB-backed CaseStore implementation
//!
//! Rows are stored as `DbCase` and converted to/from `CaseRecord` at the
//! boundary. The version-guarded write is a single `UPDATE … WHERE` statement
//! so the check and the write cannot interleave with another writer.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::migrations;
use crate::schema::{CaseId, CasePatch, CaseRecord, CaseStatus};
use crate::storage_traits::{CaseStore, StorageResult, WriteOutcome};

const NAMESPACE: &str = "courtsync";
const DATABASE: &str = "main";

const DUPLICATE_CNR: &str = "duplicate cnr_number";

const INSERT_CASE_TX: &str = r#"
    BEGIN TRANSACTION;
    IF $cnr != NONE AND array::len(SELECT case_id FROM cases WHERE cnr_number = $cnr LIMIT 1) > 0 {
        THROW "duplicate cnr_number";
    };
    CREATE cases CONTENT $row;
    COMMIT TRANSACTION;
"#;

/// Serialize optional chrono datetimes as SurrealDB datetimes
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => serde::Serialize::serialize(&Some(SurrealDatetime::from(*d)), serializer),
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbCase {
    case_id: String,
    case_number: String,
    cnr_number: Option<String>,
    case_title: String,
    court_name: String,
    stage: Option<String>,
    next_hearing_date: Option<String>,
    status: String,
    sync_version: u64,
    #[serde(with = "surreal_datetime_opt", default)]
    last_synced_at: Option<DateTime<Utc>>,
}

impl DbCase {
    fn from_record(record: &CaseRecord) -> Self {
        Self {
            case_id: record.id.0.clone(),
            case_number: record.case_number.clone(),
            cnr_number: record.cnr_number.clone(),
            case_title: record.case_title.clone(),
            court_name: record.court_name.clone(),
            stage: record.stage.clone(),
            next_hearing_date: record.next_hearing_date.map(|d| d.to_string()),
            status: record.status.as_str().to_string(),
            sync_version: record.sync_version,
            last_synced_at: record.last_synced_at,
        }
    }

    fn into_record(self) -> StorageResult<CaseRecord> {
        let status = match self.status.as_str() {
            "ACTIVE" => CaseStatus::Active,
            "CLOSED" => CaseStatus::Closed,
            "DISPOSED" => CaseStatus::Disposed,
            "ARCHIVED" => CaseStatus::Archived,
            other => {
                return Err(StorageError::Serialization(format!(
                    "unknown case status: {other}"
                )))
            }
        };
        let next_hearing_date = self
            .next_hearing_date
            .as_deref()
            .map(|s| s.parse::<NaiveDate>())
            .transpose()
            .map_err(|e| StorageError::Serialization(format!("bad hearing date: {e}")))?;

        Ok(CaseRecord {
            id: CaseId(self.case_id),
            case_number: self.case_number,
            cnr_number: self.cnr_number,
            case_title: self.case_title,
            court_name: self.court_name,
            stage: self.stage,
            next_hearing_date,
            status,
            sync_version: self.sync_version,
            last_synced_at: self.last_synced_at,
        })
    }
}

/// SurrealDB-backed implementation of [`CaseStore`].
#[derive(Clone)]
pub struct SurrealCaseStore {
    db: Surreal<Any>,
}

impl SurrealCaseStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {url}: {e}")))?;
        Self::finish_setup(db, url).await
    }

    /// Connect and sign in as a root user.
    pub async fn connect_with_root(url: &str, username: &str, password: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {url}: {e}")))?;
        db.signin(Root { username, password })
            .await
            .map_err(|e| StorageError::Connection(format!("Root auth failed: {e}")))?;
        Self::finish_setup(db, url).await
    }

    async fn finish_setup(db: Surreal<Any>, url: &str) -> StorageResult<Self> {
        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        migrations::init_schema(&db).await?;
        info!("SurrealCaseStore connected ({})", url);
        Ok(Self { db })
    }

    /// Insert a new case. Fails with `Duplicate` if the CNR is already taken.
    ///
    /// The CNR check and the create run in one transaction, so concurrent
    /// inserts of the same CNR cannot both succeed.
    #[instrument(skip(self, record), fields(case_id = %record.id))]
    pub async fn insert_case(&self, record: &CaseRecord) -> StorageResult<()> {
        let mut res = self
            .db
            .query(INSERT_CASE_TX)
            .bind(("cnr", record.cnr_number.clone()))
            .bind(("row", DbCase::from_record(record)))
            .await?;

        let errors = res.take_errors();
        if errors.is_empty() {
            debug!("case inserted");
            return Ok(());
        }
        let messages: Vec<String> = errors.into_values().map(|e| e.to_string()).collect();
        Err(Self::insert_error(record, &messages))
    }

    fn insert_error(record: &CaseRecord, messages: &[String]) -> StorageError {
        let any = |needle: &str| messages.iter().any(|m| m.contains(needle));
        if any(DUPLICATE_CNR) {
            StorageError::Duplicate {
                field: "cnr_number",
                value: record.cnr_number.clone().unwrap_or_default(),
            }
        } else if any("idx_case_number") {
            StorageError::Duplicate {
                field: "case_number",
                value: record.case_number.clone(),
            }
        } else if any("idx_case_id") {
            StorageError::Duplicate {
                field: "id",
                value: record.id.to_string(),
            }
        } else {
            StorageError::Backend(messages.join("; "))
        }
    }

    fn update_statement(patch: &CasePatch) -> String {
        let mut sets = vec![
            "sync_version = sync_version + 1",
            "last_synced_at = $synced_at",
        ];
        if patch.stage.is_some() {
            sets.push("stage = $stage");
        }
        if patch.next_hearing_date.is_some() {
            sets.push("next_hearing_date = $next_hearing_date");
        }
        format!(
            "UPDATE cases SET {} WHERE case_id = $cid AND sync_version = $expected RETURN AFTER",
            sets.join(", ")
        )
    }
}

#[async_trait]
impl CaseStore for SurrealCaseStore {
    async fn list_sync_eligible(&self) -> StorageResult<Vec<CaseRecord>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM cases WHERE status = 'ACTIVE' \
                 AND cnr_number != NONE AND cnr_number != NULL ORDER BY case_id ASC",
            )
            .await?;
        let rows: Vec<DbCase> = res.take(0)?;

        let mut cases = Vec::with_capacity(rows.len());
        for row in rows {
            let record = row.into_record()?;
            if record.is_sync_eligible() {
                cases.push(record);
            }
        }
        Ok(cases)
    }

    async fn get_case(&self, id: &CaseId) -> StorageResult<Option<CaseRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM cases WHERE case_id = $cid")
            .bind(("cid", id.0.clone()))
            .await?;
        let rows: Vec<DbCase> = res.take(0)?;
        rows.into_iter().next().map(DbCase::into_record).transpose()
    }

    #[instrument(skip(self, patch, synced_at), fields(case_id = %id))]
    async fn write_if_version(
        &self,
        id: &CaseId,
        expected_version: u64,
        patch: &CasePatch,
        synced_at: DateTime<Utc>,
    ) -> StorageResult<WriteOutcome> {
        let mut res = self
            .db
            .query(Self::update_statement(patch))
            .bind(("cid", id.0.clone()))
            .bind(("expected", expected_version))
            .bind(("synced_at", SurrealDatetime::from(synced_at)))
            .bind(("stage", patch.stage.clone()))
            .bind((
                "next_hearing_date",
                patch.next_hearing_date.map(|d| d.to_string()),
            ))
            .await?;
        let rows: Vec<DbCase> = res.take(0)?;

        if let Some(row) = rows.into_iter().next() {
            debug!(new_version = row.sync_version, "conditional write applied");
            return Ok(WriteOutcome::Written {
                new_version: row.sync_version,
            });
        }

        match self.get_case(id).await? {
            Some(current) => Ok(WriteOutcome::VersionMismatch {
                current_version: current.sync_version,
            }),
            None => Err(StorageError::CaseNotFound {
                case_id: id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_statement_only_sets_patched_fields() {
        let stmt = SurrealCaseStore::update_statement(&CasePatch {
            stage: Some("Evidence".into()),
            next_hearing_date: None,
        });
        assert!(stmt.contains("stage = $stage"));
        assert!(!stmt.contains("next_hearing_date = "));
        assert!(stmt.contains("sync_version = $expected"));
    }

    #[test]
    fn test_insert_error_maps_thrown_duplicate_cnr() {
        let record = CaseRecord::new("c1", "TS/1/2024", Some("CNR-1".into()));
        let err = SurrealCaseStore::insert_error(
            &record,
            &["An error occurred: duplicate cnr_number".to_string()],
        );
        assert_eq!(
            err,
            StorageError::Duplicate {
                field: "cnr_number",
                value: "CNR-1".into()
            }
        );
        let err = SurrealCaseStore::insert_error(&record, &["disk on fire".to_string()]);
        assert!(matches!(err, StorageError::Backend(_)));
    }

    #[test]
    fn test_db_case_round_trips_dates() {
        let record = CaseRecord::new("c1", "TS/1/2024", Some("CNR-1".into()))
            .with_next_hearing(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        let back = DbCase::from_record(&record).into_record().unwrap();
        assert_eq!(back, record);
    }
}

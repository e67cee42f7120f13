//! SurrealDB schema initialization
//!
//! Sets up the `cases` table with its indexes. Safe to call on every
//! connection (the `DEFINE` statements are idempotent).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Initialize all CourtSync tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing CourtSync SurrealDB schema");
    init_cases_table(db).await?;
    info!("CourtSync schema initialization complete");
    Ok(())
}

/// Initialize `cases` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE cases {
///   case_id:            STRING (unique)
///   case_number:        STRING (unique)
///   cnr_number:         STRING? (unique among present values, enforced in app logic)
///   case_title:         STRING
///   court_name:         STRING
///   stage:              STRING?
///   next_hearing_date:  STRING? (ISO-8601 date)
///   status:             STRING (ACTIVE | CLOSED | DISPOSED | ARCHIVED)
///   sync_version:       INT
///   last_synced_at:     DATETIME?
/// }
/// ```
///
/// `sync_version` is only ever bumped by the conditional update in
/// `SurrealCaseStore::write_if_version`.
async fn init_cases_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing cases table");

    let sql = r#"
        DEFINE TABLE cases AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX idx_case_id ON TABLE cases COLUMNS case_id UNIQUE;

        DEFINE INDEX idx_case_number ON TABLE cases COLUMNS case_number UNIQUE;

        DEFINE INDEX idx_cnr_number ON TABLE cases COLUMNS cnr_number;

        -- Eligibility scans filter on status
        DEFINE INDEX idx_status ON TABLE cases COLUMNS status;
    "#;

    db.query(sql)
        .await
        .map_err(|e| crate::StorageError::SchemaSetup(e.to_string()))?;
    info!("cases table initialized");
    Ok(())
}

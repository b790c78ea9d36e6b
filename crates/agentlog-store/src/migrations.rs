//! SurrealDB schema initialization
//!
//! Sets up all agentlog tables with their indexes. Safe to call multiple
//! times (idempotent).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Initialize all agentlog tables.
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing agentlog SurrealDB schema");

    init_events_table(db).await?;
    init_benchmark_runs_table(db).await?;
    init_benchmark_results_table(db).await?;
    init_health_probe_table(db).await?;

    info!("agentlog schema initialization complete");
    Ok(())
}

async fn run_ddl(db: &Surreal<Any>, sql: &str) -> StorageResult<()> {
    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Initialize `events` table
///
/// Schema:
/// ```text
/// TABLE events {
///   event_id:    STRING (record key, unique)
///   ts_us:       INT (epoch microseconds)
///   event_type:  STRING
///   level:       STRING
///   level_rank:  INT (debug=0 .. critical=4)
///   message_lc:  STRING (lowercased message for text search)
///   agent_id:    STRING?
///   session_id:  STRING?
///   run_key:     STRING ("" when not part of a benchmark run)
///   body:        STRING (canonical JSON of the event)
/// }
/// ```
///
/// Rows are never updated; retention cleanup is the only delete path.
async fn init_events_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing events table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS events AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_event_id ON TABLE events COLUMNS event_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_ts ON TABLE events COLUMNS ts_us, event_id;
        DEFINE INDEX IF NOT EXISTS idx_type_ts ON TABLE events COLUMNS event_type, ts_us;
        DEFINE INDEX IF NOT EXISTS idx_agent_ts ON TABLE events COLUMNS agent_id, ts_us;
        DEFINE INDEX IF NOT EXISTS idx_session_ts ON TABLE events COLUMNS session_id, ts_us;
        DEFINE INDEX IF NOT EXISTS idx_run_key ON TABLE events COLUMNS run_key;
        DEFINE INDEX IF NOT EXISTS idx_level_rank ON TABLE events COLUMNS level_rank;
    "#;

    run_ddl(db, sql).await?;
    info!("✓ events table initialized");
    Ok(())
}

/// Initialize `benchmark_runs` table
///
/// Status transitions are enforced in application logic: once a run reaches
/// `completed | failed | cancelled` its row is never rewritten.
async fn init_benchmark_runs_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing benchmark_runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS benchmark_runs AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE benchmark_runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_created ON TABLE benchmark_runs COLUMNS created_us;
    "#;

    run_ddl(db, sql).await?;
    info!("✓ benchmark_runs table initialized");
    Ok(())
}

/// Initialize `benchmark_results` table
///
/// `(run_id, task_id, config_name)` is unique: one result per work item.
async fn init_benchmark_results_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing benchmark_results table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS benchmark_results AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_task_config ON TABLE benchmark_results
            COLUMNS run_id, task_id, config_name UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_result_run ON TABLE benchmark_results COLUMNS run_id;
    "#;

    run_ddl(db, sql).await?;
    info!("✓ benchmark_results table initialized");
    Ok(())
}

/// Scratch table written and cleared by health checks.
async fn init_health_probe_table(db: &Surreal<Any>) -> StorageResult<()> {
    run_ddl(db, "DEFINE TABLE IF NOT EXISTS health_probe SCHEMALESS;").await?;
    debug!("✓ health_probe table initialized");
    Ok(())
}

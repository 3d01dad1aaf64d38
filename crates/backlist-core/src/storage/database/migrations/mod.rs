mod v1_initial;

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::Result;

/// One forward-only schema step.
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub apply: fn(&Connection) -> Result<()>,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "authors, read books, catalog entries, recommendations, metadata",
    apply: v1_initial::apply,
}];

/// Versions recorded in `schema_migrations`; empty for a fresh file.
pub fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>> {
    let tracked = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !tracked {
        return Ok(BTreeSet::new());
    }

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, u32>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(versions)
}

/// Brings the schema up to date. Each pending step commits together with its bookkeeping row.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let done = applied_versions(conn)?;
    for step in MIGRATIONS.iter().filter(|m| !done.contains(&m.version)) {
        debug!(version = step.version, description = step.description, "applying migration");
        let tx = conn.transaction()?;
        (step.apply)(&tx)?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![step.version, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        info!(version = step.version, "schema migrated");
    }
    Ok(())
}

mod connection;
mod migrations;
mod schema;

pub use connection::{ConnectionPool, Location};
pub use migrations::{Migration, applied_versions, migrate};
pub use schema::SCHEMA_VERSION;

use std::path::Path;
use std::sync::MutexGuard;

use rusqlite::{Connection, Transaction};

use crate::error::Result;

/// The local store. Repositories are built on top of the guarded connection.
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Opens (creating if needed) the store at `location` and applies pending migrations.
    pub fn connect(location: Location) -> Result<Self> {
        let pool = ConnectionPool::connect(location)?;
        migrate(&mut pool.lock())?;
        Ok(Self { pool })
    }

    pub fn open(path: &Path) -> Result<Self> {
        Self::connect(Location::File(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::connect(Location::Memory)
    }

    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.pool.lock()
    }

    pub fn path(&self) -> Option<&Path> {
        self.pool.file_path()
    }

    /// Runs `f` inside one write transaction. Any error rolls everything back.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.pool.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn schema_versions(&self) -> Result<Vec<u32>> {
        let conn = self.pool.lock();
        Ok(applied_versions(&conn)?.into_iter().collect())
    }
}

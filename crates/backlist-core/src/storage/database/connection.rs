use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use super::schema::apply_pragmas;
use crate::error::Result;

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Memory,
    File(PathBuf),
}

/// Single mutex-guarded connection. One writer process at a time is assumed.
pub struct ConnectionPool {
    location: Location,
    conn: Mutex<Connection>,
}

impl ConnectionPool {
    pub fn connect(location: Location) -> Result<Self> {
        let conn = match &location {
            Location::Memory => Connection::open_in_memory()?,
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
        };
        apply_pragmas(&conn)?;
        Ok(Self {
            location,
            conn: Mutex::new(conn),
        })
    }

    /// A panicked holder cannot leave a half-applied transaction behind, so a poisoned lock is reused.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn file_path(&self) -> Option<&Path> {
        match &self.location {
            Location::Memory => None,
            Location::File(path) => Some(path),
        }
    }
}

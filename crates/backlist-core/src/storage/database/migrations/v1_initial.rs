use rusqlite::Connection;

use crate::error::Result;
use crate::storage::database::schema;

pub(super) fn apply(conn: &Connection) -> Result<()> {
    schema::create_tables(conn)?;
    schema::create_indexes(conn)
}

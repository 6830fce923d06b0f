//! Extensions Database Migrations

use rusqlite::Connection;

use crate::SDKResult;

/// Extension state tables SQL (001)
pub const EXTENSIONS_TABLES_SQL: &str = include_str!("001_extensions_tables.sql");

/// Run all extensions migrations
pub fn run_migrations(conn: &Connection) -> SDKResult<()> {
    conn.execute_batch(EXTENSIONS_TABLES_SQL)?;
    Ok(())
}

//! SQLite persistence for networks, devices, points and runtime values
//!
//! Rows are read through `sqlx::query` with explicit hydration; every insert
//! and update runs the entity's `validate()` first. Unique constraint
//! violations surface as [`PointError::Conflict`].

mod devices;
mod mappings;
mod networks;
mod points;
mod values;

use errors::{PointError, PointResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS networks (
        uuid TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL UNIQUE,
        type TEXT NOT NULL,
        enable INTEGER NOT NULL DEFAULT 1,
        fault INTEGER NOT NULL DEFAULT 0,
        tags TEXT,
        rtu_port TEXT UNIQUE,
        rtu_speed INTEGER NOT NULL DEFAULT 9600,
        rtu_stop_bits INTEGER NOT NULL DEFAULT 1,
        rtu_parity TEXT NOT NULL DEFAULT 'N',
        rtu_byte_size INTEGER NOT NULL DEFAULT 8,
        tcp_ip TEXT,
        tcp_port INTEGER,
        timeout INTEGER NOT NULL DEFAULT 3,
        polling_interval_runtime INTEGER NOT NULL DEFAULT 2,
        point_interval_ms_between_points INTEGER NOT NULL DEFAULT 30,
        UNIQUE (tcp_ip, tcp_port)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        uuid TEXT PRIMARY KEY NOT NULL,
        network_uuid TEXT NOT NULL REFERENCES networks(uuid) ON DELETE CASCADE,
        name TEXT NOT NULL,
        enable INTEGER NOT NULL DEFAULT 1,
        fault INTEGER NOT NULL DEFAULT 0,
        tags TEXT,
        address INTEGER NOT NULL,
        zero_based INTEGER NOT NULL DEFAULT 0,
        ping_point TEXT,
        supports_multiple_rw INTEGER NOT NULL DEFAULT 0,
        UNIQUE (name, network_uuid),
        UNIQUE (address, network_uuid)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS points (
        uuid TEXT PRIMARY KEY NOT NULL,
        device_uuid TEXT NOT NULL REFERENCES devices(uuid) ON DELETE CASCADE,
        name TEXT NOT NULL,
        enable INTEGER NOT NULL DEFAULT 1,
        writable INTEGER NOT NULL DEFAULT 0,
        cov_threshold REAL NOT NULL DEFAULT 0,
        value_round INTEGER NOT NULL DEFAULT 2,
        value_operation TEXT,
        input_min REAL,
        input_max REAL,
        scale_min REAL,
        scale_max REAL,
        tags TEXT,
        fallback_value REAL,
        register INTEGER NOT NULL,
        register_length INTEGER NOT NULL,
        function_code TEXT NOT NULL,
        data_type TEXT NOT NULL DEFAULT 'RAW',
        data_endian TEXT NOT NULL DEFAULT 'BEB_LEW',
        write_value_once INTEGER NOT NULL DEFAULT 0,
        UNIQUE (register, function_code, device_uuid)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS point_stores (
        point_uuid TEXT PRIMARY KEY NOT NULL REFERENCES points(uuid) ON DELETE CASCADE,
        value REAL,
        value_original REAL,
        value_raw TEXT,
        fault INTEGER NOT NULL DEFAULT 0,
        fault_message TEXT,
        ts_value TEXT,
        ts_fault TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS priority_arrays (
        point_uuid TEXT PRIMARY KEY NOT NULL REFERENCES points(uuid) ON DELETE CASCADE,
        slots TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mappings (
        uuid TEXT PRIMARY KEY NOT NULL,
        point_uuid TEXT NOT NULL UNIQUE REFERENCES points(uuid) ON DELETE CASCADE,
        mapped_point_uuid TEXT NOT NULL,
        type TEXT NOT NULL,
        mapping_state TEXT NOT NULL DEFAULT 'MAPPED',
        UNIQUE (mapped_point_uuid, type)
    )
    "#,
];

/// Shared handle to the point database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database at `url` (`sqlite://path` or `sqlite::memory:`)
    pub async fn connect(url: &str) -> PointResult<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool_options = if in_memory {
            // Every connection to :memory: is its own database
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;
        info!("SQLite database connected: {}", url);
        Ok(Self { pool })
    }

    /// In-memory database with the schema applied
    pub async fn in_memory() -> PointResult<Self> {
        let store = Self::connect("sqlite::memory:").await?;
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all tables; safe to call on an existing database
    pub async fn init_schema(&self) -> PointResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

/// Map a write failure, turning unique violations into conflicts
pub(crate) fn write_error(err: sqlx::Error, entity: &str) -> PointError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return PointError::conflict(format!(
                "{} violates a unique constraint: {}",
                entity,
                db_err.message()
            ));
        }
        if db_err.is_foreign_key_violation() {
            return PointError::not_found(format!("parent of {}", entity));
        }
    }
    PointError::from(err)
}

/// Parse a text column into one of the model enums
pub(crate) fn parse_column<T>(row: &sqlx::sqlite::SqliteRow, column: &str) -> PointResult<T>
where
    T: FromStr<Err = PointError>,
{
    use sqlx::Row;
    let text: String = row.try_get(column)?;
    text.parse()
}

use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self as diesel_r2d2, ManageConnection};
use diesel::{PgConnection, SqliteConnection};
use rocket::{Build, Rocket};
use rocket_sync_db_pools::{database, r2d2, Config, PoolResult, Poolable};

/// A connection to either of the supported databases.
///
/// Production runs on PostgreSQL, the test suite on SQLite. Every query in
/// this crate is written against this type so that both share one code path.
#[derive(diesel::MultiConnection)]
pub enum AnyConnection {
    Postgresql(PgConnection),
    Sqlite(SqliteConnection),
}

#[database("mylab")]
pub struct LabDatabase(AnyConnection);

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

/// Opens a connection, picking the backend from the URL scheme.
pub fn establish(url: &str) -> ConnectionResult<AnyConnection> {
    if is_postgres_url(url) {
        Ok(AnyConnection::Postgresql(PgConnection::establish(url)?))
    } else {
        let mut conn = SqliteConnection::establish(url)?;
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
        Ok(AnyConnection::Sqlite(conn))
    }
}

/// r2d2 manager that dispatches on the URL scheme instead of probing backends.
#[derive(Debug, Clone)]
pub struct LabConnectionManager {
    url: String,
}

impl LabConnectionManager {
    pub fn new(url: &str) -> Self {
        LabConnectionManager {
            url: url.to_string(),
        }
    }
}

impl ManageConnection for LabConnectionManager {
    type Connection = AnyConnection;
    type Error = diesel_r2d2::Error;

    fn connect(&self) -> Result<AnyConnection, Self::Error> {
        establish(&self.url).map_err(diesel_r2d2::Error::ConnectionError)
    }

    fn is_valid(&self, conn: &mut AnyConnection) -> Result<(), Self::Error> {
        conn.batch_execute("SELECT 1")
            .map_err(diesel_r2d2::Error::QueryError)
    }

    fn has_broken(&self, _conn: &mut AnyConnection) -> bool {
        false
    }
}

impl Poolable for AnyConnection {
    type Manager = LabConnectionManager;
    type Error = std::convert::Infallible;

    fn pool(db_name: &str, rocket: &Rocket<Build>) -> PoolResult<Self> {
        let config = Config::from(db_name, rocket)?;
        let manager = LabConnectionManager::new(&config.url);
        let pool = r2d2::Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_secs(config.timeout as u64))
            .build(manager)?;
        Ok(pool)
    }
}

/// Creates all tables that do not exist yet. With `force`, everything is
/// dropped first.
pub fn initialize(conn: &mut AnyConnection, force: bool) -> QueryResult<()> {
    let init_sql = match conn {
        AnyConnection::Postgresql(_) => include_str!("../db/postgres/initialize.sql"),
        AnyConnection::Sqlite(_) => include_str!("../db/sqlite/initialize.sql"),
    };

    if force {
        warn!("Dropping all tables");
        conn.batch_execute(include_str!("../db/drop.sql"))?;
    }
    conn.batch_execute(init_sql)?;
    Ok(())
}

/// Random identifier for new rows. Keys are generated here so inserts never
/// depend on `RETURNING`.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

use anyhow::{Context, Result};
use diesel::{
    Connection, PgConnection,
    connection::CacheSize,
    r2d2::{ConnectionManager, CustomizeConnection, Error as R2d2Error, Pool},
};
use std::sync::Arc;

/// Transaction poolers in front of Postgres do not keep prepared statements
/// between checkouts, so every pooled connection runs without the cache.
#[derive(Debug, Default)]
struct DisablePreparedStatements;

impl CustomizeConnection<PgConnection, R2d2Error> for DisablePreparedStatements {
    fn on_acquire(&self, conn: &mut PgConnection) -> std::result::Result<(), R2d2Error> {
        conn.set_prepared_statement_cache_size(CacheSize::Disabled);
        Ok(())
    }
}

pub type PgPoolSquad = Pool<ConnectionManager<PgConnection>>;

pub fn establish_connection(database_url: &str) -> Result<PgPoolSquad> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .connection_customizer(Box::new(DisablePreparedStatements))
        .build(manager)?;
    Ok(pool)
}

/// Runs a diesel closure on the blocking pool with a checked-out connection.
pub async fn with_connection<T, F>(db_pool: &Arc<PgPoolSquad>, operation: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
{
    let pool = Arc::clone(db_pool);
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("failed to check out postgres connection")?;
        operation(&mut conn)
    })
    .await
    .context("postgres task panicked or was cancelled")?
}

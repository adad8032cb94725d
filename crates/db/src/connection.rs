use std::str::FromStr;
use std::time::Duration;

use plantwise_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let url = if database_url == ":memory:" { "sqlite::memory:" } else { database_url };
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)));
    if in_memory {
        // Every new connection would open a fresh empty database.
        pool = pool.max_connections(1).idle_timeout(None).max_lifetime(None);
    }

    pool.connect_with(options).await
}

/// Round-trips a trivial query through the pool.
pub async fn ping(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::{connect_with_settings, ping};

    #[tokio::test]
    async fn in_memory_pool_keeps_state_across_queries() {
        let pool = connect_with_settings(":memory:", 4, 5).await.expect("connect");
        sqlx::query("CREATE TABLE probe (id INTEGER)").execute(&pool).await.expect("create");
        sqlx::query("INSERT INTO probe (id) VALUES (1)").execute(&pool).await.expect("insert");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM probe")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 1);
        ping(&pool).await.expect("ping");
    }
}

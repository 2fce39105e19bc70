#![allow(dead_code)]

use lazystore_core::users::{self, NewUser};
use lazystore_core::{Store, StoreConfig};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Log to the test harness's captured output; `RUST_LOG` overrides the level
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}

/// Fresh database file with the `user_data` schema and nothing else
pub async fn empty_store() -> anyhow::Result<(TempDir, Store)> {
    init_tracing();
    let dir = TempDir::new()?;
    let mut config = StoreConfig::new(dir.path().join("users.db"));
    config.retry.base_delay_ms = 1;
    let store = Store::new(config);
    store
        .with_connection("ensure_schema", async |conn| users::ensure_schema(conn).await)
        .await?;
    Ok((dir, store))
}

/// Store seeded with one user per age, named `user{i}`
pub async fn seeded_store(ages: &[u32]) -> anyhow::Result<(TempDir, Store)> {
    let (dir, store) = empty_store().await?;
    store
        .in_transaction("seed", async |conn| {
            for (i, age) in ages.iter().enumerate() {
                let user = NewUser::new(format!("user{i}"), format!("user{i}@example.com"), *age);
                users::insert_user(conn, &user).await?;
            }
            Ok(())
        })
        .await?;
    Ok((dir, store))
}

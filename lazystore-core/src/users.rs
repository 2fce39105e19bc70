//! The `user_data` table
//!
//! Every operation here borrows a connection (or takes the [`Store`] when it
//! needs one connection per step), so callers choose the scope, transaction
//! and retry wrappers around it.

use futures::future;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::batch::{batches, Batches};
use crate::connection::Store;
use crate::error::{Result, StoreError};
use crate::paginate::{Paginator, QueryPages};
use crate::query::Query;
use crate::stream::RowStream;
use crate::value::Record;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS user_data (
        user_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        age DECIMAL(3,0) NOT NULL
    )";

// rowid order keeps streams and pages over the same table in step
static ALL_USERS: Query = Query::from_static(
    "stream_users",
    "SELECT user_id, name, email, age FROM user_data ORDER BY rowid",
);
static ALL_AGES: Query = Query::from_static(
    "stream_user_ages",
    "SELECT age FROM user_data ORDER BY rowid",
);

/// A user before insertion; the identifier is generated on insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub age: u32,
}

impl NewUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>, age: u32) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            age,
        }
    }
}

/// Create `user_data` if it does not exist
pub async fn ensure_schema(conn: &mut SqliteConnection) -> Result<()> {
    Query::new(SCHEMA).named("ensure_schema").execute(conn).await?;
    Ok(())
}

pub async fn insert_user(conn: &mut SqliteConnection, user: &NewUser) -> Result<Uuid> {
    let id = Uuid::new_v4();
    Query::new("INSERT INTO user_data (user_id, name, email, age) VALUES (?, ?, ?, ?)")
        .named("insert_user")
        .bind(id.to_string())
        .bind(user.name.as_str())
        .bind(user.email.as_str())
        .bind(user.age)
        .execute(conn)
        .await?;
    debug!(user_id = %id, "inserted user");
    Ok(id)
}

/// Returns whether a row was changed
pub async fn update_email(conn: &mut SqliteConnection, user_id: &str, email: &str) -> Result<bool> {
    let changed = Query::new("UPDATE user_data SET email = ? WHERE user_id = ?")
        .named("update_email")
        .bind(email)
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(changed > 0)
}

pub async fn fetch_user(conn: &mut SqliteConnection, user_id: &str) -> Result<Option<Record>> {
    Query::new("SELECT user_id, name, email, age FROM user_data WHERE user_id = ?")
        .named("fetch_user")
        .bind(user_id)
        .fetch_optional(conn)
        .await
}

pub async fn count_users(conn: &mut SqliteConnection) -> Result<u64> {
    let row = Query::new("SELECT COUNT(*) AS total FROM user_data")
        .named("count_users")
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| StoreError::decode("total", "count returned no row"))?;
    Ok(row.number("total")? as u64)
}

/// Every user, in insertion order
pub fn all_users() -> Query {
    ALL_USERS.clone()
}

/// Users strictly older than `age`, in insertion order
pub fn users_over(age: i64) -> Query {
    Query::new("SELECT user_id, name, email, age FROM user_data WHERE age > ? ORDER BY rowid")
        .named("users_over")
        .bind(age)
}

/// Lazily stream every user, one row at a time
pub fn stream_users(conn: &mut SqliteConnection) -> RowStream<'_> {
    ALL_USERS.stream(conn)
}

/// Lazily stream ages only
pub fn stream_user_ages(conn: &mut SqliteConnection) -> impl Stream<Item = Result<f64>> + '_ {
    ALL_AGES
        .stream(conn)
        .map(|row| row.and_then(|r| r.number("age")))
}

/// Stream every user in batches of `size`
pub fn stream_users_in_batches(
    conn: &mut SqliteConnection,
    size: usize,
) -> Result<Batches<RowStream<'_>, Record>> {
    batches(stream_users(conn), size)
}

/// Flatten `batches` and keep users strictly older than `age`.
///
/// Rows whose age cannot be read as a number are skipped with a warning.
pub fn users_older_than<S>(batches: S, age: f64) -> impl Stream<Item = Result<Record>>
where
    S: Stream<Item = Result<Vec<Record>>>,
{
    batches
        .map_ok(|batch| stream::iter(batch.into_iter().map(Ok::<_, StoreError>)))
        .try_flatten()
        .try_filter(move |user| {
            let keep = match user.number("age") {
                Ok(user_age) => user_age > age,
                Err(e) => {
                    let user_id = user.get("user_id").map(|v| v.to_string()).unwrap_or_default();
                    warn!(user_id = %user_id, error = %e, "skipping user with unreadable age");
                    false
                }
            };
            future::ready(keep)
        })
}

/// One page of users starting at `offset`
pub async fn paginate_users(
    conn: &mut SqliteConnection,
    page_size: usize,
    offset: u64,
) -> Result<Vec<Record>> {
    ALL_USERS.window(page_size, offset).fetch_all(conn).await
}

/// Pages of users fetched on demand, one connection per page
pub fn lazy_pagination(store: &Store, page_size: usize) -> Result<Paginator<QueryPages>> {
    Paginator::new(QueryPages::new(store.clone(), all_users()), page_size)
}

/// Pages of users sized by the store's configured `page_size`
pub fn paged_users(store: &Store) -> Result<Paginator<QueryPages>> {
    store.paginate(all_users())
}

/// All users and users older than `age`, fetched concurrently
pub async fn fetch_concurrently(store: &Store, age: i64) -> Result<(Vec<Record>, Vec<Record>)> {
    let queries = [all_users(), users_over(age)];
    let ops = queries.iter().map(|query| {
        store.with_connection(query.name(), async move |conn| query.fetch_all(conn).await)
    });
    let mut results = store.fanout(ops).await?.into_iter();
    match (results.next(), results.next()) {
        (Some(all), Some(older)) => Ok((all, older)),
        _ => Err(StoreError::decode("fanout", "expected two result sets")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{average, average_by};
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    async fn seeded(ages: &[u32]) -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(StoreConfig::new(dir.path().join("users.db")));
        store
            .in_transaction("seed", async |conn| {
                ensure_schema(conn).await?;
                for (i, age) in ages.iter().enumerate() {
                    let user = NewUser::new(format!("user{i}"), format!("user{i}@example.com"), *age);
                    insert_user(conn, &user).await?;
                }
                Ok(())
            })
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_insert_fetch_update() {
        let (_dir, store) = seeded(&[]).await;

        store
            .with_connection("crud", async |conn| {
                let id = insert_user(conn, &NewUser::new("Ada", "ada@example.com", 36)).await?;
                let user = fetch_user(conn, &id.to_string()).await?.unwrap();
                assert_eq!(user.text("name")?, "Ada");
                assert_eq!(user.number("age")?, 36.0);

                assert!(update_email(conn, &id.to_string(), "ada@lovelace.dev").await?);
                assert!(!update_email(conn, "no-such-id", "x@example.com").await?);
                let user = fetch_user(conn, &id.to_string()).await?.unwrap();
                assert_eq!(user.text("email")?, "ada@lovelace.dev");
                assert_eq!(count_users(conn).await?, 1);
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (_dir, store) = seeded(&[30]).await;
        let err = store
            .with_connection("dup", async |conn| {
                insert_user(conn, &NewUser::new("Other", "user0@example.com", 40)).await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Query { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_stream_and_average() {
        let (_dir, store) = seeded(&[20, 30, 40]).await;
        let mut scoped = store.acquire().await.unwrap();

        let rows: Vec<Record> = stream_users(scoped.conn()).try_collect().await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].text("name").unwrap(), "user0");

        let mean = average(stream_users(scoped.conn()), "age").await.unwrap();
        assert_eq!(mean, 30.0);
        let mean = average_by(stream_user_ages(scoped.conn()), "age").await.unwrap();
        assert_eq!(mean, 30.0);

        scoped.release().await;
        assert_eq!(store.stats().open(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_stream_frees_connection() {
        let (_dir, store) = seeded(&[20, 30, 40, 50]).await;
        let mut scoped = store.acquire().await.unwrap();

        let mut rows = stream_users(scoped.conn());
        let first = rows.next().await.unwrap().unwrap();
        assert_eq!(first.text("name").unwrap(), "user0");
        rows.close();

        // The half-read cursor no longer holds the connection
        let user_id = first.text("user_id").unwrap();
        let renamed = update_email(scoped.conn(), user_id, "first@example.com").await.unwrap();
        assert!(renamed);
        assert_eq!(count_users(scoped.conn()).await.unwrap(), 4);

        {
            let mut dropped = stream_users(scoped.conn());
            dropped.next().await.unwrap().unwrap();
        }
        let ages: Vec<f64> = stream_user_ages(scoped.conn()).try_collect().await.unwrap();
        assert_eq!(ages, vec![20.0, 30.0, 40.0, 50.0]);

        scoped.release().await;
        assert_eq!(store.stats().open(), 0);
    }

    #[tokio::test]
    async fn test_configured_sizes() {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig::new(dir.path().join("users.db"));
        config.batch_size = 2;
        config.page_size = 3;
        config.fanout_limit = 1;
        let store = Store::new(config);
        store
            .in_transaction("seed", async |conn| {
                ensure_schema(conn).await?;
                for i in 0..5 {
                    let user = NewUser::new(format!("u{i}"), format!("u{i}@example.com"), 30 + i);
                    insert_user(conn, &user).await?;
                }
                Ok(())
            })
            .await
            .unwrap();

        let mut pager = paged_users(&store).unwrap();
        assert_eq!(pager.page_size(), 3);
        assert_eq!(pager.next_page().await.unwrap().unwrap().len(), 3);
        assert_eq!(pager.next_page().await.unwrap().unwrap().len(), 2);
        assert!(pager.next_page().await.unwrap().is_none());
        assert_eq!(pager.fetches(), 2);

        let mut scoped = store.acquire().await.unwrap();
        let sizes: Vec<usize> = store
            .batches(stream_users(scoped.conn()))
            .unwrap()
            .map_ok(|batch| batch.len())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(sizes, vec![2, 2, 1]);
        scoped.release().await;

        let (all, older) = fetch_concurrently(&store, 32).await.unwrap();
        assert_eq!((all.len(), older.len()), (5, 2));
        assert_eq!(store.stats().open(), 0);
    }

    #[tokio::test]
    async fn test_batches_and_filter() {
        let (_dir, store) = seeded(&[20, 26, 25, 60, 31]).await;
        let mut scoped = store.acquire().await.unwrap();

        let batched = stream_users_in_batches(scoped.conn(), 2).unwrap();
        let older: Vec<Record> = users_older_than(batched, 25.0).try_collect().await.unwrap();
        let names: Vec<&str> = older.iter().map(|u| u.text("name").unwrap()).collect();
        assert_eq!(names, vec!["user1", "user3", "user4"]);

        scoped.release().await;
    }

    #[tokio::test]
    async fn test_filter_skips_unreadable_age() {
        let batch = vec![
            Record::new().with("user_id", "a").with("age", 30i64),
            Record::new().with("user_id", "b").with("age", "n/a"),
            Record::new().with("user_id", "c").with("age", 50i64),
        ];
        let kept: Vec<Record> = users_older_than(stream::iter(vec![Ok(batch)]), 25.0)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn test_pages_match_stream() {
        let (_dir, store) = seeded(&[21, 22, 23, 24, 25, 26, 27]).await;

        let streamed: Vec<Record> = {
            let mut scoped = store.acquire().await.unwrap();
            let rows = stream_users(scoped.conn()).try_collect().await.unwrap();
            scoped.release().await;
            rows
        };

        let mut pager = lazy_pagination(&store, 3).unwrap();
        let mut paged = Vec::new();
        while let Some(page) = pager.next_page().await.unwrap() {
            assert!(page.len() <= 3);
            paged.extend(page.rows);
        }

        assert_eq!(paged, streamed);
        assert_eq!(pager.fetches(), 3);
        assert_eq!(store.stats().open(), 0);

        let second = store
            .with_connection("page", async |conn| paginate_users(conn, 3, 3).await)
            .await
            .unwrap();
        assert_eq!(second, streamed[3..6].to_vec());
    }

    #[tokio::test]
    async fn test_fetch_concurrently() {
        let (_dir, store) = seeded(&[30, 45, 50, 18]).await;
        let (all, older) = fetch_concurrently(&store, 40).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(older.len(), 2);
        assert_eq!(store.stats().acquired(), store.stats().released());
    }
}

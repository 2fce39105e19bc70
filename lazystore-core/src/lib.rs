pub mod aggregate;
pub mod batch;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod fanout;
pub mod paginate;
pub mod query;
pub mod retry;
pub mod stream;
pub mod transaction;
pub mod users;
pub mod value;

pub use aggregate::{aggregate_by, average, average_by, AggregateState};
pub use batch::{batches, Batches};
pub use cache::{CacheEntry, ResultCache};
pub use config::{RetryConfig, StoreConfig};
pub use connection::{ConnectionStats, ScopedConnection, Store};
pub use error::{Result, StoreError, TxStage};
pub use fanout::{fanout, Fanout};
pub use paginate::{Continuation, Page, PageSource, Paginator, QueryPages};
pub use query::{Query, QueryKey};
pub use retry::{RetryAttempt, RetryPolicy};
pub use stream::RowStream;
pub use transaction::{with_transaction, TransactionScope};
pub use value::{Record, Value};

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::OrderUid;
pub use error::{Result, StorageError, StorageErrorKind};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::{OrderStore, OrderStoreExt, PersistOutcome, RowCounts};

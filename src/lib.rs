// RustyDAO - repeatable, parameterized queries that map rows to entities
// This is the library root that exposes the public API
//
// A Query holds a SQL template plus its parameter slots and executes in one
// of several modes (eager list, lazy cached/uncached list, auto-closing
// iterator, unique). The rows come from any `Database`; `storage` provides
// an in-memory one.

pub mod config;
pub mod context;
pub mod error;
pub mod query;
pub mod session;
pub mod storage;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::Config;
pub use context::DaoContext;
pub use error::{DaoError, DaoResult};
pub use query::{
    CloseableIterator, LazyList, LoggingQueryListener, Query, QueryListener, QueryMode,
    QueryTiming, SlotKind, ToParameter,
};
pub use session::{Cursor, Database, EntityMapper, Record, RecordMapper};
pub use storage::{MemoryDatabase, Row, Value};
pub use utils::SerializationErrorListener;

// DaoContext
// Ties a database to the listeners that observe it. Queries hold an
// Arc<DaoContext>, so each context (and each test) has its own listeners.

use crate::config::QueryConfig;
use crate::query::listener::{LoggingQueryListener, QueryListener};
use crate::session::Database;
use crate::utils::SerializationErrorListener;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

pub struct DaoContext {
    database: Arc<dyn Database>,
    query_listener: RwLock<Option<Arc<dyn QueryListener>>>,
    serialization_listener: RwLock<Option<Arc<dyn SerializationErrorListener>>>,
}

impl DaoContext {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self {
            database,
            query_listener: RwLock::new(None),
            serialization_listener: RwLock::new(None),
        }
    }

    /// Build a context and install a `LoggingQueryListener` if the config asks for one
    pub fn from_config(database: Arc<dyn Database>, config: &QueryConfig) -> Self {
        let context = Self::new(database);
        if config.log_queries {
            let threshold = (config.slow_query_threshold_ms > 0)
                .then(|| Duration::from_millis(config.slow_query_threshold_ms));
            context.set_query_listener(Some(Arc::new(LoggingQueryListener::new(threshold))));
        }
        context
    }

    pub fn database(&self) -> &dyn Database {
        self.database.as_ref()
    }

    /// Replace the listener; `None` disables notifications.
    /// Executions already in flight keep the listener they started with.
    pub fn set_query_listener(&self, listener: Option<Arc<dyn QueryListener>>) {
        *self.query_listener.write() = listener;
    }

    pub fn query_listener(&self) -> Option<Arc<dyn QueryListener>> {
        self.query_listener.read().clone()
    }

    /// Replace the listener told about blob (de)serialization failures
    pub fn set_serialization_listener(&self, listener: Option<Arc<dyn SerializationErrorListener>>) {
        *self.serialization_listener.write() = listener;
    }

    pub fn serialization_listener(&self) -> Option<Arc<dyn SerializationErrorListener>> {
        self.serialization_listener.read().clone()
    }
}

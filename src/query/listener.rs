// Query execution listener
// Observers receive one timing report per successful query execution

use std::fmt;
use std::time::Duration;

/// The execution mode a timing report belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryMode {
    List,
    ListLazy,
    ListLazyUncached,
    ListIterator,
    Unique,
    UniqueOrThrow,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::List => "list",
            QueryMode::ListLazy => "list_lazy",
            QueryMode::ListLazyUncached => "list_lazy_uncached",
            QueryMode::ListIterator => "list_iterator",
            QueryMode::Unique => "unique",
            QueryMode::UniqueOrThrow => "unique_or_throw",
        }
    }

    /// Modes that materialize their result before returning
    pub fn is_eager(&self) -> bool {
        matches!(
            self,
            QueryMode::List | QueryMode::Unique | QueryMode::UniqueOrThrow
        )
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durations measured from the same call-entry instant.
///
/// `db_query_time` ends when the database returned its cursor.
/// `total_time` ends when the result was fully materialized and is only
/// present for eager modes (see [`QueryMode::is_eager`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTiming {
    pub mode: QueryMode,
    pub db_query_time: Duration,
    pub total_time: Option<Duration>,
}

/// Receives timing reports from every query executed through a `DaoContext`
pub trait QueryListener: Send + Sync {
    fn on_query(&self, sql: &str, timing: &QueryTiming);
}

impl<F> QueryListener for F
where
    F: Fn(&str, &QueryTiming) + Send + Sync,
{
    fn on_query(&self, sql: &str, timing: &QueryTiming) {
        self(sql, timing)
    }
}

/// Logs every query at debug level and slow ones at warn level
#[derive(Debug, Clone, Default)]
pub struct LoggingQueryListener {
    slow_query_threshold: Option<Duration>,
}

impl LoggingQueryListener {
    pub fn new(slow_query_threshold: Option<Duration>) -> Self {
        Self {
            slow_query_threshold,
        }
    }

    fn is_slow(&self, timing: &QueryTiming) -> bool {
        let elapsed = timing.total_time.unwrap_or(timing.db_query_time);
        self.slow_query_threshold
            .is_some_and(|threshold| elapsed >= threshold)
    }
}

impl QueryListener for LoggingQueryListener {
    fn on_query(&self, sql: &str, timing: &QueryTiming) {
        let db_us = timing.db_query_time.as_micros() as u64;
        let total_us = timing.total_time.map(|t| t.as_micros() as u64);
        if self.is_slow(timing) {
            tracing::warn!(mode = %timing.mode, sql, db_us, total_us, "slow query");
        } else {
            tracing::debug!(mode = %timing.mode, sql, db_us, total_us, "query executed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(db_ms: u64, total_ms: Option<u64>) -> QueryTiming {
        QueryTiming {
            mode: QueryMode::List,
            db_query_time: Duration::from_millis(db_ms),
            total_time: total_ms.map(Duration::from_millis),
        }
    }

    #[test]
    fn test_slow_query_uses_total_time_when_present() {
        let listener = LoggingQueryListener::new(Some(Duration::from_millis(100)));
        assert!(listener.is_slow(&timing(10, Some(150))));
        assert!(!listener.is_slow(&timing(10, Some(50))));
        assert!(listener.is_slow(&timing(120, None)));
    }

    #[test]
    fn test_no_threshold_is_never_slow() {
        let listener = LoggingQueryListener::default();
        assert!(!listener.is_slow(&timing(10_000, Some(10_000))));
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(QueryMode::ListLazyUncached.to_string(), "list_lazy_uncached");
        assert!(QueryMode::UniqueOrThrow.is_eager());
        assert!(!QueryMode::ListIterator.is_eager());
    }
}

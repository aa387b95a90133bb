// Database utilities
// SQL script execution, result dumps and blob (de)serialization helpers

use crate::context::DaoContext;
use crate::error::{DaoError, DaoResult};
use crate::session::{Cursor, Database, OwnedCursor};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Split a script into statements on "semicolon before a line break".
/// This is a simple regular expression, not an SQL parser, so a semicolon
/// followed by a newline inside a string literal will split the statement.
pub fn split_sql_script(script: &str) -> Vec<String> {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    let separator = SEPARATOR.get_or_init(|| {
        Regex::new(r";\s*[\n\r]").expect("statement separator regex is valid")
    });

    separator
        .split(script)
        .map(|statement| statement.trim().trim_end_matches(';').trim())
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

/// Execute statements one by one, skipping blank ones.
/// Returns the number of statements executed.
pub fn execute_sql_statements<S: AsRef<str>>(db: &dyn Database, statements: &[S]) -> DaoResult<usize> {
    let mut count = 0;
    for statement in statements {
        let statement = statement.as_ref().trim();
        if !statement.is_empty() {
            db.exec_sql(statement)?;
            count += 1;
        }
    }
    Ok(count)
}

/// Execute statements inside a transaction that is committed only if all succeed
pub fn execute_sql_statements_in_tx<S: AsRef<str>>(
    db: &dyn Database,
    statements: &[S],
) -> DaoResult<usize> {
    let tx = Transaction::begin(db)?;
    let count = execute_sql_statements(db, statements)?;
    tx.commit()?;
    Ok(count)
}

/// Execute a UTF-8 SQL script file. Returns the number of statements executed.
pub fn execute_sql_script(db: &dyn Database, path: &Path, transactional: bool) -> DaoResult<usize> {
    let script = fs::read_to_string(path)?;
    let statements = split_sql_script(&script);
    let count = if transactional {
        execute_sql_statements_in_tx(db, &statements)?
    } else {
        execute_sql_statements(db, &statements)?
    };
    tracing::info!(count, script = %path.display(), "executed SQL script");
    Ok(count)
}

/// Scoped transaction: ends (rolling back unless committed) when dropped
struct Transaction<'a> {
    db: &'a dyn Database,
    ended: bool,
}

impl<'a> Transaction<'a> {
    fn begin(db: &'a dyn Database) -> DaoResult<Self> {
        db.begin_transaction()?;
        Ok(Self { db, ended: false })
    }

    fn commit(mut self) -> DaoResult<()> {
        self.db.set_transaction_successful()?;
        self.ended = true;
        self.db.end_transaction()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.ended {
            if let Err(e) = self.db.end_transaction() {
                tracing::error!(error = %e, "failed to end transaction");
            }
        }
    }
}

/// Render every row of a cursor as a text table. Leaves the cursor positioned on its last row.
pub fn dump_cursor(cursor: &mut dyn Cursor) -> String {
    let column_names = cursor.column_names().to_vec();
    let mut rows = Vec::with_capacity(cursor.count());
    for position in 0..cursor.count() {
        if !cursor.move_to_position(position) {
            break;
        }
        rows.push(
            (0..column_names.len())
                .map(|i| cursor.value(i).map(ToString::to_string).unwrap_or_default())
                .collect::<Vec<String>>(),
        );
    }
    format_table(&column_names, &rows)
}

/// Log the full content of a table at debug level
pub fn log_table_dump(db: &dyn Database, table_name: &str) -> DaoResult<()> {
    let mut cursor = OwnedCursor::new(db.raw_query(&format!("SELECT * FROM {}", table_name), &[])?);
    let dump = dump_cursor(&mut *cursor);
    tracing::debug!(table = table_name, "\n{}", dump);
    Ok(())
}

/// Format rows of cells as a box-drawn table
pub fn format_table(column_names: &[String], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "No rows found".to_string();
    }

    let mut widths: Vec<usize> = column_names.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = |left: &str, middle: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{}{}{}\n", left, segments.join(middle), right)
    };
    let line = |cells: &[String]| {
        let mut out = String::from("│");
        for (cell, width) in cells.iter().zip(&widths) {
            out.push_str(&format!(" {:<width$} │", cell, width = width));
        }
        out.push('\n');
        out
    };

    let mut result = border("┌", "┬", "┐");
    result.push_str(&line(column_names));
    result.push_str(&border("├", "┼", "┤"));
    for row in rows {
        result.push_str(&line(row.as_slice()));
    }
    result.push_str(&border("└", "┴", "┘"));
    result.push_str(&format!("\n{} row(s) returned", rows.len()));
    result
}

/// Observes failures of the blob helpers. Installed per `DaoContext`.
pub trait SerializationErrorListener: Send + Sync {
    fn on_serialization_error(&self, error: &bincode::Error);

    fn on_deserialization_error(&self, error: &bincode::Error);
}

/// Serialize a blob-backed field; `None` stays `None`
pub fn serialize_object<T: Serialize>(
    context: &DaoContext,
    object: Option<&T>,
) -> DaoResult<Option<Vec<u8>>> {
    object
        .map(|o| {
            bincode::serialize(o).map_err(|e| {
                tracing::error!(error = %e, "cannot serialize object");
                if let Some(listener) = context.serialization_listener() {
                    listener.on_serialization_error(&e);
                }
                DaoError::Serialization(e)
            })
        })
        .transpose()
}

/// Deserialize a blob-backed field; `None` stays `None`
pub fn deserialize_object<T: DeserializeOwned>(
    context: &DaoContext,
    bytes: Option<&[u8]>,
) -> DaoResult<Option<T>> {
    bytes
        .map(|b| {
            bincode::deserialize(b).map_err(|e| {
                tracing::error!(error = %e, "inconsistent blob detected");
                if let Some(listener) = context.serialization_listener() {
                    listener.on_deserialization_error(&e);
                }
                DaoError::Serialization(e)
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDatabase;
    use serde::Deserialize;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_split_sql_script() {
        let script = "CREATE TABLE a (id INTEGER);\nINSERT INTO a VALUES (1);  \r\n\n;\nINSERT INTO a VALUES (2);";
        assert_eq!(
            split_sql_script(script),
            vec![
                "CREATE TABLE a (id INTEGER)",
                "INSERT INTO a VALUES (1)",
                "INSERT INTO a VALUES (2)",
            ]
        );
    }

    #[test]
    fn test_statements_in_tx_roll_back_on_failure() {
        let db = MemoryDatabase::new();
        db.exec_sql("CREATE TABLE a (id INTEGER PRIMARY KEY)").unwrap();
        let statements = ["INSERT INTO a VALUES (1)", "INSERT INTO a VALUES (1)"];
        assert!(execute_sql_statements_in_tx(&db, &statements).is_err());
        assert_eq!(db.row_count("a"), Some(0));
        assert_eq!(db.transaction_depth(), 0);
    }

    #[test]
    fn test_statements_without_tx_keep_partial_work() {
        let db = MemoryDatabase::new();
        db.exec_sql("CREATE TABLE a (id INTEGER PRIMARY KEY)").unwrap();
        let statements = ["INSERT INTO a VALUES (1)", " ", "INSERT INTO a VALUES (1)"];
        assert!(execute_sql_statements(&db, &statements).is_err());
        assert_eq!(db.row_count("a"), Some(1));
    }

    #[test]
    fn test_execute_sql_script_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);").unwrap();
        writeln!(file, "INSERT INTO notes VALUES (1, 'first');").unwrap();
        writeln!(file, "INSERT INTO notes VALUES (2, 'second');").unwrap();

        let db = MemoryDatabase::new();
        let count = execute_sql_script(&db, file.path(), true).unwrap();
        assert_eq!(count, 3);
        assert_eq!(db.row_count("notes"), Some(2));
    }

    #[test]
    fn test_dump_cursor() {
        let db = MemoryDatabase::new();
        db.exec_sql("CREATE TABLE t (id INTEGER, name TEXT)").unwrap();
        db.exec_sql("INSERT INTO t VALUES (1, 'Alice')").unwrap();
        let mut cursor = db.raw_query("SELECT * FROM t", &[]).unwrap();
        let dump = dump_cursor(cursor.as_mut());
        assert!(dump.contains("│ id │ name  │"));
        assert!(dump.contains("│ 1  │ Alice │"));
        assert!(dump.ends_with("1 row(s) returned"));
        log_table_dump(&db, "t").unwrap();
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        volume: u8,
    }

    #[test]
    fn test_blob_helpers() {
        let context = DaoContext::new(Arc::new(MemoryDatabase::new()));
        let settings = Settings {
            theme: "dark".to_string(),
            volume: 7,
        };
        let bytes = serialize_object(&context, Some(&settings)).unwrap().unwrap();
        let restored: Option<Settings> =
            deserialize_object(&context, Some(bytes.as_slice())).unwrap();
        assert_eq!(restored, Some(settings));

        assert!(serialize_object::<Settings>(&context, None).unwrap().is_none());
        assert!(deserialize_object::<Settings>(&context, None).unwrap().is_none());
        assert!(matches!(
            deserialize_object::<Settings>(&context, Some(&[1u8, 2][..])),
            Err(DaoError::Serialization(_))
        ));
    }

    #[derive(Default)]
    struct CountingListener {
        serialization: AtomicUsize,
        deserialization: AtomicUsize,
    }

    impl SerializationErrorListener for CountingListener {
        fn on_serialization_error(&self, _error: &bincode::Error) {
            self.serialization.fetch_add(1, Ordering::SeqCst);
        }

        fn on_deserialization_error(&self, _error: &bincode::Error) {
            self.deserialization.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// bincode cannot size a sequence whose length is unknown up front
    struct UnsizedSeq;

    impl Serialize for UnsizedSeq {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            use serde::ser::SerializeSeq;
            let seq = serializer.serialize_seq(None)?;
            seq.end()
        }
    }

    #[test]
    fn test_blob_failures_reach_listener() {
        let context = DaoContext::new(Arc::new(MemoryDatabase::new()));
        let listener = Arc::new(CountingListener::default());
        context.set_serialization_listener(Some(listener.clone()));

        assert!(deserialize_object::<Settings>(&context, Some(&[1u8][..])).is_err());
        assert!(serialize_object(&context, Some(&UnsizedSeq)).is_err());
        assert_eq!(listener.deserialization.load(Ordering::SeqCst), 1);
        assert_eq!(listener.serialization.load(Ordering::SeqCst), 1);

        // successful round trips stay silent
        let bytes = serialize_object(&context, Some(&7u32)).unwrap();
        let _: Option<u32> = deserialize_object(&context, bytes.as_deref()).unwrap();

        context.set_serialization_listener(None);
        assert!(deserialize_object::<Settings>(&context, Some(&[1u8][..])).is_err());
        assert_eq!(listener.deserialization.load(Ordering::SeqCst), 1);
        assert_eq!(listener.serialization.load(Ordering::SeqCst), 1);
    }
}

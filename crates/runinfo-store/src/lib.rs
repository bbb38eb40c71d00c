use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, Statement, params};
use runinfo_core::{Exception, GutterDirection, GutterTarget, Mark, MarkKind, Store, normalize_path};
use thiserror::Error;

#[cfg(feature = "fixtures")]
pub mod fixtures;

pub const FILE_MARK_TABLE: &str = "FileMark";
pub const EXCEPTION_TABLE: &str = "Exception";

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

const MARK_COLUMNS: &str = "file_mark_id, type, text, file_name, begin_line, begin_character, \
     end_line, end_character, check_content, target_path, target_line, target_character, \
     gutterLinkType, exception_id";

const EXCEPTION_COLUMNS: &str =
    "exception_id, nodeid, file_name, line, exception_text, stacktrace_length";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A single row that could not be mapped. The row is skipped, the query goes on.
#[derive(Debug, Error)]
#[error("malformed {table} row {row_id}: {reason}")]
pub struct MalformedRecord {
    pub table: &'static str,
    pub row_id: i64,
    pub reason: String,
}

/// Point queries against one store file.
///
/// Holds no connection: every call opens the store read-only and closes it
/// before returning, so a reader can be built and dropped per query.
#[derive(Debug, Clone, Copy)]
pub struct StoreReader<'a> {
    store: &'a Store,
}

impl<'a> StoreReader<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    /// All marks of `kind` recorded against `file_path`.
    ///
    /// `file_path` is the live file location; it is matched against both the
    /// store-relative and the absolute form of the recorded `file_name`.
    pub fn find_marks(&self, file_path: &Path, kind: MarkKind) -> Result<Vec<Mark>, StoreError> {
        self.query_marks(file_path, kind, None)
    }

    pub fn find_marks_at(
        &self,
        file_path: &Path,
        kind: MarkKind,
        begin_line: usize,
    ) -> Result<Vec<Mark>, StoreError> {
        self.query_marks(file_path, kind, Some(begin_line))
    }

    pub fn find_exception(&self, exception_id: i64) -> Result<Option<Exception>, StoreError> {
        let Some(conn) = self.open_with_tables(&[EXCEPTION_TABLE])? else {
            return Ok(None);
        };

        let sql = format!("SELECT {EXCEPTION_COLUMNS} FROM {EXCEPTION_TABLE} WHERE exception_id = ?1");
        let Some(mut stmt) = self.prepare_known_columns(&conn, &sql)? else {
            return Ok(None);
        };
        let mapped = stmt
            .query_row(params![exception_id], |row| Ok(map_exception_row(row)))
            .optional()?;

        match mapped {
            Some(Ok(exception)) => Ok(Some(exception)),
            Some(Err(malformed)) => {
                self.log_malformed(&malformed);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Every exception in the store, in id order.
    pub fn find_exceptions(&self) -> Result<Vec<Exception>, StoreError> {
        let Some(conn) = self.open_with_tables(&[EXCEPTION_TABLE])? else {
            return Ok(Vec::new());
        };

        let sql = format!("SELECT {EXCEPTION_COLUMNS} FROM {EXCEPTION_TABLE} ORDER BY exception_id");
        let Some(mut stmt) = self.prepare_known_columns(&conn, &sql)? else {
            return Ok(Vec::new());
        };
        let mut rows = stmt.query([])?;

        let mut exceptions = Vec::new();
        while let Some(row) = rows.next()? {
            match map_exception_row(row) {
                Ok(exception) => exceptions.push(exception),
                Err(malformed) => self.log_malformed(&malformed),
            }
        }

        Ok(exceptions)
    }

    fn query_marks(
        &self,
        file_path: &Path,
        kind: MarkKind,
        begin_line: Option<usize>,
    ) -> Result<Vec<Mark>, StoreError> {
        let Some(conn) = self.open_with_tables(&[FILE_MARK_TABLE])? else {
            return Ok(Vec::new());
        };

        let absolute = normalize_path(&file_path.to_string_lossy());
        let relative = self
            .store
            .relative_path(file_path)
            .unwrap_or_else(|| absolute.clone());

        let mut sql = format!(
            "SELECT {MARK_COLUMNS} FROM {FILE_MARK_TABLE} \
             WHERE type = ?1 AND (file_name = ?2 OR file_name = ?3)"
        );
        if begin_line.is_some() {
            sql.push_str(" AND begin_line = ?4");
        }
        sql.push_str(" ORDER BY file_mark_id");

        let Some(mut stmt) = self.prepare_known_columns(&conn, &sql)? else {
            return Ok(Vec::new());
        };
        let mut rows = match begin_line {
            Some(line) => stmt.query(params![kind.store_value(), relative, absolute, line as i64])?,
            None => stmt.query(params![kind.store_value(), relative, absolute])?,
        };

        let mut marks = Vec::new();
        while let Some(row) = rows.next()? {
            match map_mark_row(row) {
                Ok(mark) => marks.push(mark),
                Err(malformed) => self.log_malformed(&malformed),
            }
        }

        Ok(marks)
    }

    /// Opens the store, or returns `None` when one of `tables` is missing.
    fn open_with_tables(&self, tables: &[&str]) -> Result<Option<Connection>, StoreError> {
        let path = &self.store.file_path;
        let unavailable = |source: rusqlite::Error| StoreError::Unavailable {
            path: path.clone(),
            source,
        };

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(unavailable)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(unavailable)?;

        for table in tables {
            if !table_exists(&conn, table).map_err(unavailable)? {
                tracing::debug!(
                    store = %path.display(),
                    table = %table,
                    "store is missing expected table"
                );
                return Ok(None);
            }
        }

        Ok(Some(conn))
    }

    /// Prepares `sql`, or returns `None` when the store lacks one of its columns.
    fn prepare_known_columns<'c>(
        &self,
        conn: &'c Connection,
        sql: &str,
    ) -> Result<Option<Statement<'c>>, StoreError> {
        match conn.prepare(sql) {
            Ok(stmt) => Ok(Some(stmt)),
            Err(error) if is_missing_column(&error) => {
                tracing::debug!(
                    store = %self.store.file_path.display(),
                    error = %error,
                    "store is missing expected column"
                );
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    fn log_malformed(&self, malformed: &MalformedRecord) {
        tracing::warn!(
            store = %self.store.file_path.display(),
            table = malformed.table,
            row_id = malformed.row_id,
            reason = %malformed.reason,
            "skipping malformed store record"
        );
    }
}

fn is_missing_column(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(_, Some(message)) if message.contains("no such column")
    )
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![table],
        |row| row.get(0),
    )
}

fn map_mark_row(row: &Row<'_>) -> Result<Mark, MalformedRecord> {
    let row_id: i64 = row.get(0).unwrap_or(-1);
    let malformed = |reason: String| MalformedRecord {
        table: FILE_MARK_TABLE,
        row_id,
        reason,
    };
    let column = |error: rusqlite::Error| malformed(error.to_string());

    let type_value: Option<String> = row.get(1).map_err(column)?;
    let kind = type_value
        .as_deref()
        .and_then(MarkKind::from_store_value)
        .ok_or_else(|| malformed(format!("unknown mark type {type_value:?}")))?;

    let source_file: Option<String> = row.get(3).map_err(column)?;
    let source_file = source_file.ok_or_else(|| malformed("missing file_name".to_owned()))?;

    let begin_line = to_position(row.get(4).map_err(column)?, "begin_line").map_err(&malformed)?;
    let begin_column =
        to_position(row.get(5).map_err(column)?, "begin_character").map_err(&malformed)?;
    let end_line = to_position(row.get(6).map_err(column)?, "end_line").map_err(&malformed)?;
    let end_column =
        to_position(row.get(7).map_err(column)?, "end_character").map_err(&malformed)?;

    let check_content: Option<String> = row.get(8).map_err(column)?;
    let display_text: Option<String> = row.get(2).map_err(column)?;

    let target = if kind == MarkKind::GutterLink {
        let path: Option<String> = row.get(9).map_err(column)?;
        let line: Option<i64> = row.get(10).map_err(column)?;
        let column_value: Option<i64> = row.get(11).map_err(column)?;
        let direction: Option<String> = row.get(12).map_err(column)?;

        let path = path
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| malformed("gutter link without target_path".to_owned()))?;
        let line = to_position(line, "target_line").map_err(&malformed)?;
        let direction = direction
            .as_deref()
            .and_then(GutterDirection::from_store_value)
            .ok_or_else(|| malformed(format!("unknown gutter direction {direction:?}")))?;

        Some(GutterTarget {
            path: normalize_path(&path),
            line,
            column: column_value.and_then(|value| usize::try_from(value).ok()).unwrap_or(0),
            direction,
        })
    } else {
        None
    };

    let exception_id: Option<i64> = row.get(13).map_err(column)?;

    Ok(Mark {
        id: row_id,
        kind,
        source_file: normalize_path(&source_file),
        begin_line,
        begin_column,
        end_line,
        end_column,
        check_content: check_content.unwrap_or_default(),
        display_text: display_text.unwrap_or_default(),
        target,
        exception_id: exception_id.filter(|id| *id > 0),
    })
}

fn map_exception_row(row: &Row<'_>) -> Result<Exception, MalformedRecord> {
    let row_id: i64 = row.get(0).unwrap_or(-1);
    let malformed = |reason: String| MalformedRecord {
        table: EXCEPTION_TABLE,
        row_id,
        reason,
    };
    let column = |error: rusqlite::Error| malformed(error.to_string());

    let nodeid: Option<String> = row.get(1).map_err(column)?;
    let source_file: Option<String> = row.get(2).map_err(column)?;
    let line = to_position(row.get(3).map_err(column)?, "line").map_err(&malformed)?;
    let text: Option<String> = row.get(4).map_err(column)?;
    let stacktrace_length: Option<i64> = row.get(5).map_err(column)?;

    let short_text = text.unwrap_or_default();
    let stacktrace_length = stacktrace_length
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| malformed("missing or negative stacktrace_length".to_owned()))?;

    let description = match nodeid.as_deref().map(str::trim) {
        Some(nodeid) if !nodeid.is_empty() => format!("{nodeid}: {short_text}"),
        _ => short_text.clone(),
    };

    Ok(Exception {
        id: row_id,
        source_file: normalize_path(&source_file.unwrap_or_default()),
        line,
        short_text,
        description,
        stacktrace_length,
    })
}

fn to_position(value: Option<i64>, column: &str) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("missing {column}"))?;
    usize::try_from(value).map_err(|_| format!("negative {column}: {value}"))
}

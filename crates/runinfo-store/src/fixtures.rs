//! Builds store files the way the test-run producer lays them out.
//!
//! Only compiled with the `fixtures` feature; readers never write stores.

use std::path::Path;

use rusqlite::{Connection, params};
use runinfo_core::{Exception, GutterDirection, Mark, MarkKind};

use crate::StoreError;

pub const STORE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS Exception (
        exception_id INTEGER PRIMARY KEY,
        nodeid TEXT UNIQUE,
        file_name TEXT,
        line INTEGER,
        exception_text TEXT,
        stacktrace_length INTEGER
    );

    CREATE TABLE IF NOT EXISTS FileMark (
        file_mark_id INTEGER PRIMARY KEY,
        type TEXT,
        text TEXT,
        file_name TEXT,
        begin_line INTEGER,
        begin_character INTEGER,
        end_line INTEGER,
        end_character INTEGER,
        check_content TEXT,
        target_path TEXT,
        target_line INTEGER,
        target_character INTEGER,
        gutterLinkType TEXT,
        exception_id INTEGER NOT NULL
    );
"#;

pub struct FixtureStore {
    conn: Connection,
}

impl FixtureStore {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(STORE_SCHEMA)?;
        Ok(Self { conn })
    }

    /// Inserts `exception` and returns the id the store assigned to it.
    pub fn insert_exception(&self, nodeid: &str, exception: &Exception) -> Result<i64, StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO Exception (nodeid, file_name, line, exception_text, stacktrace_length)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                nodeid,
                exception.source_file,
                exception.line as i64,
                exception.short_text,
                exception.stacktrace_length as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Inserts `mark`, ignoring its id, and returns the id the store assigned.
    pub fn insert_mark(&self, mark: &Mark) -> Result<i64, StoreError> {
        let target = mark.target.as_ref();
        let direction = target.map(|target| match target.direction {
            GutterDirection::Up => "U",
            GutterDirection::Down => "D",
        });
        let text = (mark.kind != MarkKind::GutterLink).then_some(mark.display_text.as_str());

        self.conn.execute(
            r#"
            INSERT INTO FileMark (
                type, text, file_name, begin_line, begin_character, end_line, end_character,
                check_content, target_path, target_line, target_character, gutterLinkType,
                exception_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                mark.kind.store_value(),
                text,
                mark.source_file,
                mark.begin_line as i64,
                mark.begin_column as i64,
                mark.end_line as i64,
                mark.end_column as i64,
                mark.check_content,
                target.map(|target| target.path.as_str()),
                target.map(|target| target.line as i64),
                target.map(|target| target.column as i64),
                direction,
                mark.exception_id.unwrap_or(0),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

/// A mark with only the fields most fixtures care about filled in.
pub fn mark(kind: MarkKind, source_file: &str, line: usize, content: &str, text: &str) -> Mark {
    Mark {
        id: 0,
        kind,
        source_file: source_file.to_owned(),
        begin_line: line,
        begin_column: 0,
        end_line: line,
        end_column: content.len(),
        check_content: content.to_owned(),
        display_text: text.to_owned(),
        target: None,
        exception_id: None,
    }
}

pub fn exception(source_file: &str, line: usize, text: &str, stacktrace_length: u32) -> Exception {
    Exception {
        id: 0,
        source_file: source_file.to_owned(),
        line,
        short_text: text.to_owned(),
        description: text.to_owned(),
        stacktrace_length,
    }
}

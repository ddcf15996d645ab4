use chrono::{DateTime, Utc};
use keepsync_core::{Account, Error, Note, Result, Store};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const NOTE_COLUMNS: &str = "email, id, server_id, kind, parent_id, type, trashed, title, text,
    is_archived, color, sort_value, checked, indexable_text, checked_checkboxes_count";

/// SQLite-backed account and note store.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Mutex<Connection>>,
}

fn storage_err(context: &str, e: rusqlite::Error) -> Error {
    Error::Storage(format!("{}: {}", context, e))
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| storage_err("Failed to open db", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| storage_err("Failed to open in-memory db", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            inner: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                email TEXT PRIMARY KEY,
                profile_name TEXT NOT NULL DEFAULT '',
                master_token TEXT NOT NULL DEFAULT '',
                access_token TEXT NOT NULL DEFAULT '',
                access_token_expiry TEXT
            );

            CREATE TABLE IF NOT EXISTS notes (
                email TEXT NOT NULL,
                id TEXT NOT NULL,
                server_id TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT '',
                parent_id TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL DEFAULT '',
                trashed TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL DEFAULT '',
                text TEXT NOT NULL DEFAULT '',
                is_archived INTEGER NOT NULL DEFAULT 0,
                color TEXT NOT NULL DEFAULT '',
                sort_value TEXT NOT NULL DEFAULT '',
                checked INTEGER NOT NULL DEFAULT 0,
                indexable_text TEXT NOT NULL DEFAULT '',
                checked_checkboxes_count TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_notes_email ON notes(email);
            ",
        )
        .map_err(|e| storage_err("Failed to init schema", e))?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    let expiry: Option<String> = row.get(4)?;
    Ok(Account {
        email: row.get(0)?,
        profile_name: row.get(1)?,
        master_token: row.get(2)?,
        access_token: row.get(3)?,
        // An unreadable expiry is treated like a missing one, forcing a refresh.
        access_token_expiry: expiry
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

fn row_to_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        email: row.get(0)?,
        id: row.get(1)?,
        server_id: row.get(2)?,
        kind: row.get(3)?,
        parent_id: row.get(4)?,
        note_type: row.get(5)?,
        trashed: row.get(6)?,
        title: row.get(7)?,
        text: row.get(8)?,
        is_archived: row.get(9)?,
        color: row.get(10)?,
        sort_value: row.get(11)?,
        checked: row.get(12)?,
        indexable_text: row.get(13)?,
        checked_checkboxes_count: row.get(14)?,
    })
}

fn query_notes(conn: &Connection, email: Option<&str>) -> Result<Vec<Note>> {
    let sql = match email {
        Some(_) => format!("SELECT {} FROM notes WHERE email = ?1 ORDER BY rowid", NOTE_COLUMNS),
        None => format!("SELECT {} FROM notes ORDER BY rowid", NOTE_COLUMNS),
    };
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| storage_err("Prepare error", e))?;
    let rows = match email {
        Some(email) => stmt.query_map(params![email], row_to_note),
        None => stmt.query_map([], row_to_note),
    }
    .map_err(|e| storage_err("Query error", e))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| storage_err("Row error", e))
}

impl Store for SqliteStore {
    fn accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT email, profile_name, master_token, access_token, access_token_expiry
                 FROM accounts ORDER BY email",
            )
            .map_err(|e| storage_err("Prepare error", e))?;
        let rows = stmt
            .query_map([], row_to_account)
            .map_err(|e| storage_err("Query error", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| storage_err("Row error", e))
    }

    fn account(&self, email: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT email, profile_name, master_token, access_token, access_token_expiry
             FROM accounts WHERE email = ?1",
            params![email],
            row_to_account,
        )
        .optional()
        .map_err(|e| storage_err("Query error", e))
    }

    fn upsert_account(&self, account: &Account) -> Result<()> {
        let conn = self.conn()?;
        let expiry = account.access_token_expiry.map(|dt| dt.to_rfc3339());
        conn.execute(
            "INSERT INTO accounts (email, profile_name, master_token, access_token, access_token_expiry)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(email) DO UPDATE SET
                profile_name = excluded.profile_name,
                master_token = excluded.master_token,
                access_token = excluded.access_token,
                access_token_expiry = excluded.access_token_expiry",
            params![
                account.email,
                account.profile_name,
                account.master_token,
                account.access_token,
                expiry
            ],
        )
        .map_err(|e| storage_err("Upsert error", e))?;
        debug!(email = %account.email, "Account saved");
        Ok(())
    }

    fn delete_account(&self, email: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM accounts WHERE email = ?1", params![email])
            .map_err(|e| storage_err("Delete error", e))?;
        Ok(())
    }

    fn notes(&self, email: &str) -> Result<Vec<Note>> {
        let conn = self.conn()?;
        query_notes(&conn, Some(email))
    }

    fn all_notes(&self) -> Result<Vec<Note>> {
        let conn = self.conn()?;
        query_notes(&conn, None)
    }

    fn replace_notes(&self, email: &str, notes: &[Note]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| storage_err("Transaction error", e))?;

        tx.execute("DELETE FROM notes WHERE email = ?1", params![email])
            .map_err(|e| storage_err("Delete error", e))?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO notes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    NOTE_COLUMNS
                ))
                .map_err(|e| storage_err("Prepare error", e))?;
            for note in notes {
                stmt.execute(params![
                    email,
                    note.id,
                    note.server_id,
                    note.kind,
                    note.parent_id,
                    note.note_type,
                    note.trashed,
                    note.title,
                    note.text,
                    note.is_archived,
                    note.color,
                    note.sort_value,
                    note.checked,
                    note.indexable_text,
                    note.checked_checkboxes_count
                ])
                .map_err(|e| storage_err("Insert error", e))?;
            }
        }
        tx.commit().map_err(|e| storage_err("Commit error", e))?;

        debug!(email = %email, count = notes.len(), "Notes replaced");
        Ok(())
    }

    fn delete_notes(&self, email: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM notes WHERE email = ?1", params![email])
            .map_err(|e| storage_err("Delete error", e))?;
        Ok(())
    }
}

//! SQLite-based storage implementation

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{LinkStore, LinkToken, OtpState, OtpStore, StoreResult, TelegramLink, TokenStore};
use crate::error::BrokerError;

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// SQLite-based store implementing TokenStore, LinkStore, and OtpStore.
///
/// The connection is behind a mutex; the consume and replace operations use
/// a single conditional statement or an explicit transaction, so their
/// atomicity does not depend on the mutex alone.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path
    pub fn open(path: &str) -> Result<Self, BrokerError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests)
    pub fn open_in_memory() -> Result<Self, BrokerError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, BrokerError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_err)?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run database migrations
    fn migrate(conn: &Connection) -> Result<(), BrokerError> {
        let current_version = Self::get_schema_version(conn)?;

        if current_version < SCHEMA_VERSION {
            tracing::info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );

            if current_version < 1 {
                Self::migrate_v1(conn)?;
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )
            .map_err(db_err)?;

            tracing::info!("Database migrations complete");
        }

        Ok(())
    }

    /// Get current schema version (0 if no schema exists)
    fn get_schema_version(conn: &Connection) -> Result<i32, BrokerError> {
        let table_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        if !table_exists {
            return Ok(0);
        }

        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .map_err(db_err)
        .map(|v| v.unwrap_or(0))
    }

    fn migrate_v1(conn: &Connection) -> Result<(), BrokerError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS link_tokens (
                token_hash  BLOB PRIMARY KEY,
                subject_id  TEXT NOT NULL,
                phone       TEXT NOT NULL,
                expires_at  INTEGER NOT NULL,
                consumed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_link_tokens_phone ON link_tokens(phone);

            CREATE TABLE IF NOT EXISTS telegram_links (
                subject_id  TEXT PRIMARY KEY,
                phone       TEXT NOT NULL,
                chat_id     INTEGER NOT NULL,
                verified_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_telegram_links_phone ON telegram_links(phone);
            CREATE INDEX IF NOT EXISTS idx_telegram_links_chat ON telegram_links(chat_id);

            CREATE TABLE IF NOT EXISTS otp_states (
                subject_id    TEXT PRIMARY KEY,
                code          TEXT NOT NULL,
                expires_at    INTEGER NOT NULL,
                attempts_left INTEGER NOT NULL,
                requested_at  INTEGER NOT NULL
            );
            ",
        )
        .map_err(db_err)
    }
}

impl TokenStore for SqliteStore {
    fn save_token(&self, token: LinkToken) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "DELETE FROM link_tokens WHERE phone = ?1 AND consumed_at IS NULL",
            params![token.phone],
        )
        .map_err(db_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO link_tokens (token_hash, subject_id, phone, expires_at, consumed_at)
             VALUES (?1, ?2, ?3, ?4, NULL)",
            params![token.token_hash, token.subject_id, token.phone, ts(token.expires_at)],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)
    }

    fn consume_token(&self, token_hash: &[u8]) -> StoreResult<LinkToken> {
        let now = ts(Utc::now());
        let conn = self.conn.lock().unwrap();
        // Single conditional update: two concurrent consumers cannot both
        // observe consumed_at IS NULL.
        conn.query_row(
            "UPDATE link_tokens
             SET consumed_at = ?2
             WHERE token_hash = ?1 AND consumed_at IS NULL AND expires_at > ?2
             RETURNING subject_id, phone, expires_at",
            params![token_hash, now],
            |row| {
                Ok(LinkToken {
                    token_hash: token_hash.to_vec(),
                    subject_id: row.get(0)?,
                    phone: row.get(1)?,
                    expires_at: from_ts(row.get(2)?),
                    consumed_at: Some(from_ts(now)),
                })
            },
        )
        .optional()
        .map_err(db_err)?
        .ok_or(BrokerError::InvalidToken)
    }
}

impl LinkStore for SqliteStore {
    fn link_by_phone(&self, phone: &str) -> StoreResult<Option<TelegramLink>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT subject_id, phone, chat_id, verified_at FROM telegram_links WHERE phone = ?1",
            params![phone],
            link_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    fn link_by_chat(&self, chat_id: i64) -> StoreResult<Option<TelegramLink>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT subject_id, phone, chat_id, verified_at FROM telegram_links WHERE chat_id = ?1",
            params![chat_id],
            link_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    fn link_chat(&self, link: TelegramLink) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "DELETE FROM telegram_links WHERE subject_id = ?1 OR phone = ?2 OR chat_id = ?3",
            params![link.subject_id, link.phone, link.chat_id],
        )
        .map_err(db_err)?;
        tx.execute(
            "INSERT INTO telegram_links (subject_id, phone, chat_id, verified_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![link.subject_id, link.phone, link.chat_id, ts(link.verified_at)],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)
    }
}

impl OtpStore for SqliteStore {
    fn upsert_code(&self, state: OtpState) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO otp_states (subject_id, code, expires_at, attempts_left, requested_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (subject_id)
             DO UPDATE SET code = excluded.code,
                 expires_at = excluded.expires_at,
                 attempts_left = excluded.attempts_left,
                 requested_at = excluded.requested_at",
            params![
                state.subject_id,
                state.code,
                ts(state.expires_at),
                state.attempts_left,
                ts(state.requested_at)
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn verify_code(&self, subject_id: &str, code: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;

        let row: Option<(String, i64, i64)> = tx
            .query_row(
                "SELECT code, expires_at, attempts_left FROM otp_states WHERE subject_id = ?1",
                params![subject_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err)?;

        let matched = match row {
            None => false,
            Some((stored, expires_at, attempts_left)) => {
                if expires_at <= ts(now) || attempts_left <= 0 {
                    tx.execute(
                        "DELETE FROM otp_states WHERE subject_id = ?1",
                        params![subject_id],
                    )
                    .map_err(db_err)?;
                    false
                } else if stored == code {
                    tx.execute(
                        "DELETE FROM otp_states WHERE subject_id = ?1",
                        params![subject_id],
                    )
                    .map_err(db_err)?;
                    true
                } else {
                    tx.execute(
                        "UPDATE otp_states SET attempts_left = attempts_left - 1 WHERE subject_id = ?1",
                        params![subject_id],
                    )
                    .map_err(db_err)?;
                    false
                }
            }
        };

        tx.commit().map_err(db_err)?;
        Ok(matched)
    }

    fn otp_state(&self, subject_id: &str) -> StoreResult<Option<OtpState>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT subject_id, code, expires_at, attempts_left, requested_at
             FROM otp_states WHERE subject_id = ?1",
            params![subject_id],
            |row| {
                Ok(OtpState {
                    subject_id: row.get(0)?,
                    code: row.get(1)?,
                    expires_at: from_ts(row.get(2)?),
                    attempts_left: row.get(3)?,
                    requested_at: from_ts(row.get(4)?),
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM otp_states WHERE expires_at < ?1",
            params![ts(before)],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

fn link_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TelegramLink> {
    Ok(TelegramLink {
        subject_id: row.get(0)?,
        phone: row.get(1)?,
        chat_id: row.get(2)?,
        verified_at: from_ts(row.get(3)?),
    })
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn db_err(err: rusqlite::Error) -> BrokerError {
    BrokerError::Internal(err.to_string())
}

//! Encrypted credential storage using SQLite.
//!
//! Access and refresh tokens are sealed separately with AES-256-GCM, each
//! with its own nonce. Rows are keyed by [`tenant_key`], never the raw
//! tenant identifier.

use super::{tenant_key, CredentialStore, Credentials, EncryptionKey, Sealed, StoreError};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Encrypted credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     tenant_key TEXT PRIMARY KEY,      -- SHA-256 of the tenant identifier
///     access_token TEXT NOT NULL,       -- Encrypted
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT,               -- Encrypted (optional)
///     refresh_token_nonce TEXT,
///     token_type TEXT NOT NULL,
///     expires_at TEXT,                  -- RFC 3339 (optional)
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// ```
///
/// # Thread Safety
/// The connection is wrapped in a Mutex; SQLite upserts make each save atomic.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
    key: EncryptionKey,
}

impl SqliteCredentialStore {
    /// Creates or opens a credential database. `":memory:"` is accepted for tests.
    pub fn open<P: AsRef<Path>>(db_path: P, key: EncryptionKey) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open credential database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                tenant_key TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT,
                refresh_token_nonce TEXT,
                token_type TEXT NOT NULL,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            key,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential database lock poisoned"))
    }

    /// Number of tenants with stored credentials.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM credentials", [], |row| row.get(0))
            .context("Failed to count credentials")?;
        Ok(n as usize)
    }

    fn store(&self, tenant: &str, credentials: &Credentials) -> Result<()> {
        let access = self
            .key
            .seal_str(&credentials.access_token)
            .context("Failed to encrypt access token")?;
        let refresh = credentials
            .refresh_token
            .as_deref()
            .map(|token| self.key.seal_str(token))
            .transpose()
            .context("Failed to encrypt refresh token")?;

        let expires_at = credentials.expires_at.map(|dt| dt.to_rfc3339());
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO credentials (
                    tenant_key,
                    access_token, access_token_nonce,
                    refresh_token, refresh_token_nonce,
                    token_type, expires_at, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(tenant_key) DO UPDATE SET
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    refresh_token = excluded.refresh_token,
                    refresh_token_nonce = excluded.refresh_token_nonce,
                    token_type = excluded.token_type,
                    expires_at = excluded.expires_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    tenant_key(tenant),
                    access.ciphertext,
                    access.nonce,
                    refresh.as_ref().map(|s| s.ciphertext.as_str()),
                    refresh.as_ref().map(|s| s.nonce.as_str()),
                    credentials.token_type,
                    expires_at,
                    now,
                    now,
                ],
            )
            .context("Failed to store credentials")?;

        Ok(())
    }
}

/// Raw row as read from the table, still encrypted.
struct Row {
    access_token: String,
    access_token_nonce: String,
    refresh_token: Option<String>,
    refresh_token_nonce: Option<String>,
    token_type: String,
    expires_at: Option<String>,
}

impl Row {
    fn decrypt(self, key: &EncryptionKey) -> Result<Credentials> {
        let access_token = key
            .open_str(&Sealed {
                nonce: self.access_token_nonce,
                ciphertext: self.access_token,
            })
            .context("Failed to decrypt access token")?;

        let refresh_token = match (self.refresh_token, self.refresh_token_nonce) {
            (Some(ciphertext), Some(nonce)) => Some(
                key.open_str(&Sealed { nonce, ciphertext })
                    .context("Failed to decrypt refresh token")?,
            ),
            _ => None,
        };

        let expires_at = self
            .expires_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .context("Failed to parse expires_at timestamp")?;

        Ok(Credentials {
            access_token,
            refresh_token,
            token_type: self.token_type,
            expires_at,
        })
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn save(&self, tenant: &str, credentials: &Credentials) -> Result<(), StoreError> {
        Ok(self.store(tenant, credentials)?)
    }

    fn load(&self, tenant: &str) -> Result<Credentials, StoreError> {
        let row = self
            .conn()?
            .query_row(
                r#"
                SELECT access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce,
                       token_type, expires_at
                FROM credentials
                WHERE tenant_key = ?1
                "#,
                params![tenant_key(tenant)],
                |row| {
                    Ok(Row {
                        access_token: row.get(0)?,
                        access_token_nonce: row.get(1)?,
                        refresh_token: row.get(2)?,
                        refresh_token_nonce: row.get(3)?,
                        token_type: row.get(4)?,
                        expires_at: row.get(5)?,
                    })
                },
            )
            .optional()
            .context("Failed to query credentials")?;

        let row = row.ok_or_else(|| StoreError::NotAuthenticated {
            tenant: tenant.to_string(),
        })?;

        row.decrypt(&self.key).map_err(|e| StoreError::Corrupt {
            tenant: tenant.to_string(),
            reason: format!("{:#}", e),
        })
    }

    fn delete(&self, tenant: &str) -> Result<bool, StoreError> {
        let rows_affected = self
            .conn()?
            .execute(
                "DELETE FROM credentials WHERE tenant_key = ?1",
                params![tenant_key(tenant)],
            )
            .context("Failed to delete credentials")?;

        Ok(rows_affected > 0)
    }
}

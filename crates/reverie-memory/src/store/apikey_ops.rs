//! API key records.
//!
//! The wire layer authenticates against these rows. Only the salted hash of
//! a key's secret is ever stored; the plaintext exists once, at generation
//! time, in the operator's terminal.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

use super::persona_ops::parse_timestamp;
use super::MetadataStore;

// ─────────────────────────────────────────────────────────────────────────────
// Permissions
// ─────────────────────────────────────────────────────────────────────────────

/// Scope grantable to an API key.
///
/// `Admin` implies everything; `Read`/`Write` imply their scoped pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    VectorsRead,
    VectorsWrite,
    PersonasRead,
    PersonasWrite,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::VectorsRead => "vectors:read",
            Permission::VectorsWrite => "vectors:write",
            Permission::PersonasRead => "personas:read",
            Permission::PersonasWrite => "personas:write",
            Permission::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "vectors:read" => Ok(Permission::VectorsRead),
            "vectors:write" => Ok(Permission::VectorsWrite),
            "personas:read" => Ok(Permission::PersonasRead),
            "personas:write" => Ok(Permission::PersonasWrite),
            "admin" => Ok(Permission::Admin),
            other => Err(MemoryError::Validation(format!(
                "unknown permission '{}'",
                other
            ))),
        }
    }

    /// Whether a key holding `self` satisfies a requirement of `required`.
    pub fn allows(&self, required: Permission) -> bool {
        if *self == required || *self == Permission::Admin {
            return true;
        }
        match (*self, required) {
            (Permission::Read, Permission::VectorsRead)
            | (Permission::Read, Permission::PersonasRead)
            | (Permission::Write, Permission::VectorsWrite)
            | (Permission::Write, Permission::PersonasWrite) => true,
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// One issued API key.
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    /// Public key id (the part before the dot in the presented key).
    pub id: String,
    /// Operator-facing label.
    pub name: String,
    /// Salted, iterated hash of the secret.
    pub key_hash: Vec<u8>,
    /// Per-key salt.
    pub salt: Vec<u8>,
    pub permissions: Vec<Permission>,
    /// Per-key rate limit, requests per minute. `None` uses the global
    /// limit.
    pub rate_limit_rpm: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    /// Whether the key may authenticate right now.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        match self.expires_at {
            Some(at) => now < at,
            None => true,
        }
    }
}

impl MetadataStore {
    /// Insert an API key record.
    pub fn put_api_key(&self, record: &ApiKeyRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let permissions_json = serde_json::to_string(
            &record
                .permissions
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>(),
        )?;

        conn.execute(
            r#"
            INSERT INTO api_keys (id, name, key_hash, salt, permissions,
                                  rate_limit_rpm, expires_at, revoked,
                                  created_at, last_used_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.id,
                record.name,
                record.key_hash,
                record.salt,
                permissions_json,
                record.rate_limit_rpm,
                record.expires_at.map(|t| t.to_rfc3339()),
                record.revoked as i32,
                record.created_at.to_rfc3339(),
                record.last_used_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Look up a key by its public id.
    pub fn get_api_key(&self, id: &str) -> Result<Option<ApiKeyRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, key_hash, salt, permissions, rate_limit_rpm,
                   expires_at, revoked, created_at, last_used_at
            FROM api_keys
            WHERE id = ?1
            "#,
        )?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_api_key(row)?))
        } else {
            Ok(None)
        }
    }

    /// List all keys, newest first.
    pub fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, key_hash, salt, permissions, rate_limit_rpm,
                   expires_at, revoked, created_at, last_used_at
            FROM api_keys
            ORDER BY created_at DESC
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push(Self::row_to_api_key(row)?);
        }
        Ok(keys)
    }

    /// Revoke a key.
    pub fn revoke_api_key(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("UPDATE api_keys SET revoked = 1 WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(MemoryError::NotFound(format!("api key {}", id)));
        }
        Ok(())
    }

    /// Stamp a key's last use. Best-effort bookkeeping.
    pub fn touch_api_key(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE api_keys SET last_used_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn row_to_api_key(row: &rusqlite::Row) -> Result<ApiKeyRecord> {
        let permissions_json: String = row.get(4)?;
        let permission_names: Vec<String> = serde_json::from_str(&permissions_json)?;
        let permissions = permission_names
            .iter()
            .map(|s| Permission::from_str(s))
            .collect::<Result<Vec<_>>>()?;

        let expires_at_str: Option<String> = row.get(6)?;
        let revoked: i32 = row.get(7)?;
        let created_at_str: String = row.get(8)?;
        let last_used_at_str: Option<String> = row.get(9)?;

        Ok(ApiKeyRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            key_hash: row.get(2)?,
            salt: row.get(3)?,
            permissions,
            rate_limit_rpm: row.get(5)?,
            expires_at: expires_at_str
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            revoked: revoked != 0,
            created_at: parse_timestamp(&created_at_str)?,
            last_used_at: last_used_at_str
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

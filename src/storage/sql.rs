//! Shared SQL connection pool
//!
//! PostgreSQL and SQLite are both reached through sqlx's `Any` driver, so
//! the document and memory tables run the same statements on either.
//! Statements use `$N` placeholders, which both drivers accept.

use crate::error::{Error, Result};
use crate::namespace::{NamespaceId, NamespaceKind};
use sha2::{Digest, Sha256};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;
use std::time::Duration;

/// PostgreSQL truncates longer identifiers
const MAX_IDENTIFIER_LEN: usize = 63;

/// A lazily connected pool shared by every tenant table
#[derive(Clone)]
pub struct SqlDatabase {
    pool: AnyPool,
}

impl SqlDatabase {
    /// Build the pool without connecting.
    ///
    /// A malformed URL fails here; an unreachable server surfaces as
    /// [`Error::StoreUnavailable`] when a table is first opened.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        install_default_drivers();

        // Every connection to `:memory:` is a separate database.
        let max_connections = if url.contains(":memory:") { 1 } else { 8 };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(url)
            .map_err(|e| Error::Config(format!("invalid database URL: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Run schema statements in order
    pub async fn ensure_schema(&self, statements: &[String]) -> Result<()> {
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }
        Ok(())
    }
}

/// Quoted table name for a namespace of the expected kind.
///
/// Namespaces are sanitized to `[a-z0-9_]`, but a deserialized identifier
/// is not, so both the prefix and the characters are checked before the
/// name is spliced into SQL.
pub(crate) fn table_name(namespace: &NamespaceId, kind: NamespaceKind) -> Result<String> {
    let raw = namespace.as_str();
    let clean = raw
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if namespace.kind() != Some(kind) || !clean {
        return Err(Error::StoreUnavailable(format!(
            "'{}' is not a {} namespace",
            raw,
            kind.prefix()
        )));
    }
    Ok(quoted(&identifier(raw)))
}

/// Quoted name for a secondary object (index) of a table
pub(crate) fn object_name(namespace: &NamespaceId, suffix: &str) -> String {
    quoted(&identifier(&format!("{}_{}", namespace.as_str(), suffix)))
}

/// Fit a name into the identifier limit.
///
/// Long names keep a readable prefix and end in a hash of the full name so
/// two namespaces sharing a long prefix never map to the same table.
fn identifier(raw: &str) -> String {
    if raw.len() <= MAX_IDENTIFIER_LEN {
        return raw.to_string();
    }
    let digest = format!("{:x}", Sha256::digest(raw.as_bytes()));
    format!("{}_{}", &raw[..MAX_IDENTIFIER_LEN - 17], &digest[..16])
}

fn quoted(name: &str) -> String {
    format!("\"{}\"", name)
}

pub(crate) fn db_error(e: sqlx::Error) -> Error {
    Error::StoreUnavailable(format!("database error: {}", e))
}

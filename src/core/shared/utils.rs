use diesel::{
    r2d2::{ConnectionManager, Pool},
    PgConnection,
};
use log::{debug, info};

use crate::core::config::DatabaseConfig;
use crate::core::shared::error::ApiError;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn(config: &DatabaseConfig) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(&config.url);
    Pool::builder().max_size(config.pool_size).build(manager)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

    const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

    let mut conn = pool.get()?;
    let applied = conn.run_pending_migrations(MIGRATIONS).map_err(
        |e| -> Box<dyn std::error::Error + Send + Sync> {
            Box::new(std::io::Error::other(format!("Migration error: {e}")))
        },
    )?;
    info!("Applied {} pending migrations", applied.len());
    Ok(())
}

/// Runs a diesel closure on the blocking pool with a pooled connection.
pub async fn run_blocking<T, F>(pool: &DbPool, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| ApiError::Connection(e.to_string()))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Task join error: {e}")))?
}

/// Formats a sequential document number, e.g. `INV-000042`.
pub fn document_number(prefix: &str, existing: i64) -> String {
    let number = format!("{prefix}-{:06}", existing + 1);
    debug!("Generated document number {number}");
    number
}

/// Treats empty or whitespace-only strings as absent.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_number() {
        assert_eq!(document_number("INV", 0), "INV-000001");
        assert_eq!(document_number("QTE", 41), "QTE-000042");
        assert_eq!(document_number("SO", 999_999), "SO-1000000");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  acme ".into())), Some("acme".into()));
        assert_eq!(non_blank(Some("   ".into())), None);
        assert_eq!(non_blank(None), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Corp."), "acme-corp");
        assert_eq!(slugify("  Big -- Deal  "), "big-deal");
        assert_eq!(slugify("ÄÖÜ"), "");
    }
}

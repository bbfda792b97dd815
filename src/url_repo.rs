use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbConn, DbErr, EntityTrait,
    QueryFilter, SqlErr,
};
use thiserror::Error;
use tracing::instrument;
use url::Url;

use crate::{
    alias::Alias,
    config::{StorageConfig, db_conn_capsule, storage_config_capsule},
    orm::short_url,
};

const CREATE_URL_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS url (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        alias TEXT NOT NULL UNIQUE,
        url TEXT NOT NULL UNIQUE
    )";

/// Builds the store selected by [`storage_config_capsule`].
pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRepository> {
    match get.as_ref(storage_config_capsule).clone() {
        StorageConfig::Sqlite { .. } => {
            let db = get.as_ref(db_conn_capsule).clone();
            Arc::new(SqliteUrlRepository::new(db))
        }
        StorageConfig::InMemory => Arc::new(InMemoryUrlRepository::default()),
    }
}

/// Creates the `url` table if it does not exist yet.
///
/// The inline `UNIQUE` constraints give both `alias` and `url` their indexes.
///
/// # Errors
/// Will return [`Err`] if the DDL statement fails.
pub async fn create_schema(db: &DbConn) -> Result<(), DbErr> {
    db.execute_unprepared(CREATE_URL_TABLE).await?;
    Ok(())
}

/// Durable mapping from alias to destination URL.
///
/// Implementations are the sole arbiter of uniqueness: both the alias and the
/// URL of a live record must be unique, and the check must be atomic with the
/// insert so that concurrent writers cannot both succeed.
#[async_trait]
pub trait UrlRepository: Send + Sync {
    /// Inserts a new record and returns its id.
    async fn save_url(&self, url: &Url, alias: &Alias) -> Result<i64, SaveUrlError>;

    async fn delete_url(&self, alias: &str) -> Result<(), FindUrlError>;

    async fn get_url(&self, alias: &str) -> Result<Url, FindUrlError>;
}

/// The uniqueness constraint a save ran into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conflict {
    Alias,
    Url,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alias => f.write_str("alias"),
            Self::Url => f.write_str("url"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveUrlError {
    #[error("{0} already exists")]
    AlreadyExists(Conflict),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum FindUrlError {
    #[error("url not found")]
    NotFound,
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

pub struct SqliteUrlRepository {
    db: DbConn,
}

impl SqliteUrlRepository {
    #[must_use]
    pub const fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UrlRepository for SqliteUrlRepository {
    #[instrument(skip(self))]
    async fn save_url(&self, url: &Url, alias: &Alias) -> Result<i64, SaveUrlError> {
        let to_insert = short_url::ActiveModel {
            alias: Set(alias.as_str().to_owned()),
            url: Set(url.as_str().to_owned()),
            ..Default::default()
        };

        match to_insert.insert(&self.db).await {
            Ok(inserted) => Ok(inserted.id),
            Err(err) => Err(classify_insert_error(err)),
        }
    }

    #[instrument(skip(self))]
    async fn delete_url(&self, alias: &str) -> Result<(), FindUrlError> {
        let result = short_url::Entity::delete_many()
            .filter(short_url::Column::Alias.eq(alias))
            .exec(&self.db)
            .await
            .context("Failed to delete url record")
            .map_err(FindUrlError::Internal)?;

        if result.rows_affected == 0 {
            return Err(FindUrlError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_url(&self, alias: &str) -> Result<Url, FindUrlError> {
        let record = short_url::Entity::find()
            .filter(short_url::Column::Alias.eq(alias))
            .one(&self.db)
            .await
            .context("Failed to look up url record")
            .map_err(FindUrlError::Internal)?
            .ok_or(FindUrlError::NotFound)?;

        Url::parse(&record.url)
            .with_context(|| format!("Stored url for alias {alias} is not a valid URL"))
            .map_err(FindUrlError::Internal)
    }
}

/// SQLite names the violated column in its message, e.g.
/// `UNIQUE constraint failed: url.alias`.
fn classify_insert_error(err: DbErr) -> SaveUrlError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message)) => {
            if message.contains("url.alias") {
                SaveUrlError::AlreadyExists(Conflict::Alias)
            } else {
                SaveUrlError::AlreadyExists(Conflict::Url)
            }
        }
        _ => SaveUrlError::Internal(anyhow::Error::new(err).context("Failed to insert url record")),
    }
}

/// Map-backed store, mainly useful for tests and throwaway deployments.
///
/// Both indexes sit behind one lock so the uniqueness check and the insert
/// happen atomically.
#[derive(Debug, Default)]
pub struct InMemoryUrlRepository {
    records: Mutex<Records>,
}

#[derive(Debug, Default)]
struct Records {
    last_id: i64,
    by_alias: HashMap<String, (i64, Url)>,
    alias_by_url: HashMap<String, String>,
}

impl InMemoryUrlRepository {
    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| anyhow!("In-memory url store lock was poisoned"))
    }
}

#[async_trait]
impl UrlRepository for InMemoryUrlRepository {
    #[instrument(skip(self))]
    async fn save_url(&self, url: &Url, alias: &Alias) -> Result<i64, SaveUrlError> {
        let mut records = self.lock().map_err(SaveUrlError::Internal)?;

        if records.alias_by_url.contains_key(url.as_str()) {
            return Err(SaveUrlError::AlreadyExists(Conflict::Url));
        }
        if records.by_alias.contains_key(alias.as_str()) {
            return Err(SaveUrlError::AlreadyExists(Conflict::Alias));
        }

        records.last_id += 1;
        let id = records.last_id;
        records
            .alias_by_url
            .insert(url.as_str().to_owned(), alias.as_str().to_owned());
        records
            .by_alias
            .insert(alias.as_str().to_owned(), (id, url.clone()));
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn delete_url(&self, alias: &str) -> Result<(), FindUrlError> {
        let mut records = self.lock().map_err(FindUrlError::Internal)?;

        let (_, url) = records
            .by_alias
            .remove(alias)
            .ok_or(FindUrlError::NotFound)?;
        records.alias_by_url.remove(url.as_str());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_url(&self, alias: &str) -> Result<Url, FindUrlError> {
        let records = self.lock().map_err(FindUrlError::Internal)?;

        records
            .by_alias
            .get(alias)
            .map(|(_, url)| url.clone())
            .ok_or(FindUrlError::NotFound)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn alias(s: &str) -> Alias {
        Alias::new(s.to_owned()).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = InMemoryUrlRepository::default();

        let id = repo
            .save_url(&url("https://example.com/a"), &alias("abc123"))
            .await
            .unwrap();
        assert_eq!(id, 1);

        let stored = repo.get_url("abc123").await.unwrap();
        assert_eq!(stored.as_str(), "https://example.com/a");
    }

    #[tokio::test]
    async fn test_get_missing_alias() {
        let repo = InMemoryUrlRepository::default();
        let err = repo.get_url("nope").await.unwrap_err();
        assert!(matches!(err, FindUrlError::NotFound));
    }

    #[tokio::test]
    async fn test_save_duplicate_alias() {
        let repo = InMemoryUrlRepository::default();
        repo.save_url(&url("https://example.com/a"), &alias("abc123"))
            .await
            .unwrap();

        let err = repo
            .save_url(&url("https://example.com/b"), &alias("abc123"))
            .await
            .unwrap_err();
        assert!(matches!(err, SaveUrlError::AlreadyExists(Conflict::Alias)));

        // existing record is untouched
        let stored = repo.get_url("abc123").await.unwrap();
        assert_eq!(stored.as_str(), "https://example.com/a");
    }

    #[tokio::test]
    async fn test_save_duplicate_url() {
        let repo = InMemoryUrlRepository::default();
        repo.save_url(&url("https://example.com/a"), &alias("first"))
            .await
            .unwrap();

        let err = repo
            .save_url(&url("https://example.com/a"), &alias("second"))
            .await
            .unwrap_err();
        assert!(matches!(err, SaveUrlError::AlreadyExists(Conflict::Url)));
        assert!(matches!(
            repo.get_url("second").await.unwrap_err(),
            FindUrlError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let repo = InMemoryUrlRepository::default();
        repo.save_url(&url("https://example.com/a"), &alias("abc123"))
            .await
            .unwrap();

        repo.delete_url("abc123").await.unwrap();
        let err = repo.delete_url("abc123").await.unwrap_err();
        assert!(matches!(err, FindUrlError::NotFound));
    }

    #[tokio::test]
    async fn test_delete_frees_url_and_alias_but_not_id() {
        let repo = InMemoryUrlRepository::default();
        let first = repo
            .save_url(&url("https://example.com/a"), &alias("abc123"))
            .await
            .unwrap();
        repo.delete_url("abc123").await.unwrap();

        let second = repo
            .save_url(&url("https://example.com/a"), &alias("abc123"))
            .await
            .unwrap();
        assert!(second > first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_of_same_url() {
        let repo = Arc::new(InMemoryUrlRepository::default());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move {
                    repo.save_url(&url("https://example.com/race"), &alias(&format!("a{i}")))
                        .await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(err, SaveUrlError::AlreadyExists(Conflict::Url))),
            }
        }
        assert_eq!(successes, 1);
    }
}

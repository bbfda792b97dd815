use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use crate::{
    alias::{Alias, AliasValidationError},
    url_repo::{Conflict, FindUrlError, SaveUrlError, UrlRepository, url_repository_capsule},
};

/// Length of aliases generated when the caller does not supply one.
pub const DEFAULT_ALIAS_LENGTH: usize = 6;

/// Number of generated aliases tried before giving up on a save.
const SAVE_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedUrl {
    pub id: i64,
    pub alias: String,
}

pub fn url_registration_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRegistrationService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    new_url_registration_service(url_repo)
}

#[must_use]
pub fn new_url_registration_service(
    url_repo: Arc<dyn UrlRepository>,
) -> Arc<dyn UrlRegistrationService> {
    Arc::new(UrlRegistrationServiceImpl {
        url_repo,
        alias_length: DEFAULT_ALIAS_LENGTH,
    })
}

#[async_trait]
pub trait UrlRegistrationService: Send + Sync {
    /// Registers `url` under `alias`, or under a generated alias when none is given.
    async fn save_url(&self, url: &str, alias: Option<String>) -> Result<SavedUrl, PostUrlError>;

    async fn delete_url(&self, alias: &str) -> Result<(), DeleteUrlError>;
}

#[derive(Debug, Error)]
pub enum PostUrlError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid alias: {0}")]
    InvalidAlias(#[from] AliasValidationError),
    #[error("{0} already exists")]
    AlreadyExists(Conflict),
    #[error("every generated alias was already taken")]
    AliasGenerationExhausted,
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error)]
pub enum DeleteUrlError {
    #[error("alias must not be empty")]
    EmptyAlias,
    #[error("url not found")]
    NotFound,
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

struct UrlRegistrationServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    alias_length: usize,
}

#[async_trait]
impl UrlRegistrationService for UrlRegistrationServiceImpl {
    #[instrument(skip(self))]
    async fn save_url(&self, url: &str, alias: Option<String>) -> Result<SavedUrl, PostUrlError> {
        let url = Url::parse(url)?;

        // NOTE: a caller-chosen alias is never substituted, so conflicts surface as-is
        if let Some(alias) = alias {
            let alias = Alias::new(alias)?;
            return match self.url_repo.save_url(&url, &alias).await {
                Ok(id) => Ok(SavedUrl {
                    id,
                    alias: alias.into_inner(),
                }),
                Err(SaveUrlError::AlreadyExists(conflict)) => {
                    Err(PostUrlError::AlreadyExists(conflict))
                }
                Err(SaveUrlError::Internal(err)) => Err(PostUrlError::Internal(err)),
            };
        }

        for attempt in 1..=SAVE_ATTEMPTS {
            let alias = Alias::generate(self.alias_length);

            match self.url_repo.save_url(&url, &alias).await {
                Ok(id) => {
                    info!(id, %alias, "Saved url under generated alias");
                    return Ok(SavedUrl {
                        id,
                        alias: alias.into_inner(),
                    });
                }
                // NOTE: retrying cannot help when the destination itself is taken
                Err(SaveUrlError::AlreadyExists(Conflict::Url)) => {
                    return Err(PostUrlError::AlreadyExists(Conflict::Url));
                }
                Err(SaveUrlError::AlreadyExists(Conflict::Alias)) => {
                    warn!(attempt, %alias, "Generated alias that was already taken");
                }
                Err(SaveUrlError::Internal(err)) => return Err(PostUrlError::Internal(err)),
            }
        }

        Err(PostUrlError::AliasGenerationExhausted)
    }

    #[instrument(skip(self))]
    async fn delete_url(&self, alias: &str) -> Result<(), DeleteUrlError> {
        if alias.is_empty() {
            return Err(DeleteUrlError::EmptyAlias);
        }

        self.url_repo
            .delete_url(alias)
            .await
            .map_err(|err| match err {
                FindUrlError::NotFound => DeleteUrlError::NotFound,
                FindUrlError::Internal(err) => DeleteUrlError::Internal(err),
            })
    }
}

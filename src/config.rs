use std::{
    env::{self, VarError},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, Database, DbConn};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::url_repo::create_schema;

/// Deployment environment; decides how logs are rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Local,
    Dev,
    Prod,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown environment {0:?}, expected one of: local, dev, prod")]
pub struct UnknownEnvironment(String);

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            other => Err(UnknownEnvironment(other.to_owned())),
        }
    }
}

/// Where URL records live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageConfig {
    /// An embedded SQLite file, created on first start.
    Sqlite { path: String },
    /// A process-local map; records are lost on shutdown.
    InMemory,
}

impl StorageConfig {
    #[must_use]
    pub fn connection_url(path: &str) -> String {
        format!("sqlite://{path}?mode=rwc")
    }
}

/// Connects to the configured storage and prepares its schema.
///
/// Does nothing for [`StorageConfig::InMemory`].
///
/// # Errors
/// Will return [`Err`] if the database cannot be opened or the schema cannot be created.
#[instrument(skip(container))]
pub async fn init_storage(container: &Container) -> anyhow::Result<()> {
    let storage_config = container.read(storage_config_capsule);
    info!(?storage_config, "Initializing storage");

    if let StorageConfig::Sqlite { path } = storage_config {
        let set_db_conn = container.read(db_conn_init_action);

        let db = Database::connect(ConnectOptions::new(StorageConfig::connection_url(&path)))
            .await
            .with_context(|| format!("Failed to open SQLite database at {path}"))?;
        create_schema(&db)
            .await
            .context("Failed to create database schema")?;
        set_db_conn(db);
    }

    info!("Storage initialized");
    Ok(())
}

/// Reads an environment variable, treating an unset variable as [`None`].
///
/// # Panics
/// Panics when the variable is set to invalid unicode.
fn read_env_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(actual)) => {
            panic!("{name} environment variable is invalid unicode: {}", actual.display());
        }
    }
}

/// # Panics
/// Panics when environment variable is invalid.
#[must_use]
pub fn environment_capsule(_: CapsuleHandle) -> Environment {
    const ENV_VAR_NAME: &str = "ENV";

    read_env_var(ENV_VAR_NAME).map_or_else(
        || {
            warn!("{ENV_VAR_NAME} environment variable not set; defaulting to local");
            Environment::Local
        },
        |value| {
            value
                .parse()
                .unwrap_or_else(|err| panic!("{ENV_VAR_NAME} environment variable: {err}"))
        },
    )
}

/// # Panics
/// Panics when the backend is unknown, or `STORAGE_PATH` is missing for SQLite.
#[must_use]
pub fn storage_config_capsule(_: CapsuleHandle) -> StorageConfig {
    const BACKEND_VAR_NAME: &str = "STORAGE_BACKEND";
    const PATH_VAR_NAME: &str = "STORAGE_PATH";

    match read_env_var(BACKEND_VAR_NAME).as_deref() {
        None | Some("sqlite") => StorageConfig::Sqlite {
            path: read_env_var(PATH_VAR_NAME)
                .unwrap_or_else(|| panic!("{PATH_VAR_NAME} is not set")),
        },
        Some("memory") => StorageConfig::InMemory,
        Some(other) => {
            panic!("{BACKEND_VAR_NAME} must be one of: sqlite, memory; got {other:?}")
        }
    }
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// # Panics
/// Panics when the [`DbConn`] was not set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    let db_conn = get.as_ref(db_conn_manager).0.clone();
    db_conn.expect("DbConn should've been set via init_storage!")
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn addr_capsule(_: CapsuleHandle) -> String {
    const ENV_VAR_NAME: &str = "ADDR";
    const DEFAULT_ADDR: &str = "127.0.0.1:0";

    if let Some(addr) = read_env_var(ENV_VAR_NAME) {
        info!(addr, "{ENV_VAR_NAME} environment variable set");
        addr
    } else {
        warn!(
            addr = DEFAULT_ADDR,
            "{ENV_VAR_NAME} environment variable not set; defaulting to {DEFAULT_ADDR}"
        );
        DEFAULT_ADDR.to_owned()
    }
}

/// # Panics
/// Panics when environment variable is not a whole number of seconds.
pub fn request_timeout_capsule(_: CapsuleHandle) -> Duration {
    const ENV_VAR_NAME: &str = "HTTP_TIMEOUT_SECONDS";
    const DEFAULT_TIMEOUT_SECONDS: u64 = 4;

    let seconds = read_env_var(ENV_VAR_NAME).map_or(DEFAULT_TIMEOUT_SECONDS, |value| {
        value
            .parse()
            .unwrap_or_else(|err| panic!("{ENV_VAR_NAME} is not a number of seconds: {err}"))
    });
    Duration::from_secs(seconds)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_from_str() {
        assert_eq!("local".parse::<Environment>().unwrap(), Environment::Local);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Prod);
    }

    #[test]
    fn test_environment_from_str_unknown() {
        let err = "staging".parse::<Environment>().unwrap_err();
        assert_eq!(err, UnknownEnvironment("staging".to_owned()));
        assert!(err.to_string().contains("local, dev, prod"));
    }

    #[test]
    fn test_sqlite_connection_url() {
        assert_eq!(
            StorageConfig::connection_url("./storage/storage.db"),
            "sqlite://./storage/storage.db?mode=rwc"
        );
    }
}

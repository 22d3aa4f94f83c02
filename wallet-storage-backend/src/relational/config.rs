//! `postgres_storage` configuration and credentials

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use wallet_storage_core::types::{
    parse_storage_config, parse_storage_credentials, BackendField, StorageCredentials,
};
use wallet_storage_core::{StorageError, StorageResult};

use super::POSTGRES_STORAGE_TYPE;

/// Database used when `url` is a bare `host:port`.
pub const DEFAULT_DATABASE_NAME: &str = "wallets";

/// Maintenance database the admin account connects to for `CREATE DATABASE`.
const MAINTENANCE_DATABASE: &str = "postgres";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SEARCH_BATCH_SIZE: u64 = 64;

/// `storage_config` accepted by `postgres_storage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresConfig {
    /// `host:port`, or a full `postgres://` / `sqlite:` connection URL
    #[serde(default)]
    pub url: String,
    /// Database name for the `host:port` form
    pub database_name: Option<String>,
    pub max_connections: Option<u32>,
    pub connect_timeout_secs: Option<u64>,
    /// Rows fetched per search page
    pub search_batch_size: Option<u64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCredentials {
    account: String,
    password: String,
    admin_account: Option<String>,
    admin_password: Option<String>,
}

/// `storage_credentials` accepted by `postgres_storage`.
#[derive(Debug, Clone)]
pub struct PostgresCredentials {
    pub account: String,
    pub password: SecretString,
    pub admin_account: Option<String>,
    pub admin_password: Option<SecretString>,
}

impl From<RawCredentials> for PostgresCredentials {
    fn from(raw: RawCredentials) -> Self {
        Self {
            account: raw.account,
            password: SecretString::from(raw.password),
            admin_account: raw.admin_account,
            admin_password: raw.admin_password.map(SecretString::from),
        }
    }
}

impl PostgresCredentials {
    /// Admin account when both halves were supplied.
    fn admin(&self) -> Option<(&str, &SecretString)> {
        match (&self.admin_account, &self.admin_password) {
            (Some(account), Some(password)) => Some((account, password)),
            _ => None,
        }
    }
}

/// Database flavour selected by the connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

/// Fully resolved connection settings for one wallet call.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub dialect: Dialect,
    /// URL for regular record access
    pub account_url: String,
    /// URL used for provisioning (create/delete); the account URL when no
    /// admin credentials were supplied
    pub admin_url: String,
    /// Admin URL to the maintenance database, Postgres with admin credentials only
    pub maintenance_url: Option<String>,
    /// Database to create when missing
    pub database_name: Option<String>,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub search_batch_size: u64,
}

impl ConnectionSettings {
    /// Resolve `storage_config` + `storage_credentials` into connection URLs.
    pub fn resolve(
        config: Option<&serde_json::Value>,
        credentials: Option<&StorageCredentials>,
    ) -> StorageResult<Self> {
        let config: PostgresConfig = parse_storage_config(POSTGRES_STORAGE_TYPE, config)?;
        let raw: Option<RawCredentials> =
            parse_storage_credentials(POSTGRES_STORAGE_TYPE, credentials)?;
        let credentials = raw.map(PostgresCredentials::from);
        Self::from_parts(&config, credentials.as_ref())
    }

    pub fn from_parts(
        config: &PostgresConfig,
        credentials: Option<&PostgresCredentials>,
    ) -> StorageResult<Self> {
        let url = config.url.trim();
        if url.is_empty() {
            return Err(invalid("storage_config.url is required"));
        }
        if config.search_batch_size == Some(0) {
            return Err(invalid("storage_config.search_batch_size must be positive"));
        }

        let mut settings = Self {
            dialect: Dialect::Postgres,
            account_url: String::new(),
            admin_url: String::new(),
            maintenance_url: None,
            database_name: None,
            max_connections: config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS).max(1),
            connect_timeout: Duration::from_secs(
                config
                    .connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            search_batch_size: config.search_batch_size.unwrap_or(DEFAULT_SEARCH_BATCH_SIZE),
        };

        if url.starts_with("sqlite:") {
            if config.database_name.is_some() {
                return Err(invalid("database_name does not apply to sqlite URLs"));
            }
            settings.dialect = Dialect::Sqlite;
            settings.account_url = url.to_string();
            settings.admin_url = url.to_string();
            return Ok(settings);
        }

        if url.contains("://") {
            let parsed = Url::parse(url).map_err(|e| invalid(&format!("url is not valid: {e}")))?;
            if !matches!(parsed.scheme(), "postgres" | "postgresql") {
                return Err(invalid("url must be host:port, postgres:// or sqlite:"));
            }
            if config.database_name.is_some() {
                return Err(invalid("database_name only applies to the host:port url form"));
            }
            let database = database_of(&parsed)?;
            // Credentials, when supplied, replace any userinfo in the URL.
            match credentials {
                Some(creds) => settings.apply_credentials(&parsed, creds)?,
                None if !parsed.username().is_empty() => {
                    settings.account_url = url.to_string();
                    settings.admin_url = url.to_string();
                }
                None => return Err(invalid("storage_credentials are required")),
            }
            settings.database_name = database;
            return Ok(settings);
        }

        let creds = credentials.ok_or_else(|| invalid("storage_credentials are required"))?;
        let database = config
            .database_name
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());
        let server = Url::parse(&format!("postgres://{url}"))
            .ok()
            .filter(|server| server.has_host() && server.username().is_empty())
            .ok_or_else(|| invalid("url must be host:port, postgres:// or sqlite:"))?;
        settings.apply_credentials(&with_database(&server, &database)?, creds)?;
        settings.database_name = Some(database);
        Ok(settings)
    }

    /// Fill the account, admin and maintenance URLs for `base`.
    fn apply_credentials(&mut self, base: &Url, creds: &PostgresCredentials) -> StorageResult<()> {
        self.account_url = with_login(base, &creds.account, &creds.password)?;
        let (admin_account, admin_password) = creds
            .admin()
            .unwrap_or((creds.account.as_str(), &creds.password));
        self.admin_url = with_login(base, admin_account, admin_password)?;
        self.maintenance_url = match creds.admin() {
            Some((account, password)) => Some(with_login(
                &with_database(base, MAINTENANCE_DATABASE)?,
                account,
                password,
            )?),
            None => None,
        };
        Ok(())
    }
}

fn invalid(message: &str) -> StorageError {
    StorageError::InvalidConfig(format!("{POSTGRES_STORAGE_TYPE}: {message}"))
}

/// Percent-decoded database name from the URL path, if any.
fn database_of(url: &Url) -> StorageResult<Option<String>> {
    let Some(segment) = url.path_segments().and_then(|mut segments| segments.next()) else {
        return Ok(None);
    };
    if segment.is_empty() {
        return Ok(None);
    }
    let decoded = urlencoding::decode(segment)
        .map_err(|_| invalid("database name in url is not valid UTF-8"))?;
    Ok(Some(decoded.into_owned()))
}

fn with_database(base: &Url, database: &str) -> StorageResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| invalid("url cannot carry a database name"))?
        .clear()
        .push(database);
    Ok(url)
}

fn with_login(base: &Url, account: &str, password: &SecretString) -> StorageResult<String> {
    let mut url = base.clone();
    url.set_username(account)
        .and_then(|()| url.set_password(Some(password.expose_secret())))
        .map_err(|()| invalid("url has no host to log in to"))?;
    Ok(url.into())
}

pub(crate) fn config_fields() -> Vec<BackendField> {
    vec![
        BackendField::new(
            "url",
            true,
            "host:port of the Postgres server, or a full postgres:// or sqlite: URL",
        ),
        BackendField::new(
            "database_name",
            false,
            "Database for the host:port form (default \"wallets\")",
        ),
        BackendField::new("max_connections", false, "Connection pool size (default 5)"),
        BackendField::new(
            "connect_timeout_secs",
            false,
            "Connection acquisition timeout in seconds (default 10)",
        ),
        BackendField::new(
            "search_batch_size",
            false,
            "Rows fetched per search page (default 64)",
        ),
    ]
}

pub(crate) fn credential_fields() -> Vec<BackendField> {
    vec![
        BackendField::new("account", true, "Database account for record access"),
        BackendField::new("password", true, "Password of the account").secret(),
        BackendField::new(
            "admin_account",
            false,
            "Account used to provision or drop wallet storage",
        ),
        BackendField::new("admin_password", false, "Password of the admin account").secret(),
    ]
}

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::AppError;

/// Prefix marking an API key that must be read from the environment.
pub const ENV_KEY_PREFIX: &str = "env:";

/// CKAN API key, either given literally or read from an environment variable
/// each time a request is made.
#[derive(Clone, PartialEq, Eq)]
pub enum ApiKey {
    Literal(String),
    Env(String),
}

impl ApiKey {
    /// Parses `env:NAME` into [`ApiKey::Env`], anything else into a literal key.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(ENV_KEY_PREFIX) {
            Some(var) => ApiKey::Env(var.to_string()),
            None => ApiKey::Literal(raw.to_string()),
        }
    }

    /// Resolves the key against `env`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MissingEnvVar` if an `env:` key names an unset variable.
    pub fn resolve<E: EnvLookup + ?Sized>(&self, env: &E) -> Result<String, AppError> {
        match self {
            ApiKey::Literal(key) => Ok(key.clone()),
            ApiKey::Env(var) => env
                .var(var)
                .ok_or_else(|| AppError::MissingEnvVar(var.clone())),
        }
    }
}

// Keys must never end up in logs.
impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKey::Literal(_) => f.write_str("ApiKey::Literal(***)"),
            ApiKey::Env(var) => write!(f, "ApiKey::Env({var})"),
        }
    }
}

/// Source of environment variables used to resolve [`ApiKey::Env`].
pub trait EnvLookup: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed set of variables, for tests and embedding.
impl EnvLookup for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// How rows are written into a DataStore table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMethod {
    /// Replace the table contents with the pushed rows.
    #[default]
    Insert,
    /// Insert or update rows matched by primary key.
    Upsert,
    /// Update existing rows matched by primary key.
    Update,
}

impl WriteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMethod::Insert => "insert",
            WriteMethod::Upsert => "upsert",
            WriteMethod::Update => "update",
        }
    }
}

impl FromStr for WriteMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(WriteMethod::Insert),
            "upsert" => Ok(WriteMethod::Upsert),
            "update" => Ok(WriteMethod::Update),
            other => Err(AppError::InvalidConfig(format!(
                "unknown datastore write method '{other}', expected insert, upsert or update"
            ))),
        }
    }
}

impl fmt::Display for WriteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP client configuration for CKAN calls.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout. `None` waits for as long as the server takes.
    pub timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            user_agent: concat!("ckan-dumper/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// DataStore push configuration.
#[derive(Debug, Clone)]
pub struct DatastoreConfig {
    pub enabled: bool,
    pub method: WriteMethod,
    /// Rows sent per `datastore_upsert` call.
    pub chunk_size: usize,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: WriteMethod::Insert,
            chunk_size: 1000,
        }
    }
}

/// Settings for one dump run.
#[derive(Debug, Clone)]
pub struct DumperConfig {
    /// Owning organization of the package.
    pub owner_org: Option<String>,
    /// Resolve create conflicts by updating the existing entity.
    pub overwrite_existing_data: bool,
    /// Issue a `package_show` before creating to learn existing resources.
    pub prefetch_existing: bool,
    /// Properties applied on top of the translated package metadata.
    pub dataset_properties: Map<String, Value>,
    pub datastore: DatastoreConfig,
}

impl Default for DumperConfig {
    fn default() -> Self {
        Self {
            owner_org: None,
            overwrite_existing_data: true,
            prefetch_existing: false,
            dataset_properties: Map::new(),
            datastore: DatastoreConfig::default(),
        }
    }
}

/// CKAN package fields that only accept strings.
const STRING_PACKAGE_FIELDS: &[&str] = &[
    "name",
    "title",
    "version",
    "url",
    "notes",
    "license_id",
    "author",
    "author_email",
    "maintainer",
    "maintainer_email",
    "owner_org",
    "state",
];

/// Parses a `key=value` dataset property override.
///
/// The value is read as JSON when it parses, otherwise kept as a plain string,
/// so `private=true` yields a boolean and `title=My data` a string. Values of
/// string-only package fields are never parsed: `version=1.0` stays `"1.0"`.
pub fn parse_dataset_property(raw: &str) -> Result<(String, Value), AppError> {
    let (key, value) = raw.split_once('=').ok_or_else(|| {
        AppError::InvalidConfig(format!("dataset property '{raw}' must be key=value"))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(AppError::InvalidConfig(format!(
            "dataset property '{raw}' has an empty key"
        )));
    }
    let value = if STRING_PACKAGE_FIELDS.contains(&key) {
        Value::String(value.to_string())
    } else {
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
    };
    Ok((key.to_string(), value))
}

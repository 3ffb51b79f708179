//! Command line configuration for the `ckan-dumper` binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ckan_dumper_core::config::parse_dataset_property;
use ckan_dumper_core::{
    AppError, DESCRIPTOR_FILE, DatastoreConfig, DumperConfig, HttpConfig, WriteMethod,
};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};

/// Publish data packages to a CKAN instance.
#[derive(Parser, Debug)]
#[command(name = "ckan-dumper", version, about)]
pub struct Config {
    /// CKAN base URL, e.g. https://demo.ckan.org
    #[arg(long, env = "CKAN_HOST")]
    pub host: String,

    /// API key, or env:NAME to read it from environment variable NAME on every request
    #[arg(long, env = "CKAN_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Request timeout in seconds; no timeout when unset
    #[arg(long, env = "CKAN_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish a data package directory (or its datapackage.json) to CKAN
    Publish(PublishArgs),
    /// Print a CKAN package as JSON
    Show {
        /// Package name or id
        name: String,
    },
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Directory containing datapackage.json, or the descriptor file itself
    pub path: PathBuf,

    /// Organization owning the package
    #[arg(long, env = "CKAN_OWNER_ORG")]
    pub owner_org: Option<String>,

    /// Fail instead of updating when the package or a resource already exists
    #[arg(long)]
    pub no_overwrite: bool,

    /// Read the existing package before creating it
    #[arg(long)]
    pub prefetch_existing: bool,

    /// Load tabular resources into the CKAN DataStore
    #[arg(long)]
    pub push_to_datastore: bool,

    /// DataStore write method: insert, upsert or update
    #[arg(long, default_value = "insert", value_parser = parse_write_method)]
    pub datastore_method: WriteMethod,

    /// Rows per DataStore write call
    #[arg(long, default_value_t = DatastoreConfig::default().chunk_size)]
    pub datastore_chunk_size: usize,

    /// Package property override as key=value; repeatable. Values are parsed as JSON
    /// when possible, except for string fields such as title or version
    #[arg(long = "dataset-property", value_parser = parse_dataset_property)]
    pub dataset_properties: Vec<(String, Value)>,
}

fn parse_write_method(raw: &str) -> Result<WriteMethod, AppError> {
    raw.parse()
}

impl Config {
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout: self.timeout_secs.map(Duration::from_secs),
            ..HttpConfig::default()
        }
    }
}

impl PublishArgs {
    pub fn dumper_config(&self) -> DumperConfig {
        DumperConfig {
            owner_org: self.owner_org.clone(),
            overwrite_existing_data: !self.no_overwrite,
            prefetch_existing: self.prefetch_existing,
            dataset_properties: self.dataset_properties.iter().cloned().collect::<Map<_, _>>(),
            datastore: DatastoreConfig {
                enabled: self.push_to_datastore,
                method: self.datastore_method,
                chunk_size: self.datastore_chunk_size,
            },
        }
    }
}

/// Splits a publish path into the package directory and its descriptor file.
pub fn package_paths(path: &Path) -> (PathBuf, PathBuf) {
    if path.is_file() {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        (dir, path.to_path_buf())
    } else {
        (path.to_path_buf(), path.join(DESCRIPTOR_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_publish_command() {
        let config = Config::try_parse_from([
            "ckan-dumper",
            "--host",
            "http://localhost:5000",
            "--api-key",
            "env:CKAN_KEY",
            "publish",
            "out/ckan_test",
            "--owner-org",
            "test-org",
            "--push-to-datastore",
            "--datastore-method",
            "UPSERT",
            "--dataset-property",
            "private=true",
            "--dataset-property",
            "title=Test data",
            "--dataset-property",
            "version=2.0",
        ])
        .unwrap();

        assert_eq!(config.host, "http://localhost:5000");
        assert_eq!(config.api_key.as_deref(), Some("env:CKAN_KEY"));
        let Command::Publish(args) = config.command else {
            panic!("Expected publish command");
        };

        let dumper = args.dumper_config();
        assert_eq!(dumper.owner_org.as_deref(), Some("test-org"));
        assert!(dumper.overwrite_existing_data);
        assert!(dumper.datastore.enabled);
        assert_eq!(dumper.datastore.method, WriteMethod::Upsert);
        assert_eq!(dumper.datastore.chunk_size, 1000);
        assert_eq!(dumper.dataset_properties["private"], json!(true));
        assert_eq!(dumper.dataset_properties["title"], json!("Test data"));
        assert_eq!(dumper.dataset_properties["version"], json!("2.0"));
    }

    #[test]
    fn test_no_overwrite_flag() {
        let config = Config::try_parse_from([
            "ckan-dumper",
            "--host",
            "http://localhost:5000",
            "publish",
            ".",
            "--no-overwrite",
        ])
        .unwrap();
        let Command::Publish(args) = config.command else {
            panic!("Expected publish command");
        };
        assert!(!args.dumper_config().overwrite_existing_data);
    }

    #[test]
    fn test_invalid_datastore_method_is_rejected() {
        let result = Config::try_parse_from([
            "ckan-dumper",
            "--host",
            "http://localhost:5000",
            "publish",
            ".",
            "--datastore-method",
            "merge",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_http_config_timeout() {
        let config = Config::try_parse_from([
            "ckan-dumper",
            "--host",
            "http://localhost:5000",
            "--timeout-secs",
            "15",
            "show",
            "ckan_test",
        ])
        .unwrap();
        assert_eq!(config.http_config().timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_package_paths() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = dir.path().join("datapackage.json");
        std::fs::write(&descriptor, "{}").unwrap();

        assert_eq!(
            package_paths(dir.path()),
            (dir.path().to_path_buf(), descriptor.clone())
        );
        assert_eq!(
            package_paths(&descriptor),
            (dir.path().to_path_buf(), descriptor.clone())
        );
    }
}

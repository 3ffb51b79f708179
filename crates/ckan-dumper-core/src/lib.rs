//! CKAN dumper core - domain types, error handling, configuration and the
//! publishing logic that pushes a data package to a CKAN instance.

pub mod config;
pub mod datastore;
pub mod error;
pub mod metadata;
pub mod models;
pub mod outcome;
pub mod progress;
pub mod publish;
pub mod traits;

pub use config::{ApiKey, DatastoreConfig, DumperConfig, EnvLookup, HttpConfig, ProcessEnv, WriteMethod};
pub use error::AppError;
pub use models::{
    CkanPackage, CkanResource, CkanResponse, DESCRIPTOR_FILE, DataPackage, ResourceDescriptor,
    Row, TableSchema, ckan_error,
};
pub use outcome::{PublishAction, PublishOutcome, create_or_update};
pub use publish::{CkanDumper, DumpSummary, PublishedResource, ResourceSummary};
pub use traits::{CatalogClient, Entity, Payload};

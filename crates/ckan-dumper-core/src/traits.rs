//! Trait definitions for the CKAN action API.
//!
//! The publishers in this crate only talk to CKAN through [`CatalogClient`],
//! so the create/update logic can be exercised against an in-memory catalog
//! in tests and against the reqwest-based `CkanClient` in production.
//!
//! Every method returns the decoded response envelope. A CKAN-reported
//! failure is an `Ok` envelope with `success: false`; `Err` is reserved for
//! transport and decoding failures, which are never retried.

use std::future::Future;

use serde_json::Value;

use crate::models::{CkanResponse, DatastoreField, ResourceUpload, Row};
use crate::AppError;

/// Kind of CKAN entity handled by the create-or-update logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Package,
    Resource,
}

impl Entity {
    pub fn create_action(&self) -> &'static str {
        match self {
            Entity::Package => "package_create",
            Entity::Resource => "resource_create",
        }
    }

    pub fn update_action(&self) -> &'static str {
        match self {
            Entity::Package => "package_update",
            Entity::Resource => "resource_update",
        }
    }
}

/// Request body of an entity create/update call.
#[derive(Debug, Clone)]
pub enum Payload {
    /// JSON body, used for packages.
    Json(Value),
    /// Multipart form with a file upload, used for resources.
    Upload(ResourceUpload),
}

impl Payload {
    /// The `id` field of the payload, if set to a string.
    pub fn id(&self) -> Option<&str> {
        let id = match self {
            Payload::Json(value) => value.get("id"),
            Payload::Upload(upload) => upload.fields.get("id"),
        };
        id.and_then(Value::as_str)
    }
}

/// Client for the CKAN action API.
pub trait CatalogClient: Send + Sync {
    /// Issues a create or update action with the given payload.
    ///
    /// # Arguments
    ///
    /// * `action` - The action name, e.g. `package_create`
    /// * `payload` - JSON body or multipart upload
    fn submit(
        &self,
        action: &str,
        payload: &Payload,
    ) -> impl Future<Output = Result<CkanResponse, AppError>> + Send;

    /// Fetches a package by id or name (`package_show`).
    fn package_show(&self, id: &str)
    -> impl Future<Output = Result<CkanResponse, AppError>> + Send;

    /// Creates (or extends) the DataStore table of a resource (`datastore_create`).
    fn datastore_create(
        &self,
        resource_id: &str,
        fields: &[DatastoreField],
        primary_key: &[String],
    ) -> impl Future<Output = Result<CkanResponse, AppError>> + Send;

    /// Writes rows into a DataStore table (`datastore_upsert`).
    ///
    /// # Arguments
    ///
    /// * `resource_id` - The resource owning the table
    /// * `records` - Rows to write
    /// * `method` - `insert`, `upsert` or `update`
    fn datastore_upsert(
        &self,
        resource_id: &str,
        records: &[Row],
        method: &str,
    ) -> impl Future<Output = Result<CkanResponse, AppError>> + Send;

    /// Deletes the DataStore table of a resource (`datastore_delete`).
    fn datastore_delete(
        &self,
        resource_id: &str,
    ) -> impl Future<Output = Result<CkanResponse, AppError>> + Send;
}

//! Dump service publishing a data package to CKAN.
//!
//! This module provides the core publishing logic, decoupled from CLI and
//! HTTP concerns:
//!
//! 1. [`CkanDumper::write_dataset`] creates or updates the CKAN package and
//!    keeps the server's view of it, including its resource list.
//! 2. [`CkanDumper::write_resource`] uploads one produced file (a data file or
//!    the `datapackage.json` descriptor), reusing the id of a same-name
//!    resource so reruns update instead of duplicating.
//! 3. [`CkanDumper::push_resource_to_datastore`] optionally loads the rows of
//!    an uploaded resource into the DataStore.
//!
//! [`CkanDumper::dump`] runs the three steps in order for a package written
//! to a directory. Calls are issued one at a time.

use std::path::Path;

use serde_json::Value;

use crate::AppError;
use crate::config::DumperConfig;
use crate::datastore::DatastorePusher;
use crate::metadata::{
    ResourceSource, build_package_payload, build_resource_fields, descriptor_resource_name,
};
use crate::models::{
    CkanPackage, CkanResource, DESCRIPTOR_FILE, DataPackage, ResourceUpload, TableSchema,
};
use crate::outcome::{PublishAction, create_or_update, is_not_found, response_failure};
use crate::progress::{DumpEvent, ProgressReporter, SilentReporter};
use crate::traits::{CatalogClient, Entity, Payload};

/// A resource published by [`CkanDumper::write_resource`].
#[derive(Debug, Clone)]
pub struct PublishedResource {
    pub action: PublishAction,
    pub resource: CkanResource,
    /// Rows written to the DataStore, when a push happened.
    pub datastore_rows: Option<usize>,
}

/// Per-resource line of a [`DumpSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    pub name: String,
    pub id: String,
    pub action: PublishAction,
    pub datastore_rows: Option<usize>,
}

/// What a dump published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSummary {
    pub package_name: String,
    pub package_id: String,
    pub package_action: PublishAction,
    pub resources: Vec<ResourceSummary>,
}

impl DumpSummary {
    pub fn new(package_name: &str, package_id: &str, package_action: PublishAction) -> Self {
        Self {
            package_name: package_name.to_string(),
            package_id: package_id.to_string(),
            package_action,
            resources: Vec::new(),
        }
    }

    pub fn created(&self) -> usize {
        self.count(PublishAction::Created)
    }

    pub fn updated(&self) -> usize {
        self.count(PublishAction::Updated)
    }

    fn count(&self, action: PublishAction) -> usize {
        self.resources.iter().filter(|r| r.action == action).count()
    }

    /// Total rows written to the DataStore across resources.
    pub fn datastore_rows(&self) -> usize {
        self.resources.iter().filter_map(|r| r.datastore_rows).sum()
    }
}

/// Publishes data packages to CKAN through a [`CatalogClient`].
///
/// The dumper remembers the package returned by the last successful package
/// call, so resources published afterwards can be matched against the
/// server-side resource list.
///
/// # Example
///
/// ```ignore
/// use ckan_dumper_core::{CkanDumper, DataPackage, DumperConfig};
///
/// let mut dumper = CkanDumper::new(ckan_client, DumperConfig::default());
/// let package = DataPackage::from_path(&dir.join("datapackage.json"))?;
/// let summary = dumper.dump(&package, &dir).await?;
/// println!("Published {} ({} resources)", summary.package_id, summary.resources.len());
/// ```
pub struct CkanDumper<C: CatalogClient> {
    client: C,
    config: DumperConfig,
    package: Option<CkanPackage>,
}

impl<C: CatalogClient> CkanDumper<C> {
    pub fn new(client: C, config: DumperConfig) -> Self {
        Self {
            client,
            config,
            package: None,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &DumperConfig {
        &self.config
    }

    /// The package as last returned by CKAN, once published.
    pub fn package(&self) -> Option<&CkanPackage> {
        self.package.as_ref()
    }

    /// Creates or updates the CKAN package for `package`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ckan` with the reported error if the package could
    /// be neither created nor (when overwriting is enabled) updated.
    pub async fn write_dataset(
        &mut self,
        package: &DataPackage,
    ) -> Result<(PublishAction, &CkanPackage), AppError> {
        if self.config.prefetch_existing {
            self.prefetch(&package.name.to_lowercase()).await?;
        }

        let payload = build_package_payload(
            package,
            self.config.owner_org.as_deref(),
            &self.config.dataset_properties,
        );
        let outcome = create_or_update(
            &self.client,
            Entity::Package,
            &Payload::Json(Value::Object(payload)),
            self.config.overwrite_existing_data,
        )
        .await?;
        let (action, result) = outcome.into_result(Entity::Package)?;

        let published: CkanPackage = serde_json::from_value(result)?;
        tracing::debug!(
            id = %published.id,
            resources = published.resources.len(),
            "Package state refreshed from CKAN"
        );
        Ok((action, self.package.insert(published)))
    }

    /// Seeds the package state from `package_show`, if the package exists.
    async fn prefetch(&mut self, name: &str) -> Result<(), AppError> {
        let response = self.client.package_show(name).await?;
        match response_failure(&response) {
            None => {
                let existing: CkanPackage =
                    serde_json::from_value(response.result.unwrap_or(Value::Null))?;
                tracing::debug!(
                    id = %existing.id,
                    resources = existing.resources.len(),
                    "Found existing package"
                );
                self.package = Some(existing);
            }
            Some(error) if is_not_found(&error) => {
                tracing::debug!(name, "No existing package");
            }
            Some(error) => {
                tracing::warn!(name, error = %error, "package_show failed, continuing without it");
            }
        }
        Ok(())
    }

    /// Uploads one produced file of `package` as a CKAN resource.
    ///
    /// # Arguments
    ///
    /// * `package` - The data package being dumped
    /// * `file` - Location of the file to upload
    /// * `res_path` - Path of the file relative to the package, either a
    ///   resource `path` or `datapackage.json`
    ///
    /// # Errors
    ///
    /// - `AppError::PackageNotPublished` if [`write_dataset`](Self::write_dataset)
    ///   has not succeeded yet
    /// - `AppError::AmbiguousResource` if several resources on CKAN share the name
    /// - `AppError::Ckan` if both create and update failed
    pub async fn write_resource(
        &mut self,
        package: &DataPackage,
        file: &Path,
        res_path: &str,
    ) -> Result<PublishedResource, AppError> {
        let res_path = res_path.trim_start_matches("./");
        let source = if res_path == DESCRIPTOR_FILE {
            ResourceSource::Descriptor(package)
        } else {
            let mut matches = package.resources.iter().filter(|r| r.path == res_path);
            match (matches.next(), matches.next()) {
                (Some(descriptor), None) => ResourceSource::Data(descriptor),
                (None, _) => {
                    return Err(AppError::Generic(format!(
                        "No resource with path {res_path} in package {}",
                        package.name
                    )));
                }
                (Some(_), Some(_)) => {
                    return Err(AppError::Generic(format!(
                        "Several resources with path {res_path} in package {}",
                        package.name
                    )));
                }
            }
        };
        let name = match source {
            ResourceSource::Descriptor(_) => descriptor_resource_name(package),
            ResourceSource::Data(descriptor) => descriptor.name.clone(),
        };

        let state = self
            .package
            .as_ref()
            .ok_or_else(|| AppError::PackageNotPublished(name.clone()))?;
        let existing: Vec<&CkanResource> = state.resources_named(&name).collect();
        let count = existing.len();
        if count > 1 {
            return Err(AppError::AmbiguousResource { name, count });
        }
        let existing_id = existing.first().map(|r| r.id.as_str());

        let fields = build_resource_fields(&state.id, &name, res_path, source, existing_id);
        let content = tokio::fs::read(file).await?;
        let payload = Payload::Upload(ResourceUpload {
            fields,
            file_name: res_path.to_string(),
            content,
        });

        let outcome = create_or_update(
            &self.client,
            Entity::Resource,
            &payload,
            self.config.overwrite_existing_data,
        )
        .await?;
        drop(payload);
        let (action, result) = outcome.into_result(Entity::Resource)?;
        let resource: CkanResource = serde_json::from_value(result)?;

        if let Some(state) = self.package.as_mut() {
            state.upsert_resource(resource.clone());
        }

        let datastore_rows = match source {
            ResourceSource::Data(descriptor) if self.config.datastore.enabled => {
                let format = descriptor.effective_format();
                match &descriptor.schema {
                    Some(schema) if format.as_deref() == Some("csv") => Some(
                        self.push_resource_to_datastore(&resource.id, schema, file)
                            .await?,
                    ),
                    Some(_) => {
                        tracing::warn!(name = %name, format = ?format, "Only CSV resources can be pushed to the DataStore, skipping");
                        None
                    }
                    None => {
                        tracing::warn!(name = %name, "Resource has no schema, skipping DataStore push");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(PublishedResource {
            action,
            resource,
            datastore_rows,
        })
    }

    /// Creates the DataStore table of `resource_id` and writes the rows of the
    /// delimited file at `file` with the configured method.
    pub async fn push_resource_to_datastore(
        &self,
        resource_id: &str,
        schema: &TableSchema,
        file: &Path,
    ) -> Result<usize, AppError> {
        DatastorePusher::new(self.client(), &self.config().datastore)
            .push_file(resource_id, schema, file)
            .await
    }

    /// Publishes `package`, whose files live under `base_dir`.
    ///
    /// Equivalent to [`dump_with_progress`](Self::dump_with_progress) with a
    /// [`SilentReporter`].
    pub async fn dump(
        &mut self,
        package: &DataPackage,
        base_dir: &Path,
    ) -> Result<DumpSummary, AppError> {
        self.dump_with_progress(package, base_dir, "", &SilentReporter)
            .await
    }

    /// Publishes the package, then every resource file in descriptor order,
    /// then the descriptor file, emitting progress events.
    ///
    /// A failure aborts the dump; what was already published stays on CKAN.
    pub async fn dump_with_progress<R: ProgressReporter>(
        &mut self,
        package: &DataPackage,
        base_dir: &Path,
        host: &str,
        reporter: &R,
    ) -> Result<DumpSummary, AppError> {
        reporter.report(DumpEvent::DatasetStarted {
            name: &package.name,
            host,
        });
        let (package_action, published) = self.write_dataset(package).await?;
        let mut summary = DumpSummary::new(&published.name, &published.id, package_action);
        reporter.report(DumpEvent::DatasetPublished {
            name: &summary.package_name,
            id: &summary.package_id,
            action: package_action,
        });

        let descriptor_name = descriptor_resource_name(package);
        let files = package
            .resources
            .iter()
            .map(|r| (r.name.as_str(), r.path.as_str()))
            .chain(std::iter::once((descriptor_name.as_str(), DESCRIPTOR_FILE)));
        let total = package.resources.len() + 1;

        for (index, (name, res_path)) in files.enumerate() {
            reporter.report(DumpEvent::ResourceStarted { index, total, name });

            let published = self
                .write_resource(package, &base_dir.join(res_path), res_path)
                .await?;
            reporter.report(DumpEvent::ResourcePublished {
                index,
                total,
                name,
                id: &published.resource.id,
                action: published.action,
            });
            if let Some(rows) = published.datastore_rows {
                reporter.report(DumpEvent::DatastorePushed {
                    name,
                    rows,
                    method: self.config().datastore.method,
                });
            }

            summary.resources.push(ResourceSummary {
                name: name.to_string(),
                id: published.resource.id,
                action: published.action,
                datastore_rows: published.datastore_rows,
            });
        }

        reporter.report(DumpEvent::DumpCompleted { summary: &summary });
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_summary_counts() {
        let mut summary = DumpSummary::new("ckan_test", "pkg-1", PublishAction::Updated);
        summary.resources.push(ResourceSummary {
            name: "res_1".to_string(),
            id: "r1".to_string(),
            action: PublishAction::Updated,
            datastore_rows: Some(3),
        });
        summary.resources.push(ResourceSummary {
            name: "datapackage.json".to_string(),
            id: "r2".to_string(),
            action: PublishAction::Created,
            datastore_rows: None,
        });

        assert_eq!(summary.created(), 1);
        assert_eq!(summary.updated(), 1);
        assert_eq!(summary.datastore_rows(), 3);
    }
}

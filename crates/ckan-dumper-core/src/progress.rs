//! Progress reporting for dump operations.
//!
//! This module provides a trait-based abstraction for reporting progress while
//! a data package is published, so the library stays silent by default and
//! the CLI can log every step.

use crate::config::WriteMethod;
use crate::outcome::PublishAction;
use crate::publish::DumpSummary;

/// Events emitted while dumping a data package to CKAN.
#[derive(Debug, Clone)]
pub enum DumpEvent<'a> {
    /// Package publishing starting.
    DatasetStarted {
        /// Package name.
        name: &'a str,
        /// CKAN host.
        host: &'a str,
    },

    /// Package created or updated on CKAN.
    DatasetPublished {
        /// Package name.
        name: &'a str,
        /// Server-assigned package id.
        id: &'a str,
        /// Whether the package was created or updated.
        action: PublishAction,
    },

    /// Resource upload starting.
    ResourceStarted {
        /// Zero-based index of the resource, the descriptor comes last.
        index: usize,
        /// Number of resources including the descriptor.
        total: usize,
        /// Resource name on CKAN.
        name: &'a str,
    },

    /// Resource created or updated on CKAN.
    ResourcePublished {
        /// Zero-based index of the resource.
        index: usize,
        /// Number of resources including the descriptor.
        total: usize,
        /// Resource name on CKAN.
        name: &'a str,
        /// Server-assigned resource id.
        id: &'a str,
        /// Whether the resource was created or updated.
        action: PublishAction,
    },

    /// Rows of a resource written to the DataStore.
    DatastorePushed {
        /// Resource name on CKAN.
        name: &'a str,
        /// Number of rows written.
        rows: usize,
        /// Write method used.
        method: WriteMethod,
    },

    /// Dump completed.
    DumpCompleted {
        /// Summary of everything published.
        summary: &'a DumpSummary,
    },
}

/// Trait for reporting dump progress.
///
/// The default implementation does nothing (silent mode), which is
/// appropriate for library usage where the caller doesn't need progress updates.
///
/// # Example
///
/// ```
/// use ckan_dumper_core::progress::{DumpEvent, ProgressReporter};
///
/// struct MyReporter;
///
/// impl ProgressReporter for MyReporter {
///     fn report(&self, event: DumpEvent<'_>) {
///         if let DumpEvent::ResourceStarted { name, .. } = event {
///             println!("Uploading: {}", name);
///         }
///     }
/// }
/// ```
pub trait ProgressReporter: Send + Sync {
    /// Called when a dump event occurs.
    fn report(&self, event: DumpEvent<'_>) {
        let _ = event;
    }
}

/// A no-op reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// A reporter that logs events using the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

fn verb(action: PublishAction) -> &'static str {
    match action {
        PublishAction::Created => "created",
        PublishAction::Updated => "updated",
    }
}

impl ProgressReporter for TracingReporter {
    fn report(&self, event: DumpEvent<'_>) {
        use tracing::info;

        match event {
            DumpEvent::DatasetStarted { name, host } => {
                info!("Publishing package {} to {}", name, host);
            }
            DumpEvent::DatasetPublished { name, id, action } => {
                info!("Package {} {} ({})", name, verb(action), id);
            }
            DumpEvent::ResourceStarted { index, total, name } => {
                info!("[{}/{}] Uploading {}", index + 1, total, name);
            }
            DumpEvent::ResourcePublished {
                index,
                total,
                name,
                id,
                action,
            } => {
                info!("[{}/{}] {} {} ({})", index + 1, total, name, verb(action), id);
            }
            DumpEvent::DatastorePushed { name, rows, method } => {
                info!("Pushed {} row(s) of {} to the DataStore ({})", rows, name, method);
            }
            DumpEvent::DumpCompleted { summary } => {
                info!(
                    "Dump complete: package {} with {} resource(s) ({} created, {} updated)",
                    summary.package_name,
                    summary.resources.len(),
                    summary.created(),
                    summary.updated()
                );
            }
        }
    }
}

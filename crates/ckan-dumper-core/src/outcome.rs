//! Create-then-update publishing of CKAN entities.
//!
//! CKAN's create actions are not idempotent: rerunning a pipeline usually hits
//! a name/url conflict. Publishing therefore always tries the create action
//! first and, when overwriting is allowed, falls back to the update action
//! with the same payload. Update is never tried first, so a first run cannot
//! clobber metadata through a partial update. Resources are only updated when
//! the payload names the id of an existing resource.

use serde_json::{Value, json};

use crate::AppError;
use crate::models::{CkanResponse, ckan_error};
use crate::traits::{CatalogClient, Entity, Payload};

/// Which action succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAction {
    Created,
    Updated,
}

/// Result of a create-or-update attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// The create action succeeded; holds its `result`.
    Created(Value),
    /// Create failed and the update fallback succeeded; holds its `result`.
    Updated(Value),
    /// Create failed and update failed or was not allowed.
    Failed {
        create_error: Value,
        update_error: Option<Value>,
    },
}

impl PublishOutcome {
    /// Splits a successful outcome into its action and result, turning a
    /// failure into `AppError::Ckan`.
    pub fn into_result(self, entity: Entity) -> Result<(PublishAction, Value), AppError> {
        match self {
            PublishOutcome::Created(result) => Ok((PublishAction::Created, result)),
            PublishOutcome::Updated(result) => Ok((PublishAction::Updated, result)),
            PublishOutcome::Failed {
                create_error,
                update_error,
            } => {
                let action = match update_error {
                    Some(_) => entity.update_action(),
                    None => entity.create_action(),
                };
                let error = update_error.unwrap_or(create_error);
                Err(AppError::Ckan {
                    action: action.to_string(),
                    error,
                })
            }
        }
    }
}

/// Returns the failure payload of `response`, or `None` if it succeeded.
///
/// A response flagged unsuccessful without an error payload still counts as
/// a failure.
pub fn response_failure(response: &CkanResponse) -> Option<Value> {
    if response.success {
        return None;
    }
    Some(
        ckan_error(response)
            .cloned()
            .unwrap_or_else(|| json!({"message": "CKAN reported failure without an error"})),
    )
}

/// Returns the `result` of a successful response, or `AppError::Ckan`.
pub fn expect_success(action: &str, response: CkanResponse) -> Result<Value, AppError> {
    match response_failure(&response) {
        None => Ok(response.result.unwrap_or(Value::Null)),
        Some(error) => {
            tracing::error!(action, error = %error, "CKAN action failed");
            Err(AppError::Ckan {
                action: action.to_string(),
                error,
            })
        }
    }
}

/// Whether a CKAN error payload reports a missing object.
pub fn is_not_found(error: &Value) -> bool {
    error.get("__type").and_then(Value::as_str) == Some("Not Found Error")
}

/// Publishes `payload` as `entity`: create, then update on failure when
/// `overwrite` is set.
///
/// # Errors
///
/// Only transport and decoding errors are returned as `Err`; CKAN-reported
/// failures end up in [`PublishOutcome::Failed`].
pub async fn create_or_update<C: CatalogClient>(
    client: &C,
    entity: Entity,
    payload: &Payload,
    overwrite: bool,
) -> Result<PublishOutcome, AppError> {
    let created = client.submit(entity.create_action(), payload).await?;
    let create_error = match response_failure(&created) {
        None => return Ok(PublishOutcome::Created(created.result.unwrap_or(Value::Null))),
        Some(error) => error,
    };

    if !overwrite {
        tracing::error!(
            action = entity.create_action(),
            error = %create_error,
            "Create failed and overwriting existing data is disabled"
        );
        return Ok(PublishOutcome::Failed {
            create_error,
            update_error: None,
        });
    }

    // resource_update needs the id of an existing resource.
    if entity == Entity::Resource && payload.id().is_none() {
        tracing::error!(
            action = entity.create_action(),
            error = %create_error,
            "Create failed and there is no existing resource to update"
        );
        return Ok(PublishOutcome::Failed {
            create_error,
            update_error: None,
        });
    }

    tracing::debug!(
        action = entity.create_action(),
        error = %create_error,
        "Create failed, falling back to {}",
        entity.update_action()
    );

    let updated = client.submit(entity.update_action(), payload).await?;
    match response_failure(&updated) {
        None => Ok(PublishOutcome::Updated(updated.result.unwrap_or(Value::Null))),
        Some(update_error) => {
            tracing::error!(
                create_error = %create_error,
                update_error = %update_error,
                "{} and {} both failed",
                entity.create_action(),
                entity.update_action()
            );
            Ok(PublishOutcome::Failed {
                create_error,
                update_error: Some(update_error),
            })
        }
    }
}

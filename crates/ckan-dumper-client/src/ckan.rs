use std::sync::Arc;

use ckan_dumper_core::config::{ApiKey, EnvLookup, HttpConfig, ProcessEnv};
use ckan_dumper_core::models::{CkanPackage, CkanResponse, DatastoreField, ResourceUpload, Row};
use ckan_dumper_core::outcome::expect_success;
use ckan_dumper_core::{AppError, CatalogClient, Payload};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use url::Url;

/// Path of the CKAN action API, relative to the portal base URL.
const ACTION_API_PATH: &str = "api/3/action/";

/// Body of an action request.
#[derive(Debug, Clone, Copy)]
pub enum RequestBody<'a> {
    /// GET with query parameters.
    Query(&'a [(&'a str, &'a str)]),
    /// POST with a JSON body.
    Json(&'a Value),
    /// POST with a multipart form; the file goes into the `upload` part.
    Multipart(&'a ResourceUpload),
}

fn client_error(e: reqwest::Error) -> AppError {
    AppError::ClientError(e.to_string())
}

/// HTTP client for the action API of a CKAN portal.
///
/// CKAN API reference: <https://docs.ckan.org/en/2.9/api/>
///
/// # Examples
///
/// ```no_run
/// use ckan_dumper_client::CkanClient;
/// use ckan_dumper_core::{ApiKey, HttpConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = CkanClient::with_config(
///     "https://demo.ckan.org",
///     Some(ApiKey::parse("env:CKAN_API_KEY")),
///     &HttpConfig::default(),
/// )?;
/// let package = client.show_package("my-dataset").await?;
/// println!("Found {} resources", package.resources.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CkanClient {
    client: Client,
    base_url: Url,
    api_key: Option<ApiKey>,
    env: Arc<dyn EnvLookup>,
}

impl CkanClient {
    /// Creates an unauthenticated client for the specified portal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` if the URL is invalid or malformed.
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(base_url_str: &str) -> Result<Self, AppError> {
        Self::with_config(base_url_str, None, &HttpConfig::default())
    }

    /// Creates a client sending `api_key` with every request.
    ///
    /// # Arguments
    ///
    /// * `base_url_str` - The base URL of the CKAN portal (e.g., "https://demo.ckan.org")
    /// * `api_key` - Literal key or `env:` reference, resolved per request
    /// * `http` - Timeout and User-Agent settings
    pub fn with_config(
        base_url_str: &str,
        api_key: Option<ApiKey>,
        http: &HttpConfig,
    ) -> Result<Self, AppError> {
        let invalid = || AppError::InvalidConfig(format!("Invalid CKAN URL: {}", base_url_str));
        let mut base_url = Url::parse(base_url_str).map_err(|_| invalid())?;
        if base_url.cannot_be_a_base() {
            return Err(invalid());
        }
        // Url::join replaces the last segment unless the path ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = Client::builder().user_agent(http.user_agent.as_str());
        if let Some(timeout) = http.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(client_error)?;

        Ok(Self {
            client,
            base_url,
            api_key,
            env: Arc::new(ProcessEnv),
        })
    }

    /// Replaces the environment used to resolve `env:` API keys.
    pub fn with_env(mut self, env: impl EnvLookup + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Full URL of an action, e.g. `<host>/api/3/action/package_create`.
    pub fn action_url(&self, action: &str) -> Result<Url, AppError> {
        self.base_url
            .join(ACTION_API_PATH)
            .and_then(|api| api.join(action))
            .map_err(|e| AppError::Generic(e.to_string()))
    }

    /// Value of the `Authorization` header, resolved now.
    fn authorization(&self) -> Result<Option<String>, AppError> {
        self.api_key
            .as_ref()
            .map(|key| key.resolve(self.env.as_ref()))
            .transpose()
    }

    /// Calls a CKAN action and decodes the response envelope.
    ///
    /// The body is decoded whatever the HTTP status, since CKAN reports
    /// failures inside the envelope (with 409, 403, ... statuses).
    ///
    /// # Errors
    ///
    /// Returns `AppError::MissingEnvVar` if the API key cannot be resolved.
    /// Returns `AppError::ClientError` if the HTTP request fails.
    /// Returns `AppError::InvalidResponse` if the body is not a JSON envelope.
    pub async fn request(
        &self,
        action: &str,
        body: RequestBody<'_>,
    ) -> Result<CkanResponse, AppError> {
        let url = self.action_url(action)?;
        let authorization = self.authorization()?;

        let mut request = match body {
            RequestBody::Query(params) => self.client.request(Method::GET, url.clone()).query(params),
            RequestBody::Json(value) => self.client.request(Method::POST, url.clone()).json(value),
            RequestBody::Multipart(upload) => {
                let mut form = Form::new();
                for (key, value) in upload.text_fields() {
                    form = form.text(key, value);
                }
                let part = Part::bytes(upload.content.clone()).file_name(upload.file_name.clone());
                form = form.part("upload", part);
                self.client
                    .request(Method::POST, url.clone())
                    .multipart(form)
            }
        };
        if let Some(key) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, key);
        }

        tracing::debug!(action, url = %url, "Calling CKAN");
        let resp = request.send().await.map_err(client_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(client_error)?;

        serde_json::from_str(&text).map_err(|e| {
            tracing::error!(url = %url, status = %status, "Expected JSON in response");
            AppError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Fetches the full details of a package by id or name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ckan` if CKAN reports an error (e.g. not found).
    pub async fn show_package(&self, id: &str) -> Result<CkanPackage, AppError> {
        let response = CatalogClient::package_show(self, id).await?;
        let result = expect_success("package_show", response)?;
        Ok(serde_json::from_value(result)?)
    }
}

impl CatalogClient for CkanClient {
    async fn submit(&self, action: &str, payload: &Payload) -> Result<CkanResponse, AppError> {
        let body = match payload {
            Payload::Json(value) => RequestBody::Json(value),
            Payload::Upload(upload) => RequestBody::Multipart(upload),
        };
        self.request(action, body).await
    }

    async fn package_show(&self, id: &str) -> Result<CkanResponse, AppError> {
        self.request("package_show", RequestBody::Query(&[("id", id)]))
            .await
    }

    async fn datastore_create(
        &self,
        resource_id: &str,
        fields: &[DatastoreField],
        primary_key: &[String],
    ) -> Result<CkanResponse, AppError> {
        let mut body = json!({
            "resource_id": resource_id,
            "fields": fields,
            "force": true,
        });
        if !primary_key.is_empty() {
            body["primary_key"] = json!(primary_key);
        }
        self.request("datastore_create", RequestBody::Json(&body))
            .await
    }

    async fn datastore_upsert(
        &self,
        resource_id: &str,
        records: &[Row],
        method: &str,
    ) -> Result<CkanResponse, AppError> {
        let body = json!({
            "resource_id": resource_id,
            "records": records,
            "method": method,
            "force": true,
        });
        self.request("datastore_upsert", RequestBody::Json(&body))
            .await
    }

    async fn datastore_delete(&self, resource_id: &str) -> Result<CkanResponse, AppError> {
        let body = json!({
            "resource_id": resource_id,
            "force": true,
        });
        self.request("datastore_delete", RequestBody::Json(&body))
            .await
    }
}

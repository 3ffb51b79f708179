//! Data types exchanged with the pipeline (data package descriptors) and with
//! CKAN (response envelopes, packages, resources).

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::AppError;

/// File name of a data package descriptor.
pub const DESCRIPTOR_FILE: &str = "datapackage.json";

/// A single row of tabular data, keyed by field name.
pub type Row = Map<String, Value>;

/// Data package descriptor as written by the pipeline's file dumper.
///
/// Only the properties the dumper needs are typed; everything else
/// (title, licenses, keywords, custom properties...) is kept in `properties`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DataPackage {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl DataPackage {
    /// Creates an empty package with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            properties: Map::new(),
        }
    }

    /// Loads a descriptor from a `datapackage.json` file.
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Looks up a resource by its relative path.
    pub fn resource_by_path(&self, path: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.path == path)
    }

    /// Returns a top-level string property.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// Descriptor of one resource of a data package.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResourceDescriptor {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            format: None,
            encoding: None,
            hash: None,
            schema: None,
            extras: Map::new(),
        }
    }

    /// Declared format, falling back to the path extension.
    pub fn effective_format(&self) -> Option<String> {
        self.format.clone().or_else(|| {
            Path::new(&self.path)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase)
        })
    }
}

/// Table Schema of a tabular resource.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<SchemaField>,
    #[serde(
        rename = "primaryKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub primary_key: Option<PrimaryKey>,
}

impl TableSchema {
    /// Primary key field names, empty when the schema declares none.
    pub fn primary_key_fields(&self) -> Vec<String> {
        match &self.primary_key {
            Some(PrimaryKey::Single(name)) => vec![name.clone()],
            Some(PrimaryKey::Composite(names)) => names.clone(),
            None => Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum PrimaryKey {
    Single(String),
    Composite(Vec<String>),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            format: None,
        }
    }
}

fn default_field_type() -> String {
    "string".to_string()
}

/// Generic wrapper for CKAN action API responses.
///
/// CKAN API reference: <https://docs.ckan.org/en/2.9/api/>
///
/// CKAN always returns responses with the structure:
/// ```json
/// {
///     "success": bool,
///     "error": object | null,
///     "result": T
/// }
/// ```
/// and does so with non-2xx statuses too, so success is judged from the
/// envelope rather than the HTTP status.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CkanResponse<T = Value> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub result: Option<T>,
}

impl<T> CkanResponse<T> {
    /// Successful envelope around `result`.
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            error: None,
            result: Some(result),
        }
    }

    /// Failed envelope carrying `error`.
    pub fn failed(error: Value) -> Self {
        Self {
            success: false,
            error: Some(error),
            result: None,
        }
    }
}

/// Returns the error of a CKAN response, or `None`.
///
/// The error is only reported when `success` is false; a successful response
/// never yields an error, whatever its `error` field holds.
pub fn ckan_error<T>(response: &CkanResponse<T>) -> Option<&Value> {
    if response.success {
        return None;
    }
    response.error.as_ref().filter(|e| !e.is_null())
}

/// Package as returned by `package_create`, `package_update` and `package_show`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CkanPackage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub resources: Vec<CkanResource>,
    /// All other fields returned by CKAN (title, organization, tags...).
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl CkanPackage {
    /// Resources whose name is exactly `name`.
    pub fn resources_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a CkanResource> {
        self.resources
            .iter()
            .filter(move |r| r.name.as_deref() == Some(name))
    }

    /// Records a resource returned by CKAN, replacing the entry with the same id.
    pub fn upsert_resource(&mut self, resource: CkanResource) {
        match self.resources.iter_mut().find(|r| r.id == resource.id) {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }
}

/// Resource as returned by `resource_create` and `resource_update`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CkanResource {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// Multipart payload of a resource create/update call.
#[derive(Debug, Clone)]
pub struct ResourceUpload {
    /// Form fields; null values are not sent.
    pub fields: Map<String, Value>,
    /// File name of the `upload` part (the resource's relative path).
    pub file_name: String,
    pub content: Vec<u8>,
}

impl ResourceUpload {
    /// Form fields rendered as text, skipping nulls.
    pub fn text_fields(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect()
    }
}

/// Column definition of a DataStore table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DatastoreField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ckan_error_success_true_is_none() {
        let response: CkanResponse = serde_json::from_value(json!({
            "success": true,
            "error": {"message": "ignored"},
            "result": {"id": "abc"}
        }))
        .unwrap();
        assert!(ckan_error(&response).is_none());
    }

    #[test]
    fn test_ckan_error_returns_error_unchanged() {
        let error = json!({"__type": "Validation Error", "name": ["That URL is already in use."]});
        let response: CkanResponse = serde_json::from_value(json!({
            "success": false,
            "error": error.clone()
        }))
        .unwrap();
        assert_eq!(ckan_error(&response), Some(&error));
    }

    #[test]
    fn test_ckan_error_without_error_field() {
        let response: CkanResponse = serde_json::from_value(json!({"success": false})).unwrap();
        assert!(ckan_error(&response).is_none());

        let response: CkanResponse =
            serde_json::from_value(json!({"success": false, "error": null})).unwrap();
        assert!(ckan_error(&response).is_none());
    }

    #[test]
    fn test_ckan_response_missing_success_is_failure() {
        let response: CkanResponse =
            serde_json::from_value(json!({"error": {"message": "boom"}})).unwrap();
        assert!(!response.success);
        assert!(ckan_error(&response).is_some());
    }

    #[test]
    fn test_data_package_deserialization() {
        let json = r#"{
            "name": "ckan_test",
            "title": "CKAN test",
            "keywords": ["a", "b"],
            "resources": [{
                "name": "res_1",
                "path": "res_1.csv",
                "format": "csv",
                "encoding": "utf-8",
                "schema": {
                    "fields": [{"name": "x", "type": "integer"}, {"name": "y"}],
                    "primaryKey": "x"
                },
                "dpp:streaming": true
            }]
        }"#;

        let package: DataPackage = serde_json::from_str(json).unwrap();
        assert_eq!(package.name, "ckan_test");
        assert_eq!(package.property_str("title"), Some("CKAN test"));
        assert!(package.properties.contains_key("keywords"));
        assert!(!package.properties.contains_key("resources"));

        let resource = package.resource_by_path("res_1.csv").unwrap();
        assert_eq!(resource.name, "res_1");
        assert!(resource.extras.contains_key("dpp:streaming"));

        let schema = resource.schema.as_ref().unwrap();
        assert_eq!(schema.fields[1].field_type, "string");
        assert_eq!(schema.primary_key_fields(), vec!["x".to_string()]);
    }

    #[test]
    fn test_composite_primary_key() {
        let schema: TableSchema = serde_json::from_value(json!({
            "fields": [{"name": "a"}, {"name": "b"}],
            "primaryKey": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(schema.primary_key_fields(), vec!["a", "b"]);
        assert!(schema.field("b").is_some());
        assert!(schema.field("c").is_none());
    }

    #[test]
    fn test_effective_format_falls_back_to_extension() {
        let mut resource = ResourceDescriptor::new("data", "data/Rows.CSV");
        assert_eq!(resource.effective_format().as_deref(), Some("csv"));

        resource.format = Some("tsv".to_string());
        assert_eq!(resource.effective_format().as_deref(), Some("tsv"));

        let no_ext = ResourceDescriptor::new("data", "data/rows");
        assert_eq!(no_ext.effective_format(), None);
    }

    #[test]
    fn test_ckan_package_upsert_resource() {
        let mut package: CkanPackage = serde_json::from_value(json!({
            "id": "pkg-1",
            "name": "ckan_test",
            "resources": [{"id": "r1", "name": "res_1"}]
        }))
        .unwrap();

        let updated: CkanResource =
            serde_json::from_value(json!({"id": "r1", "name": "res_1", "format": "CSV"})).unwrap();
        package.upsert_resource(updated);
        assert_eq!(package.resources.len(), 1);
        assert_eq!(package.resources[0].extras["format"], json!("CSV"));

        let added: CkanResource =
            serde_json::from_value(json!({"id": "r2", "name": "datapackage.json"})).unwrap();
        package.upsert_resource(added);
        assert_eq!(package.resources.len(), 2);
        assert_eq!(package.resources_named("res_1").count(), 1);
    }

    #[test]
    fn test_resource_upload_text_fields() {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("res_1"));
        fields.insert("id".to_string(), Value::Null);
        fields.insert("size".to_string(), json!(42));

        let upload = ResourceUpload {
            fields,
            file_name: "res_1.csv".to_string(),
            content: Vec::new(),
        };
        let mut text = upload.text_fields();
        text.sort();
        assert_eq!(
            text,
            vec![
                ("name".to_string(), "res_1".to_string()),
                ("size".to_string(), "42".to_string()),
            ]
        );
    }
}

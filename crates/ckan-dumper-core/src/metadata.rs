//! CKAN payload construction.
//!
//! Package and resource payloads are built by merging layers of properties,
//! each layer overwriting keys set by the previous one:
//!
//! 1. core defaults ([`package_core_properties`], [`resource_core_properties`])
//! 2. properties translated from the data package descriptor
//! 3. explicit overrides (configured dataset properties, known resource id)

use serde_json::{Map, Value, json};

use crate::models::{DESCRIPTOR_FILE, DataPackage, ResourceDescriptor};

/// Descriptor keys handled by a dedicated translation rule rather than `extras`.
const MAPPED_PACKAGE_KEYS: &[&str] = &[
    "name",
    "title",
    "version",
    "description",
    "homepage",
    "licenses",
    "author",
    "maintainer",
    "contributors",
    "keywords",
    "resources",
    "profile",
];

/// Default package properties, sent even when the descriptor lacks them.
pub fn package_core_properties(owner_org: Option<&str>) -> Map<String, Value> {
    let mut props = Map::new();
    for key in [
        "title",
        "version",
        "url",
        "notes",
        "license_id",
        "author",
        "author_email",
        "maintainer",
        "maintainer_email",
    ] {
        props.insert(key.to_string(), json!(""));
    }
    props.insert("state".to_string(), json!("active"));
    props.insert("owner_org".to_string(), json!(owner_org));
    props.insert("private".to_string(), json!(false));
    props
}

/// Default resource properties.
pub fn resource_core_properties() -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("package_id".to_string(), Value::Null);
    props.insert("url".to_string(), Value::Null);
    props.insert("url_type".to_string(), json!("upload"));
    props.insert("name".to_string(), Value::Null);
    props.insert("hash".to_string(), Value::Null);
    props
}

/// Merges `layers` in order; later layers overwrite earlier ones key by key.
pub fn merge_layers<I>(layers: I) -> Map<String, Value>
where
    I: IntoIterator<Item = Map<String, Value>>,
{
    let mut merged = Map::new();
    for layer in layers {
        merged.extend(layer);
    }
    merged
}

/// Builds the `package_create`/`package_update` body for `package`.
///
/// Resources are never part of this payload: they are published one by one
/// as their files are produced.
pub fn build_package_payload(
    package: &DataPackage,
    owner_org: Option<&str>,
    overrides: &Map<String, Value>,
) -> Map<String, Value> {
    let mut payload = merge_layers([
        package_core_properties(owner_org),
        datapackage_to_dataset(package),
        overrides.clone(),
    ]);
    payload.remove("resources");
    payload
}

/// Translates a data package descriptor into CKAN package fields.
pub fn datapackage_to_dataset(package: &DataPackage) -> Map<String, Value> {
    let props = &package.properties;
    let mut dataset = Map::new();
    dataset.insert("name".to_string(), json!(package.name.to_lowercase()));

    for key in ["title", "version"] {
        if let Some(value) = props.get(key) {
            dataset.insert(key.to_string(), value.clone());
        }
    }
    if let Some(notes) = props.get("description") {
        dataset.insert("notes".to_string(), notes.clone());
    }
    if let Some(url) = props.get("homepage") {
        dataset.insert("url".to_string(), url.clone());
    }

    if let Some(license) = props
        .get("licenses")
        .and_then(Value::as_array)
        .and_then(|l| l.first())
    {
        if let Some(id) = ["name", "type", "id"]
            .iter()
            .find_map(|k| license.get(*k).and_then(Value::as_str))
        {
            dataset.insert("license_id".to_string(), json!(id));
        }
        if let Some(title) = license.get("title").and_then(Value::as_str) {
            dataset.insert("license_title".to_string(), json!(title));
        }
        if let Some(url) = ["path", "url"]
            .iter()
            .find_map(|k| license.get(*k).and_then(Value::as_str))
        {
            dataset.insert("license_url".to_string(), json!(url));
        }
    }

    for role in ["author", "maintainer"] {
        let contact = props
            .get(role)
            .and_then(parse_contact)
            .or_else(|| contributor_with_role(props, role));
        if let Some((name, email)) = contact {
            dataset.insert(role.to_string(), json!(name));
            if let Some(email) = email {
                dataset.insert(format!("{role}_email"), json!(email));
            }
        }
    }

    if let Some(keywords) = props.get("keywords").and_then(Value::as_array) {
        let tags: Vec<Value> = keywords
            .iter()
            .filter_map(Value::as_str)
            .map(|k| json!({ "name": k }))
            .collect();
        dataset.insert("tags".to_string(), Value::Array(tags));
    }

    let extras: Vec<Value> = props
        .iter()
        .filter(|(k, _)| !MAPPED_PACKAGE_KEYS.contains(&k.as_str()))
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            json!({ "key": k, "value": value })
        })
        .collect();
    if !extras.is_empty() {
        dataset.insert("extras".to_string(), Value::Array(extras));
    }

    dataset
}

/// Parses `"Name <email>"`, `"Name"` or `{"name": .., "email": ..}`.
fn parse_contact(value: &Value) -> Option<(String, Option<String>)> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            match s.split_once('<') {
                Some((name, rest)) if rest.ends_with('>') => Some((
                    name.trim().to_string(),
                    Some(rest.trim_end_matches('>').trim().to_string()),
                )),
                _ => Some((s.to_string(), None)),
            }
        }
        Value::Object(obj) => {
            let name = obj
                .get("name")
                .or_else(|| obj.get("title"))
                .and_then(Value::as_str)?;
            let email = obj.get("email").and_then(Value::as_str).map(str::to_string);
            Some((name.to_string(), email))
        }
        _ => None,
    }
}

fn contributor_with_role(props: &Map<String, Value>, role: &str) -> Option<(String, Option<String>)> {
    props
        .get("contributors")?
        .as_array()?
        .iter()
        .find(|c| c.get("role").and_then(Value::as_str) == Some(role))
        .and_then(parse_contact)
}

/// Name under which the descriptor file is published.
///
/// `datapackage.json`, or `datapackage-N.json` with the smallest `N >= 2`
/// that no user resource of `package` is named.
pub fn descriptor_resource_name(package: &DataPackage) -> String {
    let taken = |name: &str| package.resources.iter().any(|r| r.name == name);
    if !taken(DESCRIPTOR_FILE) {
        return DESCRIPTOR_FILE.to_string();
    }
    (2..)
        .map(|n| format!("datapackage-{n}.json"))
        .find(|name| !taken(name))
        .unwrap_or_else(|| DESCRIPTOR_FILE.to_string())
}

/// What is being published as a CKAN resource.
#[derive(Debug, Clone, Copy)]
pub enum ResourceSource<'a> {
    /// The `datapackage.json` descriptor of the package.
    Descriptor(&'a DataPackage),
    /// A user resource of the package.
    Data(&'a ResourceDescriptor),
}

/// Builds the form fields of a resource create/update call.
///
/// # Arguments
///
/// * `package_id` - CKAN id of the owning package
/// * `name` - Resource name on CKAN
/// * `path` - Relative path of the file, also used as the resource url
/// * `source` - Descriptor file or user resource
/// * `existing_id` - Id of the same-name resource already on the package
pub fn build_resource_fields(
    package_id: &str,
    name: &str,
    path: &str,
    source: ResourceSource<'_>,
    existing_id: Option<&str>,
) -> Map<String, Value> {
    let mut derived = Map::new();
    derived.insert("package_id".to_string(), json!(package_id));
    derived.insert("name".to_string(), json!(name));
    derived.insert("url".to_string(), json!(path));

    let (hash, encoding, format) = match source {
        ResourceSource::Descriptor(package) => (
            package.property_str("hash").map(str::to_string),
            None,
            Some("json".to_string()),
        ),
        ResourceSource::Data(descriptor) => (
            descriptor.hash.clone(),
            descriptor.encoding.clone(),
            descriptor.effective_format(),
        ),
    };
    derived.insert("hash".to_string(), json!(hash.unwrap_or_default()));
    derived.insert(
        "encoding".to_string(),
        json!(encoding.unwrap_or_else(|| "utf-8".to_string())),
    );
    if let Some(format) = format {
        derived.insert("format".to_string(), json!(format));
    }

    let mut known = Map::new();
    if let Some(id) = existing_id {
        known.insert("id".to_string(), json!(id));
    }

    merge_layers([resource_core_properties(), derived, known])
}

//! Pushing tabular resource data into the CKAN DataStore.
//!
//! A push always happens after the resource exists on CKAN, since the
//! DataStore table is keyed by the resource id.

use std::collections::VecDeque;
use std::path::Path;
use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};
use serde_json::{Map, Number, Value};

use crate::AppError;
use crate::config::{DatastoreConfig, WriteMethod};
use crate::models::{DatastoreField, Row, SchemaField, TableSchema};
use crate::outcome::{expect_success, is_not_found, response_failure};
use crate::traits::CatalogClient;

/// Values Table Schema reads as `true`/`false` for boolean fields.
const TRUE_VALUES: &[&str] = &["true", "True", "TRUE", "1"];
const FALSE_VALUES: &[&str] = &["false", "False", "FALSE", "0"];

/// DataStore column type for a Table Schema field type.
pub fn datastore_type(field_type: &str) -> &'static str {
    match field_type {
        "string" => "text",
        "integer" | "year" => "int",
        "number" => "numeric",
        "boolean" => "bool",
        "object" | "array" => "json",
        "date" => "date",
        "time" => "time",
        "datetime" => "timestamp",
        _ => "text",
    }
}

/// DataStore columns for `schema`, in schema order.
pub fn datastore_fields(schema: &TableSchema) -> Vec<DatastoreField> {
    schema
        .fields
        .iter()
        .map(|f| DatastoreField {
            id: f.name.clone(),
            field_type: datastore_type(&f.field_type).to_string(),
        })
        .collect()
}

/// Casts a raw delimited-file cell according to its schema field.
///
/// Empty cells become null. Cells of columns missing from the schema and of
/// non-numeric, non-boolean, non-JSON types are kept as strings.
pub fn cast_cell(name: &str, field: Option<&SchemaField>, raw: &str) -> Result<Value, AppError> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    let Some(field) = field else {
        return Ok(Value::String(raw.to_string()));
    };

    let cast_error = || AppError::Cast {
        field: name.to_string(),
        value: raw.to_string(),
        field_type: field.field_type.clone(),
    };

    match field.field_type.as_str() {
        "integer" | "year" => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| cast_error()),
        "number" => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(cast_error),
        "boolean" => {
            if TRUE_VALUES.contains(&raw) {
                Ok(Value::Bool(true))
            } else if FALSE_VALUES.contains(&raw) {
                Ok(Value::Bool(false))
            } else {
                Err(cast_error())
            }
        }
        "object" | "array" => serde_json::from_str(raw).map_err(|_| cast_error()),
        _ => Ok(Value::String(raw.to_string())),
    }
}

/// Reads a CSV file with a header row into schema-typed rows.
pub fn read_csv_rows(path: &Path, schema: &TableSchema) -> Result<Vec<Row>, AppError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let fields: Vec<Option<&SchemaField>> = headers.iter().map(|h| schema.field(h)).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Map::new();
        for ((name, field), raw) in headers.iter().zip(&fields).zip(record.iter()) {
            row.insert(name.to_string(), cast_cell(name, *field, raw)?);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Writes resource rows into the DataStore through a [`CatalogClient`].
pub struct DatastorePusher<'a, C> {
    client: &'a C,
    config: &'a DatastoreConfig,
}

impl<'a, C: CatalogClient> DatastorePusher<'a, C> {
    pub fn new(client: &'a C, config: &'a DatastoreConfig) -> Self {
        Self { client, config }
    }

    pub fn method(&self) -> WriteMethod {
        self.config.method
    }

    fn chunk_size(&self) -> usize {
        self.config.chunk_size.max(1)
    }

    /// Creates the DataStore table of `resource_id` from `schema`.
    ///
    /// With [`WriteMethod::Insert`] an existing table is deleted first, so the
    /// rows written afterwards replace its contents.
    pub async fn create(&self, resource_id: &str, schema: &TableSchema) -> Result<(), AppError> {
        if self.config.method == WriteMethod::Insert {
            let response = self.client.datastore_delete(resource_id).await?;
            match response_failure(&response) {
                None => tracing::debug!(resource_id, "Deleted existing DataStore table"),
                Some(error) if is_not_found(&error) => {}
                Some(error) => {
                    return Err(AppError::Ckan {
                        action: "datastore_delete".to_string(),
                        error,
                    });
                }
            }
        }

        let fields = datastore_fields(schema);
        let primary_key = schema.primary_key_fields();
        let response = self
            .client
            .datastore_create(resource_id, &fields, &primary_key)
            .await?;
        expect_success("datastore_create", response)?;

        tracing::info!(resource_id, fields = fields.len(), "Created DataStore table");
        Ok(())
    }

    async fn write_chunk(&self, resource_id: &str, rows: &[Row]) -> Result<(), AppError> {
        let response = self
            .client
            .datastore_upsert(resource_id, rows, self.config.method.as_str())
            .await?;
        expect_success("datastore_upsert", response)?;
        tracing::debug!(resource_id, rows = rows.len(), "Wrote DataStore chunk");
        Ok(())
    }

    /// Writes `rows` with the configured method, `chunk_size` rows per call.
    ///
    /// # Returns
    ///
    /// The number of rows written.
    pub async fn write<I>(&self, resource_id: &str, rows: I) -> Result<usize, AppError>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut written = 0;
        let mut chunk = Vec::with_capacity(self.chunk_size());
        for row in rows {
            chunk.push(row);
            if chunk.len() == self.chunk_size() {
                self.write_chunk(resource_id, &chunk).await?;
                written += chunk.len();
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            self.write_chunk(resource_id, &chunk).await?;
            written += chunk.len();
        }
        Ok(written)
    }

    /// Writes rows from `rows` as they arrive and passes them through.
    ///
    /// The returned stream yields every input row in input order; a row is
    /// yielded once the chunk containing it has been written. The stream ends
    /// after the first error, whether it came from `rows` or from CKAN.
    pub fn push_stream<'s, S>(
        &'s self,
        resource_id: &'s str,
        rows: S,
    ) -> impl Stream<Item = Result<Row, AppError>> + 's
    where
        S: Stream<Item = Result<Row, AppError>> + Send + 's,
    {
        let state = PassThrough {
            upstream: Box::pin(rows),
            pending: Vec::new(),
            ready: VecDeque::new(),
            exhausted: false,
        };
        let chunk_size = self.chunk_size();

        stream::try_unfold(state, move |mut state| async move {
            loop {
                if let Some(row) = state.ready.pop_front() {
                    return Ok::<_, AppError>(Some((row, state)));
                }
                if state.exhausted {
                    return Ok(None);
                }
                match state.upstream.next().await {
                    Some(row) => {
                        state.pending.push(row?);
                        if state.pending.len() < chunk_size {
                            continue;
                        }
                    }
                    None => {
                        state.exhausted = true;
                        if state.pending.is_empty() {
                            continue;
                        }
                    }
                }
                self.write_chunk(resource_id, &state.pending).await?;
                state.ready.extend(state.pending.drain(..));
            }
        })
    }

    /// Creates the table and writes all rows of a CSV file.
    pub async fn push_file(
        &self,
        resource_id: &str,
        schema: &TableSchema,
        path: &Path,
    ) -> Result<usize, AppError> {
        let owned_path = path.to_path_buf();
        let owned_schema = schema.clone();
        let rows = tokio::task::spawn_blocking(move || read_csv_rows(&owned_path, &owned_schema))
            .await
            .map_err(|e| AppError::Generic(format!("CSV reader task failed: {e}")))??;

        self.create(resource_id, schema).await?;
        let written = self.write(resource_id, rows).await?;
        tracing::info!(
            resource_id,
            rows = written,
            method = %self.method(),
            "Pushed resource to DataStore"
        );
        Ok(written)
    }
}

struct PassThrough<S> {
    upstream: Pin<Box<S>>,
    pending: Vec<Row>,
    ready: VecDeque<Row>,
    exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CkanResponse, PrimaryKey};
    use crate::traits::Payload;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::io::Write;
    use std::sync::Mutex;

    /// Records DataStore calls; optionally fails writes.
    #[derive(Default)]
    struct RecordingDatastore {
        calls: Mutex<Vec<String>>,
        written: Mutex<Vec<Vec<Row>>>,
        delete_not_found: bool,
        fail_writes: bool,
    }

    impl CatalogClient for RecordingDatastore {
        async fn submit(&self, _action: &str, _payload: &Payload) -> Result<CkanResponse, AppError> {
            unimplemented!()
        }

        async fn package_show(&self, _id: &str) -> Result<CkanResponse, AppError> {
            unimplemented!()
        }

        async fn datastore_create(
            &self,
            resource_id: &str,
            fields: &[DatastoreField],
            primary_key: &[String],
        ) -> Result<CkanResponse, AppError> {
            self.calls.lock().unwrap().push(format!(
                "create {resource_id} {} pk={}",
                fields.len(),
                primary_key.join(",")
            ));
            Ok(CkanResponse::ok(json!({"resource_id": resource_id})))
        }

        async fn datastore_upsert(
            &self,
            resource_id: &str,
            records: &[Row],
            method: &str,
        ) -> Result<CkanResponse, AppError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{method} {resource_id} {}", records.len()));
            if self.fail_writes {
                return Ok(CkanResponse::failed(json!({"__type": "Validation Error"})));
            }
            self.written.lock().unwrap().push(records.to_vec());
            Ok(CkanResponse::ok(json!({})))
        }

        async fn datastore_delete(&self, resource_id: &str) -> Result<CkanResponse, AppError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("delete {resource_id}"));
            if self.delete_not_found {
                Ok(CkanResponse::failed(
                    json!({"__type": "Not Found Error", "message": "Resource not found"}),
                ))
            } else {
                Ok(CkanResponse::ok(json!({})))
            }
        }
    }

    fn row(x: i64, y: &str) -> Row {
        let mut row = Map::new();
        row.insert("x".to_string(), json!(x));
        row.insert("y".to_string(), json!(y));
        row
    }

    fn schema() -> TableSchema {
        TableSchema {
            fields: vec![
                SchemaField::new("x", "integer"),
                SchemaField::new("y", "string"),
            ],
            primary_key: Some(PrimaryKey::Single("x".to_string())),
        }
    }

    fn config(method: WriteMethod, chunk_size: usize) -> DatastoreConfig {
        DatastoreConfig {
            enabled: true,
            method,
            chunk_size,
        }
    }

    #[test]
    fn test_datastore_type_mapping() {
        assert_eq!(datastore_type("string"), "text");
        assert_eq!(datastore_type("integer"), "int");
        assert_eq!(datastore_type("number"), "numeric");
        assert_eq!(datastore_type("boolean"), "bool");
        assert_eq!(datastore_type("datetime"), "timestamp");
        assert_eq!(datastore_type("geopoint"), "text");

        let fields = datastore_fields(&schema());
        assert_eq!(
            fields,
            vec![
                DatastoreField {
                    id: "x".to_string(),
                    field_type: "int".to_string()
                },
                DatastoreField {
                    id: "y".to_string(),
                    field_type: "text".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_cast_cell() {
        let int = SchemaField::new("x", "integer");
        let num = SchemaField::new("n", "number");
        let boolean = SchemaField::new("b", "boolean");
        let obj = SchemaField::new("o", "object");

        assert_eq!(cast_cell("x", Some(&int), "42").unwrap(), json!(42));
        assert_eq!(cast_cell("x", Some(&int), "").unwrap(), Value::Null);
        assert_eq!(cast_cell("n", Some(&num), "1.5").unwrap(), json!(1.5));
        assert_eq!(cast_cell("b", Some(&boolean), "TRUE").unwrap(), json!(true));
        assert_eq!(cast_cell("b", Some(&boolean), "0").unwrap(), json!(false));
        assert_eq!(
            cast_cell("o", Some(&obj), r#"{"a": 1}"#).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(cast_cell("z", None, "free").unwrap(), json!("free"));

        let err = cast_cell("x", Some(&int), "abc").unwrap_err();
        assert!(matches!(err, AppError::Cast { ref field, .. } if field == "x"));
        assert!(cast_cell("b", Some(&boolean), "maybe").is_err());
    }

    #[test]
    fn test_read_csv_rows_casts_per_schema() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "x,y").unwrap();
        writeln!(file, "1,a").unwrap();
        writeln!(file, "2,b").unwrap();
        writeln!(file, "3,").unwrap();

        let rows = read_csv_rows(file.path(), &schema()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], row(1, "a"));
        assert_eq!(rows[1], row(2, "b"));
        assert_eq!(rows[2]["y"], Value::Null);
    }

    #[tokio::test]
    async fn test_create_with_insert_deletes_first() {
        let client = RecordingDatastore {
            delete_not_found: true,
            ..Default::default()
        };
        let config = config(WriteMethod::Insert, 10);
        let pusher = DatastorePusher::new(&client, &config);

        pusher.create("res-1", &schema()).await.unwrap();

        assert_eq!(
            *client.calls.lock().unwrap(),
            vec!["delete res-1".to_string(), "create res-1 2 pk=x".to_string()]
        );
    }

    #[tokio::test]
    async fn test_create_with_upsert_keeps_table() {
        let client = RecordingDatastore::default();
        let config = config(WriteMethod::Upsert, 10);
        let pusher = DatastorePusher::new(&client, &config);

        pusher.create("res-1", &schema()).await.unwrap();

        assert_eq!(
            *client.calls.lock().unwrap(),
            vec!["create res-1 2 pk=x".to_string()]
        );
    }

    #[tokio::test]
    async fn test_write_chunks_rows() {
        let client = RecordingDatastore::default();
        let config = config(WriteMethod::Upsert, 2);
        let pusher = DatastorePusher::new(&client, &config);

        let written = pusher
            .write("res-1", vec![row(1, "a"), row(2, "b"), row(3, "c")])
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(
            *client.calls.lock().unwrap(),
            vec!["upsert res-1 2".to_string(), "upsert res-1 1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_push_stream_passes_every_row_in_order() {
        let client = RecordingDatastore::default();
        let config = config(WriteMethod::Insert, 2);
        let pusher = DatastorePusher::new(&client, &config);

        let input = vec![row(1, "a"), row(2, "b"), row(3, "c")];
        let upstream = stream::iter(input.clone().into_iter().map(Ok));
        let output: Vec<Row> = pusher
            .push_stream("res-1", upstream)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(output, input);
        let written: Vec<Row> = client.written.lock().unwrap().concat();
        assert_eq!(written, input);
    }

    #[tokio::test]
    async fn test_push_stream_stops_on_write_error() {
        let client = RecordingDatastore {
            fail_writes: true,
            ..Default::default()
        };
        let config = config(WriteMethod::Insert, 2);
        let pusher = DatastorePusher::new(&client, &config);

        let upstream = stream::iter(vec![Ok(row(1, "a")), Ok(row(2, "b")), Ok(row(3, "c"))]);
        let results: Vec<Result<Row, AppError>> =
            pusher.push_stream("res-1", upstream).collect().await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(AppError::Ckan { .. })));
    }

    #[tokio::test]
    async fn test_push_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "x,y\n1,a\n2,b\n3,c").unwrap();

        let client = RecordingDatastore::default();
        let config = config(WriteMethod::Insert, 1000);
        let pusher = DatastorePusher::new(&client, &config);

        let written = pusher.push_file("res-1", &schema(), file.path()).await.unwrap();

        assert_eq!(written, 3);
        let calls = client.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "delete res-1".to_string(),
                "create res-1 2 pk=x".to_string(),
                "insert res-1 3".to_string()
            ]
        );
    }
}

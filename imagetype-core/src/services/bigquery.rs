//! BigQuery REST client: parameterized queries and streaming inserts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};

use super::{check_status, ParamValue, QueryParam, Row, SqlQuery, TokenSource, Warehouse};
use crate::error::{RowError, UpstreamError};

const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const SERVICE: &str = "BigQuery";
/// Server-side wait per `queries` / `getQueryResults` call.
const QUERY_WAIT_MS: u64 = 10_000;
const MAX_POLLS: usize = 30;

pub struct BigQueryClient {
    client: Client,
    project_id: String,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl BigQueryClient {
    /// `project_id` is the project queries are billed to.
    pub fn new(project_id: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            project_id: project_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            tokens,
        })
    }

    async fn post(&self, url: String, body: &Value) -> Result<reqwest::Response, UpstreamError> {
        let token = self.tokens.access_token().await?;
        let response = self.client.post(url).bearer_auth(token).json(body).send().await?;
        check_status(SERVICE, response).await
    }

    async fn get(&self, url: String, query: &[(&str, String)]) -> Result<reqwest::Response, UpstreamError> {
        let token = self.tokens.access_token().await?;
        let response = self.client.get(url).bearer_auth(token).query(query).send().await?;
        check_status(SERVICE, response).await
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<WireRow>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize, Clone, Default)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<SchemaField>,
}

#[derive(Deserialize, Clone)]
struct SchemaField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Deserialize)]
struct WireRow {
    f: Vec<Cell>,
}

#[derive(Deserialize)]
struct Cell {
    v: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertError>,
}

#[derive(Deserialize)]
struct InsertError {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

fn query_request(query: &SqlQuery) -> Value {
    let params: Vec<Value> = query.params.iter().map(wire_param).collect();
    json!({
        "query": query.sql,
        "useLegacySql": false,
        "parameterMode": "NAMED",
        "queryParameters": params,
        "timeoutMs": QUERY_WAIT_MS,
    })
}

fn wire_param(param: &QueryParam) -> Value {
    let (parameter_type, parameter_value) = match &param.value {
        ParamValue::String(s) => (json!({"type": "STRING"}), json!({"value": s})),
        ParamValue::Int64(i) => (json!({"type": "INT64"}), json!({"value": i.to_string()})),
        ParamValue::StringArray(values) => (
            json!({"type": "ARRAY", "arrayType": {"type": "STRING"}}),
            json!({"arrayValues": values.iter().map(|v| json!({"value": v})).collect::<Vec<_>>()}),
        ),
    };
    json!({
        "name": param.name,
        "parameterType": parameter_type,
        "parameterValue": parameter_value,
    })
}

/// Convert the `f`/`v` wire rows into objects keyed by column name, parsing
/// scalars according to the column type.
fn decode_rows(schema: &TableSchema, rows: Vec<WireRow>) -> Result<Vec<Row>, UpstreamError> {
    rows.into_iter()
        .map(|row| {
            if row.f.len() != schema.fields.len() {
                return Err(UpstreamError::decode(format!(
                    "row has {} cells for {} columns",
                    row.f.len(),
                    schema.fields.len()
                )));
            }
            let mut object = Map::new();
            for (field, cell) in schema.fields.iter().zip(row.f) {
                object.insert(field.name.clone(), decode_field(field, cell.v)?);
            }
            Ok(object)
        })
        .collect()
}

fn decode_field(field: &SchemaField, value: Value) -> Result<Value, UpstreamError> {
    if field.mode.as_deref() == Some("REPEATED") {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(UpstreamError::decode(format!(
                    "column {} is REPEATED but got {other}",
                    field.name
                )))
            }
        };
        return items
            .into_iter()
            .map(|item| {
                let inner = match item {
                    Value::Object(mut cell) => cell.remove("v").unwrap_or(Value::Null),
                    other => other,
                };
                decode_scalar(&field.name, &field.field_type, inner)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    decode_scalar(&field.name, &field.field_type, value)
}

fn decode_scalar(name: &str, field_type: &str, value: Value) -> Result<Value, UpstreamError> {
    let Value::String(raw) = value else {
        return Ok(value);
    };
    let parsed = match field_type {
        "INTEGER" | "INT64" => raw.parse::<i64>().map(Value::from).map_err(|e| e.to_string()),
        "FLOAT" | "FLOAT64" => raw.parse::<f64>().map(Value::from).map_err(|e| e.to_string()),
        "BOOLEAN" | "BOOL" => Ok(Value::from(raw.eq_ignore_ascii_case("true"))),
        _ => return Ok(Value::String(raw)),
    };
    parsed.map_err(|e| UpstreamError::decode(format!("column {name} ({field_type}) value {raw:?}: {e}")))
}

/// Split `project.dataset.table` into its parts.
fn split_table_id(table_id: &str) -> Result<(&str, &str, &str), UpstreamError> {
    let parts: Vec<&str> = table_id.split('.').collect();
    match parts.as_slice() {
        [project, dataset, table] if parts.iter().all(|p| !p.is_empty()) => {
            Ok((*project, *dataset, *table))
        }
        _ => Err(UpstreamError::decode(format!(
            "table id must be project.dataset.table, got {table_id:?}"
        ))),
    }
}

fn row_errors(response: InsertAllResponse) -> Vec<RowError> {
    response
        .insert_errors
        .into_iter()
        .flat_map(|entry| {
            let index = entry.index;
            entry.errors.into_iter().map(move |e| RowError {
                index,
                reason: e.reason,
                message: e.message,
            })
        })
        .collect()
}

#[async_trait]
impl Warehouse for BigQueryClient {
    #[instrument(level = "debug", skip_all, fields(params = query.params.len()))]
    async fn query(&self, query: &SqlQuery) -> Result<Vec<Row>, UpstreamError> {
        let url = format!("{}/projects/{}/queries", self.base_url, self.project_id);
        let mut page: QueryResponse = self
            .post(url, &query_request(query))
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::decode(format!("query response: {e}")))?;

        let job = page.job_reference.clone();
        let mut schema = page.schema.clone().unwrap_or_default();
        let mut rows = Vec::new();
        let mut polls = 0;

        loop {
            if page.job_complete {
                if let Some(s) = page.schema.take() {
                    schema = s;
                }
                rows.extend(decode_rows(&schema, std::mem::take(&mut page.rows))?);
                if page.page_token.is_none() {
                    break;
                }
            }

            polls += 1;
            if polls > MAX_POLLS {
                warn!(polls, "Query did not finish in time");
                return Err(UpstreamError::decode("query did not complete"));
            }
            let Some(job) = &job else {
                return Err(UpstreamError::decode("incomplete query without job reference"));
            };

            let mut params = vec![("timeoutMs", QUERY_WAIT_MS.to_string())];
            if let Some(location) = &job.location {
                params.push(("location", location.clone()));
            }
            if let Some(token) = page.page_token.take() {
                params.push(("pageToken", token));
            }
            let url = format!("{}/projects/{}/queries/{}", self.base_url, self.project_id, job.job_id);
            page = self
                .get(url, &params)
                .await?
                .json()
                .await
                .map_err(|e| UpstreamError::decode(format!("getQueryResults response: {e}")))?;
        }

        debug!(rows = rows.len(), "Query returned rows");
        Ok(rows)
    }

    #[instrument(level = "debug", skip(self, rows), fields(rows = rows.len()))]
    async fn insert_rows(&self, table_id: &str, rows: Vec<Value>) -> Result<Vec<RowError>, UpstreamError> {
        let (project, dataset, table) = split_table_id(table_id)?;
        let url = format!(
            "{}/projects/{project}/datasets/{dataset}/tables/{table}/insertAll",
            self.base_url
        );
        let body = json!({
            "rows": rows.into_iter().map(|row| json!({"json": row})).collect::<Vec<_>>(),
        });
        let response: InsertAllResponse = self
            .post(url, &body)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::decode(format!("insertAll response: {e}")))?;
        Ok(row_errors(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        serde_json::from_value(json!({"fields": [
            {"name": "offer_id", "type": "STRING", "mode": "NULLABLE"},
            {"name": "merchant_id", "type": "INTEGER", "mode": "NULLABLE"},
            {"name": "image_link", "type": "STRING", "mode": "NULLABLE"},
            {"name": "additional_image_links", "type": "STRING", "mode": "REPEATED"},
        ]}))
        .unwrap()
    }

    #[test]
    fn test_decode_rows_converts_types() {
        let rows: Vec<WireRow> = serde_json::from_value(json!([
            {"f": [{"v": "sku-1"}, {"v": "42"}, {"v": null}, {"v": [{"v": "http://a"}, {"v": "http://b"}]}]}
        ]))
        .unwrap();
        let decoded = decode_rows(&schema(), rows).unwrap();
        assert_eq!(
            Value::Object(decoded[0].clone()),
            json!({
                "offer_id": "sku-1",
                "merchant_id": 42,
                "image_link": null,
                "additional_image_links": ["http://a", "http://b"],
            })
        );
    }

    #[test]
    fn test_decode_rejects_bad_integer() {
        let rows: Vec<WireRow> = serde_json::from_value(json!([
            {"f": [{"v": "sku-1"}, {"v": "forty"}, {"v": null}, {"v": []}]}
        ]))
        .unwrap();
        assert!(decode_rows(&schema(), rows).is_err());
    }

    #[test]
    fn test_query_request_uses_named_parameters() {
        let mut query = SqlQuery {
            sql: "SELECT 1 LIMIT @limit".into(),
            params: vec![],
        };
        query.bind("limit", ParamValue::Int64(10));
        query.bind("brands", ParamValue::StringArray(vec!["Acme".into()]));

        let body = query_request(&query);
        assert_eq!(body["useLegacySql"], false);
        assert_eq!(body["parameterMode"], "NAMED");
        assert_eq!(body["queryParameters"][0]["parameterValue"]["value"], "10");
        assert_eq!(body["queryParameters"][1]["parameterType"]["arrayType"]["type"], "STRING");
        assert_eq!(
            body["queryParameters"][1]["parameterValue"]["arrayValues"][0]["value"],
            "Acme"
        );
    }

    #[test]
    fn test_split_table_id() {
        assert_eq!(split_table_id("p.d.t").unwrap(), ("p", "d", "t"));
        assert!(split_table_id("p.d").is_err());
        assert!(split_table_id("p..t").is_err());
    }

    #[test]
    fn test_insert_errors_flattened() {
        let response: InsertAllResponse = serde_json::from_value(json!({
            "insertErrors": [
                {"index": 1, "errors": [{"reason": "invalid", "message": "no such field: foo"}]}
            ]
        }))
        .unwrap();
        assert_eq!(
            row_errors(response),
            vec![RowError {
                index: 1,
                reason: "invalid".into(),
                message: "no such field: foo".into(),
            }]
        );
    }

    #[test]
    fn test_insert_success_has_no_errors() {
        let response: InsertAllResponse = serde_json::from_value(json!({"kind": "bigquery#tableDataInsertAllResponse"})).unwrap();
        assert!(row_errors(response).is_empty());
    }
}

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};

use crate::auth::Credentials;
use crate::domain::{Document, DocumentBatch, FieldValue};
use crate::error::ElError;

pub trait DocumentStore: Send + Sync {
    /// Documents of `collection` whose `field` lies in `[start, end)`.
    fn query_range(
        &self,
        collection: &str,
        field: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DocumentBatch, ElError>;
}

#[derive(Clone)]
pub struct FirestoreHttpClient {
    client: Client,
    credentials: Credentials,
    project_id: String,
    database: String,
}

impl FirestoreHttpClient {
    pub fn new(
        project_id: impl Into<String>,
        database: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self, ElError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("in-out-el/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ElError::StoreHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| ElError::StoreHttp(err.to_string()))?;
        Ok(Self {
            client,
            credentials,
            project_id: project_id.into(),
            database: database.into(),
        })
    }

    fn run_query_url(&self) -> String {
        format!(
            "https://firestore.googleapis.com/v1/projects/{}/databases/{}/documents:runQuery",
            self.project_id, self.database
        )
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, ElError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Firestore request failed".to_string());
        Err(ElError::StoreStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, ElError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::warn!(status, attempt, delay_ms = delay, "retrying Firestore query");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::warn!(error = %err, attempt, delay_ms = delay, "retrying Firestore query");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(ElError::StoreHttp(err.to_string()));
                }
            }
        }
    }
}

impl DocumentStore for FirestoreHttpClient {
    fn query_range(
        &self,
        collection: &str,
        field: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DocumentBatch, ElError> {
        let url = self.run_query_url();
        let body = build_range_query(collection, field, start, end);
        let token = self.credentials.bearer()?;
        let response = self.send_with_retries(|| {
            self.client.post(&url).bearer_auth(&token).json(&body)
        })?;
        let response = Self::handle_status(response)?;
        let payload: Value = response
            .json()
            .map_err(|err| ElError::StoreResponse(err.to_string()))?;
        decode_run_query_response(payload)
    }
}

pub fn build_range_query(
    collection: &str,
    field: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Value {
    let bound = |op: &str, at: DateTime<Utc>| {
        json!({
            "fieldFilter": {
                "field": { "fieldPath": field },
                "op": op,
                "value": { "timestampValue": at.to_rfc3339_opts(SecondsFormat::Secs, true) }
            }
        })
    };
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": collection }],
            "where": {
                "compositeFilter": {
                    "op": "AND",
                    "filters": [
                        bound("GREATER_THAN_OR_EQUAL", start),
                        bound("LESS_THAN", end)
                    ]
                }
            }
        }
    })
}

/// Decodes the streamed `runQuery` array. Entries without a `document`
/// only carry a read time and are skipped.
pub fn decode_run_query_response(payload: Value) -> Result<DocumentBatch, ElError> {
    let Value::Array(entries) = payload else {
        return Err(ElError::StoreResponse(
            "runQuery response is not an array".to_string(),
        ));
    };
    let mut documents = Vec::with_capacity(entries.len());
    for entry in &entries {
        if let Some(error) = entry.get("error") {
            return Err(ElError::StoreResponse(error.to_string()));
        }
        if let Some(document) = entry.get("document") {
            documents.push(decode_document(document)?);
        }
    }
    Ok(DocumentBatch::new(documents))
}

pub fn decode_document(document: &Value) -> Result<Document, ElError> {
    let name = document
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ElError::StoreResponse("document without name".to_string()))?;
    let id = name.rsplit('/').next().unwrap_or(name).to_string();
    let fields = match document.get("fields") {
        Some(fields) => decode_fields(fields)?,
        None => BTreeMap::new(),
    };
    Ok(Document { id, fields })
}

fn decode_fields(fields: &Value) -> Result<BTreeMap<String, FieldValue>, ElError> {
    let object = fields
        .as_object()
        .ok_or_else(|| ElError::StoreResponse("fields is not an object".to_string()))?;
    object
        .iter()
        .map(|(name, value)| Ok((name.clone(), decode_value(value)?)))
        .collect()
}

pub fn decode_value(value: &Value) -> Result<FieldValue, ElError> {
    let object = value
        .as_object()
        .ok_or_else(|| ElError::StoreResponse(format!("malformed value: {value}")))?;
    let Some((kind, inner)) = object.iter().next() else {
        return Err(ElError::StoreResponse("empty value".to_string()));
    };
    let malformed = || ElError::StoreResponse(format!("malformed {kind}: {inner}"));

    let decoded = match kind.as_str() {
        "nullValue" => FieldValue::Null,
        "booleanValue" => FieldValue::Boolean(inner.as_bool().ok_or_else(malformed)?),
        // int64 values travel as JSON strings
        "integerValue" => {
            let parsed = match inner {
                Value::String(text) => text.parse::<i64>().ok(),
                other => other.as_i64(),
            };
            FieldValue::Integer(parsed.ok_or_else(malformed)?)
        }
        "doubleValue" => {
            let parsed = match inner {
                Value::String(text) => text.parse::<f64>().ok(),
                other => other.as_f64(),
            };
            FieldValue::Double(parsed.ok_or_else(malformed)?)
        }
        "timestampValue" => {
            let text = inner.as_str().ok_or_else(malformed)?;
            let parsed = DateTime::parse_from_rfc3339(text).map_err(|_| malformed())?;
            FieldValue::Timestamp(parsed.with_timezone(&Utc))
        }
        "stringValue" => FieldValue::String(inner.as_str().ok_or_else(malformed)?.to_string()),
        "bytesValue" => FieldValue::Bytes(inner.as_str().ok_or_else(malformed)?.to_string()),
        "referenceValue" => {
            FieldValue::Reference(inner.as_str().ok_or_else(malformed)?.to_string())
        }
        "geoPointValue" => FieldValue::GeoPoint {
            latitude: inner.get("latitude").and_then(Value::as_f64).unwrap_or(0.0),
            longitude: inner.get("longitude").and_then(Value::as_f64).unwrap_or(0.0),
        },
        "arrayValue" => {
            let values = match inner.get("values").and_then(Value::as_array) {
                Some(values) => values
                    .iter()
                    .map(decode_value)
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            FieldValue::Array(values)
        }
        "mapValue" => {
            let fields = match inner.get("fields") {
                Some(fields) => decode_fields(fields)?,
                None => BTreeMap::new(),
            };
            FieldValue::Map(fields)
        }
        _ => return Err(ElError::StoreResponse(format!("unknown value type {kind}"))),
    };
    Ok(decoded)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

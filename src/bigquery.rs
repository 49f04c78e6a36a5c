use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::{Value, json};

use crate::auth::Credentials;
use crate::domain::MovementRecord;
use crate::error::ElError;
use crate::normalize::{Column, ColumnKind};

const UPLOAD_BOUNDARY: &str = "in_out_el_load_boundary";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub dataset: String,
    pub table: String,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchemaField {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub mode: &'static str,
}

/// Landing table schema: the id is required, everything else nullable.
pub fn landing_schema() -> Vec<SchemaField> {
    Column::ALL
        .iter()
        .map(|column| SchemaField {
            name: column.name(),
            field_type: match column.kind() {
                ColumnKind::String => "STRING",
                ColumnKind::Integer => "INTEGER",
                ColumnKind::Timestamp => "TIMESTAMP",
            },
            mode: if column.required() {
                "REQUIRED"
            } else {
                "NULLABLE"
            },
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    Append,
}

impl WriteDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteDisposition::Append => "WRITE_APPEND",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJobSpec {
    pub destination: Destination,
    pub schema: Vec<SchemaField>,
    pub write_disposition: WriteDisposition,
}

impl LoadJobSpec {
    pub fn append(destination: Destination) -> Self {
        Self {
            destination,
            schema: landing_schema(),
            write_disposition: WriteDisposition::Append,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReceipt {
    pub job_id: String,
    pub output_rows: u64,
}

pub trait Warehouse: Send + Sync {
    /// Runs one batch load job for `rows` and waits for it to finish.
    fn load(&self, spec: &LoadJobSpec, rows: &[MovementRecord]) -> Result<LoadReceipt, ElError>;
}

#[derive(Clone)]
pub struct BigQueryHttpClient {
    client: Client,
    credentials: Credentials,
    project_id: String,
}

impl BigQueryHttpClient {
    pub fn new(project_id: impl Into<String>, credentials: Credentials) -> Result<Self, ElError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("in-out-el/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ElError::WarehouseHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| ElError::WarehouseHttp(err.to_string()))?;
        Ok(Self {
            client,
            credentials,
            project_id: project_id.into(),
        })
    }

    fn upload_url(&self) -> String {
        format!(
            "https://bigquery.googleapis.com/upload/bigquery/v2/projects/{}/jobs?uploadType=multipart",
            self.project_id
        )
    }

    fn job_url(&self, job_id: &str) -> String {
        format!(
            "https://bigquery.googleapis.com/bigquery/v2/projects/{}/jobs/{}",
            self.project_id, job_id
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
            .unwrap_or_else(|_| "BigQuery request failed".to_string());
        Err(ElError::WarehouseStatus { status, message })
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
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(ElError::WarehouseHttp(err.to_string()));
                }
            }
        }
    }

    fn wait_for_job(&self, job_id: &str, location: Option<&str>) -> Result<Value, ElError> {
        let url = self.job_url(job_id);
        for _ in 0..MAX_POLLS {
            let token = self.credentials.bearer()?;
            let response = self.send_with_retries(|| {
                let request = self.client.get(&url).bearer_auth(&token);
                match location {
                    Some(location) => request.query(&[("location", location)]),
                    None => request,
                }
            })?;
            let job: Value = Self::handle_status(response)?
                .json()
                .map_err(|err| ElError::WarehouseHttp(err.to_string()))?;
            if job_state(&job) == Some("DONE") {
                return Ok(job);
            }
            tracing::debug!(job_id, state = ?job_state(&job), "waiting for load job");
            thread::sleep(POLL_INTERVAL);
        }
        Err(ElError::WarehouseJob(format!("job {job_id} timed out")))
    }
}

impl Warehouse for BigQueryHttpClient {
    fn load(&self, spec: &LoadJobSpec, rows: &[MovementRecord]) -> Result<LoadReceipt, ElError> {
        let job_id = new_job_id(Utc::now());
        let config = build_load_job(&self.project_id, &job_id, spec);
        let body = multipart_body(UPLOAD_BOUNDARY, &config, &encode_rows(rows)?)?;
        let content_type = format!("multipart/related; boundary={UPLOAD_BOUNDARY}");
        let url = self.upload_url();
        let token = self.credentials.bearer()?;

        let response = self.send_with_retries(|| {
            self.client
                .post(&url)
                .bearer_auth(&token)
                .header(CONTENT_TYPE, content_type.as_str())
                .body(body.clone())
        })?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|err| ElError::WarehouseHttp(err.to_string()))?;

        let job = match classify_insert(status, &text)? {
            InsertOutcome::Created(created) => {
                if job_state(&created) == Some("DONE") {
                    created
                } else {
                    let location = created
                        .pointer("/jobReference/location")
                        .and_then(Value::as_str);
                    self.wait_for_job(&job_id, location)?
                }
            }
            InsertOutcome::AlreadyExists => {
                tracing::warn!(job_id, "load job already inserted by an earlier attempt");
                self.wait_for_job(&job_id, None)?
            }
        };
        receipt_from_job(&job_id, &job)
    }
}

/// Result of posting a load job.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(Value),
    /// 409 on our own job id: a retried insert whose first attempt already
    /// reached BigQuery. The existing job decides success.
    AlreadyExists,
}

pub fn classify_insert(status: u16, body: &str) -> Result<InsertOutcome, ElError> {
    match status {
        200..=299 => serde_json::from_str(body)
            .map(InsertOutcome::Created)
            .map_err(|err| ElError::WarehouseHttp(err.to_string())),
        409 => Ok(InsertOutcome::AlreadyExists),
        _ => Err(ElError::WarehouseStatus {
            status,
            message: if body.is_empty() {
                "BigQuery request failed".to_string()
            } else {
                body.to_string()
            },
        }),
    }
}

pub fn new_job_id(now: DateTime<Utc>) -> String {
    format!("in_out_el_{}", now.format("%Y%m%d%H%M%S%6f"))
}

pub fn build_load_job(project_id: &str, job_id: &str, spec: &LoadJobSpec) -> Value {
    json!({
        "jobReference": {
            "projectId": project_id,
            "jobId": job_id
        },
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": project_id,
                    "datasetId": spec.destination.dataset,
                    "tableId": spec.destination.table
                },
                "schema": { "fields": spec.schema },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": spec.write_disposition.as_str(),
                "createDisposition": "CREATE_IF_NEEDED"
            }
        }
    })
}

pub fn record_to_row(record: &MovementRecord) -> Value {
    json!({
        "landing_movement_id": record.landing_movement_id,
        "bodega": record.bodega,
        "cantidad": record.cantidad,
        "cliente": record.cliente,
        "fecha_movimiento": record.fecha_movimiento.map(format_timestamp),
        "fecha_ajuste_asn": record.fecha_ajuste_asn.map(format_timestamp),
        "tipo_delivery": record.tipo_delivery,
        "operador": record.operador,
        "proveedor": record.proveedor,
        "tipo": record.tipo
    })
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string()
}

/// Newline-delimited JSON, one row per line.
pub fn encode_rows(rows: &[MovementRecord]) -> Result<Vec<u8>, ElError> {
    let mut out = Vec::new();
    for record in rows {
        serde_json::to_writer(&mut out, &record_to_row(record))
            .map_err(|err| ElError::WarehouseHttp(err.to_string()))?;
        out.push(b'\n');
    }
    Ok(out)
}

pub fn multipart_body(boundary: &str, config: &Value, data: &[u8]) -> Result<Vec<u8>, ElError> {
    let config =
        serde_json::to_vec(config).map_err(|err| ElError::WarehouseHttp(err.to_string()))?;
    let mut body = Vec::with_capacity(config.len() + data.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(&config);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Ok(body)
}

fn job_state(job: &Value) -> Option<&str> {
    job.pointer("/status/state").and_then(Value::as_str)
}

/// Turns a finished job resource into a receipt, surfacing `errorResult`.
pub fn receipt_from_job(job_id: &str, job: &Value) -> Result<LoadReceipt, ElError> {
    if let Some(error) = job.pointer("/status/errorResult") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(ElError::WarehouseJob(format!("{job_id}: {message}")));
    }
    let output_rows = job
        .pointer("/statistics/load/outputRows")
        .and_then(|value| match value {
            Value::String(text) => text.parse().ok(),
            other => other.as_u64(),
        })
        .unwrap_or(0);
    Ok(LoadReceipt {
        job_id: job_id.to_string(),
        output_rows,
    })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

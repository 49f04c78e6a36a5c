#![allow(dead_code)]

use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use in_out_analytics::bigquery::{LoadJobSpec, LoadReceipt, Warehouse};
use in_out_analytics::domain::{Document, DocumentBatch, FieldValue, MovementRecord};
use in_out_analytics::error::ElError;
use in_out_analytics::firestore::DocumentStore;

pub fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

pub fn text(value: &str) -> FieldValue {
    FieldValue::String(value.to_string())
}

pub fn inbound_document(id: &str, cantidad: i64) -> Document {
    Document::new(id)
        .with_field("BodegaRecepcion", text("Bodega Norte"))
        .with_field("Cantidad", FieldValue::Integer(cantidad))
        .with_field("Cliente", text("ACME"))
        .with_field("FechaRecepcion", FieldValue::Timestamp(ts(2025, 2, 10)))
        .with_field("FechaAjusteASN", FieldValue::Timestamp(ts(2025, 2, 11)))
        .with_field("TipoDelivery", text("Parcial"))
        .with_field("PersonaRecepcion", text("Luis"))
        .with_field("ProveedorRecepcion", text("DHL"))
        .with_field("Type", text("entrada"))
        .with_field("Comentarios", text("sin novedad"))
}

pub fn outbound_document(id: &str) -> Document {
    Document::new(id)
        .with_field("BodegaSalida", text("Bodega Sur"))
        .with_field("Cliente", text("ACME"))
        .with_field("FechaSalida", FieldValue::Timestamp(ts(2025, 2, 12)))
        .with_field("PersonaEntrega", text("Ana"))
        .with_field("ProveedorSalida", text("FedEx"))
        .with_field("Type", text("salida"))
        .with_field("PersonaRecoge", text("Carlos"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    pub collection: String,
    pub field: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Serves canned batches per collection and records every query.
#[derive(Default)]
pub struct MockStore {
    pub inbound: DocumentBatch,
    pub outbound: DocumentBatch,
    pub fail_collection: Option<String>,
    pub calls: Mutex<Vec<StoreCall>>,
}

impl DocumentStore for MockStore {
    fn query_range(
        &self,
        collection: &str,
        field: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DocumentBatch, ElError> {
        self.calls.lock().unwrap().push(StoreCall {
            collection: collection.to_string(),
            field: field.to_string(),
            start,
            end,
        });
        if self.fail_collection.as_deref() == Some(collection) {
            return Err(ElError::StoreStatus {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        match collection {
            "entradas" => Ok(self.inbound.clone()),
            "salidas" => Ok(self.outbound.clone()),
            other => panic!("unexpected collection {other}"),
        }
    }
}

#[derive(Default)]
pub struct MockWarehouse {
    pub fail: bool,
    pub loads: Mutex<Vec<(LoadJobSpec, Vec<MovementRecord>)>>,
}

impl Warehouse for MockWarehouse {
    fn load(&self, spec: &LoadJobSpec, rows: &[MovementRecord]) -> Result<LoadReceipt, ElError> {
        self.loads
            .lock()
            .unwrap()
            .push((spec.clone(), rows.to_vec()));
        if self.fail {
            return Err(ElError::WarehouseJob("quota exceeded".to_string()));
        }
        Ok(LoadReceipt {
            job_id: "job_1".to_string(),
            output_rows: rows.len() as u64,
        })
    }
}

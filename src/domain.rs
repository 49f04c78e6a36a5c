use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::error::ElError;

/// Name of the synthetic column holding the document identifier.
pub const ID_COLUMN: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Inbound,
    Outbound,
}

impl Category {
    pub fn collection(&self) -> &'static str {
        match self {
            Category::Inbound => "entradas",
            Category::Outbound => "salidas",
        }
    }

    /// Timestamp field the monthly window filters on.
    pub fn timestamp_field(&self) -> &'static str {
        match self {
            Category::Inbound => "FechaRecepcion",
            Category::Outbound => "FechaSalida",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collection())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A calendar month. Construction validates the month and precomputes the
/// half-open `[start, end)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPeriod {
    year: i32,
    month: u32,
    start: NaiveDate,
    end: NaiveDate,
}

impl RunPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, ElError> {
        let invalid = || ElError::InvalidPeriod { year, month };
        if !(1..=9999).contains(&year) || !(1..=12).contains(&month) {
            return Err(invalid());
        }
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let end = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(invalid)?;
        Ok(Self {
            year,
            month,
            start,
            end,
        })
    }

    pub fn containing(date: NaiveDate) -> Result<Self, ElError> {
        Self::new(date.year(), date.month())
    }

    /// The calendar month before the one containing `date`.
    pub fn previous_of(date: NaiveDate) -> Result<Self, ElError> {
        if date.month() == 1 {
            Self::new(date.year() - 1, 12)
        } else {
            Self::new(date.year(), date.month() - 1)
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn window(&self) -> Window {
        Window {
            start: self.start.and_time(NaiveTime::MIN).and_utc(),
            end: self.end.and_time(NaiveTime::MIN).and_utc(),
        }
    }
}

impl fmt::Display for RunPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A typed document field as the store reports it.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Bytes(String),
    Reference(String),
    GeoPoint { latitude: f64, longitude: f64 },
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Integer(_) => "integer",
            FieldValue::Double(_) => "double",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::String(_) => "string",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Reference(_) => "reference",
            FieldValue::GeoPoint { .. } => "geopoint",
            FieldValue::Array(_) => "array",
            FieldValue::Map(_) => "map",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Rows fetched from one collection. A column is present when any document
/// carries it; documents lacking a present column read it as null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentBatch {
    documents: Vec<Document>,
}

impl DocumentBatch {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn columns(&self) -> BTreeSet<&str> {
        let mut columns = BTreeSet::new();
        if self.is_empty() {
            return columns;
        }
        columns.insert(ID_COLUMN);
        for document in &self.documents {
            columns.extend(document.fields.keys().map(String::as_str));
        }
        columns
    }
}

/// Canonical landing row shared by both movement categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementRecord {
    pub landing_movement_id: String,
    pub bodega: Option<String>,
    pub cantidad: Option<i64>,
    pub cliente: Option<String>,
    pub fecha_movimiento: Option<DateTime<Utc>>,
    pub fecha_ajuste_asn: Option<DateTime<Utc>>,
    pub tipo_delivery: Option<String>,
    pub operador: Option<String>,
    pub proveedor: Option<String>,
    pub tipo: Option<String>,
}

impl MovementRecord {
    pub fn new(landing_movement_id: impl Into<String>) -> Self {
        Self {
            landing_movement_id: landing_movement_id.into(),
            bodega: None,
            cantidad: None,
            cliente: None,
            fecha_movimiento: None,
            fecha_ajuste_asn: None,
            tipo_delivery: None,
            operador: None,
            proveedor: None,
            tipo: None,
        }
    }
}

/// Ordered rows; a row's index is its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementTable {
    rows: Vec<MovementRecord>,
}

impl MovementTable {
    pub fn new(rows: Vec<MovementRecord>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Appends `outbound` after `inbound`, keeping each side's order.
    pub fn concat(inbound: MovementTable, outbound: MovementTable) -> Self {
        let mut rows = inbound.rows;
        rows.extend(outbound.rows);
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[MovementRecord] {
        &self.rows
    }
}

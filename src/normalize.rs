//! Reshapes fetched movement documents into canonical landing rows.
//!
//! Each category declares a field contract: which source fields it reads and
//! the canonical column each one lands in. A batch that violates its contract
//! is logged and replaced by an empty table; normalization never fails a run.

use chrono::{DateTime, Utc};

use crate::domain::{
    Category, Document, DocumentBatch, FieldValue, ID_COLUMN, MovementRecord, MovementTable,
};
use crate::error::ShapeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    String,
    Integer,
    Timestamp,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::String => "string",
            ColumnKind::Integer => "integer",
            ColumnKind::Timestamp => "timestamp",
        }
    }
}

/// Columns of the landing table, in load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    LandingMovementId,
    Bodega,
    Cantidad,
    Cliente,
    FechaMovimiento,
    FechaAjusteAsn,
    TipoDelivery,
    Operador,
    Proveedor,
    Tipo,
}

impl Column {
    pub const ALL: [Column; 10] = [
        Column::LandingMovementId,
        Column::Bodega,
        Column::Cantidad,
        Column::Cliente,
        Column::FechaMovimiento,
        Column::FechaAjusteAsn,
        Column::TipoDelivery,
        Column::Operador,
        Column::Proveedor,
        Column::Tipo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::LandingMovementId => "landing_movement_id",
            Column::Bodega => "bodega",
            Column::Cantidad => "cantidad",
            Column::Cliente => "cliente",
            Column::FechaMovimiento => "fecha_movimiento",
            Column::FechaAjusteAsn => "fecha_ajuste_asn",
            Column::TipoDelivery => "tipo_delivery",
            Column::Operador => "operador",
            Column::Proveedor => "proveedor",
            Column::Tipo => "tipo",
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::Cantidad => ColumnKind::Integer,
            Column::FechaMovimiento | Column::FechaAjusteAsn => ColumnKind::Timestamp,
            _ => ColumnKind::String,
        }
    }

    pub fn required(&self) -> bool {
        matches!(self, Column::LandingMovementId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub source: &'static str,
    pub column: Column,
}

const fn map(source: &'static str, column: Column) -> FieldMapping {
    FieldMapping { source, column }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldContract {
    pub category: Category,
    pub fields: &'static [FieldMapping],
}

pub const INBOUND_CONTRACT: FieldContract = FieldContract {
    category: Category::Inbound,
    fields: &[
        map(ID_COLUMN, Column::LandingMovementId),
        map("BodegaRecepcion", Column::Bodega),
        map("Cantidad", Column::Cantidad),
        map("Cliente", Column::Cliente),
        map("FechaRecepcion", Column::FechaMovimiento),
        map("FechaAjusteASN", Column::FechaAjusteAsn),
        map("TipoDelivery", Column::TipoDelivery),
        map("PersonaRecepcion", Column::Operador),
        map("ProveedorRecepcion", Column::Proveedor),
        map("Type", Column::Tipo),
    ],
};

// Outbound movements track neither quantity nor ASN adjustments; those
// columns are filled with fixed defaults after the mapping.
pub const OUTBOUND_CONTRACT: FieldContract = FieldContract {
    category: Category::Outbound,
    fields: &[
        map(ID_COLUMN, Column::LandingMovementId),
        map("BodegaSalida", Column::Bodega),
        map("Cliente", Column::Cliente),
        map("FechaSalida", Column::FechaMovimiento),
        map("PersonaEntrega", Column::Operador),
        map("ProveedorSalida", Column::Proveedor),
        map("Type", Column::Tipo),
    ],
};

/// Lists every contract source field absent from the batch, in contract order.
pub fn check_fields(batch: &DocumentBatch, contract: &FieldContract) -> Result<(), ShapeError> {
    let columns = batch.columns();
    let missing: Vec<String> = contract
        .fields
        .iter()
        .filter(|mapping| !columns.contains(mapping.source))
        .map(|mapping| mapping.source.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ShapeError::MissingFields(missing))
    }
}

pub fn normalize_inbound(batch: &DocumentBatch) -> MovementTable {
    normalize(batch, &INBOUND_CONTRACT)
}

pub fn normalize_outbound(batch: &DocumentBatch) -> MovementTable {
    normalize(batch, &OUTBOUND_CONTRACT)
}

pub fn normalize(batch: &DocumentBatch, contract: &FieldContract) -> MovementTable {
    if batch.is_empty() {
        tracing::warn!(category = %contract.category, "no documents to normalize");
        return MovementTable::empty();
    }
    match try_normalize(batch, contract) {
        Ok(table) => table,
        Err(ShapeError::MissingFields(missing)) => {
            tracing::error!(
                category = %contract.category,
                documents = batch.len(),
                missing = ?missing,
                "missing expected columns, dropping batch"
            );
            MovementTable::empty()
        }
        Err(err) => {
            tracing::error!(
                category = %contract.category,
                documents = batch.len(),
                error = %err,
                "failed to normalize batch, dropping it"
            );
            MovementTable::empty()
        }
    }
}

pub fn try_normalize(
    batch: &DocumentBatch,
    contract: &FieldContract,
) -> Result<MovementTable, ShapeError> {
    check_fields(batch, contract)?;
    let rows = batch
        .documents()
        .iter()
        .map(|document| build_record(document, contract))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MovementTable::new(rows))
}

fn build_record(
    document: &Document,
    contract: &FieldContract,
) -> Result<MovementRecord, ShapeError> {
    let mut record = MovementRecord::new(document.id.clone());
    for mapping in contract.fields {
        let cell = Cell {
            document,
            source: mapping.source,
            kind: mapping.column.kind(),
        };
        match mapping.column {
            // taken from the document id above
            Column::LandingMovementId => {}
            Column::Bodega => record.bodega = cell.string()?,
            Column::Cantidad => record.cantidad = cell.integer()?,
            Column::Cliente => record.cliente = cell.string()?,
            Column::FechaMovimiento => record.fecha_movimiento = cell.timestamp()?,
            Column::FechaAjusteAsn => record.fecha_ajuste_asn = cell.timestamp()?,
            Column::TipoDelivery => record.tipo_delivery = cell.string()?,
            Column::Operador => record.operador = cell.string()?,
            Column::Proveedor => record.proveedor = cell.string()?,
            Column::Tipo => record.tipo = cell.string()?,
        }
    }

    if contract.category == Category::Outbound {
        record.cantidad = Some(0);
        record.fecha_ajuste_asn = None;
        record.tipo_delivery = None;
    }

    Ok(record)
}

struct Cell<'a> {
    document: &'a Document,
    source: &'static str,
    kind: ColumnKind,
}

impl Cell<'_> {
    fn value(&self) -> Option<&FieldValue> {
        match self.document.field(self.source) {
            None | Some(FieldValue::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn mismatch(&self, found: &FieldValue) -> ShapeError {
        ShapeError::TypeMismatch {
            document: self.document.id.clone(),
            field: self.source.to_string(),
            expected: self.kind.as_str(),
            found: found.kind(),
        }
    }

    fn string(&self) -> Result<Option<String>, ShapeError> {
        match self.value() {
            None => Ok(None),
            Some(FieldValue::String(value)) | Some(FieldValue::Reference(value)) => {
                Ok(Some(value.clone()))
            }
            Some(other) => Err(self.mismatch(other)),
        }
    }

    fn integer(&self) -> Result<Option<i64>, ShapeError> {
        match self.value() {
            None => Ok(None),
            Some(FieldValue::Integer(value)) => Ok(Some(*value)),
            Some(FieldValue::Double(value))
                if value.fract() == 0.0 && value.abs() < i64::MAX as f64 =>
            {
                Ok(Some(*value as i64))
            }
            Some(other) => Err(self.mismatch(other)),
        }
    }

    fn timestamp(&self) -> Result<Option<DateTime<Utc>>, ShapeError> {
        match self.value() {
            None => Ok(None),
            Some(FieldValue::Timestamp(value)) => Ok(Some(*value)),
            Some(other) => Err(self.mismatch(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contracts_cover_expected_widths() {
        assert_eq!(INBOUND_CONTRACT.fields.len(), 10);
        assert_eq!(OUTBOUND_CONTRACT.fields.len(), 7);
    }

    #[test]
    fn inbound_contract_maps_every_landing_column() {
        let columns: Vec<_> = INBOUND_CONTRACT.fields.iter().map(|m| m.column).collect();
        for column in Column::ALL {
            assert!(columns.contains(&column), "{} unmapped", column.name());
        }
    }

    #[test]
    fn integral_double_coerces_to_integer() {
        let document = Document::new("d1").with_field("Cantidad", FieldValue::Double(4.0));
        let cell = Cell {
            document: &document,
            source: "Cantidad",
            kind: ColumnKind::Integer,
        };
        assert_eq!(cell.integer().unwrap(), Some(4));
    }

    #[test]
    fn fractional_double_is_a_mismatch() {
        let document = Document::new("d1").with_field("Cantidad", FieldValue::Double(4.5));
        let cell = Cell {
            document: &document,
            source: "Cantidad",
            kind: ColumnKind::Integer,
        };
        assert!(matches!(
            cell.integer(),
            Err(ShapeError::TypeMismatch { expected: "integer", found: "double", .. })
        ));
    }
}

use serde::Serialize;

use crate::bigquery::{Destination, LoadJobSpec, LoadReceipt, Warehouse};
use crate::domain::{Category, DocumentBatch, MovementTable, RunPeriod, Window};
use crate::error::ElError;
use crate::firestore::DocumentStore;
use crate::normalize;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    pub category: Category,
    pub fetched: usize,
    pub normalized: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub period: String,
    pub window: Window,
    pub destination: Destination,
    pub inbound: CategorySummary,
    pub outbound: CategorySummary,
    pub combined_rows: usize,
    pub dry_run: bool,
    pub load: Option<LoadReceipt>,
}

/// Drives one monthly run: fetch and normalize each category, concatenate,
/// then a single load.
pub struct App<S: DocumentStore, W: Warehouse> {
    store: S,
    warehouse: W,
}

impl<S: DocumentStore, W: Warehouse> App<S, W> {
    pub fn new(store: S, warehouse: W) -> Self {
        Self { store, warehouse }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    pub fn fetch(&self, category: Category, period: RunPeriod) -> Result<DocumentBatch, ElError> {
        let window = period.window();
        let collection = category.collection();
        let field = category.timestamp_field();
        match self
            .store
            .query_range(collection, field, window.start, window.end)
        {
            Ok(batch) => {
                tracing::info!(collection, records = batch.len(), "fetched documents");
                Ok(batch)
            }
            Err(err) => {
                tracing::error!(
                    collection,
                    field,
                    start = %window.start,
                    end = %window.end,
                    error = %err,
                    "failed to fetch documents"
                );
                Err(err)
            }
        }
    }

    /// Appends `table` to `destination`. An empty table is skipped and
    /// yields `Ok(None)`.
    pub fn load(
        &self,
        table: &MovementTable,
        destination: &Destination,
    ) -> Result<Option<LoadReceipt>, ElError> {
        if table.is_empty() {
            tracing::warn!(%destination, "no rows to load, skipping load job");
            return Ok(None);
        }
        let spec = LoadJobSpec::append(destination.clone());
        match self.warehouse.load(&spec, table.rows()) {
            Ok(receipt) => {
                tracing::info!(
                    %destination,
                    job_id = %receipt.job_id,
                    rows = receipt.output_rows,
                    "loaded rows"
                );
                Ok(Some(receipt))
            }
            Err(err) => {
                tracing::error!(
                    %destination,
                    rows = table.len(),
                    error = %err,
                    "failed to load rows"
                );
                Err(err)
            }
        }
    }

    pub fn run(
        &self,
        period: RunPeriod,
        destination: &Destination,
        options: RunOptions,
    ) -> Result<RunSummary, ElError> {
        tracing::info!(year = period.year(), month = period.month(), "fetching data");

        let inbound_batch = self.fetch(Category::Inbound, period)?;
        let inbound = normalize::normalize_inbound(&inbound_batch);

        let outbound_batch = self.fetch(Category::Outbound, period)?;
        let outbound = normalize::normalize_outbound(&outbound_batch);

        let inbound_summary = CategorySummary {
            category: Category::Inbound,
            fetched: inbound_batch.len(),
            normalized: inbound.len(),
        };
        let outbound_summary = CategorySummary {
            category: Category::Outbound,
            fetched: outbound_batch.len(),
            normalized: outbound.len(),
        };

        let combined = MovementTable::concat(inbound, outbound);
        tracing::info!(rows = combined.len(), "combined movements");

        let load = if options.dry_run {
            tracing::info!(%destination, "dry run, skipping load");
            None
        } else {
            self.load(&combined, destination)?
        };

        Ok(RunSummary {
            period: period.to_string(),
            window: period.window(),
            destination: destination.clone(),
            inbound: inbound_summary,
            outbound: outbound_summary,
            combined_rows: combined.len(),
            dry_run: options.dry_run,
            load,
        })
    }
}

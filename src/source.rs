//! Loading of the raw price and PPP tables.
//!
//! The pipeline only needs "load table by name"; [`TableSource`] is that
//! capability. [`ExcelSource`] reads workbooks from disk, [`MemorySource`]
//! serves tables already held in memory.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::info;

use crate::config::{PipelineConfig, normalize_country};
use crate::enrich::PppLayout;
use crate::error::{PipelineError, Result};
use crate::io::excel_read;
use crate::model::{Cell, Table};
use crate::reshape::PriceLayout;

/// Name of the wide price-fact table.
pub const PRICE_TABLE: &str = "prices";
/// Name of the PPP conversion table.
pub const PPP_TABLE: &str = "ppp";

/// Something that can produce a raw table by name.
pub trait TableSource {
    fn load_table(&self, name: &str) -> Result<Table>;
}

#[derive(Debug, Clone)]
struct SheetLocation {
    path: PathBuf,
    sheet: Option<String>,
}

/// Reads tables from Excel workbooks.
#[derive(Debug, Clone, Default)]
pub struct ExcelSource {
    locations: HashMap<String, SheetLocation>,
}

impl ExcelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source wired to the price and PPP workbooks named in the config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new()
            .with_table(PRICE_TABLE, config.price_path(), config.price_sheet.clone())
            .with_table(PPP_TABLE, config.ppp_path(), config.ppp_sheet.clone())
    }

    pub fn with_table(mut self, name: &str, path: PathBuf, sheet: Option<String>) -> Self {
        self.locations
            .insert(name.to_string(), SheetLocation { path, sheet });
        self
    }
}

impl TableSource for ExcelSource {
    fn load_table(&self, name: &str) -> Result<Table> {
        let location = self
            .locations
            .get(name)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("no source registered for table '{name}'")))?;
        excel_read::read_table(&location.path, name, location.sheet.as_deref())
    }
}

/// Serves tables held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: HashMap<String, Table>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }
}

impl TableSource for MemorySource {
    fn load_table(&self, name: &str) -> Result<Table> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::InvalidWorkbook(format!("table '{name}' not loaded")))
    }
}

/// Loads the price table and validates it against the layout before anything
/// downstream sees it.
pub fn load_price_table(source: &impl TableSource, layout: &PriceLayout) -> Result<Table> {
    let mut table = source.load_table(PRICE_TABLE)?;
    let resolved = layout.resolve(&table)?;
    normalize_country_column(&mut table, resolved.country);
    info!(
        rows = table.rows.len(),
        years = resolved.years.len(),
        "loaded price table"
    );
    Ok(table)
}

/// Loads the PPP table and validates its country and year columns.
pub fn load_ppp_table(source: &impl TableSource, layout: &PppLayout) -> Result<Table> {
    let mut table = source.load_table(PPP_TABLE)?;
    let resolved = layout.resolve(&table)?;
    normalize_country_column(&mut table, resolved.country);
    info!(
        rows = table.rows.len(),
        years = resolved.years.len(),
        "loaded PPP table"
    );
    Ok(table)
}

fn normalize_country_column(table: &mut Table, column: usize) {
    for row in &mut table.rows {
        if let Some(cell) = row.get_mut(column) {
            if let Some(text) = cell.as_text() {
                *cell = Cell::Text(normalize_country(&text));
            }
        }
    }
}

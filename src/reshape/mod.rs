//! Wide-to-long reshaping of the price table.
//!
//! The wide table carries one row per brand, country and pack, with a
//! `price-<year>` and an `exchange_rate-<year>` column for every supported
//! year, plus an optional `cost_per_unit-<year>` column. Reshaping emits one
//! [`PriceFact`] per row and year.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::{IdColumns, PipelineConfig, YEAR_PLACEHOLDER};
use crate::error::{PipelineError, Result};
use crate::model::{Cell, PriceFact, RecordKey, Table};

/// Declared shape of the wide price table.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceLayout {
    pub id_columns: IdColumns,
    pub years: Vec<i32>,
    pub price_template: String,
    pub exchange_rate_template: String,
    pub cost_per_unit_template: String,
}

/// Column positions of one year's price and exchange rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearColumns {
    pub year: i32,
    pub price: usize,
    pub exchange_rate: usize,
    pub cost_per_unit: Option<usize>,
}

/// A [`PriceLayout`] matched against a concrete table header.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLayout {
    pub brand: usize,
    pub country: usize,
    pub pack: usize,
    pub years: Vec<YearColumns>,
}

impl PriceLayout {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            id_columns: config.id_columns.clone(),
            years: config.years.clone(),
            price_template: config.price_template.clone(),
            exchange_rate_template: config.exchange_rate_template.clone(),
            cost_per_unit_template: config.cost_per_unit_template.clone(),
        }
    }

    pub fn price_column(&self, year: i32) -> String {
        expand(&self.price_template, year)
    }

    pub fn exchange_rate_column(&self, year: i32) -> String {
        expand(&self.exchange_rate_template, year)
    }

    pub fn cost_per_unit_column(&self, year: i32) -> String {
        expand(&self.cost_per_unit_template, year)
    }

    /// Matches the layout against the table header.
    ///
    /// Fails with a schema error when an identifying column is absent or when
    /// no declared year has both of its columns. A year with only one of the
    /// two columns is skipped with a warning. The unit cost column is never
    /// required.
    pub fn resolve(&self, table: &Table) -> Result<ResolvedLayout> {
        let id_index = |name: &str| {
            table.column_index(&name.to_lowercase()).ok_or_else(|| {
                PipelineError::schema(&table.name, format!("missing identifying column '{name}'"))
            })
        };
        let brand = id_index(&self.id_columns.brand)?;
        let country = id_index(&self.id_columns.country)?;
        let pack = id_index(&self.id_columns.pack)?;

        let mut years = Vec::with_capacity(self.years.len());
        for &year in &self.years {
            let price_name = self.price_column(year);
            let rate_name = self.exchange_rate_column(year);
            match (table.column_index(&price_name), table.column_index(&rate_name)) {
                (Some(price), Some(exchange_rate)) => years.push(YearColumns {
                    year,
                    price,
                    exchange_rate,
                    cost_per_unit: table.column_index(&self.cost_per_unit_column(year)),
                }),
                (None, None) => debug!(table = %table.name, year, "no columns for year"),
                (Some(_), None) => {
                    warn!(table = %table.name, year, column = %rate_name, "exchange rate column missing; skipping year")
                }
                (None, Some(_)) => {
                    warn!(table = %table.name, year, column = %price_name, "price column missing; skipping year")
                }
            }
        }

        if years.is_empty() {
            return Err(PipelineError::schema(
                &table.name,
                format!(
                    "no '{}' / '{}' column pair found for years {:?}",
                    self.price_template, self.exchange_rate_template, self.years
                ),
            ));
        }

        Ok(ResolvedLayout {
            brand,
            country,
            pack,
            years,
        })
    }
}

fn expand(template: &str, year: i32) -> String {
    template.replace(YEAR_PLACEHOLDER, &year.to_string()).to_lowercase()
}

/// Converts the wide price table into long-format price facts sorted by
/// their natural key.
///
/// Years without a price are skipped rather than zero-filled. A price with a
/// blank exchange rate is kept so the enricher can report it. Duplicate
/// (brand, country, pack, year) keys are a data integrity error.
pub fn reshape(table: &Table, layout: &PriceLayout) -> Result<Vec<PriceFact>> {
    let resolved = layout.resolve(table)?;
    let mut facts: BTreeMap<RecordKey, PriceFact> = BTreeMap::new();

    for (row_idx, row) in table.rows.iter().enumerate() {
        let ids = (
            Table::cell(row, resolved.brand).as_text(),
            Table::cell(row, resolved.country).as_text(),
            Table::cell(row, resolved.pack).as_text(),
        );
        let (Some(brand), Some(country), Some(pack)) = ids else {
            warn!(table = %table.name, row = row_idx + 2, "row lacks brand, country or pack; skipped");
            continue;
        };

        for columns in &resolved.years {
            let Some(price) = numeric(table, row, columns.price, row_idx) else {
                continue;
            };
            let exchange_rate = numeric(table, row, columns.exchange_rate, row_idx);
            let cost_per_unit = columns
                .cost_per_unit
                .and_then(|column| numeric(table, row, column, row_idx));

            let fact = PriceFact {
                brand: brand.clone(),
                country: country.clone(),
                pack: pack.clone(),
                year: columns.year,
                price,
                exchange_rate,
                cost_per_unit,
            };
            let key = fact.key();
            if facts.contains_key(&key) {
                return Err(PipelineError::integrity(
                    &table.name,
                    format!("duplicate price row for {key}"),
                ));
            }
            facts.insert(key, fact);
        }
    }

    debug!(table = %table.name, facts = facts.len(), "reshaped to long format");
    Ok(facts.into_values().collect())
}

fn numeric(table: &Table, row: &[Cell], column: usize, row_idx: usize) -> Option<f64> {
    let cell = Table::cell(row, column);
    let value = cell.as_number();
    if value.is_none() && !cell.is_empty() {
        warn!(
            table = %table.name,
            row = row_idx + 2,
            column = %table.columns[column],
            value = ?cell,
            "non-numeric value treated as missing"
        );
    }
    value
}

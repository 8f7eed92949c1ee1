use std::fmt;

use serde::{Deserialize, Serialize};

/// Represents a single spreadsheet cell after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Cell {
    /// Blank cell, or a text cell holding only whitespace.
    Empty,
    /// Numeric cell.
    Number(f64),
    /// Any other literal, kept as trimmed text.
    Text(String),
}

impl Cell {
    /// Returns the numeric value of the cell. Text cells holding a number are
    /// parsed; anything else yields `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(value) if value.is_finite() => Some(*value),
            Cell::Text(value) => value.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    /// Returns the text of the cell. Numbers are rendered the way a
    /// spreadsheet displays them.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Number(value) => Some(value.to_string()),
            Cell::Text(value) => Some(value.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

/// In-memory tabular form of a raw source sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Logical name of the table, e.g. `prices` or `ppp`.
    pub name: String,
    /// Normalised header names.
    pub columns: Vec<String>,
    /// Data rows. Rows may be shorter than the header.
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Index of the column with the given (normalised) name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Cell of `row` at `column`, `Cell::Empty` when the row is short.
    pub fn cell(row: &[Cell], column: usize) -> &Cell {
        static EMPTY: Cell = Cell::Empty;
        row.get(column).unwrap_or(&EMPTY)
    }
}

/// Natural key shared by price facts, enriched records and aggregate leaves.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub brand: String,
    pub country: String,
    pub pack: String,
    pub year: i32,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.brand, self.country, self.pack, self.year
        )
    }
}

/// One long-format price row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceFact {
    pub brand: String,
    pub country: String,
    pub pack: String,
    pub year: i32,
    /// Price in local currency.
    pub price: f64,
    /// Local currency units per USD. Absent when the source cell is blank.
    pub exchange_rate: Option<f64>,
    /// Local cost of one unit of the pack, when the table carries it.
    #[serde(default)]
    pub cost_per_unit: Option<f64>,
}

impl PriceFact {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            brand: self.brand.clone(),
            country: self.country.clone(),
            pack: self.pack.clone(),
            year: self.year,
        }
    }
}

/// PPP conversion rate for a country and year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PppRate {
    pub country: String,
    pub year: i32,
    /// Local currency units per international dollar.
    pub ppp_rate: f64,
}

/// A price fact with its derived metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub brand: String,
    pub country: String,
    pub pack: String,
    pub year: i32,
    pub price: f64,
    pub exchange_rate: f64,
    pub usd_price: f64,
    /// Price in international dollars; `None` when no PPP rate exists.
    #[serde(default)]
    pub ppp_price: Option<f64>,
    /// Second-lowest PPP price for the brand, pack and year across countries.
    #[serde(default)]
    pub mfn_price: Option<f64>,
    #[serde(default)]
    pub cost_per_unit: Option<f64>,
    #[serde(default)]
    pub usd_cost_per_unit: Option<f64>,
    /// Unit cost in international dollars; `None` without a unit cost or a
    /// PPP rate.
    #[serde(default)]
    pub ppp_cost_per_unit: Option<f64>,
}

impl EnrichedRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            brand: self.brand.clone(),
            country: self.country.clone(),
            pack: self.pack.clone(),
            year: self.year,
        }
    }
}

/// A price row removed during enrichment, kept for visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedRow {
    pub key: RecordKey,
    pub reason: String,
}

/// Metrics for one year of a country/pack series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearPoint {
    pub year: i32,
    pub price: f64,
    pub exchange_rate: f64,
    pub usd_price: f64,
    #[serde(default)]
    pub ppp_price: Option<f64>,
    #[serde(default)]
    pub mfn_price: Option<f64>,
    #[serde(default)]
    pub cost_per_unit: Option<f64>,
    #[serde(default)]
    pub usd_cost_per_unit: Option<f64>,
    #[serde(default)]
    pub ppp_cost_per_unit: Option<f64>,
}

/// Year-ordered series for one country and pack of a brand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackSeries {
    pub country: String,
    pub pack: String,
    pub points: Vec<YearPoint>,
}

/// Brand-keyed aggregate handed to the display and export layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandAggregate {
    pub brand: String,
    pub series: Vec<PackSeries>,
}

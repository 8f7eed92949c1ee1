use std::collections::HashSet;
use std::path::Path;

use crate::aggregate::unaggregate;
use crate::error::Result;
use crate::io::excel_write;
use crate::model::{BrandAggregate, Cell, EnrichedRecord};

/// Column headers of every brand sheet.
pub const EXPORT_COLUMNS: [&str; 11] = [
    "country",
    "pack",
    "year",
    "price",
    "exchange_rate",
    "usd_price",
    "ppp_price",
    "mfn_price",
    "cost_per_unit",
    "usd_cost_per_unit",
    "ppp_cost_per_unit",
];

/// Longest sheet name Excel accepts.
const MAX_SHEET_NAME: usize = 31;

/// A table that will be materialised as an Excel sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    pub sheet_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Represents all tables required to materialise the Excel workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkbookData {
    pub tables: Vec<SheetTable>,
}

/// Lays out one sheet per brand holding the brand's flattened records.
/// Missing PPP, MFN and unit cost values are left blank.
pub fn build_workbook(aggregates: &[BrandAggregate]) -> WorkbookData {
    let mut sheet_names = SheetNameRegistry::default();

    let tables = aggregates
        .iter()
        .filter(|aggregate| aggregate.series.iter().any(|series| !series.points.is_empty()))
        .map(|aggregate| {
            let records = unaggregate(std::slice::from_ref(aggregate));
            SheetTable {
                sheet_name: sheet_names.assign(&aggregate.brand),
                columns: EXPORT_COLUMNS.iter().map(|column| column.to_string()).collect(),
                rows: records.iter().map(record_row).collect(),
            }
        })
        .collect();

    WorkbookData { tables }
}

/// Writes the per-brand workbook to `path`.
pub fn export_workbook(path: &Path, aggregates: &[BrandAggregate]) -> Result<()> {
    let workbook = build_workbook(aggregates);
    excel_write::write_workbook(path, &workbook)
}

fn record_row(record: &EnrichedRecord) -> Vec<Cell> {
    let optional = |value: Option<f64>| value.map(Cell::Number).unwrap_or(Cell::Empty);
    vec![
        Cell::Text(record.country.clone()),
        Cell::Text(record.pack.clone()),
        Cell::Number(f64::from(record.year)),
        Cell::Number(record.price),
        Cell::Number(record.exchange_rate),
        Cell::Number(record.usd_price),
        optional(record.ppp_price),
        optional(record.mfn_price),
        optional(record.cost_per_unit),
        optional(record.usd_cost_per_unit),
        optional(record.ppp_cost_per_unit),
    ]
}

#[derive(Debug, Default)]
struct SheetNameRegistry {
    used: HashSet<String>,
}

impl SheetNameRegistry {
    fn assign(&mut self, raw: &str) -> String {
        let base = sanitize_sheet_name(raw);
        if self.used.insert(base.to_lowercase()) {
            return base;
        }

        let mut counter = 1;
        loop {
            let suffix = format!("_{counter}");
            let prefix: String = base
                .chars()
                .take(MAX_SHEET_NAME - suffix.len())
                .collect();
            let candidate = format!("{prefix}{suffix}");
            if self.used.insert(candidate.to_lowercase()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

fn sanitize_sheet_name(raw: &str) -> String {
    let invalid = [':', '\\', '/', '?', '*', '[', ']', '\'', '"'];
    let sanitized: String = raw
        .chars()
        .map(|ch| {
            if invalid.contains(&ch) || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();

    let sanitized: String = sanitized.trim().chars().take(MAX_SHEET_NAME).collect();
    if sanitized.is_empty() {
        "Sheet".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PackSeries, YearPoint};

    fn brand(name: &str, ppp_price: Option<f64>) -> BrandAggregate {
        BrandAggregate {
            brand: name.to_string(),
            series: vec![PackSeries {
                country: "germany".into(),
                pack: "10mg".into(),
                points: vec![YearPoint {
                    year: 2021,
                    price: 100.0,
                    exchange_rate: 4.0,
                    usd_price: 25.0,
                    ppp_price,
                    mfn_price: ppp_price,
                    cost_per_unit: Some(2.0),
                    usd_cost_per_unit: Some(0.5),
                    ppp_cost_per_unit: ppp_price.map(|_| 2.5),
                }],
            }],
        }
    }

    #[test]
    fn one_sheet_per_brand_with_blank_missing_prices() {
        let workbook = build_workbook(&[brand("Aspira", None), brand("Coravin", Some(125.0))]);

        assert_eq!(workbook.tables.len(), 2);
        let aspira = &workbook.tables[0];
        assert_eq!(aspira.sheet_name, "Aspira");
        assert_eq!(aspira.columns.len(), EXPORT_COLUMNS.len());
        assert_eq!(aspira.rows[0][2], Cell::Number(2021.0));
        assert_eq!(aspira.rows[0][6], Cell::Empty);
        assert_eq!(workbook.tables[1].rows[0][6], Cell::Number(125.0));
        assert_eq!(aspira.rows[0][8], Cell::Number(2.0));
        assert_eq!(aspira.rows[0][9], Cell::Number(0.5));
        assert_eq!(aspira.rows[0][10], Cell::Empty);
        assert_eq!(workbook.tables[1].rows[0][10], Cell::Number(2.5));
    }

    #[test]
    fn sheet_names_are_sanitised_and_unique() {
        let mut registry = SheetNameRegistry::default();

        assert_eq!(registry.assign("Aspira/Plus"), "Aspira_Plus");
        assert_eq!(registry.assign("aspira_plus"), "aspira_plus_1");
        assert_eq!(registry.assign("   "), "Sheet");
        let long = "A".repeat(40);
        assert_eq!(registry.assign(&long).chars().count(), MAX_SHEET_NAME);
        assert_eq!(registry.assign(&long), format!("{}_1", "A".repeat(29)));
    }

    #[test]
    fn brands_without_points_get_no_sheet() {
        let empty = BrandAggregate {
            brand: "Empty".into(),
            series: Vec::new(),
        };

        assert!(build_workbook(&[empty]).tables.is_empty());
    }
}

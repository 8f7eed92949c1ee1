use std::collections::HashSet;
use std::path::Path;

use calamine::{DataType, Reader, Xlsx, open_workbook};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::model::{Cell, Table};

/// Reads a worksheet into a [`Table`]. The first row is the header; fully
/// blank rows are skipped. When `sheet` is `None` the first worksheet is used.
pub fn read_table(path: &Path, name: &str, sheet: Option<&str>) -> Result<Table> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let range = read_required_sheet(&mut workbook, sheet)?;

    let mut rows = range.rows();
    let columns: Vec<String> = match rows.next() {
        Some(header) => header
            .iter()
            .map(|cell| normalize_header(&cell_to_string(Some(cell))))
            .collect(),
        None => Vec::new(),
    };
    ensure_unique_headers(name, &columns)?;

    let mut table = Table::new(name, columns);
    for row in rows {
        let cells: Vec<Cell> = row.iter().map(to_cell).collect();
        if cells.iter().all(Cell::is_empty) {
            continue;
        }
        table.rows.push(cells);
    }

    debug!(
        table = name,
        path = %path.display(),
        columns = table.columns.len(),
        rows = table.rows.len(),
        "read worksheet"
    );
    Ok(table)
}

fn read_required_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: Option<&str>,
) -> Result<calamine::Range<DataType>> {
    let range_result = match name {
        Some(name) => workbook
            .worksheet_range(name)
            .ok_or_else(|| PipelineError::InvalidWorkbook(format!("missing sheet '{name}'")))?,
        None => workbook
            .worksheet_range_at(0)
            .ok_or_else(|| PipelineError::InvalidWorkbook("workbook has no sheets".into()))?,
    };
    let range = range_result.map_err(PipelineError::from)?;
    Ok(range)
}

/// Lower-cases and trims a header. Year-first headers such as `2020-Price`
/// are rewritten to the field-first form `price-2020`.
pub fn normalize_header(raw: &str) -> String {
    let header = raw.trim().to_lowercase();
    if let Some((prefix, rest)) = header.split_once('-') {
        if prefix.len() == 4 && prefix.chars().all(|ch| ch.is_ascii_digit()) && !rest.is_empty() {
            return format!("{rest}-{prefix}");
        }
    }
    header
}

/// Two headers that normalise to the same name would make column lookup
/// ambiguous. Blank headers are ignored.
fn ensure_unique_headers(table: &str, columns: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for column in columns.iter().filter(|column| !column.is_empty()) {
        if !seen.insert(column.as_str()) {
            return Err(PipelineError::schema(
                table,
                format!("duplicate column '{column}' after header normalisation"),
            ));
        }
    }
    Ok(())
}

fn to_cell(cell: &DataType) -> Cell {
    match cell {
        DataType::Float(value) => Cell::Number(*value),
        DataType::Int(value) => Cell::Number(*value as f64),
        DataType::Empty => Cell::Empty,
        DataType::String(value) if value.trim().is_empty() => Cell::Empty,
        DataType::String(value) => Cell::Text(value.trim().to_string()),
        other => Cell::Text(other.to_string()),
    }
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_normalised() {
        assert_eq!(normalize_header(" Price-2020 "), "price-2020");
        assert_eq!(normalize_header("2021-Exchange_Rate"), "exchange_rate-2021");
        assert_eq!(normalize_header("Brand"), "brand");
        assert_eq!(normalize_header("2022"), "2022");
    }

    #[test]
    fn headers_colliding_after_normalisation_are_rejected() {
        let columns: Vec<String> = ["Brand", "Price-2020", "2020-price"]
            .iter()
            .map(|raw| normalize_header(raw))
            .collect();

        let err = ensure_unique_headers("prices", &columns).expect_err("collision rejected");
        assert!(
            matches!(err, PipelineError::Schema { table, message } if table == "prices" && message.contains("price-2020"))
        );

        let blanks = ["brand", "", ""].map(String::from);
        assert!(ensure_unique_headers("prices", &blanks).is_ok());
    }

    #[test]
    fn blank_strings_become_empty_cells() {
        assert_eq!(to_cell(&DataType::String("   ".into())), Cell::Empty);
        assert_eq!(to_cell(&DataType::Int(4)), Cell::Number(4.0));
        assert_eq!(to_cell(&DataType::String(" UK ".into())), Cell::Text("UK".into()));
    }
}

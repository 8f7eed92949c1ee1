use std::fs;
use std::path::Path;

use parity_prices::aggregate::{aggregate, find_brand, unaggregate};
use parity_prices::cache::{CacheStore, FileStore};
use parity_prices::export;
use parity_prices::io::excel_read;
use parity_prices::model::{BrandAggregate, Cell, EnrichedRecord};
use parity_prices::pipeline::{AGGREGATE_KEY, ENRICHED_KEY};
use parity_prices::{Pipeline, PipelineConfig, PipelineError, PipelineState, Stage};
use rust_xlsxwriter::Workbook;
use tempfile::tempdir;

enum Value<'a> {
    Text(&'a str),
    Number(f64),
    Blank,
}

use Value::{Blank, Number, Text};

fn write_sheet(path: &Path, header: &[&str], rows: &[Vec<Value>]) {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    for (col, name) in header.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, *name)
            .expect("header written");
    }
    for (row_idx, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            let (row_num, col_num) = ((row_idx + 1) as u32, col as u16);
            match value {
                Text(text) => {
                    worksheet
                        .write_string(row_num, col_num, *text)
                        .expect("cell written");
                }
                Number(number) => {
                    worksheet
                        .write_number(row_num, col_num, *number)
                        .expect("cell written");
                }
                Blank => {}
            }
        }
    }
    workbook.save(path).expect("workbook saved");
}

fn write_prices(data_root: &Path, germany_2021: f64) {
    write_sheet(
        &data_root.join("data.xlsx"),
        &[
            "Brand",
            "Country",
            "Pack",
            "Price-2021",
            "Exchange_Rate-2021",
            "2022-Price",
            "2022-Exchange_Rate",
        ],
        &[
            vec![
                Text("Aspira"),
                Text("Germany"),
                Text("10mg"),
                Number(germany_2021),
                Number(4.0),
                Number(110.0),
                Number(0.0),
            ],
            vec![
                Text("Aspira"),
                Text("France"),
                Text("10mg"),
                Number(90.0),
                Number(0.9),
                Blank,
                Blank,
            ],
            vec![
                Text("Coravin"),
                Text("Japan"),
                Text("Tablet"),
                Number(3000.0),
                Number(120.0),
                Number(3300.0),
                Number(132.0),
            ],
        ],
    );
}

fn write_ppp(data_root: &Path) {
    write_sheet(
        &data_root.join("ppp_2020_2023.xlsx"),
        &["country", "2021", "2022"],
        &[
            vec![Text("germany"), Number(0.8), Number(0.82)],
            vec![Text("France"), Number(0.75), Number(0.76)],
        ],
    );
}

fn config_for(data_root: &Path) -> PipelineConfig {
    PipelineConfig {
        data_root: data_root.to_path_buf(),
        years: vec![2021, 2022],
        ..PipelineConfig::default()
    }
}

fn sorted(mut records: Vec<EnrichedRecord>) -> Vec<EnrichedRecord> {
    records.sort_by(|lhs, rhs| lhs.key().cmp(&rhs.key()));
    records
}

#[test]
fn workbook_pipeline_derives_prices() {
    let dir = tempdir().expect("temporary directory");
    write_prices(dir.path(), 100.0);
    write_ppp(dir.path());
    let mut pipeline = Pipeline::from_config(config_for(dir.path())).expect("pipeline");

    let aggregates = pipeline.build(false).expect("pipeline built").to_vec();

    let aspira = find_brand(&aggregates, "Aspira").expect("Aspira aggregated");
    let germany = aspira
        .series
        .iter()
        .find(|series| series.country == "germany")
        .expect("germany series");
    assert_eq!(germany.pack, "10mg");
    assert_eq!(germany.points.len(), 1);
    assert_eq!(germany.points[0].year, 2021);
    assert_eq!(germany.points[0].usd_price, 25.0);
    assert_eq!(germany.points[0].ppp_price, Some(125.0));

    let france = aspira
        .series
        .iter()
        .find(|series| series.country == "france")
        .expect("france series");
    assert_eq!(france.points.len(), 1);
    assert_eq!(france.points[0].ppp_price, Some(120.0));
    // Second-lowest of 120 (france) and 125 (germany).
    assert_eq!(france.points[0].mfn_price, Some(125.0));

    let coravin = find_brand(&aggregates, "Coravin").expect("Coravin aggregated");
    let years: Vec<i32> = coravin.series[0].points.iter().map(|point| point.year).collect();
    assert_eq!(years, vec![2021, 2022]);
    assert!(
        coravin.series[0]
            .points
            .iter()
            .all(|point| point.ppp_price.is_none() && point.mfn_price.is_none())
    );

    let dropped = &pipeline.report().dropped;
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].key.country, "germany");
    assert_eq!(dropped[0].key.year, 2022);
    assert_eq!(pipeline.state(), &PipelineState::Ready);
}

#[test]
fn repeated_builds_without_refresh_are_identical() {
    let dir = tempdir().expect("temporary directory");
    write_prices(dir.path(), 100.0);
    write_ppp(dir.path());
    let config = config_for(dir.path());

    let first = parity_prices::build_aggregates(config.clone(), false).expect("first build");
    let second = parity_prices::build_aggregates(config.clone(), false).expect("second build");
    let third = parity_prices::build_aggregates(config, false).expect("third build");

    let bytes = |value: &Vec<BrandAggregate>| serde_json::to_vec(value).expect("serialized");
    assert_eq!(bytes(&first), bytes(&second));
    assert_eq!(bytes(&second), bytes(&third));
    assert_eq!(first, second);
}

#[test]
fn refresh_picks_up_source_changes() {
    let dir = tempdir().expect("temporary directory");
    write_prices(dir.path(), 100.0);
    write_ppp(dir.path());
    let config = config_for(dir.path());
    let germany_usd = |aggregates: &[BrandAggregate]| {
        find_brand(aggregates, "Aspira")
            .and_then(|aspira| aspira.series.iter().find(|series| series.country == "germany"))
            .map(|series| series.points[0].usd_price)
            .expect("germany price")
    };

    let initial = parity_prices::build_aggregates(config.clone(), false).expect("initial build");
    assert_eq!(germany_usd(&initial), 25.0);

    write_prices(dir.path(), 200.0);

    let stale = parity_prices::build_aggregates(config.clone(), false).expect("cached build");
    assert_eq!(germany_usd(&stale), 25.0);

    let fresh = parity_prices::build_aggregates(config.clone(), true).expect("refreshed build");
    assert_eq!(germany_usd(&fresh), 50.0);

    let after = parity_prices::build_aggregates(config, false).expect("cached build");
    assert_eq!(germany_usd(&after), 50.0);
}

#[test]
fn missing_price_columns_fail_without_cache_writes() {
    let dir = tempdir().expect("temporary directory");
    write_sheet(
        &dir.path().join("data.xlsx"),
        &["brand", "country", "pack", "exchange_rate-2021"],
        &[vec![Text("Aspira"), Text("germany"), Text("10mg"), Number(4.0)]],
    );
    write_ppp(dir.path());
    let config = config_for(dir.path());
    let cache_dir = config.cache_path();
    let mut pipeline = Pipeline::from_config(config).expect("pipeline");

    let err = pipeline.build(false).expect_err("schema error");

    assert_eq!(err.stage(), Some(Stage::LoadingRaw));
    assert!(matches!(err.root(), PipelineError::Schema { table, .. } if table == "prices"));
    assert!(pipeline.aggregates().is_none());
    assert!(FileStore::new(cache_dir).keys().expect("keys").is_empty());
}

#[test]
fn unit_costs_flow_from_workbook_to_aggregate() {
    let dir = tempdir().expect("temporary directory");
    write_sheet(
        &dir.path().join("data.xlsx"),
        &["Brand", "Country", "Pack", "Price-2021", "Exchange_Rate-2021", "2021-Cost_Per_Unit"],
        &[
            vec![Text("Aspira"), Text("Germany"), Text("10mg"), Number(100.0), Number(4.0), Number(10.0)],
            vec![Text("Aspira"), Text("Japan"), Text("10mg"), Number(3000.0), Number(120.0), Blank],
        ],
    );
    write_ppp(dir.path());

    let aggregates = parity_prices::build_aggregates(config_for(dir.path()), false).expect("built");

    let aspira = find_brand(&aggregates, "Aspira").expect("Aspira aggregated");
    let germany = &aspira.series[0].points[0];
    assert_eq!(aspira.series[0].country, "germany");
    assert_eq!(germany.cost_per_unit, Some(10.0));
    assert_eq!(germany.usd_cost_per_unit, Some(2.5));
    assert_eq!(germany.ppp_cost_per_unit, Some(12.5));
    let japan = &aspira.series[1].points[0];
    assert_eq!(japan.cost_per_unit, None);
    assert_eq!(japan.usd_cost_per_unit, None);
}

#[test]
fn colliding_headers_fail_at_loading() {
    let dir = tempdir().expect("temporary directory");
    write_sheet(
        &dir.path().join("data.xlsx"),
        &["brand", "country", "pack", "Price-2021", "2021-Price", "exchange_rate-2021"],
        &[vec![
            Text("Aspira"),
            Text("germany"),
            Text("10mg"),
            Number(100.0),
            Number(90.0),
            Number(4.0),
        ]],
    );
    write_ppp(dir.path());
    let mut pipeline = Pipeline::from_config(config_for(dir.path())).expect("pipeline");

    let err = pipeline.build(false).expect_err("ambiguous header");

    assert_eq!(err.stage(), Some(Stage::LoadingRaw));
    assert!(matches!(err.root(), PipelineError::Schema { message, .. } if message.contains("price-2021")));
}

#[test]
fn missing_source_file_is_reported() {
    let dir = tempdir().expect("temporary directory");
    write_ppp(dir.path());
    let mut pipeline = Pipeline::from_config(config_for(dir.path())).expect("pipeline");

    let err = pipeline.build(false).expect_err("missing input");

    assert!(matches!(err.root(), PipelineError::MissingInput(path) if path.ends_with("data.xlsx")));
}

#[test]
fn corrupt_cached_aggregate_is_rebuilt() {
    let dir = tempdir().expect("temporary directory");
    write_prices(dir.path(), 100.0);
    write_ppp(dir.path());
    let config = config_for(dir.path());
    let expected = parity_prices::build_aggregates(config.clone(), false).expect("initial build");

    let store = FileStore::new(config.cache_path());
    fs::write(store.dir().join(format!("{AGGREGATE_KEY}.json")), b"[{\"brand\":").expect("corrupted");

    let mut pipeline = Pipeline::from_config(config).expect("pipeline");
    let rebuilt = pipeline.build(false).expect("rebuilt").to_vec();

    assert_eq!(rebuilt, expected);
    assert_eq!(pipeline.report().rebuilt, vec![Stage::Aggregating]);
}

#[test]
fn enriched_records_round_trip_through_aggregate() {
    let dir = tempdir().expect("temporary directory");
    write_prices(dir.path(), 100.0);
    write_ppp(dir.path());
    let config = config_for(dir.path());
    let mut pipeline = Pipeline::from_config(config).expect("pipeline");
    pipeline.build(false).expect("built");

    let enrichment: parity_prices::enrich::Enrichment = pipeline
        .cache()
        .lookup(ENRICHED_KEY)
        .expect("decoded")
        .expect("enriched artifact cached");
    let records = enrichment.records;
    assert_eq!(records.len(), 4);

    let restored = unaggregate(&aggregate(&records).expect("aggregated"));
    assert_eq!(sorted(records.clone()), sorted(restored));

    let exposed = unaggregate(pipeline.aggregates().expect("ready"));
    assert_eq!(sorted(records), sorted(exposed));
}

#[test]
fn export_writes_one_sheet_per_brand() {
    let dir = tempdir().expect("temporary directory");
    write_prices(dir.path(), 100.0);
    write_ppp(dir.path());
    let aggregates =
        parity_prices::build_aggregates(config_for(dir.path()), false).expect("built");

    let output = dir.path().join("export.xlsx");
    export::export_workbook(&output, &aggregates).expect("exported");

    let coravin = excel_read::read_table(&output, "Coravin", Some("Coravin")).expect("sheet read");
    assert_eq!(coravin.columns, export::EXPORT_COLUMNS.map(String::from).to_vec());
    assert_eq!(coravin.rows.len(), 2);
    assert_eq!(coravin.rows[0][0], Cell::Text("japan".into()));
    assert_eq!(coravin.rows[0][5], Cell::Number(25.0));
    assert!(coravin.rows[0].get(6).is_none_or(Cell::is_empty));

    let aspira = excel_read::read_table(&output, "Aspira", Some("Aspira")).expect("sheet read");
    assert_eq!(aspira.rows.len(), 2);
}

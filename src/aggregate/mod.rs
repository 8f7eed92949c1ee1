use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use crate::model::{BrandAggregate, EnrichedRecord, PackSeries, YearPoint};

/// Name reported when aggregation meets two records with the same key.
pub const ENRICHED_TABLE: &str = "enriched";

/// Groups enriched records by brand, then by (country, pack), with the years
/// of each series in ascending order.
///
/// The result holds exactly the information of the input: [`unaggregate`]
/// rebuilds the same records. Two records sharing a natural key cannot be
/// represented and are rejected.
pub fn aggregate(records: &[EnrichedRecord]) -> Result<Vec<BrandAggregate>> {
    let mut brands: BTreeMap<&str, BTreeMap<(&str, &str), BTreeMap<i32, YearPoint>>> =
        BTreeMap::new();

    for record in records {
        let years = brands
            .entry(record.brand.as_str())
            .or_default()
            .entry((record.country.as_str(), record.pack.as_str()))
            .or_default();

        if years.contains_key(&record.year) {
            return Err(PipelineError::integrity(
                ENRICHED_TABLE,
                format!("duplicate record for {}", record.key()),
            ));
        }
        years.insert(record.year, point_from_record(record));
    }

    Ok(brands
        .into_iter()
        .map(|(brand, series)| BrandAggregate {
            brand: brand.to_string(),
            series: series
                .into_iter()
                .map(|((country, pack), points)| PackSeries {
                    country: country.to_string(),
                    pack: pack.to_string(),
                    points: points.into_values().collect(),
                })
                .collect(),
        })
        .collect())
}

/// Flattens aggregates back into enriched records, brand by brand and series
/// by series.
pub fn unaggregate(aggregates: &[BrandAggregate]) -> Vec<EnrichedRecord> {
    aggregates
        .iter()
        .flat_map(|aggregate| {
            aggregate.series.iter().flat_map(move |series| {
                series.points.iter().map(move |point| EnrichedRecord {
                    brand: aggregate.brand.clone(),
                    country: series.country.clone(),
                    pack: series.pack.clone(),
                    year: point.year,
                    price: point.price,
                    exchange_rate: point.exchange_rate,
                    usd_price: point.usd_price,
                    ppp_price: point.ppp_price,
                    mfn_price: point.mfn_price,
                    cost_per_unit: point.cost_per_unit,
                    usd_cost_per_unit: point.usd_cost_per_unit,
                    ppp_cost_per_unit: point.ppp_cost_per_unit,
                })
            })
        })
        .collect()
}

/// Aggregate of a single brand, if present.
pub fn find_brand<'a>(aggregates: &'a [BrandAggregate], brand: &str) -> Option<&'a BrandAggregate> {
    aggregates.iter().find(|aggregate| aggregate.brand == brand)
}

fn point_from_record(record: &EnrichedRecord) -> YearPoint {
    YearPoint {
        year: record.year,
        price: record.price,
        exchange_rate: record.exchange_rate,
        usd_price: record.usd_price,
        ppp_price: record.ppp_price,
        mfn_price: record.mfn_price,
        cost_per_unit: record.cost_per_unit,
        usd_cost_per_unit: record.usd_cost_per_unit,
        ppp_cost_per_unit: record.ppp_cost_per_unit,
    }
}

//! Merges long-format price facts with PPP rates and derives USD, PPP and
//! MFN prices.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::model::{DroppedRow, EnrichedRecord, PppRate, PriceFact, Table};

/// Column holding the country name in the PPP table.
pub const PPP_COUNTRY_COLUMN: &str = "country";

/// Declared shape of the PPP table: a country column and one column per year.
#[derive(Debug, Clone, PartialEq)]
pub struct PppLayout {
    pub years: Vec<i32>,
}

/// A [`PppLayout`] matched against a concrete table header.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPpp {
    pub country: usize,
    pub years: Vec<(i32, usize)>,
}

impl PppLayout {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            years: config.years.clone(),
        }
    }

    pub fn resolve(&self, table: &Table) -> Result<ResolvedPpp> {
        let country = table.column_index(PPP_COUNTRY_COLUMN).ok_or_else(|| {
            PipelineError::schema(&table.name, format!("missing '{PPP_COUNTRY_COLUMN}' column"))
        })?;

        let years: Vec<(i32, usize)> = self
            .years
            .iter()
            .filter_map(|&year| table.column_index(&year.to_string()).map(|idx| (year, idx)))
            .collect();

        if years.is_empty() {
            return Err(PipelineError::schema(
                &table.name,
                format!("no year columns found for years {:?}", self.years),
            ));
        }
        if years.len() < self.years.len() {
            warn!(
                table = %table.name,
                found = years.len(),
                declared = self.years.len(),
                "PPP table lacks some declared years; those years have no PPP rate"
            );
        }

        Ok(ResolvedPpp { country, years })
    }
}

/// Melts the wide PPP table into one [`PppRate`] per country and year.
///
/// Blank cells yield no rate. Two values for the same (country, year) are a
/// data integrity error, even when one of them is unusable. Non-positive
/// rates are then discarded with a warning.
pub fn melt_ppp(table: &Table, layout: &PppLayout) -> Result<Vec<PppRate>> {
    let resolved = layout.resolve(table)?;
    let mut seen: BTreeSet<(String, i32)> = BTreeSet::new();
    let mut rates: BTreeMap<(String, i32), PppRate> = BTreeMap::new();

    for row in &table.rows {
        let Some(country) = Table::cell(row, resolved.country).as_text() else {
            continue;
        };
        for &(year, column) in &resolved.years {
            let Some(ppp_rate) = Table::cell(row, column).as_number() else {
                continue;
            };
            let key = (country.clone(), year);
            if !seen.insert(key.clone()) {
                return Err(PipelineError::integrity(
                    &table.name,
                    format!("duplicate PPP rate for ({country}, {year})"),
                ));
            }
            if ppp_rate <= 0.0 {
                warn!(table = %table.name, %country, year, ppp_rate, "non-positive PPP rate discarded");
                continue;
            }
            rates.insert(
                key,
                PppRate {
                    country: country.clone(),
                    year,
                    ppp_rate,
                },
            );
        }
    }

    debug!(table = %table.name, rates = rates.len(), "melted PPP table");
    Ok(rates.into_values().collect())
}

/// Knobs applied before the join.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnrichOptions {
    /// Brand-years priced in fewer countries are excluded. `0` and `1` keep
    /// everything.
    pub min_countries: usize,
    /// Country → donor country whose exchange rate fills a missing one.
    pub rate_fallbacks: BTreeMap<String, String>,
}

impl EnrichOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            min_countries: config.min_countries,
            rate_fallbacks: config.normalized_fallbacks(),
        }
    }
}

/// Output of the enrichment stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Enrichment {
    pub records: Vec<EnrichedRecord>,
    /// Rows removed because their prices could not be computed.
    pub dropped: Vec<DroppedRow>,
}

/// Left-joins the price facts against the PPP rates on (country, year) and
/// computes the derived prices.
///
/// Every fact survives the join; a fact without a PPP rate gets
/// `ppp_price = None`. Facts whose USD price cannot be computed are dropped
/// and listed in [`Enrichment::dropped`].
pub fn enrich(facts: &[PriceFact], rates: &[PppRate], options: &EnrichOptions) -> Result<Enrichment> {
    let ppp_index = index_rates(rates)?;
    let facts = apply_rate_fallbacks(facts, &options.rate_fallbacks);
    let facts = filter_sparse_brand_years(facts, options.min_countries);

    let mut enrichment = Enrichment::default();
    for fact in &facts {
        let ppp_rate = ppp_index.get(&(fact.country.as_str(), fact.year)).copied();
        match compute(fact, ppp_rate) {
            Ok(record) => enrichment.records.push(record),
            Err(err) => {
                warn!(error = %err, "dropping price row");
                enrichment.dropped.push(DroppedRow {
                    key: fact.key(),
                    reason: err.to_string(),
                });
            }
        }
    }

    assign_mfn_prices(&mut enrichment.records);

    info!(
        records = enrichment.records.len(),
        dropped = enrichment.dropped.len(),
        "enriched price facts"
    );
    Ok(enrichment)
}

fn index_rates(rates: &[PppRate]) -> Result<BTreeMap<(&str, i32), f64>> {
    let mut index = BTreeMap::new();
    for rate in rates {
        if index
            .insert((rate.country.as_str(), rate.year), rate.ppp_rate)
            .is_some()
        {
            return Err(PipelineError::integrity(
                crate::source::PPP_TABLE,
                format!("duplicate PPP rate for ({}, {})", rate.country, rate.year),
            ));
        }
    }
    Ok(index)
}

/// Computes the derived prices for a single fact.
pub fn compute(fact: &PriceFact, ppp_rate: Option<f64>) -> Result<EnrichedRecord> {
    let failure = |message: String| PipelineError::Computation {
        key: fact.key().to_string(),
        message,
    };

    if fact.price < 0.0 {
        return Err(failure(format!("negative price {}", fact.price)));
    }
    let exchange_rate = match fact.exchange_rate {
        Some(rate) if rate > 0.0 => rate,
        Some(rate) => return Err(failure(format!("exchange rate {rate} is not positive"))),
        None => return Err(failure("exchange rate missing".to_string())),
    };

    if let Some(cost) = fact.cost_per_unit.filter(|cost| *cost < 0.0) {
        return Err(failure(format!("negative cost per unit {cost}")));
    }

    let usd_price = fact.price / exchange_rate;
    // usd_price * (exchange_rate / ppp_rate), i.e. the local price in
    // international dollars.
    let ppp_price = ppp_rate.map(|ppp_rate| fact.price / ppp_rate);
    let usd_cost_per_unit = fact.cost_per_unit.map(|cost| cost / exchange_rate);
    let ppp_cost_per_unit = fact
        .cost_per_unit
        .zip(ppp_rate)
        .map(|(cost, ppp_rate)| cost / ppp_rate);

    for (label, value) in [
        ("usd_price", Some(usd_price)),
        ("ppp_price", ppp_price),
        ("usd_cost_per_unit", usd_cost_per_unit),
        ("ppp_cost_per_unit", ppp_cost_per_unit),
    ] {
        if let Some(value) = value.filter(|value| !value.is_finite()) {
            return Err(failure(format!("{label} is not finite ({value})")));
        }
    }

    Ok(EnrichedRecord {
        brand: fact.brand.clone(),
        country: fact.country.clone(),
        pack: fact.pack.clone(),
        year: fact.year,
        price: fact.price,
        exchange_rate,
        usd_price,
        ppp_price,
        mfn_price: None,
        cost_per_unit: fact.cost_per_unit,
        usd_cost_per_unit,
        ppp_cost_per_unit,
    })
}

/// Fills missing exchange rates from the configured donor country for the
/// same year. The donor rate is the first positive rate in key order.
fn apply_rate_fallbacks(facts: &[PriceFact], fallbacks: &BTreeMap<String, String>) -> Vec<PriceFact> {
    let mut facts = facts.to_vec();
    if fallbacks.is_empty() {
        return facts;
    }

    let donors: BTreeSet<&str> = fallbacks.values().map(String::as_str).collect();
    let mut donor_rates: BTreeMap<(String, i32), f64> = BTreeMap::new();
    for fact in &facts {
        if let Some(rate) = fact.exchange_rate.filter(|rate| *rate > 0.0) {
            if donors.contains(fact.country.as_str()) {
                donor_rates.entry((fact.country.clone(), fact.year)).or_insert(rate);
            }
        }
    }

    for fact in &mut facts {
        if fact.exchange_rate.is_some() {
            continue;
        }
        let Some(donor) = fallbacks.get(&fact.country) else {
            continue;
        };
        if let Some(rate) = donor_rates.get(&(donor.clone(), fact.year)) {
            debug!(key = %fact.key(), %donor, rate, "exchange rate filled from donor country");
            fact.exchange_rate = Some(*rate);
        }
    }
    facts
}

/// Removes brand-years priced in fewer than `min_countries` countries.
fn filter_sparse_brand_years(facts: Vec<PriceFact>, min_countries: usize) -> Vec<PriceFact> {
    if min_countries <= 1 {
        return facts;
    }

    let mut coverage: BTreeMap<(&str, i32), BTreeSet<&str>> = BTreeMap::new();
    for fact in &facts {
        coverage
            .entry((fact.brand.as_str(), fact.year))
            .or_default()
            .insert(fact.country.as_str());
    }
    let sparse: BTreeSet<(String, i32)> = coverage
        .into_iter()
        .filter(|(_, countries)| countries.len() < min_countries)
        .map(|((brand, year), _)| (brand.to_string(), year))
        .collect();

    if sparse.is_empty() {
        return facts;
    }
    info!(brand_years = sparse.len(), min_countries, "excluding sparsely covered brand-years");

    facts
        .into_iter()
        .filter(|fact| !sparse.contains(&(fact.brand.clone(), fact.year)))
        .collect()
}

/// Sets the MFN reference on every record: the second-lowest PPP price among
/// countries for the same brand, pack and year, or the lowest when only one
/// country has a PPP price.
fn assign_mfn_prices(records: &mut [EnrichedRecord]) {
    let mut groups: BTreeMap<(String, String, i32), Vec<f64>> = BTreeMap::new();
    for record in records.iter() {
        if let Some(ppp_price) = record.ppp_price {
            groups
                .entry((record.brand.clone(), record.pack.clone(), record.year))
                .or_default()
                .push(ppp_price);
        }
    }

    let references: BTreeMap<(String, String, i32), f64> = groups
        .into_iter()
        .filter_map(|(key, mut prices)| {
            prices.sort_by(f64::total_cmp);
            let reference = prices.get(1).or_else(|| prices.first()).copied()?;
            Some((key, reference))
        })
        .collect();

    for record in records.iter_mut() {
        let key = (record.brand.clone(), record.pack.clone(), record.year);
        record.mfn_price = references.get(&key).copied();
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Placeholder substituted with the four-digit year in field templates.
pub const YEAR_PLACEHOLDER: &str = "{year}";

/// Names of the columns identifying a price row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdColumns {
    pub brand: String,
    pub country: String,
    pub pack: String,
}

impl Default for IdColumns {
    fn default() -> Self {
        Self {
            brand: "brand".to_string(),
            country: "country".to_string(),
            pack: "pack".to_string(),
        }
    }
}

/// Runtime configuration for a pipeline run. Every field has a default so a
/// partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the source workbooks.
    pub data_root: PathBuf,
    /// Price workbook, relative to `data_root`.
    pub price_file: PathBuf,
    /// PPP workbook, relative to `data_root`.
    pub ppp_file: PathBuf,
    /// Worksheet to read from the price workbook; first sheet when unset.
    pub price_sheet: Option<String>,
    /// Worksheet to read from the PPP workbook; first sheet when unset.
    pub ppp_sheet: Option<String>,
    /// Cache directory. Defaults to `<data_root>/cache`.
    pub cache_dir: Option<PathBuf>,
    /// Supported years, used for both the price and the PPP table.
    pub years: Vec<i32>,
    /// Column template for the local price, e.g. `price-{year}`.
    pub price_template: String,
    /// Column template for the exchange rate, e.g. `exchange_rate-{year}`.
    pub exchange_rate_template: String,
    /// Column template for the optional unit cost, e.g. `cost_per_unit-{year}`.
    pub cost_per_unit_template: String,
    pub id_columns: IdColumns,
    /// Brand-years priced in fewer countries than this are excluded.
    pub min_countries: usize,
    /// Country → donor country whose exchange rate fills a missing one.
    pub rate_fallbacks: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            price_file: PathBuf::from("data.xlsx"),
            ppp_file: PathBuf::from("ppp_2020_2023.xlsx"),
            price_sheet: None,
            ppp_sheet: None,
            cache_dir: None,
            years: (2020..=2023).collect(),
            price_template: "price-{year}".to_string(),
            exchange_rate_template: "exchange_rate-{year}".to_string(),
            cost_per_unit_template: "cost_per_unit-{year}".to_string(),
            id_columns: IdColumns::default(),
            min_countries: 1,
            rate_fallbacks: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration from a JSON document on disk.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput(path.to_path_buf()));
        }
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        debug!(path = %path.display(), "loaded configuration");
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that cannot drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.years.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one year must be configured".into(),
            ));
        }
        for (label, template) in [
            ("price_template", &self.price_template),
            ("exchange_rate_template", &self.exchange_rate_template),
            ("cost_per_unit_template", &self.cost_per_unit_template),
        ] {
            if !template.contains(YEAR_PLACEHOLDER) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{label} '{template}' lacks the {YEAR_PLACEHOLDER} placeholder"
                )));
            }
        }
        if self.min_countries == 0 {
            return Err(PipelineError::InvalidConfig(
                "min_countries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn price_path(&self) -> PathBuf {
        self.data_root.join(&self.price_file)
    }

    pub fn ppp_path(&self) -> PathBuf {
        self.data_root.join(&self.ppp_file)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.data_root.join("cache"))
    }

    /// Fallback map with country names normalised the same way as the tables.
    pub fn normalized_fallbacks(&self) -> BTreeMap<String, String> {
        self.rate_fallbacks
            .iter()
            .map(|(country, donor)| (normalize_country(country), normalize_country(donor)))
            .collect()
    }
}

/// Countries are joined case-insensitively.
pub fn normalize_country(raw: &str) -> String {
    raw.trim().to_lowercase()
}

//! Orchestration of a pipeline run.
//!
//! Stages are nested lazily: the aggregate is looked up first and earlier
//! stages only run when a later one misses the cache.

use std::cell::RefCell;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::aggregate;
use crate::cache::{CacheManager, CacheStore, FileStore};
use crate::config::PipelineConfig;
use crate::enrich::{self, EnrichOptions, Enrichment, PppLayout};
use crate::error::Result;
use crate::model::{BrandAggregate, DroppedRow, PppRate, PriceFact, Table};
use crate::reshape::{self, PriceLayout};
use crate::source::{self, ExcelSource, TableSource};

/// Cache key of the raw price table.
pub const RAW_PRICES_KEY: &str = "raw_prices";
/// Cache key of the raw PPP table.
pub const RAW_PPP_KEY: &str = "raw_ppp";
/// Cache key of the long-format price facts.
pub const LONG_TABLE_KEY: &str = "long_table";
/// Cache key of the enriched records.
pub const ENRICHED_KEY: &str = "enriched_table";
/// Cache key of the aggregate handed to consumers.
pub const AGGREGATE_KEY: &str = "aggregate";

/// Working stages of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LoadingRaw,
    Reshaping,
    Enriching,
    Aggregating,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::LoadingRaw => write!(f, "loading_raw"),
            Stage::Reshaping => write!(f, "reshaping"),
            Stage::Enriching => write!(f, "enriching"),
            Stage::Aggregating => write!(f, "aggregating"),
        }
    }
}

/// Lifecycle of a [`Pipeline`]. `Running` only holds while
/// [`Pipeline::build`] executes; the stage being worked on is logged and,
/// on failure, recorded in `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Cold,
    Running,
    Ready,
    Failed { stage: Stage, reason: String },
}

/// What a run did besides producing the aggregate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildReport {
    /// Stages whose builders ran, in order of completion.
    pub rebuilt: Vec<Stage>,
    /// Rows removed during enrichment, as recorded in the enrichment
    /// artifact this run built or read. Empty when a cached aggregate made
    /// the artifact unnecessary.
    pub dropped: Vec<DroppedRow>,
}

/// Price pipeline bound to a table source and a cache store.
pub struct Pipeline<Src, S> {
    config: PipelineConfig,
    source: Src,
    cache: CacheManager<S>,
    state: PipelineState,
    aggregates: Option<Vec<BrandAggregate>>,
    report: BuildReport,
}

impl Pipeline<ExcelSource, FileStore> {
    /// Pipeline reading the configured workbooks and caching under the
    /// configured cache directory.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let source = ExcelSource::from_config(&config);
        let store = FileStore::new(config.cache_path());
        Self::new(config, source, store)
    }
}

impl<Src: TableSource, S: CacheStore> Pipeline<Src, S> {
    pub fn new(config: PipelineConfig, source: Src, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            cache: CacheManager::new(store),
            state: PipelineState::Cold,
            aggregates: None,
            report: BuildReport::default(),
        })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn cache(&self) -> &CacheManager<S> {
        &self.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The aggregate of the last successful run. Only available in
    /// [`PipelineState::Ready`].
    pub fn aggregates(&self) -> Option<&[BrandAggregate]> {
        match self.state {
            PipelineState::Ready => self.aggregates.as_deref(),
            _ => None,
        }
    }

    /// Runs the pipeline. With `refresh` every stage is rebuilt from the
    /// source tables; otherwise cached artifacts are reused.
    pub fn build(&mut self, refresh: bool) -> Result<&[BrandAggregate]> {
        self.aggregates = None;
        self.state = PipelineState::Running;
        let run = Run {
            config: &self.config,
            source: &self.source,
            cache: &self.cache,
            refresh,
            progress: RefCell::new(Progress::default()),
        };

        let outcome = run.aggregates();
        let progress = run.progress.into_inner();
        self.report = BuildReport {
            rebuilt: progress.rebuilt,
            dropped: progress.dropped,
        };

        match outcome {
            Ok(aggregates) => {
                info!(
                    brands = aggregates.len(),
                    rebuilt = self.report.rebuilt.len(),
                    "pipeline ready"
                );
                self.state = PipelineState::Ready;
                Ok(self.aggregates.insert(aggregates).as_slice())
            }
            Err(err) => {
                let stage = err.stage().or(progress.current).unwrap_or(Stage::LoadingRaw);
                warn!(%stage, error = %err, "pipeline failed");
                self.state = PipelineState::Failed {
                    stage,
                    reason: err.to_string(),
                };
                Err(err.at(stage))
            }
        }
    }
}

/// Builds the aggregate with the default file-backed pipeline.
pub fn build_aggregates(config: PipelineConfig, refresh: bool) -> Result<Vec<BrandAggregate>> {
    let mut pipeline = Pipeline::from_config(config)?;
    Ok(pipeline.build(refresh)?.to_vec())
}

#[derive(Debug, Default)]
struct Progress {
    current: Option<Stage>,
    rebuilt: Vec<Stage>,
    dropped: Vec<DroppedRow>,
}

struct Run<'a, Src, S> {
    config: &'a PipelineConfig,
    source: &'a Src,
    cache: &'a CacheManager<S>,
    refresh: bool,
    progress: RefCell<Progress>,
}

impl<Src: TableSource, S: CacheStore> Run<'_, Src, S> {
    fn enter(&self, stage: Stage) {
        info!(%stage, "entering stage");
        self.progress.borrow_mut().current = Some(stage);
    }

    fn finish(&self, stage: Stage) {
        self.progress.borrow_mut().rebuilt.push(stage);
    }

    fn cached<T, F>(&self, key: &str, stage: Stage, builder: F) -> Result<T>
    where
        T: Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        self.cache
            .get_or_build(key, self.refresh, || {
                let value = builder().map_err(|err| err.at(stage))?;
                self.finish(stage);
                Ok(value)
            })
            .map_err(|err| err.at(stage))
    }

    fn raw_tables(&self) -> Result<(Table, Table)> {
        let prices = self.cached(RAW_PRICES_KEY, Stage::LoadingRaw, || {
            self.enter(Stage::LoadingRaw);
            source::load_price_table(self.source, &PriceLayout::from_config(self.config))
        })?;
        let ppp = self.cached(RAW_PPP_KEY, Stage::LoadingRaw, || {
            self.enter(Stage::LoadingRaw);
            source::load_ppp_table(self.source, &PppLayout::from_config(self.config))
        })?;
        Ok((prices, ppp))
    }

    fn long_table(&self, prices: &Table) -> Result<Vec<PriceFact>> {
        self.cached(LONG_TABLE_KEY, Stage::Reshaping, || {
            self.enter(Stage::Reshaping);
            reshape::reshape(prices, &PriceLayout::from_config(self.config))
        })
    }

    fn enriched(&self) -> Result<Enrichment> {
        self.cached(ENRICHED_KEY, Stage::Enriching, || {
            let (prices, ppp) = self.raw_tables()?;
            let facts = self.long_table(&prices)?;
            self.enter(Stage::Enriching);
            let rates: Vec<PppRate> = enrich::melt_ppp(&ppp, &PppLayout::from_config(self.config))?;
            enrich::enrich(&facts, &rates, &EnrichOptions::from_config(self.config))
        })
    }

    fn aggregates(&self) -> Result<Vec<BrandAggregate>> {
        self.cached(AGGREGATE_KEY, Stage::Aggregating, || {
            let enrichment = self.enriched()?;
            self.progress
                .borrow_mut()
                .dropped
                .extend(enrichment.dropped.iter().cloned());
            self.enter(Stage::Aggregating);
            aggregate(&enrichment.records)
        })
    }
}

//! Core library for the parity-prices command line application.
//!
//! The library turns a wide per-brand price workbook and a PPP table into a
//! brand-keyed aggregate of local, USD and PPP-adjusted prices. Source
//! loading lives under [`source`] and [`io`], the transformation stages in
//! [`reshape`], [`enrich`] and [`aggregate`], memoization in [`cache`], and
//! the orchestration of a run in [`pipeline`].

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod enrich;
pub mod error;
pub mod export;
pub mod io;
pub mod log;
pub mod model;
pub mod pipeline;
pub mod reshape;
pub mod source;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineState, Stage, build_aggregates};

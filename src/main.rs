use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use parity_prices::export;
use parity_prices::log::init_logging;
use parity_prices::model::BrandAggregate;
use parity_prices::{Pipeline, PipelineConfig, Result};

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose)?;
    let config = cli.resolve_config()?;

    match cli.command {
        Command::Build(args) => execute_build(config, args),
        Command::Export(args) => execute_export(config, args),
    }
}

fn execute_build(config: PipelineConfig, args: BuildArgs) -> Result<()> {
    let mut pipeline = Pipeline::from_config(config)?;
    let aggregates = pipeline.build(args.refresh)?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(aggregates)?),
        OutputFormat::Table => print_table(aggregates),
    }

    for dropped in &pipeline.report().dropped {
        eprintln!("dropped {}: {}", dropped.key, dropped.reason);
    }
    Ok(())
}

fn execute_export(config: PipelineConfig, args: ExportArgs) -> Result<()> {
    let mut pipeline = Pipeline::from_config(config)?;
    let aggregates = pipeline.build(args.refresh)?;
    export::export_workbook(&args.output, aggregates)?;
    eprintln!(
        "wrote {} brand sheet(s) to {}",
        aggregates.len(),
        args.output.display()
    );
    Ok(())
}

fn print_table(aggregates: &[BrandAggregate]) {
    println!(
        "{:<20} {:<16} {:<12} {:>6} {:>12} {:>10} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "brand", "country", "pack", "year", "price", "fx", "usd", "ppp", "mfn", "unit", "unit usd",
        "unit ppp"
    );
    let optional = |value: Option<f64>| value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
    for aggregate in aggregates {
        for series in &aggregate.series {
            for point in &series.points {
                println!(
                    "{:<20} {:<16} {:<12} {:>6} {:>12.4} {:>10.4} {:>12.4} {:>12} {:>12} {:>12} {:>12} {:>12}",
                    aggregate.brand,
                    series.country,
                    series.pack,
                    point.year,
                    point.price,
                    point.exchange_rate,
                    point.usd_price,
                    optional(point.ppp_price),
                    optional(point.mfn_price),
                    optional(point.cost_per_unit),
                    optional(point.usd_cost_per_unit),
                    optional(point.ppp_cost_per_unit),
                );
            }
        }
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Compare brand prices across countries in USD and PPP terms."
)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the source workbooks.
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// Directory for cached artifacts.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build (or load from cache) the brand aggregate and print it.
    Build(BuildArgs),
    /// Write the per-brand records to an Excel workbook.
    Export(ExportArgs),
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Rebuild every stage from the source workbooks.
    #[arg(long)]
    refresh: bool,

    /// Output representation.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(clap::Args)]
struct ExportArgs {
    /// Output workbook path.
    #[arg(long)]
    output: PathBuf,

    /// Rebuild every stage from the source workbooks.
    #[arg(long)]
    refresh: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

impl Cli {
    fn resolve_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(data_root) = &self.data_root {
            config.data_root = data_root.clone();
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = Some(cache_dir.clone());
        }
        Ok(config)
    }
}

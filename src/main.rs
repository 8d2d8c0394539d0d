use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use stockcast::{
    commands::{benchmark, copy_datasets, fetch, init_store, predict, prepare, render},
    context::AppContext,
    models::PriceField,
    plot,
    providers::ProviderKind,
};

const DEFAULT_PRICE_HISTORY_FILE: &str = "data/price-history.bin";
const DEFAULT_PAGE_FILE: &str = "data/forecast.html";

#[derive(Parser)]
#[command(name = "stockcast")]
#[command(about = "Stock price forecasting with a hosted DeepAR endpoint")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily price history and save a snapshot
    Fetch {
        /// Data provider
        #[arg(long, value_enum, default_value_t = ProviderKind::Yahoo)]
        provider: ProviderKind,
        /// First day to fetch (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day to fetch (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
        /// Tickers to fetch instead of SUPPORTED_TICKERS
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,
        /// Destination for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Also write the raw bars as CSV
        #[arg(long, value_name = "PATH")]
        csv: Option<PathBuf>,
    },
    /// Split the snapshot into train/test/valid datasets and training channels
    Prepare {
        /// Price history snapshot, or raw bars when the path ends in .csv
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Ignore bars before this day
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Ignore bars after this day
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Price fields written as dynamic features in the channels
        #[arg(long, value_delimiter = ',', value_parser = parse_price_field)]
        features: Vec<PriceField>,
        /// Store prefix for the training channels
        #[arg(long, default_value = prepare::DEFAULT_CHANNEL_PATH)]
        channel_path: String,
        /// Share of each series used for the training channel
        #[arg(long, default_value_t = prepare::DEFAULT_TRAIN_PART)]
        train_part: f64,
        /// Number of expanding test windows
        #[arg(long, default_value_t = prepare::DEFAULT_TEST_WINDOWS)]
        test_windows: usize,
    },
    /// Write SMA benchmark datasets from the stored test and valid datasets
    Benchmark {
        /// Moving average window (defaults to BENCHMARK_WINDOW)
        #[arg(long)]
        window: Option<usize>,
    },
    /// Invoke the forecasting endpoint for a ticker, a start date, or both
    Predict {
        #[arg(long)]
        ticker: Option<String>,
        /// Forecast start (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)
        #[arg(long)]
        start_date: Option<String>,
        /// Write the raw endpoint response here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Render stored forecasts into an HTML page
    Render {
        /// Forecast record names (defaults to every configured ticker)
        #[arg(value_delimiter = ',', num_args = 0..)]
        records: Vec<String>,
        /// Observed points shown before each forecast
        #[arg(long, default_value_t = 60)]
        history: usize,
        /// Draw the individual sample paths when present
        #[arg(long)]
        samples: bool,
        #[arg(long, default_value = render::DEFAULT_PAGE_TITLE)]
        title: String,
        /// Chart width in pixels
        #[arg(long, default_value_t = plot::DEFAULT_WIDTH)]
        width: f64,
        /// Chart height in pixels
        #[arg(long, default_value_t = plot::DEFAULT_HEIGHT)]
        height: f64,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Also upload the page to the data store under this key
        #[arg(long, value_name = "KEY")]
        publish: Option<String>,
    },
    /// Copy per-ticker datasets from another store into DATA_STORE
    CopyDatasets {
        /// Source store (directory or http(s) URL)
        source: String,
        #[arg(long, default_value = copy_datasets::DEFAULT_SOURCE_PREFIX)]
        source_prefix: String,
        /// Datasets to copy (defaults to test, valid and benchmark)
        #[arg(long, value_delimiter = ',')]
        datasets: Vec<String>,
    },
    /// Create a uniquely named local store directory
    InitStore {
        #[arg(long, default_value = "data")]
        parent: PathBuf,
        #[arg(long, default_value = init_store::DEFAULT_STORE_PREFIX)]
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Commands::InitStore { parent, prefix } = &command {
        init_store::run(parent, prefix).await?;
        return Ok(());
    }

    let app_context = AppContext::from_env()?;
    info!("Starting stockcast. Forecasts are not financial advice.");

    match command {
        Commands::Fetch {
            provider,
            start,
            end,
            tickers,
            output,
            csv,
        } => {
            let options = fetch::FetchOptions {
                provider,
                start,
                end,
                tickers,
                output: resolve_price_history_path(output),
                csv,
            };
            fetch::run(&app_context, &options).await?;
        }
        Commands::Prepare {
            data_file,
            start,
            end,
            features,
            channel_path,
            train_part,
            test_windows,
        } => {
            let options = prepare::PrepareOptions {
                data_file: resolve_price_history_path(data_file),
                start,
                end,
                features,
                channel_path,
                train_part,
                num_test_windows: test_windows,
            };
            prepare::run(&app_context, &options).await?;
        }
        Commands::Benchmark { window } => {
            benchmark::run(&app_context, window).await?;
        }
        Commands::Predict {
            ticker,
            start_date,
            output,
        } => {
            let options = predict::PredictOptions {
                ticker,
                start_date,
                output,
            };
            predict::run(&app_context, &options).await?;
        }
        Commands::Render {
            records,
            history,
            samples,
            title,
            width,
            height,
            output,
            publish,
        } => {
            let options = render::RenderOptions {
                records,
                history,
                show_samples: samples,
                title,
                width,
                height,
                output: output.unwrap_or_else(|| PathBuf::from(DEFAULT_PAGE_FILE)),
                publish_key: publish,
            };
            render::run(&app_context, &options).await?;
        }
        Commands::CopyDatasets {
            source,
            source_prefix,
            datasets,
        } => {
            let options = copy_datasets::CopyOptions {
                source,
                source_prefix,
                datasets: if datasets.is_empty() {
                    copy_datasets::default_datasets()
                } else {
                    datasets
                },
            };
            copy_datasets::run(&app_context, &options).await?;
        }
        Commands::InitStore { .. } => {}
    }

    Ok(())
}

fn parse_price_field(raw: &str) -> Result<PriceField, String> {
    PriceField::parse(raw).map_err(|err| err.to_string())
}

fn resolve_price_history_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_PRICE_HISTORY_FILE)
}

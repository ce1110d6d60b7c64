// src/main.rs
use anyhow::Result;
use api_optimizer::{
    BatchOptions, BatchRequest, EngineConfig, HttpTransport, Priority, RequestEngine,
    RequestOptions,
};
use clap::Parser;
use log::info;
use std::sync::Arc;

/// Issue one or more GET requests through the optimization engine and print
/// the responses plus engine statistics.
#[derive(Parser, Debug)]
#[command(name = "api-optimizer", about = "Request optimization engine demo")]
struct Cli {
    /// URLs to fetch
    #[arg(required = true)]
    urls: Vec<String>,

    /// Request priority: low, medium or high
    #[arg(long, default_value = "medium")]
    priority: String,

    /// Fan the URLs out as a batch instead of sequential requests
    #[arg(long)]
    batch: bool,

    /// Skip the cache lookup
    #[arg(long)]
    bypass_cache: bool,
}

fn setup_logging() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    setup_logging().expect("Failed to initialize logging");

    let cli = Cli::parse();
    let priority: Priority = cli
        .priority
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let config = EngineConfig::from_env();
    config.validate_and_log();

    let transport = Arc::new(HttpTransport::new()?);
    let engine = Arc::new(RequestEngine::new(config, transport));
    engine.start();

    if cli.batch {
        let requests: Vec<BatchRequest> =
            cli.urls.iter().map(BatchRequest::get).collect();
        let options = BatchOptions {
            priority,
            ..BatchOptions::default()
        };
        let results = engine.batch_requests(requests, options).await;
        for (url, result) in cli.urls.iter().zip(results) {
            match result {
                Ok(body) => println!("{}\n{}", url, serde_json::to_string_pretty(&body)?),
                Err(err) => eprintln!("{} failed: {}", url, err),
            }
        }
    } else {
        for url in &cli.urls {
            let options = RequestOptions {
                priority,
                bypass_cache: cli.bypass_cache,
                ..RequestOptions::default()
            };
            match engine.request(url, options).await {
                Ok(body) => println!("{}\n{}", url, serde_json::to_string_pretty(&body)?),
                Err(err) => eprintln!("{} failed: {}", url, err),
            }
        }
    }

    let stats = engine.get_stats().await;
    info!("engine stats: {}", stats);

    engine.destroy().await;
    Ok(())
}

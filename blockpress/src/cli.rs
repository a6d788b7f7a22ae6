/// # blockpress CLI Interface (Module)
///
/// Command parsing and process-level wiring for blockpress. All pipeline logic lives in
/// [`blockpress-core`]; this module loads configuration, builds the concrete clients and
/// hands them to the core.
///
/// ## Commands
/// - `sync --config <file>`: run one synchronisation and print the report
/// - `serve --config <file>`: start the HTTP server and the scheduler
///
/// For programmatic or test use, call [`run`] with a constructed [`Cli`].
///
/// [`blockpress-core`]: ../../blockpress_core/
use crate::load_config::{load_config, CliConfig};
use crate::notion::NotionClient;
use crate::server::{serve, SyncService};
use crate::wechat::WeChatClient;
use anyhow::Result;
use blockpress_core::media::HttpMediaFetcher;
use blockpress_core::synchronise::{SynchroniseReport, Synchroniser};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// CLI for blockpress: publish unsynced Notion documents to a WeChat official account.
#[derive(Parser)]
#[clap(
    name = "blockpress",
    version,
    about = "Publish unsynced Notion documents to a WeChat official account"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one synchronisation and print the report
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Serve the health and trigger endpoints and run the scheduler
    Serve {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "sync", "Starting synchronisation run");
            let source = NotionClient::new(&config.source);
            let wechat = WeChatClient::new(&config.publish);
            let fetcher = HttpMediaFetcher::new();
            match Synchroniser::new(&source, &fetcher, &wechat, &wechat, &config.sync)
                .run()
                .await
            {
                Ok(report) => {
                    tracing::info!(command = "sync", processed = report.processed(), "Synchronisation complete");
                    print_report(&report);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::Serve { config } => {
            let CliConfig {
                source,
                publish,
                server,
                sync,
            } = load_config(config)?;
            tracing::info!(command = "serve", port = server.port, "Starting server");
            let wechat = WeChatClient::new(&publish);
            let service = Arc::new(SyncService::new(
                NotionClient::new(&source),
                HttpMediaFetcher::new(),
                wechat.clone(),
                wechat,
                sync,
            ));
            serve(
                service,
                server.port,
                Duration::from_secs(server.schedule_interval_secs),
            )
            .await
        }
    }
}

fn print_report(report: &SynchroniseReport) {
    println!(
        "Synchronise report: {} published, {} skipped",
        report.processed(),
        report.skipped.len()
    );
    for published in &report.published {
        println!(
            "  published  {}  {:?}  (publish id {})",
            published.document_id, published.title, published.publish_id
        );
    }
    for skipped in &report.skipped {
        println!(
            "  skipped    {}  at {}: {}",
            skipped.document_id, skipped.stage, skipped.reason
        );
    }
}

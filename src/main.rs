//! koistats - Cached NASA Kepler KOI statistics
//!
//! Prints aggregate KOI statistics from a durable local cache, refreshing
//! them from the NASA Exoplanet Archive when stale.

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use koistats::cache::{RefreshEvent, StatsCache};
use koistats::cli::{Cli, Command};
use koistats::config::Config;
use koistats::export;
use koistats::refresh::{RefreshHandle, RefreshMessage};

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints statistics, waiting for a background refresh to persist if one started
async fn print_stats(
    cache: &StatsCache,
    force: bool,
    background: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !background {
        return Ok(print_json(&cache.get(force).await?)?);
    }

    let mut events = cache.subscribe();
    let stats = cache.get_with_background_refresh().await?;
    print_json(&stats)?;

    // The process exits after printing, so let a spawned refresh finish first
    if stats.is_from_cache && !cache.is_fresh(&stats) {
        match events.recv().await {
            Ok(RefreshEvent::Completed(entry)) if !entry.is_from_cache => {
                tracing::info!(
                    total = entry.stats.total,
                    "background refresh stored new statistics"
                );
            }
            Ok(_) | Err(_) => tracing::warn!("background refresh did not update the cache"),
        }
    }
    Ok(())
}

/// Polls until Ctrl-C, printing one JSON line per update
async fn watch(cache: StatsCache, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(interval = ?config.refresh.interval, "watching KOI statistics");

    let mut handle = RefreshHandle::spawn(cache, config.refresh.clone());
    handle.request_refresh().await;

    loop {
        tokio::select! {
            message = handle.receiver.recv() => match message {
                Some(RefreshMessage::StatsUpdated(stats)) => {
                    println!("{}", serde_json::to_string(&stats)?);
                }
                Some(RefreshMessage::RefreshError(e)) => tracing::error!("{}", e),
                Some(RefreshMessage::RefreshStarted) => tracing::debug!("poll started"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("koistats=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli)?;
    let client = config.client()?;

    match cli.command {
        Command::Stats { force, background } => {
            let cache = config.stats_cache(client);
            print_stats(&cache, force, background).await?;
        }
        Command::Info => {
            let cache = config.stats_cache(client);
            print_json(&cache.cache_info())?;
        }
        Command::Clear => {
            let cache = config.stats_cache(client);
            cache.clear();
            println!("Cache cleared");
        }
        Command::Watch { .. } => {
            let cache = config.stats_cache(client);
            watch(cache, &config).await?;
        }
        Command::Details { limit, offset } => {
            print_json(&client.fetch_details(limit, offset).await?)?;
        }
        Command::Table { limit, offset } => {
            let rows = client.fetch_table_data().await?;
            print_json(&export::paginate(&rows, limit, offset, chrono::Utc::now()))?;
        }
        Command::Export { format, output } => {
            let rows = client.fetch_table_data().await?;
            let content = export::render(&rows, format, chrono::Utc::now())?;
            match output {
                Some(path) => export::write_to(&path, &content)?,
                None => println!("{}", content),
            }
        }
        Command::Query { query } => {
            print_json(&client.execute_query(&query).await?)?;
        }
        Command::Columns => {
            print_json(&client.fetch_table_info().await?)?;
        }
        Command::Ping => {
            if client.test_connection().await {
                println!("NASA Exoplanet Archive is reachable");
            } else {
                eprintln!("NASA Exoplanet Archive is unreachable");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

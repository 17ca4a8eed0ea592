// src/main.rs
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};

use omp_directory::directory::{DirectoryFetcher, DirectorySource};
use omp_directory::storage::cache::ResultCache;
use omp_directory::storage::memory::merge_previous;
use omp_directory::view::{self, SortMode, ViewQuery};
use omp_directory::Config;

#[derive(Parser)]
#[command(name = "omp-directory", about = "Browse the open.mp server directory")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the directory and print it, merged with the last cached results.
    List {
        /// Only show servers whose name or address contains this text.
        search: Option<String>,
    },
    /// Check that a directory URL serves a usable server list.
    Check {
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env();
    let cli = Cli::parse();
    let fetcher = DirectoryFetcher::new(config.fetch_timeout(), config.max_directory_bytes);

    match cli.command {
        Command::List { search } => {
            let (mut servers, source) = fetcher
                .fetch_with_fallback(&config.directory_url, &config.fallback_path)
                .await
                .map_err(|e| {
                    error!("Failed to load server list: {}", e);
                    e
                })?;
            if source == DirectorySource::Fallback {
                warn!("Showing the local server list");
            }

            let cache = ResultCache::new(config.cache_path.clone(), config.cache_max_age());
            if let Some(cached) = cache.load() {
                merge_previous(&mut servers, &cached);
            }

            let sort = std::env::var("SORT")
                .ok()
                .map(|s| s.parse::<SortMode>())
                .transpose()?
                .unwrap_or_default();
            let query = ViewQuery {
                search: search.unwrap_or_default(),
                sort,
                ..Default::default()
            };

            let rows = view::apply(&servers, &query);
            for server in &rows {
                println!(
                    "{:<48} {:>9} {:>8}  {}",
                    server.display_name(),
                    players(server),
                    ping(server),
                    server.address()
                );
            }
            info!("{} of {} servers shown", rows.len(), servers.len());
        }
        Command::Check { url } => {
            let url = url.unwrap_or_else(|| config.directory_url.clone());
            let count = fetcher.check(&url).await?;
            println!("{} serves {} servers", url, count);
        }
    }

    Ok(())
}

// Directory entries carry a player count but nothing here probes, so an
// unknown ping prints as a dash.
fn players(server: &omp_directory::ServerRecord) -> String {
    format!("{}/{}", server.players, server.max_players)
}

fn ping(server: &omp_directory::ServerRecord) -> String {
    if server.ping.is_zero() {
        "-".to_string()
    } else {
        format!("{} ms", server.ping_ms())
    }
}

mod config;
mod error;
mod quotefs;
mod quotes;

use anyhow::Context;
use clap::Parser;
use config::{load_dotenv, Credential, QuoteConfig};
use quotefs::{Owner, QuoteFs};
use quotes::QuoteFetcher;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "randquote", version)]
#[command(about = "Prints a random quote from api-ninjas.com")]
struct Cli {
    /// Quote category, e.g. "happiness"
    category: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long, env = "RANDQUOTE_CONFIG")]
    config: Option<PathBuf>,

    /// Also print the quote's author
    #[arg(short, long)]
    author: bool,

    /// Mount a read-only filesystem with a random_quote.txt file at this directory
    #[arg(short, long, value_name = "MOUNT_POINT")]
    mount: Option<PathBuf>,

    /// Automatically unmount on process exit
    #[arg(long, alias = "auto_unmount", requires = "mount")]
    auto_unmount: bool,

    /// Allow the root user to access the filesystem
    #[arg(long, alias = "allow_root", requires = "mount")]
    allow_root: bool,
}

fn config_filter(config: &QuoteConfig) -> anyhow::Result<EnvFilter> {
    let level = config.log_level.as_deref().unwrap_or("warn");
    EnvFilter::try_new(level).with_context(|| format!("Invalid log_level {:?}", level))
}

fn init_logging(config: &QuoteConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_env("RANDQUOTE_LOG") {
        Ok(filter) => filter,
        Err(_) => config_filter(config)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = QuoteConfig::load(cli.config.as_deref())?;
    init_logging(&config)?;

    load_dotenv(Path::new(".env"))?;
    let credential = Credential::from_env(config.key_var());
    if credential.is_empty() {
        tracing::warn!("No API key in ${}, the request will most likely be refused", config.key_var());
    }

    let category = config.category(cli.category.as_deref());
    let with_author = config.with_author(cli.author);
    let fetcher = QuoteFetcher::new(config.base_url(), credential);

    if let Some(mount_point) = cli.mount {
        let owner = Owner::of(&mount_point)
            .with_context(|| format!("Cannot mount on {}", mount_point.display()))?;
        let options = quotefs::mount_options(cli.auto_unmount, cli.allow_root);
        let quote_fs = QuoteFs::new(
            fetcher,
            tokio::runtime::Handle::current(),
            category,
            with_author,
            owner,
        );
        tracing::info!("Mounting {} on {}", quotefs::QUOTE_FILE, mount_point.display());
        tokio::task::spawn_blocking(move || fuser::mount2(quote_fs, &mount_point, &options))
            .await?
            .context("Filesystem session failed")?;
        tracing::info!("Unmounted");
        return Ok(());
    }

    tracing::debug!("Fetching a quote from category {:?}", category);
    let line = if with_author {
        quotes::fetch_attributed_quote(&fetcher, category).await?
    } else {
        quotes::fetch_quote(&fetcher, category).await?
    };
    println!("{}", line);

    Ok(())
}

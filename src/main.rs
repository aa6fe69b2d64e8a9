use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;

use neuroplan_sync::app::App;
use neuroplan_sync::config::Config;
use neuroplan_sync::logging;
use neuroplan_sync::sync::Resolution;

#[derive(Parser, Debug)]
#[command(name = "neuroplan-sync")]
#[command(about = "Offline sync, cache router and response cache for NeuroPlan")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/neuroplan/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Probe connectivity and show the sync state
  Status,
  /// List queued operations in replay order
  Pending,
  /// Replay the queue, then pull server state
  Sync,
  /// Keep syncing on an interval until Ctrl-C
  Daemon,
  /// Settle operations that exhausted their retries
  Resolve {
    /// Operation id (see `pending`)
    id: Option<String>,
    /// Resolve every conflicted operation
    #[arg(long, conflicts_with = "id")]
    all: bool,
    #[arg(long, value_enum)]
    keep: Keep,
  },
  /// Serve a URL through the cache router
  Route {
    url: String,
    /// Send the request as a page navigation
    #[arg(long)]
    html: bool,
  },
  /// Manage the AI response cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
  /// Dump every local store as JSON
  Export,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Remove keys starting with a prefix (e.g. `charter:`)
  Invalidate { prefix: String },
  Stats,
  Clear,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Keep {
  Local,
  Server,
}

impl From<Keep> for Resolution {
  fn from(keep: Keep) -> Self {
    match keep {
      Keep::Local => Resolution::KeepLocal,
      Keep::Server => Resolution::KeepServer,
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let rendered =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", rendered);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let app = App::new(config)?;

  match args.command {
    Command::Status => print_json(&app.status().await?)?,
    Command::Pending => print_json(&app.pending()?)?,
    Command::Sync => match app.force_sync().await? {
      Some((drained, pulled)) => println!("{:?}\n{:?}", drained, pulled),
      None => println!("Offline, changes stay queued"),
    },
    Command::Daemon => app.run_daemon().await?,
    Command::Resolve { id, all, keep } => {
      if all {
        let resolved = app.resolve_all(keep.into())?;
        println!("Resolved {} operation(s)", resolved);
      } else {
        let id = id.ok_or_else(|| eyre!("Pass an operation id or --all"))?;
        app.resolve(&id, keep.into())?;
        println!("Resolved {}", id);
      }
    }
    Command::Route { url, html } => print_json(&app.route(&url, html).await?)?,
    Command::Cache { action } => match action {
      CacheAction::Invalidate { prefix } => {
        let removed = app.cache_invalidate(&prefix).await?;
        println!("Removed {} key(s)", removed);
      }
      CacheAction::Stats => print_json(&app.cache_stats().await?)?,
      CacheAction::Clear => {
        app.cache_clear().await?;
        println!("Response cache cleared");
      }
    },
    Command::Export => print_json(&app.export()?)?,
  }

  Ok(())
}

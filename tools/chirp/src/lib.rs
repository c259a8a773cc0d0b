pub mod app;
pub mod browser;
pub mod cassette;
pub mod config;
pub mod errors;
pub mod feed_store;
pub mod fixtures;
pub mod log_retention;
pub mod logging;
pub mod pagination;
pub mod runtime;
pub mod types;
pub mod views;

use app::App;
use cassette::{CassetteStore, Harness};
use clap::{error::ErrorKind, Parser};
use config::{load_config, AppConfig, CliOverrides};
use errors::ChirpError;
use feed_store::FeedStore;
use logging::{append_run_log, init_run_logger, structured_fallback_line, JsonlLogger};
use pagination::Cursor;
use runtime::ProductionRuntime;
use serde_json::json;
use std::sync::Arc;
use types::{FeedId, UpdateScope};

#[derive(Debug, Clone, Parser)]
#[command(name = "chirp")]
#[command(about = "Inspect chirp feeds and recorded HTTP cassettes")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    #[arg(long)]
    pub database: Option<std::path::PathBuf>,
    #[arg(long)]
    pub cassette_dir: Option<std::path::PathBuf>,
    #[arg(long)]
    pub page_size: Option<u32>,
    #[arg(long, default_value_t = false)]
    pub list_updates: bool,
    #[arg(long, requires = "list_updates")]
    pub page: Option<i64>,
    #[arg(long)]
    pub render_feed: Option<i64>,
    #[arg(long, default_value_t = false)]
    pub list_cassettes: bool,
    #[arg(long)]
    pub inspect_cassette: Option<String>,
    /// Notify the hub that a feed changed.
    #[arg(long)]
    pub ping_hub: Option<i64>,
    /// Route the hub notification through this cassette.
    #[arg(long, requires = "ping_hub")]
    pub cassette: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    ListUpdates(Option<Cursor>),
    RenderFeed(FeedId),
    ListCassettes,
    InspectCassette(String),
    PingHub(FeedId, Option<String>),
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::ListUpdates(_) => "list_updates",
            Self::RenderFeed(_) => "render_feed",
            Self::ListCassettes => "list_cassettes",
            Self::InspectCassette(_) => "inspect_cassette",
            Self::PingHub(..) => "ping_hub",
        }
    }
}

fn select_mode(cli: &Cli) -> Result<Mode, ChirpError> {
    let mut modes = Vec::new();
    if cli.list_updates {
        modes.push(Mode::ListUpdates(cli.page.map(Cursor::page)));
    }
    if let Some(feed_id) = cli.render_feed {
        modes.push(Mode::RenderFeed(FeedId(feed_id)));
    }
    if cli.list_cassettes {
        modes.push(Mode::ListCassettes);
    }
    if let Some(name) = &cli.inspect_cassette {
        modes.push(Mode::InspectCassette(name.clone()));
    }
    if let Some(feed_id) = cli.ping_hub {
        modes.push(Mode::PingHub(FeedId(feed_id), cli.cassette.clone()));
    }
    match modes.len() {
        1 => Ok(modes.remove(0)),
        _ => Err(ChirpError::Cli(
            "choose exactly one of --list-updates, --render-feed, --list-cassettes, --inspect-cassette, --ping-hub"
                .to_string(),
        )),
    }
}

pub fn run() -> Result<i32, ChirpError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| ChirpError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new()?;
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, ChirpError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                runtime.terminal.write_line(error.to_string().trim_end())?;
                return Ok(0);
            }
            _ => return Err(ChirpError::Cli(error.to_string())),
        },
    };
    let mode = select_mode(&cli)?;

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        database_path: cli.database.clone(),
        cassette_dir: cli.cassette_dir.clone(),
        page_size: cli.page_size,
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    init_run_logger(JsonlLogger {
        path: cfg.logging.path.clone(),
        max_payload_bytes: cfg.logging.max_payload_bytes,
        budget_bytes: cfg.logging.budget_bytes,
    });
    append_run_log(
        "info",
        "cli.started",
        json!({
            "mode": mode.as_str(),
            "database": cfg.database.path.display().to_string(),
            "cassette_dir": cfg.cassettes.dir.display().to_string(),
        }),
    );

    match mode {
        Mode::ListUpdates(cursor) => list_updates(runtime, &cfg, cursor)?,
        Mode::RenderFeed(feed_id) => render_feed(runtime, &cfg, feed_id)?,
        Mode::ListCassettes => {
            for name in CassetteStore::new(&cfg.cassettes.dir).list()? {
                runtime.terminal.write_line(&name)?;
            }
        }
        Mode::InspectCassette(name) => inspect_cassette(runtime, &cfg, &name)?,
        Mode::PingHub(feed_id, cassette) => ping_hub(runtime, &cfg, feed_id, cassette.as_deref())?,
    }
    Ok(0)
}

fn list_updates(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    cursor: Option<Cursor>,
) -> Result<(), ChirpError> {
    let store = FeedStore::open(&cfg.database.path)?;
    let page = store.list_feed(&UpdateScope::World, cursor, &cfg.pagination)?;
    for update in &page.items {
        runtime.terminal.write_line(&format!(
            "{}\t{}\t{}",
            update.update_id, update.author, update.text
        ))?;
    }
    runtime.terminal.write_line(&structured_fallback_line(
        "updates",
        "page",
        &format!(
            "page={}/{} total={} previous={} next={}",
            page.window.page,
            page.window.last_page,
            page.window.total,
            page.has_previous(),
            page.has_next()
        ),
    ))
}

fn render_feed(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    feed_id: FeedId,
) -> Result<(), ChirpError> {
    let store = FeedStore::open(&cfg.database.path)?;
    let feed = store
        .get_feed(feed_id)?
        .ok_or_else(|| ChirpError::NotFound(format!("feed {feed_id}")))?;
    let page = store.list_feed(&UpdateScope::Feed(feed_id), None, &cfg.pagination)?;
    let atom = views::render_atom(&feed, &page.items, &cfg.site.base_url);
    runtime.terminal.write_line(atom.trim_end())
}

fn inspect_cassette(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    name: &str,
) -> Result<(), ChirpError> {
    let cassette = CassetteStore::new(&cfg.cassettes.dir)
        .load(name)?
        .ok_or_else(|| ChirpError::CassetteNotFound(name.to_string()))?;
    runtime.terminal.write_line(&format!(
        "cassette {} ({} interactions)",
        cassette.name(),
        cassette.interactions.len()
    ))?;
    for interaction in &cassette.interactions {
        runtime.terminal.write_line(&format!(
            "{:>3} {} {} -> {} ({} bytes)",
            interaction.seq,
            interaction.request.method,
            interaction.request.uri,
            interaction.response.status,
            interaction.response.body.len()
        ))?;
    }
    Ok(())
}

fn ping_hub(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    feed_id: FeedId,
    cassette: Option<&str>,
) -> Result<(), ChirpError> {
    let store = FeedStore::open(&cfg.database.path)?;
    if store.get_feed(feed_id)?.is_none() {
        return Err(ChirpError::NotFound(format!("feed {feed_id}")));
    }
    let app = App::new(&store, cfg);
    let response = match cassette {
        Some(name) => Harness::from_config(&cfg.cassettes, Arc::clone(&runtime.http))
            .with_cassette(name, |http| app.notify_hub(feed_id, http))?,
        None => app.notify_hub(feed_id, runtime.http.as_ref())?,
    };
    append_run_log(
        "info",
        "cli.hub.pinged",
        json!({
            "feed_id": feed_id.0,
            "cassette": cassette,
            "status": response.status,
        }),
    );
    if !response.is_success() {
        return Err(ChirpError::Http(format!(
            "hub answered {} for {}",
            response.status,
            app.topic_url(feed_id)
        )));
    }
    runtime.terminal.write_line(&format!(
        "hub {} {}",
        response.status,
        app.topic_url(feed_id)
    ))
}

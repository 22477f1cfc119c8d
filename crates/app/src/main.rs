use std::fmt;
use std::io::Write as _;
use std::path::PathBuf;

use services::{AppServices, Clock, EngineConfig, PageCompletion, UnitSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use unitflow_core::PageRegistry;
use unitflow_core::model::{ModuleId, UnitId};

mod commands;

use commands::{Command, HELP};

const DEMO_CATALOG: &str = include_str!("../catalog/demo.json");

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- [--db <sqlite_url>] [--catalog <file.json>] [--module <id>] [--unit <id>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://unitflow.sqlite3");
    eprintln!("  --catalog built-in demo catalog");
    eprintln!("  --module 1 --unit 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  UNITFLOW_DB_URL, UNITFLOW_FEEDBACK_DELAY_MS, UNITFLOW_SUCCESS_DELAY_MS,");
    eprintln!("  UNITFLOW_CELEBRATE_DELAY_MS, RUST_LOG");
}

#[derive(Debug)]
struct Args {
    config: EngineConfig,
    catalog: Option<PathBuf>,
    module_id: ModuleId,
    unit_id: UnitId,
}

impl Args {
    fn parse(
        args: &mut impl Iterator<Item = String>,
        mut config: EngineConfig,
    ) -> Result<Option<Self>, ArgsError> {
        config.database_url = sqlite_url(&config.database_url);
        let mut catalog = None;
        let mut module_id = ModuleId::new(1);
        let mut unit_id = UnitId::new(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    config.database_url = sqlite_url(&value);
                }
                "--catalog" => catalog = Some(PathBuf::from(require_value(args, "--catalog")?)),
                "--module" => {
                    let value = require_value(args, "--module")?;
                    module_id = value.parse().map_err(|_| ArgsError::InvalidId {
                        flag: "--module",
                        raw: value.clone(),
                    })?;
                }
                "--unit" => {
                    let value = require_value(args, "--unit")?;
                    unit_id = value.parse().map_err(|_| ArgsError::InvalidId {
                        flag: "--unit",
                        raw: value.clone(),
                    })?;
                }
                "--help" | "-h" => return Ok(None),
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Some(Self {
            config,
            catalog,
            module_id,
            unit_id,
        }))
    }
}

/// Turn a bare path or `sqlite:` path into an absolute `sqlite://` URL.
fn sqlite_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("sqlite://") || raw.starts_with("sqlite::memory:") || raw.starts_with("sqlite:file:") {
        return raw.to_owned();
    }
    let path = PathBuf::from(raw.strip_prefix("sqlite:").unwrap_or(raw));
    let path = std::path::absolute(&path).unwrap_or(path);
    format!("sqlite://{}", path.display())
}

fn load_registry(catalog: Option<&PathBuf>) -> Result<PageRegistry, Box<dyn std::error::Error>> {
    let registry = match catalog {
        Some(path) => PageRegistry::from_json(&std::fs::read_to_string(path)?)?,
        None => PageRegistry::from_json(DEMO_CATALOG)?,
    };
    Ok(registry)
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn report(outcome: &PageCompletion) {
    let transition = &outcome.transition;
    if transition.is_stale() {
        println!("ignored: event came from a page that is no longer shown");
        return;
    }
    if transition.moves() {
        println!(
            "{:?}: page {} -> {} in {} ms",
            transition.kind,
            transition.from,
            transition.target,
            transition.delay.as_millis()
        );
    } else {
        println!("{:?}: staying on page {}", transition.kind, transition.target);
    }
    if transition.completes_unit {
        println!("unit complete");
    }
    if !outcome.persisted {
        println!("warning: progress could not be saved");
    }
}

fn print_status(session: &UnitSession) {
    let progress = session.progress();
    let page = session.current_page();
    println!(
        "page {}/{} \"{}\" [{}] saved at {} | {}%{}",
        progress.active_page,
        progress.total_pages,
        page.title,
        page.render.as_str(),
        progress.current_page,
        progress.percent,
        if progress.completed { " completed" } else { "" }
    );
    for (key, value) in session.step_data().iter() {
        println!("  {key} = {value}");
    }
}

async fn print_units(services: &AppServices, module_id: ModuleId) {
    match services.module_overview(module_id).await {
        Ok(units) => {
            for unit in units {
                let position = unit
                    .current_page
                    .map_or_else(|| "not started".to_string(), |p| format!("page {p}"));
                println!(
                    "  unit {} \"{}\": {} of {}{}",
                    unit.unit_id,
                    unit.title,
                    position,
                    unit.total_pages,
                    if unit.completed { ", completed" } else { "" }
                );
            }
        }
        Err(err) => println!("could not list units: {err}"),
    }
}

/// Print every page change, including ones that land after a delay.
fn watch_pages(session: &UnitSession, registry: std::sync::Arc<PageRegistry>) {
    let unit_id = session.unit_id();
    let mut pages = session.subscribe();
    tokio::spawn(async move {
        while pages.changed().await.is_ok() {
            let page = *pages.borrow_and_update();
            if let Some(descriptor) = registry.lookup(unit_id, page) {
                println!("\n== page {page}: {} [{}]", descriptor.title, descriptor.render.as_str());
                prompt();
            }
        }
    });
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env()?;
    let mut argv = std::env::args().skip(1);
    let Some(args) = Args::parse(&mut argv, config).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?
    else {
        print_usage();
        return Ok(());
    };

    let registry = load_registry(args.catalog.as_ref())?;
    let services = AppServices::new_sqlite(&args.config, Clock::system(), registry).await?;
    info!(database_url = %args.config.database_url, "storage ready");

    let mut session = services.open_unit(args.module_id, args.unit_id).await?;
    watch_pages(&session, services.registry());
    print_status(&session);
    println!("type `help` for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(commands::CommandError::Empty) => {
                prompt();
                continue;
            }
            Err(err) => {
                println!("{err}");
                prompt();
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Status => print_status(&session),
            Command::Units => print_units(&services, args.module_id).await,
            Command::Goto(page) => report(&session.jump_to_page(page).await),
            Command::Set(patch) => {
                if !session.merge_step_data(patch).await {
                    println!("warning: step data could not be saved");
                }
            }
            Command::Restart => {
                if !session.restart().await {
                    println!("warning: restart could not be saved");
                }
            }
            other => {
                if let Some(event) = other.into_event(session.active_page()) {
                    report(&session.on_page_complete(event).await);
                }
            }
        }
        prompt();
    }

    info!(unit = %session.unit_id(), page = session.active_page(), "driver exiting");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Args>, ArgsError> {
        let mut iter = args.iter().map(|s| (*s).to_string());
        Args::parse(&mut iter, EngineConfig::default())
    }

    #[test]
    fn flags_override_defaults() {
        let args = parse(&["--db", "sqlite:/tmp/flow.db", "--module", "2", "--unit", "5"])
            .unwrap()
            .unwrap();
        assert_eq!(args.config.database_url, "sqlite:///tmp/flow.db");
        assert_eq!(args.module_id, ModuleId::new(2));
        assert_eq!(args.unit_id, UnitId::new(5));
        assert!(args.catalog.is_none());
    }

    #[test]
    fn help_and_bad_flags() {
        assert!(parse(&["--help"]).unwrap().is_none());
        assert!(matches!(parse(&["--unit"]), Err(ArgsError::MissingValue { flag: "--unit" })));
        assert!(matches!(parse(&["--unit", "x"]), Err(ArgsError::InvalidId { .. })));
        assert!(matches!(parse(&["--db", " "]), Err(ArgsError::InvalidDbUrl { .. })));
        assert!(matches!(parse(&["--verbose"]), Err(ArgsError::UnknownArg(_))));
    }

    #[test]
    fn sqlite_urls_are_made_absolute() {
        assert_eq!(sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(sqlite_url(" sqlite://rel.db "), "sqlite://rel.db");
        assert!(sqlite_url("progress.sqlite3").ends_with("/progress.sqlite3"));
        assert!(sqlite_url("progress.sqlite3").starts_with("sqlite:///"));
    }

    #[test]
    fn demo_catalog_is_valid() {
        let registry = load_registry(None).unwrap();
        assert_eq!(registry.total_pages(UnitId::new(1)).unwrap(), 6);
        assert_eq!(registry.units_in_module(ModuleId::new(1)).count(), 2);
    }
}

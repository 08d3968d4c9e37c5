use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clipilot_core::journey::JourneyLogger;
use clipilot_core::registry::RegistryClient;
use clipilot_core::{catalog, config, loader, paths, Store};
use clipilot_engine::{Engine, EngineOptions, StdinPrompter};
use clipilot_resolver::{CandidateSource, Resolver};

#[derive(Parser)]
#[command(name = "clipilot", author, version, about = "Offline-first command-line assistant", long_about = None)]
struct Cli {
    /// Print commands instead of executing them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Answer yes to every confirmation prompt
    #[arg(long = "yes", short = 'y', global = true)]
    yes: bool,

    /// Store file to use instead of ~/.clipilot/clipilot.db
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Configuration file to overlay onto stored settings
    #[arg(long, global = true)]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the clipilot data directory and store
    Init,
    /// Import every module file found under a directory
    Load {
        /// Directory scanned recursively for *.yml / *.yaml modules
        dir: PathBuf,
    },
    /// Execute an installed module's main flow
    Run {
        /// Module id (reverse-DNS)
        module_id: String,
    },
    /// Fetch the registry's module listing into the local cache
    Sync,
    /// Download a module from the registry and install it
    Install {
        /// Module id (reverse-DNS)
        module_id: String,
    },
    /// Manage installed modules
    Modules {
        #[command(subcommand)]
        action: ModulesCommand,
    },
    /// Show recent execution history
    History {
        /// Number of entries to show
        #[arg(default_value_t = 20)]
        limit: i64,
    },
    /// Anything else is resolved as a free-text query
    #[command(external_subcommand)]
    Query(Vec<String>),
}

#[derive(Subcommand)]
enum ModulesCommand {
    /// List installed modules
    Ls,
    /// Print a module definition
    Show {
        /// Module id
        module_id: String,
    },
    /// Remove an installed module
    Rm {
        /// Module id
        module_id: String,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let data_dir = match &cli.db_path {
        Some(db) => db
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(".")),
        None => paths::data_dir()?,
    };
    let db_path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| paths::db_path(&data_dir));

    if let Commands::Init = cli.command {
        paths::initialize_data_dir(&data_dir)?;
        Store::open(&db_path).context("failed to initialize the store")?;
        println!("Initialized clipilot store at {}", db_path.display());
        return Ok(());
    }

    if !db_path.exists() {
        bail!(
            "no store at {}. Run `clipilot init` first.",
            db_path.display()
        );
    }

    let mut store = Store::open(&db_path).context("failed to open the store")?;
    apply_config(&store, &cli, &data_dir)?;

    match &cli.command {
        Commands::Init => {}
        Commands::Load { dir } => {
            let outcomes = loader::load_dir(&mut store, dir)?;
            if outcomes.is_empty() {
                println!("No module files found under {}", dir.display());
                return Ok(());
            }
            let mut failures = 0usize;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(id) => println!("Imported {} from {}", id, outcome.path.display()),
                    Err(e) => {
                        failures += 1;
                        eprintln!("Rejected {}: {}", outcome.path.display(), e);
                    }
                }
            }
            if failures > 0 {
                bail!("{} of {} module file(s) failed to import", failures, outcomes.len());
            }
        }
        Commands::Run { module_id } => {
            run_module(&store, &cli, module_id, 0.0, "manual")?;
        }
        Commands::Sync => {
            let client = RegistryClient::from_store(&store)?;
            let count = client.sync(&mut store)?;
            println!("Synced {} module(s) from the registry.", count);
        }
        Commands::Install { module_id } => {
            install_module(&mut store, module_id)?;
        }
        Commands::Modules { action } => match action {
            ModulesCommand::Ls => {
                let modules = store.list_modules()?;
                if modules.is_empty() {
                    println!("No modules installed.");
                } else {
                    println!("{:<34} {:<10} {:<6} {}", "ID", "VERSION", "STEPS", "NAME");
                    for module in modules {
                        let steps = store.step_count(&module.id)?;
                        println!(
                            "{:<34} {:<10} {:<6} {}",
                            module.id, module.version, steps, module.name
                        );
                    }
                }
            }
            ModulesCommand::Show { module_id } => {
                let module = store.get_module(module_id)?;
                print!("{}", serde_yaml::to_string(&module)?);
            }
            ModulesCommand::Rm { module_id } => {
                if !cli.yes && !confirm(&format!("Remove module '{}'? [y/N] ", module_id))? {
                    println!("Removal cancelled.");
                    return Ok(());
                }
                store.remove_module(module_id)?;
                println!("Removed module '{}'.", module_id);
            }
        },
        Commands::History { limit } => {
            let entries = store.recent_logs(*limit)?;
            if entries.is_empty() {
                println!("No execution history.");
            } else {
                println!(
                    "{:<26} {:<30} {:<10} {:<9} {}",
                    "TIMESTAMP", "MODULE", "STATUS", "METHOD", "DURATION"
                );
                for entry in entries {
                    let duration = entry
                        .duration_ms
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<26} {:<30} {:<10} {:<9} {}",
                        &entry.ts[..entry.ts.len().min(25)],
                        entry.resolved_module,
                        entry.status,
                        entry.method,
                        duration
                    );
                }
            }
        }
        Commands::Query(words) => {
            let line = words.join(" ");
            handle_repl_line(&mut store, &cli, &data_dir, &line)?;
        }
    }

    Ok(())
}

/// One REPL command: a leading keyword dispatches to the matching
/// subcommand, anything else resolves as a query.
fn handle_repl_line(store: &mut Store, cli: &Cli, data_dir: &PathBuf, line: &str) -> Result<()> {
    let words = shell_words::split(line)
        .map_err(|e| anyhow!("could not parse input: {}", e))?;
    match words.split_first() {
        Some((head, [module_id])) if head == "run" => {
            run_module(store, cli, module_id, 0.0, "manual")
        }
        Some((head, [dir])) if head == "load" => {
            let outcomes = loader::load_dir(store, &PathBuf::from(dir))?;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(id) => println!("Imported {}", id),
                    Err(e) => eprintln!("Rejected {}: {}", outcome.path.display(), e),
                }
            }
            Ok(())
        }
        Some((head, [])) if head == "sync" => {
            let client = RegistryClient::from_store(store)?;
            let count = client.sync(store)?;
            println!("Synced {} module(s) from the registry.", count);
            Ok(())
        }
        Some((head, [module_id])) if head == "install" => install_module(store, module_id),
        _ => resolve_query(store, cli, data_dir, line),
    }
}

fn resolve_query(store: &mut Store, cli: &Cli, data_dir: &PathBuf, query: &str) -> Result<()> {
    // Stale cache plus auto_sync: refresh opportunistically, never fatally.
    if RegistryClient::should_auto_sync(store).unwrap_or(false) {
        if let Ok(client) = RegistryClient::from_store(store) {
            let _ = client.sync(store);
        }
    }

    let journey = JourneyLogger::new(&paths::journey_path(data_dir));
    let registry = RegistryClient::from_store(store).ok();

    let mut resolution = {
        let mut resolver = Resolver::new(store).with_journey(&journey);
        if let Some(client) = &registry {
            resolver = resolver.with_registry(client);
        }
        resolver.resolve(query)?
    };

    if resolution.candidates.is_empty() {
        // On-demand discovery: a query token may name a host command the
        // catalog has never seen. Ask whatis, then resolve once more.
        let mut discovered = false;
        for token in &resolution.query.tokens {
            if catalog::discover_installed(store, token)?.is_some() {
                discovered = true;
            }
        }
        if discovered {
            let mut resolver = Resolver::new(store).with_journey(&journey);
            if let Some(client) = &registry {
                resolver = resolver.with_registry(client);
            }
            resolution = resolver.resolve(query)?;
        }
    }

    if resolution.candidates.is_empty() {
        println!("Nothing matched. Try rephrasing, or `clipilot sync` to refresh the catalog.");
        return Ok(());
    }

    println!(
        "Best match via {} (confidence {:.2}):",
        resolution.method, resolution.confidence
    );
    for (i, candidate) in resolution.candidates.iter().enumerate() {
        let marker = match &candidate.source {
            CandidateSource::Module(_) => "module",
            CandidateSource::Command(_) => "installed",
            CandidateSource::Common(_) => "available",
        };
        let description = match candidate.source {
            // Installed commands may have richer descriptions on the host.
            CandidateSource::Command(ref name) => catalog::get_description(store, name)
                .unwrap_or_else(|_| candidate.description.clone()),
            _ => candidate.description.clone(),
        };
        println!(
            "{:>2}. [{:.2}] {:<10} {:<28} {}",
            i + 1,
            candidate.score,
            marker,
            candidate.source.tag(),
            description
        );
    }

    if let Some(top) = resolution.candidates.first() {
        if let CandidateSource::Module(id) = &top.source {
            let prompt = format!("Run module '{}' now? [y/N] ", id);
            if cli.yes || confirm(&prompt)? {
                run_module(store, cli, id, top.score, &resolution.method)?;
            }
        }
    }

    Ok(())
}

fn install_module(store: &mut Store, module_id: &str) -> Result<()> {
    let client = RegistryClient::from_store(store)?;
    let bytes = client.download(module_id)?;
    let module = loader::parse(&bytes)?;
    if module.id != module_id {
        bail!(
            "registry served module '{}' when '{}' was requested",
            module.id,
            module_id
        );
    }
    loader::import(store, &module)?;
    println!("Installed {} v{}.", module.id, module.version);
    Ok(())
}

fn run_module(
    store: &Store,
    cli: &Cli,
    module_id: &str,
    confidence: f64,
    method: &str,
) -> Result<()> {
    let auto_confirm = cli.yes || store.setting_bool("auto_confirm").unwrap_or(false);
    let options = EngineOptions {
        dry_run: cli.dry_run,
        auto_confirm,
        resolved_confidence: confidence,
        resolved_method: method.to_string(),
    };

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = Arc::clone(&cancelled);
        // Second Ctrl-C falls back to the default handler via the flag
        // already being set; the engine aborts at the next checkpoint.
        let _ = ctrlc::set_handler(move || {
            cancelled.store(true, Ordering::SeqCst);
        });
    }

    let mut prompter = StdinPrompter;
    let mut engine = Engine::new(store, &mut prompter, options).with_cancel_flag(cancelled);
    let report = engine
        .run(module_id, clipilot_core::module::DEFAULT_FLOW)
        .map_err(|e| anyhow!("{}", e))?;
    println!(
        "Run {} completed ({} step(s) executed).",
        report.session_id, report.steps_executed
    );
    Ok(())
}

fn apply_config(store: &Store, cli: &Cli, data_dir: &PathBuf) -> Result<()> {
    let path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| paths::config_path(data_dir));
    if !path.exists() {
        if cli.config_path.is_some() {
            bail!("config file {} does not exist", path.display());
        }
        return Ok(());
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let values = config::parse_flat(&text);
    config::apply(store, &values)?;
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

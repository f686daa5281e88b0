use std::{path::Path, sync::Arc};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use contextual::{
    ai::{OllamaClient, SharedGenerator},
    cli::{Cli, Command, ConfigAction},
    client::Client,
    config::{self, GeneratorConfig, GeneratorOverrides},
    data_dir::DataDir,
    error::{self, Error},
    intent::{CACHE_TTL, IntentParser},
    paths,
    protocol::Request,
    registry::{EntryKind, Registry},
    scanner,
    search,
    server,
    store::Store,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CONTEXTUAL_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let overrides = cli.generator.overrides();

    match cli.command {
        Command::Serve(args) => {
            let socket = args.socket.unwrap_or_else(|| data_dir.socket_path());
            server::run_daemon(&data_dir, &socket, &overrides)?;
        }
        Command::Index(args) => {
            let store = Store::open(&data_dir)?;
            let report = scanner::scan(&store, &args.path)?;
            println!(
                "Indexed {} files in {} folders under {}",
                report.files_indexed, report.folders, report.root
            );
            if report.files_skipped > 0 {
                eprintln!("Skipped {} unreadable files", report.files_skipped);
            }
        }
        Command::Search(args) => {
            let store = Store::open(&data_dir)?;
            let filter = if args.ai {
                resolve_intent(store.registry(), &overrides, &args.query)?
            } else {
                args.query.clone()
            };
            let root = args.root.as_deref().map(paths::key);
            let results = search::search(&store, &filter, root.as_deref())?;

            if args.json {
                search::format_json(&results, &filter)?;
            } else {
                if args.ai {
                    eprintln!("Filter: {filter}");
                }
                search::format_human(&results);
            }
        }
        Command::Rebuild => {
            let store = Store::open(&data_dir)?;
            let documents = store.rebuild_index()?;
            let folders = scanner::reaggregate_all(&store)?;
            println!(
                "Rebuilt {documents} documents \
                 ({folders} folders re-aggregated)"
            );
        }
        Command::Roots(args) => {
            let store = Store::open(&data_dir)?;
            let roots = store.list_roots()?;
            if args.json {
                println!("{}", serde_json::to_string(&roots)?);
            } else if roots.is_empty() {
                println!("No indexed roots.");
            } else {
                for root in &roots {
                    println!("{}", root.root_path);
                }
            }
        }
        Command::Ls(args) => {
            let store = Store::open(&data_dir)?;
            cmd_ls(&store, &args.folder, args.json)?;
        }
        Command::Status(args) => {
            let store = Store::open(&data_dir)?;
            let status = store.status()?;
            if args.json {
                let doc = serde_json::json!({
                    "data_dir": data_dir.root(),
                    "status": status,
                });
                println!("{}", serde_json::to_string(&doc)?);
            } else {
                println!("Data directory: {}", data_dir.root().display());
                println!("Roots: {}", status.roots);
                println!("Folders: {}", status.folders);
                println!(
                    "Files: {} ({} summarized)",
                    status.files, status.summarized_files
                );
                println!("Indexed documents: {}", status.indexed_documents);
            }
        }
        Command::Config { action } => {
            let registry = Registry::open(&data_dir.registry_db())?;
            cmd_config(&registry, action)?;
        }
        Command::Request(args) => {
            let socket = args.socket.unwrap_or_else(|| data_dir.socket_path());
            let params = match args.params.as_deref() {
                Some(raw) => serde_json::from_str(raw)?,
                None => serde_json::Value::Null,
            };
            let response =
                Client::new(&socket).send(&Request::new(args.method, params))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.is_success() {
                std::process::exit(1);
            }
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn resolve_intent(
    registry: &Registry,
    overrides: &GeneratorOverrides,
    query: &str,
) -> error::Result<String> {
    let config = GeneratorConfig::resolve(registry, overrides)?;
    let generator: SharedGenerator = Arc::new(OllamaClient::new(config)?);
    let parser = IntentParser::new(generator, CACHE_TTL);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;
    let filter = runtime.block_on(parser.resolve(query));
    Ok(filter.replace('%', "*"))
}

fn cmd_ls(store: &Store, folder: &Path, json: bool) -> error::Result<()> {
    let key = paths::key(folder);
    if store.get_metadata(&key)?.is_none() {
        return Err(Error::NotFound {
            kind: "folder",
            name: key,
        });
    }
    let children = store.list_folder(&key)?;

    if json {
        println!("{}", serde_json::to_string(&children)?);
        return Ok(());
    }
    for child in &children {
        let marker = match child.kind {
            EntryKind::Folder => "/",
            EntryKind::File => "",
        };
        let summary = child.summary.as_deref().unwrap_or("");
        println!("{}{marker}  {}", child.name(), summary);
    }
    Ok(())
}

fn cmd_config(registry: &Registry, action: ConfigAction) -> error::Result<()> {
    match action {
        ConfigAction::Get { key } => match registry.get_setting(&key)? {
            Some(value) => println!("{value}"),
            None => {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
        },
        ConfigAction::Set { key, value } => {
            config::validate_setting(&key, &value)?;
            registry.set_setting(&key, &value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if registry.remove_setting(&key)? {
                println!("Removed {key}");
            } else {
                println!("{key} was not set");
            }
        }
        ConfigAction::List(args) => {
            let settings = registry.list_settings()?;
            if args.json {
                let map: serde_json::Map<String, serde_json::Value> = settings
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                println!("{}", serde_json::to_string(&map)?);
            } else {
                for (key, value) in &settings {
                    println!("{key} = {value}");
                }
            }
        }
    }
    Ok(())
}

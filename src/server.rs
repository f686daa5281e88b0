//! The Unix-socket daemon.
//!
//! Each connection carries any number of newline-delimited requests and
//! is served by its own task. The background summarizer runs alongside
//! as one more task on the same runtime.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
};

use crate::{
    aggregate,
    ai::{self, OllamaClient, SharedGenerator},
    config::{GeneratorConfig, GeneratorOverrides},
    data_dir::DataDir,
    error::{Error, Result},
    intent::{CACHE_TTL, IntentParser},
    paths,
    protocol::{
        Details,
        DetailsParams,
        Method,
        PathParams,
        RefineParams,
        Request,
        Response,
        SaveSummaryParams,
        SearchParams,
    },
    registry::EntryKind,
    scanner,
    search,
    store::{self, Store},
    worker,
};

pub const FOLDER_CONTEXT: &str = "Folder result. Use list_folder to browse.";

/// Everything a request handler can reach.
pub struct DaemonState {
    pub store: Arc<Store>,
    pub generator: SharedGenerator,
    pub parser: IntentParser,
}

impl DaemonState {
    pub fn new(store: Arc<Store>, generator: SharedGenerator) -> Self {
        let parser = IntentParser::new(Arc::clone(&generator), CACHE_TTL);
        Self {
            store,
            generator,
            parser,
        }
    }
}

impl std::fmt::Debug for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonState")
            .field("store", &self.store)
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

pub struct Server {
    listener: UnixListener,
    socket_path: PathBuf,
    state: Arc<DaemonState>,
}

impl Server {
    /// Bind `socket_path`, replacing a stale socket file, and restrict it
    /// to the owner. Must be called inside a tokio runtime.
    pub fn bind(socket_path: &Path, state: Arc<DaemonState>) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(socket_path, perms)?;
        }

        tracing::info!(socket = %socket_path.display(), "listening");
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            state,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until the future is dropped.
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, state).await {
                            tracing::warn!(
                                error = %e,
                                "client connection failed"
                            );
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            tracing::debug!(error = %e, "socket cleanup failed");
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("socket_path", &self.socket_path)
            .finish_non_exhaustive()
    }
}

async fn handle_client(
    stream: UnixStream,
    state: Arc<DaemonState>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&state, request).await,
            Err(e) => Response::error(format!("Invalid request: {e}")),
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
    }
    Ok(())
}

/// Answer one request. Handler errors become error responses.
pub async fn dispatch(state: &DaemonState, request: Request) -> Response {
    let Some(method) = Method::parse(&request.method) else {
        tracing::debug!(method = %request.method, "unknown method");
        return Response::error("Unknown method");
    };
    tracing::debug!(method = %request.method, "request");

    let result = match method {
        Method::Ping => Ok(Response::success("alive").with_message("pong")),
        Method::IndexFolder => match request.params() {
            Ok(params) => index_folder(state, params).await,
            Err(e) => Err(e.into()),
        },
        Method::Search => match request.params() {
            Ok(params) => run_search(state, params).await,
            Err(e) => Err(e.into()),
        },
        Method::GetSummary => match request.params() {
            Ok(params) => get_summary(state, params).await,
            Err(e) => Err(e.into()),
        },
        Method::SaveSummary => match request.params() {
            Ok(params) => save_summary(state, params).await,
            Err(e) => Err(e.into()),
        },
        Method::RefineSummary => match request.params::<RefineParams>() {
            Ok(params) => Ok(Response::success(
                ai::refine_or_fallback(
                    state.generator.as_ref(),
                    &params.current_summary,
                    &params.instruction,
                )
                .await,
            )),
            Err(e) => Err(e.into()),
        },
        Method::GetExpandedDetails => match request.params() {
            Ok(params) => expanded_details(state, params).await,
            Err(e) => Err(e.into()),
        },
        Method::ListFolder => match request.params() {
            Ok(params) => list_folder(state, params).await,
            Err(e) => Err(e.into()),
        },
    };

    result.unwrap_or_else(|e| {
        tracing::warn!(method = %request.method, error = %e, "request failed");
        Response::error(e.to_string())
    })
}

async fn index_folder(
    state: &DaemonState,
    params: PathParams,
) -> Result<Response> {
    let path = paths::normalize(Path::new(&params.path));
    if !path.exists() {
        return Ok(Response::error("Invalid path"));
    }

    let report =
        store::blocking(&state.store, move |store| scanner::scan(store, &path))
            .await?;

    Ok(Response::success(report.files_indexed)
        .with_message(format!("Indexed {} files", report.files_indexed)))
}

async fn run_search(
    state: &DaemonState,
    params: SearchParams,
) -> Result<Response> {
    let filter = if params.use_ai {
        state.parser.resolve(&params.query).await.replace('%', "*")
    } else {
        params.query
    };

    let root = params.root_path;
    let hits = store::blocking(&state.store, move |store| {
        search::search(store, &filter, root.as_deref())
    })
    .await?;
    Ok(Response::success(hits))
}

async fn get_summary(
    state: &DaemonState,
    params: PathParams,
) -> Result<Response> {
    let path = paths::key(Path::new(&params.path));
    let lookup = path.clone();
    let stored = store::blocking(&state.store, move |store| {
        let row = store.get_metadata(&lookup)?;
        if let Some(row) = row.filter(|row| row.has_summary()) {
            return Ok(Stored::Summary(row.summary));
        }
        if !Path::new(&lookup).is_file() {
            return Ok(Stored::Missing);
        }
        store::read_lossy(Path::new(&lookup)).map(Stored::Content)
    })
    .await?;

    let content = match stored {
        Stored::Summary(summary) => {
            return Ok(Response::success(summary).with_source("db"));
        }
        Stored::Missing => return Ok(Response::error("File not found")),
        Stored::Content(content) => content,
    };

    match state.generator.summarize(&content).await {
        Ok(summary) => {
            let summary = summary.trim().to_string();
            let saved = summary.clone();
            store::blocking(&state.store, move |store| {
                persist_summary(store, &path, &saved, Some(content))
            })
            .await?;
            Ok(Response::success(summary).with_source("ai"))
        }
        Err(e) => {
            tracing::warn!(
                path = %path,
                error = %e,
                "summary generation failed"
            );
            Ok(Response::success(ai::SUMMARY_FALLBACK).with_source("ai"))
        }
    }
}

async fn save_summary(
    state: &DaemonState,
    params: SaveSummaryParams,
) -> Result<Response> {
    let path = paths::key(Path::new(&params.path));
    store::blocking(&state.store, move |store| {
        persist_summary(store, &path, &params.summary, None)
    })
    .await?;
    Ok(Response::ok().with_message("Saved"))
}

async fn expanded_details(
    state: &DaemonState,
    params: DetailsParams,
) -> Result<Response> {
    let path = paths::key(Path::new(&params.path));
    let lookup = path.clone();
    let row = store::blocking(&state.store, move |store| {
        store.get_metadata(&lookup)
    })
    .await?;
    let Some(row) = row else {
        return Ok(Response::error("Path not found"));
    };
    let stored_tech = row.tech_stack.filter(|t| !t.trim().is_empty());

    if row.kind == EntryKind::Folder {
        return Ok(Response::success(Details {
            tech_stack: stored_tech.unwrap_or_else(|| "Mixed".to_string()),
            search_context: FOLDER_CONTEXT.to_string(),
            created: row.created,
            modified: row.modified,
            kind: EntryKind::Folder,
        }));
    }

    let content = store::read_lossy(Path::new(&path))?;
    let tech_stack = match stored_tech {
        Some(tech) => tech,
        None => match state.generator.detect_tech_stack(&content).await {
            Ok(tech) => {
                let tech = tech.trim().to_string();
                let (target, saved) = (path.clone(), tech.clone());
                store::blocking(&state.store, move |store| {
                    store.update_tech_stack(&target, &saved)
                })
                .await?;
                tech
            }
            Err(e) => {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "tech stack detection failed"
                );
                ai::TECH_STACK_FALLBACK.to_string()
            }
        },
    };
    let search_context = ai::explanation_or_fallback(
        state.generator.as_ref(),
        &content,
        &params.query,
    )
    .await;

    Ok(Response::success(Details {
        tech_stack,
        search_context,
        created: row.created,
        modified: row.modified,
        kind: EntryKind::File,
    }))
}

async fn list_folder(
    state: &DaemonState,
    params: PathParams,
) -> Result<Response> {
    let path = paths::key(Path::new(&params.path));
    if !Path::new(&path).is_dir() {
        return Ok(Response::error("Folder not found"));
    }
    let children =
        store::blocking(&state.store, move |store| store.list_folder(&path))
            .await?;
    Ok(Response::success(children))
}

/// What `get_summary` found before asking the generator.
enum Stored {
    Summary(Option<String>),
    Missing,
    Content(String),
}

/// Save `summary` for `path` and refresh folder rollups up to its indexed
/// root. A file that exists on disk but was never scanned is registered
/// first.
fn persist_summary(
    store: &Store,
    path: &str,
    summary: &str,
    content: Option<String>,
) -> Result<()> {
    if store.get_metadata(path)?.is_none() && Path::new(path).is_file() {
        let content = match content {
            Some(content) => content,
            None => store::read_lossy(Path::new(path))?,
        };
        let stat = scanner::stat_path(Path::new(path))?;
        store.upsert_file(Path::new(path), &content, stat)?;
    }
    store.update_summary(path, summary)?;

    let stop_at = store.best_root_for(path)?;
    aggregate::update_folder_aggregate_up_tree(
        store,
        path,
        stop_at.as_deref(),
    )?;
    Ok(())
}

/// Open the store, start the summarizer and serve until interrupted.
pub fn run_daemon(
    data_dir: &DataDir,
    socket_path: &Path,
    overrides: &GeneratorOverrides,
) -> Result<()> {
    let store = Arc::new(Store::open(data_dir)?);
    let config = GeneratorConfig::resolve(store.registry(), overrides)?;
    tracing::info!(url = %config.url, model = %config.model, "text generator");
    let generator: SharedGenerator = Arc::new(OllamaClient::new(config)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let state = Arc::new(DaemonState::new(store, generator));
        let server = Server::bind(socket_path, Arc::clone(&state))?;
        let summarizer = worker::spawn(
            Arc::clone(&state.store),
            Arc::clone(&state.generator),
        );

        let outcome = tokio::select! {
            served = server.run() => served,
            signal = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                signal.map_err(Error::from)
            }
        };
        summarizer.abort();
        outcome
    })
}

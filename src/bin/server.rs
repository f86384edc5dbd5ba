#![forbid(unsafe_code)]

//! Axum front end for the yt-dlp toolbox.
//!
//! Every request runs yt-dlp to completion on the blocking pool and then
//! streams the produced file back. Nothing is queued or cached; concurrent
//! requests simply run concurrent yt-dlp processes.

use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use toolbox_api::config::{ConfigOverrides, ServerConfig, resolve_server_config};
use toolbox_api::error::MediaError;
use toolbox_api::logging::init_tracing;
use toolbox_api::media::{DEFAULT_VIDEO_FORMAT, MediaFetcher, Quality};
use toolbox_api::runner::{ProcessRunner, SystemRunner, ensure_program_available};
use tracing::{error, info, warn};

const AUDIO_MPEG: &str = "audio/mpeg";
const VIDEO_MP4: &str = "video/mp4";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Default)]
struct ServerArgs {
    overrides: ConfigOverrides,
}

impl ServerArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = ConfigOverrides::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if arg == "--isolate-requests" {
                overrides.isolate_requests = Some(true);
                continue;
            }

            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };
            if !matches!(
                flag.as_str(),
                "--output-dir" | "--host" | "--port" | "--yt-dlp" | "--env-file"
            ) {
                return Err(anyhow!("unknown argument: {arg}"));
            }
            let value = match inline {
                Some(value) => value,
                None => args
                    .next()
                    .ok_or_else(|| anyhow!("{flag} requires a value"))?,
            };

            match flag.as_str() {
                "--output-dir" => overrides.output_root = Some(PathBuf::from(value)),
                "--host" => overrides.host = Some(parse_host_arg(&value)?.to_string()),
                "--port" => overrides.port = Some(parse_port_arg(&value)?),
                "--yt-dlp" => overrides.yt_dlp = Some(PathBuf::from(value)),
                _ => overrides.env_path = Some(PathBuf::from(value)),
            }
        }
        Ok(Self { overrides })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TOOLBOX_HOST")
}

type Fetcher = MediaFetcher<Arc<dyn ProcessRunner>>;

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    fetcher: Arc<Fetcher>,
}

impl AppState {
    fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            error!(error = %err, "request failed");
            Self::internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "detail": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct ConvertParams {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DownloadParams {
    url: Option<String>,
    quality: Option<String>,
    format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let ServerArgs { overrides } = ServerArgs::parse()?;
    let config = resolve_server_config(overrides).context("resolving configuration")?;
    let host = parse_host_arg(&config.host)?;

    bootstrap_folders(&config)?;

    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
    match ensure_program_available(runner.as_ref(), &config.yt_dlp) {
        Ok(version) => info!(version = %version, "found yt-dlp"),
        Err(err) => warn!(
            program = %config.yt_dlp.display(),
            error = %err,
            "yt-dlp is not usable; requests will fail until it is installed"
        ),
    }

    let fetcher = MediaFetcher::new(runner, config.yt_dlp.clone(), config.output_root.clone())
        .with_request_isolation(config.isolate_requests);
    let app = router(AppState::new(fetcher));

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        output_root = %config.output_root.display(),
        isolate_requests = config.isolate_requests,
        "API server listening on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mp3/convert", get(convert_mp3))
        .route("/youtube/convert-mp3", get(convert_mp3))
        .route("/youtube/download", get(download_video))
        .fallback(not_found)
        .with_state(state)
}

/// Creates the bootstrap folder and the output root before the first request.
fn bootstrap_folders(config: &ServerConfig) -> Result<()> {
    for dir in [&config.bootstrap_dir, &config.output_root] {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not Found")
}

async fn convert_mp3(
    State(state): State<AppState>,
    Query(params): Query<ConvertParams>,
) -> ApiResult<Response> {
    let url = required_url(params.url)?;
    info!(%url, "mp3 conversion requested");

    let fetcher = state.fetcher.clone();
    let path = run_blocking(move || fetcher.convert_to_audio(&url)).await?;
    send_file(&path, AUDIO_MPEG).await
}

async fn download_video(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> ApiResult<Response> {
    let url = required_url(params.url)?;
    let quality = params
        .quality
        .unwrap_or_else(|| Quality::default().to_string());
    let format = params
        .format
        .unwrap_or_else(|| DEFAULT_VIDEO_FORMAT.to_string());
    info!(%url, %quality, %format, "video download requested");

    let content_type = if format.trim() == DEFAULT_VIDEO_FORMAT {
        VIDEO_MP4
    } else {
        OCTET_STREAM
    };
    let fetcher = state.fetcher.clone();
    let path = run_blocking(move || fetcher.download_video(&url, &format, &quality)).await?;
    send_file(&path, content_type).await
}

fn required_url(url: Option<String>) -> ApiResult<String> {
    url.filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("missing required query parameter: url"))
}

/// yt-dlp blocks for as long as the download takes, so it never runs on the
/// async workers.
async fn run_blocking<F>(job: F) -> ApiResult<PathBuf>
where
    F: FnOnce() -> Result<PathBuf, MediaError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| ApiError::internal(format!("worker task failed: {err}")))?
        .map_err(ApiError::from)
}

async fn send_file(path: &Path, content_type: &'static str) -> ApiResult<Response> {
    let file = File::open(path)
        .await
        .map_err(|err| ApiError::internal(format!("opening {}: {err}", path.display())))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| ApiError::internal(format!("reading {}: {err}", path.display())))?
        .len();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&filename)?);

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

/// Plain `filename="…"` when the name survives percent-encoding untouched,
/// RFC 5987 `filename*` otherwise.
fn content_disposition(filename: &str) -> ApiResult<HeaderValue> {
    let encoded = urlencoding::encode(filename);
    let value = if encoded == filename {
        format!("attachment; filename=\"{filename}\"")
    } else {
        format!("attachment; filename*=utf-8''{encoded}")
    };
    HeaderValue::from_str(&value)
        .map_err(|err| ApiError::internal(format!("invalid file name header: {err}")))
}

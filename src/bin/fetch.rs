#![forbid(unsafe_code)]

//! One-shot command-line front end: runs a single conversion or download with
//! the same configuration the server uses and prints the resulting path.
//!
//! ```text
//! fetch audio <url>
//! fetch video <url> [--quality low|medium|high|best] [--format mp4]
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use toolbox_api::config::{ConfigOverrides, resolve_server_config};
use toolbox_api::logging::init_tracing;
use toolbox_api::media::{DEFAULT_VIDEO_FORMAT, MediaFetcher, Quality};
use toolbox_api::runner::SystemRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
enum FetchJob {
    Audio {
        url: String,
    },
    Video {
        url: String,
        quality: String,
        format: String,
    },
}

#[derive(Debug, Clone)]
struct FetchArgs {
    job: FetchJob,
    overrides: ConfigOverrides,
}

impl FetchArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = ConfigOverrides::default();
        let mut quality: Option<String> = None;
        let mut format: Option<String> = None;
        let mut positional = Vec::new();
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            if !arg.starts_with("--") {
                positional.push(arg);
                continue;
            }
            let (flag, value) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), value.to_string()),
                None => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("{arg} requires a value"))?;
                    (arg.clone(), value)
                }
            };
            match flag.as_str() {
                "--quality" => quality = Some(value),
                "--format" => format = Some(value),
                "--output-dir" => overrides.output_root = Some(PathBuf::from(value)),
                "--yt-dlp" => overrides.yt_dlp = Some(PathBuf::from(value)),
                "--env-file" => overrides.env_path = Some(PathBuf::from(value)),
                _ => bail!("unknown argument: {flag}"),
            }
        }

        let mut positional = positional.into_iter();
        let mode = positional
            .next()
            .ok_or_else(|| anyhow!("expected a mode: audio or video"))?;
        let url = positional
            .next()
            .ok_or_else(|| anyhow!("expected a url after `{mode}`"))?;
        if let Some(extra) = positional.next() {
            bail!("unexpected argument: {extra}");
        }

        let job = match mode.as_str() {
            "audio" => {
                if quality.is_some() || format.is_some() {
                    bail!("--quality and --format only apply to video downloads");
                }
                FetchJob::Audio { url }
            }
            "video" => FetchJob::Video {
                url,
                quality: quality.unwrap_or_else(|| Quality::default().to_string()),
                format: format.unwrap_or_else(|| DEFAULT_VIDEO_FORMAT.to_string()),
            },
            other => bail!("unknown mode `{other}`; expected audio or video"),
        };

        Ok(Self { job, overrides })
    }
}

fn main() -> Result<()> {
    init_tracing();

    let FetchArgs { job, overrides } = FetchArgs::parse()?;
    let config = resolve_server_config(overrides).context("resolving configuration")?;
    let fetcher = MediaFetcher::new(SystemRunner, config.yt_dlp, config.output_root)
        .with_request_isolation(config.isolate_requests);

    let path = match job {
        FetchJob::Audio { url } => fetcher.convert_to_audio(&url)?,
        FetchJob::Video {
            url,
            quality,
            format,
        } => fetcher.download_video(&url, &format, &quality)?,
    };
    println!("{}", path.display());
    Ok(())
}

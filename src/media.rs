//! Builds yt-dlp invocations for audio conversion and video downloads and
//! resolves the file each run produced.
//!
//! All output lands in one shared directory by default. Two requests for
//! videos with the same title write to the same file name, and because the
//! result is "the newest file with the right extension", a concurrent download
//! finishing a moment later can be handed to the wrong caller. Request
//! isolation (see [`MediaFetcher::with_request_isolation`]) gives every run its
//! own subdirectory and removes both problems; it is off unless configured.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use tracing::{debug, info, warn};

use crate::{
    error::{JobKind, MediaError},
    locator::find_newest,
    runner::{ProcessOutput, ProcessRunner},
};

pub const AUDIO_FORMAT: &str = "mp3";
pub const DEFAULT_VIDEO_FORMAT: &str = "mp4";
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
const JOB_DIR_PREFIX: &str = "job-";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
    Best,
}

impl Quality {
    pub const ALL: [Quality; 4] = [Self::Low, Self::Medium, Self::High, Self::Best];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Best => "best",
        }
    }

    /// yt-dlp `-f` expression for this tier.
    pub fn selector(self) -> &'static str {
        match self {
            Self::Low => "worst",
            Self::Medium => "best[height<=720]",
            Self::High => "best[height<=1080]",
            Self::Best => "best",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = MediaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|quality| quality.as_str() == value)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|q| q.as_str()).collect();
                MediaError::validation(format!(
                    "Invalid quality: '{value}'. Use one of {}.",
                    allowed.join(", ")
                ))
            })
    }
}

/// Audio-only request, always extracted to MP3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    url: String,
}

impl ConversionRequest {
    pub fn new(url: &str) -> Result<Self, MediaError> {
        Ok(Self {
            url: require_url(url)?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    url: String,
    format: String,
    quality: Quality,
}

impl DownloadRequest {
    pub fn new(url: &str, format: &str, quality: Quality) -> Result<Self, MediaError> {
        Ok(Self {
            url: require_url(url)?,
            format: normalize_format(format)?,
            quality,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Container extension the caller expects, e.g. `mp4` or `webm`.
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }
}

fn require_url(url: &str) -> Result<String, MediaError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(MediaError::validation("url must not be empty"));
    }
    Ok(trimmed.to_string())
}

// The format doubles as a file extension for the output lookup, so anything
// beyond a plain alphanumeric suffix is refused.
fn normalize_format(format: &str) -> Result<String, MediaError> {
    let trimmed = format.trim().trim_start_matches('.');
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(MediaError::validation(format!(
            "Invalid format: '{format}'. Use a plain file extension such as mp4 or webm."
        )));
    }
    Ok(trimmed.to_string())
}

/// Drives yt-dlp through a [`ProcessRunner`] and returns the produced file.
#[derive(Debug, Clone)]
pub struct MediaFetcher<R> {
    runner: R,
    program: PathBuf,
    output_root: PathBuf,
    isolate_requests: bool,
}

impl<R: ProcessRunner> MediaFetcher<R> {
    pub fn new(runner: R, program: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            program: program.into(),
            output_root: output_root.into(),
            isolate_requests: false,
        }
    }

    /// Runs every invocation inside a fresh `job-*` directory below the output
    /// root. The directories are left in place for the caller to serve.
    pub fn with_request_isolation(mut self, enabled: bool) -> Self {
        self.isolate_requests = enabled;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn convert_to_audio(&self, url: &str) -> Result<PathBuf, MediaError> {
        let request = ConversionRequest::new(url)?;
        self.convert(&request)
    }

    /// Validates `quality` before anything else, so a bad tier never creates
    /// directories or spawns yt-dlp.
    pub fn download_video(
        &self,
        url: &str,
        format: &str,
        quality: &str,
    ) -> Result<PathBuf, MediaError> {
        let quality = quality.parse::<Quality>()?;
        let request = DownloadRequest::new(url, format, quality)?;
        self.download(&request)
    }

    pub fn convert(&self, request: &ConversionRequest) -> Result<PathBuf, MediaError> {
        let dir = self.prepare_job_dir()?;
        let args = vec![
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            AUDIO_FORMAT.to_string(),
            "-o".to_string(),
            output_template(&dir),
            // yt-dlp reads a dash-prefixed url as an option unless options end here.
            "--".to_string(),
            request.url().to_string(),
        ];
        self.invoke(JobKind::Conversion, &args)?;
        locate(JobKind::Conversion, &dir, AUDIO_FORMAT)
    }

    pub fn download(&self, request: &DownloadRequest) -> Result<PathBuf, MediaError> {
        let dir = self.prepare_job_dir()?;
        let args = vec![
            "-f".to_string(),
            request.quality().selector().to_string(),
            "-o".to_string(),
            output_template(&dir),
            "--".to_string(),
            request.url().to_string(),
        ];
        self.invoke(JobKind::Download, &args)?;
        locate(JobKind::Download, &dir, request.format())
    }

    fn prepare_job_dir(&self) -> Result<PathBuf, MediaError> {
        fs::create_dir_all(&self.output_root).map_err(|err| {
            MediaError::io(
                format!("creating {}", self.output_root.display()),
                err,
            )
        })?;
        if !self.isolate_requests {
            return Ok(self.output_root.clone());
        }
        tempfile::Builder::new()
            .prefix(JOB_DIR_PREFIX)
            .tempdir_in(&self.output_root)
            .map(|dir| dir.keep())
            .map_err(|err| {
                MediaError::io(
                    format!("creating job directory in {}", self.output_root.display()),
                    err,
                )
            })
    }

    fn invoke(&self, job: JobKind, args: &[String]) -> Result<ProcessOutput, MediaError> {
        info!(%job, program = %self.program.display(), "starting yt-dlp");
        debug!(?args, "yt-dlp arguments");

        let output = self
            .runner
            .run(&self.program, args)
            .map_err(|source| MediaError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !output.success() {
            warn!(%job, code = ?output.code, stderr = %output.stderr.trim(), "yt-dlp failed");
            return Err(MediaError::ToolFailed {
                job,
                stderr: output.stderr,
            });
        }
        if !output.stdout.is_empty() {
            debug!(stdout = %output.stdout.trim(), "yt-dlp output");
        }
        Ok(output)
    }
}

fn output_template(dir: &Path) -> String {
    dir.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned()
}

fn locate(job: JobKind, dir: &Path, extension: &str) -> Result<PathBuf, MediaError> {
    let found = find_newest(dir, extension)
        .map_err(|err| MediaError::io(format!("scanning {}", dir.display()), err))?;
    match found {
        Some(path) => {
            info!(%job, path = %path.display(), "yt-dlp finished");
            Ok(path)
        }
        None => Err(MediaError::ArtifactMissing {
            job,
            extension: extension.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Stand-in for yt-dlp: records every call and, on success, drops a file
    /// into whatever directory the `-o` template points at.
    struct FakeRunner {
        code: i32,
        stderr: String,
        produce: Option<String>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeRunner {
        fn succeeding(produce: Option<&str>) -> Self {
            Self {
                code: 0,
                stderr: String::new(),
                produce: produce.map(str::to_string),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(code: i32, stderr: &str) -> Self {
            Self {
                code,
                stderr: stderr.to_string(),
                produce: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for FakeRunner {
        fn run(&self, _program: &Path, args: &[String]) -> io::Result<ProcessOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            if let Some(name) = &self.produce {
                let template = args
                    .iter()
                    .position(|arg| arg == "-o")
                    .and_then(|index| args.get(index + 1))
                    .expect("template argument");
                let dir = Path::new(template).parent().expect("template directory");
                fs::write(dir.join(name), b"media")?;
            }
            Ok(ProcessOutput {
                code: Some(self.code),
                stdout: String::new(),
                stderr: self.stderr.clone(),
            })
        }
    }

    struct UnlaunchableRunner;

    impl ProcessRunner for UnlaunchableRunner {
        fn run(&self, _program: &Path, _args: &[String]) -> io::Result<ProcessOutput> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such file"))
        }
    }

    fn fetcher(runner: FakeRunner, root: &Path) -> MediaFetcher<FakeRunner> {
        MediaFetcher::new(runner, "yt-dlp", root)
    }

    #[test]
    fn quality_maps_to_selectors() {
        assert_eq!("low".parse::<Quality>().unwrap().selector(), "worst");
        assert_eq!(
            "medium".parse::<Quality>().unwrap().selector(),
            "best[height<=720]"
        );
        assert_eq!(
            "high".parse::<Quality>().unwrap().selector(),
            "best[height<=1080]"
        );
        assert_eq!("best".parse::<Quality>().unwrap().selector(), "best");
        assert_eq!(Quality::default(), Quality::Medium);
    }

    #[test]
    fn unknown_quality_lists_allowed_values() {
        let err = "ultra".parse::<Quality>().unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Invalid quality: 'ultra'. Use one of low, medium, high, best."
        );
    }

    #[test]
    fn download_with_unknown_quality_spawns_nothing() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Downloads");
        let fetcher = fetcher(FakeRunner::succeeding(Some("clip.mp4")), &root);

        let err = fetcher
            .download_video("https://youtu.be/abc", "mp4", "ultra")
            .unwrap_err();

        assert!(matches!(err, MediaError::Validation { .. }));
        for allowed in ["low", "medium", "high", "best"] {
            assert!(err.to_string().contains(allowed));
        }
        assert!(fetcher.runner().calls().is_empty());
        assert!(!root.exists());
    }

    #[test]
    fn convert_builds_audio_command_and_returns_mp3() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Downloads");
        let fetcher = fetcher(FakeRunner::succeeding(Some("Song.mp3")), &root);

        let path = fetcher.convert_to_audio("https://youtu.be/abc").unwrap();

        assert_eq!(path, root.join("Song.mp3"));
        let calls = fetcher.runner().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec![
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "-o".to_string(),
                root.join("%(title)s.%(ext)s").to_string_lossy().into_owned(),
                "--".to_string(),
                "https://youtu.be/abc".to_string(),
            ]
        );
    }

    #[test]
    fn download_builds_format_command_and_returns_video() {
        let dir = tempdir().unwrap();
        let fetcher = fetcher(FakeRunner::succeeding(Some("Clip.mp4")), dir.path());

        let path = fetcher
            .download_video("https://youtu.be/abc", "mp4", "high")
            .unwrap();

        assert_eq!(path, dir.path().join("Clip.mp4"));
        let calls = fetcher.runner().calls();
        assert_eq!(
            calls[0],
            vec![
                "-f".to_string(),
                "best[height<=1080]".to_string(),
                "-o".to_string(),
                dir.path()
                    .join("%(title)s.%(ext)s")
                    .to_string_lossy()
                    .into_owned(),
                "--".to_string(),
                "https://youtu.be/abc".to_string(),
            ]
        );
    }

    #[test]
    fn dash_prefixed_url_stays_positional() {
        let dir = tempdir().unwrap();
        let audio = fetcher(FakeRunner::succeeding(Some("Song.mp3")), dir.path());
        audio.convert_to_audio("--batch-file=/etc/passwd").unwrap();

        let video = fetcher(FakeRunner::succeeding(Some("Clip.mp4")), dir.path());
        video
            .download_video("-o/tmp/elsewhere", "mp4", "best")
            .unwrap();

        for (runner, url) in [
            (audio.runner(), "--batch-file=/etc/passwd"),
            (video.runner(), "-o/tmp/elsewhere"),
        ] {
            let calls = runner.calls();
            let args = &calls[0];
            assert_eq!(
                args[args.len() - 2..].to_vec(),
                vec!["--".to_string(), url.to_string()]
            );
            assert_eq!(args.iter().filter(|arg| *arg == "--").count(), 1);
        }
    }

    #[test]
    fn download_looks_up_the_requested_format() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("older.mp4"), b"x").unwrap();
        let fetcher = fetcher(FakeRunner::succeeding(Some("Clip.webm")), dir.path());

        let path = fetcher
            .download_video("https://youtu.be/abc", "webm", "best")
            .unwrap();
        assert_eq!(path, dir.path().join("Clip.webm"));
    }

    #[test]
    fn tool_failure_surfaces_stderr() {
        let dir = tempdir().unwrap();
        let audio = fetcher(FakeRunner::failing(1, "network error"), dir.path());

        let err = audio.convert_to_audio("https://youtu.be/abc").unwrap_err();
        assert!(matches!(
            err,
            MediaError::ToolFailed {
                job: JobKind::Conversion,
                ..
            }
        ));
        assert!(err.to_string().contains("network error"));

        let video = fetcher(FakeRunner::failing(2, "HTTP Error 403"), dir.path());
        let err = video
            .download_video("https://youtu.be/abc", "mp4", "low")
            .unwrap_err();
        assert!(matches!(
            err,
            MediaError::ToolFailed {
                job: JobKind::Download,
                ..
            }
        ));
        assert!(err.to_string().contains("HTTP Error 403"));
    }

    #[test]
    fn success_without_artifact_is_an_error() {
        let dir = tempdir().unwrap();
        let fetcher = fetcher(FakeRunner::succeeding(None), dir.path());

        let err = fetcher.convert_to_audio("https://youtu.be/abc").unwrap_err();
        assert!(matches!(err, MediaError::ArtifactMissing { .. }));
        assert!(err.to_string().contains("MP3 file could not be found"));

        let err = fetcher
            .download_video("https://youtu.be/abc", "mp4", "medium")
            .unwrap_err();
        assert!(err.to_string().contains("video file could not be found"));
    }

    #[test]
    fn artifact_with_unexpected_extension_is_missing() {
        let dir = tempdir().unwrap();
        let fetcher = fetcher(FakeRunner::succeeding(Some("Clip.mkv")), dir.path());
        let err = fetcher
            .download_video("https://youtu.be/abc", "mp4", "medium")
            .unwrap_err();
        assert!(matches!(err, MediaError::ArtifactMissing { .. }));
    }

    #[test]
    fn unlaunchable_tool_is_a_launch_error() {
        let dir = tempdir().unwrap();
        let fetcher = MediaFetcher::new(UnlaunchableRunner, "missing-yt-dlp", dir.path());
        let err = fetcher.convert_to_audio("https://youtu.be/abc").unwrap_err();
        assert!(matches!(err, MediaError::Launch { .. }));
        assert!(err.to_string().contains("missing-yt-dlp"));
    }

    #[test]
    fn empty_url_and_bad_format_are_rejected() {
        let dir = tempdir().unwrap();
        let fetcher = fetcher(FakeRunner::succeeding(Some("Clip.mp4")), dir.path());

        assert!(fetcher.convert_to_audio("   ").unwrap_err().is_client_error());
        assert!(
            fetcher
                .download_video("https://youtu.be/abc", "../mp4", "best")
                .unwrap_err()
                .is_client_error()
        );
        assert!(
            fetcher
                .download_video("https://youtu.be/abc", "", "best")
                .unwrap_err()
                .is_client_error()
        );
        assert!(fetcher.runner().calls().is_empty());
    }

    #[test]
    fn request_types_normalize_inputs() {
        let request = DownloadRequest::new(" https://youtu.be/abc ", ".webm", Quality::Best).unwrap();
        assert_eq!(request.url(), "https://youtu.be/abc");
        assert_eq!(request.format(), "webm");
        assert_eq!(request.quality(), Quality::Best);

        let request = ConversionRequest::new("https://youtu.be/xyz").unwrap();
        assert_eq!(request.url(), "https://youtu.be/xyz");
    }

    #[test]
    fn isolated_requests_use_their_own_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Someone else.mp3"), b"x").unwrap();
        let fetcher = fetcher(FakeRunner::succeeding(Some("Song.mp3")), dir.path())
            .with_request_isolation(true);

        let first = fetcher.convert_to_audio("https://youtu.be/abc").unwrap();
        let second = fetcher.convert_to_audio("https://youtu.be/abc").unwrap();

        assert_ne!(first, second);
        for path in [&first, &second] {
            let job_dir = path.parent().unwrap();
            assert_eq!(job_dir.parent().unwrap(), dir.path());
            assert!(
                job_dir
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .starts_with(JOB_DIR_PREFIX)
            );
            assert!(path.exists());
        }
    }
}

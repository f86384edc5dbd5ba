use std::{
    io,
    path::Path,
    process::{Command, Stdio},
    sync::Arc,
};

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs an external program to completion and captures its output.
///
/// The orchestrator only ever talks to yt-dlp through this trait, which keeps
/// tests free of real subprocesses.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[String]) -> io::Result<ProcessOutput>;
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for Arc<T> {
    fn run(&self, program: &Path, args: &[String]) -> io::Result<ProcessOutput> {
        (**self).run(program, args)
    }
}

/// Spawns real processes with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String]) -> io::Result<ProcessOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs `<program> --version` to find out early whether the tool is
/// installed.
pub fn ensure_program_available(runner: &dyn ProcessRunner, program: &Path) -> io::Result<String> {
    let output = runner.run(program, &["--version".to_string()])?;
    if output.success() {
        Ok(output.stdout.trim().to_string())
    } else {
        Err(io::Error::other(format!(
            "{} is installed but returned a failure status",
            program.display()
        )))
    }
}

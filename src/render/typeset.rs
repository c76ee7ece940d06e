use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::session::{CleanupGuard, SessionId, SessionPaths};
use super::tools::{self, Executable};
use crate::error::RenderError;

const ERROR_MARKER: &str = "! ";
const PREAMBLE_PROBE: &str = "\n\\begin{document}TEST PREAMBLE\\end{document}";

pub async fn compile(
    engine: &Executable,
    source: &Path,
    out_dir: &Path,
    timeout: Duration,
) -> Result<PathBuf, RenderError> {
    run_engine(engine, source, out_dir, timeout, false).await?;
    Ok(out_dir.join(file_with_extension(source, "pdf")?))
}

pub fn first_diagnostic(log: &str) -> Option<String> {
    let lines: Vec<&str> = log.lines().collect();
    let idx = lines.iter().position(|line| line.starts_with(ERROR_MARKER))?;
    let end = (idx + 2).min(lines.len());
    Some(lines[idx..end].join("\n"))
}

async fn run_engine(
    engine: &Executable,
    source: &Path,
    out_dir: &Path,
    timeout: Duration,
    draft: bool,
) -> Result<(), RenderError> {
    let mut command = engine.command();
    command.arg("-interaction=nonstopmode").arg("-no-shell-escape");
    if draft {
        command.arg("-draftmode");
    }
    command.arg("-output-directory").arg(out_dir).arg(source);

    let child = command.spawn().map_err(|err| engine.spawn_error(err))?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result
            .with_context(|| format!("failed to wait for {}", engine.name))?,
        Err(_) => {
            warn!("{} exceeded {:?} and was killed", engine.name, timeout);
            return Err(RenderError::CompileTimedOut);
        }
    };

    if output.status.success() {
        return Ok(());
    }

    let log_path = out_dir.join(file_with_extension(source, "log")?);
    let log = std::fs::read(&log_path)
        .with_context(|| format!("failed to read engine log: {}", log_path.display()))?;
    let message = first_diagnostic(&String::from_utf8_lossy(&log)).unwrap_or_default();
    debug!("{} failed: {}", engine.name, message);
    Err(RenderError::CompileFailed(message))
}

fn file_with_extension(source: &Path, extension: &str) -> Result<PathBuf, RenderError> {
    let stem = source
        .file_stem()
        .with_context(|| format!("source has no file name: {}", source.display()))?;
    Ok(PathBuf::from(stem).with_extension(extension))
}

#[derive(Debug, Error)]
pub enum PreambleRejected {
    #[error("The preamble is too long (max {limit} characters).")]
    TooLong { limit: usize },

    #[error("The preamble does not compile:\n{0}")]
    Invalid(String),

    #[error(transparent)]
    Render(RenderError),
}

pub async fn validate_preamble(
    engine: &Executable,
    preamble: &str,
    max_length: usize,
    build_dir: &Path,
    session: &SessionId,
    timeout: Duration,
) -> Result<(), PreambleRejected> {
    if preamble.chars().count() > max_length {
        return Err(PreambleRejected::TooLong { limit: max_length });
    }

    let paths = SessionPaths::new(build_dir, session);
    let _cleanup = CleanupGuard::new(&paths);
    let source = paths.validation_source();
    let document = format!("{}{}", preamble, PREAMBLE_PROBE);

    tools::ensure_dir(build_dir).map_err(|err| PreambleRejected::Render(err.into()))?;
    std::fs::write(&source, document)
        .with_context(|| format!("failed to write {}", source.display()))
        .map_err(|err| PreambleRejected::Render(err.into()))?;

    match run_engine(engine, &source, build_dir, timeout, true).await {
        Ok(()) => Ok(()),
        Err(RenderError::CompileFailed(message)) => Err(PreambleRejected::Invalid(message)),
        Err(err) => Err(PreambleRejected::Render(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_includes_continuation_line() {
        let log = "This is pdfTeX\n(./expression.tex\n! Undefined control sequence.\nl.4 \\foo\n                \n! Second error.\nl.9\n";
        assert_eq!(
            first_diagnostic(log).as_deref(),
            Some("! Undefined control sequence.\nl.4 \\foo")
        );
    }

    #[test]
    fn diagnostic_on_last_line_stands_alone() {
        assert_eq!(
            first_diagnostic("ok\n! Emergency stop.").as_deref(),
            Some("! Emergency stop.")
        );
    }

    #[test]
    fn log_without_marker_has_no_diagnostic() {
        assert_eq!(first_diagnostic("Output written\n!not a marker\n"), None);
        assert_eq!(first_diagnostic(""), None);
    }
}

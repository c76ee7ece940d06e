use anyhow::Context;
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

use crate::error::{RenderError, Tool};
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub tool: Tool,
    pub name: String,
    pub path: Option<PathBuf>,
}

impl Executable {
    // Falls back to the first name so the spawn fails with ToolMissing naming it.
    pub fn resolve(tool: Tool, candidates: &[String]) -> Self {
        for name in candidates {
            if let Some(path) = find_command(name) {
                return Self {
                    tool,
                    name: name.clone(),
                    path: Some(path),
                };
            }
        }
        Self {
            tool,
            name: candidates.first().cloned().unwrap_or_default(),
            path: None,
        }
    }

    pub fn program(&self) -> &OsStr {
        match &self.path {
            Some(path) => path.as_os_str(),
            None => OsStr::new(&self.name),
        }
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(self.program());
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    pub(crate) fn spawn_error(&self, err: io::Error) -> RenderError {
        if err.kind() == io::ErrorKind::NotFound {
            return RenderError::tool_missing(self.tool, self.name.clone());
        }
        RenderError::Unexpected(
            anyhow::Error::new(err).context(format!("failed to run {}", self.name)),
        )
    }

    pub(crate) async fn output<I, S>(&self, args: I) -> Result<Output, RenderError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command()
            .args(args)
            .output()
            .await
            .map_err(|err| self.spawn_error(err))
    }
}

#[derive(Debug, Clone)]
pub struct Toolchain {
    pub typesetter: Executable,
    pub ghostscript: Executable,
}

impl Toolchain {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            typesetter: Executable::resolve(
                Tool::Typesetter,
                std::slice::from_ref(&settings.typeset_engine),
            ),
            ghostscript: Executable::resolve(Tool::Ghostscript, &settings.ghostscript_executables),
        }
    }
}

pub fn diagnose(toolchain: &Toolchain) -> String {
    [&toolchain.typesetter, &toolchain.ghostscript]
        .iter()
        .map(|exe| match &exe.path {
            Some(path) => format!("{}: found at {}", exe.name, path.display()),
            None => format!(
                "{}: NOT FOUND ({}). {}",
                exe.name,
                exe.tool,
                exe.tool.install_hint()
            ),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

pub(crate) fn ensure_dir(dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create build dir: {}", dir.display()))
}

pub(crate) fn find_command(cmd: &str) -> Option<PathBuf> {
    let path = Path::new(cmd);
    if path.components().count() > 1 {
        return is_executable(path).then(|| path.to_path_buf());
    }

    let path_var = env::var_os("PATH")?;

    #[cfg(windows)]
    let candidates = windows_command_candidates(cmd);
    #[cfg(not(windows))]
    let candidates = vec![cmd.to_string()];

    for dir in env::split_paths(&path_var) {
        for candidate in &candidates {
            let full = dir.join(candidate);
            if is_executable(&full) {
                return Some(full);
            }
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    let metadata = match fs::metadata(path) {
        Ok(value) => value,
        Err(_) => return false,
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(windows)]
fn windows_command_candidates(cmd: &str) -> Vec<String> {
    let path = Path::new(cmd);
    if path.extension().is_some() {
        return vec![cmd.to_string()];
    }
    let pathext = env::var_os("PATHEXT").unwrap_or_else(|| ".EXE;.CMD;.BAT;.COM".into());
    pathext
        .to_string_lossy()
        .split(';')
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!("{}{}", cmd, ext.to_lowercase()))
        .collect()
}

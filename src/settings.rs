use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const DEFAULT_PREAMBLE: &str = include_str!("../resources/default_preamble.tex");

pub const PDF_MARGIN_ENV: &str = "LATEXBOT_PDF_MARGIN_PT";
pub const TRANSPARENT_ENV: &str = "LATEXBOT_TRANSPARENT";
pub const DEFAULT_PDF_MARGIN_PT: f64 = 24.0;
// Largest page edge a PDF reader accepts (200 inches).
pub const MAX_PDF_MARGIN_PT: f64 = 14_400.0;

#[derive(Debug, Clone)]
pub struct Settings {
    pub build_dir: PathBuf,
    pub store_path: PathBuf,
    pub default_dpi: u32,
    pub pdf_margin_pt: f64,
    pub transparent: bool,
    pub max_width_to_height: f64,
    pub max_height_to_width: f64,
    pub default_preamble: String,
    pub typeset_engine: String,
    pub typeset_timeout: Duration,
    pub max_preamble_length: usize,
    pub ghostscript_executables: Vec<String>,
    pub server_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            build_dir: paths::default_build_dir(),
            store_path: paths::default_store_path(),
            default_dpi: 300,
            pdf_margin_pt: DEFAULT_PDF_MARGIN_PT,
            transparent: false,
            max_width_to_height: 3.0,
            max_height_to_width: 1.0,
            default_preamble: DEFAULT_PREAMBLE.to_string(),
            typeset_engine: "pdflatex".to_string(),
            typeset_timeout: Duration::from_secs(5),
            max_preamble_length: 4000,
            ghostscript_executables: vec![
                "gs".to_string(),
                "gswin64c".to_string(),
                "gswin32c".to_string(),
            ],
            server_addr: "127.0.0.1:8787".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    render: Option<RenderSection>,
    typeset: Option<TypesetSection>,
    ghostscript: Option<GhostscriptSection>,
    store: Option<StoreSection>,
    server: Option<ServerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderSection {
    build_dir: Option<String>,
    default_dpi: Option<u32>,
    pdf_margin_pt: Option<f64>,
    transparent: Option<bool>,
    max_width_to_height: Option<f64>,
    max_height_to_width: Option<f64>,
    default_preamble_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TypesetSection {
    engine: Option<String>,
    timeout_secs: Option<u64>,
    max_preamble_length: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct GhostscriptSection {
    executables: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreSection {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    addr: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    let home = paths::base_dir();
    ordered_paths.push(home.join("settings.toml"));
    ordered_paths.push(home.join("settings.local.toml"));

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings
                .merge_toml(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        }
    }

    settings.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(settings)
}

impl Settings {
    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed)
    }

    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(render) = incoming.render {
            if let Some(dir) = render.build_dir.as_deref().and_then(paths::configured_path) {
                self.build_dir = dir;
            }
            if let Some(dpi) = render.default_dpi {
                if dpi > 0 {
                    self.default_dpi = dpi;
                }
            }
            if let Some(margin) = render.pdf_margin_pt {
                self.pdf_margin_pt = clamp_margin(margin);
            }
            if let Some(transparent) = render.transparent {
                self.transparent = transparent;
            }
            if let Some(ratio) = render.max_width_to_height {
                if ratio > 0.0 {
                    self.max_width_to_height = ratio;
                }
            }
            if let Some(ratio) = render.max_height_to_width {
                if ratio > 0.0 {
                    self.max_height_to_width = ratio;
                }
            }
            if let Some(path) = render
                .default_preamble_path
                .as_deref()
                .and_then(paths::configured_path)
            {
                self.default_preamble = fs::read_to_string(&path).with_context(|| {
                    format!("failed to read default preamble: {}", path.display())
                })?;
            }
        }
        if let Some(typeset) = incoming.typeset {
            if let Some(engine) = typeset.engine {
                if !engine.trim().is_empty() {
                    self.typeset_engine = engine.trim().to_string();
                }
            }
            if let Some(secs) = typeset.timeout_secs {
                if secs > 0 {
                    self.typeset_timeout = Duration::from_secs(secs);
                }
            }
            if let Some(limit) = typeset.max_preamble_length {
                if limit > 0 {
                    self.max_preamble_length = limit;
                }
            }
        }
        if let Some(ghostscript) = incoming.ghostscript {
            if let Some(names) = ghostscript.executables {
                let names: Vec<String> = names
                    .into_iter()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect();
                if !names.is_empty() {
                    self.ghostscript_executables = names;
                }
            }
        }
        if let Some(store) = incoming.store {
            if let Some(path) = store.path.as_deref().and_then(paths::configured_path) {
                self.store_path = path;
            }
        }
        if let Some(server) = incoming.server {
            if let Some(addr) = server.addr {
                if !addr.trim().is_empty() {
                    self.server_addr = addr.trim().to_string();
                }
            }
        }
        Ok(())
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(PDF_MARGIN_ENV) {
            self.pdf_margin_pt = parse_margin(&raw);
        }
        if let Some(raw) = lookup(TRANSPARENT_ENV) {
            self.transparent = parse_toggle(&raw);
        }
    }
}

pub(crate) fn parse_margin(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => clamp_margin(value),
        _ => DEFAULT_PDF_MARGIN_PT,
    }
}

fn clamp_margin(value: f64) -> f64 {
    if value.is_finite() && value <= MAX_PDF_MARGIN_PT {
        value.max(0.0)
    } else {
        DEFAULT_PDF_MARGIN_PT
    }
}

pub(crate) fn parse_toggle(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn ensure_home_settings_file() -> Result<()> {
    let home = paths::base_dir();
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

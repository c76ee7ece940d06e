use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub mod error;
pub mod logging;
mod paths;
pub mod render;
pub mod server;
pub mod settings;
pub mod store;
#[cfg(all(test, unix))]
mod test_util;

pub use error::{RenderError, Tool};
pub use render::{Converter, RenderOutput, SessionId};
pub use settings::Settings;
pub use store::{DpiStore, JsonStore, PreambleStore, StoreError, UserId};

const DEFAULT_OUTPUT_PREFIX: &str = "expression";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub user: UserId,
    pub pdf: bool,
    pub output: Option<String>,
    pub set_dpi: Option<u32>,
    pub set_preamble: Option<String>,
    pub show_preamble: bool,
    pub show_default_preamble: bool,
    pub diagnose: bool,
    // Some("") serves on the configured address.
    pub server: Option<String>,
    pub settings_path: Option<String>,
}

pub async fn run(config: Config, input: Option<String>) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;
    let store = Arc::new(JsonStore::open(
        &settings.store_path,
        settings.default_preamble.clone(),
        settings.default_dpi,
    )?);

    if config.show_default_preamble {
        return Ok(store.get_default_preamble());
    }
    if config.show_preamble {
        return show_preamble(store.as_ref(), config.user);
    }
    if let Some(dpi) = config.set_dpi {
        store.set_dpi(config.user, dpi)?;
        return Ok(format!("dpi set to {}", dpi));
    }

    let server_addr = config
        .server
        .as_deref()
        .map(|addr| resolve_server_addr(addr, &settings.server_addr));
    let converter = Converter::new(settings, store.clone(), store.clone());

    if config.diagnose {
        return Ok(converter.diagnose());
    }
    if let Some(addr) = server_addr {
        server::run_server(converter, addr).await?;
        return Ok(String::new());
    }
    if let Some(path) = config.set_preamble.as_deref() {
        let preamble = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read preamble: {}", path))?;
        converter.validate_preamble(&preamble).await?;
        store.put_preamble(config.user, &preamble)?;
        return Ok("preamble updated".to_string());
    }

    let input = input.unwrap_or_default();
    let expression = input.trim();
    if expression.is_empty() {
        return Err(anyhow!("stdin is empty"));
    }

    let session = SessionId::generate();
    let output = converter
        .convert(expression, config.user, &session, config.pdf)
        .await
        .map_err(report_render_error)?;

    let prefix = config.output.as_deref().unwrap_or(DEFAULT_OUTPUT_PREFIX);
    write_outputs(prefix, &output)
}

fn show_preamble(store: &JsonStore, user: UserId) -> Result<String> {
    match store.get_preamble(user) {
        Ok(preamble) => Ok(preamble),
        Err(StoreError::NotFound(_)) => Ok(store.get_default_preamble()),
        Err(StoreError::Other(err)) => Err(err),
    }
}

fn resolve_server_addr(requested: &str, configured: &str) -> String {
    let requested = requested.trim();
    if requested.is_empty() {
        configured.to_string()
    } else {
        requested.to_string()
    }
}

fn report_render_error(err: RenderError) -> anyhow::Error {
    if let RenderError::Unexpected(inner) = &err {
        warn!("unexpected render failure: {:#}", inner);
    }
    err.into()
}

fn write_outputs(prefix: &str, output: &RenderOutput) -> Result<String> {
    let image_path = PathBuf::from(format!("{}.png", prefix));
    std::fs::write(&image_path, &output.image)
        .with_context(|| format!("failed to write {}", image_path.display()))?;
    let mut lines = vec![format!(
        "{} ({}x{})",
        image_path.display(),
        output.width,
        output.height
    )];

    if let Some(pdf) = output.pdf.as_ref() {
        let pdf_path = PathBuf::from(format!("{}.pdf", prefix));
        std::fs::write(&pdf_path, pdf)
            .with_context(|| format!("failed to write {}", pdf_path.display()))?;
        lines.push(pdf_path.display().to_string());
    }

    Ok(lines.join("\n"))
}

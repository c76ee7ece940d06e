use anyhow::{Context, anyhow};
use globset::{Glob, GlobMatcher};
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use super::Converter;
use super::{bbox, crop, document, raster, tools, typeset};
use crate::error::RenderError;
use crate::store::{StoreError, UserId};

// No `_` or `.`: `*_<id>.*` must match exactly one session's files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: &str) -> anyhow::Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(anyhow!("session id is empty"));
        }
        if !value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        {
            return Err(anyhow!(
                "session id may only contain ASCII letters, digits and '-': {}",
                value
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let seed = format!("{}:{}:{}", std::process::id(), nanos, seq);
        Self(format!("{:x}", md5::compute(seed.as_bytes())))
    }

    pub fn for_message(message_id: u64, user: UserId) -> Self {
        Self(format!("{}-{}", message_id, user))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SessionPaths {
    build_dir: PathBuf,
    id: SessionId,
}

impl SessionPaths {
    pub fn new(build_dir: &Path, id: &SessionId) -> Self {
        Self {
            build_dir: build_dir.to_path_buf(),
            id: id.clone(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn source(&self) -> PathBuf {
        self.file("expression_file", "tex")
    }

    pub fn cropped(&self) -> PathBuf {
        self.file("expression_file_cropped", "pdf")
    }

    pub fn image(&self) -> PathBuf {
        self.file("expression", "png")
    }

    pub fn validation_source(&self) -> PathBuf {
        self.file("validate_preamble", "tex")
    }

    pub fn cleanup_pattern(&self) -> String {
        format!("*_{}.*", self.id)
    }

    fn file(&self, prefix: &str, extension: &str) -> PathBuf {
        self.build_dir
            .join(format!("{}_{}.{}", prefix, self.id, extension))
    }
}

pub struct CleanupGuard {
    build_dir: PathBuf,
    pattern: String,
}

impl CleanupGuard {
    pub fn new(paths: &SessionPaths) -> Self {
        Self {
            build_dir: paths.build_dir().to_path_buf(),
            pattern: paths.cleanup_pattern(),
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let removed = remove_matching(&self.build_dir, &self.pattern);
        debug!("cleanup removed {} file(s) matching {}", removed, self.pattern);
    }
}

pub(crate) fn remove_matching(dir: &Path, pattern: &str) -> usize {
    let matcher: GlobMatcher = match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher(),
        Err(err) => {
            warn!("invalid cleanup pattern {}: {}", pattern, err);
            return 0;
        }
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let mut removed = 0;
    for entry in entries.filter_map(|entry| entry.ok()) {
        let name = entry.file_name();
        if !matcher.is_match(Path::new(&name)) {
            continue;
        }
        if fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub image: Vec<u8>,
    pub pdf: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

pub struct ConversionSession<'a> {
    converter: &'a Converter,
    paths: SessionPaths,
}

impl<'a> ConversionSession<'a> {
    pub fn new(converter: &'a Converter, id: &SessionId) -> Self {
        Self {
            converter,
            paths: SessionPaths::new(&converter.settings().build_dir, id),
        }
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub async fn convert(
        self,
        expression: &str,
        user: UserId,
        want_pdf: bool,
    ) -> Result<RenderOutput, RenderError> {
        let _cleanup = CleanupGuard::new(&self.paths);
        self.run(expression, user, want_pdf).await
    }

    async fn run(
        &self,
        expression: &str,
        user: UserId,
        want_pdf: bool,
    ) -> Result<RenderOutput, RenderError> {
        let settings = self.converter.settings();
        let toolchain = self.converter.toolchain();
        let self_contained = document::is_self_contained(expression);

        let source_text = if self_contained {
            expression.to_string()
        } else {
            let preamble = self.resolve_preamble(user)?;
            document::assemble(expression, &preamble)
        };

        tools::ensure_dir(self.paths.build_dir())?;
        let source = self.paths.source();
        fs::write(&source, source_text)
            .with_context(|| format!("failed to write {}", source.display()))?;

        let dpi = self.converter.dpi_store().get_dpi(user);
        let pdf = typeset::compile(
            &toolchain.typesetter,
            &source,
            self.paths.build_dir(),
            settings.typeset_timeout,
        )
        .await?;

        let measured = bbox::extract_box(&toolchain.ghostscript, dpi, &pdf).await?;
        let target = bbox::correct_aspect(
            dpi,
            measured,
            settings.max_width_to_height,
            settings.max_height_to_width,
        );

        let image_path = self.paths.image();
        raster::rasterize(
            &toolchain.ghostscript,
            dpi,
            &pdf,
            &image_path,
            &target,
            settings.transparent,
        )
        .await?;
        let image = fs::read(&image_path)
            .with_context(|| format!("failed to read {}", image_path.display()))?;
        let (width, height) = image_dimensions(&image)?;
        info!("rendered {}x{} image at {} dpi", width, height, dpi);

        let pdf_bytes = if !want_pdf {
            None
        } else if self_contained {
            Some(fs::read(&pdf).with_context(|| format!("failed to read {}", pdf.display()))?)
        } else {
            let cropped = self.paths.cropped();
            crop::crop(&toolchain.ghostscript, &pdf, &cropped, settings.pdf_margin_pt).await?;
            Some(
                fs::read(&cropped)
                    .with_context(|| format!("failed to read {}", cropped.display()))?,
            )
        };

        Ok(RenderOutput {
            image,
            pdf: pdf_bytes,
            width,
            height,
        })
    }

    fn resolve_preamble(&self, user: UserId) -> Result<String, RenderError> {
        let store = self.converter.preamble_store();
        match store.get_preamble(user) {
            Ok(preamble) => {
                debug!("preamble for user {} found", user);
                Ok(preamble)
            }
            Err(StoreError::NotFound(_)) => {
                debug!("preamble for user {} not found, using default", user);
                Ok(store.get_default_preamble())
            }
            Err(StoreError::Other(err)) => Err(err.into()),
        }
    }
}

fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), RenderError> {
    if bytes.is_empty() {
        return Err(anyhow!("rasterizer produced an empty image").into());
    }
    let dimensions = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .with_context(|| "failed to inspect rendered image")?
        .into_dimensions()
        .with_context(|| "rasterizer produced an unreadable image")?;
    Ok(dimensions)
}

// Fake engine triggers: `undefinedmacro`, `NOMARKER`, `HANG`. Fake gs: `EMPTYINK`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::error::Tool;
use crate::render::Converter;
use crate::render::tools::{Executable, Toolchain};
use crate::settings::Settings;
use crate::store::JsonStore;

pub(crate) const FIXTURE_WIDTH: u32 = 7;
pub(crate) const FIXTURE_HEIGHT: u32 = 5;
pub(crate) const CROPPED_PDF: &[u8] = b"%PDF-cropped\n";

const FAKE_ENGINE: &str = r#"#!/bin/sh
outdir="."
src=""
while [ $# -gt 0 ]; do
  case "$1" in
    -output-directory) outdir="$2"; shift 2 ;;
    -*) shift ;;
    *) src="$1"; shift ;;
  esac
done
stem=$(basename "$src" .tex)
cp "$src" "@TOOLS@/last_source.tex"
if grep -q 'HANG' "$src"; then
  exec sleep 30
fi
printf 'aux\n' > "$outdir/$stem.aux"
if grep -q 'undefinedmacro' "$src"; then
  printf 'This is fake TeX\n! Undefined control sequence.\nl.3 \\undefinedmacro\n\n! Emergency stop.\n' > "$outdir/$stem.log"
  exit 1
fi
if grep -q 'NOMARKER' "$src"; then
  printf 'fatal error without a marker\n' > "$outdir/$stem.log"
  exit 1
fi
printf 'Output written\n' > "$outdir/$stem.log"
cp "$src" "$outdir/$stem.pdf"
exit 0
"#;

const FAKE_GHOSTSCRIPT: &str = r#"#!/bin/sh
echo "$*" >> "@TOOLS@/gs_calls.log"
out=""
mode=""
last=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2; continue ;;
    -sDEVICE=bbox) mode="bbox" ;;
    -sDEVICE=png16m|-sDEVICE=pngalpha) mode="png" ;;
    -sDEVICE=pdfwrite) mode="pdf" ;;
  esac
  last="$1"
  shift
done
if [ ! -f "$last" ]; then
  echo "Error: /undefinedfilename" >&2
  exit 1
fi
case "$mode" in
  bbox)
    if grep -q 'EMPTYINK' "$last"; then
      printf '%%%%BoundingBox: 0 0 0 0\n%%%%HiResBoundingBox: 0 0 0 0\n' >&2
    else
      printf '%%%%BoundingBox: 10 20 110 220\n%%%%HiResBoundingBox: 10.1 20.2 109.9 219.8\n' >&2
    fi
    ;;
  png) cp "@TOOLS@/fixture.png" "$out" ;;
  pdf) printf '%%PDF-cropped\n' > "$out" ;;
esac
exit 0
"#;

pub(crate) struct FakeTools {
    dir: TempDir,
    build_dir: PathBuf,
}

impl FakeTools {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = dir.path().join("bin");
        fs::create_dir_all(&tools).expect("tools dir");
        write_script(&tools.join("pdflatex"), FAKE_ENGINE, &tools);
        write_script(&tools.join("gs"), FAKE_GHOSTSCRIPT, &tools);
        image::RgbImage::new(FIXTURE_WIDTH, FIXTURE_HEIGHT)
            .save(tools.join("fixture.png"))
            .expect("fixture png");
        let build_dir = dir.path().join("build");
        Self { dir, build_dir }
    }

    pub(crate) fn tools_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    pub(crate) fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub(crate) fn toolchain(&self) -> Toolchain {
        Toolchain {
            typesetter: Executable {
                tool: Tool::Typesetter,
                name: "pdflatex".to_string(),
                path: Some(self.tools_dir().join("pdflatex")),
            },
            ghostscript: Executable {
                tool: Tool::Ghostscript,
                name: "gs".to_string(),
                path: Some(self.tools_dir().join("gs")),
            },
        }
    }

    pub(crate) fn settings(&self) -> Settings {
        Settings {
            build_dir: self.build_dir.clone(),
            store_path: self.dir.path().join("store.json"),
            default_preamble: "\\documentclass{article}\n\\pagestyle{empty}".to_string(),
            typeset_timeout: Duration::from_secs(5),
            ..Settings::default()
        }
    }

    pub(crate) fn store(&self) -> Arc<JsonStore> {
        let settings = self.settings();
        Arc::new(
            JsonStore::open(
                &settings.store_path,
                settings.default_preamble.clone(),
                settings.default_dpi,
            )
            .expect("store"),
        )
    }

    pub(crate) fn converter(&self, settings: Settings, store: Arc<JsonStore>) -> Converter {
        Converter::with_toolchain(settings, self.toolchain(), store.clone(), store)
    }

    pub(crate) fn gs_calls(&self) -> String {
        fs::read_to_string(self.tools_dir().join("gs_calls.log")).unwrap_or_default()
    }

    pub(crate) fn last_source(&self) -> String {
        fs::read_to_string(self.tools_dir().join("last_source.tex")).unwrap_or_default()
    }

    pub(crate) fn build_files_containing(&self, needle: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.build_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| name.contains(needle))
            .collect()
    }
}

fn write_script(path: &Path, template: &str, tools: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let script = template.replace("@TOOLS@", &tools.to_string_lossy());
    fs::write(path, script).expect("write script");
    let mut permissions = fs::metadata(path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).expect("chmod");
}

use std::sync::Arc;
use std::time::Duration;

use latex_render_rust::render::Toolchain;
use latex_render_rust::{Converter, JsonStore, RenderError, SessionId, Settings};

const LETTER_WIDTH_PT: u32 = 612;
const LETTER_HEIGHT_PT: u32 = 792;

fn converter(dir: &tempfile::TempDir) -> Option<Converter> {
    let settings = Settings {
        build_dir: dir.path().join("build"),
        store_path: dir.path().join("store.json"),
        typeset_timeout: Duration::from_secs(30),
        ..Settings::default()
    };
    let toolchain = Toolchain::from_settings(&settings);
    if toolchain.typesetter.path.is_none() || toolchain.ghostscript.path.is_none() {
        eprintln!("skipping: pdflatex or gs not installed");
        return None;
    }
    let store = Arc::new(
        JsonStore::open(
            &settings.store_path,
            settings.default_preamble.clone(),
            settings.default_dpi,
        )
        .expect("store"),
    );
    Some(Converter::with_toolchain(
        settings,
        toolchain,
        store.clone(),
        store,
    ))
}

// At 72 dpi one pixel is one point.
fn pdf_page_sizes(converter: &Converter, pdf: &[u8]) -> Vec<(u32, u32)> {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("cropped.pdf");
    std::fs::write(&input, pdf).expect("write pdf");
    let status = std::process::Command::new(converter.toolchain().ghostscript.program())
        .arg("-q")
        .arg("-dBATCH")
        .arg("-dNOPAUSE")
        .arg("-sDEVICE=png16m")
        .arg("-r72")
        .arg("-o")
        .arg(dir.path().join("page-%d.png"))
        .arg(&input)
        .status()
        .expect("run gs");
    assert!(status.success());

    let mut pages: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read pages")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
        .collect();
    pages.sort();
    pages
        .iter()
        .map(|page| image::image_dimensions(page).expect("page dimensions"))
        .collect()
}

fn leftover_files(dir: &tempfile::TempDir) -> usize {
    std::fs::read_dir(dir.path().join("build"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn renders_small_expression_with_cropped_pdf() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some(converter) = converter(&dir) else {
        return;
    };
    let session = SessionId::new("e2e-square").expect("id");
    let output = converter
        .convert("$x^2$", 1, &session, true)
        .await
        .expect("render");

    assert!(output.image.starts_with(b"\x89PNG"));
    assert!(output.width > 0 && output.height > 0);
    // 300 dpi over a letter-width page would be 2550 px.
    assert!(output.width < LETTER_WIDTH_PT * 300 / 72);

    let pdf = output.pdf.expect("pdf requested");
    assert!(pdf.starts_with(b"%PDF"));
    let pages = pdf_page_sizes(&converter, &pdf);
    assert_eq!(pages.len(), 1, "{pages:?}");
    let (width, height) = pages[0];
    assert!(width < LETTER_WIDTH_PT && height < LETTER_HEIGHT_PT, "{width}x{height}");
    assert_eq!(leftover_files(&dir), 0);
}

#[tokio::test]
async fn blank_math_is_an_empty_expression() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some(converter) = converter(&dir) else {
        return;
    };
    let session = SessionId::new("e2e-blank").expect("id");
    let err = converter
        .convert("$ $", 1, &session, false)
        .await
        .expect_err("nothing to render");
    assert!(matches!(err, RenderError::EmptyExpression), "{err:?}");
    assert_eq!(leftover_files(&dir), 0);
}

#[tokio::test]
async fn undefined_command_reports_engine_diagnostic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some(converter) = converter(&dir) else {
        return;
    };
    let session = SessionId::new("e2e-undefined").expect("id");
    let err = converter
        .convert("$\\notacommand$", 1, &session, false)
        .await
        .expect_err("compile error");
    match err {
        RenderError::CompileFailed(message) => {
            assert!(message.starts_with("! Undefined control sequence."), "{message}")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

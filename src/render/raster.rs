use anyhow::anyhow;
use std::ffi::OsString;
use std::path::Path;

use super::bbox::BoundingBox;
use super::tools::{self, Executable};
use crate::error::RenderError;

const OPAQUE_DEVICE: &str = "png16m";
const TRANSPARENT_DEVICE: &str = "pngalpha";
const WHITE_BACKGROUND: &str = "-dBackgroundColor=16#FFFFFF";

pub fn target_size(bbox: &BoundingBox) -> (u32, u32) {
    let clamp = |value: f64| value.round().max(1.0).min(u32::MAX as f64) as u32;
    (clamp(bbox.width), clamp(bbox.height))
}

pub(crate) fn ps_number(value: f64) -> String {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    if rounded == 0.0 {
        return "0".to_string();
    }
    format!("{}", rounded)
}

pub(crate) fn raster_args(
    dpi: u32,
    pdf: &Path,
    out: &Path,
    bbox: &BoundingBox,
    transparent: bool,
) -> Vec<OsString> {
    let (width, height) = target_size(bbox);
    let mut args: Vec<OsString> = vec![
        "-o".into(),
        out.as_os_str().to_owned(),
        format!("-r{}", dpi).into(),
        format!("-g{}x{}", width, height).into(),
        "-dLastPage=1".into(),
    ];
    if !transparent {
        args.push(WHITE_BACKGROUND.into());
    }
    let device = if transparent {
        TRANSPARENT_DEVICE
    } else {
        OPAQUE_DEVICE
    };
    args.push(format!("-sDEVICE={}", device).into());
    args.push("-dTextAlphaBits=4".into());
    args.push("-dGraphicsAlphaBits=4".into());
    args.push("-c".into());
    args.push(
        format!(
            "<</Install {{{} {} translate}}>> setpagedevice",
            ps_number(bbox.translate_x),
            ps_number(bbox.translate_y)
        )
        .into(),
    );
    args.push("-f".into());
    args.push(pdf.as_os_str().to_owned());
    args
}

pub async fn rasterize(
    ghostscript: &Executable,
    dpi: u32,
    pdf: &Path,
    out: &Path,
    bbox: &BoundingBox,
    transparent: bool,
) -> Result<(), RenderError> {
    let output = ghostscript
        .output(raster_args(dpi, pdf, out, bbox, transparent))
        .await?;
    if !output.status.success() {
        return Err(anyhow!(
            "{} failed to rasterize: {}",
            ghostscript.name,
            tools::combined_output(&output).trim()
        )
        .into());
    }
    Ok(())
}

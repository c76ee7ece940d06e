use anyhow::anyhow;
use std::ffi::OsString;
use std::path::Path;

use super::bbox::{self, RawBounds};
use super::tools::{self, Executable};
use crate::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropGeometry {
    pub width: i64,
    pub height: i64,
    pub offset_x: i64,
    pub offset_y: i64,
}

// Margin is truncated to whole points, the lower-left ink corner lands at (margin, margin).
pub fn crop_geometry(bounds: RawBounds, margin: f64) -> Result<CropGeometry, RenderError> {
    let margin = if margin.is_finite() { margin.max(0.0) } else { 0.0 };
    let inset = margin as i64;
    let double = (2.0 * margin) as i64;
    let overflow = || anyhow!("crop margin {} does not fit the page bounds {:?}", margin, bounds);

    let width = bounds
        .urx
        .checked_sub(bounds.llx)
        .and_then(|span| span.checked_add(double))
        .ok_or_else(overflow)?;
    let height = bounds
        .ury
        .checked_sub(bounds.lly)
        .and_then(|span| span.checked_add(double))
        .ok_or_else(overflow)?;
    let offset_x = inset.checked_sub(bounds.llx).ok_or_else(overflow)?;
    let offset_y = inset.checked_sub(bounds.lly).ok_or_else(overflow)?;
    Ok(CropGeometry {
        width,
        height,
        offset_x,
        offset_y,
    })
}

pub(crate) fn crop_args(pdf: &Path, out: &Path, geometry: CropGeometry) -> Vec<OsString> {
    vec![
        "-o".into(),
        out.as_os_str().to_owned(),
        "-sDEVICE=pdfwrite".into(),
        format!("-dDEVICEWIDTHPOINTS={}", geometry.width).into(),
        format!("-dDEVICEHEIGHTPOINTS={}", geometry.height).into(),
        "-dFIXEDMEDIA".into(),
        "-c".into(),
        format!(
            "<</PageOffset [{} {}]>> setpagedevice",
            geometry.offset_x, geometry.offset_y
        )
        .into(),
        "-f".into(),
        pdf.as_os_str().to_owned(),
    ]
}

// Measures raw bounds again; the raster box carries its own padding.
pub async fn crop(
    ghostscript: &Executable,
    pdf: &Path,
    out: &Path,
    margin: f64,
) -> Result<CropGeometry, RenderError> {
    let bounds = bbox::extract_bounds(ghostscript, pdf).await?;
    if bounds.is_degenerate() {
        return Err(RenderError::EmptyExpression);
    }
    let geometry = crop_geometry(bounds, margin)?;
    let output = ghostscript.output(crop_args(pdf, out, geometry)).await?;
    if !output.status.success() {
        return Err(anyhow!(
            "{} failed to crop pdf: {}",
            ghostscript.name,
            tools::combined_output(&output).trim()
        )
        .into());
    }
    Ok(geometry)
}

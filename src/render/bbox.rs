use std::ffi::OsStr;
use std::path::Path;
use tracing::warn;

use super::tools::{self, Executable};
use crate::error::RenderError;

pub const POINTS_PER_INCH: f64 = 72.0;
pub const HORIZONTAL_PADDING: f64 = 0.25 * POINTS_PER_INCH;
pub const VERTICAL_PADDING: f64 = 0.1 * POINTS_PER_INCH;

const BOUNDING_BOX_LABEL: &str = "%%BoundingBox";
const RATIO_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBounds {
    pub llx: i64,
    pub lly: i64,
    pub urx: i64,
    pub ury: i64,
}

impl RawBounds {
    pub fn is_degenerate(&self) -> bool {
        self.llx == self.urx || self.lly == self.ury
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub width: f64,
    pub height: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

pub fn parse_bounds(report: &str) -> Result<RawBounds, RenderError> {
    let start = report
        .match_indices(BOUNDING_BOX_LABEL)
        .map(|(idx, _)| idx)
        .find(|idx| *idx == 0 || report[..*idx].ends_with('\n'))
        .unwrap_or(0);
    let text = &report[start..];

    let colon = text.find(':').ok_or(RenderError::EmptyExpression)?;
    let newline = text.find('\n').ok_or(RenderError::EmptyExpression)?;
    if newline < colon {
        return Err(RenderError::EmptyExpression);
    }

    let values = text[colon + 1..newline]
        .split_whitespace()
        .map(|token| token.parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| RenderError::EmptyExpression)?;
    match values.as_slice() {
        [llx, lly, urx, ury] => Ok(RawBounds {
            llx: *llx,
            lly: *lly,
            urx: *urx,
            ury: *ury,
        }),
        _ => Err(RenderError::EmptyExpression),
    }
}

// Translation stays in points; the rasterizer applies it before scaling.
pub fn box_from_bounds(dpi: u32, bounds: RawBounds) -> Result<BoundingBox, RenderError> {
    if bounds.is_degenerate() {
        warn!("expression had a zero width/height bounding box");
        return Err(RenderError::EmptyExpression);
    }
    let llx = bounds.llx as f64 - HORIZONTAL_PADDING;
    let lly = bounds.lly as f64 - VERTICAL_PADDING;
    let urx = bounds.urx as f64 + HORIZONTAL_PADDING;
    let ury = bounds.ury as f64 + VERTICAL_PADDING;
    let size_factor = dpi as f64 / POINTS_PER_INCH;
    Ok(BoundingBox {
        width: (urx - llx) * size_factor,
        height: (ury - lly) * size_factor,
        translate_x: -llx,
        translate_y: -lly,
    })
}

pub async fn extract_bounds(ghostscript: &Executable, pdf: &Path) -> Result<RawBounds, RenderError> {
    let output = ghostscript
        .output([
            OsStr::new("-q"),
            OsStr::new("-dBATCH"),
            OsStr::new("-dNOPAUSE"),
            OsStr::new("-sDEVICE=bbox"),
            pdf.as_os_str(),
        ])
        .await?;
    if !output.status.success() {
        return Err(RenderError::EmptyExpression);
    }
    parse_bounds(&tools::combined_output(&output))
}

pub async fn extract_box(
    ghostscript: &Executable,
    dpi: u32,
    pdf: &Path,
) -> Result<BoundingBox, RenderError> {
    let bounds = extract_bounds(ghostscript, pdf).await?;
    box_from_bounds(dpi, bounds)
}

pub fn correct_aspect(
    dpi: u32,
    bbox: BoundingBox,
    max_width_to_height: f64,
    max_height_to_width: f64,
) -> BoundingBox {
    let size_factor = dpi as f64 / POINTS_PER_INCH;
    let mut corrected = bbox;
    if exceeds(bbox.width, max_width_to_height * bbox.height) {
        let height = bbox.width / max_width_to_height;
        corrected.translate_y += (height - bbox.height) / 2.0 / size_factor;
        corrected.height = height;
    } else if exceeds(bbox.height, max_height_to_width * bbox.width) {
        let width = bbox.height / max_height_to_width;
        corrected.translate_x += (width - bbox.width) / 2.0 / size_factor;
        corrected.width = width;
    }
    corrected
}

fn exceeds(value: f64, limit: f64) -> bool {
    value - limit > RATIO_TOLERANCE * value.abs().max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn parses_generic_bounds_line() {
        let bounds = parse_bounds("bbox: 10 20 110 220\n").expect("bounds");
        assert_eq!(
            bounds,
            RawBounds {
                llx: 10,
                lly: 20,
                urx: 110,
                ury: 220
            }
        );
    }

    #[test]
    fn prefers_bounding_box_line_after_warnings() {
        let report = "   **** Warning: something odd\n%%BoundingBox: 133 705 186 719\n%%HiResBoundingBox: 133.8 705.4 185.9 718.6\n";
        let bounds = parse_bounds(report).expect("bounds");
        assert_eq!(bounds.llx, 133);
        assert_eq!(bounds.ury, 719);
    }

    #[test]
    fn malformed_reports_are_empty_expressions() {
        for report in [
            "bbox 10 20 110 220\n",
            "bbox: 10 20 110 220",
            "bbox: 10 20 x 220\n",
            "bbox: 10 20 110\n",
            "",
        ] {
            assert!(
                matches!(parse_bounds(report), Err(RenderError::EmptyExpression)),
                "{report:?} should not parse"
            );
        }
    }

    #[test]
    fn zero_area_bounds_are_rejected() {
        let flat = RawBounds {
            llx: 10,
            lly: 20,
            urx: 10,
            ury: 220,
        };
        assert!(matches!(
            box_from_bounds(300, flat),
            Err(RenderError::EmptyExpression)
        ));
        let thin = RawBounds {
            llx: 10,
            lly: 20,
            urx: 110,
            ury: 20,
        };
        assert!(matches!(
            box_from_bounds(300, thin),
            Err(RenderError::EmptyExpression)
        ));
    }

    #[test]
    fn padding_and_scaling_follow_points_per_inch() {
        let bounds = parse_bounds("bbox: 10 20 110 220\n").expect("bounds");
        let bbox = box_from_bounds(72, bounds).expect("box");
        assert_close(bbox.translate_x, 8.0);
        assert_close(bbox.translate_y, -12.8);
        assert_close(bbox.width, 110.0 - 10.0 + 2.0 * 18.0);
        assert_close(bbox.height, 220.0 - 20.0 + 2.0 * 7.2);

        let scaled = box_from_bounds(300, bounds).expect("box");
        assert_close(scaled.width, 136.0 * 300.0 / 72.0);
        assert_close(scaled.height, 214.4 * 300.0 / 72.0);
        assert_close(scaled.translate_x, 8.0);
        assert_close(scaled.translate_y, -12.8);
    }

    #[test]
    fn wide_box_grows_height_and_recentres() {
        let bbox = BoundingBox {
            width: 600.0,
            height: 100.0,
            translate_x: 5.0,
            translate_y: 5.0,
        };
        let corrected = correct_aspect(144, bbox, 3.0, 1.0);
        assert_close(corrected.width, 600.0);
        assert_close(corrected.height, 200.0);
        assert_close(corrected.translate_x, 5.0);
        // 100px of extra height at 2px per point, split top and bottom
        assert_close(corrected.translate_y, 5.0 + 25.0);
    }

    #[test]
    fn tall_box_grows_width_and_recentres() {
        let bbox = BoundingBox {
            width: 136.0,
            height: 214.4,
            translate_x: 8.0,
            translate_y: -12.8,
        };
        let corrected = correct_aspect(72, bbox, 3.0, 1.0);
        assert_close(corrected.width, 214.4);
        assert_close(corrected.height, 214.4);
        assert_close(corrected.translate_x, 8.0 + 39.2);
        assert_close(corrected.translate_y, -12.8);
    }

    #[test]
    fn box_within_limits_is_unchanged() {
        let bbox = BoundingBox {
            width: 200.0,
            height: 100.0,
            translate_x: 1.0,
            translate_y: 2.0,
        };
        assert_eq!(correct_aspect(300, bbox, 3.0, 1.0), bbox);
    }

    #[test]
    fn correction_is_idempotent_and_satisfies_both_limits() {
        let samples = [
            (1000.0, 1.0),
            (1.0, 1000.0),
            (333.3, 111.1),
            (123.456, 789.012),
            (1e6, 3.3),
            (0.7, 0.2),
        ];
        for dpi in [100, 300, 997] {
            for (width, height) in samples {
                let bbox = BoundingBox {
                    width,
                    height,
                    translate_x: 3.5,
                    translate_y: -1.25,
                };
                let once = correct_aspect(dpi, bbox, 3.0, 1.0);
                let twice = correct_aspect(dpi, once, 3.0, 1.0);
                assert_eq!(once, twice, "not idempotent for {width}x{height}");
                assert!(!exceeds(once.width, 3.0 * once.height));
                assert!(!exceeds(once.height, once.width));
            }
        }
    }
}

//! Appearance streams for edited and new annotations.
//!
//! Path-based appearances (ink, highlight, stamp) are built here. Anything
//! that needs font metrics goes through an [`AppearanceGenerator`].

use super::NewAnnotation;
use crate::model::{PDFDict, PDFObject};
use crate::utils::number_to_string;

/// Renders text appearances for the save.
///
/// Returning `None` leaves the appearance to the viewer: text widgets then
/// get `/NeedAppearances true` on the form, free text gets no `/AP`.
pub trait AppearanceGenerator: Send + Sync {
    /// Content stream of a text or choice widget showing `value`.
    fn text_field(&self, _widget: &PDFDict, _value: &[String]) -> Option<Vec<u8>> {
        None
    }

    /// Content stream of a free text annotation, drawn with font `/Helv`.
    fn free_text(&self, _annotation: &NewAnnotation) -> Option<Vec<u8>> {
        None
    }
}

/// Defers every text appearance to the viewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewerAppearances;

impl AppearanceGenerator for ViewerAppearances {}

/// Color operator for an 8-bit RGB triple; gray when all channels agree.
pub fn pdf_color(color: [u8; 3], fill: bool) -> String {
    let [r, g, b] = color.map(|c| number_to_string(f64::from(c) / 255.0));
    if color[0] == color[1] && color[1] == color[2] {
        format!("{r} {}", if fill { "g" } else { "G" })
    } else {
        format!("{r} {g} {b} {}", if fill { "rg" } else { "RG" })
    }
}

/// `/C` array for an 8-bit RGB triple.
pub fn pdf_color_array(color: [u8; 3]) -> PDFObject {
    PDFObject::Array(
        color
            .iter()
            .map(|&c| PDFObject::Real(f64::from(c) / 255.0))
            .collect(),
    )
}

/// Matrix mapping an unrotated `width x height` box onto the rotated page.
pub fn rotation_matrix(rotation: i64, width: f64, height: f64) -> Option<[f64; 6]> {
    match rotation.rem_euclid(360) {
        90 => Some([0.0, 1.0, -1.0, 0.0, width, 0.0]),
        180 => Some([-1.0, 0.0, 0.0, -1.0, width, height]),
        270 => Some([0.0, -1.0, 1.0, 0.0, 0.0, height]),
        _ => None,
    }
}

pub fn numbers(values: &[f64]) -> PDFObject {
    PDFObject::Array(values.iter().map(|&v| PDFObject::Real(v)).collect())
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|&v| number_to_string(v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stroked paths of an ink annotation.
pub fn ink_content(annotation: &NewAnnotation) -> Vec<u8> {
    let thickness = annotation.thickness.unwrap_or(1.0);
    let mut ops = vec![
        format!("{} w 1 J 1 j", number_to_string(thickness)),
        pdf_color(annotation.color, false),
    ];
    if annotation.opacity != 1.0 {
        ops.push("/R0 gs".into());
    }
    for path in &annotation.paths {
        let [x, y, curves @ ..] = path.bezier.as_slice() else {
            continue;
        };
        let start = join(&[*x, *y]);
        ops.push(format!("{start} m"));
        if curves.is_empty() {
            ops.push(format!("{start} l S"));
            continue;
        }
        for curve in curves.chunks(6) {
            ops.push(format!("{} c", join(curve)));
        }
        ops.push("S".into());
    }
    ops.join("\n").into_bytes()
}

/// Filled outlines of a highlight annotation.
pub fn highlight_content(annotation: &NewAnnotation) -> Vec<u8> {
    let mut ops = vec![pdf_color(annotation.color, true), "/R0 gs".to_string()];
    for outline in &annotation.outlines {
        let mut points = outline.chunks_exact(2);
        let Some(first) = points.next() else {
            continue;
        };
        let mut lines = vec![format!("{} m", join(first))];
        lines.extend(points.map(|p| format!("{} l", join(p))));
        lines.push("h".into());
        ops.push(lines.join("\n"));
    }
    ops.push("f*".into());
    ops.join("\n").into_bytes()
}

/// Draws image `/Im0` over the whole box.
pub fn stamp_content(width: f64, height: f64) -> Vec<u8> {
    format!(
        "q {} 0 0 {} 0 0 cm /Im0 Do Q",
        number_to_string(width),
        number_to_string(height)
    )
    .into_bytes()
}

/// `/ExtGState << /R0 ... >>` resources for a translucent appearance.
pub fn ext_gstate_resources(opacity: f64, multiply: bool) -> PDFDict {
    let mut gs = PDFDict::new();
    gs.insert("CA".into(), PDFObject::Real(opacity));
    if multiply {
        gs.insert("BM".into(), PDFObject::name("Multiply"));
    }
    gs.insert("Type".into(), PDFObject::name("ExtGState"));
    let mut states = PDFDict::new();
    states.insert("R0".into(), PDFObject::Dict(gs));
    let mut resources = PDFDict::new();
    resources.insert("ExtGState".into(), PDFObject::Dict(states));
    resources
}

/// Form XObject attributes shared by every new appearance.
pub fn form_xobject_attrs(bbox: &[f64]) -> PDFDict {
    let mut attrs = PDFDict::new();
    attrs.insert("FormType".into(), PDFObject::Int(1));
    attrs.insert("Subtype".into(), PDFObject::name("Form"));
    attrs.insert("Type".into(), PDFObject::name("XObject"));
    attrs.insert("BBox".into(), numbers(bbox));
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::InkPath;

    #[test]
    fn test_pdf_color() {
        assert_eq!(pdf_color([0, 0, 0], true), "0 g");
        assert_eq!(pdf_color([255, 0, 0], false), "1 0 0 RG");
        assert_eq!(pdf_color([51, 51, 51], false), "0.2 G");
    }

    #[test]
    fn test_ink_content() {
        let annotation = NewAnnotation {
            thickness: Some(2.0),
            color: [255, 0, 0],
            opacity: 0.5,
            paths: vec![
                InkPath {
                    bezier: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
                    points: vec![],
                },
                InkPath {
                    bezier: vec![9.0, 9.5],
                    points: vec![],
                },
            ],
            ..NewAnnotation::default()
        };
        assert_eq!(
            String::from_utf8(ink_content(&annotation)).unwrap(),
            "2 w 1 J 1 j\n1 0 0 RG\n/R0 gs\n1 2 m\n3 4 5 6 7 8 c\nS\n9 9.5 m\n9 9.5 l S"
        );
    }

    #[test]
    fn test_highlight_content() {
        let annotation = NewAnnotation {
            color: [255, 255, 0],
            outlines: vec![vec![0.0, 0.0, 10.0, 0.0, 10.0, 5.0]],
            ..NewAnnotation::default()
        };
        assert_eq!(
            String::from_utf8(highlight_content(&annotation)).unwrap(),
            "1 1 0 rg\n/R0 gs\n0 0 m\n10 0 l\n10 5 l\nh\nf*"
        );
    }

    #[test]
    fn test_rotation_matrix() {
        assert_eq!(rotation_matrix(0, 10.0, 20.0), None);
        assert_eq!(
            rotation_matrix(-90, 10.0, 20.0),
            Some([0.0, -1.0, 1.0, 0.0, 0.0, 20.0])
        );
    }
}

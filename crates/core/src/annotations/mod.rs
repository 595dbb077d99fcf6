//! Annotation edits: the edit store and the records they turn into.
//!
//! Edits arrive as JSON keyed by annotation id. Existing widgets are keyed
//! by their reference (`12R`) and carry a new value or flags; editor
//! annotations carry a page index and describe a whole annotation.

pub mod appearance;
pub mod editor;
pub mod fields;

pub use appearance::{AppearanceGenerator, ViewerAppearances};
pub use editor::{AnnotationBuilder, EditorPlan, PageEdits, builder_for};
pub use fields::{WidgetSave, save_page_fields};

use crate::error::Result;
use crate::structure::AccessibilityData;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Every pending edit of one save, in submission order.
pub type AnnotationStorage = IndexMap<String, AnnotationEdit>;

/// Parse an edit store from JSON.
pub fn storage_from_json(json: &str) -> Result<AnnotationStorage> {
    Ok(serde_json::from_str(json)?)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AnnotationEdit {
    /// An annotation drawn in the editor, or an existing one it changed or deleted.
    New(Box<NewAnnotation>),
    /// A new value or new flags for an existing widget.
    Field(FieldEdit),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEdit {
    pub value: Option<FieldValue>,
    pub no_view: Option<bool>,
    pub no_print: Option<bool>,
    pub rotation: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorKind {
    FreeText,
    Ink,
    Highlight,
    Stamp,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InkPath {
    /// `x0 y0` followed by cubic segments, six numbers each.
    pub bezier: Vec<f64>,
    /// Flat point list written to `/InkList`.
    pub points: Vec<f64>,
}

/// A DCT-encoded image placed by a stamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StampImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

fn full_opacity() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnnotation {
    pub page_index: usize,
    #[serde(rename = "annotationType")]
    pub kind: Option<EditorKind>,
    #[serde(default)]
    pub rect: [f64; 4],
    #[serde(default)]
    pub rotation: i64,
    pub user: Option<String>,
    #[serde(default)]
    pub color: [u8; 3],
    #[serde(default = "full_opacity")]
    pub opacity: f64,
    pub value: Option<String>,
    pub font_size: Option<f64>,
    #[serde(default)]
    pub paths: Vec<InkPath>,
    pub thickness: Option<f64>,
    pub quad_points: Option<Vec<f64>>,
    #[serde(default)]
    pub outlines: Vec<Vec<f64>>,
    pub image: Option<StampImage>,
    pub accessibility_data: Option<AccessibilityData>,
    pub struct_tree_parent_id: Option<String>,
    /// Id of the annotation this edit replaces or deletes.
    #[serde(rename = "id")]
    pub existing_id: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    pub popup_ref: Option<String>,
}

impl NewAnnotation {
    pub fn width(&self) -> f64 {
        self.rect[2] - self.rect[0]
    }

    pub fn height(&self) -> f64 {
        self.rect[3] - self.rect[1]
    }
}

/// Editor annotations grouped by page, pages ascending.
pub fn new_annotations_by_page(storage: &AnnotationStorage) -> BTreeMap<usize, Vec<&NewAnnotation>> {
    let mut by_page: BTreeMap<usize, Vec<&NewAnnotation>> = BTreeMap::new();
    for edit in storage.values() {
        if let AnnotationEdit::New(annotation) = edit {
            by_page
                .entry(annotation.page_index)
                .or_default()
                .push(annotation);
        }
    }
    by_page
}

/// Annotation flag bits touched by edits.
pub mod flags {
    pub const HIDDEN: i64 = 1 << 1;
    pub const PRINT: i64 = 1 << 2;
    pub const NOVIEW: i64 = 1 << 5;
}

/// New `/F` value for the visibility edits, or `None` when neither is set.
pub fn build_flags(current: i64, no_view: Option<bool>, no_print: Option<bool>) -> Option<i64> {
    use flags::{HIDDEN, NOVIEW, PRINT};

    let mut f = current;
    match no_view {
        None => match no_print {
            None => return None,
            Some(true) => f &= !PRINT,
            Some(false) => f = (f & !HIDDEN) | PRINT,
        },
        Some(true) => {
            if no_print == Some(true) {
                f |= HIDDEN;
            } else {
                f = (f & !HIDDEN) | NOVIEW | PRINT;
            }
        }
        Some(false) => {
            f &= !(HIDDEN | NOVIEW);
            if no_print == Some(true) {
                f &= !PRINT;
            } else {
                f |= PRINT;
            }
        }
    }
    Some(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_distinguishes_fields_and_editors() {
        let storage = storage_from_json(
            r#"{
                "12R": {"value": true},
                "14R": {"value": ["a", "b"], "noPrint": true},
                "pdfjs_internal_editor_0": {
                    "annotationType": "ink", "pageIndex": 0, "rect": [0, 0, 10, 10],
                    "color": [255, 0, 0], "thickness": 2,
                    "paths": [{"bezier": [1, 1], "points": [1, 1]}]
                },
                "pdfjs_internal_editor_1": {"pageIndex": 1, "id": "30R", "deleted": true}
            }"#,
        )
        .unwrap();

        assert_eq!(
            storage["12R"],
            AnnotationEdit::Field(FieldEdit {
                value: Some(FieldValue::Bool(true)),
                ..FieldEdit::default()
            })
        );
        let AnnotationEdit::Field(choice) = &storage["14R"] else {
            panic!("expected a field edit");
        };
        assert_eq!(
            choice.value,
            Some(FieldValue::List(vec!["a".into(), "b".into()]))
        );
        assert_eq!(choice.no_print, Some(true));

        let AnnotationEdit::New(ink) = &storage["pdfjs_internal_editor_0"] else {
            panic!("expected an editor annotation");
        };
        assert_eq!(ink.kind, Some(EditorKind::Ink));
        assert_eq!(ink.opacity, 1.0);
        assert_eq!(ink.width(), 10.0);

        let by_page = new_annotations_by_page(&storage);
        assert_eq!(by_page.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert!(by_page[&1][0].deleted);
    }

    #[test]
    fn test_build_flags() {
        use flags::*;
        assert_eq!(build_flags(PRINT, None, None), None);
        assert_eq!(build_flags(PRINT, None, Some(true)), Some(0));
        assert_eq!(build_flags(HIDDEN, None, Some(false)), Some(PRINT));
        assert_eq!(build_flags(PRINT, Some(true), Some(true)), Some(PRINT | HIDDEN));
        assert_eq!(build_flags(HIDDEN, Some(true), None), Some(NOVIEW | PRINT));
        assert_eq!(build_flags(HIDDEN | NOVIEW, Some(false), Some(true)), Some(0));
        assert_eq!(build_flags(NOVIEW, Some(false), None), Some(PRINT));
    }
}

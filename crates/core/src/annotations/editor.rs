//! New annotations drawn in the editor.
//!
//! Each editor kind maps to an [`AnnotationBuilder`]: a pair of plain
//! functions building the annotation dictionary and its appearance stream.
//! References are reserved per page in [`PageEdits::plan`], sequentially, so
//! the parallel build stage only fills in bodies.

use super::appearance::{
    AppearanceGenerator, ext_gstate_resources, form_xobject_attrs, highlight_content, ink_content,
    numbers, pdf_color, pdf_color_array, rotation_matrix, stamp_content,
};
use super::{EditorKind, NewAnnotation};
use crate::document::{TemporaryRefs, XRef};
use crate::error::Result;
use crate::model::{PDFDict, PDFObjRef, PDFObject, PDFStream, RefSet};
use crate::structure::{TaggedElement, TaggedPage};
use crate::utils::{encode_text, number_to_string};
use crate::writer::Change;
use tracing::{debug, warn};

/// Where an annotation's appearance comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppearanceSource {
    /// Built from the edit's own geometry.
    Paths,
    /// Draws the edit's image; needs an image XObject.
    Image,
    /// Asked of the [`AppearanceGenerator`].
    Generated,
}

/// References one new annotation writes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationRefs {
    pub annotation: PDFObjRef,
    pub appearance: Option<PDFObjRef>,
    pub image: Option<PDFObjRef>,
    pub font: Option<PDFObjRef>,
}

/// Inputs of the build functions.
pub struct BuildContext<'a> {
    pub refs: AnnotationRefs,
    pub date: &'a str,
    pub existing: Option<&'a PDFDict>,
    pub parent_tree_id: Option<i64>,
    pub generated: Option<&'a [u8]>,
}

pub struct AnnotationBuilder {
    pub subtype: &'static str,
    pub appearance: AppearanceSource,
    pub build_dict: fn(&NewAnnotation, &BuildContext<'_>) -> PDFDict,
    pub build_appearance: fn(&NewAnnotation, &BuildContext<'_>) -> Option<PDFStream>,
}

const FREE_TEXT: AnnotationBuilder = AnnotationBuilder {
    subtype: "FreeText",
    appearance: AppearanceSource::Generated,
    build_dict: free_text_dict,
    build_appearance: free_text_appearance,
};

const INK: AnnotationBuilder = AnnotationBuilder {
    subtype: "Ink",
    appearance: AppearanceSource::Paths,
    build_dict: ink_dict,
    build_appearance: ink_appearance,
};

const HIGHLIGHT: AnnotationBuilder = AnnotationBuilder {
    subtype: "Highlight",
    appearance: AppearanceSource::Paths,
    build_dict: highlight_dict,
    build_appearance: highlight_appearance,
};

/// Free-hand highlight: an ink annotation filled like a highlight.
const FREE_HIGHLIGHT: AnnotationBuilder = AnnotationBuilder {
    subtype: "Ink",
    appearance: AppearanceSource::Paths,
    build_dict: ink_dict,
    build_appearance: highlight_appearance,
};

const STAMP: AnnotationBuilder = AnnotationBuilder {
    subtype: "Stamp",
    appearance: AppearanceSource::Image,
    build_dict: stamp_dict,
    build_appearance: stamp_appearance,
};

pub fn builder_for(kind: EditorKind, annotation: &NewAnnotation) -> &'static AnnotationBuilder {
    match kind {
        EditorKind::FreeText => &FREE_TEXT,
        EditorKind::Ink => &INK,
        EditorKind::Highlight if annotation.quad_points.is_some() => &HIGHLIGHT,
        EditorKind::Highlight => &FREE_HIGHLIGHT,
        EditorKind::Stamp => &STAMP,
    }
}

/// Entries every editor annotation starts with; edits of an existing
/// annotation start from its dictionary instead.
fn base_dict(builder_subtype: &str, a: &NewAnnotation, ctx: &BuildContext<'_>) -> PDFDict {
    let mut dict = ctx.existing.cloned().unwrap_or_default();
    dict.insert("Type".into(), PDFObject::name("Annot"));
    dict.insert("Subtype".into(), PDFObject::name(builder_subtype));
    let date = PDFObject::String(ctx.date.as_bytes().to_vec());
    if ctx.existing.is_some() {
        dict.insert("M".into(), date);
    } else {
        dict.insert("CreationDate".into(), date);
    }
    dict.insert("Rect".into(), numbers(&a.rect));
    dict
}

fn finish_dict(dict: &mut PDFDict, a: &NewAnnotation, ctx: &BuildContext<'_>) {
    if let Some(user) = &a.user {
        dict.insert("T".into(), PDFObject::String(encode_text(user)));
    }
    if let Some(ap) = ctx.refs.appearance {
        let mut ap_dict = PDFDict::new();
        ap_dict.insert("N".into(), PDFObject::Ref(ap));
        dict.insert("AP".into(), PDFObject::Dict(ap_dict));
    }
    if let Some(id) = ctx.parent_tree_id {
        dict.insert("StructParent".into(), PDFObject::Int(id));
    }
}

fn border_none() -> PDFObject {
    PDFObject::Array(vec![PDFObject::Int(0); 3])
}

fn ink_dict(a: &NewAnnotation, ctx: &BuildContext<'_>) -> PDFDict {
    let mut dict = base_dict("Ink", a, ctx);
    let ink_list = if a.paths.is_empty() {
        a.outlines.iter().map(|o| numbers(o)).collect()
    } else {
        a.paths.iter().map(|p| numbers(&p.points)).collect()
    };
    dict.insert("InkList".into(), PDFObject::Array(ink_list));
    dict.insert("F".into(), PDFObject::Int(4));
    dict.insert("Rotate".into(), PDFObject::Int(a.rotation));
    let mut bs = PDFDict::new();
    bs.insert("W".into(), PDFObject::Real(a.thickness.unwrap_or(1.0)));
    dict.insert("BS".into(), PDFObject::Dict(bs));
    dict.insert("C".into(), pdf_color_array(a.color));
    dict.insert("CA".into(), PDFObject::Real(a.opacity));
    finish_dict(&mut dict, a, ctx);
    dict
}

fn highlight_dict(a: &NewAnnotation, ctx: &BuildContext<'_>) -> PDFDict {
    let mut dict = base_dict("Highlight", a, ctx);
    dict.insert("F".into(), PDFObject::Int(4));
    dict.insert("Border".into(), border_none());
    dict.insert("Rotate".into(), PDFObject::Int(a.rotation));
    if let Some(quad_points) = &a.quad_points {
        dict.insert("QuadPoints".into(), numbers(quad_points));
    }
    dict.insert("C".into(), pdf_color_array(a.color));
    dict.insert("CA".into(), PDFObject::Real(a.opacity));
    finish_dict(&mut dict, a, ctx);
    dict
}

fn default_appearance(a: &NewAnnotation) -> String {
    format!(
        "/Helv {} Tf {}",
        number_to_string(a.font_size.unwrap_or(10.0)),
        pdf_color(a.color, true)
    )
}

fn free_text_dict(a: &NewAnnotation, ctx: &BuildContext<'_>) -> PDFDict {
    let mut dict = base_dict("FreeText", a, ctx);
    dict.insert(
        "DA".into(),
        PDFObject::String(default_appearance(a).into_bytes()),
    );
    dict.insert(
        "Contents".into(),
        PDFObject::String(encode_text(a.value.as_deref().unwrap_or_default())),
    );
    dict.insert("F".into(), PDFObject::Int(4));
    dict.insert("Border".into(), border_none());
    dict.insert("Rotate".into(), PDFObject::Int(a.rotation));
    finish_dict(&mut dict, a, ctx);
    dict
}

fn stamp_dict(a: &NewAnnotation, ctx: &BuildContext<'_>) -> PDFDict {
    let mut dict = base_dict("Stamp", a, ctx);
    dict.insert("F".into(), PDFObject::Int(4));
    dict.insert("Border".into(), border_none());
    dict.insert("Rotate".into(), PDFObject::Int(a.rotation));
    finish_dict(&mut dict, a, ctx);
    dict
}

fn ink_appearance(a: &NewAnnotation, ctx: &BuildContext<'_>) -> Option<PDFStream> {
    ctx.refs.appearance?;
    let mut attrs = form_xobject_attrs(&a.rect);
    if a.opacity != 1.0 {
        attrs.insert(
            "Resources".into(),
            PDFObject::Dict(ext_gstate_resources(a.opacity, false)),
        );
    }
    Some(PDFStream::with_content(attrs, ink_content(a)))
}

fn highlight_appearance(a: &NewAnnotation, ctx: &BuildContext<'_>) -> Option<PDFStream> {
    ctx.refs.appearance?;
    let mut attrs = form_xobject_attrs(&a.rect);
    attrs.insert(
        "Resources".into(),
        PDFObject::Dict(ext_gstate_resources(a.opacity, true)),
    );
    Some(PDFStream::with_content(attrs, highlight_content(a)))
}

fn free_text_appearance(a: &NewAnnotation, ctx: &BuildContext<'_>) -> Option<PDFStream> {
    ctx.refs.appearance?;
    let content = ctx.generated?;
    let mut attrs = form_xobject_attrs(&a.rect);
    if let Some(font) = ctx.refs.font {
        let mut fonts = PDFDict::new();
        fonts.insert("Helv".into(), PDFObject::Ref(font));
        let mut resources = PDFDict::new();
        resources.insert("Font".into(), PDFObject::Dict(fonts));
        attrs.insert("Resources".into(), PDFObject::Dict(resources));
    }
    if let Some(matrix) = rotation_matrix(a.rotation, a.width(), a.height()) {
        attrs.insert("Matrix".into(), numbers(&matrix));
    }
    Some(PDFStream::with_content(attrs, content.to_vec()))
}

fn stamp_appearance(a: &NewAnnotation, ctx: &BuildContext<'_>) -> Option<PDFStream> {
    ctx.refs.appearance?;
    let image = ctx.refs.image?;
    let (width, height) = (a.width(), a.height());
    let mut attrs = form_xobject_attrs(&[0.0, 0.0, width, height]);
    let mut xobjects = PDFDict::new();
    xobjects.insert("Im0".into(), PDFObject::Ref(image));
    let mut resources = PDFDict::new();
    resources.insert("XObject".into(), PDFObject::Dict(xobjects));
    attrs.insert("Resources".into(), PDFObject::Dict(resources));
    if let Some(matrix) = rotation_matrix(a.rotation, width, height) {
        attrs.insert("Matrix".into(), numbers(&matrix));
    }
    Some(PDFStream::with_content(attrs, stamp_content(width, height)))
}

/// The stamp's JPEG as an image XObject; the data is written as-is.
fn stamp_image(a: &NewAnnotation) -> Option<PDFStream> {
    let image = a.image.as_ref()?;
    let mut attrs = PDFDict::new();
    attrs.insert("Type".into(), PDFObject::name("XObject"));
    attrs.insert("Subtype".into(), PDFObject::name("Image"));
    attrs.insert("Width".into(), PDFObject::Int(i64::from(image.width)));
    attrs.insert("Height".into(), PDFObject::Int(i64::from(image.height)));
    attrs.insert("ColorSpace".into(), PDFObject::name("DeviceRGB"));
    attrs.insert("BitsPerComponent".into(), PDFObject::Int(8));
    attrs.insert("Filter".into(), PDFObject::name("DCTDecode"));
    Some(PDFStream::new(attrs, image.data.clone()))
}

fn helvetica() -> PDFDict {
    let mut font = PDFDict::new();
    font.insert("BaseFont".into(), PDFObject::name("Helvetica"));
    font.insert("Type".into(), PDFObject::name("Font"));
    font.insert("Subtype".into(), PDFObject::name("Type1"));
    font.insert("Encoding".into(), PDFObject::name("WinAnsiEncoding"));
    font
}

/// One annotation to build.
pub struct EditorPlan<'a> {
    pub annotation: &'a NewAnnotation,
    pub builder: &'static AnnotationBuilder,
    pub refs: AnnotationRefs,
    pub existing: Option<PDFDict>,
    pub parent_tree_id: Option<i64>,
    pub generated: Option<Vec<u8>>,
}

/// Editor edits of one page, with their references reserved.
pub struct PageEdits<'a> {
    pub page_index: usize,
    pub page_ref: PDFObjRef,
    pub page_dict: PDFDict,
    pub plans: Vec<EditorPlan<'a>>,
    pub deleted: Vec<PDFObjRef>,
    font_ref: Option<PDFObjRef>,
}

impl<'a> PageEdits<'a> {
    /// Sort the page's edits into deletions and builds, reserving references.
    pub fn plan(
        xref: &XRef,
        new_refs: &TemporaryRefs,
        page_index: usize,
        page_ref: PDFObjRef,
        page_dict: PDFDict,
        annotations: &[&'a NewAnnotation],
        generator: &dyn AppearanceGenerator,
    ) -> Result<Self> {
        let mut deleted = Vec::new();
        let mut deleted_set = RefSet::new();
        let mut pending = Vec::new();

        for &annotation in annotations {
            let existing_ref = match annotation.existing_id.as_deref() {
                Some(id) => match PDFObjRef::parse_annotation_id(id) {
                    Some(r) => Some(r),
                    None => {
                        warn!(id, "invalid annotation id, skipping edit");
                        continue;
                    }
                },
                None => None,
            };
            if annotation.deleted {
                let Some(r) = existing_ref else {
                    continue;
                };
                let popup = annotation
                    .popup_ref
                    .as_deref()
                    .and_then(PDFObjRef::parse_annotation_id);
                for r in std::iter::once(r).chain(popup) {
                    if deleted_set.put(r) {
                        deleted.push(r);
                    }
                }
                continue;
            }
            let Some(kind) = annotation.kind else {
                warn!(page = page_index, "editor annotation without a type, skipping");
                continue;
            };
            pending.push((annotation, builder_for(kind, annotation), existing_ref));
        }

        let mut plans = Vec::with_capacity(pending.len());
        let mut font_ref = None;
        for (annotation, builder, existing_ref) in pending {
            let existing = match existing_ref {
                Some(r) => xref.fetch(r)?.as_dict().ok().cloned(),
                None => None,
            };
            let generated = match builder.appearance {
                AppearanceSource::Generated => generator.free_text(annotation),
                _ => None,
            };
            let draws = match builder.appearance {
                AppearanceSource::Paths => true,
                AppearanceSource::Image => annotation.image.is_some(),
                AppearanceSource::Generated => generated.is_some(),
            };
            if !draws && existing.is_none() {
                warn!(page = page_index, subtype = builder.subtype, "nothing to draw, skipping");
                continue;
            }

            let mut refs = AnnotationRefs {
                annotation: existing_ref.unwrap_or_else(|| new_refs.next_ref()),
                ..AnnotationRefs::default()
            };
            if draws {
                refs.appearance = Some(new_refs.next_ref());
                match builder.appearance {
                    AppearanceSource::Image => refs.image = Some(new_refs.next_ref()),
                    AppearanceSource::Generated => {
                        refs.font = Some(*font_ref.get_or_insert_with(|| new_refs.next_ref()));
                    }
                    AppearanceSource::Paths => {}
                }
            }
            plans.push(EditorPlan {
                annotation,
                builder,
                refs,
                existing,
                parent_tree_id: None,
                generated,
            });
        }

        Ok(Self {
            page_index,
            page_ref,
            page_dict,
            plans,
            deleted,
            font_ref,
        })
    }

    /// The structure-tree view of this page: one element per plan, in order.
    pub fn tagged_page(&self) -> TaggedPage {
        TaggedPage {
            page_index: self.page_index,
            page_ref: self.page_ref,
            page_dict: self.page_dict.clone(),
            elements: self
                .plans
                .iter()
                .map(|plan| {
                    TaggedElement::new(
                        plan.refs.annotation,
                        plan.annotation.accessibility_data.clone(),
                        plan.annotation.struct_tree_parent_id.clone(),
                    )
                })
                .collect(),
        }
    }

    /// Take the parent tree ids assigned on `page`.
    pub fn apply_tags(&mut self, page: &TaggedPage) {
        for (plan, element) in self.plans.iter_mut().zip(&page.elements) {
            plan.parent_tree_id = element.parent_tree_id;
        }
    }

    /// Build every body of the page: annotations, appearances, images, the
    /// shared font, the page with its new `/Annots`, and free entries.
    pub fn save(&self, xref: &XRef, date: &str) -> Result<Vec<(PDFObjRef, Change)>> {
        let mut out = Vec::new();
        let mut used_font = false;
        for plan in &self.plans {
            let ctx = BuildContext {
                refs: plan.refs,
                date,
                existing: plan.existing.as_ref(),
                parent_tree_id: plan.parent_tree_id,
                generated: plan.generated.as_deref(),
            };
            let a = plan.annotation;
            out.push((plan.refs.annotation, Change::object((plan.builder.build_dict)(a, &ctx))));
            if let (Some(ap_ref), Some(stream)) = (plan.refs.appearance, (plan.builder.build_appearance)(a, &ctx)) {
                out.push((ap_ref, Change::object(stream)));
                used_font |= plan.refs.font.is_some();
            }
            if let (Some(image_ref), Some(image)) = (plan.refs.image, stamp_image(a)) {
                out.push((image_ref, Change::object(image)));
            }
        }
        if let (true, Some(font_ref)) = (used_font, self.font_ref) {
            out.push((font_ref, Change::object(helvetica())));
        }

        let deleted: RefSet = {
            let mut set = RefSet::new();
            for r in &self.deleted {
                set.put(*r);
            }
            set
        };
        let current = match self.page_dict.get("Annots") {
            Some(annots) => xref.resolve(annots)?,
            None => PDFObject::Null,
        };
        let mut annots: Vec<PDFObject> = current
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter(|a| !matches!(a, PDFObject::Ref(r) if deleted.has(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for plan in &self.plans {
            let r = PDFObject::Ref(plan.refs.annotation);
            if plan.existing.is_none() && !annots.contains(&r) {
                annots.push(r);
            }
        }
        let mut page = self.page_dict.clone();
        page.insert("Annots".into(), PDFObject::Array(annots));
        out.push((self.page_ref, Change::object(page)));

        for r in &self.deleted {
            out.push((*r, Change::deleted()));
        }
        debug!(
            page = self.page_index,
            built = self.plans.len(),
            deleted = self.deleted.len(),
            "page annotations saved"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::InkPath;

    fn ctx(refs: AnnotationRefs) -> BuildContext<'static> {
        BuildContext {
            refs,
            date: "D:20240102030405",
            existing: None,
            parent_tree_id: Some(3),
            generated: None,
        }
    }

    #[test]
    fn test_builder_table() {
        let mut a = NewAnnotation::default();
        assert_eq!(builder_for(EditorKind::Highlight, &a).subtype, "Ink");
        a.quad_points = Some(vec![0.0; 8]);
        assert_eq!(builder_for(EditorKind::Highlight, &a).subtype, "Highlight");
        assert_eq!(builder_for(EditorKind::Stamp, &a).appearance, AppearanceSource::Image);
    }

    #[test]
    fn test_ink_dict_layout() {
        let a = NewAnnotation {
            kind: Some(EditorKind::Ink),
            rect: [0.0, 0.0, 10.0, 20.0],
            thickness: Some(2.0),
            paths: vec![InkPath {
                bezier: vec![1.0, 1.0],
                points: vec![1.0, 1.0],
            }],
            opacity: 1.0,
            ..NewAnnotation::default()
        };
        let refs = AnnotationRefs {
            annotation: PDFObjRef::new(20, 0),
            appearance: Some(PDFObjRef::new(21, 0)),
            ..AnnotationRefs::default()
        };
        let dict = ink_dict(&a, &ctx(refs));
        assert_eq!(
            dict.keys().map(String::as_str).collect::<Vec<_>>(),
            vec![
                "Type", "Subtype", "CreationDate", "Rect", "InkList", "F", "Rotate", "BS", "C",
                "CA", "AP", "StructParent"
            ]
        );
        assert_eq!(dict["StructParent"], PDFObject::Int(3));
        let stream = ink_appearance(&a, &ctx(refs)).unwrap();
        assert!(stream.get("Resources").is_none());
        assert_eq!(stream.get("BBox"), Some(&numbers(&a.rect)));
    }

    #[test]
    fn test_existing_dict_is_overlaid() {
        let mut existing = PDFDict::new();
        existing.insert("Type".into(), PDFObject::name("Annot"));
        existing.insert("NM".into(), PDFObject::String(b"keep".to_vec()));
        existing.insert("AP".into(), PDFObject::Int(1));
        let a = NewAnnotation {
            rect: [1.0, 2.0, 3.0, 4.0],
            ..NewAnnotation::default()
        };
        let build = BuildContext {
            existing: Some(&existing),
            ..ctx(AnnotationRefs::default())
        };
        let dict = stamp_dict(&a, &build);
        assert_eq!(dict["NM"], PDFObject::String(b"keep".to_vec()));
        assert_eq!(dict["AP"], PDFObject::Int(1));
        assert!(dict.contains_key("M"));
        assert!(!dict.contains_key("CreationDate"));
    }
}

//! Saving edited form widgets.

use super::appearance::{AppearanceGenerator, numbers, rotation_matrix};
use super::{AnnotationEdit, AnnotationStorage, FieldEdit, FieldValue, build_flags};
use crate::document::XRef;
use crate::error::Result;
use crate::model::{PDFDict, PDFObjRef, PDFObject, PDFStream, RefSet};
use crate::utils::{decode_text, encode_text};
use crate::writer::{FormPatch, FormValue};
use std::sync::Arc;
use tracing::{debug, warn};

const FF_RADIO: i64 = 1 << 15;
const FF_PUSHBUTTON: i64 = 1 << 16;

/// A widget's new dictionary and what goes with it.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetSave {
    pub widget_ref: PDFObjRef,
    pub dict: PDFDict,
    pub form_patch: FormPatch,
    pub need_appearances: bool,
    /// Generated appearance; stored under a new reference by the caller.
    pub appearance: Option<PDFStream>,
    /// Radio group parent with its new `/V`.
    pub parent: Option<(PDFObjRef, PDFDict)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Choice,
    CheckBox,
    Radio,
}

/// The resolved widget with the inherited entries its save depends on.
struct Widget<'x> {
    xref: &'x XRef,
    objref: PDFObjRef,
    dict: PDFDict,
}

impl Widget<'_> {
    /// Look `key` up on the widget, then along its `/Parent` chain.
    fn inherited(&self, key: &str) -> Result<Option<PDFObject>> {
        let mut visited = RefSet::new();
        visited.put(self.objref);
        let mut holder: Option<Arc<PDFObject>> = None;
        loop {
            let next = {
                let dict = match &holder {
                    Some(obj) => match obj.as_dict() {
                        Ok(dict) => dict,
                        Err(_) => return Ok(None),
                    },
                    None => &self.dict,
                };
                if let Some(value) = dict.get(key) {
                    return Ok(Some(self.xref.resolve(value)?));
                }
                match dict.get("Parent") {
                    Some(PDFObject::Ref(parent)) => *parent,
                    _ => return Ok(None),
                }
            };
            if !visited.put(next) {
                return Ok(None);
            }
            holder = Some(self.xref.fetch(next)?);
        }
    }

    /// Partial names joined with `.` from the root field down.
    fn field_name(&self) -> Result<String> {
        let mut names = Vec::new();
        let mut visited = RefSet::new();
        visited.put(self.objref);
        if let Some(t) = self.dict.get("T") {
            names.push(decode_text(self.xref.resolve(t)?.as_string()?));
        }
        let mut parent = self.dict.get("Parent").cloned();
        while let Some(PDFObject::Ref(r)) = parent {
            if !visited.put(r) {
                break;
            }
            let obj = self.xref.fetch(r)?;
            let Ok(dict) = obj.as_dict() else {
                break;
            };
            if let Some(t) = dict.get("T") {
                names.push(decode_text(self.xref.resolve(t)?.as_string()?));
            }
            parent = dict.get("Parent").cloned();
        }
        names.reverse();
        Ok(names.join("."))
    }

    fn kind(&self) -> Result<Option<FieldKind>> {
        let ft = self.inherited("FT")?;
        let ff = self
            .inherited("Ff")?
            .and_then(|f| f.as_int().ok())
            .unwrap_or(0);
        Ok(match ft.as_ref().and_then(|f| f.as_name().ok()) {
            Some("Tx") => Some(FieldKind::Text),
            Some("Ch") => Some(FieldKind::Choice),
            Some("Btn") if ff & FF_PUSHBUTTON != 0 => None,
            Some("Btn") if ff & FF_RADIO != 0 => Some(FieldKind::Radio),
            Some("Btn") => Some(FieldKind::CheckBox),
            _ => None,
        })
    }

    fn flags(&self) -> i64 {
        self.dict.get("F").and_then(|f| f.as_int().ok()).unwrap_or(0)
    }

    fn mk(&self) -> Result<PDFDict> {
        Ok(match self.dict.get("MK") {
            Some(mk) => self.xref.resolve(mk)?.as_dict().ok().cloned().unwrap_or_default(),
            None => PDFDict::new(),
        })
    }

    fn rotation(&self) -> Result<i64> {
        Ok(self
            .mk()?
            .get("R")
            .and_then(|r| r.as_int().ok())
            .unwrap_or(0)
            .rem_euclid(360))
    }

    /// Put `rotation` into a copy of `/MK`; an emptied `/MK` is removed.
    fn set_mk(&self, dict: &mut PDFDict, rotation: i64) -> Result<()> {
        let mut mk = self.mk()?;
        if rotation == 0 {
            mk.shift_remove("R");
        } else {
            mk.insert("R".into(), PDFObject::Int(rotation));
        }
        if mk.is_empty() {
            dict.shift_remove("MK");
        } else {
            dict.insert("MK".into(), PDFObject::Dict(mk));
        }
        Ok(())
    }

    /// The "on" state name of a button: the first `/AP /N` key that isn't `Off`.
    fn on_state(&self) -> Result<Option<String>> {
        let Some(ap) = self.dict.get("AP") else {
            return Ok(None);
        };
        let ap = self.xref.resolve(ap)?;
        let Some(normal) = ap.get("N") else {
            return Ok(None);
        };
        let normal = self.xref.resolve(normal)?;
        Ok(normal
            .as_dict()
            .ok()
            .and_then(|n| n.keys().find(|k| *k != "Off").cloned()))
    }

    fn size(&self) -> (f64, f64) {
        match self.dict.get("Rect").and_then(|r| r.as_array().ok()) {
            Some(rect) if rect.len() == 4 => {
                let n = |i: usize| rect[i].as_num().unwrap_or(0.0);
                ((n(2) - n(0)).abs(), (n(3) - n(1)).abs())
            }
            _ => (0.0, 0.0),
        }
    }
}

fn current_value(value: Option<PDFObject>) -> Option<FieldValue> {
    match value? {
        PDFObject::String(s) => Some(FieldValue::Text(decode_text(&s))),
        PDFObject::Name(n) => Some(FieldValue::Text(n)),
        PDFObject::Array(items) => Some(FieldValue::List(
            items
                .iter()
                .filter_map(|i| i.as_string().ok().map(decode_text))
                .collect(),
        )),
        _ => None,
    }
}

/// Save every widget of the page that has a field edit.
///
/// One widget failing is logged and skipped; missing bytes abort the page.
pub fn save_page_fields(
    xref: &XRef,
    page_dict: &PDFDict,
    storage: &AnnotationStorage,
    acro_form: Option<&PDFDict>,
    generator: &dyn AppearanceGenerator,
    date: &str,
) -> Result<Vec<WidgetSave>> {
    let annots = match page_dict.get("Annots") {
        Some(annots) => xref.resolve(annots)?,
        None => return Ok(Vec::new()),
    };
    let Ok(annots) = annots.as_array() else {
        return Ok(Vec::new());
    };
    let form_needs_appearances = acro_form
        .and_then(|f| f.get("NeedAppearances"))
        .and_then(|n| n.as_bool().ok())
        .unwrap_or(false);

    let mut saves = Vec::new();
    for annot in annots {
        let PDFObject::Ref(r) = annot else {
            continue;
        };
        let Some(AnnotationEdit::Field(edit)) = storage.get(&r.annotation_id()) else {
            continue;
        };
        let save = save_widget(xref, *r, edit, acro_form, form_needs_appearances, generator, date);
        match save {
            Ok(Some(save)) => saves.push(save),
            Ok(None) => {}
            Err(e) if e.is_missing_data() => return Err(e),
            Err(e) => warn!(widget = %r, error = %e, "cannot save widget"),
        }
    }
    Ok(saves)
}

fn save_widget(
    xref: &XRef,
    objref: PDFObjRef,
    edit: &FieldEdit,
    acro_form: Option<&PDFDict>,
    form_needs_appearances: bool,
    generator: &dyn AppearanceGenerator,
    date: &str,
) -> Result<Option<WidgetSave>> {
    let obj = xref.fetch(objref)?;
    let Ok(dict) = obj.as_dict() else {
        return Ok(None);
    };
    if !dict.get("Subtype").is_some_and(|s| s.is_name("Widget")) {
        return Ok(None);
    }
    let widget = Widget {
        xref,
        objref,
        dict: dict.clone(),
    };
    let save = match widget.kind()? {
        Some(FieldKind::Text | FieldKind::Choice) => save_text(
            &widget,
            edit,
            acro_form,
            form_needs_appearances,
            generator,
            date,
        )?,
        Some(FieldKind::CheckBox) => save_button(&widget, edit, false, date)?,
        Some(FieldKind::Radio) => save_button(&widget, edit, true, date)?,
        None => None,
    };
    if save.is_some() {
        debug!(widget = %objref, "widget saved");
    }
    Ok(save)
}

fn save_text(
    widget: &Widget<'_>,
    edit: &FieldEdit,
    acro_form: Option<&PDFDict>,
    form_needs_appearances: bool,
    generator: &dyn AppearanceGenerator,
    date: &str,
) -> Result<Option<WidgetSave>> {
    let flags = build_flags(widget.flags(), edit.no_view, edit.no_print);
    let field_value = current_value(widget.inherited("V")?);
    let value = match &edit.value {
        Some(FieldValue::Bool(_)) => {
            warn!(widget = %widget.objref, "boolean value for a text field, ignoring it");
            None
        }
        other => other.clone(),
    };
    let value = match value {
        Some(value) if Some(&value) != field_value.as_ref() => value,
        _ => {
            if edit.rotation.is_none() && flags.is_none() {
                return Ok(None);
            }
            field_value.unwrap_or_else(|| FieldValue::Text(String::new()))
        }
    };
    let rotation = match edit.rotation {
        Some(r) => r.rem_euclid(360),
        None => widget.rotation()?,
    };
    let values = match &value {
        FieldValue::List(items) => items.clone(),
        FieldValue::Text(text) => vec![text.clone()],
        FieldValue::Bool(b) => vec![b.to_string()],
    };

    let (content, need_appearances) = if form_needs_appearances {
        (None, false)
    } else {
        match generator.text_field(&widget.dict, &values) {
            Some(content) => (Some(content), false),
            None => (None, true),
        }
    };

    let mut dict: PDFDict = widget
        .dict
        .iter()
        .filter(|(k, _)| *k != "AP")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(flags) = flags {
        dict.insert("F".into(), PDFObject::Int(flags));
        if content.is_none()
            && !need_appearances
            && let Some(ap) = widget.dict.get("AP")
        {
            dict.insert("AP".into(), ap.clone());
        }
    }
    let (v, form_value) = match value {
        FieldValue::List(items) => (
            PDFObject::Array(
                items
                    .iter()
                    .map(|i| PDFObject::String(encode_text(i)))
                    .collect(),
            ),
            FormValue::List(items),
        ),
        FieldValue::Text(text) => (PDFObject::String(encode_text(&text)), FormValue::Text(text)),
        FieldValue::Bool(b) => (
            PDFObject::String(b.to_string().into_bytes()),
            FormValue::Text(b.to_string()),
        ),
    };
    dict.insert("V".into(), v);
    widget.set_mk(&mut dict, rotation)?;

    let appearance = content.map(|content| {
        let (width, height) = widget.size();
        let mut attrs = PDFDict::new();
        attrs.insert("Subtype".into(), PDFObject::name("Form"));
        let resources = acro_form
            .and_then(|f| f.get("DR"))
            .cloned()
            .unwrap_or_else(|| PDFObject::Dict(PDFDict::new()));
        attrs.insert("Resources".into(), resources);
        attrs.insert("BBox".into(), numbers(&[0.0, 0.0, width, height]));
        if let Some(matrix) = rotation_matrix(rotation, width, height) {
            attrs.insert("Matrix".into(), numbers(&matrix));
        }
        PDFStream::with_content(attrs, content)
    });
    dict.insert("M".into(), PDFObject::String(date.as_bytes().to_vec()));

    Ok(Some(WidgetSave {
        widget_ref: widget.objref,
        dict,
        form_patch: FormPatch {
            path: widget.field_name()?,
            value: form_value,
        },
        need_appearances,
        appearance,
        parent: None,
    }))
}

fn save_button(
    widget: &Widget<'_>,
    edit: &FieldEdit,
    radio: bool,
    date: &str,
) -> Result<Option<WidgetSave>> {
    let Some(on_state) = widget.on_state()? else {
        warn!(widget = %widget.objref, "button without an on state");
        return Ok(None);
    };
    let flags = build_flags(widget.flags(), edit.no_view, edit.no_print);
    let field_value = widget
        .inherited("V")?
        .and_then(|v| v.as_name().ok().map(str::to_string));
    let is_on = field_value.as_deref() == Some(on_state.as_str());
    let value = match edit.value {
        Some(FieldValue::Bool(b)) => Some(b),
        Some(_) => {
            warn!(widget = %widget.objref, "non-boolean value for a button, ignoring it");
            None
        }
        None => None,
    };
    if edit.rotation.is_none() && flags.is_none() {
        match value {
            None => return Ok(None),
            Some(v) if v == is_on => return Ok(None),
            Some(_) => {}
        }
    }
    let value = value.unwrap_or(is_on);
    let rotation = match edit.rotation {
        Some(r) => r.rem_euclid(360),
        None => widget.rotation()?,
    };
    let name = PDFObject::name(if value { on_state.as_str() } else { "Off" });

    let mut dict = widget.dict.clone();
    let mut parent = None;
    if radio {
        match dict.get("Parent") {
            Some(PDFObject::Ref(parent_ref)) => {
                if value {
                    let obj = widget.xref.fetch(*parent_ref)?;
                    if let Ok(parent_dict) = obj.as_dict() {
                        let mut parent_dict = parent_dict.clone();
                        parent_dict.insert("V".into(), name.clone());
                        parent = Some((*parent_ref, parent_dict));
                    }
                }
            }
            Some(_) => {}
            None => {
                dict.insert("V".into(), name.clone());
            }
        }
    } else {
        dict.insert("V".into(), name.clone());
    }
    dict.insert("AS".into(), name);
    dict.insert("M".into(), PDFObject::String(date.as_bytes().to_vec()));
    if let Some(flags) = flags {
        dict.insert("F".into(), PDFObject::Int(flags));
    }
    widget.set_mk(&mut dict, rotation)?;

    Ok(Some(WidgetSave {
        widget_ref: widget.objref,
        dict,
        form_patch: FormPatch {
            path: widget.field_name()?,
            value: FormValue::Text(if value { on_state } else { String::new() }),
        },
        need_appearances: false,
        appearance: None,
        parent,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_value() {
        assert_eq!(
            current_value(Some(PDFObject::String(b"abc".to_vec()))),
            Some(FieldValue::Text("abc".into()))
        );
        assert_eq!(
            current_value(Some(PDFObject::Array(vec![
                PDFObject::String(b"a".to_vec()),
                PDFObject::Int(3),
            ]))),
            Some(FieldValue::List(vec!["a".into()]))
        );
        assert_eq!(current_value(Some(PDFObject::Int(1))), None);
        assert_eq!(current_value(None), None);
    }
}

//! Structure tree updates for newly added annotations.
//!
//! A new tag is an `/OBJR` element pointing at its annotation, registered in
//! the parent tree under the annotation's `/StructParent` key. Without an
//! existing tree one is created from the catalog; otherwise the tag is
//! spliced next to the structure element that owns the marked content the
//! edit names. Every dictionary or array touched goes through a save-local
//! [`RefSetCache`] first, and only that cache is turned into changes.

pub mod node;

pub use node::{StructElementNode, StructKid};

use crate::document::{NumberTree, TemporaryRefs, XRef};
use crate::error::{PdfError, Result};
use crate::model::{PDFDict, PDFObjRef, PDFObject, RefSetCache};
use crate::utils::encode_text;
use crate::writer::{Change, ChangeSet};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Tag properties supplied with an edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityData {
    /// Structure type, e.g. `Figure`. Required to create a tag.
    #[serde(rename = "type")]
    pub struct_type: Option<String>,
    pub title: Option<String>,
    pub lang: Option<String>,
    pub alt: Option<String>,
    pub expanded: Option<String>,
    pub actual_text: Option<String>,
    /// `/StructParent` of an annotation that already has a tag.
    pub struct_parent: Option<i64>,
}

impl AccessibilityData {
    fn struct_type(&self) -> Option<&str> {
        self.struct_type.as_deref().filter(|t| !t.is_empty())
    }

    fn existing_struct_parent(&self) -> Option<i64> {
        self.struct_parent.filter(|&id| id >= 0)
    }
}

/// A new annotation that may need a tag.
#[derive(Debug, Clone)]
pub struct TaggedElement {
    pub annotation_ref: PDFObjRef,
    pub accessibility: Option<AccessibilityData>,
    /// Id of the marked content the tag belongs next to (`..._mc<N>`).
    pub struct_tree_parent_id: Option<String>,
    /// Parent tree key, assigned by the feasibility checks.
    pub parent_tree_id: Option<i64>,
    struct_tree_parent: Option<StructElementNode>,
}

impl TaggedElement {
    pub const fn new(
        annotation_ref: PDFObjRef,
        accessibility: Option<AccessibilityData>,
        struct_tree_parent_id: Option<String>,
    ) -> Self {
        Self {
            annotation_ref,
            accessibility,
            struct_tree_parent_id,
            parent_tree_id: None,
            struct_tree_parent: None,
        }
    }

    fn tag_data(&self) -> Option<&AccessibilityData> {
        let data = self.accessibility.as_ref()?;
        if data.struct_type().is_none() {
            warn!(
                annotation = %self.annotation_ref,
                "accessibility data without a structure type, no tag written"
            );
            return None;
        }
        Some(data)
    }

    fn marked_content_id(&self) -> Option<i64> {
        let (_, tail) = self.struct_tree_parent_id.as_deref()?.split_once("_mc")?;
        let digits: String = tail.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    fn reset(&mut self) {
        self.parent_tree_id = None;
        self.struct_tree_parent = None;
    }
}

/// New annotations of one page.
#[derive(Debug, Clone)]
pub struct TaggedPage {
    pub page_index: usize,
    pub page_ref: PDFObjRef,
    pub page_dict: PDFDict,
    pub elements: Vec<TaggedElement>,
}

/// The document's `/StructTreeRoot`.
pub struct StructTreeRoot<'a> {
    xref: &'a XRef,
    root_ref: Option<PDFObjRef>,
    dict: PDFDict,
}

impl<'a> StructTreeRoot<'a> {
    /// The catalog's structure tree root, if it has one.
    pub fn from_catalog(xref: &'a XRef, catalog: &PDFDict) -> Result<Option<Self>> {
        let Some(raw) = catalog.get("StructTreeRoot") else {
            return Ok(None);
        };
        let resolved = xref.resolve(raw)?;
        let Ok(dict) = resolved.as_dict() else {
            return Ok(None);
        };
        Ok(Some(Self {
            xref,
            root_ref: raw.as_ref().ok().copied(),
            dict: dict.clone(),
        }))
    }

    pub const fn root_ref(&self) -> Option<PDFObjRef> {
        self.root_ref
    }

    /// Whether a new tree is worth creating; assigns parent tree ids from 0.
    pub fn can_create_structure_tree(
        catalog_ref: Option<PDFObjRef>,
        pages: &mut [TaggedPage],
    ) -> bool {
        if catalog_ref.is_none() {
            warn!("cannot save the struct tree: no catalog reference");
            return false;
        }
        let mut next_key = 0;
        let mut has_nothing_to_update = true;
        for page in pages.iter_mut() {
            for element in &mut page.elements {
                if element.tag_data().is_some() {
                    element.parent_tree_id = Some(next_key);
                    next_key += 1;
                    has_nothing_to_update = false;
                }
            }
        }
        if has_nothing_to_update {
            reset_all(pages);
            return false;
        }
        true
    }

    /// Build a tree holding one tag per tagged element and hang it off the catalog.
    pub fn create_structure_tree(
        xref: &XRef,
        refs: &TemporaryRefs,
        catalog_ref: PDFObjRef,
        catalog: &PDFDict,
        pages: &[TaggedPage],
        changes: &mut ChangeSet,
    ) -> Result<()> {
        let mut cache: RefSetCache<PDFObject> = RefSetCache::new();

        let mut catalog = catalog.clone();
        let root_ref = refs.next_ref();
        catalog.insert("StructTreeRoot".into(), PDFObject::Ref(root_ref));
        cache.put(catalog_ref, PDFObject::Dict(catalog));

        let parent_tree_ref = refs.next_ref();
        let mut kids = Vec::new();
        let mut nums = Vec::new();
        let next_key = write_kids(
            &mut TagWriter {
                xref,
                refs,
                root_ref,
                existing: None,
                fallback_kids: Some(&mut kids),
                nums: &mut nums,
                cache: &mut cache,
            },
            pages,
        )?;

        let mut root = PDFDict::new();
        root.insert("Type".into(), PDFObject::name("StructTreeRoot"));
        root.insert("ParentTree".into(), PDFObject::Ref(parent_tree_ref));
        root.insert("K".into(), PDFObject::Array(kids));
        root.insert("ParentTreeNextKey".into(), PDFObject::Int(next_key));
        cache.put(root_ref, PDFObject::Dict(root));

        let mut parent_tree = PDFDict::new();
        parent_tree.insert("Nums".into(), PDFObject::Array(nums));
        cache.put(parent_tree_ref, PDFObject::Dict(parent_tree));

        debug!(objects = cache.len(), "structure tree created");
        commit(cache, changes);
        Ok(())
    }

    /// Whether the existing tree can take the new tags; assigns parent tree
    /// ids from `/ParentTreeNextKey` and locates structural parents.
    pub fn can_update_struct_tree(&self, pages: &mut [TaggedPage]) -> Result<bool> {
        if self.root_ref.is_none() {
            warn!("cannot update the struct tree: no root reference");
            return Ok(false);
        }
        let mut next_key = match self.dict.get("ParentTreeNextKey") {
            Some(PDFObject::Int(n)) if *n >= 0 => *n,
            _ => {
                warn!("cannot update the struct tree: invalid next key");
                return Ok(false);
            }
        };
        let Some(parent_tree) = self.dict.get("ParentTree") else {
            warn!("cannot update the struct tree: no ParentTree");
            return Ok(false);
        };
        let parent_tree_dict = self.xref.resolve(parent_tree)?;
        let Ok(parent_tree_dict) = parent_tree_dict.as_dict() else {
            warn!("cannot update the struct tree: ParentTree isn't a dict");
            return Ok(false);
        };
        let nums = match parent_tree_dict.get("Nums") {
            Some(nums) => self.xref.resolve(nums)?,
            None => PDFObject::Null,
        };
        if nums.as_array().is_err() {
            warn!("cannot update the struct tree: nums isn't an array");
            return Ok(false);
        }

        let number_tree = NumberTree::new(self.xref, parent_tree.clone());
        for page in pages.iter() {
            let Some(id) = page.page_dict.get("StructParents") else {
                continue;
            };
            let entry = match id {
                PDFObject::Int(id) => number_tree.get(*id)?,
                _ => None,
            };
            let is_array = match entry {
                Some(entry) => self.xref.resolve(&entry)?.as_array().is_ok(),
                None => false,
            };
            if !is_array {
                warn!(page = page.page_index, "cannot save the struct tree: page has a wrong id");
                return Ok(false);
            }
        }

        let mut has_nothing_to_update = true;
        for page in pages.iter_mut() {
            self.collect_parents(page, &number_tree)?;
            for element in &mut page.elements {
                let Some(data) = element.tag_data() else {
                    continue;
                };
                if data.existing_struct_parent().is_none() {
                    element.parent_tree_id = Some(next_key);
                    next_key += 1;
                }
                has_nothing_to_update = false;
            }
        }
        if has_nothing_to_update {
            reset_all(pages);
            return Ok(false);
        }
        Ok(true)
    }

    /// Find, for every element naming a marked content id, the structure
    /// element of the page that owns that content.
    fn collect_parents(&self, page: &mut TaggedPage, number_tree: &NumberTree<'_>) -> Result<()> {
        let mut by_mcid: HashMap<i64, Vec<usize>> = HashMap::new();
        for (i, element) in page.elements.iter().enumerate() {
            if let Some(mcid) = element.marked_content_id() {
                by_mcid.entry(mcid).or_default().push(i);
            }
        }
        if by_mcid.is_empty() {
            return Ok(());
        }
        let Some(PDFObject::Int(id)) = page.page_dict.get("StructParents") else {
            return Ok(());
        };
        let Some(entry) = number_tree.get(*id)? else {
            return Ok(());
        };
        let parents = self.xref.resolve(&entry)?;
        let Ok(parents) = parents.as_array() else {
            return Ok(());
        };

        for kid in parents {
            let PDFObject::Ref(kid_ref) = kid else {
                continue;
            };
            let Some(node) = StructElementNode::load(self.xref, *kid_ref)? else {
                continue;
            };
            let Some(mcid) = by_mcid
                .keys()
                .copied()
                .find(|&mcid| node.leads_with_mcid(mcid))
            else {
                continue;
            };
            let has_parent = match &node.parent {
                Some(PDFObject::Ref(p)) => self.xref.fetch(*p)?.as_dict().is_ok(),
                _ => false,
            };
            if let Some(indices) = by_mcid.remove(&mcid)
                && has_parent
            {
                for i in indices {
                    page.elements[i].struct_tree_parent = Some(node.clone());
                }
            }
        }
        Ok(())
    }

    /// Splice the new tags into a clone of the existing tree.
    pub fn update_structure_tree(
        &self,
        refs: &TemporaryRefs,
        pages: &[TaggedPage],
        changes: &mut ChangeSet,
    ) -> Result<()> {
        let root_ref = self
            .root_ref
            .ok_or_else(|| PdfError::Structure("struct tree root is not indirect".into()))?;
        let xref = self.xref;
        let mut cache: RefSetCache<PDFObject> = RefSetCache::new();
        let mut root = self.dict.clone();

        let (parent_tree_ref, parent_tree) = match root.get("ParentTree") {
            Some(PDFObject::Ref(r)) => (*r, (*xref.fetch(*r)?).clone()),
            Some(inline) => {
                let inline = inline.clone();
                let r = refs.next_ref();
                root.insert("ParentTree".into(), PDFObject::Ref(r));
                (r, inline)
            }
            None => return Err(PdfError::Structure("missing ParentTree".into())),
        };
        let mut parent_tree = parent_tree.as_dict()?.clone();
        let (nums_ref, mut nums) = match parent_tree.get("Nums") {
            Some(PDFObject::Ref(r)) => (Some(*r), xref.fetch(*r)?.as_array()?.clone()),
            Some(PDFObject::Array(items)) => (None, items.clone()),
            _ => return Err(PdfError::Structure("ParentTree has no Nums".into())),
        };
        let old_next_key = root
            .get("ParentTreeNextKey")
            .and_then(|k| k.as_int().ok())
            .unwrap_or(0);
        cache.put(root_ref, PDFObject::Dict(root));

        let next_key = write_kids(
            &mut TagWriter {
                xref,
                refs,
                root_ref,
                existing: Some(self),
                fallback_kids: None,
                nums: &mut nums,
                cache: &mut cache,
            },
            pages,
        )?;

        if let Some(PDFObject::Dict(root)) = cache.get_mut(&root_ref) {
            root.insert(
                "ParentTreeNextKey".into(),
                PDFObject::Int(old_next_key.max(next_key)),
            );
        }
        match nums_ref {
            Some(r) => cache.put(r, PDFObject::Array(nums)),
            None => {
                parent_tree.insert("Nums".into(), PDFObject::Array(nums));
            }
        }
        cache.put(parent_tree_ref, PDFObject::Dict(parent_tree));

        debug!(objects = cache.len(), "structure tree updated");
        commit(cache, changes);
        Ok(())
    }

    /// Raw parent tree value under `key`.
    fn parent_tree_entry(&self, key: i64) -> Result<Option<PDFObject>> {
        let Some(parent_tree) = self.dict.get("ParentTree") else {
            return Ok(None);
        };
        NumberTree::new(self.xref, parent_tree.clone()).get(key)
    }
}

fn reset_all(pages: &mut [TaggedPage]) {
    for element in pages.iter_mut().flat_map(|p| p.elements.iter_mut()) {
        element.reset();
    }
}

fn commit(cache: RefSetCache<PDFObject>, changes: &mut ChangeSet) {
    for (r, obj) in cache {
        changes.put(r, Change::object(obj));
    }
}

struct TagWriter<'w, 'a> {
    xref: &'w XRef,
    refs: &'w TemporaryRefs,
    root_ref: PDFObjRef,
    existing: Option<&'w StructTreeRoot<'a>>,
    /// Kids of a tree being created; tags without a known parent go here.
    fallback_kids: Option<&'w mut Vec<PDFObject>>,
    nums: &'w mut Vec<PDFObject>,
    cache: &'w mut RefSetCache<PDFObject>,
}

/// Write one tag per tagged element; returns the next free parent tree key.
fn write_kids(w: &mut TagWriter<'_, '_>, pages: &[TaggedPage]) -> Result<i64> {
    let mut next_key = -1;
    for page in pages {
        for element in &page.elements {
            let Some(data) = element.accessibility.as_ref().filter(|d| d.struct_type().is_some())
            else {
                continue;
            };

            if let (Some(existing), Some(struct_parent)) = (w.existing, data.existing_struct_parent()) {
                if let Some(PDFObject::Ref(tag_ref)) = existing.parent_tree_entry(struct_parent)? {
                    let xref = w.xref;
                    let tag = w.cache.get_or_try_insert_with(tag_ref, || {
                        Ok::<_, PdfError>(PDFObject::Dict(xref.fetch(tag_ref)?.as_dict()?.clone()))
                    })?;
                    if let PDFObject::Dict(tag) = tag {
                        write_properties(tag, data);
                    }
                    continue;
                }
                warn!(struct_parent, "no tag registered under StructParent");
                continue;
            }

            let Some(parent_tree_id) = element.parent_tree_id else {
                continue;
            };
            next_key = next_key.max(parent_tree_id);
            let tag_ref = w.refs.next_ref();
            let mut tag = PDFDict::new();
            write_properties(&mut tag, data);
            update_parent_tag(w, element.struct_tree_parent.as_ref(), &mut tag, tag_ref)?;

            let mut objr = PDFDict::new();
            objr.insert("Type".into(), PDFObject::name("OBJR"));
            objr.insert("Pg".into(), PDFObject::Ref(page.page_ref));
            objr.insert("Obj".into(), PDFObject::Ref(element.annotation_ref));
            tag.insert("K".into(), PDFObject::Dict(objr));
            w.cache.put(tag_ref, PDFObject::Dict(tag));

            w.nums.push(PDFObject::Int(parent_tree_id));
            w.nums.push(PDFObject::Ref(tag_ref));
        }
    }
    Ok(next_key + 1)
}

fn write_properties(tag: &mut PDFDict, data: &AccessibilityData) {
    if let Some(struct_type) = data.struct_type() {
        tag.insert("S".into(), PDFObject::name(struct_type));
    }
    for (key, value) in [
        ("T", &data.title),
        ("Lang", &data.lang),
        ("Alt", &data.alt),
        ("E", &data.expanded),
        ("ActualText", &data.actual_text),
    ] {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            tag.insert(key.into(), PDFObject::String(encode_text(value)));
        }
    }
}

/// Point `tag` at its parent and insert `new_tag_ref` among the parent's
/// kids, right after the element it was found through.
fn update_parent_tag(
    w: &mut TagWriter<'_, '_>,
    struct_tree_parent: Option<&StructElementNode>,
    tag: &mut PDFDict,
    new_tag_ref: PDFObjRef,
) -> Result<()> {
    let sibling = struct_tree_parent.map(|node| node.objref);
    let parent = struct_tree_parent
        .and_then(|node| node.parent.clone())
        .unwrap_or(PDFObject::Ref(w.root_ref));
    tag.insert("P".into(), parent.clone());

    let parent_is_dict = match &parent {
        PDFObject::Ref(r) => w.xref.fetch(*r)?.as_dict().is_ok(),
        _ => false,
    };
    let PDFObject::Ref(parent_ref) = parent else {
        return fallback(w, new_tag_ref);
    };
    if !parent_is_dict {
        return fallback(w, new_tag_ref);
    }

    if !w.cache.has(&parent_ref) {
        let original = w.xref.fetch(parent_ref)?.as_dict()?.clone();
        w.cache.put(parent_ref, PDFObject::Dict(original));
    }
    let kids_raw = w
        .cache
        .get(&parent_ref)
        .and_then(|p| p.get("K"))
        .cloned();
    let kids_ref = match kids_raw {
        Some(PDFObject::Ref(r)) if w.cache.has(&r) => r,
        raw => {
            let kids = match &raw {
                Some(raw) => match w.xref.resolve(raw)? {
                    PDFObject::Array(items) => items,
                    _ => vec![raw.clone()],
                },
                None => Vec::new(),
            };
            let kids_ref = w.refs.next_ref();
            if let Some(PDFObject::Dict(parent)) = w.cache.get_mut(&parent_ref) {
                parent.insert("K".into(), PDFObject::Ref(kids_ref));
            }
            w.cache.put(kids_ref, PDFObject::Array(kids));
            kids_ref
        }
    };

    let Some(PDFObject::Array(kids)) = w.cache.get_mut(&kids_ref) else {
        return Err(PdfError::Structure(format!("kids of {parent_ref} are not an array")));
    };
    let at = sibling
        .and_then(|s| kids.iter().position(|k| *k == PDFObject::Ref(s)))
        .map_or(kids.len(), |i| i + 1);
    kids.insert(at, PDFObject::Ref(new_tag_ref));
    Ok(())
}

fn fallback(w: &mut TagWriter<'_, '_>, new_tag_ref: PDFObjRef) -> Result<()> {
    match w.fallback_kids.as_deref_mut() {
        Some(kids) => kids.push(PDFObject::Ref(new_tag_ref)),
        None => warn!(tag = %new_tag_ref, "no structural parent for new tag"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(data: Option<AccessibilityData>, parent_id: Option<&str>) -> TaggedElement {
        TaggedElement::new(PDFObjRef::new(20, 0), data, parent_id.map(str::to_string))
    }

    #[test]
    fn test_marked_content_id_suffix() {
        assert_eq!(element(None, Some("p3R_mc12")).marked_content_id(), Some(12));
        assert_eq!(element(None, Some("p3R_mc7x")).marked_content_id(), Some(7));
        assert_eq!(element(None, Some("p3R")).marked_content_id(), None);
    }

    #[test]
    fn test_can_create_assigns_ids_across_pages() {
        let figure = AccessibilityData {
            struct_type: Some("Figure".into()),
            alt: Some("A cat".into()),
            ..AccessibilityData::default()
        };
        let untyped = AccessibilityData {
            alt: Some("no type".into()),
            ..AccessibilityData::default()
        };
        let page = |index, elements| TaggedPage {
            page_index: index,
            page_ref: PDFObjRef::new(3 + index as u32, 0),
            page_dict: PDFDict::new(),
            elements,
        };
        let mut pages = vec![
            page(0, vec![element(Some(figure.clone()), None), element(Some(untyped), None)]),
            page(1, vec![element(None, None), element(Some(figure), None)]),
        ];
        assert!(StructTreeRoot::can_create_structure_tree(
            Some(PDFObjRef::new(1, 0)),
            &mut pages
        ));
        let ids: Vec<_> = pages
            .iter()
            .flat_map(|p| p.elements.iter().map(|e| e.parent_tree_id))
            .collect();
        assert_eq!(ids, vec![Some(0), None, None, Some(1)]);
    }

    #[test]
    fn test_can_create_needs_a_type() {
        let mut pages = vec![TaggedPage {
            page_index: 0,
            page_ref: PDFObjRef::new(3, 0),
            page_dict: PDFDict::new(),
            elements: vec![element(Some(AccessibilityData::default()), None)],
        }];
        assert!(!StructTreeRoot::can_create_structure_tree(
            Some(PDFObjRef::new(1, 0)),
            &mut pages
        ));
        assert!(!StructTreeRoot::can_create_structure_tree(None, &mut pages));
    }

    #[test]
    fn test_write_properties_encodes_text() {
        let mut tag = PDFDict::new();
        write_properties(
            &mut tag,
            &AccessibilityData {
                struct_type: Some("Figure".into()),
                alt: Some("Café".into()),
                title: Some(String::new()),
                ..AccessibilityData::default()
            },
        );
        assert_eq!(tag.keys().collect::<Vec<_>>(), vec!["S", "Alt"]);
        assert_eq!(tag["Alt"], PDFObject::String(encode_text("Café")));
    }
}

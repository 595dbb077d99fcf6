//! Saving a document: edits in, incremental update out.

use crate::annotations::{
    AnnotationStorage, AppearanceGenerator, PageEdits, ViewerAppearances, WidgetSave,
    new_annotations_by_page, save_page_fields,
};
use crate::document::{PDFDocument, TemporaryRefs};
use crate::error::Result;
use crate::loader::ObjectLoader;
use crate::model::{PDFDict, PDFObjRef, PDFObject};
use crate::structure::{StructTreeRoot, TaggedPage};
use crate::utils::{decode_text, pdf_date};
use crate::writer::{Change, ChangeSet, IncrementalUpdate, XRefInfo, incremental_update};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options and edits of one save.
#[derive(Clone)]
pub struct SaveRequest {
    /// Pages whose widgets are saved; `None` means all of them.
    pub num_pages: Option<usize>,
    /// The form lives only in XFA; `xfa_data` replaces the datasets.
    pub is_pure_xfa: bool,
    pub annotation_storage: AnnotationStorage,
    /// Output name, hashed into the new file id.
    pub filename: Option<String>,
    pub modification_date: DateTime<Utc>,
    pub xfa_data: Option<String>,
    pub generator: Arc<dyn AppearanceGenerator>,
}

impl SaveRequest {
    pub fn new(annotation_storage: AnnotationStorage) -> Self {
        Self {
            num_pages: None,
            is_pure_xfa: false,
            annotation_storage,
            filename: None,
            modification_date: Utc::now(),
            xfa_data: None,
            generator: Arc::new(ViewerAppearances),
        }
    }
}

enum TreeUpdate<'a> {
    Create,
    Update(StructTreeRoot<'a>),
    Skip,
}

impl PDFDocument {
    /// Apply `request` and return the updated file.
    ///
    /// Without any resulting change the original bytes come back unchanged.
    pub fn save(&self, request: &SaveRequest) -> Result<Vec<u8>> {
        let xref = self.xref();
        let new_refs = xref.temporary_refs();

        let by_page = if request.is_pure_xfa {
            Default::default()
        } else {
            new_annotations_by_page(&request.annotation_storage)
        };

        ObjectLoader::new(self.catalog(), &["AcroForm", "StructTreeRoot"]).load(xref, self.manager())?;
        for &page_index in by_page.keys() {
            if let Ok(page) = self.page(page_index) {
                ObjectLoader::new(&page, &["Annots"]).load(xref, self.manager())?;
            }
        }
        let original = self.original_bytes()?;
        let acro_form = self.acro_form()?;
        let acro_form_ref = self
            .catalog()
            .get("AcroForm")
            .and_then(|f| f.as_ref().ok())
            .copied();
        let date = pdf_date(request.modification_date);
        let generator = &*request.generator;
        let mut changes = ChangeSet::new();

        let mut pages = Vec::with_capacity(by_page.len());
        for (&page_index, annotations) in &by_page {
            let page_ref = match self.page_ref(page_index) {
                Ok(r) => r,
                Err(e) => {
                    warn!(page = page_index, error = %e, "edits for a missing page, skipping");
                    continue;
                }
            };
            let page_dict = self.page(page_index)?;
            pages.push(PageEdits::plan(
                xref,
                &new_refs,
                page_index,
                page_ref,
                page_dict,
                annotations,
                generator,
            )?);
        }

        let mut tagged: Vec<TaggedPage> = pages.iter().map(PageEdits::tagged_page).collect();
        let tree_update = if pages.is_empty() {
            TreeUpdate::Skip
        } else {
            self.plan_tree_update(&mut tagged)
        };
        for (page, tags) in pages.iter_mut().zip(&tagged) {
            page.apply_tags(tags);
        }

        let page_changes = pages
            .par_iter()
            .map(|page| page.save(xref, &date))
            .collect::<Result<Vec<_>>>()?;
        for (r, change) in page_changes.into_iter().flatten() {
            changes.put(r, change);
        }

        let tree_result = match tree_update {
            TreeUpdate::Create => StructTreeRoot::create_structure_tree(
                xref,
                &new_refs,
                self.catalog_ref(),
                self.catalog(),
                &tagged,
                &mut changes,
            ),
            TreeUpdate::Update(root) => root.update_structure_tree(&new_refs, &tagged, &mut changes),
            TreeUpdate::Skip => Ok(()),
        };
        if let Err(e) = tree_result {
            warn!(error = %e, "structure tree not saved");
        }

        let xfa_data = if request.is_pure_xfa {
            match &request.xfa_data {
                Some(data) => Some(data.clone().into_bytes()),
                None => return Ok(original.to_vec()),
            }
        } else {
            let count = request
                .num_pages
                .unwrap_or(usize::MAX)
                .min(self.page_count());
            let saves = (0..count)
                .into_par_iter()
                .map(|i| {
                    let page = self.page(i)?;
                    save_page_fields(
                        xref,
                        &page,
                        &request.annotation_storage,
                        acro_form.as_ref(),
                        generator,
                        &date,
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            for save in saves.into_iter().flatten() {
                record_widget(&new_refs, save, &mut changes);
            }
            if changes.is_empty() {
                info!("nothing to save");
                return Ok(original.to_vec());
            }
            None
        };

        let need_appearances = acro_form_ref.is_some()
            && acro_form.is_some()
            && changes.values().any(|c| c.need_appearances);

        let xfa = match acro_form.as_ref().and_then(|f| f.get("XFA")) {
            Some(xfa) => xref.resolve(xfa)?,
            None => PDFObject::Null,
        };
        let mut xfa_datasets_ref = None;
        let mut has_xfa_datasets_entry = false;
        match &xfa {
            PDFObject::Array(items) => {
                for pair in items.chunks(2) {
                    if let [PDFObject::String(name), PDFObject::Ref(r)] = pair
                        && name == b"datasets"
                    {
                        xfa_datasets_ref = Some(*r);
                        has_xfa_datasets_entry = true;
                    }
                }
                if xfa_datasets_ref.is_none() {
                    xfa_datasets_ref = Some(new_refs.next_ref());
                }
            }
            PDFObject::Null => {}
            _ => warn!("unsupported XFA type"),
        }

        let xref_info = self.xref_info(request, &new_refs)?;
        debug!(changes = changes.len(), "writing incremental update");
        incremental_update(IncrementalUpdate {
            original: &original,
            xref_info,
            changes,
            xref,
            has_xfa: !xfa.is_null(),
            xfa_datasets_ref,
            has_xfa_datasets_entry,
            need_appearances,
            acro_form_ref,
            acro_form,
            xfa_data,
            use_xref_stream: xref.top_dict_is_stream(),
        })
    }

    /// Decide what happens to the structure tree; assigns parent tree ids.
    fn plan_tree_update(&self, tagged: &mut [TaggedPage]) -> TreeUpdate<'_> {
        let xref = self.xref();
        let root = match StructTreeRoot::from_catalog(xref, self.catalog()) {
            Ok(root) => root,
            Err(e) => {
                warn!(error = %e, "unreadable structure tree");
                return TreeUpdate::Skip;
            }
        };
        match root {
            None if StructTreeRoot::can_create_structure_tree(Some(self.catalog_ref()), tagged) => {
                TreeUpdate::Create
            }
            None => TreeUpdate::Skip,
            Some(root) => match root.can_update_struct_tree(tagged) {
                Ok(true) => TreeUpdate::Update(root),
                Ok(false) => TreeUpdate::Skip,
                Err(e) => {
                    warn!(error = %e, "cannot update the structure tree");
                    TreeUpdate::Skip
                }
            },
        }
    }

    fn xref_info(&self, request: &SaveRequest, new_refs: &TemporaryRefs) -> Result<XRefInfo> {
        let xref = self.xref();
        let trailer = xref.trailer();
        let info = self
            .info()?
            .map(|info| {
                info.values()
                    .filter_map(|v| v.as_string().ok().map(decode_text))
                    .collect()
            })
            .unwrap_or_default();
        let previous_xref_offset = if self.is_linearized() {
            xref.start_xref()
        } else {
            xref.first_xref_stm_pos().unwrap_or_else(|| xref.start_xref())
        };
        let raw_ref = |key: &str| -> Option<PDFObjRef> { trailer.get(key)?.as_ref().ok().copied() };
        Ok(XRefInfo {
            root_ref: raw_ref("Root"),
            encrypt_ref: xref.encrypt_ref(),
            new_ref: new_refs.next_ref(),
            info_ref: raw_ref("Info"),
            info,
            file_ids: xref.file_ids(),
            previous_xref_offset,
            filename: request.filename.clone().unwrap_or_default(),
            timestamp: request.modification_date.timestamp(),
        })
    }
}

/// Store a widget save; a generated appearance gets its own reference.
fn record_widget(new_refs: &TemporaryRefs, save: WidgetSave, changes: &mut ChangeSet) {
    let WidgetSave {
        widget_ref,
        mut dict,
        form_patch,
        need_appearances,
        appearance,
        parent,
    } = save;
    if let Some(stream) = appearance {
        let ap_ref = new_refs.next_ref();
        let mut ap = PDFDict::new();
        ap.insert("N".into(), PDFObject::Ref(ap_ref));
        dict.insert("AP".into(), PDFObject::Dict(ap));
        changes.put(ap_ref, Change::object(stream));
    }
    changes.put(
        widget_ref,
        Change::object(dict)
            .with_form_patch(form_patch)
            .with_need_appearances(need_appearances),
    );
    if let Some((parent_ref, parent)) = parent {
        changes.put(parent_ref, Change::object(parent));
    }
}

//! PDF Document - entry point tying the byte source, resolver and catalog together.

use super::page::{collect_page_refs, page_ref_at};
use super::stream::{ChunkManager, DEFAULT_CHUNK_SIZE, RangeSource};
use super::xref::XRef;
use crate::error::{PdfError, Result};
use crate::model::{PDFDict, PDFObjRef, PDFObject};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// A base PDF file that can be edited incrementally.
pub struct PDFDocument {
    manager: ChunkManager,
    xref: XRef,
    catalog_ref: PDFObjRef,
    catalog: PDFDict,
    pages: Vec<PDFObjRef>,
    linearized: bool,
}

impl PDFDocument {
    /// Open a document whose bytes are fetched from `source` on demand.
    pub fn open(source: Arc<dyn RangeSource>, password: &str) -> Result<Self> {
        Self::open_with_chunk_size(source, DEFAULT_CHUNK_SIZE, password)
    }

    pub fn open_with_chunk_size(
        source: Arc<dyn RangeSource>,
        chunk_size: usize,
        password: &str,
    ) -> Result<Self> {
        Self::from_manager(ChunkManager::new(source, chunk_size), password)
    }

    /// Open a document held entirely in memory.
    pub fn from_bytes(data: impl Into<Bytes>, password: &str) -> Result<Self> {
        Self::from_manager(ChunkManager::from_bytes(data), password)
    }

    fn from_manager(manager: ChunkManager, password: &str) -> Result<Self> {
        let xref = manager.ensure(|| {
            let mut xref = XRef::parse(Arc::clone(manager.stream()))?;
            xref.set_encryption(password)?;
            Ok(xref)
        })?;

        let catalog_ref = *xref
            .trailer()
            .get("Root")
            .ok_or_else(|| PdfError::KeyError("Root".into()))?
            .as_ref()?;
        let catalog = manager.ensure(|| {
            let obj = xref.fetch(catalog_ref)?;
            match obj.as_dict() {
                Ok(dict) => Ok(dict.clone()),
                Err(_) => Err(PdfError::ObjectNotFound(catalog_ref.objid)),
            }
        })?;
        let pages = match catalog.get("Pages") {
            Some(PDFObject::Ref(root)) => manager.ensure(|| collect_page_refs(&xref, *root))?,
            _ => Vec::new(),
        };
        let linearized = manager.ensure(|| xref.is_linearized())?;
        debug!(pages = pages.len(), linearized, "opened document");

        Ok(Self {
            manager,
            xref,
            catalog_ref,
            catalog,
            pages,
            linearized,
        })
    }

    /// Run `f`, loading missing bytes and retrying until it stops reporting them.
    pub fn ensure<T>(&self, f: impl FnMut() -> Result<T>) -> Result<T> {
        self.manager.ensure(f)
    }

    /// Resolve `r`, loading whatever bytes it needs.
    pub fn fetch(&self, r: PDFObjRef) -> Result<Arc<PDFObject>> {
        self.ensure(|| self.xref.fetch(r))
    }

    pub const fn xref(&self) -> &XRef {
        &self.xref
    }

    pub const fn manager(&self) -> &ChunkManager {
        &self.manager
    }

    pub const fn catalog(&self) -> &PDFDict {
        &self.catalog
    }

    pub const fn catalog_ref(&self) -> PDFObjRef {
        self.catalog_ref
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_refs(&self) -> &[PDFObjRef] {
        &self.pages
    }

    pub fn page_ref(&self, index: usize) -> Result<PDFObjRef> {
        page_ref_at(&self.pages, index)
    }

    /// Page dictionary at `index`.
    pub fn page(&self, index: usize) -> Result<PDFDict> {
        let page_ref = self.page_ref(index)?;
        let page = self.fetch(page_ref)?;
        Ok(page.as_dict()?.clone())
    }

    pub const fn is_linearized(&self) -> bool {
        self.linearized
    }

    /// The catalog's `/AcroForm`, resolved.
    pub fn acro_form(&self) -> Result<Option<PDFDict>> {
        let Some(form) = self.catalog.get("AcroForm") else {
            return Ok(None);
        };
        let form = self.ensure(|| self.xref.resolve(form))?;
        Ok(form.as_dict().ok().cloned())
    }

    /// Whether the form carries XFA data.
    pub fn has_xfa(&self) -> Result<bool> {
        Ok(self
            .acro_form()?
            .and_then(|form| form.get("XFA").cloned())
            .is_some_and(|xfa| !xfa.is_null()))
    }

    /// The trailer's `/Info` dictionary, resolved.
    pub fn info(&self) -> Result<Option<PDFDict>> {
        let Some(info) = self.xref.trailer().get("Info") else {
            return Ok(None);
        };
        let info = self.ensure(|| self.xref.resolve(info))?;
        Ok(info.as_dict().ok().cloned())
    }

    /// Every byte of the base file, loading what is still missing.
    pub fn original_bytes(&self) -> Result<Bytes> {
        self.manager.request_all_chunks()?;
        self.manager.stream().bytes()
    }
}

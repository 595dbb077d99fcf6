//! Page tree traversal.

use super::xref::XRef;
use crate::error::{PdfError, Result};
use crate::model::{PDFObjRef, PDFObject, RefSet};
use tracing::warn;

/// Page references in document order, walking `/Kids` depth first.
///
/// Nodes that cannot be read are skipped; missing bytes abort the walk so
/// the caller can load them and retry.
pub fn collect_page_refs(xref: &XRef, root: PDFObjRef) -> Result<Vec<PDFObjRef>> {
    let mut stack = vec![root];
    let mut visited = RefSet::new();
    let mut pages = Vec::new();

    while let Some(node_ref) = stack.pop() {
        if !visited.put(node_ref) {
            warn!(%node_ref, "page tree revisits a node");
            continue;
        }
        let node = match xref.fetch(node_ref) {
            Ok(node) => node,
            Err(e) if e.is_missing_data() => return Err(e),
            Err(e) => {
                warn!(%node_ref, error = %e, "unreadable page tree node");
                continue;
            }
        };
        let Ok(dict) = node.as_dict() else {
            continue;
        };

        let is_pages = match dict.get("Type") {
            Some(PDFObject::Name(name)) => name == "Pages",
            _ => dict.contains_key("Kids"),
        };
        if !is_pages {
            pages.push(node_ref);
            continue;
        }
        let kids = match dict.get("Kids") {
            Some(kids) => xref.resolve(kids)?,
            None => continue,
        };
        if let PDFObject::Array(kids) = kids {
            for kid in kids.iter().rev() {
                if let PDFObject::Ref(kid) = kid {
                    stack.push(*kid);
                }
            }
        }
    }
    Ok(pages)
}

/// Page reference at `index`, or an argument error.
pub fn page_ref_at(pages: &[PDFObjRef], index: usize) -> Result<PDFObjRef> {
    pages
        .get(index)
        .copied()
        .ok_or_else(|| PdfError::InvalidArgument(format!("page index {index} out of range")))
}

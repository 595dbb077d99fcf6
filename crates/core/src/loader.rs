//! Graph completion: make the subgraph reachable from some keys resident.
//!
//! The walk is an explicit state machine. [`ObjectLoader::step`] visits the
//! frontier and reports which byte ranges it could not read;
//! [`ObjectLoader::resume`] re-arms the nodes that failed so the next step
//! retries them once the ranges are loaded. [`ObjectLoader::load`] drives both
//! against a [`ChunkManager`].

use crate::document::{ChunkManager, XRef};
use crate::error::Result;
use crate::model::{PDFDict, PDFObject, RefSet};
use tracing::{debug, warn};

/// Outcome of one walk over the frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStep {
    /// Everything reachable is resident.
    Done,
    /// These ranges must be loaded before [`ObjectLoader::resume`].
    NeedRanges(Vec<(usize, usize)>),
    /// Resolution failed for a reason range requests cannot fix.
    NeedAll,
}

pub struct ObjectLoader {
    frontier: Vec<PDFObject>,
    revisit: Vec<PDFObject>,
    ref_set: RefSet,
}

impl ObjectLoader {
    /// Loader for the raw values of `keys` in `dict`.
    pub fn new(dict: &PDFDict, keys: &[&str]) -> Self {
        let frontier = keys
            .iter()
            .filter_map(|key| dict.get(*key).cloned())
            .collect();
        Self {
            frontier,
            revisit: Vec::new(),
            ref_set: RefSet::new(),
        }
    }

    /// Walk the frontier until it is exhausted.
    pub fn step(&mut self, xref: &XRef) -> LoadStep {
        let mut pending = Vec::new();

        while let Some(mut node) = self.frontier.pop() {
            if let PDFObject::Ref(r) = node {
                if !self.ref_set.put(r) {
                    continue;
                }
                match xref.fetch(r) {
                    Ok(obj) => node = (*obj).clone(),
                    Err(e) => {
                        let crate::error::PdfError::MissingData { begin, end } = e else {
                            warn!(%r, error = %e, "object loader falling back to loading everything");
                            return LoadStep::NeedAll;
                        };
                        self.revisit.push(node);
                        pending.push((begin, end));
                        continue;
                    }
                }
            }

            if let PDFObject::Stream(stream) = &node
                && let Some(range) = stream.pending_range()
                && !xref.stream().is_range_loaded(range.0, range.1)
            {
                pending.push(range);
                // Streams are not cached, so revisit through the reference to re-read the body.
                match stream.objref() {
                    Some(r) => self.revisit.push(PDFObject::Ref(r)),
                    None => self.revisit.push(node.clone()),
                }
            }

            add_children(&node, &mut self.frontier);
        }

        if pending.is_empty() {
            LoadStep::Done
        } else {
            LoadStep::NeedRanges(pending)
        }
    }

    /// Re-arm the nodes that reported missing data.
    pub fn resume(&mut self) {
        for node in &self.revisit {
            if let PDFObject::Ref(r) = node {
                self.ref_set.remove(r);
            }
        }
        self.frontier = std::mem::take(&mut self.revisit);
    }

    /// Drive the walk to completion, one batched range request per round.
    pub fn load(mut self, xref: &XRef, manager: &ChunkManager) -> Result<()> {
        if manager.stream().is_data_loaded() {
            return Ok(());
        }
        let mut rounds = 0usize;
        loop {
            match self.step(xref) {
                LoadStep::Done => {
                    debug!(rounds, "object graph resident");
                    return Ok(());
                }
                LoadStep::NeedAll => return manager.request_all_chunks(),
                LoadStep::NeedRanges(ranges) => {
                    if ranges
                        .iter()
                        .all(|&(begin, end)| manager.stream().is_range_loaded(begin, end))
                    {
                        // Loaded ranges still reported missing: no progress is possible.
                        warn!("object loader stalled, loading everything");
                        return manager.request_all_chunks();
                    }
                    rounds += 1;
                    debug!(rounds, ranges = ranges.len(), "object loader requesting ranges");
                    manager.request_ranges(&ranges)?;
                    self.resume();
                }
            }
        }
    }
}

/// Push the values of `node` that can lead further into the graph.
fn add_children(node: &PDFObject, frontier: &mut Vec<PDFObject>) {
    let values: Box<dyn Iterator<Item = &PDFObject>> = match node {
        PDFObject::Dict(dict) => Box::new(dict.values()),
        PDFObject::Stream(stream) => Box::new(stream.attrs.values()),
        PDFObject::Array(items) => Box::new(items.iter()),
        _ => return,
    };
    frontier.extend(values.filter(|v| may_have_children(v)).cloned());
}

const fn may_have_children(value: &PDFObject) -> bool {
    matches!(
        value,
        PDFObject::Ref(_) | PDFObject::Dict(_) | PDFObject::Array(_) | PDFObject::Stream(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PDFObjRef, dict_from};

    #[test]
    fn test_children_skip_scalars() {
        let node = PDFObject::Dict(dict_from([
            ("Type", PDFObject::name("Annot")),
            ("P", PDFObject::Ref(PDFObjRef::new(3, 0))),
            ("Rect", PDFObject::Array(vec![PDFObject::Int(0); 4])),
            ("F", PDFObject::Int(4)),
        ]));
        let mut frontier = Vec::new();
        add_children(&node, &mut frontier);
        assert_eq!(frontier.len(), 2);
        assert!(matches!(frontier[0], PDFObject::Ref(_)));
    }

    #[test]
    fn test_loader_takes_only_present_keys() {
        let dict = dict_from([("AcroForm", PDFObject::Ref(PDFObjRef::new(5, 0)))]);
        let loader = ObjectLoader::new(&dict, &["AcroForm", "StructTreeRoot"]);
        assert_eq!(loader.frontier, vec![PDFObject::Ref(PDFObjRef::new(5, 0))]);
    }
}

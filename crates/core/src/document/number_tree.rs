//! Number trees (`/Nums`, `/Kids`, `/Limits`).

use super::xref::XRef;
use crate::error::Result;
use crate::model::{PDFObject, RefSet};
use std::collections::BTreeMap;
use tracing::warn;

/// Read access to a number tree rooted at `root`.
pub struct NumberTree<'a> {
    xref: &'a XRef,
    root: PDFObject,
}

impl<'a> NumberTree<'a> {
    pub const fn new(xref: &'a XRef, root: PDFObject) -> Self {
        Self { xref, root }
    }

    /// Value stored under `key`, unresolved.
    pub fn get(&self, key: i64) -> Result<Option<PDFObject>> {
        let mut node = self.xref.resolve(&self.root)?;
        let mut visited = RefSet::new();
        if let PDFObject::Ref(r) = &self.root {
            visited.put(*r);
        }

        'descend: loop {
            let Ok(dict) = node.as_dict() else {
                return Ok(None);
            };
            if let Some(nums) = dict.get("Nums") {
                let nums = self.xref.resolve(nums)?;
                return Ok(lookup_nums(nums.as_array().ok(), key));
            }
            let Some(kids) = dict.get("Kids") else {
                return Ok(None);
            };
            let kids = self.xref.resolve(kids)?;
            for kid in kids.as_array().map(Vec::as_slice).unwrap_or_default() {
                if let PDFObject::Ref(r) = kid
                    && !visited.put(*r)
                {
                    warn!(%r, "number tree revisits a node");
                    continue;
                }
                let child = self.xref.resolve(kid)?;
                let in_range = match child.get("Limits").map(|l| self.xref.resolve(l)) {
                    Some(limits) => {
                        let limits = limits?;
                        match limits.as_array().map(Vec::as_slice) {
                            Ok([lo, hi]) => {
                                let lo = lo.as_int().unwrap_or(i64::MIN);
                                let hi = hi.as_int().unwrap_or(i64::MAX);
                                (lo..=hi).contains(&key)
                            }
                            _ => true,
                        }
                    }
                    None => true,
                };
                if in_range {
                    node = child;
                    continue 'descend;
                }
            }
            return Ok(None);
        }
    }

    /// Every `(key, value)` pair in the tree.
    pub fn get_all(&self) -> Result<BTreeMap<i64, PDFObject>> {
        let mut out = BTreeMap::new();
        let mut visited = RefSet::new();
        let mut queue = vec![self.root.clone()];
        while let Some(entry) = queue.pop() {
            if let PDFObject::Ref(r) = &entry
                && !visited.put(*r)
            {
                continue;
            }
            let node = self.xref.resolve(&entry)?;
            let Ok(dict) = node.as_dict() else {
                continue;
            };
            if let Some(kids) = dict.get("Kids") {
                let kids = self.xref.resolve(kids)?;
                if let Ok(kids) = kids.as_array() {
                    queue.extend(kids.iter().cloned());
                }
            }
            if let Some(nums) = dict.get("Nums") {
                let nums = self.xref.resolve(nums)?;
                if let Ok(nums) = nums.as_array() {
                    for pair in nums.chunks_exact(2) {
                        if let Ok(k) = pair[0].as_int() {
                            out.insert(k, pair[1].clone());
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn lookup_nums(nums: Option<&Vec<PDFObject>>, key: i64) -> Option<PDFObject> {
    nums?
        .chunks_exact(2)
        .find(|pair| pair[0].as_int().ok() == Some(key))
        .map(|pair| pair[1].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PDFObjRef;

    #[test]
    fn test_lookup_nums_finds_pair() {
        let nums = vec![
            PDFObject::Int(0),
            PDFObject::Ref(PDFObjRef::new(10, 0)),
            PDFObject::Int(3),
            PDFObject::Array(vec![]),
        ];
        assert_eq!(
            lookup_nums(Some(&nums), 0),
            Some(PDFObject::Ref(PDFObjRef::new(10, 0)))
        );
        assert_eq!(lookup_nums(Some(&nums), 3), Some(PDFObject::Array(vec![])));
        assert_eq!(lookup_nums(Some(&nums), 1), None);
    }
}

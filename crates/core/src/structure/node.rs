//! Read-only mirror of one structure element.

use crate::document::XRef;
use crate::error::Result;
use crate::model::{PDFObjRef, PDFObject};

/// One entry of an element's `/K`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructKid {
    /// Marked content on the page, by MCID (integer or `/MCR` dictionary).
    MarkedContent(i64),
    /// An `/OBJR` pointing at an annotation or XObject.
    ObjectRef(Option<PDFObjRef>),
    /// A nested structure element.
    Element(PDFObjRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructElementNode {
    pub objref: PDFObjRef,
    pub role: Option<String>,
    /// Raw `/P`.
    pub parent: Option<PDFObject>,
    pub kids: Vec<StructKid>,
}

impl StructElementNode {
    /// Read the element at `objref`; `None` when it is not a dictionary.
    pub fn load(xref: &XRef, objref: PDFObjRef) -> Result<Option<Self>> {
        let obj = xref.fetch(objref)?;
        let Ok(dict) = obj.as_dict() else {
            return Ok(None);
        };
        let role = dict
            .get("S")
            .and_then(|s| s.as_name().ok())
            .map(str::to_string);
        let mut kids = Vec::new();
        match dict.get("K") {
            Some(PDFObject::Array(items)) => {
                for item in items {
                    if let Some(kid) = Self::kid(xref, item)? {
                        kids.push(kid);
                    }
                }
            }
            Some(other) => kids.extend(Self::kid(xref, other)?),
            None => {}
        }
        Ok(Some(Self {
            objref,
            role,
            parent: dict.get("P").cloned(),
            kids,
        }))
    }

    fn kid(xref: &XRef, raw: &PDFObject) -> Result<Option<StructKid>> {
        if let PDFObject::Int(mcid) = raw {
            return Ok(Some(StructKid::MarkedContent(*mcid)));
        }
        let resolved = xref.resolve(raw)?;
        let Ok(dict) = resolved.as_dict() else {
            return Ok(None);
        };
        let kid = match dict.get("Type") {
            Some(t) if t.is_name("MCR") => match dict.get("MCID") {
                Some(PDFObject::Int(mcid)) => StructKid::MarkedContent(*mcid),
                _ => return Ok(None),
            },
            Some(t) if t.is_name("OBJR") => {
                StructKid::ObjectRef(dict.get("Obj").and_then(|o| o.as_ref().ok()).copied())
            }
            _ => match raw {
                PDFObject::Ref(r) => StructKid::Element(*r),
                _ => return Ok(None),
            },
        };
        Ok(Some(kid))
    }

    /// Whether `mcid` is reachable from the leading marked-content kids.
    ///
    /// Scanning stops at the first kid that is not marked content.
    pub fn leads_with_mcid(&self, mcid: i64) -> bool {
        for kid in &self.kids {
            match kid {
                StructKid::MarkedContent(id) if *id == mcid => return true,
                StructKid::MarkedContent(_) => {}
                _ => return false,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kids: Vec<StructKid>) -> StructElementNode {
        StructElementNode {
            objref: PDFObjRef::new(1, 0),
            role: Some("P".into()),
            parent: None,
            kids,
        }
    }

    #[test]
    fn test_mcid_scan_stops_at_first_element() {
        let n = node(vec![
            StructKid::MarkedContent(0),
            StructKid::MarkedContent(4),
            StructKid::Element(PDFObjRef::new(9, 0)),
            StructKid::MarkedContent(7),
        ]);
        assert!(n.leads_with_mcid(4));
        assert!(!n.leads_with_mcid(7));
        assert!(!n.leads_with_mcid(1));
    }
}

//! PDF model types.
//!
//! - `objects` - PDF object types (PDFObject, PDFStream, PDFObjRef)
//! - `refs` - reference sets and the reference-keyed copy-on-write cache

pub mod objects;
pub mod refs;

pub use objects::{PDFDict, PDFObjRef, PDFObject, PDFStream, StreamBody, dict_from};
pub use refs::{RefSet, RefSetCache};

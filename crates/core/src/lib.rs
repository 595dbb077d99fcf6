//! addendum - incremental updates for PDF files.
//!
//! Opens a PDF over a byte-range source, takes form and annotation edits,
//! and appends the changed objects with a new cross-reference section.

pub mod annotations;
pub mod codec;
pub mod document;
pub mod error;
pub mod loader;
pub mod model;
pub mod parser;
pub mod save;
pub mod structure;
pub mod utils;
pub mod writer;

// Re-export codec modules for convenience
pub use codec::aes;
pub use codec::arcfour;

pub use annotations::{AnnotationEdit, AnnotationStorage, AppearanceGenerator, ViewerAppearances};
pub use document::{BytesSource, PDFDocument, RangeSource};
pub use error::{PdfError, Result};
pub use loader::{LoadStep, ObjectLoader};
pub use model::{PDFDict, PDFObjRef, PDFObject, PDFStream};
pub use save::SaveRequest;

//! PDF Document module - byte access, cross-references, pages, and security.
//!
//! This module contains:
//! - `stream` - chunked file bytes and the range transport
//! - `xref` - cross-reference chain and object resolution
//! - `catalog` - the document (catalog, pages, form) over a resolver
//! - `page` - page tree traversal
//! - `number_tree` - number tree lookups
//! - `security` - standard security handler cipher transforms

pub mod catalog;
pub mod number_tree;
pub mod page;
pub mod security;
pub mod stream;
pub mod xref;

pub use catalog::PDFDocument;
pub use number_tree::NumberTree;
pub use security::{CipherTransform, CipherTransformFactory};
pub use stream::{BytesSource, ChunkManager, ChunkedStream, DEFAULT_CHUNK_SIZE, RangeSource};
pub use xref::{TemporaryRefs, XRef, XRefEntry};

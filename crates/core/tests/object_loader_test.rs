//! Loading object graphs over a source that serves small byte ranges.

mod common;

use std::sync::Arc;

use addendum_core::annotations::storage_from_json;
use addendum_core::model::{PDFObjRef, PDFObject};
use addendum_core::{BytesSource, LoadStep, ObjectLoader, PDFDocument, SaveRequest};
use chrono::{TimeZone, Utc};
use common::form_document;

const CHUNK: usize = 32;

fn open_chunked(data: &[u8]) -> (Arc<BytesSource>, PDFDocument) {
    let source = Arc::new(BytesSource::new(data.to_vec()));
    let doc = PDFDocument::open_with_chunk_size(source.clone(), CHUNK, "").unwrap();
    (source, doc)
}

#[test]
fn test_opening_reads_only_part_of_the_file() {
    let data = form_document().spaced(512).build();
    let (source, doc) = open_chunked(&data);
    assert!(!source.requests().is_empty());
    assert!(!doc.manager().stream().is_data_loaded());
}

#[test]
fn test_step_and_resume_until_done() {
    let data = form_document().spaced(512).build();
    let (source, doc) = open_chunked(&data);
    let mut loader = ObjectLoader::new(doc.catalog(), &["AcroForm"]);

    let mut rounds = 0;
    loop {
        match loader.step(doc.xref()) {
            LoadStep::Done => break,
            LoadStep::NeedRanges(ranges) => {
                assert!(!ranges.is_empty());
                doc.manager().request_ranges(&ranges).unwrap();
                loader.resume();
            }
            LoadStep::NeedAll => panic!("plain objects never need the whole file"),
        }
        rounds += 1;
        assert!(rounds < 20, "loader does not converge");
    }

    // Every field object is now resident.
    let served = source.requests().len();
    let parent = doc.xref().fetch(PDFObjRef::new(8, 0)).unwrap();
    assert_eq!(parent.get("T"), Some(&PDFObject::String(b"person".to_vec())));
    let widget = doc.xref().fetch(PDFObjRef::new(4, 0)).unwrap();
    assert_eq!(widget.get("V"), Some(&PDFObject::name("Off")));
    assert_eq!(source.requests().len(), served);
}

#[test]
fn test_load_makes_streams_resident() {
    let data = form_document().spaced(512).build();
    let (source, doc) = open_chunked(&data);
    let page = doc.page(0).unwrap();
    ObjectLoader::new(&page, &["Annots"])
        .load(doc.xref(), doc.manager())
        .unwrap();

    let served = source.requests().len();
    let appearance = doc.xref().fetch(PDFObjRef::new(5, 0)).unwrap();
    let stream = doc.xref().materialize(appearance.as_stream().unwrap()).unwrap();
    assert_eq!(doc.xref().decode_stream(&stream).unwrap(), b"0 g");
    assert_eq!(source.requests().len(), served);
}

#[test]
fn test_fully_loaded_manager_returns_immediately() {
    let data = form_document().spaced(512).build();
    let (source, doc) = open_chunked(&data);
    doc.manager().request_all_chunks().unwrap();
    assert!(doc.manager().stream().is_data_loaded());

    let served = source.requests().len();
    ObjectLoader::new(doc.catalog(), &["AcroForm", "Pages"])
        .load(doc.xref(), doc.manager())
        .unwrap();
    assert_eq!(source.requests().len(), served);
}

#[test]
fn test_missing_keys_are_ignored() {
    let data = form_document().spaced(512).build();
    let (_, doc) = open_chunked(&data);
    ObjectLoader::new(doc.catalog(), &["StructTreeRoot", "Outlines"])
        .load(doc.xref(), doc.manager())
        .unwrap();
}

#[test]
fn test_chunked_save_matches_in_memory_save() {
    let data = form_document().spaced(512).build();
    let mut request = SaveRequest::new(storage_from_json(r#"{"4R": {"value": true}}"#).unwrap());
    request.modification_date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

    let (_, chunked) = open_chunked(&data);
    let in_memory = PDFDocument::from_bytes(data.clone(), "").unwrap();
    assert_eq!(
        chunked.save(&request).unwrap(),
        in_memory.save(&request).unwrap()
    );

    let (_, chunked) = open_chunked(&data);
    assert_eq!(chunked.save(&SaveRequest::new(Default::default())).unwrap(), data);
}

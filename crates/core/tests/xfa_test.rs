//! Form edits mirrored into the XFA datasets packet.

mod common;

use addendum_core::annotations::storage_from_json;
use addendum_core::model::{PDFObjRef, PDFObject};
use addendum_core::{PDFDocument, SaveRequest};
use common::{PdfBuilder, appended, contains, form_document};

const DATASETS: &str = r#"<xfa:datasets xmlns:xfa="http://www.xfa.org/schema/xfa-data/1.0/"><xfa:data><person><name>Al</name></person></xfa:data></xfa:datasets>"#;

fn xfa_document(with_datasets: bool) -> PdfBuilder {
    let xfa = if with_datasets {
        "[(preamble) 11 0 R (datasets) 12 0 R (postamble) 13 0 R]"
    } else {
        "[(preamble) 11 0 R (postamble) 13 0 R]"
    };
    let builder = form_document()
        .object(6, &format!("<< /Fields [4 0 R 8 0 R] /XFA {xfa} >>"))
        .stream(11, "", b"<xdp:xdp xmlns:xdp=\"http://ns.adobe.com/xdp/\">")
        .stream(13, "", b"</xdp:xdp>");
    if with_datasets {
        builder.stream(12, "", DATASETS.as_bytes())
    } else {
        builder
    }
}

fn saved(original: &[u8], request: &SaveRequest) -> Vec<u8> {
    let doc = PDFDocument::from_bytes(original.to_vec(), "").unwrap();
    assert!(doc.has_xfa().unwrap());
    doc.save(request).unwrap()
}

fn datasets_of(updated: Vec<u8>, objid: u32) -> String {
    let doc = PDFDocument::from_bytes(updated, "").unwrap();
    let obj = doc.fetch(PDFObjRef::new(objid, 0)).unwrap();
    let stream = doc.xref().materialize(obj.as_stream().unwrap()).unwrap();
    assert_eq!(stream.get("Type"), Some(&PDFObject::name("EmbeddedFile")));
    String::from_utf8(doc.xref().decode_stream(&stream).unwrap()).unwrap()
}

#[test]
fn test_text_edit_patches_datasets() {
    let original = xfa_document(true).build();
    let request = SaveRequest::new(storage_from_json(r#"{"7R": {"value": "Jo"}}"#).unwrap());
    let updated = saved(&original, &request);

    let tail = appended(&original, &updated);
    assert!(contains(tail, b"12 0 obj\n<< /Type /EmbeddedFile /Length "));
    assert!(contains(tail, b"xref\n6 2\n"));
    assert!(contains(tail, b"12 1\n"));

    let data = datasets_of(updated, 12);
    assert!(data.contains("<person><name>Jo</name></person>"));
    assert!(!data.contains("Al"));
}

#[test]
fn test_checkbox_edit_leaves_unrelated_nodes() {
    let original = xfa_document(true).build();
    let request = SaveRequest::new(storage_from_json(r#"{"4R": {"value": true}}"#).unwrap());
    let updated = saved(&original, &request);
    // No node is named "agree"; the packet is rewritten unchanged.
    let data = datasets_of(updated, 12);
    assert!(data.contains("<name>Al</name>"));
}

#[test]
fn test_pure_xfa_without_data_is_a_no_op() {
    let original = xfa_document(true).build();
    let mut request = SaveRequest::new(Default::default());
    request.is_pure_xfa = true;
    assert_eq!(saved(&original, &request), original);
}

#[test]
fn test_pure_xfa_replaces_datasets() {
    let original = xfa_document(true).build();
    let mut request = SaveRequest::new(Default::default());
    request.is_pure_xfa = true;
    request.xfa_data = Some(DATASETS.replace("Al", "Bo"));
    let updated = saved(&original, &request);
    assert!(contains(appended(&original, &updated), b"xref\n12 1\n"));
    assert!(datasets_of(updated, 12).contains("<name>Bo</name>"));
}

#[test]
fn test_missing_datasets_entry_is_spliced_in() {
    let original = xfa_document(false).build();
    let mut request = SaveRequest::new(Default::default());
    request.is_pure_xfa = true;
    request.xfa_data = Some(DATASETS.to_string());
    let updated = saved(&original, &request);

    let doc = PDFDocument::from_bytes(updated.clone(), "").unwrap();
    let form = doc.acro_form().unwrap().unwrap();
    // Objects end at 13, so the datasets get 14.
    assert_eq!(
        form.get("XFA"),
        Some(&PDFObject::Array(vec![
            PDFObject::String(b"preamble".to_vec()),
            PDFObject::Ref(PDFObjRef::new(11, 0)),
            PDFObject::String(b"datasets".to_vec()),
            PDFObject::Ref(PDFObjRef::new(14, 0)),
            PDFObject::String(b"postamble".to_vec()),
            PDFObject::Ref(PDFObjRef::new(13, 0)),
        ]))
    );
    assert!(datasets_of(updated, 14).contains("<name>Al</name>"));
}

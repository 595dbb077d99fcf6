use addendum_core::model::{PDFObjRef, PDFObject, PDFStream, dict_from};
use addendum_core::writer::{SaveRecord, XRefInfo, build_incremental_section, write_object};

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[test]
fn test_annotation_object() {
    let annotation = dict_from([
        ("Type", PDFObject::name("Annot")),
        ("Subtype", PDFObject::name("Ink")),
        (
            "Rect",
            PDFObject::Array(vec![
                PDFObject::Int(10),
                PDFObject::Real(100.25),
                PDFObject::Int(60),
                PDFObject::Int(150),
            ]),
        ),
        ("T", PDFObject::String(b"Ada (editor)".to_vec())),
        (
            "AP",
            PDFObject::Dict(dict_from([("N", PDFObject::Ref(PDFObjRef::new(11, 0)))])),
        ),
        ("Border", PDFObject::Array(vec![])),
    ]);
    let out = write_object(PDFObjRef::new(10, 0), &annotation.into(), None).unwrap();
    insta::assert_snapshot!(text(&out), @r"
    10 0 obj
    << /Type /Annot /Subtype /Ink /Rect [10 100.25 60 150] /T (Ada \(editor\)) /AP << /N 11 0 R>> /Border []>>
    endobj
    ");
}

#[test]
fn test_appearance_stream_object() {
    let attrs = dict_from([
        ("Type", PDFObject::name("XObject")),
        ("Subtype", PDFObject::name("Form")),
    ]);
    let stream = PDFStream::with_content(attrs, b"0 0 1 RG\n10 100 m\nS".to_vec());
    let out = write_object(PDFObjRef::new(11, 0), &stream.into(), None).unwrap();
    assert_eq!(
        text(&out),
        "11 0 obj\n<< /Type /XObject /Subtype /Form /Length 19>> stream\n0 0 1 RG\n10 100 m\nS\nendstream\nendobj\n"
    );
}

#[test]
fn test_stream_section_covers_itself() {
    let info = XRefInfo {
        root_ref: Some(PDFObjRef::new(1, 0)),
        new_ref: PDFObjRef::new(9, 0),
        previous_xref_offset: 700,
        ..XRefInfo::default()
    };
    let body = b"4 0 obj\ntrue\nendobj\n".to_vec();
    let records = vec![SaveRecord {
        objref: PDFObjRef::new(4, 0),
        bytes: Some(body.clone()),
    }];
    let out = build_incremental_section(1000, &records, &info, true).unwrap();
    let head = text(&out[..out.iter().position(|&b| b == b'\n').unwrap()]);
    assert_eq!(head, "9 0 obj");
    let out_text = text(&out);
    assert!(out_text.contains(
        "<< /Prev 700 /Size 10 /Type /XRef /Root 1 0 R /Index [4 1 9 1] /W [1 2 1] /Length 8>> stream\n"
    ));
    // Rows: object 4 at 1000, the stream itself right after the body.
    let end = 1000 + body.len();
    let start = out.windows(7).position(|w| w == b"stream\n").unwrap() + 7;
    let rows = &out[start..start + 8];
    assert_eq!(rows, &[1, 0x03, 0xe8, 0, 1, (end >> 8) as u8, end as u8, 0]);
    assert!(out_text.ends_with(&format!("startxref\n{end}\n%%EOF\n")));
}

#[test]
fn test_free_entry_only_section() {
    let info = XRefInfo {
        new_ref: PDFObjRef::new(6, 0),
        previous_xref_offset: 10,
        ..XRefInfo::default()
    };
    let records = vec![SaveRecord {
        objref: PDFObjRef::new(5, 0),
        bytes: None,
    }];
    let out = build_incremental_section(50, &records, &info, false).unwrap();
    assert_eq!(
        text(&out),
        "xref\n5 1\n0000000000 00001 f\r\ntrailer\n<< /Prev 10 /Size 6>>\nstartxref\n50\n%%EOF\n"
    );
}

//! Saving encrypted documents: new bodies are encrypted with the base
//! file's key, the file id keeps its first element.

mod common;

use addendum_core::annotations::storage_from_json;
use addendum_core::document::CipherTransformFactory;
use addendum_core::model::{PDFDict, PDFObjRef, PDFObject, PDFStream, dict_from};
use addendum_core::writer::write_object;
use addendum_core::{PDFDocument, SaveRequest};
use common::{FILE_ID, appended, contains, form_document};

const OWNER: &str = "01a9f0cef28d00f8dfb0258f5ef0c55c9df7c816958f363100af77ec02262454";
const USER: &str = "694b9da2f809c77c72778cfbcac20481b27205d0e7d3226236828364666a9708";

fn file_id() -> Vec<u8> {
    hex::decode(FILE_ID.trim_matches(['<', '>'])).unwrap()
}

fn encrypt_dict() -> PDFDict {
    dict_from([
        ("Filter", PDFObject::name("Standard")),
        ("V", PDFObject::Int(1)),
        ("R", PDFObject::Int(2)),
        ("Length", PDFObject::Int(40)),
        ("P", PDFObject::Int(-4)),
        ("O", PDFObject::String(hex::decode(OWNER).unwrap())),
        ("U", PDFObject::String(hex::decode(USER).unwrap())),
    ])
}

fn factory(password: &str) -> addendum_core::Result<CipherTransformFactory> {
    CipherTransformFactory::from_encrypt_dict(&encrypt_dict(), &[file_id(), file_id()], password)
}

/// `text` encrypted for object `objid`, as a hex string literal.
fn secret(objid: u32, text: &str) -> String {
    let mut transform = factory("foo").unwrap().create_cipher_transform(objid, 0);
    format!("<{}>", hex::encode(transform.encrypt_string(text.as_bytes()).unwrap()))
}

fn encrypted_form() -> Vec<u8> {
    form_document()
        .object(
            4,
            &format!(
                "<< /Type /Annot /Subtype /Widget /FT /Btn /T {} /Rect [10 10 20 20] /F 4 \
                 /V /Off /AS /Off /P 3 0 R /AP << /N << /Yes 5 0 R /Off 5 0 R >> >> >>",
                secret(4, "agree")
            ),
        )
        .object(
            7,
            &format!(
                "<< /Type /Annot /Subtype /Widget /FT /Tx /T {} /Parent 8 0 R \
                 /Rect [10 50 110 70] /V {} >>",
                secret(7, "name"),
                secret(7, "Al")
            ),
        )
        .object(8, &format!("<< /T {} /Kids [7 0 R] >>", secret(8, "person")))
        .object(9, &format!("<< /Title {} >>", secret(9, "Forms")))
        .object(
            10,
            &format!(
                "<< /Filter /Standard /V 1 /R 2 /Length 40 /P -4 /O <{OWNER}> /U <{USER}> >>"
            ),
        )
        .trailer(&format!(
            "/Root 1 0 R /Info 9 0 R /Encrypt 10 0 R /ID [{FILE_ID} {FILE_ID}]"
        ))
        .build()
}

#[test]
fn test_password_is_checked() {
    assert!(factory("foo").is_ok());
    assert!(factory("bar").is_err());
    assert!(PDFDocument::from_bytes(encrypted_form(), "bar").is_err());
}

#[test]
fn test_strings_are_decrypted_on_read() {
    let doc = PDFDocument::from_bytes(encrypted_form(), "foo").unwrap();
    let widget = doc.fetch(PDFObjRef::new(7, 0)).unwrap();
    assert_eq!(widget.get("V"), Some(&PDFObject::String(b"Al".to_vec())));
    assert_eq!(doc.xref().encrypt_ref(), Some(PDFObjRef::new(10, 0)));
}

#[test]
fn test_saved_strings_are_encrypted() {
    let original = encrypted_form();
    let doc = PDFDocument::from_bytes(original.clone(), "foo").unwrap();
    let request = SaveRequest::new(storage_from_json(r#"{"7R": {"value": "Hello world"}}"#).unwrap());
    let updated = doc.save(&request).unwrap();

    let tail = appended(&original, &updated);
    assert!(!contains(tail, b"Hello world"));
    assert!(contains(tail, b"/Encrypt 10 0 R"));

    let doc = PDFDocument::from_bytes(updated, "foo").unwrap();
    let widget = doc.fetch(PDFObjRef::new(7, 0)).unwrap();
    assert_eq!(
        widget.get("V"),
        Some(&PDFObject::String(b"Hello world".to_vec()))
    );
    assert_eq!(widget.get("T"), Some(&PDFObject::String(b"name".to_vec())));
    let ids = doc.xref().file_ids();
    assert_eq!(ids[0], file_id());
    assert_ne!(ids[1], file_id());
}

#[test]
fn test_stream_bodies_are_encrypted() {
    let factory = factory("foo").unwrap();
    let plain = b"0 0 m 10 10 l S".to_vec();
    let stream = PDFStream::with_content(PDFDict::new(), plain.clone());
    let out = write_object(PDFObjRef::new(12, 0), &stream.into(), Some(&factory)).unwrap();

    let start = out.windows(7).position(|w| w == b"stream\n").unwrap() + 7;
    let end = out.len() - "\nendstream\nendobj\n".len();
    let body = &out[start..end];
    assert_eq!(body.len(), plain.len());
    assert_ne!(body, plain.as_slice());
    let decrypted = factory
        .create_cipher_transform(12, 0)
        .decrypt_stream(&PDFDict::new(), body)
        .unwrap();
    assert_eq!(decrypted, plain);
}

//! Small PDF files built in memory for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

/// Objects plus trailer entries, rendered with a classic xref table or an
/// xref stream.
#[derive(Default, Clone)]
pub struct PdfBuilder {
    objects: BTreeMap<u32, Vec<u8>>,
    trailer: String,
    spacing: usize,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(mut self, num: u32, body: &str) -> Self {
        self.objects.insert(num, body.as_bytes().to_vec());
        self
    }

    /// A stream object with the right `/Length`.
    pub fn stream(mut self, num: u32, dict: &str, data: &[u8]) -> Self {
        let mut body = format!("<< {dict} /Length {} >>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.objects.insert(num, body);
        self
    }

    /// Extra trailer entries, e.g. `/Root 1 0 R`.
    pub fn trailer(mut self, entries: &str) -> Self {
        self.trailer = entries.to_string();
        self
    }

    /// A comment line of `bytes` bytes after every object, so that objects
    /// land in different chunks.
    pub fn spaced(mut self, bytes: usize) -> Self {
        self.spacing = bytes;
        self
    }

    fn size(&self) -> u32 {
        self.objects.keys().max().map_or(1, |m| m + 1)
    }

    fn bodies(&self) -> (Vec<u8>, BTreeMap<u32, usize>) {
        let mut out = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = BTreeMap::new();
        for (num, body) in &self.objects {
            offsets.insert(*num, out.len());
            out.extend_from_slice(format!("{num} 0 obj\n").as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
            if self.spacing > 1 {
                out.push(b'%');
                out.extend(std::iter::repeat_n(b'-', self.spacing - 2));
                out.push(b'\n');
            }
        }
        (out, offsets)
    }

    /// The file with a classic `xref` table.
    pub fn build(&self) -> Vec<u8> {
        let (mut out, offsets) = self.bodies();
        let size = self.size();
        let start = out.len();
        out.extend_from_slice(format!("xref\n0 {size}\n").as_bytes());
        for num in 0..size {
            let entry = match offsets.get(&num) {
                Some(offset) => format!("{offset:010} 00000 n\r\n"),
                None => "0000000000 65535 f\r\n".to_string(),
            };
            out.extend_from_slice(entry.as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {size} {} >>\nstartxref\n{start}\n%%EOF\n",
                self.trailer
            )
            .as_bytes(),
        );
        out
    }

    /// The file with an uncompressed `/XRef` stream as its last object.
    pub fn build_xref_stream(&self) -> Vec<u8> {
        let (mut out, offsets) = self.bodies();
        let xref_num = self.size();
        let size = xref_num + 1;
        let start = out.len();
        let mut rows = Vec::new();
        for num in 0..size {
            match offsets.get(&num) {
                Some(offset) => {
                    rows.push(1u8);
                    rows.extend_from_slice(&(*offset as u32).to_be_bytes());
                    rows.extend_from_slice(&[0, 0]);
                }
                None if num == xref_num => {
                    rows.push(1u8);
                    rows.extend_from_slice(&(start as u32).to_be_bytes());
                    rows.extend_from_slice(&[0, 0]);
                }
                None => rows.extend_from_slice(&[0, 0, 0, 0, 0, 0xff, 0xff]),
            }
        }
        out.extend_from_slice(
            format!(
                "{xref_num} 0 obj\n<< /Type /XRef /Size {size} /W [1 4 2] {} /Length {} >>\nstream\n",
                self.trailer,
                rows.len()
            )
            .as_bytes(),
        );
        out.extend_from_slice(&rows);
        out.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{start}\n%%EOF\n").as_bytes());
        out
    }
}

pub const FILE_ID: &str = "<651a94feeb7868d312a97b377270860e>";

/// One page with a checkbox (4) and a text field (7) under a parent (8).
pub fn form_document() -> PdfBuilder {
    PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R /AcroForm 6 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(
            3,
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 200] /Annots [4 0 R 7 0 R] >>",
        )
        .object(
            4,
            "<< /Type /Annot /Subtype /Widget /FT /Btn /T (agree) /Rect [10 10 20 20] /F 4 \
             /V /Off /AS /Off /P 3 0 R /AP << /N << /Yes 5 0 R /Off 5 0 R >> >> >>",
        )
        .stream(5, "/Type /XObject /Subtype /Form /BBox [0 0 10 10]", b"0 g")
        .object(6, "<< /Fields [4 0 R 8 0 R] >>")
        .object(
            7,
            "<< /Type /Annot /Subtype /Widget /FT /Tx /T (name) /Parent 8 0 R \
             /Rect [10 50 110 70] /V (Al) >>",
        )
        .object(8, "<< /T (person) /Kids [7 0 R] >>")
        .object(9, "<< /Title (Forms) /Producer (builder) >>")
        .trailer(&format!("/Root 1 0 R /Info 9 0 R /ID [{FILE_ID} {FILE_ID}]"))
}

/// Value of the last `startxref` in `data`.
pub fn startxref(data: &[u8]) -> usize {
    let text = String::from_utf8_lossy(data);
    let at = text.rfind("startxref").expect("startxref");
    text[at + "startxref".len()..]
        .split_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .expect("startxref offset")
}

/// Everything appended to `original`.
pub fn appended<'a>(original: &[u8], updated: &'a [u8]) -> &'a [u8] {
    assert!(updated.starts_with(original), "original bytes must be kept");
    &updated[original.len()..]
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

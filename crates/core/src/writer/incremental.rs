//! Incremental update assembly: new object bodies, cross-reference section, trailer.
//!
//! The section mirrors the kind the base file used last: a classic `xref`
//! table with a `trailer` dictionary, or an `/XRef` stream whose dictionary
//! doubles as the trailer.

use super::xfa::{FormValue, write_xfa_data_for_acroform};
use super::{write_dict, write_object};
use crate::document::XRef;
use crate::error::Result;
use crate::model::{PDFDict, PDFObjRef, PDFObject, PDFStream, RefSetCache};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Instruction to patch the XFA datasets at `path`.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPatch {
    pub path: String,
    pub value: FormValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeData {
    /// An object to serialize.
    Object(PDFObject),
    /// Bytes already rendered as `"N G obj ... endobj\n"`.
    Serialized(Vec<u8>),
    /// The object is removed; it gets a free entry.
    Deleted,
}

/// One pending modification of a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub data: ChangeData,
    pub form_patch: Option<FormPatch>,
    pub need_appearances: bool,
}

impl Change {
    pub fn object(obj: impl Into<PDFObject>) -> Self {
        Self {
            data: ChangeData::Object(obj.into()),
            form_patch: None,
            need_appearances: false,
        }
    }

    pub const fn serialized(bytes: Vec<u8>) -> Self {
        Self {
            data: ChangeData::Serialized(bytes),
            form_patch: None,
            need_appearances: false,
        }
    }

    pub const fn deleted() -> Self {
        Self {
            data: ChangeData::Deleted,
            form_patch: None,
            need_appearances: false,
        }
    }

    pub fn with_form_patch(mut self, patch: FormPatch) -> Self {
        self.form_patch = Some(patch);
        self
    }

    pub const fn with_need_appearances(mut self, need: bool) -> Self {
        self.need_appearances = need;
        self
    }
}

/// Every change of one save, keyed by reference.
pub type ChangeSet = RefSetCache<Change>;

/// A reference and its serialized body; `None` frees the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRecord {
    pub objref: PDFObjRef,
    pub bytes: Option<Vec<u8>>,
}

impl SaveRecord {
    fn len(&self) -> usize {
        self.bytes.as_ref().map_or(0, Vec::len)
    }
}

/// What the new trailer needs to know about the base file.
#[derive(Debug, Clone, Default)]
pub struct XRefInfo {
    pub root_ref: Option<PDFObjRef>,
    pub encrypt_ref: Option<PDFObjRef>,
    /// Reference of the xref stream, and `Size` of the table.
    pub new_ref: PDFObjRef,
    pub info_ref: Option<PDFObjRef>,
    /// String values of the `/Info` dictionary, decoded.
    pub info: Vec<String>,
    pub file_ids: Vec<Vec<u8>>,
    pub previous_xref_offset: usize,
    pub filename: String,
    /// Seconds since the epoch, hashed into the new file id.
    pub timestamp: i64,
}

/// Flat `[start, count, start, count, ...]` list of maximal runs of
/// consecutive object numbers. `objids` must be sorted.
pub fn compute_indexes(objids: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut indexes: Vec<u32> = Vec::new();
    for objid in objids {
        let n = indexes.len();
        if n >= 2 && indexes[n - 2] + indexes[n - 1] == objid {
            indexes[n - 1] += 1;
        } else {
            indexes.extend([objid, 1]);
        }
    }
    indexes
}

/// Second `/ID` element: md5 over the timestamp, filename, file size and
/// the `/Info` strings (each char truncated to a byte).
fn compute_md5(file_size: usize, info: &XRefInfo) -> [u8; 16] {
    let mut buf: Vec<u8> = Vec::new();
    buf.extend_from_slice(info.timestamp.to_string().as_bytes());
    buf.extend(info.filename.chars().map(|c| c as u32 as u8));
    buf.extend_from_slice(file_size.to_string().as_bytes());
    for value in &info.info {
        buf.extend(value.chars().map(|c| c as u32 as u8));
    }
    md5::compute(&buf).0
}

fn compute_ids(file_size: usize, info: &XRefInfo, trailer: &mut PDFDict) {
    let Some(first) = info.file_ids.first() else {
        return;
    };
    let md5 = compute_md5(file_size, info);
    trailer.insert(
        "ID".into(),
        PDFObject::Array(vec![
            PDFObject::String(first.clone()),
            PDFObject::String(md5.to_vec()),
        ]),
    );
}

fn trailer_dict(info: &XRefInfo, use_stream: bool) -> PDFDict {
    let mut trailer = PDFDict::new();
    trailer.insert(
        "Prev".into(),
        PDFObject::Int(info.previous_xref_offset as i64),
    );
    if use_stream {
        trailer.insert("Size".into(), PDFObject::Int(info.new_ref.objid as i64 + 1));
        trailer.insert("Type".into(), PDFObject::name("XRef"));
    } else {
        trailer.insert("Size".into(), PDFObject::Int(info.new_ref.objid as i64));
    }
    for (key, value) in [
        ("Root", info.root_ref),
        ("Info", info.info_ref),
        ("Encrypt", info.encrypt_ref),
    ] {
        if let Some(r) = value {
            trailer.insert(key.into(), PDFObject::Ref(r));
        }
    }
    trailer
}

/// Bytes needed to store `value` big-endian, at least one.
fn size_in_bytes(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

/// Render the cross-reference section for `records` (sorted by object
/// number) whose bodies start at `base_offset`.
pub fn build_incremental_section(
    base_offset: usize,
    records: &[SaveRecord],
    info: &XRefInfo,
    use_stream: bool,
) -> Result<Vec<u8>> {
    if use_stream {
        xref_stream_section(base_offset, records, info)
    } else {
        xref_table_section(base_offset, records, info)
    }
}

fn xref_table_section(
    mut offset: usize,
    records: &[SaveRecord],
    info: &XRefInfo,
) -> Result<Vec<u8>> {
    let mut out = String::from("xref\n");
    let indexes = compute_indexes(records.iter().map(|r| r.objref.objid));
    let mut runs = indexes.chunks_exact(2).peekable();
    for record in records {
        if let Some(run) = runs.peek()
            && run[0] == record.objref.objid
        {
            out.push_str(&format!("{} {}\n", run[0], run[1]));
            runs.next();
        }
        if record.bytes.is_some() {
            let genno = record.objref.genno.min(0xffff);
            out.push_str(&format!("{offset:010} {genno:05} n\r\n"));
            offset += record.len();
        } else {
            let genno = (record.objref.genno + 1).min(0xffff);
            out.push_str(&format!("0000000000 {genno:05} f\r\n"));
        }
    }

    let mut trailer = trailer_dict(info, false);
    compute_ids(offset, info, &mut trailer);
    let mut out = out.into_bytes();
    out.extend_from_slice(b"trailer\n");
    out.extend_from_slice(&write_dict(&trailer)?);
    out.extend_from_slice(format!("\nstartxref\n{offset}\n%%EOF\n").as_bytes());
    Ok(out)
}

fn xref_stream_section(
    base_offset: usize,
    records: &[SaveRecord],
    info: &XRefInfo,
) -> Result<Vec<u8>> {
    // The stream itself is written after every body.
    let end = base_offset + records.iter().map(SaveRecord::len).sum::<usize>();
    let mut records: Vec<SaveRecord> = records
        .iter()
        .filter(|r| r.objref != info.new_ref)
        .cloned()
        .collect();
    records.push(SaveRecord {
        objref: info.new_ref,
        bytes: Some(Vec::new()),
    });
    records.sort_by_key(|r| r.objref);

    let mut cursor = base_offset;
    let mut rows = Vec::with_capacity(records.len());
    let (mut max_offset, mut max_gen) = (end as u64, 0u64);
    for record in &records {
        let row = if record.objref == info.new_ref {
            (1u8, end as u64, record.objref.genno.min(0xffff) as u64)
        } else if record.bytes.is_some() {
            let row = (1u8, cursor as u64, record.objref.genno.min(0xffff) as u64);
            cursor += record.len();
            row
        } else {
            (0u8, 0, (record.objref.genno as u64 + 1).min(0xffff))
        };
        max_offset = max_offset.max(row.1);
        max_gen = max_gen.max(row.2);
        rows.push(row);
    }
    let widths = [1, size_in_bytes(max_offset), size_in_bytes(max_gen)];
    let mut dict = trailer_dict(info, true);
    let indexes = compute_indexes(records.iter().map(|r| r.objref.objid));
    dict.insert(
        "Index".into(),
        PDFObject::Array(indexes.into_iter().map(|i| PDFObject::Int(i as i64)).collect()),
    );
    dict.insert(
        "W".into(),
        PDFObject::Array(widths.iter().map(|&w| PDFObject::Int(w as i64)).collect()),
    );
    compute_ids(end, info, &mut dict);

    let mut data = Vec::with_capacity(rows.len() * widths.iter().sum::<usize>());
    for (kind, field2, field3) in rows {
        data.push(kind);
        data.extend_from_slice(&field2.to_be_bytes()[8 - widths[1]..]);
        data.extend_from_slice(&field3.to_be_bytes()[8 - widths[2]..]);
    }

    let stream = PDFStream::with_content(dict, data);
    let mut out = write_object(info.new_ref, &stream.into(), None)?;
    out.extend_from_slice(format!("startxref\n{end}\n%%EOF\n").as_bytes());
    Ok(out)
}

/// Everything one incremental update is built from.
pub struct IncrementalUpdate<'a> {
    pub original: &'a [u8],
    pub xref_info: XRefInfo,
    pub changes: ChangeSet,
    pub xref: &'a XRef,
    pub has_xfa: bool,
    pub xfa_datasets_ref: Option<PDFObjRef>,
    pub has_xfa_datasets_entry: bool,
    pub need_appearances: bool,
    pub acro_form_ref: Option<PDFObjRef>,
    pub acro_form: Option<PDFDict>,
    /// Serialized datasets supplied by the caller (pure XFA documents).
    pub xfa_data: Option<Vec<u8>>,
    pub use_xref_stream: bool,
}

/// Original bytes followed by the new bodies and the cross-reference section.
pub fn incremental_update(update: IncrementalUpdate<'_>) -> Result<Vec<u8>> {
    let IncrementalUpdate {
        original,
        xref_info,
        mut changes,
        xref,
        mut has_xfa,
        xfa_datasets_ref,
        has_xfa_datasets_entry,
        need_appearances,
        acro_form_ref,
        acro_form,
        xfa_data,
        use_xref_stream,
    } = update;

    let datasets = if has_xfa {
        xfa_datasets(xfa_data, xfa_datasets_ref, &changes, xref)
    } else {
        None
    };
    if has_xfa && datasets.is_none() {
        has_xfa = false;
    }

    update_acro_form(
        &mut changes,
        acro_form.as_ref(),
        acro_form_ref,
        has_xfa,
        has_xfa_datasets_entry,
        xfa_datasets_ref,
        need_appearances,
    );
    if let (Some(data), Some(datasets_ref)) = (datasets, xfa_datasets_ref) {
        update_xfa(data, datasets_ref, &mut changes, xref)?;
    }

    let records = write_changes(&changes, xref)?;

    let mut out = Vec::with_capacity(original.len() + records.iter().map(SaveRecord::len).sum::<usize>());
    out.extend_from_slice(original);
    if !matches!(original.last(), None | Some(b'\n' | b'\r')) {
        // Keep %%EOF and the first new object on separate lines.
        out.push(b'\n');
    }
    let base_offset = out.len();
    for record in &records {
        if let Some(bytes) = &record.bytes {
            out.extend_from_slice(bytes);
        }
    }
    out.extend_from_slice(&build_incremental_section(
        base_offset,
        &records,
        &xref_info,
        use_xref_stream,
    )?);
    debug!(
        objects = records.len(),
        stream = use_xref_stream,
        size = out.len(),
        "incremental update assembled"
    );
    Ok(out)
}

/// Serialize every change; records come back sorted by object number.
fn write_changes(changes: &ChangeSet, xref: &XRef) -> Result<Vec<SaveRecord>> {
    let entries: Vec<_> = changes.iter().collect();
    let mut records = entries
        .par_iter()
        .map(|&(objref, change)| {
            let bytes = match &change.data {
                ChangeData::Object(obj) => Some(write_object(*objref, obj, xref.cipher())?),
                ChangeData::Serialized(bytes) => Some(bytes.clone()),
                ChangeData::Deleted => None,
            };
            Ok(SaveRecord {
                objref: *objref,
                bytes,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    records.sort_by_key(|r| r.objref);
    Ok(records)
}

fn update_acro_form(
    changes: &mut ChangeSet,
    acro_form: Option<&PDFDict>,
    acro_form_ref: Option<PDFObjRef>,
    has_xfa: bool,
    has_xfa_datasets_entry: bool,
    xfa_datasets_ref: Option<PDFObjRef>,
    need_appearances: bool,
) {
    let splice_datasets = has_xfa && !has_xfa_datasets_entry && xfa_datasets_ref.is_some();
    if !need_appearances && !splice_datasets {
        return;
    }
    let (Some(acro_form), Some(acro_form_ref)) = (acro_form, acro_form_ref) else {
        warn!("AcroForm is not an indirect object, leaving it untouched");
        return;
    };

    let mut dict = acro_form.clone();
    if splice_datasets
        && let (Some(PDFObject::Array(xfa)), Some(datasets_ref)) = (acro_form.get("XFA"), xfa_datasets_ref)
    {
        let mut xfa = xfa.clone();
        let at = xfa.len().min(2);
        xfa.splice(
            at..at,
            [
                PDFObject::String(b"datasets".to_vec()),
                PDFObject::Ref(datasets_ref),
            ],
        );
        dict.insert("XFA".into(), PDFObject::Array(xfa));
    }
    if need_appearances {
        dict.insert("NeedAppearances".into(), PDFObject::Bool(true));
    }
    changes.put(acro_form_ref, Change::object(dict));
}

/// The datasets packet to write: the caller's, or the current one patched.
fn xfa_datasets(
    xfa_data: Option<Vec<u8>>,
    datasets_ref: Option<PDFObjRef>,
    changes: &ChangeSet,
    xref: &XRef,
) -> Option<Vec<u8>> {
    let Some(datasets_ref) = datasets_ref else {
        warn!("XFA - cannot save it");
        return None;
    };
    if xfa_data.is_some() {
        return xfa_data;
    }
    let current = xref
        .fetch(datasets_ref)
        .and_then(|obj| xref.decode_stream(&xref.materialize(obj.as_stream()?)?));
    let current = match current {
        Ok(current) => current,
        Err(e) => {
            warn!(%datasets_ref, error = %e, "XFA datasets unreadable, skipping form patches");
            return None;
        }
    };
    match write_xfa_data_for_acroform(&String::from_utf8_lossy(&current), changes) {
        Ok(patched) => Some(patched.into_bytes()),
        Err(e) => {
            warn!(error = %e, "XFA datasets could not be patched");
            None
        }
    }
}

fn update_xfa(
    data: Vec<u8>,
    datasets_ref: PDFObjRef,
    changes: &mut ChangeSet,
    xref: &XRef,
) -> Result<()> {
    let mut attrs = PDFDict::new();
    attrs.insert("Type".into(), PDFObject::name("EmbeddedFile"));
    let data = match xref.cipher() {
        Some(cipher) => cipher
            .create_cipher_transform(datasets_ref.objid, datasets_ref.genno)
            .encrypt_stream(&attrs, &data)?,
        None => data,
    };
    let mut bytes = format!(
        "{} {} obj\n<< /Type /EmbeddedFile /Length {}>>\nstream\n",
        datasets_ref.objid,
        datasets_ref.genno,
        data.len()
    )
    .into_bytes();
    bytes.extend_from_slice(&data);
    bytes.extend_from_slice(b"\nendstream\nendobj\n");
    changes.put(datasets_ref, Change::serialized(bytes));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(objid: u32, body: &str) -> SaveRecord {
        SaveRecord {
            objref: PDFObjRef::new(objid, 0),
            bytes: Some(body.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_compute_indexes_runs() {
        assert_eq!(compute_indexes([3, 4, 5, 9, 11, 12]), vec![3, 3, 9, 1, 11, 2]);
        assert!(compute_indexes([]).is_empty());
    }

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(size_in_bytes(0), 1);
        assert_eq!(size_in_bytes(255), 1);
        assert_eq!(size_in_bytes(256), 2);
        assert_eq!(size_in_bytes(70_000), 3);
    }

    #[test]
    fn test_table_section_layout() {
        let info = XRefInfo {
            root_ref: Some(PDFObjRef::new(1, 0)),
            new_ref: PDFObjRef::new(8, 0),
            previous_xref_offset: 400,
            ..XRefInfo::default()
        };
        let records = vec![
            record(3, "3 0 obj\n1\nendobj\n"),
            SaveRecord {
                objref: PDFObjRef::new(4, 2),
                bytes: None,
            },
            record(7, "7 0 obj\n2\nendobj\n"),
        ];
        let out = build_incremental_section(500, &records, &info, false).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "xref\n3 2\n0000000500 00000 n\r\n0000000000 00003 f\r\n7 1\n0000000517 00000 n\r\n\
             trailer\n<< /Prev 400 /Size 8 /Root 1 0 R>>\nstartxref\n534\n%%EOF\n"
        );
    }

    #[test]
    fn test_id_keeps_first_element() {
        let info = XRefInfo {
            new_ref: PDFObjRef::new(2, 0),
            file_ids: vec![b"orig".to_vec(), b"orig".to_vec()],
            filename: "a.pdf".into(),
            timestamp: 1_700_000_000,
            ..XRefInfo::default()
        };
        let mut trailer = PDFDict::new();
        compute_ids(100, &info, &mut trailer);
        let ids = trailer["ID"].as_array().unwrap();
        assert_eq!(ids[0], PDFObject::String(b"orig".to_vec()));
        assert_eq!(ids[1].as_string().unwrap().len(), 16);
        assert_ne!(ids[1], ids[0]);
    }
}

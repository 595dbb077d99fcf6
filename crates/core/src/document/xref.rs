//! Cross-reference chain and object resolution over a possibly partial file.
//!
//! Every read goes through the [`ChunkedStream`], so any lookup can fail with
//! [`PdfError::MissingData`]. Objects are parsed from a window that grows
//! until the object is complete; stream bodies that are not resident yet
//! come back as [`StreamBody::Pending`] instead of forcing a load.

use super::security::{CipherTransform, CipherTransformFactory};
use super::stream::ChunkedStream;
use crate::codec::{PredictorParams, apply_png_predictor, inflate};
use crate::error::{PdfError, Result};
use crate::model::{PDFDict, PDFObjRef, PDFObject, PDFStream, StreamBody};
use crate::parser::PDFParser;
use crate::parser::lexer::is_whitespace;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;
const INITIAL_WINDOW: usize = 1024;
const XREF_TABLE_WINDOW: usize = 16 * 1024;
const STARTXREF_SEARCH: usize = 1024;

/// Location of an object, as recorded by the newest section naming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    Free { genno: u32 },
    Uncompressed { offset: usize, genno: u32 },
    Compressed { stream_objid: u32, index: usize },
}

impl XRefEntry {
    pub const fn genno(&self) -> u32 {
        match self {
            Self::Free { genno } | Self::Uncompressed { genno, .. } => *genno,
            Self::Compressed { .. } => 0,
        }
    }
}

struct Section {
    entries: Vec<(u32, XRefEntry)>,
    trailer: PDFDict,
    is_stream: bool,
}

struct ObjectCache {
    capacity: usize,
    map: IndexMap<PDFObjRef, Arc<PDFObject>>,
}

impl ObjectCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: IndexMap::new(),
        }
    }

    fn get(&mut self, r: PDFObjRef) -> Option<Arc<PDFObject>> {
        if self.capacity == 0 {
            return None;
        }
        let index = self.map.get_index_of(&r)?;
        let value = Arc::clone(self.map.get_index(index)?.1);
        if index + 1 != self.map.len() {
            self.map.move_index(index, self.map.len() - 1);
        }
        Some(value)
    }

    fn insert(&mut self, r: PDFObjRef, value: Arc<PDFObject>) {
        if self.capacity == 0 {
            return;
        }
        self.map.shift_remove(&r);
        self.map.insert(r, value);
        if self.map.len() > self.capacity {
            self.map.shift_remove_index(0);
        }
    }
}

/// Decoded object stream: bytes plus `(objid, offset)` per member.
struct ObjectStream {
    data: Vec<u8>,
    members: Vec<(u32, usize)>,
}

/// Cross-reference resolver for one base file.
pub struct XRef {
    stream: Arc<ChunkedStream>,
    entries: HashMap<u32, XRefEntry>,
    trailer: PDFDict,
    start_xref: usize,
    top_dict_is_stream: bool,
    first_xref_stm_pos: Option<usize>,
    /// Sorted offsets where objects or sections begin; bounds object windows.
    boundaries: Vec<usize>,
    encrypt_ref: Option<PDFObjRef>,
    cipher: Option<CipherTransformFactory>,
    cache: Mutex<ObjectCache>,
    object_streams: Mutex<HashMap<u32, Arc<ObjectStream>>>,
    temp_ref_start: u32,
}

thread_local! {
    static RESOLVING: RefCell<HashSet<PDFObjRef>> = RefCell::new(HashSet::new());
}

struct ResolvingGuard(PDFObjRef);

impl ResolvingGuard {
    fn enter(r: PDFObjRef) -> Result<Self> {
        let fresh = RESOLVING.with(|set| set.borrow_mut().insert(r));
        if !fresh {
            return Err(PdfError::SyntaxError(format!("circular reference to {r}")));
        }
        Ok(Self(r))
    }
}

impl Drop for ResolvingGuard {
    fn drop(&mut self) {
        RESOLVING.with(|set| {
            set.borrow_mut().remove(&self.0);
        });
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl XRef {
    /// Read the cross-reference chain starting at the last `startxref`.
    pub fn parse(stream: Arc<ChunkedStream>) -> Result<Self> {
        Self::parse_with_cache(stream, DEFAULT_CACHE_CAPACITY)
    }

    pub fn parse_with_cache(stream: Arc<ChunkedStream>, cache_capacity: usize) -> Result<Self> {
        let mut xref = Self {
            stream,
            entries: HashMap::new(),
            trailer: PDFDict::new(),
            start_xref: 0,
            top_dict_is_stream: false,
            first_xref_stm_pos: None,
            boundaries: Vec::new(),
            encrypt_ref: None,
            cipher: None,
            cache: Mutex::new(ObjectCache::new(cache_capacity)),
            object_streams: Mutex::new(HashMap::new()),
            temp_ref_start: 1,
        };
        xref.start_xref = xref.find_startxref()?;
        xref.read_sections()?;

        let size = xref
            .trailer
            .get("Size")
            .and_then(|s| s.as_int().ok())
            .unwrap_or(0)
            .max(0) as u32;
        let past_max = xref.entries.keys().max().map_or(0, |m| m + 1);
        xref.temp_ref_start = size.max(past_max).max(1);
        xref.encrypt_ref = xref
            .trailer
            .get("Encrypt")
            .and_then(|e| e.as_ref().ok())
            .copied();
        Ok(xref)
    }

    /// Authenticate against the trailer's `/Encrypt`, if there is one.
    pub fn set_encryption(&mut self, password: &str) -> Result<()> {
        let Some(encrypt) = self.trailer.get("Encrypt").cloned() else {
            return Ok(());
        };
        let encrypt = self.resolve(&encrypt)?;
        let encrypt = encrypt.as_dict()?;
        let ids = self.file_ids();
        self.cipher = Some(CipherTransformFactory::from_encrypt_dict(
            encrypt, &ids, password,
        )?);
        Ok(())
    }

    fn find_startxref(&self) -> Result<usize> {
        let len = self.stream.len();
        let begin = len.saturating_sub(STARTXREF_SEARCH);
        let tail = self.stream.get_range(begin, len)?;
        let needle = b"startxref";
        let found = tail
            .windows(needle.len())
            .rposition(|w| w == needle)
            .ok_or(PdfError::NoValidXRef)?;
        let mut parser = PDFParser::new(&tail[found + needle.len()..]);
        let pos = parser.parse_integer().map_err(|_| PdfError::NoValidXRef)?;
        usize::try_from(pos).map_err(|_| PdfError::NoValidXRef)
    }

    fn read_sections(&mut self) -> Result<()> {
        let mut queue = VecDeque::from([self.start_xref]);
        let mut visited = HashSet::new();
        let mut first = true;
        let len = self.stream.len();

        while let Some(pos) = queue.pop_front() {
            if !visited.insert(pos) {
                continue;
            }
            if pos >= len {
                warn!(pos, "xref offset beyond end of file");
                continue;
            }
            let section = match self.read_section(pos) {
                Ok(section) => section,
                Err(e) if e.is_missing_data() || first => {
                    return Err(if e.is_missing_data() {
                        e
                    } else {
                        debug!(pos, error = %e, "unreadable newest xref section");
                        PdfError::NoValidXRef
                    });
                }
                Err(e) => {
                    warn!(pos, error = %e, "skipping unreadable xref section");
                    continue;
                }
            };
            self.boundaries.push(pos);

            if first {
                self.top_dict_is_stream = section.is_stream;
                self.trailer = section.trailer.clone();
            } else {
                for key in ["Root", "Info", "Encrypt", "ID"] {
                    if !self.trailer.contains_key(key)
                        && let Some(value) = section.trailer.get(key)
                    {
                        self.trailer.insert(key.to_string(), value.clone());
                    }
                }
            }

            for (objid, entry) in section.entries {
                if let XRefEntry::Uncompressed { offset, .. } = entry {
                    self.boundaries.push(offset);
                }
                self.entries.entry(objid).or_insert(entry);
            }

            if !section.is_stream
                && let Some(stm) = section.trailer.get("XRefStm").and_then(|p| p.as_int().ok())
                && stm >= 0
            {
                self.first_xref_stm_pos.get_or_insert(stm as usize);
                queue.push_back(stm as usize);
            }
            if let Some(prev) = section.trailer.get("Prev").and_then(|p| p.as_int().ok())
                && prev >= 0
            {
                queue.push_back(prev as usize);
            }
            first = false;
        }

        self.boundaries.push(len);
        self.boundaries.sort_unstable();
        self.boundaries.dedup();
        debug!(
            sections = visited.len(),
            objects = self.entries.len(),
            "read cross-reference chain"
        );
        Ok(())
    }

    fn read_section(&self, pos: usize) -> Result<Section> {
        let probe_end = (pos + 16).min(self.stream.len());
        let probe = self.stream.get_range(pos, probe_end)?;
        let start = probe.iter().position(|&b| !is_whitespace(b)).unwrap_or(0);
        if probe[start..].starts_with(b"xref") {
            self.read_table(pos)
        } else {
            self.read_xref_stream(pos)
        }
    }

    fn read_table(&self, pos: usize) -> Result<Section> {
        let len = self.stream.len();
        let mut window = XREF_TABLE_WINDOW;
        loop {
            let end = (pos + window).min(len);
            let data = self.stream.get_range(pos, end)?;
            match parse_xref_table(&data) {
                Err(_) if end < len => window *= 4,
                other => return other,
            }
        }
    }

    fn read_xref_stream(&self, pos: usize) -> Result<Section> {
        let obj = self.parse_object_at(pos, None, self.stream.len())?;
        let stream = obj.as_stream()?;
        let stream = self.materialize(stream)?;
        let data = self.decode_stream(&stream)?;

        let widths = stream
            .get("W")
            .ok_or_else(|| PdfError::SyntaxError("missing W in xref stream".into()))?
            .as_array()?
            .iter()
            .map(|w| w.as_int().map(|w| w.max(0) as usize))
            .collect::<Result<Vec<_>>>()?;
        let &[w0, w1, w2] = widths.as_slice() else {
            return Err(PdfError::SyntaxError("W must have 3 elements".into()));
        };
        let row = w0 + w1 + w2;
        if row == 0 {
            return Err(PdfError::SyntaxError("empty xref stream rows".into()));
        }

        let size = stream.get("Size").and_then(|s| s.as_int().ok()).unwrap_or(0);
        let index = match stream.get("Index") {
            Some(idx) => index_subsections(idx.as_array()?)?,
            None => index_subsections(&[PDFObject::Int(0), PDFObject::Int(size.max(0))])?,
        };

        let mut entries = Vec::new();
        let mut rows = data.chunks_exact(row);
        for (objids, count) in index {
            let Some(objids) = objids else {
                warn!(count, "skipping xref stream subsection with invalid numbers");
                rows.by_ref().take(count).for_each(drop);
                continue;
            };
            for objid in objids {
                let Some(bytes) = rows.next() else { break };
                let kind = if w0 == 0 { 1 } else { read_be(&bytes[..w0]) };
                let field1 = read_be(&bytes[w0..w0 + w1]);
                let field2 = read_be(&bytes[w0 + w1..]);
                let entry = match kind {
                    0 => XRefEntry::Free {
                        genno: field2 as u32,
                    },
                    1 => XRefEntry::Uncompressed {
                        offset: field1 as usize,
                        genno: field2 as u32,
                    },
                    2 => XRefEntry::Compressed {
                        stream_objid: field1 as u32,
                        index: field2 as usize,
                    },
                    _ => continue,
                };
                entries.push((objid, entry));
            }
        }

        let mut trailer = stream.attrs.clone();
        for key in ["Length", "Filter", "DecodeParms", "W", "Index"] {
            trailer.shift_remove(key);
        }
        Ok(Section {
            entries,
            trailer,
            is_stream: true,
        })
    }

    /// Parse the indirect object at `offset`, widening the window on truncation.
    fn parse_object_at(
        &self,
        offset: usize,
        expected: Option<PDFObjRef>,
        limit: usize,
    ) -> Result<PDFObject> {
        let mut window = INITIAL_WINDOW;
        loop {
            let end = (offset + window).min(limit);
            let data = self.stream.get_range(offset, end)?;
            match self.parse_indirect(&data, offset, end == limit, expected) {
                Err(e) if !e.is_missing_data() && end < limit => window *= 4,
                other => return other,
            }
        }
    }

    fn parse_indirect(
        &self,
        data: &[u8],
        offset: usize,
        at_limit: bool,
        expected: Option<PDFObjRef>,
    ) -> Result<PDFObject> {
        let mut parser = PDFParser::new(data);
        let header = parser.parse_indirect_header()?;
        if let Some(expected) = expected
            && expected.objid != header.objid
        {
            return Err(PdfError::SyntaxError(format!(
                "expected object {} at offset {offset}, found {}",
                expected.objid, header.objid
            )));
        }
        let obj = parser.parse_object()?;
        let PDFObject::Dict(dict) = obj else {
            if !parser.eat_keyword(b"endobj")? && !at_limit {
                return Err(PdfError::UnexpectedEof);
            }
            return Ok(obj);
        };

        let rest = parser.remaining();
        let skip = rest.iter().take_while(|&&b| is_whitespace(b)).count();
        let rest = &rest[skip..];
        if !rest.starts_with(b"stream") {
            if !at_limit && b"stream".starts_with(rest) {
                return Err(PdfError::UnexpectedEof);
            }
            return Ok(PDFObject::Dict(dict));
        }

        let mut after = &rest[6..];
        if after.len() < 2 && !at_limit {
            return Err(PdfError::UnexpectedEof);
        }
        if after.starts_with(b"\r\n") {
            after = &after[2..];
        } else if after.starts_with(b"\n") || after.starts_with(b"\r") {
            after = &after[1..];
        }
        let body_begin = offset + (data.len() - after.len());
        let limit = self.object_limit(offset);
        let body_end = match self.stream_length(&dict)? {
            Some(len) if body_begin + len <= limit => body_begin + len,
            _ => self.scan_endstream(body_begin, limit)?,
        };

        let mut stream = if self.stream.is_range_loaded(body_begin, body_end) {
            PDFStream::new(dict, self.stream.get_range(body_begin, body_end)?)
        } else {
            PDFStream::pending(dict, body_begin, body_end)
        };
        stream.set_objid(header.objid, header.genno);
        Ok(PDFObject::Stream(Box::new(stream)))
    }

    fn stream_length(&self, dict: &PDFDict) -> Result<Option<usize>> {
        let length = match dict.get("Length") {
            Some(PDFObject::Int(n)) => Some(*n),
            Some(PDFObject::Ref(r)) => match self.fetch(*r) {
                Ok(obj) => obj.as_int().ok(),
                Err(e) if e.is_missing_data() => return Err(e),
                Err(_) => None,
            },
            _ => None,
        };
        Ok(length.filter(|n| *n >= 0).map(|n| n as usize))
    }

    fn scan_endstream(&self, begin: usize, limit: usize) -> Result<usize> {
        let data = self.stream.get_range(begin, limit)?;
        let needle = b"endstream";
        let Some(mut end) = data.windows(needle.len()).position(|w| w == needle) else {
            return Ok(limit);
        };
        while end > 0 && matches!(data[end - 1], b'\r' | b'\n') {
            end -= 1;
        }
        Ok(begin + end)
    }

    fn object_limit(&self, offset: usize) -> usize {
        let next = self.boundaries.partition_point(|&b| b <= offset);
        self.boundaries
            .get(next)
            .copied()
            .unwrap_or_else(|| self.stream.len())
    }

    /// Resolve `r`. Free and unknown objects resolve to `null`.
    ///
    /// Non-stream objects are cached; streams are re-read each time so a
    /// pending body turns into a loaded one once its bytes arrive.
    pub fn fetch(&self, r: PDFObjRef) -> Result<Arc<PDFObject>> {
        if let Some(obj) = lock(&self.cache).get(r) {
            return Ok(obj);
        }
        let _guard = ResolvingGuard::enter(r)?;

        let obj = match self.entries.get(&r.objid).copied() {
            None | Some(XRefEntry::Free { .. }) => PDFObject::Null,
            Some(XRefEntry::Uncompressed { offset, genno }) => {
                if genno != r.genno {
                    return Err(PdfError::SyntaxError(format!(
                        "inconsistent generation for {r}: xref has {genno}"
                    )));
                }
                let obj = self.parse_object_at(offset, Some(r), self.object_limit(offset))?;
                if self.encrypt_ref == Some(r) {
                    obj
                } else {
                    self.decrypt_object(obj, r)?
                }
            }
            Some(XRefEntry::Compressed {
                stream_objid,
                index,
            }) => self.fetch_compressed(stream_objid, index, r.objid)?,
        };

        let obj = Arc::new(obj);
        if !matches!(*obj, PDFObject::Stream(_)) {
            lock(&self.cache).insert(r, Arc::clone(&obj));
        }
        Ok(obj)
    }

    /// Resolve `obj` if it is a reference, otherwise clone it.
    pub fn resolve(&self, obj: &PDFObject) -> Result<PDFObject> {
        match obj {
            PDFObject::Ref(r) => Ok((*self.fetch(*r)?).clone()),
            other => Ok(other.clone()),
        }
    }

    fn fetch_compressed(&self, stream_objid: u32, index: usize, objid: u32) -> Result<PDFObject> {
        let objstm = self.object_stream(stream_objid)?;
        let position = match objstm.members.get(index) {
            Some((id, _)) if *id == objid => index,
            _ => objstm
                .members
                .iter()
                .position(|(id, _)| *id == objid)
                .ok_or_else(|| {
                    PdfError::SyntaxError(format!(
                        "object {objid} missing from object stream {stream_objid}"
                    ))
                })?,
        };
        let begin = objstm.members[position].1;
        let end = objstm
            .members
            .get(position + 1)
            .map_or(objstm.data.len(), |(_, off)| *off)
            .max(begin)
            .min(objstm.data.len());
        PDFParser::new(&objstm.data[begin.min(end)..end]).parse_object()
    }

    fn object_stream(&self, objid: u32) -> Result<Arc<ObjectStream>> {
        if let Some(found) = lock(&self.object_streams).get(&objid) {
            return Ok(Arc::clone(found));
        }
        let genno = self.entries.get(&objid).map_or(0, XRefEntry::genno);
        let obj = self.fetch(PDFObjRef::new(objid, genno))?;
        let stream = self.materialize(obj.as_stream()?)?;
        let data = self.decode_stream(&stream)?;
        let count = stream.get("N").and_then(|n| n.as_int().ok()).unwrap_or(0).max(0) as usize;
        let first = stream
            .get("First")
            .and_then(|f| f.as_int().ok())
            .ok_or_else(|| PdfError::SyntaxError("missing First in ObjStm".into()))?
            .max(0) as usize;
        let first = first.min(data.len());

        let mut header = PDFParser::new(&data[..first]);
        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            let id = header.parse_integer()?;
            let offset = header.parse_integer()?;
            members.push((id as u32, first + offset.max(0) as usize));
        }
        let objstm = Arc::new(ObjectStream { data, members });
        lock(&self.object_streams).insert(objid, Arc::clone(&objstm));
        Ok(objstm)
    }

    fn decrypt_object(&self, obj: PDFObject, r: PDFObjRef) -> Result<PDFObject> {
        let Some(cipher) = &self.cipher else {
            return Ok(obj);
        };
        let transform = cipher.create_cipher_transform(r.objid, r.genno);
        fn walk(obj: PDFObject, transform: &CipherTransform) -> Result<PDFObject> {
            Ok(match obj {
                PDFObject::String(s) => PDFObject::String(transform.decrypt_string(&s)?),
                PDFObject::Array(items) => PDFObject::Array(
                    items
                        .into_iter()
                        .map(|item| walk(item, transform))
                        .collect::<Result<_>>()?,
                ),
                PDFObject::Dict(dict) => PDFObject::Dict(
                    dict.into_iter()
                        .map(|(k, v)| Ok((k, walk(v, transform)?)))
                        .collect::<Result<_>>()?,
                ),
                other => other,
            })
        }

        match obj {
            PDFObject::Stream(mut stream) => {
                let attrs = std::mem::take(&mut stream.attrs);
                stream.attrs = match walk(PDFObject::Dict(attrs), &transform)? {
                    PDFObject::Dict(d) => d,
                    _ => PDFDict::new(),
                };
                if let StreamBody::Encoded(raw) = stream.body()
                    && !is_xref_stream(&stream.attrs)
                {
                    let plain = transform.decrypt_stream(&stream.attrs, raw)?;
                    stream.set_rawdata(plain);
                }
                Ok(PDFObject::Stream(stream))
            }
            other => walk(other, &transform),
        }
    }

    /// Copy of `stream` with a pending body read from the file (and decrypted).
    pub fn materialize(&self, stream: &PDFStream) -> Result<PDFStream> {
        let Some((begin, end)) = stream.pending_range() else {
            return Ok(stream.clone());
        };
        let raw = self.stream.get_range(begin, end)?;
        let mut loaded = stream.clone();
        match (&self.cipher, stream.objref()) {
            (Some(cipher), Some(r)) if !is_xref_stream(&stream.attrs) => {
                let transform = cipher.create_cipher_transform(r.objid, r.genno);
                loaded.set_rawdata(transform.decrypt_stream(&stream.attrs, &raw)?);
            }
            _ => loaded.set_rawdata(raw),
        }
        Ok(loaded)
    }

    /// Undo the stream's filter chain. Only Flate (with PNG predictors) is supported.
    pub fn decode_stream(&self, stream: &PDFStream) -> Result<Vec<u8>> {
        let mut data = match stream.body() {
            StreamBody::Content(content) => return Ok(content.clone()),
            StreamBody::Encoded(raw) => raw.to_vec(),
            StreamBody::Pending { .. } => {
                let loaded = self.materialize(stream)?;
                loaded.get_rawdata().unwrap_or_default().to_vec()
            }
        };
        let parms = stream.get_any(&["DecodeParms", "DP"]);
        for (i, filter) in stream.filters().into_iter().enumerate() {
            match filter {
                "FlateDecode" | "Fl" => {
                    data = inflate(&data)?;
                    let parms = match parms {
                        Some(PDFObject::Array(items)) => items.get(i),
                        other => other,
                    };
                    if let Some(PDFObject::Dict(parms)) = parms {
                        data = apply_png_predictor(&data, PredictorParams::from_dict(parms));
                    }
                }
                other => {
                    return Err(PdfError::DecodeError(format!("unsupported filter /{other}")));
                }
            }
        }
        Ok(data)
    }

    /// Whether the file starts with a linearization dictionary matching its length.
    pub fn is_linearized(&self) -> Result<bool> {
        let end = self.stream.len().min(STARTXREF_SEARCH);
        let head = self.stream.get_range(0, end)?;
        let mut parser = PDFParser::new(&head);
        let parsed = parser
            .parse_indirect_header()
            .and_then(|_| parser.parse_object());
        let Ok(PDFObject::Dict(dict)) = parsed else {
            return Ok(false);
        };
        Ok(dict.contains_key("Linearized")
            && dict
                .get("L")
                .and_then(|l| l.as_int().ok())
                .is_some_and(|l| l as usize == self.stream.len()))
    }

    /// A fresh allocator for one save, starting past every number in use.
    pub fn temporary_refs(&self) -> TemporaryRefs {
        TemporaryRefs::new(self.temp_ref_start)
    }

    pub fn entry(&self, objid: u32) -> Option<XRefEntry> {
        self.entries.get(&objid).copied()
    }

    pub const fn trailer(&self) -> &PDFDict {
        &self.trailer
    }

    pub const fn start_xref(&self) -> usize {
        self.start_xref
    }

    pub const fn first_xref_stm_pos(&self) -> Option<usize> {
        self.first_xref_stm_pos
    }

    pub const fn top_dict_is_stream(&self) -> bool {
        self.top_dict_is_stream
    }

    pub const fn encrypt_ref(&self) -> Option<PDFObjRef> {
        self.encrypt_ref
    }

    pub const fn cipher(&self) -> Option<&CipherTransformFactory> {
        self.cipher.as_ref()
    }

    pub const fn stream(&self) -> &Arc<ChunkedStream> {
        &self.stream
    }

    /// The trailer's `/ID` strings.
    pub fn file_ids(&self) -> Vec<Vec<u8>> {
        self.trailer
            .get("ID")
            .and_then(|id| id.as_array().ok())
            .map(|ids| {
                ids.iter()
                    .filter_map(|s| s.as_string().ok().map(<[u8]>::to_vec))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// New object numbers of one save. Each save owns its allocator, so saves
/// running side by side number their objects independently.
#[derive(Debug)]
pub struct TemporaryRefs {
    next: AtomicU32,
}

impl TemporaryRefs {
    pub const fn new(start: u32) -> Self {
        Self {
            next: AtomicU32::new(start),
        }
    }

    pub fn next_ref(&self) -> PDFObjRef {
        PDFObjRef::new(self.next.fetch_add(1, Ordering::Relaxed), 0)
    }
}

fn is_xref_stream(attrs: &PDFDict) -> bool {
    attrs.get("Type").is_some_and(|t| t.is_name("XRef"))
}

/// Object numbers and row counts of an xref stream `/Index`. A subsection
/// whose numbers leave `u32` keeps its row count but has no numbers; a
/// negative count ends the list.
fn index_subsections(index: &[PDFObject]) -> Result<Vec<(Option<Range<u32>>, usize)>> {
    let mut subsections = Vec::new();
    for pair in index.chunks_exact(2) {
        let Ok(count) = usize::try_from(pair[1].as_int()?) else {
            break;
        };
        let objids = u32::try_from(pair[0].as_int()?).ok().and_then(|start| {
            let end = start.checked_add(u32::try_from(count).ok()?)?;
            Some(start..end)
        });
        subsections.push((objids, count));
    }
    Ok(subsections)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn parse_xref_table(data: &[u8]) -> Result<Section> {
    let mut parser = PDFParser::new(data);
    parser.expect_keyword(b"xref")?;
    let mut entries = Vec::new();
    while !parser.eat_keyword(b"trailer")? {
        let start = parser.parse_integer()?;
        let count = parser.parse_integer()?;
        let mut base = start.max(0) as u32;
        for i in 0..count.max(0) as u32 {
            let offset = parser.parse_integer()?;
            let genno = parser.parse_integer()?;
            let in_use = if parser.eat_keyword(b"n")? {
                true
            } else if parser.eat_keyword(b"f")? {
                false
            } else {
                return Err(PdfError::SyntaxError("bad xref entry marker".into()));
            };
            // Subsections that start at 1 but still carry the object 0 free entry
            if i == 0 && base > 0 && !in_use && offset == 0 && genno == 65535 {
                base -= 1;
            }
            let entry = if in_use {
                XRefEntry::Uncompressed {
                    offset: offset.max(0) as usize,
                    genno: genno as u32,
                }
            } else {
                XRefEntry::Free {
                    genno: genno as u32,
                }
            };
            entries.push((base + i, entry));
        }
    }
    let trailer = match parser.parse_object()? {
        PDFObject::Dict(dict) => dict,
        other => {
            return Err(PdfError::TypeError {
                expected: "dict",
                got: other.type_name(),
            });
        }
    };
    Ok(Section {
        entries,
        trailer,
        is_stream: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_subsections_skip_numbers_outside_u32() {
        let index = [
            PDFObject::Int(0),
            PDFObject::Int(3),
            PDFObject::Int(u32::MAX as i64),
            PDFObject::Int(2),
            PDFObject::Int(-4),
            PDFObject::Int(1),
            PDFObject::Int(10),
            PDFObject::Int(1),
        ];
        assert_eq!(
            index_subsections(&index).unwrap(),
            vec![(Some(0..3), 3), (None, 2), (None, 1), (Some(10..11), 1)]
        );
    }

    #[test]
    fn test_index_subsections_stop_at_negative_count() {
        let index = [
            PDFObject::Int(5),
            PDFObject::Int(1),
            PDFObject::Int(7),
            PDFObject::Int(-1),
            PDFObject::Int(9),
            PDFObject::Int(1),
        ];
        assert_eq!(index_subsections(&index).unwrap(), vec![(Some(5..6), 1)]);
    }

    #[test]
    fn test_parse_xref_table_with_shifted_free_entry() {
        let table = b"xref\n1 3\n0000000000 65535 f\r\n0000000015 00000 n\r\n0000000079 00002 n\r\ntrailer\n<< /Size 3 /Root 1 0 R >>\n";
        let section = parse_xref_table(table).unwrap();
        assert_eq!(
            section.entries,
            vec![
                (0, XRefEntry::Free { genno: 65535 }),
                (
                    1,
                    XRefEntry::Uncompressed {
                        offset: 15,
                        genno: 0
                    }
                ),
                (
                    2,
                    XRefEntry::Uncompressed {
                        offset: 79,
                        genno: 2
                    }
                ),
            ]
        );
        assert_eq!(section.trailer.get("Size"), Some(&PDFObject::Int(3)));
    }

    #[test]
    fn test_truncated_table_is_an_error() {
        assert!(parse_xref_table(b"xref\n0 2\n0000000000 65535 f\r\n00000").is_err());
    }

    #[test]
    fn test_read_be() {
        assert_eq!(read_be(&[0x01, 0x02]), 0x0102);
        assert_eq!(read_be(&[]), 0);
    }
}

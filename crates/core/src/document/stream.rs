//! Chunked access to the bytes of a PDF file.
//!
//! The file may arrive piecemeal from a [`RangeSource`]. Readers ask the
//! [`ChunkedStream`] for a byte range and get [`PdfError::MissingData`] when
//! any chunk of it is not resident; the [`ChunkManager`] turns batches of such
//! ranges into source requests.

use crate::error::{PdfError, Result};
use bytes::Bytes;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Default chunk size, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

/// Transport that can deliver arbitrary byte ranges of the file.
pub trait RangeSource: Send + Sync {
    /// Total file length.
    fn length(&self) -> usize;

    /// Bytes `[begin, end)`; must return exactly `end - begin` bytes.
    fn read_range(&self, begin: usize, end: usize) -> Result<Vec<u8>>;
}

/// In-memory source. Remembers every range it served.
pub struct BytesSource {
    data: Bytes,
    requests: Mutex<Vec<(usize, usize)>>,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Ranges served so far, in request order.
    pub fn requests(&self) -> Vec<(usize, usize)> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl RangeSource for BytesSource {
    fn length(&self) -> usize {
        self.data.len()
    }

    fn read_range(&self, begin: usize, end: usize) -> Result<Vec<u8>> {
        if begin > end || end > self.data.len() {
            return Err(PdfError::Transport(format!(
                "range [{begin}, {end}) outside of {} bytes",
                self.data.len()
            )));
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((begin, end));
        }
        Ok(self.data[begin..end].to_vec())
    }
}

struct Chunks {
    data: Vec<u8>,
    loaded: Vec<bool>,
    loaded_count: usize,
}

/// File bytes with a per-chunk loaded bitmap.
pub struct ChunkedStream {
    length: usize,
    chunk_size: usize,
    chunks: RwLock<Chunks>,
}

impl ChunkedStream {
    /// Empty stream of `length` bytes, nothing loaded.
    pub fn new(length: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let count = length.div_ceil(chunk_size);
        Self {
            length,
            chunk_size,
            chunks: RwLock::new(Chunks {
                data: vec![0; length],
                loaded: vec![false; count],
                loaded_count: 0,
            }),
        }
    }

    /// Fully loaded stream over `data`.
    pub fn from_bytes(data: &[u8]) -> Self {
        let stream = Self::new(data.len(), DEFAULT_CHUNK_SIZE);
        stream.on_receive_data(0, data);
        stream
    }

    pub const fn len(&self) -> usize {
        self.length
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn num_chunks(&self) -> usize {
        self.length.div_ceil(self.chunk_size)
    }

    pub fn is_data_loaded(&self) -> bool {
        self.chunks
            .read()
            .map(|c| c.loaded_count == c.loaded.len())
            .unwrap_or(false)
    }

    fn chunk_span(&self, begin: usize, end: usize) -> std::ops::Range<usize> {
        let end = end.min(self.length);
        if begin >= end {
            return 0..0;
        }
        (begin / self.chunk_size)..end.div_ceil(self.chunk_size)
    }

    pub fn is_range_loaded(&self, begin: usize, end: usize) -> bool {
        let span = self.chunk_span(begin, end);
        self.chunks
            .read()
            .map(|c| span.clone().all(|i| c.loaded[i]))
            .unwrap_or(false)
    }

    /// Fail with [`PdfError::MissingData`] unless `[begin, end)` is resident.
    pub fn ensure_range(&self, begin: usize, end: usize) -> Result<()> {
        if self.is_range_loaded(begin, end) {
            return Ok(());
        }
        Err(PdfError::MissingData {
            begin,
            end: end.min(self.length),
        })
    }

    /// Copy of `[begin, end)`, clamped to the file length.
    pub fn get_range(&self, begin: usize, end: usize) -> Result<Bytes> {
        let end = end.min(self.length);
        let begin = begin.min(end);
        self.ensure_range(begin, end)?;
        let chunks = self
            .chunks
            .read()
            .map_err(|_| PdfError::Transport("chunk table poisoned".into()))?;
        Ok(Bytes::copy_from_slice(&chunks.data[begin..end]))
    }

    /// Whole file; fails unless every chunk is loaded.
    pub fn bytes(&self) -> Result<Bytes> {
        self.get_range(0, self.length)
    }

    /// Store bytes that arrived for offset `begin` and mark the chunks they complete.
    pub fn on_receive_data(&self, begin: usize, data: &[u8]) {
        let end = (begin + data.len()).min(self.length);
        if begin >= end {
            return;
        }
        let Ok(mut chunks) = self.chunks.write() else {
            return;
        };
        chunks.data[begin..end].copy_from_slice(&data[..end - begin]);
        for i in self.chunk_span(begin, end) {
            let chunk_begin = i * self.chunk_size;
            let chunk_end = (chunk_begin + self.chunk_size).min(self.length);
            if begin <= chunk_begin && end >= chunk_end && !chunks.loaded[i] {
                chunks.loaded[i] = true;
                chunks.loaded_count += 1;
            }
        }
    }

    /// Indices of chunks in `[begin, end)` that are not loaded.
    pub fn missing_chunks_in(&self, begin: usize, end: usize) -> Vec<usize> {
        let span = self.chunk_span(begin, end);
        self.chunks
            .read()
            .map(|c| span.filter(|&i| !c.loaded[i]).collect())
            .unwrap_or_default()
    }
}

/// Drives a [`ChunkedStream`] from a [`RangeSource`].
pub struct ChunkManager {
    stream: Arc<ChunkedStream>,
    source: Arc<dyn RangeSource>,
}

impl ChunkManager {
    pub fn new(source: Arc<dyn RangeSource>, chunk_size: usize) -> Self {
        let stream = Arc::new(ChunkedStream::new(source.length(), chunk_size));
        Self { stream, source }
    }

    /// Manager over bytes that are already complete.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let stream = Arc::new(ChunkedStream::from_bytes(&data));
        Self {
            stream,
            source: Arc::new(BytesSource::new(data)),
        }
    }

    pub const fn stream(&self) -> &Arc<ChunkedStream> {
        &self.stream
    }

    /// Load every chunk touched by `ranges` with as few source reads as possible.
    pub fn request_ranges(&self, ranges: &[(usize, usize)]) -> Result<()> {
        let mut wanted: Vec<usize> = ranges
            .iter()
            .flat_map(|&(begin, end)| self.stream.missing_chunks_in(begin, end))
            .collect();
        wanted.sort_unstable();
        wanted.dedup();
        self.fetch_chunks(&wanted)
    }

    /// Load whatever is still missing.
    pub fn request_all_chunks(&self) -> Result<()> {
        let missing = self.stream.missing_chunks_in(0, self.stream.len());
        self.fetch_chunks(&missing)
    }

    /// Run `f`, loading whatever range it reports missing and retrying.
    pub fn ensure<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        loop {
            match f() {
                Err(PdfError::MissingData { begin, end }) => {
                    if self.stream.is_range_loaded(begin, end) {
                        // Nothing new can arrive for this range.
                        return Err(PdfError::MissingData { begin, end });
                    }
                    self.request_ranges(&[(begin, end)])?;
                }
                other => return other,
            }
        }
    }

    fn fetch_chunks(&self, chunks: &[usize]) -> Result<()> {
        for (first, last) in group_runs(chunks) {
            let begin = first * self.stream.chunk_size();
            let end = ((last + 1) * self.stream.chunk_size()).min(self.stream.len());
            debug!(begin, end, "requesting byte range");
            let data = self.source.read_range(begin, end)?;
            if data.len() != end - begin {
                return Err(PdfError::Transport(format!(
                    "asked for {} bytes at {begin}, got {}",
                    end - begin,
                    data.len()
                )));
            }
            self.stream.on_receive_data(begin, &data);
        }
        Ok(())
    }
}

/// Collapse sorted chunk indices into inclusive `(first, last)` runs.
fn group_runs(sorted: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &i in sorted {
        match runs.last_mut() {
            Some((_, last)) if *last + 1 == i => *last = i,
            _ => runs.push((i, i)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_range_reports_request() {
        let stream = ChunkedStream::new(100, 10);
        stream.on_receive_data(0, &[1u8; 20]);
        assert!(stream.is_range_loaded(0, 20));
        assert!(matches!(
            stream.get_range(15, 35),
            Err(PdfError::MissingData { begin: 15, end: 35 })
        ));
    }

    #[test]
    fn test_partial_last_chunk_counts_as_loaded() {
        let stream = ChunkedStream::new(25, 10);
        stream.on_receive_data(20, &[9u8; 5]);
        assert!(stream.is_range_loaded(20, 25));
        assert!(!stream.is_data_loaded());
    }

    #[test]
    fn test_request_ranges_batches_adjacent_chunks() {
        let source = Arc::new(BytesSource::new((0u8..=99).collect::<Vec<_>>()));
        let manager = ChunkManager::new(source.clone(), 10);
        manager
            .request_ranges(&[(12, 18), (21, 29), (75, 76)])
            .unwrap();
        assert_eq!(source.requests(), vec![(10, 30), (70, 80)]);
        assert_eq!(manager.stream().get_range(21, 23).unwrap().as_ref(), &[21, 22]);

        manager.request_all_chunks().unwrap();
        assert!(manager.stream().is_data_loaded());
        assert_eq!(
            source.requests(),
            vec![(10, 30), (70, 80), (0, 10), (30, 70), (80, 100)]
        );
    }

    #[test]
    fn test_ensure_retries_after_loading() {
        let source = Arc::new(BytesSource::new(vec![7u8; 40]));
        let manager = ChunkManager::new(source, 8);
        let mut attempts = 0;
        let value = manager
            .ensure(|| {
                attempts += 1;
                manager.stream().get_range(30, 34).map(|b| b[0])
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_group_runs() {
        assert_eq!(group_runs(&[1, 2, 3, 7, 9, 10]), vec![(1, 3), (7, 7), (9, 10)]);
        assert!(group_runs(&[]).is_empty());
    }
}

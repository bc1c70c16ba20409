//! Shared buffered stream with forward and end-anchored slices.
//!
//! A [`Buffer`] wraps a reader of possibly unknown length and hands out
//! byte slices to any number of concurrent scanners. Forward slices block
//! until enough input has been buffered; end-anchored slices are served
//! from a lazily-read tail window for files, or after a full drain for
//! pipes.
//!
//! # Invariants
//! - Filling is serialized by the state mutex; readers never observe a
//!   partially-written extension of the buffer.
//! - Slices are copied out. Nothing borrowed from the internal buffer or
//!   the memory map crosses a thread boundary.
//! - Cancellation is checked between fill steps; a cancelled buffer fails
//!   every subsequent slice call with [`ScanError::Cancelled`].
//!
//! # Design Notes
//! - Large files take a memory-mapped fast path (`mmap` feature); small
//!   files are read whole up front, which is cheaper than mapping.
//! - Growth: the buffer starts at two read units; the first growth jumps
//!   straight to the full file size when known, otherwise capacity doubles.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::BufferConfig;
use crate::error::ScanError;

mod reader;

pub use reader::{ForwardReader, ReverseReader};

/// Cooperative cancellation shared between a buffer and its owner.
#[derive(Debug, Default)]
pub struct CancelToken {
    flag: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask every holder to stop. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

enum Source {
    /// Sequential reader of unknown total length.
    Stream(Box<dyn Read + Send>),
    /// Seekable file, filled sequentially; `tail` reads seek directly.
    File { fill: File, tail: File },
    /// Whole input held in memory (small files, container entries, tests).
    Bytes,
    /// Memory-mapped file; the map serves every slice.
    #[cfg(feature = "mmap")]
    Mmap(memmap2::Mmap),
}

struct State {
    source: Source,
    /// Buffered prefix of the input (unused for `Bytes`/`Mmap`).
    data: Vec<u8>,
    /// All input has been buffered into `data`.
    drained: bool,
    /// Total size, known up front for files, at drain for streams.
    size: Option<u64>,
    /// Cached tail window for file sources: (absolute offset, bytes).
    tail_cache: Option<(u64, Vec<u8>)>,
}

/// A shareable buffered view over one input.
#[derive(Clone)]
pub struct Buffer {
    shared: Arc<Shared>,
}

struct Shared {
    cfg: BufferConfig,
    quit: Arc<CancelToken>,
    state: Mutex<State>,
}

impl Buffer {
    /// Buffer a sequential stream of unknown length.
    pub fn from_reader(r: impl Read + Send + 'static, cfg: BufferConfig, quit: Arc<CancelToken>) -> Self {
        Self::build(
            Source::Stream(Box::new(r)),
            Vec::with_capacity(cfg.read_sz * 2),
            None,
            cfg,
            quit,
        )
    }

    /// Buffer a file. Small files are read whole; large ones are mapped
    /// when the `mmap` feature is on, otherwise filled progressively.
    pub fn from_file(file: File, cfg: BufferConfig, quit: Arc<CancelToken>) -> Result<Self, ScanError> {
        let size = file.metadata()?.len();
        if size <= cfg.small_file_sz as u64 {
            let mut data = Vec::with_capacity(size as usize);
            let mut f = file;
            f.read_to_end(&mut data)?;
            return Ok(Self::from_bytes_inner(data, cfg, quit));
        }
        #[cfg(feature = "mmap")]
        {
            // SAFETY: the mapping is read-only and slices are copied out
            // before use; mutation of the underlying file during a scan is
            // outside the supported contract.
            if let Ok(map) = unsafe { memmap2::Mmap::map(&file) } {
                return Ok(Self::build(Source::Mmap(map), Vec::new(), Some(size), cfg, quit));
            }
        }
        let tail = file.try_clone()?;
        Ok(Self::build(
            Source::File { fill: file, tail },
            Vec::with_capacity(cfg.read_sz * 2),
            Some(size),
            cfg,
            quit,
        ))
    }

    /// Buffer an in-memory byte string.
    pub fn from_bytes(data: Vec<u8>, cfg: BufferConfig, quit: Arc<CancelToken>) -> Self {
        Self::from_bytes_inner(data, cfg, quit)
    }

    fn from_bytes_inner(data: Vec<u8>, cfg: BufferConfig, quit: Arc<CancelToken>) -> Self {
        let size = data.len() as u64;
        Self::build(Source::Bytes, data, Some(size), cfg, quit)
    }

    fn build(
        source: Source,
        data: Vec<u8>,
        size: Option<u64>,
        cfg: BufferConfig,
        quit: Arc<CancelToken>,
    ) -> Self {
        let drained = matches!(source, Source::Bytes) || size == Some(data.len() as u64);
        Self {
            shared: Arc::new(Shared {
                cfg,
                quit,
                state: Mutex::new(State { source, data, drained, size, tail_cache: None }),
            }),
        }
    }

    /// The cancellation token this buffer watches.
    pub fn quit(&self) -> Arc<CancelToken> {
        Arc::clone(&self.shared.quit)
    }

    /// Total size when already known.
    pub fn size(&self) -> Option<u64> {
        self.shared.state.lock().expect("buffer lock").size
    }

    /// Bytes buffered so far; equals the total size once that is known.
    pub fn size_now(&self) -> u64 {
        let st = self.shared.state.lock().expect("buffer lock");
        match st.size {
            Some(sz) => sz,
            None => st.data.len() as u64,
        }
    }

    fn check_quit(&self) -> Result<(), ScanError> {
        if self.shared.quit.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Forward slice `[off, off+len)`. Returns the bytes available and a
    /// flag set when the slice was clipped by the end of the input.
    pub fn slice(&self, off: u64, len: usize) -> Result<(Vec<u8>, bool), ScanError> {
        self.check_quit()?;
        let want = off.saturating_add(len as u64);
        let mut st = self.shared.state.lock().expect("buffer lock");

        // Map and in-memory backings serve directly.
        match &st.source {
            #[cfg(feature = "mmap")]
            Source::Mmap(map) => return Ok(clip(map, off, len)),
            Source::Bytes => return Ok(clip(&st.data, off, len)),
            _ => {}
        }

        while (st.data.len() as u64) < want && !st.drained {
            self.check_quit()?;
            fill_step(&mut st, &self.shared.cfg)?;
        }
        Ok(clip(&st.data, off, len))
    }

    /// End-anchored slice: `off` counts back from the last byte (`off = 0`
    /// addresses the final `len` bytes). The flag is set when the slice was
    /// clipped by the beginning of the input.
    pub fn eof_slice(&self, off: u64, len: usize) -> Result<(Vec<u8>, bool), ScanError> {
        self.check_quit()?;
        let mut st = self.shared.state.lock().expect("buffer lock");

        let size = match st.size {
            Some(sz) => sz,
            None => {
                // Unknown length: drain the stream, then serve from memory.
                while !st.drained {
                    self.check_quit()?;
                    fill_step(&mut st, &self.shared.cfg)?;
                }
                st.size.unwrap_or(st.data.len() as u64)
            }
        };

        let end = size.saturating_sub(off);
        let start = end.saturating_sub(len as u64);
        let clipped = start == 0 && off.saturating_add(len as u64) >= size;
        if start >= end {
            return Ok((Vec::new(), true));
        }

        let st = &mut *st;
        match &mut st.source {
            #[cfg(feature = "mmap")]
            Source::Mmap(map) => Ok((map[start as usize..end as usize].to_vec(), clipped)),
            Source::Bytes | Source::Stream(_) => {
                let s = (start as usize).min(st.data.len());
                let e = (end as usize).min(st.data.len());
                Ok((st.data[s..e].to_vec(), clipped))
            }
            Source::File { tail, .. } => {
                // Serve from the buffered prefix when it already covers the
                // range, else from the cached tail window, else seek.
                if end as usize <= st.data.len() {
                    return Ok((st.data[start as usize..end as usize].to_vec(), clipped));
                }
                let eof_sz = self.shared.cfg.eof_sz as u64;
                if st.tail_cache.is_none() {
                    let cache_start = size.saturating_sub(eof_sz);
                    let mut bytes = vec![0u8; (size - cache_start) as usize];
                    tail.seek(SeekFrom::Start(cache_start))?;
                    tail.read_exact(&mut bytes)?;
                    st.tail_cache = Some((cache_start, bytes));
                }
                if let Some((cache_start, cache)) = &st.tail_cache {
                    if start >= *cache_start && end <= cache_start + cache.len() as u64 {
                        let s = (start - cache_start) as usize;
                        let e = (end - cache_start) as usize;
                        return Ok((cache[s..e].to_vec(), clipped));
                    }
                }
                let mut bytes = vec![0u8; (end - start) as usize];
                tail.seek(SeekFrom::Start(start))?;
                tail.read_exact(&mut bytes)?;
                Ok((bytes, clipped))
            }
        }
    }
}

/// Copy out `[off, off+len)` clipped to the available bytes.
fn clip(data: &[u8], off: u64, len: usize) -> (Vec<u8>, bool) {
    let off = off as usize;
    if off >= data.len() {
        return (Vec::new(), true);
    }
    let end = (off + len).min(data.len());
    (data[off..end].to_vec(), end == data.len() && off + len > data.len())
}

/// Read one unit from the source into the buffer, growing capacity per the
/// growth policy.
fn fill_step(st: &mut State, cfg: &BufferConfig) -> Result<(), ScanError> {
    let read_sz = cfg.read_sz;
    if st.data.len() + read_sz > st.data.capacity() {
        let grown = match st.size {
            Some(sz) => (sz as usize).max(st.data.capacity() * 2),
            None => (st.data.capacity() * 2).max(read_sz * 2),
        };
        st.data.reserve(grown - st.data.len());
    }
    let old_len = st.data.len();
    st.data.resize(old_len + read_sz, 0);
    let n = match &mut st.source {
        Source::Stream(r) => read_retrying(r.as_mut(), &mut st.data[old_len..])?,
        Source::File { fill, .. } => read_retrying(fill, &mut st.data[old_len..])?,
        _ => 0,
    };
    st.data.truncate(old_len + n);
    if n == 0 {
        st.drained = true;
        if st.size.is_none() {
            st.size = Some(st.data.len() as u64);
        }
    } else if st.size == Some(st.data.len() as u64) {
        st.drained = true;
    }
    Ok(())
}

fn read_retrying(r: &mut dyn Read, dst: &mut [u8]) -> Result<usize, ScanError> {
    loop {
        match r.read(dst) {
            Ok(n) => return Ok(n),
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ScanError::InputIo(e)),
        }
    }
}

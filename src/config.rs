//! Engine configuration knobs.
//!
//! # Invariants
//! - A cap of 0 means "unlimited" for `max_bof`/`max_eof`.
//! - `distance`/`range` govern signature segmentation only; they never
//!   affect match semantics, just which frame seeds the search.

/// Tuning knobs for signature compilation and scanning.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Furthest offset from the beginning of the stream that byte matching
    /// will search. 0 means unlimited.
    pub max_bof: u64,
    /// Furthest offset back from the end of the stream that byte matching
    /// will search. 0 means unlimited.
    pub max_eof: u64,
    /// Maximum inter-frame gap before a signature is split into segments.
    pub distance: u64,
    /// Maximum inter-frame window width before a signature is split.
    pub range: u64,
    /// Maximum number of simple sequences a key-frame candidate may unroll
    /// to. Candidates above this are disqualified.
    pub choices: usize,
    /// Minimum sequence length admitted to the automaton for segments whose
    /// window is unanchored. Longer minimums mean fewer false strikes.
    pub varlen: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_bof: 0,
            max_eof: 0,
            distance: 8192,
            range: 2048,
            choices: 64,
            varlen: 1,
        }
    }
}

impl EngineConfig {
    /// Effective BOF cap, `None` meaning unlimited.
    #[inline]
    pub fn bof_cap(&self) -> Option<u64> {
        (self.max_bof > 0).then_some(self.max_bof)
    }

    /// Effective EOF cap, `None` meaning unlimited.
    #[inline]
    pub fn eof_cap(&self) -> Option<u64> {
        (self.max_eof > 0).then_some(self.max_eof)
    }
}

/// Buffering knobs for the shared stream buffer.
#[derive(Clone, Copy, Debug)]
pub struct BufferConfig {
    /// Unit read size.
    pub read_sz: usize,
    /// Size of the lazily-filled tail window for file sources.
    pub eof_sz: usize,
    /// Files at or below this size are read whole rather than mapped.
    pub small_file_sz: usize,
    /// Byte ceiling for a single container entry fed to an inner matcher.
    pub max_entry_sz: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        const READ_SZ: usize = 4096;
        Self {
            read_sz: READ_SZ,
            eof_sz: READ_SZ * 2,
            small_file_sz: READ_SZ * 16,
            max_entry_sz: 32 * 1024 * 1024,
        }
    }
}

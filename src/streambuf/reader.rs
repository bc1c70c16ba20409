//! `std::io` adapters over a shared [`Buffer`].
//!
//! Any number of readers may be open over one buffer; each keeps its own
//! position. The forward reader is seekable once the buffer's size is
//! known (always, for files), which is what the container walkers need.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::ScanError;

use super::Buffer;

fn to_io(err: ScanError) -> io::Error {
    match err {
        ScanError::InputIo(e) => e,
        other => io::Error::other(other),
    }
}

/// Forward reader with an independent cursor.
pub struct ForwardReader {
    buf: Buffer,
    pos: u64,
}

impl ForwardReader {
    pub fn new(buf: Buffer) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for ForwardReader {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let (bytes, _) = self.buf.slice(self.pos, dst.len()).map_err(to_io)?;
        dst[..bytes.len()].copy_from_slice(&bytes);
        self.pos += bytes.len() as u64;
        Ok(bytes.len())
    }
}

impl Seek for ForwardReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(off) => off as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => {
                // Seeking from the end forces size discovery on streams.
                let size = match self.buf.size() {
                    Some(sz) => sz,
                    None => {
                        self.buf.eof_slice(0, 0).map_err(to_io)?;
                        self.buf.size().unwrap_or(0)
                    }
                };
                size as i128 + delta as i128
            }
        };
        if next < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }
}

/// Reader yielding the input byte-reversed: the first byte read is the last
/// byte of the stream. Feeds the end-anchored automaton.
pub struct ReverseReader {
    buf: Buffer,
    /// Bytes already consumed, counted back from the end.
    pos: u64,
}

impl ReverseReader {
    pub fn new(buf: Buffer) -> Self {
        Self { buf, pos: 0 }
    }

    /// Distance from the end consumed so far.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for ReverseReader {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let (bytes, _) = self.buf.eof_slice(self.pos, dst.len()).map_err(to_io)?;
        for (i, &b) in bytes.iter().rev().enumerate() {
            dst[i] = b;
        }
        self.pos += bytes.len() as u64;
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use crate::streambuf::CancelToken;

    fn mem(data: &[u8]) -> Buffer {
        Buffer::from_bytes(data.to_vec(), BufferConfig::default(), CancelToken::new())
    }

    #[test]
    fn forward_reader_reads_and_seeks() {
        let mut r = ForwardReader::new(mem(b"0123456789"));
        let mut head = [0u8; 4];
        r.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"0123");
        r.seek(SeekFrom::End(-2)).unwrap();
        let mut tail = [0u8; 2];
        r.read_exact(&mut tail).unwrap();
        assert_eq!(&tail, b"89");
    }

    #[test]
    fn reverse_reader_yields_reversed_stream() {
        let mut r = ReverseReader::new(mem(b"abcdef"));
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"fedcba");
    }
}

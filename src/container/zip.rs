//! Bounded Zip32 entry walker over a shared buffer.
//!
//! # Invariants
//! - All sizes/offsets are untrusted and validated against the stream
//!   length before use.
//! - Entry payloads are capped; oversized entries are truncated rather
//!   than skipped (the inner signatures sit near entry starts).
//!
//! # Supported
//! - Zip32 (EOCD + central directory), stored and deflate entries.
//! - Encrypted entries and directories are skipped.
//!
//! # Not Supported
//! - Zip64 (sentinel 0xFFFF/0xFFFFFFFF fields) and multi-disk archives.

use std::io::{Read, Seek, SeekFrom};

use flate2::read::DeflateDecoder;

use crate::error::ScanError;
use crate::streambuf::{Buffer, ForwardReader};

use super::{EntryWalker, WalkNext};

/// ZIP local-file-header magic; the container trigger.
pub fn is_zip(header: &[u8]) -> bool {
    header.len() >= 4 && &header[..4] == b"PK\x03\x04"
}

const SIG_EOCD: u32 = 0x0605_4b50;
const SIG_CDFH: u32 = 0x0201_4b50;
const SIG_LFH: u32 = 0x0403_4b50;

const EOCD_MIN_LEN: u64 = 22;
const EOCD_SEARCH_MAX: usize = 66 * 1024;
const CDFH_LEN: usize = 46;
const LFH_LEN: u64 = 30;

const MAX_NAME_LEN: usize = 4096;

/// Streaming cursor over the central directory.
pub struct ZipWalker {
    rdr: ForwardReader,
    stream_len: u64,
    cd_pos: u64,
    cd_end: u64,
    entries_left: u32,
    max_entry_sz: usize,
}

impl ZipWalker {
    /// Locate the end-of-central-directory record and position the cursor.
    ///
    /// Returns `None` for archives this walker cannot parse (Zip64,
    /// multi-disk, truncated): the container is then simply not walked.
    pub fn open(buf: &Buffer, max_entry_sz: usize) -> Result<Option<Self>, ScanError> {
        // Force size discovery; ZIP walking needs random access anyway.
        let (_, _) = buf.eof_slice(0, 0)?;
        let stream_len = buf.size_now();
        if stream_len < EOCD_MIN_LEN {
            return Ok(None);
        }

        let win_len = (stream_len as usize).min(EOCD_SEARCH_MAX);
        let (win, _) = buf.eof_slice(0, win_len)?;

        let Some(eocd_rel) = rfind_sig(&win, SIG_EOCD) else {
            return Ok(None);
        };
        let eocd = &win[eocd_rel..];
        if eocd.len() < EOCD_MIN_LEN as usize {
            return Ok(None);
        }

        let disk_no = le_u16(&eocd[4..6]);
        let cd_disk = le_u16(&eocd[6..8]);
        let entries_disk = le_u16(&eocd[8..10]);
        let entries_total = le_u16(&eocd[10..12]);
        let cd_size = le_u32(&eocd[12..16]);
        let cd_off = le_u32(&eocd[16..20]);

        if disk_no != 0 || cd_disk != 0 || entries_disk != entries_total {
            return Ok(None);
        }
        if entries_total == 0xFFFF || cd_size == 0xFFFF_FFFF || cd_off == 0xFFFF_FFFF {
            return Ok(None);
        }
        let cd_end = (cd_off as u64).saturating_add(cd_size as u64);
        if cd_end > stream_len {
            return Ok(None);
        }

        Ok(Some(Self {
            rdr: ForwardReader::new(buf.clone()),
            stream_len,
            cd_pos: cd_off as u64,
            cd_end,
            entries_left: entries_total as u32,
            max_entry_sz,
        }))
    }

    fn read_exact_at(&mut self, off: u64, dst: &mut [u8]) -> std::io::Result<()> {
        self.rdr.seek(SeekFrom::Start(off))?;
        self.rdr.read_exact(dst)
    }

    /// Read the payload behind a central-directory entry.
    fn read_payload(
        &mut self,
        lfh_off: u64,
        method: u16,
        compressed: u64,
        uncompressed: u64,
    ) -> std::io::Result<Option<Vec<u8>>> {
        if lfh_off.saturating_add(LFH_LEN) > self.stream_len {
            return Ok(None);
        }
        let mut lfh = [0u8; LFH_LEN as usize];
        self.read_exact_at(lfh_off, &mut lfh)?;
        if le_u32(&lfh[0..4]) != SIG_LFH {
            return Ok(None);
        }
        let name_len = le_u16(&lfh[26..28]) as u64;
        let extra_len = le_u16(&lfh[28..30]) as u64;
        let data_start = lfh_off + LFH_LEN + name_len + extra_len;
        let data_end = data_start.saturating_add(compressed);
        if data_end > self.stream_len {
            return Ok(None);
        }

        self.rdr.seek(SeekFrom::Start(data_start))?;
        let cap = (uncompressed as usize).min(self.max_entry_sz);
        let mut out = Vec::with_capacity(cap.min(1 << 20));
        match method {
            0 => {
                let mut take = (&mut self.rdr).take(compressed.min(cap as u64));
                take.read_to_end(&mut out)?;
            }
            8 => {
                let take = (&mut self.rdr).take(compressed);
                let mut dec = DeflateDecoder::new(take).take(cap as u64);
                // Corrupt deflate streams yield what they can; the inner
                // matcher decides whether that still matches.
                if dec.read_to_end(&mut out).is_err() && out.is_empty() {
                    return Ok(None);
                }
            }
            _ => return Ok(None),
        }
        Ok(Some(out))
    }
}

impl EntryWalker for ZipWalker {
    fn next_entry(&mut self) -> Result<WalkNext, ScanError> {
        loop {
            if self.entries_left == 0 || self.cd_pos + CDFH_LEN as u64 > self.cd_end {
                return Ok(WalkNext::End);
            }
            let mut hdr = [0u8; CDFH_LEN];
            if self.read_exact_at(self.cd_pos, &mut hdr).is_err() {
                return Ok(WalkNext::End);
            }
            if le_u32(&hdr[0..4]) != SIG_CDFH {
                return Ok(WalkNext::End);
            }
            self.entries_left -= 1;

            let flags = le_u16(&hdr[8..10]);
            let method = le_u16(&hdr[10..12]);
            let comp_size = le_u32(&hdr[20..24]) as u64;
            let uncomp_size = le_u32(&hdr[24..28]) as u64;
            let name_len = le_u16(&hdr[28..30]) as usize;
            let extra_len = le_u16(&hdr[30..32]) as usize;
            let comment_len = le_u16(&hdr[32..34]) as usize;
            let lfh_off = le_u32(&hdr[42..46]) as u64;

            let rec_len = (CDFH_LEN + name_len + extra_len + comment_len) as u64;
            let name_pos = self.cd_pos + CDFH_LEN as u64;
            self.cd_pos += rec_len;

            if name_len == 0 || name_len > MAX_NAME_LEN {
                continue;
            }
            let mut name_bytes = vec![0u8; name_len];
            if self.read_exact_at(name_pos, &mut name_bytes).is_err() {
                return Ok(WalkNext::End);
            }
            // Directories and encrypted entries are not match candidates.
            if name_bytes.last() == Some(&b'/') || flags & 0x0001 != 0 {
                continue;
            }
            if comp_size == 0xFFFF_FFFF || uncomp_size == 0xFFFF_FFFF || lfh_off == 0xFFFF_FFFF {
                continue;
            }
            let name = String::from_utf8_lossy(&name_bytes).into_owned();
            let data = match self.read_payload(lfh_off, method, comp_size, uncomp_size) {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(_) => return Ok(WalkNext::End),
            };
            return Ok(WalkNext::Entry { name, data });
        }
    }
}

fn rfind_sig(hay: &[u8], sig: u32) -> Option<usize> {
    if hay.len() < 4 {
        return None;
    }
    (0..=hay.len() - 4).rev().find(|&i| le_u32(&hay[i..i + 4]) == sig)
}

#[inline(always)]
fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

#[inline(always)]
fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Build a stored-only ZIP archive in memory. Test helper for this module
/// and the scenario suites.
#[cfg(test)]
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut centrals = Vec::new();
    for (name, data) in entries {
        let lfh_off = out.len() as u32;
        let crc = crc32(data);
        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        out.extend_from_slice(&0u32.to_le_bytes()); // dos time+date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);
        centrals.push((*name, *data, crc, lfh_off));
    }
    let cd_off = out.len() as u32;
    for (name, data, crc, lfh_off) in &centrals {
        out.extend_from_slice(b"PK\x01\x02");
        out.extend_from_slice(&20u16.to_le_bytes()); // version made by
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // method
        out.extend_from_slice(&0u32.to_le_bytes()); // dos time+date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra
        out.extend_from_slice(&0u16.to_le_bytes()); // comment
        out.extend_from_slice(&0u16.to_le_bytes()); // disk
        out.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        out.extend_from_slice(&lfh_off.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }
    let cd_size = out.len() as u32 - cd_off;
    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&0u16.to_le_bytes()); // disk
    out.extend_from_slice(&0u16.to_le_bytes()); // cd disk
    out.extend_from_slice(&(centrals.len() as u16).to_le_bytes());
    out.extend_from_slice(&(centrals.len() as u16).to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_off.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment len
    out
}

#[cfg(test)]
fn crc32(data: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &b in data {
        crc ^= b as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

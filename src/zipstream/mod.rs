//! Streaming ZIP reader for CI artifact downloads.
//!
//! GitHub Actions serves artifacts as ZIP files over a streaming body. The
//! central directory sits at the end of the file, so a directory-based
//! reader would have to download the whole archive first. This reader walks
//! the local file headers instead and can hand out entry sub-streams while
//! the response is still arriving, including DEFLATE members whose
//! compressed size is unknown until the data descriptor.
//!
//! # Supported
//! - STORE (method 0) and DEFLATE (method 8) entries.
//! - ZIP64 size extension (consulted only when a 32-bit size is maxed out).
//! - Data descriptors (flag bit 3, DEFLATE only), with or without the
//!   `PK\x07\x08` signature.
//!
//! # Not supported
//! - Encrypted entries (flag bit 0).
//! - Any other compression method.

use std::io::{self, BufRead, BufReader, Read};

use flate2::{Decompress, FlushDecompress};
use thiserror::Error;

const LOCAL_FILE_HEADER_SIG: u32 = 0x04034B50;
const CENTRAL_DIR_SIG: u32 = 0x02014B50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054B50;
const DATA_DESCRIPTOR_SIG: u32 = 0x08074B50;

/// Fixed-size portion of a local file header, after the signature.
const FILE_HEADER_LEN: usize = 26;

/// ZIP64 extended information extra field.
const ZIP64_EXTRA_TAG: u16 = 0x0001;

const METHOD_STORE: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

/// Scratch size for draining unread entry bytes.
const DRAIN_BUF_LEN: usize = 8192;

#[derive(Debug, Error)]
pub enum ZipError {
    /// The stream ended in the middle of a header, entry, or descriptor.
    #[error("archive stream ended unexpectedly")]
    Truncated,
    #[error("malformed archive: {0}")]
    Malformed(&'static str),
    #[error("unsupported archive feature: {0}")]
    Unsupported(&'static str),
    #[error("archive read failed")]
    Io(#[from] io::Error),
}

/// Parsed local file header for one archive member.
#[derive(Debug, Clone)]
pub struct EntryHeader {
    /// Raw file name bytes. Only guaranteed to be UTF-8 when
    /// [`EntryHeader::name_is_utf8`] is set (flag bit 11); otherwise kept
    /// opaque.
    pub raw_name: Vec<u8>,
    pub name_is_utf8: bool,
    pub method: u16,
    pub flags: u16,
    pub crc32: u32,
    /// Compressed size, when the header or a ZIP64 field provides one.
    /// `None` for DEFLATE entries bounded only by the end-of-stream marker.
    pub compressed_size: Option<u64>,
    pub uncompressed_size: u64,
}

impl EntryHeader {
    /// File name for matching and display. Non-UTF-8 names are replaced
    /// lossily.
    pub fn name(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.raw_name)
    }

    pub fn is_dir(&self) -> bool {
        self.raw_name.last() == Some(&b'/')
    }

    fn has_data_descriptor(&self) -> bool {
        self.flags & 0x0008 != 0
    }
}

/// Decompression state for the entry currently being read.
enum EntryBody {
    Stored {
        remaining: u64,
    },
    Deflate {
        inflate: Box<Decompress>,
        /// Compressed bytes left in the stream, when the size is known.
        remaining_in: Option<u64>,
        finished: bool,
    },
}

struct EntryState {
    body: EntryBody,
    has_descriptor: bool,
}

/// Sequential reader over the local-file section of a ZIP stream.
pub struct ZipStream<R: Read> {
    r: BufReader<R>,
    current: Option<EntryState>,
    done: bool,
}

impl<R: Read> ZipStream<R> {
    pub fn new(reader: R) -> Self {
        Self { r: BufReader::new(reader), current: None, done: false }
    }

    /// Advance to the next archive member. Any unread bytes of the current
    /// member (and its data descriptor) are discarded first. Returns `None`
    /// once the central directory begins.
    pub fn next_entry(&mut self) -> Result<Option<ZipEntry<'_, R>>, ZipError> {
        if self.done {
            return Ok(None);
        }
        self.finish_current()?;

        let mut sig = [0u8; 4];
        read_full(&mut self.r, &mut sig)?;
        match u32::from_le_bytes(sig) {
            LOCAL_FILE_HEADER_SIG => {}
            CENTRAL_DIR_SIG | END_OF_CENTRAL_DIR_SIG => {
                self.done = true;
                return Ok(None);
            }
            _ => return Err(ZipError::Malformed("bad header signature")),
        }

        let header = self.read_entry_header()?;
        let body = match header.method {
            METHOD_STORE => EntryBody::Stored { remaining: header.uncompressed_size },
            METHOD_DEFLATE => EntryBody::Deflate {
                // raw deflate, no zlib wrapper
                inflate: Box::new(Decompress::new(false)),
                remaining_in: header.compressed_size,
                finished: false,
            },
            _ => return Err(ZipError::Unsupported("compression method")),
        };
        self.current =
            Some(EntryState { body, has_descriptor: header.has_data_descriptor() });
        Ok(Some(ZipEntry { header, stream: self }))
    }

    fn read_entry_header(&mut self) -> Result<EntryHeader, ZipError> {
        let mut fixed = [0u8; FILE_HEADER_LEN];
        read_full(&mut self.r, &mut fixed)?;

        let flags = le_u16(&fixed[2..4]);
        let method = le_u16(&fixed[4..6]);
        let crc32 = le_u32(&fixed[10..14]);
        let compressed_size_32 = le_u32(&fixed[14..18]);
        let uncompressed_size_32 = le_u32(&fixed[18..22]);
        let name_len = le_u16(&fixed[22..24]) as usize;
        let extra_len = le_u16(&fixed[24..26]) as usize;

        let mut name_and_extra = vec![0u8; name_len + extra_len];
        read_full(&mut self.r, &mut name_and_extra)?;
        let extra = name_and_extra.split_off(name_len);
        let raw_name = name_and_extra;

        if flags & 0x0001 != 0 {
            return Err(ZipError::Unsupported("encrypted entry"));
        }
        if flags & 0x0008 != 0 && method != METHOD_DEFLATE {
            return Err(ZipError::Malformed("data descriptor on non-DEFLATE entry"));
        }

        let mut compressed_size = u64::from(compressed_size_32);
        let mut uncompressed_size = u64::from(uncompressed_size_32);
        // The ZIP64 field is consulted only for sizes the 32-bit header
        // maxed out; its mere presence changes nothing.
        let mut need_compressed = compressed_size_32 == u32::MAX;
        let mut need_uncompressed = uncompressed_size_32 == u32::MAX;

        let mut rest = extra.as_slice();
        while rest.len() >= 4 {
            let tag = le_u16(&rest[0..2]);
            let size = le_u16(&rest[2..4]) as usize;
            rest = &rest[4..];
            if rest.len() < size {
                return Err(ZipError::Malformed("extra field overruns extra area"));
            }
            let mut body = &rest[..size];
            rest = &rest[size..];
            if tag != ZIP64_EXTRA_TAG {
                continue;
            }
            // Uncompressed size comes first in the zip64 record.
            if need_uncompressed {
                if body.len() < 8 {
                    return Err(ZipError::Malformed("short zip64 extra field"));
                }
                uncompressed_size = le_u64(&body[..8]);
                body = &body[8..];
                need_uncompressed = false;
            }
            if need_compressed {
                if body.len() < 8 {
                    return Err(ZipError::Malformed("short zip64 extra field"));
                }
                compressed_size = le_u64(&body[..8]);
                need_compressed = false;
            }
        }
        if need_compressed {
            return Err(ZipError::Malformed("compressed size unknown"));
        }

        // A zero compressed size on a DEFLATE entry means the size is only
        // discoverable from the stream's own end marker.
        let compressed_size = if method == METHOD_DEFLATE && compressed_size == 0 {
            None
        } else {
            Some(compressed_size)
        };

        Ok(EntryHeader {
            raw_name,
            name_is_utf8: flags & 0x0800 != 0,
            method,
            flags,
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }

    /// Discard the remainder of the in-flight entry, plus its data
    /// descriptor when present.
    fn finish_current(&mut self) -> Result<(), ZipError> {
        let Some(state) = self.current.take() else {
            return Ok(());
        };
        match state.body {
            EntryBody::Stored { remaining } => self.skip_input(remaining)?,
            EntryBody::Deflate { remaining_in: Some(n), .. } => {
                // Bounded member: the stream position is determined by the
                // compressed size regardless of how much was decoded.
                self.skip_input(n)?
            }
            EntryBody::Deflate { inflate, remaining_in: None, finished } => {
                // Unbounded member: the only way to find the end of the
                // compressed data is to decode the rest of it.
                if !finished {
                    let mut body =
                        EntryBody::Deflate { inflate, remaining_in: None, finished: false };
                    let mut sink = [0u8; DRAIN_BUF_LEN];
                    while read_deflate(&mut self.r, &mut body, &mut sink)? > 0 {}
                }
            }
        }
        if state.has_descriptor {
            self.read_data_descriptor()?;
        }
        Ok(())
    }

    /// Consume a data descriptor. The descriptor signature is optional; the
    /// first four bytes decide whether they are the signature or the CRC.
    fn read_data_descriptor(&mut self) -> Result<(), ZipError> {
        let mut head = [0u8; 4];
        read_full(&mut self.r, &mut head)?;
        let rest = if u32::from_le_bytes(head) == DATA_DESCRIPTOR_SIG {
            12 // crc32 + compressed size + uncompressed size
        } else {
            8 // the four bytes already read were the crc32
        };
        let mut buf = [0u8; 12];
        read_full(&mut self.r, &mut buf[..rest])?;
        Ok(())
    }

    fn skip_input(&mut self, mut n: u64) -> Result<(), ZipError> {
        let mut buf = [0u8; DRAIN_BUF_LEN];
        while n > 0 {
            let step = (n as usize).min(buf.len());
            read_full(&mut self.r, &mut buf[..step])?;
            n -= step as u64;
        }
        Ok(())
    }

    fn read_entry_data(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let Some(state) = self.current.as_mut() else {
            return Ok(0);
        };
        match &mut state.body {
            EntryBody::Stored { remaining } => {
                if *remaining == 0 || out.is_empty() {
                    return Ok(0);
                }
                let max = (*remaining).min(out.len() as u64) as usize;
                let n = self.r.read(&mut out[..max])?;
                if n == 0 {
                    return Err(truncated_io());
                }
                *remaining -= n as u64;
                Ok(n)
            }
            body @ EntryBody::Deflate { .. } => read_deflate(&mut self.r, body, out),
        }
    }
}

/// One decode step of a DEFLATE member. Input is pulled from the buffered
/// upstream and consumed exactly as far as the decoder used it, so the
/// stream position lands on the first byte after the DEFLATE end marker.
fn read_deflate<R: Read>(
    r: &mut BufReader<R>,
    body: &mut EntryBody,
    out: &mut [u8],
) -> io::Result<usize> {
    let EntryBody::Deflate { inflate, remaining_in, finished } = body else {
        unreachable!("read_deflate on non-deflate body");
    };
    loop {
        if *finished || out.is_empty() {
            return Ok(0);
        }
        let input = r.fill_buf()?;
        let limit = match remaining_in {
            Some(n) => (*n).min(input.len() as u64) as usize,
            None => input.len(),
        };
        let input_empty = input.is_empty();

        let before_in = inflate.total_in();
        let before_out = inflate.total_out();
        let status = inflate
            .decompress(&input[..limit], out, FlushDecompress::None)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let consumed = (inflate.total_in() - before_in) as usize;
        let produced = (inflate.total_out() - before_out) as usize;
        r.consume(consumed);
        if let Some(n) = remaining_in {
            *n -= consumed as u64;
        }

        if status == flate2::Status::StreamEnd {
            *finished = true;
        }
        if produced > 0 || *finished {
            return Ok(produced);
        }
        if consumed == 0 {
            if input_empty {
                // upstream is exhausted but the deflate stream never ended
                return Err(truncated_io());
            }
            if limit == 0 {
                // the declared compressed size ran out mid-stream
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "deflate data ended without a stream end marker",
                ));
            }
        }
    }
}

/// A readable sub-stream scoped to one archive member. Dropping it without
/// reading to the end is fine; the next [`ZipStream::next_entry`] call
/// discards whatever is left.
pub struct ZipEntry<'a, R: Read> {
    header: EntryHeader,
    stream: &'a mut ZipStream<R>,
}

impl<R: Read> ZipEntry<'_, R> {
    pub fn header(&self) -> &EntryHeader {
        &self.header
    }
}

impl<R: Read> std::fmt::Debug for ZipEntry<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipEntry").field("header", &self.header).finish()
    }
}

impl<R: Read> Read for ZipEntry<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.stream.read_entry_data(out)
    }
}

fn truncated_io() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "archive stream ended unexpectedly")
}

/// `read_exact` that reports a clean [`ZipError::Truncated`] on EOF.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), ZipError> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ZipError::Truncated
        } else {
            ZipError::Io(e)
        }
    })
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-roll a STORE local file record with the given flags.
    fn store_record(name: &[u8], data: &[u8], flags: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&METHOD_STORE.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        let mut crc = flate2::Crc::new();
        crc.update(data);
        out.extend_from_slice(&crc.sum().to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(name);
        out.extend_from_slice(data);
        out
    }

    fn end_of_entries() -> Vec<u8> {
        CENTRAL_DIR_SIG.to_le_bytes().to_vec()
    }

    #[test]
    fn single_store_entry() {
        let mut bytes = store_record(b"report.json", b"{}", 0);
        bytes.extend_from_slice(&end_of_entries());

        let mut stream = ZipStream::new(bytes.as_slice());
        let mut entry = stream.next_entry().unwrap().expect("one entry");
        assert_eq!(entry.header().name(), "report.json");
        assert_eq!(entry.header().method, METHOD_STORE);
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"{}");
        assert!(stream.next_entry().unwrap().is_none());
        // reader stays finished
        assert!(stream.next_entry().unwrap().is_none());
    }

    #[test]
    fn unread_entry_is_skipped() {
        let mut bytes = store_record(b"first", b"aaaaaaaa", 0);
        bytes.extend_from_slice(&store_record(b"second", b"bb", 0));
        bytes.extend_from_slice(&end_of_entries());

        let mut stream = ZipStream::new(bytes.as_slice());
        // don't read the first entry at all
        let entry = stream.next_entry().unwrap().expect("first entry");
        assert_eq!(entry.header().name(), "first");
        let mut entry = stream.next_entry().unwrap().expect("second entry");
        assert_eq!(entry.header().name(), "second");
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"bb");
    }

    #[test]
    fn truncated_header_is_truncated_error() {
        let bytes = store_record(b"report.json", b"{}", 0);
        let mut stream = ZipStream::new(&bytes[..10]);
        match stream.next_entry() {
            Err(ZipError::Truncated) => {}
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn bad_signature_is_malformed() {
        let mut stream = ZipStream::new(&b"garbage!"[..]);
        match stream.next_entry() {
            Err(ZipError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn encrypted_entry_is_unsupported() {
        let mut bytes = store_record(b"secret", b"x", 0x0001);
        bytes.extend_from_slice(&end_of_entries());
        let mut stream = ZipStream::new(bytes.as_slice());
        match stream.next_entry() {
            Err(ZipError::Unsupported(_)) => {}
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }

    #[test]
    fn descriptor_on_store_entry_is_malformed() {
        let mut bytes = store_record(b"bad", b"x", 0x0008);
        bytes.extend_from_slice(&end_of_entries());
        let mut stream = ZipStream::new(bytes.as_slice());
        match stream.next_entry() {
            Err(ZipError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn non_utf8_name_is_preserved() {
        let raw_name = [0xA9, 0xC0, 0xFF];
        let mut bytes = store_record(&raw_name, b"x", 0);
        bytes.extend_from_slice(&end_of_entries());
        let mut stream = ZipStream::new(bytes.as_slice());
        let entry = stream.next_entry().unwrap().expect("entry");
        assert!(!entry.header().name_is_utf8);
        assert_eq!(entry.header().raw_name, raw_name);
    }
}

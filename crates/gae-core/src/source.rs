//! Byte input and output used by every parser and serializer.
//!
//! A [`Source`] is a cheap, cloneable view into shared bytes with a
//! sequential cursor layered on positional reads. A [`Sink`] is append-only.

use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// A fixed-size little-endian on-disk record.
pub trait Record: Sized {
    const SIZE: usize;

    /// Decodes from exactly `SIZE` bytes.
    fn decode(buf: &[u8]) -> Result<Self>;
    fn encode(&self, out: &mut Vec<u8>) -> Result<()>;
}

#[derive(Clone)]
pub struct Source {
    data: Arc<[u8]>,
    start: usize,
    len: usize,
    pos: usize,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Source({:#x}+{:#x})", self.start, self.len)
    }
}

impl Source {
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data: data.into(),
            start: 0,
            len,
            pos: 0,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(Self::from_vec(data))
    }

    pub fn size(&self) -> u64 {
        self.len as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    pub fn check_range(&self, offset: u64, len: u64) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(Error::Bounds {
                offset,
                len,
                size: self.size(),
            }),
        }
    }

    /// A sub-view sharing the same backing bytes.
    pub fn slice(&self, offset: u64, len: u64) -> Result<Source> {
        self.check_range(offset, len)?;
        Ok(Source {
            data: Arc::clone(&self.data),
            start: self.start + offset as usize,
            len: len as usize,
            pos: 0,
        })
    }

    pub fn read_at(&self, offset: u64, len: u64) -> Result<&[u8]> {
        self.check_range(offset, len)?;
        let begin = self.start + offset as usize;
        Ok(&self.data[begin..begin + len as usize])
    }

    pub fn read_struct_at<R: Record>(&self, offset: u64) -> Result<R> {
        R::decode(self.read_at(offset, R::SIZE as u64)?)
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.check_range(offset, 0)?;
        self.pos = offset as usize;
        Ok(())
    }

    pub fn tell(&self) -> u64 {
        self.pos as u64
    }

    pub fn read(&mut self, len: u64) -> Result<&[u8]> {
        let at = self.pos as u64;
        self.check_range(at, len)?;
        self.pos += len as usize;
        let begin = self.start + at as usize;
        Ok(&self.data[begin..begin + len as usize])
    }

    pub fn read_struct<R: Record>(&mut self) -> Result<R> {
        let buf = self.read(R::SIZE as u64)?;
        R::decode(buf)
    }
}

/// Append-only byte output.
pub trait Sink {
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Total bytes written so far.
    fn written(&self) -> u64;

    /// Writes `n` zero bytes.
    fn pad(&mut self, n: u64) -> Result<()> {
        const ZEROS: [u8; 256] = [0; 256];
        let mut left = n;
        while left > 0 {
            let chunk = left.min(ZEROS.len() as u64);
            self.write(&ZEROS[..chunk as usize])?;
            left -= chunk;
        }
        Ok(())
    }

    fn write_record<R: Record>(&mut self, rec: &R) -> Result<()>
    where
        Self: Sized,
    {
        let mut buf = Vec::with_capacity(R::SIZE);
        rec.encode(&mut buf)?;
        debug_assert_eq!(buf.len(), R::SIZE);
        self.write(&buf)
    }
}

impl Sink for Vec<u8> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
    fn written(&self) -> u64 {
        self.len() as u64
    }
}

/// Adapts any `io::Write` into a [`Sink`].
pub struct WriteSink<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> WriteSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl WriteSink<BufWriter<fs::File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = fs::File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> Sink for WriteSink<W> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }
    fn written(&self) -> u64 {
        self.written
    }
}

/// Rounds `offset` up to a multiple of `align` (a power of two).
pub fn align_up(offset: u64, align: u64) -> u64 {
    (offset + (align - 1)) & !(align - 1)
}

/// Zero bytes needed after `written` bytes to reach the next `align` boundary.
pub fn pad_len(written: u64, align: u64) -> u64 {
    (align - (written & (align - 1))) & (align - 1)
}

//! Fixed-size on-disk records of the CL3 container.

use crate::error::{Error, Result, validate_field};
use crate::source::Record;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Cursor, Read};

pub const MAGIC: [u8; 4] = *b"CL3L";

/// A NUL-terminated string stored in a fixed `N`-byte field.
#[derive(Clone, PartialEq, Eq)]
pub struct FixedStr<const N: usize>([u8; N]);

impl<const N: usize> FixedStr<N> {
    pub fn new(s: &str) -> Result<Self> {
        if s.len() >= N {
            return Err(Error::invalid(format!(
                "name {s:?} is longer than {} bytes",
                N - 1
            )));
        }
        if s.as_bytes().contains(&0) {
            return Err(Error::invalid(format!("name {s:?} contains a NUL byte")));
        }
        let mut buf = [0u8; N];
        buf[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self(buf))
    }

    /// Terminated somewhere inside the field.
    pub fn is_valid(&self) -> bool {
        self.0.contains(&0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        &self.0[..end]
    }

    pub fn to_str(&self, what: &'static str) -> Result<&str> {
        std::str::from_utf8(self.as_bytes())
            .map_err(|_| Error::decode(what, "name is not valid UTF-8"))
    }

    fn read_from(c: &mut Cursor<&[u8]>) -> Result<Self> {
        let mut buf = [0u8; N];
        c.read_exact(&mut buf)?;
        Ok(Self(buf))
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub field_04: u32,
    pub field_08: u32,
    pub sections_count: u32,
    pub sections_offset: u32,
    /// Never interpreted; copied through.
    pub unknown_14: u32,
}

impl Header {
    pub fn validate(&self, file_size: u64) -> Result<()> {
        const WHAT: &str = "cl3 header";
        validate_field!(WHAT, self.magic == MAGIC);
        validate_field!(WHAT, self.field_04 == 0);
        validate_field!(WHAT, self.field_08 == 3);
        validate_field!(
            WHAT,
            u64::from(self.sections_offset)
                + u64::from(self.sections_count) * Section::SIZE as u64
                <= file_size
        );
        Ok(())
    }
}

impl Record for Header {
    const SIZE: usize = 0x18;

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(buf);
        let mut magic = [0u8; 4];
        c.read_exact(&mut magic)?;
        Ok(Self {
            magic,
            field_04: c.read_u32::<LittleEndian>()?,
            field_08: c.read_u32::<LittleEndian>()?,
            sections_count: c.read_u32::<LittleEndian>()?,
            sections_offset: c.read_u32::<LittleEndian>()?,
            unknown_14: c.read_u32::<LittleEndian>()?,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.magic);
        out.write_u32::<LittleEndian>(self.field_04)?;
        out.write_u32::<LittleEndian>(self.field_08)?;
        out.write_u32::<LittleEndian>(self.sections_count)?;
        out.write_u32::<LittleEndian>(self.sections_offset)?;
        out.write_u32::<LittleEndian>(self.unknown_14)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: FixedStr<0x20>,
    pub count: u32,
    pub data_size: u32,
    pub data_offset: u32,
    pub reserved: [u32; 9],
}

impl Section {
    pub fn new(name: &str, count: u32, data_size: u32, data_offset: u32) -> Result<Self> {
        Ok(Self {
            name: FixedStr::new(name)?,
            count,
            data_size,
            data_offset,
            reserved: [0; 9],
        })
    }

    pub fn validate(&self, file_size: u64) -> Result<()> {
        const WHAT: &str = "cl3 section";
        validate_field!(WHAT, self.name.is_valid());
        validate_field!(WHAT, u64::from(self.data_offset) <= file_size);
        validate_field!(
            WHAT,
            u64::from(self.data_offset) + u64::from(self.data_size) <= file_size
        );
        validate_field!(WHAT, self.reserved.iter().all(|&f| f == 0));
        Ok(())
    }
}

impl Record for Section {
    const SIZE: usize = 0x50;

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(buf);
        let name = FixedStr::read_from(&mut c)?;
        let count = c.read_u32::<LittleEndian>()?;
        let data_size = c.read_u32::<LittleEndian>()?;
        let data_offset = c.read_u32::<LittleEndian>()?;
        let mut reserved = [0u32; 9];
        c.read_u32_into::<LittleEndian>(&mut reserved)?;
        Ok(Self {
            name,
            count,
            data_size,
            data_offset,
            reserved,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.name.0);
        out.write_u32::<LittleEndian>(self.count)?;
        out.write_u32::<LittleEndian>(self.data_size)?;
        out.write_u32::<LittleEndian>(self.data_offset)?;
        for f in self.reserved {
            out.write_u32::<LittleEndian>(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: FixedStr<0x200>,
    pub flags: u32,
    /// Relative to the start of the file collection section.
    pub data_offset: u32,
    pub data_size: u32,
    pub link_start: u32,
    pub link_count: u32,
    pub reserved: [u32; 7],
}

impl FileEntry {
    /// `block_size` is the declared size of the file collection section.
    pub fn validate(&self, block_size: u64) -> Result<()> {
        const WHAT: &str = "cl3 file entry";
        validate_field!(WHAT, self.name.is_valid());
        validate_field!(WHAT, u64::from(self.data_offset) <= block_size);
        validate_field!(
            WHAT,
            u64::from(self.data_offset) + u64::from(self.data_size) <= block_size
        );
        validate_field!(WHAT, self.reserved.iter().all(|&f| f == 0));
        Ok(())
    }
}

impl Record for FileEntry {
    const SIZE: usize = 0x230;

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(buf);
        let name = FixedStr::read_from(&mut c)?;
        let flags = c.read_u32::<LittleEndian>()?;
        let data_offset = c.read_u32::<LittleEndian>()?;
        let data_size = c.read_u32::<LittleEndian>()?;
        let link_start = c.read_u32::<LittleEndian>()?;
        let link_count = c.read_u32::<LittleEndian>()?;
        let mut reserved = [0u32; 7];
        c.read_u32_into::<LittleEndian>(&mut reserved)?;
        Ok(Self {
            name,
            flags,
            data_offset,
            data_size,
            link_start,
            link_count,
            reserved,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.name.0);
        out.write_u32::<LittleEndian>(self.flags)?;
        out.write_u32::<LittleEndian>(self.data_offset)?;
        out.write_u32::<LittleEndian>(self.data_size)?;
        out.write_u32::<LittleEndian>(self.link_start)?;
        out.write_u32::<LittleEndian>(self.link_count)?;
        for f in self.reserved {
            out.write_u32::<LittleEndian>(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub field_00: u32,
    pub linked_file_id: u32,
    /// Position of this link within its file's run.
    pub link_id: u32,
    pub reserved: [u32; 5],
}

impl LinkEntry {
    pub fn new(linked_file_id: u32, link_id: u32) -> Self {
        Self {
            field_00: 0,
            linked_file_id,
            link_id,
            reserved: [0; 5],
        }
    }

    pub fn validate(&self, i: u32, file_count: u32) -> Result<()> {
        const WHAT: &str = "cl3 link entry";
        validate_field!(WHAT, self.field_00 == 0);
        validate_field!(WHAT, self.linked_file_id < file_count);
        validate_field!(WHAT, self.link_id == i);
        validate_field!(WHAT, self.reserved.iter().all(|&f| f == 0));
        Ok(())
    }
}

impl Record for LinkEntry {
    const SIZE: usize = 0x20;

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(buf);
        let field_00 = c.read_u32::<LittleEndian>()?;
        let linked_file_id = c.read_u32::<LittleEndian>()?;
        let link_id = c.read_u32::<LittleEndian>()?;
        let mut reserved = [0u32; 5];
        c.read_u32_into::<LittleEndian>(&mut reserved)?;
        Ok(Self {
            field_00,
            linked_file_id,
            link_id,
            reserved,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<LittleEndian>(self.field_00)?;
        out.write_u32::<LittleEndian>(self.linked_file_id)?;
        out.write_u32::<LittleEndian>(self.link_id)?;
        for f in self.reserved {
            out.write_u32::<LittleEndian>(f)?;
        }
        Ok(())
    }
}

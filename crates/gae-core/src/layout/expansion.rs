//! Pointer-driven materialization of header arrays.
//!
//! A header array is `count` fixed-size records, each naming a
//! NUL-terminated string elsewhere in the document by absolute position.
//! Expanding it turns the records into typed items and promotes each
//! referenced string out of the surrounding raw bytes on first use.

use super::document::Document;
use super::item::{EXPANSION_SIZE, Expansion, ItemId, ItemKind, Pointer};
use crate::error::{Error, Result, validate_field};
use crate::source::Record;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use tracing::debug;

const HEADER_LABEL: &str = "expansion";

/// On-disk form of one header array record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpansionHeader {
    pub index: u32,
    /// Absolute position of the name string.
    pub name: u32,
    pub ptr: u64,
    pub pad: [u32; 16],
}

impl ExpansionHeader {
    pub fn new(index: u32, name: u32) -> Self {
        Self {
            index,
            name,
            ..Self::default()
        }
    }

    pub fn validate(&self, file_size: u64) -> Result<()> {
        const WHAT: &str = "expansion header";
        validate_field!(WHAT, u64::from(self.name) < file_size);
        validate_field!(WHAT, self.ptr == 0);
        validate_field!(WHAT, self.pad.iter().all(|&p| p == 0));
        Ok(())
    }
}

impl Record for ExpansionHeader {
    const SIZE: usize = EXPANSION_SIZE as usize;

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(buf);
        let index = c.read_u32::<LittleEndian>()?;
        let name = c.read_u32::<LittleEndian>()?;
        let ptr = c.read_u64::<LittleEndian>()?;
        let mut pad = [0u32; 16];
        c.read_u32_into::<LittleEndian>(&mut pad)?;
        Ok(Self {
            index,
            name,
            ptr,
            pad,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<LittleEndian>(self.index)?;
        out.write_u32::<LittleEndian>(self.name)?;
        out.write_u64::<LittleEndian>(self.ptr)?;
        for p in self.pad {
            out.write_u32::<LittleEndian>(p)?;
        }
        Ok(())
    }
}

/// Length of the string at `offset`, not counting the NUL.
fn find_nul(bytes: &[u8], offset: u64) -> Result<usize> {
    bytes
        .get(offset as usize..)
        .and_then(|rest| rest.iter().position(|&b| b == 0))
        .ok_or_else(|| {
            Error::decode("cstring", format!("no NUL terminator after offset {offset:#x}"))
        })
}

impl Document {
    /// Promotes the string at `ptr` to a cstring item, or returns the one
    /// already there.
    pub fn materialize_cstring(&mut self, ptr: Pointer) -> Result<ItemId> {
        let text = match self.item(ptr.item).kind() {
            ItemKind::CString(_) if ptr.offset == 0 => return Ok(ptr.item),
            ItemKind::Raw(src) => {
                let bytes = src.as_bytes();
                let len = find_nul(bytes, ptr.offset)?;
                let start = ptr.offset as usize;
                bytes[start..start + len].to_vec()
            }
            other => {
                return Err(Error::decode(
                    "cstring",
                    format!("pointer lands inside a {} item", other.type_name()),
                ));
            }
        };
        self.split_raw(ptr.item, ptr.offset, ItemKind::CString(text))
    }

    /// Bytes (NUL included) the string at `pos` would occupy once promoted.
    fn probe_cstring(&self, pos: u64) -> Result<u64> {
        let ptr = self.resolve(pos)?;
        let item = self.item(ptr.item);
        match item.kind() {
            ItemKind::CString(_) if ptr.offset == 0 => Ok(item.size()),
            ItemKind::Raw(src) => find_nul(src.as_bytes(), ptr.offset).map(|n| n as u64 + 1),
            other => Err(Error::decode(
                "cstring",
                format!("position {pos:#x} lands inside a {} item", other.type_name()),
            )),
        }
    }

    /// Expands `count` header records starting at absolute `pos`, which must
    /// lie in a raw item. Returns the new expansions container.
    ///
    /// All records and their name targets are checked before the tree is
    /// touched, so an error leaves the document as it was. A name may not
    /// overlap the array or point into the middle of another named string.
    pub fn expand_header_array(&mut self, pos: u64, count: u32) -> Result<ItemId> {
        if count == 0 {
            return Err(Error::invalid("empty header array"));
        }
        let ptr = self.resolve(pos)?;
        let src = match self.item(ptr.item).kind() {
            ItemKind::Raw(src) => src.clone(),
            other => {
                return Err(Error::invalid(format!(
                    "header array at {pos:#x} lands inside a {} item",
                    other.type_name()
                )));
            }
        };
        let len = u64::from(count) * EXPANSION_SIZE;
        src.check_range(ptr.offset, len)?;

        let mut headers = Vec::with_capacity(count as usize);
        let mut strings = Vec::with_capacity(count as usize);
        for i in 0..u64::from(count) {
            let hdr: ExpansionHeader = src.read_struct_at(ptr.offset + i * EXPANSION_SIZE)?;
            hdr.validate(self.size())?;
            let name = u64::from(hdr.name);
            let end = name + self.probe_cstring(name)?;
            if name < pos + len && end > pos {
                return Err(Error::decode(
                    "expansion header",
                    format!("name {name:#x} overlaps the header array"),
                ));
            }
            strings.push((name, end));
            headers.push(hdr);
        }
        strings.sort_unstable();
        strings.dedup();
        for pair in strings.windows(2) {
            let ((outer, outer_end), (inner, _)) = (pair[0], pair[1]);
            if inner < outer_end {
                return Err(Error::decode(
                    "expansion header",
                    format!("name {inner:#x} points inside the string at {outer:#x}"),
                ));
            }
        }

        let array = self.wrap_raw(ptr.item, ptr.offset, len, ItemKind::Expansions)?;
        let mut slot = self.item(array).children()[0];
        for (i, hdr) in headers.iter().enumerate() {
            self.create_label_fallback(HEADER_LABEL, Pointer::new(slot, 0))?;
            let target = self.resolve(u64::from(hdr.name))?;
            let string = self.materialize_cstring(target)?;
            let name = self.label_for(Pointer::new(string, 0))?;
            let exp = Expansion {
                index: hdr.index,
                name,
            };
            let item = self.split_raw(slot, 0, ItemKind::Expansion(exp))?;
            if i + 1 < headers.len() {
                slot = self
                    .next_sibling(item)
                    .ok_or_else(|| Error::invalid("header array ended early"))?;
            }
        }
        debug!(pos, count, "expanded header array");
        Ok(array)
    }
}

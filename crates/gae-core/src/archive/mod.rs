//! CL3 archives: a named, ordered collection of files plus a table of
//! inter-file links.
//!
//! On disk an archive is a header, a section table with a `FILE_COLLECTION`
//! and a `FILE_LINK` section, the file entry table, the file payloads and the
//! link table, every region aligned to [`ALIGN`] bytes. Parsing keeps the
//! payloads as views into the input; one entry (`main.DAT`) may later be
//! turned into a nested [`Document`] with [`Archive::get_nested_format`].

mod records;

pub use records::{FileEntry, FixedStr, Header, LinkEntry, MAGIC, Section};

use crate::error::{Error, Result, validate_field};
use crate::layout::Document;
use crate::ordered_map::{KeyOf, OrderedMap};
use crate::source::{Record, Sink, Source, WriteSink, align_up, pad_len};
use std::fmt::{self, Write as _};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const ALIGN: u64 = 0x40;
/// The entry that holds the nested game data.
pub const NESTED_ENTRY: &str = "main.DAT";

const FILE_COLLECTION: &str = "FILE_COLLECTION";
const FILE_LINK: &str = "FILE_LINK";
const NAME_FIELD: usize = 0x200;

#[derive(Debug, Clone)]
pub enum Payload {
    Raw(Source),
    Nested(Box<Document>),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Raw(Source::from_vec(Vec::new()))
    }
}

impl Payload {
    /// Size as of the last fixup for nested payloads.
    pub fn size(&self) -> u64 {
        match self {
            Payload::Raw(src) => src.size(),
            Payload::Nested(doc) => doc.size(),
        }
    }

    pub fn fixup(&mut self) {
        if let Payload::Nested(doc) = self {
            doc.fixup();
        }
    }

    pub fn dump<S: Sink>(&self, sink: &mut S) -> Result<()> {
        match self {
            Payload::Raw(src) => sink.write(src.as_bytes()),
            Payload::Nested(doc) => doc.dump(sink),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Raw(_) => "raw",
            Payload::Nested(_) => "nested",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    name: String,
    pub flags: u32,
    pub payload: Payload,
    /// Indices of linked entries, in link order.
    pub links: Vec<u32>,
}

impl KeyOf for Entry {
    type Key = String;
    fn key(&self) -> &String {
        &self.name
    }
}

impl Entry {
    /// Fails if `name` does not fit the on-disk name field.
    pub fn new(name: &str, payload: Payload) -> Result<Self> {
        FixedStr::<NAME_FIELD>::new(name)?;
        Ok(Self {
            name: name.to_string(),
            flags: 0,
            payload,
            links: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Default)]
pub struct Archive {
    /// Header word at offset 0x14, carried through unchanged.
    pub unknown_14: u32,
    entries: OrderedMap<Entry>,
    data_size: u64,
    link_count: u64,
}

/// Region offsets of the serialized archive.
struct Layout {
    sections_offset: u64,
    files_offset: u64,
    data_offset: u64,
    link_offset: u64,
}

fn to_u32(v: u64, what: &str) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::invalid(format!("{what} {v:#x} does not fit 32 bits")))
}

impl Archive {
    /// An empty archive; serializes to header and section table only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self> {
        Self::parse(Source::from_file(path)?)
    }

    pub fn parse(src: Source) -> Result<Self> {
        let size = src.size();
        if size < Header::SIZE as u64 {
            return Err(Error::decode(
                "cl3 header",
                format!("file is only {size} bytes"),
            ));
        }
        let hdr: Header = src.read_struct_at(0)?;
        hdr.validate(size)?;
        debug!(
            sections = hdr.sections_count,
            unknown_14 = hdr.unknown_14,
            "cl3 header"
        );

        let mut files = None;
        let mut links = None;
        let mut cur = src.clone();
        cur.seek(u64::from(hdr.sections_offset))?;
        for _ in 0..hdr.sections_count {
            let sec: Section = cur.read_struct()?;
            sec.validate(size)?;
            match sec.name.as_bytes() {
                b if b == FILE_COLLECTION.as_bytes() => files = Some(sec),
                b if b == FILE_LINK.as_bytes() => {
                    validate_field!(
                        "cl3 section",
                        u64::from(sec.data_size) == u64::from(sec.count) * LinkEntry::SIZE as u64
                    );
                    links = Some(sec);
                }
                other => warn!(
                    name = %String::from_utf8_lossy(other),
                    "ignoring unknown cl3 section"
                ),
            }
        }

        let mut archive = Archive {
            unknown_14: hdr.unknown_14,
            ..Self::default()
        };
        let Some(files) = files else {
            archive.fixup();
            return Ok(archive);
        };
        let files_offset = u64::from(files.data_offset);
        let (link_offset, link_total) = links
            .map(|s| (u64::from(s.data_offset), u64::from(s.count)))
            .unwrap_or((0, 0));

        cur.seek(files_offset)?;
        for _ in 0..files.count {
            let fe: FileEntry = cur.read_struct()?;
            fe.validate(u64::from(files.data_size))?;
            validate_field!(
                "cl3 file entry",
                u64::from(fe.link_start) + u64::from(fe.link_count) <= link_total
            );
            let name = fe.name.to_str("cl3 file entry")?.to_string();
            let payload = src.slice(
                files_offset + u64::from(fe.data_offset),
                u64::from(fe.data_size),
            )?;

            let mut entry_links = Vec::with_capacity(fe.link_count as usize);
            for i in 0..fe.link_count {
                let at = link_offset
                    + (u64::from(fe.link_start) + u64::from(i)) * LinkEntry::SIZE as u64;
                let link: LinkEntry = src.read_struct_at(at)?;
                link.validate(i, files.count)?;
                entry_links.push(link.linked_file_id);
            }

            debug!(
                name = %name,
                size = fe.data_size,
                links = fe.link_count,
                "cl3 entry"
            );
            let entry = Entry {
                name,
                flags: fe.flags,
                payload: Payload::Raw(payload),
                links: entry_links,
            };
            let (at, inserted) = archive.entries.push_back(entry);
            if !inserted {
                return Err(Error::decode(
                    "cl3 file entry",
                    format!("duplicate name, first seen at entry {at}"),
                ));
            }
        }
        archive.fixup();
        Ok(archive)
    }

    // ---- entries ----

    pub fn entries(&self) -> &OrderedMap<Entry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, i: usize) -> Option<&Entry> {
        self.entries.nth(i)
    }

    pub fn entry_mut(&mut self, i: usize) -> Option<&mut Entry> {
        self.entries.nth_mut(i)
    }

    pub fn find_entry(&self, name: &str) -> Option<(usize, &Entry)> {
        self.entries.find(name)
    }

    pub fn get_entry(&self, name: &str) -> Result<&Entry> {
        self.entries
            .find(name)
            .map(|(_, e)| e)
            .ok_or_else(|| Error::not_found("entry", name))
    }

    /// The entry called `name`, appending an empty one if there is none.
    pub fn get_or_create_entry(&mut self, name: &str) -> Result<&mut Entry> {
        if !self.entries.contains_key(name) {
            self.entries.push_back(Entry::new(name, Payload::default())?);
        }
        self.entries
            .find_mut(name)
            .map(|(_, e)| e)
            .ok_or_else(|| Error::not_found("entry", name))
    }

    /// Removes entry `index` and renumbers every link: links to it are
    /// dropped and links past it shift down by one.
    pub fn delete_entry(&mut self, index: usize) -> Result<Entry> {
        let removed = self.entries.erase(index)?;
        let index = to_u32(index as u64, "entry index")?;
        for e in self.entries.iter_mut() {
            e.links.retain(|&l| l != index);
            for l in &mut e.links {
                if *l > index {
                    *l -= 1;
                }
            }
        }
        debug!(name = %removed.name, index, "deleted cl3 entry");
        Ok(removed)
    }

    /// Points link `link_id` of entry `index` at `target`. `link_id` may be
    /// one past the current last link to append.
    pub fn set_link(&mut self, index: usize, link_id: usize, target: u32) -> Result<()> {
        let count = self.entries.len();
        if target as usize >= count {
            return Err(Error::invalid(format!(
                "link target {target} out of range, archive has {count} entries"
            )));
        }
        let entry = self
            .entries
            .nth_mut(index)
            .ok_or_else(|| Error::invalid(format!("no entry {index}")))?;
        match link_id.cmp(&entry.links.len()) {
            std::cmp::Ordering::Less => entry.links[link_id] = target,
            std::cmp::Ordering::Equal => entry.links.push(target),
            std::cmp::Ordering::Greater => {
                return Err(Error::invalid(format!(
                    "link id {link_id} out of range, entry has {} links",
                    entry.links.len()
                )));
            }
        }
        Ok(())
    }

    pub fn remove_link(&mut self, index: usize, link_id: usize) -> Result<u32> {
        let entry = self
            .entries
            .nth_mut(index)
            .ok_or_else(|| Error::invalid(format!("no entry {index}")))?;
        if link_id >= entry.links.len() {
            return Err(Error::invalid(format!(
                "link id {link_id} out of range, entry has {} links",
                entry.links.len()
            )));
        }
        Ok(entry.links.remove(link_id))
    }

    // ---- directory sync ----

    /// Makes the archive mirror the regular files directly inside `dir`:
    /// every file replaces or creates the entry of the same name, and
    /// entries with no such file are deleted.
    pub fn update_from_directory(&mut self, dir: &Path) -> Result<()> {
        for dent in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let dent = dent.map_err(io::Error::from)?;
            if !dent.file_type().is_file() {
                continue;
            }
            let Some(name) = dent.file_name().to_str() else {
                warn!(path = %dent.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            let src = Source::from_file(dent.path())?;
            debug!(name, size = src.size(), "updating entry from file");
            self.get_or_create_entry(name)?.payload = Payload::Raw(src);
        }

        let mut i = 0;
        while let Some(entry) = self.entries.nth(i) {
            if dir.join(&entry.name).is_file() {
                i += 1;
            } else {
                info!(name = %entry.name, "entry has no file in directory, deleting");
                self.delete_entry(i)?;
            }
        }
        Ok(())
    }

    /// Writes every entry's payload to `dir/<name>`.
    pub fn extract_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for e in &self.entries {
            let mut sink = WriteSink::create(&dir.join(&e.name))?;
            e.payload.dump(&mut sink)?;
            sink.finish()?;
        }
        info!(dir = %dir.display(), entries = self.entries.len(), "extracted archive");
        Ok(())
    }

    // ---- nested format ----

    /// Parses the `main.DAT` entry into a document on first call and returns
    /// it; later calls return the same document.
    pub fn get_nested_format(&mut self) -> Result<&mut Document> {
        let (_, entry) = self
            .entries
            .find_mut(NESTED_ENTRY)
            .ok_or_else(|| Error::not_found("entry", NESTED_ENTRY))?;
        if let Payload::Raw(src) = &entry.payload {
            let magic = src.as_bytes().get(..4).unwrap_or_default();
            debug!(
                size = src.size(),
                magic = %String::from_utf8_lossy(magic),
                "opening nested document"
            );
            entry.payload = Payload::Nested(Box::new(Document::from_source(src.clone())));
        }
        match &mut entry.payload {
            Payload::Nested(doc) => Ok(doc.as_mut()),
            Payload::Raw(_) => unreachable!("payload was just made nested"),
        }
    }

    // ---- layout and output ----

    fn content_totals(&self) -> (u64, u64) {
        self.entries.iter().fold((0, 0), |(data, links), e| {
            (
                align_up(data + e.payload.size(), ALIGN),
                links + e.links.len() as u64,
            )
        })
    }

    fn layout(&self) -> Layout {
        let sections_offset = align_up(Header::SIZE as u64, ALIGN);
        let files_offset = align_up(sections_offset + 2 * Section::SIZE as u64, ALIGN);
        let data_offset = align_up(
            files_offset + self.entries.len() as u64 * FileEntry::SIZE as u64,
            ALIGN,
        );
        Layout {
            sections_offset,
            files_offset,
            data_offset,
            link_offset: data_offset + self.data_size,
        }
    }

    /// Recomputes payload and link totals (fixing up nested documents
    /// first). Returns the serialized size.
    pub fn fixup(&mut self) -> u64 {
        for e in self.entries.iter_mut() {
            e.payload.fixup();
        }
        (self.data_size, self.link_count) = self.content_totals();
        self.size()
    }

    /// Serialized size as of the last fixup.
    pub fn size(&self) -> u64 {
        self.layout().link_offset + self.link_count * LinkEntry::SIZE as u64
    }

    pub fn dump<S: Sink>(&self, sink: &mut S) -> Result<()> {
        if self.content_totals() != (self.data_size, self.link_count) {
            return Err(Error::invalid("archive layout is stale, run fixup first"));
        }
        let layout = self.layout();
        let count = to_u32(self.entries.len() as u64, "entry count")?;
        let link_count = to_u32(self.link_count, "link count")?;

        sink.write_record(&Header {
            magic: MAGIC,
            field_04: 0,
            field_08: 3,
            sections_count: 2,
            sections_offset: to_u32(layout.sections_offset, "offset")?,
            unknown_14: self.unknown_14,
        })?;
        sink.pad(pad_len(Header::SIZE as u64, ALIGN))?;

        sink.write_record(&Section::new(
            FILE_COLLECTION,
            count,
            to_u32(layout.link_offset - layout.files_offset, "file collection size")?,
            to_u32(layout.files_offset, "offset")?,
        )?)?;
        sink.write_record(&Section::new(
            FILE_LINK,
            link_count,
            to_u32(self.link_count * LinkEntry::SIZE as u64, "link table size")?,
            to_u32(layout.link_offset, "offset")?,
        )?)?;
        sink.pad(pad_len(2 * Section::SIZE as u64, ALIGN))?;

        let mut offset = layout.data_offset - layout.files_offset;
        let mut link_start = 0u64;
        for e in &self.entries {
            let size = e.payload.size();
            sink.write_record(&FileEntry {
                name: FixedStr::new(&e.name)?,
                flags: e.flags,
                data_offset: to_u32(offset, "offset")?,
                data_size: to_u32(size, "entry size")?,
                link_start: to_u32(link_start, "link index")?,
                link_count: to_u32(e.links.len() as u64, "link count")?,
                reserved: [0; 7],
            })?;
            offset = align_up(offset + size, ALIGN);
            link_start += e.links.len() as u64;
        }
        sink.pad(pad_len(
            self.entries.len() as u64 * FileEntry::SIZE as u64,
            ALIGN,
        ))?;

        for e in &self.entries {
            e.payload.dump(sink)?;
            sink.pad(pad_len(e.payload.size(), ALIGN))?;
        }

        for e in &self.entries {
            for (i, &target) in e.links.iter().enumerate() {
                sink.write_record(&LinkEntry::new(target, to_u32(i as u64, "link id")?))?;
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size() as usize);
        self.dump(&mut out)?;
        Ok(out)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut sink = WriteSink::create(path)?;
        self.dump(&mut sink)?;
        sink.finish()?;
        info!(path = %path.display(), size = self.size(), "wrote archive");
        Ok(())
    }

    pub fn inspect(&self) -> String {
        let mut out = String::new();
        self.write_inspect(&mut out).ok();
        out
    }

    fn write_inspect(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "cl3(unknown_14 = {:#x}, files[", self.unknown_14)?;
        for (i, e) in self.entries.iter().enumerate() {
            write!(
                out,
                "  [{i}] ({:?}, flags {:#x}, links {:?}, ",
                e.name, e.flags, e.links
            )?;
            match &e.payload {
                Payload::Raw(src) => writeln!(out, "raw({:#x}))", src.size())?,
                Payload::Nested(doc) => {
                    writeln!(out, "nested(")?;
                    for line in doc.inspect().lines() {
                        writeln!(out, "      {line}")?;
                    }
                    writeln!(out, "    ))")?;
                }
            }
        }
        writeln!(out, "])")
    }
}

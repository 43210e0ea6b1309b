use crate::ordered_map::{KeyOf, OrderedMap};
use crate::source::Source;
use std::collections::BTreeMap;

/// Stable handle of an item inside one [`Document`](super::Document).
/// Handles are never reused, so a handle to a removed item stays dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(pub(crate) usize);

impl KeyOf for ItemId {
    type Key = ItemId;
    fn key(&self) -> &ItemId {
        self
    }
}

/// `offset` bytes past the start of `item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub item: ItemId,
    pub offset: u64,
}

impl Pointer {
    pub fn new(item: ItemId, offset: u64) -> Self {
        Self { item, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelId(pub(crate) usize);

#[derive(Debug, Clone)]
pub struct Label {
    pub(crate) name: String,
    pub(crate) ptr: Pointer,
}

impl Label {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn ptr(&self) -> Pointer {
        self.ptr
    }
}

/// One fixed-size record of a header array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expansion {
    pub index: u32,
    /// Label on the NUL-terminated name string.
    pub name: LabelId,
}

#[derive(Debug, Clone)]
pub enum ItemKind {
    /// Unparsed bytes.
    Raw(Source),
    /// Plain structured container; its size is the sum of its children.
    Group,
    /// Container of [`ItemKind::Expansion`] records.
    Expansions,
    Expansion(Expansion),
    /// String contents without the trailing NUL.
    CString(Vec<u8>),
}

pub(crate) const EXPANSION_SIZE: u64 = 0x50;

impl ItemKind {
    pub fn is_container(&self) -> bool {
        matches!(self, ItemKind::Group | ItemKind::Expansions)
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, ItemKind::Raw(_))
    }

    /// Size of a leaf item; containers derive theirs from children.
    pub fn leaf_size(&self) -> Option<u64> {
        match self {
            ItemKind::Raw(src) => Some(src.size()),
            ItemKind::CString(s) => Some(s.len() as u64 + 1),
            ItemKind::Expansion(_) => Some(EXPANSION_SIZE),
            ItemKind::Group | ItemKind::Expansions => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ItemKind::Raw(_) => "raw",
            ItemKind::Group => "group",
            ItemKind::Expansions => "expansions",
            ItemKind::Expansion(_) => "expansion",
            ItemKind::CString(_) => "cstring",
        }
    }
}

/// A node covering one contiguous byte range.
#[derive(Debug, Clone)]
pub struct Item {
    pub(crate) kind: ItemKind,
    pub(crate) parent: Option<ItemId>,
    pub(crate) children: OrderedMap<ItemId>,
    pub(crate) position: u64,
    pub(crate) size: u64,
    pub(crate) labels: BTreeMap<u64, Vec<LabelId>>,
}

impl Item {
    pub(crate) fn new(kind: ItemKind, parent: Option<ItemId>) -> Self {
        let size = kind.leaf_size().unwrap_or(0);
        Self {
            kind,
            parent,
            children: OrderedMap::new(),
            position: 0,
            size,
            labels: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }
    pub fn parent(&self) -> Option<ItemId> {
        self.parent
    }
    pub fn children(&self) -> &[ItemId] {
        self.children.as_slice()
    }
    /// Absolute offset as of the last fixup.
    pub fn position(&self) -> u64 {
        self.position
    }
    /// Size as of the last fixup (or split).
    pub fn size(&self) -> u64 {
        self.size
    }
    /// Labels anchored inside this item, by intra-item offset.
    pub fn local_labels(&self) -> &BTreeMap<u64, Vec<LabelId>> {
        &self.labels
    }
}

use super::expansion::ExpansionHeader;
use super::item::{Item, ItemId, ItemKind, Label, LabelId, Pointer};
use crate::error::{Error, Result};
use crate::source::{Sink, Source};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write as _};
use tracing::debug;

const AUTO_LABEL_PREFIX: &str = "loc_";

/// Owner of one layout tree plus its naming and addressing state.
///
/// Item handles index into an arena that only grows, so handles held by
/// labels and by the position index never move when the tree is edited.
#[derive(Debug, Clone)]
pub struct Document {
    items: Vec<Option<Item>>,
    root: ItemId,
    size: u64,
    labels: Vec<Option<Label>>,
    label_names: HashMap<String, LabelId>,
    /// Absolute start offset -> most deeply nested item starting there.
    index: BTreeMap<u64, ItemId>,
    sizes_stale: bool,
    index_stale: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document with a group root.
    pub fn new() -> Self {
        Self::with_root(ItemKind::Group)
    }

    /// A document that is a single raw item over `src`.
    pub fn from_source(src: Source) -> Self {
        Self::with_root(ItemKind::Raw(src))
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::from_source(Source::from_vec(data))
    }

    fn with_root(kind: ItemKind) -> Self {
        let mut doc = Self {
            items: vec![Some(Item::new(kind, None))],
            root: ItemId(0),
            size: 0,
            labels: Vec::new(),
            label_names: HashMap::new(),
            index: BTreeMap::new(),
            sizes_stale: true,
            index_stale: true,
        };
        doc.fixup();
        doc
    }

    pub fn root(&self) -> ItemId {
        self.root
    }

    /// Total size as of the last fixup.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// True between a size-changing edit and the next fixup.
    pub fn is_dirty(&self) -> bool {
        self.sizes_stale || self.index_stale
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id.0).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    /// Panics if `id` was removed.
    pub fn item(&self, id: ItemId) -> &Item {
        match self.get(id) {
            Some(item) => item,
            None => panic!("{id:?} is not a live item"),
        }
    }

    fn item_mut(&mut self, id: ItemId) -> &mut Item {
        match self.items.get_mut(id.0).and_then(Option::as_mut) {
            Some(item) => item,
            None => panic!("{id:?} is not a live item"),
        }
    }

    fn live(&self, id: ItemId) -> Result<&Item> {
        self.get(id)
            .ok_or_else(|| Error::invalid(format!("{id:?} is not a live item")))
    }

    fn alloc(&mut self, kind: ItemKind, parent: Option<ItemId>) -> ItemId {
        let id = ItemId(self.items.len());
        self.items.push(Some(Item::new(kind, parent)));
        id
    }

    fn mark_dirty(&mut self) {
        self.sizes_stale = true;
        self.index_stale = true;
    }

    // ---- structural edits ----

    pub fn insert_child(&mut self, parent: ItemId, at: usize, kind: ItemKind) -> Result<ItemId> {
        let p = self.live(parent)?;
        if !p.kind.is_container() {
            return Err(Error::invalid(format!(
                "{} item cannot have children",
                p.kind.type_name()
            )));
        }
        if at > p.children.len() {
            return Err(Error::invalid(format!(
                "child index {at} past end {}",
                p.children.len()
            )));
        }
        let id = self.alloc(kind, Some(parent));
        self.item_mut(parent).children.insert(at, id)?;
        self.mark_dirty();
        Ok(id)
    }

    pub fn push_child(&mut self, parent: ItemId, kind: ItemKind) -> Result<ItemId> {
        let at = self.live(parent)?.children.len();
        self.insert_child(parent, at, kind)
    }

    /// Removes the `at`th child of `parent` with its whole subtree. Labels
    /// anchored anywhere in the subtree are removed too.
    pub fn remove_child(&mut self, parent: ItemId, at: usize) -> Result<()> {
        let child = *self
            .live(parent)?
            .children
            .nth(at)
            .ok_or_else(|| Error::invalid(format!("{parent:?} has no child {at}")))?;
        self.item_mut(parent).children.erase(at)?;

        let mut stack = vec![child];
        while let Some(id) = stack.pop() {
            if let Some(item) = self.items[id.0].take() {
                stack.extend(item.children.iter().copied());
                for ids in item.labels.into_values() {
                    for l in ids {
                        self.drop_label(l);
                    }
                }
            }
        }
        self.mark_dirty();
        Ok(())
    }

    /// Swaps the content of a raw item.
    pub fn replace_raw(&mut self, id: ItemId, src: Source) -> Result<()> {
        let item = self.live(id)?;
        if !item.kind.is_raw() {
            return Err(Error::invalid(format!(
                "cannot replace content of a {} item",
                item.kind.type_name()
            )));
        }
        if let Some((&off, _)) = item.labels.last_key_value()
            && off > src.size()
        {
            return Err(Error::invalid(format!(
                "label at offset {off:#x} would fall outside the new content"
            )));
        }
        self.item_mut(id).kind = ItemKind::Raw(src);
        self.mark_dirty();
        Ok(())
    }

    /// Carves a leaf item of `kind` out of raw item `id`, starting at
    /// `offset`. The bytes before and after stay raw siblings. Returns the
    /// new item, which reuses `id` when `offset` is zero.
    ///
    /// Sizes are preserved, so the document does not become dirty; labels
    /// inside the raw range are moved onto whichever piece now holds their
    /// byte.
    pub fn split_raw(&mut self, id: ItemId, offset: u64, kind: ItemKind) -> Result<ItemId> {
        let size = kind.leaf_size().ok_or_else(|| {
            Error::invalid(format!("cannot split-create a {} item", kind.type_name()))
        })?;
        let src = match &self.live(id)?.kind {
            ItemKind::Raw(src) => src.clone(),
            other => {
                return Err(Error::invalid(format!(
                    "cannot split a {} item",
                    other.type_name()
                )));
            }
        };
        src.check_range(offset, size)?;

        if self.item(id).parent.is_none() {
            self.wrap_root();
        }
        let (parent, at) = self.slot_of(id);
        let base = self.item(id).position;
        let end = offset + size;
        let total = src.size();
        let labels = std::mem::take(&mut self.item_mut(id).labels);

        let (mid, tail_at) = if offset > 0 {
            let head = self.item_mut(id);
            head.kind = ItemKind::Raw(src.slice(0, offset)?);
            head.size = offset;
            let mid = self.alloc(kind, Some(parent));
            self.item_mut(parent).children.insert(at + 1, mid)?;
            (mid, at + 2)
        } else {
            let item = self.item_mut(id);
            item.kind = kind;
            item.size = size;
            (id, at + 1)
        };
        self.item_mut(mid).position = base + offset;

        let tail = if end < total {
            let tail = self.alloc(ItemKind::Raw(src.slice(end, total - end)?), Some(parent));
            self.item_mut(parent).children.insert(tail_at, tail)?;
            self.item_mut(tail).position = base + end;
            Some(tail)
        } else {
            None
        };

        for (off, ids) in labels {
            let (target, new_off) = match tail {
                _ if off < offset => (id, off),
                Some(t) if off >= end => (t, off - end),
                _ => (mid, off - offset),
            };
            for l in &ids {
                if let Some(label) = self.labels[l.0].as_mut() {
                    label.ptr = Pointer::new(target, new_off);
                }
            }
            self.item_mut(target)
                .labels
                .entry(new_off)
                .or_default()
                .extend(ids);
        }

        if !self.index_stale {
            self.index.insert(base + offset, mid);
            if let Some(t) = tail {
                self.index.insert(base + end, t);
            }
        }
        Ok(mid)
    }

    /// Moves `len` bytes of raw item `id` at `offset` into a new, empty
    /// container of `kind`. The container's only child is the raw piece,
    /// ready to be split further.
    pub fn wrap_raw(&mut self, id: ItemId, offset: u64, len: u64, kind: ItemKind) -> Result<ItemId> {
        if !kind.is_container() {
            return Err(Error::invalid(format!(
                "{} is not a container kind",
                kind.type_name()
            )));
        }
        let src = match &self.live(id)?.kind {
            ItemKind::Raw(src) => src.clone(),
            other => {
                return Err(Error::invalid(format!(
                    "cannot wrap a {} item",
                    other.type_name()
                )));
            }
        };
        let piece = if offset == 0 && len == src.size() {
            id
        } else {
            self.split_raw(id, offset, ItemKind::Raw(src.slice(offset, len)?))?
        };
        if self.item(piece).parent.is_none() {
            self.wrap_root();
        }
        let (parent, at) = self.slot_of(piece);
        let (position, size) = {
            let p = self.item(piece);
            (p.position, p.size)
        };

        let container = self.alloc(kind, Some(parent));
        let siblings = &mut self.item_mut(parent).children;
        siblings.erase(at)?;
        siblings.insert(at, container)?;
        let c = self.item_mut(container);
        c.position = position;
        c.size = size;
        c.children.push_back(piece);
        self.item_mut(piece).parent = Some(container);
        Ok(container)
    }

    /// Puts a group above the current root so the root gets a parent.
    fn wrap_root(&mut self) {
        let old = self.root;
        let (position, size) = {
            let r = self.item(old);
            (r.position, r.size)
        };
        let group = self.alloc(ItemKind::Group, None);
        let g = self.item_mut(group);
        g.position = position;
        g.size = size;
        g.children.push_back(old);
        self.item_mut(old).parent = Some(group);
        self.root = group;
    }

    fn slot_of(&self, id: ItemId) -> (ItemId, usize) {
        let Some(parent) = self.item(id).parent else {
            panic!("{id:?} has no parent");
        };
        match self.item(parent).children.index_of(&id) {
            Some(at) => (parent, at),
            None => panic!("{id:?} missing from its parent's children"),
        }
    }

    // ---- labels ----

    /// Fails if `name` is taken.
    pub fn create_label(&mut self, name: impl Into<String>, ptr: Pointer) -> Result<LabelId> {
        let name = name.into();
        if self.label_names.contains_key(&name) {
            return Err(Error::invalid(format!("label already exists: {name}")));
        }
        self.live(ptr.item)?;
        Ok(self.attach_label(name, ptr))
    }

    /// Never fails on a name collision: probes `name_1`, `name_2`, ...
    /// Fails only if `ptr` names a removed item.
    pub fn create_label_fallback(&mut self, name: &str, ptr: Pointer) -> Result<LabelId> {
        self.live(ptr.item)?;
        let mut candidate = name.to_string();
        let mut i = 1u32;
        while self.label_names.contains_key(&candidate) {
            candidate = format!("{name}_{i}");
            i += 1;
        }
        Ok(self.attach_label(candidate, ptr))
    }

    fn attach_label(&mut self, name: String, ptr: Pointer) -> LabelId {
        let id = LabelId(self.labels.len());
        self.item_mut(ptr.item)
            .labels
            .entry(ptr.offset)
            .or_default()
            .push(id);
        self.label_names.insert(name.clone(), id);
        self.labels.push(Some(Label { name, ptr }));
        id
    }

    /// The label already anchored at `ptr`, or a new `loc_XXXXXXXX` one
    /// named after its absolute position.
    pub fn label_for(&mut self, ptr: Pointer) -> Result<LabelId> {
        let existing = self
            .live(ptr.item)?
            .labels
            .get(&ptr.offset)
            .and_then(|ids| ids.first().copied());
        if let Some(id) = existing {
            return Ok(id);
        }
        let pos = self.to_file_pos(ptr)?;
        self.create_label_fallback(&format!("{AUTO_LABEL_PREFIX}{pos:08x}"), ptr)
    }

    pub fn get_label(&self, name: &str) -> Result<&Label> {
        let id = self
            .label_names
            .get(name)
            .ok_or_else(|| Error::not_found("label", name))?;
        Ok(self.label(*id))
    }

    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.label_names.get(name).copied()
    }

    /// Panics if the label was removed.
    pub fn label(&self, id: LabelId) -> &Label {
        match self.labels.get(id.0).and_then(Option::as_ref) {
            Some(label) => label,
            None => panic!("{id:?} is not a live label"),
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = (LabelId, &Label)> + '_ {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.as_ref().map(|l| (LabelId(i), l)))
    }

    pub fn remove_label(&mut self, name: &str) -> Result<()> {
        let id = self
            .label_names
            .get(name)
            .copied()
            .ok_or_else(|| Error::not_found("label", name))?;
        if let Some(label) = self.labels[id.0].as_ref() {
            let Pointer { item, offset } = label.ptr;
            let anchored = &mut self.item_mut(item).labels;
            if let Some(ids) = anchored.get_mut(&offset) {
                ids.retain(|&l| l != id);
                if ids.is_empty() {
                    anchored.remove(&offset);
                }
            }
        }
        self.drop_label(id);
        Ok(())
    }

    fn drop_label(&mut self, id: LabelId) {
        if let Some(label) = self.labels[id.0].take() {
            self.label_names.remove(&label.name);
        }
    }

    // ---- addressing ----

    fn ensure_fresh(&self) -> Result<()> {
        if self.is_dirty() {
            return Err(Error::invalid("position index is stale, run fixup first"));
        }
        Ok(())
    }

    /// Maps an absolute offset to the most deeply nested item containing it.
    pub fn resolve(&self, pos: u64) -> Result<Pointer> {
        self.ensure_fresh()?;
        if pos > self.size {
            return Err(Error::Bounds {
                offset: pos,
                len: 0,
                size: self.size,
            });
        }
        match self.index.range(..=pos).next_back() {
            Some((&start, &item)) => Ok(Pointer::new(item, pos - start)),
            None => panic!("position index has no entry at offset 0"),
        }
    }

    pub fn to_file_pos(&self, ptr: Pointer) -> Result<u64> {
        self.ensure_fresh()?;
        Ok(self.live(ptr.item)?.position + ptr.offset)
    }

    pub fn label_pos(&self, id: LabelId) -> Result<u64> {
        self.to_file_pos(self.label(id).ptr)
    }

    // ---- fixup ----

    /// Bottom-up pass: every container's size becomes the sum of its
    /// children's.
    pub fn aggregate_sizes(&mut self) {
        let order: Vec<ItemId> = self.iter().collect();
        for &id in order.iter().rev() {
            let item = self.item(id);
            let size = match item.kind.leaf_size() {
                Some(size) => size,
                None => item.children.iter().map(|&c| self.item(c).size).sum(),
            };
            self.item_mut(id).size = size;
        }
        self.sizes_stale = false;
    }

    /// Top-down pass: assigns absolute positions and rebuilds the position
    /// index. Returns the document size.
    pub fn update_positions(&mut self) -> u64 {
        if self.sizes_stale {
            self.aggregate_sizes();
        }
        self.index.clear();
        let mut stack = vec![(self.root, 0u64)];
        while let Some((id, pos)) = stack.pop() {
            // parents go in first so nested items sharing a start win
            self.index.insert(pos, id);
            let item = self.item_mut(id);
            item.position = pos;
            let children: Vec<ItemId> = item.children.iter().copied().collect();
            let mut next = pos;
            let mut placed = Vec::with_capacity(children.len());
            for c in children {
                placed.push((c, next));
                next += self.item(c).size;
            }
            stack.extend(placed.into_iter().rev());
        }
        self.size = self.item(self.root).size;
        self.index_stale = false;
        self.size
    }

    /// Runs both passes in order.
    pub fn fixup(&mut self) -> u64 {
        self.aggregate_sizes();
        let size = self.update_positions();
        debug!(size, indexed = self.index.len(), "layout fixup");
        size
    }

    // ---- traversal ----

    /// Flat document-order successor, independent of nesting depth.
    pub fn next(&self, id: ItemId) -> Option<ItemId> {
        if let Some(&first) = self.item(id).children.nth(0) {
            return Some(first);
        }
        let mut cur = id;
        loop {
            if let Some(sibling) = self.next_sibling(cur) {
                return Some(sibling);
            }
            cur = self.item(cur).parent?;
        }
    }

    pub fn next_sibling(&self, id: ItemId) -> Option<ItemId> {
        let parent = self.item(id).parent?;
        let siblings = &self.item(parent).children;
        let at = siblings.index_of(&id)?;
        siblings.nth(at + 1).copied()
    }

    /// Every item in document order, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = ItemId> + '_ {
        std::iter::successors(Some(self.root), move |&id| self.next(id))
    }

    // ---- output ----

    pub fn dump<S: Sink>(&self, sink: &mut S) -> Result<()> {
        self.ensure_fresh()?;
        for id in self.iter() {
            match &self.item(id).kind {
                ItemKind::Raw(src) => sink.write(src.as_bytes())?,
                ItemKind::CString(text) => {
                    sink.write(text)?;
                    sink.write(&[0])?;
                }
                ItemKind::Expansion(exp) => {
                    let pos = self.label_pos(exp.name)?;
                    let name = u32::try_from(pos).map_err(|_| {
                        Error::invalid(format!("name position {pos:#x} does not fit 32 bits"))
                    })?;
                    sink.write_record(&ExpansionHeader::new(exp.index, name))?;
                }
                ItemKind::Group | ItemKind::Expansions => {}
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size as usize);
        self.dump(&mut out)?;
        Ok(out)
    }

    pub fn inspect(&self) -> String {
        let mut out = String::new();
        self.inspect_item(self.root, 0, &mut out).ok();
        out
    }

    fn inspect_item(&self, id: ItemId, indent: usize, out: &mut String) -> fmt::Result {
        let item = self.item(id);
        let pad = " ".repeat(indent);
        for (off, ids) in &item.labels {
            for &l in ids {
                writeln!(out, "{pad}{}: +{off:#x}", self.label(l).name)?;
            }
        }
        write!(out, "{pad}{:08x} ", item.position)?;
        match &item.kind {
            ItemKind::Raw(src) => writeln!(out, "raw({:#x})", src.size())?,
            ItemKind::Group => writeln!(out, "group")?,
            ItemKind::Expansions => writeln!(out, "expansions")?,
            ItemKind::Expansion(exp) => match self.labels.get(exp.name.0).and_then(Option::as_ref) {
                Some(label) => writeln!(out, "expansion({}, @{})", exp.index, label.name)?,
                None => writeln!(out, "expansion({}, <dangling>)", exp.index)?,
            },
            ItemKind::CString(text) => {
                writeln!(out, "cstring({:?})", String::from_utf8_lossy(text))?
            }
        }
        for &child in item.children() {
            self.inspect_item(child, indent + 2, out)?;
        }
        Ok(())
    }
}

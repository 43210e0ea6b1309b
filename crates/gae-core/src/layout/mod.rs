//! Round-trippable binary layout model.
//!
//! A [`Document`] owns a tree of [`Item`]s stored in an arena and addressed
//! by [`ItemId`]. Cross references are [`Pointer`]s (item + intra-item
//! offset) named by [`Label`]s, so they survive structural edits. After any
//! edit that changes sizes, [`Document::fixup`] recomputes sizes bottom-up
//! and positions top-down, and rebuilds the flat position index used by
//! [`Document::resolve`].
//!
//! Documents usually start as one raw item and gain typed structure lazily,
//! see [`Document::expand_header_array`].

mod document;
mod expansion;
mod item;

pub use document::Document;
pub use expansion::ExpansionHeader;
pub use item::{Expansion, Item, ItemId, ItemKind, Label, LabelId, Pointer};

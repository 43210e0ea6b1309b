//! gae-core: round-trippable binary layouts for game asset containers
//!
//! This crate focuses on a small, well-factored surface:
//! - byte Source/Sink and fixed-size record I/O shared by every codec
//! - a layout Document of raw and typed items, addressed through labels that
//!   survive edits, with a two-pass fixup before output
//! - the CL3 archive codec, with link renumbering and directory sync
//! - lazy header-array expansion for the nested `main.DAT` document
//! - JSON listing and zip backups for CLI use
//!
pub mod archive;
pub mod backup;
pub mod error;
pub mod json;
pub mod layout;
pub mod ordered_map;
pub mod source;

pub use archive::{Archive, Entry, Payload};
pub use error::{Error, Result};
pub use layout::{Document, Item, ItemId, ItemKind, Label, LabelId, Pointer};
pub use ordered_map::{KeyOf, OrderedMap};
pub use source::{Sink, Source, WriteSink};

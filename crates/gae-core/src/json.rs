use serde_json::{Map, Value, json};

use crate::archive::{Archive, Payload};
use crate::layout::{Document, ItemId, ItemKind};

#[derive(Clone, Copy, Debug)]
pub struct JsonOpts {
    /// Entries listed before the rest is summarized.
    pub max_entries: usize,
    pub include_links: bool,
    pub pretty: bool,
}

impl Default for JsonOpts {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            include_links: true,
            pretty: true,
        }
    }
}

pub fn archive_to_json(archive: &Archive, opts: JsonOpts) -> Value {
    let entries = archive.entries();
    let mut list: Vec<Value> = entries
        .iter()
        .take(opts.max_entries)
        .enumerate()
        .map(|(i, e)| {
            let mut obj = Map::new();
            obj.insert("index".into(), json!(i));
            obj.insert("name".into(), json!(e.name()));
            obj.insert("flags".into(), json!(e.flags));
            obj.insert("size".into(), json!(e.payload.size()));
            obj.insert("kind".into(), json!(e.payload.type_name()));
            if opts.include_links {
                obj.insert("links".into(), json!(e.links));
            }
            if let Payload::Nested(doc) = &e.payload {
                obj.insert("document".into(), document_to_json(doc));
            }
            Value::Object(obj)
        })
        .collect();
    if entries.len() > opts.max_entries {
        list.push(json!({"$truncated": true, "$omitted": entries.len() - opts.max_entries}));
    }
    json!({
        "format": "CL3L",
        "unknown_14": archive.unknown_14,
        "size": archive.size(),
        "entries": list,
    })
}

/// Item tree with positions and labels as of the last fixup.
pub fn document_to_json(doc: &Document) -> Value {
    fn item_value(doc: &Document, id: ItemId) -> Value {
        let item = doc.item(id);
        let mut obj = Map::new();
        obj.insert("type".into(), json!(item.kind().type_name()));
        obj.insert("position".into(), json!(item.position()));
        obj.insert("size".into(), json!(item.size()));
        match item.kind() {
            ItemKind::CString(text) => {
                obj.insert("text".into(), json!(String::from_utf8_lossy(text)));
            }
            ItemKind::Expansion(exp) => {
                obj.insert("index".into(), json!(exp.index));
                obj.insert("name".into(), json!(doc.label(exp.name).name()));
            }
            _ => {}
        }
        let labels: Vec<Value> = item
            .local_labels()
            .iter()
            .flat_map(|(off, ids)| {
                ids.iter()
                    .map(move |&l| json!({"name": doc.label(l).name(), "offset": off}))
            })
            .collect();
        if !labels.is_empty() {
            obj.insert("labels".into(), Value::Array(labels));
        }
        if !item.children().is_empty() {
            let children = item.children().iter().map(|&c| item_value(doc, c)).collect();
            obj.insert("children".into(), Value::Array(children));
        }
        Value::Object(obj)
    }
    item_value(doc, doc.root())
}

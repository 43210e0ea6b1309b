use gae_core::layout::ExpansionHeader;
use gae_core::source::Record;
use gae_core::{Document, Error, ItemKind, Pointer, Source};

fn raw(data: Vec<u8>) -> ItemKind {
    ItemKind::Raw(Source::from_vec(data))
}

/// Three header records followed by the strings they name.
fn header_array_bytes() -> Vec<u8> {
    let mut out = Vec::new();
    for (index, name) in [(1, 0xf0), (2, 0xf6), (3, 0xf0)] {
        ExpansionHeader::new(index, name).encode(&mut out).unwrap();
    }
    out.extend_from_slice(b"alpha\0beta\0");
    out.extend_from_slice(&[0xcc; 4]);
    out
}

#[test]
fn fallback_label_naming() {
    let mut doc = Document::from_bytes(vec![0; 16]);
    let root = doc.root();
    doc.create_label("x", Pointer::new(root, 0)).unwrap();
    let b = doc.create_label_fallback("x", Pointer::new(root, 4)).unwrap();
    let c = doc.create_label_fallback("x", Pointer::new(root, 8)).unwrap();
    assert_eq!(doc.label(b).name(), "x_1");
    assert_eq!(doc.label(c).name(), "x_2");

    assert!(matches!(
        doc.create_label("x", Pointer::new(root, 12)),
        Err(Error::InvalidOperation(_))
    ));
    match doc.get_label("missing") {
        Err(Error::NotFound { name, .. }) => assert_eq!(name, "missing"),
        other => panic!("expected NotFound, got {:?}", other.map(|l| l.name().to_string())),
    }
}

#[test]
fn labels_on_removed_items_fail() {
    let mut doc = Document::new();
    let root = doc.root();
    let leaf = doc.push_child(root, raw(vec![0; 4])).unwrap();
    doc.remove_child(root, 0).unwrap();
    let ptr = Pointer::new(leaf, 0);
    assert!(matches!(
        doc.create_label("gone", ptr),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(
        doc.create_label_fallback("gone", ptr),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(doc.label_for(ptr), Err(Error::InvalidOperation(_))));
    assert_eq!(doc.labels().count(), 0);
}

#[test]
fn label_for_reuses_existing_label() {
    let mut doc = Document::from_bytes(vec![0; 0x40]);
    let ptr = Pointer::new(doc.root(), 0x1c);
    let first = doc.label_for(ptr).unwrap();
    assert_eq!(doc.label(first).name(), "loc_0000001c");
    assert_eq!(doc.label_for(ptr).unwrap(), first);
    assert_eq!(doc.labels().count(), 1);
}

fn sample_tree() -> Document {
    let mut doc = Document::new();
    let root = doc.root();
    doc.push_child(root, raw(vec![1; 8])).unwrap();
    let g = doc.push_child(root, ItemKind::Group).unwrap();
    doc.push_child(g, raw(vec![2; 4])).unwrap();
    doc.push_child(g, ItemKind::CString(b"hi".to_vec())).unwrap();
    doc.push_child(root, raw(vec![3; 5])).unwrap();
    doc
}

#[test]
fn resolve_requires_fixup() {
    let mut doc = sample_tree();
    assert!(doc.is_dirty());
    assert!(matches!(doc.resolve(0), Err(Error::InvalidOperation(_))));
    assert!(matches!(doc.to_bytes(), Err(Error::InvalidOperation(_))));
    assert_eq!(doc.fixup(), 20);
    assert!(!doc.is_dirty());
    assert!(matches!(doc.resolve(21), Err(Error::Bounds { .. })));
}

#[test]
fn position_index_finds_deepest_item() {
    let mut doc = sample_tree();
    doc.fixup();
    let leaves: Vec<_> = doc
        .iter()
        .filter(|&id| doc.item(id).kind().leaf_size().is_some())
        .collect();
    assert_eq!(leaves.len(), 4);
    for id in leaves {
        let item = doc.item(id);
        for k in 0..item.size() {
            assert_eq!(
                doc.resolve(item.position() + k).unwrap(),
                Pointer::new(id, k)
            );
        }
    }

    let positions: Vec<u64> = doc.iter().map(|id| doc.item(id).position()).collect();
    assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(
        doc.to_bytes().unwrap(),
        [&[1u8; 8][..], &[2u8; 4][..], &b"hi\0"[..], &[3u8; 5][..]].concat()
    );
}

#[test]
fn fixup_is_idempotent() {
    let mut doc = sample_tree();
    let size = doc.fixup();
    let first: Vec<(u64, u64)> = doc
        .iter()
        .map(|id| (doc.item(id).position(), doc.item(id).size()))
        .collect();
    assert_eq!(doc.fixup(), size);
    assert_eq!(doc.update_positions(), size);
    let second: Vec<(u64, u64)> = doc
        .iter()
        .map(|id| (doc.item(id).position(), doc.item(id).size()))
        .collect();
    assert_eq!(first, second);
}

#[test]
fn label_follows_item_when_siblings_resize() {
    let mut doc = Document::new();
    let root = doc.root();
    let a = doc.push_child(root, raw(vec![0; 4])).unwrap();
    let b = doc.push_child(root, raw(vec![0; 8])).unwrap();
    doc.fixup();
    let ptr = Pointer::new(b, 2);
    let label = doc.create_label("field", ptr).unwrap();
    assert_eq!(doc.label_pos(label).unwrap(), 6);

    doc.replace_raw(a, Source::from_vec(vec![0; 10])).unwrap();
    assert!(doc.label_pos(label).is_err());
    doc.fixup();
    assert_eq!(doc.label_pos(label).unwrap(), 12);

    doc.insert_child(root, 0, raw(vec![0; 3])).unwrap();
    doc.fixup();
    assert_eq!(doc.label_pos(label).unwrap(), 15);
    assert_eq!(doc.label(label).ptr(), ptr);
    assert_eq!(doc.resolve(15).unwrap(), ptr);
}

#[test]
fn replace_raw_rejects_orphaned_labels() {
    let mut doc = Document::new();
    let root = doc.root();
    let a = doc.push_child(root, raw(vec![0; 8])).unwrap();
    doc.fixup();
    doc.create_label("end", Pointer::new(a, 6)).unwrap();
    assert!(matches!(
        doc.replace_raw(a, Source::from_vec(vec![0; 4])),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn remove_child_drops_labels_in_subtree() {
    let mut doc = Document::new();
    let root = doc.root();
    let g = doc.push_child(root, ItemKind::Group).unwrap();
    let leaf = doc.push_child(g, raw(vec![0; 4])).unwrap();
    doc.push_child(root, raw(vec![0; 4])).unwrap();
    doc.fixup();
    doc.create_label("inner", Pointer::new(leaf, 1)).unwrap();

    doc.remove_child(root, 0).unwrap();
    assert!(!doc.contains(leaf));
    assert!(matches!(doc.get_label("inner"), Err(Error::NotFound { .. })));
    assert_eq!(doc.fixup(), 4);
    // the name is free again
    doc.create_label("inner", Pointer::new(doc.root(), 0)).unwrap();
}

#[test]
fn materialize_cstring_splits_raw_in_place() {
    let data = [&[0xaau8; 8][..], &b"hello\0"[..], &[0xbbu8; 10][..]].concat();
    let mut doc = Document::from_bytes(data.clone());
    let root = doc.root();
    let after = doc.create_label("after", Pointer::new(root, 20)).unwrap();

    let s = doc.materialize_cstring(Pointer::new(root, 8)).unwrap();
    assert!(!doc.is_dirty());
    assert!(matches!(doc.item(s).kind(), ItemKind::CString(t) if t == b"hello"));
    assert_eq!(doc.resolve(8).unwrap(), Pointer::new(s, 0));
    assert_eq!(doc.label_pos(after).unwrap(), 20);
    assert_ne!(doc.label(after).ptr().item, root);
    assert_eq!(doc.resolve(20).unwrap(), doc.label(after).ptr());

    assert_eq!(doc.materialize_cstring(Pointer::new(s, 0)).unwrap(), s);
    assert_eq!(doc.to_bytes().unwrap(), data);
    assert_eq!(doc.fixup(), data.len() as u64);
    assert_eq!(doc.to_bytes().unwrap(), data);
}

#[test]
fn expand_header_array_shares_strings() {
    let data = header_array_bytes();
    let mut doc = Document::from_bytes(data.clone());
    let array = doc.expand_header_array(0, 3).unwrap();

    let slots = doc.item(array).children().to_vec();
    assert_eq!(slots.len(), 3);
    let exps: Vec<_> = slots
        .iter()
        .map(|&id| match doc.item(id).kind() {
            ItemKind::Expansion(e) => *e,
            other => panic!("expected expansion, got {}", other.type_name()),
        })
        .collect();
    assert_eq!(exps.iter().map(|e| e.index).collect::<Vec<_>>(), [1, 2, 3]);
    assert_eq!(exps[0].name, exps[2].name);
    assert_ne!(exps[0].name, exps[1].name);
    assert_eq!(doc.label(exps[0].name).name(), "loc_000000f0");
    assert_eq!(doc.label(exps[1].name).name(), "loc_000000f6");
    assert!(doc.get_label("expansion").is_ok());
    assert!(doc.get_label("expansion_2").is_ok());

    let alpha = doc.label(exps[0].name).ptr().item;
    assert!(matches!(doc.item(alpha).kind(), ItemKind::CString(t) if t == b"alpha"));

    assert_eq!(doc.to_bytes().unwrap(), data);
    doc.fixup();
    assert_eq!(doc.to_bytes().unwrap(), data);
}

#[test]
fn expanded_names_follow_moved_strings() {
    let data = header_array_bytes();
    let mut doc = Document::from_bytes(data.clone());
    doc.expand_header_array(0, 3).unwrap();
    let root = doc.root();
    doc.insert_child(root, 0, raw(vec![0xee; 0x10])).unwrap();
    doc.fixup();

    let out = doc.to_bytes().unwrap();
    assert_eq!(out.len(), data.len() + 0x10);
    let hdr = ExpansionHeader::decode(&out[0x10..0x60]).unwrap();
    assert_eq!(hdr.index, 1);
    assert_eq!(hdr.name, 0x100);
    let hdr = ExpansionHeader::decode(&out[0x60..0xb0]).unwrap();
    assert_eq!(hdr.name, 0x106);
    assert_eq!(&out[0x100..0x106], b"alpha\0");
}

#[test]
fn expand_header_array_validates_before_mutating() {
    let mut data = header_array_bytes();
    // nonzero padding in the second record
    data[0x50 + 0x20] = 1;
    let mut doc = Document::from_bytes(data);
    let err = doc.expand_header_array(0, 3).unwrap_err();
    assert!(matches!(err, Error::Decode { what: "expansion header", .. }));
    assert!(doc.item(doc.root()).kind().is_raw());
    assert_eq!(doc.iter().count(), 1);

    let mut doc = Document::from_bytes(header_array_bytes());
    assert!(matches!(
        doc.expand_header_array(0, 4),
        Err(Error::Bounds { .. })
    ));
    assert!(matches!(
        doc.expand_header_array(0, 0),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn expand_header_array_rejects_names_inside_array() {
    let mut data = Vec::new();
    ExpansionHeader::new(0, 0x10).encode(&mut data).unwrap();
    data.extend_from_slice(b"x\0");
    let mut doc = Document::from_bytes(data);
    assert!(matches!(
        doc.expand_header_array(0, 1),
        Err(Error::Decode { .. })
    ));
}

/// Two headers naming 0xa0 ("abc") and `second`, in the given order.
fn overlapping_names(first: u32, second: u32) -> Vec<u8> {
    let mut data = Vec::new();
    ExpansionHeader::new(0, first).encode(&mut data).unwrap();
    ExpansionHeader::new(1, second).encode(&mut data).unwrap();
    data.extend_from_slice(b"abc\0");
    data
}

#[test]
fn failed_expansion_leaves_document_untouched() {
    for (first, second) in [(0xa0, 0xa1), (0xa1, 0xa0)] {
        let data = overlapping_names(first, second);
        let mut doc = Document::from_bytes(data.clone());
        let before = doc.iter().count();
        let err = doc.expand_header_array(0, 2).unwrap_err();
        assert!(matches!(err, Error::Decode { what: "expansion header", .. }));
        assert_eq!(doc.iter().count(), before);
        assert!(doc.item(doc.root()).kind().is_raw());
        assert_eq!(doc.labels().count(), 0);
        assert_eq!(doc.to_bytes().unwrap(), data);
    }

    // a string that runs on into the array
    let mut data = b"ab".to_vec();
    ExpansionHeader::new(7, 0).encode(&mut data).unwrap();
    let mut doc = Document::from_bytes(data);
    assert!(matches!(
        doc.expand_header_array(2, 1),
        Err(Error::Decode { .. })
    ));
    assert_eq!(doc.iter().count(), 1);
}

use gae_core::{Error, KeyOf, OrderedMap};

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    key: String,
    value: u32,
}

impl KeyOf for Slot {
    type Key = String;
    fn key(&self) -> &String {
        &self.key
    }
}

fn slot(key: &str, value: u32) -> Slot {
    Slot {
        key: key.to_string(),
        value,
    }
}

fn keys(map: &OrderedMap<Slot>) -> Vec<&str> {
    map.iter().map(|s| s.key.as_str()).collect()
}

#[test]
fn keeps_insertion_order_not_key_order() {
    let mut map = OrderedMap::new();
    for (k, v) in [("c", 1), ("a", 2), ("b", 3)] {
        assert!(map.push_back(slot(k, v)).1);
    }
    assert_eq!(map.insert(1, slot("d", 4)).unwrap(), (1, true));
    assert_eq!(keys(&map), ["c", "d", "a", "b"]);
    assert_eq!(map.nth(2).unwrap().value, 2);

    let (i, s) = map.find("b").unwrap();
    assert_eq!((i, s.value), (3, 3));
    assert_eq!(map.index_of(&slot("a", 0)), Some(2));
    assert!(map.find("zz").is_none());
}

#[test]
fn duplicate_keys_are_rejected() {
    let mut map = OrderedMap::new();
    map.push_back(slot("a", 1));
    map.push_back(slot("b", 2));
    assert_eq!(map.push_back(slot("a", 9)), (0, false));
    assert_eq!(map.insert(0, slot("b", 9)).unwrap(), (1, false));
    assert_eq!(map.len(), 2);
    assert_eq!(map.find("a").unwrap().1.value, 1);
}

#[test]
fn erase_shifts_positions() {
    let mut map = OrderedMap::new();
    for (i, k) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
        map.push_back(slot(k, i as u32));
    }
    assert_eq!(map.erase(0).unwrap().key, "a");
    assert_eq!(map.find("c").unwrap().0, 1);

    let removed = map.erase_range(1..3).unwrap();
    assert_eq!(removed, [slot("c", 2), slot("d", 3)]);
    assert_eq!(keys(&map), ["b", "e"]);
    assert_eq!(map.find("e").unwrap().0, 1);
    assert!(!map.contains_key("c"));

    // a removed key can come back
    map.insert(0, slot("c", 7)).unwrap();
    assert_eq!(keys(&map), ["c", "b", "e"]);
    assert_eq!(map.find("b").unwrap().0, 1);
}

#[test]
fn out_of_range_positions_fail() {
    let mut map: OrderedMap<Slot> = OrderedMap::new();
    map.push_back(slot("a", 1));
    assert!(matches!(
        map.insert(2, slot("b", 2)),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(map.erase(1), Err(Error::InvalidOperation(_))));
    assert!(matches!(
        map.erase_range(0..2),
        Err(Error::InvalidOperation(_))
    ));
    assert!(map.erase_range(1..1).unwrap().is_empty());
    assert_eq!(map.len(), 1);
}

#[test]
fn find_mut_edits_in_place() {
    let mut map = OrderedMap::new();
    map.push_back(slot("a", 1));
    map.find_mut("a").unwrap().1.value = 5;
    map.nth_mut(0).unwrap().value += 1;
    assert_eq!(map.as_slice(), [slot("a", 6)]);
}

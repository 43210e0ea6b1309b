use byteorder::{ByteOrder, LittleEndian};
use gae_core::source::Record;
use gae_core::{Error, Source};

#[derive(Debug, PartialEq)]
struct Pair {
    a: u16,
    b: u16,
}

impl Record for Pair {
    const SIZE: usize = 4;

    fn decode(buf: &[u8]) -> gae_core::Result<Self> {
        Ok(Pair {
            a: LittleEndian::read_u16(&buf[0..2]),
            b: LittleEndian::read_u16(&buf[2..4]),
        })
    }

    fn encode(&self, out: &mut Vec<u8>) -> gae_core::Result<()> {
        out.extend_from_slice(&self.a.to_le_bytes());
        out.extend_from_slice(&self.b.to_le_bytes());
        Ok(())
    }
}

fn bytes() -> Source {
    Source::from_vec((0u8..16).collect())
}

fn is_bounds(r: gae_core::Result<impl Sized>, offset: u64, len: u64, size: u64) -> bool {
    matches!(r, Err(Error::Bounds { offset: o, len: l, size: s }) if (o, l, s) == (offset, len, size))
}

#[test]
fn read_at_stops_at_end() {
    let src = bytes();
    assert_eq!(src.read_at(12, 4).unwrap(), [12, 13, 14, 15]);
    assert!(src.read_at(16, 0).unwrap().is_empty());
    assert!(is_bounds(src.read_at(13, 4), 13, 4, 16));
    assert!(is_bounds(src.read_at(17, 0), 17, 0, 16));
    assert!(matches!(src.read_at(u64::MAX, 2), Err(Error::Bounds { .. })));

    assert_eq!(src.read_struct_at::<Pair>(12).unwrap(), Pair { a: 0x0d0c, b: 0x0f0e });
    assert!(is_bounds(src.read_struct_at::<Pair>(13), 13, 4, 16));
}

#[test]
fn cursor_reads_and_seeks() {
    let mut src = bytes();
    assert_eq!(src.read(3).unwrap(), [0, 1, 2]);
    assert_eq!(src.tell(), 3);
    src.seek(12).unwrap();
    assert_eq!(src.read_struct::<Pair>().unwrap(), Pair { a: 0x0d0c, b: 0x0f0e });
    assert_eq!(src.tell(), 16);
    assert!(is_bounds(src.read(1), 16, 1, 16));
    // a failed read leaves the cursor alone
    assert_eq!(src.tell(), 16);

    src.seek(16).unwrap();
    assert!(is_bounds(src.seek(17), 17, 0, 16));
    assert_eq!(src.tell(), 16);
}

#[test]
fn slice_is_its_own_window() {
    let mut sub = bytes().slice(4, 8).unwrap();
    assert_eq!(sub.size(), 8);
    assert_eq!(sub.as_bytes(), [4, 5, 6, 7, 8, 9, 10, 11]);

    sub.seek(6).unwrap();
    assert_eq!(sub.read(2).unwrap(), [10, 11]);
    assert!(is_bounds(sub.read(1), 8, 1, 8));
    sub.seek(5).unwrap();
    assert!(is_bounds(sub.read_struct::<Pair>(), 5, 4, 8));
    assert!(is_bounds(sub.read_at(7, 2), 7, 2, 8));

    assert!(matches!(bytes().slice(10, 7), Err(Error::Bounds { .. })));
    let nested = sub.slice(2, 2).unwrap();
    assert_eq!(nested.as_bytes(), [6, 7]);
}

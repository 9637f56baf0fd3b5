use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use log::warn;

use crate::datetime::FatDateTime;
use crate::disk::ReadAt;
use crate::dot::DotTable;
use crate::error::ChainError;
use crate::fat::ChainWalker;
use crate::geometry::Geometry;

/// Size of one directory record on disk.
pub const DIR_ENTRY_SIZE: usize = 64;

/// Longest representable filename.
pub const MAX_NAME_LEN: usize = 42;

const NAME_FREE: u8 = 0x00;
const NAME_TERMINAL: u8 = 0xff;
pub(crate) const NAME_DELETED: u8 = 0xe5;

bitflags! {
    /// Attribute byte of a directory record.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

/// Filter deciding whether recovered name bytes look like a real entry.
///
/// This check is the only signal separating a deleted-but-recoverable record
/// from random cluster content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NamePolicy {
    /// Printable ASCII only (0x20..=0x7E).
    #[default]
    PrintableAscii,
    /// Accept any byte; for hunting names in mangled directories.
    AnyByte,
}

impl NamePolicy {
    pub fn accepts(self, name: &[u8]) -> bool {
        match self {
            NamePolicy::PrintableAscii => name.iter().all(|&b| (0x20..=0x7e).contains(&b)),
            NamePolicy::AnyByte => true,
        }
    }
}

/// One decoded directory record.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    /// Raw length byte; values outside 1..=42 mark deleted or mangled slots.
    pub name_len: u8,
    pub attributes: Attributes,
    /// First cluster of the contents; 0 and 1 both mean the root.
    pub start_cluster: u32,
    /// Declared byte size, always 0 for directories.
    pub size: u32,
    pub created: FatDateTime,
    pub accessed: FatDateTime,
    pub updated: FatDateTime,
    /// False for deleted and mangled slots.
    pub allocated: bool,
    /// Directory cluster this record lives in.
    pub cluster: u32,
    /// Record index within that cluster.
    pub slot: u32,
}

impl DirEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }
}

/// What a 64-byte slot turned out to hold.
pub(crate) enum Slot {
    /// 0x00 (never used) or 0xFF (terminal): nothing here.
    Free,
    Entry(DirEntry),
    /// A byte pattern no real record can have; the rest of the cluster is
    /// untrusted.
    Invalid,
}

/// Decode one 64-byte record. A length byte of 1..=42 is a live entry; 0xE5
/// is deleted; anything else (other than the free markers) is mangled and
/// treated as deleted with the name recovered by scanning up to the first
/// pad byte.
pub(crate) fn decode_record(raw: &[u8], cluster: u32, slot: u32, policy: NamePolicy) -> Slot {
    let name_len = raw[0];
    if name_len == NAME_FREE || name_len == NAME_TERMINAL {
        return Slot::Free;
    }

    let allocated = name_len != NAME_DELETED && name_len as usize <= MAX_NAME_LEN;
    let name_area = &raw[2..2 + MAX_NAME_LEN];
    let name_bytes = if allocated {
        &name_area[..name_len as usize]
    } else {
        let end = name_area
            .iter()
            .position(|&b| b == 0x00 || b == 0xff)
            .unwrap_or(MAX_NAME_LEN);
        &name_area[..end]
    };
    if !policy.accepts(name_bytes) {
        return Slot::Invalid;
    }

    Slot::Entry(DirEntry {
        name: String::from_utf8_lossy(name_bytes).into_owned(),
        name_len,
        attributes: Attributes::from_bits_retain(raw[1]),
        start_cluster: BigEndian::read_u32(&raw[44..48]),
        size: BigEndian::read_u32(&raw[48..52]),
        created: FatDateTime::decode(
            BigEndian::read_u16(&raw[52..54]),
            BigEndian::read_u16(&raw[54..56]),
        ),
        accessed: FatDateTime::decode(
            BigEndian::read_u16(&raw[56..58]),
            BigEndian::read_u16(&raw[58..60]),
        ),
        updated: FatDateTime::decode(
            BigEndian::read_u16(&raw[60..62]),
            BigEndian::read_u16(&raw[62..64]),
        ),
        allocated,
        cluster,
        slot,
    })
}

/// Decode every record of the directory starting at `start_cluster`, in
/// physical order (cluster order, then slot order). Live subdirectories are
/// reported to the parent-pointer table. An invalid record stops the scan of
/// its cluster; later clusters of the chain are still read.
pub(crate) fn read_directory<D: ReadAt + ?Sized>(
    image: &D,
    geometry: &Geometry,
    start_cluster: u32,
    policy: NamePolicy,
    dot: &mut DotTable,
) -> Result<Vec<DirEntry>, ChainError> {
    let start_cluster = start_cluster.max(1);
    let cluster_bytes = geometry.cluster_bytes() as usize;
    let records = cluster_bytes / DIR_ENTRY_SIZE;
    let mut entries = Vec::new();
    let mut buf = vec![0u8; cluster_bytes];

    for cluster in ChainWalker::new(image, geometry, start_cluster) {
        let cluster = cluster?;
        let sector = geometry.cluster_sector(cluster);
        image.read_exact_at(geometry.sector_offset(sector), &mut buf)?;

        for slot in 0..records {
            let raw = &buf[slot * DIR_ENTRY_SIZE..(slot + 1) * DIR_ENTRY_SIZE];
            match decode_record(raw, cluster, slot as u32, policy) {
                Slot::Free => continue,
                Slot::Invalid => {
                    warn!(
                        "invalid record at cluster {cluster} slot {slot}; \
                         rest of the cluster untrusted"
                    );
                    break;
                }
                Slot::Entry(entry) => {
                    if entry.allocated && entry.is_directory() {
                        dot.insert(entry.start_cluster.max(1), start_cluster, true);
                    }
                    entries.push(entry);
                }
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimg::{TestImage, raw_entry};

    fn empty_dot() -> DotTable {
        DotTable::new(8192, 2 * 1024 * 1024)
    }

    #[test]
    fn live_entry_round_trip() {
        let raw = raw_entry(b"Content", Attributes::DIRECTORY.bits(), 5, 0);
        let Slot::Entry(entry) = decode_record(&raw, 1, 3, NamePolicy::default()) else {
            panic!("expected an entry");
        };
        assert_eq!(entry.name, "Content");
        assert_eq!(entry.name_len, 7);
        assert!(entry.allocated);
        assert!(entry.is_directory());
        assert_eq!(entry.start_cluster, 5);
        assert_eq!(entry.size, 0);
        assert_eq!((entry.cluster, entry.slot), (1, 3));
        assert_eq!(entry.created.year, 2008);
    }

    #[test]
    fn deleted_entry_name_is_recovered() {
        let mut raw = raw_entry(b"save.dat", Attributes::ARCHIVE.bits(), 9, 4096);
        raw[0] = NAME_DELETED;
        let Slot::Entry(entry) = decode_record(&raw, 2, 0, NamePolicy::default()) else {
            panic!("expected an entry");
        };
        assert_eq!(entry.name, "save.dat");
        assert_eq!(entry.name_len, NAME_DELETED);
        assert!(!entry.allocated);
    }

    #[test]
    fn mangled_length_is_treated_as_deleted() {
        let mut raw = raw_entry(b"leftover", 0, 9, 100);
        raw[0] = 0x41; // longer than any name can be
        let Slot::Entry(entry) = decode_record(&raw, 2, 0, NamePolicy::default()) else {
            panic!("expected an entry");
        };
        assert_eq!(entry.name, "leftover");
        assert!(!entry.allocated);
    }

    #[test]
    fn unprintable_name_is_invalid_unless_policy_allows() {
        let mut raw = raw_entry(b"ok", 0, 9, 100);
        raw[0] = 0x41;
        raw[3] = 0x01;
        assert!(matches!(
            decode_record(&raw, 1, 0, NamePolicy::PrintableAscii),
            Slot::Invalid
        ));
        assert!(matches!(
            decode_record(&raw, 1, 0, NamePolicy::AnyByte),
            Slot::Entry(_)
        ));
    }

    #[test]
    fn free_markers_are_skipped() {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        assert!(matches!(decode_record(&raw, 1, 0, NamePolicy::default()), Slot::Free));
        raw[0] = NAME_TERMINAL;
        assert!(matches!(decode_record(&raw, 1, 0, NamePolicy::default()), Slot::Free));
    }

    #[test]
    fn invalid_record_stops_its_cluster_only() {
        let mut img = TestImage::new(2 * 1024 * 1024, 16);
        // directory spanning clusters 2 and 3
        img.chain16(&[2, 3]);
        let mut bad = raw_entry(b"x", 0, 4, 0);
        bad[0] = 0x41;
        bad[3] = 0x01;
        img.put_entry(2, 0, &bad);
        img.put_entry(2, 1, &raw_entry(b"shadowed", 0, 5, 10));
        img.put_entry(3, 0, &raw_entry(b"survivor", 0, 6, 10));
        img.set_fat16(5, 0xffff);
        img.set_fat16(6, 0xffff);

        let geometry = img.geometry();
        let mut dot = empty_dot();
        let entries =
            read_directory(&img.buf[..], &geometry, 2, NamePolicy::default(), &mut dot).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["survivor"]);
    }

    #[test]
    fn live_subdirectories_feed_the_dot_table() {
        let mut img = TestImage::new(2 * 1024 * 1024, 16);
        img.put_entry(1, 0, &raw_entry(b"sub", Attributes::DIRECTORY.bits(), 6, 0));
        let mut gone = raw_entry(b"gone", Attributes::DIRECTORY.bits(), 7, 0);
        gone[0] = NAME_DELETED;
        img.put_entry(1, 1, &gone);
        img.set_fat16(6, 0xffff);

        let geometry = img.geometry();
        let mut dot = empty_dot();
        let entries =
            read_directory(&img.buf[..], &geometry, 1, NamePolicy::default(), &mut dot).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(dot.lookup(6), Some(1));
        // deleted directories are listed but never recorded
        assert_eq!(dot.lookup(7), None);
    }
}

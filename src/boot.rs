use byteorder::{BigEndian, ByteOrder};

use crate::SECTOR_SIZE;
use crate::disk::ReadAt;
use crate::error::{AttachError, GeometryDefect};

/// Magic bytes at the start of every XTAF partition.
pub const XTAF_MAGIC: [u8; 4] = *b"XTAF";

/// Bytes of boot-record fields actually present on disk.
pub(crate) const BOOT_RECORD_LEN: usize = 18;

/// The XTAF boot record.
///
/// Unlike a DOS BPB this is tiny: no sector size (fixed at 512), no FAT
/// length, no root location. Everything else is derived from the partition
/// size, see [`crate::geometry::Geometry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootRecord {
    /// Serial number assigned at format time.
    pub volume_id: u32,
    /// Allocation unit as a power-of-two count of 512-byte sectors.
    pub sectors_per_cluster: u32,
    /// Number of FAT copies; XTAF carries exactly one.
    pub fat_count: u32,
    /// Reserved field, zero on every volume observed.
    pub zero: u16,
}

impl BootRecord {
    /// Decode and validate the boot record at `partition_offset` bytes into
    /// the image. Fields are big-endian on disk and converted here,
    /// field-by-field.
    pub fn read<D: ReadAt + ?Sized>(
        image: &D,
        partition_offset: u64,
    ) -> Result<Self, AttachError> {
        let mut raw = [0u8; BOOT_RECORD_LEN];
        image.read_exact_at(partition_offset, &mut raw)?;

        let magic: [u8; 4] = raw[0..4].try_into().unwrap();
        if magic != XTAF_MAGIC {
            return Err(AttachError::BadMagic(magic));
        }

        let record = BootRecord {
            volume_id: BigEndian::read_u32(&raw[4..8]),
            sectors_per_cluster: BigEndian::read_u32(&raw[8..12]),
            fat_count: BigEndian::read_u32(&raw[12..16]),
            zero: BigEndian::read_u16(&raw[16..18]),
        };

        if !record.sectors_per_cluster.is_power_of_two() {
            return Err(GeometryDefect::SectorsPerCluster(record.sectors_per_cluster).into());
        }
        if record.fat_count != 1 {
            return Err(GeometryDefect::FatCount(record.fat_count).into());
        }
        Ok(record)
    }

    pub fn cluster_bytes(&self) -> u64 {
        self.sectors_per_cluster as u64 * SECTOR_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_boot(magic: &[u8; 4], spc: u32, nfat: u32) -> [u8; BOOT_RECORD_LEN] {
        let mut raw = [0u8; BOOT_RECORD_LEN];
        raw[0..4].copy_from_slice(magic);
        BigEndian::write_u32(&mut raw[4..8], 0x1234_5678);
        BigEndian::write_u32(&mut raw[8..12], spc);
        BigEndian::write_u32(&mut raw[12..16], nfat);
        raw
    }

    #[test]
    fn decodes_valid_record() {
        let raw = raw_boot(b"XTAF", 0x20, 1);
        let record = BootRecord::read(&raw[..], 0).unwrap();
        assert_eq!(record.volume_id, 0x1234_5678);
        assert_eq!(record.sectors_per_cluster, 0x20);
        assert_eq!(record.fat_count, 1);
        assert_eq!(record.zero, 0);
        assert_eq!(record.cluster_bytes(), 0x20 * 512);
    }

    #[test]
    fn byte_reversed_magic_is_rejected() {
        let raw = raw_boot(b"FATX", 0x20, 1);
        assert!(matches!(
            BootRecord::read(&raw[..], 0),
            Err(AttachError::BadMagic(m)) if &m == b"FATX"
        ));
    }

    #[test]
    fn geometry_constraints_are_enforced() {
        let raw = raw_boot(b"XTAF", 0, 1);
        assert!(matches!(
            BootRecord::read(&raw[..], 0),
            Err(AttachError::BadGeometry(GeometryDefect::SectorsPerCluster(0)))
        ));

        let raw = raw_boot(b"XTAF", 3, 1);
        assert!(matches!(
            BootRecord::read(&raw[..], 0),
            Err(AttachError::BadGeometry(GeometryDefect::SectorsPerCluster(3)))
        ));

        let raw = raw_boot(b"XTAF", 0x20, 2);
        assert!(matches!(
            BootRecord::read(&raw[..], 0),
            Err(AttachError::BadGeometry(GeometryDefect::FatCount(2)))
        ));
    }

    #[test]
    fn short_image_is_an_io_error() {
        let raw = [0u8; 10];
        assert!(matches!(BootRecord::read(&raw[..], 0), Err(AttachError::Io(_))));
    }
}

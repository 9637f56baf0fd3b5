use checked_num::CheckedU64;
use log::{debug, info, warn};

use crate::SECTOR_SIZE;
use crate::boot::BootRecord;
use crate::disk::ReadAt;
use crate::error::{AttachError, GeometryDefect};
use crate::fat::{FAT16_MASK, FAT32_MASK};

/// First FAT sector within the partition.
pub const FAT_START_SECTOR: u32 = 8;

/// Bytes probed at the root-start candidate for the alignment quirk.
pub const QUIRK_BLOCK_LEN: usize = 4096;

/// The FAT is padded to this many bytes.
const FAT_ALIGN: u64 = 4096;

/// Volumes with at least this many clusters use 32-bit FAT cells.
const XTAF16_CLUSTER_LIMIT: u32 = 0xfff4;

/// Sizes of the console's native partitions, keyed by byte offset within the
/// image; the same table the Sleuth Kit uses for XTAF volume detection.
const KNOWN_LAYOUT: &[(u64, u64)] = &[
    (0x0008_0000, 2_147_483_648),
    (0x8008_0000, 2_348_810_240),
    (0x1_0c08_0000, 216_203_264),
    (0x1_18eb_0000, 134_217_728),
    (0x1_20eb_0000, 268_435_456),
];

/// Derived layout of an attached partition. Immutable once computed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Bytes into the backing image where the partition begins.
    pub image_offset: u64,
    /// Sensed length of the backing image in bytes.
    pub media_size: u64,
    /// Partition length in bytes, from the known layout table or the
    /// remaining media.
    pub partition_size: u64,
    pub sectors_per_cluster: u32,
    /// `0x0000FFFF` for XTAF16, `0x0FFFFFFF` for XTAF32.
    pub fat_mask: u32,
    /// Width of one FAT cell in bytes: 2 or 4.
    pub fat_width: u8,
    /// First FAT sector within the partition.
    pub fat_start: u32,
    /// FAT length in bytes, rounded up to 4096.
    pub fat_size: u64,
    pub fat_sectors: u32,
    /// First sector of the root directory, after the quirk correction.
    pub root_start: u32,
    /// First sector past the root directory cluster.
    pub first_data_sector: u32,
    /// Highest cluster index backed by the partition.
    pub max_cluster: u32,
    /// Cluster count implied by the partition size.
    pub cluster_count: u32,
}

impl Geometry {
    /// Derive the partition layout from the boot record, the partition's
    /// byte offset and the sensed media size.
    pub fn compute<D: ReadAt + ?Sized>(
        image: &D,
        boot: &BootRecord,
        image_offset: u64,
        media_size: u64,
    ) -> Result<Geometry, AttachError> {
        if media_size == 0 {
            return Err(GeometryDefect::EmptyMedia.into());
        }
        let partition_size = partition_size_for(image_offset, media_size);
        let cluster_count =
            u32::try_from(partition_size / boot.cluster_bytes()).unwrap_or(u32::MAX);
        if cluster_count == 0 {
            return Err(GeometryDefect::NoClusters.into());
        }

        let (fat_mask, fat_width) = if cluster_count >= XTAF16_CLUSTER_LIMIT {
            (FAT32_MASK, 4u8)
        } else {
            (FAT16_MASK, 2u8)
        };
        let fat_size = (cluster_count as u64 * fat_width as u64).next_multiple_of(FAT_ALIGN);
        let fat_sectors = (fat_size / SECTOR_SIZE) as u32;
        let mut root_start = FAT_START_SECTOR + fat_sectors;
        debug!("root start candidate: sector {root_start}");

        // hd alignment quirk: certain media shift the root eight sectors
        // further, and an all-zero block at the candidate is the tell
        let probe_offset = (CheckedU64::new(root_start as u64) * SECTOR_SIZE + image_offset)
            .ok_or(GeometryDefect::Bounds)?;
        let mut quirk_block = vec![0u8; QUIRK_BLOCK_LEN];
        image.read_exact_at(probe_offset, &mut quirk_block)?;
        if quirk_block.iter().all(|&b| b == 0) {
            root_start += 8;
            info!("all-zero block at root candidate; root shifted to sector {root_start}");
        }

        let first_data_sector = root_start + boot.sectors_per_cluster;
        let partition_sectors = partition_size / SECTOR_SIZE;
        let mut max_cluster = (partition_sectors.saturating_sub(first_data_sector as u64)
            / boot.sectors_per_cluster as u64) as u32
            + 1;
        if max_cluster >= cluster_count {
            warn!(
                "cluster span {} exceeds FAT capacity {}, clamping",
                max_cluster + 1,
                cluster_count
            );
            max_cluster = cluster_count - 1;
        }

        Ok(Geometry {
            image_offset,
            media_size,
            partition_size,
            sectors_per_cluster: boot.sectors_per_cluster,
            fat_mask,
            fat_width,
            fat_start: FAT_START_SECTOR,
            fat_size,
            fat_sectors,
            root_start,
            first_data_sector,
            max_cluster,
            cluster_count,
        })
    }

    pub fn cluster_bytes(&self) -> u64 {
        self.sectors_per_cluster as u64 * SECTOR_SIZE
    }

    /// First data sector of `cluster`. Clusters 0 and 1 both mean the root.
    pub fn cluster_sector(&self, cluster: u32) -> u32 {
        self.root_start + (cluster.max(1) - 1) * self.sectors_per_cluster
    }

    /// Inverse of [`Geometry::cluster_sector`].
    pub fn sector_to_cluster(&self, sector: u32) -> u32 {
        (sector - self.root_start) / self.sectors_per_cluster + 1
    }

    /// Absolute byte offset of a partition sector within the image.
    pub fn sector_offset(&self, sector: u32) -> u64 {
        self.image_offset + sector as u64 * SECTOR_SIZE
    }

    /// Absolute byte offset of the FAT cell describing `cluster`.
    pub(crate) fn fat_cell_offset(&self, cluster: u32) -> u64 {
        self.image_offset
            + self.fat_start as u64 * SECTOR_SIZE
            + cluster as u64 * self.fat_width as u64
    }
}

/// Partition size for a given byte offset. Offset 0 spans the whole media;
/// offsets outside the known console layout fall back to the remaining media.
pub(crate) fn partition_size_for(image_offset: u64, media_size: u64) -> u64 {
    if image_offset == 0 {
        return media_size;
    }
    if let Some(&(_, size)) = KNOWN_LAYOUT.iter().find(|&&(offset, _)| offset == image_offset) {
        return size;
    }
    warn!("unknown partition offset {image_offset:#x}; defaulting to the remaining media size");
    media_size.saturating_sub(image_offset)
}

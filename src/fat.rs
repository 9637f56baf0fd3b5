use log::warn;

use crate::SECTOR_SIZE;
use crate::disk::{ReadAt, read_u16_be, read_u32_be};
use crate::error::ChainError;
use crate::geometry::Geometry;

pub(crate) const FAT16_MASK: u32 = 0x0000_ffff;
pub(crate) const FAT32_MASK: u32 = 0x0fff_ffff;

/// Classification of one FAT cell after byte swap and masking.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FatCell {
    Free,
    Reserved,
    Bad,
    EndOfChain,
    /// Index of the next cluster in the chain.
    Next(u32),
}

impl FatCell {
    pub fn classify(raw: u32, mask: u32) -> FatCell {
        let value = raw & mask;
        if value == 0 {
            FatCell::Free
        } else if value == 1 || (value >= (0xffff_fff0 & mask) && value <= (0xffff_fff6 & mask)) {
            FatCell::Reserved
        } else if value == (0xffff_fff7 & mask) {
            FatCell::Bad
        } else if value >= (0xffff_fff8 & mask) {
            FatCell::EndOfChain
        } else {
            FatCell::Next(value)
        }
    }
}

/// Lazily follows a cluster chain, yielding cluster indices in on-disk order.
///
/// The starting cluster is yielded before the FAT is consulted, matching the
/// on-disk convention that a directory entry's start cluster is the first
/// link. Clusters 0 and 1 both denote the root. Terminal cells and pointers
/// past the highest backed cluster end the sequence.
pub(crate) struct ChainWalker<'a, D: ReadAt + ?Sized> {
    image: &'a D,
    geometry: &'a Geometry,
    state: WalkState,
}

enum WalkState {
    Yield(u32),
    Advance(u32),
    Done,
}

impl<'a, D: ReadAt + ?Sized> ChainWalker<'a, D> {
    pub(crate) fn new(image: &'a D, geometry: &'a Geometry, start: u32) -> Self {
        let start = start.max(1);
        let state = if start > geometry.max_cluster && start != 1 {
            warn!(
                "chain starts at out-of-range cluster {start} (max {})",
                geometry.max_cluster
            );
            WalkState::Done
        } else {
            WalkState::Yield(start)
        };
        ChainWalker { image, geometry, state }
    }

    fn read_cell(&self, cluster: u32) -> Result<u32, ChainError> {
        let offset = self.geometry.fat_cell_offset(cluster);
        Ok(match self.geometry.fat_width {
            2 => read_u16_be(self.image, offset)? as u32,
            _ => read_u32_be(self.image, offset)?,
        })
    }
}

impl<D: ReadAt + ?Sized> Iterator for ChainWalker<'_, D> {
    type Item = Result<u32, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                WalkState::Yield(cluster) => {
                    self.state = WalkState::Advance(cluster);
                    return Some(Ok(cluster));
                }
                WalkState::Advance(cluster) => {
                    let raw = match self.read_cell(cluster) {
                        Ok(raw) => raw,
                        Err(e) => {
                            self.state = WalkState::Done;
                            return Some(Err(e));
                        }
                    };
                    self.state = match FatCell::classify(raw, self.geometry.fat_mask) {
                        FatCell::Next(next) if next <= self.geometry.max_cluster => {
                            WalkState::Yield(next)
                        }
                        FatCell::Next(next) => {
                            warn!(
                                "FAT cell for cluster {cluster} points past the partition \
                                 (cluster {next}); chain truncated"
                            );
                            WalkState::Done
                        }
                        _ => WalkState::Done,
                    };
                }
                WalkState::Done => return None,
            }
        }
    }
}

/// Chain of a directory. The FAT alone decides the length; directory records
/// declare size 0.
pub(crate) fn directory_chain<D: ReadAt + ?Sized>(
    image: &D,
    geometry: &Geometry,
    start: u32,
) -> Result<Vec<u32>, ChainError> {
    ChainWalker::new(image, geometry, start).collect()
}

/// Chain of a regular file: must hold exactly the clusters its declared size
/// needs. A zero-size file occupies no clusters at all.
pub(crate) fn file_chain<D: ReadAt + ?Sized>(
    image: &D,
    geometry: &Geometry,
    start: u32,
    size: u64,
) -> Result<Vec<u32>, ChainError> {
    let expected = size.div_ceil(geometry.cluster_bytes());
    if expected == 0 {
        return Ok(Vec::new());
    }
    let chain = directory_chain(image, geometry, start)?;
    if chain.len() as u64 != expected {
        return Err(ChainError::ChainTooShort {
            expected,
            actual: chain.len() as u64,
            size,
        });
    }
    Ok(chain)
}

/// A contiguous range of image bytes backing a contiguous range of file
/// bytes; one per cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRun {
    pub cluster: u32,
    /// Accumulated file bytes before this run.
    pub file_offset: u64,
    /// Byte offset within the partition.
    pub fs_offset: u64,
    /// Absolute byte offset within the backing image.
    pub img_offset: u64,
    pub len: u64,
}

/// Byte runs for `size` bytes spread over `chain`. The last run is truncated
/// so the runs sum to `size`; the returned total falls short of `size` when
/// the chain does.
pub(crate) fn byte_runs(geometry: &Geometry, chain: &[u32], size: u64) -> (Vec<ByteRun>, u64) {
    let cluster_bytes = geometry.cluster_bytes();
    let mut runs = Vec::with_capacity(chain.len());
    let mut accounted = 0u64;
    for &cluster in chain {
        if accounted >= size {
            break;
        }
        let len = cluster_bytes.min(size - accounted);
        let sector = geometry.cluster_sector(cluster);
        runs.push(ByteRun {
            cluster,
            file_offset: accounted,
            fs_offset: sector as u64 * SECTOR_SIZE,
            img_offset: geometry.sector_offset(sector),
            len,
        });
        accounted += len;
    }
    (runs, accounted)
}

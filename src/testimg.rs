//! Synthetic XTAF16 partitions for tests: 512-byte sectors, FAT at sector 8,
//! root at sector 16 (the FAT of every image built here pads to 4096 bytes).

use std::io::Write;

use byteorder::{BigEndian, ByteOrder};

use crate::boot::BootRecord;
use crate::dir::DIR_ENTRY_SIZE;
use crate::geometry::Geometry;

const FAT_OFFSET: usize = 4096;
const ROOT_START: u32 = 16;

pub(crate) struct TestImage {
    pub(crate) buf: Vec<u8>,
    spc: u32,
}

impl TestImage {
    pub(crate) fn new(partition_bytes: usize, spc: u32) -> Self {
        let mut img = Self::new_quirky(partition_bytes, spc);
        // a terminal marker keeps the root's quirk block nonzero
        let root = img.cluster_offset(1);
        img.buf[root] = 0xff;
        img
    }

    /// Image whose root candidate block is all zero, so geometry applies the
    /// eight-sector shift.
    pub(crate) fn new_quirky(partition_bytes: usize, spc: u32) -> Self {
        let mut buf = vec![0u8; partition_bytes];
        buf[0..4].copy_from_slice(b"XTAF");
        BigEndian::write_u32(&mut buf[4..8], 0xcafe_f00d);
        BigEndian::write_u32(&mut buf[8..12], spc);
        BigEndian::write_u32(&mut buf[12..16], 1);
        let mut img = TestImage { buf, spc };
        img.set_fat16(0, 0xfff8);
        img.set_fat16(1, 0xffff);
        img
    }

    pub(crate) fn geometry(&self) -> Geometry {
        let boot = BootRecord::read(&self.buf[..], 0).unwrap();
        let media = self.buf.len() as u64;
        Geometry::compute(&self.buf[..], &boot, 0, media).unwrap()
    }

    pub(crate) fn set_fat16(&mut self, cluster: u32, value: u16) {
        let offset = FAT_OFFSET + cluster as usize * 2;
        BigEndian::write_u16(&mut self.buf[offset..offset + 2], value);
    }

    /// Link the given clusters into one chain ending in end-of-chain.
    pub(crate) fn chain16(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set_fat16(pair[0], pair[1] as u16);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat16(last, 0xffff);
        }
    }

    pub(crate) fn cluster_offset(&self, cluster: u32) -> usize {
        ((ROOT_START + (cluster.max(1) - 1) * self.spc) * 512) as usize
    }

    pub(crate) fn put_entry(&mut self, cluster: u32, slot: usize, raw: &[u8; DIR_ENTRY_SIZE]) {
        let offset = self.cluster_offset(cluster) + slot * DIR_ENTRY_SIZE;
        self.buf[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(raw);
    }

    pub(crate) fn write_cluster(&mut self, cluster: u32, data: &[u8]) {
        let offset = self.cluster_offset(cluster);
        self.buf[offset..offset + data.len()].copy_from_slice(data);
    }

    pub(crate) fn to_temp_file(&self) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&self.buf).unwrap();
        file.flush().unwrap();
        file
    }
}

/// A live record with fixed timestamps (2008-03-04 05:06:08).
pub(crate) fn raw_entry(name: &[u8], attr: u8, start: u32, size: u32) -> [u8; DIR_ENTRY_SIZE] {
    assert!(name.len() <= 42);
    let mut raw = [0u8; DIR_ENTRY_SIZE];
    raw[0] = name.len() as u8;
    raw[1] = attr;
    raw[2..44].fill(0xff);
    raw[2..2 + name.len()].copy_from_slice(name);
    BigEndian::write_u32(&mut raw[44..48], start);
    BigEndian::write_u32(&mut raw[48..52], size);
    let date = ((2008u16 - 1980) << 9) | (3 << 5) | 4;
    let time = (5u16 << 11) | (6 << 5) | (8 >> 1);
    for field in 0..3 {
        BigEndian::write_u16(&mut raw[52 + field * 4..54 + field * 4], date);
        BigEndian::write_u16(&mut raw[54 + field * 4..56 + field * 4], time);
    }
    raw
}

pub(crate) fn alpha_byte(i: usize) -> u8 {
    (i % 251) as u8
}

pub(crate) fn beta_byte(i: usize) -> u8 {
    ((i * 7) % 253) as u8
}

/// 2 MiB partition, 16 sectors (8192 bytes) per cluster:
///
/// ```text
/// /alpha.bin   7000 bytes, cluster 2
/// /beta.bin    20000 bytes, clusters 3-4-5
/// /sub/        cluster 6
/// /sub/gamma.txt  10 bytes, cluster 7
/// /old.bin     deleted, 100 bytes, cluster 8 (freed)
/// /empty.bin   0 bytes
/// ```
pub(crate) fn sample_image() -> TestImage {
    use crate::dir::Attributes;

    let mut img = TestImage::new(2 * 1024 * 1024, 16);

    img.put_entry(1, 0, &raw_entry(b"alpha.bin", Attributes::ARCHIVE.bits(), 2, 7000));
    img.put_entry(1, 1, &raw_entry(b"beta.bin", Attributes::ARCHIVE.bits(), 3, 20000));
    img.put_entry(1, 2, &raw_entry(b"sub", Attributes::DIRECTORY.bits(), 6, 0));
    let mut deleted = raw_entry(b"old.bin", Attributes::ARCHIVE.bits(), 8, 100);
    deleted[0] = 0xe5;
    img.put_entry(1, 3, &deleted);
    img.put_entry(1, 4, &raw_entry(b"empty.bin", Attributes::ARCHIVE.bits(), 0, 0));

    img.set_fat16(2, 0xffff);
    img.chain16(&[3, 4, 5]);
    img.set_fat16(6, 0xffff);
    img.set_fat16(7, 0xffff);

    let alpha: Vec<u8> = (0..7000).map(alpha_byte).collect();
    img.write_cluster(2, &alpha);
    let beta: Vec<u8> = (0..20000).map(beta_byte).collect();
    for (index, chunk) in beta.chunks(8192).enumerate() {
        img.write_cluster(3 + index as u32, chunk);
    }

    img.put_entry(6, 0, &raw_entry(b"gamma.txt", Attributes::ARCHIVE.bits(), 7, 10));
    img.write_cluster(7, b"0123456789");

    img
}

use std::fs::File;
use std::io::Write;

use log::{debug, warn};

use crate::SECTOR_SIZE;
use crate::dir::{self, DirEntry};
use crate::disk::ReadAt;
use crate::error::XtafError;
use crate::fat::{self, FAT16_MASK, FAT32_MASK};
use crate::geometry::Geometry;
use crate::session::Session;

/// Write a DFXML document describing every entry reachable from the working
/// directory.
///
/// The traversal is depth-first in physical order, so identical inputs yield
/// byte-identical documents. Byte-run discrepancies are annotated inline and
/// on the diagnostic channel; they never abort the export.
pub fn write_dfxml<W: Write>(
    session: &mut Session,
    out: &mut W,
    command_line: &str,
) -> Result<(), XtafError> {
    writeln!(out, "<?xml version='1.0' encoding='UTF-8'?>")?;
    writeln!(out, "<dfxml xmloutputversion='1.0'>")?;
    writeln!(out, "  <creator version='1.0'>")?;
    writeln!(out, "    <program>{}</program>", env!("CARGO_PKG_NAME"))?;
    writeln!(out, "    <version>{}</version>", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "    <source>{}</source>", escape(&session.image.display().to_string()))?;
    writeln!(out, "    <command_line>{}</command_line>", escape(command_line))?;
    writeln!(out, "  </creator>")?;
    writeln!(out, "  <sectorsize>{SECTOR_SIZE}</sectorsize>")?;

    let geometry = session.geometry.clone();
    writeln!(out, "  <volume offset=\"{}\">", geometry.image_offset)?;
    writeln!(out, "    <partition_offset>{}</partition_offset>", geometry.image_offset)?;
    writeln!(out, "    <block_size>{}</block_size>", geometry.cluster_bytes())?;
    let ftype = match geometry.fat_mask {
        FAT32_MASK => "XTAF32",
        FAT16_MASK => "XTAF16",
        _ => "XTAF",
    };
    writeln!(out, "    <ftype_str>{ftype}</ftype_str>")?;

    let image = File::open(&session.image)?;
    let saved = session.pwd_sector;
    let result = emit_tree(session, &image, out, "");
    session.pwd_sector = saved;
    result?;

    writeln!(out, "  </volume>")?;
    writeln!(out, "</dfxml>")?;
    Ok(())
}

/// Emit the working directory's entries, recursing into live subdirectories.
/// The working directory is moved for each descent and restored afterwards.
fn emit_tree<W: Write, D: ReadAt + ?Sized>(
    session: &mut Session,
    image: &D,
    out: &mut W,
    dir_path: &str,
) -> Result<(), XtafError> {
    let geometry = session.geometry.clone();
    let dir_cluster = session.pwd_cluster();
    debug!("dfxml: directory at cluster {dir_cluster} ({dir_path:?})");

    let entries =
        dir::read_directory(image, &geometry, dir_cluster, session.name_policy, &mut session.dot)?;
    for entry in &entries {
        let full_path = if dir_path.is_empty() {
            entry.name.clone()
        } else {
            format!("{dir_path}/{}", entry.name)
        };
        emit_fileobject(image, &geometry, out, entry, &full_path)?;

        if entry.allocated && entry.is_directory() {
            let saved = session.pwd_sector;
            session.pwd_sector = geometry.cluster_sector(entry.start_cluster);
            let result = emit_tree(session, image, out, &full_path);
            session.pwd_sector = saved;
            result?;
        }
    }
    Ok(())
}

fn emit_fileobject<W: Write, D: ReadAt + ?Sized>(
    image: &D,
    geometry: &Geometry,
    out: &mut W,
    entry: &DirEntry,
    full_path: &str,
) -> Result<(), XtafError> {
    writeln!(out, "    <fileobject>")?;
    writeln!(out, "      <filename>{}</filename>", escape(full_path))?;
    writeln!(out, "      <xtaf:filenamelength>{}</xtaf:filenamelength>", entry.name_len)?;
    let name_type = if entry.is_directory() { "d" } else { "r" };
    writeln!(out, "      <name_type>{name_type}</name_type>")?;

    // directory records declare size 0; the chain says what they really hold
    let (chain, size) = if entry.is_directory() {
        let chain = fat::directory_chain(image, geometry, entry.start_cluster)?;
        let size = chain.len() as u64 * geometry.cluster_bytes();
        (chain, size)
    } else if entry.size == 0 {
        (Vec::new(), 0)
    } else {
        (fat::directory_chain(image, geometry, entry.start_cluster)?, entry.size as u64)
    };

    writeln!(out, "      <filesize>{size}</filesize>")?;
    writeln!(out, "      <alloc>{}</alloc>", if entry.allocated { 1 } else { 0 })?;
    writeln!(out, "      <crtime>{}</crtime>", entry.created.iso8601())?;
    writeln!(out, "      <atime>{}</atime>", entry.accessed.iso8601())?;
    writeln!(out, "      <mtime>{}</mtime>", entry.updated.iso8601())?;
    writeln!(out, "      <st_ino>{}</st_ino>", inode(entry.cluster, entry.slot))?;

    let (runs, accounted) = fat::byte_runs(geometry, &chain, size);
    writeln!(out, "      <byte_runs>")?;
    for run in &runs {
        writeln!(
            out,
            "        <byte_run file_offset='{}' fs_offset='{}' img_offset='{}' len='{}'/>",
            run.file_offset, run.fs_offset, run.img_offset, run.len
        )?;
    }
    if accounted != size {
        let missing = size - accounted;
        writeln!(
            out,
            "        <!-- Warning: FAT chain ended with {missing} bytes unaccounted for. -->"
        )?;
        warn!("FAT chain for {full_path} ended with {missing} bytes unaccounted for");
    }
    writeln!(out, "      </byte_runs>")?;
    writeln!(out, "    </fileobject>")?;
    Ok(())
}

/// Inode synthesized from the slot's physical position; the constants match
/// the fiwalk numbering for XTAF and stay fixed so other tools can
/// cross-reference.
fn inode(cluster: u32, slot: u32) -> u64 {
    let sector = (cluster as u64 - 1) * 32 + slot as u64 / 8;
    3 + 8 * sector + slot as u64 % 8
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

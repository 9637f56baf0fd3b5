use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use derive_builder::Builder;
use log::{debug, info, warn};

use crate::SECTOR_SIZE;
use crate::boot::BootRecord;
use crate::dir::{self, DirEntry, NamePolicy};
use crate::disk::ReadAt;
use crate::dot::DotTable;
use crate::error::{AttachError, GeometryDefect, ResolveError, SessionFileError, XtafError};
use crate::fat;
use crate::geometry::Geometry;
use crate::path::{self, Resolved};

/// Default sidecar file holding the attached session.
pub const DEFAULT_SESSION_FILE: &str = "./xtaf.info";

const SESSION_MAGIC: &[u8; 8] = b"XTAFSESS";
const SESSION_VERSION: u16 = 1;

/// How to attach to an image. The builder mirrors the command line.
#[derive(Builder, Clone, Debug)]
pub struct AttachOptions {
    /// Path of the backing image.
    pub image: PathBuf,
    /// Byte offset of the partition within the image. Defaults to 0.
    #[builder(default)]
    pub offset: u64,
    /// Filename acceptance policy. Defaults to printable ASCII.
    #[builder(default)]
    pub name_policy: NamePolicy,
}

/// An attached XTAF volume plus its traversal state.
///
/// The geometry is immutable after attach; operations only move the working
/// directory and grow the parent-pointer table. Every operation opens its own
/// read-only handle to the image and drops it on return, error paths
/// included.
#[derive(Clone, Debug)]
pub struct Session {
    pub image: PathBuf,
    pub boot: BootRecord,
    pub geometry: Geometry,
    /// Sector of the working directory.
    pub pwd_sector: u32,
    pub dot: DotTable,
    pub name_policy: NamePolicy,
}

impl Session {
    /// Validate the volume, derive its geometry and start a session at the
    /// root.
    pub fn attach(options: &AttachOptions) -> Result<Session, AttachError> {
        info!("opening {} read-only", options.image.display());
        let file = File::open(&options.image)?;
        let media_size = ReadAt::len(&file)?;
        if media_size == 0 {
            return Err(GeometryDefect::EmptyMedia.into());
        }

        let boot = BootRecord::read(&file, options.offset)?;
        let geometry = Geometry::compute(&file, &boot, options.offset, media_size)?;
        debug!(
            "attached: {} clusters of {} bytes, root at sector {}",
            geometry.cluster_count,
            geometry.cluster_bytes(),
            geometry.root_start
        );

        let mut dot = DotTable::new(geometry.cluster_bytes(), geometry.partition_size);
        dot.insert(1, 1, false);

        Ok(Session {
            image: options.image.clone(),
            boot,
            pwd_sector: geometry.root_start,
            geometry,
            dot,
            name_policy: options.name_policy,
        })
    }

    /// Cluster index of the working directory.
    pub fn pwd_cluster(&self) -> u32 {
        self.geometry.sector_to_cluster(self.pwd_sector)
    }

    /// Decode every record of the working directory, live and deleted, in
    /// physical order.
    pub fn list(&mut self) -> Result<Vec<DirEntry>, XtafError> {
        let image = File::open(&self.image)?;
        let cluster = self.pwd_cluster();
        let entries =
            dir::read_directory(&image, &self.geometry, cluster, self.name_policy, &mut self.dot)?;
        Ok(entries)
    }

    /// Resolve a path without moving the working directory.
    pub fn resolve(&mut self, path_str: &str) -> Result<Resolved, XtafError> {
        let image = File::open(&self.image)?;
        let base = self.pwd_cluster();
        Ok(path::resolve(
            &image,
            &self.geometry,
            &mut self.dot,
            self.name_policy,
            base,
            path_str,
        )?)
    }

    /// Change the working directory. A path that does not resolve to a
    /// directory leaves the session at the root.
    pub fn change_dir(&mut self, path_str: &str) -> Result<(), XtafError> {
        let image = File::open(&self.image)?;
        let base = self.pwd_cluster();
        let resolved = path::resolve(
            &image,
            &self.geometry,
            &mut self.dot,
            self.name_policy,
            base,
            path_str,
        );
        match resolved {
            Ok(target) if target.is_directory() => {
                self.pwd_sector = self.geometry.cluster_sector(target.start_cluster);
            }
            Ok(_) => {
                warn!("cd: not a directory: {path_str}; working directory reset to root");
                self.pwd_sector = self.geometry.root_start;
            }
            Err(ResolveError::NotFound(_)) => {
                warn!("cd: pathname not found: {path_str}; working directory reset to root");
                self.pwd_sector = self.geometry.root_start;
            }
            Err(e) => return Err(e.into()),
        }
        debug!(
            "cd: working directory now sector {} ({:#x} bytes into the partition)",
            self.pwd_sector,
            self.pwd_sector as u64 * SECTOR_SIZE
        );
        Ok(())
    }

    /// Stream a live regular file to `out`; the byte count written equals the
    /// declared file size exactly.
    pub fn copy_file<W: Write>(&mut self, path_str: &str, out: &mut W) -> Result<u64, XtafError> {
        let image = File::open(&self.image)?;
        let base = self.pwd_cluster();
        let target = path::resolve(
            &image,
            &self.geometry,
            &mut self.dot,
            self.name_policy,
            base,
            path_str,
        )?;
        let entry = match target.entry {
            Some(entry) if entry.allocated && !entry.is_directory() => entry,
            _ => return Err(XtafError::NotRegular(path_str.to_owned())),
        };

        let size = entry.size as u64;
        let chain = fat::file_chain(&image, &self.geometry, entry.start_cluster, size)?;
        let cluster_bytes = self.geometry.cluster_bytes();
        let mut buf = vec![0u8; cluster_bytes as usize];
        let mut remaining = size;
        for &cluster in &chain {
            // the trailing cluster is read only up to the declared size
            let take = cluster_bytes.min(remaining) as usize;
            let sector = self.geometry.cluster_sector(cluster);
            image.read_exact_at(self.geometry.sector_offset(sector), &mut buf[..take])?;
            out.write_all(&buf[..take])?;
            remaining -= take as u64;
        }
        Ok(size)
    }

    /// Write the session (geometry plus parent pointers) to a sidecar file.
    pub fn save(&self, path: &Path) -> Result<(), SessionFileError> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(SESSION_MAGIC)?;
        out.write_u16::<BigEndian>(SESSION_VERSION)?;

        let image = self.image.to_string_lossy();
        let image_bytes = image.as_bytes();
        let image_len =
            u16::try_from(image_bytes.len()).map_err(|_| SessionFileError::PathTooLong)?;
        out.write_u16::<BigEndian>(image_len)?;
        out.write_all(image_bytes)?;

        out.write_u32::<BigEndian>(self.boot.volume_id)?;
        out.write_u32::<BigEndian>(self.boot.sectors_per_cluster)?;
        out.write_u32::<BigEndian>(self.boot.fat_count)?;
        out.write_u16::<BigEndian>(self.boot.zero)?;

        let g = &self.geometry;
        out.write_u64::<BigEndian>(g.image_offset)?;
        out.write_u64::<BigEndian>(g.media_size)?;
        out.write_u64::<BigEndian>(g.partition_size)?;
        out.write_u32::<BigEndian>(g.fat_mask)?;
        out.write_u8(g.fat_width)?;
        out.write_u32::<BigEndian>(g.fat_start)?;
        out.write_u64::<BigEndian>(g.fat_size)?;
        out.write_u32::<BigEndian>(g.fat_sectors)?;
        out.write_u32::<BigEndian>(g.root_start)?;
        out.write_u32::<BigEndian>(g.first_data_sector)?;
        out.write_u32::<BigEndian>(g.max_cluster)?;
        out.write_u32::<BigEndian>(g.cluster_count)?;

        out.write_u32::<BigEndian>(self.pwd_sector)?;
        out.write_u8(match self.name_policy {
            NamePolicy::PrintableAscii => 0,
            NamePolicy::AnyByte => 1,
        })?;

        for (this, parent) in self.dot.iter() {
            out.write_u32::<BigEndian>(this)?;
            out.write_u32::<BigEndian>(parent)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Recover a session previously written by [`Session::save`].
    pub fn load(path: &Path) -> Result<Session, SessionFileError> {
        let mut input = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 8];
        input.read_exact(&mut magic)?;
        if &magic != SESSION_MAGIC {
            return Err(SessionFileError::BadHeader);
        }
        let version = input.read_u16::<BigEndian>()?;
        if version != SESSION_VERSION {
            return Err(SessionFileError::Version(version));
        }

        let image_len = input.read_u16::<BigEndian>()? as usize;
        let mut image_bytes = vec![0u8; image_len];
        input.read_exact(&mut image_bytes)?;
        let image = PathBuf::from(
            String::from_utf8(image_bytes).map_err(|_| SessionFileError::BadHeader)?,
        );

        let boot = BootRecord {
            volume_id: input.read_u32::<BigEndian>()?,
            sectors_per_cluster: input.read_u32::<BigEndian>()?,
            fat_count: input.read_u32::<BigEndian>()?,
            zero: input.read_u16::<BigEndian>()?,
        };

        let geometry = Geometry {
            image_offset: input.read_u64::<BigEndian>()?,
            media_size: input.read_u64::<BigEndian>()?,
            partition_size: input.read_u64::<BigEndian>()?,
            sectors_per_cluster: boot.sectors_per_cluster,
            fat_mask: input.read_u32::<BigEndian>()?,
            fat_width: input.read_u8()?,
            fat_start: input.read_u32::<BigEndian>()?,
            fat_size: input.read_u64::<BigEndian>()?,
            fat_sectors: input.read_u32::<BigEndian>()?,
            root_start: input.read_u32::<BigEndian>()?,
            first_data_sector: input.read_u32::<BigEndian>()?,
            max_cluster: input.read_u32::<BigEndian>()?,
            cluster_count: input.read_u32::<BigEndian>()?,
        };

        let pwd_sector = input.read_u32::<BigEndian>()?;
        let name_policy = match input.read_u8()? {
            0 => NamePolicy::PrintableAscii,
            1 => NamePolicy::AnyByte,
            _ => return Err(SessionFileError::BadHeader),
        };

        let mut dot = DotTable::new(geometry.cluster_bytes(), geometry.partition_size);
        loop {
            let this = match input.read_u32::<BigEndian>() {
                Ok(this) => this,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            let parent = input.read_u32::<BigEndian>()?;
            dot.insert(this, parent, false);
        }

        Ok(Session { image, boot, geometry, pwd_sector, dot, name_policy })
    }
}

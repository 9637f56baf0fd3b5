//! # xtaf-fs
//!
//! Read-only access to XTAF, the FAT variant used by Xbox 360 consoles.
//! XTAF keeps every multi-byte on-disk integer big-endian, stores no `.`/`..`
//! records, and shifts the root directory by eight sectors on some media; this
//! crate decodes all of that and exposes directory listing, file extraction
//! and a DFXML export of the whole tree.
//!
//! ## Usage
//!
//! ```no_run
//! use xtaf_fs::session::{AttachOptionsBuilder, Session};
//!
//! let options = AttachOptionsBuilder::default()
//!     .image("hdd.bin".into())
//!     .offset(0x130eb0000_u64)
//!     .build()
//!     .unwrap();
//!
//! let mut session = Session::attach(&options).unwrap();
//! for entry in session.list().unwrap() {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//! ```
//!
//! ## Limitations
//! The crate never writes to the image. Deleted entries are reported with
//! their recoverable names, but content that has been reallocated is not
//! reconstructed.

/// XTAF boot record
pub mod boot;
/// FAT date/time decoding
pub mod datetime;
/// DFXML tree export
pub mod dfxml;
/// Directory records and enumeration
pub mod dir;
/// Disk access primitives
pub mod disk;
/// Reconstructed parent pointers
pub mod dot;
pub mod error;
/// FAT cells and cluster chains
pub mod fat;
/// Partition geometry
pub mod geometry;
/// Path resolution
pub mod path;
/// Attach, traversal state, persistence
pub mod session;

#[cfg(test)]
pub(crate) mod testimg;

/// XTAF sectors are always 512 bytes.
pub const SECTOR_SIZE: u64 = 512;

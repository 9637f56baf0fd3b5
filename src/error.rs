use std::io;

/// Failures while attaching to a volume.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("volume magic mismatch: {0:02x?} (expected \"XTAF\")")]
    BadMagic([u8; 4]),
    #[error("bad geometry: {0}")]
    BadGeometry(#[from] GeometryDefect),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The specific constraint a volume violated.
#[derive(Debug, thiserror::Error)]
pub enum GeometryDefect {
    #[error("sectors per cluster must be a nonzero power of two, got {0}")]
    SectorsPerCluster(u32),
    #[error("FAT copy count must be 1, got {0}")]
    FatCount(u32),
    #[error("media size is zero")]
    EmptyMedia,
    #[error("partition is smaller than a single cluster")]
    NoClusters,
    #[error("filesystem structures lie beyond the addressable image")]
    Bounds,
}

/// Failures while following a cluster chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("FAT chain holds {actual} clusters where {expected} are needed for {size} bytes")]
    ChainTooShort { expected: u64, actual: u64, size: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures while resolving a path.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Any operation-level failure.
#[derive(Debug, thiserror::Error)]
pub enum XtafError {
    #[error(transparent)]
    Attach(#[from] AttachError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("not a regular file: {0}")]
    NotRegular(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Problems with the session sidecar file.
#[derive(Debug, thiserror::Error)]
pub enum SessionFileError {
    #[error("not a session file (bad header); run attach first")]
    BadHeader,
    #[error("unsupported session file version {0}")]
    Version(u16),
    #[error("image path is too long to store")]
    PathTooLong,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

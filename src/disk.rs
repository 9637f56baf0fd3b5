use std::io;

use byteorder::{BigEndian, ByteOrder};

/// Positional reads against a backing disk image.
///
/// All access is by absolute byte offset; implementations carry no cursor, so
/// a single handle can serve interleaved reads of the FAT and the data region.
pub trait ReadAt {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total length of the backing image in bytes (the sensed media size).
    fn len(&self) -> io::Result<u64>;

    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(offset, buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset = offset
                        .checked_add(n as u64)
                        .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ReadAt for std::fs::File {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(<[u8]>::len(self) as u64)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (*self).read_at(offset, buf)
    }

    fn len(&self) -> io::Result<u64> {
        (*self).len()
    }
}

/// On-disk integers are big-endian regardless of host; these helpers are the
/// only place the conversion happens.
pub(crate) fn read_u16_be<D: ReadAt + ?Sized>(image: &D, offset: u64) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    image.read_exact_at(offset, &mut buf)?;
    Ok(BigEndian::read_u16(&buf))
}

pub(crate) fn read_u32_be<D: ReadAt + ?Sized>(image: &D, offset: u64) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    image.read_exact_at(offset, &mut buf)?;
    Ok(BigEndian::read_u32(&buf))
}

//! A1 — backing device abstraction: a seekable, sized, read-only byte range
//! that the rest of the crate never assumes is backed by a real file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Mutex;

/// Something `Volume` can read fixed-size chunks out of at an absolute byte
/// offset. Implementations must be safe to call from multiple threads —
/// `FileDevice` does this with an internal mutex around the single file
/// cursor, mirroring a plain `pread`.
pub trait BackingDevice: Send + Sync {
    /// Total size of the device, in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Read `buf.len()` bytes starting at `offset`. Short reads are only
    /// permitted at end-of-device; otherwise the device must fill `buf` or
    /// return an error.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

/// A `BackingDevice` over a plain `std::fs::File`.
pub struct FileDevice {
    file: Mutex<File>,
    size: u64,
}

impl FileDevice {
    pub fn open(path: &std::path::Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(FileDevice {
            file: Mutex::new(file),
            size,
        })
    }
}

impl BackingDevice for FileDevice {
    fn size(&self) -> io::Result<u64> {
        Ok(self.size)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(read)
    }
}

#[cfg(test)]
pub(crate) mod test_fixture {
    use super::*;

    /// An in-memory `BackingDevice` for tests, avoiding real filesystem I/O.
    pub struct MemDevice {
        data: Vec<u8>,
    }

    impl MemDevice {
        pub fn new(data: Vec<u8>) -> Self {
            MemDevice { data }
        }
    }

    impl BackingDevice for MemDevice {
        fn size(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            let offset = offset as usize;
            if offset >= self.data.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.data.len() - offset);
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            Ok(n)
        }
    }
}

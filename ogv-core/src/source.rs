//! Byte sources feeding the container layer.
//!
//! The engine only needs three operations from its input: sequential reads,
//! absolute seeks, and an optional total size. A source that cannot report
//! its size still plays, but byte-level seeking and the duration probe are
//! disabled for it.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Random-access byte input consumed by the clip engine.
pub trait DataSource: Send {
    /// Reads up to `buf.len()` bytes. Returns 0 only at end of data.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Seeks to an absolute byte offset.
    fn seek(&mut self, position: u64) -> io::Result<()>;

    /// Total size in bytes, if known.
    fn size(&self) -> Option<u64>;
}

// ============================================================================
// File source
// ============================================================================

/// Buffered file-backed source. The size is captured at open time.
pub struct FileDataSource {
    reader: BufReader<File>,
    size: u64,
}

impl FileDataSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            size,
        })
    }
}

impl DataSource for FileDataSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }

    fn seek(&mut self, position: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }
}

// ============================================================================
// Memory source
// ============================================================================

/// In-memory source over an owned buffer.
pub struct MemoryDataSource {
    data: Vec<u8>,
    position: usize,
}

impl MemoryDataSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }
}

impl From<Vec<u8>> for MemoryDataSource {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl DataSource for MemoryDataSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.data.len().saturating_sub(self.position);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn seek(&mut self, position: u64) -> io::Result<()> {
        self.position = (position as usize).min(self.data.len());
        Ok(())
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_source_reads_and_seeks() {
        let mut source = MemoryDataSource::new((0u8..32).collect());
        assert_eq!(source.size(), Some(32));

        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, &[0, 1, 2, 3, 4, 5, 6, 7]);

        source.seek(30).unwrap();
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[30, 31]);
        assert_eq!(source.read(&mut buf).unwrap(), 0);

        // Seeking past the end clamps; the next read reports exhaustion.
        source.seek(1000).unwrap();
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn file_source_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abcdefgh").unwrap();
        tmp.flush().unwrap();

        let mut source = FileDataSource::open(tmp.path()).unwrap();
        assert_eq!(source.size(), Some(8));

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");

        source.seek(2).unwrap();
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"cdef");
    }
}

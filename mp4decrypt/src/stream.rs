use crate::{Error, Result};
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write},
    path::Path,
};

/// A seekable byte source or sink used for one decrypt operation.
///
/// Resources are released when the stream is dropped, whichever path the
/// operation took.
#[derive(Debug)]
pub enum ByteStream<'a> {
    /// Read-only view of caller owned bytes.
    Slice(Cursor<&'a [u8]>),
    /// Growable in-memory buffer.
    Memory(Cursor<Vec<u8>>),
    FileReader(BufReader<File>),
    FileWriter(BufWriter<File>),
}

impl<'a> ByteStream<'a> {
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::Slice(Cursor::new(data))
    }

    pub fn memory() -> Self {
        Self::Memory(Cursor::new(Vec::new()))
    }

    /// Open a file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::open(path, e))?;
        Ok(Self::FileReader(BufReader::new(file)))
    }

    /// Create or truncate a file for writing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::open(path, e))?;
        Ok(Self::FileWriter(BufWriter::new(file)))
    }

    /// Flush buffered writes and return the bytes of a memory stream.
    pub fn finish(self) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Memory(cursor) => Ok(Some(cursor.into_inner())),
            Self::FileWriter(writer) => {
                writer
                    .into_inner()
                    .map_err(|e| e.into_error())?
                    .sync_all()?;
                Ok(None)
            }
            Self::Slice(_) | Self::FileReader(_) => Ok(None),
        }
    }
}

fn read_only() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "stream is read-only")
}

impl Read for ByteStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Slice(x) => x.read(buf),
            Self::Memory(x) => x.read(buf),
            Self::FileReader(x) => x.read(buf),
            Self::FileWriter(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream is write-only",
            )),
        }
    }
}

impl Write for ByteStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Memory(x) => x.write(buf),
            Self::FileWriter(x) => x.write(buf),
            Self::Slice(_) | Self::FileReader(_) => Err(read_only()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Memory(x) => x.flush(),
            Self::FileWriter(x) => x.flush(),
            Self::Slice(_) | Self::FileReader(_) => Ok(()),
        }
    }
}

impl Seek for ByteStream<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Slice(x) => x.seek(pos),
            Self::Memory(x) => x.seek(pos),
            Self::FileReader(x) => x.seek(pos),
            Self::FileWriter(x) => x.seek(pos),
        }
    }
}

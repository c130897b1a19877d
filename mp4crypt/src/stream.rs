//! Top level box scanning over seekable byte streams.
//!
//! Media data boxes can be far larger than what should be held in memory, so
//! only box headers are read here and payloads are loaded on demand.

use crate::{Error, FourCc, Result, fourcc_to_string};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// A readable and seekable byte source.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// A writable and seekable byte sink.
pub trait WriteSeek: Write + Seek {}
impl<T: Write + Seek> WriteSeek for T {}

/// Size of the chunks used when copying payloads between streams.
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Header of a box found in a stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxHeader {
    pub type_: FourCc,
    /// Absolute offset of the first header byte.
    pub offset: u64,
    /// Size of the box including its header.
    pub size: u64,
    pub header_size: u64,
}

impl BoxHeader {
    /// Read a box header at the current position of `reader`.
    ///
    /// Returns `None` at a clean end of stream. Boxes extending beyond `end` are
    /// rejected.
    pub fn read<R: Read + Seek + ?Sized>(reader: &mut R, end: u64) -> Result<Option<Self>> {
        let offset = reader.stream_position()?;

        if offset >= end {
            return Ok(None);
        }

        if end - offset < 8 {
            return Err(Error::invalid_format(format!(
                "truncated box header at offset {}",
                offset
            )));
        }

        let mut header = [0; 8];
        reader.read_exact(&mut header)?;

        let mut size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let type_ = [header[4], header[5], header[6], header[7]];
        let mut header_size = 8;

        match size {
            0 => size = end - offset,
            1 => {
                let mut large = [0; 8];
                reader.read_exact(&mut large)?;
                size = u64::from_be_bytes(large);
                header_size = 16;
            }
            _ => (),
        }

        if size < header_size || size > end - offset {
            return Err(Error::invalid_format(format!(
                "box '{}' at offset {} has invalid size {}",
                fourcc_to_string(&type_),
                offset,
                size
            )));
        }

        Ok(Some(Self {
            type_,
            offset,
            size,
            header_size,
        }))
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header_size
    }

    pub fn payload_size(&self) -> u64 {
        self.size - self.header_size
    }

    pub fn name(&self) -> String {
        fourcc_to_string(&self.type_)
    }
}

/// Length of the stream. The position is left unchanged.
pub fn stream_len<S: Seek + ?Sized>(stream: &mut S) -> Result<u64> {
    let position = stream.stream_position()?;
    let len = stream.seek(SeekFrom::End(0))?;

    if position != len {
        stream.seek(SeekFrom::Start(position))?;
    }

    Ok(len)
}

/// Scan all top level boxes of a stream, seeking over their payloads.
///
/// The stream is left positioned at its end.
pub fn top_level_boxes<R: Read + Seek + ?Sized>(reader: &mut R) -> Result<Vec<BoxHeader>> {
    let end = stream_len(reader)?;
    let mut boxes = Vec::new();

    reader.seek(SeekFrom::Start(0))?;

    while let Some(header) = BoxHeader::read(reader, end)? {
        reader.seek(SeekFrom::Start(header.end()))?;
        boxes.push(header);
    }

    Ok(boxes)
}

/// Read a whole box, header included, into memory.
pub fn read_box<R: Read + Seek + ?Sized>(reader: &mut R, header: &BoxHeader) -> Result<Vec<u8>> {
    let size = usize::try_from(header.size).map_err(|_| {
        Error::Unsupported(format!("'{}' box is too large to be loaded", header.name()))
    })?;
    let mut data = vec![0; size];

    reader.seek(SeekFrom::Start(header.offset))?;
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Copy exactly `len` bytes from the current position of `reader` to `writer`.
pub fn copy_bytes<R, W>(reader: &mut R, writer: &mut W, mut len: u64) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0; COPY_CHUNK_SIZE.min(len as usize)];

    while len > 0 {
        let chunk = (buf.len() as u64).min(len) as usize;
        reader.read_exact(&mut buf[..chunk])?;
        writer.write_all(&buf[..chunk])?;
        len -= chunk as u64;
    }

    Ok(())
}

/// Write a box header, using a 64-bit size when needed.
pub fn write_box_header<W: Write + ?Sized>(
    writer: &mut W,
    type_: &FourCc,
    payload_size: u64,
) -> io::Result<()> {
    if payload_size + 8 > u32::MAX as u64 {
        writer.write_all(&1u32.to_be_bytes())?;
        writer.write_all(type_)?;
        writer.write_all(&(payload_size + 16).to_be_bytes())
    } else {
        writer.write_all(&((payload_size + 8) as u32).to_be_bytes())?;
        writer.write_all(type_)
    }
}

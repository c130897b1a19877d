//! Parsers for the boxes involved in content protection.

/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/lib/util/mp4_box_parsers.js
    2. ISO/IEC 14496-12, ISO/IEC 23001-7, OMA-TS-DRM-DCF-V2_0, PIFF 1.1

*/

mod aux_info;
mod descriptor;
mod ftyp;
mod isma;
mod oma;
mod sample_table;
mod schm;
mod senc;
mod tenc;
mod tfhd;
mod track;
mod trun;

pub use aux_info::{SaioBox, SaizBox};
pub use descriptor::{Descriptor, EsIdRef, IpmpDescriptor, ObjectDescriptor, OdCommand};
pub use ftyp::FtypBox;
pub use isma::{IsfmBox, IsltBox};
pub use oma::{OdafBox, OhdrBox, OmaEncryptionMethod, OmaPadding};
pub use sample_table::{SampleLocation, SampleTable};
pub use schm::{FrmaBox, SchmBox};
pub use senc::{SencBox, SencSample, SencSubsample};
pub use tenc::TencBox;
pub use tfhd::TfhdBox;
pub use track::{HdlrBox, TkhdBox, TrexBox};
pub use trun::{TrunBox, TrunSample};

use crate::{Atom, ParsedBox, Reader, Result};

/// PIFF track encryption box, `uuid` 8974dbce-7be7-4c51-84f9-7148f9882554.
pub const PIFF_TENC_UUID: [u8; 16] = [
    0x89, 0x74, 0xdb, 0xce, 0x7b, 0xe7, 0x4c, 0x51, 0x84, 0xf9, 0x71, 0x48, 0xf9, 0x88, 0x25, 0x54,
];

/// PIFF sample encryption box, `uuid` a2394f52-5a9b-4f14-a244-6c427c648df4.
pub const PIFF_SENC_UUID: [u8; 16] = [
    0xa2, 0x39, 0x4f, 0x52, 0x5a, 0x9b, 0x4f, 0x14, 0xa2, 0x44, 0x6c, 0x42, 0x7c, 0x64, 0x8d, 0xf4,
];

/// A box with a fixed payload layout.
pub trait Mp4Box: Sized {
    /// Whether the payload starts with version and flags.
    const FULL_BOX: bool;

    /// Parse the payload. For full boxes the reader is positioned after version and flags.
    fn parse(reader: &mut Reader, version: u8, flags: u32) -> Result<Self>;

    /// Parse a box handed over by [`Mp4Parser`](crate::Mp4Parser).
    fn from_parsed(box_: &mut ParsedBox) -> Result<Self> {
        let version = box_.version();
        let flags = box_.flags();
        Self::parse(&mut box_.reader, version, flags)
    }

    fn from_atom(atom: &Atom) -> Result<Self> {
        if Self::FULL_BOX {
            let (version, flags, mut reader) = atom.full_box_reader()?;
            Self::parse(&mut reader, version, flags)
        } else {
            Self::parse(&mut atom.reader(), 0, 0)
        }
    }
}

/// Read the extended type of a `uuid` box.
pub fn read_uuid(reader: &mut Reader) -> Result<[u8; 16]> {
    Ok(reader.read_array()?)
}

/// Read version and flags of a full box embedded in a `uuid` box.
pub fn read_version_and_flags(reader: &mut Reader) -> Result<(u8, u32)> {
    let version_and_flags = reader.read_u32()?;
    Ok(((version_and_flags >> 24) as u8, version_and_flags & 0xFFFFFF))
}

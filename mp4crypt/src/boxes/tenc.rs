/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/lib/media/segment_utils.js#L547-L573
    2. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/lib/util/mp4_box_parsers.js#L554-L567

*/

use super::{Mp4Box, read_uuid, read_version_and_flags};
use crate::{Error, Reader, Result};

/// Track Encryption Box (tenc), also produced from the PIFF track encryption `uuid` box.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TencBox {
    pub default_is_protected: bool,
    /// Zero when a constant IV is used.
    pub default_per_sample_iv_size: u8,
    pub default_kid: [u8; 16],
    pub default_crypt_byte_block: u8,
    pub default_skip_byte_block: u8,
    pub default_constant_iv: Option<Vec<u8>>,
    /// PIFF algorithm id: 0 for clear, 1 for AES-CTR, 2 for AES-CBC.
    pub piff_algorithm: Option<u32>,
}

impl TencBox {
    /// Parse the payload of a PIFF track encryption `uuid` box, including the uuid itself.
    pub fn from_piff(reader: &mut Reader) -> Result<Self> {
        let uuid = read_uuid(reader)?;

        if uuid != super::PIFF_TENC_UUID {
            return Err(Error::invalid_format("not a piff track encryption box"));
        }

        let _ = read_version_and_flags(reader)?;
        let algorithm = reader.read_u24()?;
        let iv_size = reader.read_u8()?;
        let default_kid = reader.read_array()?;

        Ok(Self {
            default_is_protected: algorithm != 0,
            default_per_sample_iv_size: iv_size,
            default_kid,
            piff_algorithm: Some(algorithm),
            ..Default::default()
        })
    }
}

impl Mp4Box for TencBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, version: u8, _: u32) -> Result<Self> {
        reader.skip(1)?; // reserved

        let (default_crypt_byte_block, default_skip_byte_block) = if version == 0 {
            reader.skip(1)?; // reserved
            (0, 0)
        } else {
            let pattern = reader.read_u8()?;
            (pattern >> 4, pattern & 0x0F)
        };

        let default_is_protected = reader.read_u8()? == 1;
        let default_per_sample_iv_size = reader.read_u8()?;
        let default_kid = reader.read_array()?;

        let default_constant_iv = if default_is_protected && default_per_sample_iv_size == 0 {
            let size = reader.read_u8()?;
            Some(reader.read_bytes(size as usize)?)
        } else {
            None
        };

        Ok(Self {
            default_is_protected,
            default_per_sample_iv_size,
            default_kid,
            default_crypt_byte_block,
            default_skip_byte_block,
            default_constant_iv,
            piff_algorithm: None,
        })
    }
}

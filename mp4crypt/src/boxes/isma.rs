//! ISMACryp 1.1 boxes.

use super::Mp4Box;
use crate::{Reader, Result};

/// ISMACryp Sample Format Box (iSFM).
#[derive(Clone, Debug, PartialEq)]
pub struct IsfmBox {
    pub selective_encryption: bool,
    pub key_indicator_length: u8,
    pub iv_length: u8,
}

impl Mp4Box for IsfmBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, _: u8, _: u32) -> Result<Self> {
        Ok(Self {
            selective_encryption: reader.read_u8()? & 0x80 != 0,
            key_indicator_length: reader.read_u8()?,
            iv_length: reader.read_u8()?,
        })
    }
}

/// ISMACryp Salt Box (iSLT).
#[derive(Clone, Debug, PartialEq)]
pub struct IsltBox {
    pub salt: [u8; 8],
}

impl Mp4Box for IsltBox {
    const FULL_BOX: bool = false;

    fn parse(reader: &mut Reader, _: u8, _: u32) -> Result<Self> {
        Ok(Self {
            salt: reader.read_array()?,
        })
    }
}

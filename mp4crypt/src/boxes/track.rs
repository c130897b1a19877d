use super::Mp4Box;
use crate::{FourCc, Reader, Result};

/// Track Header Box (tkhd). Only the track id is kept.
#[derive(Clone, Debug, PartialEq)]
pub struct TkhdBox {
    pub track_id: u32,
}

impl Mp4Box for TkhdBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, version: u8, _: u32) -> Result<Self> {
        // creation and modification time
        reader.skip(if version == 1 { 16 } else { 8 })?;

        Ok(Self {
            track_id: reader.read_u32()?,
        })
    }
}

/// Handler Reference Box (hdlr).
#[derive(Clone, Debug, PartialEq)]
pub struct HdlrBox {
    pub handler_type: FourCc,
}

impl Mp4Box for HdlrBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, _: u8, _: u32) -> Result<Self> {
        reader.skip(4)?; // pre_defined

        Ok(Self {
            handler_type: reader.read_fourcc()?,
        })
    }
}

/// Track Extends Box (trex) - per track defaults for movie fragments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrexBox {
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl Mp4Box for TrexBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, _: u8, _: u32) -> Result<Self> {
        Ok(Self {
            track_id: reader.read_u32()?,
            default_sample_description_index: reader.read_u32()?,
            default_sample_duration: reader.read_u32()?,
            default_sample_size: reader.read_u32()?,
            default_sample_flags: reader.read_u32()?,
        })
    }
}

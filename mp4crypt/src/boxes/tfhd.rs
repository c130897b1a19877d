use super::Mp4Box;
use crate::{Reader, Result};

/// Track Fragment Header Box (tfhd).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TfhdBox {
    pub flags: u32,
    /// An integer that uniquely identifies this
    /// track over the entire life‐time of this presentation
    pub track_id: u32,
    /// If specified via flags, this indicate the base data offset
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    /// If specified via flags, this overrides the default sample
    /// duration in the Track Extends Box for this fragment
    pub default_sample_duration: Option<u32>,
    /// If specified via flags, this overrides the default sample
    /// size in the Track Extends Box for this fragment
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

impl TfhdBox {
    /// Sample data offsets are relative to the start of the enclosing `moof`.
    pub fn default_base_is_moof(&self) -> bool {
        self.flags & 0x020000 != 0
    }
}

impl Mp4Box for TfhdBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, _: u8, flags: u32) -> Result<Self> {
        let mut tfhd = Self {
            flags,
            track_id: reader.read_u32()?,
            ..Default::default()
        };

        if flags & 0x000001 != 0 {
            tfhd.base_data_offset = Some(reader.read_u64()?);
        }

        if flags & 0x000002 != 0 {
            tfhd.sample_description_index = Some(reader.read_u32()?);
        }

        if flags & 0x000008 != 0 {
            tfhd.default_sample_duration = Some(reader.read_u32()?);
        }

        if flags & 0x000010 != 0 {
            tfhd.default_sample_size = Some(reader.read_u32()?);
        }

        if flags & 0x000020 != 0 {
            tfhd.default_sample_flags = Some(reader.read_u32()?);
        }

        Ok(tfhd)
    }
}

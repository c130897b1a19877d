use super::Mp4Box;
use crate::{FourCc, Reader, Result};

/// Sample Auxiliary Information Sizes Box (saiz).
#[derive(Clone, Debug, PartialEq)]
pub struct SaizBox {
    pub aux_info_type: Option<FourCc>,
    pub default_sample_info_size: u8,
    pub sample_count: u32,
    /// Empty when every entry has the default size.
    pub sample_info_sizes: Vec<u8>,
}

impl SaizBox {
    pub fn size_of(&self, index: usize) -> u8 {
        if self.default_sample_info_size != 0 {
            self.default_sample_info_size
        } else {
            self.sample_info_sizes.get(index).copied().unwrap_or(0)
        }
    }
}

impl Mp4Box for SaizBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, _: u8, flags: u32) -> Result<Self> {
        let aux_info_type = if flags & 0x000001 != 0 {
            let aux_info_type = reader.read_fourcc()?;
            reader.skip(4)?; // aux_info_type_parameter
            Some(aux_info_type)
        } else {
            None
        };

        let default_sample_info_size = reader.read_u8()?;
        let sample_count = reader.read_u32()?;

        let sample_info_sizes = if default_sample_info_size == 0 {
            reader.read_bytes(sample_count as usize)?
        } else {
            Vec::new()
        };

        Ok(Self {
            aux_info_type,
            default_sample_info_size,
            sample_count,
            sample_info_sizes,
        })
    }
}

/// Sample Auxiliary Information Offsets Box (saio).
#[derive(Clone, Debug, PartialEq)]
pub struct SaioBox {
    pub aux_info_type: Option<FourCc>,
    pub offsets: Vec<u64>,
}

impl Mp4Box for SaioBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, version: u8, flags: u32) -> Result<Self> {
        let aux_info_type = if flags & 0x000001 != 0 {
            let aux_info_type = reader.read_fourcc()?;
            reader.skip(4)?;
            Some(aux_info_type)
        } else {
            None
        };

        let entry_count = reader.read_u32()?;
        let mut offsets = Vec::with_capacity((entry_count as usize).min(reader.remaining() as usize));

        for _ in 0..entry_count {
            offsets.push(if version == 0 {
                reader.read_u32()? as u64
            } else {
                reader.read_u64()?
            });
        }

        Ok(Self {
            aux_info_type,
            offsets,
        })
    }
}

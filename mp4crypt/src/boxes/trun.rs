use super::Mp4Box;
use crate::{Reader, Result};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrunSample {
    /// The length of the sample in timescale units.
    pub sample_duration: Option<u32>,
    /// The size of the sample in bytes.
    pub sample_size: Option<u32>,
    /// The time since the start of the sample in timescale units. Time
    /// offset is based of the start of the sample. If this value is
    /// missing, the accumulated durations preceeding this time sample will
    /// be used to create the start time.
    pub sample_composition_time_offset: Option<i32>,
}

/// Track Fragment Run Box (trun).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrunBox {
    /// An array of size sampleCount containing data for each sample
    pub samples: Vec<TrunSample>,
    /// If specified via flags, this indicate the offset of the sample in bytes.
    pub data_offset: Option<i32>,
}

impl Mp4Box for TrunBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, version: u8, flags: u32) -> Result<Self> {
        let sample_count = reader.read_u32()?;
        let mut data_offset = None;

        // "data_offset"
        if (flags & 0x000001) != 0 {
            data_offset = Some(reader.read_i32()?);
        }

        // Skip "first_sample_flags" if present.
        if (flags & 0x000004) != 0 {
            reader.skip(4)?;
        }

        let mut samples = Vec::with_capacity((sample_count as usize).min(reader.remaining() as usize));

        for _ in 0..sample_count {
            let mut sample = TrunSample::default();

            // Read "sample duration" if present.
            if (flags & 0x000100) != 0 {
                sample.sample_duration = Some(reader.read_u32()?);
            }

            // Read "sample_size" if present.
            if (flags & 0x000200) != 0 {
                sample.sample_size = Some(reader.read_u32()?);
            }

            // Skip "sample_flags" if present.
            if (flags & 0x000400) != 0 {
                reader.skip(4)?;
            }

            // Read "sample_time_offset" if present.
            if (flags & 0x000800) != 0 {
                sample.sample_composition_time_offset = Some(if version == 0 {
                    reader.read_u32()? as i32
                } else {
                    reader.read_i32()?
                });
            }

            samples.push(sample);
        }

        Ok(Self {
            samples,
            data_offset,
        })
    }
}

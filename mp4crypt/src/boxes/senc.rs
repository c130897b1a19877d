use super::{read_uuid, read_version_and_flags};
use crate::{Error, Reader, Result};

/// A subsample entry from the senc box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SencSubsample {
    /// Number of clear (unencrypted) bytes.
    pub bytes_of_clear_data: u16,
    /// Number of encrypted bytes.
    pub bytes_of_encrypted_data: u32,
}

/// Sample encryption information for a single sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SencSample {
    /// Empty when the track uses a constant IV.
    pub iv: Vec<u8>,
    pub subsamples: Vec<SencSubsample>,
}

impl SencSample {
    fn read(reader: &mut Reader, iv_size: u8, has_subsamples: bool) -> Result<Self> {
        let iv = reader.read_bytes(iv_size as usize)?;
        let mut subsamples = Vec::new();

        if has_subsamples {
            let count = reader.read_u16()?;
            subsamples.reserve(count as usize);

            for _ in 0..count {
                subsamples.push(SencSubsample {
                    bytes_of_clear_data: reader.read_u16()?,
                    bytes_of_encrypted_data: reader.read_u32()?,
                });
            }
        }

        Ok(Self { iv, subsamples })
    }

    /// Parse one entry of sample auxiliary information (`saiz`/`saio`).
    ///
    /// The entry has subsamples when it is larger than the IV.
    pub fn from_aux_info(data: &[u8], iv_size: u8) -> Result<Self> {
        let has_subsamples = data.len() > iv_size as usize;
        Self::read(&mut Reader::new(data.to_vec()), iv_size, has_subsamples)
    }
}

/// Sample Encryption Box (senc), or the PIFF sample encryption `uuid` box.
///
/// Provides the IV and the optional subsample map of each sample in a fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct SencBox {
    pub flags: u32,
    /// PIFF boxes may override the track encryption parameters (flags & 0x000001).
    pub override_algorithm: Option<u32>,
    pub override_kid: Option<[u8; 16]>,
    pub samples: Vec<SencSample>,
}

impl SencBox {
    /// Parse a senc payload, with the reader positioned after version and flags.
    pub fn parse(reader: &mut Reader, flags: u32, iv_size: u8) -> Result<Self> {
        let mut override_algorithm = None;
        let mut override_kid = None;
        let mut iv_size = iv_size;

        if flags & 0x000001 != 0 {
            override_algorithm = Some(reader.read_u24()?);
            iv_size = reader.read_u8()?;
            override_kid = Some(reader.read_array()?);
        }

        let sample_count = reader.read_u32()?;
        let has_subsamples = flags & 0x000002 != 0;
        // Every sample takes at least its IV, which bounds the allocation.
        let mut samples = Vec::with_capacity((sample_count as usize).min(reader.remaining() as usize));

        for _ in 0..sample_count {
            samples.push(SencSample::read(reader, iv_size, has_subsamples)?);
        }

        Ok(Self {
            flags,
            override_algorithm,
            override_kid,
            samples,
        })
    }

    /// Parse the payload of a PIFF sample encryption `uuid` box, including the uuid itself.
    pub fn from_piff(reader: &mut Reader, iv_size: u8) -> Result<Self> {
        if read_uuid(reader)? != super::PIFF_SENC_UUID {
            return Err(Error::invalid_format("not a piff sample encryption box"));
        }

        let (_, flags) = read_version_and_flags(reader)?;
        Self::parse(reader, flags, iv_size)
    }

    pub fn has_subsamples(&self) -> bool {
        self.flags & 0x000002 != 0
    }
}

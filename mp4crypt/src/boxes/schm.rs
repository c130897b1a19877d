use super::Mp4Box;
use crate::{FourCc, Reader, Result};

/// Scheme Type Box (schm) - identifies the protection scheme.
///
/// Known scheme types:
/// - `cenc` - AES-CTR full sample and subsample encryption
/// - `cens` - AES-CTR pattern encryption
/// - `cbc1` - AES-CBC full sample and subsample encryption
/// - `cbcs` - AES-CBC pattern encryption
/// - `piff` - PIFF 1.1
/// - `odkm` - OMA DRM 2.0 PDCF
/// - `iAEC` - ISMACryp
/// - `ACBC`, `ACGK` - Marlin IPMP
#[derive(Clone, Debug, PartialEq)]
pub struct SchmBox {
    /// The scheme type as a 4-byte code (e.g., 'cenc', 'cbcs').
    pub scheme_type: FourCc,
    pub scheme_version: u32,
    /// Present if flags & 0x000001.
    pub scheme_uri: Option<String>,
}

impl SchmBox {
    /// Common Encryption schemes, which are decrypted in place.
    pub fn is_cenc_family(&self) -> bool {
        matches!(&self.scheme_type, b"cenc" | b"cens" | b"cbc1" | b"cbcs" | b"piff")
    }
}

impl Mp4Box for SchmBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, _: u8, flags: u32) -> Result<Self> {
        let scheme_type = reader.read_fourcc()?;
        // Marlin writes a 16-bit scheme version.
        let scheme_version = match reader.remaining() {
            2 => reader.read_u16()? as u32,
            _ => reader.read_u32()?,
        };

        let scheme_uri = if flags & 0x000001 != 0 && reader.has_more_data() {
            let bytes = reader.read_to_end()?;
            Some(
                String::from_utf8_lossy(&bytes)
                    .trim_end_matches('\0')
                    .to_owned(),
            )
        } else {
            None
        };

        Ok(Self {
            scheme_type,
            scheme_version,
            scheme_uri,
        })
    }
}

/// Original Format Box (frma) - the sample entry type before protection.
#[derive(Clone, Debug, PartialEq)]
pub struct FrmaBox {
    pub original_format: FourCc,
}

impl Mp4Box for FrmaBox {
    const FULL_BOX: bool = false;

    fn parse(reader: &mut Reader, _: u8, _: u32) -> Result<Self> {
        Ok(Self {
            original_format: reader.read_fourcc()?,
        })
    }
}

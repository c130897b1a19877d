//! OMA DRM 2.0 DCF boxes.

use super::Mp4Box;
use crate::{Atom, AtomBody, Error, Reader, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OmaEncryptionMethod {
    Null,
    AesCbc,
    AesCtr,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OmaPadding {
    None,
    /// RFC 2630, i.e. PKCS#7 padding.
    Rfc2630,
}

/// Common Headers Box (ohdr).
#[derive(Clone, Debug, PartialEq)]
pub struct OhdrBox {
    pub encryption_method: OmaEncryptionMethod,
    pub padding_scheme: OmaPadding,
    pub plaintext_length: u64,
    pub content_id: String,
    pub rights_issuer_url: String,
    pub textual_headers: Vec<u8>,
}

impl OhdrBox {
    /// Mark an `ohdr` box as holding clear content, keeping its size.
    pub fn clear_encryption(ohdr: &mut Atom) -> Result<()> {
        match &mut ohdr.body {
            // version(1) + flags(3) + method(1) + padding(1)
            AtomBody::Data(data) if data.len() >= 6 => {
                data[4] = 0;
                data[5] = 0;
                Ok(())
            }
            _ => Err(Error::invalid_format("ohdr box is too small")),
        }
    }
}

impl Mp4Box for OhdrBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, _: u8, _: u32) -> Result<Self> {
        let encryption_method = match reader.read_u8()? {
            0 => OmaEncryptionMethod::Null,
            1 => OmaEncryptionMethod::AesCbc,
            2 => OmaEncryptionMethod::AesCtr,
            x => {
                return Err(Error::Unsupported(format!(
                    "oma encryption method {}",
                    x
                )));
            }
        };

        let padding_scheme = match reader.read_u8()? {
            0 => OmaPadding::None,
            1 => OmaPadding::Rfc2630,
            x => return Err(Error::Unsupported(format!("oma padding scheme {}", x))),
        };

        let plaintext_length = reader.read_u64()?;
        let content_id_length = reader.read_u16()?;
        let rights_issuer_url_length = reader.read_u16()?;
        let textual_headers_length = reader.read_u16()?;

        let content_id = reader.read_bytes(content_id_length as usize)?;
        let rights_issuer_url = reader.read_bytes(rights_issuer_url_length as usize)?;
        let textual_headers = reader.read_bytes(textual_headers_length as usize)?;

        Ok(Self {
            encryption_method,
            padding_scheme,
            plaintext_length,
            content_id: String::from_utf8_lossy(&content_id).into_owned(),
            rights_issuer_url: String::from_utf8_lossy(&rights_issuer_url).into_owned(),
            textual_headers,
        })
    }
}

/// OMA DRM Access Unit Format Box (odaf).
#[derive(Clone, Debug, PartialEq)]
pub struct OdafBox {
    pub selective_encryption: bool,
    pub key_indicator_length: u8,
    pub iv_length: u8,
}

impl Mp4Box for OdafBox {
    const FULL_BOX: bool = true;

    fn parse(reader: &mut Reader, _: u8, _: u32) -> Result<Self> {
        Ok(Self {
            selective_encryption: reader.read_u8()? & 0x80 != 0,
            key_indicator_length: reader.read_u8()?,
            iv_length: reader.read_u8()?,
        })
    }
}

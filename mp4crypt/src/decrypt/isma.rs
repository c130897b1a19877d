use super::Aes128Ctr64;
use crate::{
    Error, Result,
    boxes::{IsfmBox, IsltBox},
};
use aes::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek, generic_array::GenericArray};

/// Decrypts the samples of an ISMACryp (`iAEC`) track.
///
/// Each encrypted sample carries its byte stream offset as IV. The keystream is
/// AES-CTR over `salt || block counter`, positioned at that offset.
pub struct IsmaSampleDecrypter {
    key: [u8; 16],
    salt: [u8; 8],
    selective_encryption: bool,
    key_indicator_length: u8,
    iv_length: u8,
}

impl IsmaSampleDecrypter {
    pub fn new(key: &[u8; 16], isfm: &IsfmBox, islt: Option<&IsltBox>) -> Result<Self> {
        if isfm.iv_length == 0 || isfm.iv_length > 16 {
            return Err(Error::InvalidIvSize {
                expected: 8,
                actual: isfm.iv_length as usize,
            });
        }

        if isfm.key_indicator_length > 4 {
            return Err(Error::Unsupported(format!(
                "ismacryp key indicators of {} bytes",
                isfm.key_indicator_length
            )));
        }

        Ok(Self {
            key: *key,
            salt: islt.map(|x| x.salt).unwrap_or_default(),
            selective_encryption: isfm.selective_encryption,
            key_indicator_length: isfm.key_indicator_length,
            iv_length: isfm.iv_length,
        })
    }

    pub fn decrypt_sample(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut data = data;

        if self.selective_encryption {
            let (&flags, rest) = data
                .split_first()
                .ok_or_else(|| Error::invalid_format("empty selectively encrypted sample"))?;
            data = rest;

            if flags & 0x80 == 0 {
                return Ok(data.to_vec());
            }
        }

        let header_size = self.iv_length as usize + self.key_indicator_length as usize;

        if data.len() < header_size {
            return Err(Error::invalid_format("ismacryp sample header is truncated"));
        }

        // Only the low 64 bits of the byte stream offset are meaningful.
        let iv = &data[..self.iv_length as usize];
        let bso = iv[iv.len().saturating_sub(8)..]
            .iter()
            .fold(0u64, |acc, &x| (acc << 8) | x as u64);

        let mut counter = [0; 16];
        counter[..8].copy_from_slice(&self.salt);

        let mut out = data[header_size..].to_vec();
        let mut ctr = Aes128Ctr64::new(
            GenericArray::from_slice(&self.key),
            GenericArray::from_slice(&counter),
        );
        ctr.try_seek(bso)
            .map_err(|_| Error::invalid_format("ismacryp byte offset is out of range"))?;
        ctr.apply_keystream(&mut out);

        Ok(out)
    }
}

use super::{cbc_decrypt_padded, split_iv};
use crate::Result;

/// Decrypts the samples of a Marlin IPMP track.
///
/// Every sample is a 16 byte IV followed by AES-CBC ciphertext with PKCS#7 padding.
pub struct MarlinSampleDecrypter {
    key: [u8; 16],
}

impl MarlinSampleDecrypter {
    pub fn new(key: &[u8; 16]) -> Self {
        Self { key: *key }
    }

    pub fn decrypt_sample(&self, data: &[u8]) -> Result<Vec<u8>> {
        let (iv, payload) = split_iv(data)?;
        let mut out = payload.to_vec();
        let len = cbc_decrypt_padded(&self.key, &iv, &mut out)?;
        out.truncate(len);
        Ok(out)
    }
}

//! Sample level decryption for protected mp4 content.
//!
//! # Supported Encryption Schemes
//!
//! | Scheme | Description | Cipher Mode |
//! |--------|-------------|-------------|
//! | `cenc` | AES-CTR full sample and subsample encryption | AES-128-CTR |
//! | `cens` | AES-CTR pattern encryption | AES-128-CTR |
//! | `cbc1` | AES-CBC full sample and subsample encryption | AES-128-CBC |
//! | `cbcs` | AES-CBC pattern encryption | AES-128-CBC (1:9 pattern) |
//! | `odkm` | OMA DRM 2.0 PDCF | AES-128-CBC / AES-128-CTR |
//! | `iAEC` | ISMACryp 1.1 | AES-128-CTR |
//! | `ACBC`, `ACGK` | Marlin IPMP | AES-128-CBC |
//!
//! # Example
//!
//! ```
//! use mp4crypt::{boxes::SencSubsample, decrypt::{CencSampleDecrypter, CencScheme}};
//!
//! let decrypter = CencSampleDecrypter::new(CencScheme::Cenc, &[0; 16], 0, 0, None);
//! let mut sample = vec![0; 32];
//! let subsamples = [SencSubsample { bytes_of_clear_data: 16, bytes_of_encrypted_data: 16 }];
//!
//! decrypter.decrypt_sample(&mut sample, &[0; 8], &subsamples).unwrap();
//! assert_eq!(&sample[..16], &[0; 16]);
//! ```

mod cenc;
mod isma;
mod key_wrap;
mod marlin;
mod oma;

pub use cenc::{CencSampleDecrypter, CencScheme};
pub use isma::IsmaSampleDecrypter;
pub use key_wrap::aes_key_unwrap;
pub use marlin::MarlinSampleDecrypter;
pub use oma::{OmaDcfStreamDecrypter, OmaSampleDecrypter};

use crate::{Error, Result};
use aes::{
    Aes128,
    cipher::{BlockDecrypt, BlockDecryptMut, KeyIvInit, block_padding::Pkcs7, generic_array::GenericArray},
};

pub(crate) type Aes128Ctr64 = ctr::Ctr64BE<Aes128>;
pub(crate) type Aes128Ctr128 = ctr::Ctr128BE<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Decrypt whole blocks in place, chaining from `prev`.
///
/// `data` must be a multiple of 16 bytes long. On return `prev` holds the last
/// ciphertext block so that chaining can continue with the next call.
pub(crate) fn cbc_decrypt_blocks(cipher: &Aes128, prev: &mut [u8; 16], data: &mut [u8]) {
    for block in data.chunks_exact_mut(16) {
        let mut ciphertext = [0; 16];
        ciphertext.copy_from_slice(block);

        cipher.decrypt_block(GenericArray::from_mut_slice(block));

        for (x, p) in block.iter_mut().zip(prev.iter()) {
            *x ^= p;
        }

        *prev = ciphertext;
    }
}

/// Decrypt an IV-less AES-CBC buffer with PKCS#7 padding, returning the plaintext length.
pub(crate) fn cbc_decrypt_padded(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) -> Result<usize> {
    if data.is_empty() || data.len() % 16 != 0 {
        return Err(Error::Padding);
    }

    Aes128CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt_padded_mut::<Pkcs7>(data)
        .map(|x| x.len())
        .map_err(|_| Error::Padding)
}

/// Stateful AES-CBC decryption over consecutive chunks of one buffer.
pub(crate) struct CbcStream {
    inner: Aes128CbcDec,
}

impl CbcStream {
    pub(crate) fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self {
            inner: Aes128CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
        }
    }

    /// `data` must be a multiple of 16 bytes long.
    pub(crate) fn update(&mut self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(16) {
            self.inner.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }

    /// Decrypt the last chunk and strip its padding, returning the plaintext length.
    pub(crate) fn finish_padded(self, data: &mut [u8]) -> Result<usize> {
        if data.is_empty() || data.len() % 16 != 0 {
            return Err(Error::Padding);
        }

        self.inner
            .decrypt_padded_mut::<Pkcs7>(data)
            .map(|x| x.len())
            .map_err(|_| Error::Padding)
    }
}

/// Read a 16 byte IV prefix.
pub(crate) fn split_iv(data: &[u8]) -> Result<([u8; 16], &[u8])> {
    if data.len() < 16 {
        return Err(Error::InvalidIvSize {
            expected: 16,
            actual: data.len(),
        });
    }

    let mut iv = [0; 16];
    iv.copy_from_slice(&data[..16]);
    Ok((iv, &data[16..]))
}

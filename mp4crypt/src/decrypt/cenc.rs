use super::{Aes128Ctr64, cbc_decrypt_blocks};
use crate::{Error, FourCc, Result, boxes::SencSubsample};
use aes::{
    Aes128,
    cipher::{KeyInit, KeyIvInit, StreamCipher, generic_array::GenericArray},
};
use std::ops::Range;

/// Common Encryption scheme of a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CencScheme {
    /// AES-CTR, the keystream runs across all protected ranges of a sample.
    Cenc,
    /// AES-CTR with a crypt/skip pattern.
    Cens,
    /// AES-CBC, chaining runs across all protected ranges of a sample.
    Cbc1,
    /// AES-CBC with a crypt/skip pattern, the IV is reset for every protected range.
    Cbcs,
}

impl CencScheme {
    pub fn from_scheme_type(scheme_type: &FourCc) -> Option<Self> {
        match scheme_type {
            b"cenc" => Some(Self::Cenc),
            b"cens" => Some(Self::Cens),
            b"cbc1" => Some(Self::Cbc1),
            b"cbcs" => Some(Self::Cbcs),
            _ => None,
        }
    }

    /// Map a PIFF algorithm id. Zero means the track is not encrypted.
    pub fn from_piff_algorithm(algorithm: u32) -> Result<Option<Self>> {
        match algorithm {
            0 => Ok(None),
            1 => Ok(Some(Self::Cenc)),
            2 => Ok(Some(Self::Cbc1)),
            x => Err(Error::Unsupported(format!("piff algorithm id {}", x))),
        }
    }

    fn uses_pattern(&self) -> bool {
        matches!(self, Self::Cens | Self::Cbcs)
    }
}

/// Decrypts the samples of one Common Encryption track in place.
#[derive(Clone)]
pub struct CencSampleDecrypter {
    scheme: CencScheme,
    key: [u8; 16],
    cipher: Aes128,
    crypt_byte_block: u8,
    skip_byte_block: u8,
    constant_iv: Option<Vec<u8>>,
}

impl CencSampleDecrypter {
    pub fn new(
        scheme: CencScheme,
        key: &[u8; 16],
        crypt_byte_block: u8,
        skip_byte_block: u8,
        constant_iv: Option<Vec<u8>>,
    ) -> Self {
        Self {
            scheme,
            key: *key,
            cipher: Aes128::new(GenericArray::from_slice(key)),
            crypt_byte_block,
            skip_byte_block,
            constant_iv,
        }
    }

    pub fn scheme(&self) -> CencScheme {
        self.scheme
    }

    /// Decrypt one sample in place.
    ///
    /// `iv` is the per-sample IV, empty when the track uses a constant IV. With no
    /// subsamples the whole sample is protected.
    pub fn decrypt_sample(
        &self,
        data: &mut [u8],
        iv: &[u8],
        subsamples: &[SencSubsample],
    ) -> Result<()> {
        let iv = self.sample_iv(iv)?;
        let ranges = protected_ranges(data.len(), subsamples)?;

        let (crypt, skip) = if self.scheme.uses_pattern() {
            (self.crypt_byte_block as usize, self.skip_byte_block as usize)
        } else {
            (0, 0)
        };

        match self.scheme {
            CencScheme::Cenc | CencScheme::Cens => {
                let mut ctr = Aes128Ctr64::new(
                    GenericArray::from_slice(&self.key),
                    GenericArray::from_slice(&iv),
                );

                for range in ranges {
                    for_each_crypt_run(&mut data[range], crypt, skip, |run| {
                        ctr.apply_keystream(run)
                    });
                }
            }
            CencScheme::Cbc1 => {
                let mut prev = iv;

                for range in ranges {
                    let range = &mut data[range];
                    let whole_blocks = range.len() / 16 * 16;
                    cbc_decrypt_blocks(&self.cipher, &mut prev, &mut range[..whole_blocks]);
                }
            }
            CencScheme::Cbcs => {
                for range in ranges {
                    let mut prev = iv;

                    for_each_crypt_run(&mut data[range], crypt, skip, |run| {
                        let whole_blocks = run.len() / 16 * 16;
                        cbc_decrypt_blocks(&self.cipher, &mut prev, &mut run[..whole_blocks]);
                    });
                }
            }
        }

        Ok(())
    }

    fn sample_iv(&self, iv: &[u8]) -> Result<[u8; 16]> {
        let iv = if iv.is_empty() {
            self.constant_iv.as_deref().unwrap_or_default()
        } else {
            iv
        };

        // 8 byte IVs are the upper half of the initial counter block.
        match iv.len() {
            8 | 16 => {
                let mut padded = [0; 16];
                padded[..iv.len()].copy_from_slice(iv);
                Ok(padded)
            }
            x => Err(Error::InvalidIvSize {
                expected: 16,
                actual: x,
            }),
        }
    }
}

/// Byte ranges of the protected parts of a sample.
fn protected_ranges(sample_size: usize, subsamples: &[SencSubsample]) -> Result<Vec<Range<usize>>> {
    if subsamples.is_empty() {
        return Ok(vec![0..sample_size]);
    }

    let mut ranges = Vec::with_capacity(subsamples.len());
    let mut offset = 0usize;

    for subsample in subsamples {
        let start = offset + subsample.bytes_of_clear_data as usize;
        let end = start + subsample.bytes_of_encrypted_data as usize;

        if end > sample_size {
            return Err(Error::invalid_format(format!(
                "subsamples cover {} bytes of a {} byte sample",
                end, sample_size
            )));
        }

        if end > start {
            ranges.push(start..end);
        }
        offset = end;
    }

    Ok(ranges)
}

/// Call `f` on each run of `crypt` encrypted blocks, skipping `skip` blocks in
/// between. A trailing run keeps its whole blocks and a partial block at the end
/// of the range stays clear. A `0:0` pattern protects the whole range.
fn for_each_crypt_run<F: FnMut(&mut [u8])>(data: &mut [u8], crypt: usize, skip: usize, mut f: F) {
    if crypt == 0 && skip == 0 {
        f(data);
        return;
    }

    let crypt_size = crypt * 16;
    let skip_size = skip * 16;

    if crypt_size == 0 {
        return;
    }

    let mut offset = 0;
    while offset < data.len() {
        let run = (data.len() - offset).min(crypt_size) / 16 * 16;
        if run == 0 {
            break;
        }

        f(&mut data[offset..offset + run]);
        offset = (offset + run + skip_size).min(data.len());
    }
}

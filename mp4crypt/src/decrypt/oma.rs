use super::{Aes128Ctr128, CbcStream, cbc_decrypt_blocks, cbc_decrypt_padded, split_iv};
use crate::{
    Error, Result,
    boxes::{OdafBox, OhdrBox, OmaEncryptionMethod, OmaPadding},
    stream::COPY_CHUNK_SIZE,
};
use aes::{
    Aes128,
    cipher::{KeyInit, KeyIvInit, StreamCipher, generic_array::GenericArray},
};
use std::io::{Read, Write};

/// Decrypts the samples of an OMA DRM 2.0 PDCF track.
pub struct OmaSampleDecrypter {
    key: [u8; 16],
    method: OmaEncryptionMethod,
    padding: OmaPadding,
    selective_encryption: bool,
}

impl OmaSampleDecrypter {
    pub fn new(key: &[u8; 16], ohdr: &OhdrBox, odaf: &OdafBox) -> Result<Self> {
        if odaf.iv_length != 16 {
            return Err(Error::InvalidIvSize {
                expected: 16,
                actual: odaf.iv_length as usize,
            });
        }

        if odaf.key_indicator_length != 0 {
            return Err(Error::Unsupported(format!(
                "pdcf key indicators ({} bytes)",
                odaf.key_indicator_length
            )));
        }

        Ok(Self {
            key: *key,
            method: ohdr.encryption_method,
            padding: ohdr.padding_scheme,
            selective_encryption: odaf.selective_encryption,
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

        let (iv, payload) = split_iv(data)?;
        let mut out = payload.to_vec();

        match (self.method, self.padding) {
            (OmaEncryptionMethod::Null, _) => (),
            (OmaEncryptionMethod::AesCbc, OmaPadding::Rfc2630) => {
                let len = cbc_decrypt_padded(&self.key, &iv, &mut out)?;
                out.truncate(len);
            }
            (OmaEncryptionMethod::AesCbc, OmaPadding::None) => {
                if out.len() % 16 != 0 {
                    return Err(Error::invalid_format(
                        "unpadded cbc sample is not a multiple of the block size",
                    ));
                }

                let cipher = Aes128::new(GenericArray::from_slice(&self.key));
                let mut prev = iv;
                cbc_decrypt_blocks(&cipher, &mut prev, &mut out);
            }
            (OmaEncryptionMethod::AesCtr, _) => {
                Aes128Ctr128::new(GenericArray::from_slice(&self.key), GenericArray::from_slice(&iv))
                    .apply_keystream(&mut out);
            }
        }

        Ok(out)
    }
}

/// Decrypts the payload of an OMA DCF `odda` box while streaming it.
pub struct OmaDcfStreamDecrypter {
    key: [u8; 16],
    method: OmaEncryptionMethod,
    padding: OmaPadding,
}

enum StreamState {
    Cbc(Option<CbcStream>),
    Ctr(Aes128Ctr128),
}

impl OmaDcfStreamDecrypter {
    pub fn new(key: &[u8; 16], ohdr: &OhdrBox) -> Self {
        Self {
            key: *key,
            method: ohdr.encryption_method,
            padding: ohdr.padding_scheme,
        }
    }

    /// Read `encrypted_len` bytes (IV included) and write exactly `plaintext_len`
    /// bytes of plaintext.
    pub fn decrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        encrypted_len: u64,
        plaintext_len: u64,
    ) -> Result<()>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        if self.method == OmaEncryptionMethod::Null {
            if plaintext_len > encrypted_len {
                return Err(Error::invalid_format("plaintext is longer than the payload"));
            }

            return crate::stream::copy_bytes(reader, writer, plaintext_len);
        }

        if encrypted_len < 16 {
            return Err(Error::InvalidIvSize {
                expected: 16,
                actual: encrypted_len as usize,
            });
        }

        let mut iv = [0; 16];
        reader.read_exact(&mut iv)?;

        let mut remaining = encrypted_len - 16;
        let mut plaintext_left = plaintext_len;

        let mut state = match self.method {
            OmaEncryptionMethod::AesCbc => {
                if remaining % 16 != 0 {
                    return Err(Error::invalid_format(
                        "cbc payload is not a multiple of the block size",
                    ));
                }
                StreamState::Cbc(Some(CbcStream::new(&self.key, &iv)))
            }
            _ => StreamState::Ctr(Aes128Ctr128::new(
                GenericArray::from_slice(&self.key),
                GenericArray::from_slice(&iv),
            )),
        };

        let mut buf = vec![0; COPY_CHUNK_SIZE];

        while remaining > 0 && plaintext_left > 0 {
            let n = (buf.len() as u64).min(remaining) as usize;
            let chunk = &mut buf[..n];
            reader.read_exact(chunk)?;
            remaining -= n as u64;

            let len = match &mut state {
                StreamState::Ctr(ctr) => {
                    ctr.apply_keystream(chunk);
                    n
                }
                StreamState::Cbc(cbc) if remaining == 0 && self.padding == OmaPadding::Rfc2630 => {
                    match cbc.take() {
                        Some(cbc) => cbc.finish_padded(chunk)?,
                        None => 0,
                    }
                }
                StreamState::Cbc(cbc) => {
                    if let Some(cbc) = cbc {
                        cbc.update(chunk);
                    }
                    n
                }
            };

            let len = (len as u64).min(plaintext_left);
            writer.write_all(&chunk[..len as usize])?;
            plaintext_left -= len;
        }

        if plaintext_left > 0 {
            return Err(Error::invalid_format(format!(
                "encrypted payload is {} bytes short of its plaintext length",
                plaintext_left
            )));
        }

        Ok(())
    }
}

use crate::{Error, Result};
use aes::{
    Aes128,
    cipher::{BlockDecrypt, KeyInit, generic_array::GenericArray},
};

const DEFAULT_IV: [u8; 8] = [0xA6; 8];

/// Unwrap a key wrapped with the AES key wrap algorithm (RFC 3394).
pub fn aes_key_unwrap(kek: &[u8; 16], wrapped: &[u8]) -> Result<Vec<u8>> {
    if wrapped.len() < 24 || wrapped.len() % 8 != 0 {
        return Err(Error::invalid_format(format!(
            "wrapped key of {} bytes",
            wrapped.len()
        )));
    }

    let cipher = Aes128::new(GenericArray::from_slice(kek));
    let n = wrapped.len() / 8 - 1;

    let mut a = [0; 8];
    a.copy_from_slice(&wrapped[..8]);
    let mut r = wrapped[8..].to_vec();

    for j in (0..6).rev() {
        for i in (1..=n).rev() {
            let t = (n * j + i) as u64;

            let mut block = [0; 16];
            for (x, (y, z)) in block[..8].iter_mut().zip(a.iter().zip(t.to_be_bytes())) {
                *x = y ^ z;
            }
            block[8..].copy_from_slice(&r[(i - 1) * 8..i * 8]);

            cipher.decrypt_block(GenericArray::from_mut_slice(&mut block));

            a.copy_from_slice(&block[..8]);
            r[(i - 1) * 8..i * 8].copy_from_slice(&block[8..]);
        }
    }

    if a != DEFAULT_IV {
        return Err(Error::KeyUnwrap);
    }

    Ok(r)
}

//! This crate provides safe functions to decrypt encrypted mp4 data streams.
//!
//! Supported schemes are Common Encryption (`cenc`, `cens`, `cbc1`, `cbcs`),
//! PIFF, OMA DRM 2.0 DCF and PDCF, Marlin IPMP (`ACBC`, `ACGK`) and ISMACryp.
//! The scheme is picked from the `ftyp` brands and the track sample
//! descriptions unless it is fixed with [`Mp4Decrypter::scheme`].
//!
//! Keys are bound either to a 128-bit KID or to a track id. Common Encryption
//! looks up the KID first, all other schemes use track ids. For OMA DCF files
//! the n-th `odrm` box uses the key of track n.
//!
//! # Example
//!
//! ```no_run
//! use mp4decrypt::Mp4Decrypter;
//!
//! let context = Mp4Decrypter::new()
//!     .key("eb676abbcb345e96bbcf616630f1a3da", "100b6c20940f779a4589152b57d2dacb")?
//!     .build()?;
//!
//! let init = std::fs::read("init.mp4")?;
//! let segment = std::fs::read("segment_0.m4s")?;
//! let decrypted = context.decrypt(&segment, Some(&init))?;
//! std::fs::write("segment_0.mp4", decrypted)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Memory buffers handed across the C ABI are limited to [u32::MAX](u32::MAX)
//! bytes, files are streamed and have no such limit.

mod context;
mod error;
mod keys;
mod stream;

pub mod detect;
pub mod ffi;
pub mod processor;

pub use context::{Context, Mp4Decrypter, decrypt_with_key_specs, mp4decrypt};
pub use detect::SchemeFamily;
pub use error::{Error, code};
pub use keys::{ContentKey, KeySpec, KeySpecError, KeyStore, KeyTarget, Kid};
pub use processor::Processor;
pub use stream::ByteStream;

pub type Result<T> = std::result::Result<T, Error>;

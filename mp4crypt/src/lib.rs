#![cfg_attr(docsrs, feature(doc_cfg))]

//! This crate contains the mp4 plumbing needed to decrypt protected mp4 streams.
//!
//! - A callback based [`Mp4Parser`] ported from the [shaka-player](https://github.com/shaka-project/shaka-player)
//!   project, used for scanning boxes and patching them in place.
//! - An editable [`Atom`] tree, used where a `moov` box has to be re-serialised.
//! - Typed parsers for the boxes involved in content protection in [`boxes`].
//! - Sample level decrypters for Common Encryption (`cenc`, `cens`, `cbc1`, `cbcs`),
//!   OMA DCF, ISMACryp and Marlin IPMP in [`decrypt`].
//! - Top level box scanning over seekable streams in [`stream`].

pub mod boxes;
pub mod decrypt;
pub mod parser;
pub mod stream;

mod atom;
mod error;
mod reader;

pub use atom::{Atom, AtomBody};
pub use error::Error;
pub use parser::{Mp4Parser, ParsedBox};
pub use reader::Reader;

/// A `Result` alias where the `Err` case is `mp4crypt::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A four character code identifying a box type, brand or scheme.
pub type FourCc = [u8; 4];

/// Convert an ascii box name to its four character code.
///
/// # Panics
///
/// Panics if `name` is not exactly four bytes long.
pub fn fourcc(name: &str) -> FourCc {
    assert!(name.len() == 4, "MP4 box names must be 4 characters long");

    let bytes = name.as_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// Convert a four character code into a printable string.
/// Useful for debugging.
pub fn fourcc_to_string(code: &FourCc) -> String {
    code.iter()
        .map(|&x| {
            if x.is_ascii_graphic() || x == b' ' {
                x as char
            } else {
                '.'
            }
        })
        .collect()
}

//! Scheme processors.
//!
//! Each processor turns a protected input stream into a clear output stream in
//! one pass. CENC keeps every box in place, the other schemes rebuild the movie
//! through the shared rewriter in [`movie`].

mod cenc;
mod marlin;
mod movie;
mod oma;
mod standard;

pub use cenc::CencProcessor;
pub use marlin::MarlinProcessor;
pub use oma::OmaProcessor;
pub use standard::StandardProcessor;

use crate::{Error, KeyStore, Result, SchemeFamily};
use mp4crypt::{
    Atom,
    stream::{self, BoxHeader, ReadSeek, WriteSeek},
};
use std::{
    io::{Seek, SeekFrom, Write},
    sync::Arc,
};

/// A decryption pass for one scheme family.
pub enum Processor {
    Cenc(CencProcessor),
    OmaDcf(OmaProcessor),
    Marlin(MarlinProcessor),
    Standard(StandardProcessor),
}

impl Processor {
    pub fn new(family: SchemeFamily, keys: Arc<KeyStore>) -> Self {
        match family {
            SchemeFamily::Cenc => Self::Cenc(CencProcessor::new(keys)),
            SchemeFamily::OmaDcf => Self::OmaDcf(OmaProcessor::new(keys)),
            SchemeFamily::Marlin => Self::Marlin(MarlinProcessor::new(keys)),
            SchemeFamily::Standard => Self::Standard(StandardProcessor::new(keys)),
        }
    }

    pub fn family(&self) -> SchemeFamily {
        match self {
            Self::Cenc(_) => SchemeFamily::Cenc,
            Self::OmaDcf(_) => SchemeFamily::OmaDcf,
            Self::Marlin(_) => SchemeFamily::Marlin,
            Self::Standard(_) => SchemeFamily::Standard,
        }
    }

    /// Decrypt `input` into `output`.
    ///
    /// `fragments_info` carries the movie box of content whose fragments are
    /// supplied separately, only the CENC processor makes use of it. On error
    /// whatever was written to `output` must be discarded.
    pub fn process(
        &self,
        input: &mut dyn ReadSeek,
        output: &mut dyn WriteSeek,
        fragments_info: Option<&mut dyn ReadSeek>,
    ) -> Result<()> {
        match self {
            Self::Cenc(x) => x.process(input, output, fragments_info),
            Self::OmaDcf(x) => x.process(input, output),
            Self::Marlin(x) => x.process(input, output),
            Self::Standard(x) => x.process(input, output),
        }
    }
}

pub(crate) fn invalid_format<T: Into<String>>(reason: T) -> Error {
    Error::Container(mp4crypt::Error::InvalidFormat(reason.into()))
}

pub(crate) fn unsupported<T: Into<String>>(reason: T) -> Error {
    Error::Container(mp4crypt::Error::Unsupported(reason.into()))
}

/// Load and parse the first `moov` box.
pub(crate) fn load_moov(
    input: &mut dyn ReadSeek,
    headers: &[BoxHeader],
) -> Result<Option<Atom>> {
    match headers.iter().find(|x| &x.type_ == b"moov") {
        Some(header) => Ok(Some(Atom::parse(&stream::read_box(input, header)?)?)),
        None => Ok(None),
    }
}

/// Copy the whole input when there is nothing to decrypt.
pub(crate) fn copy_verbatim(input: &mut dyn ReadSeek, output: &mut dyn WriteSeek) -> Result<()> {
    let len = stream::stream_len(input)?;
    input.seek(SeekFrom::Start(0))?;
    stream::copy_bytes(input, output, len)?;
    output.flush()?;
    Ok(())
}

//! Selection of the decryption scheme family from container metadata.

use mp4crypt::{
    Atom, FourCc,
    boxes::{FtypBox, Mp4Box, SchmBox, TkhdBox},
    stream::{self, ReadSeek},
};
use std::{
    fmt,
    io::{Seek, SeekFrom},
};

pub(crate) const BRAND_OMA_DCF: FourCc = *b"odcf";
pub(crate) const BRAND_MARLIN: FourCc = *b"MGSV";
pub(crate) const BRAND_PIFF: FourCc = *b"piff";

/// Family of decryption algorithms a [`Processor`](crate::Processor) implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemeFamily {
    /// OMA DRM 2.0 DCF and PDCF files.
    OmaDcf,
    /// Marlin IPMP (`ACBC` and `ACGK`).
    Marlin,
    /// Common Encryption (`cenc`, `cens`, `cbc1`, `cbcs`) and PIFF.
    Cenc,
    /// Full sample schemes of non-fragmented files (ISMACryp, OMA PDCF).
    Standard,
}

impl fmt::Display for SchemeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OmaDcf => "oma-dcf",
            Self::Marlin => "marlin",
            Self::Cenc => "cenc",
            Self::Standard => "standard",
        })
    }
}

/// Protection of the first sample description of a track.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackProtection {
    pub track_id: u32,
    pub entry_type: FourCc,
    /// Scheme type of a protected (`encv`/`enca`/`enct`/`encs`) entry.
    pub scheme_type: Option<FourCc>,
}

/// The container metadata the scheme detection looks at.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContainerInfo {
    pub ftyp: Option<FtypBox>,
    pub tracks: Vec<TrackProtection>,
}

impl ContainerInfo {
    /// Read the `ftyp` and `moov` boxes of a stream.
    ///
    /// Only these two boxes are loaded. The stream is rewound afterwards.
    pub fn read<R: ReadSeek + ?Sized>(reader: &mut R) -> mp4crypt::Result<Self> {
        let mut info = Self::default();

        for header in stream::top_level_boxes(reader)? {
            match &header.type_ {
                b"ftyp" if info.ftyp.is_none() => {
                    let atom = Atom::parse(&stream::read_box(reader, &header)?)?;
                    info.ftyp = Some(FtypBox::from_atom(&atom)?);
                }
                b"moov" if info.tracks.is_empty() => {
                    let moov = Atom::parse(&stream::read_box(reader, &header)?)?;
                    info.tracks = Self::tracks(&moov)?;
                }
                _ => (),
            }
        }

        reader.seek(SeekFrom::Start(0))?;
        Ok(info)
    }

    pub fn tracks(moov: &Atom) -> mp4crypt::Result<Vec<TrackProtection>> {
        let mut tracks = Vec::new();

        for trak in moov.children().iter().filter(|x| &x.type_ == b"trak") {
            let track_id = match trak.child(b"tkhd") {
                Some(tkhd) => TkhdBox::from_atom(tkhd)?.track_id,
                None => continue,
            };

            let entry = match trak
                .find("mdia/minf/stbl/stsd")
                .and_then(|x| x.children().first())
            {
                Some(x) => x,
                None => continue,
            };

            let scheme_type = match &entry.type_ {
                b"encv" | b"enca" | b"enct" | b"encs" => entry
                    .find("sinf/schm")
                    .map(SchmBox::from_atom)
                    .transpose()?
                    .map(|x| x.scheme_type),
                _ => None,
            };

            tracks.push(TrackProtection {
                track_id,
                entry_type: entry.type_,
                scheme_type,
            });
        }

        Ok(tracks)
    }
}

/// Pick the scheme family. The first matching rule wins:
///
/// 1. an OMA DCF brand
/// 2. a Marlin brand
/// 3. a PIFF brand
/// 4. the first track whose first sample description is protected with a
///    Common Encryption scheme
/// 5. otherwise the standard full sample schemes
pub fn detect(info: &ContainerInfo) -> SchemeFamily {
    if let Some(ftyp) = &info.ftyp {
        if ftyp.has_brand(&BRAND_OMA_DCF) {
            return SchemeFamily::OmaDcf;
        }

        if ftyp.has_brand(&BRAND_MARLIN) {
            return SchemeFamily::Marlin;
        }

        if ftyp.has_brand(&BRAND_PIFF) {
            return SchemeFamily::Cenc;
        }
    }

    let cenc = info.tracks.iter().any(|x| {
        matches!(
            x.scheme_type.as_ref(),
            Some(b"cenc" | b"cens" | b"cbc1" | b"cbcs")
        )
    });

    if cenc {
        SchemeFamily::Cenc
    } else {
        SchemeFamily::Standard
    }
}

//! Full sample schemes of non-fragmented movies: ISMACryp and OMA PDCF.

use super::{
    copy_verbatim, invalid_format, load_moov,
    movie::{MovieRewriter, SampleDecrypter, TrackDecrypter, protected_entries},
    oma::pdcf_decrypter,
};
use crate::{Error, KeyStore, Result};
use mp4crypt::{
    Atom, fourcc_to_string,
    boxes::{IsfmBox, IsltBox, Mp4Box},
    decrypt::IsmaSampleDecrypter,
    stream::{self, ReadSeek, WriteSeek},
};
use std::{collections::HashMap, sync::Arc};

pub struct StandardProcessor {
    keys: Arc<KeyStore>,
}

impl StandardProcessor {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    pub fn process(&self, input: &mut dyn ReadSeek, output: &mut dyn WriteSeek) -> Result<()> {
        let headers = stream::top_level_boxes(input)?;
        let moov = load_moov(input, &headers)?.ok_or_else(|| invalid_format("no moov box"))?;
        let mut decrypters = HashMap::new();

        for entry in protected_entries(&moov)? {
            let key = || {
                self.keys
                    .lookup_track(entry.track_id)
                    .ok_or_else(|| Error::KeyNotFound(format!("track {}", entry.track_id)))
            };

            let decrypter = match &entry.scheme_type {
                b"iAEC" => isma_decrypter(entry.sample_entry, key()?.as_bytes())?,
                b"odkm" => pdcf_decrypter(entry.sample_entry, key()?.as_bytes())?,
                x => {
                    log::warn!(
                        "track {} is protected with '{}', left as is",
                        entry.track_id,
                        fourcc_to_string(x)
                    );
                    continue;
                }
            };

            log::debug!(
                "track {}: {} sample entry {}",
                entry.track_id,
                fourcc_to_string(&entry.scheme_type),
                entry.description_index
            );

            decrypters.insert(
                entry.track_id,
                TrackDecrypter {
                    decrypter,
                    description_index: Some(entry.description_index),
                },
            );
        }

        if decrypters.is_empty() {
            log::debug!("nothing to decrypt");
            return copy_verbatim(input, output);
        }

        MovieRewriter {
            headers: &headers,
            moov,
            ftyp: None,
            decrypters,
        }
        .write(input, output)
    }
}

fn isma_decrypter(entry: &Atom, key: &[u8; 16]) -> Result<SampleDecrypter> {
    let isfm = entry
        .find("sinf/schi/iSFM")
        .ok_or_else(|| invalid_format("iAEC scheme without iSFM box"))?;
    let islt = entry
        .find("sinf/schi/iSLT")
        .map(IsltBox::from_atom)
        .transpose()?;

    Ok(SampleDecrypter::Isma(IsmaSampleDecrypter::new(
        key,
        &IsfmBox::from_atom(isfm)?,
        islt.as_ref(),
    )?))
}

//! Rebuilds a non-fragmented movie around decrypted samples.
//!
//! Full sample schemes change sample sizes, so the media data is written again
//! as a single `mdat` box followed by a `moov` box with fresh sample tables.

use super::{invalid_format, unsupported};
use crate::Result;
use mp4crypt::{
    Atom, FourCc,
    boxes::{FrmaBox, Mp4Box, SampleLocation, SampleTable, SchmBox, TkhdBox},
    decrypt::{IsmaSampleDecrypter, MarlinSampleDecrypter, OmaSampleDecrypter},
    stream::{self, BoxHeader, ReadSeek, WriteSeek},
};
use std::{
    borrow::Cow,
    collections::HashMap,
    io::{Read, Seek, SeekFrom, Write},
};

pub(crate) enum SampleDecrypter {
    Oma(OmaSampleDecrypter),
    Isma(IsmaSampleDecrypter),
    Marlin(MarlinSampleDecrypter),
}

impl SampleDecrypter {
    fn decrypt_sample(&self, data: &[u8]) -> mp4crypt::Result<Vec<u8>> {
        match self {
            Self::Oma(x) => x.decrypt_sample(data),
            Self::Isma(x) => x.decrypt_sample(data),
            Self::Marlin(x) => x.decrypt_sample(data),
        }
    }
}

pub(crate) struct TrackDecrypter {
    pub decrypter: SampleDecrypter,
    /// Only samples of this sample description are decrypted, all when `None`.
    pub description_index: Option<u32>,
}

impl TrackDecrypter {
    fn applies_to(&self, description_index: u32) -> bool {
        self.description_index
            .is_none_or(|x| x == description_index)
    }
}

/// The movie to write, taken from a parsed `moov` and the input's top level boxes.
pub(crate) struct MovieRewriter<'a> {
    pub headers: &'a [BoxHeader],
    pub moov: Atom,
    /// Replacement for the input's `ftyp` box.
    pub ftyp: Option<Atom>,
    /// Keyed by track id.
    pub decrypters: HashMap<u32, TrackDecrypter>,
}

struct Track {
    trak_index: usize,
    track_id: u32,
    table: SampleTable,
}

impl MovieRewriter<'_> {
    pub fn write(
        mut self,
        input: &mut dyn ReadSeek,
        output: &mut dyn WriteSeek,
    ) -> Result<()> {
        if self.moov.child(b"mvex").is_some() {
            return Err(unsupported(
                "fragmented movies with full sample encryption",
            ));
        }

        let mut tracks = Vec::new();

        for (trak_index, trak) in self.moov.children().iter().enumerate() {
            if &trak.type_ != b"trak" {
                continue;
            }

            let track_id = TkhdBox::from_atom(
                trak.child(b"tkhd")
                    .ok_or_else(|| invalid_format("track without header"))?,
            )?
            .track_id;
            let stbl = trak
                .find("mdia/minf/stbl")
                .ok_or_else(|| invalid_format(format!("track {} has no sample table", track_id)))?;

            tracks.push(Track {
                trak_index,
                track_id,
                table: SampleTable::from_stbl(stbl)?,
            });
        }

        for header in self.headers {
            match &header.type_ {
                b"moov" | b"mdat" => (),
                b"ftyp" if self.ftyp.is_some() => {
                    if let Some(ftyp) = self.ftyp.take() {
                        output.write_all(&ftyp.to_bytes())?;
                    }
                }
                _ => {
                    input.seek(SeekFrom::Start(header.offset))?;
                    stream::copy_bytes(input, output, header.size)?;
                }
            }
        }

        let new_tables = self.write_samples(&tracks, input, output)?;

        for (track, table) in tracks.iter().zip(new_tables) {
            let decrypter = self.decrypters.get(&track.track_id);
            let trak = self
                .moov
                .children_mut()
                .and_then(|x| x.get_mut(track.trak_index))
                .ok_or_else(|| invalid_format("track disappeared from the movie"))?;

            if let Some(stbl) = trak.find_mut("mdia/minf/stbl") {
                table.write_into(stbl);
            }

            if let Some(decrypter) = decrypter {
                unprotect_sample_entries(trak, decrypter.description_index)?;
            }
        }

        output.write_all(&self.moov.to_bytes())?;
        output.flush()?;
        Ok(())
    }

    /// Write every sample into one `mdat` box, in original file order.
    fn write_samples(
        &self,
        tracks: &[Track],
        input: &mut dyn ReadSeek,
        output: &mut dyn WriteSeek,
    ) -> Result<Vec<SampleTable>> {
        let mut order = Vec::new();

        for (i, track) in tracks.iter().enumerate() {
            for (j, sample) in track.table.samples.iter().enumerate() {
                order.push((sample.offset, i, j));
            }
        }

        order.sort_unstable();

        let mdat_offset = output.stream_position()?;
        output.write_all(&1u32.to_be_bytes())?;
        output.write_all(b"mdat")?;
        output.write_all(&0u64.to_be_bytes())?;

        let mut position = mdat_offset + 16;
        let mut new_tables = tracks.iter().map(|x| x.table.clone()).collect::<Vec<_>>();
        let mut buf = Vec::new();

        for (offset, i, j) in order {
            let track = &tracks[i];
            let sample = track.table.samples[j];

            buf.resize(sample.size as usize, 0);
            input.seek(SeekFrom::Start(offset))?;
            input.read_exact(&mut buf)?;

            let data = match self.decrypters.get(&track.track_id) {
                Some(x) if x.applies_to(sample.description_index) => {
                    Cow::Owned(x.decrypter.decrypt_sample(&buf)?)
                }
                _ => Cow::Borrowed(buf.as_slice()),
            };

            output.write_all(&data)?;

            new_tables[i].samples[j] = SampleLocation {
                offset: position,
                size: data.len() as u32,
                description_index: sample.description_index,
            };
            position += data.len() as u64;
        }

        log::debug!("wrote {} bytes of media data", position - mdat_offset - 16);

        output.seek(SeekFrom::Start(mdat_offset + 8))?;
        output.write_all(&(position - mdat_offset).to_be_bytes())?;
        output.seek(SeekFrom::Start(position))?;

        Ok(new_tables)
    }
}

/// A protected sample description.
pub(crate) struct ProtectedEntry<'a> {
    pub track_id: u32,
    /// 1-based index into the sample description box.
    pub description_index: u32,
    pub scheme_type: FourCc,
    pub sample_entry: &'a Atom,
}

/// The first protected sample description of every track.
pub(crate) fn protected_entries(moov: &Atom) -> Result<Vec<ProtectedEntry<'_>>> {
    let mut entries = Vec::new();

    for trak in moov.children().iter().filter(|x| &x.type_ == b"trak") {
        let track_id = match trak.child(b"tkhd") {
            Some(x) => TkhdBox::from_atom(x)?.track_id,
            None => continue,
        };

        let sample_entries = match trak.find("mdia/minf/stbl/stsd") {
            Some(x) => x.children(),
            None => continue,
        };

        for (i, sample_entry) in sample_entries.iter().enumerate() {
            if let Some(schm) = sample_entry.find("sinf/schm") {
                entries.push(ProtectedEntry {
                    track_id,
                    description_index: i as u32 + 1,
                    scheme_type: SchmBox::from_atom(schm)?.scheme_type,
                    sample_entry,
                });
                break;
            }
        }
    }

    Ok(entries)
}

/// Give protected sample entries their original format back and drop their `sinf` boxes.
pub(crate) fn unprotect_sample_entries(trak: &mut Atom, description_index: Option<u32>) -> Result<()> {
    let entries = match trak
        .find_mut("mdia/minf/stbl/stsd")
        .and_then(|x| x.children_mut())
    {
        Some(x) => x,
        None => return Ok(()),
    };

    for (i, entry) in entries.iter_mut().enumerate() {
        if description_index.is_some_and(|x| x as usize != i + 1) {
            continue;
        }

        let frma = match entry.find("sinf/frma") {
            Some(x) => FrmaBox::from_atom(x)?,
            None => continue,
        };

        entry.type_ = frma.original_format;
        entry.remove_children(b"sinf");
    }

    Ok(())
}

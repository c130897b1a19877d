//! OMA DRM 2.0 DCF and PDCF.

use super::{
    invalid_format, load_moov,
    movie::{MovieRewriter, SampleDecrypter, TrackDecrypter, protected_entries},
};
use crate::{Error, KeyStore, Result};
use mp4crypt::{
    Atom,
    boxes::{Mp4Box, OdafBox, OhdrBox},
    decrypt::{OmaDcfStreamDecrypter, OmaSampleDecrypter},
    stream::{self, BoxHeader, ReadSeek, WriteSeek},
};
use std::{
    collections::HashMap,
    io::{Read, Seek, SeekFrom, Write},
    sync::Arc,
};

pub struct OmaProcessor {
    keys: Arc<KeyStore>,
}

impl OmaProcessor {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    pub fn process(&self, input: &mut dyn ReadSeek, output: &mut dyn WriteSeek) -> Result<()> {
        let headers = stream::top_level_boxes(input)?;

        match load_moov(input, &headers)? {
            Some(moov) => self.process_pdcf(input, output, &headers, moov),
            None => self.process_dcf(input, output, &headers),
        }
    }

    /// Decrypt every `odrm` box, the n-th one with the key of track n.
    fn process_dcf(
        &self,
        input: &mut dyn ReadSeek,
        output: &mut dyn WriteSeek,
        headers: &[BoxHeader],
    ) -> Result<()> {
        let mut index = 0;

        for header in headers {
            if &header.type_ == b"odrm" {
                index += 1;
                self.write_odrm(input, output, header, index)?;
            } else {
                input.seek(SeekFrom::Start(header.offset))?;
                stream::copy_bytes(input, output, header.size)?;
            }
        }

        if index == 0 {
            log::warn!("no odrm boxes found, output is a plain copy");
        }

        output.flush()?;
        Ok(())
    }

    fn write_odrm(
        &self,
        input: &mut dyn ReadSeek,
        output: &mut dyn WriteSeek,
        odrm: &BoxHeader,
        index: u32,
    ) -> Result<()> {
        let key = self
            .keys
            .lookup_track(index)
            .ok_or_else(|| Error::KeyNotFound(format!("odrm box {}", index)))?;

        input.seek(SeekFrom::Start(odrm.payload_offset()))?;
        let mut version_and_flags = [0; 4];
        input.read_exact(&mut version_and_flags)?;

        let mut children = Vec::new();
        while let Some(child) = BoxHeader::read(input, odrm.end())? {
            input.seek(SeekFrom::Start(child.end()))?;
            children.push(child);
        }

        let odhe = children
            .iter()
            .find(|x| &x.type_ == b"odhe")
            .ok_or_else(|| invalid_format("odrm box without odhe box"))?;
        let mut odhe = Atom::parse(&stream::read_box(input, odhe)?)?;
        let ohdr_atom = odhe
            .child_mut(b"ohdr")
            .ok_or_else(|| invalid_format("odhe box without ohdr box"))?;
        let ohdr = OhdrBox::from_atom(ohdr_atom)?;
        OhdrBox::clear_encryption(ohdr_atom)?;

        let odda = *children
            .iter()
            .find(|x| &x.type_ == b"odda")
            .ok_or_else(|| invalid_format("odrm box without odda box"))?;

        input.seek(SeekFrom::Start(odda.payload_offset() + 4))?;
        let mut encrypted_len = [0; 8];
        input.read_exact(&mut encrypted_len)?;
        let encrypted_len = u64::from_be_bytes(encrypted_len);

        if odda.payload_size() < 12 || encrypted_len > odda.payload_size() - 12 {
            return Err(invalid_format(format!(
                "odda payload of {} bytes exceeds its box",
                encrypted_len
            )));
        }

        log::debug!(
            "odrm {}: {:?} {:?}, {} -> {} bytes",
            index,
            ohdr.encryption_method,
            ohdr.padding_scheme,
            encrypted_len,
            ohdr.plaintext_length
        );

        let odda_payload = 12 + ohdr.plaintext_length;
        let odda_size = odda_payload + if odda_payload + 8 > u32::MAX as u64 { 16 } else { 8 };
        let payload_size = 4 + children
            .iter()
            .map(|x| match &x.type_ {
                b"odhe" => odhe.size(),
                b"odda" => odda_size,
                _ => x.size,
            })
            .sum::<u64>();

        stream::write_box_header(output, b"odrm", payload_size)?;
        output.write_all(&version_and_flags)?;

        for child in &children {
            match &child.type_ {
                b"odhe" => output.write_all(&odhe.to_bytes())?,
                b"odda" => {
                    stream::write_box_header(output, b"odda", odda_payload)?;
                    input.seek(SeekFrom::Start(child.payload_offset()))?;
                    stream::copy_bytes(input, output, 4)?;
                    output.write_all(&ohdr.plaintext_length.to_be_bytes())?;

                    input.seek(SeekFrom::Start(child.payload_offset() + 12))?;
                    OmaDcfStreamDecrypter::new(key.as_bytes(), &ohdr).decrypt_stream(
                        input,
                        output,
                        encrypted_len,
                        ohdr.plaintext_length,
                    )?;
                }
                _ => {
                    input.seek(SeekFrom::Start(child.offset))?;
                    stream::copy_bytes(input, output, child.size)?;
                }
            }
        }

        Ok(())
    }

    fn process_pdcf(
        &self,
        input: &mut dyn ReadSeek,
        output: &mut dyn WriteSeek,
        headers: &[BoxHeader],
        moov: Atom,
    ) -> Result<()> {
        let mut decrypters = HashMap::new();

        for entry in protected_entries(&moov)? {
            if &entry.scheme_type != b"odkm" {
                log::warn!(
                    "track {} uses an unsupported scheme, left as is",
                    entry.track_id
                );
                continue;
            }

            let key = self
                .keys
                .lookup_track(entry.track_id)
                .ok_or_else(|| Error::KeyNotFound(format!("track {}", entry.track_id)))?;

            decrypters.insert(
                entry.track_id,
                TrackDecrypter {
                    decrypter: pdcf_decrypter(entry.sample_entry, key.as_bytes())?,
                    description_index: Some(entry.description_index),
                },
            );
        }

        MovieRewriter {
            headers,
            moov,
            ftyp: None,
            decrypters,
        }
        .write(input, output)
    }
}

/// Sample decrypter of an `odkm` protected sample entry.
pub(super) fn pdcf_decrypter(entry: &Atom, key: &[u8; 16]) -> Result<SampleDecrypter> {
    let odkm = entry
        .find("sinf/schi/odkm")
        .ok_or_else(|| invalid_format("odkm scheme without odkm box"))?;
    let ohdr = odkm
        .child(b"ohdr")
        .ok_or_else(|| invalid_format("odkm box without ohdr box"))?;
    let odaf = odkm
        .child(b"odaf")
        .ok_or_else(|| invalid_format("odkm box without odaf box"))?;

    Ok(SampleDecrypter::Oma(OmaSampleDecrypter::new(
        key,
        &OhdrBox::from_atom(ohdr)?,
        &OdafBox::from_atom(odaf)?,
    )?))
}

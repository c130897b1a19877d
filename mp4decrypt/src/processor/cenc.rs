//! Common Encryption (`cenc`, `cens`, `cbc1`, `cbcs`) and PIFF.
//!
//! Decryption never changes the size of a box. Samples are decrypted in place,
//! protected sample entries get their original format back and every box that
//! only describes the protection is turned into a `free` box of the same size.
//! All chunk and data offsets therefore stay valid.

use super::{invalid_format, load_moov};
use crate::{Error, KeyStore, Kid, Result};
use mp4crypt::{
    Atom, FourCc, Mp4Parser, ParsedBox,
    boxes::{
        self, FrmaBox, Mp4Box, PIFF_SENC_UUID, PIFF_TENC_UUID, SaioBox, SaizBox, SampleTable,
        SchmBox, SencBox, SencSample, TencBox, TfhdBox, TkhdBox, TrexBox, TrunBox,
    },
    decrypt::{CencSampleDecrypter, CencScheme},
    parser,
    stream::{self, BoxHeader, ReadSeek, WriteSeek},
};
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    io::{Read, Seek, SeekFrom, Write},
    rc::Rc,
    sync::Arc,
};

/// PIFF protection system specific header box, `uuid` d08a4f18-10f3-4a82-b6c8-32d8aba183d3.
const PIFF_PSSH_UUID: [u8; 16] = [
    0xd0, 0x8a, 0x4f, 0x18, 0x10, 0xf3, 0x4a, 0x82, 0xb6, 0xc8, 0x32, 0xd8, 0xab, 0xa1, 0x83, 0xd3,
];

pub struct CencProcessor {
    keys: Arc<KeyStore>,
}

/// Protection of one sample description.
struct EntryCrypto {
    scheme: CencScheme,
    tenc: TencBox,
}

struct CencTrack {
    track_id: u32,
    /// Indexed by sample description index - 1, `None` for clear entries.
    entries: Vec<Option<EntryCrypto>>,
    trex: Option<TrexBox>,
}

impl CencTrack {
    fn entry(&self, description_index: u32) -> Option<&EntryCrypto> {
        self.entries
            .get((description_index as usize).checked_sub(1)?)?
            .as_ref()
    }

    fn is_protected(&self) -> bool {
        self.entries.iter().any(Option::is_some)
    }
}

struct SampleJob {
    size: u64,
    decrypter: Rc<CencSampleDecrypter>,
    info: SencSample,
}

type Jobs = BTreeMap<u64, SampleJob>;

impl CencProcessor {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    pub fn process(
        &self,
        input: &mut dyn ReadSeek,
        output: &mut dyn WriteSeek,
        fragments_info: Option<&mut dyn ReadSeek>,
    ) -> Result<()> {
        let headers = stream::top_level_boxes(input)?;
        let moov = load_moov(input, &headers)?;

        let tracks = match fragments_info {
            Some(fragments_info) => {
                let headers = stream::top_level_boxes(fragments_info)?;
                let moov = load_moov(fragments_info, &headers)?.ok_or_else(|| {
                    invalid_format("fragments info stream has no movie box")
                })?;
                read_tracks(&moov)?
            }
            None => match &moov {
                Some(moov) => read_tracks(moov)?,
                None => return Err(invalid_format("no movie box found")),
            },
        };

        for track in tracks.values().filter(|x| x.is_protected()) {
            log::debug!("track {} is protected", track.track_id);
        }

        let mut jobs = Jobs::new();

        if let Some(moov) = &moov {
            self.movie_jobs(&tracks, moov, input, &mut jobs)?;
        }

        for header in &headers {
            match &header.type_ {
                b"moov" | b"moof" => {
                    let mut data = stream::read_box(input, header)?;

                    if &header.type_ == b"moof" {
                        let moof = Atom::parse(&data)?;
                        self.fragment_jobs(&tracks, &moof, &data, header.offset, &mut jobs)?;
                    }

                    strip_protection(&mut data)?;
                    output.write_all(&data)?;
                }
                b"mdat" => copy_mdat(input, output, header, &mut jobs)?,
                _ => {
                    input.seek(SeekFrom::Start(header.offset))?;
                    stream::copy_bytes(input, output, header.size)?;
                }
            }
        }

        if let Some(offset) = jobs.keys().next() {
            return Err(invalid_format(format!(
                "sample at offset {} is outside of any media data box",
                offset
            )));
        }

        output.flush()?;
        Ok(())
    }

    fn decrypter(
        &self,
        track_id: u32,
        scheme: CencScheme,
        kid: &[u8; 16],
        tenc: &TencBox,
    ) -> Result<Rc<CencSampleDecrypter>> {
        let kid = Kid::new(*kid);
        let key = self
            .keys
            .resolve(Some(&kid), track_id)
            .ok_or_else(|| Error::KeyNotFound(format!("kid {} (track {})", kid, track_id)))?;

        Ok(Rc::new(CencSampleDecrypter::new(
            scheme,
            key.as_bytes(),
            tenc.default_crypt_byte_block,
            tenc.default_skip_byte_block,
            tenc.default_constant_iv.clone(),
        )))
    }

    /// Queue the protected samples of a non-fragmented movie.
    fn movie_jobs(
        &self,
        tracks: &HashMap<u32, CencTrack>,
        moov: &Atom,
        input: &mut dyn ReadSeek,
        jobs: &mut Jobs,
    ) -> Result<()> {
        for trak in moov.children().iter().filter(|x| &x.type_ == b"trak") {
            let track = match trak
                .child(b"tkhd")
                .map(TkhdBox::from_atom)
                .transpose()?
                .and_then(|x| tracks.get(&x.track_id))
            {
                Some(x) if x.is_protected() => x,
                _ => continue,
            };

            let stbl = match trak.find("mdia/minf/stbl") {
                Some(x) if has_sample_table(x) => x,
                _ => continue,
            };

            let table = SampleTable::from_stbl(stbl)?;

            if table.samples.is_empty() {
                continue;
            }

            let infos = movie_sample_info(track, stbl, &table, input)?;
            let mut decrypters = HashMap::new();

            for (sample, info) in table.samples.iter().zip(infos) {
                let crypto = match track.entry(sample.description_index) {
                    Some(x) if x.tenc.default_is_protected => x,
                    _ => continue,
                };

                let decrypter = match decrypters.get(&sample.description_index) {
                    Some(x) => Rc::clone(x),
                    None => {
                        let decrypter = self.decrypter(
                            track.track_id,
                            crypto.scheme,
                            &crypto.tenc.default_kid,
                            &crypto.tenc,
                        )?;
                        decrypters.insert(sample.description_index, Rc::clone(&decrypter));
                        decrypter
                    }
                };

                queue(jobs, sample.offset, sample.size as u64, &decrypter, info)?;
            }

            log::debug!(
                "queued {} samples of track {}",
                table.samples.len(),
                track.track_id
            );
        }

        Ok(())
    }

    /// Queue the protected samples of a movie fragment.
    fn fragment_jobs(
        &self,
        tracks: &HashMap<u32, CencTrack>,
        moof: &Atom,
        moof_data: &[u8],
        moof_offset: u64,
        jobs: &mut Jobs,
    ) -> Result<()> {
        // Without an explicit base, a track fragment starts where the previous one ended.
        let mut next_base = moof_offset;

        for traf in moof.children().iter().filter(|x| &x.type_ == b"traf") {
            let tfhd = TfhdBox::from_atom(
                traf.child(b"tfhd")
                    .ok_or_else(|| invalid_format("track fragment without header"))?,
            )?;

            let base = match tfhd.base_data_offset {
                Some(x) => x,
                None if tfhd.default_base_is_moof() => moof_offset,
                None => next_base,
            };

            let track = tracks.get(&tfhd.track_id);
            let trex = track.and_then(|x| x.trex.as_ref());
            let description_index = tfhd
                .sample_description_index
                .or(trex.map(|x| x.default_sample_description_index))
                .unwrap_or(1);
            let default_size = tfhd
                .default_sample_size
                .or(trex.map(|x| x.default_sample_size))
                .unwrap_or(0);

            let mut samples = Vec::new();
            let mut offset = base;

            for trun in traf.children().iter().filter(|x| &x.type_ == b"trun") {
                let trun = TrunBox::from_atom(trun)?;

                if let Some(data_offset) = trun.data_offset {
                    offset = base
                        .checked_add_signed(data_offset as i64)
                        .ok_or_else(|| invalid_format("negative sample data offset"))?;
                }

                for sample in trun.samples {
                    let size = sample.sample_size.unwrap_or(default_size) as u64;
                    samples.push((offset, size));
                    offset = offset
                        .checked_add(size)
                        .ok_or_else(|| invalid_format("sample data offset overflow"))?;
                }
            }

            next_base = offset;

            let crypto = match track.and_then(|x| x.entry(description_index)) {
                Some(x) => x,
                None => continue,
            };

            if samples.is_empty() {
                continue;
            }

            let (infos, piff_override) = fragment_sample_info(
                traf,
                moof_data,
                moof_offset,
                base,
                crypto.tenc.default_per_sample_iv_size,
                samples.len(),
            )?;

            let (scheme, kid) = match piff_override {
                Some((algorithm, kid)) => match CencScheme::from_piff_algorithm(algorithm)? {
                    Some(scheme) => (scheme, kid),
                    None => continue,
                },
                None if crypto.tenc.default_is_protected => (crypto.scheme, crypto.tenc.default_kid),
                None => continue,
            };

            let decrypter = self.decrypter(tfhd.track_id, scheme, &kid, &crypto.tenc)?;

            for ((offset, size), info) in samples.into_iter().zip(infos) {
                queue(jobs, offset, size, &decrypter, info)?;
            }

            log::trace!(
                "queued fragment samples of track {} at base offset {}",
                tfhd.track_id,
                base
            );
        }

        Ok(())
    }
}

fn queue(
    jobs: &mut Jobs,
    offset: u64,
    size: u64,
    decrypter: &Rc<CencSampleDecrypter>,
    info: SencSample,
) -> Result<()> {
    if size == 0 {
        return Ok(());
    }

    let job = SampleJob {
        size,
        decrypter: Rc::clone(decrypter),
        info,
    };

    if jobs.insert(offset, job).is_some() {
        return Err(invalid_format(format!(
            "two samples start at offset {}",
            offset
        )));
    }

    Ok(())
}

/// Copy a media data box, decrypting the queued samples it contains.
fn copy_mdat(
    input: &mut dyn ReadSeek,
    output: &mut dyn WriteSeek,
    header: &BoxHeader,
    jobs: &mut Jobs,
) -> Result<()> {
    input.seek(SeekFrom::Start(header.offset))?;
    stream::copy_bytes(input, output, header.header_size)?;

    let end = header.end();
    let mut position = header.payload_offset();
    let mut sample = Vec::new();

    while let Some(entry) = jobs.first_entry() {
        let offset = *entry.key();

        if offset >= end {
            break;
        }

        if offset < position {
            return Err(invalid_format(format!(
                "sample at offset {} overlaps other data",
                offset
            )));
        }

        let job = entry.remove();

        if offset + job.size > end {
            return Err(invalid_format(format!(
                "sample at offset {} extends past its media data box",
                offset
            )));
        }

        stream::copy_bytes(input, output, offset - position)?;

        sample.resize(job.size as usize, 0);
        input.read_exact(&mut sample)?;
        job.decrypter
            .decrypt_sample(&mut sample, &job.info.iv, &job.info.subsamples)?;
        output.write_all(&sample)?;

        position = offset + job.size;
    }

    stream::copy_bytes(input, output, end - position)?;
    Ok(())
}

fn has_sample_table(stbl: &Atom) -> bool {
    (stbl.child(b"stsz").is_some() || stbl.child(b"stz2").is_some())
        && (stbl.child(b"stco").is_some() || stbl.child(b"co64").is_some())
}

fn read_tracks(moov: &Atom) -> Result<HashMap<u32, CencTrack>> {
    let mut trexs = HashMap::new();

    if let Some(mvex) = moov.child(b"mvex") {
        for trex in mvex.children().iter().filter(|x| &x.type_ == b"trex") {
            let trex = TrexBox::from_atom(trex)?;
            trexs.insert(trex.track_id, trex);
        }
    }

    let mut tracks = HashMap::new();

    for trak in moov.children().iter().filter(|x| &x.type_ == b"trak") {
        let track_id = match trak.child(b"tkhd") {
            Some(x) => TkhdBox::from_atom(x)?.track_id,
            None => continue,
        };

        let entries = match trak.find("mdia/minf/stbl/stsd") {
            Some(stsd) => stsd
                .children()
                .iter()
                .map(entry_crypto)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        tracks.insert(
            track_id,
            CencTrack {
                track_id,
                entries,
                trex: trexs.remove(&track_id),
            },
        );
    }

    Ok(tracks)
}

fn entry_crypto(entry: &Atom) -> Result<Option<EntryCrypto>> {
    if !matches!(&entry.type_, b"encv" | b"enca" | b"enct" | b"encs") {
        return Ok(None);
    }

    let sinf = match entry.child(b"sinf") {
        Some(x) => x,
        None => {
            log::warn!("protected sample entry without protection scheme info");
            return Ok(None);
        }
    };

    let scheme_type = match sinf.child(b"schm") {
        Some(x) => SchmBox::from_atom(x)?.scheme_type,
        None => *b"piff",
    };

    let schi = sinf.child(b"schi");
    let tenc = match schi.and_then(|x| x.child(b"tenc")) {
        Some(x) => Some(TencBox::from_atom(x)?),
        None => match schi.and_then(|x| find_uuid(x, &PIFF_TENC_UUID)) {
            Some(x) => Some(TencBox::from_piff(&mut x.reader())?),
            None => None,
        },
    };

    let scheme = match &scheme_type {
        b"piff" => match &tenc {
            Some(tenc) => CencScheme::from_piff_algorithm(tenc.piff_algorithm.unwrap_or(1))?,
            None => None,
        },
        x => CencScheme::from_scheme_type(x),
    };

    let scheme = match scheme {
        Some(x) => x,
        None => {
            log::debug!(
                "leaving '{}' sample entry with scheme '{}' untouched",
                mp4crypt::fourcc_to_string(&entry.type_),
                mp4crypt::fourcc_to_string(&scheme_type)
            );
            return Ok(None);
        }
    };

    let tenc = tenc
        .ok_or_else(|| invalid_format("protected sample entry without track encryption box"))?;

    Ok(Some(EntryCrypto { scheme, tenc }))
}

fn find_uuid<'a>(parent: &'a Atom, uuid: &[u8; 16]) -> Option<&'a Atom> {
    parent
        .children()
        .iter()
        .find(|x| &x.type_ == b"uuid" && x.prefix().starts_with(uuid))
}

/// Read `saiz`/`saio` described auxiliary information.
///
/// `at` maps a sample index and its info size to the bytes of the entry.
fn aux_sample_info<F>(
    saiz: &SaizBox,
    saio: &SaioBox,
    iv_size: u8,
    count: usize,
    mut at: F,
) -> Result<Vec<SencSample>>
where
    F: FnMut(u64, usize) -> Result<Vec<u8>>,
{
    if saio.offsets.is_empty() || (saio.offsets.len() != 1 && saio.offsets.len() < count) {
        return Err(invalid_format("auxiliary information offsets do not cover all samples"));
    }

    let mut infos = Vec::with_capacity(count);
    let mut offset = saio.offsets[0];

    for i in 0..count {
        let size = saiz.size_of(i) as usize;

        if saio.offsets.len() != 1 {
            offset = saio.offsets[i];
        }

        infos.push(SencSample::from_aux_info(&at(offset, size)?, iv_size)?);
        offset = offset
            .checked_add(size as u64)
            .ok_or_else(|| invalid_format("auxiliary information offset overflow"))?;
    }

    Ok(infos)
}

fn constant_iv_info(iv_size: u8, count: usize) -> Result<Vec<SencSample>> {
    if iv_size != 0 {
        return Err(invalid_format("missing sample encryption information"));
    }

    Ok(vec![SencSample::default(); count])
}

fn movie_sample_info(
    track: &CencTrack,
    stbl: &Atom,
    table: &SampleTable,
    input: &mut dyn ReadSeek,
) -> Result<Vec<SencSample>> {
    let iv_size = track
        .entries
        .iter()
        .flatten()
        .next()
        .map(|x| x.tenc.default_per_sample_iv_size)
        .unwrap_or(0);
    let count = table.samples.len();

    if let Some(senc) = stbl.child(b"senc") {
        let (_, flags, mut reader) = senc.full_box_reader()?;
        let senc = SencBox::parse(&mut reader, flags, iv_size)?;
        return with_count(senc.samples, count);
    }

    match (stbl.child(b"saiz"), stbl.child(b"saio")) {
        (Some(saiz), Some(saio)) => {
            let saiz = SaizBox::from_atom(saiz)?;
            let saio = SaioBox::from_atom(saio)?;

            aux_sample_info(&saiz, &saio, iv_size, count, |offset, size| {
                let mut data = vec![0; size];
                input.seek(SeekFrom::Start(offset))?;
                input.read_exact(&mut data)?;
                Ok(data)
            })
        }
        _ => constant_iv_info(iv_size, count),
    }
}

type PiffOverride = Option<(u32, [u8; 16])>;

fn fragment_sample_info(
    traf: &Atom,
    moof_data: &[u8],
    moof_offset: u64,
    base: u64,
    iv_size: u8,
    count: usize,
) -> Result<(Vec<SencSample>, PiffOverride)> {
    if let Some(senc) = traf.child(b"senc") {
        let (_, flags, mut reader) = senc.full_box_reader()?;
        let senc = SencBox::parse(&mut reader, flags, iv_size)?;
        return Ok((with_count(senc.samples, count)?, None));
    }

    if let Some(uuid) = find_uuid(traf, &PIFF_SENC_UUID) {
        let senc = SencBox::from_piff(&mut uuid.reader(), iv_size)?;
        let piff_override = senc.override_algorithm.zip(senc.override_kid);
        return Ok((with_count(senc.samples, count)?, piff_override));
    }

    match (traf.child(b"saiz"), traf.child(b"saio")) {
        (Some(saiz), Some(saio)) => {
            let saiz = SaizBox::from_atom(saiz)?;
            let saio = SaioBox::from_atom(saio)?;

            let infos = aux_sample_info(&saiz, &saio, iv_size, count, |offset, size| {
                let start = base
                    .checked_add(offset)
                    .and_then(|x| x.checked_sub(moof_offset))
                    .and_then(|x| usize::try_from(x).ok())
                    .filter(|x| x.checked_add(size).is_some_and(|end| end <= moof_data.len()))
                    .ok_or_else(|| {
                        Error::Container(mp4crypt::Error::Unsupported(
                            "auxiliary information outside of the movie fragment".to_owned(),
                        ))
                    })?;
                Ok(moof_data[start..start + size].to_vec())
            })?;

            Ok((infos, None))
        }
        _ => Ok((constant_iv_info(iv_size, count)?, None)),
    }
}

fn with_count(samples: Vec<SencSample>, count: usize) -> Result<Vec<SencSample>> {
    if samples.len() < count {
        return Err(invalid_format(format!(
            "sample encryption box describes {} of {} samples",
            samples.len(),
            count
        )));
    }

    Ok(samples)
}

#[derive(Default)]
struct EntryPatch {
    start: u64,
    sinf: Option<u64>,
    original_format: Option<FourCc>,
    scheme_type: Option<FourCc>,
}

/// Remove the protection signalling from a buffered `moov` or `moof` box in place.
fn strip_protection(data: &mut [u8]) -> Result<()> {
    let frees = Rc::new(RefCell::new(Vec::new()));
    let entries = Rc::new(RefCell::new(Vec::<EntryPatch>::new()));

    let free = |frees: &Rc<RefCell<Vec<u64>>>| {
        let frees = Rc::clone(frees);
        move |box_: ParsedBox| -> mp4crypt::Result<()> {
            frees.borrow_mut().push(box_.start);
            Ok(())
        }
    };

    let sample_entry = |entries: &Rc<RefCell<Vec<EntryPatch>>>,
                        body: fn(ParsedBox) -> parser::HandlerResult| {
        let entries = Rc::clone(entries);
        move |box_: ParsedBox| -> mp4crypt::Result<()> {
            entries.borrow_mut().push(EntryPatch {
                start: box_.start,
                ..Default::default()
            });
            body(box_)
        }
    };

    Mp4Parser::new()
        .base_box("moov", parser::children)
        .base_box("trak", parser::children)
        .base_box("mdia", parser::children)
        .base_box("minf", parser::children)
        .base_box("stbl", parser::children)
        .base_box("moof", parser::children)
        .base_box("traf", parser::children)
        .full_box("stsd", parser::sample_description)
        .base_box("encv", sample_entry(&entries, parser::visual_sample_entry))
        .base_box("enca", sample_entry(&entries, parser::audio_sample_entry))
        .base_box("enct", sample_entry(&entries, parser::text_sample_entry))
        .base_box("encs", sample_entry(&entries, parser::text_sample_entry))
        .base_box("sinf", {
            let entries = Rc::clone(&entries);
            move |box_| {
                if let Some(entry) = entries.borrow_mut().last_mut() {
                    entry.sinf.get_or_insert(box_.start);
                }
                parser::children(box_)
            }
        })
        .base_box("frma", {
            let entries = Rc::clone(&entries);
            move |mut box_| {
                let frma = FrmaBox::from_parsed(&mut box_)?;
                if let Some(entry) = entries.borrow_mut().last_mut() {
                    entry.original_format.get_or_insert(frma.original_format);
                }
                Ok(())
            }
        })
        .full_box("schm", {
            let entries = Rc::clone(&entries);
            move |mut box_| {
                let schm = SchmBox::from_parsed(&mut box_)?;
                if let Some(entry) = entries.borrow_mut().last_mut() {
                    entry.scheme_type.get_or_insert(schm.scheme_type);
                }
                Ok(())
            }
        })
        .full_box("pssh", free(&frees))
        .full_box("senc", free(&frees))
        .full_box("saiz", free(&frees))
        .full_box("saio", free(&frees))
        .base_box("uuid", {
            let frees = Rc::clone(&frees);
            move |mut box_| {
                let uuid = boxes::read_uuid(&mut box_.reader)?;
                if uuid == PIFF_SENC_UUID || uuid == PIFF_PSSH_UUID {
                    frees.borrow_mut().push(box_.start);
                }
                Ok(())
            }
        })
        .parse(data, false, false)?;

    let mut renames = frees
        .borrow()
        .iter()
        .map(|x| (*x, *b"free"))
        .collect::<Vec<_>>();

    for entry in entries.borrow().iter() {
        let scheme_type = entry.scheme_type.unwrap_or(*b"piff");

        if !matches!(&scheme_type, b"cenc" | b"cens" | b"cbc1" | b"cbcs" | b"piff") {
            continue;
        }

        if let Some(original_format) = entry.original_format {
            renames.push((entry.start, original_format));
        }

        if let Some(sinf) = entry.sinf {
            renames.push((sinf, *b"free"));
        }
    }

    for (start, type_) in renames {
        let start = start as usize + 4;
        data[start..start + 4].copy_from_slice(&type_);
    }

    Ok(())
}

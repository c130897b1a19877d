//! Builders for small protected movies.
//!
//! Movies are laid out as `ftyp`, `mdat`, `moov` so that chunk offsets are
//! known before the `moov` box is built.

#![allow(dead_code)]

use aes::{
    Aes128,
    cipher::{
        BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher, block_padding::Pkcs7,
        generic_array::GenericArray,
    },
};
use mp4crypt::Atom;

pub const KID: [u8; 16] = [
    0xeb, 0x67, 0x6a, 0xbb, 0xcb, 0x34, 0x5e, 0x96, 0xbb, 0xcf, 0x61, 0x66, 0x30, 0xf1, 0xa3, 0xda,
];
pub const KEY: [u8; 16] = [
    0x10, 0x0b, 0x6c, 0x20, 0x94, 0x0f, 0x77, 0x9a, 0x45, 0x89, 0x15, 0x2b, 0x57, 0xd2, 0xda, 0xcb,
];
pub const KID_HEX: &str = "eb676abbcb345e96bbcf616630f1a3da";
pub const KEY_HEX: &str = "100b6c20940f779a4589152b57d2dacb";

pub fn container(type_: &[u8; 4], children: Vec<Atom>) -> Atom {
    Atom::new_container(*type_, vec![], children)
}

pub fn full(type_: &[u8; 4], payload: &[u8]) -> Atom {
    Atom::new_full(*type_, 0, 0, payload)
}

pub fn ftyp(major: &[u8; 4], compatible: &[&[u8; 4]]) -> Atom {
    let mut data = major.to_vec();
    data.extend_from_slice(&0u32.to_be_bytes());
    for brand in compatible {
        data.extend_from_slice(*brand);
    }
    Atom::new_data(*b"ftyp", data)
}

pub fn tkhd(track_id: u32) -> Atom {
    let mut payload = vec![0; 8];
    payload.extend_from_slice(&track_id.to_be_bytes());
    payload.extend_from_slice(&[0; 68]);
    Atom::new_full(*b"tkhd", 0, 3, &payload)
}

pub fn hdlr(handler_type: &[u8; 4]) -> Atom {
    let mut payload = vec![0; 4];
    payload.extend_from_slice(handler_type);
    payload.extend_from_slice(&[0; 13]);
    full(b"hdlr", &payload)
}

/// `frma`, `schm` and `schi` of a protected sample entry.
pub fn sinf(original_format: &[u8; 4], scheme_type: Option<&[u8; 4]>, schi: Vec<Atom>) -> Atom {
    let mut children = vec![Atom::new_data(*b"frma", original_format.to_vec())];

    if let Some(scheme_type) = scheme_type {
        let mut schm = scheme_type.to_vec();
        schm.extend_from_slice(&0x10000u32.to_be_bytes());
        children.push(full(b"schm", &schm));
    }

    children.push(container(b"schi", schi));
    container(b"sinf", children)
}

pub fn encv(sinf: Atom) -> Atom {
    let avcc = Atom::new_data(*b"avcC", vec![1, 0x64, 0, 0x1f, 0xff]);
    Atom::new_container(*b"encv", vec![0; 78], vec![avcc, sinf])
}

pub fn enca(sinf: Atom) -> Atom {
    let esds = full(b"esds", &[3, 5, 0, 1, 0, 0, 0]);
    Atom::new_container(*b"enca", vec![0; 28], vec![esds, sinf])
}

pub fn tenc(iv_size: u8) -> Atom {
    let mut payload = vec![0, 0, 1, iv_size];
    payload.extend_from_slice(&KID);
    full(b"tenc", &payload)
}

/// Version 1 `tenc` with a crypt/skip pattern and a constant IV.
pub fn tenc_pattern(crypt: u8, skip: u8, constant_iv: &[u8; 16]) -> Atom {
    let mut payload = vec![0, crypt << 4 | skip, 1, 0];
    payload.extend_from_slice(&KID);
    payload.push(16);
    payload.extend_from_slice(constant_iv);
    Atom::new_full(*b"tenc", 1, 0, &payload)
}

/// Sample table with all samples in one chunk at `offset`.
pub fn stbl(entries: Vec<Atom>, sizes: &[u32], offset: u32, extra: Vec<Atom>) -> Atom {
    let mut stsd = vec![0; 4];
    stsd.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    let mut stsz = vec![0; 4];
    stsz.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
    for size in sizes {
        stsz.extend_from_slice(&size.to_be_bytes());
    }

    let (stsc, stco) = if sizes.is_empty() {
        (vec![0; 4], vec![0; 4])
    } else {
        (
            [1u32, 1, sizes.len() as u32, 1]
                .iter()
                .flat_map(|x| x.to_be_bytes())
                .collect(),
            [1u32, offset].iter().flat_map(|x| x.to_be_bytes()).collect(),
        )
    };

    let mut children = vec![
        Atom::new_container(*b"stsd", stsd, entries),
        full(b"stsz", &stsz),
        full(b"stsc", &stsc),
        full(b"stco", &stco),
    ];
    children.extend(extra);
    container(b"stbl", children)
}

pub fn trak(track_id: u32, handler_type: &[u8; 4], stbl: Atom) -> Atom {
    let minf = container(b"minf", vec![stbl]);
    let mdia = container(b"mdia", vec![hdlr(handler_type), minf]);
    container(b"trak", vec![tkhd(track_id), mdia])
}

pub fn mvhd() -> Atom {
    full(b"mvhd", &[0; 96])
}

/// First byte of the media data when the movie is laid out by [`movie`].
pub fn media_offset(ftyp: &Atom) -> u32 {
    ftyp.size() as u32 + 8
}

pub fn movie(ftyp: &Atom, media: &[u8], moov: &Atom) -> Vec<u8> {
    let mut data = ftyp.to_bytes();
    data.extend(Atom::new_data(*b"mdat", media.to_vec()).to_bytes());
    data.extend(moov.to_bytes());
    data
}

/// Payload of the first top level box of `type_`.
pub fn top_level(data: &[u8], type_: &[u8; 4]) -> Atom {
    Atom::parse_all(data)
        .unwrap()
        .into_iter()
        .find(|x| &x.type_ == type_)
        .unwrap()
}

pub fn mdat_payload(data: &[u8]) -> Vec<u8> {
    top_level(data, b"mdat").payload()
}

pub fn samples() -> Vec<Vec<u8>> {
    vec![
        (0..40).collect(),
        (0..33).map(|x| x * 3).collect(),
        (0..200u32).map(|x| (x * 7) as u8).collect(),
    ]
}

pub fn sizes(samples: &[Vec<u8>]) -> Vec<u32> {
    samples.iter().map(|x| x.len() as u32).collect()
}

pub fn ctr64_encrypt(key: &[u8; 16], iv: &[u8], data: &mut [u8]) {
    let mut counter = [0; 16];
    counter[..iv.len()].copy_from_slice(iv);
    ctr::Ctr64BE::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(&counter))
        .apply_keystream(data);
}

/// `iv || AES-CBC(data)` with PKCS#7 padding.
pub fn cbc_encrypt_padded(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();
    buf.resize(data.len() / 16 * 16 + 16, 0);

    let len = cbc::Encryptor::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_mut::<Pkcs7>(&mut buf, data.len())
        .unwrap()
        .len();
    buf.truncate(len);

    [iv.to_vec(), buf].concat()
}

/// Encrypt a sample with a `crypt:skip` pattern, chaining across encrypted runs.
pub fn cbcs_encrypt(key: &[u8; 16], iv: &[u8; 16], crypt: usize, skip: usize, data: &mut [u8]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut prev = *iv;

    for range in crypt_runs(data.len(), crypt, skip) {
        for block in data[range].chunks_exact_mut(16) {
            for (x, p) in block.iter_mut().zip(prev.iter()) {
                *x ^= p;
            }
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
            prev.copy_from_slice(block);
        }
    }
}

/// Encrypt a sample with a `crypt:skip` pattern, one keystream over all encrypted runs.
pub fn cens_encrypt(key: &[u8; 16], iv: &[u8], crypt: usize, skip: usize, data: &mut [u8]) {
    let mut counter = [0; 16];
    counter[..iv.len()].copy_from_slice(iv);
    let mut ctr = ctr::Ctr64BE::<Aes128>::new(
        GenericArray::from_slice(key),
        GenericArray::from_slice(&counter),
    );

    for range in crypt_runs(data.len(), crypt, skip) {
        ctr.apply_keystream(&mut data[range]);
    }
}

/// AES-CBC over the whole blocks of a sample.
pub fn cbc1_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    let whole_blocks = data.len() / 16;
    cbcs_encrypt(key, iv, whole_blocks, 0, &mut data[..whole_blocks * 16]);
}

/// Whole-block crypt runs of a `crypt:skip` pattern over `len` bytes.
fn crypt_runs(len: usize, crypt: usize, skip: usize) -> Vec<std::ops::Range<usize>> {
    let mut runs = Vec::new();
    let mut offset = 0;

    while offset < len {
        let run = (len - offset).min(crypt * 16) / 16 * 16;
        if run == 0 {
            break;
        }
        runs.push(offset..offset + run);
        offset = (offset + run + skip * 16).min(len);
    }

    runs
}

// Common Encryption

pub const IVS: [[u8; 8]; 3] = [[1; 8], [2; 8], [3; 8]];

/// Bytes of each sample left clear by the subsample map.
pub const CLEAR_BYTES: u16 = 5;

/// `crypt:skip` blocks of the pattern schemes. Samples shorter than a full
/// stride end in a run of fewer than `crypt` blocks.
pub const PATTERN: (u8, u8) = (3, 1);

#[derive(Clone, Copy, Debug)]
pub enum Protection {
    Cenc,
    Cens,
    Cbc1,
    Cbcs,
}

impl Protection {
    pub fn scheme_type(&self) -> &'static [u8; 4] {
        match self {
            Self::Cenc => b"cenc",
            Self::Cens => b"cens",
            Self::Cbc1 => b"cbc1",
            Self::Cbcs => b"cbcs",
        }
    }

    pub fn iv_size(&self) -> u8 {
        match self {
            Self::Cenc | Self::Cens => 8,
            Self::Cbc1 | Self::Cbcs => 16,
        }
    }

    pub fn tenc(&self) -> Atom {
        match self {
            Self::Cenc | Self::Cbc1 => tenc(self.iv_size()),
            Self::Cens | Self::Cbcs => {
                let (crypt, skip) = PATTERN;
                let mut payload = vec![0, crypt << 4 | skip, 1, self.iv_size()];
                payload.extend_from_slice(&KID);
                Atom::new_full(*b"tenc", 1, 0, &payload)
            }
        }
    }

    pub fn entry(&self) -> Atom {
        encv(sinf(b"avc1", Some(self.scheme_type()), vec![self.tenc()]))
    }

    pub fn ivs(&self) -> Vec<Vec<u8>> {
        IVS.iter().map(|x| x.repeat(self.iv_size() as usize / 8)).collect()
    }

    pub fn encrypt(&self, samples: &[Vec<u8>], with_subsamples: bool) -> Vec<u8> {
        let (crypt, skip) = (PATTERN.0 as usize, PATTERN.1 as usize);
        let clear = if with_subsamples { CLEAR_BYTES as usize } else { 0 };
        let mut media = Vec::new();

        for (sample, iv) in samples.iter().zip(self.ivs()) {
            let mut sample = sample.clone();
            let data = &mut sample[clear..];

            match self {
                Self::Cenc => ctr64_encrypt(&KEY, &iv, data),
                Self::Cens => cens_encrypt(&KEY, &iv, crypt, skip, data),
                Self::Cbc1 => cbc1_encrypt(&KEY, &iv.clone().try_into().unwrap(), data),
                Self::Cbcs => cbcs_encrypt(&KEY, &iv.clone().try_into().unwrap(), crypt, skip, data),
            }

            media.extend(sample);
        }

        media
    }
}

/// Sample auxiliary information: the IV and an optional one entry subsample map.
pub fn sample_infos(ivs: &[Vec<u8>], samples: &[Vec<u8>], with_subsamples: bool) -> Vec<Vec<u8>> {
    samples
        .iter()
        .zip(ivs)
        .map(|(sample, iv)| {
            let mut info = iv.clone();

            if with_subsamples {
                info.extend_from_slice(&1u16.to_be_bytes());
                info.extend_from_slice(&CLEAR_BYTES.to_be_bytes());
                info.extend_from_slice(&(sample.len() as u32 - CLEAR_BYTES as u32).to_be_bytes());
            }

            info
        })
        .collect()
}

/// `senc` payload with version and flags.
pub fn senc(flags: u32, with_subsamples: bool, samples: &[Vec<u8>]) -> Vec<u8> {
    senc_payload(flags, &sample_infos(&Protection::Cenc.ivs(), samples, with_subsamples))
}

fn senc_payload(flags: u32, infos: &[Vec<u8>]) -> Vec<u8> {
    let mut data = flags.to_be_bytes().to_vec();
    data.extend_from_slice(&(infos.len() as u32).to_be_bytes());
    data.extend(infos.concat());
    data
}

pub fn cenc_encrypt(samples: &[Vec<u8>], with_subsamples: bool) -> Vec<u8> {
    Protection::Cenc.encrypt(samples, with_subsamples)
}

pub fn saiz(infos: &[Vec<u8>]) -> Atom {
    let mut payload = vec![0];
    payload.extend_from_slice(&(infos.len() as u32).to_be_bytes());
    payload.extend(infos.iter().map(|x| x.len() as u8));
    full(b"saiz", &payload)
}

pub fn saio(offset: u32) -> Atom {
    full(b"saio", &[1u32.to_be_bytes(), offset.to_be_bytes()].concat())
}

pub fn init(ftyp: Atom, entry: Atom) -> Vec<u8> {
    let mut trex = 1u32.to_be_bytes().to_vec();
    trex.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

    let moov = container(b"moov", vec![
        mvhd(),
        trak(1, b"vide", stbl(vec![entry], &[], 0, vec![])),
        container(b"mvex", vec![full(b"trex", &trex)]),
    ]);

    [ftyp.to_bytes(), moov.to_bytes()].concat()
}

fn moof(sizes: &[u32], data_offset: u32, traf_extra: Vec<Atom>, moof_extra: Vec<Atom>) -> Atom {
    let mut trun = (sizes.len() as u32).to_be_bytes().to_vec();
    trun.extend_from_slice(&data_offset.to_be_bytes());
    for size in sizes {
        trun.extend_from_slice(&size.to_be_bytes());
    }

    let mut traf = vec![
        Atom::new_full(*b"tfhd", 0, 0x020000, &1u32.to_be_bytes()),
        Atom::new_full(*b"trun", 0, 0x000201, &trun),
    ];
    traf.extend(traf_extra);

    let mut children = vec![full(b"mfhd", &1u32.to_be_bytes()), container(b"traf", traf)];
    children.extend(moof_extra);
    container(b"moof", children)
}

pub fn fragment(sizes: &[u32], traf_extra: Vec<Atom>, moof_extra: Vec<Atom>, media: &[u8]) -> Vec<u8> {
    let size = moof(sizes, 0, traf_extra.clone(), moof_extra.clone()).size() as u32;
    let moof = moof(sizes, size + 8, traf_extra, moof_extra);
    [moof.to_bytes(), Atom::new_data(*b"mdat", media.to_vec()).to_bytes()].concat()
}

pub fn segment(sizes: &[u32], encryption: Atom, media: &[u8]) -> Vec<u8> {
    fragment(sizes, vec![encryption], vec![], media)
}

/// Segment whose sample information sits in a `free` box after the `traf`,
/// located through `saiz` and `saio` relative to the `moof`.
pub fn aux_info_segment(sizes: &[u32], infos: &[Vec<u8>], media: &[u8]) -> Vec<u8> {
    let aux = Atom::new_data(*b"free", infos.concat());
    let traf_extra = |offset: u32| vec![saiz(infos), saio(offset)];

    let draft = moof(sizes, 0, traf_extra(0), vec![aux.clone()]);
    let offset = (draft.size() - aux.size()) as u32 + 8;

    fragment(sizes, traf_extra(offset), vec![aux], media)
}

/// Protected `init` and `segment` of track 1, with the samples they hold.
///
/// With `aux_info` the segment carries `saiz` and `saio` instead of `senc`.
pub fn protected_fragment(
    protection: Protection,
    with_subsamples: bool,
    aux_info: bool,
) -> (Vec<u8>, Vec<u8>, Vec<Vec<u8>>) {
    let samples = samples();
    let init = init(ftyp(b"iso6", &[b"dash", b"cmfc"]), protection.entry());
    let infos = sample_infos(&protection.ivs(), &samples, with_subsamples);
    let media = protection.encrypt(&samples, with_subsamples);

    let segment = if aux_info {
        aux_info_segment(&sizes(&samples), &infos, &media)
    } else {
        let flags = if with_subsamples { 2 } else { 0 };
        let senc = Atom::new_data(*b"senc", senc_payload(flags, &infos));
        segment(&sizes(&samples), senc, &media)
    };

    (init, segment, samples)
}

/// `cenc` protected `init` and `segment` of track 1, with the samples they hold.
pub fn cenc_fragment(with_subsamples: bool) -> (Vec<u8>, Vec<u8>, Vec<Vec<u8>>) {
    protected_fragment(Protection::Cenc, with_subsamples, false)
}

/// Movie laid out as `ftyp`, `free`, `mdat`, `moov`. The `free` box holds the
/// sample information that `saiz` and `saio` in the `stbl` point to.
pub fn aux_info_movie(protection: Protection, with_subsamples: bool) -> (Vec<u8>, Vec<Vec<u8>>) {
    let samples = samples();
    let ftyp = ftyp(b"isom", &[b"iso6"]);
    let infos = sample_infos(&protection.ivs(), &samples, with_subsamples);

    let aux = Atom::new_data(*b"free", infos.concat());
    let aux_offset = ftyp.size() as u32 + 8;
    let media_offset = (ftyp.size() + aux.size()) as u32 + 8;

    let stbl = stbl(
        vec![protection.entry()],
        &sizes(&samples),
        media_offset,
        vec![saiz(&infos), saio(aux_offset)],
    );
    let moov = container(b"moov", vec![mvhd(), trak(1, b"vide", stbl)]);

    let mut data = ftyp.to_bytes();
    data.extend(aux.to_bytes());
    data.extend(Atom::new_data(*b"mdat", protection.encrypt(&samples, with_subsamples)).to_bytes());
    data.extend(moov.to_bytes());

    (data, samples)
}

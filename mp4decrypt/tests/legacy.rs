mod common;

use common::*;
use mp4crypt::{
    Atom,
    boxes::{FtypBox, Mp4Box, OhdrBox, OmaEncryptionMethod, SampleTable},
};
use mp4decrypt::{Error, Mp4Decrypter, SchemeFamily, code};

const IV: [u8; 16] = [0x24; 16];
const SALT: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
const SECOND_KEY: &str = "0f0e0d0c0b0a09080706050403020100";

// RFC 3394, 4.1
const GROUP_KEY: &str = "000102030405060708090a0b0c0d0e0f";
const UNWRAPPED_KEY: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
];
const WRAPPED_KEY: [u8; 24] = [
    0x1f, 0xa6, 0x8b, 0x0a, 0x81, 0x12, 0xb4, 0x47, 0xae, 0xf3, 0x4b, 0xd8, 0xfb, 0x5a, 0x7b, 0x82,
    0x9d, 0x3e, 0x86, 0x23, 0x71, 0xd2, 0xcf, 0xe5,
];

fn ohdr(method: u8, padding: u8, plaintext_length: u64) -> Atom {
    let mut payload = vec![method, padding];
    payload.extend_from_slice(&plaintext_length.to_be_bytes());
    payload.extend_from_slice(&[0, 3, 0, 0, 0, 0]);
    payload.extend_from_slice(b"cid");
    full(b"ohdr", &payload)
}

fn odrm(key: &[u8; 16], plaintext: &[u8]) -> Atom {
    let mut odhe = vec![0, 0, 0, 0, 9];
    odhe.extend_from_slice(b"video/mp4");
    let odhe = Atom::new_container(*b"odhe", odhe, vec![ohdr(1, 1, plaintext.len() as u64)]);

    let encrypted = cbc_encrypt_padded(key, &IV, plaintext);
    let mut odda = (encrypted.len() as u64).to_be_bytes().to_vec();
    odda.extend(encrypted);

    Atom::new_container(*b"odrm", vec![0; 4], vec![odhe, full(b"odda", &odda)])
}

fn hex_key(key: &str) -> [u8; 16] {
    hex::decode(key).unwrap().try_into().unwrap()
}

/// Plaintext of a decrypted `odrm` box.
fn odda_plaintext(odrm: &Atom) -> Vec<u8> {
    let odda = odrm.child(b"odda").unwrap().payload();
    let len = u64::from_be_bytes(odda[4..12].try_into().unwrap()) as usize;
    assert_eq!(odda.len(), 12 + len);
    odda[12..].to_vec()
}

/// Samples as laid out by the rewritten sample tables of `trak`.
fn rewritten_samples(output: &[u8], trak: &Atom) -> Vec<Vec<u8>> {
    let table = SampleTable::from_stbl(trak.find("mdia/minf/stbl").unwrap()).unwrap();
    table
        .samples
        .iter()
        .map(|x| output[x.offset as usize..][..x.size as usize].to_vec())
        .collect()
}

#[test]
fn decrypts_dcf_boxes_with_keys_by_position() {
    let second_key = hex_key(SECOND_KEY);
    let first: Vec<u8> = (0..100).collect();
    let second: Vec<u8> = (0..70_000u32).map(|x| (x % 251) as u8).collect();

    let mut input = ftyp(b"odcf", &[b"odcf"]).to_bytes();
    input.extend(odrm(&KEY, &first).to_bytes());
    input.extend(odrm(&second_key, &second).to_bytes());

    let context = Mp4Decrypter::new()
        .key("1", KEY_HEX)
        .unwrap()
        .key("2", SECOND_KEY)
        .unwrap()
        .build()
        .unwrap();
    let output = context.decrypt(&input, None).unwrap();

    let boxes = Atom::parse_all(&output).unwrap();
    assert_eq!(boxes[0].type_, *b"ftyp");
    assert_eq!(odda_plaintext(&boxes[1]), first);
    assert_eq!(odda_plaintext(&boxes[2]), second);

    let ohdr = boxes[1].find("odhe/ohdr").unwrap();
    let ohdr = OhdrBox::from_atom(ohdr).unwrap();
    assert_eq!(ohdr.encryption_method, OmaEncryptionMethod::Null);
    assert_eq!(ohdr.plaintext_length, 100);
}

#[test]
fn dcf_box_without_key_fails() {
    let mut input = ftyp(b"odcf", &[]).to_bytes();
    input.extend(odrm(&KEY, b"first").to_bytes());
    input.extend(odrm(&KEY, b"second").to_bytes());

    let context = Mp4Decrypter::new().key("1", KEY_HEX).unwrap().build().unwrap();
    let error = context.decrypt(&input, None).unwrap_err();

    assert!(matches!(&error, Error::KeyNotFound(x) if x.contains("odrm box 2")));
    assert_eq!(error.code(), code::INVALID_PARAMETERS);
}

fn pdcf_movie(ftyp: Atom) -> (Vec<u8>, Vec<Vec<u8>>) {
    let samples = samples();
    let encrypted = samples
        .iter()
        .map(|x| cbc_encrypt_padded(&KEY, &IV, x))
        .collect::<Vec<_>>();

    let odkm = Atom::new_container(*b"odkm", vec![0; 4], vec![
        ohdr(1, 1, 0),
        full(b"odaf", &[0, 0, 16]),
    ]);
    let entry = encv(sinf(b"avc1", Some(b"odkm"), vec![odkm]));
    let moov = container(b"moov", vec![
        mvhd(),
        trak(1, b"vide", stbl(vec![entry], &sizes(&encrypted), media_offset(&ftyp), vec![])),
    ]);

    (movie(&ftyp, &encrypted.concat(), &moov), samples)
}

#[test]
fn decrypts_pdcf_tracks() {
    for (ftyp, family) in [
        (ftyp(b"isom", &[b"opf2"]), SchemeFamily::Standard),
        (ftyp(b"odcf", &[b"opf2"]), SchemeFamily::OmaDcf),
    ] {
        let (input, samples) = pdcf_movie(ftyp);
        let context = Mp4Decrypter::new().key("1", KEY_HEX).unwrap().build().unwrap();
        let output = context.decrypt(&input, None).unwrap();

        assert_eq!(mdat_payload(&output), samples.concat(), "{}", family);

        let moov = top_level(&output, b"moov");
        let trak = moov.child(b"trak").unwrap();
        let entry = &trak.find("mdia/minf/stbl/stsd").unwrap().children()[0];
        assert_eq!(entry.type_, *b"avc1");
        assert_eq!(rewritten_samples(&output, trak), samples);
    }
}

#[test]
fn decrypts_isma_tracks() {
    let samples = samples();

    let mut stream = samples.concat();
    ctr64_encrypt(&KEY, &SALT, &mut stream);

    let mut encrypted = Vec::new();
    let mut offset = 0;
    for sample in &samples {
        let mut x = (offset as u64).to_be_bytes().to_vec();
        x.extend_from_slice(&stream[offset..offset + sample.len()]);
        encrypted.push(x);
        offset += sample.len();
    }

    let ftyp = ftyp(b"mp42", &[b"isom"]);
    let schi = vec![
        full(b"iSFM", &[0, 0, 8]),
        Atom::new_data(*b"iSLT", SALT.to_vec()),
    ];
    let entry = enca(sinf(b"mp4a", Some(b"iAEC"), schi));
    let moov = container(b"moov", vec![
        mvhd(),
        trak(3, b"soun", stbl(vec![entry], &sizes(&encrypted), media_offset(&ftyp), vec![])),
    ]);
    let input = movie(&ftyp, &encrypted.concat(), &moov);

    let context = Mp4Decrypter::new().key("3", KEY_HEX).unwrap().build().unwrap();
    let output = context.decrypt(&input, None).unwrap();

    assert_eq!(mdat_payload(&output), samples.concat());

    let moov = top_level(&output, b"moov");
    let trak = moov.child(b"trak").unwrap();
    assert_eq!(trak.find("mdia/minf/stbl/stsd").unwrap().children()[0].type_, *b"mp4a");
    assert_eq!(rewritten_samples(&output, trak), samples);
}

#[test]
fn fragmented_full_sample_encryption_is_unsupported() {
    let ftyp = ftyp(b"isom", &[]);
    let entry = enca(sinf(b"mp4a", Some(b"iAEC"), vec![full(b"iSFM", &[0, 0, 8])]));
    let moov = container(b"moov", vec![
        mvhd(),
        trak(1, b"soun", stbl(vec![entry], &[], 0, vec![])),
        container(b"mvex", vec![]),
    ]);
    let input = movie(&ftyp, &[], &moov);

    let context = Mp4Decrypter::new().key("1", KEY_HEX).unwrap().build().unwrap();
    assert_eq!(context.decrypt(&input, None).unwrap_err().code(), code::NOT_SUPPORTED);
}

fn descriptor(tag: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() < 0x80);
    [vec![tag, payload.len() as u8], payload.to_vec()].concat()
}

/// Marlin movie with an object descriptor stream on track 1 and video on track 2.
fn marlin_movie(scheme_type: &[u8; 4], key: &[u8; 16], gkey: Option<&[u8]>) -> (Vec<u8>, Vec<Vec<u8>>) {
    let samples = samples();
    let encrypted = samples
        .iter()
        .map(|x| cbc_encrypt_padded(key, &IV, x))
        .collect::<Vec<_>>();

    let mut schm = scheme_type.to_vec();
    schm.extend_from_slice(&[0, 1]);
    let mut ipmp_boxes = vec![full(b"schm", &schm)];
    if let Some(gkey) = gkey {
        ipmp_boxes.push(container(b"schi", vec![Atom::new_data(*b"gkey", gkey.to_vec())]));
    }
    let ipmp_data = container(b"sinf", ipmp_boxes).to_bytes();

    let od = descriptor(0x11, &[
        vec![0x00, 0x5F],
        descriptor(0x0F, &1u16.to_be_bytes()),
        descriptor(0x0A, &[7]),
    ]
    .concat());
    let ipmp = descriptor(0x0B, &[vec![7, 0xA5, 0x51], ipmp_data].concat());
    let access_unit = [descriptor(0x01, &od), descriptor(0x05, &ipmp)].concat();

    let iod = descriptor(0x10, &[
        vec![0x00, 0x4F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        descriptor(0x0E, &1u32.to_be_bytes()),
        descriptor(0x0E, &2u32.to_be_bytes()),
    ]
    .concat());

    let ftyp = ftyp(b"MGSV", &[b"MGSV", b"mp42"]);
    let offset = media_offset(&ftyp);

    let mut od_trak = trak(1, b"odsm", stbl(
        vec![Atom::new_data(*b"mp4s", vec![0; 8])],
        &[access_unit.len() as u32],
        offset,
        vec![],
    ));
    if let Some(children) = od_trak.children_mut() {
        children.push(container(b"tref", vec![Atom::new_data(*b"mpod", 2u32.to_be_bytes().to_vec())]));
    }

    let video_trak = trak(2, b"vide", stbl(
        vec![Atom::new_data(*b"mp4v", vec![0; 78])],
        &sizes(&encrypted),
        offset + access_unit.len() as u32,
        vec![],
    ));

    let moov = container(b"moov", vec![mvhd(), full(b"iods", &iod), od_trak, video_trak]);
    let media = [access_unit, encrypted.concat()].concat();

    (movie(&ftyp, &media, &moov), samples)
}

fn assert_marlin_output(output: &[u8], samples: &[Vec<u8>]) {
    let ftyp = FtypBox::from_atom(&top_level(output, b"ftyp")).unwrap();
    assert_eq!(ftyp.major_brand, *b"mp42");
    assert!(!ftyp.has_brand(b"MGSV"));

    let moov = top_level(output, b"moov");
    assert!(moov.child(b"iods").is_none());

    let traks = moov
        .children()
        .iter()
        .filter(|x| &x.type_ == b"trak")
        .collect::<Vec<_>>();
    assert_eq!(traks.len(), 1);
    assert_eq!(rewritten_samples(output, traks[0]), samples);
    assert_eq!(mdat_payload(output), samples.concat());
}

#[test]
fn decrypts_marlin_acbc_tracks() {
    let (input, samples) = marlin_movie(b"ACBC", &KEY, None);

    let context = Mp4Decrypter::new().key("2", KEY_HEX).unwrap().build().unwrap();
    assert_marlin_output(&context.decrypt(&input, None).unwrap(), &samples);

    let context = Mp4Decrypter::new().key("1", KEY_HEX).unwrap().build().unwrap();
    assert!(matches!(context.decrypt(&input, None), Err(Error::KeyNotFound(_))));
}

#[test]
fn decrypts_marlin_acgk_tracks_with_group_key() {
    let (input, samples) = marlin_movie(b"ACGK", &UNWRAPPED_KEY, Some(&WRAPPED_KEY));

    let context = Mp4Decrypter::new().group_key(GROUP_KEY).unwrap().build().unwrap();
    assert_marlin_output(&context.decrypt(&input, None).unwrap(), &samples);

    let context = Mp4Decrypter::new().group_key(KEY_HEX).unwrap().build().unwrap();
    let error = context.decrypt(&input, None).unwrap_err();
    assert_eq!(error.code(), code::INVALID_PARAMETERS);
}

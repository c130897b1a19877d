mod common;

use common::*;
use mp4crypt::{
    Atom,
    boxes::{PIFF_SENC_UUID, PIFF_TENC_UUID},
};
use mp4decrypt::{Error, Mp4Decrypter, code};
use std::{fs, path::Path, sync::Arc, thread};

const CONSTANT_IV: [u8; 16] = [0x5a; 16];

enum Layout {
    /// `init` and `segment` in one input.
    Joined,
    /// `segment` decrypted with `init` as fragments info.
    Split,
}

fn context() -> mp4decrypt::Context {
    Mp4Decrypter::new().key(KID_HEX, KEY_HEX).unwrap().build().unwrap()
}

fn assert_stripped_fragment(output: &[u8]) {
    let moof = top_level(output, b"moof");
    let traf = moof.child(b"traf").unwrap();
    assert!(traf.child(b"senc").is_none());
    assert!(traf.child(b"free").is_some());
}

#[test]
fn decrypts_movie_with_sample_encryption_box() {
    let samples = samples();
    let ftyp = ftyp(b"isom", &[b"iso6", b"mp41"]);
    let entry = encv(sinf(b"avc1", Some(b"cenc"), vec![tenc(8)]));
    let senc = Atom::new_data(*b"senc", senc(0, false, &samples));
    let moov = container(b"moov", vec![
        mvhd(),
        trak(1, b"vide", stbl(vec![entry], &sizes(&samples), media_offset(&ftyp), vec![senc])),
    ]);

    let input = movie(&ftyp, &cenc_encrypt(&samples, false), &moov);
    let output = context().decrypt(&input, None).unwrap();

    assert_eq!(output.len(), input.len());
    assert_eq!(mdat_payload(&output), samples.concat());

    let moov = top_level(&output, b"moov");
    let stbl = moov.find("trak/mdia/minf/stbl").unwrap();
    assert_eq!(stbl.child(b"stsd").unwrap().children()[0].type_, *b"avc1");
    assert!(stbl.child(b"senc").is_none());
}

#[test]
fn decrypts_cbcs_audio_with_constant_iv() {
    let samples = samples();
    let ftyp = ftyp(b"mp42", &[b"iso6"]);
    let entry = enca(sinf(b"mp4a", Some(b"cbcs"), vec![tenc_pattern(1, 9, &CONSTANT_IV)]));
    let moov = container(b"moov", vec![
        mvhd(),
        trak(2, b"soun", stbl(vec![entry], &sizes(&samples), media_offset(&ftyp), vec![])),
    ]);

    let mut media = Vec::new();
    for sample in &samples {
        let mut sample = sample.clone();
        cbcs_encrypt(&KEY, &CONSTANT_IV, 1, 9, &mut sample);
        media.extend(sample);
    }

    let input = movie(&ftyp, &media, &moov);
    let output = context().decrypt(&input, None).unwrap();

    assert_eq!(mdat_payload(&output), samples.concat());
    let stsd = top_level(&output, b"moov")
        .find("trak/mdia/minf/stbl/stsd")
        .cloned()
        .unwrap();
    assert_eq!(stsd.children()[0].type_, *b"mp4a");
}

macro_rules! fragment {
    ($test_name: ident, $layout: expr, $protection: expr, $subsamples: literal, $aux_info: literal) => {
        #[test]
        fn $test_name() {
            let (init, segment, samples) = protected_fragment($protection, $subsamples, $aux_info);

            let output = match $layout {
                Layout::Split => context().decrypt(&segment, Some(&init)).unwrap(),
                Layout::Joined => {
                    let input = [init.clone(), segment.clone()].concat();
                    let output = context().decrypt(&input, None).unwrap();
                    assert_eq!(output.len(), input.len());
                    output[init.len()..].to_vec()
                }
            };

            assert_eq!(output.len(), segment.len());
            assert_eq!(mdat_payload(&output), samples.concat());
            assert_stripped_fragment(&output);
        }
    };
}

fragment!(test_split_fragment, Layout::Split, Protection::Cenc, false, false);
fragment!(test_split_fragment_with_subsamples, Layout::Split, Protection::Cenc, true, false);
fragment!(test_joined_fragment, Layout::Joined, Protection::Cenc, false, false);
fragment!(test_joined_fragment_with_subsamples, Layout::Joined, Protection::Cenc, true, false);
fragment!(test_split_cens_fragment, Layout::Split, Protection::Cens, false, false);
fragment!(test_joined_cens_fragment_with_subsamples, Layout::Joined, Protection::Cens, true, false);
fragment!(test_split_cbc1_fragment_with_subsamples, Layout::Split, Protection::Cbc1, true, false);
fragment!(test_joined_cbc1_fragment, Layout::Joined, Protection::Cbc1, false, false);
fragment!(test_split_cbcs_fragment, Layout::Split, Protection::Cbcs, false, false);
fragment!(test_joined_cbcs_fragment_with_subsamples, Layout::Joined, Protection::Cbcs, true, false);
fragment!(test_split_fragment_with_aux_info, Layout::Split, Protection::Cenc, true, true);
fragment!(test_joined_fragment_with_aux_info, Layout::Joined, Protection::Cenc, false, true);
fragment!(test_split_cbcs_fragment_with_aux_info, Layout::Split, Protection::Cbcs, true, true);

macro_rules! movie_with_aux_info {
    ($test_name: ident, $protection: expr, $subsamples: literal) => {
        #[test]
        fn $test_name() {
            let (input, samples) = aux_info_movie($protection, $subsamples);
            let output = context().decrypt(&input, None).unwrap();

            assert_eq!(output.len(), input.len());
            assert_eq!(mdat_payload(&output), samples.concat());

            let stbl = top_level(&output, b"moov")
                .find("trak/mdia/minf/stbl")
                .cloned()
                .unwrap();
            assert_eq!(stbl.child(b"stsd").unwrap().children()[0].type_, *b"avc1");
            assert!(stbl.child(b"saiz").is_none());
            assert!(stbl.child(b"saio").is_none());
        }
    };
}

movie_with_aux_info!(test_movie_with_aux_info, Protection::Cenc, false);
movie_with_aux_info!(test_cens_movie_with_aux_info, Protection::Cens, true);
movie_with_aux_info!(test_cbc1_movie_with_aux_info, Protection::Cbc1, true);

#[test]
fn overflowing_fragment_offsets_are_rejected() {
    let (init, _, samples) = cenc_fragment(false);
    let media = cenc_encrypt(&samples, false);

    let mut trun = (samples.len() as u32).to_be_bytes().to_vec();
    for size in sizes(&samples) {
        trun.extend_from_slice(&size.to_be_bytes());
    }
    let mut tfhd = 1u32.to_be_bytes().to_vec();
    tfhd.extend_from_slice(&(u64::MAX - 16).to_be_bytes());

    let traf = container(b"traf", vec![
        Atom::new_full(*b"tfhd", 0, 0x000001, &tfhd),
        Atom::new_full(*b"trun", 0, 0x000200, &trun),
        Atom::new_data(*b"senc", senc(0, false, &samples)),
    ]);
    let moof = container(b"moof", vec![full(b"mfhd", &1u32.to_be_bytes()), traf]);
    let segment = [moof.to_bytes(), Atom::new_data(*b"mdat", media.clone()).to_bytes()].concat();

    let error = context().decrypt(&segment, Some(&init)).unwrap_err();
    assert_eq!(error.code(), code::INVALID_FORMAT);

    let infos = sample_infos(&Protection::Cenc.ivs(), &samples, false);
    let mut saio = 1u32.to_be_bytes().to_vec();
    saio.extend_from_slice(&u64::MAX.to_be_bytes());
    let saio = Atom::new_full(*b"saio", 1, 0, &saio);
    let segment = fragment(&sizes(&samples), vec![saiz(&infos), saio], vec![], &media);

    let error = context().decrypt(&segment, Some(&init)).unwrap_err();
    assert_eq!(error.code(), code::NOT_SUPPORTED);
}

#[test]
fn piff_fragments_are_routed_by_brand() {
    let samples = samples();

    let mut piff_tenc = PIFF_TENC_UUID.to_vec();
    piff_tenc.extend_from_slice(&[0, 0, 0, 0, 0, 0, 1, 8]);
    piff_tenc.extend_from_slice(&KID);

    let init = init(
        ftyp(b"isml", &[b"piff", b"iso2"]),
        encv(sinf(b"avc1", None, vec![Atom::new_data(*b"uuid", piff_tenc)])),
    );

    let mut piff_senc = PIFF_SENC_UUID.to_vec();
    piff_senc.extend(senc(0, false, &samples));
    let segment = segment(
        &sizes(&samples),
        Atom::new_data(*b"uuid", piff_senc),
        &cenc_encrypt(&samples, false),
    );

    let input = [init, segment].concat();
    let output = context().decrypt(&input, None).unwrap();

    assert_eq!(mdat_payload(&output), samples.concat());

    let moov = top_level(&output, b"moov");
    let stsd = moov.find("trak/mdia/minf/stbl/stsd").unwrap();
    assert_eq!(stsd.children()[0].type_, *b"avc1");

    let traf = top_level(&output, b"moof").child(b"traf").cloned().unwrap();
    assert!(traf.children().iter().all(|x| &x.type_ != b"uuid"));
}

#[test]
fn keys_can_be_bound_to_track_ids() {
    let (init, segment, samples) = cenc_fragment(false);

    let context = Mp4Decrypter::new().key("1", KEY_HEX).unwrap().build().unwrap();
    let output = context.decrypt(&segment, Some(&init)).unwrap();

    assert_eq!(mdat_payload(&output), samples.concat());
}

#[test]
fn missing_key_fails() {
    let (init, segment, _) = cenc_fragment(false);

    let context = Mp4Decrypter::new().key("2", KEY_HEX).unwrap().build().unwrap();
    let error = context.decrypt(&segment, Some(&init)).unwrap_err();

    assert!(matches!(error, Error::KeyNotFound(_)));
    assert_eq!(error.code(), code::INVALID_PARAMETERS);
}

#[test]
fn decrypts_files() {
    let (init, segment, samples) = cenc_fragment(true);

    let dir = tempfile::tempdir().unwrap();
    let init_path = dir.path().join("init.mp4");
    let segment_path = dir.path().join("segment_1.m4s");
    let output_path = dir.path().join("segment_1.mp4");
    fs::write(&init_path, &init).unwrap();
    fs::write(&segment_path, &segment).unwrap();

    context()
        .decrypt_file(segment_path.as_path(), output_path.clone(), Some(&init_path))
        .unwrap();

    assert_eq!(mdat_payload(&fs::read(&output_path).unwrap()), samples.concat());

    let error = context()
        .decrypt_file(dir.path().join("missing.m4s"), &output_path, None::<&Path>)
        .unwrap_err();
    assert_eq!(error.code(), code::NO_SUCH_FILE);
}

#[test]
fn one_context_serves_many_threads() {
    let (init, segment, samples) = cenc_fragment(false);
    let (init, segment) = (Arc::new(init), Arc::new(segment));
    let context = Arc::new(context());

    let handles = (0..4)
        .map(|_| {
            let (context, init, segment) = (context.clone(), init.clone(), segment.clone());
            thread::spawn(move || context.decrypt(&segment, Some(&init)).unwrap())
        })
        .collect::<Vec<_>>();

    for handle in handles {
        assert_eq!(mdat_payload(&handle.join().unwrap()), samples.concat());
    }
}

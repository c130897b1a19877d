//! Marlin IPMP (`ACBC` and `ACGK`).
//!
//! Protection is signalled through the object descriptor stream instead of the
//! sample descriptions. The initial object descriptor in `iods` names the OD
//! track, whose first access unit maps elementary streams to IPMP descriptors.

use super::{
    invalid_format, load_moov,
    movie::{MovieRewriter, SampleDecrypter, TrackDecrypter},
    unsupported,
};
use crate::{Error, KeyStore, Result, detect::BRAND_MARLIN};
use mp4crypt::{
    Atom, FourCc,
    boxes::{
        Descriptor, FtypBox, HdlrBox, IpmpDescriptor, Mp4Box, ObjectDescriptor, OdCommand,
        SampleTable, SchmBox, TkhdBox,
    },
    decrypt::{MarlinSampleDecrypter, aes_key_unwrap},
    fourcc_to_string,
    stream::{self, ReadSeek, WriteSeek},
};
use std::{
    collections::HashMap,
    io::{Read, Seek, SeekFrom},
    sync::Arc,
};

const IPMPS_TYPE_MARLIN: u16 = 0xA551;

pub struct MarlinProcessor {
    keys: Arc<KeyStore>,
}

/// Marlin protection of one elementary stream.
#[derive(Debug, PartialEq)]
struct MarlinTrack {
    track_id: u32,
    scheme_type: FourCc,
    /// Wrapped track key of `ACGK` streams.
    group_key_data: Option<Vec<u8>>,
}

impl MarlinProcessor {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    pub fn process(&self, input: &mut dyn ReadSeek, output: &mut dyn WriteSeek) -> Result<()> {
        let headers = stream::top_level_boxes(input)?;
        let mut moov = load_moov(input, &headers)?.ok_or_else(|| invalid_format("no moov box"))?;

        let od_track_id = od_track_id(&moov)?;
        let od_trak = find_trak(&moov, od_track_id)?
            .ok_or_else(|| invalid_format(format!("od track {} not found", od_track_id)))?;

        let table = SampleTable::from_stbl(
            od_trak
                .find("mdia/minf/stbl")
                .ok_or_else(|| invalid_format("od track has no sample table"))?,
        )?;
        let first = table
            .samples
            .first()
            .ok_or_else(|| invalid_format("od track has no samples"))?;

        let mut access_unit = vec![0; first.size as usize];
        input.seek(SeekFrom::Start(first.offset))?;
        input.read_exact(&mut access_unit)?;

        let mpod = od_trak
            .find("tref/mpod")
            .map(|x| {
                x.prefix()
                    .chunks_exact(4)
                    .map(|x| u32::from_be_bytes([x[0], x[1], x[2], x[3]]))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut decrypters = HashMap::new();

        for track in marlin_tracks(&OdCommand::read_all(&access_unit)?, &mpod)? {
            log::debug!(
                "track {}: marlin {}",
                track.track_id,
                fourcc_to_string(&track.scheme_type)
            );

            decrypters.insert(
                track.track_id,
                TrackDecrypter {
                    decrypter: SampleDecrypter::Marlin(MarlinSampleDecrypter::new(
                        &self.track_key(&track)?,
                    )),
                    description_index: None,
                },
            );
        }

        moov.remove_children(b"iods");

        if let Some(children) = moov.children_mut() {
            children.retain(|x| {
                &x.type_ != b"trak"
                    || x.child(b"tkhd")
                        .and_then(|x| TkhdBox::from_atom(x).ok())
                        .is_none_or(|x| x.track_id != od_track_id)
            });
        }

        let ftyp = match headers.iter().find(|x| &x.type_ == b"ftyp") {
            Some(header) => {
                let mut ftyp = FtypBox::from_atom(&Atom::parse(&stream::read_box(input, header)?)?)?;
                ftyp.remove_brand(&BRAND_MARLIN, *b"mp42");
                Some(ftyp.to_atom())
            }
            None => None,
        };

        MovieRewriter {
            headers: &headers,
            moov,
            ftyp,
            decrypters,
        }
        .write(input, output)
    }

    fn track_key(&self, track: &MarlinTrack) -> Result<[u8; 16]> {
        match &track.group_key_data {
            None => self
                .keys
                .lookup_track(track.track_id)
                .map(|x| *x.as_bytes())
                .ok_or_else(|| Error::KeyNotFound(format!("track {}", track.track_id))),
            Some(wrapped) => {
                let group_key = self
                    .keys
                    .group_key()
                    .ok_or_else(|| Error::KeyNotFound("marlin group key".to_owned()))?;
                let key = aes_key_unwrap(group_key.as_bytes(), wrapped)?;

                key.as_slice()
                    .try_into()
                    .map_err(|_| Error::MalformedKey(key.len()))
            }
        }
    }
}

/// Track id of the object descriptor stream named by `iods`.
fn od_track_id(moov: &Atom) -> Result<u32> {
    let iods = moov
        .child(b"iods")
        .ok_or_else(|| invalid_format("no iods box"))?;
    let (_, _, mut reader) = iods.full_box_reader()?;

    let iod = match Descriptor::read(&mut reader)? {
        Descriptor::Object(x) => x,
        _ => return Err(invalid_format("iods box holds no object descriptor")),
    };

    for track_id in iod.es_id_incs() {
        let handler = find_trak(moov, track_id)?
            .and_then(|x| x.find("mdia/hdlr"))
            .map(HdlrBox::from_atom)
            .transpose()?;

        if handler.is_some_and(|x| &x.handler_type == b"odsm") {
            return Ok(track_id);
        }
    }

    Err(invalid_format("no object descriptor stream"))
}

fn find_trak(moov: &Atom, track_id: u32) -> Result<Option<&Atom>> {
    for trak in moov.children().iter().filter(|x| &x.type_ == b"trak") {
        if let Some(tkhd) = trak.child(b"tkhd") {
            if TkhdBox::from_atom(tkhd)?.track_id == track_id {
                return Ok(Some(trak));
            }
        }
    }

    Ok(None)
}

/// Resolve the Marlin protected elementary streams of an OD access unit.
fn marlin_tracks(commands: &[OdCommand], mpod: &[u32]) -> Result<Vec<MarlinTrack>> {
    let mut ods: Vec<&ObjectDescriptor> = Vec::new();
    let mut ipmps: Vec<&IpmpDescriptor> = Vec::new();

    for command in commands {
        match command {
            OdCommand::ObjectDescriptorUpdate(x) => ods.extend(x),
            OdCommand::IpmpDescriptorUpdate(x) => ipmps.extend(x),
            OdCommand::Other(_) => (),
        }
    }

    let mut tracks = Vec::new();

    for od in ods {
        let Some(es_id_ref) = od.es_id_refs().next() else {
            continue;
        };

        let track_id = (es_id_ref.ref_index as usize)
            .checked_sub(1)
            .and_then(|x| mpod.get(x))
            .copied()
            .ok_or_else(|| {
                invalid_format(format!("es id ref {} is not in mpod", es_id_ref.ref_index))
            })?;

        let ipmp = od.ipmp_descriptor_ids().find_map(|id| {
            ipmps
                .iter()
                .find(|x| x.descriptor_id as u16 == id && x.ipmps_type == IPMPS_TYPE_MARLIN)
        });

        let Some(ipmp) = ipmp else {
            log::warn!("track {} has no marlin ipmp descriptor", track_id);
            continue;
        };

        let atoms = Atom::parse_all(&ipmp.data)?;
        let sinf = atoms.iter().find(|x| &x.type_ == b"sinf");
        let children = sinf.map(|x| x.children()).unwrap_or(atoms.as_slice());

        let schm = children
            .iter()
            .find(|x| &x.type_ == b"schm")
            .map(SchmBox::from_atom)
            .transpose()?
            .ok_or_else(|| invalid_format("marlin ipmp descriptor without schm box"))?;

        let group_key_data = match &schm.scheme_type {
            b"ACBC" => None,
            b"ACGK" => Some(
                children
                    .iter()
                    .find(|x| &x.type_ == b"schi")
                    .and_then(|x| x.child(b"gkey"))
                    .map(|x| x.prefix().to_vec())
                    .ok_or_else(|| invalid_format("ACGK scheme without gkey box"))?,
            ),
            x => {
                return Err(unsupported(format!(
                    "marlin scheme '{}'",
                    fourcc_to_string(x)
                )));
            }
        };

        tracks.push(MarlinTrack {
            track_id,
            scheme_type: schm.scheme_type,
            group_key_data,
        });
    }

    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mp4crypt::boxes::EsIdRef;

    fn od(descriptor_id: u16, ref_index: u16) -> ObjectDescriptor {
        ObjectDescriptor {
            tag: 0x11,
            id: 1,
            url: None,
            sub_descriptors: vec![
                Descriptor::EsIdRef(EsIdRef { ref_index }),
                Descriptor::IpmpDescriptorPointer {
                    descriptor_id,
                    es_id: None,
                },
            ],
        }
    }

    fn ipmp(descriptor_id: u8, scheme_type: &[u8; 4], gkey: Option<&[u8]>) -> IpmpDescriptor {
        let mut schm = scheme_type.to_vec();
        schm.extend_from_slice(&[0, 1]);
        let mut children = vec![Atom::new_full(*b"schm", 0, 0, &schm)];

        if let Some(gkey) = gkey {
            children.push(Atom::new_container(
                *b"schi",
                vec![],
                vec![Atom::new_data(*b"gkey", gkey.to_vec())],
            ));
        }

        IpmpDescriptor {
            descriptor_id,
            ipmps_type: IPMPS_TYPE_MARLIN,
            data: Atom::new_container(*b"sinf", vec![], children).to_bytes(),
        }
    }

    #[test]
    fn resolves_tracks_through_mpod() {
        let commands = [
            OdCommand::ObjectDescriptorUpdate(vec![od(1, 2), od(2, 1)]),
            OdCommand::IpmpDescriptorUpdate(vec![
                ipmp(1, b"ACBC", None),
                ipmp(2, b"ACGK", Some(&[9; 24])),
            ]),
        ];

        let tracks = marlin_tracks(&commands, &[10, 20]).unwrap();

        assert_eq!(tracks, vec![
            MarlinTrack {
                track_id: 20,
                scheme_type: *b"ACBC",
                group_key_data: None,
            },
            MarlinTrack {
                track_id: 10,
                scheme_type: *b"ACGK",
                group_key_data: Some(vec![9; 24]),
            },
        ]);
    }

    #[test]
    fn rejects_dangling_references() {
        let commands = [
            OdCommand::ObjectDescriptorUpdate(vec![od(1, 3)]),
            OdCommand::IpmpDescriptorUpdate(vec![ipmp(1, b"ACBC", None)]),
        ];

        assert_eq!(marlin_tracks(&commands, &[1]).unwrap_err().code(), -10);
    }

    #[test]
    fn missing_group_key_is_reported() {
        let processor = MarlinProcessor::new(Arc::new(KeyStore::new()));
        let track = MarlinTrack {
            track_id: 1,
            scheme_type: *b"ACGK",
            group_key_data: Some(vec![0; 24]),
        };

        assert!(matches!(
            processor.track_key(&track),
            Err(Error::KeyNotFound(_))
        ));
    }
}

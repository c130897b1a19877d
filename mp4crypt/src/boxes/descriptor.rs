//! MPEG-4 object descriptors and commands, as used by `iods` boxes and
//! object descriptor streams (ISO/IEC 14496-1).

use crate::{Error, Reader, Result};

const TAG_OD: u8 = 0x01;
const TAG_IOD: u8 = 0x02;
const TAG_IPMP_DESCRIPTOR_POINTER: u8 = 0x0A;
const TAG_IPMP_DESCRIPTOR: u8 = 0x0B;
const TAG_ES_ID_INC: u8 = 0x0E;
const TAG_ES_ID_REF: u8 = 0x0F;
const TAG_MP4_IOD: u8 = 0x10;
const TAG_MP4_OD: u8 = 0x11;

const COMMAND_OD_UPDATE: u8 = 0x01;
const COMMAND_IPMP_DESCRIPTOR_UPDATE: u8 = 0x05;

#[derive(Clone, Debug, PartialEq)]
pub enum Descriptor {
    /// Initial or regular object descriptor.
    Object(ObjectDescriptor),
    /// Track id of an elementary stream included in an initial object descriptor.
    EsIdInc(u32),
    EsIdRef(EsIdRef),
    IpmpDescriptorPointer {
        descriptor_id: u16,
        es_id: Option<u16>,
    },
    Ipmp(IpmpDescriptor),
    Unknown {
        tag: u8,
        payload: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectDescriptor {
    pub tag: u8,
    pub id: u16,
    pub url: Option<String>,
    pub sub_descriptors: Vec<Descriptor>,
}

impl ObjectDescriptor {
    pub fn es_id_incs(&self) -> impl Iterator<Item = u32> + '_ {
        self.sub_descriptors.iter().filter_map(|x| match x {
            Descriptor::EsIdInc(track_id) => Some(*track_id),
            _ => None,
        })
    }

    pub fn es_id_refs(&self) -> impl Iterator<Item = &EsIdRef> {
        self.sub_descriptors.iter().filter_map(|x| match x {
            Descriptor::EsIdRef(x) => Some(x),
            _ => None,
        })
    }

    /// Ids of the IPMP descriptors this object points to.
    pub fn ipmp_descriptor_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.sub_descriptors.iter().filter_map(|x| match x {
            Descriptor::IpmpDescriptorPointer { descriptor_id, .. } => Some(*descriptor_id),
            _ => None,
        })
    }
}

/// Reference to an elementary stream through the `mpod` track reference.
#[derive(Clone, Debug, PartialEq)]
pub struct EsIdRef {
    /// 1-based index into the `mpod` track ids.
    pub ref_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IpmpDescriptor {
    pub descriptor_id: u8,
    pub ipmps_type: u16,
    /// Opaque data, or the URL bytes when `ipmps_type` is zero.
    pub data: Vec<u8>,
}

/// Object descriptor stream command.
#[derive(Clone, Debug, PartialEq)]
pub enum OdCommand {
    ObjectDescriptorUpdate(Vec<ObjectDescriptor>),
    IpmpDescriptorUpdate(Vec<IpmpDescriptor>),
    Other(u8),
}

fn read_header(reader: &mut Reader) -> Result<(u8, usize)> {
    let tag = reader.read_u8()?;
    let mut size = 0usize;

    for _ in 0..4 {
        let byte = reader.read_u8()?;
        size = (size << 7) | (byte & 0x7F) as usize;

        if byte & 0x80 == 0 {
            return Ok((tag, size));
        }
    }

    Err(Error::invalid_format("descriptor size field is too long"))
}

impl Descriptor {
    pub fn read(reader: &mut Reader) -> Result<Self> {
        let (tag, size) = read_header(reader)?;
        let mut payload = Reader::new(reader.read_bytes(size)?);

        Ok(match tag {
            TAG_OD | TAG_IOD | TAG_MP4_IOD | TAG_MP4_OD => {
                Self::Object(ObjectDescriptor::read(tag, &mut payload)?)
            }
            TAG_ES_ID_INC => Self::EsIdInc(payload.read_u32()?),
            TAG_ES_ID_REF => Self::EsIdRef(EsIdRef {
                ref_index: payload.read_u16()?,
            }),
            TAG_IPMP_DESCRIPTOR_POINTER => {
                let id = payload.read_u8()?;

                if id == 0xFF {
                    Self::IpmpDescriptorPointer {
                        descriptor_id: payload.read_u16()?,
                        es_id: Some(payload.read_u16()?),
                    }
                } else {
                    Self::IpmpDescriptorPointer {
                        descriptor_id: id as u16,
                        es_id: None,
                    }
                }
            }
            TAG_IPMP_DESCRIPTOR => Self::Ipmp(IpmpDescriptor::read(&mut payload)?),
            _ => Self::Unknown {
                tag,
                payload: payload.read_to_end()?,
            },
        })
    }

    pub fn read_all(reader: &mut Reader) -> Result<Vec<Self>> {
        let mut descriptors = Vec::new();

        while reader.has_more_data() {
            descriptors.push(Self::read(reader)?);
        }

        Ok(descriptors)
    }
}

impl ObjectDescriptor {
    fn read(tag: u8, reader: &mut Reader) -> Result<Self> {
        let bits = reader.read_u16()?;
        let id = bits >> 6;
        let url_flag = bits & 0x20 != 0;

        let url = if url_flag {
            let length = reader.read_u8()?;
            Some(String::from_utf8_lossy(&reader.read_bytes(length as usize)?).into_owned())
        } else {
            if matches!(tag, TAG_IOD | TAG_MP4_IOD) {
                // OD, scene, audio, visual and graphics profile levels
                reader.skip(5)?;
            }
            None
        };

        Ok(Self {
            tag,
            id,
            url,
            sub_descriptors: Descriptor::read_all(reader)?,
        })
    }
}

impl IpmpDescriptor {
    fn read(reader: &mut Reader) -> Result<Self> {
        let descriptor_id = reader.read_u8()?;
        let ipmps_type = reader.read_u16()?;

        if descriptor_id == 0xFF && ipmps_type == 0xFFFF {
            return Err(Error::Unsupported(
                "extended ipmp descriptors (ipmps type 0xFFFF)".to_owned(),
            ));
        }

        Ok(Self {
            descriptor_id,
            ipmps_type,
            data: reader.read_to_end()?,
        })
    }
}

impl OdCommand {
    /// Parse the commands of an object descriptor stream access unit.
    pub fn read_all(data: &[u8]) -> Result<Vec<Self>> {
        let mut reader = Reader::new(data.to_vec());
        let mut commands = Vec::new();

        while reader.has_more_data() {
            let (tag, size) = read_header(&mut reader)?;
            let mut payload = Reader::new(reader.read_bytes(size)?);

            commands.push(match tag {
                COMMAND_OD_UPDATE => Self::ObjectDescriptorUpdate(
                    Descriptor::read_all(&mut payload)?
                        .into_iter()
                        .filter_map(|x| match x {
                            Descriptor::Object(x) => Some(x),
                            _ => None,
                        })
                        .collect(),
                ),
                COMMAND_IPMP_DESCRIPTOR_UPDATE => Self::IpmpDescriptorUpdate(
                    Descriptor::read_all(&mut payload)?
                        .into_iter()
                        .filter_map(|x| match x {
                            Descriptor::Ipmp(x) => Some(x),
                            _ => None,
                        })
                        .collect(),
                ),
                _ => Self::Other(tag),
            });
        }

        Ok(commands)
    }
}

use crate::{Error, FourCc, Reader, Result, fourcc_to_string, parser};

/// An editable mp4 box.
///
/// Unlike [`Mp4Parser`](crate::Mp4Parser), which only reads, an atom tree can be
/// modified and serialised again with recomputed sizes.
#[derive(Clone, Debug, PartialEq)]
pub struct Atom {
    pub type_: FourCc,
    pub body: AtomBody,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AtomBody {
    /// Opaque payload.
    Data(Vec<u8>),
    /// Payload made of some fixed bytes followed by child boxes.
    Container { prefix: Vec<u8>, children: Vec<Atom> },
}

impl Atom {
    pub fn new_data(type_: FourCc, data: Vec<u8>) -> Self {
        Self {
            type_,
            body: AtomBody::Data(data),
        }
    }

    pub fn new_container(type_: FourCc, prefix: Vec<u8>, children: Vec<Atom>) -> Self {
        Self {
            type_,
            body: AtomBody::Container { prefix, children },
        }
    }

    /// Build a full box from its version, flags and the remaining payload.
    pub fn new_full(type_: FourCc, version: u8, flags: u32, payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(payload.len() + 4);
        data.extend_from_slice(&((version as u32) << 24 | (flags & 0xFFFFFF)).to_be_bytes());
        data.extend_from_slice(payload);
        Self::new_data(type_, data)
    }

    /// Parse exactly one box spanning the whole of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (atom, size) = Self::parse_one(data)?;

        if size != data.len() {
            return Err(Error::invalid_format(format!(
                "box '{}' is {} bytes but {} bytes were given",
                fourcc_to_string(&atom.type_),
                size,
                data.len()
            )));
        }

        Ok(atom)
    }

    /// Parse a sequence of sibling boxes.
    pub fn parse_all(mut data: &[u8]) -> Result<Vec<Self>> {
        let mut atoms = Vec::new();

        while !data.is_empty() {
            let (atom, size) = Self::parse_one(data)?;
            atoms.push(atom);
            data = &data[size..];
        }

        Ok(atoms)
    }

    fn parse_one(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 8 {
            return Err(Error::invalid_format("truncated box header"));
        }

        let mut size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
        let type_ = [data[4], data[5], data[6], data[7]];
        let mut header_size = 8;

        if size == 1 {
            let large = data
                .get(8..16)
                .ok_or_else(|| Error::invalid_format("truncated 64-bit box header"))?;
            size = u64::from_be_bytes(large.try_into().unwrap_or_default());
            header_size = 16;
        } else if size == 0 {
            size = data.len() as u64;
        }

        if size < header_size as u64 || size > data.len() as u64 {
            return Err(Error::invalid_format(format!(
                "box '{}' has size {} but only {} bytes are available",
                fourcc_to_string(&type_),
                size,
                data.len()
            )));
        }

        let size = size as usize;
        let payload = &data[header_size..size];

        Ok((
            Self {
                type_,
                body: Self::parse_body(&type_, payload),
            },
            size,
        ))
    }

    fn parse_body(type_: &FourCc, payload: &[u8]) -> AtomBody {
        let prefix_size = match container_prefix_size(type_, payload) {
            Some(x) if x <= payload.len() => x,
            _ => return AtomBody::Data(payload.to_vec()),
        };

        // Anything that does not split cleanly into boxes is kept as opaque data.
        match Self::parse_all(&payload[prefix_size..]) {
            Ok(children) => AtomBody::Container {
                prefix: payload[..prefix_size].to_vec(),
                children,
            },
            Err(e) => {
                log::trace!(
                    "keeping '{}' box as opaque data ({})",
                    fourcc_to_string(type_),
                    e
                );
                AtomBody::Data(payload.to_vec())
            }
        }
    }

    pub fn children(&self) -> &[Atom] {
        match &self.body {
            AtomBody::Container { children, .. } => children,
            AtomBody::Data(_) => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Atom>> {
        match &mut self.body {
            AtomBody::Container { children, .. } => Some(children),
            AtomBody::Data(_) => None,
        }
    }

    pub fn child(&self, type_: &FourCc) -> Option<&Atom> {
        self.children().iter().find(|x| &x.type_ == type_)
    }

    pub fn child_mut(&mut self, type_: &FourCc) -> Option<&mut Atom> {
        self.children_mut()?.iter_mut().find(|x| &x.type_ == type_)
    }

    /// Follow a `/` separated path of child box types, e.g. `mdia/minf/stbl`.
    pub fn find(&self, path: &str) -> Option<&Atom> {
        let mut atom = self;

        for name in path.split('/') {
            atom = atom.child(&crate::fourcc(name))?;
        }

        Some(atom)
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut Atom> {
        let mut atom = self;

        for name in path.split('/') {
            atom = atom.child_mut(&crate::fourcc(name))?;
        }

        Some(atom)
    }

    /// Remove every direct child of the given type, returning how many were removed.
    pub fn remove_children(&mut self, type_: &FourCc) -> usize {
        match self.children_mut() {
            Some(children) => {
                let before = children.len();
                children.retain(|x| &x.type_ != type_);
                before - children.len()
            }
            None => 0,
        }
    }

    /// Container prefix bytes, or the whole payload of a data box.
    pub fn prefix(&self) -> &[u8] {
        match &self.body {
            AtomBody::Container { prefix, .. } => prefix,
            AtomBody::Data(data) => data,
        }
    }

    /// The serialised payload, i.e. everything after the box header.
    pub fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() as usize);
        self.write_payload(&mut out);
        out
    }

    /// Reader positioned at the start of the payload.
    pub fn reader(&self) -> Reader {
        Reader::new(self.payload())
    }

    /// Reader positioned after the version and flags of a full box.
    pub fn full_box_reader(&self) -> Result<(u8, u32, Reader)> {
        let mut reader = self.reader();
        let version_and_flags = reader.read_u32()?;
        Ok((
            (version_and_flags >> 24) as u8,
            version_and_flags & 0xFFFFFF,
            reader,
        ))
    }

    fn payload_size(&self) -> u64 {
        match &self.body {
            AtomBody::Data(data) => data.len() as u64,
            AtomBody::Container { prefix, children } => {
                prefix.len() as u64 + children.iter().map(|x| x.size()).sum::<u64>()
            }
        }
    }

    /// Serialised size including the header.
    pub fn size(&self) -> u64 {
        let payload_size = self.payload_size();

        if payload_size + 8 > u32::MAX as u64 {
            payload_size + 16
        } else {
            payload_size + 8
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let size = self.size();

        if size > u32::MAX as u64 {
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(&self.type_);
            out.extend_from_slice(&size.to_be_bytes());
        } else {
            out.extend_from_slice(&(size as u32).to_be_bytes());
            out.extend_from_slice(&self.type_);
        }

        self.write_payload(out);
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        match &self.body {
            AtomBody::Data(data) => out.extend_from_slice(data),
            AtomBody::Container { prefix, children } => {
                out.extend_from_slice(prefix);
                for child in children {
                    child.write_to(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() as usize);
        self.write_to(&mut out);
        out
    }
}

/// Number of bytes which precede the child boxes of a container, or `None` if
/// the box type is not treated as a container.
fn container_prefix_size(type_: &FourCc, payload: &[u8]) -> Option<usize> {
    match type_ {
        b"moov" | b"trak" | b"mdia" | b"minf" | b"stbl" | b"dinf" | b"edts" | b"mvex"
        | b"moof" | b"traf" | b"sinf" | b"schi" | b"tref" => Some(0),
        b"stsd" => Some(8),
        // full boxes holding odhe and odda, or ohdr and odaf
        b"odrm" | b"odkm" => Some(4),
        // full box, content type length and content type
        b"odhe" => payload.get(4).map(|&x| 5 + x as usize),
        b"encv" => Some(parser::VISUAL_SAMPLE_ENTRY_SIZE as usize),
        b"enct" | b"encs" => Some(parser::TEXT_SAMPLE_ENTRY_SIZE as usize),
        b"enca" => parser::audio_sample_entry_size(payload)
            .ok()
            .map(|x| x as usize),
        _ => None,
    }
}

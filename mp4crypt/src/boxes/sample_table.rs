use crate::{Atom, Error, Result};

/// Location of one sample of a non-fragmented track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleLocation {
    pub offset: u64,
    pub size: u32,
    /// 1-based index into the sample description box.
    pub description_index: u32,
}

/// Flattened view of the `stsz`/`stz2`, `stsc` and `stco`/`co64` boxes of a track.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleTable {
    pub samples: Vec<SampleLocation>,
}

struct StscEntry {
    first_chunk: u32,
    samples_per_chunk: u32,
    description_index: u32,
}

impl SampleTable {
    /// Read the sample table of an `stbl` box.
    pub fn from_stbl(stbl: &Atom) -> Result<Self> {
        let sizes = read_sizes(stbl)?;
        let chunk_offsets = read_chunk_offsets(stbl)?;
        let stsc = read_stsc(stbl)?;

        let mut samples = Vec::with_capacity(sizes.len());
        let mut sizes_iter = sizes.iter();

        'chunks: for (chunk_index, chunk_offset) in chunk_offsets.iter().enumerate() {
            let chunk_number = chunk_index as u32 + 1;
            let entry = stsc.iter().rev().find(|x| x.first_chunk <= chunk_number);
            let entry = match entry {
                Some(x) => x,
                None => break,
            };

            let mut offset = *chunk_offset;

            for _ in 0..entry.samples_per_chunk {
                let size = match sizes_iter.next() {
                    Some(x) => *x,
                    None => break 'chunks,
                };

                samples.push(SampleLocation {
                    offset,
                    size,
                    description_index: entry.description_index,
                });
                offset += size as u64;
            }
        }

        if samples.len() != sizes.len() {
            return Err(Error::invalid_format(format!(
                "sample table maps {} of {} samples to chunks",
                samples.len(),
                sizes.len()
            )));
        }

        Ok(Self { samples })
    }

    /// Serialise as one sample per chunk, returning the `stsz`, `stsc` and
    /// `stco` (or `co64`) boxes.
    pub fn to_atoms(&self) -> [Atom; 3] {
        let count = self.samples.len() as u32;

        let mut stsz = Vec::with_capacity(8 + self.samples.len() * 4);
        stsz.extend_from_slice(&0u32.to_be_bytes());
        stsz.extend_from_slice(&count.to_be_bytes());
        for sample in &self.samples {
            stsz.extend_from_slice(&sample.size.to_be_bytes());
        }

        let mut stsc_entries = Vec::new();
        let mut previous = None;
        for (i, sample) in self.samples.iter().enumerate() {
            if previous != Some(sample.description_index) {
                stsc_entries.push((i as u32 + 1, sample.description_index));
                previous = Some(sample.description_index);
            }
        }

        let mut stsc = Vec::with_capacity(4 + stsc_entries.len() * 12);
        stsc.extend_from_slice(&(stsc_entries.len() as u32).to_be_bytes());
        for (first_chunk, description_index) in stsc_entries {
            stsc.extend_from_slice(&first_chunk.to_be_bytes());
            stsc.extend_from_slice(&1u32.to_be_bytes());
            stsc.extend_from_slice(&description_index.to_be_bytes());
        }

        let large = self.samples.iter().any(|x| x.offset > u32::MAX as u64);
        let mut offsets = Vec::with_capacity(4 + self.samples.len() * if large { 8 } else { 4 });
        offsets.extend_from_slice(&count.to_be_bytes());
        for sample in &self.samples {
            if large {
                offsets.extend_from_slice(&sample.offset.to_be_bytes());
            } else {
                offsets.extend_from_slice(&(sample.offset as u32).to_be_bytes());
            }
        }

        [
            Atom::new_full(*b"stsz", 0, 0, &stsz),
            Atom::new_full(*b"stsc", 0, 0, &stsc),
            Atom::new_full(if large { *b"co64" } else { *b"stco" }, 0, 0, &offsets),
        ]
    }

    /// Replace the sample table boxes of an `stbl` with the serialised form of `self`.
    pub fn write_into(&self, stbl: &mut Atom) {
        let [stsz, stsc, offsets] = self.to_atoms();

        if let Some(children) = stbl.children_mut() {
            children.retain(|x| !matches!(&x.type_, b"stsz" | b"stz2" | b"stsc" | b"stco" | b"co64"));
            children.push(stsz);
            children.push(stsc);
            children.push(offsets);
        }
    }
}

fn read_sizes(stbl: &Atom) -> Result<Vec<u32>> {
    if let Some(stsz) = stbl.child(b"stsz") {
        let (_, _, mut reader) = stsz.full_box_reader()?;
        let sample_size = reader.read_u32()?;
        let sample_count = reader.read_u32()?;

        if sample_size != 0 {
            return Ok(vec![sample_size; sample_count as usize]);
        }

        let mut sizes = Vec::with_capacity((sample_count as usize).min(reader.remaining() as usize));
        for _ in 0..sample_count {
            sizes.push(reader.read_u32()?);
        }
        return Ok(sizes);
    }

    if let Some(stz2) = stbl.child(b"stz2") {
        let (_, _, mut reader) = stz2.full_box_reader()?;
        reader.skip(3)?;
        let field_size = reader.read_u8()?;
        let sample_count = reader.read_u32()?;
        let mut sizes = Vec::with_capacity((sample_count as usize).min(reader.remaining() as usize * 2));

        let mut i = 0;
        while i < sample_count {
            match field_size {
                4 => {
                    let byte = reader.read_u8()?;
                    sizes.push((byte >> 4) as u32);
                    if i + 1 < sample_count {
                        sizes.push((byte & 0x0F) as u32);
                    }
                    i += 2;
                    continue;
                }
                8 => sizes.push(reader.read_u8()? as u32),
                16 => sizes.push(reader.read_u16()? as u32),
                _ => {
                    return Err(Error::invalid_format(format!(
                        "invalid stz2 field size {}",
                        field_size
                    )));
                }
            }
            i += 1;
        }
        return Ok(sizes);
    }

    Err(Error::invalid_format("missing sample size box"))
}

fn read_chunk_offsets(stbl: &Atom) -> Result<Vec<u64>> {
    let (atom, large) = match (stbl.child(b"stco"), stbl.child(b"co64")) {
        (Some(x), _) => (x, false),
        (None, Some(x)) => (x, true),
        (None, None) => return Err(Error::invalid_format("missing chunk offset box")),
    };

    let (_, _, mut reader) = atom.full_box_reader()?;
    let entry_count = reader.read_u32()?;
    let mut offsets = Vec::with_capacity((entry_count as usize).min(reader.remaining() as usize));

    for _ in 0..entry_count {
        offsets.push(if large {
            reader.read_u64()?
        } else {
            reader.read_u32()? as u64
        });
    }

    Ok(offsets)
}

fn read_stsc(stbl: &Atom) -> Result<Vec<StscEntry>> {
    let stsc = stbl
        .child(b"stsc")
        .ok_or_else(|| Error::invalid_format("missing sample to chunk box"))?;

    let (_, _, mut reader) = stsc.full_box_reader()?;
    let entry_count = reader.read_u32()?;
    let mut entries = Vec::with_capacity((entry_count as usize).min(reader.remaining() as usize));

    for _ in 0..entry_count {
        entries.push(StscEntry {
            first_chunk: reader.read_u32()?,
            samples_per_chunk: reader.read_u32()?,
            description_index: reader.read_u32()?,
        });
    }

    Ok(entries)
}

use super::Mp4Box;
use crate::{Atom, FourCc, Reader, Result};

/// File Type Box (ftyp).
#[derive(Clone, Debug, PartialEq)]
pub struct FtypBox {
    pub major_brand: FourCc,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCc>,
}

impl FtypBox {
    /// Returns true if `brand` is either the major brand or one of the compatible brands.
    pub fn has_brand(&self, brand: &FourCc) -> bool {
        &self.major_brand == brand || self.compatible_brands.contains(brand)
    }

    /// Drop `brand` from the box, replacing it with `replacement` when it is the major brand.
    pub fn remove_brand(&mut self, brand: &FourCc, replacement: FourCc) {
        if &self.major_brand == brand {
            self.major_brand = replacement;
        }

        self.compatible_brands.retain(|x| x != brand);
    }

    pub fn to_atom(&self) -> Atom {
        let mut data = Vec::with_capacity(8 + self.compatible_brands.len() * 4);
        data.extend_from_slice(&self.major_brand);
        data.extend_from_slice(&self.minor_version.to_be_bytes());

        for brand in &self.compatible_brands {
            data.extend_from_slice(brand);
        }

        Atom::new_data(*b"ftyp", data)
    }
}

impl Mp4Box for FtypBox {
    const FULL_BOX: bool = false;

    fn parse(reader: &mut Reader, _: u8, _: u32) -> Result<Self> {
        let major_brand = reader.read_fourcc()?;
        let minor_version = reader.read_u32()?;
        let mut compatible_brands = Vec::new();

        // A trailing partial brand is ignored.
        while reader.remaining() >= 4 {
            compatible_brands.push(reader.read_fourcc()?);
        }

        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }
}

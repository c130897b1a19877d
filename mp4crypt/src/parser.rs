/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/lib/util/mp4_parser.js
    2. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/externs/shaka/mp4_parser.js

*/

use crate::{Atom, Error, FourCc, Reader, Result, fourcc, fourcc_to_string};
use std::{cell::Cell, collections::HashMap, rc::Rc};

/// `Result` type returned by box callbacks.
pub type HandlerResult = Result<()>;
/// Callback type for parsing an mp4 box.
pub type CallbackType = Rc<dyn Fn(ParsedBox) -> HandlerResult>;

/// Callback based mp4 parser.
///
/// Only boxes which have a definition are handed over to callbacks, everything
/// else is skipped. Positions reported through [`ParsedBox::start`] are absolute
/// offsets into the buffer given to [`Mp4Parser::parse`].
#[derive(Clone, Default)]
pub struct Mp4Parser {
    headers: HashMap<FourCc, BoxType>,
    box_definitions: HashMap<FourCc, CallbackType>,
    done: Rc<Cell<bool>>,
}

impl Mp4Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a box type as a Basic Box.
    pub fn base_box<F>(mut self, type_: &str, definition: F) -> Self
    where
        F: Fn(ParsedBox) -> HandlerResult + 'static,
    {
        let type_code = fourcc(type_);
        self.headers.insert(type_code, BoxType::BasicBox);
        self.box_definitions.insert(type_code, Rc::new(definition));
        self
    }

    /// Declare a box type as a Full Box.
    pub fn full_box<F>(mut self, type_: &str, definition: F) -> Self
    where
        F: Fn(ParsedBox) -> HandlerResult + 'static,
    {
        let type_code = fourcc(type_);
        self.headers.insert(type_code, BoxType::FullBox);
        self.box_definitions.insert(type_code, Rc::new(definition));
        self
    }

    /// Stop parsing. Useful for avoiding work once you find what you are looking for.
    pub fn stop(&self) {
        self.done.set(true);
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Parse the given data using the added callbacks.
    ///
    /// # Arguments
    ///
    /// - `partial_okay` - If true, allow reading partial payloads
    ///   from some boxes. If the goal is a child box, we can sometimes find it
    ///   without enough data to find all child boxes.
    /// - `stop_on_partial` - If true, stop reading if an incomplete
    ///   box is detected.
    pub fn parse(&self, data: &[u8], partial_okay: bool, stop_on_partial: bool) -> HandlerResult {
        let mut reader = Reader::new(data.to_vec());

        self.done.set(false);

        while reader.has_more_data() && !self.is_done() {
            self.parse_next(0, &mut reader, partial_okay, stop_on_partial)?;
        }

        Ok(())
    }

    /// Parse the next box on the current level.
    ///
    /// `abs_start` is the absolute position of the reader's first byte in the
    /// original buffer.
    pub fn parse_next(
        &self,
        abs_start: u64,
        reader: &mut Reader,
        partial_okay: bool,
        stop_on_partial: bool,
    ) -> HandlerResult {
        let start = reader.get_position();

        // size(4 bytes) + type(4 bytes) = 8 bytes
        if stop_on_partial && start + 8 > reader.get_length() {
            self.stop();
            return Ok(());
        }

        let mut size = reader.read_u32()? as u64;
        let type_ = reader.read_fourcc()?;
        let mut has_64_bit_size = false;

        match size {
            0 => size = reader.get_length() - start,
            1 => {
                if stop_on_partial && reader.get_position() + 8 > reader.get_length() {
                    self.stop();
                    return Ok(());
                }
                size = reader.read_u64()?;
                has_64_bit_size = true;
            }
            _ => (),
        }

        if size < reader.get_position() - start {
            return Err(Error::invalid_format(format!(
                "box '{}' declares size {} which is smaller than its header",
                fourcc_to_string(&type_),
                size
            )));
        }

        if let Some(box_definition) = self.box_definitions.get(&type_) {
            let mut version = None;
            let mut flags = None;

            if self.headers.get(&type_) == Some(&BoxType::FullBox) {
                if stop_on_partial && reader.get_position() + 4 > reader.get_length() {
                    self.stop();
                    return Ok(());
                }

                let version_and_flags = reader.read_u32()?;
                version = Some((version_and_flags >> 24) as u8);
                flags = Some(version_and_flags & 0xFFFFFF);
            }

            // Read the whole payload so that the current level can be safely read
            // regardless of how the payload is parsed.
            let mut end = start + size;

            if partial_okay && end > reader.get_length() {
                // For partial reads, truncate the payload if we must.
                end = reader.get_length();
            }

            if stop_on_partial && end > reader.get_length() {
                self.stop();
                return Ok(());
            }

            let payload_size = end.checked_sub(reader.get_position()).ok_or_else(|| {
                Error::invalid_format(format!(
                    "full box '{}' is too small for its version and flags",
                    fourcc_to_string(&type_)
                ))
            })?;
            let payload = reader.read_bytes(payload_size as usize)?;

            let box_ = ParsedBox {
                type_,
                parser: self.clone(),
                partial_okay,
                stop_on_partial,
                version,
                flags,
                reader: Reader::new(payload),
                size,
                start: start + abs_start,
                has_64_bit_size,
            };

            box_definition(box_)?;
        } else {
            // Move the read head to be at the end of the box.
            // If the box is longer than the remaining parts of the buffer, e.g. this
            // was a partial read that ended in the middle of a box, just skip to the end.
            let skip_length =
                (start + size - reader.get_position()).min(reader.remaining());
            reader.skip(skip_length)?;
        }

        Ok(())
    }
}

// CALLBACKS

/// A callback that tells the Mp4 parser to treat the body of a box as a series
/// of boxes. The number of boxes is limited by the size of the parent box.
pub fn children(mut box_: ParsedBox) -> HandlerResult {
    let payload_start = box_.payload_start();

    while box_.reader.has_more_data() && !box_.parser.is_done() {
        box_.parser.parse_next(
            payload_start,
            &mut box_.reader,
            box_.partial_okay,
            box_.stop_on_partial,
        )?;
    }

    Ok(())
}

/// A callback that tells the Mp4 parser to treat the body of a box as a sample
/// description. A sample description box has a fixed number of children. The
/// number of children is represented by a 4 byte unsigned integer. Each child
/// is a box.
pub fn sample_description(mut box_: ParsedBox) -> HandlerResult {
    let payload_start = box_.payload_start();
    let count = box_.reader.read_u32()?;

    for _ in 0..count {
        if !box_.reader.has_more_data() {
            break;
        }

        box_.parser.parse_next(
            payload_start,
            &mut box_.reader,
            box_.partial_okay,
            box_.stop_on_partial,
        )?;

        if box_.parser.is_done() {
            break;
        }
    }

    Ok(())
}

/// A callback that tells the Mp4 parser to treat the body of a box as a visual
/// sample entry. A visual sample entry has some fixed-sized fields
/// describing the video codec parameters, followed by an arbitrary number of
/// appended children. Each child is a box.
pub fn visual_sample_entry(mut box_: ParsedBox) -> HandlerResult {
    box_.reader.skip(VISUAL_SAMPLE_ENTRY_SIZE)?;
    children(box_)
}

/// A callback that tells the Mp4 parser to treat the body of a box as a audio
/// sample entry. A audio sample entry has some fixed-sized fields
/// describing the audio codec parameters, followed by an arbitrary number of
/// appended children. Each child is a box.
pub fn audio_sample_entry(mut box_: ParsedBox) -> HandlerResult {
    let payload = box_.reader.clone().read_to_end()?;
    box_.reader.skip(audio_sample_entry_size(&payload)?)?;
    children(box_)
}

/// A callback for protected text and subtitle sample entries (`enct`, `encs`)
/// whose children directly follow the generic sample entry fields, as in `wvtt`.
/// Entries with format specific fields in between are left unparsed.
pub fn text_sample_entry(mut box_: ParsedBox) -> HandlerResult {
    let payload = box_.reader.clone().read_to_end()?;

    match payload.get(TEXT_SAMPLE_ENTRY_SIZE as usize..) {
        Some(rest) if Atom::parse_all(rest).is_ok() => {
            box_.reader.skip(TEXT_SAMPLE_ENTRY_SIZE)?;
            children(box_)
        }
        _ => Ok(()),
    }
}

/// Fixed part of a text sample entry: 6 reserved bytes and a 2 byte data
/// reference index.
pub const TEXT_SAMPLE_ENTRY_SIZE: u64 = 8;

/// Fixed part of a visual sample entry.
///
/// 6 reserved bytes, 2 byte data reference index, 16 more reserved bytes,
/// 4 bytes for width/height, 8 bytes for horizontal/vertical resolution,
/// 4 more reserved bytes, 2 byte frame count, 32 byte compressor name,
/// 2 byte depth and 2 more reserved bytes.
/// See also https://github.com/shaka-project/shaka-packager/blob/d5ca6e84/packager/media/formats/mp4/box_definitions.cc#L1544
pub const VISUAL_SAMPLE_ENTRY_SIZE: u64 = 78;

/// Fixed part of an audio sample entry, which depends on the sound description version.
pub fn audio_sample_entry_size(payload: &[u8]) -> Result<u64> {
    // 6 bytes reserved
    // 2 bytes data reference index
    // 2 bytes version
    let version = match payload.get(8..10) {
        Some(x) => u16::from_be_bytes([x[0], x[1]]),
        None => return Err(Error::invalid_format("audio sample entry is truncated")),
    };

    // 2 bytes revision and 4 bytes vendor
    let mut size = 16;

    size += if version == 2 {
        // 16 bytes hard-coded values with no comments
        // 8 bytes sample rate
        // 4 bytes channel count
        // 4 bytes hard-coded values with no comments
        // 4 bytes bits per sample
        // 4 bytes lpcm flags
        // 4 bytes sample size
        // 4 bytes samples per packet
        48
    } else {
        // 2 bytes channel count
        // 2 bytes bits per sample
        // 2 bytes compression ID
        // 2 bytes packet size
        // 4 bytes sample rate
        12
    };

    if version == 1 {
        // 4 bytes samples per packet
        // 4 bytes bytes per packet
        // 4 bytes bytes per frame
        // 4 bytes bytes per sample
        size += 16;
    }

    Ok(size)
}

/// An enum used to track the type of box so that the correct values can be
/// read from the header.
#[derive(Clone, PartialEq)]
pub enum BoxType {
    BasicBox,
    FullBox,
}

/// Parsed mp4 box.
pub struct ParsedBox {
    /// The box type (fourcc).
    pub type_: FourCc,
    /// The parser that parsed this box. The parser can be used to parse child
    /// boxes where the configuration of the current parser is needed to parsed
    /// other boxes.
    pub parser: Mp4Parser,
    /// If true, allows reading partial payloads from some boxes. If the goal is a
    /// child box, we can sometimes find it without enough data to find all child
    /// boxes. This property allows the partialOkay flag from parse() to be
    /// propagated through methods like children().
    pub partial_okay: bool,
    /// If true, stop reading if an incomplete box is detected.
    pub stop_on_partial: bool,
    /// The start of this box (before the header) in the original buffer. This
    /// start position is the absolute position.
    pub start: u64,
    /// The size of this box (including the header).
    pub size: u64,
    /// The version for a full box, none for basic boxes.
    pub version: Option<u8>,
    /// The flags for a full box, none for basic boxes.
    pub flags: Option<u32>,
    /// The reader for this box is only for this box. Reading or not reading to
    /// the end will have no affect on the parser reading other sibling boxes.
    pub reader: Reader,
    /// If true, the box header had a 64-bit size field.  This affects the offsets
    /// of other fields.
    pub has_64_bit_size: bool,
}

impl ParsedBox {
    /// Find the header size of the box.
    /// Useful for modifying boxes in place or finding the exact offset of a field.
    pub fn header_size(&self) -> u64 {
        let basic_header_size = 8;
        let _64_bit_field_size = if self.has_64_bit_size { 8 } else { 0 };
        let version_and_flags_size = if self.flags.is_some() { 4 } else { 0 };
        basic_header_size + _64_bit_field_size + version_and_flags_size
    }

    /// Absolute position of the first payload byte.
    pub fn payload_start(&self) -> u64 {
        self.start + self.header_size()
    }

    pub fn name(&self) -> String {
        fourcc_to_string(&self.type_)
    }

    pub fn version(&self) -> u8 {
        self.version.unwrap_or(0)
    }

    pub fn flags(&self) -> u32 {
        self.flags.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn boxed(type_: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut data = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        data.extend_from_slice(type_);
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn reports_absolute_offsets_of_nested_boxes() {
        let inner = boxed(b"tkhd", &[0; 4]);
        let trak = boxed(b"trak", &inner);
        let mut data = boxed(b"free", &[0; 8]);
        data.extend(boxed(b"moov", &trak));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_c = seen.clone();

        Mp4Parser::new()
            .base_box("moov", children)
            .base_box("trak", children)
            .full_box("tkhd", move |box_| {
                seen_c.borrow_mut().push((box_.start, box_.size));
                Ok(())
            })
            .parse(&data, false, false)
            .unwrap();

        assert_eq!(*seen.borrow(), vec![(32, 12)]);
    }

    #[test]
    fn rejects_undersized_boxes() {
        let mut data = 4u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"moov");
        let result = Mp4Parser::new().base_box("moov", children).parse(&data, false, false);
        assert!(result.is_err());
    }
}

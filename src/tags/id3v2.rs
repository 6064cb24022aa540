//! ID3v2 tag decoder (versions 2.2, 2.3 and 2.4).
//!
//! Walks the frame list of the tag at the start of the buffer and emits one
//! [`RawTagEntry`] per frame the normalizer knows about. Frame ids from v2.2
//! are mapped onto their v2.3 names so both share one dispatch table.

use std::borrow::Cow;

use tracing::{debug, trace, warn};

use super::encoding::TextEncoding;
use super::normalize::{self, Dialect};
use super::reader::ByteReader;
use crate::error::{ParseError, Result};
use crate::models::{FourCc, ImageFormat, RawTagEntry, TagValue};

const MAGIC: &[u8; 3] = b"ID3";

const APIC: FourCc = FourCc::new(b"APIC");
const PRIV: FourCc = FourCc::new(b"PRIV");
const TXXX: FourCc = FourCc::new(b"TXXX");

const V22_FRAME_IDS: &[(&[u8; 3], FourCc)] = &[
    (b"TT2", FourCc::new(b"TIT2")),
    (b"TAL", FourCc::new(b"TALB")),
    (b"TP1", FourCc::new(b"TPE1")),
    (b"TCO", FourCc::new(b"TCON")),
    (b"TYE", FourCc::new(b"TYER")),
    (b"TRK", FourCc::new(b"TRCK")),
    (b"TPA", FourCc::new(b"TPOS")),
    (b"PIC", APIC),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub major: u8,
    pub revision: u8,
    pub flags: u8,
    /// Size of the tag after the 10-byte header.
    pub size: u32,
}

impl TagHeader {
    pub const LEN: usize = 10;

    pub fn parse(reader: &mut ByteReader<'_>) -> Result<Self> {
        if reader.slice(3)? != MAGIC {
            return Err(ParseError::Unrecognized);
        }
        let major = reader.read_u8()?;
        let revision = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let size = reader.read_synchsafe_u32()?;

        if !(2..=4).contains(&major) {
            return Err(ParseError::UnsupportedVersion { major });
        }

        Ok(Self {
            major,
            revision,
            flags,
            size,
        })
    }

    pub fn unsynchronised(&self) -> bool {
        self.flags & 0x80 != 0
    }

    pub fn has_extended_header(&self) -> bool {
        self.major >= 3 && self.flags & 0x40 != 0
    }

    /// v2.2 reused bit 6 for a compression scheme that was never defined.
    pub fn compressed(&self) -> bool {
        self.major == 2 && self.flags & 0x40 != 0
    }

    fn frame_header_len(&self) -> usize {
        if self.major == 2 {
            6
        } else {
            10
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw id; three-character v2.2 ids are padded with a space.
    pub id: FourCc,
    pub size: usize,
    pub flags: u16,
}

impl FrameHeader {
    pub fn parse(reader: &mut ByteReader<'_>, major: u8) -> Result<Self> {
        let (id, size, flags) = match major {
            2 => {
                let raw = reader.slice(3)?;
                let id = FourCc([raw[0], raw[1], raw[2], b' ']);
                (id, reader.read_u24()?, 0)
            }
            3 => {
                let id = read_fourcc(reader)?;
                (id, reader.read_u32()?, reader.read_u16()?)
            }
            _ => {
                let id = read_fourcc(reader)?;
                (id, reader.read_synchsafe_u32()?, reader.read_u16()?)
            }
        };

        Ok(Self {
            id,
            size: size as usize,
            flags,
        })
    }

    fn id_len(&self) -> usize {
        if self.id.0[3] == b' ' {
            3
        } else {
            4
        }
    }

    pub fn has_valid_id(&self) -> bool {
        self.id.0[..self.id_len()]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    }

    /// Name used by the normalizer tables.
    pub fn key(&self) -> FourCc {
        if self.id_len() == 3 {
            let short = [self.id.0[0], self.id.0[1], self.id.0[2]];
            return V22_FRAME_IDS
                .iter()
                .find(|(id, _)| **id == short)
                .map(|(_, key)| *key)
                .unwrap_or(self.id);
        }
        self.id
    }

    fn label(&self) -> String {
        self.id.to_string().trim_end().to_string()
    }
}

fn read_fourcc(reader: &mut ByteReader<'_>) -> Result<FourCc> {
    let raw = reader.slice(4)?;
    Ok(FourCc([raw[0], raw[1], raw[2], raw[3]]))
}

/// Decodes the ID3v2 tag at the start of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Vec<RawTagEntry<'_>>> {
    let mut reader = ByteReader::new(bytes);
    let header = TagHeader::parse(&mut reader)?;
    debug!(
        major = header.major,
        revision = header.revision,
        size = header.size,
        "ID3v2 tag"
    );

    let region = reader.slice(header.size as usize)?;

    if header.compressed() {
        warn!("ID3v2.2 tag uses compression; no frames decoded");
        return Ok(Vec::new());
    }

    if header.unsynchronised() && header.major < 4 {
        let resynced = resynchronise(region);
        let entries = walk_frames(&resynced, &header)?;
        return Ok(entries.into_iter().map(RawTagEntry::into_owned).collect());
    }

    walk_frames(region, &header)
}

fn walk_frames<'a>(region: &'a [u8], header: &TagHeader) -> Result<Vec<RawTagEntry<'a>>> {
    let mut frames = ByteReader::new(region);
    let mut entries = Vec::new();

    if header.has_extended_header() {
        skip_extended_header(&mut frames, header.major)?;
    }

    let header_len = header.frame_header_len();
    while frames.remaining() >= header_len {
        let position = TagHeader::LEN + frames.position();

        if frames.peek(1)?[0] == 0 {
            trace!("padding at offset {position}");
            break;
        }

        let frame = FrameHeader::parse(&mut frames, header.major)?;
        if !frame.has_valid_id() {
            debug!(id = %frame.id, "unusual frame id at offset {position}, skipping by size");
        }

        if frame.size > frames.remaining() {
            return Err(ParseError::CorruptFrame {
                id: frame.label(),
                declared: frame.size,
                available: frames.remaining(),
            });
        }
        let payload = frames.slice(frame.size)?;

        let key = frame.key();
        if !normalize::is_mapped(Dialect::Id3v2, key) {
            trace!(id = %frame.id, size = frame.size, "skipping frame");
            continue;
        }

        let Some(payload) = frame_body(&frame, header, payload) else {
            continue;
        };

        if let Some(value) = decode_frame(&frame, key, header.major, payload)? {
            entries.push(RawTagEntry::new(key, value, position));
        }
    }

    Ok(entries)
}

fn skip_extended_header(frames: &mut ByteReader<'_>, major: u8) -> Result<()> {
    let size = if major == 3 {
        frames.read_u32()? as usize
    } else {
        // v2.4 counts the size field itself
        (frames.read_synchsafe_u32()? as usize).saturating_sub(4)
    };

    if size > frames.remaining() {
        return Err(ParseError::CorruptFrame {
            id: "extended header".to_string(),
            declared: size,
            available: frames.remaining(),
        });
    }
    frames.skip(size)
}

/// Applies per-frame format flags. `None` means the frame cannot be read.
fn frame_body<'a>(
    frame: &FrameHeader,
    header: &TagHeader,
    payload: &'a [u8],
) -> Option<Cow<'a, [u8]>> {
    let format = (frame.flags & 0xFF) as u8;

    let (skip_flags, prefix_len, unsync) = match header.major {
        3 => (format & 0xC0, usize::from(format & 0x20 != 0), false),
        4 => (
            format & 0x0C,
            usize::from(format & 0x40 != 0) + 4 * usize::from(format & 0x01 != 0),
            format & 0x02 != 0 || header.unsynchronised(),
        ),
        _ => (0, 0, false),
    };

    if skip_flags != 0 {
        warn!(id = %frame.id, "compressed or encrypted frame skipped");
        return None;
    }

    let Some(body) = payload.get(prefix_len..) else {
        warn!(id = %frame.id, "frame shorter than its flag fields, skipped");
        return None;
    };

    if unsync {
        Some(Cow::Owned(resynchronise(body)))
    } else {
        Some(Cow::Borrowed(body))
    }
}

fn decode_frame<'a>(
    frame: &FrameHeader,
    key: FourCc,
    major: u8,
    payload: Cow<'a, [u8]>,
) -> Result<Option<TagValue<'a>>> {
    match key {
        APIC => decode_picture(frame, major, payload),
        PRIV => Ok(decode_private(payload)),
        _ if key.0[0] == b'T' && key != TXXX => Ok(decode_text(frame, &payload)),
        _ => Ok(None),
    }
}

fn decode_text<'a>(frame: &FrameHeader, payload: &[u8]) -> Option<TagValue<'a>> {
    let (&marker, body) = payload.split_first()?;
    let Some(encoding) = TextEncoding::from_marker(marker) else {
        warn!(id = %frame.id, marker, "unknown text encoding, frame skipped");
        return None;
    };

    let text = encoding.decode(encoding.first_value(body));
    if text.is_empty() {
        return None;
    }
    Some(TagValue::Text(text))
}

fn decode_picture<'a>(
    frame: &FrameHeader,
    major: u8,
    payload: Cow<'a, [u8]>,
) -> Result<Option<TagValue<'a>>> {
    let mut reader = ByteReader::new(&payload);
    let image_start = picture_header_len(&mut reader, major).map_err(|err| match err {
        ParseError::TruncatedInput {
            offset,
            needed,
            available,
        } => ParseError::CorruptFrame {
            id: frame.label(),
            declared: offset + needed,
            available: offset + available,
        },
        other => other,
    })?;

    let Some(image_start) = image_start else {
        return Ok(None);
    };
    if image_start >= payload.len() {
        debug!(id = %frame.id, "picture frame without image data");
        return Ok(None);
    }

    Ok(Some(TagValue::Binary(tail(payload, image_start))))
}

/// Reads the fields in front of the image bytes and returns where they start.
fn picture_header_len(reader: &mut ByteReader<'_>, major: u8) -> Result<Option<usize>> {
    let marker = reader.read_u8()?;
    let Some(encoding) = TextEncoding::from_marker(marker) else {
        warn!(marker, "unknown text encoding in picture frame, skipped");
        return Ok(None);
    };

    if major == 2 {
        reader.read_fixed_string(3, TextEncoding::Latin1)?;
    } else {
        reader.read_null_terminated_string(TextEncoding::Latin1)?;
    }
    let picture_type = reader.read_u8()?;
    let description = reader.read_null_terminated_string(encoding)?;
    trace!(picture_type, description = %description, "picture frame");

    Ok(Some(reader.position()))
}

/// `PRIV` frames only count when they carry a JPEG or PNG image.
fn decode_private(payload: Cow<'_, [u8]>) -> Option<TagValue<'_>> {
    if ImageFormat::is_private_frame_candidate(&payload) {
        return Some(TagValue::Binary(payload));
    }

    let owner_end = payload.iter().position(|&b| b == 0)?;
    if ImageFormat::is_private_frame_candidate(&payload[owner_end + 1..]) {
        return Some(TagValue::Binary(tail(payload, owner_end + 1)));
    }
    None
}

fn tail(payload: Cow<'_, [u8]>, start: usize) -> Cow<'_, [u8]> {
    match payload {
        Cow::Borrowed(bytes) => Cow::Borrowed(&bytes[start..]),
        Cow::Owned(mut bytes) => {
            bytes.drain(..start);
            Cow::Owned(bytes)
        }
    }
}

/// Reverses unsynchronisation: drops every `0x00` that follows `0xFF`.
pub fn resynchronise(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut previous = 0u8;
    for &b in data {
        if !(previous == 0xFF && b == 0x00) {
            out.push(b);
        }
        previous = b;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_v3(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut buf = id.to_vec();
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(payload);
        buf
    }

    fn text_v3(id: &[u8; 4], text: &str) -> Vec<u8> {
        let mut payload = vec![0];
        payload.extend_from_slice(text.as_bytes());
        frame_v3(id, &payload)
    }

    fn synchsafe(n: usize) -> [u8; 4] {
        let n = n as u32;
        [
            ((n >> 21) & 0x7F) as u8,
            ((n >> 14) & 0x7F) as u8,
            ((n >> 7) & 0x7F) as u8,
            (n & 0x7F) as u8,
        ]
    }

    fn tag(major: u8, flags: u8, frames: &[u8]) -> Vec<u8> {
        let mut buf = b"ID3".to_vec();
        buf.extend_from_slice(&[major, 0, flags]);
        buf.extend_from_slice(&synchsafe(frames.len()));
        buf.extend_from_slice(frames);
        buf
    }

    fn entries_of(data: Vec<u8>) -> Vec<RawTagEntry<'static>> {
        decode(&data)
            .unwrap()
            .into_iter()
            .map(RawTagEntry::into_owned)
            .collect()
    }

    fn texts(entries: &[RawTagEntry<'_>]) -> Vec<(String, String)> {
        entries
            .iter()
            .filter_map(|e| match &e.value {
                TagValue::Text(t) => Some((e.key.to_string(), t.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_header_rejects_unknown_versions() {
        let data = tag(5, 0, &[]);
        assert_eq!(
            decode(&data).unwrap_err(),
            ParseError::UnsupportedVersion { major: 5 }
        );
        let data = tag(1, 0, &[]);
        assert_eq!(
            decode(&data).unwrap_err(),
            ParseError::UnsupportedVersion { major: 1 }
        );
    }

    #[test]
    fn test_v3_text_frames_in_order() {
        let mut frames = text_v3(b"TIT2", "Foo");
        frames.extend(text_v3(b"TPE1", "Bar"));
        frames.extend(text_v3(b"TRCK", "3/12"));
        let entries = entries_of(tag(3, 0, &frames));

        assert_eq!(
            texts(&entries),
            vec![
                ("TIT2".to_string(), "Foo".to_string()),
                ("TPE1".to_string(), "Bar".to_string()),
                ("TRCK".to_string(), "3/12".to_string()),
            ]
        );
        assert!(entries.windows(2).all(|w| w[0].position < w[1].position));
        assert_eq!(entries[0].position, 10);
    }

    #[test]
    fn test_unknown_frames_are_skipped() {
        let mut frames = text_v3(b"TXXX", "\0custom");
        frames.extend(frame_v3(b"ZZZZ", &[1, 2, 3]));
        frames.extend(text_v3(b"TALB", "Album"));
        let entries = entries_of(tag(3, 0, &frames));
        assert_eq!(
            texts(&entries),
            vec![("TALB".to_string(), "Album".to_string())]
        );
    }

    #[test]
    fn test_frame_with_unusual_id_is_skipped() {
        let mut frames = frame_v3(b"Xyz1", b"\0junk");
        frames.extend(text_v3(b"TIT2", "Foo"));
        let entries = entries_of(tag(3, 0, &frames));
        assert_eq!(
            texts(&entries),
            vec![("TIT2".to_string(), "Foo".to_string())]
        );
    }

    #[test]
    fn test_padding_stops_walk() {
        let mut frames = text_v3(b"TIT2", "Foo");
        frames.extend_from_slice(&[0u8; 32]);
        let entries = entries_of(tag(3, 0, &frames));
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_frame_larger_than_tag_is_corrupt() {
        let mut frames = b"TALB".to_vec();
        frames.extend_from_slice(&100u32.to_be_bytes());
        frames.extend_from_slice(&[0, 0, 0, b'A']);
        let err = decode(&tag(3, 0, &frames)).unwrap_err();
        assert_eq!(
            err,
            ParseError::CorruptFrame {
                id: "TALB".to_string(),
                declared: 100,
                available: 2,
            }
        );
    }

    #[test]
    fn test_tag_longer_than_buffer_is_truncated() {
        let mut data = tag(3, 0, &text_v3(b"TIT2", "Foo"));
        data.truncate(data.len() - 2);
        assert!(decode(&data).unwrap_err().needs_more_data());
    }

    #[test]
    fn test_v4_synchsafe_frame_size() {
        // 200 bytes of text: the synchsafe encoding differs from a plain u32
        let text = "x".repeat(199);
        let mut payload = vec![3];
        payload.extend_from_slice(text.as_bytes());

        let mut frames = b"TIT2".to_vec();
        frames.extend_from_slice(&synchsafe(payload.len()));
        frames.extend_from_slice(&[0, 0]);
        frames.extend_from_slice(&payload);
        frames.extend(text_v3(b"TPE1", "after"));

        let entries = entries_of(tag(4, 0, &frames));
        assert_eq!(texts(&entries)[0].1, text);
        assert_eq!(texts(&entries)[1].1, "after");
    }

    #[test]
    fn test_v2_three_char_frames() {
        let mut frames = Vec::new();
        for (id, text) in [(b"TT2", "Old"), (b"TP1", "Timer")] {
            frames.extend_from_slice(id);
            frames.extend_from_slice(&[0, 0, (text.len() + 1) as u8]);
            frames.push(0);
            frames.extend_from_slice(text.as_bytes());
        }
        let entries = entries_of(tag(2, 0, &frames));
        assert_eq!(
            texts(&entries),
            vec![
                ("TIT2".to_string(), "Old".to_string()),
                ("TPE1".to_string(), "Timer".to_string()),
            ]
        );
    }

    #[test]
    fn test_apic_image_bytes() {
        let image = [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];
        let mut payload = vec![0];
        payload.extend_from_slice(b"image/jpeg\0");
        payload.push(3);
        payload.extend_from_slice(b"cover\0");
        payload.extend_from_slice(&image);

        let entries = entries_of(tag(3, 0, &frame_v3(b"APIC", &payload)));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, APIC);
        assert_eq!(entries[0].value, TagValue::Binary(Cow::Borrowed(&image[..])));
    }

    #[test]
    fn test_apic_with_unterminated_description_is_corrupt() {
        let mut payload = vec![0];
        payload.extend_from_slice(b"image/png\0");
        payload.push(3);
        payload.extend_from_slice(b"no terminator");

        let err = decode(&tag(3, 0, &frame_v3(b"APIC", &payload))).unwrap_err();
        assert!(matches!(err, ParseError::CorruptFrame { ref id, .. } if id == "APIC"));
    }

    #[test]
    fn test_priv_with_image_and_owner() {
        let mut payload = b"www.example.com\0".to_vec();
        payload.extend_from_slice(b"\x89PNG\r\n\x1a\nDATA");
        let entries = entries_of(tag(3, 0, &frame_v3(b"PRIV", &payload)));
        assert_eq!(
            entries[0].value,
            TagValue::Binary(Cow::Borrowed(&b"\x89PNG\r\n\x1a\nDATA"[..]))
        );
    }

    #[test]
    fn test_priv_without_image_is_ignored() {
        let payload = b"WM/MediaClassPrimaryID\0\x01\x02\x03".to_vec();
        let entries = entries_of(tag(3, 0, &frame_v3(b"PRIV", &payload)));
        assert!(entries.is_empty());
    }

    #[test]
    fn test_unsynchronised_v3_tag() {
        let image = [0xFF, 0xD8, 0xFF, 0xE0];
        let mut payload = vec![0];
        payload.extend_from_slice(b"image/jpeg\0\x03\0");
        payload.extend_from_slice(&image);
        let frames = frame_v3(b"APIC", &payload);

        let mut synced = Vec::new();
        for &b in &frames {
            synced.push(b);
            if b == 0xFF {
                synced.push(0x00);
            }
        }

        let entries = entries_of(tag(3, 0x80, &synced));
        assert_eq!(entries[0].value, TagValue::Binary(Cow::Owned(image.to_vec())));
    }

    #[test]
    fn test_v3_extended_header_is_skipped() {
        let mut frames = 6u32.to_be_bytes().to_vec();
        frames.extend_from_slice(&[0; 6]);
        frames.extend(text_v3(b"TIT2", "Foo"));
        let entries = entries_of(tag(3, 0x40, &frames));
        assert_eq!(texts(&entries), vec![("TIT2".to_string(), "Foo".to_string())]);
    }

    #[test]
    fn test_utf16_text_frame() {
        let mut payload = vec![1, 0xFF, 0xFE];
        for unit in "Bar".encode_utf16() {
            payload.extend_from_slice(&unit.to_le_bytes());
        }
        payload.extend_from_slice(&[0, 0]);
        let entries = entries_of(tag(3, 0, &frame_v3(b"TPE1", &payload)));
        assert_eq!(texts(&entries), vec![("TPE1".to_string(), "Bar".to_string())]);
    }

    #[test]
    fn test_unknown_encoding_marker_skips_frame() {
        let entries = entries_of(tag(3, 0, &frame_v3(b"TIT2", b"\x07Foo")));
        assert!(entries.is_empty());
    }

    #[test]
    fn test_resynchronise() {
        assert_eq!(resynchronise(&[0xFF, 0x00, 0xE0, 0x01]), vec![0xFF, 0xE0, 0x01]);
        assert_eq!(resynchronise(&[0xFF, 0x00, 0x00]), vec![0xFF, 0x00]);
    }
}

//! MP4 (ISO BMFF) atom walker and iTunes `ilst` metadata decoder.
//!
//! The atom hierarchy is parsed breadth-first into a flat arena. Nodes refer
//! to their children by index range and to their bytes by offset range, so
//! nothing borrows from anything but the input buffer.

use std::ops::Range;

use tracing::{debug, trace};

use super::encoding::TextEncoding;
use super::normalize::{self, Dialect};
use super::reader::ByteReader;
use crate::error::{ParseError, Result};
use crate::models::{FourCc, MediaType, RawTagEntry, TagValue};

pub const MOOV: FourCc = FourCc::new(b"moov");
pub const UDTA: FourCc = FourCc::new(b"udta");
pub const META: FourCc = FourCc::new(b"meta");
pub const ILST: FourCc = FourCc::new(b"ilst");
pub const TRAK: FourCc = FourCc::new(b"trak");
pub const MDIA: FourCc = FourCc::new(b"mdia");
pub const MINF: FourCc = FourCc::new(b"minf");
pub const STBL: FourCc = FourCc::new(b"stbl");
pub const STSD: FourCc = FourCc::new(b"stsd");
pub const HDLR: FourCc = FourCc::new(b"hdlr");
pub const DATA: FourCc = FourCc::new(b"data");
pub const ALAC: FourCc = FourCc::new(b"alac");

const GNRE: FourCc = FourCc::new(b"gnre");
const TRKN: FourCc = FourCc::new(b"trkn");
const DISK: FourCc = FourCc::new(b"disk");
const COVR: FourCc = FourCc::new(b"covr");

/// Atoms nested deeper than this are kept as leaves.
pub const MAX_DEPTH: u8 = 12;

/// Containers entered on the way to `ilst`, keyed by their parent.
const METADATA_PATH: &[(FourCc, &[FourCc])] = &[
    (MOOV, &[UDTA, META]),
    (UDTA, &[META]),
    (META, &[ILST]),
];

/// Steps from a `trak` down to its sample descriptions.
const SAMPLE_PATH: &[FourCc] = &[MDIA, MINF, STBL, STSD];

/// `data` atom well-known types.
const TYPE_UTF8: u32 = 1;
const TYPE_UTF16: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomNode {
    pub kind: FourCc,
    /// Offset of the atom header in the input.
    pub offset: usize,
    /// Bytes after the header (8 or 16 bytes).
    pub payload: Range<usize>,
    pub depth: u8,
    /// Indices of the children in [`AtomTree::nodes`].
    pub children: Range<usize>,
    container: bool,
}

impl AtomNode {
    pub fn is_container(&self) -> bool {
        self.container
    }
}

#[derive(Debug, Clone, Default)]
pub struct AtomTree {
    nodes: Vec<AtomNode>,
    roots: Range<usize>,
}

impl AtomTree {
    /// Reads top-level atoms up to and including `moov`, then descends along
    /// `moov/udta/meta/ilst` and `moov/meta/ilst`. Bytes after `moov` are
    /// never looked at, so a prefix holding the whole `moov` is enough.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut nodes = parse_top_level(bytes)?;
        let roots = 0..nodes.len();

        let mut index = 0;
        while index < nodes.len() {
            let node = &nodes[index];
            if !node.container {
                index += 1;
                continue;
            }
            if node.depth + 1 >= MAX_DEPTH {
                debug!(kind = %node.kind, depth = node.depth, "atom nesting limit reached");
                index += 1;
                continue;
            }

            let range = child_range(bytes, node)?;
            let children = parse_level(bytes, range, node.depth + 1, Some(node.kind))?;
            let start = nodes.len();
            nodes.extend(children);
            nodes[index].children = start..nodes.len();
            index += 1;
        }

        Ok(Self { nodes, roots })
    }

    pub fn nodes(&self) -> &[AtomNode] {
        &self.nodes
    }

    pub fn roots(&self) -> impl Iterator<Item = &AtomNode> {
        self.nodes[self.roots.clone()].iter()
    }

    pub fn children<'t>(&'t self, node: &AtomNode) -> impl Iterator<Item = &'t AtomNode> {
        self.nodes[node.children.clone()].iter()
    }

    /// Follows `path` from the top level, taking the first match at each step.
    pub fn find_path(&self, path: &[FourCc]) -> Option<&AtomNode> {
        let (first, rest) = path.split_first()?;
        let mut current = self.roots().find(|node| node.kind == *first)?;
        for kind in rest {
            current = self.children(current).find(|node| node.kind == *kind)?;
        }
        Some(current)
    }
}

fn is_container(kind: FourCc, parent: Option<FourCc>) -> bool {
    match parent {
        None => kind == MOOV,
        Some(ILST) => true,
        Some(parent) => METADATA_PATH
            .iter()
            .any(|(outer, inner)| *outer == parent && inner.contains(&kind)),
    }
}

/// Where the children of a container start: `meta` is a full box with four
/// bytes of version and flags, unless it is the QuickTime form that starts
/// directly with an `hdlr` atom.
fn child_range(bytes: &[u8], node: &AtomNode) -> Result<Range<usize>> {
    if node.kind != META {
        return Ok(node.payload.clone());
    }

    let payload = &bytes[node.payload.clone()];
    if payload.get(4..8) == Some(HDLR.as_bytes()) {
        trace!("QuickTime-style meta atom at offset {}", node.offset);
        return Ok(node.payload.clone());
    }
    if payload.len() < 4 {
        return Err(ParseError::corrupt_atom(
            META,
            node.offset,
            "too short for version and flags",
        ));
    }
    Ok(node.payload.start + 4..node.payload.end)
}

/// Top-level atoms up to and including `moov`.
fn parse_top_level(bytes: &[u8]) -> Result<Vec<AtomNode>> {
    let mut reader = ByteReader::new(bytes);
    let mut nodes = Vec::new();

    while reader.remaining() > 0 {
        let Some(node) = read_atom(&mut reader, 0, None)? else {
            break;
        };
        let found = node.kind == MOOV;
        nodes.push(node);
        if found {
            trace!("moov found, {} bytes left unread", reader.remaining());
            break;
        }
    }

    Ok(nodes)
}

/// Parses the sibling atoms filling `range`.
fn parse_level(
    bytes: &[u8],
    range: Range<usize>,
    depth: u8,
    parent: Option<FourCc>,
) -> Result<Vec<AtomNode>> {
    let mut reader = ByteReader::new(&bytes[..range.end]);
    reader.seek(range.start)?;
    let mut nodes = Vec::new();

    while reader.remaining() > 0 {
        match read_atom(&mut reader, depth, parent)? {
            Some(node) => nodes.push(node),
            None => break,
        }
    }

    Ok(nodes)
}

/// Reads one atom header and moves past the atom. Returns `None` for the
/// short tail some writers leave at the end of a container.
fn read_atom(
    reader: &mut ByteReader<'_>,
    depth: u8,
    parent: Option<FourCc>,
) -> Result<Option<AtomNode>> {
    let top_level = parent.is_none();
    let offset = reader.position();
    let limit = reader.len();

    if reader.remaining() < 8 {
        if top_level {
            return Err(ParseError::TruncatedInput {
                offset,
                needed: 8,
                available: reader.remaining(),
            });
        }
        // Some writers pad containers with a zero terminator
        trace!("{} trailing bytes in container at offset {offset}", reader.remaining());
        return Ok(None);
    }

    let size32 = reader.read_u32()?;
    let raw = reader.slice(4)?;
    let kind = FourCc([raw[0], raw[1], raw[2], raw[3]]);

    let (size, header_len) = match size32 {
        0 => ((limit - offset) as u64, 8),
        1 => match reader.read_u64() {
            Ok(size) => (size, 16),
            Err(err) if top_level => return Err(err),
            Err(_) => {
                return Err(ParseError::corrupt_atom(
                    kind,
                    offset,
                    "64-bit size overruns parent",
                ))
            }
        },
        n => (u64::from(n), 8),
    };

    if size < header_len as u64 {
        return Err(ParseError::corrupt_atom(
            kind,
            offset,
            format!("size {size} is smaller than its {header_len}-byte header"),
        ));
    }

    let available = limit - offset;
    let end = match usize::try_from(size) {
        Ok(size) if size <= available => offset + size,
        _ if top_level => {
            return Err(ParseError::TruncatedInput {
                offset,
                needed: usize::try_from(size).unwrap_or(usize::MAX),
                available,
            })
        }
        _ => {
            return Err(ParseError::corrupt_atom(
                kind,
                offset,
                format!("size {size} overruns parent with {available} bytes left"),
            ))
        }
    };

    trace!(%kind, offset, size, depth, "atom");
    reader.seek(end)?;
    Ok(Some(AtomNode {
        kind,
        offset,
        payload: offset + header_len..end,
        depth,
        children: 0..0,
        container: is_container(kind, parent),
    }))
}

/// Decodes the iTunes metadata list of an MP4 file.
pub fn decode(bytes: &[u8]) -> Result<(MediaType, Vec<RawTagEntry<'_>>)> {
    let tree = AtomTree::parse(bytes)?;
    let media_type = media_type(&tree, bytes);

    let ilst = tree
        .find_path(&[MOOV, UDTA, META, ILST])
        .or_else(|| {
            let found = tree.find_path(&[MOOV, META, ILST]);
            if found.is_some() {
                debug!("metadata found at moov/meta/ilst");
            }
            found
        })
        .ok_or(ParseError::MetadataAtomNotFound)?;

    let mut entries = Vec::new();
    for item in tree.children(ilst) {
        if !normalize::is_mapped(Dialect::Mp4, item.kind) {
            trace!(kind = %item.kind, "skipping ilst item");
            continue;
        }

        let mut found_data = false;
        for data in tree.children(item).filter(|child| child.kind == DATA) {
            found_data = true;
            if let Some(value) = decode_data(bytes, item.kind, data)? {
                entries.push(RawTagEntry::new(item.kind, value, item.offset));
            }
        }
        if !found_data {
            debug!(kind = %item.kind, "ilst item without data atom");
        }
    }

    debug!(%media_type, entries = entries.len(), "MP4 metadata decoded");
    Ok((media_type, entries))
}

/// `alac` when the first sample description says so, AAC otherwise. The
/// sample table only picks the media type, so damage there is logged and
/// ignored.
fn media_type(tree: &AtomTree, bytes: &[u8]) -> MediaType {
    match first_sample_entry(tree, bytes) {
        Ok(Some(codec)) if codec == ALAC => MediaType::Alac,
        Ok(Some(codec)) => {
            trace!(%codec, "sample entry");
            MediaType::Mp4Aac
        }
        Ok(None) => MediaType::Mp4Aac,
        Err(err) => {
            debug!(%err, "unreadable sample table");
            MediaType::Mp4Aac
        }
    }
}

/// Codec of the first entry in `moov/trak/mdia/minf/stbl/stsd`.
fn first_sample_entry(tree: &AtomTree, bytes: &[u8]) -> Result<Option<FourCc>> {
    let Some(mut current) = tree
        .find_path(&[MOOV])
        .and_then(|moov| tree.children(moov).find(|node| node.kind == TRAK))
        .cloned()
    else {
        return Ok(None);
    };

    for kind in SAMPLE_PATH {
        let children = parse_level(
            bytes,
            current.payload.clone(),
            current.depth + 1,
            Some(current.kind),
        )?;
        match children.into_iter().find(|node| node.kind == *kind) {
            Some(node) => current = node,
            None => return Ok(None),
        }
    }

    // version/flags(4) entry_count(4) then the first entry's size(4) and type(4)
    match bytes[current.payload].get(12..16) {
        Some(&[a, b, c, d]) => Ok(Some(FourCc([a, b, c, d]))),
        _ => {
            debug!("stsd atom without sample entries");
            Ok(None)
        }
    }
}

fn decode_data<'a>(
    bytes: &'a [u8],
    key: FourCc,
    data: &AtomNode,
) -> Result<Option<TagValue<'a>>> {
    let mut reader = ByteReader::new(&bytes[data.payload.clone()]);
    if reader.remaining() < 8 {
        return Err(ParseError::corrupt_atom(
            DATA,
            data.offset,
            format!("{} bytes is too short for the type header", reader.remaining()),
        ));
    }
    let data_type = reader.read_u32()? & 0x00FF_FFFF;
    reader.skip(4)?;
    let value = reader.rest();

    let decoded = match key {
        COVR => (!value.is_empty()).then(|| TagValue::Binary(value.into())),
        GNRE => match value {
            [hi, lo, ..] => Some(TagValue::Integer(u32::from(u16::from_be_bytes([*hi, *lo])))),
            _ => None,
        },
        TRKN | DISK => match value {
            [_, _, c0, c1, rest @ ..] => {
                let total = match rest {
                    [t0, t1, ..] => u16::from_be_bytes([*t0, *t1]),
                    _ => 0,
                };
                Some(TagValue::Pair(u16::from_be_bytes([*c0, *c1]), total))
            }
            _ => None,
        },
        _ => {
            let encoding = match data_type {
                TYPE_UTF16 => TextEncoding::Utf16Be,
                TYPE_UTF8 => TextEncoding::Utf8,
                other => {
                    trace!(%key, data_type = other, "non-text data type read as UTF-8");
                    TextEncoding::Utf8
                }
            };
            let text = encoding.decode(value);
            (!text.is_empty()).then_some(TagValue::Text(text))
        }
    };

    if decoded.is_none() {
        debug!(%key, len = value.len(), "data atom payload not usable");
    }
    Ok(decoded)
}

//! Container detection from a small fixed prefix of the file.

use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

use crate::models::FourCc;

/// Bytes inspected by [`sniff`]. Nothing past this prefix is ever read.
pub const SNIFF_PREFIX_LEN: usize = 64;

const FTYP: FourCc = FourCc::new(b"ftyp");

const MP4_BRANDS: &[FourCc] = &[
    FourCc::new(b"M4A "),
    FourCc::new(b"M4B "),
    FourCc::new(b"M4P "),
    FourCc::new(b"mp41"),
    FourCc::new(b"mp42"),
    FourCc::new(b"isom"),
    FourCc::new(b"iso2"),
    FourCc::new(b"dash"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Id3Tagged,
    Mp4Container,
    Unrecognized,
}

pub fn sniff(bytes: &[u8]) -> ContainerKind {
    let prefix = &bytes[..bytes.len().min(SNIFF_PREFIX_LEN)];

    if prefix.starts_with(b"ID3") {
        return ContainerKind::Id3Tagged;
    }

    if has_mp4_brand(prefix) {
        return ContainerKind::Mp4Container;
    }

    ContainerKind::Unrecognized
}

/// Walks top-level box headers inside the prefix looking for `ftyp`.
fn has_mp4_brand(prefix: &[u8]) -> bool {
    let mut offset = 0usize;

    while offset + 8 <= prefix.len() {
        let size = BigEndian::read_u32(&prefix[offset..offset + 4]) as usize;
        let kind = FourCc([
            prefix[offset + 4],
            prefix[offset + 5],
            prefix[offset + 6],
            prefix[offset + 7],
        ]);

        if kind == FTYP {
            // major brand, minor version, then compatible brands
            let end = if size < 8 {
                prefix.len()
            } else {
                offset.saturating_add(size).min(prefix.len())
            };
            let body = &prefix[offset + 8..end];
            let major = body.get(..4);
            let compatible = body.get(8..).unwrap_or_default();

            let found = major
                .into_iter()
                .chain(compatible.chunks_exact(4))
                .any(|brand| MP4_BRANDS.iter().any(|known| known.as_bytes() == brand));
            trace!(found, "ftyp box at offset {offset}");
            return found;
        }

        // size 0 ("to end") or 1 (64-bit) cannot be followed within the prefix
        if size < 8 {
            return false;
        }
        offset = offset.saturating_add(size);
    }

    false
}

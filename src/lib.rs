//! Reads embedded tag metadata from MP3 (ID3v2) and MP4 (iTunes `ilst`)
//! audio files without decoding any audio.
//!
//! ```no_run
//! let bytes = std::fs::read("song.m4a").unwrap();
//! let record = mediatag::extract(&bytes).unwrap();
//! println!("{}", record.summary());
//! ```

pub mod error;
pub mod models;
pub mod tags;

use tracing::debug;

pub use error::{ParseError, Result};
pub use models::{FourCc, ImageFormat, MediaType, MetadataRecord, RawTagEntry, TagValue};
pub use tags::{sniff, ContainerKind, Dialect};

/// Raw entries of the tag block found in a buffer, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTag<'a> {
    pub media_type: MediaType,
    pub dialect: Dialect,
    pub entries: Vec<RawTagEntry<'a>>,
}

impl DecodedTag<'_> {
    pub fn normalize(&self) -> MetadataRecord {
        tags::normalize::normalize(self.dialect, self.media_type, &self.entries)
    }
}

/// Detects the tag dialect and decodes its entries in byte order.
///
/// Returns [`ParseError::Unrecognized`] when the buffer starts with neither an
/// ID3v2 tag nor an MP4 `ftyp` box.
pub fn read_entries(bytes: &[u8]) -> Result<DecodedTag<'_>> {
    match sniff(bytes) {
        ContainerKind::Id3Tagged => Ok(DecodedTag {
            media_type: MediaType::Mp3,
            dialect: Dialect::Id3v2,
            entries: tags::id3v2::decode(bytes)?,
        }),
        ContainerKind::Mp4Container => {
            let (media_type, entries) = tags::mp4::decode(bytes)?;
            Ok(DecodedTag {
                media_type,
                dialect: Dialect::Mp4,
                entries,
            })
        }
        ContainerKind::Unrecognized => Err(ParseError::Unrecognized),
    }
}

/// Extracts a normalized [`MetadataRecord`] from the raw bytes of an audio file.
///
/// Input in no supported dialect yields [`MetadataRecord::unknown`]. Any
/// structural problem in a recognized tag block fails the whole call; no
/// partial record is returned.
pub fn extract(bytes: &[u8]) -> Result<MetadataRecord> {
    match read_entries(bytes) {
        Ok(tag) => Ok(tag.normalize()),
        Err(ParseError::Unrecognized) => {
            debug!(len = bytes.len(), "no tag dialect recognized");
            Ok(MetadataRecord::unknown())
        }
        Err(err) => Err(err),
    }
}

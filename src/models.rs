use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Four-byte tag key: an ID3 frame id or an MP4 atom type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(bytes: &[u8; 4]) -> Self {
        Self(*bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for FourCc {
    /// Bytes are shown as Latin-1 so `0xA9` renders as `©`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = match b {
                0x20..=0x7E | 0xA0..=0xFF => b as char,
                _ => '?',
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaType {
    Mp3,
    Mp4Aac,
    Alac,
    #[default]
    Unknown,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Mp4Aac => "mp4Aac",
            Self::Alac => "alac",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image container recognized from its magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
}

impl ImageFormat {
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if data.starts_with(b"BM") && data.len() > 14 {
            Some(Self::Bmp)
        } else {
            None
        }
    }

    /// Only JPEG and PNG count as artwork hidden in private frames.
    pub fn is_private_frame_candidate(data: &[u8]) -> bool {
        matches!(Self::sniff(data), Some(Self::Jpeg | Self::Png))
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
        }
    }
}

/// Typed payload of a decoded frame or atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue<'a> {
    Text(String),
    Integer(u32),
    Binary(Cow<'a, [u8]>),
    /// (current, total) as stored in `trkn`/`disk`.
    Pair(u16, u16),
}

impl TagValue<'_> {
    pub fn into_owned(self) -> TagValue<'static> {
        match self {
            Self::Text(text) => TagValue::Text(text),
            Self::Integer(n) => TagValue::Integer(n),
            Self::Binary(bytes) => TagValue::Binary(Cow::Owned(bytes.into_owned())),
            Self::Pair(current, total) => TagValue::Pair(current, total),
        }
    }
}

/// One decoded key/value pair, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTagEntry<'a> {
    pub key: FourCc,
    pub value: TagValue<'a>,
    /// Byte offset of the frame or atom inside the input.
    pub position: usize,
}

impl<'a> RawTagEntry<'a> {
    pub fn new(key: FourCc, value: TagValue<'a>, position: usize) -> Self {
        Self {
            key,
            value,
            position,
        }
    }

    /// Detaches the entry from the input buffer.
    pub fn into_owned(self) -> RawTagEntry<'static> {
        RawTagEntry {
            key: self.key,
            value: self.value.into_owned(),
            position: self.position,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub title: Option<String>,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    #[serde(skip)]
    pub artwork: Option<Vec<u8>>,
    pub media_type: MediaType,
}

impl MetadataRecord {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            ..Default::default()
        }
    }

    /// Record for input whose dialect was not recognized. Every field is empty.
    pub fn unknown() -> Self {
        Self::new(MediaType::Unknown)
    }

    pub fn is_recognized(&self) -> bool {
        self.media_type != MediaType::Unknown
    }

    pub fn artwork_format(&self) -> Option<ImageFormat> {
        self.artwork.as_deref().and_then(ImageFormat::sniff)
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("알 수 없음")
    }

    pub fn display_artist(&self) -> &str {
        self.artist.as_deref().unwrap_or("알 수 없음")
    }

    pub fn display_album(&self) -> &str {
        self.album.as_deref().unwrap_or("알 수 없음")
    }

    pub fn summary(&self) -> String {
        format!(
            "{} - {} [{}]",
            self.display_artist(),
            self.display_title(),
            self.display_album()
        )
    }
}

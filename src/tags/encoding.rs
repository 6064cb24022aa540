//! Text encodings used by ID3v2 frames and MP4 `data` atoms.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Latin1,
    /// UTF-16 with a byte order mark; big-endian when the mark is missing.
    Utf16,
    Utf16Be,
    Utf8,
}

impl TextEncoding {
    /// Maps the leading encoding byte of an ID3v2 text payload.
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            0 => Some(Self::Latin1),
            1 => Some(Self::Utf16),
            2 => Some(Self::Utf16Be),
            3 => Some(Self::Utf8),
            _ => None,
        }
    }

    /// Width in bytes of one code unit, and of the null terminator.
    pub fn unit_width(&self) -> usize {
        match self {
            Self::Utf16 | Self::Utf16Be => 2,
            Self::Latin1 | Self::Utf8 => 1,
        }
    }

    /// Index of the first null terminator, aligned to the code unit width.
    pub fn find_terminator(&self, bytes: &[u8]) -> Option<usize> {
        match self.unit_width() {
            1 => bytes.iter().position(|&b| b == 0),
            _ => bytes
                .chunks_exact(2)
                .position(|unit| unit == [0, 0])
                .map(|i| i * 2),
        }
    }

    /// The bytes of the first value: everything before the first terminator.
    ///
    /// A single trailing terminator is dropped this way, and multi-value
    /// strings (ID3v2.4 separates values with nulls) keep only their first value.
    pub fn first_value<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        match self.find_terminator(bytes) {
            Some(end) => &bytes[..end],
            None => bytes,
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Utf16Be => decode_utf16(bytes, false),
            Self::Utf16 => match bytes {
                [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, true),
                [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, false),
                _ => decode_utf16(bytes, false),
            },
        }
    }
}

fn decode_utf16(bytes: &[u8], little_endian: bool) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

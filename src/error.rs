use thiserror::Error;

use crate::models::FourCc;

pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors produced while locating or decoding a tag block.
///
/// `Unrecognized` means "nothing to extract" rather than a broken file; every
/// other variant describes a recognized dialect whose structure is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no supported tag dialect found")]
    Unrecognized,

    #[error("unsupported ID3v2 major version {major}")]
    UnsupportedVersion { major: u8 },

    #[error("truncated input at offset {offset}: needed {needed} bytes, {available} available")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("offset {offset} is outside the {len}-byte buffer")]
    InvalidOffset { offset: usize, len: usize },

    #[error("frame {id} declares {declared} bytes but only {available} remain in the tag")]
    CorruptFrame {
        id: String,
        declared: usize,
        available: usize,
    },

    #[error("atom '{kind}' at offset {offset} is corrupt: {reason}")]
    CorruptAtom {
        kind: FourCc,
        offset: usize,
        reason: String,
    },

    #[error("moov/udta/meta/ilst metadata atom not found")]
    MetadataAtomNotFound,
}

impl ParseError {
    pub(crate) fn corrupt_atom<S: Into<String>>(kind: FourCc, offset: usize, reason: S) -> Self {
        Self::CorruptAtom {
            kind,
            offset,
            reason: reason.into(),
        }
    }

    /// True when the bytes are present but inconsistent: bad sizes, an
    /// unsupported version or no metadata atom. Truncation is not corruption;
    /// see [`ParseError::needs_more_data`].
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion { .. }
                | Self::InvalidOffset { .. }
                | Self::CorruptFrame { .. }
                | Self::CorruptAtom { .. }
                | Self::MetadataAtomNotFound
        )
    }

    /// Callers feeding only a prefix of a file should read more bytes and retry.
    pub fn needs_more_data(&self) -> bool {
        matches!(self, Self::TruncatedInput { .. })
    }
}

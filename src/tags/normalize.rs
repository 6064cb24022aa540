//! Maps decoded tag entries onto a [`MetadataRecord`].
//!
//! Each dialect has a table from key to [`Action`]. Entries are applied in
//! byte order so a later frame or atom overwrites an earlier one.

use tracing::debug;

use crate::models::{FourCc, MediaType, MetadataRecord, RawTagEntry, TagValue};

/// Tag dialect an entry list was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Id3v2,
    Mp4,
}

/// Record field an entry is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Title,
    Album,
    Artist,
    Genre,
    Year,
    TrackNumber,
    DiscNumber,
    Artwork,
    /// Artwork found in a private frame; used only without a real picture.
    FallbackArtwork,
}

const ID3V2_ACTIONS: &[(FourCc, Action)] = &[
    (FourCc::new(b"TIT2"), Action::Title),
    (FourCc::new(b"TALB"), Action::Album),
    (FourCc::new(b"TPE1"), Action::Artist),
    (FourCc::new(b"TCON"), Action::Genre),
    (FourCc::new(b"TYER"), Action::Year),
    (FourCc::new(b"TDRC"), Action::Year),
    (FourCc::new(b"TDOR"), Action::Year),
    (FourCc::new(b"TRCK"), Action::TrackNumber),
    (FourCc::new(b"TPOS"), Action::DiscNumber),
    (FourCc::new(b"APIC"), Action::Artwork),
    (FourCc::new(b"PRIV"), Action::FallbackArtwork),
];

const MP4_ACTIONS: &[(FourCc, Action)] = &[
    (FourCc::new(b"\xA9nam"), Action::Title),
    (FourCc::new(b"\xA9alb"), Action::Album),
    (FourCc::new(b"\xA9ART"), Action::Artist),
    (FourCc::new(b"\xA9gen"), Action::Genre),
    (FourCc::new(b"gnre"), Action::Genre),
    (FourCc::new(b"\xA9day"), Action::Year),
    (FourCc::new(b"trkn"), Action::TrackNumber),
    (FourCc::new(b"disk"), Action::DiscNumber),
    (FourCc::new(b"covr"), Action::Artwork),
];

impl Dialect {
    fn actions(&self) -> &'static [(FourCc, Action)] {
        match self {
            Self::Id3v2 => ID3V2_ACTIONS,
            Self::Mp4 => MP4_ACTIONS,
        }
    }

    pub fn action(&self, key: FourCc) -> Option<Action> {
        self.actions()
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, action)| *action)
    }
}

/// Whether entries with this key contribute to the record.
pub fn is_mapped(dialect: Dialect, key: FourCc) -> bool {
    dialect.action(key).is_some()
}

pub fn normalize(
    dialect: Dialect,
    media_type: MediaType,
    entries: &[RawTagEntry<'_>],
) -> MetadataRecord {
    let mut record = MetadataRecord::new(media_type);
    let mut fallback_artwork: Option<Vec<u8>> = None;

    let mut ordered: Vec<&RawTagEntry<'_>> = entries.iter().collect();
    ordered.sort_by_key(|entry| entry.position);

    for entry in ordered {
        let Some(action) = dialect.action(entry.key) else {
            continue;
        };

        match action {
            Action::Title => set_text(&mut record.title, entry),
            Action::Album => set_text(&mut record.album, entry),
            Action::Artist => set_text(&mut record.artist, entry),
            Action::Genre => {
                if let Some(genre) = genre(&entry.value) {
                    record.genre = Some(genre);
                }
            }
            Action::Year => match year(dialect, &entry.value) {
                Some(year) => record.year = Some(year),
                None => debug!(key = %entry.key, value = ?entry.value, "unparseable year"),
            },
            Action::TrackNumber => set_number(&mut record.track_number, entry),
            Action::DiscNumber => set_number(&mut record.disc_number, entry),
            Action::Artwork => {
                if let TagValue::Binary(bytes) = &entry.value {
                    record.artwork = Some(bytes.to_vec());
                }
            }
            Action::FallbackArtwork => {
                if let TagValue::Binary(bytes) = &entry.value {
                    fallback_artwork = Some(bytes.to_vec());
                }
            }
        }
    }

    if record.artwork.is_none() {
        record.artwork = fallback_artwork;
    }

    record
}

fn set_text(field: &mut Option<String>, entry: &RawTagEntry<'_>) {
    match &entry.value {
        TagValue::Text(text) if !text.is_empty() => *field = Some(text.clone()),
        other => debug!(key = %entry.key, value = ?other, "expected text"),
    }
}

fn set_number(field: &mut Option<u32>, entry: &RawTagEntry<'_>) {
    match number(&entry.value) {
        Some(n) => *field = Some(n),
        None => debug!(key = %entry.key, value = ?entry.value, "unparseable number"),
    }
}

/// Leading number of `"3"`, `"3/12"` or an MP4 `(current, total)` pair.
/// A stored zero means "not set" in either dialect.
fn number(value: &TagValue<'_>) -> Option<u32> {
    let n = match value {
        TagValue::Text(text) => text.split('/').next()?.trim().parse().ok()?,
        TagValue::Integer(n) => *n,
        TagValue::Pair(current, _) => u32::from(*current),
        TagValue::Binary(_) => return None,
    };
    (n > 0).then_some(n)
}

fn year(dialect: Dialect, value: &TagValue<'_>) -> Option<i32> {
    let text = match value {
        TagValue::Text(text) => text.trim(),
        TagValue::Integer(n) => return i32::try_from(*n).ok(),
        _ => return None,
    };

    if let Some(year) = leading_year(text) {
        return Some(year);
    }
    match dialect {
        Dialect::Mp4 => text.parse().ok(),
        Dialect::Id3v2 => None,
    }
}

/// First four characters when all are ASCII digits: `"2019-10-18"` is 2019.
fn leading_year(text: &str) -> Option<i32> {
    let digits = text.get(..4)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Genre text with ID3v1 references reduced to their number or refinement.
fn genre(value: &TagValue<'_>) -> Option<String> {
    let text = match value {
        TagValue::Integer(code) => return Some(code.to_string()),
        TagValue::Text(text) => text.trim(),
        _ => return None,
    };

    if let Some(inner) = text.strip_prefix('(') {
        if let Some((code, refinement)) = inner.split_once(')') {
            if !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()) {
                let refinement = refinement.trim();
                return Some(if refinement.is_empty() {
                    code.to_string()
                } else {
                    refinement.to_string()
                });
            }
        }
    }

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    fn text(key: &[u8; 4], value: &str, position: usize) -> RawTagEntry<'static> {
        RawTagEntry::new(FourCc::new(key), TagValue::Text(value.to_string()), position)
    }

    fn binary(key: &[u8; 4], value: &'static [u8], position: usize) -> RawTagEntry<'static> {
        RawTagEntry::new(FourCc::new(key), TagValue::Binary(Cow::Borrowed(value)), position)
    }

    #[test]
    fn test_id3_basic_fields() {
        let entries = vec![
            text(b"TIT2", "Foo", 10),
            text(b"TPE1", "Bar", 24),
            text(b"TRCK", "3/12", 38),
            text(b"TPOS", "1", 52),
        ];
        let record = normalize(Dialect::Id3v2, MediaType::Mp3, &entries);

        assert_eq!(record.title.as_deref(), Some("Foo"));
        assert_eq!(record.artist.as_deref(), Some("Bar"));
        assert_eq!(record.track_number, Some(3));
        assert_eq!(record.disc_number, Some(1));
        assert_eq!(record.album, None);
        assert_eq!(record.media_type, MediaType::Mp3);
    }

    #[test]
    fn test_last_entry_wins() {
        let entries = vec![text(b"TALB", "A", 10), text(b"TALB", "B", 30)];
        let record = normalize(Dialect::Id3v2, MediaType::Mp3, &entries);
        assert_eq!(record.album.as_deref(), Some("B"));
    }

    #[test]
    fn test_entries_are_applied_by_position() {
        let entries = vec![text(b"TALB", "B", 30), text(b"TALB", "A", 10)];
        let record = normalize(Dialect::Id3v2, MediaType::Mp3, &entries);
        assert_eq!(record.album.as_deref(), Some("B"));
    }

    #[test]
    fn test_id3_years() {
        for (value, expected) in [
            ("2019", Some(2019)),
            ("2019-10-18", Some(2019)),
            ("2019-10-18T12:00", Some(2019)),
            ("19", None),
            ("abcd", None),
        ] {
            let record = normalize(Dialect::Id3v2, MediaType::Mp3, &[text(b"TDRC", value, 10)]);
            assert_eq!(record.year, expected, "{value}");
        }
    }

    #[test]
    fn test_mp4_year_falls_back_to_whole_value() {
        for (value, expected) in [
            ("2005-01-01T08:00:00Z", Some(2005)),
            ("987", Some(987)),
            ("soon", None),
        ] {
            let entries = [text(b"\xA9day", value, 10)];
            let record = normalize(Dialect::Mp4, MediaType::Mp4Aac, &entries);
            assert_eq!(record.year, expected, "{value}");
        }
    }

    #[test]
    fn test_genres() {
        for (value, expected) in [
            ("(17)", Some("17")),
            ("(17)Rock", Some("Rock")),
            ("Rock", Some("Rock")),
            ("17", Some("17")),
            ("(abc)", Some("(abc)")),
            ("", None),
        ] {
            let record = normalize(Dialect::Id3v2, MediaType::Mp3, &[text(b"TCON", value, 10)]);
            assert_eq!(record.genre.as_deref(), expected, "{value}");
        }
    }

    #[test]
    fn test_mp4_numeric_genre_and_pairs() {
        let entries = vec![
            RawTagEntry::new(FourCc::new(b"gnre"), TagValue::Integer(17), 100),
            RawTagEntry::new(FourCc::new(b"trkn"), TagValue::Pair(5, 10), 140),
            RawTagEntry::new(FourCc::new(b"disk"), TagValue::Pair(0, 2), 180),
        ];
        let record = normalize(Dialect::Mp4, MediaType::Alac, &entries);

        assert_eq!(record.genre.as_deref(), Some("17"));
        assert_eq!(record.track_number, Some(5));
        assert_eq!(record.disc_number, None);
        assert_eq!(record.media_type, MediaType::Alac);
    }

    #[test]
    fn test_bad_track_number_is_absent() {
        let record = normalize(Dialect::Id3v2, MediaType::Mp3, &[text(b"TRCK", "three", 10)]);
        assert_eq!(record.track_number, None);

        let record = normalize(Dialect::Id3v2, MediaType::Mp3, &[text(b"TRCK", " 7 / 9", 10)]);
        assert_eq!(record.track_number, Some(7));
    }

    #[test]
    fn test_zero_track_or_disc_is_unset() {
        let entries = vec![text(b"TRCK", "0", 10), text(b"TPOS", "0/2", 30)];
        let record = normalize(Dialect::Id3v2, MediaType::Mp3, &entries);
        assert_eq!(record.track_number, None);
        assert_eq!(record.disc_number, None);

        let entries = vec![RawTagEntry::new(FourCc::new(b"trkn"), TagValue::Pair(0, 10), 140)];
        let record = normalize(Dialect::Mp4, MediaType::Mp4Aac, &entries);
        assert_eq!(record.track_number, None);
    }

    #[test]
    fn test_private_artwork_never_overrides_picture() {
        let entries = vec![
            binary(b"APIC", b"\xFF\xD8\xFFapic", 10),
            binary(b"PRIV", b"\x89PNG\r\n\x1a\npriv", 50),
        ];
        let record = normalize(Dialect::Id3v2, MediaType::Mp3, &entries);
        assert_eq!(record.artwork.as_deref(), Some(&b"\xFF\xD8\xFFapic"[..]));

        let record = normalize(Dialect::Id3v2, MediaType::Mp3, &entries[1..]);
        assert_eq!(record.artwork.as_deref(), Some(&b"\x89PNG\r\n\x1a\npriv"[..]));
    }

    #[test]
    fn test_keys_are_dialect_specific() {
        assert!(is_mapped(Dialect::Id3v2, FourCc::new(b"TIT2")));
        assert!(!is_mapped(Dialect::Mp4, FourCc::new(b"TIT2")));
        assert!(is_mapped(Dialect::Mp4, FourCc::new(b"covr")));
        assert!(!is_mapped(Dialect::Id3v2, FourCc::new(b"TXXX")));
    }
}

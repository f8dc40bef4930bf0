//! Container entries and the immutable index built when a container is opened.

use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Elementary stream kind of a demuxed stream-container entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    /// Extension used for an extracted stream of this kind.
    ///
    /// Stream names reflect the pre-conversion source asset, so the
    /// extracted payload is always renamed to one of these.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Audio => "adx",
            Self::Video => "m2v",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// One addressable unit inside a container.
///
/// Entries are created once by a reader while it builds its
/// [`ContainerIndex`] and never change afterwards.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct EmbeddedEntry {
    /// Display/file name
    pub name: String,
    /// Internal directory, empty for flat containers
    pub path: String,
    /// Bytes occupied in the container (compressed size when compressed)
    pub embedded_size: u64,
    /// Decoded size of the content
    pub extracted_size: u64,
    /// Absolute offset of the payload
    pub offset: u64,
    /// Offset of the stream header region (stream containers only)
    pub extra_offset: u64,
    /// Elementary stream kind (stream containers only)
    pub kind: Option<StreamKind>,
    /// Average bits per second (stream containers only)
    pub avg_bitrate: Option<u64>,
}

impl EmbeddedEntry {
    /// Create a pack/flat entry.
    pub fn file(
        name: impl Into<String>,
        path: impl Into<String>,
        embedded_size: u64,
        extracted_size: u64,
        offset: u64,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            embedded_size,
            extracted_size,
            offset,
            extra_offset: 0,
            kind: None,
            avg_bitrate: None,
        }
    }

    /// Path and name joined with `/`.
    pub fn display_path(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    /// Whether the stored bytes differ in size from the decoded content.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.embedded_size != self.extracted_size
    }

    /// `embedded / extracted`, or `None` when either size is zero.
    pub fn compression_ratio(&self) -> Option<f64> {
        if self.embedded_size == 0 || self.extracted_size == 0 {
            return None;
        }
        Some(self.embedded_size as f64 / self.extracted_size as f64)
    }

    /// Estimated playback duration: `extracted_size / (avg_bitrate / 8)`.
    pub fn duration(&self) -> Option<Duration> {
        let bitrate = self.avg_bitrate.filter(|&b| b > 0)?;
        Some(Duration::from_secs_f64(
            self.extracted_size as f64 / (bitrate as f64 / 8.0),
        ))
    }
}

/// The parsed directory of one opened container.
///
/// A reader either produces a fully valid index or fails to open; there is
/// no partially built index.
#[derive(Debug, Clone)]
pub struct ContainerIndex {
    origin_path: PathBuf,
    is_pack: bool,
    entries: Vec<EmbeddedEntry>,
}

impl ContainerIndex {
    /// Create an index from parsed entries, kept in declared order.
    pub fn new(origin_path: impl Into<PathBuf>, is_pack: bool, entries: Vec<EmbeddedEntry>) -> Self {
        Self {
            origin_path: origin_path.into(),
            is_pack,
            entries,
        }
    }

    /// The file the container was opened from.
    #[inline]
    pub fn origin_path(&self) -> &Path {
        &self.origin_path
    }

    /// File name of the container, used as the bulk output directory.
    pub fn origin_name(&self) -> &str {
        self.origin_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
    }

    /// `true` for multi-file packs, `false` for demuxed streams.
    #[inline]
    pub fn is_pack(&self) -> bool {
        self.is_pack
    }

    #[inline]
    pub fn entries(&self) -> &[EmbeddedEntry] {
        &self.entries
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&EmbeddedEntry> {
        self.entries.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total `(embedded, extracted)` bytes, or `None` if either sum
    /// overflows.
    pub fn checked_totals(&self) -> Option<(u64, u64)> {
        self.entries.iter().try_fold((0u64, 0u64), |(embedded, extracted), e| {
            Some((
                embedded.checked_add(e.embedded_size)?,
                extracted.checked_add(e.extracted_size)?,
            ))
        })
    }

    /// Total `(embedded, extracted)` bytes across all entries.
    ///
    /// Readers refuse indexes whose totals overflow, so this saturates
    /// only for hand-built indexes.
    pub fn totals(&self) -> (u64, u64) {
        self.checked_totals().unwrap_or((u64::MAX, u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_path() {
        let flat = EmbeddedEntry::file("a.bin", "", 1, 1, 0);
        assert_eq!(flat.display_path(), "a.bin");

        let nested = EmbeddedEntry::file("a.bin", "data/sub", 1, 1, 0);
        assert_eq!(nested.display_path(), "data/sub/a.bin");
    }

    #[test]
    fn test_compression_ratio() {
        let entry = EmbeddedEntry::file("a", "", 50, 200, 0);
        assert_eq!(entry.compression_ratio(), Some(0.25));
        assert!(entry.is_compressed());

        let empty = EmbeddedEntry::file("a", "", 0, 0, 0);
        assert_eq!(empty.compression_ratio(), None);
    }

    #[test]
    fn test_duration_from_bitrate() {
        let mut entry = EmbeddedEntry::file("movie.m2v", "", 1000, 1000, 0);
        assert_eq!(entry.duration(), None);

        entry.kind = Some(StreamKind::Video);
        entry.avg_bitrate = Some(8000);
        assert_eq!(entry.duration(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_index_totals() {
        let index = ContainerIndex::new(
            "/tmp/data.cpk",
            true,
            vec![
                EmbeddedEntry::file("a", "", 10, 20, 0),
                EmbeddedEntry::file("b", "x", 5, 5, 10),
            ],
        );

        assert_eq!(index.totals(), (15, 25));
        assert_eq!(index.origin_name(), "data.cpk");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_overflowing_totals() {
        let huge = 1u64 << 63;
        let index = ContainerIndex::new(
            "/tmp/huge.cpk",
            true,
            vec![
                EmbeddedEntry::file("a", "", 1, huge, 0),
                EmbeddedEntry::file("b", "", 1, huge, 1),
            ],
        );

        assert_eq!(index.checked_totals(), None);
        assert_eq!(index.totals(), (u64::MAX, u64::MAX));
    }
}

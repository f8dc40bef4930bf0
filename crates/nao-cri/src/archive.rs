//! Memory-mapped CRIWare container.

use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::Path;

use memmap2::Mmap;
use nao_common::{ChunkedCopy, ContainerIndex, EmbeddedEntry};
use tracing::{debug, info};

use crate::cpk::{self, CPK_MAGIC};
use crate::crilayla;
use crate::usm::{self, CRID_MAGIC};
use crate::{Error, Result};

/// How entry bytes are laid out in the file.
#[derive(Debug)]
enum Layout {
    /// One contiguous, possibly compressed payload per entry.
    Pack,
    /// Interleaved chunk payloads per stream.
    Stream(Vec<Vec<Range<usize>>>),
}

/// An opened CPK pack or USM stream file.
///
/// The directory is parsed once in [`CriArchive::open`]; the file stays
/// mapped until the archive is dropped.
pub struct CriArchive {
    mmap: Mmap,
    index: ContainerIndex,
    layout: Layout,
}

impl CriArchive {
    /// Open a CPK or USM file, dispatching on its signature.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let magic: [u8; 4] = mmap
            .get(..4)
            .and_then(|m| m.try_into().ok())
            .ok_or_else(|| Error::Corrupt(format!("file of {} bytes has no signature", mmap.len())))?;

        let (is_pack, entries, layout) = match &magic {
            CPK_MAGIC => (true, cpk::parse(&mmap)?, Layout::Pack),
            CRID_MAGIC => {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("stream");
                let demuxed = usm::parse(&mmap, stem)?;
                (false, demuxed.entries, Layout::Stream(demuxed.spans))
            }
            _ => return Err(Error::UnknownSignature(magic)),
        };

        let index = ContainerIndex::new(path, is_pack, entries);
        if index.checked_totals().is_none() {
            return Err(Error::Corrupt("entry sizes overflow a 64-bit total".into()));
        }

        info!(
            path = %path.display(),
            entries = index.len(),
            pack = is_pack,
            "opened CRIWare container"
        );

        Ok(Self {
            mmap,
            index,
            layout,
        })
    }

    #[inline]
    pub fn index(&self) -> &ContainerIndex {
        &self.index
    }

    /// `true` for CPK packs, `false` for USM streams.
    #[inline]
    pub fn is_pack(&self) -> bool {
        self.index.is_pack()
    }

    #[inline]
    pub fn entries(&self) -> &[EmbeddedEntry] {
        self.index.entries()
    }

    #[inline]
    pub fn origin_path(&self) -> &Path {
        self.index.origin_path()
    }

    fn entry(&self, index: usize) -> Result<&EmbeddedEntry> {
        self.index.get(index).ok_or(Error::EntryOutOfRange(index))
    }

    /// Stored bytes of a pack entry.
    fn stored(&self, entry: &EmbeddedEntry) -> Result<&[u8]> {
        let start = entry.offset as usize;
        let end = start.saturating_add(entry.embedded_size as usize);
        self.mmap.get(start..end).ok_or_else(|| {
            Error::Corrupt(format!("entry '{}' lies outside the file", entry.display_path()))
        })
    }

    /// Decompress a stored payload when it carries the CRILAYLA marker.
    ///
    /// The declared size is checked against the entry before any output
    /// buffer is allocated.
    fn decode(&self, entry: &EmbeddedEntry, stored: &[u8]) -> Result<Option<Vec<u8>>> {
        if !crilayla::is_compressed(stored) {
            return Ok(None);
        }
        let declared = crilayla::decompressed_size(stored).map_err(|e| {
            Error::Decompression(format!("entry '{}': {e}", entry.display_path()))
        })?;
        Self::check_length(entry, declared)?;

        debug!(entry = %entry.display_path(), "decompressing CRILAYLA entry");
        crilayla::decompress(stored).map(Some)
    }

    fn check_length(entry: &EmbeddedEntry, length: usize) -> Result<()> {
        if length as u64 != entry.extracted_size {
            return Err(Error::Decompression(format!(
                "entry '{}' decoded to {length} bytes, expected {}",
                entry.display_path(),
                entry.extracted_size
            )));
        }
        Ok(())
    }

    /// Read one entry fully into memory, decompressing when needed.
    ///
    /// The buffer always has exactly `extracted_size` bytes.
    pub fn extract_at(&self, index: usize) -> Result<Vec<u8>> {
        let entry = self.entry(index)?;

        let data = match &self.layout {
            Layout::Pack => {
                let stored = self.stored(entry)?;
                match self.decode(entry, stored)? {
                    Some(decoded) => decoded,
                    None => stored.to_vec(),
                }
            }
            Layout::Stream(spans) => spans
                .get(index)
                .ok_or(Error::EntryOutOfRange(index))?
                .iter()
                .flat_map(|span| self.mmap[span.clone()].iter().copied())
                .collect(),
        };

        Self::check_length(entry, data.len())?;
        Ok(data)
    }

    /// Stream one entry to `sink` through `copy`, returning bytes written.
    ///
    /// Compressed entries are decoded in memory first, then written in
    /// chunks like any other entry.
    pub fn extract_to<W: Write + ?Sized>(
        &self,
        index: usize,
        sink: &mut W,
        copy: &ChunkedCopy<'_>,
    ) -> Result<u64> {
        let entry = self.entry(index)?;

        match &self.layout {
            Layout::Pack => {
                let stored = self.stored(entry)?;
                match self.decode(entry, stored)? {
                    Some(decoded) => {
                        Self::check_length(entry, decoded.len())?;
                        Ok(copy.copy(&decoded, sink)?)
                    }
                    None => {
                        Self::check_length(entry, stored.len())?;
                        Ok(copy.copy(stored, sink)?)
                    }
                }
            }
            Layout::Stream(spans) => {
                let spans = spans.get(index).ok_or(Error::EntryOutOfRange(index))?;
                Ok(copy.copy_spans(&self.mmap, spans, sink)?)
            }
        }
    }
}

impl std::fmt::Debug for CriArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriArchive")
            .field("origin", &self.index.origin_path())
            .field("entries", &self.index.len())
            .field("pack", &self.index.is_pack())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{CpkBuilder, UsmBuilder, UsmStream};
    use nao_common::{CancelToken, NoProgress};
    use std::cell::RefCell;

    fn write_temp(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 16) as u8 * 3).collect()
    }

    #[test]
    fn test_pack_extract_at() {
        let dir = tempfile::tempdir().unwrap();
        let compressed = content(0x180);
        let path = write_temp(
            &dir,
            "data.cpk",
            &CpkBuilder::new()
                .file("", "plain.txt", b"plain text")
                .compressed("sub", "packed.bin", &compressed)
                .build(),
        );

        let archive = CriArchive::open(&path).unwrap();
        assert!(archive.is_pack());
        assert_eq!(archive.origin_path(), path.as_path());

        for (i, entry) in archive.entries().iter().enumerate() {
            let data = archive.extract_at(i).unwrap();
            assert_eq!(data.len() as u64, entry.extracted_size);
        }
        assert_eq!(archive.extract_at(0).unwrap(), b"plain text");
        assert_eq!(archive.extract_at(1).unwrap(), compressed);
        assert!(archive.entries()[1].compression_ratio().unwrap() < 1.0);
    }

    #[test]
    fn test_pack_extract_to_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let body = content(0x300);
        let path = write_temp(
            &dir,
            "data.cpk",
            &CpkBuilder::new().compressed("", "big.bin", &body).build(),
        );
        let archive = CriArchive::open(&path).unwrap();

        let updates = RefCell::new(Vec::new());
        let progress = |current: u64, total: u64| updates.borrow_mut().push((current, total));
        let cancel = CancelToken::new();
        let copy = ChunkedCopy::new(&progress, &cancel).with_chunk_size(0x100);

        let mut out = Vec::new();
        let written = archive.extract_to(0, &mut out, &copy).unwrap();

        assert_eq!(written, 0x300);
        assert_eq!(out, body);
        assert_eq!(
            *updates.borrow(),
            vec![(0x100, 0x300), (0x200, 0x300), (0x300, 0x300)]
        );
    }

    #[test]
    fn test_size_mismatch_is_decompression_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "bad.cpk",
            &CpkBuilder::new().raw("", "liar.bin", vec![1, 2, 3], 10).build(),
        );
        let archive = CriArchive::open(&path).unwrap();

        assert!(matches!(archive.extract_at(0), Err(Error::Decompression(_))));
    }

    #[test]
    fn test_declared_crilayla_size_checked_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let mut stored = b"CRILAYLA".to_vec();
        stored.extend_from_slice(&0xFFFF_FF00u32.to_le_bytes());
        stored.extend_from_slice(&0u32.to_le_bytes());
        stored.extend_from_slice(&[0; 0x100]);
        let path = write_temp(
            &dir,
            "bomb.cpk",
            &CpkBuilder::new().raw("", "bomb.bin", stored, 0x200).build(),
        );
        let archive = CriArchive::open(&path).unwrap();

        let result = archive.extract_at(0);
        assert!(matches!(&result, Err(Error::Decompression(m)) if m.contains("expected 512")));

        let cancel = CancelToken::new();
        let mut out = Vec::new();
        let result = archive.extract_to(0, &mut out, &ChunkedCopy::new(&NoProgress, &cancel));
        assert!(matches!(result, Err(Error::Decompression(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_overflowing_extract_sizes_refused_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let huge = 1u64 << 63;
        let path = write_temp(
            &dir,
            "huge.cpk",
            &CpkBuilder::new()
                .raw("", "a.bin", b"aaaa".to_vec(), huge)
                .raw("", "b.bin", b"bbbb".to_vec(), huge)
                .build(),
        );

        assert!(matches!(CriArchive::open(&path), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_stream_extract() {
        let dir = tempfile::tempdir().unwrap();
        let video = UsmStream::video("intro.avi", vec![vec![1; 33], vec![2; 17]]);
        let audio = UsmStream::audio("intro.wav", vec![vec![3; 20]]);
        let path = write_temp(
            &dir,
            "intro.usm",
            &UsmBuilder::new("intro.usm")
                .stream(video.clone())
                .stream(audio.clone())
                .build(),
        );

        let archive = CriArchive::open(&path).unwrap();
        assert!(!archive.is_pack());
        assert_eq!(archive.extract_at(0).unwrap(), video.payload());

        let cancel = CancelToken::new();
        let mut out = Vec::new();
        archive
            .extract_to(1, &mut out, &ChunkedCopy::new(&NoProgress, &cancel))
            .unwrap();
        assert_eq!(out, audio.payload());
    }

    #[test]
    fn test_unknown_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "x.cpk", b"NOPE and more");

        assert!(matches!(
            CriArchive::open(&path),
            Err(Error::UnknownSignature(m)) if &m == b"NOPE"
        ));
    }

    #[test]
    fn test_entry_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "a.cpk", &CpkBuilder::new().file("", "a", b"a").build());
        let archive = CriArchive::open(&path).unwrap();

        assert!(matches!(archive.extract_at(5), Err(Error::EntryOutOfRange(5))));
    }
}

//! Memory-mapped DAT archive.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;
use nao_common::{BinaryReader, ChunkedCopy, ContainerIndex, EmbeddedEntry};
use tracing::{debug, info};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::{Error, Result};

/// Archive signature.
pub const DAT_MAGIC: &[u8; 4] = b"DAT\0";

/// Fixed header at the start of the archive.
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct DatHeader {
    pub magic: [u8; 4],
    pub file_count: U32,
    pub offsets_table: U32,
    pub extensions_table: U32,
    pub names_table: U32,
    pub sizes_table: U32,
    pub hash_map: U32,
    pub reserved: U32,
}

impl DatHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Slice `len` bytes at `offset`, or fail naming `what`.
fn table<'a>(data: &'a [u8], offset: u32, len: usize, what: &str) -> Result<&'a [u8]> {
    let start = offset as usize;
    start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            Error::Corrupt(format!(
                "{what} at {start:#x} ({len} bytes) exceeds file of {} bytes",
                data.len()
            ))
        })
}

fn parse(data: &[u8]) -> Result<Vec<EmbeddedEntry>> {
    let mut reader = BinaryReader::new(data);
    let header: DatHeader = reader
        .read_struct()
        .map_err(|_| Error::Corrupt("file smaller than DAT header".into()))?;
    if &header.magic != DAT_MAGIC {
        return Err(Error::Corrupt(format!("bad DAT signature {:02x?}", header.magic)));
    }

    let count = header.file_count.get() as usize;
    // Every entry needs at least an offset and a size record.
    if count.saturating_mul(8) > data.len() {
        return Err(Error::Corrupt(format!(
            "file count {count} impossible for {} bytes",
            data.len()
        )));
    }

    let offsets = table(data, header.offsets_table.get(), count * 4, "offsets table")?;
    let sizes = table(data, header.sizes_table.get(), count * 4, "sizes table")?;

    let mut names = BinaryReader::new(table(data, header.names_table.get(), 4, "names table")?);
    let width = names.read_u32()? as usize;
    let names_len = width
        .checked_mul(count)
        .ok_or_else(|| Error::Corrupt(format!("name width {width} overflows")))?;
    let names = table(
        data,
        header.names_table.get().saturating_add(4),
        names_len,
        "names table",
    )?;

    let mut offsets = BinaryReader::new(offsets);
    let mut sizes = BinaryReader::new(sizes);
    let mut entries = Vec::with_capacity(count);

    for i in 0..count {
        let offset = u64::from(offsets.read_u32()?);
        let size = u64::from(sizes.read_u32()?);
        let name = BinaryReader::new(&names[i * width..(i + 1) * width])
            .read_string_in_buffer(width)
            .map_err(|e| Error::Corrupt(format!("name of entry {i}: {e}")))?;

        if size > 0 && offset + size > data.len() as u64 {
            return Err(Error::Corrupt(format!(
                "entry '{name}' at {offset:#x}+{size:#x} lies outside the {} byte file",
                data.len()
            )));
        }

        entries.push(EmbeddedEntry::file(name, "", size, size, offset));
    }

    debug!(entries = entries.len(), width, "parsed DAT tables");
    Ok(entries)
}

/// An opened DAT archive.
pub struct DatArchive {
    mmap: Mmap,
    index: ContainerIndex,
}

impl DatArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let entries = parse(&mmap)?;
        let index = ContainerIndex::new(path, true, entries);
        if index.checked_totals().is_none() {
            return Err(Error::Corrupt("entry sizes overflow a 64-bit total".into()));
        }

        info!(
            path = %path.display(),
            entries = index.len(),
            "opened DAT archive"
        );

        Ok(Self { mmap, index })
    }

    #[inline]
    pub fn index(&self) -> &ContainerIndex {
        &self.index
    }

    #[inline]
    pub fn entries(&self) -> &[EmbeddedEntry] {
        self.index.entries()
    }

    #[inline]
    pub fn origin_path(&self) -> &Path {
        self.index.origin_path()
    }

    fn bytes(&self, index: usize) -> Result<&[u8]> {
        let entry = self.index.get(index).ok_or(Error::EntryOutOfRange(index))?;
        if entry.extracted_size == 0 {
            return Ok(&[]);
        }
        let start = entry.offset as usize;
        self.mmap
            .get(start..start + entry.extracted_size as usize)
            .ok_or_else(|| Error::Corrupt(format!("entry '{}' lies outside the file", entry.name)))
    }

    /// Copy one entry into memory.
    pub fn extract_at(&self, index: usize) -> Result<Vec<u8>> {
        Ok(self.bytes(index)?.to_vec())
    }

    /// Stream one entry to `sink` in bounded chunks.
    pub fn extract_to<W: Write + ?Sized>(
        &self,
        index: usize,
        sink: &mut W,
        copy: &ChunkedCopy<'_>,
    ) -> Result<u64> {
        Ok(copy.copy(self.bytes(index)?, sink)?)
    }
}

impl std::fmt::Debug for DatArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatArchive")
            .field("origin", &self.index.origin_path())
            .field("entries", &self.index.len())
            .finish()
    }
}

//! CPK resource packs.
//!
//! A CPK file is a sequence of packets, each an `@UTF` table behind a
//! 16-byte header. The `CPK ` packet at offset 0 points at the directory
//! (`TOC ` with names, or the name-less `ITOC`) and at the content area.

use nao_common::{BinaryReader, EmbeddedEntry};
use tracing::{debug, warn};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::utf::{UtfTable, UTF_MAGIC};
use crate::{Error, Result};

/// Signature of the pack header packet.
pub const CPK_MAGIC: &[u8; 4] = b"CPK ";
const TOC_MAGIC: &[u8; 4] = b"TOC ";
const ITOC_MAGIC: &[u8; 4] = b"ITOC";

const XOR_SEED: u32 = 0x655f;
const XOR_STEP: u32 = 0x4115;

/// Header in front of every CPK packet.
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct PacketHeader {
    pub magic: [u8; 4],
    pub flags: U32,
    /// Length of the table that follows
    pub size: U64,
}

impl PacketHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Undo the rolling XOR some packs apply to their tables.
pub fn deobfuscate(data: &mut [u8]) {
    let mut m = XOR_SEED;
    for byte in data {
        *byte ^= (m & 0xFF) as u8;
        m = m.wrapping_mul(XOR_STEP);
    }
}

/// Read the packet at `offset`, which must carry `magic`.
fn read_packet(data: &[u8], offset: usize, magic: &[u8; 4]) -> Result<UtfTable> {
    let mut reader = BinaryReader::new_at(data, offset);
    let header: PacketHeader = reader
        .read_struct()
        .map_err(|_| Error::Corrupt(format!("packet at {offset:#x} is truncated")))?;

    if &header.magic != magic {
        return Err(Error::Corrupt(format!(
            "expected {:?} packet at {offset:#x}, found {:02x?}",
            String::from_utf8_lossy(magic),
            header.magic
        )));
    }

    let size = header.size.get() as usize;
    let start = offset + PacketHeader::SIZE;
    let table = start
        .checked_add(size)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            Error::Corrupt(format!(
                "packet at {offset:#x} declares {size} bytes past end of file"
            ))
        })?;

    if table.starts_with(UTF_MAGIC) {
        return UtfTable::parse(table);
    }

    let mut plain = table.to_vec();
    deobfuscate(&mut plain);
    debug!(offset, "de-obfuscated CPK table");
    UtfTable::parse(&plain)
}

/// Pack-level fields from the `CpkHeader` table. Zero means absent.
#[derive(Debug, Clone, Copy)]
struct PackHeader {
    toc_offset: Option<u64>,
    itoc_offset: Option<u64>,
    content_offset: Option<u64>,
    align: u64,
    files: Option<u64>,
}

impl PackHeader {
    fn from_table(table: &UtfTable) -> Result<Self> {
        if table.row_count() == 0 {
            return Err(Error::Corrupt("CPK header table has no rows".into()));
        }
        let nonzero = |column| table.get_u64(0, column).filter(|&v| v > 0);

        Ok(Self {
            toc_offset: nonzero("TocOffset"),
            itoc_offset: nonzero("ItocOffset"),
            content_offset: nonzero("ContentOffset"),
            align: nonzero("Align").unwrap_or(1),
            files: table.get_u64(0, "Files"),
        })
    }
}

/// Parse a whole pack into entries in directory order.
pub(crate) fn parse(data: &[u8]) -> Result<Vec<EmbeddedEntry>> {
    let header = PackHeader::from_table(&read_packet(data, 0, CPK_MAGIC)?)?;

    let entries = match (header.toc_offset, header.itoc_offset) {
        (Some(toc), _) => parse_toc(data, &header, toc)?,
        (None, Some(itoc)) => parse_itoc(data, &header, itoc)?,
        (None, None) => {
            return Err(Error::Corrupt("CPK has neither TOC nor ITOC".into()));
        }
    };

    if let Some(files) = header.files {
        if files != entries.len() as u64 {
            warn!(
                declared = files,
                found = entries.len(),
                "CPK file count disagrees with directory"
            );
        }
    }

    for entry in &entries {
        let end = entry.offset.checked_add(entry.embedded_size);
        if end.map_or(true, |end| end > data.len() as u64) {
            return Err(Error::Corrupt(format!(
                "entry '{}' at {:#x}+{:#x} lies outside the {} byte file",
                entry.display_path(),
                entry.offset,
                entry.embedded_size,
                data.len()
            )));
        }
    }

    Ok(entries)
}

/// Round `value` up to a multiple of `align`, `None` on overflow.
fn align_up(value: u64, align: u64) -> Option<u64> {
    value.div_ceil(align).checked_mul(align)
}

fn to_offset(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::Corrupt(format!("offset {value:#x} too large")))
}

fn parse_toc(data: &[u8], header: &PackHeader, toc_offset: u64) -> Result<Vec<EmbeddedEntry>> {
    let table = read_packet(data, to_offset(toc_offset)?, TOC_MAGIC)?;

    // File offsets are relative to whichever of TOC and content comes first.
    let base = header
        .content_offset
        .map_or(toc_offset, |content| content.min(toc_offset));

    let mut entries = Vec::with_capacity(table.row_count());
    for row in 0..table.row_count() {
        let name = table
            .get_str(row, "FileName")
            .ok_or_else(|| Error::Corrupt(format!("TOC row {row} has no FileName")))?;
        let dir = table.get_str(row, "DirName").unwrap_or_default();
        let embedded = table
            .get_u64(row, "FileSize")
            .ok_or_else(|| Error::Corrupt(format!("TOC row {row} has no FileSize")))?;
        let extracted = table.get_u64(row, "ExtractSize").unwrap_or(embedded);
        let relative = table
            .get_u64(row, "FileOffset")
            .ok_or_else(|| Error::Corrupt(format!("TOC row {row} has no FileOffset")))?;
        let offset = relative
            .checked_add(base)
            .ok_or_else(|| Error::Corrupt(format!("TOC row {row} offset overflows")))?;

        entries.push(EmbeddedEntry::file(
            name,
            dir.trim_matches('/'),
            embedded,
            extracted,
            offset,
        ));
    }

    debug!(entries = entries.len(), "parsed CPK TOC");
    Ok(entries)
}

/// `(id, stored size, extracted size)`
type ItocRecord = (u64, u64, u64);

fn itoc_records(blob: &[u8], records: &mut Vec<ItocRecord>) -> Result<()> {
    let table = UtfTable::parse(blob)?;
    for row in 0..table.row_count() {
        let id = table
            .get_u64(row, "ID")
            .ok_or_else(|| Error::Corrupt(format!("ITOC row {row} has no ID")))?;
        let size = table
            .get_u64(row, "FileSize")
            .ok_or_else(|| Error::Corrupt(format!("ITOC row {row} has no FileSize")))?;
        let extracted = table.get_u64(row, "ExtractSize").unwrap_or(size);
        records.push((id, size, extracted));
    }
    Ok(())
}

fn parse_itoc(data: &[u8], header: &PackHeader, itoc_offset: u64) -> Result<Vec<EmbeddedEntry>> {
    let table = read_packet(data, to_offset(itoc_offset)?, ITOC_MAGIC)?;
    let content = header
        .content_offset
        .ok_or_else(|| Error::Corrupt("ITOC pack without ContentOffset".into()))?;

    let mut records = Vec::new();
    for column in ["DataL", "DataH"] {
        if let Some(blob) = table.get_data(0, column).filter(|b| !b.is_empty()) {
            itoc_records(blob, &mut records)?;
        }
    }
    records.sort_by_key(|&(id, _, _)| id);

    let mut position = content;
    let mut entries = Vec::with_capacity(records.len());
    for (id, size, extracted) in records {
        entries.push(EmbeddedEntry::file(
            format!("{id:05}.bin"),
            "",
            size,
            extracted,
            position,
        ));
        position = position
            .checked_add(size)
            .and_then(|end| align_up(end, header.align))
            .ok_or_else(|| Error::Corrupt(format!("ITOC entry {id} overflows")))?;
    }

    debug!(entries = entries.len(), "parsed CPK ITOC");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{xor_table, CpkBuilder};

    #[test]
    fn test_packet_header_size() {
        assert_eq!(PacketHeader::SIZE, 0x10);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0x801, 0x800), Some(0x1000));
        assert_eq!(align_up(0x800, 0x800), Some(0x800));
        assert_eq!(align_up(5, 1), Some(5));
        assert_eq!(align_up(u64::MAX - 1, 1 << 40), None);
    }

    #[test]
    fn test_deobfuscate_matches_writer() {
        let mut data = b"@UTF some table bytes".to_vec();
        let original = data.clone();
        xor_table(&mut data);
        assert_ne!(data, original);
        deobfuscate(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_toc_entries() {
        let pack = CpkBuilder::new()
            .file("", "root.txt", b"root")
            .file("data/sub/", "nested.bin", &[1, 2, 3, 4, 5])
            .build();

        let entries = parse(&pack).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "root.txt");
        assert_eq!(entries[0].path, "");
        assert_eq!(entries[1].path, "data/sub");

        let e = &entries[1];
        let stored = &pack[e.offset as usize..(e.offset + e.embedded_size) as usize];
        assert_eq!(stored, &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_obfuscated_header() {
        let pack = CpkBuilder::new()
            .obfuscated()
            .file("", "a.bin", b"abc")
            .build();
        assert!(!pack[0x10..].starts_with(UTF_MAGIC));

        let entries = parse(&pack).unwrap();
        assert_eq!(entries[0].name, "a.bin");
    }

    #[test]
    fn test_itoc_layout() {
        let pack = CpkBuilder::new()
            .itoc()
            .align(0x40)
            .file("", "ignored", &[0xAA; 10])
            .file("", "ignored", &[0xBB; 70])
            .build();

        let entries = parse(&pack).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "00000.bin");
        assert_eq!(entries[1].name, "00001.bin");
        assert_eq!(entries[1].offset - entries[0].offset, 0x40);
        assert_eq!(pack[entries[1].offset as usize], 0xBB);
    }

    #[test]
    fn test_entry_outside_file() {
        let mut pack = CpkBuilder::new().file("", "a.bin", &[7; 64]).build();
        pack.truncate(pack.len() - 1);

        assert!(matches!(parse(&pack), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_wrong_packet_magic() {
        let mut pack = CpkBuilder::new().file("", "a.bin", b"x").build();
        pack[CpkBuilder::TOC_OFFSET..CpkBuilder::TOC_OFFSET + 4].copy_from_slice(b"XXXX");

        assert!(matches!(parse(&pack), Err(Error::Corrupt(_))));
    }
}

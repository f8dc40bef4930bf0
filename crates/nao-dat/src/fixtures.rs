//! DAT archive builder for tests.

use crate::archive::DAT_MAGIC;

/// Writes DAT archives with tables in the usual order: offsets,
/// extensions, names, sizes, then the aligned file data.
#[derive(Debug, Clone)]
pub struct DatBuilder {
    files: Vec<(String, Vec<u8>)>,
    align: usize,
}

impl Default for DatBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatBuilder {
    pub const OFFSETS_TABLE: usize = 0x20;

    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            align: 0x10,
        }
    }

    pub fn align(mut self, align: usize) -> Self {
        self.align = align.max(1);
        self
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.files.push((name.to_owned(), data.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let count = self.files.len();
        let width = self.files.iter().map(|(n, _)| n.len() + 1).max().unwrap_or(1);

        let offsets_table = Self::OFFSETS_TABLE;
        let extensions_table = offsets_table + count * 4;
        let names_table = extensions_table + count * 4;
        let sizes_table = names_table + 4 + count * width;
        let tables_end = sizes_table + count * 4;

        let mut offsets = Vec::with_capacity(count);
        let mut position = tables_end.div_ceil(self.align) * self.align;
        for (_, data) in &self.files {
            offsets.push(position);
            position = (position + data.len()).div_ceil(self.align) * self.align;
        }

        let mut out = Vec::new();
        out.extend_from_slice(DAT_MAGIC);
        for value in [
            count,
            offsets_table,
            extensions_table,
            names_table,
            sizes_table,
            0,
            0,
        ] {
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }

        for offset in &offsets {
            out.extend_from_slice(&(*offset as u32).to_le_bytes());
        }
        for (name, _) in &self.files {
            let mut extension = [0u8; 4];
            let ext = name.rsplit_once('.').map_or("", |(_, e)| e).as_bytes();
            let len = ext.len().min(3);
            extension[..len].copy_from_slice(&ext[..len]);
            out.extend_from_slice(&extension);
        }
        out.extend_from_slice(&(width as u32).to_le_bytes());
        for (name, _) in &self.files {
            let start = out.len();
            out.extend_from_slice(name.as_bytes());
            out.resize(start + width, 0);
        }
        for (_, data) in &self.files {
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        }

        for ((_, data), offset) in self.files.iter().zip(offsets) {
            if !data.is_empty() {
                out.resize(offset, 0);
                out.extend_from_slice(data);
            }
        }
        out
    }
}

//! Builders for synthetic CRIWare data.
//!
//! Only compiled for tests or with the `fixtures` feature. The builders
//! emit exactly the layouts the readers accept, so tests can describe a
//! container in a few lines instead of shipping binary blobs.

use crate::crilayla::{MAGIC as CRILAYLA_MAGIC, PREFIX_SIZE};
use crate::utf::{Value, ValueType, UTF_MAGIC};

fn value_width(value_type: ValueType) -> usize {
    match value_type {
        ValueType::U8 | ValueType::I8 => 1,
        ValueType::U16 | ValueType::I16 => 2,
        ValueType::U32 | ValueType::I32 | ValueType::F32 | ValueType::String => 4,
        ValueType::U64 | ValueType::I64 | ValueType::F64 | ValueType::Data => 8,
    }
}

#[derive(Debug, Clone)]
enum FixtureStorage {
    Zero(ValueType),
    Constant(Value),
    PerRow(ValueType),
}

/// Writes `@UTF` tables.
#[derive(Debug, Clone)]
pub struct UtfBuilder {
    name: String,
    columns: Vec<(String, FixtureStorage)>,
    rows: Vec<Vec<Value>>,
}

impl UtfBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Add a per-row column.
    pub fn column(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.columns
            .push((name.into(), FixtureStorage::PerRow(value_type)));
        self
    }

    /// Add a column holding the same value for every row.
    pub fn constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.columns
            .push((name.into(), FixtureStorage::Constant(value)));
        self
    }

    /// Add a column without a value.
    pub fn zero(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.columns
            .push((name.into(), FixtureStorage::Zero(value_type)));
        self
    }

    /// Add a row; `values` cover the per-row columns in declaration order.
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut pools = PoolWriter::default();
        let name_offset = pools.string(&self.name);

        let mut schema = Vec::new();
        let mut row_width = 0;
        for (name, storage) in &self.columns {
            let (flags, value_type) = match storage {
                FixtureStorage::Zero(t) => (0x10, *t),
                FixtureStorage::Constant(v) => (0x30, v.value_type()),
                FixtureStorage::PerRow(t) => {
                    row_width += value_width(*t);
                    (0x50, *t)
                }
            };
            schema.push(flags | value_type as u8);
            schema.extend_from_slice(&pools.string(name).to_be_bytes());
            if let FixtureStorage::Constant(value) = storage {
                pools.value(&mut schema, value);
            }
        }

        let mut rows = Vec::new();
        for row in &self.rows {
            for value in row {
                pools.value(&mut rows, value);
            }
        }

        let rows_offset = 0x18 + schema.len();
        let strings_offset = rows_offset + rows.len();
        let data_offset = strings_offset + pools.strings.len();
        let table_size = data_offset + pools.data.len();

        let mut out = Vec::with_capacity(table_size + 8);
        out.extend_from_slice(UTF_MAGIC);
        out.extend_from_slice(&(table_size as u32).to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&(rows_offset as u16).to_be_bytes());
        out.extend_from_slice(&(strings_offset as u32).to_be_bytes());
        out.extend_from_slice(&(data_offset as u32).to_be_bytes());
        out.extend_from_slice(&name_offset.to_be_bytes());
        out.extend_from_slice(&(self.columns.len() as u16).to_be_bytes());
        out.extend_from_slice(&(row_width as u16).to_be_bytes());
        out.extend_from_slice(&(self.rows.len() as u32).to_be_bytes());
        out.extend_from_slice(&schema);
        out.extend_from_slice(&rows);
        out.extend_from_slice(&pools.strings);
        out.extend_from_slice(&pools.data);
        out
    }
}

struct PoolWriter {
    strings: Vec<u8>,
    data: Vec<u8>,
}

impl Default for PoolWriter {
    fn default() -> Self {
        Self {
            strings: b"<NULL>\0".to_vec(),
            data: Vec::new(),
        }
    }
}

impl PoolWriter {
    fn string(&mut self, s: &str) -> u32 {
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        offset
    }

    fn value(&mut self, out: &mut Vec<u8>, value: &Value) {
        match value {
            Value::U8(v) => out.push(*v),
            Value::I8(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::I16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::I32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::U64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::I64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::F32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::F64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::String(s) => {
                let offset = self.string(s);
                out.extend_from_slice(&offset.to_be_bytes());
            }
            Value::Data(d) => {
                out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
                out.extend_from_slice(&(d.len() as u32).to_be_bytes());
                self.data.extend_from_slice(d);
            }
        }
    }
}

/// Emits a CRILAYLA bit stream token by token, in decoding order
/// (the last output byte first).
#[derive(Debug, Default)]
pub struct CrilaylaWriter {
    bytes: Vec<u8>,
    current: u8,
    filled: u32,
}

impl CrilaylaWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, value: u32, width: u32) {
        for i in (0..width).rev() {
            self.current = (self.current << 1) | ((value >> i) & 1) as u8;
            self.filled += 1;
            if self.filled == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
    }

    pub fn literal(&mut self, byte: u8) {
        self.push(0, 1);
        self.push(byte.into(), 8);
    }

    /// Copy `length` bytes starting `distance` bytes after the current
    /// output position. `distance` in `3..8195`, `length >= 3`.
    pub fn back_reference(&mut self, distance: usize, length: usize) {
        assert!((3..8195).contains(&distance), "distance out of range");
        assert!(length >= 3, "match too short");

        self.push(1, 1);
        self.push((distance - 3) as u32, 13);

        let mut remaining = length - 3;
        for width in [2u32, 3, 5, 8] {
            let max = (1usize << width) - 1;
            if remaining < max {
                self.push(remaining as u32, width);
                return;
            }
            self.push(max as u32, width);
            remaining -= max;
        }
        loop {
            if remaining < 0xFF {
                self.push(remaining as u32, 8);
                return;
            }
            self.push(0xFF, 8);
            remaining -= 0xFF;
        }
    }

    /// Assemble the payload. `prefix` must be 0x100 bytes.
    pub fn finish(mut self, prefix: &[u8], body_size: usize) -> Vec<u8> {
        assert_eq!(prefix.len(), PREFIX_SIZE, "prefix must be 0x100 bytes");

        if self.filled > 0 {
            self.bytes.push(self.current << (8 - self.filled));
        }
        let mut stream = self.bytes;
        stream.reverse();

        let mut out = Vec::with_capacity(0x10 + stream.len() + PREFIX_SIZE);
        out.extend_from_slice(CRILAYLA_MAGIC);
        out.extend_from_slice(&(body_size as u32).to_le_bytes());
        out.extend_from_slice(&(stream.len() as u32).to_le_bytes());
        out.extend_from_slice(&stream);
        out.extend_from_slice(prefix);
        out
    }
}

/// Encode `content` (at least 0x100 bytes) using literals only.
pub fn crilayla_literals(content: &[u8]) -> Vec<u8> {
    let (prefix, body) = content.split_at(PREFIX_SIZE);
    let mut writer = CrilaylaWriter::new();
    for &byte in body.iter().rev() {
        writer.literal(byte);
    }
    writer.finish(prefix, body.len())
}

/// Encode `content` (at least 0x100 bytes) with a greedy match search.
pub fn crilayla_compress(content: &[u8]) -> Vec<u8> {
    let (prefix, body) = content.split_at(PREFIX_SIZE);
    let mut writer = CrilaylaWriter::new();
    let mut remaining = body.len();

    while remaining > 0 {
        let p = remaining - 1;
        let mut best = (0, 0);
        let furthest = (body.len() - 1 - p).min(8194);
        for distance in 3..=furthest {
            let length = (0..remaining)
                .take_while(|&k| body[p - k] == body[p + distance - k])
                .count();
            if length > best.1 {
                best = (distance, length);
            }
        }

        if best.1 >= 3 {
            writer.back_reference(best.0, best.1);
            remaining -= best.1;
        } else {
            writer.literal(body[p]);
            remaining -= 1;
        }
    }

    writer.finish(prefix, body.len())
}

/// The rolling XOR applied to obfuscated CPK tables. Its own inverse.
pub fn xor_table(data: &mut [u8]) {
    let mut m: u32 = 0x655f;
    for byte in data {
        *byte ^= (m & 0xFF) as u8;
        m = m.wrapping_mul(0x4115);
    }
}

fn packet(magic: &[u8; 4], table: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(0x10 + table.len());
    out.extend_from_slice(magic);
    out.extend_from_slice(&0xFFu32.to_le_bytes());
    out.extend_from_slice(&(table.len() as u64).to_le_bytes());
    out.extend_from_slice(table);
    out
}

fn pad_to(out: &mut Vec<u8>, position: usize) {
    assert!(out.len() <= position, "layout overlap");
    out.resize(position, 0);
}

fn align_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

#[derive(Debug, Clone)]
struct CpkFile {
    dir: String,
    name: String,
    stored: Vec<u8>,
    extract_size: u64,
}

/// Writes CPK packs with a TOC or ITOC directory.
#[derive(Debug, Clone)]
pub struct CpkBuilder {
    files: Vec<CpkFile>,
    align: usize,
    obfuscate: bool,
    itoc: bool,
}

impl Default for CpkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CpkBuilder {
    /// Directory tables start here.
    pub const TOC_OFFSET: usize = 0x800;

    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            align: 0x20,
            obfuscate: false,
            itoc: false,
        }
    }

    pub fn align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    /// XOR-obfuscate the header table.
    pub fn obfuscated(mut self) -> Self {
        self.obfuscate = true;
        self
    }

    /// Emit an ID-only ITOC directory instead of a TOC.
    pub fn itoc(mut self) -> Self {
        self.itoc = true;
        self
    }

    /// Store `data` uncompressed.
    pub fn file(self, dir: &str, name: &str, data: &[u8]) -> Self {
        let size = data.len() as u64;
        self.raw(dir, name, data.to_vec(), size)
    }

    /// Store `content` CRILAYLA-compressed.
    pub fn compressed(self, dir: &str, name: &str, content: &[u8]) -> Self {
        let size = content.len() as u64;
        self.raw(dir, name, crilayla_compress(content), size)
    }

    /// Store arbitrary bytes with a declared extracted size.
    pub fn raw(mut self, dir: &str, name: &str, stored: Vec<u8>, extract_size: u64) -> Self {
        self.files.push(CpkFile {
            dir: dir.to_owned(),
            name: name.to_owned(),
            stored,
            extract_size,
        });
        self
    }

    /// Absolute payload offsets given where content starts.
    fn layout(&self, content_offset: usize) -> Vec<usize> {
        let mut position = content_offset;
        self.files
            .iter()
            .map(|file| {
                let offset = position;
                position = align_up(position + file.stored.len(), self.align);
                offset
            })
            .collect()
    }

    fn toc_table(&self, offsets: &[usize]) -> Vec<u8> {
        // Sizes past 4 GiB need a 64-bit column.
        let wide = self.files.iter().any(|f| f.extract_size > u64::from(u32::MAX));
        let extract_type = if wide { ValueType::U64 } else { ValueType::U32 };

        let mut builder = UtfBuilder::new("CpkTocInfo")
            .column("DirName", ValueType::String)
            .column("FileName", ValueType::String)
            .column("FileSize", ValueType::U32)
            .column("ExtractSize", extract_type)
            .column("FileOffset", ValueType::U64)
            .column("ID", ValueType::U32)
            .constant("UserString", Value::String("<NULL>".into()));

        for (id, (file, &offset)) in self.files.iter().zip(offsets).enumerate() {
            builder = builder.row(vec![
                Value::String(file.dir.clone()),
                Value::String(file.name.clone()),
                Value::U32(file.stored.len() as u32),
                if wide {
                    Value::U64(file.extract_size)
                } else {
                    Value::U32(file.extract_size as u32)
                },
                Value::U64(offset.saturating_sub(Self::TOC_OFFSET) as u64),
                Value::U32(id as u32),
            ]);
        }
        builder.build()
    }

    fn itoc_table(&self) -> Vec<u8> {
        let empty = UtfBuilder::new("CpkItocL")
            .column("ID", ValueType::U16)
            .column("FileSize", ValueType::U16)
            .column("ExtractSize", ValueType::U16)
            .build();

        let mut high = UtfBuilder::new("CpkItocH")
            .column("ID", ValueType::U16)
            .column("FileSize", ValueType::U32)
            .column("ExtractSize", ValueType::U32);
        for (id, file) in self.files.iter().enumerate() {
            high = high.row(vec![
                Value::U16(id as u16),
                Value::U32(file.stored.len() as u32),
                Value::U32(file.extract_size as u32),
            ]);
        }

        UtfBuilder::new("CpkItocInfo")
            .column("FilesL", ValueType::U32)
            .column("FilesH", ValueType::U32)
            .column("DataL", ValueType::Data)
            .column("DataH", ValueType::Data)
            .row(vec![
                Value::U32(0),
                Value::U32(self.files.len() as u32),
                Value::Data(empty),
                Value::Data(high.build()),
            ])
            .build()
    }

    fn header_table(&self, content_offset: usize, directory_size: usize) -> Vec<u8> {
        let (toc, itoc) = if self.itoc {
            (None, Some(Self::TOC_OFFSET as u64))
        } else {
            (Some(Self::TOC_OFFSET as u64), None)
        };

        let mut builder = UtfBuilder::new("CpkHeader")
            .column("ContentOffset", ValueType::U64)
            .column("Files", ValueType::U32)
            .column("Align", ValueType::U16);
        builder = match toc {
            Some(_) => builder.column("TocOffset", ValueType::U64),
            None => builder.zero("TocOffset", ValueType::U64),
        };
        builder = match itoc {
            Some(_) => builder.column("ItocOffset", ValueType::U64),
            None => builder.zero("ItocOffset", ValueType::U64),
        };

        let mut row = vec![
            Value::U64(content_offset as u64),
            Value::U32(self.files.len() as u32),
            Value::U16(self.align as u16),
        ];
        row.extend(toc.or(itoc).map(Value::U64));
        builder
            .constant("TocSize", Value::U64(directory_size as u64))
            .row(row)
            .build()
    }

    pub fn build(&self) -> Vec<u8> {
        let directory = if self.itoc {
            self.itoc_table()
        } else {
            // Row widths are fixed, so a dry run gives the final size.
            self.toc_table(&vec![0; self.files.len()])
        };
        let directory_end = Self::TOC_OFFSET + 0x10 + directory.len();
        let content_offset = align_up(directory_end, self.align.max(0x10));
        let offsets = self.layout(content_offset);

        let directory = if self.itoc {
            directory
        } else {
            self.toc_table(&offsets)
        };

        let mut header = self.header_table(content_offset, directory.len() + 0x10);
        if self.obfuscate {
            xor_table(&mut header);
        }

        let mut out = packet(b"CPK ", &header);
        pad_to(&mut out, Self::TOC_OFFSET);
        let magic = if self.itoc { b"ITOC" } else { b"TOC " };
        out.extend_from_slice(&packet(magic, &directory));

        for (file, &offset) in self.files.iter().zip(&offsets) {
            pad_to(&mut out, offset);
            out.extend_from_slice(&file.stored);
        }
        out
    }
}

/// Stream metadata written into a USM stream header chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamInfo {
    Video {
        total_frames: u32,
        framerate_n: u32,
        framerate_d: u32,
    },
    Audio {
        sampling_rate: u32,
        total_samples: u32,
    },
    /// No header chunk at all
    Missing,
}

/// One elementary stream of a USM fixture.
#[derive(Debug, Clone)]
pub struct UsmStream {
    pub signature: [u8; 4],
    pub channel: u8,
    pub filename: String,
    pub avbps: u32,
    pub info: StreamInfo,
    pub chunks: Vec<Vec<u8>>,
}

impl UsmStream {
    pub fn video(filename: &str, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            signature: *b"@SFV",
            channel: 0,
            filename: filename.to_owned(),
            avbps: 0,
            info: StreamInfo::Video {
                total_frames: 30,
                framerate_n: 30000,
                framerate_d: 1000,
            },
            chunks,
        }
    }

    pub fn audio(filename: &str, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            signature: *b"@SFA",
            channel: 0,
            filename: filename.to_owned(),
            avbps: 0,
            info: StreamInfo::Audio {
                sampling_rate: 48000,
                total_samples: 48000,
            },
            chunks,
        }
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn info(mut self, info: StreamInfo) -> Self {
        self.info = info;
        self
    }

    pub fn avbps(mut self, avbps: u32) -> Self {
        self.avbps = avbps;
        self
    }

    pub fn payload_len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    /// All data payloads concatenated.
    pub fn payload(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// Writes USM files: a `CRID` directory, one header chunk per stream,
/// round-robin interleaved data chunks and end markers.
#[derive(Debug, Clone)]
pub struct UsmBuilder {
    name: String,
    streams: Vec<UsmStream>,
    extra_chunks: Vec<([u8; 4], Vec<u8>)>,
}

impl UsmBuilder {
    pub const CONTENTS_END: &'static [u8] = b"#CONTENTS END   ===============\0";

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            streams: Vec::new(),
            extra_chunks: Vec::new(),
        }
    }

    pub fn stream(mut self, stream: UsmStream) -> Self {
        self.streams.push(stream);
        self
    }

    /// Add a chunk with an unhandled signature (e.g. subtitles).
    pub fn extra_chunk(mut self, signature: [u8; 4], payload: Vec<u8>) -> Self {
        self.extra_chunks.push((signature, payload));
        self
    }

    /// Write one chunk, returning its offset.
    pub fn write_chunk(
        out: &mut Vec<u8>,
        signature: &[u8; 4],
        channel: u8,
        payload_type: u8,
        payload: &[u8],
    ) -> usize {
        let offset = out.len();
        let padding = (4 - payload.len() % 4) % 4;
        let size = 0x18 + payload.len() + padding;

        out.extend_from_slice(signature);
        out.extend_from_slice(&(size as u32).to_be_bytes());
        out.push(0);
        out.push(0x18);
        out.extend_from_slice(&(padding as u16).to_be_bytes());
        out.push(channel);
        out.extend_from_slice(&[0, 0]);
        out.push(payload_type);
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&2997u32.to_be_bytes());
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(payload);
        out.resize(out.len() + padding, 0);
        offset
    }

    fn directory(&self) -> Vec<u8> {
        let mut builder = UtfBuilder::new("CRIUSF_DIR_STREAM")
            .constant("fmtver", Value::U32(0x0100_0000))
            .column("filename", ValueType::String)
            .column("filesize", ValueType::U32)
            .column("stmid", ValueType::U32)
            .column("chno", ValueType::U16)
            .column("avbps", ValueType::U32)
            .row(vec![
                Value::String(self.name.clone()),
                Value::U32(0),
                Value::U32(0),
                Value::U16(0xFFFF),
                Value::U32(self.streams.iter().map(|s| s.avbps).sum()),
            ]);

        for stream in &self.streams {
            builder = builder.row(vec![
                Value::String(stream.filename.clone()),
                Value::U32(stream.payload_len() as u32),
                Value::U32(u32::from_be_bytes(stream.signature)),
                Value::U16(stream.channel.into()),
                Value::U32(stream.avbps),
            ]);
        }
        builder.build()
    }

    fn header_info(info: StreamInfo) -> Option<Vec<u8>> {
        match info {
            StreamInfo::Video {
                total_frames,
                framerate_n,
                framerate_d,
            } => Some(
                UtfBuilder::new("VIDEO_HDRINFO")
                    .column("width", ValueType::U32)
                    .column("height", ValueType::U32)
                    .column("total_frames", ValueType::U32)
                    .column("framerate_n", ValueType::U32)
                    .column("framerate_d", ValueType::U32)
                    .row(vec![
                        Value::U32(1280),
                        Value::U32(720),
                        Value::U32(total_frames),
                        Value::U32(framerate_n),
                        Value::U32(framerate_d),
                    ])
                    .build(),
            ),
            StreamInfo::Audio {
                sampling_rate,
                total_samples,
            } => Some(
                UtfBuilder::new("AUDIO_HDRINFO")
                    .column("sampling_rate", ValueType::U32)
                    .column("num_channels", ValueType::U8)
                    .column("total_samples", ValueType::U32)
                    .row(vec![
                        Value::U32(sampling_rate),
                        Value::U8(2),
                        Value::U32(total_samples),
                    ])
                    .build(),
            ),
            StreamInfo::Missing => None,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        Self::write_chunk(&mut out, b"CRID", 0, 1, &self.directory());

        for stream in &self.streams {
            if let Some(info) = Self::header_info(stream.info) {
                Self::write_chunk(&mut out, &stream.signature, stream.channel, 1, &info);
            }
        }

        for (signature, payload) in &self.extra_chunks {
            Self::write_chunk(&mut out, signature, 0, 0, payload);
        }

        let longest = self.streams.iter().map(|s| s.chunks.len()).max().unwrap_or(0);
        for i in 0..longest {
            for stream in &self.streams {
                if let Some(chunk) = stream.chunks.get(i) {
                    Self::write_chunk(&mut out, &stream.signature, stream.channel, 0, chunk);
                }
            }
        }

        for stream in &self.streams {
            Self::write_chunk(
                &mut out,
                &stream.signature,
                stream.channel,
                2,
                Self::CONTENTS_END,
            );
        }
        out
    }
}

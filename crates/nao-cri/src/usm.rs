//! USM interleaved audio/video streams.
//!
//! A USM file is a flat run of chunks. Each carries a 4-byte stream
//! signature and a channel number; chunks sharing both belong to one
//! elementary stream. The leading `CRID` chunk holds the stream directory.

use std::ops::Range;

use nao_common::{BinaryReader, EmbeddedEntry, StreamKind};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};
use zerocopy::byteorder::big_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::utf::{UtfTable, UTF_MAGIC};
use crate::{Error, Result};

/// Signature of the directory chunk, always first in the file.
pub const CRID_MAGIC: &[u8; 4] = b"CRID";

const VIDEO: &[u8; 4] = b"@SFV";
const ALPHA: &[u8; 4] = b"@ALP";
const AUDIO: &[u8; 4] = b"@SFA";

/// Payload type, low two bits of [`ChunkHeader::payload_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadType {
    Data,
    Header,
    SectionEnd,
    Seek,
}

impl From<u8> for PayloadType {
    fn from(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Data,
            1 => Self::Header,
            2 => Self::SectionEnd,
            _ => Self::Seek,
        }
    }
}

/// Fixed part of every chunk.
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct ChunkHeader {
    pub signature: [u8; 4],
    /// Bytes after this field
    pub size: U32,
    pub unknown: u8,
    /// Payload start, counted from offset 8
    pub payload_offset: u8,
    /// Zero bytes after the payload
    pub padding: U16,
    pub channel: u8,
    pub reserved: [u8; 2],
    pub payload_type: u8,
    pub frame_time: U32,
    pub frame_rate: U32,
    pub reserved2: [u8; 8],
}

impl ChunkHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();
    const PREAMBLE: usize = 8;
}

fn stream_kind(signature: &[u8; 4]) -> Option<StreamKind> {
    match signature {
        VIDEO | ALPHA => Some(StreamKind::Video),
        AUDIO => Some(StreamKind::Audio),
        _ => None,
    }
}

/// One `CRIUSF_DIR_STREAM` row.
#[derive(Debug, Clone)]
struct DirectoryRow {
    filename: String,
    stmid: u32,
    channel: u64,
    avbps: u64,
}

fn parse_directory(payload: &[u8]) -> Result<Vec<DirectoryRow>> {
    let table = UtfTable::parse(payload)?;
    let mut rows = Vec::new();

    for row in 0..table.row_count() {
        // Row 0 describes the file itself and has no stream id.
        let Some(stmid) = table.get_u64(row, "stmid").filter(|&id| id != 0) else {
            continue;
        };
        rows.push(DirectoryRow {
            filename: table.get_str(row, "filename").unwrap_or_default().to_owned(),
            stmid: stmid as u32,
            channel: table.get_u64(row, "chno").unwrap_or(0),
            avbps: table.get_u64(row, "avbps").unwrap_or(0),
        });
    }

    Ok(rows)
}

/// Playback length in seconds from a `*_HDRINFO` table.
fn header_duration(table: &UtfTable) -> Option<f64> {
    match table.name() {
        "VIDEO_HDRINFO" => {
            let frames = table.get_u64(0, "total_frames")? as f64;
            let numerator = table.get_u64(0, "framerate_n")? as f64;
            let denominator = table.get_u64(0, "framerate_d")? as f64;
            (numerator > 0.0).then(|| frames * denominator / numerator)
        }
        "AUDIO_HDRINFO" => {
            let samples = table.get_u64(0, "total_samples")? as f64;
            let rate = table.get_u64(0, "sampling_rate")? as f64;
            (rate > 0.0).then(|| samples / rate)
        }
        _ => None,
    }
}

#[derive(Debug)]
struct StreamState {
    signature: [u8; 4],
    channel: u8,
    kind: StreamKind,
    data_offset: Option<u64>,
    header_offset: Option<u64>,
    embedded: u64,
    extracted: u64,
    duration: Option<f64>,
    spans: Vec<Range<usize>>,
}

impl StreamState {
    fn new(signature: [u8; 4], channel: u8, kind: StreamKind) -> Self {
        Self {
            signature,
            channel,
            kind,
            data_offset: None,
            header_offset: None,
            embedded: 0,
            extracted: 0,
            duration: None,
            spans: Vec::new(),
        }
    }
}

/// Demuxed streams: entries plus the payload spans of each.
#[derive(Debug)]
pub(crate) struct Demuxed {
    pub entries: Vec<EmbeddedEntry>,
    pub spans: Vec<Vec<Range<usize>>>,
}

/// Walk all chunks of `data`. `stem` names streams the directory leaves
/// unnamed.
pub(crate) fn parse(data: &[u8], stem: &str) -> Result<Demuxed> {
    if !data.starts_with(CRID_MAGIC) {
        return Err(Error::Corrupt("USM does not start with a CRID chunk".into()));
    }

    let mut directory = Vec::new();
    let mut streams: Vec<StreamState> = Vec::new();
    let mut lookup: FxHashMap<([u8; 4], u8), usize> = FxHashMap::default();
    let mut position = 0usize;

    while position < data.len() {
        if data.len() - position < ChunkHeader::SIZE {
            warn!(
                offset = position,
                remaining = data.len() - position,
                "ignoring trailing bytes after last USM chunk"
            );
            break;
        }

        let header: ChunkHeader = BinaryReader::new_at(data, position).read_struct()?;
        let end = (header.size.get() as usize)
            .checked_add(position + ChunkHeader::PREAMBLE)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::Corrupt(format!(
                    "chunk at {position:#x} declares {} bytes past end of file",
                    header.size.get()
                ))
            })?;
        let payload_start = position + ChunkHeader::PREAMBLE + header.payload_offset as usize;
        let payload_end = end.checked_sub(header.padding.get() as usize).unwrap_or(0);
        if payload_start > payload_end {
            return Err(Error::Corrupt(format!(
                "chunk at {position:#x} has payload offset past its padding"
            )));
        }
        let payload = &data[payload_start..payload_end];
        let payload_type = PayloadType::from(header.payload_type);

        if &header.signature == CRID_MAGIC {
            if payload_type == PayloadType::Header {
                directory.extend(parse_directory(payload)?);
            }
        } else if let Some(kind) = stream_kind(&header.signature) {
            let key = (header.signature, header.channel);
            let slot = *lookup.entry(key).or_insert_with(|| {
                streams.push(StreamState::new(header.signature, header.channel, kind));
                streams.len() - 1
            });
            let stream = &mut streams[slot];
            stream.embedded += (end - position) as u64;

            match payload_type {
                PayloadType::Data => {
                    stream.data_offset.get_or_insert(position as u64);
                    stream.extracted += payload.len() as u64;
                    if !payload.is_empty() {
                        stream.spans.push(payload_start..payload_end);
                    }
                }
                PayloadType::Header => {
                    stream.header_offset.get_or_insert(position as u64);
                    if stream.duration.is_none() && payload.starts_with(UTF_MAGIC) {
                        stream.duration = header_duration(&UtfTable::parse(payload)?);
                    }
                }
                PayloadType::SectionEnd | PayloadType::Seek => {}
            }
        } else {
            trace!(
                offset = position,
                signature = ?header.signature,
                "skipping USM chunk"
            );
        }

        position = end;
    }

    let mut entries = Vec::with_capacity(streams.len());
    let mut spans = Vec::with_capacity(streams.len());

    for stream in streams {
        let Some(offset) = stream.data_offset else {
            warn!(
                signature = %String::from_utf8_lossy(&stream.signature),
                channel = stream.channel,
                "USM stream has no data chunks, skipping"
            );
            continue;
        };

        let row = directory.iter().find(|row| {
            row.stmid == u32::from_be_bytes(stream.signature)
                && row.channel == u64::from(stream.channel)
        });

        let name = row
            .map(|row| basename(&row.filename))
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("{stem}_{}", stream.channel), str::to_owned);

        let measured = stream
            .duration
            .filter(|&seconds| seconds > 0.0)
            .map(|seconds| (stream.extracted as f64 * 8.0 / seconds).round() as u64)
            .filter(|&bitrate| bitrate > 0);
        let avg_bitrate = measured
            .or_else(|| row.map(|row| row.avbps).filter(|&b| b > 0))
            .ok_or_else(|| {
                Error::Corrupt(format!(
                    "stream '{name}' has neither a duration nor a declared bitrate"
                ))
            })?;

        entries.push(EmbeddedEntry {
            name,
            path: String::new(),
            embedded_size: stream.embedded,
            extracted_size: stream.extracted,
            offset,
            extra_offset: stream.header_offset.unwrap_or(offset),
            kind: Some(stream.kind),
            avg_bitrate: Some(avg_bitrate),
        });
        spans.push(stream.spans);
    }

    debug!(
        streams = entries.len(),
        directory_rows = directory.len(),
        "demuxed USM"
    );
    Ok(Demuxed { entries, spans })
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

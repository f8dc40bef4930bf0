//! Container format detection.
//!
//! Signatures win over extensions. The probe opens its own handle, so it
//! never disturbs a reader that is parsing the same file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::Result;

/// Bytes read from the start of a file when probing.
pub const PROBE_SIZE: usize = 16;

/// Container kinds the detector can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum FileType {
    /// CRIWare CPK resource pack
    CriPack,
    /// CRIWare USM movie
    CriStream,
    /// PlatinumGames DAT archive
    PgDat,
    /// Wwise audio bank or stream, recognised but not handled
    Wwise,
    /// DirectDraw surface, recognised but not handled
    Dds,
    Unsupported,
}

impl FileType {
    /// Whether a reader exists for this kind.
    pub const fn is_supported(self) -> bool {
        matches!(self, Self::CriPack | Self::CriStream | Self::PgDat)
    }

    /// Known kinds without a reader.
    pub const fn is_placeholder(self) -> bool {
        matches!(self, Self::Wwise | Self::Dds)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::CriPack => "CRIWare CPK pack",
            Self::CriStream => "CRIWare USM stream",
            Self::PgDat => "PlatinumGames DAT",
            Self::Wwise => "Wwise audio",
            Self::Dds => "DDS texture",
            Self::Unsupported => "unsupported",
        })
    }
}

/// Classify a file by its first bytes, then by extension.
pub fn detect(path: impl AsRef<Path>) -> Result<FileType> {
    let path = path.as_ref();
    let mut header = Vec::with_capacity(PROBE_SIZE);
    File::open(path)?
        .take(PROBE_SIZE as u64)
        .read_to_end(&mut header)?;

    Ok(match detect_bytes(&header) {
        FileType::Unsupported => detect_extension(path),
        found => found,
    })
}

/// Classify by signature alone.
pub fn detect_bytes(header: &[u8]) -> FileType {
    match header.get(..4) {
        Some(b"CPK ") => FileType::CriPack,
        Some(b"CRID") => FileType::CriStream,
        Some(b"DAT\0") => FileType::PgDat,
        Some(b"DDS ") => FileType::Dds,
        Some(b"RIFF" | b"RIFX") if header.get(8..12) == Some(&b"WAVE"[..]) => FileType::Wwise,
        _ => FileType::Unsupported,
    }
}

/// Classify by extension alone, case-insensitively.
pub fn detect_extension(path: &Path) -> FileType {
    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
        return FileType::Unsupported;
    };

    match extension.to_ascii_lowercase().as_str() {
        "cpk" => FileType::CriPack,
        "usm" => FileType::CriStream,
        "dat" | "dtt" | "evn" | "eff" => FileType::PgDat,
        "wem" | "wsp" | "bnk" => FileType::Wwise,
        "dds" => FileType::Dds,
        _ => FileType::Unsupported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures() {
        assert_eq!(detect_bytes(b"CPK \xff\0\0\0"), FileType::CriPack);
        assert_eq!(detect_bytes(b"CRID\0\0\0\x18"), FileType::CriStream);
        assert_eq!(detect_bytes(b"DAT\0\x02\0\0\0"), FileType::PgDat);
        assert_eq!(detect_bytes(b"DDS |\0\0\0"), FileType::Dds);
        assert_eq!(detect_bytes(b"RIFX\0\0\0\0WAVEfmt "), FileType::Wwise);
        assert_eq!(detect_bytes(b"RIFF\0\0\0\0AVI "), FileType::Unsupported);
        assert_eq!(detect_bytes(b"CP"), FileType::Unsupported);
    }

    #[test]
    fn test_extensions() {
        assert_eq!(detect_extension(Path::new("a/b.CPK")), FileType::CriPack);
        assert_eq!(detect_extension(Path::new("movie.usm")), FileType::CriStream);
        assert_eq!(detect_extension(Path::new("pl0000.dtt")), FileType::PgDat);
        assert_eq!(detect_extension(Path::new("bgm.wsp")), FileType::Wwise);
        assert_eq!(detect_extension(Path::new("readme")), FileType::Unsupported);
        assert_eq!(detect_extension(Path::new("notes.txt")), FileType::Unsupported);
    }

    #[test]
    fn test_signature_beats_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("misnamed.usm");
        std::fs::write(&path, b"DAT\0\0\0\0\0").unwrap();
        assert_eq!(detect(&path).unwrap(), FileType::PgDat);

        let path = dir.path().join("unknown.evn");
        std::fs::write(&path, b"??").unwrap();
        assert_eq!(detect(&path).unwrap(), FileType::PgDat);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            detect(dir.path().join("nope.cpk")),
            Err(crate::Error::Io(_))
        ));
    }
}

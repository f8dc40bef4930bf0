//! Opened containers and the session that owns the current one.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use nao_common::{ChunkedCopy, ContainerIndex, EmbeddedEntry};
use nao_cri::CriArchive;
use nao_dat::DatArchive;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::detect::{detect, FileType};
use crate::{Error, Result};

/// Format-specific reader behind a [`Container`].
#[derive(Debug)]
pub enum Reader {
    Cri(CriArchive),
    Dat(DatArchive),
}

impl Reader {
    pub fn index(&self) -> &ContainerIndex {
        match self {
            Self::Cri(archive) => archive.index(),
            Self::Dat(archive) => archive.index(),
        }
    }

    fn extract_at(&self, index: usize) -> Result<Vec<u8>> {
        Ok(match self {
            Self::Cri(archive) => archive.extract_at(index)?,
            Self::Dat(archive) => archive.extract_at(index)?,
        })
    }

    fn extract_to<W: Write + ?Sized>(
        &self,
        index: usize,
        sink: &mut W,
        copy: &ChunkedCopy<'_>,
    ) -> Result<u64> {
        Ok(match self {
            Self::Cri(archive) => archive.extract_to(index, sink, copy)?,
            Self::Dat(archive) => archive.extract_to(index, sink, copy)?,
        })
    }
}

/// Held while an extraction runs against a container.
pub(crate) type JobGuard<'a> = MutexGuard<'a, ()>;

/// One opened container file.
///
/// Only one extraction may run at a time; a second one fails with
/// [`Error::Busy`] instead of waiting.
#[derive(Debug)]
pub struct Container {
    file_type: FileType,
    reader: Reader,
    job: Mutex<()>,
}

impl Container {
    /// Detect the format of `path` and parse its directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_type = detect(path)?;
        debug!(path = %path.display(), %file_type, "detected container format");

        let reader = match file_type {
            FileType::CriPack | FileType::CriStream => Reader::Cri(CriArchive::open(path)?),
            FileType::PgDat => Reader::Dat(DatArchive::open(path)?),
            FileType::Wwise | FileType::Dds => {
                return Err(Error::UnsupportedFormat(format!(
                    "{file_type} files are recognised but not supported"
                )));
            }
            FileType::Unsupported => {
                return Err(Error::UnsupportedFormat(format!(
                    "'{}' matches no known container",
                    path.display()
                )));
            }
        };

        Ok(Self {
            file_type,
            reader,
            job: Mutex::new(()),
        })
    }

    #[inline]
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    #[inline]
    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    #[inline]
    pub fn index(&self) -> &ContainerIndex {
        self.reader.index()
    }

    #[inline]
    pub fn entries(&self) -> &[EmbeddedEntry] {
        self.index().entries()
    }

    /// `true` for multi-file packs, `false` for demuxed streams.
    #[inline]
    pub fn is_pack(&self) -> bool {
        self.index().is_pack()
    }

    #[inline]
    pub fn origin_path(&self) -> &Path {
        self.index().origin_path()
    }

    pub fn entry(&self, index: usize) -> Result<&EmbeddedEntry> {
        self.index().get(index).ok_or(Error::EntryOutOfRange(index))
    }

    /// Whether an extraction currently holds this container.
    pub fn is_busy(&self) -> bool {
        self.job.is_locked()
    }

    pub(crate) fn begin_job(&self) -> Result<JobGuard<'_>> {
        self.job.try_lock().ok_or(Error::Busy)
    }

    /// Read one entry into memory. The buffer is exactly
    /// `extracted_size` bytes long.
    pub fn extract_at(&self, index: usize) -> Result<Vec<u8>> {
        let _job = self.begin_job()?;
        self.reader.extract_at(index)
    }

    /// Stream one entry to `sink` through `copy`.
    pub fn extract_to<W: Write + ?Sized>(
        &self,
        index: usize,
        sink: &mut W,
        copy: &ChunkedCopy<'_>,
    ) -> Result<u64> {
        let _job = self.begin_job()?;
        self.reader.extract_to(index, sink, copy)
    }

    /// Copy without taking the job guard; the caller must hold it.
    pub(crate) fn copy_entry<W: Write + ?Sized>(
        &self,
        _job: &JobGuard<'_>,
        index: usize,
        sink: &mut W,
        copy: &ChunkedCopy<'_>,
    ) -> Result<u64> {
        self.reader.extract_to(index, sink, copy)
    }
}

/// Owns the currently open container, if any.
///
/// Loading a new file replaces the previous container wholesale; the old
/// file is released once the last running job drops its handle.
#[derive(Debug, Default)]
pub struct Session {
    current: Option<Arc<Container>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` and make it the current container.
    ///
    /// On failure the previously open container stays current.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<Arc<Container>> {
        let container = Arc::new(Container::open(path)?);
        info!(
            path = %container.origin_path().display(),
            entries = container.entries().len(),
            "loaded container"
        );
        self.current = Some(Arc::clone(&container));
        Ok(container)
    }

    pub fn current(&self) -> Option<&Arc<Container>> {
        self.current.as_ref()
    }

    /// Drop the current container.
    pub fn close(&mut self) -> Option<Arc<Container>> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nao_cri::fixtures::CpkBuilder;
    use nao_dat::fixtures::DatBuilder;

    #[test]
    fn test_open_dispatches_on_signature() {
        let dir = tempfile::tempdir().unwrap();

        let cpk = dir.path().join("a.bin");
        std::fs::write(&cpk, CpkBuilder::new().file("", "x", b"x").build()).unwrap();
        let container = Container::open(&cpk).unwrap();
        assert_eq!(container.file_type(), FileType::CriPack);
        assert!(matches!(container.reader(), Reader::Cri(_)));

        let dat = dir.path().join("b.bin");
        std::fs::write(&dat, DatBuilder::new().file("y", b"y").build()).unwrap();
        let container = Container::open(&dat).unwrap();
        assert_eq!(container.file_type(), FileType::PgDat);
        assert_eq!(container.extract_at(0).unwrap(), b"y");
    }

    #[test]
    fn test_placeholders_are_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.bnk");
        std::fs::write(&path, b"BKHD").unwrap();

        assert!(matches!(
            Container::open(&path),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_busy_while_guard_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.dat");
        std::fs::write(&path, DatBuilder::new().file("z", b"z").build()).unwrap();
        let container = Container::open(&path).unwrap();

        let guard = container.begin_job().unwrap();
        assert!(container.is_busy());
        assert!(matches!(container.extract_at(0), Err(Error::Busy)));
        drop(guard);

        assert!(!container.is_busy());
        assert_eq!(container.extract_at(0).unwrap(), b"z");
    }

    #[test]
    fn test_session_keeps_previous_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.dat");
        std::fs::write(&good, DatBuilder::new().file("a", b"a").build()).unwrap();
        let bad = dir.path().join("bad.txt");
        std::fs::write(&bad, b"nothing").unwrap();

        let mut session = Session::new();
        let first = session.load(&good).unwrap();
        assert!(session.load(&bad).is_err());
        assert!(Arc::ptr_eq(session.current().unwrap(), &first));

        session.close();
        assert!(session.current().is_none());
    }
}

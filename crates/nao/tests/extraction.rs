//! End-to-end extraction over synthetic CPK, USM and DAT files.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};

use nao::cri::fixtures::{CpkBuilder, UsmBuilder, UsmStream};
use nao::dat::fixtures::DatBuilder;
use nao::prelude::*;
use nao::naming::sanitize;

use common::{pattern, sample_cpk, sample_usm, tree_size, truncated_crilayla, write};

fn extract_all(container: &Container, root: &std::path::Path) -> nao::Result<BulkSummary> {
    container.extract_all(
        root,
        &ExtractOptions::default(),
        &SilentProgress,
        &CancelToken::new(),
    )
}

#[test]
fn test_extract_at_matches_extracted_size() {
    let dir = tempfile::tempdir().unwrap();
    let (usm, _, _) = sample_usm();
    let paths = [
        write(dir.path(), "pack.cpk", &sample_cpk()),
        write(dir.path(), "movie.usm", &usm),
        write(
            dir.path(),
            "archive.dat",
            &DatBuilder::new().file("a.wmb", &[1; 33]).file("b.wtp", &[2; 7]).build(),
        ),
    ];

    for path in &paths {
        let container = Container::open(path).unwrap();
        for (i, entry) in container.entries().iter().enumerate() {
            let data = container.extract_at(i).unwrap();
            assert_eq!(data.len() as u64, entry.extracted_size, "{}", entry.name);
        }
    }
}

#[test]
fn test_bulk_writes_every_extracted_byte() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "pack.cpk", &sample_cpk());
    let container = Container::open(&path).unwrap();
    let root = dir.path().join("out");

    let summary = extract_all(&container, &root).unwrap();

    let (embedded, extracted) = container.index().totals();
    assert_eq!(summary.entries, container.entries().len());
    assert_eq!(summary.bytes_read, embedded);
    assert_eq!(summary.bytes_written, extracted);
    assert_eq!(tree_size(&root.join("pack.cpk")), (3, extracted));

    let base = root.join("pack.cpk");
    assert_eq!(
        std::fs::read(base.join("readme.txt")).unwrap(),
        b"plain uncompressed entry"
    );
    assert_eq!(
        std::fs::read(base.join("data").join("maps").join("stage01.bin")).unwrap(),
        vec![0x42; 300]
    );
    assert_eq!(
        std::fs::read(base.join("data").join("script.bin")).unwrap(),
        pattern(0x400)
    );
}

#[test]
fn test_uncompressed_entry_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let raw = sample_cpk();
    let path = write(dir.path(), "pack.cpk", &raw);
    let container = Container::open(&path).unwrap();

    let (i, entry) = container
        .entries()
        .iter()
        .enumerate()
        .find(|(_, e)| e.name == "stage01.bin")
        .unwrap();
    assert!(!entry.is_compressed());

    let reference = std::fs::read(&path).unwrap();
    let start = entry.offset as usize;
    let expected = &reference[start..start + entry.extracted_size as usize];

    let mut out = Vec::new();
    container
        .extract_entry(
            i,
            &mut out,
            &ExtractOptions::default(),
            &SilentProgress,
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(out, expected);
}

#[test]
fn test_pack_and_stream_properties() {
    let dir = tempfile::tempdir().unwrap();
    let pack = Container::open(write(dir.path(), "pack.cpk", &sample_cpk())).unwrap();
    assert!(pack.is_pack());
    assert!(pack.entries().iter().any(|e| !e.path.is_empty()));
    assert!(pack
        .entries()
        .iter()
        .any(|e| e.compression_ratio().is_some_and(|r| r < 1.0)));
    assert!(pack.entries().iter().all(|e| e.kind.is_none()));

    let (usm, _, _) = sample_usm();
    let stream = Container::open(write(dir.path(), "movie.usm", &usm)).unwrap();
    assert!(!stream.is_pack());
    assert_eq!(stream.file_type(), FileType::CriStream);
    for entry in stream.entries() {
        assert!(entry.kind.is_some());
        assert!(entry.avg_bitrate.is_some_and(|b| b > 0));
        assert!(entry.duration().is_some());
    }
}

#[test]
fn test_stream_bulk_is_flat_with_kind_extensions() {
    let dir = tempfile::tempdir().unwrap();
    let (usm, video, audio) = sample_usm();
    let container = Container::open(write(dir.path(), "movie.usm", &usm)).unwrap();
    let root = dir.path().join("out");

    extract_all(&container, &root).unwrap();

    let base = root.join("movie.usm");
    assert_eq!(std::fs::read(base.join("movie.m2v")).unwrap(), video.payload());
    assert_eq!(std::fs::read(base.join("movie.adx")).unwrap(), audio.payload());
    assert_eq!(tree_size(&base).0, 2);
}

#[test]
fn test_same_named_streams_get_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let left = UsmStream::audio("voice.wav", vec![vec![1; 50]]);
    let right = UsmStream::audio("voice.wav", vec![vec![2; 100]]).channel(1);
    let usm = UsmBuilder::new("voice.usm")
        .stream(left.clone())
        .stream(right.clone())
        .build();
    let container = Container::open(write(dir.path(), "voice.usm", &usm)).unwrap();

    for overwrite in [false, true] {
        let root = dir.path().join(format!("out-{overwrite}"));
        let options = ExtractOptions::default().with_overwrite(overwrite);
        let summary = container
            .extract_all(&root, &options, &SilentProgress, &CancelToken::new())
            .unwrap();

        assert!(summary.is_complete());
        assert_eq!(summary.entries, 2);
        let base = root.join("voice.usm");
        assert_eq!(tree_size(&base), (2, summary.bytes_written));
        assert_eq!(std::fs::read(base.join("voice.adx")).unwrap(), left.payload());
        assert_eq!(std::fs::read(base.join("voice_1.adx")).unwrap(), right.payload());
    }
}

#[test]
fn test_names_that_sanitize_alike_do_not_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let cpk = CpkBuilder::new()
        .file("", "a:b", b"first")
        .file("", "a_b", b"second")
        .build();
    let container = Container::open(write(dir.path(), "alike.cpk", &cpk)).unwrap();
    let root = dir.path().join("out");

    let summary = extract_all(&container, &root).unwrap();

    assert!(summary.is_complete());
    let base = root.join("alike.cpk");
    assert_eq!(std::fs::read(base.join("a_b")).unwrap(), b"first");
    assert_eq!(std::fs::read(base.join("a_b_1")).unwrap(), b"second");
}

#[test]
fn test_dat_bulk_produces_one_file_per_record() {
    let dir = tempfile::tempdir().unwrap();
    let sizes = [17usize, 1, 4096, 250, 33];
    let mut builder = DatBuilder::new();
    for (i, size) in sizes.iter().enumerate() {
        builder = builder.file(&format!("file{i}.bin"), &vec![i as u8; *size]);
    }
    let container = Container::open(write(dir.path(), "pl0000.dat", &builder.build())).unwrap();

    let offsets: Vec<_> = container.entries().iter().map(|e| e.offset).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));

    let root = dir.path().join("out");
    let summary = extract_all(&container, &root).unwrap();

    let declared: u64 = sizes.iter().map(|&s| s as u64).sum();
    assert_eq!(summary.entries, sizes.len());
    assert_eq!(tree_size(&root.join("pl0000.dat")), (sizes.len(), declared));
}

#[test]
fn test_names_are_sanitized_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cpk = CpkBuilder::new().file("", "a:b/c", b"odd name").build();
    let container = Container::open(write(dir.path(), "odd.cpk", &cpk)).unwrap();
    let root = dir.path().join("out");

    extract_all(&container, &root).unwrap();

    assert_eq!(sanitize("a:b/c"), "a_b_c");
    assert_eq!(
        std::fs::read(root.join("odd.cpk").join("a_b_c")).unwrap(),
        b"odd name"
    );
}

#[test]
fn test_truncated_compressed_entry_fails() {
    let dir = tempfile::tempdir().unwrap();
    let content = pattern(0x200);
    let cpk = CpkBuilder::new()
        .file("", "good.bin", b"fine")
        .raw("", "broken.bin", truncated_crilayla(&content), content.len() as u64)
        .build();
    let container = Container::open(write(dir.path(), "broken.cpk", &cpk)).unwrap();

    assert!(matches!(
        container.extract_at(1),
        Err(Error::DecompressionFailure(_))
    ));

    let root = dir.path().join("out");
    let summary = extract_all(&container, &root).unwrap();
    assert_eq!(summary.entries, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].index, 1);
    assert!(!root.join("broken.cpk").join("broken.bin").exists());
    assert!(root.join("broken.cpk").join("good.bin").exists());
}

#[test]
fn test_abort_policy_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let content = pattern(0x200);
    let cpk = CpkBuilder::new()
        .raw("", "broken.bin", truncated_crilayla(&content), content.len() as u64)
        .file("", "never.bin", b"skipped")
        .build();
    let container = Container::open(write(dir.path(), "abort.cpk", &cpk)).unwrap();
    let root = dir.path().join("out");

    let options = ExtractOptions::default().with_error_policy(ErrorPolicy::Abort);
    let result = container.extract_all(&root, &options, &SilentProgress, &CancelToken::new());

    assert!(matches!(result, Err(Error::DecompressionFailure(_))));
    assert!(!root.join("abort.cpk").join("never.bin").exists());
}

/// Counts bytes and cancels once `limit` bytes of an entry were written.
struct CancelAfter {
    cancel: CancelToken,
    limit: u64,
    seen: AtomicU64,
}

impl ExtractProgress for CancelAfter {
    fn bytes(&self, current: u64, _total: u64) {
        self.seen.store(current, Ordering::SeqCst);
        if current >= self.limit {
            self.cancel.cancel();
        }
    }
}

#[test]
fn test_cancel_removes_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let data = DatBuilder::new().file("big.bin", &vec![7; 64 * 1024]).build();
    let container = Container::open(write(dir.path(), "big.dat", &data)).unwrap();
    let root = dir.path().join("out");

    let cancel = CancelToken::new();
    let progress = CancelAfter {
        cancel: cancel.clone(),
        limit: 4096,
        seen: AtomicU64::new(0),
    };
    let options = ExtractOptions::default().with_chunk_size(1024);

    let result = container.extract_all(&root, &options, &progress, &cancel);

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(progress.seen.load(Ordering::SeqCst), 4096);
    assert!(!root.join("big.dat").join("big.bin").exists());
    assert!(!container.is_busy());
}

#[test]
fn test_unsupported_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "notes.txt", b"just text");

    assert_eq!(detect(&path).unwrap(), FileType::Unsupported);
    assert!(matches!(
        Container::open(&path),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_corrupt_container_never_opens() {
    let dir = tempfile::tempdir().unwrap();
    let mut cpk = sample_cpk();
    cpk.truncate(cpk.len() / 2);

    assert!(matches!(
        Container::open(write(dir.path(), "cut.cpk", &cpk)),
        Err(Error::CorruptContainer(_))
    ));
}

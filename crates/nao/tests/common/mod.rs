//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use nao::cri::crilayla::PREFIX_SIZE;
use nao::cri::fixtures::{crilayla_literals, CpkBuilder, UsmBuilder, UsmStream};

/// Repetitive content that compresses well.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| b"nao archive "[i % 12]).collect()
}

pub fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// A pack with a root file, a nested file and a compressed file.
pub fn sample_cpk() -> Vec<u8> {
    CpkBuilder::new()
        .file("", "readme.txt", b"plain uncompressed entry")
        .file("data/maps", "stage01.bin", &[0x42; 300])
        .compressed("data", "script.bin", &pattern(0x400))
        .build()
}

pub fn sample_usm() -> (Vec<u8>, UsmStream, UsmStream) {
    let video = UsmStream::video("movie.avi", vec![vec![1; 200], vec![2; 123], vec![3; 77]]);
    let audio = UsmStream::audio("movie.wav", vec![vec![4; 64], vec![5; 64]]);
    let usm = UsmBuilder::new("movie.usm")
        .stream(video.clone())
        .stream(audio.clone())
        .build();
    (usm, video, audio)
}

/// A CRILAYLA payload whose bit stream lost its first bytes.
pub fn truncated_crilayla(content: &[u8]) -> Vec<u8> {
    assert!(content.len() > PREFIX_SIZE + 8);
    let full = crilayla_literals(content);
    let stream_size = u32::from_le_bytes(full[12..16].try_into().unwrap()) as usize;

    let mut out = full[..12].to_vec();
    out.extend_from_slice(&((stream_size - 4) as u32).to_le_bytes());
    out.extend_from_slice(&full[0x10 + 4..]);
    out
}

/// Total size of all files below `dir`, and their count.
pub fn tree_size(dir: &Path) -> (usize, u64) {
    let mut count = 0;
    let mut size = 0;
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let meta = entry.metadata().unwrap();
        if meta.is_dir() {
            let (c, s) = tree_size(&entry.path());
            count += c;
            size += s;
        } else {
            count += 1;
            size += meta.len();
        }
    }
    (count, size)
}

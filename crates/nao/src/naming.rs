//! Output names and destination paths.

use std::path::{Path, PathBuf};

use nao_common::{ContainerIndex, EmbeddedEntry};
use rustc_hash::FxHashSet;

/// Characters that may not appear in an output path component.
pub const ILLEGAL_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Replacement for illegal characters.
pub const SUBSTITUTE: char = '_';

/// Make `name` usable as a single path component.
///
/// Illegal and control characters become [`SUBSTITUTE`]; empty, `.` and
/// `..` components are replaced entirely.
pub fn sanitize(name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| {
            if ILLEGAL_CHARS.contains(&c) || c.is_control() {
                SUBSTITUTE
            } else {
                c
            }
        })
        .collect();

    match clean.as_str() {
        "" | "." | ".." => SUBSTITUTE.to_string(),
        _ => clean,
    }
}

/// File name an entry is written under.
///
/// Stream entries take the extension of their payload kind, since their
/// names come from the source asset.
pub fn output_name(entry: &EmbeddedEntry) -> String {
    let name = match entry.kind {
        Some(kind) => match entry.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => format!("{stem}.{}", kind.extension()),
            _ => format!("{}.{}", entry.name, kind.extension()),
        },
        None => entry.name.clone(),
    };
    sanitize(&name)
}

/// Path of an entry below its container's output directory.
///
/// Pack entries keep their internal directories; stream entries are flat.
pub fn relative_path(entry: &EmbeddedEntry, is_pack: bool) -> PathBuf {
    let mut path = PathBuf::new();
    if is_pack {
        for component in entry.path.split(['/', '\\']).filter(|c| !c.is_empty()) {
            path.push(sanitize(component));
        }
    }
    path.push(output_name(entry));
    path
}

/// Output directory of a bulk job: `<root>/<container file name>`.
pub fn container_dir(root: &Path, index: &ContainerIndex) -> PathBuf {
    root.join(sanitize(index.origin_name()))
}

/// Output path of every entry of a bulk job, in index order:
/// `<root>/<container file name>/[<entry path>/]<output name>`.
///
/// Paths are compared case-insensitively. The first entry keeps its path;
/// later clashes get `_<n>` appended to the file stem.
pub fn destinations(root: &Path, index: &ContainerIndex) -> Vec<PathBuf> {
    let base = container_dir(root, index);
    let mut taken = FxHashSet::default();

    index
        .entries()
        .iter()
        .map(|entry| {
            let relative = relative_path(entry, index.is_pack());
            let mut candidate = relative.clone();
            let mut n = 1;
            while !taken.insert(path_key(&candidate)) {
                candidate = with_suffix(&relative, n);
                n += 1;
            }
            base.join(candidate)
        })
        .collect()
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// `dir/name.ext` -> `dir/name_<n>.ext`
fn with_suffix(path: &Path, n: usize) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

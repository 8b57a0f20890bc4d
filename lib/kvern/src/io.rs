use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref())
        .with_context(|| format!("create_dir_all {}", path.as_ref().display()))
}

/// Succeeds iff `path` exists and is a directory after the call. With
/// `create_if_missing` a missing path is created; an existing non-directory
/// is always an error.
pub fn validate_directory(path: impl AsRef<Path>, create_if_missing: bool) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        if path.is_dir() {
            return Ok(());
        }
        bail!("path exists but is not a directory: {}", path.display());
    }
    if create_if_missing {
        ensure_dir(path)
    } else {
        bail!("directory does not exist: {}", path.display());
    }
}

/// Regular files directly under `path` whose extension matches, sorted
/// lexicographically for determinism.
pub fn list_files(path: impl AsRef<Path>, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path.as_ref()).min_depth(1).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().map_or(false, |e| e == extension)
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// All lines of the file, terminators stripped.
pub fn read_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("open {}", path.as_ref().display()))?;
    let reader = BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line.with_context(|| format!("read {}", path.as_ref().display()))?);
    }
    Ok(lines)
}

pub fn open_writer(path: impl AsRef<Path>) -> Result<BufWriter<File>> {
    if let Some(parent) = path.as_ref().parent() {
        ensure_dir(parent)?;
    }
    let file = File::create(path.as_ref())
        .with_context(|| format!("create {}", path.as_ref().display()))?;
    Ok(BufWriter::new(file))
}

pub fn open_reader(path: impl AsRef<Path>) -> Result<BufReader<File>> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("open {}", path.as_ref().display()))?;
    Ok(BufReader::new(file))
}

/// One `key: value\n` line per entry, ascending key order.
pub fn write_sorted_kv(path: impl AsRef<Path>, data: &BTreeMap<String, u64>) -> Result<()> {
    let mut writer = open_writer(path.as_ref())?;
    for (key, value) in data {
        writeln!(writer, "{}: {}", key, value)
            .with_context(|| format!("write {}", path.as_ref().display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flush {}", path.as_ref().display()))
}

/// Parses `key: count` lines, trimming whitespace around both sides.
/// Malformed lines are skipped with a warning; blank lines are ignored.
pub fn read_kv_pairs(path: impl AsRef<Path>) -> Result<Vec<(String, u64)>> {
    let path = path.as_ref();
    let reader = open_reader(path)?;
    let mut pairs = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_kv_line(&line) {
            Some(pair) => pairs.push(pair),
            None => warn!(
                file = %path.display(),
                line = lineno + 1,
                content = %line,
                "skipping malformed intermediate line"
            ),
        }
    }
    Ok(pairs)
}

fn parse_kv_line(line: &str) -> Option<(String, u64)> {
    let (key, count) = line.split_once(':')?;
    let key = key.trim();
    let count = count.trim().parse::<u64>().ok()?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), count))
}

/// Creates (or truncates to) an empty file. Used for the success marker.
pub fn create_empty_file(path: impl AsRef<Path>) -> Result<()> {
    File::create(path.as_ref())
        .with_context(|| format!("create {}", path.as_ref().display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kv_line_accepts_trimmed_pairs() {
        assert_eq!(parse_kv_line("hello: 3"), Some(("hello".into(), 3)));
        assert_eq!(parse_kv_line("  spaced :  12  "), Some(("spaced".into(), 12)));
    }

    #[test]
    fn parse_kv_line_rejects_malformed() {
        assert_eq!(parse_kv_line("garbage-no-colon"), None);
        assert_eq!(parse_kv_line(": 3"), None);
        assert_eq!(parse_kv_line("word: notanumber"), None);
        assert_eq!(parse_kv_line("word: -1"), None);
    }

    #[test]
    fn list_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "x").unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs::write(dir.path().join("notes.md"), "x").unwrap();
        fs::create_dir(dir.path().join("sub.txt")).unwrap();
        let files = list_files(dir.path(), "txt").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn validate_directory_creates_only_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(validate_directory(&missing, false).is_err());
        validate_directory(&missing, true).unwrap();
        assert!(missing.is_dir());
        let file = dir.path().join("plain");
        fs::write(&file, "x").unwrap();
        assert!(validate_directory(&file, true).is_err());
    }

    #[test]
    fn write_and_read_round_trip_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut data = BTreeMap::new();
        data.insert("beta".to_string(), 2);
        data.insert("alpha".to_string(), 5);
        write_sorted_kv(&path, &data).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "alpha: 5\nbeta: 2\n");
        let pairs = read_kv_pairs(&path).unwrap();
        assert_eq!(pairs, vec![("alpha".into(), 5), ("beta".into(), 2)]);
    }
}

// src/ioutil.rs
//! Encoding detection and atomic I/O utilities. (spec component B)

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;

const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Text encoding detected for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf8Bom,
    /// Fallback single-byte legacy encoding (Latin-1-style passthrough);
    /// the crate does not ship a full codec table, it decodes byte-for-byte
    /// as Latin-1 which round-trips losslessly for the write path.
    Legacy,
}

impl Encoding {
    pub fn bom_bytes(self) -> &'static [u8] {
        match self {
            Encoding::Utf8Bom => &[0xEF, 0xBB, 0xBF],
            _ => &[],
        }
    }
}

/// Detect encoding by BOM, then by UTF-8 validity, then fall back to legacy.
pub fn detect_encoding(bytes: &[u8]) -> Encoding {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Encoding::Utf8Bom;
    }
    if std::str::from_utf8(bytes).is_ok() {
        return Encoding::Utf8;
    }
    Encoding::Legacy
}

fn decode_legacy(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn encode_legacy(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u32 as u8).collect()
}

/// Read a file's full contents, returning its text and detected encoding.
pub fn read_text(path: &Path) -> Result<(String, Encoding)> {
    let bytes = fs::read(path)?;
    let encoding = detect_encoding(&bytes);
    let text = match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(&bytes).into_owned(),
        Encoding::Utf8Bom => String::from_utf8_lossy(&bytes[3..]).into_owned(),
        Encoding::Legacy => decode_legacy(&bytes),
    };
    Ok((text, encoding))
}

/// Write `content` to `path` atomically: write to a sibling temp file, fsync,
/// then rename over the target. A successful call either fully replaces the
/// target or, on any I/O failure, leaves it unchanged.
pub fn safe_write(path: &Path, content: &str, encoding: Encoding) -> Result<()> {
    let mut bytes = encoding.bom_bytes().to_vec();
    match encoding {
        Encoding::Legacy => bytes.extend(encode_legacy(content)),
        Encoding::Utf8 | Encoding::Utf8Bom => bytes.extend(content.as_bytes()),
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = sibling_temp_path(path);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn sibling_temp_path(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_name = format!(".{}.nts-tmp-{}", file_name, std::process::id());
    path.with_file_name(temp_name)
}

/// CRC32C (Castagnoli) of a byte slice, used for LAT fingerprints and
/// external-change drift detection.
pub fn crc32c(bytes: &[u8]) -> u32 {
    crc32c::crc32c(bytes)
}

/// CRC32C over a specific inclusive 1-based line range of `text`.
pub fn crc32c_of_lines(text: &str, start_line: usize, end_line: usize) -> u32 {
    let slice = line_range_bytes(text, start_line, end_line);
    crc32c(slice.as_bytes())
}

/// Extract the exact byte range for 1-based inclusive lines `[start, end]`,
/// each line including its trailing newline if present in the source.
pub fn line_range_bytes(text: &str, start_line: usize, end_line: usize) -> String {
    let lines: Vec<&str> = split_keep_newlines(text);
    if start_line == 0 || start_line > lines.len() {
        return String::new();
    }
    let end = end_line.min(lines.len());
    lines[start_line - 1..end].concat()
}

/// Split text into lines that retain their newline terminator, so
/// concatenating all of them reproduces the original text exactly.
pub fn split_keep_newlines(text: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            result.push(&text[start..=i]);
            start = i + 1;
        }
    }
    if start < text.len() {
        result.push(&text[start..]);
    }
    result
}

pub fn line_count(text: &str) -> usize {
    split_keep_newlines(text).len()
}

/// Sniff the first 8 KiB of a file for a NUL byte, the conventional binary
/// marker.
pub fn is_binary(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; BINARY_SNIFF_BYTES];
    let n = file.read(&mut buf)?;
    Ok(buf[..n].contains(&0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn detects_plain_utf8() {
        assert_eq!(detect_encoding(b"hello"), Encoding::Utf8);
    }

    #[test]
    fn detects_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend(b"hello");
        assert_eq!(detect_encoding(&bytes), Encoding::Utf8Bom);
    }

    #[test]
    fn falls_back_to_legacy_on_invalid_utf8() {
        let bytes = [0xFF, 0xFE, 0x41];
        assert_eq!(detect_encoding(&bytes), Encoding::Legacy);
    }

    #[test]
    fn safe_write_is_atomic_and_readable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sub").join("file.txt");
        safe_write(&path, "hello\nworld\n", Encoding::Utf8).unwrap();
        let (text, encoding) = read_text(&path).unwrap();
        assert_eq!(text, "hello\nworld\n");
        assert_eq!(encoding, Encoding::Utf8);
    }

    #[test]
    fn safe_write_leaves_no_temp_file_behind() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.txt");
        safe_write(&path, "content", Encoding::Utf8).unwrap();
        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn crc32c_stable_for_same_bytes() {
        assert_eq!(crc32c(b"abc"), crc32c(b"abc"));
        assert_ne!(crc32c(b"abc"), crc32c(b"abd"));
    }

    #[test]
    fn line_range_bytes_extracts_exact_range() {
        let text = "a\nb\nc\nd\n";
        assert_eq!(line_range_bytes(text, 2, 3), "b\nc\n");
        assert_eq!(line_range_bytes(text, 1, 1), "a\n");
    }

    #[test]
    fn line_count_handles_missing_trailing_newline() {
        assert_eq!(line_count("a\nb\nc"), 3);
        assert_eq!(line_count("a\nb\nc\n"), 3);
        assert_eq!(line_count(""), 0);
    }

    #[test]
    fn is_binary_detects_nul_bytes() {
        let temp = TempDir::new().unwrap();
        let text_path = temp.path().join("text.txt");
        let bin_path = temp.path().join("bin.dat");
        fs::write(&text_path, "hello world").unwrap();
        fs::write(&bin_path, [0u8, 1, 2, 3]).unwrap();
        assert!(!is_binary(&text_path).unwrap());
        assert!(is_binary(&bin_path).unwrap());
    }
}

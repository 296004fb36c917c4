//! Line-delimited JSON files shared by the memory log and the state history.
//!
//! One record per line. A record is visible only once its terminating
//! newline is on disk, so readers skip an incomplete final line and
//! [`replay`] truncates one left behind by a crash.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Open (or create) a log file for appending, creating parent directories.
pub(crate) fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?)
}

/// Scan every complete record in `path`, calling `visit(offset, line, record)`.
///
/// A torn or unparsable final line is truncated away with a warning. An
/// unparsable line followed by more data is [`Error::Corrupt`]. Returns the
/// length of the valid prefix.
pub(crate) fn replay<T, F>(path: &Path, mut visit: F) -> Result<u64>
where
    T: DeserializeOwned,
    F: FnMut(u64, usize, T) -> Result<()>,
{
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut offset = 0u64;
    let mut line = 0usize;

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        line += 1;

        let complete = buf.last() == Some(&b'\n');
        let body = if complete { &buf[..n - 1] } else { &buf[..] };
        if complete && body.iter().all(u8::is_ascii_whitespace) {
            offset += n as u64;
            continue;
        }

        let parsed = if complete {
            serde_json::from_slice::<T>(body).map_err(|e| e.to_string())
        } else {
            Err("incomplete final line".to_string())
        };

        match parsed {
            Ok(record) => {
                visit(offset, line, record)?;
                offset += n as u64;
            }
            Err(reason) => {
                if !reader.fill_buf()?.is_empty() {
                    return Err(Error::Corrupt {
                        path: path.to_path_buf(),
                        line,
                        reason,
                    });
                }
                tracing::warn!(path = %path.display(), line, %reason, "truncating torn trailing record");
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(offset)?;
                file.sync_all()?;
                break;
            }
        }
    }

    Ok(offset)
}

/// Serialize records into one buffer, returning the byte length of each line.
pub(crate) fn encode<'a, T, I>(records: I) -> Result<(Vec<u8>, Vec<u64>)>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut buf = Vec::new();
    let mut lens = Vec::new();
    for record in records {
        let start = buf.len();
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
        lens.push((buf.len() - start) as u64);
    }
    Ok((buf, lens))
}

/// Write `buf` at the end of `file` in one call, syncing if asked.
///
/// On failure the file is cut back to `committed_len` so no partial line
/// survives, and [`Error::Write`] is returned.
pub(crate) fn append(
    file: &mut File,
    path: &Path,
    committed_len: u64,
    buf: &[u8],
    sync: bool,
) -> Result<()> {
    let result = file
        .write_all(buf)
        .and_then(|_| if sync { file.sync_data() } else { Ok(()) });

    if let Err(source) = result {
        if let Err(e) = file.set_len(committed_len) {
            tracing::error!(path = %path.display(), error = %e, "failed to truncate partial write");
        }
        return Err(Error::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Rec {
        n: u32,
    }

    fn collect(path: &Path) -> Result<(Vec<u32>, u64)> {
        let mut seen = Vec::new();
        let len = replay::<Rec, _>(path, |_, _, r| {
            seen.push(r.n);
            Ok(())
        })?;
        Ok((seen, len))
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (seen, len) = collect(&dir.path().join("nope.jsonl")).unwrap();
        assert!(seen.is_empty());
        assert_eq!(len, 0);
    }

    #[test]
    fn replay_truncates_incomplete_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "{\"n\":1}\n{\"n\":2}\n{\"n\":").unwrap();

        let (seen, len) = collect(&path).unwrap();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(len, 16);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
    }

    #[test]
    fn replay_truncates_garbled_final_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "{\"n\":1}\nnot json\n").unwrap();

        let (seen, _) = collect(&path).unwrap();
        assert_eq!(seen, vec![1]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"n\":1}\n");
    }

    #[test]
    fn replay_rejects_garbage_in_the_middle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "{\"n\":1}\nnot json\n{\"n\":3}\n").unwrap();

        match collect(&path) {
            Err(Error::Corrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn encode_reports_line_lengths() {
        let recs = [Rec { n: 1 }, Rec { n: 22 }];
        let (buf, lens) = encode(recs.iter()).unwrap();
        assert_eq!(lens, vec![8, 9]);
        assert_eq!(buf.len(), 17);
    }
}

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::transport::DownloadStream;

const CHUNK_SIZE: usize = 64 * 1024;

/// Streams `stream` into `target`.
///
/// Bytes land in a temporary file next to `target` which is renamed over it
/// only once the whole body arrived; on any error the temporary file is
/// removed and `target` is left untouched.
pub(crate) fn stream_to_file(
    url: &str,
    stream: DownloadStream,
    target: &Path,
    progress: bool,
) -> Result<PathBuf> {
    let pb = progress.then(|| progress_bar(stream.content_length));
    stream_with_progress(url, stream, target, pb.as_ref())
}

/// Like [`stream_to_file`]; `pb` is cleared on success and abandoned on failure.
fn stream_with_progress(
    url: &str,
    stream: DownloadStream,
    target: &Path,
    pb: Option<&ProgressBar>,
) -> Result<PathBuf> {
    let mut tmp = temp_file_for(target)?;
    debug!("Downloading {} to {}", url, target.display());

    let result = match copy_body(url, stream, &mut tmp, pb) {
        Ok(()) => persist(tmp, target),
        Err(e) => Err(e),
    };
    if let Some(pb) = pb {
        match &result {
            Ok(_) => pb.finish_and_clear(),
            Err(_) => pb.abandon(),
        }
    }
    result
}

fn copy_body(
    url: &str,
    stream: DownloadStream,
    tmp: &mut NamedTempFile,
    pb: Option<&ProgressBar>,
) -> Result<()> {
    let DownloadStream {
        content_length,
        mut reader,
    } = stream;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut downloaded: u64 = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::transport(url, e)),
        };
        tmp.write_all(&buf[..n])
            .map_err(|e| Error::io(format!("failed to write {}", tmp.path().display()), e))?;
        downloaded += n as u64;
        if let Some(pb) = pb {
            pb.inc(n as u64);
        }
    }

    match content_length {
        Some(expected) if downloaded < expected => Err(Error::transport(
            url,
            format!(
                "download truncated: received {} byte(s) out of {}",
                downloaded, expected
            ),
        )),
        _ => Ok(()),
    }
}

/// Writes `value` as JSON to `target` through the same temp-then-rename path.
pub(crate) fn write_json_file<T: Serialize>(value: &T, target: &Path) -> Result<PathBuf> {
    let mut tmp = temp_file_for(target)?;
    serde_json::to_writer(&mut tmp, value)
        .map_err(|e| Error::io(format!("failed to write {}", target.display()), e.into()))?;
    persist(tmp, target)
}

/// Reads a (small) download fully and parses it as JSON.
pub(crate) fn read_json(url: &str, stream: DownloadStream) -> Result<serde_json::Value> {
    let mut bytes = Vec::new();
    let mut reader = stream.reader;
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| Error::transport(url, e))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::unexpected(url, format!("invalid JSON: {}", e)))
}

fn temp_file_for(target: &Path) -> Result<NamedTempFile> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::io(format!("failed to create directory {}", parent.display()), e)
            })?;
            parent.to_path_buf()
        }
        _ => PathBuf::from("."),
    };
    tempfile::Builder::new()
        .prefix(".picterra-")
        .suffix(".part")
        .tempfile_in(&dir)
        .map_err(|e| Error::io(format!("failed to create a temporary file in {}", dir.display()), e))
}

fn persist(mut tmp: NamedTempFile, target: &Path) -> Result<PathBuf> {
    tmp.flush()
        .map_err(|e| Error::io(format!("failed to write {}", tmp.path().display()), e))?;
    tmp.persist(target)
        .map_err(|e| Error::io(format!("failed to move download to {}", target.display()), e.error))?;
    Ok(target.to_path_buf())
}

fn progress_bar(len: Option<u64>) -> ProgressBar {
    match len {
        Some(len) => {
            let pb = ProgressBar::new(len);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        None => ProgressBar::new_spinner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Yields `data` then fails, like a connection dropped mid-body.
    struct Dropping {
        data: Cursor<Vec<u8>>,
    }

    impl Read for Dropping {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            Ok(n)
        }
    }

    fn leftovers(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[test]
    fn progress_bar_is_abandoned_when_the_body_breaks() {
        let dir = tempfile::tempdir().unwrap();
        let pb = ProgressBar::hidden();
        pb.set_length(4096);
        let stream = DownloadStream {
            content_length: Some(4096),
            reader: Box::new(Dropping {
                data: Cursor::new(vec![7; 100]),
            }),
        };
        let res = stream_with_progress("https://blob/raster", stream, &dir.path().join("r.tif"), Some(&pb));
        assert!(res.is_err());
        assert!(pb.is_finished());
        assert_eq!(pb.position(), 100);

        let pb = ProgressBar::hidden();
        let stream = DownloadStream {
            content_length: Some(10),
            reader: Box::new(Cursor::new(vec![1; 4])),
        };
        let res = stream_with_progress("https://blob/raster", stream, &dir.path().join("r.tif"), Some(&pb));
        assert!(matches!(res, Err(Error::Transport { .. })));
        assert!(pb.is_finished());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn progress_bar_is_cleared_after_a_complete_download() {
        let dir = tempfile::tempdir().unwrap();
        let pb = ProgressBar::hidden();
        let stream = DownloadStream {
            content_length: Some(5),
            reader: Box::new(Cursor::new(b"hello".to_vec())),
        };
        stream_with_progress("https://blob/result", stream, &dir.path().join("r.json"), Some(&pb))
            .unwrap();
        assert!(pb.is_finished());
        assert_eq!(pb.position(), 5);
    }

    #[test]
    fn complete_download_is_renamed_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("result.geojson");
        let stream = DownloadStream {
            content_length: Some(5),
            reader: Box::new(Cursor::new(b"hello".to_vec())),
        };
        let path = stream_to_file("https://blob/result", stream, &target, false).unwrap();
        assert_eq!(path, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert_eq!(leftovers(&dir.path().join("nested")), vec![target]);
    }

    #[test]
    fn dropped_connection_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("raster.tif");
        let stream = DownloadStream {
            content_length: None,
            reader: Box::new(Dropping {
                data: Cursor::new(vec![7u8; 1000]),
            }),
        };
        let err = stream_to_file("https://blob/raster", stream, &target, false).unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(!target.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn short_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("raster.tif");
        let stream = DownloadStream {
            content_length: Some(10),
            reader: Box::new(Cursor::new(b"abc".to_vec())),
        };
        assert!(stream_to_file("https://blob/raster", stream, &target, false).is_err());
        assert!(!target.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn existing_target_survives_failed_download() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("raster.tif");
        std::fs::write(&target, b"previous").unwrap();
        let stream = DownloadStream {
            content_length: Some(100),
            reader: Box::new(Cursor::new(b"new".to_vec())),
        };
        assert!(stream_to_file("https://blob/raster", stream, &target, false).is_err());
        assert_eq!(std::fs::read(&target).unwrap(), b"previous");
    }

    #[test]
    fn json_is_written_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fc.geojson");
        write_json_file(&serde_json::json!({"type": "FeatureCollection"}), &target).unwrap();
        let text = std::fs::read_to_string(&target).unwrap();
        assert_eq!(text, r#"{"type":"FeatureCollection"}"#);
    }
}

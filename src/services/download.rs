//! Download trigger: file naming and the directory sink.

use super::resolve::image_extension;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::instrument;
use url::Url;

/// Characters replaced with `_` in file names taken from URLs.
const UNSAFE_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Attempts before giving up on finding a free file name.
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Saves committed payloads. Only called after the engine commits.
pub trait DownloadSink {
    /// Persists `bytes` under (a variant of) `filename`.
    ///
    /// Returns the path actually written.
    fn save(&self, bytes: &[u8], filename: &str) -> impl Future<Output = Result<PathBuf>>;
}

/// Derives file names for saved images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileNamer {
    /// Always use the generated `<host>_image_<n>_<timestamp>.<ext>` form.
    pub rename: bool,
}

impl FileNamer {
    /// Creates a namer.
    #[must_use]
    pub const fn new(rename: bool) -> Self {
        Self { rename }
    }

    /// File name for the `index`-th (1-based) image of a batch.
    ///
    /// Uses the generated form when renaming is on or the URL's last path
    /// segment has no extension; otherwise the sanitized last segment.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use imgdedup::services::FileNamer;
    ///
    /// let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
    /// let namer = FileNamer::new(true);
    /// assert_eq!(
    ///     namer.file_name("https://www.a.com/p/cat.png", 3, now),
    ///     "a.com_image_3_20240506T070809.png"
    /// );
    /// ```
    #[must_use]
    pub fn file_name(&self, url: &str, index: usize, now: DateTime<Utc>) -> String {
        let Ok(parsed) = Url::parse(url) else {
            return format!("image_{index}.jpg");
        };
        let last = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("");

        if self.rename || last.is_empty() || !last.contains('.') {
            let host = parsed.host_str().unwrap_or("");
            let host = host.strip_prefix("www.").unwrap_or(host);
            format!(
                "{host}_image_{index}_{}.{}",
                now.format("%Y%m%dT%H%M%S"),
                image_extension(url)
            )
        } else {
            last.replace(UNSAFE_FILENAME_CHARS, "_")
        }
    }
}

/// Writes payloads into a directory, never overwriting.
///
/// A taken name gets a numeric suffix: `cat.png`, `cat-1.png`, `cat-2.png`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Creates a sink writing into `dir` (created on first save).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadSink for DirectorySink {
    #[instrument(skip(self, bytes), fields(dir = %self.dir.display(), size = bytes.len()))]
    async fn save(&self, bytes: &[u8], filename: &str) -> Result<PathBuf> {
        let name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("unusable file name: {filename:?}")))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_failed("create_output_dir", &self.dir, &e))?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = self.dir.join(numbered(name, attempt));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let file = match opened {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_failed("create_image_file", &path, &e)),
            };
            write_or_discard(file, &path, bytes).await?;
            tracing::debug!(path = %path.display(), "Saved image");
            return Ok(path);
        }

        Err(Error::OperationFailed {
            operation: "create_image_file".to_string(),
            cause: format!("no free name for {name} in {}", self.dir.display()),
        })
    }
}

/// Writes `bytes` to the file just created at `path`. A failed write
/// removes the file so no truncated image keeps the claimed name.
async fn write_or_discard<W>(mut out: W, path: &Path, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        out.write_all(bytes).await?;
        out.flush().await
    }
    .await;
    let Err(e) = written else {
        return Ok(());
    };

    drop(out);
    if let Err(remove) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %remove, "Failed to remove partial image file");
    }
    Err(io_failed("write_image_file", path, &e))
}

fn numbered(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{attempt}.{ext}"),
        _ => format!("{name}-{attempt}"),
    }
}

fn io_failed(operation: &str, path: &Path, e: &std::io::Error) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("{}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use test_case::test_case;

    /// Accepts nothing, like a full disk.
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::other("no space left on device")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test_case(false, "https://a.com/p/cat.png", "cat.png" ; "keeps url name")]
    #[test_case(false, "https://a.com/p/a%3Ab.png", "a%3Ab.png" ; "encoded stays encoded")]
    #[test_case(false, "https://www.a.com/p/", "a.com_image_7_20240102T030405.jpg" ; "empty segment")]
    #[test_case(false, "https://a.com/p/photo", "a.com_image_7_20240102T030405.jpg" ; "no extension")]
    #[test_case(true, "https://www.b.org/x/y.webp?w=1", "b.org_image_7_20240102T030405.webp" ; "rename")]
    #[test_case(true, "::not a url::", "image_7.jpg" ; "unparseable")]
    fn test_file_name(rename: bool, url: &str, expected: &str) {
        assert_eq!(FileNamer::new(rename).file_name(url, 7, fixed_now()), expected);
    }

    #[test]
    fn test_numbered_names() {
        assert_eq!(numbered("cat.png", 0), "cat.png");
        assert_eq!(numbered("cat.png", 2), "cat-2.png");
        assert_eq!(numbered(".hidden", 1), ".hidden-1");
        assert_eq!(numbered("noext", 1), "noext-1");
    }

    #[tokio::test]
    async fn test_directory_sink_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("out"));

        let first = sink.save(b"one", "cat.png").await.unwrap();
        let second = sink.save(b"two", "cat.png").await.unwrap();

        assert_eq!(first.file_name().unwrap(), "cat.png");
        assert_eq!(second.file_name().unwrap(), "cat-1.png");
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_directory_sink_strips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());

        let path = sink.save(b"x", "../../escape.png").await.unwrap();
        assert_eq!(path, dir.path().join("escape.png"));
        assert!(sink.save(b"x", "..").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.png");
        std::fs::write(&path, b"").unwrap();

        let result = write_or_discard(FullDisk, &path, b"pixels").await;
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_successful_write_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.png");
        let file = tokio::fs::File::create(&path).await.unwrap();

        write_or_discard(file, &path, b"pixels").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"pixels");
    }
}

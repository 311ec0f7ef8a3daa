//! Polling reader for a log file another process is still appending to.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Reads complete lines appended after the point where the file was opened.
///
/// End of file is never treated as the end of the stream: the reader sleeps
/// for `poll_interval` and tries again until a line arrives or it is cancelled.
/// A trailing line without its newline is held back until the writer finishes it.
pub struct LogTail {
    path: PathBuf,
    reader: BufReader<File>,
    pending: Vec<u8>,
    poll_interval: Duration,
}

impl LogTail {
    /// Open `path` positioned at its current end.
    ///
    /// A missing file is retried every `poll_interval`, up to `retries` times.
    /// Returns `Ok(None)` if cancelled while waiting.
    pub async fn open(
        path: &Path,
        poll_interval: Duration,
        retries: u32,
        cancel: &CancellationToken,
    ) -> std::io::Result<Option<Self>> {
        let mut attempt = 0u32;
        let mut file = loop {
            match File::open(path).await {
                Ok(file) => break file,
                Err(e) if e.kind() == ErrorKind::NotFound && attempt < retries => {
                    attempt += 1;
                    debug!(path = %path.display(), attempt, "Log file not created yet, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        };

        file.seek(SeekFrom::End(0)).await?;

        Ok(Some(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            pending: Vec::new(),
            poll_interval,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next complete line without its line ending, or `Ok(None)` once cancelled.
    pub async fn next_line(
        &mut self,
        cancel: &CancellationToken,
    ) -> std::io::Result<Option<String>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            self.reader.read_until(b'\n', &mut self.pending).await?;
            if self.pending.last() == Some(&b'\n') {
                let line = String::from_utf8_lossy(&self.pending)
                    .trim_end_matches(|c: char| c == '\n' || c == '\r')
                    .to_string();
                self.pending.clear();
                return Ok(Some(line));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(10);

    fn append(path: &Path, data: &str) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
        file.write_all(data.as_bytes())?;
        file.flush()
    }

    #[tokio::test]
    async fn test_skips_existing_content() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rclone.log");
        std::fs::write(&path, "old line 1\nold line 2\n")?;

        let cancel = CancellationToken::new();
        let mut tail = LogTail::open(&path, POLL, 0, &cancel).await?.expect("opened");

        append(&path, "new line\n")?;
        assert_eq!(tail.next_line(&cancel).await?, Some("new line".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_waits_for_partial_line() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rclone.log");
        std::fs::write(&path, "")?;

        let cancel = CancellationToken::new();
        let mut tail = LogTail::open(&path, POLL, 0, &cancel).await?.expect("opened");

        append(&path, "first ha")?;
        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            append(&writer_path, "lf\r\nsecond\n")
        });

        assert_eq!(tail.next_line(&cancel).await?, Some("first half".to_string()));
        assert_eq!(tail.next_line(&cancel).await?, Some("second".to_string()));
        writer.await.expect("writer task")?;
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_while_idle() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rclone.log");
        std::fs::write(&path, "")?;

        let cancel = CancellationToken::new();
        let mut tail = LogTail::open(&path, POLL, 0, &cancel).await?.expect("opened");

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let line = tokio::time::timeout(Duration::from_secs(2), tail.next_line(&cancel))
            .await
            .expect("cancel observed promptly")?;
        assert_eq!(line, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_retries_until_created() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("late.log");

        let creator_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            std::fs::write(&creator_path, "")
        });

        let cancel = CancellationToken::new();
        let tail = LogTail::open(&path, POLL, 100, &cancel).await?;
        assert!(tail.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_after_retries() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let cancel = CancellationToken::new();

        let result = LogTail::open(&dir.path().join("never.log"), POLL, 2, &cancel).await;
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::NotFound));
        Ok(())
    }
}

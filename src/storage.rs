//! Filesystem helpers: upload persistence, collision-free naming, cleanup.
//!
//! Every run writes into freshly reserved paths. Reservation is done with
//! `create_dir` / `create_new`, which fail atomically on collision, so two
//! concurrent requests for `invoice.pdf` end up in `invoice` and `invoice_1`
//! without any locking.

use crate::error::InvoiceError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Subdirectory of the upload root that receives the raw PDFs.
pub const UPLOAD_SUBDIR: &str = "pdf";

/// Subdirectory of the upload root that receives the rendered pages.
pub const IMAGES_SUBDIR: &str = "pdf2img";

const MAX_SUFFIX: usize = 10_000;

/// Reduce a client-supplied name to a safe single path component.
///
/// Keeps ASCII letters, digits, `.`, `_` and `-`; whitespace becomes `_`;
/// leading and trailing dots/underscores are stripped so the result can
/// never be `..` or a hidden file. Falls back to `"document"`.
pub fn secure_filename(name: &str) -> String {
    // Only the last component of whatever path the client sent.
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");

    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
        } else if c.is_whitespace() {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches(|c: char| c == '.' || c == '_');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Candidate names: `name`, `name_1`, `name_2`, …
fn candidates(name: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(name.to_string()).chain((1..MAX_SUFFIX).map(move |n| format!("{name}_{n}")))
}

/// Create `root/name`, or the first free `root/name_N`, and return its path.
pub async fn reserve_unique_dir(root: &Path, name: &str) -> Result<PathBuf, InvoiceError> {
    fs::create_dir_all(root)
        .await
        .map_err(|e| InvoiceError::io(root, e))?;

    for candidate in candidates(name) {
        let path = root.join(&candidate);
        match fs::create_dir(&path).await {
            Ok(()) => {
                debug!("Reserved directory {}", path.display());
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(InvoiceError::io(path, e)),
        }
    }

    Err(InvoiceError::Internal(format!(
        "no free directory name for '{name}' under {}",
        root.display()
    )))
}

/// Create an empty file `dir/stem.ext` (or `dir/stem_N.ext`) and return its
/// path with the open handle.
pub async fn reserve_unique_file(
    dir: &Path,
    stem: &str,
    ext: &str,
) -> Result<(PathBuf, fs::File), InvoiceError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| InvoiceError::io(dir, e))?;

    for candidate in candidates(stem) {
        let path = dir.join(format!("{candidate}.{ext}"));
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(InvoiceError::io(path, e)),
        }
    }

    Err(InvoiceError::Internal(format!(
        "no free file name for '{stem}.{ext}' under {}",
        dir.display()
    )))
}

/// Write `bytes` through the handle of a reserved file. On failure the
/// reservation is removed so no truncated upload is left behind.
async fn fill_reserved<W>(path: &Path, mut out: W, bytes: &[u8]) -> Result<(), InvoiceError>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        out.write_all(bytes).await?;
        out.flush().await
    }
    .await;

    if let Err(e) = written {
        if let Err(rm) = fs::remove_file(path).await {
            warn!("Failed to remove partial upload {}: {}", path.display(), rm);
        }
        return Err(InvoiceError::io(path, e));
    }
    Ok(())
}

/// Split a client filename into a sanitised stem and lower-cased extension.
fn split_name(filename: &str) -> (String, Option<String>) {
    let safe = secure_filename(filename);
    match safe.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem.to_string(), Some(ext.to_ascii_lowercase()))
        }
        _ => (safe, None),
    }
}

/// Persist an uploaded PDF under `uploads_root/pdf/` and return its path.
///
/// Rejects empty uploads, extensions outside `allowed_exts`
/// (case-insensitive) and content without the `%PDF` signature.
pub async fn save_upload(
    bytes: &[u8],
    filename: &str,
    uploads_root: &Path,
    allowed_exts: &[String],
) -> Result<PathBuf, InvoiceError> {
    if filename.trim().is_empty() {
        return Err(InvoiceError::InvalidInput {
            reason: "uploaded file has no filename".into(),
        });
    }

    let (stem, ext) = split_name(filename);
    let ext = match ext {
        Some(ext) if allowed_exts.iter().any(|a| a.eq_ignore_ascii_case(&ext)) => ext,
        other => {
            return Err(InvoiceError::InvalidInput {
                reason: format!(
                    "extension {:?} is not allowed (allowed: {})",
                    other.unwrap_or_default(),
                    allowed_exts.join(", ")
                ),
            })
        }
    };

    if bytes.is_empty() {
        return Err(InvoiceError::InvalidInput {
            reason: format!("uploaded file '{filename}' is empty"),
        });
    }
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(InvoiceError::NotAPdf {
            file: filename.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }

    let dir = uploads_root.join(UPLOAD_SUBDIR);
    let (path, file) = reserve_unique_file(&dir, &stem, &ext).await?;
    fill_reserved(&path, file, bytes).await?;

    info!("Saved upload '{}' → {}", filename, path.display());
    Ok(path)
}

/// Remove files and directories, logging instead of failing.
pub async fn cleanup_paths(paths: &[PathBuf]) {
    for path in paths {
        let result = match fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
            Ok(_) => fs::remove_file(path).await,
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[test]
    fn secure_filename_strips_paths_and_specials() {
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("C:\\tmp\\My Invoice.pdf"), "My_Invoice.pdf");
        assert_eq!(secure_filename("..."), "document");
        assert_eq!(secure_filename("fäctura#1.pdf"), "fctura1.pdf");
        assert_eq!(secure_filename(".hidden"), "hidden");
    }

    /// Fails every write, like a disk that fills up mid-upload.
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::new(
                ErrorKind::Other,
                "No space left on device",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn directory_collision_gets_suffix() {
        let root = tempfile::tempdir().unwrap();
        let first = reserve_unique_dir(root.path(), "acme").await.unwrap();
        let second = reserve_unique_dir(root.path(), "acme").await.unwrap();
        let third = reserve_unique_dir(root.path(), "acme").await.unwrap();
        assert_eq!(first.file_name().unwrap(), "acme");
        assert_eq!(second.file_name().unwrap(), "acme_1");
        assert_eq!(third.file_name().unwrap(), "acme_2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_never_share_a_directory() {
        let root = tempfile::tempdir().unwrap();
        let tasks = (0..8).map(|_| {
            let root = root.path().to_path_buf();
            tokio::spawn(async move { reserve_unique_dir(&root, "scan").await })
        });

        let mut names: Vec<String> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"scan".to_string()));
    }

    #[tokio::test]
    async fn file_collision_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = reserve_unique_file(dir.path(), "inv", "pdf").await.unwrap();
        let (b, _) = reserve_unique_file(dir.path(), "inv", "pdf").await.unwrap();
        assert_eq!(a.file_name().unwrap(), "inv.pdf");
        assert_eq!(b.file_name().unwrap(), "inv_1.pdf");
    }

    #[tokio::test]
    async fn failed_write_releases_the_reservation() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _file) = reserve_unique_file(dir.path(), "bill", "pdf").await.unwrap();
        assert!(path.exists());

        let err = fill_reserved(&path, FullDisk, b"%PDF-1.7").await.unwrap_err();
        assert!(matches!(err, InvoiceError::Io { .. }));
        assert!(!path.exists());

        // The name is free again for the next upload.
        let (again, _) = reserve_unique_file(dir.path(), "bill", "pdf").await.unwrap();
        assert_eq!(again, path);
    }

    #[tokio::test]
    async fn save_upload_writes_pdf() {
        let root = tempfile::tempdir().unwrap();
        let allowed = vec!["pdf".to_string()];
        let path = save_upload(b"%PDF-1.7\n...", "March Bill.PDF", root.path(), &allowed)
            .await
            .unwrap();
        assert_eq!(path, root.path().join("pdf").join("March_Bill.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7\n...");
    }

    #[tokio::test]
    async fn save_upload_rejects_disallowed_extension() {
        let root = tempfile::tempdir().unwrap();
        let allowed = vec!["pdf".to_string()];
        let err = save_upload(b"%PDF-1.7", "bill.exe", root.path(), &allowed)
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn save_upload_rejects_non_pdf_bytes() {
        let root = tempfile::tempdir().unwrap();
        let allowed = vec!["pdf".to_string()];
        let err = save_upload(b"GIF89a", "bill.pdf", root.path(), &allowed)
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::NotAPdf { .. }));
        assert!(!root.path().join("pdf").join("bill.pdf").exists());
    }

    #[tokio::test]
    async fn cleanup_removes_files_and_dirs() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.pdf");
        let dir = root.path().join("pages");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("Page_01.png"), b"x").unwrap();

        cleanup_paths(&[file.clone(), dir.clone(), root.path().join("missing")]).await;

        assert!(!file.exists());
        assert!(!dir.exists());
    }
}

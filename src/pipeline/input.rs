//! Input resolution: turn a path, URL or uploaded file into a local PDF.
//!
//! The parser needs a file on disk. URLs are downloaded into a `TempDir`
//! that lives as long as the [`ResolvedInput`]. Uploads are written into the
//! configured upload directory under a sanitised name. Either way the `%PDF`
//! magic bytes are checked first, so a mislabelled file produces a clear
//! error instead of a parser crash.

use crate::error::RagError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// The resolved input — either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; PDF downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Whether the bytes start with the PDF magic number.
pub fn has_pdf_magic(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[..4] == PDF_MAGIC
}

/// Resolve a path or URL to a local PDF file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, RagError> {
    if input.trim().is_empty() {
        return Err(RagError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, RagError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(RagError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != PDF_MAGIC {
                return Err(RagError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(RagError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(RagError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, RagError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            RagError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            RagError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(RagError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let temp_dir = TempDir::new().map_err(|e| RagError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| RagError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if bytes.len() >= 4 && !has_pdf_magic(&bytes) {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(RagError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| RagError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Derive a `.pdf` file name from the last URL path segment.
///
/// The name becomes the corpus name, so arXiv-style URLs without an
/// extension (`/pdf/2501.12948`) keep their identifier.
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                let name = sanitize_filename(last);
                if !last.is_empty() && name != "document" {
                    return if name.to_ascii_lowercase().ends_with(".pdf") {
                        name
                    } else {
                        format!("{name}.pdf")
                    };
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

/// Make an untrusted file name safe to join onto a directory.
pub fn sanitize_filename(name: &str) -> String {
    // Only the final path component counts.
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let sanitized: String = base
        .chars()
        .filter(|&c| c != '\0')
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.replace("..", "");
    let sanitized = sanitized.trim_start_matches('.').to_string();
    let sanitized: String = sanitized.chars().take(100).collect();

    if sanitized.is_empty() {
        "document".into()
    } else {
        sanitized
    }
}

/// Write an uploaded PDF into `dir` and return its path.
///
/// Rejects files whose name does not end in `.pdf` or whose bytes are not a
/// PDF. An existing file of the same name is overwritten, matching a user
/// re-uploading a corrected document.
pub async fn stage_upload(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, RagError> {
    let safe = sanitize_filename(name);
    if !safe.to_ascii_lowercase().ends_with(".pdf") {
        return Err(RagError::InvalidInput {
            input: name.to_string(),
        });
    }

    let path = dir.join(&safe);
    if !has_pdf_magic(bytes) {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(RagError::NotAPdf { path, magic });
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RagError::io(dir, e))?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| RagError::io(&path, e))?;

    info!("Staged upload {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

/// Copy a resolved PDF into the upload directory unless it already lives there.
pub async fn stage_file(dir: &Path, source: &Path) -> Result<PathBuf, RagError> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string());
    let target = dir.join(sanitize_filename(&name));

    if let (Ok(a), Ok(b)) = (source.canonicalize(), target.canonicalize()) {
        if a == b {
            return Ok(target);
        }
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RagError::io(dir, e))?;
    tokio::fs::copy(source, &target)
        .await
        .map_err(|e| RagError::io(&target, e))?;
    Ok(target)
}

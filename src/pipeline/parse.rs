//! Document parsing: PDF → layout blocks, cropped images and a content list.
//!
//! Layout analysis, OCR, formula and table recognition are delegated to
//! MinerU, run as an external process. For `<pdf>` and output directory
//! `<out>` it writes:
//!
//! ```text
//! <out>/<stem>/<subdir>/<stem>_content_list.json
//! <out>/<stem>/<subdir>/images/*.jpg
//! ```
//!
//! where `<subdir>` is `auto` for the `pipeline` backend and `vlm` for the
//! VLM backends. The [`DocumentParser`] trait lets tests and alternative
//! backends produce the same layout without the binary.

use crate::config::RagConfig;
use crate::error::{DocumentError, RagError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Bytes of stderr kept in [`RagError::ParserFailed`].
const STDERR_TAIL: usize = 2000;

/// Turns a PDF into a parse-result directory.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Parse `pdf` under `output_dir` and return the directory holding the
    /// content list and images.
    async fn parse(&self, pdf: &Path, output_dir: &Path) -> Result<PathBuf, RagError>;
}

/// The `mineru` command-line parser.
#[derive(Debug, Clone)]
pub struct MineruParser {
    pub command: String,
    pub backend: String,
}

impl MineruParser {
    pub fn new(command: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            backend: backend.into(),
        }
    }

    fn args(&self, pdf: &Path, output_dir: &Path) -> Vec<std::ffi::OsString> {
        vec![
            "-p".into(),
            pdf.as_os_str().to_owned(),
            "-o".into(),
            output_dir.as_os_str().to_owned(),
            "-b".into(),
            self.backend.clone().into(),
        ]
    }
}

#[async_trait]
impl DocumentParser for MineruParser {
    async fn parse(&self, pdf: &Path, output_dir: &Path) -> Result<PathBuf, RagError> {
        let start = Instant::now();
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| RagError::io(output_dir, e))?;

        info!(
            "Parsing {} with {} (backend {})",
            pdf.display(),
            self.command,
            self.backend
        );

        let output = Command::new(&self.command)
            .args(self.args(pdf, output_dir))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RagError::ParserUnavailable {
                command: self.command.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RagError::ParserFailed {
                path: pdf.to_path_buf(),
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let dir = parsed_result_dir(output_dir, pdf, &self.backend);
        debug!("Parsed {} → {} in {:?}", pdf.display(), dir.display(), start.elapsed());
        Ok(dir)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL {
        text.to_string()
    } else {
        text.chars().skip(count - STDERR_TAIL).collect()
    }
}

/// Result sub-directory for a backend.
pub fn backend_subdir(backend: &str) -> &'static str {
    if backend == "pipeline" {
        "auto"
    } else {
        "vlm"
    }
}

/// `<output_dir>/<stem>/<subdir>`: where the parser leaves results for `pdf`.
pub fn parsed_result_dir(output_dir: &Path, pdf: &Path, backend: &str) -> PathBuf {
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    output_dir.join(stem).join(backend_subdir(backend))
}

/// Parse each PDF in order.
///
/// Failures are logged and returned as [`DocumentError::ParseFailed`] so the
/// rest of the batch still runs. A missing parser binary is fatal because no
/// later document can succeed either.
pub async fn parse_documents(
    parser: &dyn DocumentParser,
    pdfs: &[PathBuf],
    output_dir: &Path,
) -> Result<(Vec<PathBuf>, Vec<DocumentError>), RagError> {
    let mut dirs = Vec::with_capacity(pdfs.len());
    let mut errors = Vec::new();

    for pdf in pdfs {
        match parser.parse(pdf, output_dir).await {
            Ok(dir) => dirs.push(dir),
            Err(e @ RagError::ParserUnavailable { .. }) => return Err(e),
            Err(e) => {
                let document = pdf
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| pdf.display().to_string());
                warn!("Skipping {}: {}", document, e);
                errors.push(DocumentError::ParseFailed {
                    document,
                    detail: e.to_string(),
                });
            }
        }
    }

    Ok((dirs, errors))
}

/// Use the injected parser if any, otherwise MinerU with the configured
/// command and backend.
pub fn resolve_parser(config: &RagConfig) -> Arc<dyn DocumentParser> {
    match config.parser {
        Some(ref parser) => Arc::clone(parser),
        None => Arc::new(MineruParser::new(
            config.parser_command.clone(),
            config.parser_backend.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_dir_follows_backend() {
        let out = Path::new("/data/parse_results");
        assert_eq!(
            parsed_result_dir(out, Path::new("/in/DeepSeek_R1.pdf"), "pipeline"),
            PathBuf::from("/data/parse_results/DeepSeek_R1/auto")
        );
        assert_eq!(
            parsed_result_dir(out, Path::new("paper.v2.pdf"), "vlm-transformers"),
            PathBuf::from("/data/parse_results/paper.v2/vlm")
        );
    }

    #[test]
    fn command_line_shape() {
        let p = MineruParser::new("mineru", "pipeline");
        let args: Vec<String> = p
            .args(Path::new("a.pdf"), Path::new("out"))
            .into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args, ["-p", "a.pdf", "-o", "out", "-b", "pipeline"]);
    }

    #[test]
    fn stderr_is_tailed() {
        let long = "x".repeat(STDERR_TAIL + 50) + "END";
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.chars().count(), STDERR_TAIL);
        assert!(tail.ends_with("END"));
    }

    #[tokio::test]
    async fn missing_binary_is_parser_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let parser = MineruParser::new("pdfrag-no-such-parser-binary", "pipeline");
        let err = parser
            .parse(Path::new("a.pdf"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ParserUnavailable { .. }));
    }

    struct FailOn(&'static str);

    #[async_trait]
    impl DocumentParser for FailOn {
        async fn parse(&self, pdf: &Path, output_dir: &Path) -> Result<PathBuf, RagError> {
            if pdf.ends_with(self.0) {
                Err(RagError::ParserFailed {
                    path: pdf.to_path_buf(),
                    code: Some(1),
                    stderr: "boom".into(),
                })
            } else {
                Ok(parsed_result_dir(output_dir, pdf, "pipeline"))
            }
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let pdfs = vec![PathBuf::from("a.pdf"), PathBuf::from("bad.pdf"), PathBuf::from("c.pdf")];
        let (dirs, errors) = parse_documents(&FailOn("bad.pdf"), &pdfs, Path::new("out"))
            .await
            .unwrap();
        assert_eq!(dirs, vec![PathBuf::from("out/a/auto"), PathBuf::from("out/c/auto")]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].document(), "bad.pdf");
    }

    #[test]
    fn injected_parser_is_used() {
        let config = RagConfig::builder()
            .parser(Arc::new(FailOn("x.pdf")))
            .build()
            .unwrap();
        let _parser = resolve_parser(&config);
    }
}

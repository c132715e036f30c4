//! Document ingestion for Veriform
//!
//! Turns a directory of source files into the pipeline's read-only document
//! set:
//! - deterministic doc ids (`doc_001`, `doc_002`, … in filename order)
//! - SHA-256 content digests and MIME detection (extension + magic sniff)
//! - native text-layer extraction into page-indexed [`LayoutDoc`]s
//! - readability flags with a reason when no text could be obtained
//!
//! No OCR and no image understanding: a document with no native text layer is
//! marked unreadable and excluded from routing, never rasterized.

use std::path::Path;

use sha2::{Digest, Sha256};
use veriform_model::{DocIndexItem, LayoutDoc, LayoutPage, UnreadableReason};
use walkdir::WalkDir;

pub mod pdf;

/// PDF magic bytes for content sniffing.
const PDF_MAGIC: &[u8] = b"%PDF";

/// Ingestion failures. File-scoped problems (unreadable content) are encoded
/// on the `DocIndexItem` instead; these errors are for filesystem-level
/// conditions the caller must handle.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("documents directory not found: {0}")]
    MissingDirectory(String),
    #[error("no input documents found in {0}")]
    NoInputDocuments(String),
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The ingested document set: index metadata plus layout text for every
/// readable document.
#[derive(Debug, Clone)]
pub struct IngestedDocs {
    pub index: Vec<DocIndexItem>,
    pub layout: Vec<LayoutDoc>,
}

impl IngestedDocs {
    pub fn readable_count(&self) -> usize {
        self.index.iter().filter(|d| d.is_readable()).count()
    }
}

/// Ingest every regular file directly under `dir`.
///
/// Files are ordered by lowercased filename before doc ids are assigned, so
/// the same directory always produces the same ids. Returns an error only
/// when the directory is missing or contains no files at all — the run-fatal
/// "zero input documents" condition.
pub fn ingest_dir(dir: &Path) -> Result<IngestedDocs, IngestError> {
    if !dir.is_dir() {
        return Err(IngestError::MissingDirectory(dir.display().to_string()));
    }

    let mut paths: Vec<_> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    paths.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });

    if paths.is_empty() {
        return Err(IngestError::NoInputDocuments(dir.display().to_string()));
    }

    let mut index = Vec::with_capacity(paths.len());
    let mut layout = Vec::new();

    for (i, path) in paths.iter().enumerate() {
        let doc_id = format!("doc_{:03}", i + 1);
        let (item, pages) = ingest_file(&doc_id, path)?;
        tracing::debug!(
            doc_id = %item.doc_id,
            filename = %item.filename,
            readable = item.is_readable(),
            "ingested document"
        );
        if let Some(pages) = pages {
            layout.push(LayoutDoc {
                doc_id: doc_id.clone(),
                pages,
            });
        }
        index.push(item);
    }

    Ok(IngestedDocs { index, layout })
}

/// Ingest a single file: digest, sniff, and extract its text layer.
///
/// Returns the index entry plus the page texts when the document is readable.
pub fn ingest_file(
    doc_id: &str,
    path: &Path,
) -> Result<(DocIndexItem, Option<Vec<LayoutPage>>), IngestError> {
    let bytes = std::fs::read(path).map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    let mime_type = detect_mime_type(path, &bytes);
    let sha256 = sha256_hex(&bytes);

    let extraction = match mime_type.as_str() {
        "application/pdf" => pdf::extract_pdf_pages(&bytes),
        _ => extract_text_pages(&bytes),
    };

    let (pages, unreadable_reason) = match extraction {
        Ok(pages) if pages.iter().any(|p| !p.full_text.trim().is_empty()) => (Some(pages), None),
        Ok(_) => (None, Some(UnreadableReason::NoTextLayer)),
        Err(reason) => (None, Some(reason)),
    };

    let item = DocIndexItem {
        doc_id: doc_id.to_string(),
        filename,
        mime_type,
        pages: pages.as_ref().map(|p| p.len()),
        has_text_layer: pages.is_some(),
        unreadable_reason,
        sha256,
    };

    Ok((item, pages))
}

/// Extension-based MIME detection with a PDF magic-byte fallback.
fn detect_mime_type(path: &Path, bytes: &[u8]) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf".to_string(),
        "txt" => "text/plain".to_string(),
        "md" | "markdown" => "text/markdown".to_string(),
        "json" => "application/json".to_string(),
        _ if bytes.starts_with(PDF_MAGIC) => "application/pdf".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Decode UTF-8 text and split it into pages on form feeds. A file without
/// form feeds is a single page.
fn extract_text_pages(bytes: &[u8]) -> Result<Vec<LayoutPage>, UnreadableReason> {
    let text = std::str::from_utf8(bytes).map_err(|_| UnreadableReason::ParseError)?;
    Ok(split_pages(text))
}

/// Split extracted text into 1-indexed pages on form-feed boundaries.
pub(crate) fn split_pages(text: &str) -> Vec<LayoutPage> {
    text.split('\u{c}')
        .enumerate()
        .map(|(i, chunk)| LayoutPage {
            page: (i + 1) as u32,
            full_text: chunk.to_string(),
            spans: Vec::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn assigns_doc_ids_in_filename_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_referral.txt"), "Referral note").unwrap();
        fs::write(dir.path().join("a_intake.txt"), "Patient Name: John A. Smith").unwrap();

        let docs = ingest_dir(dir.path()).unwrap();
        assert_eq!(docs.index.len(), 2);
        assert_eq!(docs.index[0].doc_id, "doc_001");
        assert_eq!(docs.index[0].filename, "a_intake.txt");
        assert_eq!(docs.index[1].doc_id, "doc_002");
        assert_eq!(docs.index[1].filename, "b_referral.txt");
    }

    #[test]
    fn empty_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ingest_dir(dir.path()),
            Err(IngestError::NoInputDocuments(_))
        ));
    }

    #[test]
    fn form_feeds_delimit_pages() {
        let pages = split_pages("page one\u{c}page two\u{c}page three");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[2].full_text, "page three");
    }

    #[test]
    fn whitespace_only_file_has_no_text_layer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("blank.txt"), "   \n  ").unwrap();

        let docs = ingest_dir(dir.path()).unwrap();
        let item = &docs.index[0];
        assert!(!item.has_text_layer);
        assert_eq!(item.unreadable_reason, Some(UnreadableReason::NoTextLayer));
        assert!(docs.layout.is_empty());
    }

    #[test]
    fn non_utf8_binary_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("junk.bin"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let docs = ingest_dir(dir.path()).unwrap();
        assert_eq!(
            docs.index[0].unreadable_reason,
            Some(UnreadableReason::ParseError)
        );
    }

    #[test]
    fn digests_and_mime_types_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("note.md"), "# Visit\nDOB: 1980-01-01").unwrap();

        let docs = ingest_dir(dir.path()).unwrap();
        let item = &docs.index[0];
        assert_eq!(item.mime_type, "text/markdown");
        assert_eq!(item.sha256.len(), 64);
        assert_eq!(item.pages, Some(1));
    }
}

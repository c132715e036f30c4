//! PDF text-layer extraction, behind the `pdf` feature.
//!
//! Only the native text layer is consulted. A PDF whose extraction yields no
//! text (scanned pages, image-only) is reported as `no_text_layer`; OCR is
//! explicitly out of scope.

use veriform_model::{LayoutPage, UnreadableReason};

/// Extract page texts from PDF bytes. `pdf-extract` emits form feeds between
/// pages, which [`split_pages`](crate::split_pages) turns into 1-indexed pages.
#[cfg(feature = "pdf")]
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<LayoutPage>, UnreadableReason> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|_| UnreadableReason::ParseError)?;
    Ok(crate::split_pages(&text))
}

/// Without the `pdf` feature a PDF has no reachable text layer.
#[cfg(not(feature = "pdf"))]
pub fn extract_pdf_pages(_bytes: &[u8]) -> Result<Vec<LayoutPage>, UnreadableReason> {
    Err(UnreadableReason::NoTextLayer)
}

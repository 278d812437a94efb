//! File-type detection and text extraction for uploaded documents.
//!
//! Extraction is a pure transform from raw bytes to normalized UTF-8 text;
//! the only outbound call is the OCR pass for image uploads. A document that
//! yields no extractable text is an error, never an empty success, so nothing
//! downstream ever chunks or indexes a blank document.

pub mod ocr;

use std::io::Read;

use thiserror::Error;

pub use ocr::{OcrClient, OcrError, OllamaOcrClient};

/// Errors produced while turning raw bytes into normalized text.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The upload's type could not be recognized from declaration, content, or filename.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
    /// The file matched a known format but failed to parse.
    #[error("Corrupt {format} file: {reason}")]
    CorruptFile {
        /// Format that was being parsed.
        format: &'static str,
        /// Parser diagnostic.
        reason: String,
    },
    /// The OCR backend failed to transcribe an image upload.
    #[error("OCR failed: {0}")]
    OcrFailure(String),
    /// Extraction succeeded but produced no usable text.
    #[error("Document contains no extractable text")]
    NoExtractableText,
}

/// Detected type of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document.
    Pdf,
    /// Word (OOXML) document.
    Word,
    /// Raster image handled via OCR.
    Image,
    /// Plain UTF-8 text.
    Plain,
}

impl FileType {
    /// Resolve the file type from the declared type, magic bytes, and filename.
    ///
    /// The declared type (a MIME string or bare extension) wins when it maps to
    /// a supported format; otherwise content sniffing and the filename
    /// extension are consulted in that order. Bytes that decode as UTF-8 fall
    /// back to plain text.
    pub fn detect(
        declared: Option<&str>,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Self, ExtractError> {
        if let Some(declared) = declared
            && let Some(file_type) = Self::from_label(declared)
        {
            return Ok(file_type);
        }

        if let Some(kind) = infer::get(bytes)
            && let Some(file_type) = Self::from_label(kind.mime_type())
        {
            return Ok(file_type);
        }

        if let Some(extension) = filename.rsplit_once('.').map(|(_, ext)| ext)
            && let Some(file_type) = Self::from_label(extension)
        {
            return Ok(file_type);
        }

        if std::str::from_utf8(bytes).is_ok() {
            return Ok(Self::Plain);
        }

        Err(ExtractError::UnsupportedFormat(
            declared.unwrap_or("unknown").to_string(),
        ))
    }

    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "application/pdf" | "pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" | "docx"
            | "doc" | "application/msword" => Some(Self::Word),
            "text/plain" | "text/markdown" | "txt" | "md" => Some(Self::Plain),
            label if label.starts_with("image/") => Some(Self::Image),
            "png" | "jpg" | "jpeg" | "webp" | "tiff" | "bmp" => Some(Self::Image),
            _ => None,
        }
    }

    /// Stable lowercase name used in records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Image => "image",
            Self::Plain => "plain",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum decompressed bytes read from a single OOXML ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract normalized text from an upload.
///
/// Dispatches on the detected [`FileType`]; image uploads run one OCR pass
/// against the supplied backend. Whitespace-only output maps to
/// [`ExtractError::NoExtractableText`].
pub async fn extract_text(
    bytes: &[u8],
    file_type: FileType,
    ocr: &dyn OcrClient,
) -> Result<String, ExtractError> {
    let raw = match file_type {
        FileType::Pdf => extract_pdf(bytes)?,
        FileType::Word => extract_docx(bytes)?,
        FileType::Image => ocr
            .recognize(bytes)
            .await
            .map_err(|error| ExtractError::OcrFailure(error.to_string()))?,
        FileType::Plain => extract_plain(bytes)?,
    };

    let normalized = normalize(&raw);
    if normalized.trim().is_empty() {
        return Err(ExtractError::NoExtractableText);
    }
    Ok(normalized)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|error| ExtractError::CorruptFile {
        format: "pdf",
        reason: error.to_string(),
    })
}

fn extract_plain(bytes: &[u8]) -> Result<String, ExtractError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|error| ExtractError::CorruptFile {
            format: "text",
            reason: error.to_string(),
        })
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let corrupt = |reason: String| ExtractError::CorruptFile {
        format: "word",
        reason,
    };

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|error| corrupt(error.to_string()))?;
    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|error| corrupt(error.to_string()))?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|error| corrupt(error.to_string()))?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(corrupt("word/document.xml exceeds size limit".to_string()));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(corrupt("word/document.xml not found".to_string()));
    }
    extract_docx_runs(&doc_xml)
}

/// Pull text runs (`w:t`) out of the document XML, breaking on paragraphs.
fn extract_docx_runs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t"
                    && let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                {
                    out.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(error) => {
                return Err(ExtractError::CorruptFile {
                    format: "word",
                    reason: error.to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Normalize extracted text: unify newlines, drop control characters, and
/// collapse runs of blank lines so chunk offsets are stable across formats.
pub fn normalize(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut newline_run = 0usize;
    for c in unified.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push('\n');
            }
            continue;
        }
        newline_run = 0;
        if c.is_control() && c != '\t' {
            continue;
        }
        out.push(c);
    }
    out.trim_end().to_string()
}

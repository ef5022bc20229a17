//! Document loaders for the ingestion allow-list: pdf, docx, txt.
//!
//! Each loader returns the raw text plus per-unit metadata; PDFs produce one
//! unit per page, the other formats a single unit without a page number.

use std::fs;
use std::io::Read;
use std::path::Path;

use crate::core::errors::RagError;

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "docx", "txt"];

/// One loadable unit of a source document.
#[derive(Debug, Clone)]
pub struct DocumentUnit {
    pub text: String,
    /// 0-based page number for paginated formats.
    pub page: Option<u32>,
    pub source: String,
}

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn is_supported(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Load a document by extension. The caller is expected to have checked the
/// allow-list already; an unknown extension still fails closed here.
pub fn load_document(path: &Path) -> Result<Vec<DocumentUnit>, RagError> {
    let ext = extension_of(path)
        .ok_or_else(|| RagError::UnsupportedFormat(path.display().to_string()))?;

    match ext.as_str() {
        "pdf" => load_pdf(path),
        "docx" => load_docx(path),
        "txt" => load_txt(path),
        other => Err(RagError::UnsupportedFormat(other.to_string())),
    }
}

fn load_txt(path: &Path) -> Result<Vec<DocumentUnit>, RagError> {
    let text = fs::read_to_string(path).map_err(RagError::processing)?;
    Ok(vec![DocumentUnit {
        text,
        page: None,
        source: path.display().to_string(),
    }])
}

fn load_pdf(path: &Path) -> Result<Vec<DocumentUnit>, RagError> {
    let doc = lopdf::Document::load(path).map_err(RagError::processing)?;
    let source = path.display().to_string();

    let mut units = Vec::new();
    for (page_no, _) in doc.get_pages() {
        let text = doc.extract_text(&[page_no]).map_err(RagError::processing)?;
        units.push(DocumentUnit {
            text,
            page: Some(page_no.saturating_sub(1)),
            source: source.clone(),
        });
    }

    Ok(units)
}

fn load_docx(path: &Path) -> Result<Vec<DocumentUnit>, RagError> {
    let file = fs::File::open(path).map_err(RagError::processing)?;
    let mut archive = zip::ZipArchive::new(file).map_err(RagError::processing)?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(RagError::processing)?
        .read_to_string(&mut xml)
        .map_err(RagError::processing)?;

    Ok(vec![DocumentUnit {
        text: extract_docx_text(&xml),
        page: None,
        source: path.display().to_string(),
    }])
}

/// Pull paragraph text out of WordprocessingML without a full XML parser:
/// paragraph close tags become newlines, every other tag is dropped, and the
/// handful of entities Word emits are decoded.
fn extract_docx_text(xml: &str) -> String {
    let mut result = String::new();
    let mut tag = String::new();
    let mut in_tag = false;

    for c in xml.chars() {
        match c {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' => {
                in_tag = false;
                if tag == "/w:p" || tag == "w:p/" {
                    result.push('\n');
                } else if tag == "w:tab/" {
                    result.push('\t');
                } else if tag == "w:br/" {
                    result.push('\n');
                }
            }
            _ if in_tag => tag.push(c),
            _ => result.push(c),
        }
    }

    let decoded = decode_entities(&result);
    let lines: Vec<&str> = decoded
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    lines.join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

use anyhow::{Context, Result};
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>").expect("valid paragraph regex"));

// Legacy copy of drawing content (e.g. a VML text box duplicating a DrawingML one).
static FALLBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<mc:Fallback(?:\s[^>]*)?>.*?</mc:Fallback>").expect("valid fallback regex")
});

// Text boxes hold whole paragraphs inside a run of their anchoring paragraph.
static TEXT_BOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:txbxContent(?:\s[^>]*)?>.*?</w:txbxContent>").expect("valid text box regex")
});

static TEXT_BOX_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\x01([0-9]+)\x01").expect("valid text box ref regex"));

// Text runs, tabs and line breaks inside a paragraph, in document order.
static RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:(tab|br|cr)(?:\s[^>]*)?/>")
        .expect("valid run regex")
});

static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-z]+);").expect("valid entity regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Txt,
    Docx,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(DocumentKind::Txt),
            "docx" => Some(DocumentKind::Docx),
            _ => None,
        }
    }

    pub fn read(self, path: &Path) -> Result<Vec<String>> {
        match self {
            DocumentKind::Txt => read_txt(path),
            DocumentKind::Docx => read_docx(path),
        }
    }
}

pub fn read_txt(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(text
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Returns the non-empty paragraphs of a `.docx` file, trimmed.
pub fn read_docx(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a valid docx archive", path.display()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .with_context(|| format!("{} has no word/document.xml", path.display()))?
        .read_to_string(&mut xml)
        .with_context(|| format!("failed to read document body of {}", path.display()))?;
    Ok(paragraphs_from_xml(&xml))
}

// Top-level paragraphs in order; text box paragraphs follow the paragraph that anchors them.
fn paragraphs_from_xml(xml: &str) -> Vec<String> {
    let xml = FALLBACK.replace_all(xml, "");
    let mut text_boxes: Vec<Vec<String>> = Vec::new();
    let body = TEXT_BOX.replace_all(&xml, |caps: &regex::Captures| {
        text_boxes.push(flat_paragraphs(&caps[0]));
        format!("\x01{}\x01", text_boxes.len() - 1)
    });

    let mut paragraphs = Vec::new();
    for p in PARAGRAPH.find_iter(&body) {
        let text = paragraph_text(p.as_str());
        let text = text.trim();
        if !text.is_empty() {
            paragraphs.push(text.to_string());
        }
        for r in TEXT_BOX_REF.captures_iter(p.as_str()) {
            if let Some(inner) = r[1].parse::<usize>().ok().and_then(|i| text_boxes.get(i)) {
                paragraphs.extend(inner.iter().cloned());
            }
        }
    }
    paragraphs
}

fn flat_paragraphs(xml: &str) -> Vec<String> {
    PARAGRAPH
        .find_iter(xml)
        .map(|p| paragraph_text(p.as_str()))
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

fn paragraph_text(paragraph: &str) -> String {
    let mut text = String::new();
    for caps in RUN.captures_iter(paragraph) {
        if let Some(run) = caps.get(1) {
            text.push_str(&unescape_xml(run.as_str()));
        } else if let Some(tag) = caps.get(2) {
            text.push(if tag.as_str() == "tab" { '\t' } else { '\n' });
        }
    }
    text
}

fn unescape_xml(s: &str) -> String {
    ENTITY
        .replace_all(s, |caps: &regex::Captures| {
            let name = &caps[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    let code = if let Some(hex) = name.strip_prefix("#x") {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = name.strip_prefix('#') {
                        dec.parse().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

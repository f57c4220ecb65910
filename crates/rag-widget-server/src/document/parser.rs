use encoding_rs::{UTF_16BE, UTF_16LE, WINDOWS_1252};
use thiserror::Error;
use tracing::{debug, warn};

use crate::database::models::SourceType;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt input: {0}")]
    CorruptInput(String),

    #[error("no extractable text")]
    EmptyContent,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    pub metadata: ParseMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct ParseMetadata {
    pub pages: Option<usize>,
    pub paragraphs: Option<usize>,
    pub encoding: Option<String>,
}

pub struct DocumentParser;

impl DocumentParser {
    /// Parse raw bytes according to the hinted source type.
    pub fn parse(bytes: &[u8], source_type: SourceType) -> Result<ParsedDocument, ParseError> {
        let parsed = match source_type {
            SourceType::Pdf => Self::parse_pdf(bytes)?,
            SourceType::Docx => Self::parse_docx(bytes)?,
            SourceType::Text => Self::parse_text(bytes)?,
            SourceType::Html => {
                // HTML sources go through the crawler, never this parser.
                return Err(ParseError::UnsupportedFormat("html".to_string()));
            }
        };

        if parsed.content.trim().is_empty() {
            return Err(ParseError::EmptyContent);
        }

        debug!(
            chars = parsed.content.len(),
            pages = ?parsed.metadata.pages,
            "parsed document"
        );

        Ok(parsed)
    }

    fn parse_pdf(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
        use lopdf::Document;

        let doc = Document::load_mem(bytes)
            .map_err(|e| ParseError::CorruptInput(format!("pdf: {e}")))?;
        let pages = doc.get_pages();
        let page_count = pages.len();

        let mut content = String::new();

        for (page_num, _) in pages.iter() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => {
                    content.push_str(&text);
                    content.push('\n');
                }
                Err(e) => {
                    warn!(page = page_num, "failed to extract text from page: {}", e);
                }
            }
        }

        Ok(ParsedDocument {
            content,
            metadata: ParseMetadata {
                pages: Some(page_count),
                ..Default::default()
            },
        })
    }

    fn parse_docx(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
        use docx_rs::{read_docx, DocumentChild, ParagraphChild, RunChild};

        let docx = read_docx(bytes).map_err(|e| ParseError::CorruptInput(format!("docx: {e}")))?;

        let mut content = String::new();
        let mut paragraphs = 0usize;

        for child in docx.document.children {
            if let DocumentChild::Paragraph(para) = child {
                paragraphs += 1;
                for child in para.children {
                    if let ParagraphChild::Run(run) = child {
                        for child in run.children {
                            if let RunChild::Text(text) = child {
                                content.push_str(&text.text);
                            }
                        }
                    }
                }
                content.push('\n');
            }
        }

        Ok(ParsedDocument {
            content,
            metadata: ParseMetadata {
                paragraphs: Some(paragraphs),
                ..Default::default()
            },
        })
    }

    /// Decode plain text, trying UTF-8, UTF-16, then Latin-1/CP-1252.
    fn parse_text(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
        let (content, encoding) = Self::decode_text(bytes);

        Ok(ParsedDocument {
            content,
            metadata: ParseMetadata {
                encoding: Some(encoding),
                ..Default::default()
            },
        })
    }

    fn decode_text(bytes: &[u8]) -> (String, String) {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return (text.to_string(), "utf-8".to_string());
        }

        // UTF-16 only when a BOM or a NUL-heavy byte pattern points at it;
        // otherwise plain single-byte text would decode as garbage.
        if bytes.len() >= 2 {
            if bytes[0] == 0xFF && bytes[1] == 0xFE {
                let (text, _, _) = UTF_16LE.decode(&bytes[2..]);
                return (text.into_owned(), "utf-16le".to_string());
            }
            if bytes[0] == 0xFE && bytes[1] == 0xFF {
                let (text, _, _) = UTF_16BE.decode(&bytes[2..]);
                return (text.into_owned(), "utf-16be".to_string());
            }
            let nul_count = bytes.iter().filter(|&&b| b == 0).count();
            if nul_count * 3 > bytes.len() {
                let odd_nuls = bytes.iter().skip(1).step_by(2).filter(|&&b| b == 0).count();
                let encoding = if odd_nuls * 2 > nul_count {
                    UTF_16LE
                } else {
                    UTF_16BE
                };
                let (text, _, _) = encoding.decode(bytes);
                return (text.into_owned(), encoding.name().to_ascii_lowercase());
            }
        }

        // Latin-1 and CP-1252 collapse to windows-1252 here: the WHATWG
        // table covers both and decoding a single-byte stream never fails.
        let (text, _, _) = WINDOWS_1252.decode(bytes);
        (text.into_owned(), "windows-1252".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_text_decodes_and_reports_encoding() {
        let parsed = DocumentParser::parse("héllo wörld".as_bytes(), SourceType::Text).unwrap();
        assert_eq!(parsed.content, "héllo wörld");
        assert_eq!(parsed.metadata.encoding.as_deref(), Some("utf-8"));
    }

    #[test]
    fn utf16le_with_bom_decodes() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hello".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let parsed = DocumentParser::parse(&bytes, SourceType::Text).unwrap();
        assert_eq!(parsed.content, "hello");
        assert_eq!(parsed.metadata.encoding.as_deref(), Some("utf-16le"));
    }

    #[test]
    fn latin1_falls_back_to_windows_1252() {
        // "café" with 0xE9 for é, invalid as UTF-8.
        let bytes = [0x63, 0x61, 0x66, 0xE9];
        let parsed = DocumentParser::parse(&bytes, SourceType::Text).unwrap();
        assert_eq!(parsed.content, "café");
        assert_eq!(parsed.metadata.encoding.as_deref(), Some("windows-1252"));
    }

    #[test]
    fn whitespace_only_text_is_empty_content() {
        let err = DocumentParser::parse(b"   \n\t  ", SourceType::Text).unwrap_err();
        assert!(matches!(err, ParseError::EmptyContent));
    }

    #[test]
    fn html_hint_is_unsupported() {
        let err = DocumentParser::parse(b"<html></html>", SourceType::Html).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)));
    }

    #[test]
    fn garbage_pdf_is_corrupt_input() {
        let err = DocumentParser::parse(b"not a pdf at all", SourceType::Pdf).unwrap_err();
        assert!(matches!(err, ParseError::CorruptInput(_)));
    }

    #[test]
    fn garbage_docx_is_corrupt_input() {
        let err = DocumentParser::parse(b"not a zip archive", SourceType::Docx).unwrap_err();
        assert!(matches!(err, ParseError::CorruptInput(_)));
    }
}

//! Minimal Office Open XML word-processing package.
//!
//! A document holds exactly one paragraph. Line breaks and tabs inside the
//! text become `<w:br/>` and `<w:tab/>` so the paragraph reads the same as
//! the source text in any office suite.

use crate::error::Result;
use std::io::{Seek, Write};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#;

const DOCUMENT_TAIL: &str = "<w:sectPr/></w:body></w:document>";

/// Path of the main document part inside the package.
pub const DOCUMENT_PART: &str = "word/document.xml";

/// File extension of generated documents.
pub const EXTENSION: &str = "docx";

/// Writes a single-paragraph document package to `sink`.
///
/// # Errors
///
/// Returns an error if the archive cannot be written.
pub fn write_document<W: Write + Seek>(sink: W, text: &str) -> Result<W> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(sink);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(CONTENT_TYPES.as_bytes())
        .map_err(zip::result::ZipError::Io)?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(PACKAGE_RELS.as_bytes())
        .map_err(zip::result::ZipError::Io)?;

    zip.start_file(DOCUMENT_PART, options)?;
    zip.write_all(document_xml(text).as_bytes())
        .map_err(zip::result::ZipError::Io)?;

    Ok(zip.finish()?)
}

/// Renders the main document part holding `text` as one paragraph.
#[must_use]
pub fn document_xml(text: &str) -> String {
    let mut xml = String::with_capacity(DOCUMENT_HEAD.len() + text.len() * 2 + 64);
    xml.push_str(DOCUMENT_HEAD);
    xml.push_str("<w:p><w:r>");

    let mut segment = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                flush_text(&mut xml, &mut segment);
                xml.push_str("<w:br/>");
            }
            '\n' => {
                flush_text(&mut xml, &mut segment);
                xml.push_str("<w:br/>");
            }
            '\t' => {
                flush_text(&mut xml, &mut segment);
                xml.push_str("<w:tab/>");
            }
            c if is_xml_char(c) => segment.push(c),
            _ => {}
        }
    }
    flush_text(&mut xml, &mut segment);

    xml.push_str("</w:r></w:p>");
    xml.push_str(DOCUMENT_TAIL);
    xml
}

fn flush_text(xml: &mut String, segment: &mut String) {
    if segment.is_empty() {
        return;
    }
    xml.push_str(r#"<w:t xml:space="preserve">"#);
    escape_into(xml, segment);
    xml.push_str("</w:t>");
    segment.clear();
}

fn escape_into(xml: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => xml.push_str("&amp;"),
            '<' => xml.push_str("&lt;"),
            '>' => xml.push_str("&gt;"),
            '"' => xml.push_str("&quot;"),
            _ => xml.push(c),
        }
    }
}

/// Control characters other than tab and line breaks are not allowed in XML 1.0.
const fn is_xml_char(c: char) -> bool {
    !matches!(c, '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn read_part(bytes: Vec<u8>, name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut content = String::new();
        part.read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn test_single_paragraph() {
        let xml = document_xml("Rain taps the window");
        assert_eq!(xml.matches("<w:p>").count(), 1);
        assert!(xml.contains(r#"<w:t xml:space="preserve">Rain taps the window</w:t>"#));
    }

    #[test]
    fn test_escaping() {
        let xml = document_xml(r#"a < b && "c" > d"#);
        assert!(xml.contains("a &lt; b &amp;&amp; &quot;c&quot; &gt; d"));
    }

    #[test]
    fn test_line_breaks_and_tabs() {
        let xml = document_xml("line one\nline two\r\n\tindented");
        assert_eq!(xml.matches("<w:br/>").count(), 2);
        assert_eq!(xml.matches("<w:tab/>").count(), 1);
        assert_eq!(xml.matches("<w:p>").count(), 1);
    }

    #[test]
    fn test_control_characters_dropped() {
        let xml = document_xml("bell\u{7}here");
        assert!(xml.contains(">bellhere<"));
    }

    #[test]
    fn test_empty_text() {
        let xml = document_xml("");
        assert!(xml.contains("<w:p><w:r></w:r></w:p>"));
    }

    #[test]
    fn test_package_parts() {
        let bytes = write_document(Cursor::new(Vec::new()), "Hello, world")
            .unwrap()
            .into_inner();

        let archive = zip::ZipArchive::new(Cursor::new(bytes.clone())).unwrap();
        let names: Vec<_> = archive.file_names().collect();
        assert!(names.contains(&"[Content_Types].xml"));
        assert!(names.contains(&"_rels/.rels"));
        assert!(names.contains(&DOCUMENT_PART));

        let document = read_part(bytes, DOCUMENT_PART);
        assert!(document.contains("Hello, world"));
    }
}

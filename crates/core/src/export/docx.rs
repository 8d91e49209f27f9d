use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::ExportError;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>
</Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>
</Relationships>"#;

const CHAPTER_PREFIX: &str = "Chapter:";

pub(super) fn render(title: &str, text: &str) -> Result<Vec<u8>, ExportError> {
    let mut archive = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    archive.start_file("[Content_Types].xml", options)?;
    archive.write_all(CONTENT_TYPES.as_bytes())?;
    archive.start_file("_rels/.rels", options)?;
    archive.write_all(PACKAGE_RELS.as_bytes())?;
    archive.start_file("docProps/core.xml", options)?;
    archive.write_all(core_properties(title).as_bytes())?;
    archive.start_file("word/document.xml", options)?;
    archive.write_all(document(text).as_bytes())?;

    Ok(archive.finish()?.into_inner())
}

fn core_properties(title: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/">
<dc:title>{}</dc:title>
<dc:creator>bookgen</dc:creator>
</cp:coreProperties>"#,
        html_escape::encode_text(title)
    )
}

fn document(text: &str) -> String {
    let mut body = String::new();
    for line in text.lines() {
        body.push_str(&paragraph(line.trim_end()));
        body.push('\n');
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
{}<w:sectPr><w:pgSz w:w="11906" w:h="16838"/></w:sectPr>
</w:body>
</w:document>"#,
        body
    )
}

fn paragraph(line: &str) -> String {
    if line.trim().is_empty() {
        return "<w:p/>".to_string();
    }

    let run_properties = if line.trim_start().starts_with(CHAPTER_PREFIX) {
        "<w:rPr><w:b/></w:rPr>"
    } else {
        ""
    };
    format!(
        r#"<w:p><w:r>{}<w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
        run_properties,
        html_escape::encode_text(&strip_invalid_xml(line))
    )
}

/// XML 1.0 forbids most C0 control characters even when escaped.
fn strip_invalid_xml(line: &str) -> String {
    line.chars()
        .filter(|ch| !ch.is_control() || *ch == '\t')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_entry(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        contents
    }

    #[test]
    fn archive_contains_required_parts() {
        let bytes = render("Fox", "Chapter: Home\n\nText.").unwrap();
        let archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "[Content_Types].xml",
                "_rels/.rels",
                "docProps/core.xml",
                "word/document.xml"
            ]
        );
    }

    #[test]
    fn chapter_headers_are_bold_and_text_is_escaped() {
        let bytes = render("Fox & Friends", "Chapter: Home\n\n<Den> & more").unwrap();

        let document = read_entry(&bytes, "word/document.xml");
        assert!(document.contains(
            r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">Chapter: Home</w:t></w:r></w:p>"#
        ));
        assert!(document.contains("<w:p/>"));
        assert!(document.contains("&lt;Den&gt; &amp; more"));

        let core = read_entry(&bytes, "docProps/core.xml");
        assert!(core.contains("<dc:title>Fox &amp; Friends</dc:title>"));
    }

    #[test]
    fn control_characters_are_dropped() {
        assert_eq!(strip_invalid_xml("a\u{0007}b\tc"), "ab\tc");
    }
}

use std::{
    fs::File,
    io::Read,
    path::Path,
    sync::OnceLock,
};

use regex::Regex;
use serde::Deserialize;
use zip::ZipArchive;

use crate::core::{
    models::{
        Book,
        Chapter,
    },
    text::word_count,
    AnkimineError,
};

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Sections shorter than this are treated as front/back matter.
const MIN_CONTENT_WORDS: usize = 100;

#[derive(Debug, Deserialize)]
struct Container {
    rootfiles: RootFiles,
}

#[derive(Debug, Deserialize)]
struct RootFiles {
    #[serde(rename = "rootfile")]
    rootfiles: Vec<RootFile>,
}

#[derive(Debug, Deserialize)]
struct RootFile {
    #[serde(rename = "@full-path")]
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct Package {
    metadata: Metadata,
    manifest: Manifest,
    spine: Spine,
}

// Dublin Core children keep their dc: prefix in the raw element names.
#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = "title", default)]
    titles: Vec<String>,
    #[serde(rename = "creator", default)]
    creators: Vec<String>,
    #[serde(rename = "language", default)]
    languages: Vec<String>,
    #[serde(rename = "identifier", default)]
    identifiers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "item", default)]
    items: Vec<ManifestItem>,
}

#[derive(Debug, Deserialize)]
struct ManifestItem {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@media-type")]
    media_type: String,
}

#[derive(Debug, Deserialize)]
struct Spine {
    #[serde(rename = "itemref", default)]
    itemrefs: Vec<ItemRef>,
}

#[derive(Debug, Deserialize)]
struct ItemRef {
    #[serde(rename = "@idref")]
    idref: String,
}

fn dropped_blocks_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<nav\b[^>]*>.*?</nav\s*>|<header\b[^>]*>.*?</header\s*>|<footer\b[^>]*>.*?</footer\s*>",
        )
        .unwrap()
    })
}

fn block_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(p|div|h[1-6]|li|blockquote|tr|section|article)\s*>").unwrap()
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap())
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<h([1-3])\b[^>]*>(.*?)</h[1-3]\s*>").unwrap())
}

fn filename_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(chapter|chap|ch)[_-]?").unwrap())
}

/// HTML to plain text: drop scripted/navigational blocks, turn block-level
/// closers into newlines, strip the remaining tags and decode entities.
pub fn clean_html_to_text(html: &str) -> String {
    let no_blocks = dropped_blocks_re().replace_all(html, "");
    let with_breaks = block_break_re().replace_all(&no_blocks, "\n");
    let no_tags = tag_re().replace_all(&with_breaks, " ");
    let decoded = html_escape::decode_html_entities(no_tags.as_ref()).to_string();

    let lines: Vec<&str> = decoded.lines().map(str::trim).collect();
    let mut text = String::new();
    for line in lines {
        let collapsed: String = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            text.push_str(&collapsed);
        }
        text.push('\n');
    }
    blank_lines_re().replace_all(&text, "\n\n").trim().to_string()
}

/// First h1-h3 heading, when it looks like a real title.
pub fn extract_title_from_html(html: &str) -> Option<String> {
    for captures in heading_re().captures_iter(html) {
        let inner = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        let title = clean_html_to_text(inner).replace('\n', " ").trim().to_string();
        if !title.is_empty() && title.len() < 200 {
            return Some(title);
        }
    }
    None
}

/// Derive a title from the spine item's filename, e.g. "ch_03-the-cell" ->
/// "The Cell". Pure digits are rejected (they carry no title).
pub fn title_from_filename(href: &str) -> Option<String> {
    let stem = Path::new(href).file_stem()?.to_str()?;
    let cleaned = filename_prefix_re().replace(stem, "");
    let cleaned = cleaned.trim_matches(|c| c == '_' || c == '-');
    if cleaned.is_empty() || cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let words: Vec<String> = cleaned
        .split(|c| c == '_' || c == '-' || c == ' ')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    Some(words.join(" "))
}

const SKIP_TITLE_PATTERNS: &[&str] = &[
    r"^table of contents?$",
    r"^contents?$",
    r"^copyright",
    r"^all rights reserved",
    r"^title page$",
    r"^cover$",
    r"^dedication$",
    r"^acknowledgements?$",
    r"^about the author$",
    r"^index$",
    r"^bibliography$",
    r"^references$",
    r"^notes$",
    r"^appendix",
];

fn skip_title_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        SKIP_TITLE_PATTERNS.iter().map(|p| Regex::new(p).unwrap()).collect()
    })
}

/// Actual content versus front/back matter.
pub fn is_content_chapter(text: &str, title: &str) -> bool {
    if word_count(text) < MIN_CONTENT_WORDS {
        return false;
    }
    let title_lower = title.to_lowercase();
    let title_lower = title_lower.trim();
    !skip_title_res().iter().any(|re| re.is_match(title_lower))
}

/// Join an OPF-relative href onto the OPF's directory, resolving "./" and
/// "../" the way zip entry names expect (forward slashes only).
fn resolve_href(opf_path: &str, href: &str) -> String {
    let opf_dir = match opf_path.rfind('/') {
        Some(pos) => &opf_path[..pos],
        None => "",
    };

    let mut parts: Vec<&str> =
        if opf_dir.is_empty() { Vec::new() } else { opf_dir.split('/').collect() };
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn read_zip_entry(
    archive: &mut ZipArchive<File>,
    name: &str,
    epub_path: &str,
) -> Result<String, AnkimineError> {
    let mut entry = archive.by_name(name).map_err(|_| {
        AnkimineError::NotAnEpub(format!("{epub_path}: missing entry {name}"))
    })?;
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(content)
}

/// Parse an EPUB into ordered chapters with titles and plain text. Spine
/// order is preserved; front/back matter is filtered out.
pub fn parse_epub(path: &Path) -> Result<Book, AnkimineError> {
    let display = path.display().to_string();
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let container_xml = read_zip_entry(&mut archive, CONTAINER_PATH, &display)?;
    let container: Container = quick_xml::de::from_str(&container_xml)?;
    let opf_path = container
        .rootfiles
        .rootfiles
        .first()
        .map(|r| r.full_path.clone())
        .ok_or_else(|| AnkimineError::NotAnEpub(format!("{display}: no rootfile declared")))?;

    let opf_xml = read_zip_entry(&mut archive, &opf_path, &display)?;
    let package: Package = quick_xml::de::from_str(&opf_xml)?;

    let title = package
        .metadata
        .titles
        .iter()
        .find(|t| !t.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| "Unknown Title".to_string());
    let author = package
        .metadata
        .creators
        .iter()
        .find(|c| !c.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| "Unknown Author".to_string());
    let language = package.metadata.languages.first().cloned();
    let identifier = package.metadata.identifiers.iter().find(|i| !i.trim().is_empty()).cloned();

    let mut chapters = Vec::new();
    let mut index = 0usize;

    for itemref in &package.spine.itemrefs {
        let Some(item) = package.manifest.items.iter().find(|i| i.id == itemref.idref) else {
            log::warn!("{display}: spine references unknown item {}", itemref.idref);
            continue;
        };
        if !item.media_type.contains("html") {
            continue;
        }

        let entry_name = resolve_href(&opf_path, &item.href);
        let html = match read_zip_entry(&mut archive, &entry_name, &display) {
            Ok(html) => html,
            Err(e) => {
                log::warn!("{e}");
                continue;
            }
        };

        let text = clean_html_to_text(&html);
        let title = extract_title_from_html(&html)
            .or_else(|| title_from_filename(&item.href))
            .unwrap_or_else(|| format!("Chapter {}", index + 1));

        if !is_content_chapter(&text, &title) {
            log::debug!("{display}: skipping non-content section {title:?}");
            continue;
        }

        let words = word_count(&text);
        chapters.push(Chapter { index, title, content: text, word_count: words });
        index += 1;
    }

    Ok(Book { title, author, language, identifier, chapters })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    #[test]
    fn cleans_html_to_text() {
        let html = r#"<html><head><style>.x{color:red}</style></head>
<body><h1>The Cell</h1><p>Cells are the &amp; smallest unit.</p>
<p>They divide.</p><script>alert(1)</script></body></html>"#;
        let text = clean_html_to_text(html);
        assert!(text.contains("Cells are the & smallest unit."));
        assert!(text.contains("They divide."));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
    }

    #[test]
    fn extracts_heading_title() {
        let html = "<body><h2 class=\"title\">A <em>Short</em> History</h2><p>text</p></body>";
        assert_eq!(extract_title_from_html(html).as_deref(), Some("A Short History"));
        assert_eq!(extract_title_from_html("<p>no headings</p>"), None);
    }

    #[test]
    fn derives_title_from_filename() {
        assert_eq!(title_from_filename("text/ch_03-the-cell.xhtml").as_deref(), Some("03 The Cell"));
        assert_eq!(title_from_filename("text/chapter-origins.xhtml").as_deref(), Some("Origins"));
        assert_eq!(title_from_filename("text/ch04.xhtml"), None);
        assert_eq!(title_from_filename("text/0012.xhtml"), None);
    }

    #[test]
    fn filters_front_matter() {
        let long_text = "word ".repeat(200);
        assert!(is_content_chapter(&long_text, "The Beginning"));
        assert!(!is_content_chapter(&long_text, "Table of Contents"));
        assert!(!is_content_chapter(&long_text, "Copyright 2009"));
        assert!(!is_content_chapter("too short", "The Beginning"));
    }

    #[test]
    fn resolves_relative_hrefs() {
        assert_eq!(resolve_href("OEBPS/content.opf", "text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_href("content.opf", "ch1.xhtml"), "ch1.xhtml");
        assert_eq!(resolve_href("OEBPS/content.opf", "../images/x.png"), "images/x.png");
        assert_eq!(resolve_href("OEBPS/content.opf", "./ch1.xhtml"), "OEBPS/ch1.xhtml");
    }

    fn chapter_html(title: &str, sentences: usize) -> String {
        let body = format!("<p>{}</p>", "Plain factual sentence here. ".repeat(sentences));
        format!("<html><body><h1>{title}</h1>{body}</body></html>")
    }

    fn write_test_epub(path: &Path) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        writer.start_file("META-INF/container.xml", options).unwrap();
        writer
            .write_all(
                br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
            )
            .unwrap();

        writer.start_file("OEBPS/content.opf", options).unwrap();
        writer
            .write_all(
                br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/" version="2.0">
  <metadata>
    <dc:title>On Growth</dc:title>
    <dc:creator>D. Thompson</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
    <item id="toc" href="toc.xhtml" media-type="application/xhtml+xml"/>
    <item id="c1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
  </manifest>
  <spine>
    <itemref idref="toc"/>
    <itemref idref="c1"/>
    <itemref idref="c2"/>
  </spine>
</package>"#,
            )
            .unwrap();

        writer.start_file("OEBPS/toc.xhtml", options).unwrap();
        writer
            .write_all(chapter_html("Table of Contents", 40).as_bytes())
            .unwrap();

        writer.start_file("OEBPS/text/ch1.xhtml", options).unwrap();
        writer.write_all(chapter_html("Form and Function", 40).as_bytes()).unwrap();

        writer.start_file("OEBPS/text/ch2.xhtml", options).unwrap();
        writer.write_all(chapter_html("On Magnitude", 40).as_bytes()).unwrap();

        writer.finish().unwrap();
    }

    #[test]
    fn parses_minimal_epub() {
        let dir = tempfile::tempdir().unwrap();
        let epub_path = dir.path().join("book.epub");
        write_test_epub(&epub_path);

        let book = parse_epub(&epub_path).unwrap();

        assert_eq!(book.title, "On Growth");
        assert_eq!(book.author, "D. Thompson");
        assert_eq!(book.language.as_deref(), Some("en"));
        // The ToC section is filtered; the two real chapters stay in spine
        // order with consecutive indices.
        assert_eq!(book.chapters.len(), 2);
        assert_eq!(book.chapters[0].index, 0);
        assert_eq!(book.chapters[0].title, "Form and Function");
        assert_eq!(book.chapters[1].index, 1);
        assert_eq!(book.chapters[1].title, "On Magnitude");
        assert!(book.chapters[0].word_count >= MIN_CONTENT_WORDS);
    }

    #[test]
    fn missing_container_is_not_an_epub() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.epub");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer.start_file("mimetype", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"application/epub+zip").unwrap();
        writer.finish().unwrap();

        assert!(matches!(parse_epub(&path), Err(AnkimineError::NotAnEpub(_))));
    }
}

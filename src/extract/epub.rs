use std::io::{Read, Seek};

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::Regex;

use super::ExtractedMetadata;

static ISBN_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:urn:isbn:|isbn:|isbn\s)([0-9\-]{10,17})").unwrap());
static ISBN_STANDALONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(97[89]\d{10})").unwrap());

struct Identifier {
    scheme: Option<String>,
    value: String,
}

struct ManifestItem {
    id: String,
    href: String,
    properties: String,
}

/// Parse EPUB metadata and cover from an archive reader. Never fails: a
/// malformed OPF simply yields an empty-ish result with `metadata_extracted
/// = false`, matching the "partial success" contract.
pub fn extract<R: Read + Seek>(reader: R) -> ExtractedMetadata {
    let mut meta = ExtractedMetadata::default();

    let mut archive = match zip::ZipArchive::new(reader) {
        Ok(a) => a,
        Err(_) => return meta,
    };

    let opf_path = match find_opf_path(&mut archive) {
        Some(p) => p,
        None => return meta,
    };

    let opf_data = match read_entry(&mut archive, &opf_path) {
        Some(d) => d,
        None => return meta,
    };

    populate_metadata(&opf_data, &mut meta);

    let opf_dir = match opf_path.rfind('/') {
        Some(i) => opf_path[..=i].to_string(),
        None => String::new(),
    };
    let (manifest, cover_meta_id) = parse_manifest(&opf_data);

    if let Some((bytes, href)) =
        resolve_cover(&mut archive, &opf_dir, &manifest, cover_meta_id.as_deref())
    {
        meta.cover_ext = Some(ext_from_href(&href));
        meta.cover_bytes = Some(bytes);
        meta.cover_extracted = true;
    }

    meta
}

fn populate_metadata(opf_data: &[u8], meta: &mut ExtractedMetadata) {
    let mut xml = Reader::from_reader(opf_data);
    xml.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current_text = String::new();

    let mut creator_role: Option<String> = None;
    let mut creators: Vec<String> = Vec::new();
    let mut identifier_scheme: Option<String> = None;
    let mut identifiers: Vec<Identifier> = Vec::new();
    let mut genres: Vec<String> = Vec::new();
    let mut any_field_found = false;

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                if local == "creator" {
                    creator_role = attr_value(e, &["role"], true);
                }
                if local == "identifier" {
                    identifier_scheme = attr_value(e, &["scheme"], true);
                }
                path.push(local);
                current_text.clear();
            }
            Ok(Event::Empty(_)) => {}
            Ok(Event::End(_)) => {
                let tag = path.last().map(|s| s.as_str()).unwrap_or("").to_string();
                let text = current_text.trim().to_string();
                match tag.as_str() {
                    "title" if in_metadata(&path) && meta.title.is_none() && !text.is_empty() => {
                        meta.title = Some(text);
                        any_field_found = true;
                    }
                    "creator" if in_metadata(&path) && !text.is_empty() => {
                        if creator_role.is_none() || creator_role.as_deref() == Some("aut") {
                            creators.push(text);
                        }
                        creator_role = None;
                        any_field_found = true;
                    }
                    "description" if in_metadata(&path) && meta.description.is_none() && !text.is_empty() => {
                        meta.description = Some(text);
                        any_field_found = true;
                    }
                    "publisher" if in_metadata(&path) && meta.publisher.is_none() && !text.is_empty() => {
                        meta.publisher = Some(text);
                        any_field_found = true;
                    }
                    "language" if in_metadata(&path) && meta.language.is_none() && !text.is_empty() => {
                        meta.language = Some(text);
                        any_field_found = true;
                    }
                    "date" if in_metadata(&path) && meta.publication_date.is_none() && !text.is_empty() => {
                        meta.publication_date = Some(text);
                        any_field_found = true;
                    }
                    "subject" if in_metadata(&path) && !text.is_empty() => {
                        genres.push(text);
                        any_field_found = true;
                    }
                    "identifier" if in_metadata(&path) && !text.is_empty() => {
                        identifiers.push(Identifier {
                            scheme: identifier_scheme.take(),
                            value: text,
                        });
                        any_field_found = true;
                    }
                    _ => {}
                }
                path.pop();
                current_text.clear();
            }
            Ok(Event::Text(ref e)) => {
                if let Ok(text) = e.decode() {
                    current_text.push_str(&text);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    meta.author = if creators.is_empty() {
        None
    } else {
        Some(creators.join(", "))
    };
    meta.genres = genres;
    meta.isbn = extract_isbn(&identifiers);
    meta.metadata_extracted = any_field_found;
}

fn extract_isbn(identifiers: &[Identifier]) -> Option<String> {
    for ident in identifiers {
        if let Some(scheme) = &ident.scheme {
            if scheme.eq_ignore_ascii_case("isbn") {
                let digits: String = ident.value.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() == 10 || digits.len() == 13 {
                    return Some(digits);
                }
            }
        }
        if let Some(caps) = ISBN_PREFIX_RE.captures(&ident.value) {
            let span = caps.get(1).unwrap().as_str();
            let digits: String = span.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() >= 10 {
                return Some(digits);
            }
        }
        if let Some(caps) = ISBN_STANDALONE_RE.captures(&ident.value) {
            return Some(caps.get(1).unwrap().as_str().to_string());
        }
    }
    None
}

fn resolve_cover<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    opf_dir: &str,
    manifest: &[ManifestItem],
    cover_meta_id: Option<&str>,
) -> Option<(Vec<u8>, String)> {
    if let Some(id) = cover_meta_id {
        if let Some(item) = manifest.iter().find(|m| m.id == id) {
            if let Some(result) = read_with_fallback(archive, opf_dir, &item.href) {
                return Some((result, item.href.clone()));
            }
        }
    }

    for item in manifest {
        if item.properties.split_whitespace().any(|p| p == "cover-image") {
            if let Some(result) = read_with_fallback(archive, opf_dir, &item.href) {
                return Some((result, item.href.clone()));
            }
        }
    }

    None
}

fn read_with_fallback<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    opf_dir: &str,
    href: &str,
) -> Option<Vec<u8>> {
    let resolved = resolve_path(opf_dir, href);
    read_entry(archive, &resolved).or_else(|| read_entry(archive, href))
}

fn find_opf_path<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> Option<String> {
    if let Some(data) = read_entry(archive, "META-INF/container.xml") {
        if let Some(path) = parse_container_xml(&data) {
            return Some(path);
        }
    }
    for i in 0..archive.len() {
        if let Ok(entry) = archive.by_index(i) {
            if entry.name().ends_with(".opf") {
                return Some(entry.name().to_string());
            }
        }
    }
    None
}

fn parse_container_xml(data: &[u8]) -> Option<String> {
    let mut xml = Reader::from_reader(data);
    xml.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => return None,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if local_name(e.name().as_ref()) == "rootfile" {
                    if let Some(path) = attr_value(e, &["full-path"], false) {
                        return Some(path);
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }
}

fn parse_manifest(data: &[u8]) -> (Vec<ManifestItem>, Option<String>) {
    let mut items = Vec::new();
    let mut cover_id = None;
    let mut xml = Reader::from_reader(data);
    xml.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local = local_name(e.name().as_ref());
                if local == "item" {
                    items.push(ManifestItem {
                        id: attr_value(e, &["id"], false).unwrap_or_default(),
                        href: attr_value(e, &["href"], false).unwrap_or_default(),
                        properties: attr_value(e, &["properties"], false).unwrap_or_default(),
                    });
                }
                if local == "meta" {
                    let name_attr = attr_value(e, &["name"], false).unwrap_or_default();
                    let content_attr = attr_value(e, &["content"], false).unwrap_or_default();
                    if name_attr == "cover" && !content_attr.is_empty() {
                        cover_id = Some(content_attr);
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }
    (items, cover_id)
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, keys: &[&str], suffix_match: bool) -> Option<String> {
    for attr in e.attributes().flatten() {
        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
        let matches = keys.iter().any(|k| {
            key == *k || (suffix_match && key.ends_with(&format!(":{k}")))
        });
        if matches {
            return Some(attr.unescape_value().unwrap_or_default().to_string());
        }
    }
    None
}

fn resolve_path(base_dir: &str, href: &str) -> String {
    if let Some(stripped) = href.strip_prefix('/') {
        stripped.to_string()
    } else {
        format!("{base_dir}{href}")
    }
}

fn local_name(raw: &[u8]) -> String {
    let s = std::str::from_utf8(raw).unwrap_or("");
    match s.rfind(':') {
        Some(i) => s[i + 1..].to_lowercase(),
        None => s.to_lowercase(),
    }
}

fn in_metadata(path: &[String]) -> bool {
    path.iter().any(|s| s == "metadata")
}

fn read_entry<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Option<Vec<u8>> {
    let mut entry = archive.by_name(name).ok()?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data).ok()?;
    Some(data)
}

/// Derives a cover file extension from the resolved href's filename, the
/// same way `comic::ext_for_image_name` does for comic archive entries.
/// Falls back to `jpg` only when the filename has no extension at all.
fn ext_from_href(href: &str) -> String {
    let name = href.rsplit('/').next().unwrap_or(href);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => "jpg".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn make_epub(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let cursor = Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(cursor);
        let opts = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, opts).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    const CONTAINER: &[u8] = br#"<container><rootfiles><rootfile full-path="OPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#;

    #[test]
    fn test_extract_metadata_and_cover() {
        let opf = br#"
            <package xmlns:dc="http://purl.org/dc/elements/1.1/">
              <metadata>
                <dc:title>Clean Code</dc:title>
                <dc:creator opf:role="aut">Robert C. Martin</dc:creator>
                <dc:creator opf:role="edt">Some Editor</dc:creator>
                <dc:publisher>Prentice Hall</dc:publisher>
                <dc:language>en</dc:language>
                <dc:date>2008-08-01</dc:date>
                <dc:subject>Software Engineering</dc:subject>
                <dc:identifier opf:scheme="ISBN">978-0-13-235088-4</dc:identifier>
                <meta name="cover" content="cover-img"/>
              </metadata>
              <manifest>
                <item id="cover-img" href="images/cover.jpg" media-type="image/jpeg"/>
              </manifest>
            </package>
        "#;
        let cover_bytes = b"\xFF\xD8\xFFcover";
        let epub = make_epub(&[
            ("META-INF/container.xml", CONTAINER),
            ("OPS/content.opf", opf),
            ("OPS/images/cover.jpg", cover_bytes),
        ]);

        let meta = extract(Cursor::new(epub));
        assert_eq!(meta.title.as_deref(), Some("Clean Code"));
        assert_eq!(meta.author.as_deref(), Some("Robert C. Martin"));
        assert_eq!(meta.publisher.as_deref(), Some("Prentice Hall"));
        assert_eq!(meta.language.as_deref(), Some("en"));
        assert_eq!(meta.publication_date.as_deref(), Some("2008-08-01"));
        assert_eq!(meta.genres, vec!["Software Engineering".to_string()]);
        assert_eq!(meta.isbn.as_deref(), Some("9780132350884"));
        assert!(meta.metadata_extracted);
        assert!(meta.cover_extracted);
        assert_eq!(meta.cover_ext.as_deref(), Some("jpg"));
        assert_eq!(meta.cover_bytes.unwrap(), cover_bytes);
    }

    #[test]
    fn test_isbn_standalone_978_in_free_text() {
        let opf = br#"
            <package xmlns:dc="http://purl.org/dc/elements/1.1/">
              <metadata>
                <dc:title>Some Book</dc:title>
                <dc:identifier>urn:uuid:ignored, 9780132350884 is the ISBN</dc:identifier>
              </metadata>
            </package>
        "#;
        let epub = make_epub(&[("META-INF/container.xml", CONTAINER), ("OPS/content.opf", opf)]);
        let meta = extract(Cursor::new(epub));
        assert_eq!(meta.isbn.as_deref(), Some("9780132350884"));
    }

    #[test]
    fn test_cover_image_property_fallback() {
        let opf = br#"
            <package xmlns:dc="http://purl.org/dc/elements/1.1/">
              <metadata><dc:title>No Meta Cover</dc:title></metadata>
              <manifest>
                <item id="img1" href="img1.png" media-type="image/png" properties="cover-image"/>
              </manifest>
            </package>
        "#;
        let cover = b"\x89PNGcover";
        let epub = make_epub(&[
            ("META-INF/container.xml", CONTAINER),
            ("OPS/content.opf", opf),
            ("OPS/img1.png", cover),
        ]);
        let meta = extract(Cursor::new(epub));
        assert!(meta.cover_extracted);
        assert_eq!(meta.cover_ext.as_deref(), Some("png"));
    }

    #[test]
    fn test_malformed_zip_returns_no_success() {
        let meta = extract(Cursor::new(b"not a zip".to_vec()));
        assert!(!meta.success());
    }
}

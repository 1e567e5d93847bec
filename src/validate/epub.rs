use std::io::{Read, Seek};

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::ValidationOutcome;

const EXPECTED_MIMETYPE: &str = "application/epub+zip";

/// Structural EPUB validation. Failure strings are exact and stable; the
/// Processor persists them verbatim as `failure_reason`.
pub fn validate<R: Read + Seek>(reader: R) -> ValidationOutcome {
    let mut archive = match zip::ZipArchive::new(reader) {
        Ok(a) => a,
        Err(_) => return ValidationOutcome::invalid("not a valid ZIP archive"),
    };

    let mimetype = match read_entry(&mut archive, "mimetype") {
        Some(data) => data,
        None => return ValidationOutcome::invalid("missing mimetype entry"),
    };
    let found = String::from_utf8_lossy(&mimetype).trim().to_string();
    if found != EXPECTED_MIMETYPE {
        return ValidationOutcome::invalid(format!(
            "mimetype mismatch: expected \"{EXPECTED_MIMETYPE}\", found \"{found}\""
        ));
    }

    let container = match read_entry(&mut archive, "META-INF/container.xml") {
        Some(data) => data,
        None => return ValidationOutcome::invalid("missing META-INF/container.xml"),
    };

    let rootfile = match parse_rootfile_path(&container) {
        Some(path) => path,
        None => return ValidationOutcome::invalid("missing rootfile full-path in container.xml"),
    };

    if archive.by_name(&rootfile).is_err() {
        return ValidationOutcome::invalid(format!(
            "missing content.opf at expected path: {rootfile}"
        ));
    }

    ValidationOutcome::ok(0, None, false)
}

fn parse_rootfile_path(data: &[u8]) -> Option<String> {
    let mut xml = Reader::from_reader(data);
    xml.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => return None,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if local_name(e.name().as_ref()) == "rootfile" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"full-path" {
                            let val = attr.unescape_value().unwrap_or_default();
                            return Some(val.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }
}

fn local_name(raw: &[u8]) -> String {
    let s = std::str::from_utf8(raw).unwrap_or("");
    match s.rfind(':') {
        Some(i) => s[i + 1..].to_lowercase(),
        None => s.to_lowercase(),
    }
}

fn read_entry<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Option<Vec<u8>> {
    let mut entry = archive.by_name(name).ok()?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data).ok()?;
    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
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

    fn valid_container() -> &'static [u8] {
        br#"<container><rootfiles><rootfile full-path="OPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#
    }

    #[test]
    fn test_valid_epub() {
        let zip = make_zip(&[
            ("mimetype", EXPECTED_MIMETYPE.as_bytes()),
            ("META-INF/container.xml", valid_container()),
            ("OPS/content.opf", b"<package/>"),
        ]);
        let outcome = validate(Cursor::new(zip));
        assert!(outcome.valid);
        assert!(outcome.reason.is_none());
    }

    #[test]
    fn test_bad_zip() {
        let outcome = validate(Cursor::new(b"not a zip".to_vec()));
        assert!(!outcome.valid);
        assert_eq!(outcome.reason.as_deref(), Some("not a valid ZIP archive"));
    }

    #[test]
    fn test_missing_mimetype() {
        let zip = make_zip(&[("META-INF/container.xml", valid_container())]);
        let outcome = validate(Cursor::new(zip));
        assert_eq!(outcome.reason.as_deref(), Some("missing mimetype entry"));
    }

    #[test]
    fn test_mismatched_mimetype() {
        let zip = make_zip(&[("mimetype", b"text/plain")]);
        let outcome = validate(Cursor::new(zip));
        assert_eq!(
            outcome.reason.as_deref(),
            Some("mimetype mismatch: expected \"application/epub+zip\", found \"text/plain\"")
        );
    }

    #[test]
    fn test_missing_container() {
        let zip = make_zip(&[("mimetype", EXPECTED_MIMETYPE.as_bytes())]);
        let outcome = validate(Cursor::new(zip));
        assert_eq!(
            outcome.reason.as_deref(),
            Some("missing META-INF/container.xml")
        );
    }

    #[test]
    fn test_missing_rootfile_path() {
        let zip = make_zip(&[
            ("mimetype", EXPECTED_MIMETYPE.as_bytes()),
            ("META-INF/container.xml", b"<container><rootfiles/></container>"),
        ]);
        let outcome = validate(Cursor::new(zip));
        assert_eq!(
            outcome.reason.as_deref(),
            Some("missing rootfile full-path in container.xml")
        );
    }

    #[test]
    fn test_missing_content_opf() {
        let zip = make_zip(&[
            ("mimetype", EXPECTED_MIMETYPE.as_bytes()),
            ("META-INF/container.xml", valid_container()),
        ]);
        let outcome = validate(Cursor::new(zip));
        assert_eq!(
            outcome.reason.as_deref(),
            Some("missing content.opf at expected path: OPS/content.opf")
        );
    }
}

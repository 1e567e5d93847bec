use std::io::{Read, Seek};

use super::{is_comic_info_name, is_image_name, ValidationOutcome};

/// Structural CBZ validation: must open as ZIP and contain at least one
/// image entry.
pub fn validate<R: Read + Seek>(reader: R) -> ValidationOutcome {
    let mut archive = match zip::ZipArchive::new(reader) {
        Ok(a) => a,
        Err(_) => return ValidationOutcome::invalid("not a valid ZIP archive"),
    };

    let mut images: Vec<String> = Vec::new();
    let mut has_comic_info = false;

    for i in 0..archive.len() {
        let Ok(entry) = archive.by_index(i) else {
            continue;
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if is_image_name(&name) {
            images.push(name.clone());
        }
        if is_comic_info_name(&name) {
            has_comic_info = true;
        }
    }

    if images.is_empty() {
        return ValidationOutcome::invalid("No image files found in archive");
    }

    images.sort();
    ValidationOutcome::ok(images.len(), Some(images[0].clone()), has_comic_info)
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

    #[test]
    fn test_valid_cbz_picks_first_image_alphabetically() {
        let zip = make_zip(&[
            ("003.jpg", b"c"),
            ("001.jpg", b"a"),
            ("002.png", b"b"),
            ("ComicInfo.xml", b"<ComicInfo/>"),
        ]);
        let outcome = validate(Cursor::new(zip));
        assert!(outcome.valid);
        assert_eq!(outcome.image_count, 3);
        assert_eq!(outcome.first_image_path.as_deref(), Some("001.jpg"));
        assert!(outcome.has_comic_info);
    }

    #[test]
    fn test_no_images_is_invalid() {
        let zip = make_zip(&[("readme.txt", b"hi")]);
        let outcome = validate(Cursor::new(zip));
        assert!(!outcome.valid);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("No image files found in archive")
        );
    }

    #[test]
    fn test_bad_zip() {
        let outcome = validate(Cursor::new(b"not a zip".to_vec()));
        assert_eq!(outcome.reason.as_deref(), Some("not a valid ZIP archive"));
    }

    #[test]
    fn test_nested_comic_info_detected() {
        let zip = make_zip(&[("001.jpg", b"a"), ("sub/comicinfo.xml", b"<x/>")]);
        let outcome = validate(Cursor::new(zip));
        assert!(outcome.has_comic_info);
    }
}

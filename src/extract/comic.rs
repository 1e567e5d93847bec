use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use unrar::Archive;

use super::ExtractedMetadata;

/// Extract metadata and cover from a CBZ (ZIP-backed) archive, given the
/// already-validated first-image path.
pub fn extract_cbz<R: Read + Seek>(reader: R, first_image_path: Option<&str>) -> ExtractedMetadata {
    let mut archive = match zip::ZipArchive::new(reader) {
        Ok(a) => a,
        Err(_) => return ExtractedMetadata::default(),
    };

    let entry_names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
        .collect();
    let comic_info_name = find_comic_info_name(&entry_names);
    let comic_info_bytes = comic_info_name.as_deref().and_then(|name| {
        let mut entry = archive.by_name(name).ok()?;
        let mut data = Vec::new();
        entry.read_to_end(&mut data).ok()?;
        Some(data)
    });

    let mut meta = extract_metadata(comic_info_bytes.as_deref());

    if let Some(path) = first_image_path {
        if let Ok(mut entry) = archive.by_name(path) {
            let mut data = Vec::new();
            if entry.read_to_end(&mut data).is_ok() {
                meta.cover_ext = Some(ext_for_image_name(path));
                meta.cover_bytes = Some(data);
                meta.cover_extracted = true;
            }
        }
    }

    meta
}

/// Extract metadata and cover from a CBR (RAR-backed) archive, given the
/// already-validated first-image path. `unrar`'s processing API streams
/// entries sequentially, so both files are picked up in one pass.
pub fn extract_cbr(path: &Path, first_image_path: Option<&str>) -> ExtractedMetadata {
    let Ok(archive) = Archive::new(path) else {
        return ExtractedMetadata::default();
    };
    let Ok(mut cursor) = archive.open_for_processing() else {
        return ExtractedMetadata::default();
    };

    let mut comic_info_bytes: Option<Vec<u8>> = None;
    let mut cover_bytes: Option<Vec<u8>> = None;

    while let Ok(Some(header)) = cursor.read_header() {
        let entry_name = header.entry().filename.to_string_lossy().replace('\\', "/");
        let is_comic_info = entry_name.to_ascii_lowercase().ends_with("comicinfo.xml");
        let is_cover = first_image_path.is_some_and(|p| p == entry_name);

        if is_comic_info || is_cover {
            match header.read() {
                Ok((data, next)) => {
                    if is_comic_info {
                        comic_info_bytes = Some(data.clone());
                    }
                    if is_cover {
                        cover_bytes = Some(data);
                    }
                    cursor = next;
                }
                Err(_) => break,
            }
        } else {
            match header.skip() {
                Ok(next) => cursor = next,
                Err(_) => break,
            }
        }
    }

    let mut meta = extract_metadata(comic_info_bytes.as_deref());
    if let (Some(path), Some(bytes)) = (first_image_path, cover_bytes) {
        meta.cover_ext = Some(ext_for_image_name(path));
        meta.cover_bytes = Some(bytes);
        meta.cover_extracted = true;
    }
    meta
}

/// Parse `ComicInfo.xml` content into metadata. `first_image` is the
/// already-resolved first-image entry name from validation; bytes are
/// supplied by the caller since CBZ/CBR read their entries differently.
pub fn extract_metadata(comic_info_xml: Option<&[u8]>) -> ExtractedMetadata {
    let mut meta = ExtractedMetadata::default();

    let Some(xml_bytes) = comic_info_xml else {
        return meta;
    };

    let mut reader = Reader::from_reader(xml_bytes);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut tag = String::new();
    let mut text = String::new();
    let mut genre_field: Option<String> = None;
    let mut year: Option<String> = None;
    let mut month: Option<String> = None;
    let mut day: Option<String> = None;
    let mut volume_field: Option<String> = None;
    let mut number_field: Option<String> = None;
    let mut any_field_found = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) => {
                tag = local_name(e.name().as_ref());
                text.clear();
            }
            Ok(Event::Text(ref e)) => {
                if let Ok(t) = e.decode() {
                    text.push_str(&t);
                }
            }
            Ok(Event::End(_)) => {
                let value = text.trim().to_string();
                if !value.is_empty() {
                    match tag.as_str() {
                        "title" => {
                            meta.title = Some(value);
                            any_field_found = true;
                        }
                        "writer" => {
                            meta.author = Some(value);
                            any_field_found = true;
                        }
                        "summary" => {
                            meta.description = Some(value);
                            any_field_found = true;
                        }
                        "series" => {
                            meta.series = Some(value);
                            any_field_found = true;
                        }
                        "volume" => {
                            volume_field = Some(value);
                            any_field_found = true;
                        }
                        "number" => {
                            number_field = Some(value);
                            any_field_found = true;
                        }
                        "genre" => {
                            genre_field = Some(value);
                            any_field_found = true;
                        }
                        "year" => {
                            year = Some(value);
                            any_field_found = true;
                        }
                        "month" => month = Some(value),
                        "day" => day = Some(value),
                        _ => {}
                    }
                }
                text.clear();
            }
            _ => {}
        }
        buf.clear();
    }

    meta.volume = volume_field
        .and_then(|v| v.parse::<i32>().ok())
        .or_else(|| number_field.and_then(|v| v.parse::<i32>().ok()));

    if let Some(genres) = genre_field {
        meta.genres = genres
            .split(',')
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();
    }

    meta.publication_date = year.map(|y| {
        let m = month.unwrap_or_else(|| "01".to_string());
        let d = day.unwrap_or_else(|| "01".to_string());
        format!("{y}-{m:0>2}-{d:0>2}")
    });

    meta.metadata_extracted = any_field_found;
    meta
}

/// Locate a `ComicInfo.xml` entry name at root or one level deep
/// (case-insensitive) from a list of archive entry names.
pub fn find_comic_info_name(entry_names: &[String]) -> Option<String> {
    entry_names
        .iter()
        .find(|name| {
            let normalized = name.to_ascii_lowercase();
            let depth = normalized.matches('/').count();
            normalized.ends_with("comicinfo.xml") && depth <= 1
        })
        .cloned()
}

pub fn ext_for_image_name(name: &str) -> String {
    name.rsplit('.')
        .next()
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string())
}

fn local_name(raw: &[u8]) -> String {
    let s = std::str::from_utf8(raw).unwrap_or("");
    match s.rfind(':') {
        Some(i) => s[i + 1..].to_lowercase(),
        None => s.to_lowercase(),
    }
    .to_ascii_lowercase()
}

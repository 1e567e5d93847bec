use std::path::Path;

use unrar::Archive;

use super::{is_comic_info_name, is_image_name, ValidationOutcome};

/// Structural CBR validation: identical semantics to CBZ but over a RAR
/// archive. Requires a filesystem path since `unrar` shells out to the
/// archive format's native extraction, not a generic `Read`.
pub fn validate(path: &Path) -> ValidationOutcome {
    if !path.exists() {
        return ValidationOutcome::invalid("file does not exist on disk");
    }

    let archive = match Archive::new(path) {
        Ok(a) => a,
        Err(_) => return ValidationOutcome::invalid("not a valid RAR archive"),
    };

    let listing = match archive.open_for_listing() {
        Ok(l) => l,
        Err(_) => return ValidationOutcome::invalid("not a valid RAR archive"),
    };

    let mut images: Vec<String> = Vec::new();
    let mut has_comic_info = false;
    let mut entry_count = 0usize;

    for entry in listing {
        let Ok(entry) = entry else {
            return ValidationOutcome::invalid("not a valid RAR archive");
        };
        if entry.is_directory() {
            continue;
        }
        entry_count += 1;
        let name = entry.filename.to_string_lossy().replace('\\', "/");
        if is_image_name(&name) {
            images.push(name.clone());
        }
        if is_comic_info_name(&name) {
            has_comic_info = true;
        }
    }

    if entry_count == 0 {
        return ValidationOutcome::invalid("empty archive");
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

    #[test]
    fn test_missing_file() {
        let outcome = validate(Path::new("/nonexistent/path/to/book.cbr"));
        assert!(!outcome.valid);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("file does not exist on disk")
        );
    }
}

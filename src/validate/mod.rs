pub mod cbr;
pub mod cbz;
pub mod epub;

/// Structural validation result. `reason` is one of the exact, stable
/// strings documented on each validator — callers persist it verbatim as
/// `failure_reason`.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: Option<String>,
    pub image_count: usize,
    pub first_image_path: Option<String>,
    pub has_comic_info: bool,
}

impl ValidationOutcome {
    fn ok(image_count: usize, first_image_path: Option<String>, has_comic_info: bool) -> Self {
        Self {
            valid: true,
            reason: None,
            image_count,
            first_image_path,
            has_comic_info,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            image_count: 0,
            first_image_path: None,
            has_comic_info: false,
        }
    }
}

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

fn is_image_name(name: &str) -> bool {
    name.rsplit('.')
        .next()
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|candidate| ext.eq_ignore_ascii_case(candidate))
        })
        .unwrap_or(false)
}

fn is_comic_info_name(name: &str) -> bool {
    let normalized = name.to_ascii_lowercase();
    normalized == "comicinfo.xml" || normalized.ends_with("/comicinfo.xml")
}

use once_cell::sync::Lazy;
use regex::Regex;

static VOLUME_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bv(?:ol(?:ume)?)?\.?\s*\d+").unwrap());
static TOME_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:tome|t)\s*\d+").unwrap());
static BRACKETED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip volume/tome markers and bracketed segments from a manga title
/// before handing it to an external search.
pub fn clean_manga_title(title: &str) -> String {
    let stripped = VOLUME_MARKER_RE.replace_all(title, "");
    let stripped = TOME_MARKER_RE.replace_all(&stripped, "");
    let stripped = BRACKETED_RE.replace_all(&stripped, "");
    WHITESPACE_RE.replace_all(stripped.trim(), " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_volume_marker() {
        assert_eq!(clean_manga_title("Berserk vol. 1"), "Berserk");
        assert_eq!(clean_manga_title("Berserk v1"), "Berserk");
        assert_eq!(clean_manga_title("Berserk Volume 12"), "Berserk");
    }

    #[test]
    fn test_strips_tome_marker() {
        assert_eq!(clean_manga_title("Naruto tome 5"), "Naruto");
        assert_eq!(clean_manga_title("Naruto t5"), "Naruto");
    }

    #[test]
    fn test_strips_bracketed_segments() {
        assert_eq!(
            clean_manga_title("One Piece [Digital] (2020)"),
            "One Piece"
        );
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(clean_manga_title("  Chainsaw   Man  "), "Chainsaw Man");
    }

    #[test]
    fn test_combined_marker_and_brackets() {
        assert_eq!(
            clean_manga_title("Berserk v01 [Dark Horse]"),
            "Berserk"
        );
    }
}

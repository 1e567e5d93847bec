use std::collections::HashSet;

/// Lower-case and strip everything but alphanumerics.
pub fn normalize_string(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Jaccard similarity over the character sets of two already-normalized
/// strings. Used for OpenLibrary title/author scoring and all manga-source
/// title-variant scoring.
pub fn char_jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<char> = a.chars().collect();
    let set_b: HashSet<char> = b.chars().collect();
    jaccard(&set_a, &set_b)
}

/// Jaccard similarity over whitespace-split words of two raw strings.
/// Used for Google Books title/author scoring.
pub fn word_jaccard(a: &str, b: &str) -> f64 {
    let normalize_word = |s: &str| normalize_string(s);
    let set_a: HashSet<String> = a.split_whitespace().map(normalize_word).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(normalize_word).collect();
    jaccard(&set_a, &set_b)
}

fn jaccard<T: std::hash::Hash + Eq>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Ebook match score: `60 * titleSim + 40 * bestAuthorSim`.
/// `author_sim` is the caller-computed max similarity across candidate
/// authors.
pub fn ebook_score(title_sim: f64, best_author_sim: f64) -> f64 {
    60.0 * title_sim + 40.0 * best_author_sim
}

/// Manga match score: `80 * bestTitleSim + bonuses`, bonuses supplied by
/// the caller per source.
pub fn manga_score(best_title_sim: f64, bonus: f64) -> f64 {
    80.0 * best_title_sim + bonus
}

pub const EBOOK_MATCH_THRESHOLD: f64 = 50.0;
pub const MANGA_MATCH_THRESHOLD: f64 = 40.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_string() {
        assert_eq!(normalize_string("Clean Code!"), "cleancode");
        assert_eq!(normalize_string("Robert C. Martin"), "robertcmartin");
    }

    #[test]
    fn test_char_jaccard_identical() {
        let a = normalize_string("Clean Code");
        assert_eq!(char_jaccard(&a, &a), 1.0);
    }

    #[test]
    fn test_char_jaccard_disjoint() {
        assert_eq!(char_jaccard("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_word_jaccard_partial_overlap() {
        let sim = word_jaccard("Clean Code", "Clean Coder");
        assert!(sim > 0.0 && sim < 1.0);
    }

    #[test]
    fn test_ebook_score_matches_formula() {
        assert_eq!(ebook_score(1.0, 1.0), 100.0);
        assert_eq!(ebook_score(0.5, 0.0), 30.0);
    }

    #[test]
    fn test_manga_score_with_bonus() {
        assert_eq!(manga_score(1.0, 10.0), 90.0);
    }

    #[test]
    fn test_thresholds() {
        assert!(ebook_score(1.0, 0.0) >= EBOOK_MATCH_THRESHOLD);
        assert!(manga_score(0.5, 0.0) < MANGA_MATCH_THRESHOLD);
    }
}

use strsim::levenshtein;

/// Edit distance scaled by the longer string's character count. Two empty
/// strings are identical, so 0.
pub fn normalized_distance(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0.0;
    }
    levenshtein(a, b) as f64 / longest as f64
}

/// Lowercases and drops everything outside `a-z0-9`, so "Arc Raiders" and
/// "ArcRaiders" compare equal.
pub fn normalize_compact(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

#[cfg(test)]
mod distance_tests {
    use super::*;

    #[test]
    fn identical_strings_have_zero_distance() {
        assert_eq!(normalized_distance("blender", "blender"), 0.0);
        assert_eq!(normalized_distance("", ""), 0.0);
    }

    #[test]
    fn distance_is_scaled_by_longer_string() {
        // One edit over seven characters.
        let dist = normalized_distance("portal2", "portal");
        assert!((dist - 1.0 / 7.0).abs() < 1e-9);

        assert_eq!(normalized_distance("abc", "xyz"), 1.0);
    }

    #[test]
    fn normalization_strips_separators_and_case() {
        assert_eq!(normalize_compact("Arc Raiders"), "arcraiders");
        assert_eq!(normalize_compact("ArcRaiders"), "arcraiders");
        assert_eq!(normalize_compact("Half-Life 2!"), "halflife2");
    }
}

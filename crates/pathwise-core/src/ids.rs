//! Deterministic entry identifiers.
//!
//! An entry id combines the document's position in the load order with a
//! normalized fragment of its title, e.g. `doc_0_intro_to_ownership`. The
//! same source directory always produces the same ids, which is what makes
//! a rebuild overwrite rather than accumulate. Two documents colliding on
//! an id is tolerated: the later one wins.

/// Maximum number of characters of the title kept in an id.
pub const TITLE_FRAGMENT_LEN: usize = 50;

/// Build the id for the document at `position` with the given `title`.
pub fn entry_id(position: usize, title: &str) -> String {
    format!("doc_{}_{}", position, title_fragment(title))
}

/// Lowercase the title, replace spaces with underscores, and truncate to
/// [`TITLE_FRAGMENT_LEN`] characters.
pub fn title_fragment(title: &str) -> String {
    title
        .replace(' ', "_")
        .to_lowercase()
        .chars()
        .take(TITLE_FRAGMENT_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_shape() {
        assert_eq!(entry_id(0, "Intro to Ownership"), "doc_0_intro_to_ownership");
        assert_eq!(entry_id(12, "SQL"), "doc_12_sql");
    }

    #[test]
    fn test_entry_id_is_deterministic() {
        assert_eq!(entry_id(3, "Async Rust"), entry_id(3, "Async Rust"));
    }

    #[test]
    fn test_fragment_truncates_on_char_boundary() {
        let title = "é".repeat(80);
        let fragment = title_fragment(&title);
        assert_eq!(fragment.chars().count(), TITLE_FRAGMENT_LEN);
    }

    #[test]
    fn test_position_disambiguates_equal_titles() {
        assert_ne!(entry_id(0, "Docker"), entry_id(1, "Docker"));
    }
}

//! # Version Negotiation
//!
//! Protocol versions are compared numerically after normalizing each string
//! to a three digit integer: dots are removed and the digits are padded on the
//! right, so `"2.2"` becomes `220` and `"2.1.1"` becomes `211`.

/// Normalizes a version string for ordering.
///
/// Returns `None` when the string contains anything but digits and dots.
///
/// ## Example
/// ```rust
/// use ampere_core::version::normalize_version;
///
/// assert_eq!(normalize_version("2.2"), Some(220));
/// assert_eq!(normalize_version("1.2.1"), Some(121));
/// assert_eq!(normalize_version("v2"), None);
/// ```
pub fn normalize_version(version: &str) -> Option<u32> {
    let digits: String = version.trim().chars().filter(|c| *c != '.').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let padded = format!("{:0<3}", digits);
    padded.parse().ok()
}

/// Picks the highest remote version that is also supported locally.
///
/// Remote versions are sorted descending and the first one whose normalized
/// value matches a local version wins. The remote spelling is returned, since
/// it keys the remote's version-details URL.
///
/// ## Example
/// ```rust
/// use ampere_core::version::find_proper_version;
///
/// let remote = vec!["1.5".to_string(), "1.2.1".to_string(), "2.0".to_string()];
/// let local = vec!["1.1.0".to_string(), "1.2.1".to_string()];
/// assert_eq!(find_proper_version(&remote, &local), Some("1.2.1".to_string()));
/// ```
pub fn find_proper_version(remote: &[String], local: &[String]) -> Option<String> {
    let local: Vec<u32> = local.iter().filter_map(|v| normalize_version(v)).collect();

    let mut candidates: Vec<(u32, &String)> = remote
        .iter()
        .filter_map(|v| normalize_version(v).map(|n| (n, v)))
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    candidates
        .into_iter()
        .find(|(normalized, _)| local.contains(normalized))
        .map(|(_, version)| version.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_common_version() {
        assert_eq!(
            find_proper_version(&v(&["1.1.0"]), &v(&["1.1.0", "1.2.0"])),
            Some("1.1.0".to_string())
        );
    }

    #[test]
    fn test_highest_common_version_wins() {
        assert_eq!(
            find_proper_version(&v(&["1.5", "1.2.1", "2.0"]), &v(&["1.1.0", "1.2.1"])),
            Some("1.2.1".to_string())
        );
    }

    #[test]
    fn test_empty_lists() {
        assert_eq!(find_proper_version(&[], &[]), None);
    }

    #[test]
    fn test_no_common_version() {
        assert_eq!(find_proper_version(&v(&["2.2"]), &v(&["2.1.1"])), None);
    }

    #[test]
    fn test_short_and_long_spellings_match() {
        // "2.2" and "2.2.0" normalize to the same value
        assert_eq!(
            find_proper_version(&v(&["2.1.1", "2.2"]), &v(&["2.2.0"])),
            Some("2.2".to_string())
        );
    }

    #[test]
    fn test_unparseable_versions_are_ignored() {
        assert_eq!(
            find_proper_version(&v(&["beta", "2.1.1"]), &v(&["2.1.1"])),
            Some("2.1.1".to_string())
        );
    }
}

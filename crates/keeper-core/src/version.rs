use std::cmp::Ordering;

/// Strip surrounding whitespace and one leading `v`/`V` from a release tag or
/// reported version string.
#[must_use]
pub fn normalize_version(version: &str) -> &str {
    let trimmed = version.trim();
    trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed)
}

/// Compare two dotted-numeric version strings.
///
/// Missing trailing components count as zero, so `1.2` equals `1.2.0`. When
/// either side is not purely dotted-numeric the raw strings are compared
/// byte-wise instead.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_components(a), parse_components(b)) {
        (Some(left), Some(right)) => {
            let len = left.len().max(right.len());
            (0..len)
                .map(|i| {
                    let l = left.get(i).copied().unwrap_or(0);
                    let r = right.get(i).copied().unwrap_or(0);
                    l.cmp(&r)
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        }
        _ => a.as_bytes().cmp(b.as_bytes()),
    }
}

/// Whether `latest` should be offered to an instance whose installed version
/// is `local`. A missing local version always needs a download.
#[must_use]
pub fn is_update_available(local: Option<&str>, latest: &str) -> bool {
    match local {
        None => true,
        Some(local) => {
            compare_versions(normalize_version(local), normalize_version(latest)) == Ordering::Less
        }
    }
}

fn parse_components(version: &str) -> Option<Vec<u64>> {
    if version.is_empty() {
        return None;
    }

    version
        .split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            part.parse::<u64>().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{compare_versions, is_update_available, normalize_version};

    #[test]
    fn equal_versions_compare_equal() {
        for version in ["0", "1.0", "1.4.2", "5.3.9.1", "10.0.0"] {
            assert_eq!(compare_versions(version, version), Ordering::Equal, "{version}");
        }
    }

    #[test]
    fn missing_components_are_zero() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2.0.0", "1.2"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.1"), Ordering::Less);
    }

    #[test]
    fn numeric_components_compare_numerically() {
        assert_eq!(compare_versions("2.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("5.0.7", "5.1.0"), Ordering::Less);
    }

    #[test]
    fn malformed_input_falls_back_to_byte_order() {
        assert_eq!(compare_versions("1.0-beta", "1.0"), Ordering::Greater);
        assert_eq!(compare_versions("abc", "abd"), Ordering::Less);
        assert_eq!(compare_versions("1..2", "1.2"), Ordering::Less);
        assert_eq!(compare_versions("+1", "1"), "+1".cmp("1"));
        // deterministic in both directions
        assert_eq!(
            compare_versions("nightly", "1.0"),
            compare_versions("1.0", "nightly").reverse()
        );
    }

    #[test]
    fn comparison_is_transitive_for_well_formed_versions() {
        let mut versions = vec!["1.10", "1.2.3", "0.9", "1.2", "2", "1.2.10", "1.2.3.1"];
        versions.sort_by(|a, b| compare_versions(a, b));
        assert_eq!(
            versions,
            vec!["0.9", "1.2", "1.2.3", "1.2.3.1", "1.2.10", "1.10", "2"]
        );
    }

    #[test]
    fn normalize_strips_single_leading_v() {
        assert_eq!(normalize_version("v2.3.0"), "2.3.0");
        assert_eq!(normalize_version(" V5.1 "), "5.1");
        assert_eq!(normalize_version("2.3.0"), "2.3.0");
    }

    #[test]
    fn update_available_rules() {
        assert!(is_update_available(None, "v1.0.0"));
        assert!(is_update_available(Some("2.2.9"), "v2.3.0"));
        assert!(!is_update_available(Some("2.3.0"), "v2.3.0"));
        assert!(!is_update_available(Some("v2.3"), "2.3.0"));
        assert!(!is_update_available(Some("2.4.0"), "v2.3.0"));
    }
}

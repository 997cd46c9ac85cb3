//! Loose version comparison, sorting and grouping.
//!
//! Version strings from mirrors and folder names do not follow one scheme
//! (`3.10.4`, `21.0.2+13`, `8u402`), so ordering only looks at digit runs.

use std::cmp::Reverse;
use tvm_config::{InstalledVersion, RemoteVersionEntry};

/// Something that carries a version string.
pub trait VersionLike {
    /// The version string.
    fn version(&self) -> &str;

    /// Whether the version is marked long-term-support.
    fn is_lts(&self) -> bool {
        false
    }
}

impl VersionLike for String {
    fn version(&self) -> &str {
        self
    }
}

impl VersionLike for &str {
    fn version(&self) -> &str {
        self
    }
}

impl VersionLike for RemoteVersionEntry {
    fn version(&self) -> &str {
        &self.version
    }

    fn is_lts(&self) -> bool {
        RemoteVersionEntry::is_lts(self)
    }
}

impl VersionLike for InstalledVersion {
    fn version(&self) -> &str {
        &self.version
    }
}

/// Extract every digit run as an integer, in order.
///
/// A string without digits yields `[0]`. Runs too large for `u64` saturate.
pub fn parse_key(version: &str) -> Vec<u64> {
    let key: Vec<u64> = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .map(|run| run.parse().unwrap_or(u64::MAX))
        .collect();
    if key.is_empty() { vec![0] } else { key }
}

/// Sort descending by [`parse_key`]. Equal keys keep their relative order.
pub fn sort_desc<T: VersionLike>(items: &mut [T]) {
    items.sort_by_cached_key(|item| Reverse(parse_key(item.version())));
}

/// Versions sharing a major component.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionGroup<T> {
    /// The first dot-delimited token, e.g. `"3"` for `"3.10.4"`.
    pub major: String,
    /// Whether any member is marked LTS.
    pub has_lts: bool,
    /// Members, newest first.
    pub versions: Vec<T>,
}

impl<T> VersionGroup<T> {
    /// Numeric value of the major token (0 when not a number).
    pub fn major_value(&self) -> u64 {
        self.major.parse().unwrap_or(0)
    }
}

/// Group by major version.
///
/// Groups are ordered by numeric major descending; each group's members are
/// sorted with [`sort_desc`].
pub fn group_by_major<T: VersionLike>(items: Vec<T>) -> Vec<VersionGroup<T>> {
    let mut items = items;
    sort_desc(&mut items);

    let mut groups: Vec<VersionGroup<T>> = Vec::new();
    for item in items {
        let major = item
            .version()
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();
        let lts = item.is_lts();
        match groups.iter_mut().find(|g| g.major == major) {
            Some(group) => {
                group.has_lts |= lts;
                group.versions.push(item);
            }
            None => groups.push(VersionGroup {
                major,
                has_lts: lts,
                versions: vec![item],
            }),
        }
    }

    groups.sort_by_key(|g| Reverse(g.major_value()));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(version: &str, lts: Option<bool>) -> RemoteVersionEntry {
        RemoteVersionEntry {
            version: version.to_string(),
            download_url: format!("https://example.com/{version}.zip"),
            release_date: None,
            lts,
        }
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("3.10.4"), vec![3, 10, 4]);
        assert_eq!(parse_key("v18.19.0"), vec![18, 19, 0]);
        assert_eq!(parse_key("21.0.2+13"), vec![21, 0, 2, 13]);
        assert_eq!(parse_key("8u402-b06"), vec![8, 402, 6]);
        assert_eq!(parse_key("latest"), vec![0]);
        assert_eq!(parse_key(""), vec![0]);
        assert_eq!(parse_key("99999999999999999999999"), vec![u64::MAX]);
    }

    #[test]
    fn test_sort_desc() {
        let mut versions = vec![
            "3.9.18".to_string(),
            "3.10.4".to_string(),
            "3.10".to_string(),
            "3.11.0".to_string(),
        ];
        sort_desc(&mut versions);
        assert_eq!(versions, vec!["3.11.0", "3.10.4", "3.10", "3.9.18"]);
    }

    #[test]
    fn test_sort_desc_is_stable() {
        let mut versions = vec!["v1.2", "1.2", "1-2", "0.1"];
        sort_desc(&mut versions);
        assert_eq!(versions, vec!["v1.2", "1.2", "1-2", "0.1"]);
    }

    #[test]
    fn test_group_by_major() {
        let groups = group_by_major(vec![
            remote("18.19.0", Some(true)),
            remote("20.11.0", Some(true)),
            remote("21.6.1", Some(false)),
            remote("20.10.0", None),
            remote("9.11.2", None),
        ]);

        let majors: Vec<_> = groups.iter().map(|g| g.major.as_str()).collect();
        assert_eq!(majors, vec!["21", "20", "18", "9"]);
        assert!(!groups[0].has_lts);
        assert!(groups[1].has_lts);

        let twenty: Vec<_> = groups[1].versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(twenty, vec!["20.11.0", "20.10.0"]);

        let total: usize = groups.iter().map(|g| g.versions.len()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_group_non_numeric_major_sorts_last() {
        let groups = group_by_major(vec!["jdk8".to_string(), "1.0".to_string()]);
        let majors: Vec<_> = groups.iter().map(|g| g.major.as_str()).collect();
        assert_eq!(majors, vec!["1", "jdk8"]);
        assert_eq!(groups[1].major_value(), 0);
    }
}

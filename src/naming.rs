//! Name validation for Kubernetes objects and image references.

use std::sync::OnceLock;

use regex::Regex;

/// RFC 1123 label: lowercase alphanumerics and '-', alphanumeric at both ends.
const DNS_LABEL_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

/// Docker repository path (without registry host or tag).
const REPOSITORY_PATTERN: &str = r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$";

const MAX_LABEL_LEN: usize = 63;

fn dns_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DNS_LABEL_PATTERN).expect("DNS label pattern is valid"))
}

fn repository_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(REPOSITORY_PATTERN).expect("repository pattern is valid"))
}

/// Returns true if `name` is a valid RFC 1123 label.
pub fn is_dns_label(name: &str) -> bool {
    name.len() <= MAX_LABEL_LEN && dns_label_regex().is_match(name)
}

/// Returns true if `name` is a valid image repository path.
pub fn is_image_repository(name: &str) -> bool {
    repository_regex().is_match(name)
}

/// Appends a random 8-hex suffix to `prefix`, truncating so the result stays a label.
pub fn unique_name(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let max_prefix = MAX_LABEL_LEN - 9;
    let prefix = prefix.get(..max_prefix).unwrap_or(prefix).trim_end_matches('-');
    format!("{}-{}", prefix, &suffix[..8])
}

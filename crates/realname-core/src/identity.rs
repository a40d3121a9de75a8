//! The real-name identity label
//!
//! Manifest authors declare a stable identity for an object by setting the
//! `realname-diff/realname` label. Objects whose literal name changes on every
//! content change (hash-suffixed ConfigMaps and Secrets) keep the same real
//! name, which is what live objects are matched by.

use std::collections::BTreeMap;

/// Label key carrying the stable identity of an object.
///
/// Shared between manifest authors and this tool; changing it breaks every
/// labelled manifest in the wild.
pub const REALNAME_LABEL: &str = "realname-diff/realname";

/// Annotation written by client-side apply holding the full previous object.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Extract the declared real name from an object's labels.
///
/// An empty label value counts as no identity at all.
pub fn real_name(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels
        .get(REALNAME_LABEL)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Label selector matching every object that declares `identity`.
pub fn identity_selector(identity: &str) -> String {
    format!("{}={}", REALNAME_LABEL, identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_real_name_present() {
        let l = labels(&[(REALNAME_LABEL, "my-realname")]);
        assert_eq!(real_name(&l), Some("my-realname"));
    }

    #[test]
    fn test_real_name_absent() {
        assert_eq!(real_name(&labels(&[("app", "myapp")])), None);
        assert_eq!(real_name(&BTreeMap::new()), None);
    }

    #[test]
    fn test_real_name_among_other_labels() {
        let l = labels(&[
            ("app", "myapp"),
            (REALNAME_LABEL, "my-realname"),
            ("env", "prod"),
        ]);
        assert_eq!(real_name(&l), Some("my-realname"));
    }

    #[test]
    fn test_real_name_empty_value_is_absent() {
        assert_eq!(real_name(&labels(&[(REALNAME_LABEL, "")])), None);
    }

    #[test]
    fn test_identity_selector() {
        assert_eq!(identity_selector("cfg"), "realname-diff/realname=cfg");
    }
}

// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

//! Label-name validation and stable 64-bit fingerprinting of label tuples.

use std::collections::BTreeMap;
use std::hash::Hasher;

use fnv::FnvHasher;

/// Inserted between hashed strings. 0xFF can never appear inside valid
/// UTF-8, so concatenation collisions across value boundaries are
/// impossible.
pub const SEPARATOR_BYTE: u8 = 0xFF;

/// Label names starting with this prefix are reserved for internal use
/// (`__name__` among them).
const RESERVED_LABEL_PREFIX: &str = "__";

/// Check the metric name against `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => return false,
        Some(c) => {
            if !(c.is_ascii_alphabetic() || c == '_' || c == ':') {
                return false;
            }
        }
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Check the label name against `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => return false,
        Some(c) => {
            if !(c.is_ascii_alphabetic() || c == '_') {
                return false;
            }
        }
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Label values may be any valid UTF-8, which a Rust `&str` is by
/// construction. Kept for symmetry with the other validators and for the
/// day raw byte input shows up at the boundary.
pub fn is_valid_label_value(_value: &str) -> bool {
    true
}

/// Whether the label name is reserved for internal use.
pub fn is_reserved_label_name(name: &str) -> bool {
    name.starts_with(RESERVED_LABEL_PREFIX)
}

/// Start a fresh FNV-1a hash.
pub fn hash_new() -> u64 {
    FnvHasher::default().finish()
}

/// Fold a string into the running hash.
pub fn hash_add(h: u64, s: &str) -> u64 {
    let mut hasher = FnvHasher::with_key(h);
    hasher.write(s.as_bytes());
    hasher.finish()
}

/// Fold a single byte into the running hash.
pub fn hash_add_byte(h: u64, b: u8) -> u64 {
    let mut hasher = FnvHasher::with_key(h);
    hasher.write(&[b]);
    hasher.finish()
}

/// Hash an ordered sequence of label values, one separator byte after each
/// value.
pub fn hash_label_values(h: u64, values: &[&str]) -> u64 {
    let mut h = h;
    for v in values {
        h = hash_add(h, v);
        h = hash_add_byte(h, SEPARATOR_BYTE);
    }
    h
}

/// Hash a name → value mapping in canonical (name-sorted) order, with a
/// separator after each name and each value.
pub fn hash_labels(h: u64, labels: &BTreeMap<&str, &str>) -> u64 {
    let mut h = h;
    for (name, value) in labels {
        h = hash_add(h, name);
        h = hash_add_byte(h, SEPARATOR_BYTE);
        h = hash_add(h, value);
        h = hash_add_byte(h, SEPARATOR_BYTE);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_name_validation() {
        let tbl = vec![
            ("http_requests_total", true),
            (":colon:start", true),
            ("_leading_underscore", true),
            ("0starts_with_digit", false),
            ("has space", false),
            ("has-dash", false),
            ("", false),
            ("日本語", false),
        ];
        for (name, valid) in tbl {
            assert_eq!(is_valid_metric_name(name), valid, "{:?}", name);
        }
    }

    #[test]
    fn test_label_name_validation() {
        let tbl = vec![
            ("method", true),
            ("_private", true),
            ("colon:not_allowed", false),
            ("9code", false),
            ("", false),
        ];
        for (name, valid) in tbl {
            assert_eq!(is_valid_label_name(name), valid, "{:?}", name);
        }
        assert!(is_reserved_label_name("__name__"));
        assert!(!is_reserved_label_name("_name"));
    }

    #[test]
    fn test_label_values_hash_stability() {
        let h1 = hash_label_values(hash_new(), &["a", "b"]);
        let h2 = hash_label_values(hash_new(), &["a", "b"]);
        assert_eq!(h1, h2);

        let h3 = hash_label_values(hash_new(), &["b", "a"]);
        assert_ne!(h1, h3);
    }

    // Concatenation across value boundaries must not collide thanks to the
    // separator byte.
    #[test]
    fn test_separator_prevents_concat_collisions() {
        let h1 = hash_label_values(hash_new(), &["ab", "c"]);
        let h2 = hash_label_values(hash_new(), &["a", "bc"]);
        assert_ne!(h1, h2);

        let mut m1 = BTreeMap::new();
        m1.insert("a", "b c");
        m1.insert("d", "e");
        let mut m2 = BTreeMap::new();
        m2.insert("a", "b");
        m2.insert("c", "d e");
        assert_ne!(hash_labels(hash_new(), &m1), hash_labels(hash_new(), &m2));
    }

    #[test]
    fn test_hash_labels_is_order_canonical() {
        let mut m = BTreeMap::new();
        m.insert("z", "1");
        m.insert("a", "2");
        let h1 = hash_labels(hash_new(), &m);

        let mut m2 = BTreeMap::new();
        m2.insert("a", "2");
        m2.insert("z", "1");
        assert_eq!(h1, hash_labels(hash_new(), &m2));
    }
}

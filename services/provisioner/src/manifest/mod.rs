//! Manifest bundles: parsing and templating.

mod document;
mod template;

use serde::Deserialize;

use crate::error::{ProvisionError, Result};

pub use document::ManifestDocument;
pub use template::{
    substitute, ManifestTemplater, TemplateContext, BROKER_ADDR_TOKEN, BROKER_PORT_TOKEN,
    BUILTIN_REQUIREMENTS_TOKEN, DIGEST_LABEL, USER_REQUIREMENTS_TOKEN,
};

/// Parse a multi-document YAML bundle. Empty documents are skipped.
pub fn parse_bundle(text: &str) -> Result<Vec<ManifestDocument>> {
    let mut documents = Vec::new();

    for (index, raw) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(raw).map_err(|e| {
            ProvisionError::configuration_with(
                format!("manifest document {} is not valid YAML", index + 1),
                e,
            )
        })?;
        if value.is_null() {
            continue;
        }
        documents.push(ManifestDocument::from_value(value)?);
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documents_in_order() {
        let bundle = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
---
---
apiVersion: v1
kind: Service
metadata:
  name: rexec-server
";
        let documents = parse_bundle(bundle).unwrap();
        let kinds: Vec<_> = documents.iter().map(ManifestDocument::kind).collect();
        assert_eq!(kinds, ["ConfigMap", "Service"]);
    }

    #[test]
    fn empty_bundle_has_no_documents() {
        assert!(parse_bundle("").unwrap().is_empty());
    }

    #[test]
    fn broken_yaml_is_a_configuration_error() {
        let err = parse_bundle("kind: [unclosed").unwrap_err();
        assert!(err.is_configuration());
    }
}

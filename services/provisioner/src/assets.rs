//! Packaged assets: manifest bundles and the built-in requirement list.

use std::path::{Path, PathBuf};

use rexec_requirements::Requirement;

use crate::error::{ProvisionError, Result};
use crate::manifest::{parse_bundle, ManifestDocument};

/// Read-only view of the assets directory.
#[derive(Debug, Clone)]
pub struct Assets {
    dir: PathBuf,
}

impl Assets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load and parse the manifest bundle `name`.
    pub async fn bundle(&self, name: &str) -> Result<Vec<ManifestDocument>> {
        let text = self.read(name).await?;
        parse_bundle(&text)
    }

    /// Load the built-in package list `name`.
    pub async fn builtin_requirements(&self, name: &str) -> Result<Vec<String>> {
        let text = self.read(name).await?;
        parse_builtin_requirements(&text)
    }

    async fn read(&self, name: &str) -> Result<String> {
        let path = self.dir.join(name);
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            ProvisionError::configuration_with(format!("failed to read asset {}", path.display()), e)
        })
    }
}

/// Strip blank and comment lines; every remaining line must be a valid
/// requirement.
pub fn parse_builtin_requirements(text: &str) -> Result<Vec<String>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            Requirement::parse(line).map(|_| line.to_string()).map_err(|e| {
                ProvisionError::configuration_with(
                    format!("invalid built-in requirement '{line}'"),
                    e,
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comments_and_blank_lines() {
        let text = "# worker runtime\npyzmq==25.1\n\n   \n  # pinned for pickling\ndill>=0.3\n";
        assert_eq!(
            parse_builtin_requirements(text).unwrap(),
            ["pyzmq==25.1", "dill>=0.3"]
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        let err = parse_builtin_requirements("pyzmq==25.1\n==oops\n").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("==oops"));
    }

    #[tokio::test]
    async fn missing_asset_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let assets = Assets::new(dir.path());

        let err = assets.bundle("absent.yaml").await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn reads_files_from_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "dill\n").unwrap();
        std::fs::write(
            dir.path().join("bundle.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n",
        )
        .unwrap();
        let assets = Assets::new(dir.path());

        assert_eq!(assets.builtin_requirements("requirements.txt").await.unwrap(), ["dill"]);
        assert_eq!(assets.bundle("bundle.yaml").await.unwrap().len(), 1);
    }
}

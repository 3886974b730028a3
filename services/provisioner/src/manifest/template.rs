//! Manifest templating.
//!
//! Every document is moved into the target namespace. Deployments
//! additionally get the digest label, the runtime image and the worker
//! start command filled in.

use std::borrow::Cow;
use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use rexec_requirements::{Fingerprint, RequirementSpec};

use super::ManifestDocument;
use crate::config::ProvisionerSettings;
use crate::error::{ProvisionError, Result};

/// Label carrying the requirement fingerprint.
pub const DIGEST_LABEL: &str = "digest";

pub const BUILTIN_REQUIREMENTS_TOKEN: &str = "${builtin_requirements}";
pub const USER_REQUIREMENTS_TOKEN: &str = "${user_requirements}";
pub const BROKER_ADDR_TOKEN: &str = "${broker_addr}";
pub const BROKER_PORT_TOKEN: &str = "${broker_port}";

/// Per-request values injected into the bundle.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub namespace: &'a str,
    pub fingerprint: &'a Fingerprint,
    pub spec: &'a RequirementSpec,
    pub builtin_requirements: &'a [String],
    pub broker_addr: &'a str,
}

/// Applies a [`TemplateContext`] to a bundle.
#[derive(Debug, Clone)]
pub struct ManifestTemplater {
    container_name: String,
    runtime_image: String,
    broker_port: u16,
}

impl ManifestTemplater {
    pub fn new(settings: &ProvisionerSettings) -> Self {
        Self {
            container_name: settings.container_name.clone(),
            runtime_image: settings.runtime_image.clone(),
            broker_port: settings.broker.port,
        }
    }

    pub fn render(
        &self,
        documents: Vec<ManifestDocument>,
        ctx: &TemplateContext<'_>,
    ) -> Result<Vec<ManifestDocument>> {
        documents
            .into_iter()
            .map(|mut document| {
                document.metadata_mut().namespace = Some(ctx.namespace.to_string());
                if let ManifestDocument::Deployment(deployment) = &mut document {
                    self.render_deployment(deployment, ctx)?;
                }
                Ok(document)
            })
            .collect()
    }

    fn render_deployment(&self, deployment: &mut Deployment, ctx: &TemplateContext<'_>) -> Result<()> {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let digest = ctx.fingerprint.to_string();

        deployment
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(DIGEST_LABEL.to_string(), digest.clone());

        let template = &mut deployment
            .spec
            .as_mut()
            .ok_or_else(|| ProvisionError::configuration(format!("deployment '{name}' has no spec")))?
            .template;

        template
            .metadata
            .get_or_insert_with(Default::default)
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(DIGEST_LABEL.to_string(), digest);

        let container = template
            .spec
            .as_mut()
            .and_then(|pod| {
                pod.containers
                    .iter_mut()
                    .find(|c| c.name == self.container_name)
            })
            .ok_or_else(|| {
                ProvisionError::configuration(format!(
                    "deployment '{name}' has no container named '{}'",
                    self.container_name
                ))
            })?;

        container.image = Some(format!("{}:{}", self.runtime_image, ctx.spec.runtime_version()));

        // The start script is the last element of `command`, or of `args`
        // when the image entrypoint is kept.
        let script = [container.command.as_mut(), container.args.as_mut()]
            .into_iter()
            .flatten()
            .find_map(|list| list.last_mut())
            .ok_or_else(|| {
                ProvisionError::configuration(format!(
                    "container '{}' in deployment '{name}' has no command to template",
                    self.container_name
                ))
            })?;

        let builtin = shell_words(ctx.builtin_requirements);
        let user = shell_words(ctx.spec.packages());
        let port = self.broker_port.to_string();
        *script = substitute(
            script.as_str(),
            &[
                (BUILTIN_REQUIREMENTS_TOKEN, builtin.as_str()),
                (USER_REQUIREMENTS_TOKEN, user.as_str()),
                (BROKER_ADDR_TOKEN, ctx.broker_addr),
                (BROKER_PORT_TOKEN, port.as_str()),
            ],
        );

        Ok(())
    }
}

/// Join requirement lines into `sh` words. A line holding anything the shell
/// would interpret (redirects, separators, spaces, quotes, globs) is
/// single-quoted.
pub fn shell_words(values: &[String]) -> String {
    values
        .iter()
        .map(|value| shell_word(value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_word(value: &str) -> Cow<'_, str> {
    let plain = !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '.' | '_' | '-' | '=' | '+' | ',' | '/' | ':' | '@' | '%')
        });
    if plain {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("'{}'", value.replace('\'', r"'\''")))
    }
}

/// Replace every token in a single pass, so substituted values are never
/// scanned for further tokens.
pub fn substitute(template: &str, replacements: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let next = replacements
            .iter()
            .filter_map(|(token, value)| rest.find(token).map(|at| (at, *token, *value)))
            .min_by_key(|(at, _, _)| *at);

        match next {
            Some((at, token, value)) => {
                out.push_str(&rest[..at]);
                out.push_str(value);
                rest = &rest[at + token.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_bundle;

    const BUNDLE: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: rexec-server
  labels:
    app: rexec-server
spec:
  selector:
    matchLabels:
      app: rexec-server
  template:
    metadata:
      labels:
        app: rexec-server
    spec:
      containers:
        - name: sidecar
          image: busybox
          command: ["sh", "-c", "${user_requirements}"]
        - name: rexec-server
          image: placeholder
          command:
            - /bin/sh
            - -c
            - pip install ${builtin_requirements} ${user_requirements} && run --broker ${broker_addr}:${broker_port}
---
apiVersion: v1
kind: Service
metadata:
  name: rexec-server
spec:
  selector:
    app: rexec-server
"#;

    fn render(spec: &RequirementSpec) -> Vec<ManifestDocument> {
        let settings = ProvisionerSettings::default();
        let fingerprint = spec.fingerprint();
        let builtin = vec!["pyzmq==25.1".to_string(), "dill".to_string()];
        let ctx = TemplateContext {
            namespace: "rexec-server-lab",
            fingerprint: &fingerprint,
            spec,
            builtin_requirements: &builtin,
            broker_addr: "10.96.0.12",
        };
        ManifestTemplater::new(&settings)
            .render(parse_bundle(BUNDLE).unwrap(), &ctx)
            .unwrap()
    }

    fn worker(documents: &[ManifestDocument]) -> &Deployment {
        match &documents[0] {
            ManifestDocument::Deployment(d) => d,
            other => panic!("expected deployment, got {}", other.kind()),
        }
    }

    #[test]
    fn deployment_is_fully_templated() {
        let spec = RequirementSpec::parse(["python==3.11", "numpy==1.2", "pandas"]).unwrap();
        let documents = render(&spec);
        let deployment = worker(&documents);
        let digest = spec.fingerprint().to_string();

        assert_eq!(deployment.metadata.namespace.as_deref(), Some("rexec-server-lab"));
        assert_eq!(documents[0].label(DIGEST_LABEL), Some(digest.as_str()));

        let pod = &deployment.spec.as_ref().unwrap().template;
        let pod_labels = pod.metadata.as_ref().unwrap().labels.as_ref().unwrap();
        assert_eq!(pod_labels.get(DIGEST_LABEL), Some(&digest));
        assert_eq!(pod_labels.get("app").map(String::as_str), Some("rexec-server"));

        let containers = &pod.spec.as_ref().unwrap().containers;
        let server = &containers[1];
        assert_eq!(server.image.as_deref(), Some("python:3.11"));
        assert_eq!(
            server.command.as_ref().unwrap().last().map(String::as_str),
            Some("pip install pyzmq==25.1 dill numpy==1.2 pandas && run --broker 10.96.0.12:5560")
        );
    }

    #[test]
    fn other_containers_are_untouched() {
        let spec = RequirementSpec::parse(["python==3.12", "rich"]).unwrap();
        let documents = render(&spec);
        let pod = &worker(&documents).spec.as_ref().unwrap().template;
        let sidecar = &pod.spec.as_ref().unwrap().containers[0];

        assert_eq!(sidecar.image.as_deref(), Some("busybox"));
        assert_eq!(
            sidecar.command.as_ref().unwrap().last().map(String::as_str),
            Some("${user_requirements}")
        );
    }

    #[test]
    fn other_kinds_only_get_a_namespace() {
        let spec = RequirementSpec::parse(["python==3.12"]).unwrap();
        let documents = render(&spec);

        assert_eq!(documents[1].kind(), "Service");
        assert_eq!(documents[1].metadata().namespace.as_deref(), Some("rexec-server-lab"));
        assert_eq!(documents[1].label(DIGEST_LABEL), None);
    }

    #[test]
    fn missing_container_is_a_configuration_error() {
        let settings = ProvisionerSettings {
            container_name: "not-there".to_string(),
            ..Default::default()
        };
        let spec = RequirementSpec::parse(["python==3.12"]).unwrap();
        let fingerprint = spec.fingerprint();
        let ctx = TemplateContext {
            namespace: "ns",
            fingerprint: &fingerprint,
            spec: &spec,
            builtin_requirements: &[],
            broker_addr: "10.0.0.1",
        };

        let err = ManifestTemplater::new(&settings)
            .render(parse_bundle(BUNDLE).unwrap(), &ctx)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn substitution_is_single_pass() {
        let out = substitute(
            "a=${user_requirements} b=${broker_addr} c=${user_requirements}",
            &[
                (USER_REQUIREMENTS_TOKEN, "${broker_addr}"),
                (BROKER_ADDR_TOKEN, "10.0.0.1"),
            ],
        );
        assert_eq!(out, "a=${broker_addr} b=10.0.0.1 c=${broker_addr}");
    }

    #[test]
    fn substitution_without_tokens_is_identity() {
        assert_eq!(substitute("run", &[(BROKER_PORT_TOKEN, "5560")]), "run");
    }

    #[test]
    fn requirement_lines_are_shell_quoted() {
        let spec = RequirementSpec::parse([
            "python==3.11",
            "numpy>=1.2,<2",
            "requests[socks]",
            "pywin32; sys_platform == 'win32'",
        ])
        .unwrap();
        let documents = render(&spec);
        let pod = &worker(&documents).spec.as_ref().unwrap().template;
        let script = pod.spec.as_ref().unwrap().containers[1]
            .command
            .as_ref()
            .unwrap()
            .last()
            .unwrap();

        assert_eq!(
            script,
            r#"pip install pyzmq==25.1 dill 'numpy>=1.2,<2' 'requests[socks]' 'pywin32; sys_platform == '\''win32'\''' && run --broker 10.96.0.12:5560"#
        );
    }

    #[test]
    fn plain_words_are_left_bare() {
        let words = vec!["pandas".to_string(), "torch==2.1+cpu".to_string()];
        assert_eq!(shell_words(&words), "pandas torch==2.1+cpu");
    }
}

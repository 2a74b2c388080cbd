//! Maps a connection's upgrade path to the command that backs its terminal.
//!
//! Clients open `/ws/{namespace}/{pod}/{container}/shell`. The path is parsed
//! into a [`ShellTarget`] and a [`CommandResolver`] turns it into an ordered
//! list of [`CommandSpec`] candidates; the server spawns the first one that
//! starts.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::config::SessionConfig;
use crate::session::CommandSpec;

/// Trailing path segments accepted after the container name.
const SHELL_SUFFIXES: &[&str] = &["shell", "webshell"];

/// Errors that can occur while resolving a target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The path does not have the `/ws/{namespace}/{pod}/{container}/shell` shape.
    #[error("no shell endpoint at {0}")]
    InvalidPath(String),

    /// A target segment is empty or contains characters outside `[A-Za-z0-9._-]`.
    #[error("invalid {field}: {value:?}")]
    InvalidSegment { field: &'static str, value: String },

    /// There is nothing to run for the target.
    #[error("no shell candidates configured")]
    NoCandidates,
}

/// The workload a terminal is opened for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ShellTarget {
    /// Kubernetes namespace.
    pub namespace: String,
    /// Pod name.
    pub pod: String,
    /// Container within the pod.
    pub container: String,
}

impl ShellTarget {
    /// Creates a target from its three segments, unvalidated.
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }

    /// Parses an upgrade request path. Any query string is ignored.
    pub fn from_path(path: &str) -> Result<Self, ResolveError> {
        let path_only = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path_only.trim_end_matches('/').split('/').collect();

        let ["", "ws", namespace, pod, container, suffix] = segments.as_slice() else {
            return Err(ResolveError::InvalidPath(path.to_string()));
        };
        if !SHELL_SUFFIXES.contains(suffix) {
            return Err(ResolveError::InvalidPath(path.to_string()));
        }

        Ok(Self::new(
            validate_segment("namespace", namespace)?,
            validate_segment("pod", pod)?,
            validate_segment("container", container)?,
        ))
    }
}

impl fmt::Display for ShellTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

fn validate_segment<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ResolveError> {
    let valid = !value.is_empty()
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
    if valid {
        Ok(value)
    } else {
        Err(ResolveError::InvalidSegment {
            field,
            value: value.to_string(),
        })
    }
}

/// Turns a target into the commands that may serve it, in order of preference.
pub trait CommandResolver: Send + Sync {
    fn resolve(&self, target: &ShellTarget) -> Result<Vec<CommandSpec>, ResolveError>;
}

/// Resolver driven by a list of shells and an optional exec template.
///
/// With an empty template each shell runs locally. Otherwise every template
/// element has `{namespace}`, `{pod}`, `{container}` and `{shell}` replaced,
/// once per shell, and the first element is the program to run.
#[derive(Debug, Clone, Default)]
pub struct TemplateResolver {
    shells: Vec<String>,
    template: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

impl TemplateResolver {
    pub fn new(shells: Vec<String>, template: Vec<String>) -> Self {
        Self {
            shells,
            template,
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Builds a resolver from the `[session]` configuration section.
    pub fn from_config(config: &SessionConfig) -> Self {
        let mut resolver = Self::new(config.shells.clone(), config.exec_template.clone())
            .with_env(config.env.clone());
        if let Some(ref cwd) = config.cwd {
            resolver = resolver.with_cwd(cwd.clone());
        }
        resolver
    }

    /// Adds environment variables to every resolved command.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Sets the working directory of every resolved command.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    fn build(&self, target: &ShellTarget, shell: &str) -> Option<CommandSpec> {
        let mut parts = if self.template.is_empty() {
            vec![shell.to_string()]
        } else {
            self.template
                .iter()
                .map(|part| substitute(part, target, shell))
                .collect()
        }
        .into_iter();

        let program = parts.next().filter(|p| !p.is_empty())?;
        let mut spec = CommandSpec::new(program)
            .args(parts)
            .env("WEBSHELL_NAMESPACE", &target.namespace)
            .env("WEBSHELL_POD", &target.pod)
            .env("WEBSHELL_CONTAINER", &target.container);
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        if let Some(ref cwd) = self.cwd {
            spec = spec.cwd(cwd);
        }
        Some(spec)
    }
}

impl CommandResolver for TemplateResolver {
    fn resolve(&self, target: &ShellTarget) -> Result<Vec<CommandSpec>, ResolveError> {
        let candidates: Vec<CommandSpec> = self
            .shells
            .iter()
            .filter_map(|shell| self.build(target, shell))
            .collect();

        if candidates.is_empty() {
            return Err(ResolveError::NoCandidates);
        }
        Ok(candidates)
    }
}

fn substitute(part: &str, target: &ShellTarget, shell: &str) -> String {
    part.replace("{namespace}", &target.namespace)
        .replace("{pod}", &target.pod)
        .replace("{container}", &target.container)
        .replace("{shell}", shell)
}

//! Server configuration loaded from a YAML file.
//!
//! `${VAR}` references in `sourcerCmd`, `serviceUrl`, `listenAddr` and
//! `graderFile` are replaced from the process environment after parsing;
//! a reference to an unset variable is fatal. Comments and the inline
//! grading script are left alone, so Rhai's `${expr}` interpolation works
//! in `graderFunc`.
//!
//! A grader call that overruns `stepTimeoutSecs` keeps running on its
//! blocking thread and holds the engine until it returns, so a step
//! timeout is only accepted together with `maxOperations`.
//!
//! | Key               | Required | Meaning                                      |
//! |-------------------|----------|----------------------------------------------|
//! | `graderFunc`      | one of   | grading script source                        |
//! | `graderFile`      | one of   | path to the grading script, relative to the config file |
//! | `sourcerCmd`      | yes      | shell command launching the sourcer plugin   |
//! | `serviceUrl`      | yes      | scoring service endpoint                     |
//! | `listenAddr`      | yes      | Modbus TCP listen address, e.g. `0.0.0.0:5020` |
//! | `stepTimeoutSecs` | no       | per-step timeout for each run; needs `maxOperations` |
//! | `maxOperations`   | no       | Rhai operation limit per grader call         |

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing environment variable(s): {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("Failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Config key `{0}` is required and must not be empty")]
    Missing(&'static str),

    #[error("Set only one of `graderFunc` and `graderFile`")]
    ConflictingGrader,

    #[error("Failed to read grader file {}: {}", .path.display(), .source)]
    GraderFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`stepTimeoutSecs` must be greater than zero")]
    ZeroStepTimeout,

    #[error("`stepTimeoutSecs` requires `maxOperations` to bound the grader")]
    UnboundedGrader,
}

/// The file as written, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    grader_func: Option<String>,
    grader_file: Option<String>,
    sourcer_cmd: Option<String>,
    service_url: Option<String>,
    listen_addr: Option<String>,
    step_timeout_secs: Option<u64>,
    max_operations: Option<u64>,
}

/// Validated server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Grading script source, read from `graderFile` when that was given.
    pub grader_script: String,
    pub sourcer_cmd: String,
    pub service_url: String,
    pub listen_addr: String,
    pub step_timeout: Option<Duration>,
    pub max_operations: Option<u64>,
}

impl Config {
    /// Read, substitute and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml_str(&content, base_dir)
    }

    /// Parse a config document. A relative `graderFile` resolves against
    /// `base_dir`.
    pub fn from_yaml_str(yaml: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        // An empty or comment-only document has no mapping to deserialize.
        let blank = yaml
            .lines()
            .map(str::trim)
            .all(|line| line.is_empty() || line.starts_with('#'));
        let mut raw: RawConfig = if blank {
            RawConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };

        let mut missing = Vec::new();
        for value in [
            &mut raw.sourcer_cmd,
            &mut raw.service_url,
            &mut raw.listen_addr,
            &mut raw.grader_file,
        ]
        .into_iter()
        .flatten()
        {
            *value = expand_env_vars(value, &mut missing);
        }
        if !missing.is_empty() {
            return Err(missing_env(missing));
        }

        let grader_script = match (non_empty(raw.grader_func), raw.grader_file) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingGrader),
            (Some(script), None) => script,
            (None, Some(file)) => {
                let path = base_dir.join(file.trim());
                let script = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::GraderFile { path, source })?;
                non_empty(Some(script)).ok_or(ConfigError::Missing("graderFile"))?
            }
            (None, None) => return Err(ConfigError::Missing("graderFunc")),
        };

        match (raw.step_timeout_secs, raw.max_operations) {
            (Some(0), _) => return Err(ConfigError::ZeroStepTimeout),
            (Some(_), None) => return Err(ConfigError::UnboundedGrader),
            _ => {}
        }

        Ok(Self {
            grader_script,
            sourcer_cmd: required(raw.sourcer_cmd, "sourcerCmd")?,
            service_url: required(raw.service_url, "serviceUrl")?,
            listen_addr: required(raw.listen_addr, "listenAddr")?,
            step_timeout: raw.step_timeout_secs.map(Duration::from_secs),
            max_operations: raw.max_operations,
        })
    }
}

/// Substitute `${VAR_NAME}` patterns with environment variable values,
/// reporting every unset variable at once.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing = Vec::new();
    let result = expand_env_vars(input, &mut missing);
    if !missing.is_empty() {
        return Err(missing_env(missing));
    }
    Ok(result)
}

/// Expand `input`, appending the names of unset variables to `missing`.
fn expand_env_vars(input: &str, missing: &mut Vec<String>) -> String {
    ENV_VAR_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                missing.push(caps[1].to_string());
                String::new()
            })
        })
        .into_owned()
}

fn missing_env(mut missing: Vec<String>) -> ConfigError {
    missing.sort();
    missing.dedup();
    ConfigError::MissingEnv(missing)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    non_empty(value).ok_or(ConfigError::Missing(key))
}

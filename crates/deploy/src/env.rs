//! Environment placeholders in deployment arguments.
//!
//! Arguments may embed `${NAME}` or `${NAME:-default}`. They are resolved in a pre-flight pass so
//! a missing value fails the run before anything is sent to the chain.

use std::collections::HashMap;

use crate::DeployError;

/// Source of environment values.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Substitute every placeholder in `value`.
pub fn resolve_placeholders(value: &str, env: &impl EnvSource) -> Result<String, DeployError> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            DeployError::Configuration(format!("unterminated placeholder in `{value}`"))
        })?;

        let expr = &after[..end];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name.trim(), Some(default)),
            None => (expr.trim(), None),
        };
        if name.is_empty() {
            return Err(DeployError::Configuration(format!(
                "empty placeholder in `{value}`"
            )));
        }

        let resolved = match (env.var(name).filter(|v| !v.is_empty()), default) {
            (Some(v), _) => v,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                return Err(DeployError::Configuration(format!(
                    "required environment variable {name} is not set"
                )));
            }
        };
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Resolve a list of arguments in place.
pub fn resolve_all(values: &mut [String], env: &impl EnvSource) -> Result<(), DeployError> {
    for value in values.iter_mut() {
        *value = resolve_placeholders(value, env)?;
    }
    Ok(())
}

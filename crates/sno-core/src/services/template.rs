use regex::Regex;
use std::sync::LazyLock;

use crate::error::{OrchestratorError, Result};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Z_]+)\s*\}\}").unwrap());

/// Compose descriptor of a single MySQL instance published on `{{PORT}}`.
pub const MYSQL_COMPOSE: &str = include_str!("../../resources/mysql-compose.yaml");

/// Compose descriptor of a single Redis instance named `{{NAME}}-redis`,
/// published on `{{PORT}}`.
pub const REDIS_COMPOSE: &str = include_str!("../../resources/redis-compose.yaml");

/// Cache monitor: `cache-monitor.sh <port> <csv>`.
pub const CACHE_MONITOR: &str = include_str!("../../resources/cache-monitor.sh");

/// Substitute every `{{NAME}}` placeholder. A placeholder without a binding
/// is an error, so a descriptor never reaches a node half-rendered.
pub fn render(template: &str, bindings: &[(&str, &str)]) -> Result<String> {
    let mut missing = Vec::new();
    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        match bindings.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => value.to_string(),
            None => {
                missing.push(key.to_string());
                caps[0].to_string()
            }
        }
    });
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(OrchestratorError::Template(format!(
            "no value for {}",
            missing.join(", ")
        )));
    }
    Ok(rendered.into_owned())
}

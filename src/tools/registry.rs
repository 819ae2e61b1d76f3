//! Static table of external MCP tool providers.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};

/// Launch description for one external tool provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProviderSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

impl ToolProviderSpec {
    pub fn new(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            env: None,
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }
}

/// Validated, immutable set of tool provider specs.
#[derive(Debug, Clone)]
pub struct ToolProviderRegistry {
    specs: Vec<ToolProviderSpec>,
}

impl ToolProviderRegistry {
    /// Validates `specs` and resolves `${VAR}` references in args and env with `lookup`.
    pub fn from_specs<F>(specs: Vec<ToolProviderSpec>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(specs.len());

        for mut spec in specs {
            if spec.name.trim().is_empty() {
                return Err(BotError::Config(
                    "tool provider with empty name".to_string(),
                ));
            }
            if !seen.insert(spec.name.clone()) {
                return Err(BotError::Config(format!(
                    "duplicate tool provider name '{}'",
                    spec.name
                )));
            }
            if spec.command.trim().is_empty() {
                return Err(BotError::Config(format!(
                    "tool provider '{}' has an empty command",
                    spec.name
                )));
            }

            for arg in &mut spec.args {
                *arg = resolve_env_value(arg, &lookup).ok_or_else(|| {
                    BotError::Config(format!(
                        "tool provider '{}' references unset variable in its arguments",
                        spec.name
                    ))
                })?;
            }

            if let Some(env) = spec.env.as_mut() {
                for (key, value) in env.iter_mut() {
                    *value = resolve_env_value(value, &lookup).ok_or_else(|| {
                        BotError::Config(format!(
                            "tool provider '{}' references unset variable in {key}",
                            spec.name
                        ))
                    })?;
                }
            }

            resolved.push(spec);
        }

        debug!("Validated {} tool provider specs", resolved.len());
        Ok(Self { specs: resolved })
    }

    /// Loads provider specs from a JSON array file.
    pub fn from_file(path: &Path) -> Result<Self> {
        info!("Loading tool providers from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let specs: Vec<ToolProviderSpec> = serde_json::from_str(&raw)?;
        Self::from_specs(specs, |name| std::env::var(name).ok())
    }

    /// The built-in travel tool providers, resolved against the process environment.
    pub fn builtin() -> Result<Self> {
        Self::from_specs(default_specs(), |name| std::env::var(name).ok())
    }

    pub fn specs(&self) -> &[ToolProviderSpec] {
        &self.specs
    }

    pub fn into_specs(self) -> Vec<ToolProviderSpec> {
        self.specs
    }
}

/// Expands a value of the exact form `${VAR}`; anything else is taken literally.
fn resolve_env_value<F>(value: &str, lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    match value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => lookup(var),
        None => Some(value.to_string()),
    }
}

fn smithery(name: &str, package: &str, extra: &[&str]) -> ToolProviderSpec {
    let mut args = vec![
        "-y",
        "@smithery/cli@latest",
        "run",
        package,
        "--key",
        "${SMITHERY_API_KEY}",
    ];
    args.extend_from_slice(extra);
    ToolProviderSpec::new(name, "npx", &args)
}

fn default_specs() -> Vec<ToolProviderSpec> {
    vec![
        // Trip budget arithmetic
        smithery("calculator-mcp", "@alan5543/calculator-mcp", &[]),
        smithery("airbnb-mcp-server", "@alan5543/airbnb-mcp-server", &[]),
        smithery("flight-search-mcp", "@alan5543/flight-search-mcp", &[]),
        smithery(
            "travel-agent-mcp-server",
            "@alan5543/travel-agent-mcp-server",
            &["--profile", "fortunate-rat-l8LC43"],
        ),
        ToolProviderSpec::new(
            "fetch_server",
            "uvx",
            &["mcp-server-fetch", "--user-agent=TravelBuddyBot/1.0"],
        ),
        // Background on tourist spots
        ToolProviderSpec::new("wikipedia-mcp", "uvx", &["wikipedia-mcp"]),
        ToolProviderSpec::new(
            "sequential_thinking",
            "npx",
            &["-y", "@modelcontextprotocol/server-sequential-thinking"],
        ),
    ]
}

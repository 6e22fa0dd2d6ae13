//! Tool registry and execution
//!
//! Tools are declared in a JSON array of OpenAI function-tool definitions.
//! Two extra keys per entry steer the orchestrator and are never sent to the
//! model:
//!
//! - `exact_only`: arguments are too variable for fuzzy cache reuse
//! - `routes`: route names whose fallback requests may use the tool

pub mod executor;
mod handlers;

pub use executor::{ToolExecutor, ToolOutcome};

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::llm::ToolDefinition;
use crate::{Error, Result};

/// Tool definitions shipped with the binary
const EMBEDDED_TOOLS: &str = include_str!("../../assets/tools.json");

/// A tool definition plus orchestrator metadata
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    /// Definition offered to the model
    pub definition: ToolDefinition,
    /// Only literal repeats may be served from the cache
    pub exact_only: bool,
    /// Routes that expose this tool
    pub routes: Vec<String>,
}

#[derive(Deserialize)]
struct ToolEntry {
    #[serde(flatten)]
    definition: ToolDefinition,
    #[serde(default)]
    exact_only: bool,
    #[serde(default)]
    routes: Vec<String>,
}

/// Registry of tools available to the fallback and the cache
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    /// Parse a registry from a JSON array
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is invalid or a tool name is empty or repeated
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<ToolEntry> = serde_json::from_str(json)?;

        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry.definition.name().to_string();
            if name.is_empty() {
                return Err(Error::Tool("tool definition without a name".to_string()));
            }
            if !seen.insert(name.clone()) {
                return Err(Error::Tool(format!("duplicate tool definition: {name}")));
            }
            tools.push(RegisteredTool {
                definition: entry.definition,
                exact_only: entry.exact_only,
                routes: entry.routes,
            });
        }

        Ok(Self { tools })
    }

    /// Load a registry from a `tools.json` file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Tool(format!("failed to read {}: {e}", path.display())))?;
        let registry = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), tools = registry.len(), "loaded tool registry");
        Ok(registry)
    }

    /// Registry built from the embedded default definitions
    ///
    /// # Errors
    ///
    /// Returns error if the embedded definitions are invalid
    pub fn embedded_default() -> Result<Self> {
        Self::from_json(EMBEDDED_TOOLS)
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether a tool with this name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.definition.name() == name)
    }

    /// Whether the tool is registered as exact-only
    #[must_use]
    pub fn is_exact_only(&self, name: &str) -> bool {
        self.tools
            .iter()
            .any(|t| t.exact_only && t.definition.name() == name)
    }

    /// Names of all exact-only tools
    #[must_use]
    pub fn exact_only_names(&self) -> HashSet<String> {
        self.tools
            .iter()
            .filter(|t| t.exact_only)
            .map(|t| t.definition.name().to_string())
            .collect()
    }

    /// All definitions in declaration order
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    /// Definitions offered for a route
    ///
    /// `None` offers every tool. A route no tool lists yields an empty set.
    #[must_use]
    pub fn for_route(&self, route: Option<&str>) -> Vec<ToolDefinition> {
        let Some(route) = route else {
            return self.definitions();
        };

        self.tools
            .iter()
            .filter(|t| t.routes.iter().any(|r| r == route))
            .map(|t| t.definition.clone())
            .collect()
    }
}

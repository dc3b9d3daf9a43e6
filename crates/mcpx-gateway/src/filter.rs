//! Tool allow/block filtering
//!
//! A filter only takes effect when its list is non-empty and its mode is
//! `allow` or `block` (case-insensitive). Anything else disables filtering
//! with a warning.

use std::collections::HashSet;

use mcpx_core::ToolFilterConfig;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Allow,
    Block,
}

/// Outcome of checking one tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Keep,
    NotInAllowlist,
    Blocked,
}

impl FilterDecision {
    pub fn keeps(&self) -> bool {
        matches!(self, FilterDecision::Keep)
    }
}

/// Validated tool filter for one backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolFilterPolicy {
    rule: Option<(FilterMode, HashSet<String>)>,
}

impl ToolFilterPolicy {
    /// Policy that keeps every tool
    pub fn keep_all() -> Self {
        Self::default()
    }

    /// Validate a configured filter, warning when it has to be ignored
    pub fn from_config(backend: &str, config: Option<&ToolFilterConfig>) -> Self {
        let Some(config) = config.filter(|c| !c.list.is_empty()) else {
            return Self::keep_all();
        };

        let mode = match config.mode.to_ascii_lowercase().as_str() {
            "allow" => FilterMode::Allow,
            "block" => FilterMode::Block,
            "" => {
                warn!(
                    backend = %backend,
                    "toolFilter list provided but mode is missing, ignoring toolFilter (mode must be 'allow' or 'block')"
                );
                return Self::keep_all();
            }
            _ => {
                warn!(
                    backend = %backend,
                    mode = %config.mode,
                    "Invalid toolFilter mode, ignoring toolFilter (mode must be 'allow' or 'block')"
                );
                return Self::keep_all();
            }
        };

        debug!(backend = %backend, ?mode, tools = config.list.len(), "Tool filter active");
        Self {
            rule: Some((mode, config.list.iter().cloned().collect())),
        }
    }

    pub fn mode(&self) -> Option<FilterMode> {
        self.rule.as_ref().map(|(mode, _)| *mode)
    }

    pub fn decide(&self, tool: &str) -> FilterDecision {
        match &self.rule {
            None => FilterDecision::Keep,
            Some((FilterMode::Allow, set)) if !set.contains(tool) => {
                FilterDecision::NotInAllowlist
            }
            Some((FilterMode::Block, set)) if set.contains(tool) => FilterDecision::Blocked,
            Some(_) => FilterDecision::Keep,
        }
    }
}

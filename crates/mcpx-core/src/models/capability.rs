//! Capability items republished by the proxy
//!
//! Each item keeps its identifying fields typed and carries every other
//! field the backend sent in `extra`, so descriptions, schemas and
//! annotations reach clients exactly as the backend wrote them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The four capability kinds a backend can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CapabilityKind {
    Tools,
    Prompts,
    Resources,
    ResourceTemplates,
}

impl CapabilityKind {
    /// All kinds in sync order
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::Tools,
        CapabilityKind::Prompts,
        CapabilityKind::Resources,
        CapabilityKind::ResourceTemplates,
    ];

    /// Listing method on the wire
    pub fn list_method(&self) -> &'static str {
        match self {
            CapabilityKind::Tools => "tools/list",
            CapabilityKind::Prompts => "prompts/list",
            CapabilityKind::Resources => "resources/list",
            CapabilityKind::ResourceTemplates => "resources/templates/list",
        }
    }

    /// Key holding the items in a listing result
    pub fn result_key(&self) -> &'static str {
        match self {
            CapabilityKind::Tools => "tools",
            CapabilityKind::Prompts => "prompts",
            CapabilityKind::Resources => "resources",
            CapabilityKind::ResourceTemplates => "resourceTemplates",
        }
    }

    /// Whether a listing failure for this kind aborts the backend's sync
    pub fn is_required(&self) -> bool {
        matches!(self, CapabilityKind::Tools)
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CapabilityKind::Tools => "tools",
            CapabilityKind::Prompts => "prompts",
            CapabilityKind::Resources => "resources",
            CapabilityKind::ResourceTemplates => "resource templates",
        };
        f.write_str(label)
    }
}

/// A tool exposed by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// A prompt exposed by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Prompt {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// A concrete resource exposed by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// A parameterized resource (RFC 6570 level 1 URI template)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResourceTemplate {
    pub fn new(uri_template: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri_template: uri_template.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }

    /// Whether `uri` is an expansion of this template.
    ///
    /// Every `{var}` must expand to at least one character. Adjacent
    /// variables share the text up to the next literal.
    pub fn matches(&self, uri: &str) -> bool {
        let segments: Vec<&str> = self.uri_template.split('{').collect();
        let Some(mut rest) = uri.strip_prefix(segments[0]) else {
            return false;
        };

        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate().skip(1) {
            let Some((_, literal)) = segment.split_once('}') else {
                return false;
            };

            if literal.is_empty() {
                if i == last {
                    return !rest.is_empty();
                }
                continue;
            }

            if i == last {
                return rest.len() > literal.len() && rest.ends_with(literal);
            }

            let skip = match rest.chars().next() {
                Some(c) => c.len_utf8(),
                None => return false,
            };
            match rest[skip..].find(literal) {
                Some(pos) => rest = &rest[skip + pos + literal.len()..],
                None => return false,
            }
        }

        rest.is_empty()
    }
}

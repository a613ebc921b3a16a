//! Per-server custom instructions and the constraints derived from them.
//!
//! Operators attach a `custom_instructions` payload to a server in the
//! directory. It arrives either as a JSON object or as a string holding
//! serialized JSON:
//!
//! ```json
//! {
//!   "instructions": "Always link the issue back to the PR.",
//!   "guidelines": ["Prefer draft PRs"],
//!   "read_only": false,
//!   "max_calls_per_minute": 30,
//!   "max_results": 50,
//!   "allowed_tools": ["create_issue"],
//!   "blocked_tools": ["delete_repo"],
//!   "constraints": ["Never touch the main branch"]
//! }
//! ```
//!
//! A payload that cannot be parsed means "no context" for that server only.

use crate::types::ServerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Structured form of a server's custom-instruction payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomInstructions {
    #[serde(default, alias = "instruction", alias = "text")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub guidelines: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub max_calls_per_minute: Option<u32>,
    #[serde(default)]
    pub max_results: Option<u32>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub blocked_tools: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl CustomInstructions {
    fn is_empty(&self) -> bool {
        self.instructions.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.guidelines.is_empty()
            && !self.read_only
            && self.max_calls_per_minute.is_none()
            && self.max_results.is_none()
            && self.allowed_tools.is_empty()
            && self.blocked_tools.is_empty()
            && self.constraints.is_empty()
    }
}

/// A behavioral limit declared by a server's operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    ReadOnly,
    RateLimit { max_calls_per_minute: u32 },
    MaxResults { limit: u32 },
    AllowedTools { tools: Vec<String> },
    BlockedTools { tools: Vec<String> },
    Custom { text: String },
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "Read-only: do not perform write operations"),
            Self::RateLimit { max_calls_per_minute } => {
                write!(f, "Rate limit: at most {max_calls_per_minute} calls per minute")
            }
            Self::MaxResults { limit } => write!(f, "Return at most {limit} results per call"),
            Self::AllowedTools { tools } => write!(f, "Only use: {}", tools.join(", ")),
            Self::BlockedTools { tools } => write!(f, "Never use: {}", tools.join(", ")),
            Self::Custom { text } => write!(f, "{text}"),
        }
    }
}

/// Custom instructions of one server plus the constraints derived from them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerContext {
    pub server_id: ServerId,
    pub server_name: String,
    pub instructions: Option<String>,
    pub guidelines: Vec<String>,
    pub constraints: Vec<Constraint>,
}

impl ServerContext {
    /// Build context from a raw payload; `None` when there is nothing usable
    pub fn from_payload(
        server_id: &ServerId,
        server_name: &str,
        payload: &serde_json::Value,
    ) -> Option<Self> {
        let parsed = parse_custom_instructions(payload)?;
        if parsed.is_empty() {
            return None;
        }

        Some(Self {
            server_id: server_id.clone(),
            server_name: server_name.to_string(),
            constraints: derive_constraints(&parsed),
            instructions: parsed
                .instructions
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            guidelines: parsed.guidelines,
        })
    }

    /// Human-readable block used in discovery output and `initialize`
    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(instructions) = &self.instructions {
            out.push_str(&format!("Instructions: {instructions}\n"));
        }

        if !self.guidelines.is_empty() {
            out.push_str("Guidelines:\n");
            for guideline in &self.guidelines {
                out.push_str(&format!("  - {guideline}\n"));
            }
        }

        if !self.constraints.is_empty() {
            out.push_str("Constraints:\n");
            for constraint in &self.constraints {
                out.push_str(&format!("  - {constraint}\n"));
            }
        }

        out
    }
}

/// Accept a structured object or a string of serialized JSON
pub fn parse_custom_instructions(payload: &serde_json::Value) -> Option<CustomInstructions> {
    let object = match payload {
        serde_json::Value::Object(_) => payload.clone(),
        serde_json::Value::String(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            Ok(_) | Err(_) => {
                tracing::debug!("custom instructions string is not a JSON object, ignoring");
                return None;
            }
        },
        _ => return None,
    };

    match serde_json::from_value(object) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!(error = %e, "custom instructions have an unexpected shape, ignoring");
            None
        }
    }
}

pub fn derive_constraints(parsed: &CustomInstructions) -> Vec<Constraint> {
    let mut constraints = Vec::new();

    if parsed.read_only {
        constraints.push(Constraint::ReadOnly);
    }
    if let Some(max_calls_per_minute) = parsed.max_calls_per_minute {
        constraints.push(Constraint::RateLimit { max_calls_per_minute });
    }
    if let Some(limit) = parsed.max_results {
        constraints.push(Constraint::MaxResults { limit });
    }
    if !parsed.allowed_tools.is_empty() {
        constraints.push(Constraint::AllowedTools {
            tools: parsed.allowed_tools.clone(),
        });
    }
    if !parsed.blocked_tools.is_empty() {
        constraints.push(Constraint::BlockedTools {
            tools: parsed.blocked_tools.clone(),
        });
    }
    constraints.extend(
        parsed
            .constraints
            .iter()
            .filter(|text| !text.trim().is_empty())
            .map(|text| Constraint::Custom { text: text.clone() }),
    );

    constraints
}

/// Server contexts keyed by id, with a legacy lookup by display name
#[derive(Debug, Clone, Default)]
pub struct ServerContextMap {
    by_id: HashMap<ServerId, ServerContext>,
    // Older callers address servers by display name
    by_name: HashMap<String, ServerId>,
}

impl ServerContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, context: ServerContext) {
        self.by_name
            .insert(context.server_name.clone(), context.server_id.clone());
        self.by_id.insert(context.server_id.clone(), context);
    }

    pub fn get(&self, server_id: &ServerId) -> Option<&ServerContext> {
        self.by_id.get(server_id)
    }

    pub fn get_by_name(&self, server_name: &str) -> Option<&ServerContext> {
        self.by_name
            .get(server_name)
            .and_then(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Contexts ordered by server id
    pub fn iter_sorted(&self) -> Vec<&ServerContext> {
        let mut contexts: Vec<_> = self.by_id.values().collect();
        contexts.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        contexts
    }

    /// All contexts merged into one block, or `None` when there are none
    pub fn render_all(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let sections: Vec<String> = self
            .iter_sorted()
            .into_iter()
            .map(|context| format!("## {}\n{}", context.server_name, context.render()))
            .collect();
        Some(sections.join("\n"))
    }
}

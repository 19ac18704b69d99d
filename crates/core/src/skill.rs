//! Skill trait: the abstraction over pluggable capability providers.
//!
//! A skill describes itself once, sets itself up against the bus in
//! `initialize`, answers tasks in `execute` and releases everything in
//! `cleanup`. Lifecycle bookkeeping (status, counters, subscriptions) is
//! not the skill's job: [`crate::SkillHost`] owns it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, SkillError};
use crate::event::Metadata;
use crate::host::SkillContext;

/// What kind of task a skill can perform. Used for capability routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Research,
    Code,
    Memory,
    System,
    Communication,
    Analysis,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Self::Research,
        Self::Code,
        Self::Memory,
        Self::System,
        Self::Communication,
        Self::Analysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Code => "code",
            Self::Memory => "memory",
            Self::System => "system",
            Self::Communication => "communication",
            Self::Analysis => "analysis",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown capability '{s}'"))
    }
}

/// Where a skill sends the data it handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    #[default]
    Local,
    Cloud,
    Mixed,
}

/// Static description of a skill, produced once per instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Other skills that should be live for this one to be fully useful
    #[serde(default)]
    pub requires_skills: Vec<String>,
    #[serde(default)]
    pub experimental: bool,
    #[serde(default)]
    pub privacy_level: PrivacyLevel,
    pub created_at: DateTime<Utc>,
}

impl SkillMetadata {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            author: "SkillBus".into(),
            capabilities: BTreeSet::new(),
            dependencies: Vec::new(),
            requires_skills: Vec::new(),
            experimental: false,
            privacy_level: PrivacyLevel::Local,
            created_at: Utc::now(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn requires(mut self, skills: &[&str]) -> Self {
        self.requires_skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_privacy(mut self, privacy_level: PrivacyLevel) -> Self {
        self.privacy_level = privacy_level;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn experimental(mut self) -> Self {
        self.experimental = true;
        self
    }
}

/// Lifecycle state of a skill instance.
///
/// ```text
/// Uninitialized → Initializing → Ready ⇄ Busy
///                       │          │      │
///                       └────► Error ◄────┘
/// Uninitialized | Initializing | Ready | Error → Disabled (terminal)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Busy,
    Error,
    Disabled,
}

impl SkillStatus {
    pub fn can_transition_to(self, next: SkillStatus) -> bool {
        use SkillStatus::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Initializing, Ready)
                | (Initializing, Error)
                | (Ready, Busy)
                | (Busy, Ready)
                | (Ready | Busy, Error)
                | (Uninitialized | Initializing | Ready | Error, Disabled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SkillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one execution, always returned as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    #[serde(default)]
    pub result: serde_json::Value,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl ExecutionResult {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
            metadata: Metadata::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Caller-supplied parameters for one task (`{"type": "file_read", ...}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskContext(Metadata);

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a JSON object, or `null` for an empty context.
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        if value.is_null() {
            return Ok(Self::new());
        }
        Ok(Self(serde_json::from_value(value)?))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(|v| v.as_u64())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Metadata {
        &self.0
    }
}

/// The core Skill trait.
///
/// Implementations keep any state they share with their event handlers
/// behind an `Arc`, since handlers registered in `initialize` must be
/// `'static`.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Static description. Called once by the host.
    fn describe(&self) -> SkillMetadata;

    /// Subscribe to events, open resources, load persisted state.
    async fn initialize(&self, ctx: &SkillContext<'_>) -> Result<(), SkillError>;

    /// Perform one task.
    async fn execute(&self, task: &str, context: &TaskContext)
    -> Result<ExecutionResult, SkillError>;

    /// Release resources and persist durable state. Subscriptions made
    /// through the context are removed by the host afterwards.
    async fn cleanup(&self, _ctx: &SkillContext<'_>) -> Result<(), SkillError> {
        Ok(())
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        self.describe().capabilities
    }
}

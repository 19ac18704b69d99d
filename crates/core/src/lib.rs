//! # SkillBus Core
//!
//! The in-process event bus and the skill contract that every other crate
//! builds on.
//!
//! ## Layout
//!
//! - [`event`]: the immutable [`Event`] record and the [`EventHandler`] trait
//! - [`bus`]: the bounded, single-worker [`EventBus`]
//! - [`skill`]: the [`Skill`] trait, metadata, capabilities and lifecycle states
//! - [`host`]: [`SkillHost`], the lifecycle wrapper around one skill instance
//! - [`catalog`]: [`SkillCatalog`], the name → factory map used to build skills
//!
//! Skills never call each other directly. They subscribe to and publish
//! events on the bus, and the manager (in `skillbus-runtime`) drives their
//! lifecycle through [`SkillHost`].

pub mod bus;
pub mod catalog;
pub mod error;
pub mod event;
pub mod host;
pub mod skill;

pub use bus::{BusOptions, BusStats, EventBus};
pub use catalog::{SkillCatalog, SkillFactory};
pub use error::{Error, HandlerError, Result, SkillError};
pub use event::{Event, EventHandler, EventPriority, Metadata, handler_fn};
pub use host::{SkillContext, SkillExecutor, SkillHealth, SkillHost, SkillPublisher, SkillStats};
pub use skill::{
    Capability, ExecutionResult, PrivacyLevel, Skill, SkillMetadata, SkillStatus, TaskContext,
};

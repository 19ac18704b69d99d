//! # SkillBus Runtime
//!
//! The [`SkillsManager`] owns live skill instances and routes work to them;
//! [`Runtime`] builds a bus and a manager from an [`AppConfig`](skillbus_config::AppConfig)
//! and tears both down in order.

pub mod manager;
pub mod runtime;

pub use manager::{CapabilityResult, ManagerStats, SkillInfo, SkillsManager};
pub use runtime::Runtime;

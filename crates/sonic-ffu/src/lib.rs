//! FFU (Filtering & Forwarding Unit) rule engine for FM6000-class switches.
//!
//! This crate programs the switch's TCAM slice bank: ternary keys in the
//! TCAM, actions in the paired SRAM, slices chained into wider rules and
//! bound to scenarios. Rules can be written, moved and copied while the
//! hardware keeps forwarding.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`error`]: Error types and legacy status codes
//! - [`types`]: Slice chains, ownership and the rule data model
//! - [`config`]: TOML configuration
//! - [`hw`]: Register access and port resolution collaborators
//! - [`regs`]: Register map and field layouts
//! - [`cache`]: Register shadow cache and the register lock
//! - [`key`]: Ternary key/key-invert codec
//! - [`action`]: SRAM action codec
//! - [`mux`]: Generic selector to mux code table
//! - [`slice`]: Slice ownership, scenario configuration, master valid
//! - [`rule`]: Rule set/get/valid/move/copy
//! - [`engine`]: Per-switch facade
//!
//! # Example
//!
//! ```ignore
//! use sonic_ffu::{FfuEngine, FfuRule, FfuSliceInfo, FfuResult};
//!
//! fn disable_and_move(engine: &FfuEngine, info: &FfuSliceInfo) -> FfuResult<()> {
//!     engine.set_rule_valid(info, 0, false, true)?;
//!     engine.move_rules(info, 1, 4, 0)?;
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod hw;
pub mod key;
pub mod mux;
pub mod regs;
pub mod rule;
pub mod slice;
pub mod types;

// Re-export commonly used types
pub use action::{
    ArpType, FfuAction, FfuActionKind, FfuFieldSet, FfuFlags, FlagOp, VlanTxTag,
};
pub use cache::{RegisterCache, RegisterGuard};
pub use config::{CacheConfig, FfuConfig, GeometryConfig};
pub use engine::FfuEngine;
pub use error::{FfuError, FfuResult, FfuStatus};
pub use hw::{
    DetachedRegisters, GlortResolver, MemoryRegisters, RegisterAccess, StaticGlortMap,
    SwitchFamily, SwitchInfo,
};
pub use key::{KeyValid, TcamWords};
pub use mux::{generic, MuxPosition, MuxSelectEntry, MuxSelectMap, MUX_POSITIONS};
pub use regs::{RegKey, RegisterSet};
pub use rule::RuleEngine;
pub use slice::{SliceConfigManager, SliceScenarioConfig};
pub use types::{
    CaseLocation, FfuCase, FfuRule, FfuSliceInfo, FfuSliceKey, ScenarioBinding, SliceChain,
    SliceOwner, SliceSelects,
};

//! Ordered legacy-path rewrite and redirect engine.
//!
//! Rules are loaded (or hot-reloaded) as a validated, immutable snapshot and
//! evaluated first-match-wins in ascending priority order. Request handling
//! never mutates the table; a reload swaps the snapshot reference atomically.

pub mod engine;
pub mod errors;
pub mod rules;
pub mod table;

pub use engine::{Decision, RedirectEngine, RequestContext};
pub use errors::{Result, RewriteError};
pub use rules::{Action, Condition, Rule, RuleFile};
pub use table::{CompiledRule, RuleSnapshot, RuleTable};

//! Authorization module - permission graph and request gate
//!
//! Resolution order for every check:
//! - admin role -> allow (absolute bypass)
//! - per-user override for the exact (user, module, permission) triple
//! - department module grant, provided the module is active
//!
//! An override fully supersedes the department default for its triple; it is
//! never OR-ed with it.

mod evaluator;
mod principal;

pub use evaluator::{decide, require_access, AccessDecision, AccessEvaluator, SqlAccessEvaluator};
pub use principal::Principal;

/// Well-known module keys
pub mod module_keys {
    pub const QUALITY_DEFECTS: &str = "quality_defects";
}

/// Well-known permission keys within a module
pub mod permission_keys {
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const STATS: &str = "stats";
}

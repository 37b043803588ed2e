//! Shared record vocabulary for the unitrun test orchestration engine.
//!
//! This crate is intentionally small. It holds the logical entities the engine persists (suites, unit tests,
//! activity records), the result enumeration, and the pure helpers both the engine and hosts rely on to render
//! results the same way.
//!
//! ## Notes
//!
//! - No IO and no global state: records are plain data, the engine decides when they are saved.
//! - Failure-reason strings live in [`messages`] so the execution context and reporting code stay aligned.

pub mod duration;
pub mod messages;
pub mod records;
pub mod result;

pub use duration::readable_duration;
pub use records::{ActivityKind, ActivityRecord, SuiteId, SyncMark, TestSuite, UnitTest, UnitTestId};
pub use result::UnitTestResult;

/// Default first name prefix of procedure-based tests.
pub const DEFAULT_PREFIX_1: &str = "Test_";
/// Default second name prefix of procedure-based tests.
pub const DEFAULT_PREFIX_2: &str = "UT_";

/// Unqualified name of the procedure run before the procedure tests of a module.
pub const SETUP_PROCEDURE: &str = "Setup";
/// Unqualified name of the procedure run after the procedure tests of a module.
pub const TEARDOWN_PROCEDURE: &str = "TearDown";

/// Qualify `name` with its module (`Module.Name`).
pub fn qualified_name(module: &str, name: &str) -> String {
    format!("{module}.{name}")
}

/// Strip the `Module.` qualifier from a unit test name.
///
/// Names that are not longer than the qualifier are returned unchanged.
pub fn display_name<'a>(module: &str, name: &'a str) -> &'a str {
    name.get(module.len() + 1..).filter(|rest| !rest.is_empty()).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified_name("Orders", "Setup"), "Orders.Setup");
    }

    #[test]
    fn test_display_name_strips_module() {
        assert_eq!(display_name("Orders", "Orders.Test_Create"), "Test_Create");
        assert_eq!(display_name("orders", "orders.CheckoutTest/total"), "CheckoutTest/total");
    }

    #[test]
    fn test_display_name_keeps_short_names() {
        assert_eq!(display_name("Orders", "Orders"), "Orders");
        assert_eq!(display_name("Orders", "Ord"), "Ord");
    }
}

//! Stable flow type identification.
//!
//! `std::any::type_name()` is explicitly unstable across compiler
//! versions, which makes it unusable as a persisted identifier: the
//! execution log outlives the binary that wrote it, and recovery routes
//! flows by the logged `class_name`. `FlowType::type_id()` provides a
//! stable identifier instead.
//!
//! Derive it rather than implementing it by hand:
//!
//! ```ignore
//! use mneme::prelude::*;
//!
//! #[derive(FlowType, Serialize, Deserialize)]
//! struct SignupFlow {
//!     user: String,
//! }
//!
//! assert_eq!(SignupFlow::type_id(), "SignupFlow");
//! ```
//!
//! The default identifier is the type name; override it with
//! `#[flow_type(id = "...")]` when renaming a type must not orphan
//! in-flight flows.

/// Provides a stable type identifier for flow types.
///
/// The identifier is written to every log row as `class_name`, compared
/// on replay to detect structural drift, and used as the recovery
/// registry key. It must stay stable across compiler versions and
/// builds.
pub trait FlowType {
    /// Returns the stable type identifier for this flow type.
    fn type_id() -> &'static str;
}

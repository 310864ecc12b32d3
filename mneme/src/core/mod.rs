//! Core types and utilities for the mneme durable execution engine.
//!
//! # Domain Model
//! - [`Invocation`]: one logged step execution with parameters, status, and result
//! - [`InvocationStatus`]: the execution state (Pending, WaitingForSignal, Complete)
//! - [`CallMode`]: why the dispatcher was entered (Run, Resume, Await)
//!
//! # Serialization
//! - [`serialize_value`] / [`deserialize_value`]: the self-describing text
//!   codec used for the `parameters` and `return_value` columns
//!
//! # Identification
//! - [`FlowType`]: stable flow type identifiers for logging and recovery

mod error;
mod flow_type;
mod invocation;
mod serialization;

pub use error::{CoreError, Result};
pub use flow_type::FlowType;
pub use invocation::{CallMode, Invocation, InvocationStatus};
pub use serialization::{deserialize_value, serialize_value};

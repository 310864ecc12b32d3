//! Procedural macros for the mneme durable execution engine.
//!
//! Rust has no runtime interface proxying, so step interception happens
//! at build time: each annotated method is rewritten into a hidden body
//! function plus a public wrapper that consults the dispatcher before
//! (and after) running the body.
//!
//! # Module Organization
//!
//! - [`parsing`]: attribute grammar and signature analysis
//! - [`step`]: `#[step]` and `#[await_step]` expansion
//! - [`flow`]: `#[flow]` expansion for entry methods
//! - [`flow_type`]: the `FlowType` derive

use proc_macro::TokenStream;

mod flow;
mod flow_type;
mod parsing;
mod step;

/// Marks an async method as a durable step.
///
/// The method must take `self: Arc<Self>` and owned, serializable
/// parameters. Optional arguments declare a minimum wait before the body
/// runs:
///
/// ```ignore
/// #[step(delay = 10, unit = "SECONDS")]
/// async fn send_welcome_email(self: Arc<Self>, user_id: i64) { ... }
/// ```
///
/// `unit` is one of `"MILLIS"`, `"SECONDS"`, `"MINUTES"`, `"HOURS"`,
/// `"DAYS"`; omitted it defaults to seconds.
#[proc_macro_attribute]
pub fn step(attr: TokenStream, item: TokenStream) -> TokenStream {
    step::step_impl(attr, item, step::StepRole::Step)
}

/// Marks an async method as a signal-gated step.
///
/// On first encounter in a normal run the step is logged as
/// `WaitingForSignal` and the flow pauses. A later `resume` (or an
/// in-flow `await_external_signal` wrapper) consumes the signalled
/// payload, substitutes it for the method's arguments, and runs the
/// body. Parameters must therefore deserialize from the log codec.
#[proc_macro_attribute]
pub fn await_step(attr: TokenStream, item: TokenStream) -> TokenStream {
    step::step_impl(attr, item, step::StepRole::Await)
}

/// Marks an async method as the flow entry.
///
/// The entry owns step 0 and resets step numbering; its completion marks
/// the whole flow finished. It takes no parameters beyond
/// `self: Arc<Self>`; flow inputs belong in the flow struct, which is
/// what recovery rebuilds the flow from.
#[proc_macro_attribute]
pub fn flow(attr: TokenStream, item: TokenStream) -> TokenStream {
    flow::flow_impl(attr, item)
}

/// Derives the `FlowType` trait, providing a stable type identifier.
///
/// Defaults to the type name; override with
/// `#[flow_type(id = "...")]` when a rename must not orphan in-flight
/// flows.
#[proc_macro_derive(FlowType, attributes(flow_type))]
pub fn derive_flow_type(input: TokenStream) -> TokenStream {
    flow_type::derive_flow_type_impl(input)
}

//! Attribute parsing and signature analysis shared by the step and flow
//! macros.

use quote::quote;
use syn::{FnArg, ReturnType, Signature, Type};

/// Arguments accepted by `#[step(...)]`.
#[derive(Default)]
pub(crate) struct StepArgs {
    /// Delay value, in the unit below.
    pub delay: Option<i64>,
    /// Time unit for the delay (MILLIS, SECONDS, MINUTES, HOURS, DAYS).
    pub unit: Option<String>,
}

impl StepArgs {
    pub fn parse_meta(&mut self, meta: syn::meta::ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("delay") {
            self.delay = Some(meta.value()?.parse::<syn::LitInt>()?.base10_parse()?);
            Ok(())
        } else if meta.path.is_ident("unit") {
            let unit: syn::LitStr = meta.value()?.parse()?;
            match unit.value().as_str() {
                "MILLIS" | "SECONDS" | "MINUTES" | "HOURS" | "DAYS" => {
                    self.unit = Some(unit.value());
                    Ok(())
                }
                other => Err(meta.error(format!(
                    "unknown unit `{other}`; expected MILLIS, SECONDS, MINUTES, HOURS, or DAYS"
                ))),
            }
        } else {
            Err(meta.error("expected `delay` or `unit`"))
        }
    }

    /// The declared delay in milliseconds; zero when no delay is set.
    pub fn delay_ms(&self) -> i64 {
        let Some(delay) = self.delay else { return 0 };
        match self.unit.as_deref().unwrap_or("SECONDS") {
            "MILLIS" => delay,
            "MINUTES" => delay * 60 * 1000,
            "HOURS" => delay * 60 * 60 * 1000,
            "DAYS" => delay * 24 * 60 * 60 * 1000,
            _ => delay * 1000,
        }
    }
}

/// Check if a return type is `Result<T, E>`.
///
/// Steps returning `Result` do not log a completion for `Err`, so the
/// row stays pending and a re-drive retries the body.
pub(crate) fn is_result_type(return_type: &ReturnType) -> bool {
    match return_type {
        ReturnType::Default => false,
        ReturnType::Type(_, ty) => is_result_type_inner(ty),
    }
}

fn is_result_type_inner(ty: &Type) -> bool {
    match ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .map(|segment| segment.ident == "Result")
            .unwrap_or(false),
        Type::Paren(paren) => is_result_type_inner(&paren.elem),
        Type::Group(group) => is_result_type_inner(&group.elem),
        _ => false,
    }
}

/// Build the logged method signature string: `name(Type1,Type2)`.
///
/// Parameter types are included so that same-named methods with
/// different signatures still register as structural drift.
pub(crate) fn build_method_signature(sig: &Signature) -> String {
    let fn_name = sig.ident.to_string();

    let param_types: Vec<String> = sig
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Receiver(_) => None,
            FnArg::Typed(pat_type) => {
                let ty = &pat_type.ty;
                Some(quote!(#ty).to_string().replace(' ', ""))
            }
        })
        .collect();

    format!("{}({})", fn_name, param_types.join(","))
}

/// Verifies the receiver is `self: Arc<Self>` and nothing else.
///
/// Returns an error for `&self`, `&mut self`, plain `self`, or a missing
/// receiver.
pub(crate) fn check_arc_self_receiver(sig: &Signature) -> syn::Result<()> {
    for arg in &sig.inputs {
        if let FnArg::Receiver(receiver) = arg {
            if receiver.colon_token.is_some() {
                if let Type::Path(type_path) = &*receiver.ty {
                    if let Some(segment) = type_path.path.segments.last() {
                        if segment.ident == "Arc" {
                            return Ok(());
                        }
                    }
                }
            }
            return Err(syn::Error::new_spanned(
                receiver,
                "annotated methods require `self: Arc<Self>` instead of `&self` or `&mut self`. \
                 The dispatcher may re-enter the method on another task, so the receiver must be \
                 shareable and 'static. Example: `async fn step(self: Arc<Self>) -> T`",
            ));
        }
    }

    Err(syn::Error::new_spanned(
        sig,
        "annotated methods require a `self: Arc<Self>` receiver",
    ))
}

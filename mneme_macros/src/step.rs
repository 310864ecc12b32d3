//! `#[step]` and `#[await_step]` expansion.
//!
//! A step method is split in two:
//!
//! - a hidden body function holding the user's code unchanged, and
//! - a public wrapper with the original signature that serializes the
//!   arguments, asks the dispatcher for a disposition, and then replays
//!   the logged value, runs the body, or runs the body with the
//!   signalled payload substituted for the arguments.
//!
//! Outside an execution context the wrapper forwards straight to the
//! body, so annotated methods stay callable in plain unit tests.

use crate::parsing::{build_method_signature, check_arc_self_receiver, is_result_type, StepArgs};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, FnArg, ItemFn, Pat, ReturnType};

/// Which annotation produced this expansion.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepRole {
    Step,
    Await,
}

pub(crate) fn step_impl(attr: TokenStream, item: TokenStream, role: StepRole) -> TokenStream {
    let mut args = StepArgs::default();

    if !attr.is_empty() {
        if role == StepRole::Await {
            return syn::Error::new(
                proc_macro2::Span::call_site(),
                "#[await_step] takes no arguments",
            )
            .to_compile_error()
            .into();
        }

        let attr_parser = syn::meta::parser(|meta| args.parse_meta(meta));
        if let Err(err) = syn::parse::Parser::parse(attr_parser, attr) {
            return err.to_compile_error().into();
        }
    }

    let input = parse_macro_input!(item as ItemFn);

    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let attrs = &input.attrs;
    let fn_name = &sig.ident;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(sig, "#[step] can only be applied to async functions")
            .to_compile_error()
            .into();
    }

    if let Err(err) = check_arc_self_receiver(sig) {
        return err.to_compile_error().into();
    }

    let return_type = match &sig.output {
        ReturnType::Default => quote! { () },
        ReturnType::Type(_, ty) => quote! { #ty },
    };
    let returns_result = is_result_type(&sig.output);

    let method_name_str = build_method_signature(sig);

    // Typed (non-receiver) parameters; patterns must be plain idents so
    // the wrapper can rebind them.
    let params: Vec<_> = sig
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Typed(pt) => Some(pt),
            _ => None,
        })
        .collect();

    let mut param_names = Vec::new();
    for param in &params {
        match &*param.pat {
            Pat::Ident(pat_ident) => param_names.push(pat_ident.ident.clone()),
            other => {
                return syn::Error::new_spanned(
                    other,
                    "step parameters must be simple identifiers",
                )
                .to_compile_error()
                .into();
            }
        }
    }
    let param_types: Vec<_> = params.iter().map(|pt| &pt.ty).collect();

    let delay_ms = args.delay_ms();
    let delay_expr = if delay_ms > 0 {
        quote! { Some(std::time::Duration::from_millis(#delay_ms as u64)) }
    } else {
        quote! { None }
    };

    let kind = match role {
        StepRole::Step => quote! { mneme::StepKind::Step },
        StepRole::Await => quote! { mneme::StepKind::Await },
    };

    let body_fn_name = format_ident!("__mneme_body_{}", fn_name);

    let completion_code = if returns_result {
        quote! {
            match &__result {
                Ok(_) => __ctx.complete_step(__step, &__result).await,
                Err(_) => __ctx.note_step_failure(),
            }
        }
    } else {
        quote! {
            __ctx.complete_step(__step, &__result).await;
        }
    };

    // Await-steps execute with the signalled payload rebound to their
    // parameters; plain steps never receive a payload and keep their
    // original arguments.
    let execute_with_arm: TokenStream2 = match role {
        StepRole::Await => quote! {
            mneme::StepDisposition::ExecuteWith { step: __step, payload: __payload } => {
                let ( #(#param_names,)* ): ( #(#param_types,)* ) =
                    match mneme::deserialize_value(&__payload) {
                        Ok(__args) => __args,
                        Err(__e) => match __ctx.abort(mneme::EngineError::from(__e)).await {},
                    };
                __ctx.enter_step_body();
                let __result = Self::#body_fn_name(self, #(#param_names),*).await;
                __ctx.exit_step_body();
                #completion_code
                __result
            }
        },
        StepRole::Step => quote! {
            mneme::StepDisposition::ExecuteWith { step: __step, .. } => {
                __ctx.enter_step_body();
                let __result = Self::#body_fn_name(self, #(#param_names),*).await;
                __ctx.exit_step_body();
                #completion_code
                __result
            }
        },
    };

    let expanded = quote! {
        async fn #body_fn_name(self: std::sync::Arc<Self>, #(#params),*) -> #return_type #block

        #(#attrs)*
        #vis async fn #fn_name(self: std::sync::Arc<Self>, #(#params),*) -> #return_type {
            let __ctx = match mneme::EXECUTION_CONTEXT.try_with(|ctx| std::sync::Arc::clone(ctx)) {
                Ok(__ctx) => __ctx,
                Err(_) => return Self::#body_fn_name(self, #(#param_names),*).await,
            };

            // Calls made from inside another step's body are not steps of
            // their own; forward them untouched.
            if __ctx.in_step_body() {
                return Self::#body_fn_name(self, #(#param_names),*).await;
            }

            let __params = match mneme::serialize_value(&( #(&#param_names,)* )) {
                Ok(__text) => __text,
                Err(__e) => match __ctx.abort(mneme::EngineError::from(__e)).await {},
            };

            let __spec = mneme::StepSpec {
                class_name: <Self as mneme::FlowType>::type_id(),
                method_name: #method_name_str,
                kind: #kind,
                delay: #delay_expr,
            };

            match __ctx.prepare_step(__spec, &__params).await {
                mneme::StepDisposition::Replay { value: __value } => {
                    let __text = __value.unwrap_or_else(|| "null".to_string());
                    let __replayed: #return_type = match mneme::deserialize_value(&__text) {
                        Ok(__v) => __v,
                        Err(__e) => match __ctx.abort(mneme::EngineError::from(__e)).await {},
                    };
                    __replayed
                }
                mneme::StepDisposition::Execute { step: __step } => {
                    __ctx.enter_step_body();
                    let __result = Self::#body_fn_name(self, #(#param_names),*).await;
                    __ctx.exit_step_body();
                    #completion_code
                    __result
                }
                #execute_with_arm
            }
        }
    };

    TokenStream::from(expanded)
}

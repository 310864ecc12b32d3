//! `#[flow]` expansion for entry methods.
//!
//! The entry method owns step 0. Its logged parameters are the
//! serialized flow value itself, which is what lets recovery rebuild the
//! flow from the entry row alone. Completing the entry marks the whole
//! flow finished and drops its rendezvous slot.

use crate::parsing::{build_method_signature, check_arc_self_receiver, is_result_type};
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, FnArg, ItemFn, ReturnType};

pub(crate) fn flow_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(proc_macro2::Span::call_site(), "#[flow] takes no arguments")
            .to_compile_error()
            .into();
    }

    let input = parse_macro_input!(item as ItemFn);

    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let attrs = &input.attrs;
    let fn_name = &sig.ident;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(sig, "#[flow] can only be applied to async functions")
            .to_compile_error()
            .into();
    }

    if let Err(err) = check_arc_self_receiver(sig) {
        return err.to_compile_error().into();
    }

    if sig.inputs.iter().any(|arg| matches!(arg, FnArg::Typed(_))) {
        return syn::Error::new_spanned(
            &sig.inputs,
            "#[flow] methods take no parameters beyond `self: Arc<Self>`; \
             flow inputs belong in the flow struct so recovery can rebuild them",
        )
        .to_compile_error()
        .into();
    }

    let return_type = match &sig.output {
        ReturnType::Default => quote! { () },
        ReturnType::Type(_, ty) => quote! { #ty },
    };
    let returns_result = is_result_type(&sig.output);

    let method_name_str = build_method_signature(sig);
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

    let expanded = quote! {
        async fn #body_fn_name(self: std::sync::Arc<Self>) -> #return_type #block

        #(#attrs)*
        #vis async fn #fn_name(self: std::sync::Arc<Self>) -> #return_type {
            let __ctx = match mneme::EXECUTION_CONTEXT.try_with(|ctx| std::sync::Arc::clone(ctx)) {
                Ok(__ctx) => __ctx,
                Err(_) => return Self::#body_fn_name(self).await,
            };

            // Calls made from inside a step's body are not dispatched.
            if __ctx.in_step_body() {
                return Self::#body_fn_name(self).await;
            }

            // The entry row's parameters are the flow value itself.
            let __params = match mneme::serialize_value(&*self) {
                Ok(__text) => __text,
                Err(__e) => match __ctx.abort(mneme::EngineError::from(__e)).await {},
            };

            let __spec = mneme::StepSpec {
                class_name: <Self as mneme::FlowType>::type_id(),
                method_name: #method_name_str,
                kind: mneme::StepKind::Entry,
                delay: None,
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
                mneme::StepDisposition::Execute { step: __step }
                | mneme::StepDisposition::ExecuteWith { step: __step, .. } => {
                    let __result = Self::#body_fn_name(self).await;
                    #completion_code
                    __result
                }
            }
        }
    };

    TokenStream::from(expanded)
}

//! `FlowType` derive: stable type identifiers for flow structs.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

pub(crate) fn derive_flow_type_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    // Optional #[flow_type(id = "...")] override.
    let mut custom_id: Option<String> = None;
    for attr in &input.attrs {
        if !attr.path().is_ident("flow_type") {
            continue;
        }
        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                let value: syn::LitStr = meta.value()?.parse()?;
                custom_id = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("expected `id = \"...\"`"))
            }
        });
        if let Err(err) = result {
            return err.to_compile_error().into();
        }
    }

    let type_id = match custom_id {
        Some(id) => quote! { #id },
        None => {
            let default = name.to_string();
            quote! { #default }
        }
    };

    let expanded = quote! {
        #[automatically_derived]
        impl ::mneme::core::FlowType for #name {
            fn type_id() -> &'static str {
                #type_id
            }
        }
    };

    TokenStream::from(expanded)
}

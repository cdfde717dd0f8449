// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Procedural macro backing `test_with_tracing::test`.

use proc_macro::*;
use quote::quote;
use syn::spanned::*;
use syn::*;

/// Attribute macro replacing `#[test]` for tests that want tracing
/// output.
///
/// The wrapped function runs inside a tracing span named after the test,
/// with the subscriber initialized once per process.
///
/// # Constraints
///
/// - The function must not be async
/// - The function must not have any parameters
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);
    make_test(item)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn make_test(item: ItemFn) -> syn::Result<proc_macro2::TokenStream> {
    if item.sig.asyncness.is_some() {
        return Err(Error::new(
            item.sig.fn_token.span(),
            "test function must not be async",
        ));
    }

    let name = &item.sig.ident;
    let return_type = &item.sig.output;
    if !item.sig.inputs.is_empty() {
        return Err(Error::new(item.sig.inputs.span(), "expected 0 arguments"));
    };
    let attrs = &item.attrs;

    Ok(quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        fn #name() #return_type {
            #item
            ::test_with_tracing::init();
            let span = tracing::span!(tracing::Level::INFO, stringify!(#name));
            let _span_guard = span.enter();
            #name()
        }
    })
}

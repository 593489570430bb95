// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use proc_macro::TokenStream;
use quote::format_ident;
use quote::quote;
use syn::Data;
use syn::DeriveInput;
use syn::Fields;
use syn::Ident;
use syn::parse_macro_input;

/// Generate a [`lro::ddi::kstat::KStatProvider`] implementation for a
/// struct whose named fields are all [`lro::ddi::kstat::KStatU64`].
///
/// ```Rust
/// #[derive(KStatProvider)]
/// struct LroStats {
///     queued: KStatU64,
///     flushed: KStatU64,
/// }
/// ```
///
/// Alongside the trait impl this emits an `LroStatsSnap` struct of
/// plain `u64` fields which is `Serialize` and can list itself as
/// `(name, value)` pairs for tabular output.
#[proc_macro_derive(KStatProvider)]
pub fn derive_kstat_provider(input: TokenStream) -> TokenStream {
    let DeriveInput { ident, data, .. } = parse_macro_input!(input);

    let named = match data {
        Data::Struct(s) => match s.fields {
            Fields::Named(f) => f.named,
            other => {
                return syn::Error::new_spanned(
                    other,
                    "a KStatProvider must have named fields",
                )
                .to_compile_error()
                .into();
            }
        },

        _ => {
            return syn::Error::new_spanned(
                ident,
                "only a struct may be a KStatProvider",
            )
            .to_compile_error()
            .into();
        }
    };

    let num_fields = named.len() as u32;
    let fields: Vec<Ident> =
        named.iter().filter_map(|f| f.ident.clone()).collect();
    let ident_snap = format_ident!("{}Snap", ident);

    let output = quote! {
        #[derive(Clone, Debug, Default, Eq, PartialEq, ::serde::Serialize)]
        pub struct #ident_snap {
            #( pub #fields: u64, )*
        }

        impl #ident_snap {
            /// Each counter's name and value, in declaration order.
            pub fn pairs(&self) -> ::std::vec::Vec<(&'static str, u64)> {
                ::std::vec![
                    #( (stringify!(#fields), self.#fields), )*
                ]
            }
        }

        impl ::lro::ddi::kstat::KStatProvider for #ident {
            const NUM_FIELDS: u32 = #num_fields;
            type Snap = #ident_snap;

            fn new() -> Self {
                use ::lro::ddi::kstat::KStatU64;

                Self {
                    #( #fields: KStatU64::new(stringify!(#fields)), )*
                }
            }

            fn snapshot(&self) -> Self::Snap {
                #ident_snap {
                    #( #fields: self.#fields.val(), )*
                }
            }

            fn reset(&mut self) {
                #( self.#fields.set(0); )*
            }
        }
    };

    output.into()
}

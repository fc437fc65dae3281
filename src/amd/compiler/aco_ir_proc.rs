/*
 * Copyright © 2023 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

extern crate proc_macro;
extern crate proc_macro2;
#[macro_use]
extern crate quote;
extern crate syn;

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use syn::*;

/// Turns a CamelCase opcode variant into its assembler name
///
/// Digits stick to whatever precedes them so `VCvtF32I32` becomes
/// `v_cvt_f32_i32` and `SAndn2B64` becomes `s_andn2_b64`.
fn opcode_name(ident: &Ident) -> String {
    let mut name = String::new();
    for (i, c) in ident.to_string().chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                name.push('_');
            }
            name.push(c.to_ascii_lowercase());
        } else {
            name.push(c);
        }
    }
    name
}

fn variant_format(v: &Variant) -> Ident {
    for attr in &v.attrs {
        if let Meta::List(ml) = &attr.meta {
            if ml.path.is_ident("format") {
                return parse2::<Ident>(ml.tokens.clone())
                    .expect("#[format(...)] takes a single Format name");
            }
        }
    }
    panic!("Opcode {} has no #[format(...)] attribute", v.ident);
}

#[proc_macro_derive(OpcodeInfo, attributes(format))]
pub fn derive_opcode_info(input: TokenStream) -> TokenStream {
    let DeriveInput { ident, data, .. } = parse_macro_input!(input);

    let Data::Enum(e) = data else {
        panic!("OpcodeInfo can only be derived for enums");
    };

    let mut name_cases = TokenStream2::new();
    let mut format_cases = TokenStream2::new();
    let mut all = TokenStream2::new();
    let mut count = 0_usize;
    for v in &e.variants {
        assert!(
            matches!(v.fields, Fields::Unit),
            "Opcode variants must not carry data"
        );
        let case = &v.ident;
        let name = LitStr::new(&opcode_name(case), Span::call_site());
        let format = variant_format(v);
        name_cases.extend(quote! {
            #ident::#case => #name,
        });
        format_cases.extend(quote! {
            #ident::#case => Format::#format,
        });
        all.extend(quote! { #ident::#case, });
        count += 1;
    }

    quote! {
        impl #ident {
            pub const ALL: [#ident; #count] = [#all];

            pub fn name(&self) -> &'static str {
                match self {
                    #name_cases
                }
            }

            pub fn format(&self) -> Format {
                match self {
                    #format_cases
                }
            }
        }

        impl fmt::Display for #ident {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.name())
            }
        }
    }
    .into()
}

#[proc_macro_derive(FromVariants)]
pub fn derive_from_variants(input: TokenStream) -> TokenStream {
    let DeriveInput { ident, data, .. } = parse_macro_input!(input);

    let Data::Enum(e) = data else {
        panic!("FromVariants can only be derived for enums");
    };

    let mut impls = TokenStream2::new();
    for v in e.variants {
        let case = v.ident;
        if let Fields::Unnamed(fields) = v.fields {
            assert!(
                fields.unnamed.len() == 1,
                "Variant {} must have exactly one field",
                case
            );
            let ty = &fields.unnamed[0].ty;
            impls.extend(quote! {
                impl From<#ty> for #ident {
                    fn from(x: #ty) -> Self {
                        #ident::#case(x)
                    }
                }
            });
        }
    }
    impls.into()
}

#[proc_macro_derive(Display)]
pub fn enum_derive_display(input: TokenStream) -> TokenStream {
    let DeriveInput { ident, data, .. } = parse_macro_input!(input);

    if let Data::Enum(e) = data {
        let mut cases = TokenStream2::new();
        for v in e.variants {
            let case = v.ident;
            match v.fields {
                Fields::Unit => cases.extend(quote! {
                    #ident::#case => Ok(()),
                }),
                _ => cases.extend(quote! {
                    #ident::#case(x) => x.fmt(f),
                }),
            }
        }
        quote! {
            impl fmt::Display for #ident {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    match self {
                        #cases
                    }
                }
            }
        }
        .into()
    } else {
        panic!("Not an enum type");
    }
}

//! # Setter Derive
//!
//! Configuration structs in the driver are plain `Copy` data with `const`
//! constructors. This derive adds the two ways of adjusting one field:
//!
//! - `set_<field>(&mut self, value) -> &mut Self` for in-place chains, and
//! - `const with_<field>(self, value) -> Self` for building constants.
//!
//! The field's own doc comment is carried over to both generated methods.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, Ident, LitBool, LitStr, parse_macro_input};

/// Derive `set_<field>` and `with_<field>` for every named field.
///
/// Field options:
/// - `#[setters(skip)]` or `#[setters(skip = true)]`: no setters.
/// - `#[setters(rename = "name")]`: generate `set_name` / `with_name`.
///
/// # Example
///
/// ```
/// use utils_setters_derive::Setters;
///
/// #[derive(Clone, Copy, Setters)]
/// struct Ring {
///     /// Slots in the ring.
///     depth: u32,
///     #[setters(rename = "timeout")]
///     timeout_us: u64,
///     #[setters(skip)]
///     generation: u8,
/// }
///
/// const RING: Ring = Ring { depth: 8, timeout_us: 1, generation: 2 }.with_depth(16);
/// let mut r = RING;
/// r.set_timeout(30).set_depth(4);
/// assert_eq!((r.depth, r.timeout_us, r.generation), (4, 30, 2));
/// ```
#[proc_macro_derive(Setters, attributes(setters))]
pub fn derive_setters(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input).unwrap_or_else(|e| e.to_compile_error().into())
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let ident = &input.ident;
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(
            ident.span(),
            "Setters can only be derived for structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new(
            ident.span(),
            "Setters requires a struct with named fields",
        ));
    };

    let mut methods = Vec::new();
    for field in &fields.named {
        let Some(name) = &field.ident else { continue };
        let options = FieldOptions::parse(&field.attrs)?;
        if options.skip {
            continue;
        }

        let stem = options.rename.unwrap_or_else(|| name.clone());
        let set_name = format_ident!("set_{}", stem);
        let with_name = format_ident!("with_{}", stem);
        let ty = &field.ty;
        let docs = field.attrs.iter().filter(|a| a.path().is_ident("doc"));
        let docs_again = docs.clone();

        methods.push(quote! {
            #(#docs)*
            #[inline]
            pub fn #set_name(&mut self, value: #ty) -> &mut Self {
                self.#name = value;
                self
            }

            #(#docs_again)*
            #[inline]
            #[must_use]
            pub const fn #with_name(mut self, value: #ty) -> Self {
                self.#name = value;
                self
            }
        });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            #(#methods)*
        }
    }
    .into())
}

#[derive(Default)]
struct FieldOptions {
    skip: bool,
    rename: Option<Ident>,
}

impl FieldOptions {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut options = Self::default();
        for attr in attrs.iter().filter(|a| a.path().is_ident("setters")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    options.skip = if meta.input.is_empty() {
                        true
                    } else {
                        meta.value()?.parse::<LitBool>()?.value
                    };
                    Ok(())
                } else if meta.path.is_ident("rename") {
                    let lit: LitStr = meta.value()?.parse()?;
                    options.rename = Some(lit.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("expected `skip` or `rename = \"..\"`"))
                }
            })?;
        }
        Ok(options)
    }
}

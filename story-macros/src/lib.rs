//! Proc macros for structured story payloads.
//!
//! Provides `#[derive(Schema)]`, which turns a payload struct into a JSON
//! schema and a forced-tool definition for the Claude API. The model answers
//! by "calling" the tool, so its input is guaranteed to be shaped like the
//! struct before serde ever sees it.
//!
//! # Example
//!
//! ```ignore
//! /// Emit one story node
//! #[derive(Schema, Deserialize)]
//! #[schema(name = "emit_node")]
//! struct NodePayload {
//!     /// Scene prose shown to the player
//!     text: String,
//!     /// Options offered at this point
//!     #[schema(min_items = 1)]
//!     choices: Vec<ChoicePayload>,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Field, Lit, LitInt, LitStr, Meta, Type};

/// Derive macro for generating payload schemas.
///
/// # Attributes
///
/// - `#[schema(name = "...")]` on the struct - Tool name (defaults to snake_case struct name)
/// - `#[schema(optional)]` on fields - Not listed in `required`
/// - `#[schema(rename = "...")]` on fields - Override field name in schema
/// - `#[schema(min_items = N)]` on `Vec` fields - Emit `minItems`
///
/// Fields whose type is not a primitive, `Option`, `Vec` or map must
/// themselves derive `Schema`.
#[proc_macro_derive(Schema, attributes(schema))]
pub fn derive_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_schema(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

#[derive(Default)]
struct FieldOptions {
    optional: bool,
    rename: Option<String>,
    min_items: Option<usize>,
}

fn expand_schema(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let schema_name = get_schema_name(&input)?;
    let description = get_doc_comment(&input.attrs);

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Schema derive only supports structs with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(&input, "Schema derive only supports structs")),
    };

    let mut property_tokens = Vec::new();
    let mut required_fields = Vec::new();

    for field in fields {
        let options = get_field_options(field)?;
        let field_name = match &options.rename {
            Some(name) => name.clone(),
            None => field
                .ident
                .as_ref()
                .map(|ident| ident.to_string())
                .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?,
        };
        let field_desc = get_doc_comment(&field.attrs);
        let type_schema = type_to_schema(&field.ty, options.min_items);

        let desc_token = if field_desc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = serde_json::json!(#field_desc); }
        };

        property_tokens.push(quote! {
            {
                let mut property = #type_schema;
                #desc_token
                properties.insert(#field_name.to_string(), property);
            }
        });

        if !options.optional && !is_option_type(&field.ty) {
            required_fields.push(field_name);
        }
    }

    Ok(quote! {
        impl #struct_name {
            /// Name of the tool the model calls to return this payload.
            pub fn schema_name() -> &'static str {
                #schema_name
            }

            /// Description taken from the type's doc comment.
            pub fn schema_description() -> &'static str {
                #description
            }

            /// JSON schema describing this payload.
            pub fn json_schema() -> serde_json::Value {
                let mut properties = serde_json::Map::new();
                #(#property_tokens)*

                let required: Vec<&str> = vec![#(#required_fields),*];

                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required
                })
            }

            /// Tool definition that forces the model to answer with this payload.
            pub fn as_tool() -> claude::Tool {
                claude::Tool {
                    name: Self::schema_name().to_string(),
                    description: Self::schema_description().to_string(),
                    input_schema: Self::json_schema(),
                }
            }
        }
    })
}

fn get_schema_name(input: &DeriveInput) -> syn::Result<String> {
    let mut name = None;
    for attr in &input.attrs {
        if attr.path().is_ident("schema") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let value: LitStr = meta.value()?.parse()?;
                    name = Some(value.value());
                    Ok(())
                } else {
                    Err(meta.error("unsupported struct-level schema attribute"))
                }
            })?;
        }
    }

    Ok(name.unwrap_or_else(|| to_snake_case(&input.ident.to_string())))
}

fn get_field_options(field: &Field) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("schema") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("optional") {
                options.optional = true;
                Ok(())
            } else if meta.path.is_ident("rename") {
                let value: LitStr = meta.value()?.parse()?;
                options.rename = Some(value.value());
                Ok(())
            } else if meta.path.is_ident("min_items") {
                let value: LitInt = meta.value()?.parse()?;
                options.min_items = Some(value.base10_parse()?);
                Ok(())
            } else {
                Err(meta.error("unsupported field schema attribute"))
            }
        })?;
    }
    Ok(options)
}

fn get_doc_comment(attrs: &[syn::Attribute]) -> String {
    let mut docs = Vec::new();
    for attr in attrs {
        if attr.path().is_ident("doc") {
            if let Meta::NameValue(nv) = &attr.meta {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        docs.push(s.value().trim().to_string());
                    }
                }
            }
        }
    }
    docs.join(" ")
}

fn is_option_type(ty: &Type) -> bool {
    last_segment(ty).is_some_and(|segment| segment.ident == "Option")
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(type_path) => type_path.path.segments.last(),
        _ => None,
    }
}

/// Generic arguments of a path segment, in order.
fn generic_args(segment: &syn::PathSegment) -> Vec<&Type> {
    match &segment.arguments {
        syn::PathArguments::AngleBracketed(args) => args
            .args
            .iter()
            .filter_map(|arg| match arg {
                syn::GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn type_to_schema(ty: &Type, min_items: Option<usize>) -> TokenStream2 {
    let Some(segment) = last_segment(ty) else {
        return quote! { serde_json::json!({}) };
    };

    match segment.ident.to_string().as_str() {
        "String" | "str" => quote! { serde_json::json!({"type": "string"}) },
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { serde_json::json!({"type": "integer"}) }
        }
        "f32" | "f64" => quote! { serde_json::json!({"type": "number"}) },
        "bool" => quote! { serde_json::json!({"type": "boolean"}) },
        "Option" => match generic_args(segment).first() {
            Some(inner) => type_to_schema(inner, min_items),
            None => quote! { serde_json::json!({}) },
        },
        "Vec" => {
            let items = match generic_args(segment).first() {
                Some(inner) => type_to_schema(inner, None),
                None => quote! { serde_json::json!({}) },
            };
            match min_items {
                Some(min) => quote! {
                    serde_json::json!({"type": "array", "items": #items, "minItems": #min})
                },
                None => quote! {
                    serde_json::json!({"type": "array", "items": #items})
                },
            }
        }
        "BTreeMap" | "HashMap" => {
            let values = match generic_args(segment).get(1) {
                Some(value) => type_to_schema(value, None),
                None => quote! { serde_json::json!({}) },
            };
            quote! {
                serde_json::json!({"type": "object", "additionalProperties": #values})
            }
        }
        _ => quote! { <#ty>::json_schema() },
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

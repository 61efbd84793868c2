//! Derive macro for `fieldcrypt` field mappings.
//!
//! `#[derive(EncryptedFields)]` turns field attributes into an
//! `impl fieldcrypt::mapping::EncryptedFields` whose `field_map()` returns the
//! mapping the record layer consumes. Only fields carrying `#[encrypted]` are
//! mapped.

#![warn(clippy::pedantic, clippy::nursery)]

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{parse_macro_input, Data, DeriveInput, Field, Fields, LitBool, LitInt, LitStr};

const MIN_BITS: u32 = 16;
const MAX_BITS: u32 = 256;

/// Derives `fieldcrypt::mapping::EncryptedFields`.
///
/// # Attributes
///
/// - `#[encrypted(mode = "randomized" | "deterministic", kind = "text" | "string" | "json", nullable = bool, rename = "column")]`
///   marks a field as encrypted. Every key is optional.
/// - `#[blind_index(column = "...", context = "...", bits = N, case_sensitive)]`
///   adds a blind-index column. Repeatable; `column` is required.
///
/// # Example
///
/// ```rust,ignore
/// use fieldcrypt::mapping::EncryptedFields;
/// use fieldcrypt_derive::EncryptedFields;
///
/// #[derive(EncryptedFields)]
/// struct User {
///     id: u64,
///     #[encrypted(mode = "deterministic")]
///     #[blind_index(column = "email_bidx", bits = 32)]
///     email: String,
///     #[encrypted(kind = "json", nullable = false)]
///     profile: serde_json::Value,
/// }
///
/// let map = User::field_map();
/// assert_eq!(map.entity, "User");
/// ```
#[proc_macro_derive(EncryptedFields, attributes(encrypted, blind_index))]
pub fn derive_encrypted_fields(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input).unwrap_or_else(syn::Error::into_compile_error).into()
}

#[derive(Clone, Copy)]
enum Mode {
    Randomized,
    Deterministic,
}

#[derive(Clone, Copy)]
enum Kind {
    Text,
    Json,
}

struct IndexAttr {
    column: LitStr,
    context: Option<LitStr>,
    bits: Option<u32>,
    case_sensitive: bool,
}

struct FieldAttr {
    name: String,
    mode: Mode,
    kind: Kind,
    nullable: bool,
    indexes: Vec<IndexAttr>,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "EncryptedFields can only be derived for structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "EncryptedFields requires a struct with named fields",
        ));
    };

    let mut specs = Vec::new();
    for field in &fields.named {
        if let Some(spec) = parse_field(field)? {
            specs.push(field_tokens(&spec));
        }
    }

    let ident = &input.ident;
    let entity = ident.to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::fieldcrypt::mapping::EncryptedFields for #ident #ty_generics #where_clause {
            fn field_map() -> ::fieldcrypt::mapping::FieldMap {
                ::fieldcrypt::mapping::FieldMap::new(#entity)
                    #(.with_field(#specs))*
            }
        }
    })
}

fn parse_field(field: &Field) -> syn::Result<Option<FieldAttr>> {
    let Some(ident) = &field.ident else {
        return Ok(None);
    };

    let mut spec: Option<FieldAttr> = None;
    let mut indexes = Vec::new();

    for attr in &field.attrs {
        if attr.path().is_ident("encrypted") {
            if spec.is_some() {
                return Err(syn::Error::new_spanned(attr, "duplicate #[encrypted] attribute"));
            }
            let mut parsed = FieldAttr {
                name: ident.to_string().trim_start_matches("r#").to_string(),
                mode: Mode::Randomized,
                kind: Kind::Text,
                nullable: true,
                indexes: Vec::new(),
            };
            if !matches!(attr.meta, syn::Meta::Path(_)) {
                attr.parse_nested_meta(|meta| parse_encrypted_key(&meta, &mut parsed))?;
            }
            spec = Some(parsed);
        } else if attr.path().is_ident("blind_index") {
            indexes.push(parse_blind_index(attr)?);
        }
    }

    match spec {
        Some(mut spec) => {
            spec.indexes = indexes;
            Ok(Some(spec))
        }
        None if !indexes.is_empty() => Err(syn::Error::new_spanned(
            ident,
            "#[blind_index] requires the field to be #[encrypted]",
        )),
        None => Ok(None),
    }
}

fn parse_encrypted_key(meta: &ParseNestedMeta<'_>, spec: &mut FieldAttr) -> syn::Result<()> {
    if meta.path.is_ident("mode") {
        let value: LitStr = meta.value()?.parse()?;
        spec.mode = match value.value().as_str() {
            "randomized" => Mode::Randomized,
            "deterministic" => Mode::Deterministic,
            other => {
                return Err(syn::Error::new_spanned(
                    &value,
                    format!("unknown mode `{other}`, expected \"randomized\" or \"deterministic\""),
                ))
            }
        };
    } else if meta.path.is_ident("kind") {
        let value: LitStr = meta.value()?.parse()?;
        spec.kind = match value.value().as_str() {
            "text" | "string" => Kind::Text,
            "json" => Kind::Json,
            other => {
                return Err(syn::Error::new_spanned(
                    &value,
                    format!("unknown kind `{other}`, expected \"text\", \"string\" or \"json\""),
                ))
            }
        };
    } else if meta.path.is_ident("nullable") {
        let value: LitBool = meta.value()?.parse()?;
        spec.nullable = value.value;
    } else if meta.path.is_ident("rename") {
        let value: LitStr = meta.value()?.parse()?;
        spec.name = value.value();
    } else {
        return Err(meta.error("unknown #[encrypted] key, expected mode, kind, nullable or rename"));
    }
    Ok(())
}

fn parse_blind_index(attr: &syn::Attribute) -> syn::Result<IndexAttr> {
    let mut column = None;
    let mut context = None;
    let mut bits = None;
    let mut case_sensitive = false;

    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("column") {
            column = Some(meta.value()?.parse::<LitStr>()?);
        } else if meta.path.is_ident("context") {
            context = Some(meta.value()?.parse::<LitStr>()?);
        } else if meta.path.is_ident("bits") {
            let value: LitInt = meta.value()?.parse()?;
            let parsed: u32 = value.base10_parse()?;
            if !(MIN_BITS..=MAX_BITS).contains(&parsed) {
                return Err(syn::Error::new_spanned(
                    &value,
                    format!("blind index bits must be within [{MIN_BITS}, {MAX_BITS}]"),
                ));
            }
            bits = Some(parsed);
        } else if meta.path.is_ident("case_sensitive") {
            case_sensitive = if meta.input.peek(syn::Token![=]) {
                meta.value()?.parse::<LitBool>()?.value
            } else {
                true
            };
        } else {
            return Err(meta.error(
                "unknown #[blind_index] key, expected column, context, bits or case_sensitive",
            ));
        }
        Ok(())
    })?;

    let column = column.ok_or_else(|| syn::Error::new_spanned(attr, "#[blind_index] requires `column`"))?;
    Ok(IndexAttr { column, context, bits, case_sensitive })
}

fn field_tokens(spec: &FieldAttr) -> TokenStream2 {
    let name = &spec.name;
    let mode = match spec.mode {
        Mode::Randomized => quote!(::fieldcrypt::cipher::Mode::Randomized),
        Mode::Deterministic => quote!(::fieldcrypt::cipher::Mode::Deterministic),
    };
    let kind = match spec.kind {
        Kind::Text => quote!(::fieldcrypt::mapping::FieldKind::Text),
        Kind::Json => quote!(::fieldcrypt::mapping::FieldKind::Json),
    };
    let nullable = spec.nullable;

    let indexes = spec.indexes.iter().map(|index| {
        let column = &index.column;
        let context = index.context.as_ref().map(|c| quote!(.with_context(#c)));
        let bits = index.bits.map(|b| quote!(.with_bits(#b)));
        let case_insensitive = !index.case_sensitive;
        quote! {
            ::fieldcrypt::mapping::BlindIndexSpec::new(#column)
                #context
                #bits
                .with_case_insensitive(#case_insensitive)
        }
    });

    quote! {
        ::fieldcrypt::mapping::FieldSpec::new(#name)
            .with_kind(#kind)
            .with_mode(#mode)
            .with_nullable(#nullable)
            #(.with_blind_index(#indexes))*
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn error_of(input: &DeriveInput) -> String {
        match expand(input) {
            Ok(_) => panic!("expected a compile error"),
            Err(err) => err.to_string(),
        }
    }

    #[test]
    fn test_expands_mapped_fields_only() {
        let input: DeriveInput = parse_quote! {
            struct User {
                id: u64,
                #[encrypted(mode = "deterministic")]
                #[blind_index(column = "email_bidx", bits = 32)]
                email: String,
            }
        };
        let tokens = expand(&input).unwrap().to_string();
        assert!(tokens.contains("FieldMap :: new (\"User\")"));
        assert!(tokens.contains("FieldSpec :: new (\"email\")"));
        assert!(tokens.contains("Mode :: Deterministic"));
        assert!(tokens.contains("with_bits (32u32)"));
        assert!(!tokens.contains("\"id\""));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let input: DeriveInput = parse_quote! {
            struct User {
                #[encrypted(mode = "siv")]
                email: String,
            }
        };
        assert!(error_of(&input).contains("unknown mode `siv`"));
    }

    #[test]
    fn test_rejects_unknown_kind_and_key() {
        let kind: DeriveInput = parse_quote! {
            struct User {
                #[encrypted(kind = "blob")]
                email: String,
            }
        };
        assert!(error_of(&kind).contains("unknown kind `blob`"));

        let key: DeriveInput = parse_quote! {
            struct User {
                #[encrypted(cipher = "aes")]
                email: String,
            }
        };
        assert!(error_of(&key).contains("unknown #[encrypted] key"));
    }

    #[test]
    fn test_rejects_bits_out_of_range() {
        let input: DeriveInput = parse_quote! {
            struct User {
                #[encrypted]
                #[blind_index(column = "email_bidx", bits = 8)]
                email: String,
            }
        };
        assert!(error_of(&input).contains("[16, 256]"));
    }

    #[test]
    fn test_blind_index_requires_encrypted_and_column() {
        let unencrypted: DeriveInput = parse_quote! {
            struct User {
                #[blind_index(column = "email_bidx")]
                email: String,
            }
        };
        assert!(error_of(&unencrypted).contains("requires the field to be #[encrypted]"));

        let no_column: DeriveInput = parse_quote! {
            struct User {
                #[encrypted]
                #[blind_index(bits = 32)]
                email: String,
            }
        };
        assert!(error_of(&no_column).contains("requires `column`"));
    }

    #[test]
    fn test_rejects_non_structs() {
        let input: DeriveInput = parse_quote! {
            enum User { A, B }
        };
        assert!(error_of(&input).contains("only be derived for structs"));

        let tuple: DeriveInput = parse_quote! {
            struct User(String);
        };
        assert!(error_of(&tuple).contains("named fields"));
    }
}

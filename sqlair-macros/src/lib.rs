//! `#[derive(SqlairType)]`: builds a `sqlair_core::types::SqlairType` impl
//! for a record, mapping, or sequence type (spec.md §3).
//!
//! The shape is inferred from the struct itself rather than an attribute:
//! a named-field struct is a record, a one-field tuple struct wrapping a
//! `HashMap`-like type is a mapping, and one wrapping a `Vec`-like type is a
//! sequence. Field attributes on a record's members:
//!
//!   - `#[sqlair(column = "name,omitempty")]` — override the column tag;
//!     the string is run through the same tag grammar the runtime catalogue
//!     validates against (`sqlair_core::types::tag::parse_tag`), so a
//!     malformed tag is a compile error here rather than a catalogue error
//!     at `register()` time.
//!   - `#[sqlair(embed)]` — promote the field's own members (it must itself
//!     be a record type) into this type's member list.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, Data, DataStruct, DeriveInput, Field, Fields, FieldsNamed, FieldsUnnamed,
    GenericArgument, Ident, Meta, NestedMeta, PathArguments, Type,
};

#[proc_macro_derive(SqlairType, attributes(sqlair))]
pub fn derive_sqlair_type(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ident = input.ident.clone();

    let body = match &input.data {
        Data::Struct(DataStruct { fields: Fields::Named(named), .. }) => record_impl(&ident, named),
        Data::Struct(DataStruct { fields: Fields::Unnamed(unnamed), .. }) => {
            collection_impl(&ident, unnamed)
        }
        _ => syn::Error::new_spanned(
            &input,
            "SqlairType can only be derived for a named-field struct (record), or a one-field \
             tuple struct wrapping a map (mapping) or a Vec (sequence)",
        )
        .to_compile_error(),
    };

    body.into()
}

/// One parsed `#[sqlair(...)]` field attribute.
#[derive(Default)]
struct FieldAttr {
    embed: bool,
    column: Option<String>,
}

fn parse_field_attr(field: &Field) -> Result<FieldAttr, syn::Error> {
    let mut out = FieldAttr::default();
    for attr in &field.attrs {
        if !attr.path.is_ident("sqlair") {
            continue;
        }
        let meta = attr.parse_meta()?;
        let list = match meta {
            Meta::List(list) => list,
            other => return Err(syn::Error::new_spanned(other, "expected `sqlair(...)`")),
        };
        for nested in list.nested {
            match nested {
                NestedMeta::Meta(Meta::Path(p)) if p.is_ident("embed") => out.embed = true,
                NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("column") => {
                    let lit = match &nv.lit {
                        syn::Lit::Str(s) => s.value(),
                        other => return Err(syn::Error::new_spanned(other, "expected a string literal")),
                    };
                    out.column = Some(lit);
                }
                other => return Err(syn::Error::new_spanned(other, "unrecognised `sqlair(...)` entry")),
            }
        }
    }
    Ok(out)
}

fn record_impl(ident: &Ident, fields: &FieldsNamed) -> TokenStream2 {
    let type_name = ident.to_string();
    let mut direct_members = Vec::new();
    let mut embed_blocks = Vec::new();

    for field in &fields.named {
        let field_ident = field.ident.clone().expect("named field has an ident");
        let attr = match parse_field_attr(field) {
            Ok(a) => a,
            Err(e) => return e.to_compile_error(),
        };

        if attr.embed {
            embed_blocks.push(embed_block(ident, &field_ident, &field.ty));
            continue;
        }

        let raw_tag = attr.column.unwrap_or_else(|| field_ident.to_string());
        let parsed = match sqlair_core::types::tag::parse_tag(&raw_tag) {
            Ok(t) => t,
            Err(e) => return syn::Error::new_spanned(&field_ident, e.to_string()).to_compile_error(),
        };
        let tag_name = parsed.name;
        let omit_empty = parsed.omit_empty;
        let field_name_str = field_ident.to_string();
        let field_ty = &field.ty;

        direct_members.push(quote! {
            sqlair_core::types::MemberDescriptor {
                field_name: #field_name_str,
                tag: #tag_name,
                omit_empty: #omit_empty,
                path: &[#field_name_str],
                get: ::std::sync::Arc::new(|outer: &dyn ::std::any::Any| {
                    let outer = outer.downcast_ref::<#ident>().expect("sqlair: wrong concrete type");
                    sqlair_core::types::value::IntoValue::into_value(outer.#field_ident.clone())
                }),
                is_zero: ::std::sync::Arc::new(|outer: &dyn ::std::any::Any| {
                    let outer = outer.downcast_ref::<#ident>().expect("sqlair: wrong concrete type");
                    sqlair_core::types::value::IntoValue::is_zero_value(&outer.#field_ident)
                }),
                set: ::std::sync::Arc::new(|outer: &mut dyn ::std::any::Any, v: sqlair_core::types::value::Value| {
                    let outer = outer.downcast_mut::<#ident>().expect("sqlair: wrong concrete type");
                    outer.#field_ident = <#field_ty as sqlair_core::types::value::FromValue>::from_value(v)?;
                    Ok(())
                }),
            },
        });
    }

    let members_fn = format_ident!("__sqlair_members_for_{}", ident);

    quote! {
        #[automatically_derived]
        impl #ident {
            fn #members_fn() -> &'static [sqlair_core::types::MemberDescriptor] {
                static CELL: ::std::sync::OnceLock<Vec<sqlair_core::types::MemberDescriptor>> =
                    ::std::sync::OnceLock::new();
                CELL.get_or_init(|| {
                    let mut members: Vec<sqlair_core::types::MemberDescriptor> = vec![
                        #(#direct_members)*
                    ];
                    #(#embed_blocks)*
                    members.sort_by(|a, b| a.tag.cmp(b.tag));
                    members
                })
            }
        }

        #[automatically_derived]
        impl sqlair_core::types::SqlairType for #ident {
            fn type_name() -> &'static str {
                #type_name
            }
            fn descriptor() -> &'static sqlair_core::types::TypeDescriptor {
                static CELL: ::std::sync::OnceLock<sqlair_core::types::TypeDescriptor> =
                    ::std::sync::OnceLock::new();
                CELL.get_or_init(|| {
                    sqlair_core::types::TypeDescriptor::Record(sqlair_core::types::RecordDescriptor {
                        type_name: #type_name,
                        members: #ident::#members_fn(),
                    })
                })
            }
        }
    }
}

/// Build the block that, inside the `members` builder closure, promotes an
/// `#[sqlair(embed)]` field's own members into the outer record's list.
fn embed_block(outer_ident: &Ident, field_ident: &Ident, field_ty: &Type) -> TokenStream2 {
    let field_name_str = field_ident.to_string();
    quote! {
        {
            let embedded = match <#field_ty as sqlair_core::types::SqlairType>::descriptor() {
                sqlair_core::types::TypeDescriptor::Record(r) => r,
                _ => panic!("sqlair: embedded field `{}` must itself be a record type", #field_name_str),
            };
            for m in embedded.members.iter() {
                let get = m.get.clone();
                let is_zero = m.is_zero.clone();
                let set = m.set.clone();
                members.push(sqlair_core::types::MemberDescriptor {
                    field_name: m.field_name,
                    tag: m.tag,
                    omit_empty: m.omit_empty,
                    path: &[#field_name_str],
                    get: ::std::sync::Arc::new(move |outer: &dyn ::std::any::Any| {
                        let outer = outer.downcast_ref::<#outer_ident>().expect("sqlair: wrong concrete type");
                        (get)(&outer.#field_ident as &dyn ::std::any::Any)
                    }),
                    is_zero: ::std::sync::Arc::new(move |outer: &dyn ::std::any::Any| {
                        let outer = outer.downcast_ref::<#outer_ident>().expect("sqlair: wrong concrete type");
                        (is_zero)(&outer.#field_ident as &dyn ::std::any::Any)
                    }),
                    set: ::std::sync::Arc::new(move |outer: &mut dyn ::std::any::Any, v: sqlair_core::types::value::Value| {
                        let outer = outer.downcast_mut::<#outer_ident>().expect("sqlair: wrong concrete type");
                        (set)(&mut outer.#field_ident as &mut dyn ::std::any::Any, v)
                    }),
                });
            }
        }
    }
}

/// A one-field tuple struct: either a mapping (wraps a `HashMap`/`BTreeMap`)
/// or a sequence (wraps a `Vec`/`VecDeque`).
fn collection_impl(ident: &Ident, fields: &FieldsUnnamed) -> TokenStream2 {
    if fields.unnamed.len() != 1 {
        return syn::Error::new_spanned(
            fields,
            "a tuple-struct SqlairType must have exactly one field",
        )
        .to_compile_error();
    }
    let field_ty = &fields.unnamed[0].ty;
    let type_name = ident.to_string();

    let Type::Path(path) = field_ty else {
        return syn::Error::new_spanned(field_ty, "unsupported field type").to_compile_error();
    };
    let segment = path.path.segments.last().expect("non-empty path");
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return syn::Error::new_spanned(segment, "expected a generic container type").to_compile_error();
    };
    let type_args: Vec<&Type> = args
        .args
        .iter()
        .filter_map(|a| match a {
            GenericArgument::Type(t) => Some(t),
            _ => None,
        })
        .collect();

    match segment.ident.to_string().as_str() {
        "HashMap" | "BTreeMap" => {
            let Some(value_ty) = type_args.get(1) else {
                return syn::Error::new_spanned(segment, "expected Map<String, V>").to_compile_error();
            };
            quote! {
                #[automatically_derived]
                impl sqlair_core::types::SqlairType for #ident {
                    fn type_name() -> &'static str {
                        #type_name
                    }
                    fn descriptor() -> &'static sqlair_core::types::TypeDescriptor {
                        static CELL: ::std::sync::OnceLock<sqlair_core::types::TypeDescriptor> =
                            ::std::sync::OnceLock::new();
                        CELL.get_or_init(|| {
                            sqlair_core::types::TypeDescriptor::Mapping(sqlair_core::types::MappingDescriptor {
                                type_name: #type_name,
                                get: |outer: &dyn ::std::any::Any, key: &str| {
                                    let outer = outer.downcast_ref::<#ident>().expect("sqlair: wrong concrete type");
                                    outer.0.get(key).cloned().map(sqlair_core::types::value::IntoValue::into_value)
                                },
                                set: |outer: &mut dyn ::std::any::Any, key: &str, v: sqlair_core::types::value::Value| {
                                    let outer = outer.downcast_mut::<#ident>().expect("sqlair: wrong concrete type");
                                    let value = <#value_ty as sqlair_core::types::value::FromValue>::from_value(v)?;
                                    outer.0.insert(key.to_string(), value);
                                    Ok(())
                                },
                            })
                        })
                    }
                }
            }
        }
        "Vec" | "VecDeque" => {
            if type_args.first().is_none() {
                return syn::Error::new_spanned(segment, "expected Vec<T>").to_compile_error();
            };
            quote! {
                #[automatically_derived]
                impl sqlair_core::types::SqlairType for #ident {
                    fn type_name() -> &'static str {
                        #type_name
                    }
                    fn descriptor() -> &'static sqlair_core::types::TypeDescriptor {
                        static CELL: ::std::sync::OnceLock<sqlair_core::types::TypeDescriptor> =
                            ::std::sync::OnceLock::new();
                        CELL.get_or_init(|| {
                            sqlair_core::types::TypeDescriptor::Sequence(sqlair_core::types::SequenceDescriptor {
                                type_name: #type_name,
                                expand: |outer: &dyn ::std::any::Any| {
                                    let outer = outer.downcast_ref::<#ident>().expect("sqlair: wrong concrete type");
                                    outer.0.iter().cloned().map(sqlair_core::types::value::IntoValue::into_value).collect()
                                },
                            })
                        })
                    }
                }
            }
        }
        other => syn::Error::new_spanned(
            segment,
            format!("unsupported container `{}`; expected HashMap/BTreeMap or Vec/VecDeque", other),
        )
        .to_compile_error(),
    }
}

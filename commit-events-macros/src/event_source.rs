use crate::derive_utils::derives_serde;
use crate::field_utils::ensure_field;
use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{
    Field, Ident, Item, ItemStruct, Result, Token, parse::Parse, parse::ParseStream,
    parse_macro_input,
};

/// #[event_source] 宏实现
/// - 若缺失则追加字段：`events: ::commit_events_domain::queue::EventQueue`
/// - 自动实现 `::commit_events_domain::entity::EventSource`（event_queue）
/// - 支持参数：`#[event_source(field = name)]`，默认 `events`
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventSourceAttrConfig);
    let input = parse_macro_input!(item as Item);

    let mut st = match input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[event_source] only on struct")
                .to_compile_error()
                .into();
        }
    };

    let skip_serde = derives_serde(&st.attrs);

    // 仅支持具名字段结构体
    let fields_named = match &mut st.fields {
        syn::Fields::Named(f) => f,
        _ => {
            return syn::Error::new(st.span(), "only supports named-field struct")
                .to_compile_error()
                .into();
        }
    };

    let field_ident = cfg
        .field
        .unwrap_or_else(|| Ident::new("events", proc_macro2::Span::call_site()));

    let field: Field = if skip_serde {
        syn::parse_quote! {
            #[serde(skip)]
            #field_ident: ::commit_events_domain::queue::EventQueue
        }
    } else {
        syn::parse_quote! {
            #field_ident: ::commit_events_domain::queue::EventQueue
        }
    };

    // 已存在同名字段时沿用用户定义（类型需为 EventQueue，由编译器在 impl 中校验）
    ensure_field(fields_named, field);

    let out_struct = ItemStruct { ..st };

    let ident = &out_struct.ident;
    let generics = out_struct.generics.clone();
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let expanded = quote! {
        #out_struct

        impl #impl_generics ::commit_events_domain::entity::EventSource for #ident #ty_generics #where_clause {
            fn event_queue(&self) -> &::commit_events_domain::queue::EventQueue {
                &self.#field_ident
            }
        }
    };

    TokenStream::from(expanded)
}

// -------- parsing --------

struct EventSourceAttrConfig {
    field: Option<Ident>,
}

impl Parse for EventSourceAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut field: Option<Ident> = None;

        if input.is_empty() {
            return Ok(Self { field });
        }

        let elems: Punctuated<EventSourceAttrElem, Token![,]> =
            Punctuated::<EventSourceAttrElem, Token![,]>::parse_terminated(input)?;

        for elem in elems.into_iter() {
            match elem {
                EventSourceAttrElem::Field(name) => {
                    if field.is_some() {
                        return Err(syn::Error::new(
                            name.span(),
                            "duplicate key 'field' in attribute",
                        ));
                    }
                    field = Some(name);
                }
            }
        }

        Ok(Self { field })
    }
}

enum EventSourceAttrElem {
    Field(Ident),
}

impl Parse for EventSourceAttrElem {
    fn parse(input: ParseStream) -> Result<Self> {
        let key: Ident = input.parse()?;
        if key == "field" {
            let _eq: Token![=] = input.parse()?;
            let name: Ident = input.parse()?;
            Ok(EventSourceAttrElem::Field(name))
        } else {
            Err(syn::Error::new(
                key.span(),
                "unknown key in attribute; expected 'field'",
            ))
        }
    }
}

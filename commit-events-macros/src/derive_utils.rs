use syn::{Attribute, Token};

// 提取已有 derive 列表
pub(crate) fn existing_derives(attrs: &[Attribute]) -> Vec<syn::Path> {
    let mut existing = Vec::new();
    for attr in attrs.iter() {
        if attr.path().is_ident("derive") {
            if let Ok(list) = attr.parse_args_with(
                syn::punctuated::Punctuated::<syn::Path, Token![,]>::parse_terminated,
            ) {
                existing.extend(list);
            }
        }
    }
    existing
}

// 是否派生了 serde 的 Serialize / Deserialize（兼容 `serde::Serialize` 写法）
pub(crate) fn derives_serde(attrs: &[Attribute]) -> bool {
    existing_derives(attrs).iter().any(|p| {
        p.segments
            .last()
            .map(|s| s.ident == "Serialize" || s.ident == "Deserialize")
            .unwrap_or(false)
    })
}

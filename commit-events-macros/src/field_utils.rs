use syn::{Field, FieldsNamed, Ident, Token, punctuated::Punctuated};

pub(crate) fn find_field<'a>(fields_named: &'a FieldsNamed, name: &Ident) -> Option<&'a Field> {
    fields_named
        .named
        .iter()
        .find(|f| f.ident.as_ref().map(|i| i == name).unwrap_or(false))
}

/// 确保具名字段结构体包含所需字段
/// - 已存在：保持原定义与原始顺序，返回 false；
/// - 缺失：将给定字段插入最前，返回 true。
pub(crate) fn ensure_field(fields_named: &mut FieldsNamed, field: Field) -> bool {
    let exists = field
        .ident
        .as_ref()
        .map(|name| find_field(fields_named, name).is_some())
        .unwrap_or(false);
    if exists {
        return false;
    }

    let mut new_named: Punctuated<Field, Token![,]> = Punctuated::new();
    new_named.push(field);
    for f in fields_named.named.clone().into_iter() {
        new_named.push(f);
    }
    fields_named.named = new_named;
    true
}

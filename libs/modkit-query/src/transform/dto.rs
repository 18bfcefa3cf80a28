use tracing::debug;

use crate::jpql::ast::{FromSource, SelectQuery};
use crate::metamodel::Metamodel;
use crate::returned_type::{ConstructorParam, ReturnedType};
use crate::token::QueryTokenStream;
use crate::FieldKind;

/// Constructor expression replacing the selection of `query`, or `None`
/// when the selection must stay as written.
pub(super) fn constructor_selection(
    query: &SelectQuery,
    returned: &ReturnedType,
    model: Option<&Metamodel>,
) -> Option<QueryTokenStream> {
    let ReturnedType::Dto { name, params, .. } = returned else {
        return None;
    };

    if let Some(existing) = query
        .select
        .iter()
        .flat_map(|s| s.items.iter())
        .find_map(|i| i.expr.constructor_class())
    {
        let simple = existing.rsplit('.').next().unwrap_or(existing);
        if simple != name.as_str() {
            debug!(existing, dto = %name, "query already selects a different constructor expression");
        }
        return None;
    }

    let alias = query.primary_alias();
    let args: Vec<String> = match &query.select {
        None => expand_root(alias, params),
        Some(select) => {
            let selects_root = matches!(
                select.items.as_slice(),
                [item] if item.alias.is_none()
                    && item.expr.as_path().is_some_and(|p| Some(p) == alias)
            );
            if selects_root {
                expand_root(alias, params)
            } else {
                if select.items.iter().any(|i| i.alias.is_some()) {
                    debug!(dto = %name, "selected items carry aliases; skipping constructor rewrite");
                    return None;
                }
                if select.items.len() != params.len() {
                    debug!(
                        dto = %name,
                        selected = select.items.len(),
                        params = params.len(),
                        "selection does not match constructor arity"
                    );
                    return None;
                }
                let mut args = Vec::with_capacity(params.len());
                for (item, param) in select.items.iter().zip(params) {
                    if !compatible(query, item.expr.as_path(), param, model) {
                        debug!(dto = %name, param = %param.name, "selected item type does not match constructor");
                        return None;
                    }
                    args.push(super::plain_expr(&item.expr));
                }
                args
            }
        }
    };

    let mut stream = QueryTokenStream::new();
    stream.append_text("new");
    stream.append_text(name.clone());
    stream.append_inline_text(format!("({})", args.join(", ")));
    Some(stream)
}

fn expand_root(alias: Option<&str>, params: &[ConstructorParam]) -> Vec<String> {
    params
        .iter()
        .map(|p| match alias {
            Some(a) => format!("{a}.{}", p.name),
            None => p.name.clone(),
        })
        .collect()
}

/// Unknown kinds on either side count as compatible.
fn compatible(
    query: &SelectQuery,
    path: Option<&str>,
    param: &ConstructorParam,
    model: Option<&Metamodel>,
) -> bool {
    let (Some(expected), Some(path), Some(model)) = (param.kind, path, model) else {
        return true;
    };
    let Some(root) = query.from.first() else {
        return true;
    };
    let FromSource::Entity(entity) = &root.source else {
        return true;
    };
    let relative = match (root.alias.as_deref(), path.split_once('.')) {
        (Some(a), Some((head, rest))) if head == a => rest,
        _ => path,
    };
    match model.resolve(entity, relative) {
        Ok(kind) => kind.field_kind().is_none_or(|actual| same_family(actual, expected)),
        Err(_) => true,
    }
}

fn same_family(a: FieldKind, b: FieldKind) -> bool {
    let numeric = |k: FieldKind| matches!(k, FieldKind::I64 | FieldKind::F64 | FieldKind::Decimal);
    a == b || (numeric(a) && numeric(b))
}

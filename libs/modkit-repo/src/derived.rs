//! Derived-query part trees as specifications.
//!
//! Each part consumes its arguments in method order. Equality against a
//! null argument becomes `is null` (`is not null` when negated). Parts
//! crossing a relation, collection checks and vector search have no
//! single-table rendering and are rejected when the specification is built.

use std::sync::Arc;

use modkit_query::creator::{LikeKind, escape_like};
use modkit_query::part_tree::{Operator, Part, PartTree};
use modkit_query::Value;
use sea_orm::{Condition, EntityTrait};

use crate::field_map::{FieldMap, Path};
use crate::specification::{CriteriaBuilder, Root, Specification};
use crate::RepoError;

/// Check that every part of `tree` can be executed against `fields`.
///
/// # Errors
/// Returns `RepoError::UnsupportedPath` for relation paths,
/// `RepoError::UnsupportedOperator` for operators without a column
/// rendering and `RepoError::UnknownProperty` for unmapped properties.
pub fn validate<E: EntityTrait>(tree: &PartTree, fields: &FieldMap<E>) -> Result<(), RepoError> {
    for part in tree.parts() {
        check(part)?;
        fields.path(&part.path.dotted())?;
    }
    for order in tree.sort.iter() {
        fields.path(&order.property)?;
    }
    Ok(())
}

fn check(part: &Part) -> Result<(), RepoError> {
    if matches!(
        part.operator,
        Operator::IsEmpty
            | Operator::IsNotEmpty
            | Operator::Near
            | Operator::Within
            | Operator::Regex
            | Operator::Exists
    ) {
        return Err(RepoError::UnsupportedOperator(part.operator.to_string()));
    }
    if part.path.segments.iter().any(|s| s.kind.is_join()) {
        return Err(RepoError::UnsupportedPath(part.path.dotted()));
    }
    Ok(())
}

/// Build the restriction of `tree` for one invocation.
///
/// # Errors
/// Returns `RepoError::InvalidArgument` when `arguments` does not match the
/// parameter count, plus the errors of [`validate`] for unsupported parts.
pub fn specification<E: EntityTrait>(
    tree: Arc<PartTree>,
    arguments: Vec<Value>,
    escape: char,
) -> Result<Specification<E>, RepoError> {
    if arguments.len() != tree.parameter_count() {
        return Err(RepoError::InvalidArgument(format!(
            "expected {} arguments, got {}",
            tree.parameter_count(),
            arguments.len()
        )));
    }
    for part in tree.parts() {
        check(part)?;
    }
    Ok(Specification::new(move |root, _, cb| {
        let mut args = arguments.iter();
        let mut ors = Vec::with_capacity(tree.ors.len());
        for or_part in &tree.ors {
            let mut ands = Vec::with_capacity(or_part.parts.len());
            for part in &or_part.parts {
                let consumed: Vec<&Value> = args.by_ref().take(part.parameter_count()).collect();
                ands.push(predicate(root, cb, part, &consumed, escape)?);
            }
            ors.push(ands.into_iter().fold(Condition::all(), Condition::add));
        }
        if ors.is_empty() {
            return Ok(None);
        }
        Ok(Some(ors.into_iter().fold(Condition::any(), Condition::add)))
    }))
}

fn predicate<E: EntityTrait>(
    root: &Root<'_, E>,
    cb: &CriteriaBuilder,
    part: &Part,
    args: &[&Value],
    escape: char,
) -> Result<Condition, RepoError> {
    let path = root.get(&part.path.dotted())?;
    let path = if part.folds_case() { path.upper() } else { path };
    let arg = |i: usize| {
        args.get(i)
            .copied()
            .ok_or_else(|| RepoError::InvalidArgument(format!("missing argument for {}", part.path.dotted())))
    };
    let like = |kind: LikeKind| -> Result<String, RepoError> {
        match arg(0)? {
            Value::String(s) => Ok(wrap(kind, &escape_like(s, escape))),
            other => Err(path.mismatch(other)),
        }
    };

    match part.operator {
        Operator::SimpleProperty => cb.equal(&path, arg(0)?),
        Operator::NegatingSimpleProperty => cb.not_equal(&path, arg(0)?),
        Operator::Between => cb.between(&path, arg(0)?, arg(1)?),
        Operator::LessThan | Operator::Before => cb.less_than(&path, arg(0)?),
        Operator::LessThanEqual => cb.less_than_or_equal(&path, arg(0)?),
        Operator::GreaterThan | Operator::After => cb.greater_than(&path, arg(0)?),
        Operator::GreaterThanEqual => cb.greater_than_or_equal(&path, arg(0)?),
        Operator::IsNull => Ok(cb.is_null(&path)),
        Operator::IsNotNull => Ok(cb.is_not_null(&path)),
        Operator::Like => cb.like(&path, text(&path, arg(0)?)?, None),
        Operator::NotLike => cb.not_like(&path, text(&path, arg(0)?)?, None),
        Operator::StartingWith => cb.like(&path, &like(LikeKind::StartsWith)?, Some(escape)),
        Operator::EndingWith => cb.like(&path, &like(LikeKind::EndsWith)?, Some(escape)),
        Operator::Containing => cb.like(&path, &like(LikeKind::Contains)?, Some(escape)),
        Operator::NotContaining => cb.not_like(&path, &like(LikeKind::Contains)?, Some(escape)),
        Operator::In => cb.is_in(&path, arg(0)?),
        Operator::NotIn => cb.not_in(&path, arg(0)?),
        Operator::True => cb.equal(&path, &Value::Bool(true)),
        Operator::False => cb.equal(&path, &Value::Bool(false)),
        Operator::IsEmpty
        | Operator::IsNotEmpty
        | Operator::Near
        | Operator::Within
        | Operator::Regex
        | Operator::Exists => Err(RepoError::UnsupportedOperator(part.operator.to_string())),
    }
}

fn text<'v, E: EntityTrait>(path: &Path<E>, value: &'v Value) -> Result<&'v str, RepoError> {
    value.as_str().ok_or_else(|| path.mismatch(value))
}

fn wrap(kind: LikeKind, escaped: &str) -> String {
    match kind {
        LikeKind::Contains => format!("%{escaped}%"),
        LikeKind::StartsWith => format!("{escaped}%"),
        LikeKind::EndsWith => format!("%{escaped}"),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use modkit_query::metamodel::{EntityType, Metamodel};
    use modkit_query::{FieldKind, QueryOptions};
    use sea_orm::{DbBackend, QueryFilter, QueryTrait};

    use crate::specification::SelectQuery;

    mod ent {
        use sea_orm::entity::prelude::*;

        #[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "users")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub lastname: String,
            pub nickname: Option<String>,
            pub age: i64,
            pub active: bool,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    fn model() -> Metamodel {
        Metamodel::new()
            .with(
                EntityType::new("User")
                    .id("id", FieldKind::I64)
                    .basic("lastname", FieldKind::String)
                    .basic("nickname", FieldKind::String)
                    .basic("age", FieldKind::I64)
                    .basic("active", FieldKind::Bool)
                    .association("manager", "User")
                    .collection("tags", "Tag"),
            )
            .with(EntityType::new("Tag").id("id", FieldKind::I64))
    }

    fn fields() -> FieldMap<ent::Entity> {
        FieldMap::new()
            .id("id", ent::Column::Id, FieldKind::I64)
            .insert("lastname", ent::Column::Lastname, FieldKind::String)
            .insert("nickname", ent::Column::Nickname, FieldKind::String)
            .insert("age", ent::Column::Age, FieldKind::I64)
            .insert("active", ent::Column::Active, FieldKind::Bool)
    }

    fn tree(method: &str) -> Arc<PartTree> {
        Arc::new(PartTree::parse(method, "User", &model(), &QueryOptions::default()).unwrap())
    }

    fn where_clause(method: &str, args: Vec<Value>) -> String {
        let f = fields();
        let spec = specification::<ent::Entity>(tree(method), args, '\\').unwrap();
        let cond = spec
            .to_predicate(&Root::new(&f), &mut SelectQuery::default(), &CriteriaBuilder)
            .unwrap();
        let mut select = ent::Entity::find();
        if let Some(cond) = cond {
            select = select.filter(cond);
        }
        let sql = select.build(DbBackend::Sqlite).to_string();
        sql.split_once(" WHERE ").map(|(_, w)| w.to_owned()).unwrap_or_default()
    }

    #[test]
    fn parts_consume_arguments_in_order() {
        let w = where_clause(
            "findByLastnameAndAgeBetween",
            vec![Value::from("Doe"), Value::from(18), Value::from(30)],
        );
        assert_eq!(
            w,
            r#""users"."lastname" = 'Doe' AND "users"."age" BETWEEN 18 AND 30"#
        );
    }

    #[test]
    fn null_argument_becomes_is_null() {
        let w = where_clause("findByNickname", vec![Value::Null]);
        assert_eq!(w, r#""users"."nickname" IS NULL"#);
        let w = where_clause("findByNicknameNot", vec![Value::Null]);
        assert_eq!(w, r#""users"."nickname" IS NOT NULL"#);
    }

    #[test]
    fn containing_escapes_wildcards() {
        let w = where_clause("findByLastnameContaining", vec![Value::from("50%")]);
        assert!(w.contains("LIKE '%50"), "{w}");
        assert!(w.contains("ESCAPE"), "{w}");
    }

    #[test]
    fn or_groups_and_boolean_operators() {
        let w = where_clause("findByActiveTrueOrAgeLessThan", vec![Value::from(10)]);
        assert!(w.starts_with(r#""users"."active" = "#), "{w}");
        assert!(w.ends_with(r#" OR "users"."age" < 10"#), "{w}");
    }

    #[test]
    fn ignore_case_folds_both_sides() {
        let w = where_clause("findByLastnameIgnoreCase", vec![Value::from("doe")]);
        assert_eq!(w, r#"UPPER("users"."lastname") = 'DOE'"#);
    }

    #[test]
    fn subject_only_methods_are_unrestricted() {
        assert_eq!(where_clause("findAll", Vec::new()), "");
    }

    #[test]
    fn relation_paths_and_collection_checks_are_rejected() {
        let f = fields();
        assert!(matches!(
            validate(&tree("findByManagerLastname"), &f),
            Err(RepoError::UnsupportedPath(p)) if p == "manager.lastname"
        ));
        assert!(matches!(
            validate(&tree("findByTagsIsEmpty"), &f),
            Err(RepoError::UnsupportedOperator(_))
        ));
        assert!(validate(&tree("findByAgeOrderByLastnameDesc"), &f).is_ok());
    }

    #[test]
    fn argument_count_is_checked() {
        let err = specification::<ent::Entity>(tree("findByLastname"), Vec::new(), '\\')
            .err()
            .unwrap();
        assert!(matches!(err, RepoError::InvalidArgument(_)));
    }
}

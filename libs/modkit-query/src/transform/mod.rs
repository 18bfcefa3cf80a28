//! Query rewriting: sort injection, DTO constructor expressions, keyset
//! predicates and count queries.
//!
//! The rewrite is one recursive traversal over the parsed query. Each call
//! receives an immutable [`Ctx`] describing what to inject at this level and
//! a mutable [`AliasRegistry`] collecting variables of the outermost query.
//! Subqueries are visited with an incremented depth and an empty context, so
//! their ordering, paging and variables are left alone.

mod dto;
mod order;

use tracing::debug;

pub use order::AliasRegistry;

use crate::jpql::ast::{
    Expr, FromRoot, FromSource, JoinTarget, OrderedQuery, QueryBody, QueryExpression, SelectClause,
    SelectItem, SelectQuery, Statement, Term,
};
use crate::jpql::{parse, parse_select};
use crate::metamodel::Metamodel;
use crate::returned_type::ReturnedType;
use crate::sort::Sort;
use crate::token::QueryTokenStream;
use crate::Error;

static UNSORTED: Sort = Sort(Vec::new());

/// What to inject into the outermost query.
#[derive(Clone, Copy, Debug, Default)]
pub struct Rewrite<'a> {
    pub sort: Option<&'a Sort>,
    pub returned: Option<&'a ReturnedType>,
    /// Predicate text ANDed into the `where` clause.
    pub keyset: Option<&'a str>,
}

#[derive(Clone, Copy)]
struct Ctx<'a> {
    depth: usize,
    sort: &'a Sort,
    returned: Option<&'a ReturnedType>,
    keyset: Option<&'a str>,
    model: Option<&'a Metamodel>,
}

impl Ctx<'_> {
    fn nested(self) -> Self {
        Self {
            depth: self.depth + 1,
            sort: &UNSORTED,
            returned: None,
            keyset: None,
            model: self.model,
        }
    }

    fn unsorted(self) -> Self {
        Self {
            sort: &UNSORTED,
            ..self
        }
    }

    fn is_outermost(&self) -> bool {
        self.depth == 0
    }
}

/// Rewrites query text for a method invocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryTransformer<'a> {
    model: Option<&'a Metamodel>,
}

impl<'a> QueryTransformer<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self { model: None }
    }

    /// Use the metamodel to check DTO constructor compatibility.
    #[must_use]
    pub fn with_metamodel(model: &'a Metamodel) -> Self {
        Self { model: Some(model) }
    }

    /// Parse and rewrite `query`.
    ///
    /// Modifying statements are returned unchanged.
    ///
    /// # Errors
    /// Returns `Error::QuerySyntax` for malformed text,
    /// `Error::InvalidSortProperty` for unsafe sort keys and
    /// `Error::InvalidArgument` for keyset predicates on set operations.
    pub fn rewrite(&self, query: &str, rewrite: Rewrite<'_>) -> Result<String, Error> {
        match parse(query)? {
            Statement::Modifying(text) => Ok(text),
            Statement::Select(q) => self.rewrite_parsed(&q, rewrite),
        }
    }

    /// Rewrite an already parsed query.
    ///
    /// # Errors
    /// Same as [`QueryTransformer::rewrite`].
    pub fn rewrite_parsed(&self, query: &QueryExpression, rewrite: Rewrite<'_>) -> Result<String, Error> {
        if rewrite.keyset.is_some() && query.is_set_operation() {
            return Err(Error::InvalidArgument(
                "keyset scrolling is not supported for set operation queries".to_owned(),
            ));
        }
        let ctx = Ctx {
            depth: 0,
            sort: rewrite.sort.unwrap_or(&UNSORTED),
            returned: rewrite.returned,
            keyset: rewrite.keyset,
            model: self.model,
        };
        let mut aliases = AliasRegistry::default();
        let rendered = query_expression(query, ctx, &mut aliases)?.render();
        debug!(query = %rendered, "rewrote query");
        Ok(rendered)
    }

    /// Variables and projection aliases of the outermost query.
    ///
    /// # Errors
    /// Returns `Error::QuerySyntax` for malformed text.
    pub fn aliases(&self, query: &str) -> Result<AliasRegistry, Error> {
        let parsed = parse_select(query)?;
        let ctx = Ctx {
            depth: 0,
            sort: &UNSORTED,
            returned: None,
            keyset: None,
            model: self.model,
        };
        let mut aliases = AliasRegistry::default();
        let _stream = query_expression(&parsed, ctx, &mut aliases)?;
        Ok(aliases)
    }
}

/// Render a parsed query without changes.
#[must_use]
pub fn render(query: &QueryExpression) -> String {
    let ctx = Ctx {
        depth: 0,
        sort: &UNSORTED,
        returned: None,
        keyset: None,
        model: None,
    };
    // An unsorted rewrite never produces sort errors.
    query_expression(query, ctx, &mut AliasRegistry::default())
        .map(|s| s.render())
        .unwrap_or_default()
}

/// Derive the count query for a select query: the selection becomes
/// `count(...)`, ordering and paging are dropped, fetch joins become plain
/// joins.
///
/// # Errors
/// Returns `Error::CountQueryUnsupported` for set operations and
/// `Error::QuerySyntax` for malformed text.
pub fn count_query(query: &str) -> Result<String, Error> {
    let parsed = parse_select(query)?;
    if parsed.is_set_operation() {
        return Err(Error::CountQueryUnsupported(query.to_owned()));
    }
    let Some(primary) = parsed.primary() else {
        return Err(Error::CountQueryUnsupported(query.to_owned()));
    };
    let mut counted = primary.clone();

    let distinct = counted.select.as_ref().is_some_and(|s| s.distinct);
    let single_path = counted
        .select
        .as_ref()
        .and_then(|s| match s.items.as_slice() {
            [item] if !item.expr.is_constructor() => item.expr.as_path().map(str::to_owned),
            _ => None,
        });
    let target = single_path
        .or_else(|| counted.primary_alias().map(str::to_owned))
        .unwrap_or_else(|| "*".to_owned());
    let target = if distinct { format!("distinct {target}") } else { target };

    for root in &mut counted.from {
        for join in &mut root.joins {
            join.kind = join.kind.replace(" fetch", "");
        }
    }
    counted.select = Some(SelectClause {
        distinct: false,
        items: vec![SelectItem {
            expr: Expr::text(format!("count({target})")),
            alias: None,
        }],
    });

    let ctx = Ctx {
        depth: 0,
        sort: &UNSORTED,
        returned: None,
        keyset: None,
        model: None,
    };
    Ok(select_query(&counted, ctx, &mut AliasRegistry::default())?.render())
}

/// Alias of the first root of the outermost query.
#[must_use]
pub fn detect_alias(query: &str) -> Option<String> {
    let parsed = parse_select(query).ok()?;
    parsed.primary()?.primary_alias().map(str::to_owned)
}

/// Render an expression, descending into subqueries unchanged.
pub(crate) fn plain_expr(e: &Expr) -> String {
    let ctx = Ctx {
        depth: 1,
        sort: &UNSORTED,
        returned: None,
        keyset: None,
        model: None,
    };
    expr(e, ctx, &mut AliasRegistry::default())
        .map(|s| s.render())
        .unwrap_or_default()
}

fn query_expression(
    q: &QueryExpression,
    ctx: Ctx<'_>,
    acc: &mut AliasRegistry,
) -> Result<QueryTokenStream, Error> {
    let mut out = QueryTokenStream::new();
    let last = q.branches.len().saturating_sub(1);
    for (i, branch) in q.branches.iter().enumerate() {
        // Only the final branch orders the combined result.
        let branch_ctx = if i == last { ctx } else { ctx.unsorted() };
        out.append_stream(ordered_query(branch, branch_ctx, acc)?);
        if let Some(op) = q.operators.get(i) {
            out.append_text(op.keyword());
        }
    }
    Ok(out)
}

fn ordered_query(
    q: &OrderedQuery,
    ctx: Ctx<'_>,
    acc: &mut AliasRegistry,
) -> Result<QueryTokenStream, Error> {
    let mut out = QueryTokenStream::new();
    match &q.body {
        QueryBody::Select(s) => {
            out.append_stream(select_query(s, ctx, acc)?);
        }
        QueryBody::Nested(inner) => {
            let mut nested = QueryTokenStream::new();
            nested.append_inline_text("(");
            nested.append_inline(query_expression(inner, ctx.unsorted(), acc)?);
            nested.append_inline_text(")");
            out.append_stream(nested);
        }
    }

    let mut items = Vec::with_capacity(q.order_by.len() + ctx.sort.0.len());
    for existing in &q.order_by {
        items.push(expr(existing, ctx, acc)?);
    }
    if ctx.is_outermost() {
        for order in ctx.sort.iter() {
            items.push(acc.order_item(order)?);
        }
    }
    if !items.is_empty() {
        out.append_text("order by");
        out.append_stream(QueryTokenStream::comma_separated(items));
    }
    if let Some(paging) = &q.paging {
        out.append_stream(expr(paging, ctx, acc)?);
    }
    Ok(out)
}

fn select_query(
    s: &SelectQuery,
    ctx: Ctx<'_>,
    acc: &mut AliasRegistry,
) -> Result<QueryTokenStream, Error> {
    // Variables must be known before the selection and ordering are built.
    let mut from = QueryTokenStream::new();
    from.append_text("from");
    let mut roots = Vec::with_capacity(s.from.len());
    for root in &s.from {
        roots.push(from_root(root, ctx, acc)?);
    }
    from.append_stream(QueryTokenStream::comma_separated(roots));
    if ctx.is_outermost() {
        acc.primary = s.primary_alias().map(str::to_owned);
    }

    let mut out = QueryTokenStream::new();
    let rewritten = match ctx.returned {
        Some(returned) if ctx.is_outermost() => dto::constructor_selection(s, returned, ctx.model),
        _ => None,
    };
    match (rewritten, &s.select) {
        (Some(constructor), select) => {
            out.append_text("select");
            if select.as_ref().is_some_and(|c| c.distinct) {
                out.append_text("distinct");
            }
            out.append_stream(constructor);
        }
        (None, Some(select)) => {
            out.append_text("select");
            if select.distinct {
                out.append_text("distinct");
            }
            let mut items = Vec::with_capacity(select.items.len());
            for item in &select.items {
                let mut rendered = expr(&item.expr, ctx, acc)?;
                if let Some(alias) = &item.alias {
                    rendered.append_text("as");
                    rendered.append_text(alias.clone());
                    if ctx.is_outermost() {
                        acc.register_projection(alias);
                    }
                }
                items.push(rendered);
            }
            out.append_stream(QueryTokenStream::comma_separated(items));
        }
        (None, None) => {}
    }
    out.append_stream(from);

    let keyset = ctx.keyset.filter(|_| ctx.is_outermost());
    match (&s.where_clause, keyset) {
        (Some(w), Some(k)) => {
            out.append_text("where");
            out.append_stream(parenthesized(expr(w, ctx, acc)?));
            out.append_text("and");
            out.append_stream(parenthesized(QueryTokenStream::of([k])));
        }
        (Some(w), None) => {
            out.append_text("where");
            out.append_stream(expr(w, ctx, acc)?);
        }
        (None, Some(k)) => {
            out.append_text("where");
            out.append_text(k);
        }
        (None, None) => {}
    }

    if !s.group_by.is_empty() {
        let mut groups = Vec::with_capacity(s.group_by.len());
        for g in &s.group_by {
            groups.push(expr(g, ctx, acc)?);
        }
        out.append_text("group by");
        out.append_stream(QueryTokenStream::comma_separated(groups));
    }
    if let Some(h) = &s.having {
        out.append_text("having");
        out.append_stream(expr(h, ctx, acc)?);
    }
    Ok(out)
}

fn from_root(
    root: &FromRoot,
    ctx: Ctx<'_>,
    acc: &mut AliasRegistry,
) -> Result<QueryTokenStream, Error> {
    let mut out = QueryTokenStream::new();
    match &root.source {
        FromSource::Entity(name) => {
            out.append_text(name.clone());
        }
        FromSource::Subquery(inner) => {
            out.append_stream(parenthesized(query_expression(inner, ctx.nested(), acc)?));
        }
    }
    if let Some(alias) = &root.alias {
        out.append_text(alias.clone());
        if ctx.is_outermost() {
            acc.register_variable(alias);
        }
    }
    for join in &root.joins {
        out.append_text(join.kind.clone());
        match &join.target {
            JoinTarget::Path(path) => {
                out.append_text(path.clone());
            }
            JoinTarget::Subquery(inner) => {
                out.append_stream(parenthesized(query_expression(inner, ctx.nested(), acc)?));
            }
            JoinTarget::Function(call) => {
                out.append_stream(expr(call, ctx, acc)?);
            }
        }
        if let Some(alias) = &join.alias {
            out.append_text(alias.clone());
            if ctx.is_outermost() {
                acc.register_variable(alias);
            }
        }
        if let Some((keyword, condition)) = &join.condition {
            out.append_text(keyword.clone());
            out.append_stream(expr(condition, ctx, acc)?);
        }
    }
    Ok(out)
}

fn parenthesized(inner: QueryTokenStream) -> QueryTokenStream {
    let mut out = QueryTokenStream::new();
    out.append_inline_text("(");
    out.append_inline(inner);
    out.append_inline_text(")");
    out
}

fn expr(e: &Expr, ctx: Ctx<'_>, acc: &mut AliasRegistry) -> Result<QueryTokenStream, Error> {
    let mut out = QueryTokenStream::new();
    for term in &e.terms {
        match term {
            Term::Text(text) => {
                out.append_inline_text(text.clone());
            }
            Term::Subquery(inner) => {
                out.append_inline(query_expression(inner, ctx.nested(), acc)?);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::metamodel::EntityType;
    use crate::returned_type::{ProjectionType, TypeRegistry};
    use crate::sort::Order;
    use crate::FieldKind;

    fn sorted(query: &str, sort: &Sort) -> String {
        QueryTransformer::new()
            .rewrite(
                query,
                Rewrite {
                    sort: Some(sort),
                    ..Rewrite::default()
                },
            )
            .unwrap()
    }

    fn user_dto() -> ReturnedType {
        let model = Metamodel::new().with(
            EntityType::new("User")
                .id("id", FieldKind::I64)
                .basic("firstname", FieldKind::String)
                .basic("lastname", FieldKind::String),
        );
        let registry = TypeRegistry::new().with(ProjectionType::dto(
            "UserDto",
            [
                ("firstname", Some(FieldKind::String)),
                ("lastname", Some(FieldKind::String)),
            ],
        ));
        ReturnedType::of("UserDto", "User", &model, &registry).unwrap()
    }

    fn dto(query: &str) -> String {
        QueryTransformer::new()
            .rewrite(
                query,
                Rewrite {
                    returned: Some(&user_dto()),
                    ..Rewrite::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn sort_is_added_once() {
        let out = sorted("select u from User u", &Sort::by([Order::asc("lastname")]));
        assert_eq!(out, "select u from User u order by u.lastname asc");
        let reparsed = parse_select(&out).unwrap();
        assert_eq!(reparsed.branches[0].order_by.len(), 1);
    }

    #[test]
    fn existing_order_is_kept_first() {
        let out = sorted(
            "select u from User u order by u.age desc",
            &Sort::by([Order::asc("lastname")]),
        );
        assert_eq!(out, "select u from User u order by u.age desc, u.lastname asc");
    }

    #[test]
    fn union_sort_goes_to_last_branch_only() {
        let out = sorted(
            "select a.x from A a union select b.x from B b order by x",
            &Sort::by([Order::asc("y")]),
        );
        assert_eq!(out, "select a.x from A a union select b.x from B b order by x, b.y asc");
    }

    #[test]
    fn subquery_is_left_untouched() {
        let out = sorted(
            "select u from User u where u.id in (select r.user from Role r order by r.id limit 1)",
            &Sort::by([Order::asc("r.name")]),
        );
        assert_eq!(
            out,
            "select u from User u where u.id in (select r.user from Role r order by r.id limit 1) \
             order by u.r.name asc"
        );
    }

    #[test]
    fn join_aliases_qualify_sort_keys() {
        let out = sorted(
            "select u from User u left join u.roles r",
            &Sort::by([Order::desc("r.name")]),
        );
        assert_eq!(out, "select u from User u left join u.roles r order by r.name desc");
    }

    #[test]
    fn no_alias_falls_back_to_bare_property() {
        let out = sorted("from User", &Sort::by([Order::asc("lastname")]));
        assert_eq!(out, "from User order by lastname asc");
    }

    #[test]
    fn dto_rewrite_expands_root_alias() {
        let out = dto("SELECT u FROM User u WHERE u.lastname = :lastname");
        assert_eq!(
            out,
            "select new UserDto(u.firstname, u.lastname) from User u where u.lastname = :lastname"
        );
    }

    #[test]
    fn dto_rewrite_wraps_matching_selection() {
        let out = dto("select u.firstname, u.lastname from User u");
        assert_eq!(out, "select new UserDto(u.firstname, u.lastname) from User u");
    }

    #[test]
    fn dto_rewrite_skips_aliased_and_constructor_selections() {
        let aliased = "select u.firstname as f, u.lastname as l from User u";
        assert_eq!(dto(aliased), aliased);
        let ctor = "select new com.acme.Other(u.firstname) from User u";
        assert_eq!(dto(ctor), ctor);
        let mismatched = "select u.firstname from User u";
        assert_eq!(dto(mismatched), mismatched);
    }

    #[test]
    fn keyset_is_anded_into_where() {
        let out = QueryTransformer::new()
            .rewrite(
                "select u from User u where u.active = true or u.admin = true",
                Rewrite {
                    keyset: Some("u.id > :keyset_0"),
                    ..Rewrite::default()
                },
            )
            .unwrap();
        assert_eq!(
            out,
            "select u from User u where (u.active = true or u.admin = true) and (u.id > :keyset_0)"
        );
    }

    #[test]
    fn unsafe_sort_is_rejected() {
        let err = QueryTransformer::new()
            .rewrite(
                "select u from User u",
                Rewrite {
                    sort: Some(&Sort::by([Order::asc("(select 1)")])),
                    ..Rewrite::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSortProperty(_)));
    }

    #[test]
    fn projection_alias_sorts_as_is() {
        let out = sorted(
            "select u.lastname as name, count(u) as total from User u group by u.lastname",
            &Sort::by([Order::desc("total")]),
        );
        assert!(out.ends_with("group by u.lastname order by total desc"));
    }

    #[test]
    fn aliases_list_outermost_variables_and_projections() {
        let aliases = QueryTransformer::new()
            .aliases(
                "select u.lastname as name from User u left join u.roles r \
                 where u.id in (select v.id from User v)",
            )
            .unwrap();
        assert_eq!(aliases.variables, vec!["u".to_owned(), "r".to_owned()]);
        assert_eq!(aliases.projections, vec!["name".to_owned()]);
        assert_eq!(aliases.primary.as_deref(), Some("u"));
        assert!(QueryTransformer::new().aliases("select u from").is_err());
    }

    #[test]
    fn count_query_replaces_selection_and_drops_order() {
        assert_eq!(
            count_query("select u from User u left join fetch u.roles r where u.age > ?1 order by u.id")
                .unwrap(),
            "select count(u) from User u left join u.roles r where u.age > ?1"
        );
        assert_eq!(
            count_query("select distinct u.lastname from User u").unwrap(),
            "select count(distinct u.lastname) from User u"
        );
        assert!(matches!(
            count_query("select a from A a union select b from B b"),
            Err(Error::CountQueryUnsupported(_))
        ));
    }

    #[test]
    fn modifying_queries_pass_through() {
        let q = "delete from User u where u.id = ?1";
        assert_eq!(sorted(q, &Sort::unsorted()), q);
    }
}

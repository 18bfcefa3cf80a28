//! Syntax tree for JPQL-like query text.
//!
//! Clause structure is explicit; expressions keep their source text verbatim
//! and only break out nested subqueries so that rewriting can descend into
//! them with the right nesting depth.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    Select(QueryExpression),
    /// `update` / `delete` statements pass through untouched.
    Modifying(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    UnionAll,
    Intersect,
    IntersectAll,
    Except,
    ExceptAll,
}

impl SetOperator {
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            SetOperator::Union => "union",
            SetOperator::UnionAll => "union all",
            SetOperator::Intersect => "intersect",
            SetOperator::IntersectAll => "intersect all",
            SetOperator::Except => "except",
            SetOperator::ExceptAll => "except all",
        }
    }
}

/// One or more ordered queries joined by set operators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryExpression {
    pub branches: Vec<OrderedQuery>,
    /// `operators[i]` joins `branches[i]` and `branches[i + 1]`.
    pub operators: Vec<SetOperator>,
}

impl QueryExpression {
    #[must_use]
    pub fn is_set_operation(&self) -> bool {
        self.branches.len() > 1
    }

    /// First plain select reached by following the leftmost branches.
    #[must_use]
    pub fn primary(&self) -> Option<&SelectQuery> {
        match &self.branches.first()?.body {
            QueryBody::Select(q) => Some(q),
            QueryBody::Nested(inner) => inner.primary(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderedQuery {
    pub body: QueryBody,
    pub order_by: Vec<Expr>,
    /// Verbatim `limit` / `offset` / `fetch` clauses.
    pub paging: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryBody {
    Select(Box<SelectQuery>),
    /// Parenthesized query expression.
    Nested(Box<QueryExpression>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectQuery {
    /// `None` for `from`-first queries such as `from User u`.
    pub select: Option<SelectClause>,
    pub from: Vec<FromRoot>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
}

impl SelectQuery {
    /// Alias of the first root, if declared.
    #[must_use]
    pub fn primary_alias(&self) -> Option<&str> {
        self.from.first().and_then(|r| r.alias.as_deref())
    }

    #[must_use]
    pub fn has_constructor_expression(&self) -> bool {
        self.select
            .as_ref()
            .is_some_and(|s| s.items.iter().any(|i| i.expr.is_constructor()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectClause {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FromSource {
    Entity(String),
    Subquery(Box<QueryExpression>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FromRoot {
    pub source: FromSource,
    pub alias: Option<String>,
    pub joins: Vec<Join>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinTarget {
    Path(String),
    Subquery(Box<QueryExpression>),
    Function(Expr),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Join {
    /// Lowercased join keywords, e.g. `left join fetch`.
    pub kind: String,
    pub target: JoinTarget,
    pub alias: Option<String>,
    /// `on` / `with` keyword and condition.
    pub condition: Option<(String, Expr)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
    /// Source text, kept verbatim.
    Text(String),
    Subquery(Box<QueryExpression>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expr {
    pub terms: Vec<Term>,
}

impl Expr {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            terms: vec![Term::Text(s.into())],
        }
    }

    /// Source text when the expression contains no subquery.
    #[must_use]
    pub fn as_plain(&self) -> Option<&str> {
        match self.terms.as_slice() {
            [Term::Text(s)] => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.as_plain().is_some_and(|s| {
            s.get(..4).is_some_and(|head| head.eq_ignore_ascii_case("new "))
        })
    }

    /// Class name of a `new X(...)` expression.
    #[must_use]
    pub fn constructor_class(&self) -> Option<&str> {
        if !self.is_constructor() {
            return None;
        }
        let rest = self.as_plain()?.get(4..)?.trim_start();
        let end = rest.find('(').unwrap_or(rest.len());
        Some(rest[..end].trim())
    }

    /// The expression is a single identifier or dotted path.
    #[must_use]
    pub fn as_path(&self) -> Option<&str> {
        let s = self.as_plain()?;
        let is_path = !s.is_empty()
            && s.split('.').all(|seg| {
                !seg.is_empty()
                    && seg
                        .chars()
                        .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
            });
        is_path.then_some(s)
    }
}

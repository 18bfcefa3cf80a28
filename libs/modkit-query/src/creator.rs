//! Query text for derived methods.
//!
//! [`QueryCreator`] renders a [`PartTree`] into query text with positional
//! placeholders. Each placeholder is described by a [`ParameterBinding`]
//! naming the method argument it reads and how the argument is prepared
//! before binding.

use tracing::debug;

use crate::metamodel::Metamodel;
use crate::options::QueryOptions;
use crate::part_tree::{Action, Operator, Part, PartTree, PropertyPath};
use crate::returned_type::ReturnedType;
use crate::sort::Sort;
use crate::token::QueryTokenStream;
use crate::transform::AliasRegistry;
use crate::{Error, Value};

/// Column alias of the similarity score selected by vector searches.
pub const SCORE_ALIAS: &str = "score";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LikeKind {
    Contains,
    StartsWith,
    EndsWith,
}

impl LikeKind {
    fn wrap(self, s: &str) -> String {
        match self {
            LikeKind::Contains => format!("%{s}%"),
            LikeKind::StartsWith => format!("{s}%"),
            LikeKind::EndsWith => format!("%{s}"),
        }
    }
}

/// Preparation applied to an argument before it is bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingTransform {
    Identity,
    /// Upper-case strings, element-wise for lists.
    Upper,
    /// Wrap in `%` wildcards, escaping wildcards in the value when `escape`
    /// is set.
    Like {
        kind: LikeKind,
        escape: Option<char>,
    },
    /// Lower bound of a range argument.
    RangeLower,
    /// Upper bound of a range argument.
    RangeUpper,
}

impl BindingTransform {
    /// # Errors
    /// Returns `Error::InvalidArgument` when the value has the wrong shape,
    /// e.g. a like pattern from a number or range bounds from a scalar.
    pub fn apply(&self, value: &Value) -> Result<Value, Error> {
        match self {
            BindingTransform::Identity => Ok(value.clone()),
            BindingTransform::Upper => Ok(upper(value)),
            BindingTransform::Like { kind, escape } => match value {
                Value::Null => Ok(Value::Null),
                Value::String(s) => {
                    let escaped = match escape {
                        Some(c) => escape_like(s, *c),
                        None => s.clone(),
                    };
                    Ok(Value::String(kind.wrap(&escaped)))
                }
                other => Err(Error::InvalidArgument(format!(
                    "like pattern requires a string argument, got {other}"
                ))),
            },
            BindingTransform::RangeLower | BindingTransform::RangeUpper => match value {
                Value::Range(lo, hi) => Ok(if *self == BindingTransform::RangeLower {
                    (**lo).clone()
                } else {
                    (**hi).clone()
                }),
                other => Err(Error::InvalidArgument(format!(
                    "range bound requires a range argument, got {other}"
                ))),
            },
        }
    }
}

fn upper(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_uppercase()),
        Value::List(items) => Value::List(items.iter().map(upper).collect()),
        other => other.clone(),
    }
}

/// Prefix `%`, `_` and the escape character itself with `escape`.
#[must_use]
pub fn escape_like(s: &str, escape: char) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '%' || c == '_' || c == escape {
            out.push(escape);
        }
        out.push(c);
    }
    out
}

/// Maps one query placeholder onto a method argument.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParameterBinding {
    /// Placeholder as it appears in the query text, e.g. `?1` or `:name`.
    pub placeholder: String,
    /// Zero-based index of the method argument.
    pub argument: usize,
    pub transform: BindingTransform,
}

impl ParameterBinding {
    #[must_use]
    pub fn new(placeholder: impl Into<String>, argument: usize, transform: BindingTransform) -> Self {
        Self {
            placeholder: placeholder.into(),
            argument,
            transform,
        }
    }

    /// Prepared value for this placeholder.
    ///
    /// # Errors
    /// Returns `Error::UnboundParameter` if the argument is missing and
    /// propagates transform errors.
    pub fn prepare(&self, arguments: &[Value]) -> Result<Value, Error> {
        let raw = arguments
            .get(self.argument)
            .ok_or_else(|| Error::UnboundParameter(self.placeholder.clone()))?;
        self.transform.apply(raw)
    }
}

/// Result of rendering a part tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedQuery {
    pub query: String,
    /// Count query sharing the placeholders of `query`; select queries only.
    pub count_query: Option<String>,
    pub bindings: Vec<ParameterBinding>,
    pub alias: String,
    pub max_results: Option<u64>,
}

/// Renders part trees into query text.
pub struct QueryCreator<'a> {
    tree: &'a PartTree,
    model: &'a Metamodel,
    returned: Option<&'a ReturnedType>,
    options: QueryOptions,
}

impl<'a> QueryCreator<'a> {
    #[must_use]
    pub fn new(tree: &'a PartTree, model: &'a Metamodel, options: QueryOptions) -> Self {
        Self {
            tree,
            model,
            returned: None,
            options,
        }
    }

    #[must_use]
    pub fn returning(mut self, returned: &'a ReturnedType) -> Self {
        self.returned = Some(returned);
        self
    }

    /// Render the query; `sort` is applied after the sort in the method name.
    ///
    /// # Errors
    /// Returns `Error::UnsupportedOperator` for operators without a
    /// relational rendering and `Error::InvalidSortProperty` for unsafe sort
    /// keys.
    pub fn create(&self, sort: &Sort) -> Result<CreatedQuery, Error> {
        self.create_ordered(&self.tree.sort.clone().and(sort.clone()))
    }

    /// Render the query ordered by `sort` alone, ignoring the sort in the
    /// method name. Keyset scrolling passes its complete effective sort here.
    ///
    /// # Errors
    /// Same as [`QueryCreator::create`].
    pub fn create_ordered(&self, sort: &Sort) -> Result<CreatedQuery, Error> {
        let alias = alias_for(&self.tree.domain);
        let mut state = State::new(&alias);

        let mut where_clause = QueryTokenStream::new();
        let multiple = self.tree.ors.len() > 1;
        for (i, or) in self.tree.ors.iter().enumerate() {
            if i > 0 {
                where_clause.append_text("or");
            }
            let mut branch = QueryTokenStream::new();
            for (j, part) in or.parts.iter().enumerate() {
                if j > 0 {
                    branch.append_text("and");
                }
                branch.append_text(self.predicate(part, &mut state)?);
            }
            if multiple {
                where_clause.append_expression(branch);
            } else {
                where_clause.append_stream(branch);
            }
        }

        let from = {
            let mut from = QueryTokenStream::of(["from", self.tree.domain.as_str(), alias.as_str()]);
            for (path, join_alias) in &state.joins {
                from.append_text(format!("left join {path} {join_alias}"));
            }
            from
        };

        let mut query = QueryTokenStream::new();
        query.append_stream(self.selection(&alias, &state));
        query.append_stream(from.clone());
        if !where_clause.is_empty() {
            query.append_text("where");
            query.append_stream(where_clause.clone());
        }

        if self.tree.action() == Action::Select || self.tree.action() == Action::Delete {
            let mut registry = AliasRegistry {
                primary: Some(alias.clone()),
                ..AliasRegistry::default()
            };
            registry.register_variable(&alias);
            for (_, join_alias) in &state.joins {
                registry.register_variable(join_alias);
            }
            let mut items = Vec::new();
            if state.score.is_some() {
                registry.register_projection(SCORE_ALIAS);
                items.push(QueryTokenStream::of([SCORE_ALIAS, "asc"]));
            }
            for order in sort.iter() {
                items.push(registry.order_item(order)?);
            }
            if !items.is_empty() {
                query.append_text("order by");
                query.append_stream(QueryTokenStream::comma_separated(items));
            }
        }

        let count_query = (self.tree.action() == Action::Select).then(|| {
            let target = if self.tree.is_distinct() {
                format!("count(distinct {alias})")
            } else {
                format!("count({alias})")
            };
            let mut count = QueryTokenStream::of(["select", target.as_str()]);
            count.append_stream(from);
            if !where_clause.is_empty() {
                count.append_text("where");
                count.append_stream(where_clause);
            }
            count.render()
        });

        let max_results = match self.tree.action() {
            Action::Exists => Some(1),
            _ => self.tree.max_results(),
        };
        let created = CreatedQuery {
            query: query.render(),
            count_query,
            bindings: state.bindings,
            alias,
            max_results,
        };
        debug!(domain = %self.tree.domain, query = %created.query, "created derived query");
        Ok(created)
    }

    fn selection(&self, alias: &str, state: &State) -> QueryTokenStream {
        let mut select = QueryTokenStream::of(["select"]);
        match self.tree.action() {
            Action::Count => {
                let target = if self.tree.is_distinct() {
                    format!("count(distinct {alias})")
                } else {
                    format!("count({alias})")
                };
                select.append_text(target);
                return select;
            }
            Action::Exists => {
                let id = self
                    .model
                    .id_attributes(&self.tree.domain)
                    .first()
                    .map_or_else(|| alias.to_owned(), |id| format!("{alias}.{id}"));
                select.append_text(id);
                return select;
            }
            Action::Select | Action::Delete => {}
        }
        if self.tree.is_distinct() {
            select.append_text("distinct");
        }
        let mut items = vec![match self.returned {
            Some(ReturnedType::Dto { name, params, .. }) => {
                let args: Vec<String> = params.iter().map(|p| format!("{alias}.{}", p.name)).collect();
                QueryTokenStream::of([format!("new {name}({})", args.join(", "))])
            }
            Some(ReturnedType::Interface { properties, .. }) => QueryTokenStream::comma_separated(
                properties
                    .iter()
                    .map(|p| QueryTokenStream::of([format!("{alias}.{p}"), "as".to_owned(), p.clone()])),
            ),
            _ => QueryTokenStream::of([alias]),
        }];
        if let Some(score) = &state.score {
            items.push(QueryTokenStream::of([score.as_str(), "as", SCORE_ALIAS]));
        }
        select.append_stream(QueryTokenStream::comma_separated(items));
        select
    }

    fn predicate(&self, part: &Part, state: &mut State) -> Result<String, Error> {
        let path = state.path_expression(&part.path);
        let fold = part.folds_case() && part.operator.is_textual();
        let lhs = if fold { format!("upper({path})") } else { path.clone() };
        let collection = part.path.is_collection();
        let escape = self.options.escape;

        let text = match part.operator {
            Operator::SimpleProperty | Operator::NegatingSimpleProperty if collection => {
                let p = state.bind(BindingTransform::Identity);
                let not = if part.operator == Operator::NegatingSimpleProperty { "not " } else { "" };
                format!("{p} {not}member of {path}")
            }
            Operator::SimpleProperty | Operator::NegatingSimpleProperty => {
                let p = state.bind(BindingTransform::Identity);
                let rhs = if fold { format!("upper({p})") } else { p };
                let op = if part.operator == Operator::SimpleProperty { "=" } else { "<>" };
                format!("{lhs} {op} {rhs}")
            }
            Operator::Between => {
                let lo = state.bind(BindingTransform::Identity);
                let hi = state.bind(BindingTransform::Identity);
                format!("{path} between {lo} and {hi}")
            }
            Operator::IsNull => format!("{path} is null"),
            Operator::IsNotNull => format!("{path} is not null"),
            Operator::LessThan | Operator::Before => {
                format!("{path} < {}", state.bind(BindingTransform::Identity))
            }
            Operator::LessThanEqual => format!("{path} <= {}", state.bind(BindingTransform::Identity)),
            Operator::GreaterThan | Operator::After => {
                format!("{path} > {}", state.bind(BindingTransform::Identity))
            }
            Operator::GreaterThanEqual => {
                format!("{path} >= {}", state.bind(BindingTransform::Identity))
            }
            Operator::Like | Operator::NotLike => {
                let p = state.bind(BindingTransform::Identity);
                let rhs = if fold { format!("upper({p})") } else { p };
                let not = if part.operator == Operator::NotLike { "not " } else { "" };
                format!("{lhs} {not}like {rhs}")
            }
            Operator::Containing | Operator::NotContaining if collection => {
                let p = state.bind(BindingTransform::Identity);
                let not = if part.operator == Operator::NotContaining { "not " } else { "" };
                format!("{p} {not}member of {path}")
            }
            Operator::StartingWith
            | Operator::EndingWith
            | Operator::Containing
            | Operator::NotContaining => {
                let kind = match part.operator {
                    Operator::StartingWith => LikeKind::StartsWith,
                    Operator::EndingWith => LikeKind::EndsWith,
                    _ => LikeKind::Contains,
                };
                let p = state.bind(BindingTransform::Like {
                    kind,
                    escape: Some(escape),
                });
                let rhs = if fold { format!("upper({p})") } else { p };
                let not = if part.operator == Operator::NotContaining { "not " } else { "" };
                format!("{lhs} {not}like {rhs} escape '{escape}'")
            }
            Operator::IsEmpty => format!("{path} is empty"),
            Operator::IsNotEmpty => format!("{path} is not empty"),
            Operator::In | Operator::NotIn => {
                let transform = if fold {
                    BindingTransform::Upper
                } else {
                    BindingTransform::Identity
                };
                let p = state.bind(transform);
                let not = if part.operator == Operator::NotIn { "not " } else { "" };
                format!("{lhs} {not}in {p}")
            }
            Operator::True => format!("{path} = true"),
            Operator::False => format!("{path} = false"),
            Operator::Near => {
                let distance = self.distance(&path, state);
                let threshold = state.bind(BindingTransform::Identity);
                format!("{distance} <= {threshold}")
            }
            Operator::Within => {
                let distance = self.distance(&path, state);
                let range_arg = state.argument;
                state.argument += 1;
                let lo = state.bind_to(range_arg, BindingTransform::RangeLower);
                let hi = state.bind_to(range_arg, BindingTransform::RangeUpper);
                format!("{distance} between {lo} and {hi}")
            }
            Operator::Regex | Operator::Exists => {
                return Err(Error::UnsupportedOperator {
                    operator: part.operator.to_string(),
                });
            }
        };
        Ok(text)
    }

    /// Distance expression for a vector part; the first one also becomes the
    /// selected score.
    fn distance(&self, path: &str, state: &mut State) -> String {
        let vector = state.bind(BindingTransform::Identity);
        let expr = format!("{}({path}, {vector})", self.options.scoring_function.function_name());
        state.score.get_or_insert_with(|| expr.clone());
        expr
    }
}

struct State {
    alias: String,
    /// Next method argument to consume.
    argument: usize,
    bindings: Vec<ParameterBinding>,
    /// `(path, alias)` in declaration order.
    joins: Vec<(String, String)>,
    score: Option<String>,
}

impl State {
    fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_owned(),
            argument: 0,
            bindings: Vec::new(),
            joins: Vec::new(),
            score: None,
        }
    }

    fn bind(&mut self, transform: BindingTransform) -> String {
        let argument = self.argument;
        self.argument += 1;
        self.bind_to(argument, transform)
    }

    fn bind_to(&mut self, argument: usize, transform: BindingTransform) -> String {
        let placeholder = format!("?{}", self.bindings.len() + 1);
        self.bindings
            .push(ParameterBinding::new(placeholder.clone(), argument, transform));
        placeholder
    }

    /// Expression for `path`, joining through associations and collections.
    fn path_expression(&mut self, path: &PropertyPath) -> String {
        let mut current = self.alias.clone();
        let last = path.segments.len().saturating_sub(1);
        for (i, seg) in path.segments.iter().enumerate() {
            let navigated = format!("{current}.{}", seg.name);
            current = if i < last && seg.kind.is_join() {
                self.join(navigated, &seg.name)
            } else {
                navigated
            };
        }
        current
    }

    fn join(&mut self, path: String, name: &str) -> String {
        if let Some((_, alias)) = self.joins.iter().find(|(p, _)| *p == path) {
            return alias.clone();
        }
        let mut alias = name.to_owned();
        let mut n = 1;
        while alias == self.alias || self.joins.iter().any(|(_, a)| *a == alias) {
            alias = format!("{name}{n}");
            n += 1;
        }
        self.joins.push((path, alias.clone()));
        alias
    }
}

/// Query variable for a domain type: its first letter, lower-cased.
fn alias_for(domain: &str) -> String {
    domain
        .chars()
        .next()
        .map_or_else(|| "e".to_owned(), |c| c.to_lowercase().collect())
}

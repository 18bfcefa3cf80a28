//! Query plans shared by the runtime and generated repositories.
//!
//! [`plan_method`] validates a repository method and turns it into a
//! [`QueryPlan`]. Plans are independent of invocation arguments;
//! [`QueryPlan::compile`] applies the dynamic sort and scroll position of one
//! call and yields a [`CompiledQuery`]. Generated repositories embed
//! [`PreparedQuery`] values produced by [`QueryPlan::ahead_of_time`] and go
//! through the same compile step.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use tracing::debug;

use crate::creator::{BindingTransform, LikeKind, ParameterBinding, QueryCreator};
use crate::hints::QueryHints;
use crate::jpql::ast::Statement;
use crate::jpql::{TokenKind, parse, parse_select, tokenize};
use crate::metamodel::Metamodel;
use crate::options::QueryOptions;
use crate::part_tree::{Action, PartTree};
use crate::returned_type::{ReturnedType, TypeRegistry};
use crate::scroll::{JpqlStrategy, KeysetScrollDelegate, ScrollPosition, create_sort};
use crate::sort::Sort;
use crate::transform::{QueryTransformer, Rewrite, count_query, detect_alias};
use crate::{Error, Value};

static TEMPLATE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"([:?])?([#$])\{([^}]*)\}"));

static LIKE_SHORTHAND: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"(?i)\blike\s+(%?)(:[A-Za-z_][A-Za-z0-9_]*|\?[0-9]+)(%?)")
});

fn regex(cell: &'static LazyLock<Result<Regex, regex::Error>>) -> Result<&'static Regex, Error> {
    cell.as_ref()
        .map_err(|e| Error::InvalidArgument(format!("invalid built-in pattern: {e}")))
}

/// Role of a declared method parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParameterRole {
    /// Bound into the query.
    Argument,
    Sort,
    Page,
    Scroll,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodParameter {
    pub name: String,
    pub role: ParameterRole,
}

/// Query text attached to a method instead of a derived name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeclaredQuery {
    pub text: String,
    /// Backend SQL rather than the managed query language.
    pub native: bool,
    pub count_query: Option<String>,
}

impl DeclaredQuery {
    pub fn jpql(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            native: false,
            count_query: None,
        }
    }

    pub fn native(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            native: true,
            count_query: None,
        }
    }

    #[must_use]
    pub fn with_count_query(mut self, count: impl Into<String>) -> Self {
        self.count_query = Some(count.into());
        self
    }

    /// Whether the text binds `:#{...}` or `?${...}` templates as
    /// parameters. A bare `#{#entityName}` is resolved while planning.
    #[must_use]
    pub fn has_template(&self) -> bool {
        has_template(&self.text) || self.count_query.as_deref().is_some_and(has_template)
    }
}

fn has_template(text: &str) -> bool {
    TEMPLATE
        .as_ref()
        .is_ok_and(|re| re.captures_iter(text).any(|c| c.get(1).is_some()))
}

/// Whether the outermost query of `text` carries its own `order by`.
fn has_order_by(text: &str) -> Result<bool, Error> {
    Ok(parse_select(text)?
        .branches
        .last()
        .is_some_and(|b| !b.order_by.is_empty()))
}

/// Everything known about a repository method before it is invoked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    /// Name of the element type the method returns.
    pub returns: String,
    pub parameters: Vec<MethodParameter>,
    pub query: Option<DeclaredQuery>,
    pub hints: QueryHints,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, returns: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            returns: returns.into(),
            parameters: Vec::new(),
            query: None,
            hints: QueryHints::default(),
        }
    }

    #[must_use]
    pub fn param(self, name: &str) -> Self {
        self.parameter(name, ParameterRole::Argument)
    }

    #[must_use]
    pub fn parameter(mut self, name: &str, role: ParameterRole) -> Self {
        self.parameters.push(MethodParameter {
            name: name.to_owned(),
            role,
        });
        self
    }

    #[must_use]
    pub fn query(mut self, query: DeclaredQuery) -> Self {
        self.query = Some(query);
        self
    }

    #[must_use]
    pub fn hints(mut self, hints: QueryHints) -> Self {
        self.hints = hints;
        self
    }

    /// Parameters bound into the query, in declaration order.
    pub fn arguments(&self) -> impl Iterator<Item = &MethodParameter> {
        self.parameters
            .iter()
            .filter(|p| p.role == ParameterRole::Argument)
    }

    fn argument_index(&self, name: &str) -> Option<usize> {
        self.arguments().position(|p| p.name == name)
    }
}

/// Static metadata of one repository.
#[derive(Clone, Debug)]
pub struct RepositoryInformation {
    pub domain: String,
    pub model: Metamodel,
    pub types: TypeRegistry,
    pub options: QueryOptions,
}

impl RepositoryInformation {
    pub fn new(domain: impl Into<String>, model: Metamodel) -> Self {
        Self {
            domain: domain.into(),
            model,
            types: TypeRegistry::default(),
            options: QueryOptions::default(),
        }
    }

    #[must_use]
    pub fn with_types(mut self, types: TypeRegistry) -> Self {
        self.types = types;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryOrigin {
    Declared,
    Derived,
}

/// Query text with its bindings, ready for sort and scroll application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedQuery {
    pub query: String,
    pub count_query: Option<String>,
    pub bindings: Vec<ParameterBinding>,
    pub native: bool,
    pub modifying: bool,
    pub max_results: Option<u64>,
    /// Ordering applied ahead of the invocation sort. Kept out of `query`
    /// so that keyset scrolling can fold it into the scroll keys.
    pub sort: Sort,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlannedQuery {
    Prepared(PreparedQuery),
    Derived(Arc<PartTree>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryPlan {
    pub method: String,
    pub domain: String,
    pub origin: QueryOrigin,
    pub returned: ReturnedType,
    pub query: PlannedQuery,
    pub hints: QueryHints,
}

/// Dynamic inputs of one invocation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Invocation {
    pub sort: Sort,
    pub position: Option<ScrollPosition>,
}

impl Invocation {
    #[must_use]
    pub fn sorted(sort: Sort) -> Self {
        Self {
            sort,
            position: None,
        }
    }

    #[must_use]
    pub fn scrolling(sort: Sort, position: ScrollPosition) -> Self {
        Self {
            sort,
            position: Some(position),
        }
    }
}

/// Query text and parameters for one invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    pub query: String,
    pub count_query: Option<String>,
    pub bindings: Vec<ParameterBinding>,
    /// Values bound by the keyset predicate, keyed by parameter name.
    pub keyset_parameters: Vec<(String, Value)>,
    /// Sort the query was compiled with, including keyset tie-breakers.
    pub sort: Sort,
    pub native: bool,
    pub modifying: bool,
    pub max_results: Option<u64>,
    pub hints: QueryHints,
}

impl CompiledQuery {
    /// Placeholder and prepared value for every parameter of the query.
    ///
    /// # Errors
    /// Returns `Error::UnboundParameter` if an argument is missing and
    /// propagates binding transform errors.
    pub fn parameters(&self, arguments: &[Value]) -> Result<Vec<(String, Value)>, Error> {
        let mut out = Vec::with_capacity(self.bindings.len() + self.keyset_parameters.len());
        for binding in &self.bindings {
            out.push((binding.placeholder.clone(), binding.prepare(arguments)?));
        }
        for (name, value) in &self.keyset_parameters {
            out.push((format!(":{name}"), value.clone()));
        }
        Ok(out)
    }
}

/// Validate `method` and build its plan.
///
/// # Errors
/// Returns the parse, path and parameter errors of derived names,
/// `Error::UnresolvableReturnType` for unknown result types and
/// `Error::UnsupportedTemplate` / `Error::UnboundParameter` for declared
/// queries that cannot be bound.
pub fn plan_method(
    repo: &RepositoryInformation,
    method: &MethodDescriptor,
) -> Result<QueryPlan, Error> {
    let returned = ReturnedType::of(&method.returns, &repo.domain, &repo.model, &repo.types)?;
    let (origin, query) = match &method.query {
        Some(declared) => (
            QueryOrigin::Declared,
            PlannedQuery::Prepared(prepare_declared(repo, method, declared)?),
        ),
        None => {
            let tree = PartTree::cached(&method.name, &repo.domain, &repo.model, &repo.options)?;
            let declared = method.arguments().count();
            if tree.parameter_count() != declared {
                return Err(Error::ParameterCountMismatch {
                    method: method.name.clone(),
                    declared,
                    expected: tree.parameter_count(),
                });
            }
            (QueryOrigin::Derived, PlannedQuery::Derived(tree))
        }
    };
    debug!(method = %method.name, domain = %repo.domain, ?origin, "planned repository method");
    Ok(QueryPlan {
        method: method.name.clone(),
        domain: repo.domain.clone(),
        origin,
        returned,
        query,
        hints: method.hints.clone(),
    })
}

fn prepare_declared(
    repo: &RepositoryInformation,
    method: &MethodDescriptor,
    declared: &DeclaredQuery,
) -> Result<PreparedQuery, Error> {
    let mut templates = Vec::new();
    let text = resolve_templates(&declared.text, &repo.domain, &mut templates)?;
    let (text, likes) = rewrite_like_shorthand(&text)?;

    let modifying = if declared.native {
        let head = text.trim_start().split_whitespace().next().unwrap_or_default();
        ["update", "delete", "insert"]
            .iter()
            .any(|k| head.eq_ignore_ascii_case(k))
    } else {
        matches!(parse(&text)?, Statement::Modifying(_))
    };

    let count = match &declared.count_query {
        Some(c) => Some(resolve_templates(c, &repo.domain, &mut templates)?),
        None if declared.native || modifying => None,
        None => match count_query(&text) {
            Ok(c) => Some(c),
            Err(Error::CountQueryUnsupported(_)) => None,
            Err(e) => return Err(e),
        },
    };

    let bindings = bind_placeholders(&text, method, &templates, &likes)?;
    Ok(PreparedQuery {
        query: text,
        count_query: count,
        bindings,
        native: declared.native,
        modifying,
        max_results: None,
        sort: Sort::unsorted(),
    })
}

/// Replace `#{#entityName}` with the domain name and argument templates with
/// synthetic named parameters recorded in `templates`.
fn resolve_templates(
    text: &str,
    domain: &str,
    templates: &mut Vec<(String, usize)>,
) -> Result<String, Error> {
    let re = regex(&TEMPLATE)?;
    let mut failure = None;
    let resolved = re.replace_all(text, |c: &Captures<'_>| {
        let whole = c.get(0).map_or("", |m| m.as_str());
        let prefix = c.get(1).map(|m| m.as_str());
        let sigil = c.get(2).map_or("", |m| m.as_str());
        let body = c.get(3).map_or("", |m| m.as_str()).trim();
        match (prefix, sigil, body) {
            (None, "#", "#entityName") => domain.to_owned(),
            (Some(_), "#", b) if b.starts_with('[') && b.ends_with(']') => {
                match b[1..b.len() - 1].trim().parse::<usize>() {
                    Ok(index) => {
                        let name = format!("__template{}", templates.len());
                        templates.push((name.clone(), index));
                        format!(":{name}")
                    }
                    Err(_) => {
                        failure.get_or_insert_with(|| whole.to_owned());
                        String::new()
                    }
                }
            }
            (Some(_), "#", b)
                if b.len() > 1
                    && b.starts_with('#')
                    && b[1..].chars().all(|ch| ch.is_alphanumeric() || ch == '_') =>
            {
                format!(":{}", &b[1..])
            }
            _ => {
                failure.get_or_insert_with(|| whole.to_owned());
                String::new()
            }
        }
    });
    match failure {
        Some(template) => Err(Error::UnsupportedTemplate(template)),
        None => Ok(resolved.into_owned()),
    }
}

/// Strip `%` wildcards around like parameters and remember them as binding
/// transforms.
fn rewrite_like_shorthand(text: &str) -> Result<(String, HashMap<String, LikeKind>), Error> {
    let re = regex(&LIKE_SHORTHAND)?;
    let mut likes: HashMap<String, LikeKind> = HashMap::new();
    let mut conflict = None;
    let rewritten = re.replace_all(text, |c: &Captures<'_>| {
        let leading = c.get(1).is_some_and(|m| !m.as_str().is_empty());
        let placeholder = c.get(2).map_or("", |m| m.as_str());
        let trailing = c.get(3).is_some_and(|m| !m.as_str().is_empty());
        let keyword = c.get(0).map_or("like", |m| &m.as_str()[..4]);
        let kind = match (leading, trailing) {
            (true, true) => Some(LikeKind::Contains),
            (true, false) => Some(LikeKind::EndsWith),
            (false, true) => Some(LikeKind::StartsWith),
            (false, false) => None,
        };
        if let Some(kind) = kind
            && let Some(previous) = likes.insert(placeholder.to_owned(), kind)
            && previous != kind
        {
            conflict.get_or_insert_with(|| placeholder.to_owned());
        }
        format!("{keyword} {placeholder}")
    });
    if let Some(placeholder) = conflict {
        return Err(Error::InvalidArgument(format!(
            "parameter {placeholder} is used with different like patterns"
        )));
    }
    Ok((rewritten.into_owned(), likes))
}

fn bind_placeholders(
    text: &str,
    method: &MethodDescriptor,
    templates: &[(String, usize)],
    likes: &HashMap<String, LikeKind>,
) -> Result<Vec<ParameterBinding>, Error> {
    let arity = method.arguments().count();
    let mut bindings: Vec<ParameterBinding> = Vec::new();
    let mut anonymous = 0;
    for token in tokenize(text)? {
        let placeholder = token.text(text);
        let argument = match token.kind {
            TokenKind::Named => {
                if bindings.iter().any(|b| b.placeholder == placeholder) {
                    continue;
                }
                let name = &placeholder[1..];
                templates
                    .iter()
                    .find(|(t, _)| t == name)
                    .map(|(_, index)| *index)
                    .or_else(|| method.argument_index(name))
            }
            TokenKind::Positional if placeholder == "?" => {
                anonymous += 1;
                Some(anonymous - 1)
            }
            TokenKind::Positional => {
                if bindings.iter().any(|b| b.placeholder == placeholder) {
                    continue;
                }
                placeholder[1..].parse::<usize>().ok().and_then(|n| n.checked_sub(1))
            }
            _ => continue,
        };
        let argument = argument
            .filter(|a| *a < arity)
            .ok_or_else(|| Error::UnboundParameter(placeholder.to_owned()))?;
        let transform = match likes.get(placeholder) {
            Some(kind) => BindingTransform::Like {
                kind: *kind,
                escape: None,
            },
            None => BindingTransform::Identity,
        };
        bindings.push(ParameterBinding::new(placeholder, argument, transform));
    }
    Ok(bindings)
}

impl QueryPlan {
    /// Replace a derived query by its rendered text so that it can be
    /// embedded in generated code.
    ///
    /// # Errors
    /// Propagates query creation errors.
    pub fn ahead_of_time(&self, repo: &RepositoryInformation) -> Result<QueryPlan, Error> {
        let PlannedQuery::Derived(tree) = &self.query else {
            return Ok(self.clone());
        };
        let created = self.creator(tree, repo).create_ordered(&Sort::unsorted())?;
        let sort = match tree.action() {
            Action::Select | Action::Delete => tree.sort.clone(),
            Action::Count | Action::Exists => Sort::unsorted(),
        };
        Ok(QueryPlan {
            query: PlannedQuery::Prepared(PreparedQuery {
                query: created.query,
                count_query: created.count_query,
                bindings: created.bindings,
                native: false,
                modifying: false,
                max_results: created.max_results,
                sort,
            }),
            ..self.clone()
        })
    }

    fn keyset_unsupported(&self, reason: &str) -> Error {
        Error::InvalidArgument(format!(
            "method `{}` {reason} and cannot scroll by keyset",
            self.method
        ))
    }

    fn creator<'a>(&'a self, tree: &'a PartTree, repo: &'a RepositoryInformation) -> QueryCreator<'a> {
        let creator = QueryCreator::new(tree, &repo.model, repo.options);
        if self.returned.is_projecting() {
            creator.returning(&self.returned)
        } else {
            creator
        }
    }

    /// Apply the sort and scroll position of one invocation.
    ///
    /// # Errors
    /// Returns `Error::InvalidArgument` for dynamic sorting or scrolling of
    /// native and modifying queries, and for keyset scrolling of queries
    /// that declare their own `order by` or order by vector score.
    /// Propagates creation and rewrite errors.
    pub fn compile(
        &self,
        repo: &RepositoryInformation,
        invocation: &Invocation,
    ) -> Result<CompiledQuery, Error> {
        let ids = repo.model.id_attributes(&self.domain);
        let scroll = match &invocation.position {
            Some(position @ ScrollPosition::Keyset { .. }) => Some(position),
            _ => None,
        };

        let (prepared, alias, sort, presorted) = match &self.query {
            PlannedQuery::Derived(tree) => {
                let creator = self.creator(tree, repo);
                let (created, sort) = match scroll {
                    Some(position) => {
                        if tree.is_vector_search() {
                            return Err(self.keyset_unsupported("orders by score"));
                        }
                        let requested = tree.sort.clone().and(invocation.sort.clone());
                        let sort = create_sort(position, &requested, &ids);
                        (creator.create_ordered(&sort)?, sort)
                    }
                    None => (
                        creator.create(&invocation.sort)?,
                        tree.sort.clone().and(invocation.sort.clone()),
                    ),
                };
                let alias = Some(created.alias.clone());
                let prepared = PreparedQuery {
                    query: created.query,
                    count_query: created.count_query,
                    bindings: created.bindings,
                    native: false,
                    modifying: false,
                    max_results: created.max_results,
                    sort: Sort::unsorted(),
                };
                (prepared, alias, sort, true)
            }
            PlannedQuery::Prepared(prepared) => {
                let base = prepared.sort.clone().and(invocation.sort.clone());
                let sort = match scroll {
                    Some(position) if !prepared.native && !prepared.modifying => {
                        if has_order_by(&prepared.query)? {
                            return Err(self.keyset_unsupported("already declares an order by"));
                        }
                        create_sort(position, &base, &ids)
                    }
                    _ => base,
                };
                (prepared.clone(), detect_alias(&prepared.query), sort, false)
            }
        };

        let keyset = match scroll {
            Some(position) => {
                let mut strategy = JpqlStrategy::new(alias.as_deref());
                KeysetScrollDelegate::of(position.direction())
                    .create_predicate(position, &sort, &mut strategy)?
                    .map(|predicate| (predicate, strategy.parameters))
            }
            _ => None,
        };

        if prepared.native || prepared.modifying {
            if !sort.is_unsorted() || keyset.is_some() {
                return Err(Error::InvalidArgument(format!(
                    "method `{}` does not support dynamic sorting or keyset scrolling",
                    self.method
                )));
            }
            return Ok(CompiledQuery {
                query: prepared.query,
                count_query: prepared.count_query,
                bindings: prepared.bindings,
                keyset_parameters: Vec::new(),
                sort,
                native: prepared.native,
                modifying: prepared.modifying,
                max_results: prepared.max_results,
                hints: self.hints.clone(),
            });
        }

        let rewrite_needed = !presorted && !sort.is_unsorted();
        let constructor = self.returned.needs_constructor_expression() && self.origin == QueryOrigin::Declared;
        let query = if rewrite_needed || constructor || keyset.is_some() {
            QueryTransformer::with_metamodel(&repo.model).rewrite(
                &prepared.query,
                Rewrite {
                    sort: (!presorted).then_some(&sort),
                    returned: constructor.then_some(&self.returned),
                    keyset: keyset.as_ref().map(|(p, _)| p.as_str()),
                },
            )?
        } else {
            prepared.query
        };

        Ok(CompiledQuery {
            query,
            count_query: prepared.count_query,
            bindings: prepared.bindings,
            keyset_parameters: keyset.map(|(_, params)| params).unwrap_or_default(),
            sort,
            native: false,
            modifying: false,
            max_results: prepared.max_results,
            hints: self.hints.clone(),
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::metamodel::EntityType;
    use crate::returned_type::ProjectionType;
    use crate::sort::Order;
    use crate::FieldKind;

    fn repo() -> RepositoryInformation {
        let model = Metamodel::new().with(
            EntityType::new("User")
                .id("id", FieldKind::I64)
                .basic("firstname", FieldKind::String)
                .basic("lastname", FieldKind::String)
                .basic("age", FieldKind::I64),
        );
        RepositoryInformation::new("User", model).with_types(TypeRegistry::new().with(
            ProjectionType::dto(
                "UserDto",
                [
                    ("firstname", Some(FieldKind::String)),
                    ("lastname", Some(FieldKind::String)),
                ],
            ),
        ))
    }

    #[test]
    fn derived_method_checks_parameter_count() {
        let err = plan_method(
            &repo(),
            &MethodDescriptor::new("findByLastnameAndAge", "User").param("lastname"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::ParameterCountMismatch {
                method: "findByLastnameAndAge".to_owned(),
                declared: 1,
                expected: 2,
            }
        );
    }

    #[test]
    fn sort_parameters_do_not_count() {
        let method = MethodDescriptor::new("findByLastname", "User")
            .param("lastname")
            .parameter("sort", ParameterRole::Sort);
        let plan = plan_method(&repo(), &method).unwrap();
        assert_eq!(plan.origin, QueryOrigin::Derived);
    }

    #[test]
    fn declared_query_with_templates_and_like_shorthand() {
        let method = MethodDescriptor::new("search", "User")
            .param("name")
            .param("age")
            .query(DeclaredQuery::jpql(
                "select u from #{#entityName} u where u.lastname like %:name% and u.age > ?#{[1]}",
            ));
        let plan = plan_method(&repo(), &method).unwrap();
        let PlannedQuery::Prepared(prepared) = &plan.query else {
            panic!("expected prepared query");
        };
        assert_eq!(
            prepared.query,
            "select u from User u where u.lastname like :name and u.age > :__template0"
        );
        assert_eq!(
            prepared.bindings,
            vec![
                ParameterBinding::new(
                    ":name",
                    0,
                    BindingTransform::Like {
                        kind: LikeKind::Contains,
                        escape: None
                    }
                ),
                ParameterBinding::new(":__template0", 1, BindingTransform::Identity),
            ]
        );
        assert_eq!(
            prepared.count_query.as_deref(),
            Some("select count(u) from User u where u.lastname like :name and u.age > :__template0")
        );
    }

    #[test]
    fn unknown_templates_and_parameters_fail() {
        let method = MethodDescriptor::new("m", "User")
            .query(DeclaredQuery::jpql("select u from User u where u.id = :#{principal.id}"));
        assert!(matches!(
            plan_method(&repo(), &method),
            Err(Error::UnsupportedTemplate(_))
        ));

        let method = MethodDescriptor::new("m", "User")
            .param("a")
            .query(DeclaredQuery::jpql("select u from User u where u.id = ?2"));
        assert_eq!(
            plan_method(&repo(), &method).unwrap_err(),
            Error::UnboundParameter("?2".to_owned())
        );
    }

    #[test]
    fn compile_applies_sort_and_dto_to_declared_query() {
        let method = MethodDescriptor::new("byLastname", "UserDto")
            .param("lastname")
            .query(DeclaredQuery::jpql("SELECT u FROM User u WHERE u.lastname = :lastname"));
        let r = repo();
        let plan = plan_method(&r, &method).unwrap();
        let compiled = plan
            .compile(&r, &Invocation::sorted(Sort::by([Order::asc("age")])))
            .unwrap();
        assert_eq!(
            compiled.query,
            "select new UserDto(u.firstname, u.lastname) from User u \
             where u.lastname = :lastname order by u.age asc"
        );
        assert_eq!(
            compiled.parameters(&[Value::from("Matthews")]).unwrap(),
            vec![(":lastname".to_owned(), Value::from("Matthews"))]
        );
    }

    #[test]
    fn compile_keyset_for_derived_and_declared() {
        let r = repo();
        let derived = plan_method(
            &r,
            &MethodDescriptor::new("findByAgeGreaterThan", "User").param("age"),
        )
        .unwrap();
        let position = ScrollPosition::forward(vec![("id".to_owned(), Value::from(5))]);
        let forward = derived
            .compile(&r, &Invocation::scrolling(Sort::unsorted(), position.clone()))
            .unwrap();
        assert_eq!(
            forward.query,
            "select u from User u where (u.age > ?1) and (u.id > :keyset_0) order by u.id asc"
        );
        assert_eq!(forward.keyset_parameters, vec![("keyset_0".to_owned(), Value::from(5))]);

        let backward = ScrollPosition::backward(vec![("id".to_owned(), Value::from(5))]);
        let backward = derived
            .compile(&r, &Invocation::scrolling(Sort::unsorted(), backward))
            .unwrap();
        assert!(backward.query.ends_with("(u.id < :keyset_0) order by u.id desc"));

        let generated = derived.ahead_of_time(&r).unwrap();
        assert!(matches!(generated.query, PlannedQuery::Prepared(_)));
        let replayed = generated
            .compile(&r, &Invocation::scrolling(Sort::unsorted(), position))
            .unwrap();
        assert_eq!(replayed.query, forward.query);
    }

    #[test]
    fn keyset_folds_method_name_sort_into_scroll_keys() {
        let r = repo();
        let derived = plan_method(
            &r,
            &MethodDescriptor::new("findByAgeGreaterThanOrderByLastnameAsc", "User").param("age"),
        )
        .unwrap();
        let keys = || {
            vec![
                ("lastname".to_owned(), Value::from("Doe")),
                ("id".to_owned(), Value::from(5)),
            ]
        };

        let forward = derived
            .compile(&r, &Invocation::scrolling(Sort::unsorted(), ScrollPosition::forward(keys())))
            .unwrap();
        assert!(forward.query.contains(
            "(u.lastname > :keyset_0 or (u.lastname = :keyset_1 and u.id > :keyset_2))"
        ));
        assert!(forward.query.ends_with("order by u.lastname asc, u.id asc"));
        assert_eq!(forward.query.matches("order by").count(), 1);
        assert_eq!(forward.sort, Sort::by([Order::asc("lastname"), Order::asc("id")]));

        let backward = derived
            .compile(&r, &Invocation::scrolling(Sort::unsorted(), ScrollPosition::backward(keys())))
            .unwrap();
        assert!(backward.query.contains(
            "(u.lastname < :keyset_0 or (u.lastname = :keyset_1 and u.id < :keyset_2))"
        ));
        assert!(backward.query.ends_with("order by u.lastname desc, u.id desc"));

        let generated = derived.ahead_of_time(&r).unwrap();
        let PlannedQuery::Prepared(prepared) = &generated.query else {
            panic!("expected a prepared query");
        };
        assert!(!prepared.query.contains("order by"));
        for position in [ScrollPosition::forward(keys()), ScrollPosition::backward(keys())] {
            let invocation = Invocation::scrolling(Sort::unsorted(), position);
            assert_eq!(
                generated.compile(&r, &invocation).unwrap().query,
                derived.compile(&r, &invocation).unwrap().query
            );
        }

        let unscrolled = generated.compile(&r, &Invocation::default()).unwrap();
        assert!(unscrolled.query.ends_with("order by u.lastname asc"));
    }

    #[test]
    fn keyset_rejects_declared_order_by() {
        let r = repo();
        let method = MethodDescriptor::new("ordered", "User")
            .query(DeclaredQuery::jpql("select u from User u order by u.lastname"));
        let plan = plan_method(&r, &method).unwrap();
        let position = ScrollPosition::forward(vec![("id".to_owned(), Value::from(5))]);
        assert!(matches!(
            plan.compile(&r, &Invocation::scrolling(Sort::unsorted(), position)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(plan.compile(&r, &Invocation::default()).is_ok());
    }

    #[test]
    fn native_queries_reject_dynamic_sort() {
        let r = repo();
        let method = MethodDescriptor::new("raw", "User")
            .param("age")
            .query(DeclaredQuery::native("SELECT * FROM users WHERE age > ?1"));
        let plan = plan_method(&r, &method).unwrap();
        assert!(plan.compile(&r, &Invocation::default()).is_ok());
        assert!(matches!(
            plan.compile(&r, &Invocation::sorted(Sort::by([Order::asc("age")]))),
            Err(Error::InvalidArgument(_))
        ));
    }
}

//! Repositories built from method declarations.
//!
//! [`RepositoryFactory::create`] plans every declared method and checks
//! that derived methods only touch mapped columns, so a repository with a
//! broken method never becomes usable. [`Repository::invoke`] then runs a
//! method by name:
//!
//! - derived methods become a [`Specification`] executed by the
//!   [`PredicateExecutor`];
//! - native declared queries run as raw statements with their placeholders
//!   rewritten to the backend's positional parameters;
//! - managed declared queries are planned but cannot run on `SeaORM`.

use std::collections::HashMap;
use std::sync::Arc;

use modkit_query::jpql::{TokenKind, tokenize};
use modkit_query::part_tree::{Action, PartTree};
use modkit_query::plan::{
    CompiledQuery, Invocation, MethodDescriptor, PlannedQuery, QueryPlan, RepositoryInformation,
    plan_method,
};
use modkit_query::{Value, Window};
use sea_orm::{ConnectionTrait, DbBackend, EntityTrait, Statement};
use tracing::{debug, info};

use crate::config::RepositoryConfig;
use crate::derived;
use crate::executor::PredicateExecutor;
use crate::field_map::{FieldMap, bind_value};
use crate::fluent::FluentQuery;
use crate::specification::{PredicateSpecification, SelectQuery, Specification};
use crate::{RepoError, Result};

/// Result of one repository method invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<M> {
    Rows(Vec<M>),
    /// `First`/`Top1` selections.
    One(Option<M>),
    Window(Window<M>),
    Count(u64),
    Exists(bool),
    /// Rows removed by a derived delete.
    Deleted(u64),
    /// Rows affected by a native modifying statement.
    Modified(u64),
}

/// Creates repositories sharing one configuration.
#[derive(Clone, Debug, Default)]
pub struct RepositoryFactory {
    config: Arc<RepositoryConfig>,
}

impl RepositoryFactory {
    #[must_use]
    pub fn new(config: RepositoryConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Plan and validate `methods`; the configured query options replace
    /// those of `info`.
    ///
    /// # Errors
    /// Returns the first planning error (parse, path, parameter or template)
    /// and the executor errors of [`derived::validate`] for derived methods
    /// that cannot run against `fields`.
    pub fn create<E, C>(
        &self,
        conn: C,
        info: RepositoryInformation,
        fields: FieldMap<E>,
        methods: &[MethodDescriptor],
    ) -> Result<Repository<E, C>>
    where
        E: EntityTrait,
        E::Model: Sync,
        C: ConnectionTrait + Clone + Send + Sync + 'static,
    {
        let info = info.with_options(self.config.query_options());
        let mut plans = HashMap::with_capacity(methods.len());
        for method in methods {
            let plan = plan_method(&info, method)?;
            if let PlannedQuery::Derived(tree) = &plan.query {
                derived::validate(tree, &fields)?;
            }
            plans.insert(method.name.clone(), plan);
        }
        info!(
            domain = %info.domain,
            methods = plans.len(),
            "repository created"
        );
        Ok(Repository {
            executor: PredicateExecutor::with_shared(conn, Arc::new(fields), Arc::clone(&self.config)),
            info,
            plans,
        })
    }
}

/// Validated repository methods over one entity.
pub struct Repository<E: EntityTrait, C> {
    executor: PredicateExecutor<E, C>,
    info: RepositoryInformation,
    plans: HashMap<String, QueryPlan>,
}

impl<E, C> Repository<E, C>
where
    E: EntityTrait,
    E::Model: Sync,
    C: ConnectionTrait + Clone + Send + Sync + 'static,
{
    /// Executor for ad-hoc specifications over the same connection.
    #[must_use]
    pub fn executor(&self) -> &PredicateExecutor<E, C> {
        &self.executor
    }

    #[must_use]
    pub fn plan(&self, method: &str) -> Option<&QueryPlan> {
        self.plans.get(method)
    }

    fn planned(&self, method: &str) -> Result<&QueryPlan> {
        self.plans
            .get(method)
            .ok_or_else(|| RepoError::InvalidUsage(format!("no repository method `{method}`")))
    }

    /// Query text of `method` for one invocation.
    ///
    /// # Errors
    /// Returns `RepoError::InvalidUsage` for undeclared methods and
    /// propagates compile errors.
    pub fn compile(&self, method: &str, invocation: &Invocation) -> Result<CompiledQuery> {
        Ok(self.planned(method)?.compile(&self.info, invocation)?)
    }

    /// Run `method` with `arguments`.
    ///
    /// Selecting methods return a [`Outcome::Window`] when the invocation
    /// carries a scroll position, [`Outcome::One`] when limited to a single
    /// row and [`Outcome::Rows`] otherwise.
    ///
    /// # Errors
    /// Returns `RepoError::InvalidUsage` for undeclared methods and managed
    /// declared queries, and propagates argument, condition and database
    /// errors.
    pub async fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        invocation: &Invocation,
    ) -> Result<Outcome<E::Model>> {
        let plan = self.planned(method)?;
        debug!(method, origin = ?plan.origin, "invoking repository method");
        match &plan.query {
            PlannedQuery::Derived(tree) => self.invoke_derived(tree, arguments, invocation).await,
            PlannedQuery::Prepared(prepared) if prepared.native => {
                if invocation.position.is_some() {
                    return Err(RepoError::InvalidUsage(format!(
                        "method `{method}` runs a native query and cannot scroll"
                    )));
                }
                let compiled = plan.compile(&self.info, invocation)?;
                self.invoke_native(&compiled, &arguments).await
            }
            PlannedQuery::Prepared(_) => Err(RepoError::InvalidUsage(format!(
                "method `{method}` declares a managed query, which the SeaORM executor cannot run"
            ))),
        }
    }

    async fn invoke_derived(
        &self,
        tree: &Arc<PartTree>,
        arguments: Vec<Value>,
        invocation: &Invocation,
    ) -> Result<Outcome<E::Model>> {
        let spec: Specification<E> = derived::specification(
            Arc::clone(tree),
            arguments,
            self.executor.config().escape_character,
        )?;
        let spec = if tree.subject.distinct { spec.distinct() } else { spec };

        Ok(match tree.action() {
            Action::Count => Outcome::Count(self.executor.count(&spec).await?),
            Action::Exists => Outcome::Exists(self.executor.exists(&spec).await?),
            Action::Delete => {
                let predicate = PredicateSpecification::new(move |root, cb| {
                    spec.to_predicate(root, &mut SelectQuery::default(), cb)
                });
                Outcome::Deleted(self.executor.delete(&predicate).await?)
            }
            Action::Select => {
                let sort = tree.sort.clone().and(invocation.sort.clone());
                let mut query = FluentQuery::new(self.executor.clone(), spec).sort_by(sort);
                if let Some(max) = tree.subject.max_results {
                    query = query.limit(max);
                }
                match (&invocation.position, tree.subject.max_results) {
                    (Some(position), _) => Outcome::Window(query.scroll(position).await?),
                    (None, Some(1)) => Outcome::One(query.first().await?),
                    (None, _) => Outcome::Rows(query.all().await?),
                }
            }
        })
    }

    async fn invoke_native(&self, compiled: &CompiledQuery, arguments: &[Value]) -> Result<Outcome<E::Model>> {
        let conn = self.executor.connection();
        let backend = conn.get_database_backend();
        let (sql, values) = positional(&compiled.query, &compiled.parameters(arguments)?, backend)?;
        let stmt = Statement::from_sql_and_values(backend, sql, values);
        let hints = &compiled.hints;
        if compiled.modifying {
            let res = self.executor.run(hints, conn.execute(stmt)).await?;
            return Ok(Outcome::Modified(res.rows_affected()));
        }
        let rows = self
            .executor
            .run(hints, E::find().from_raw_sql(stmt).all(conn))
            .await?;
        Ok(Outcome::Rows(rows))
    }
}

/// Rewrite named and numbered placeholders to the positional parameters of
/// `backend`, binding one value per occurrence.
fn positional(
    query: &str,
    parameters: &[(String, Value)],
    backend: DbBackend,
) -> Result<(String, Vec<sea_orm::Value>)> {
    let mut sql = String::with_capacity(query.len());
    let mut values = Vec::new();
    let mut anonymous = parameters.iter().filter(|(p, _)| p == "?");
    let mut last = 0;
    for token in tokenize(query)? {
        if !matches!(token.kind, TokenKind::Named | TokenKind::Positional) {
            continue;
        }
        let placeholder = token.text(query);
        let value = if placeholder == "?" {
            anonymous.next()
        } else {
            parameters.iter().find(|(p, _)| p == placeholder)
        }
        .map(|(_, v)| v)
        .ok_or_else(|| RepoError::InvalidArgument(format!("unbound parameter {placeholder}")))?;
        values.push(bind_value(value)?);
        sql.push_str(&query[last..token.start]);
        match backend {
            DbBackend::Postgres => {
                sql.push('$');
                sql.push_str(&values.len().to_string());
            }
            _ => sql.push('?'),
        }
        last = token.end;
    }
    sql.push_str(&query[last..]);
    Ok((sql, values))
}

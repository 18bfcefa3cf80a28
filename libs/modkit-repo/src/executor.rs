//! Specification execution: single rows, lists, pages, counts and deletes.
//!
//! Every provider call runs under the statement timeout taken from the
//! executor's query hints, or from [`RepositoryConfig::query_timeout`] when
//! no hint is present.

use std::any::TypeId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use modkit_query::hints::QueryHints;
use modkit_query::{Direction, NullHandling, Page, PageRequest, Sort};
use sea_orm::sea_query::{Expr, LockType, NullOrdering, Order};
use sea_orm::{
    Condition, ConnectionTrait, DbErr, EntityName, EntityTrait, Iterable, ModelTrait,
    PaginatorTrait, PrimaryKeyToColumn, QueryFilter, QueryOrder, QuerySelect, Select,
};
use tracing::{debug, warn};

use crate::config::RepositoryConfig;
use crate::field_map::FieldMap;
use crate::fluent::FluentQuery;
use crate::specification::{
    CriteriaBuilder, DeleteQuery, DeleteSpecification, PredicateSpecification, Root, SelectQuery,
    Specification,
};
use crate::{RepoError, Result};

/// Row lock applied to select statements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// `FOR UPDATE`
    ForUpdate,
    /// `FOR SHARE`
    ForShare,
}

impl LockMode {
    fn lock_type(self) -> LockType {
        match self {
            LockMode::ForUpdate => LockType::Update,
            LockMode::ForShare => LockType::Share,
        }
    }
}

/// Extension trait for ordering a select by a [`Sort`].
pub trait SortExt<E: EntityTrait>: Sized {
    /// Apply `sort` through `fields`; ignore-case keys compare folded.
    ///
    /// # Errors
    /// Returns `RepoError::UnknownProperty` for unmapped sort properties.
    fn apply_sort(self, sort: &Sort, fields: &FieldMap<E>) -> Result<Self>;
}

impl<E: EntityTrait> SortExt<E> for Select<E> {
    fn apply_sort(self, sort: &Sort, fields: &FieldMap<E>) -> Result<Self> {
        let mut query = self;
        for order in sort.iter() {
            let path = fields.path(&order.property)?;
            let path = if order.ignore_case { path.upper() } else { path };
            let sea_order = match order.direction {
                Direction::Asc => Order::Asc,
                Direction::Desc => Order::Desc,
            };
            query = match order.null_handling {
                NullHandling::Native => query.order_by(path.expr(), sea_order),
                NullHandling::NullsFirst => {
                    query.order_by_with_nulls(path.expr(), sea_order, NullOrdering::First)
                }
                NullHandling::NullsLast => {
                    query.order_by_with_nulls(path.expr(), sea_order, NullOrdering::Last)
                }
            };
        }
        Ok(query)
    }
}

/// Runs specifications against one entity over a `SeaORM` connection.
#[must_use]
pub struct PredicateExecutor<E: EntityTrait, C> {
    conn: C,
    fields: Arc<FieldMap<E>>,
    config: Arc<RepositoryConfig>,
    hints: QueryHints,
    lock: Option<LockMode>,
}

impl<E: EntityTrait, C: Clone> Clone for PredicateExecutor<E, C> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            fields: Arc::clone(&self.fields),
            config: Arc::clone(&self.config),
            hints: self.hints.clone(),
            lock: self.lock,
        }
    }
}

impl<E, C> PredicateExecutor<E, C>
where
    E: EntityTrait,
    E::Model: Sync,
    C: ConnectionTrait + Clone + Send + Sync + 'static,
{
    pub fn new(conn: C, fields: FieldMap<E>) -> Self {
        Self::with_shared(conn, Arc::new(fields), Arc::new(RepositoryConfig::default()))
    }

    pub(crate) fn with_shared(
        conn: C,
        fields: Arc<FieldMap<E>>,
        config: Arc<RepositoryConfig>,
    ) -> Self {
        Self {
            conn,
            fields,
            config,
            hints: QueryHints::new(),
            lock: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Hints applied to every statement; count statements only see the
    /// hints that apply to counting.
    #[must_use]
    pub fn with_hints(mut self, hints: QueryHints) -> Self {
        self.hints = hints;
        self
    }

    #[must_use]
    pub fn with_lock(mut self, lock: LockMode) -> Self {
        self.lock = Some(lock);
        self
    }

    #[must_use]
    pub fn fields(&self) -> &FieldMap<E> {
        &self.fields
    }

    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    #[must_use]
    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Select restricted by `spec`, with distinct and lock applied.
    ///
    /// # Errors
    /// Propagates errors raised while building the condition.
    pub fn select(&self, spec: &Specification<E>) -> Result<Select<E>> {
        let mut query = SelectQuery::default();
        let cond = spec.to_predicate(&Root::new(&self.fields), &mut query, &CriteriaBuilder)?;
        let mut select = E::find();
        if let Some(cond) = cond {
            select = select.filter(cond);
        }
        if query.distinct {
            select = select.distinct();
        }
        if let Some(lock) = self.lock {
            select = select.lock(lock.lock_type());
        }
        Ok(select)
    }

    /// Run a provider call under the statement timeout of `hints`.
    pub(crate) async fn run<T, F>(&self, hints: &QueryHints, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, DbErr>>,
    {
        let Some(limit) = self.timeout(hints)? else {
            return Ok(call.await?);
        };
        Ok(tokio::time::timeout(limit, call).await.map_err(|_| {
            warn!(
                entity = E::default().table_name(),
                timeout_ms = limit.as_millis(),
                "query timed out"
            );
            RepoError::Timeout(limit)
        })??)
    }

    fn timeout(&self, hints: &QueryHints) -> Result<Option<Duration>> {
        Ok(hints.timeout()?.or(self.config.query_timeout))
    }

    pub(crate) fn hints(&self) -> &QueryHints {
        &self.hints
    }

    /// The single row matching `spec`, if any.
    ///
    /// # Errors
    /// Returns `RepoError::NonUniqueResult` when more than one row matches.
    pub async fn find_one(&self, spec: &Specification<E>) -> Result<Option<E::Model>> {
        let select = self.select(spec)?.limit(2);
        let mut rows = self.run(&self.hints, select.all(&self.conn)).await?;
        if rows.len() > 1 {
            warn!(
                entity = E::default().table_name(),
                "findOne matched more than one row"
            );
            return Err(RepoError::NonUniqueResult(rows.len()));
        }
        Ok(rows.pop())
    }

    /// # Errors
    /// Propagates condition and database errors.
    pub async fn find_all(&self, spec: &Specification<E>) -> Result<Vec<E::Model>> {
        self.find_all_sorted(spec, &Sort::unsorted()).await
    }

    /// # Errors
    /// Returns `RepoError::UnknownProperty` for unmapped sort properties and
    /// propagates condition and database errors.
    pub async fn find_all_sorted(&self, spec: &Specification<E>, sort: &Sort) -> Result<Vec<E::Model>> {
        let select = self.select(spec)?.apply_sort(sort, &self.fields)?;
        let rows = self.run(&self.hints, select.all(&self.conn)).await?;
        debug!(entity = E::default().table_name(), rows = rows.len(), "findAll");
        Ok(rows)
    }

    /// One page of `spec`; the total is counted only when the page content
    /// does not imply it. The page size is clamped to `max_page_size`.
    ///
    /// # Errors
    /// Propagates condition, sort and database errors.
    pub async fn find_page(&self, spec: &Specification<E>, request: &PageRequest) -> Result<Page<E::Model>> {
        let request = PageRequest {
            size: self.config.page_size(Some(request.size)),
            ..request.clone()
        };
        let select = self
            .select(spec)?
            .apply_sort(&request.sort, &self.fields)?
            .offset(request.offset())
            .limit(request.size);
        let rows = self.run(&self.hints, select.all(&self.conn)).await?;
        let total = match Page::derivable_total(&rows, &request) {
            Some(total) => total,
            None => self.count(spec).await?,
        };
        debug!(
            entity = E::default().table_name(),
            page = request.page,
            rows = rows.len(),
            total,
            "findAll page"
        );
        Ok(Page::new(rows, &request, total))
    }

    /// Count rows matching `spec` using the counting subset of the hints.
    ///
    /// # Errors
    /// Propagates condition and database errors.
    pub async fn count(&self, spec: &Specification<E>) -> Result<u64> {
        let mut query = SelectQuery::default();
        let cond = spec.to_predicate(&Root::new(&self.fields), &mut query, &CriteriaBuilder)?;
        // Counts never lock.
        let mut select = E::find();
        if let Some(cond) = cond {
            select = select.filter(cond);
        }
        if query.distinct {
            select = select.distinct();
        }
        let total = self.run(&self.hints.for_counts(), select.count(&self.conn)).await?;
        debug!(entity = E::default().table_name(), total, "count");
        Ok(total)
    }

    /// # Errors
    /// Propagates condition and database errors.
    pub async fn exists(&self, spec: &Specification<E>) -> Result<bool> {
        let select = self.select(spec)?.limit(1);
        let row = self.run(&self.hints, select.one(&self.conn)).await?;
        Ok(row.is_some())
    }

    /// Load the rows matching `spec` and remove them one by one.
    ///
    /// Returns the number of rows actually removed. Meant for small result
    /// sets; use [`PredicateExecutor::delete_where`] for bulk deletes.
    ///
    /// # Errors
    /// Propagates condition and database errors.
    pub async fn delete(&self, spec: &PredicateSpecification<E>) -> Result<u64> {
        let rows = self.find_all(&Specification::from(spec.clone())).await?;
        let mut removed = 0;
        for row in &rows {
            let by_key = E::PrimaryKey::iter().fold(Condition::all(), |cond, key| {
                let col = key.into_column();
                cond.add(Expr::col(col).eq(row.get(col)))
            });
            let res = self
                .run(&self.hints, E::delete_many().filter(by_key).exec(&self.conn))
                .await?;
            removed += res.rows_affected;
        }
        debug!(
            entity = E::default().table_name(),
            loaded = rows.len(),
            removed,
            "delete by specification"
        );
        Ok(removed)
    }

    /// Bulk delete of the rows matching `spec` in one statement.
    ///
    /// # Errors
    /// Propagates condition and database errors.
    pub async fn delete_where(&self, spec: &DeleteSpecification<E>) -> Result<u64> {
        let cond = spec.to_predicate(&Root::new(&self.fields), &mut DeleteQuery, &CriteriaBuilder)?;
        let mut delete = E::delete_many();
        if let Some(cond) = cond {
            delete = delete.filter(cond);
        }
        let res = self.run(&self.hints, delete.exec(&self.conn)).await?;
        debug!(
            entity = E::default().table_name(),
            removed = res.rows_affected,
            "bulk delete"
        );
        Ok(res.rows_affected)
    }

    /// Hand a fluent query over `spec` to `query` and return what it
    /// materializes.
    ///
    /// # Errors
    /// Returns `RepoError::InvalidUsage` if `query` would return the fluent
    /// query itself, and propagates the errors of `query`.
    pub async fn find_by<R, F, Fut>(&self, spec: Specification<E>, query: F) -> Result<R>
    where
        R: 'static,
        F: FnOnce(FluentQuery<E, C>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if TypeId::of::<R>() == TypeId::of::<FluentQuery<E, C>>() {
            return Err(RepoError::InvalidUsage(
                "findBy query function must not return the fluent query".to_owned(),
            ));
        }
        query(FluentQuery::new(self.clone(), spec)).await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use modkit_query::{FieldKind, Order as SortOrder};
    use sea_orm::{DbBackend, QueryTrait};

    mod ent {
        use sea_orm::entity::prelude::*;

        #[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "users")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub lastname: String,
            pub nickname: Option<String>,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    fn fields() -> FieldMap<ent::Entity> {
        FieldMap::new()
            .id("id", ent::Column::Id, FieldKind::I64)
            .insert("lastname", ent::Column::Lastname, FieldKind::String)
            .insert("nickname", ent::Column::Nickname, FieldKind::String)
    }

    #[test]
    fn sort_folds_case_and_places_nulls() {
        let sort = Sort::by([
            SortOrder::asc("lastname").ignore_case(),
            SortOrder::desc("nickname").with_null_handling(NullHandling::NullsLast),
        ]);
        let sql = ent::Entity::find()
            .apply_sort(&sort, &fields())
            .unwrap()
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#"ORDER BY UPPER("users"."lastname") ASC"#), "{sql}");
        assert!(sql.contains(r#""users"."nickname" DESC NULLS LAST"#), "{sql}");
    }

    #[test]
    fn unknown_sort_property_is_rejected() {
        let err = ent::Entity::find()
            .apply_sort(&Sort::by([SortOrder::asc("age")]), &fields())
            .err();
        assert!(matches!(err, Some(RepoError::UnknownProperty(p)) if p == "age"));
    }

    #[test]
    fn lock_modes_map_to_row_locks() {
        let sql = ent::Entity::find()
            .lock(LockMode::ForUpdate.lock_type())
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.ends_with("FOR UPDATE"), "{sql}");
        let sql = ent::Entity::find()
            .lock(LockMode::ForShare.lock_type())
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.ends_with("FOR SHARE"), "{sql}");
    }
}

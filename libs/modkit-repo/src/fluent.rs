//! Fluent query over a specification, handed out by
//! [`PredicateExecutor::find_by`].

use modkit_query::scroll::{KeysetScrollDelegate, ScrollPosition, create_sort, window_from};
use modkit_query::{Page, PageRequest, Sort, Window};
use sea_orm::{ConnectionTrait, EntityTrait, QueryFilter, QuerySelect};
use tracing::debug;

use crate::executor::{PredicateExecutor, SortExt};
use crate::keyset::{SeaOrmStrategy, query_error};
use crate::specification::Specification;
use crate::{RepoError, Result};

#[must_use]
pub struct FluentQuery<E: EntityTrait, C> {
    executor: PredicateExecutor<E, C>,
    spec: Specification<E>,
    sort: Sort,
    limit: Option<u64>,
}

impl<E, C> FluentQuery<E, C>
where
    E: EntityTrait,
    E::Model: Sync,
    C: ConnectionTrait + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(executor: PredicateExecutor<E, C>, spec: Specification<E>) -> Self {
        Self {
            executor,
            spec,
            sort: Sort::unsorted(),
            limit: None,
        }
    }

    /// Append `sort` to the current ordering.
    pub fn sort_by(mut self, sort: Sort) -> Self {
        self.sort = self.sort.and(sort);
        self
    }

    /// Cap the rows returned by [`all`](Self::all) and the size of scroll windows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// # Errors
    /// Returns `RepoError::NonUniqueResult` when more than one row matches.
    pub async fn one(self) -> Result<Option<E::Model>> {
        self.executor.find_one(&self.spec).await
    }

    /// First row in the current ordering.
    ///
    /// # Errors
    /// Propagates condition, sort and database errors.
    pub async fn first(self) -> Result<Option<E::Model>> {
        let select = self
            .executor
            .select(&self.spec)?
            .apply_sort(&self.sort, self.executor.fields())?
            .limit(1);
        let conn = self.executor.connection();
        self.executor.run(self.executor.hints(), select.one(conn)).await
    }

    /// # Errors
    /// Propagates condition, sort and database errors.
    pub async fn all(self) -> Result<Vec<E::Model>> {
        let mut select = self
            .executor
            .select(&self.spec)?
            .apply_sort(&self.sort, self.executor.fields())?;
        if let Some(limit) = self.limit {
            select = select.limit(limit);
        }
        let conn = self.executor.connection();
        self.executor.run(self.executor.hints(), select.all(conn)).await
    }

    /// The fluent ordering applies ahead of the request's own sort.
    ///
    /// # Errors
    /// Propagates condition, sort and database errors.
    pub async fn page(self, request: &PageRequest) -> Result<Page<E::Model>> {
        let request = PageRequest {
            sort: self.sort.and(request.sort.clone()),
            ..request.clone()
        };
        self.executor.find_page(&self.spec, &request).await
    }

    /// # Errors
    /// Propagates condition and database errors.
    pub async fn count(self) -> Result<u64> {
        self.executor.count(&self.spec).await
    }

    /// # Errors
    /// Propagates condition and database errors.
    pub async fn exists(self) -> Result<bool> {
        self.executor.exists(&self.spec).await
    }

    /// One window starting after `position`.
    ///
    /// Offset positions skip every row up to and including the last one
    /// seen. Keyset positions add a predicate over the sort keys, with the
    /// identifiers appended as tie-breakers.
    ///
    /// # Errors
    /// Returns `RepoError::InvalidUsage` for keyset scrolling without any sort
    /// key, `modkit_query::Error::InvalidScrollPosition` for positions that
    /// lack a sort-key value, and propagates database errors.
    pub async fn scroll(self, position: &ScrollPosition) -> Result<Window<E::Model>> {
        let fields = self.executor.fields();
        let limit = self.limit.map(|l| self.executor.config().page_size(Some(l)));

        let (select, keys) = match position {
            ScrollPosition::Offset(_) => {
                let select = self
                    .executor
                    .select(&self.spec)?
                    .apply_sort(&self.sort, fields)?
                    .offset(position.start_offset()?);
                (select, Vec::new())
            }
            ScrollPosition::Keyset { .. } => {
                let sort = create_sort(position, &self.sort, fields.ids());
                if sort.is_unsorted() {
                    return Err(RepoError::InvalidUsage(
                        "keyset scrolling needs a sort or an identifier".to_owned(),
                    ));
                }
                let mut select = self.executor.select(&self.spec)?;
                if let Some(keyset) = KeysetScrollDelegate::of(position.direction()).create_predicate(
                    position,
                    &sort,
                    &mut SeaOrmStrategy::new(fields),
                )? {
                    select = select.filter(keyset);
                }
                let keys: Vec<String> = sort.iter().map(|o| o.property.clone()).collect();
                (select.apply_sort(&sort, fields)?, keys)
            }
        };
        let select = match limit {
            Some(l) => select.limit(l + 1),
            None => select,
        };

        let conn = self.executor.connection();
        let rows = self.executor.run(self.executor.hints(), select.all(conn)).await?;
        debug!(rows = rows.len(), ?limit, "scroll");
        let window = window_from(rows, limit, position, |row| {
            fields
                .key_values(row, keys.iter().map(String::as_str))
                .map_err(query_error)
        })?;
        Ok(window)
    }
}

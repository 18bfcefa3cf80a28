//! Ordering and paging primitives.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scroll::ScrollPosition;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

impl Direction {
    /// Reverse the sort direction (Asc <-> Desc)
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }

    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// Placement of `NULL` values in an ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullHandling {
    /// Leave null placement to the database.
    #[default]
    Native,
    NullsFirst,
    NullsLast,
}

/// A single ordering key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
    pub ignore_case: bool,
    pub null_handling: NullHandling,
}

impl Order {
    pub fn asc(property: impl Into<String>) -> Self {
        Self::by(property, Direction::Asc)
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self::by(property, Direction::Desc)
    }

    pub fn by(property: impl Into<String>, direction: Direction) -> Self {
        Self {
            property: property.into(),
            direction,
            ignore_case: false,
            null_handling: NullHandling::Native,
        }
    }

    #[must_use]
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    #[must_use]
    pub fn with_null_handling(mut self, null_handling: NullHandling) -> Self {
        self.null_handling = null_handling;
        self
    }

    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            direction: self.direction.reverse(),
            ..self.clone()
        }
    }
}

/// Ordered list of sort keys. An empty `Sort` means unsorted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[must_use]
pub struct Sort(pub Vec<Order>);

impl Sort {
    pub fn unsorted() -> Self {
        Self(Vec::new())
    }

    pub fn by(orders: impl IntoIterator<Item = Order>) -> Self {
        Self(orders.into_iter().collect())
    }

    #[must_use]
    pub fn is_unsorted(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.0.iter()
    }

    #[must_use]
    pub fn get(&self, property: &str) -> Option<&Order> {
        self.0.iter().find(|o| o.property == property)
    }

    /// Append the keys of `other` that are not already present.
    pub fn and(mut self, other: Sort) -> Self {
        for order in other.0 {
            if self.get(&order.property).is_none() {
                self.0.push(order);
            }
        }
        self
    }

    /// Append tiebreaker if missing
    pub fn ensure_tiebreaker(mut self, property: &str, direction: Direction) -> Self {
        if self.get(property).is_none() {
            self.0.push(Order::by(property, direction));
        }
        self
    }

    /// Reverse all sort directions (for backward scrolling)
    pub fn reversed(&self) -> Self {
        Self(self.0.iter().map(Order::reversed).collect())
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "UNSORTED");
        }
        let formatted: Vec<String> = self
            .0
            .iter()
            .map(|o| format!("{}: {}", o.property, o.direction.keyword().to_uppercase()))
            .collect();
        write!(f, "{}", formatted.join(", "))
    }
}

/// Zero-based page request.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct PageRequest {
    pub page: u64,
    pub size: u64,
    pub sort: Sort,
}

impl PageRequest {
    pub fn of(page: u64, size: u64) -> Self {
        Self {
            page,
            size,
            sort: Sort::unsorted(),
        }
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size)
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }
}

/// A page of results with its total element count.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: u64,
    pub size: u64,
    pub total: u64,
}

impl<T> Page<T> {
    /// Build a page, calling `count` only when the total cannot be derived
    /// from the page content alone.
    ///
    /// # Errors
    /// Propagates the error of `count`.
    pub fn lazy<E, F>(items: Vec<T>, request: &PageRequest, count: F) -> Result<Self, E>
    where
        F: FnOnce() -> Result<u64, E>,
    {
        let total = Self::derivable_total(&items, request).map_or_else(count, Ok)?;
        Ok(Self::new(items, request, total))
    }

    /// Total implied by a short page, if any.
    pub fn derivable_total(items: &[T], request: &PageRequest) -> Option<u64> {
        let len = items.len() as u64;
        if request.size == 0 {
            return None;
        }
        if request.offset() == 0 && len < request.size {
            return Some(len);
        }
        if len != 0 && len < request.size {
            return Some(request.offset() + len);
        }
        None
    }

    pub fn new(items: Vec<T>, request: &PageRequest, total: u64) -> Self {
        Self {
            items,
            number: request.page,
            size: request.size,
            total,
        }
    }

    #[must_use]
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            1
        } else {
            self.total.div_ceil(self.size)
        }
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.number + 1 < self.total_pages()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total: self.total,
        }
    }
}

/// A scroll window: items plus the position of each item.
#[derive(Clone, Debug, PartialEq)]
pub struct Window<T> {
    pub items: Vec<T>,
    pub positions: Vec<ScrollPosition>,
    pub has_next: bool,
}

impl<T> Window<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            positions: Vec::new(),
            has_next: false,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Position to continue scrolling from, if more rows may follow.
    #[must_use]
    pub fn next_position(&self) -> Option<&ScrollPosition> {
        if self.has_next {
            self.positions.last()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_page_skips_count_for_short_first_page() {
        let req = PageRequest::of(0, 10);
        let page: Page<i32> = Page::lazy(vec![1, 2, 3], &req, || -> Result<u64, ()> {
            panic!("count must not run")
        })
        .unwrap();
        assert_eq!(page.total, 3);
        assert!(!page.has_next());
    }

    #[test]
    fn lazy_page_counts_for_full_page() {
        let req = PageRequest::of(1, 2);
        let page: Page<i32> = Page::lazy(vec![3, 4], &req, || Ok::<_, ()>(7)).unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages(), 4);
        assert!(page.has_next());
    }

    #[test]
    fn short_later_page_derives_total_from_offset() {
        let req = PageRequest::of(2, 5);
        assert_eq!(Page::derivable_total(&[1, 2], &req), Some(12));
        assert_eq!(Page::<i32>::derivable_total(&[], &req), None);
    }

    #[test]
    fn sort_and_keeps_existing_keys_first() {
        let sort = Sort::by([Order::desc("a")]).and(Sort::by([Order::asc("a"), Order::asc("b")]));
        assert_eq!(sort.to_string(), "a: DESC, b: ASC");
    }
}

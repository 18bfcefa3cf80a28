//! Scroll positions and the keyset predicate algebra.
//!
//! A keyset predicate for sort keys `k1..kn` and last-seen values `v1..vn`
//! is the lexicographic OR-chain
//! `(k1 > v1) or (k1 = v1 and k2 > v2) or ...`, with `<` for descending
//! keys. Backward scrolling reverses the sort, runs the same predicate and
//! reverses the fetched rows back into the requested order.

use serde::{Deserialize, Serialize};

use crate::sort::{Direction, Order, Sort, Window};
use crate::{Error, FieldKind, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ScrollDirection {
    #[default]
    Forward,
    Backward,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScrollPosition {
    /// Index of the last row seen; `None` before the first window.
    Offset(Option<u64>),
    /// Sort-key values of the last row seen; empty before the first window.
    Keyset {
        keys: Vec<(String, Value)>,
        direction: ScrollDirection,
    },
}

impl ScrollPosition {
    #[must_use]
    pub fn offset() -> Self {
        ScrollPosition::Offset(None)
    }

    #[must_use]
    pub fn keyset() -> Self {
        ScrollPosition::Keyset {
            keys: Vec::new(),
            direction: ScrollDirection::Forward,
        }
    }

    #[must_use]
    pub fn forward(keys: Vec<(String, Value)>) -> Self {
        ScrollPosition::Keyset {
            keys,
            direction: ScrollDirection::Forward,
        }
    }

    #[must_use]
    pub fn backward(keys: Vec<(String, Value)>) -> Self {
        ScrollPosition::Keyset {
            keys,
            direction: ScrollDirection::Backward,
        }
    }

    #[must_use]
    pub fn is_initial(&self) -> bool {
        match self {
            ScrollPosition::Offset(o) => o.is_none(),
            ScrollPosition::Keyset { keys, .. } => keys.is_empty(),
        }
    }

    /// First row index to fetch for an offset position.
    ///
    /// # Errors
    /// Returns `Error::InvalidScrollPosition` if the offset is already the
    /// last representable row.
    pub fn start_offset(&self) -> Result<u64, Error> {
        match self {
            ScrollPosition::Offset(Some(last)) => last
                .checked_add(1)
                .ok_or_else(|| Error::InvalidScrollPosition("offset out of range".to_owned())),
            _ => Ok(0),
        }
    }

    #[must_use]
    pub fn direction(&self) -> ScrollDirection {
        match self {
            ScrollPosition::Offset(_) => ScrollDirection::Forward,
            ScrollPosition::Keyset { direction, .. } => *direction,
        }
    }

    #[must_use]
    pub fn key(&self, property: &str) -> Option<&Value> {
        match self {
            ScrollPosition::Keyset { keys, .. } => {
                keys.iter().find(|(k, _)| k == property).map(|(_, v)| v)
            }
            ScrollPosition::Offset(_) => None,
        }
    }

    /// Encode into an opaque base64url token.
    ///
    /// # Errors
    /// Returns `Error::InvalidArgument` if a key value cannot be encoded.
    pub fn encode(&self) -> Result<String, Error> {
        let wire = match self {
            ScrollPosition::Offset(o) => Wire {
                v: 1,
                p: "o".to_owned(),
                o: *o,
                k: Vec::new(),
                d: "fwd".to_owned(),
            },
            ScrollPosition::Keyset { keys, direction } => {
                let mut k = Vec::with_capacity(keys.len());
                for (name, value) in keys {
                    if value.is_null() {
                        k.push((name.clone(), "Null".to_owned(), None));
                        continue;
                    }
                    let kind = value.kind().ok_or_else(|| {
                        Error::InvalidArgument(format!("{value} value cannot be used as a keyset key"))
                    })?;
                    k.push((name.clone(), kind.to_string(), Some(value.to_key_string()?)));
                }
                Wire {
                    v: 1,
                    p: "k".to_owned(),
                    o: None,
                    k,
                    d: match direction {
                        ScrollDirection::Forward => "fwd".to_owned(),
                        ScrollDirection::Backward => "bwd".to_owned(),
                    },
                }
            }
        };
        serde_json::to_vec(&wire)
            .map(|bytes| base64_url::encode(&bytes))
            .map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    /// Decode a token produced by [`ScrollPosition::encode`].
    ///
    /// # Errors
    /// Returns `Error::InvalidScrollPosition` for malformed tokens.
    pub fn decode(token: &str) -> Result<Self, Error> {
        let bad = |m: &str| Error::InvalidScrollPosition(m.to_owned());
        let bytes = base64_url::decode(token).map_err(|_| bad("invalid base64url encoding"))?;
        let w: Wire = serde_json::from_slice(&bytes).map_err(|_| bad("malformed JSON"))?;
        if w.v != 1 {
            return Err(bad("unsupported version"));
        }
        let direction = match w.d.as_str() {
            "fwd" => ScrollDirection::Forward,
            "bwd" => ScrollDirection::Backward,
            _ => return Err(bad("invalid direction")),
        };
        match w.p.as_str() {
            "o" if w.o == Some(u64::MAX) => Err(bad("offset out of range")),
            "o" => Ok(ScrollPosition::Offset(w.o)),
            "k" => {
                let mut keys = Vec::with_capacity(w.k.len());
                for (name, tag, raw) in w.k {
                    let value = match (tag.as_str(), raw) {
                        ("Null", _) => Value::Null,
                        (tag, Some(raw)) => {
                            let kind = FieldKind::from_tag(tag).ok_or_else(|| bad("unknown key kind"))?;
                            Value::parse_key(kind, &raw)?
                        }
                        (_, None) => return Err(bad("missing key value")),
                    };
                    keys.push((name, value));
                }
                Ok(ScrollPosition::Keyset { keys, direction })
            }
            _ => Err(bad("unknown position type")),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Wire {
    v: u8,
    p: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    o: Option<u64>,
    #[serde(default)]
    k: Vec<(String, String, Option<String>)>,
    #[serde(default = "default_direction")]
    d: String,
}

fn default_direction() -> String {
    "fwd".to_owned()
}

// base64url helpers (no padding)
mod base64_url {
    use base64::Engine;

    pub fn encode(bytes: &[u8]) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s)
    }
}

/// Backend-specific construction of keyset predicates.
pub trait QueryStrategy {
    type Expression;
    type Predicate;

    /// # Errors
    /// Returns an error if the property cannot be addressed.
    fn create_expression(&mut self, property: &str) -> Result<Self::Expression, Error>;

    /// Strictly-after comparison for `order`. A null value compares as
    /// `is null` for ascending and `is not null` for descending keys.
    ///
    /// # Errors
    /// Returns an error if the value cannot be bound.
    fn compare(
        &mut self,
        order: &Order,
        expression: Self::Expression,
        value: &Value,
    ) -> Result<Self::Predicate, Error>;

    /// Equality used for the leading keys of each OR-branch.
    ///
    /// # Errors
    /// Returns an error if the value cannot be bound.
    fn compare_equal(
        &mut self,
        expression: Self::Expression,
        value: &Value,
    ) -> Result<Self::Predicate, Error>;

    fn and(&mut self, predicates: Vec<Self::Predicate>) -> Self::Predicate;

    fn or(&mut self, predicates: Vec<Self::Predicate>) -> Self::Predicate;
}

/// Direction-aware keyset predicate and result handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeysetScrollDelegate {
    direction: ScrollDirection,
}

impl KeysetScrollDelegate {
    #[must_use]
    pub fn of(direction: ScrollDirection) -> Self {
        Self { direction }
    }

    /// Sort to run the query with.
    pub fn sort_orders(&self, sort: &Sort) -> Sort {
        match self.direction {
            ScrollDirection::Forward => sort.clone(),
            ScrollDirection::Backward => sort.reversed(),
        }
    }

    /// Build the keyset predicate; `None` for an initial position.
    ///
    /// `sort` must be the effective sort as returned by
    /// [`KeysetScrollDelegate::sort_orders`].
    ///
    /// # Errors
    /// Returns `Error::InvalidScrollPosition` when the position lacks a value
    /// for a sort key, and propagates strategy errors.
    pub fn create_predicate<S: QueryStrategy>(
        &self,
        position: &ScrollPosition,
        sort: &Sort,
        strategy: &mut S,
    ) -> Result<Option<S::Predicate>, Error> {
        if position.is_initial() {
            return Ok(None);
        }
        let mut branches = Vec::with_capacity(sort.0.len());
        for (i, order) in sort.0.iter().enumerate() {
            let mut constraint = Vec::with_capacity(i + 1);
            for inner in &sort.0[..i] {
                let expr = strategy.create_expression(&inner.property)?;
                constraint.push(strategy.compare_equal(expr, key_value(position, &inner.property)?)?);
            }
            let expr = strategy.create_expression(&order.property)?;
            constraint.push(strategy.compare(order, expr, key_value(position, &order.property)?)?);
            branches.push(strategy.and(constraint));
        }
        Ok(Some(strategy.or(branches)))
    }

    /// Restore requested order of rows fetched with the effective sort.
    pub fn post_process<T>(&self, mut rows: Vec<T>) -> Vec<T> {
        if self.direction == ScrollDirection::Backward {
            rows.reverse();
        }
        rows
    }
}

fn key_value<'a>(position: &'a ScrollPosition, property: &str) -> Result<&'a Value, Error> {
    position
        .key(property)
        .ok_or_else(|| Error::InvalidScrollPosition(format!("no keyset value for `{property}`")))
}

/// Sort for keyset scrolling: the requested sort plus identifier tie-breakers,
/// reversed for backward scrolling.
pub fn create_sort(position: &ScrollPosition, sort: &Sort, ids: &[String]) -> Sort {
    let mut with_ids = sort.clone();
    for id in ids {
        with_ids = with_ids.ensure_tiebreaker(id, Direction::Asc);
    }
    KeysetScrollDelegate::of(position.direction()).sort_orders(&with_ids)
}

/// Assemble a window from rows fetched with one extra row of lookahead.
///
/// `key_of` extracts the sort-key values of a row for keyset positions.
///
/// # Errors
/// Returns `Error::InvalidScrollPosition` if an offset position runs past
/// the last representable row and propagates errors from `key_of`.
pub fn window_from<T, F>(
    mut rows: Vec<T>,
    limit: Option<u64>,
    position: &ScrollPosition,
    mut key_of: F,
) -> Result<Window<T>, Error>
where
    F: FnMut(&T) -> Result<Vec<(String, Value)>, Error>,
{
    let has_next = match limit.and_then(|l| usize::try_from(l).ok()) {
        Some(l) if rows.len() > l => {
            rows.truncate(l);
            true
        }
        _ => false,
    };
    let rows = KeysetScrollDelegate::of(position.direction()).post_process(rows);

    let positions = match position {
        ScrollPosition::Offset(_) => {
            let start = position.start_offset()?;
            let mut out = Vec::with_capacity(rows.len());
            for i in 0..rows.len() as u64 {
                let offset = start
                    .checked_add(i)
                    .ok_or_else(|| Error::InvalidScrollPosition("offset out of range".to_owned()))?;
                out.push(ScrollPosition::Offset(Some(offset)));
            }
            out
        }
        ScrollPosition::Keyset { direction, .. } => {
            let mut out = Vec::with_capacity(rows.len());
            for row in &rows {
                out.push(ScrollPosition::Keyset {
                    keys: key_of(row)?,
                    direction: *direction,
                });
            }
            out
        }
    };
    Ok(Window {
        items: rows,
        positions,
        has_next,
    })
}

/// Keyset predicates rendered as query text with named parameters.
#[derive(Debug, Default)]
pub struct JpqlStrategy {
    alias: Option<String>,
    prefix: String,
    /// Bound values, in parameter order.
    pub parameters: Vec<(String, Value)>,
}

impl JpqlStrategy {
    #[must_use]
    pub fn new(alias: Option<&str>) -> Self {
        Self {
            alias: alias.map(str::to_owned),
            prefix: "keyset_".to_owned(),
            parameters: Vec::new(),
        }
    }

    fn bind(&mut self, value: &Value) -> String {
        let name = format!("{}{}", self.prefix, self.parameters.len());
        self.parameters.push((name.clone(), value.clone()));
        format!(":{name}")
    }
}

impl QueryStrategy for JpqlStrategy {
    type Expression = String;
    type Predicate = String;

    fn create_expression(&mut self, property: &str) -> Result<String, Error> {
        Ok(match &self.alias {
            Some(a) => format!("{a}.{property}"),
            None => property.to_owned(),
        })
    }

    fn compare(&mut self, order: &Order, expression: String, value: &Value) -> Result<String, Error> {
        Ok(match (value.is_null(), order.direction) {
            (true, Direction::Asc) => format!("{expression} is null"),
            (true, Direction::Desc) => format!("{expression} is not null"),
            (false, Direction::Asc) => format!("{expression} > {}", self.bind(value)),
            (false, Direction::Desc) => format!("{expression} < {}", self.bind(value)),
        })
    }

    fn compare_equal(&mut self, expression: String, value: &Value) -> Result<String, Error> {
        Ok(if value.is_null() {
            format!("{expression} is null")
        } else {
            format!("{expression} = {}", self.bind(value))
        })
    }

    fn and(&mut self, predicates: Vec<String>) -> String {
        if predicates.len() == 1 {
            predicates.into_iter().collect()
        } else {
            format!("({})", predicates.join(" and "))
        }
    }

    fn or(&mut self, predicates: Vec<String>) -> String {
        predicates.join(" or ")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn keyset(pos: &ScrollPosition, sort: &Sort) -> (String, Vec<(String, Value)>) {
        let effective = create_sort(pos, sort, &["id".to_owned()]);
        let mut strategy = JpqlStrategy::new(Some("u"));
        let pred = KeysetScrollDelegate::of(pos.direction())
            .create_predicate(pos, &effective, &mut strategy)
            .unwrap()
            .unwrap();
        (pred, strategy.parameters)
    }

    #[test]
    fn forward_selects_greater_ids() {
        let pos = ScrollPosition::forward(vec![("id".to_owned(), Value::from(5))]);
        let (pred, params) = keyset(&pos, &Sort::by([Order::asc("id")]));
        assert_eq!(pred, "u.id > :keyset_0");
        assert_eq!(params, vec![("keyset_0".to_owned(), Value::from(5))]);
    }

    #[test]
    fn backward_selects_lower_ids() {
        let pos = ScrollPosition::backward(vec![("id".to_owned(), Value::from(5))]);
        let (pred, _) = keyset(&pos, &Sort::by([Order::asc("id")]));
        assert_eq!(pred, "u.id < :keyset_0");
    }

    #[test]
    fn multi_key_chain_with_tiebreaker() {
        let pos = ScrollPosition::forward(vec![
            ("lastname".to_owned(), Value::from("Doe")),
            ("id".to_owned(), Value::from(7)),
        ]);
        let (pred, _) = keyset(&pos, &Sort::by([Order::desc("lastname")]));
        assert_eq!(
            pred,
            "u.lastname < :keyset_0 or (u.lastname = :keyset_1 and u.id > :keyset_2)"
        );
    }

    #[test]
    fn missing_key_is_rejected() {
        let pos = ScrollPosition::forward(vec![("id".to_owned(), Value::from(1))]);
        let sort = create_sort(&pos, &Sort::by([Order::asc("age")]), &["id".to_owned()]);
        let err = KeysetScrollDelegate::of(ScrollDirection::Forward)
            .create_predicate(&pos, &sort, &mut JpqlStrategy::new(None))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidScrollPosition(_)));
    }

    #[test]
    fn token_round_trip_preserves_kinds() {
        let pos = ScrollPosition::backward(vec![
            ("name".to_owned(), Value::from("a")),
            ("id".to_owned(), Value::from(3)),
            ("deleted".to_owned(), Value::Null),
        ]);
        let back = ScrollPosition::decode(&pos.encode().unwrap()).unwrap();
        assert_eq!(back, pos);
        assert!(ScrollPosition::decode("not-a-token").is_err());
    }

    #[test]
    fn offset_window_positions_continue_past_last_row() {
        let pos = ScrollPosition::Offset(Some(4));
        let window = window_from(vec!['a', 'b', 'c'], Some(2), &pos, |_| Ok(Vec::new())).unwrap();
        assert_eq!(window.items, vec!['a', 'b']);
        assert!(window.has_next);
        assert_eq!(window.next_position(), Some(&ScrollPosition::Offset(Some(6))));
    }

    #[test]
    fn offset_at_the_end_of_the_range_is_rejected() {
        let last = ScrollPosition::Offset(Some(u64::MAX));
        let token = last.encode().unwrap();
        assert!(matches!(
            ScrollPosition::decode(&token),
            Err(Error::InvalidScrollPosition(_))
        ));
        assert!(matches!(last.start_offset(), Err(Error::InvalidScrollPosition(_))));
        assert!(matches!(
            window_from(vec!['a'], None, &last, |_| Ok(Vec::new())),
            Err(Error::InvalidScrollPosition(_))
        ));

        let near = ScrollPosition::Offset(Some(u64::MAX - 2));
        assert!(matches!(
            window_from(vec!['a', 'b', 'c'], None, &near, |_| Ok(Vec::new())),
            Err(Error::InvalidScrollPosition(_))
        ));
        let window = window_from(vec!['a'], None, &near, |_| Ok(Vec::new())).unwrap();
        assert_eq!(window.positions, vec![ScrollPosition::Offset(Some(u64::MAX - 1))]);
    }
}

//! Derived-query method name parsing.
//!
//! `findDistinctTop3ByLastnameAndAgeGreaterThanOrderByFirstnameDesc` parses
//! into a [`Subject`] (`Distinct`, limit 3), one OR-group with two parts and
//! a trailing sort. Every property path is resolved against the
//! [`Metamodel`] while parsing, so an invalid method name is rejected before
//! any query runs.

mod operator;
mod property_path;

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;
use tracing::debug;

pub use operator::Operator;
pub use property_path::{PathSegment, PropertyPath};

use crate::metamodel::Metamodel;
use crate::options::{IgnoreCase, QueryOptions};
use crate::sort::{Direction, Order, Sort};
use crate::Error;

static PREFIX: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^(find|read|get|query|search|stream|count|exists|delete|remove)(\p{Lu}.*?)??By")
});

static SUBJECT_ONLY: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^(find|read|get|query|search|stream|count|exists|delete|remove)(\p{Lu}\w*)?$")
});

static LIMITING: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(First|Top)(\d*)"));

static ALL_IGNORE_CASE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"AllIgnor(?:ing|e)Case"));

type CacheKey = (String, String, QueryOptions);

static CACHE: LazyLock<DashMap<CacheKey, Arc<PartTree>>> = LazyLock::new(DashMap::new);

fn regex(cell: &'static LazyLock<Result<Regex, regex::Error>>) -> Result<&'static Regex, Error> {
    cell.as_ref()
        .map_err(|e| Error::InvalidArgument(format!("invalid built-in pattern: {e}")))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Select,
    Count,
    Exists,
    Delete,
}

/// The part of a method name before `By`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subject {
    pub action: Action,
    pub distinct: bool,
    pub max_results: Option<u64>,
}

impl Subject {
    fn parse(verb: &str, text: &str) -> Result<Self, Error> {
        let action = match verb {
            "count" => Action::Count,
            "exists" => Action::Exists,
            "delete" | "remove" => Action::Delete,
            _ => Action::Select,
        };
        let max_results = match regex(&LIMITING)?.captures(text) {
            Some(c) => {
                let digits = c.get(2).map_or("", |m| m.as_str());
                Some(if digits.is_empty() {
                    1
                } else {
                    digits.parse::<u64>().map_err(|_| Error::Parse {
                        method: text.to_owned(),
                        segment: digits.to_owned(),
                    })?
                })
            }
            None => None,
        };
        Ok(Self {
            action,
            distinct: text.contains("Distinct"),
            max_results,
        })
    }

    #[must_use]
    pub fn is_limiting(&self) -> bool {
        self.max_results.is_some()
    }
}

/// A single property comparison.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Part {
    pub path: PropertyPath,
    pub operator: Operator,
    pub ignore_case: IgnoreCase,
}

impl Part {
    fn parse(
        source: &str,
        domain: &str,
        model: &Metamodel,
        default_case: IgnoreCase,
    ) -> Result<Self, Error> {
        let (source, ignore_case) = strip_ignore_case(source, default_case);

        // Every keyword suffix with a resolvable remainder is a candidate,
        // as is the bare token read as an equality.
        let mut best: Option<(PropertyPath, Operator)> = None;
        for op in Operator::ALL {
            for kw in op.keywords() {
                let Some(rest) = source.strip_suffix(kw) else {
                    continue;
                };
                if let Ok(path) = PropertyPath::from_source(rest, domain, model) {
                    consider(&mut best, path, op);
                }
            }
        }
        match PropertyPath::from_source(source, domain, model) {
            Ok(path) => consider(&mut best, path, Operator::SimpleProperty),
            Err(e) if best.is_none() => return Err(e),
            Err(_) => {}
        }
        let (path, operator) = best.ok_or_else(|| Error::Parse {
            method: domain.to_owned(),
            segment: source.to_owned(),
        })?;

        if ignore_case == IgnoreCase::Always {
            let textual = path.leaf_kind().field_kind().is_some_and(|k| k.is_textual());
            if !textual {
                return Err(Error::IgnoreCaseUnsupported {
                    property: path.dotted(),
                    kind: path.leaf_kind().to_string(),
                });
            }
        }

        Ok(Self {
            path,
            operator,
            ignore_case,
        })
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.operator.arity()
    }

    /// Whether this comparison folds case once the property kind is known.
    #[must_use]
    pub fn folds_case(&self) -> bool {
        match self.ignore_case {
            IgnoreCase::Never => false,
            IgnoreCase::Always => true,
            IgnoreCase::WhenPossible => self
                .path
                .leaf_kind()
                .field_kind()
                .is_some_and(|k| k.is_textual()),
        }
    }
}

fn consider(best: &mut Option<(PropertyPath, Operator)>, path: PropertyPath, op: Operator) {
    let better = match best {
        Some((current, _)) => path.weight() > current.weight(),
        None => true,
    };
    if better {
        *best = Some((path, op));
    }
}

fn strip_ignore_case(source: &str, default_case: IgnoreCase) -> (&str, IgnoreCase) {
    for suffix in ["IgnoreCase", "IgnoringCase"] {
        if let Some(rest) = source.strip_suffix(suffix) {
            return (rest, IgnoreCase::Always);
        }
    }
    (source, default_case)
}

/// Parts joined with `And`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrPart {
    pub parts: Vec<Part>,
}

/// Parsed derived-query method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartTree {
    pub domain: String,
    pub subject: Subject,
    pub ors: Vec<OrPart>,
    pub sort: Sort,
}

impl PartTree {
    /// Parse `method` against the `domain` entity.
    ///
    /// # Errors
    /// Returns `Error::Parse` when the name does not follow the grammar and
    /// `Error::InvalidPath` when a property is not declared on the domain.
    pub fn parse(
        method: &str,
        domain: &str,
        model: &Metamodel,
        options: &QueryOptions,
    ) -> Result<Self, Error> {
        model.entity(domain)?;
        let parse_err = |segment: &str| Error::Parse {
            method: method.to_owned(),
            segment: segment.to_owned(),
        };

        let (subject, predicate) = if let Some(c) = regex(&PREFIX)?.captures(method) {
            let verb = c.get(1).map_or("", |m| m.as_str());
            let subject_text = c.get(2).map_or("", |m| m.as_str());
            let rest = &method[c.get(0).map_or(0, |m| m.end())..];
            (Subject::parse(verb, subject_text)?, rest)
        } else if let Some(c) = regex(&SUBJECT_ONLY)?.captures(method) {
            let verb = c.get(1).map_or("", |m| m.as_str());
            let subject_text = c.get(2).map_or("", |m| m.as_str());
            (Subject::parse(verb, subject_text)?, "")
        } else {
            return Err(parse_err(method));
        };

        let all_ignore = regex(&ALL_IGNORE_CASE)?;
        let (predicate, default_case) = if all_ignore.is_match(predicate) {
            (all_ignore.replace_all(predicate, "").into_owned(), IgnoreCase::WhenPossible)
        } else {
            (predicate.to_owned(), options.ignore_case)
        };

        let mut sections = split_keyword(&predicate, "OrderBy");
        if sections.len() > 2 {
            return Err(parse_err("OrderBy"));
        }
        let criteria = sections.remove(0);
        let sort = match sections.pop() {
            Some(order_by) => parse_order_by(order_by, domain, model).map_err(|e| match e {
                Error::Parse { segment, .. } => parse_err(&segment),
                other => other,
            })?,
            None => Sort::unsorted(),
        };

        let mut ors = Vec::new();
        if !criteria.is_empty() {
            for or_source in split_keyword(criteria, "Or") {
                if or_source.is_empty() {
                    return Err(parse_err("Or"));
                }
                let mut parts = Vec::new();
                for part_source in split_keyword(or_source, "And") {
                    if part_source.is_empty() {
                        return Err(parse_err("And"));
                    }
                    parts.push(Part::parse(part_source, domain, model, default_case)?);
                }
                ors.push(OrPart { parts });
            }
        }

        let tree = Self {
            domain: domain.to_owned(),
            subject,
            ors,
            sort,
        };
        debug!(method, domain, parts = tree.parts().count(), "parsed derived query");
        Ok(tree)
    }

    /// Parse through the process-wide cache.
    ///
    /// Entries are keyed by domain, method and options; the metamodel for a
    /// given domain name is assumed not to change for the process lifetime.
    ///
    /// # Errors
    /// Same as [`PartTree::parse`]; failures are not cached.
    pub fn cached(
        method: &str,
        domain: &str,
        model: &Metamodel,
        options: &QueryOptions,
    ) -> Result<Arc<Self>, Error> {
        let key = (domain.to_owned(), method.to_owned(), *options);
        if let Some(hit) = CACHE.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }
        let parsed = Arc::new(Self::parse(method, domain, model, options)?);
        Ok(Arc::clone(CACHE.entry(key).or_insert(parsed).value()))
    }

    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.ors.iter().flat_map(|o| o.parts.iter())
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.parts().map(Part::parameter_count).sum()
    }

    #[must_use]
    pub fn is_distinct(&self) -> bool {
        self.subject.distinct
    }

    #[must_use]
    pub fn max_results(&self) -> Option<u64> {
        self.subject.max_results
    }

    #[must_use]
    pub fn action(&self) -> Action {
        self.subject.action
    }

    /// Whether any part performs vector similarity search.
    #[must_use]
    pub fn is_vector_search(&self) -> bool {
        self.parts().any(|p| p.operator.is_vector_search())
    }
}

/// Split on `keyword` occurrences followed by an uppercase letter.
fn split_keyword<'a>(text: &'a str, keyword: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while let Some(found) = text[i..].find(keyword) {
        let at = i + found;
        let after = at + keyword.len();
        let boundary = text[after..]
            .chars()
            .next()
            .is_some_and(|c| c.is_uppercase() || !c.is_ascii());
        if boundary {
            out.push(&text[start..at]);
            start = after;
        }
        i = after;
    }
    out.push(&text[start..]);
    out
}

fn parse_order_by(source: &str, domain: &str, model: &Metamodel) -> Result<Sort, Error> {
    let mut orders = Vec::new();
    let mut rest = source;
    while !rest.is_empty() {
        let cut = direction_boundary(rest);
        let (chunk, tail) = rest.split_at(cut);
        rest = tail;
        let (prop, direction) = if let Some(p) = chunk.strip_suffix("Desc") {
            (p, Direction::Desc)
        } else if let Some(p) = chunk.strip_suffix("Asc") {
            (p, Direction::Asc)
        } else {
            (chunk, Direction::Asc)
        };
        if prop.is_empty() {
            return Err(Error::Parse {
                method: source.to_owned(),
                segment: chunk.to_owned(),
            });
        }
        let path = PropertyPath::from_source(prop, domain, model)?;
        orders.push(Order::by(path.dotted(), direction));
    }
    if orders.is_empty() {
        return Err(Error::Parse {
            method: source.to_owned(),
            segment: "OrderBy".to_owned(),
        });
    }
    Ok(Sort::by(orders))
}

/// End of the first chunk terminated by `Asc`/`Desc` and an uppercase letter.
fn direction_boundary(text: &str) -> usize {
    for (i, _) in text.char_indices() {
        for kw in ["Desc", "Asc"] {
            if text[i..].starts_with(kw) {
                let end = i + kw.len();
                let next_upper = text[end..].chars().next().is_some_and(char::is_uppercase);
                if i > 0 && next_upper {
                    return end;
                }
            }
        }
    }
    text.len()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::FieldKind;
    use crate::metamodel::EntityType;

    fn model() -> Metamodel {
        Metamodel::new()
            .with(
                EntityType::new("User")
                    .id("id", FieldKind::I64)
                    .basic("lastname", FieldKind::String)
                    .basic("firstname", FieldKind::String)
                    .basic("age", FieldKind::I64)
                    .basic("active", FieldKind::Bool)
                    .basic("title_in", FieldKind::String)
                    .embedded("address", "Address")
                    .collection("roles", "Role"),
            )
            .with(EntityType::new("Address").basic("city", FieldKind::String))
            .with(EntityType::new("Role").id("id", FieldKind::I64).basic("name", FieldKind::String))
    }

    fn parse(method: &str) -> Result<PartTree, Error> {
        PartTree::parse(method, "User", &model(), &QueryOptions::default())
    }

    #[test]
    fn lastname_and_firstname_starting_with() {
        let tree = parse("findByLastnameAndFirstnameStartingWith").unwrap();
        assert_eq!(tree.ors.len(), 1);
        let ops: Vec<_> = tree.parts().map(|p| (p.path.dotted(), p.operator)).collect();
        assert_eq!(
            ops,
            vec![
                ("lastname".to_owned(), Operator::SimpleProperty),
                ("firstname".to_owned(), Operator::StartingWith)
            ]
        );
        assert_eq!(tree.parameter_count(), 2);
    }

    #[test]
    fn subject_modifiers() {
        let tree = parse("findDistinctTop3ByAgeGreaterThan").unwrap();
        assert!(tree.is_distinct());
        assert_eq!(tree.max_results(), Some(3));
        let tree = parse("findFirstByLastname").unwrap();
        assert_eq!(tree.max_results(), Some(1));
        assert_eq!(parse("countByActiveTrue").unwrap().action(), Action::Count);
        assert_eq!(parse("removeByAgeBetween").unwrap().action(), Action::Delete);
        assert_eq!(parse("existsByLastname").unwrap().action(), Action::Exists);
    }

    #[test]
    fn or_groups_and_order_by() {
        let tree = parse("findByLastnameOrAgeLessThanEqualOrderByFirstnameDescAgeAsc").unwrap();
        assert_eq!(tree.ors.len(), 2);
        assert_eq!(tree.ors[1].parts[0].operator, Operator::LessThanEqual);
        assert_eq!(tree.sort.to_string(), "firstname: DESC, age: ASC");
    }

    #[test]
    fn nested_and_collection_paths() {
        let tree = parse("findByAddressCityAndRolesNameIn").unwrap();
        let paths: Vec<_> = tree.parts().map(|p| p.path.dotted()).collect();
        assert_eq!(paths, vec!["address.city", "roles.name"]);
        assert_eq!(tree.ors[0].parts[1].operator, Operator::In);
    }

    #[test]
    fn longest_property_path_wins_over_keyword() {
        let tree = parse("findByTitleIn").unwrap();
        let part = &tree.ors[0].parts[0];
        assert_eq!(part.path.dotted(), "title_in");
        assert_eq!(part.operator, Operator::SimpleProperty);
    }

    #[test]
    fn ignore_case_variants() {
        let tree = parse("findByLastnameIgnoreCase").unwrap();
        assert_eq!(tree.ors[0].parts[0].ignore_case, IgnoreCase::Always);
        let tree = parse("findByLastnameAndAgeAllIgnoreCase").unwrap();
        assert!(tree.ors[0].parts[0].folds_case());
        assert!(!tree.ors[0].parts[1].folds_case());
        assert!(matches!(
            parse("findByAgeIgnoreCase"),
            Err(Error::IgnoreCaseUnsupported { .. })
        ));
    }

    #[test]
    fn unknown_property_fails_fast() {
        let err = parse("findByNickname").unwrap_err();
        assert!(matches!(err, Error::InvalidPath { ref segment, .. } if segment == "nickname"));
    }

    #[test]
    fn bad_grammar_names_segment() {
        assert!(matches!(parse("frobnicate"), Err(Error::Parse { .. })));
        assert!(matches!(
            parse("findByLastnameAnd"),
            Err(Error::InvalidPath { .. } | Error::Parse { .. })
        ));
    }

    #[test]
    fn subject_only_selects_everything() {
        let tree = parse("findAll").unwrap();
        assert!(tree.ors.is_empty());
        assert_eq!(tree.parameter_count(), 0);
    }

    #[test]
    fn cache_returns_shared_tree() {
        let model = model();
        let opts = QueryOptions::default();
        let a = PartTree::cached("findByAge", "User", &model, &opts).unwrap();
        let b = PartTree::cached("findByAge", "User", &model, &opts).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}

#![allow(clippy::unwrap_used, clippy::expect_used)]

use modkit_query::aot::RepositoryContributor;
use modkit_query::jpql::parse_select;
use modkit_query::metamodel::{EntityType, Metamodel};
use modkit_query::part_tree::{Operator, PartTree};
use modkit_query::plan::{
    DeclaredQuery, Invocation, MethodDescriptor, RepositoryInformation, plan_method,
};
use modkit_query::returned_type::{ProjectionType, ReturnedType, TypeRegistry};
use modkit_query::scroll::{JpqlStrategy, KeysetScrollDelegate, ScrollDirection, ScrollPosition};
use modkit_query::token::QueryTokenStream;
use modkit_query::transform::{QueryTransformer, Rewrite};
use modkit_query::{FieldKind, Order, QueryOptions, Sort, Value};

fn model() -> Metamodel {
    Metamodel::new().with(
        EntityType::new("User")
            .id("id", FieldKind::I64)
            .basic("firstname", FieldKind::String)
            .basic("lastname", FieldKind::String)
            .basic("age", FieldKind::I64),
    )
}

fn types() -> TypeRegistry {
    TypeRegistry::new().with(ProjectionType::dto(
        "UserDto",
        [
            ("firstname", Some(FieldKind::String)),
            ("lastname", Some(FieldKind::String)),
        ],
    ))
}

#[test]
fn derived_name_yields_two_and_parts() {
    let tree = PartTree::parse(
        "findByLastnameAndFirstnameStartingWith",
        "User",
        &model(),
        &QueryOptions::default(),
    )
    .unwrap();
    assert_eq!(tree.ors.len(), 1);
    let parts = &tree.ors[0].parts;
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].path.dotted(), "lastname");
    assert_eq!(parts[0].operator, Operator::SimpleProperty);
    assert_eq!(parts[1].path.dotted(), "firstname");
    assert_eq!(parts[1].operator, Operator::StartingWith);
    assert_eq!(tree.parameter_count(), 2);
}

#[test]
fn token_stream_rendering_is_associative() {
    let x = QueryTokenStream::of(["select", "u"]);
    let mut y = QueryTokenStream::of(["from", "User"]);
    y.append_inline_text(" u");

    let mut block = QueryTokenStream::new();
    block.append_stream(x.clone()).append_stream(y.clone());
    assert_eq!(block.render(), format!("{} {}", x.render(), y.render()));

    let mut inline = QueryTokenStream::new();
    inline.append_inline(x.clone()).append_inline(y.clone());
    assert_eq!(inline.render(), format!("{}{}", x.render(), y.render()));
}

#[test]
fn injected_sort_reparses_with_a_single_order_by() {
    let sort = Sort::by([Order::asc("lastname")]);
    let out = QueryTransformer::new()
        .rewrite(
            "select u from User u where u.age > :age",
            Rewrite {
                sort: Some(&sort),
                ..Rewrite::default()
            },
        )
        .unwrap();
    let reparsed = parse_select(&out).unwrap();
    assert_eq!(reparsed.branches.len(), 1);
    assert_eq!(reparsed.branches[0].order_by.len(), 1);
}

#[test]
fn union_sort_lands_on_final_order_by_only() {
    let sort = Sort::by([Order::asc("y")]);
    let out = QueryTransformer::new()
        .rewrite(
            "SELECT a.x FROM A a UNION SELECT b.x FROM B b ORDER BY x",
            Rewrite {
                sort: Some(&sort),
                ..Rewrite::default()
            },
        )
        .unwrap();
    let reparsed = parse_select(&out).unwrap();
    assert!(reparsed.branches[0].order_by.is_empty());
    assert_eq!(reparsed.branches[1].order_by.len(), 2);
    assert!(out.ends_with("order by x, b.y asc"));
}

#[test]
fn dto_rewrite_preserves_where_clause() {
    let m = model();
    let returned = ReturnedType::of("UserDto", "User", &m, &types()).unwrap();
    let out = QueryTransformer::with_metamodel(&m)
        .rewrite(
            "SELECT u FROM User u WHERE u.lastname = :lastname",
            Rewrite {
                returned: Some(&returned),
                ..Rewrite::default()
            },
        )
        .unwrap();
    assert_eq!(
        out,
        "select new UserDto(u.firstname, u.lastname) from User u where u.lastname = :lastname"
    );
}

#[test]
fn keyset_predicate_follows_direction() {
    let sort = Sort::by([Order::asc("id")]);
    let keys = vec![("id".to_owned(), Value::from(5))];

    let mut forward = JpqlStrategy::new(Some("u"));
    let predicate = KeysetScrollDelegate::of(ScrollDirection::Forward)
        .create_predicate(&ScrollPosition::forward(keys.clone()), &sort, &mut forward)
        .unwrap();
    assert_eq!(predicate.as_deref(), Some("u.id > :keyset_0"));
    assert_eq!(forward.parameters, vec![("keyset_0".to_owned(), Value::from(5))]);

    let delegate = KeysetScrollDelegate::of(ScrollDirection::Backward);
    let mut backward = JpqlStrategy::new(Some("u"));
    let predicate = delegate
        .create_predicate(
            &ScrollPosition::backward(keys),
            &delegate.sort_orders(&sort),
            &mut backward,
        )
        .unwrap();
    assert_eq!(predicate.as_deref(), Some("u.id < :keyset_0"));
}

#[test]
fn generated_plans_compile_like_runtime_plans() {
    let repo = RepositoryInformation::new("User", model()).with_types(types());
    let methods = [
        MethodDescriptor::new("findTop2ByAgeGreaterThanOrderByLastnameAsc", "User").param("age"),
        MethodDescriptor::new("findByFirstnameContaining", "UserDto").param("part"),
        MethodDescriptor::new("byLastname", "UserDto")
            .param("lastname")
            .query(DeclaredQuery::jpql("select u from User u where u.lastname = :lastname")),
    ];
    let generated = RepositoryContributor::new("UserRepository", &repo)
        .contribute(&methods)
        .unwrap();
    assert!(generated.fallbacks.is_empty());

    let invocation = Invocation::sorted(Sort::by([Order::desc("age")]));
    for method in &methods {
        let runtime = plan_method(&repo, method)
            .unwrap()
            .compile(&repo, &invocation)
            .unwrap();
        let ahead = generated
            .method(&method.name)
            .unwrap()
            .compile(&repo, &invocation)
            .unwrap();
        assert_eq!(runtime.query, ahead.query, "{}", method.name);
        assert_eq!(runtime.bindings, ahead.bindings, "{}", method.name);
        assert_eq!(runtime.max_results, ahead.max_results, "{}", method.name);
    }
}

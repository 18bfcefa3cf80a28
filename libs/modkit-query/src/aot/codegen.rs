use heck::ToSnakeCase;
use proc_macro2::{Ident, Span, TokenStream};
use quote::quote;

use super::GeneratedRepository;
use crate::creator::{BindingTransform, LikeKind, ParameterBinding};
use crate::hints::QueryHints;
use crate::plan::{PlannedQuery, PreparedQuery, QueryOrigin, QueryPlan};
use crate::returned_type::{ConstructorParam, ReturnedType};
use crate::sort::{Direction, NullHandling, Sort};
use crate::Error;

const RESERVED: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern",
    "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub",
    "ref", "return", "self", "static", "struct", "super", "trait", "true", "type", "unsafe", "use",
    "where", "while", "yield",
];

impl GeneratedRepository {
    /// Render the repository as a Rust module.
    ///
    /// The module holds one `<method>_plan()` constructor and one
    /// `<method>()` compile function per planned method, a `plans()` list
    /// and the `FALLBACKS` the runtime planner must handle.
    ///
    /// # Errors
    /// Returns `Error::InvalidArgument` if a name cannot become an
    /// identifier or a plan still holds an unrendered derived query.
    pub fn to_source(&self) -> Result<String, Error> {
        Ok(self.to_tokens()?.to_string())
    }

    fn to_tokens(&self) -> Result<TokenStream, Error> {
        let module = ident(&self.name)?;
        let domain = self.domain.as_str();
        let fallbacks = self.fallbacks.iter().map(String::as_str);

        let mut functions = Vec::with_capacity(self.methods.len());
        let mut constructors = Vec::with_capacity(self.methods.len());
        for plan in &self.methods {
            let name = ident(&plan.method)?;
            let plan_fn = ident(&format!("{}_plan", plan.method.to_snake_case()))?;
            let body = plan_tokens(plan)?;
            functions.push(quote! {
                #[must_use]
                pub fn #plan_fn() -> QueryPlan {
                    #body
                }

                pub fn #name(
                    repo: &RepositoryInformation,
                    invocation: &Invocation,
                ) -> Result<CompiledQuery, Error> {
                    #plan_fn().compile(repo, invocation)
                }
            });
            constructors.push(plan_fn);
        }

        Ok(quote! {
            #[allow(unused_imports, clippy::all, clippy::pedantic)]
            pub mod #module {
                use ::modkit_query::creator::{BindingTransform, LikeKind, ParameterBinding};
                use ::modkit_query::hints::{QueryHint, QueryHints};
                use ::modkit_query::plan::{
                    CompiledQuery, Invocation, PlannedQuery, PreparedQuery, QueryOrigin, QueryPlan,
                    RepositoryInformation,
                };
                use ::modkit_query::returned_type::{ConstructorParam, ReturnedType};
                use ::modkit_query::{Direction, Error, FieldKind, NullHandling, Order, Sort};

                pub const DOMAIN: &str = #domain;
                pub const FALLBACKS: &[&str] = &[#(#fallbacks),*];

                #(#functions)*

                #[must_use]
                pub fn plans() -> Vec<QueryPlan> {
                    vec![#(#constructors()),*]
                }
            }
        })
    }
}

fn ident(name: &str) -> Result<Ident, Error> {
    let snake = name.to_snake_case();
    let valid = snake
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && snake.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(Error::InvalidArgument(format!(
            "`{name}` cannot be used as a generated identifier"
        )));
    }
    let snake = if RESERVED.contains(&snake.as_str()) {
        format!("{snake}_")
    } else {
        snake
    };
    Ok(Ident::new(&snake, Span::call_site()))
}

fn variant(name: &str) -> Ident {
    Ident::new(name, Span::call_site())
}

fn opt_string(value: Option<&str>) -> TokenStream {
    match value {
        Some(s) => quote!(Some(#s.to_owned())),
        None => quote!(None),
    }
}

fn plan_tokens(plan: &QueryPlan) -> Result<TokenStream, Error> {
    let PlannedQuery::Prepared(prepared) = &plan.query else {
        return Err(Error::InvalidArgument(format!(
            "method `{}` has no rendered query",
            plan.method
        )));
    };
    let method = plan.method.as_str();
    let domain = plan.domain.as_str();
    let origin = variant(match plan.origin {
        QueryOrigin::Declared => "Declared",
        QueryOrigin::Derived => "Derived",
    });
    let returned = returned_tokens(&plan.returned);
    let query = prepared_tokens(prepared);
    let hints = hints_tokens(&plan.hints);
    Ok(quote! {
        QueryPlan {
            method: #method.to_owned(),
            domain: #domain.to_owned(),
            origin: QueryOrigin::#origin,
            returned: #returned,
            query: PlannedQuery::Prepared(#query),
            hints: #hints,
        }
    })
}

fn prepared_tokens(p: &PreparedQuery) -> TokenStream {
    let query = p.query.as_str();
    let count = opt_string(p.count_query.as_deref());
    let bindings = p.bindings.iter().map(binding_tokens);
    let native = p.native;
    let modifying = p.modifying;
    let max_results = match p.max_results {
        Some(n) => quote!(Some(#n)),
        None => quote!(None),
    };
    let sort = sort_tokens(&p.sort);
    quote! {
        PreparedQuery {
            query: #query.to_owned(),
            count_query: #count,
            bindings: vec![#(#bindings),*],
            native: #native,
            modifying: #modifying,
            max_results: #max_results,
            sort: #sort,
        }
    }
}

fn sort_tokens(sort: &Sort) -> TokenStream {
    let orders = sort.iter().map(|o| {
        let property = o.property.as_str();
        let direction = variant(match o.direction {
            Direction::Asc => "Asc",
            Direction::Desc => "Desc",
        });
        let ignore_case = o.ignore_case;
        let null_handling = variant(match o.null_handling {
            NullHandling::Native => "Native",
            NullHandling::NullsFirst => "NullsFirst",
            NullHandling::NullsLast => "NullsLast",
        });
        quote! {
            Order {
                property: #property.to_owned(),
                direction: Direction::#direction,
                ignore_case: #ignore_case,
                null_handling: NullHandling::#null_handling,
            }
        }
    });
    quote!(Sort(vec![#(#orders),*]))
}

fn binding_tokens(b: &ParameterBinding) -> TokenStream {
    let placeholder = b.placeholder.as_str();
    let argument = b.argument;
    let transform = match b.transform {
        BindingTransform::Identity => quote!(BindingTransform::Identity),
        BindingTransform::Upper => quote!(BindingTransform::Upper),
        BindingTransform::RangeLower => quote!(BindingTransform::RangeLower),
        BindingTransform::RangeUpper => quote!(BindingTransform::RangeUpper),
        BindingTransform::Like { kind, escape } => {
            let kind = variant(match kind {
                LikeKind::Contains => "Contains",
                LikeKind::StartsWith => "StartsWith",
                LikeKind::EndsWith => "EndsWith",
            });
            let escape = match escape {
                Some(c) => quote!(Some(#c)),
                None => quote!(None),
            };
            quote!(BindingTransform::Like { kind: LikeKind::#kind, escape: #escape })
        }
    };
    quote!(ParameterBinding::new(#placeholder, #argument, #transform))
}

fn returned_tokens(r: &ReturnedType) -> TokenStream {
    match r {
        ReturnedType::Domain { domain, returned } => quote! {
            ReturnedType::Domain { domain: #domain.to_owned(), returned: #returned.to_owned() }
        },
        ReturnedType::Dto { domain, name, params } => {
            let params = params.iter().map(param_tokens);
            quote! {
                ReturnedType::Dto {
                    domain: #domain.to_owned(),
                    name: #name.to_owned(),
                    params: vec![#(#params),*],
                }
            }
        }
        ReturnedType::Interface {
            domain,
            name,
            properties,
        } => {
            let properties = properties.iter().map(String::as_str);
            quote! {
                ReturnedType::Interface {
                    domain: #domain.to_owned(),
                    name: #name.to_owned(),
                    properties: vec![#(#properties.to_owned()),*],
                }
            }
        }
        ReturnedType::Scalar { domain, name } => quote! {
            ReturnedType::Scalar { domain: #domain.to_owned(), name: #name.to_owned() }
        },
    }
}

fn param_tokens(p: &ConstructorParam) -> TokenStream {
    let name = p.name.as_str();
    let kind = match p.kind {
        Some(k) => {
            let k = variant(&k.to_string());
            quote!(Some(FieldKind::#k))
        }
        None => quote!(None),
    };
    quote!(ConstructorParam { name: #name.to_owned(), kind: #kind })
}

fn hints_tokens(hints: &QueryHints) -> TokenStream {
    let hints = hints.iter().map(|h| {
        let name = h.name.as_str();
        let value = h.value.as_str();
        let for_counting = h.for_counting;
        quote! {
            .with_hint(QueryHint {
                name: #name.to_owned(),
                value: #value.to_owned(),
                for_counting: #for_counting,
            })
        }
    });
    quote!(QueryHints::new() #(#hints)*)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::aot::RepositoryContributor;
    use crate::hints::TIMEOUT;
    use crate::metamodel::{EntityType, Metamodel};
    use crate::plan::{DeclaredQuery, MethodDescriptor, RepositoryInformation};
    use crate::FieldKind;

    #[test]
    fn renders_one_constructor_and_function_per_method() {
        let repo = RepositoryInformation::new(
            "User",
            Metamodel::new().with(
                EntityType::new("User")
                    .id("id", FieldKind::I64)
                    .basic("lastname", FieldKind::String),
            ),
        );
        let methods = [
            MethodDescriptor::new("findByLastnameStartingWith", "User")
                .param("prefix")
                .hints(QueryHints::new().with(TIMEOUT, "1s")),
            MethodDescriptor::new("type", "User").query(DeclaredQuery::jpql("select u from User u")),
            MethodDescriptor::new("findByLastnameOrderByIdDesc", "User").param("lastname"),
            MethodDescriptor::new("templated", "User").param("lastname").query(
                DeclaredQuery::jpql("select u from User u where u.lastname = :#{[0]}"),
            ),
        ];
        let source = RepositoryContributor::new("UserRepository", &repo)
            .contribute(&methods)
            .unwrap()
            .to_source()
            .unwrap();

        assert!(source.contains("pub mod user_repository"));
        assert!(source.contains("fn find_by_lastname_starting_with_plan"));
        assert!(source.contains("fn find_by_lastname_starting_with ("));
        assert!(source.contains("fn type_ ("));
        assert!(source.contains("\"select u from User u where u.lastname like ?1 escape '\\\\'\""));
        assert!(source.contains("LikeKind :: StartsWith"));
        assert!(source.contains("\"query.timeout\""));
        assert!(source.contains("FALLBACKS"));
        assert!(source.contains("\"templated\""));
        assert!(source.contains("\"select u from User u where u.lastname = ?1\""));
        assert!(source.contains("direction : Direction :: Desc"));
    }

    #[test]
    fn rejects_names_that_are_not_identifiers() {
        assert!(ident("find-by").is_err());
        assert_eq!(ident("findAll").unwrap().to_string(), "find_all");
    }
}

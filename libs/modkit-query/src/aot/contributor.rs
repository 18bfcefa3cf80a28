use tracing::{debug, info};

use super::GeneratedRepository;
use crate::plan::{MethodDescriptor, RepositoryInformation, plan_method};
use crate::Error;

/// Plans repository methods at build time.
pub struct RepositoryContributor<'a> {
    name: String,
    repo: &'a RepositoryInformation,
}

impl<'a> RepositoryContributor<'a> {
    pub fn new(name: impl Into<String>, repo: &'a RepositoryInformation) -> Self {
        Self {
            name: name.into(),
            repo,
        }
    }

    /// Plan every method, rendering derived queries to text.
    ///
    /// # Errors
    /// Any planning error fails generation; in particular an unresolvable
    /// return type is reported as `Error::UnresolvableReturnType` rather
    /// than deferred to runtime.
    pub fn contribute(&self, methods: &[MethodDescriptor]) -> Result<GeneratedRepository, Error> {
        let mut generated = GeneratedRepository {
            name: self.name.clone(),
            domain: self.repo.domain.clone(),
            methods: Vec::with_capacity(methods.len()),
            fallbacks: Vec::new(),
        };
        for method in methods {
            if method.query.as_ref().is_some_and(|q| q.has_template()) {
                debug!(
                    repository = %self.name,
                    method = %method.name,
                    "query uses template expressions; leaving method to the runtime planner"
                );
                generated.fallbacks.push(method.name.clone());
                continue;
            }
            let plan = plan_method(self.repo, method)?.ahead_of_time(self.repo)?;
            generated.methods.push(plan);
        }
        info!(
            repository = %self.name,
            generated = generated.methods.len(),
            fallbacks = generated.fallbacks.len(),
            "contributed repository"
        );
        Ok(generated)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::metamodel::{EntityType, Metamodel};
    use crate::plan::{DeclaredQuery, PlannedQuery, QueryOrigin};
    use crate::FieldKind;
    use tracing_test::traced_test;

    fn repo() -> RepositoryInformation {
        RepositoryInformation::new(
            "User",
            Metamodel::new().with(
                EntityType::new("User")
                    .id("id", FieldKind::I64)
                    .basic("lastname", FieldKind::String),
            ),
        )
    }

    #[test]
    #[traced_test]
    fn template_queries_fall_back() {
        let r = repo();
        let methods = [
            MethodDescriptor::new("findByLastname", "User").param("lastname"),
            MethodDescriptor::new("byEntity", "User")
                .query(DeclaredQuery::jpql("select u from #{#entityName} u")),
            MethodDescriptor::new("byTemplate", "User").param("lastname").query(
                DeclaredQuery::jpql("select u from User u where u.lastname = :#{[0]}"),
            ),
        ];
        let generated = RepositoryContributor::new("UserRepository", &r)
            .contribute(&methods)
            .unwrap();
        assert!(generated.is_fallback("byTemplate"));
        assert!(!generated.is_fallback("byEntity"));
        assert!(matches!(
            &generated.method("byEntity").unwrap().query,
            PlannedQuery::Prepared(p) if p.query == "select u from User u"
        ));
        let plan = generated.method("findByLastname").unwrap();
        assert_eq!(plan.origin, QueryOrigin::Derived);
        assert!(matches!(
            &plan.query,
            PlannedQuery::Prepared(p) if p.query == "select u from User u where u.lastname = ?1"
        ));
        assert!(logs_contain("leaving method to the runtime planner"));
    }

    #[test]
    fn unresolvable_return_type_fails_generation() {
        let r = repo();
        let err = RepositoryContributor::new("UserRepository", &r)
            .contribute(&[MethodDescriptor::new("findByLastname", "Missing").param("lastname")])
            .unwrap_err();
        assert_eq!(err, Error::UnresolvableReturnType("Missing".to_owned()));
    }
}

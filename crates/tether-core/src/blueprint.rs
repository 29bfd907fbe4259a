//! ---
//! tether_section: "04-app-lifecycle-orchestration"
//! tether_subsection: "module"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Lifecycle orchestration and identity tracking."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::object::ObjectSpec;

/// Insertion-ordered registry of not-yet-created object specifications.
///
/// Tags are never removed during a run; iteration order is registration
/// order, which the creation phase relies on.
#[derive(Debug, Default)]
pub struct Blueprint {
    objects: IndexMap<String, Arc<ObjectSpec>>,
}

impl Blueprint {
    /// Create an empty blueprint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a specification under a tag.
    ///
    /// Re-registering an existing tag is an error, except when the incoming
    /// specification is a cross-app reference layered over a placeholder
    /// registration.
    pub fn register(&mut self, tag: impl Into<String>, spec: Arc<ObjectSpec>) -> Result<()> {
        let tag = tag.into();
        if self.objects.contains_key(&tag) {
            if spec.cross_app_reference().is_none() {
                return Err(Error::Invalid(format!(
                    "tag {tag} is already registered on this app"
                )));
            }
            self.objects.insert(tag, spec);
            return Ok(());
        }
        self.objects.insert(tag, spec);
        Ok(())
    }

    /// Whether a tag is registered.
    pub fn has(&self, tag: &str) -> bool {
        self.objects.contains_key(tag)
    }

    /// Fetch the specification registered under a tag.
    pub fn get(&self, tag: &str) -> Option<Arc<ObjectSpec>> {
        self.objects.get(tag).cloned()
    }

    /// Iterate all (tag, spec) pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ObjectSpec>)> {
        self.objects.iter().map(|(tag, spec)| (tag.as_str(), spec))
    }

    /// Number of registered tags.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Reference;
    use tether_proto::Namespace;

    #[test]
    fn iteration_preserves_registration_order() {
        let mut blueprint = Blueprint::new();
        for tag in ["c", "a", "b"] {
            blueprint
                .register(tag, Arc::new(ObjectSpec::Queue))
                .expect("register");
        }
        let tags: Vec<&str> = blueprint.iter().map(|(tag, _)| tag).collect();
        assert_eq!(tags, vec!["c", "a", "b"]);
    }

    #[test]
    fn duplicate_tags_are_rejected() {
        let mut blueprint = Blueprint::new();
        blueprint
            .register("q", Arc::new(ObjectSpec::Queue))
            .expect("register");
        let err = blueprint
            .register("q", Arc::new(ObjectSpec::Queue))
            .expect_err("duplicate must fail");
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn cross_app_reference_layers_over_placeholder() {
        let mut blueprint = Blueprint::new();
        blueprint
            .register("shared", Arc::new(ObjectSpec::Queue))
            .expect("register placeholder");
        blueprint
            .register(
                "shared",
                Arc::new(ObjectSpec::Reference(Reference::deployed(
                    "other-app",
                    Some("q".to_owned()),
                    Namespace::Account,
                ))),
            )
            .expect("layering a cross-app reference is allowed");
        assert_eq!(blueprint.len(), 1);
        assert!(blueprint.get("shared").expect("spec").cross_app_reference().is_some());
    }
}

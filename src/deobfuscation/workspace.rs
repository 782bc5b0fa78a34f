//! The set of methods a deobfuscation run works on.
//!
//! A [`Workspace`] owns every method body keyed by [`MethodKey`], the class hierarchy the
//! exception passes consult, and the rename mappings collected along the way. All of it is
//! concurrent: the scheduler takes a body out, transforms it without holding a lock, and puts
//! it back.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use dashmap::DashMap;

use crate::{
    analysis::{ClassHierarchy, TypeOracle},
    assembly::{Insn, MethodBody, MethodKey},
    deobfuscation::RenameMappings,
};

/// Which workspace classes are ever instantiated.
///
/// Only code of the workspace can create instances of classes it defines, so a handler for a
/// workspace exception type that no workspace method instantiates (directly or through a
/// subclass) can never run.
#[derive(Debug, Clone, Default)]
pub struct ExceptionUsage {
    /// Classes that own at least one workspace method.
    defined: HashSet<String>,
    /// Types named by a `new` instruction in any workspace method.
    constructed: HashSet<String>,
}

impl ExceptionUsage {
    /// Returns `true` if `catch_type` is a workspace class and no instance of it or of a
    /// workspace subclass is ever created.
    ///
    /// A constructed workspace class the oracle cannot place counts as a possible subclass.
    #[must_use]
    pub fn is_never_thrown(&self, oracle: &dyn TypeOracle, catch_type: &str) -> bool {
        self.defined.contains(catch_type)
            && !self
                .constructed
                .iter()
                .filter(|ty| self.defined.contains(ty.as_str()))
                .any(|ty| !oracle.is_known(ty) || oracle.is_assignable_from(catch_type, ty))
    }
}

/// Method bodies plus the class-level knowledge shared by all of them.
#[derive(Debug, Default)]
pub struct Workspace {
    methods: DashMap<MethodKey, MethodBody>,
    hierarchy: Arc<ClassHierarchy>,
    mappings: RenameMappings,
}

impl Workspace {
    /// Creates an empty workspace with the runtime class hierarchy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a workspace holding `bodies`.
    pub fn from_bodies(bodies: impl IntoIterator<Item = MethodBody>) -> Self {
        let workspace = Self::new();
        for body in bodies {
            workspace.add_method(body);
        }
        workspace
    }

    /// Adds or replaces a method. Returns the previous body under the same key.
    pub fn add_method(&self, body: MethodBody) -> Option<MethodBody> {
        self.methods.insert(body.key(), body)
    }

    /// A copy of the body of `key`.
    #[must_use]
    pub fn get_method_body(&self, key: &MethodKey) -> Option<MethodBody> {
        self.methods.get(key).map(|entry| entry.value().clone())
    }

    /// Replaces the body stored under the body's own key, returning the old one.
    pub fn replace_body(&self, body: MethodBody) -> Option<MethodBody> {
        self.add_method(body)
    }

    /// Removes and returns the body of `key`.
    pub fn take(&self, key: &MethodKey) -> Option<MethodBody> {
        self.methods.remove(key).map(|(_, body)| body)
    }

    /// Runs `f` on the body of `key` under the map's shard lock.
    pub fn with_method<R>(&self, key: &MethodKey, f: impl FnOnce(&MethodBody) -> R) -> Option<R> {
        self.methods.get(key).map(|entry| f(entry.value()))
    }

    /// Returns `true` if the workspace has a method with this key.
    #[must_use]
    pub fn contains(&self, key: &MethodKey) -> bool {
        self.methods.contains_key(key)
    }

    /// Keys of all methods, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<MethodKey> {
        let mut keys: Vec<_> = self.methods.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if the workspace has no methods.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Immutable copies of all static bodies, for evaluating calls between methods.
    #[must_use]
    pub fn static_snapshot(&self) -> HashMap<MethodKey, Arc<MethodBody>> {
        self.methods
            .iter()
            .filter(|e| e.value().is_static())
            .map(|e| (e.key().clone(), Arc::new(e.value().clone())))
            .collect()
    }

    /// Defined and instantiated classes across all current bodies.
    #[must_use]
    pub fn exception_usage(&self) -> ExceptionUsage {
        let mut usage = ExceptionUsage::default();
        for entry in self.methods.iter() {
            usage.defined.insert(entry.key().owner.clone());
            for (_, insn) in &entry.value().instructions {
                if let Insn::New(ty) = insn {
                    usage.constructed.insert(ty.clone());
                }
            }
        }
        usage
    }

    /// The class hierarchy.
    #[must_use]
    pub fn hierarchy(&self) -> &Arc<ClassHierarchy> {
        &self.hierarchy
    }

    /// Replaces the class hierarchy.
    #[must_use]
    pub fn with_hierarchy(mut self, hierarchy: Arc<ClassHierarchy>) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    /// Collected rename mappings.
    #[must_use]
    pub fn mappings(&self) -> &RenameMappings {
        &self.mappings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{MethodAccess, MethodBuilder};

    #[test]
    fn test_store_and_replace() {
        let body = MethodBuilder::new("A", "f", "()I")
            .iconst(1)
            .ireturn()
            .build()
            .unwrap();
        let key = body.key();
        let ws = Workspace::from_bodies([body]);
        assert_eq!(ws.len(), 1);
        assert_eq!(ws.with_method(&key, |b| b.instructions.len()), Some(2));

        let mut copy = ws.get_method_body(&key).unwrap();
        copy.instructions.push(crate::assembly::Insn::Nop);
        let old = ws.replace_body(copy).unwrap();
        assert_eq!(old.instructions.len(), 2);
        assert_eq!(ws.with_method(&key, |b| b.instructions.len()), Some(3));

        assert!(ws.take(&key).is_some());
        assert!(!ws.contains(&key));
    }

    #[test]
    fn test_static_snapshot() {
        let ws = Workspace::new();
        ws.add_method(MethodBuilder::new("A", "s", "()V").vreturn().build().unwrap());
        ws.add_method(
            MethodBuilder::new("A", "v", "()V")
                .access(MethodAccess::PUBLIC)
                .vreturn()
                .build()
                .unwrap(),
        );
        let snapshot = ws.static_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&MethodKey::new("A", "s", "()V")));
        assert_eq!(ws.keys()[0].name, "s");
    }

    #[test]
    fn test_exception_usage() {
        let ws = Workspace::new();
        ws.hierarchy().add_class("x/Unused", Some("java/lang/RuntimeException"), &[]);
        ws.hierarchy().add_class("x/Base", Some("java/lang/RuntimeException"), &[]);
        ws.hierarchy().add_class("x/Thrown", Some("x/Base"), &[]);
        for class in ["x/Unused", "x/Base", "x/Thrown"] {
            ws.add_method(MethodBuilder::new(class, "<init>", "()V").vreturn().build().unwrap());
        }
        ws.add_method(
            MethodBuilder::new("x/Main", "fail", "()V")
                .new_object("x/Thrown")
                .athrow()
                .build()
                .unwrap(),
        );
        let usage = ws.exception_usage();
        let oracle = ws.hierarchy().as_ref();
        assert!(usage.is_never_thrown(oracle, "x/Unused"));
        // thrown through its subclass
        assert!(!usage.is_never_thrown(oracle, "x/Base"));
        assert!(!usage.is_never_thrown(oracle, "x/Thrown"));
        // runtime types are created outside the workspace
        assert!(!usage.is_never_thrown(oracle, "java/lang/IllegalStateException"));
    }
}

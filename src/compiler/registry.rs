//! Name-based pass lookup.
//!
//! The scheduler resolves hard dependencies by name. A [`PassRegistry`] maps each name to a
//! factory producing a fresh pass instance, so a dependency can be pulled into a pipeline that
//! did not request it.

use std::{collections::BTreeMap, fmt};

use crate::{compiler::MethodPass, Error, Result};

type Factory = Box<dyn Fn() -> Box<dyn MethodPass> + Send + Sync>;

/// Factories for passes, keyed by pass name.
#[derive(Default)]
pub struct PassRegistry {
    factories: BTreeMap<&'static str, Factory>,
}

impl fmt::Debug for PassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl PassRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`, replacing any earlier one.
    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn() -> Box<dyn MethodPass> + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
    }

    /// Creates a new instance of the pass called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPass`] if nothing is registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn MethodPass>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownPass(name.to_string()))
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Number of registered passes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

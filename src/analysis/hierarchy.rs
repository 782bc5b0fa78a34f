//! Type hierarchy queries.
//!
//! Exception-range analysis needs to know whether an exception type thrown by an instruction is
//! caught by a handler type. That question is answered by a [`TypeOracle`]; passes hold it as a
//! shared `Arc<dyn TypeOracle>` and never mutate it.
//!
//! [`ClassHierarchy`] is the reference oracle. It starts with the runtime exception types that
//! instructions can raise implicitly and accepts further classes through
//! [`ClassHierarchy::add_class`].

use std::collections::HashSet;

use dashmap::DashMap;

/// Internal name of the root class.
pub const OBJECT: &str = "java/lang/Object";

/// Answers subtype questions about internal class names.
pub trait TypeOracle: Send + Sync {
    /// Returns `true` if a value of type `subtype` can be assigned to `supertype`.
    ///
    /// Unknown types are never assignable, except to [`OBJECT`] and to themselves.
    fn is_assignable_from(&self, supertype: &str, subtype: &str) -> bool;

    /// Returns `true` if the oracle has complete supertype information for `ty`.
    fn is_known(&self, ty: &str) -> bool;
}

/// Runtime types present in every fresh hierarchy: `(class, superclass)`.
const RUNTIME_TYPES: &[(&str, &str)] = &[
    ("java/lang/Throwable", OBJECT),
    ("java/lang/Exception", "java/lang/Throwable"),
    ("java/lang/Error", "java/lang/Throwable"),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/ArrayStoreException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/IllegalMonitorStateException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    (
        "java/lang/ArrayIndexOutOfBoundsException",
        "java/lang/IndexOutOfBoundsException",
    ),
    (
        "java/lang/StringIndexOutOfBoundsException",
        "java/lang/IndexOutOfBoundsException",
    ),
    ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/NumberFormatException", "java/lang/IllegalArgumentException"),
    ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
    ("java/lang/StackOverflowError", "java/lang/VirtualMachineError"),
    ("java/lang/ReflectiveOperationException", "java/lang/Exception"),
    ("java/lang/ClassNotFoundException", "java/lang/ReflectiveOperationException"),
    ("java/lang/InterruptedException", "java/lang/Exception"),
    ("java/io/IOException", "java/lang/Exception"),
    ("java/io/UncheckedIOException", "java/lang/RuntimeException"),
    ("java/lang/String", OBJECT),
    ("java/lang/Number", OBJECT),
    ("java/lang/Integer", "java/lang/Number"),
    ("java/lang/Long", "java/lang/Number"),
];

/// A concurrently extensible class hierarchy.
#[derive(Debug)]
pub struct ClassHierarchy {
    supertypes: DashMap<String, Vec<String>>,
}

impl Default for ClassHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassHierarchy {
    /// Creates a hierarchy preloaded with the runtime exception types.
    #[must_use]
    pub fn new() -> Self {
        let hierarchy = Self::empty();
        hierarchy.supertypes.insert(OBJECT.to_string(), Vec::new());
        for (class, superclass) in RUNTIME_TYPES {
            hierarchy.add_class(class, Some(superclass), &[]);
        }
        hierarchy
    }

    /// Creates a hierarchy that only knows [`OBJECT`] implicitly.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            supertypes: DashMap::new(),
        }
    }

    /// Registers `class` with its superclass and interfaces, replacing earlier information.
    pub fn add_class(&self, class: &str, superclass: Option<&str>, interfaces: &[&str]) {
        let parents = superclass
            .into_iter()
            .chain(interfaces.iter().copied())
            .map(str::to_string)
            .collect();
        self.supertypes.insert(class.to_string(), parents);
    }

    /// Number of registered classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.supertypes.len()
    }

    /// Returns `true` if no class is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.supertypes.is_empty()
    }

    /// Direct supertypes of `class`.
    #[must_use]
    pub fn supertypes(&self, class: &str) -> Option<Vec<String>> {
        self.supertypes.get(class).map(|entry| entry.value().clone())
    }
}

impl TypeOracle for ClassHierarchy {
    fn is_assignable_from(&self, supertype: &str, subtype: &str) -> bool {
        if supertype == subtype || supertype == OBJECT {
            return true;
        }
        let mut seen = HashSet::new();
        let mut pending = vec![subtype.to_string()];
        while let Some(ty) = pending.pop() {
            if !seen.insert(ty.clone()) {
                continue;
            }
            let Some(parents) = self.supertypes.get(&ty) else {
                continue;
            };
            for parent in parents.value() {
                if parent == supertype {
                    return true;
                }
                pending.push(parent.clone());
            }
        }
        false
    }

    fn is_known(&self, ty: &str) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![ty.to_string()];
        while let Some(ty) = pending.pop() {
            if ty == OBJECT || !seen.insert(ty.clone()) {
                continue;
            }
            match self.supertypes.get(&ty) {
                Some(parents) => pending.extend(parents.value().iter().cloned()),
                None => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_exceptions() {
        let h = ClassHierarchy::new();
        assert!(h.is_assignable_from(
            "java/lang/RuntimeException",
            "java/lang/ArrayIndexOutOfBoundsException"
        ));
        assert!(h.is_assignable_from("java/lang/Throwable", "java/lang/NullPointerException"));
        assert!(!h.is_assignable_from("java/lang/Error", "java/lang/ArithmeticException"));
        assert!(h.is_assignable_from(OBJECT, "com/example/Unknown"));
        assert!(h.is_known("java/lang/ClassCastException"));
        assert!(!h.is_known("com/example/Unknown"));
    }

    #[test]
    fn test_added_classes() {
        let h = ClassHierarchy::new();
        h.add_class("a/MyError", Some("java/lang/RuntimeException"), &["a/Marker"]);
        assert!(h.is_assignable_from("java/lang/Exception", "a/MyError"));
        assert!(h.is_assignable_from("a/Marker", "a/MyError"));
        // the interface has no entry, so the chain is incomplete
        assert!(!h.is_known("a/MyError"));
        h.add_class("a/Marker", Some(OBJECT), &[]);
        assert!(h.is_known("a/MyError"));
    }
}

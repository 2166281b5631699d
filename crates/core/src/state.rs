//! Per-run state bag shared by every step of a build.
//!
//! Values are stored under string keys and read back through [`StateKey`]
//! handles that carry the expected type, so a reader that finds the wrong
//! type gets a precise [`StateError::TypeMismatch`] instead of a silent
//! coercion.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::error::StateError;

/// Typed handle for a state bag entry.
///
/// A key is just a name plus the type that lives behind it. Keys are
/// `const`-constructible so conventional keys can be declared once and
/// shared by every writer and reader.
pub struct StateKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateKey<T> {}

impl<T> fmt::Debug for StateKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateKey")
            .field("name", &self.name)
            .field("type", &type_name::<T>())
            .finish()
    }
}

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Heterogeneous key/value store mutated across a single run.
///
/// The bag does no locking. It is owned by exactly one runner for the
/// duration of a run and handed to steps by `&mut`.
#[derive(Default)]
pub struct StateBag {
    entries: HashMap<&'static str, Entry>,
}

impl StateBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing whatever was there.
    pub fn put<T>(&mut self, key: StateKey<T>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.entries.insert(
            key.name,
            Entry {
                value: Box::new(value),
                type_name: type_name::<T>(),
            },
        );
    }

    /// Read a value that the protocol guarantees to be present.
    pub fn get<T>(&self, key: StateKey<T>) -> Result<&T, StateError>
    where
        T: Any + Send + Sync,
    {
        self.get_ok(key)?.ok_or(StateError::MissingKey { key: key.name })
    }

    /// Probe for a value. Absence is `Ok(None)`; a value of the wrong type is
    /// still an error.
    pub fn get_ok<T>(&self, key: StateKey<T>) -> Result<Option<&T>, StateError>
    where
        T: Any + Send + Sync,
    {
        match self.entries.get(key.name) {
            None => Ok(None),
            Some(entry) => entry
                .value
                .downcast_ref::<T>()
                .map(Some)
                .ok_or_else(|| mismatch::<T>(key.name, entry.type_name)),
        }
    }

    pub fn get_mut<T>(&mut self, key: StateKey<T>) -> Result<&mut T, StateError>
    where
        T: Any + Send + Sync,
    {
        let entry = self
            .entries
            .get_mut(key.name)
            .ok_or(StateError::MissingKey { key: key.name })?;
        let found = entry.type_name;
        entry
            .value
            .downcast_mut::<T>()
            .ok_or_else(|| mismatch::<T>(key.name, found))
    }

    /// Remove a value and hand ownership back to the caller.
    ///
    /// A mismatched entry is left in place.
    pub fn take<T>(&mut self, key: StateKey<T>) -> Result<Option<T>, StateError>
    where
        T: Any + Send + Sync,
    {
        match self.entries.get(key.name) {
            None => return Ok(None),
            Some(entry) if !entry.value.is::<T>() => {
                return Err(mismatch::<T>(key.name, entry.type_name));
            }
            Some(_) => {}
        }

        match self.entries.remove(key.name) {
            Some(entry) => {
                let found = entry.type_name;
                entry
                    .value
                    .downcast::<T>()
                    .map(|value| Some(*value))
                    .map_err(|_| mismatch::<T>(key.name, found))
            }
            None => Ok(None),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of all stored keys, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

impl fmt::Debug for StateBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.keys().into_iter().map(|k| (k, self.entries[k].type_name)))
            .finish()
    }
}

fn mismatch<T>(key: &'static str, found: &'static str) -> StateError {
    StateError::TypeMismatch {
        key,
        expected: type_name::<T>(),
        found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: StateKey<String> = StateKey::new("name");
    const NAME_AS_INT: StateKey<u32> = StateKey::new("name");
    const COUNT: StateKey<u32> = StateKey::new("count");

    #[test]
    fn test_put_then_get() {
        let mut bag = StateBag::new();
        bag.put(NAME, "img-1".to_string());

        assert_eq!(bag.get(NAME).unwrap(), "img-1");
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_put_overwrites() {
        let mut bag = StateBag::new();
        bag.put(COUNT, 1);
        bag.put(COUNT, 2);

        assert_eq!(*bag.get(COUNT).unwrap(), 2);
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_get_missing_key() {
        let bag = StateBag::new();
        let err = bag.get(COUNT).unwrap_err();

        assert_eq!(err, StateError::MissingKey { key: "count" });
    }

    #[test]
    fn test_get_type_mismatch() {
        let mut bag = StateBag::new();
        bag.put(NAME, "img-1".to_string());

        match bag.get(NAME_AS_INT).unwrap_err() {
            StateError::TypeMismatch {
                key,
                expected,
                found,
            } => {
                assert_eq!(key, "name");
                assert_eq!(expected, "u32");
                assert!(found.contains("String"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_get_ok_probe() {
        let mut bag = StateBag::new();
        assert!(bag.get_ok(COUNT).unwrap().is_none());

        bag.put(COUNT, 7);
        assert_eq!(bag.get_ok(COUNT).unwrap(), Some(&7));

        bag.put(NAME, "x".to_string());
        assert!(bag.get_ok(NAME_AS_INT).is_err());
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut bag = StateBag::new();
        bag.put(COUNT, 1);
        *bag.get_mut(COUNT).unwrap() += 4;

        assert_eq!(*bag.get(COUNT).unwrap(), 5);
    }

    #[test]
    fn test_take_removes_entry() {
        let mut bag = StateBag::new();
        bag.put(NAME, "img-1".to_string());

        assert_eq!(bag.take(NAME).unwrap(), Some("img-1".to_string()));
        assert!(!bag.contains("name"));
        assert_eq!(bag.take(NAME).unwrap(), None);
    }

    #[test]
    fn test_take_mismatch_keeps_entry() {
        let mut bag = StateBag::new();
        bag.put(NAME, "img-1".to_string());

        assert!(bag.take(NAME_AS_INT).is_err());
        assert!(bag.contains("name"));
    }

    #[test]
    fn test_keys_sorted() {
        let mut bag = StateBag::new();
        bag.put(NAME, String::new());
        bag.put(COUNT, 0);

        assert_eq!(bag.keys(), vec!["count", "name"]);
    }
}

//! Component registry.
//!
//! Maps [`ComponentId`]s to components. Ids are handed out from a counter
//! that only moves forward: removing a component, or clearing the registry,
//! never makes an id available again.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::component::{Component, ComponentId};
use crate::error::{RuntimeError, RuntimeResult};

/// A component shared between the registry and in-flight operations.
pub type SharedComponent = Arc<Mutex<Component>>;

/// Components by id, iterated in ascending id order.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: BTreeMap<ComponentId, SharedComponent>,
    next_id: u64,
}

impl ComponentRegistry {
    /// Create an empty registry whose first id is `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next successful insert will receive.
    #[must_use]
    pub fn peek_next_id(&self) -> ComponentId {
        ComponentId::new(self.next_id)
    }

    /// Build a component with the next id and insert it.
    ///
    /// The id is consumed only if `build` succeeds.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `build`, or returns
    /// [`RuntimeError::IdsExhausted`] once every id has been used.
    pub fn insert_with(
        &mut self,
        build: impl FnOnce(ComponentId) -> RuntimeResult<Component>,
    ) -> RuntimeResult<ComponentId> {
        let following = self
            .next_id
            .checked_add(1)
            .ok_or(RuntimeError::IdsExhausted)?;
        let id = ComponentId::new(self.next_id);
        let component = build(id)?;
        self.next_id = following;
        self.entries.insert(id, Arc::new(Mutex::new(component)));
        debug!(component_id = %id, "Registered component");
        Ok(id)
    }

    /// Look up a component.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ComponentNotFound`] for an unknown id.
    pub fn get(&self, id: ComponentId) -> RuntimeResult<SharedComponent> {
        self.entries
            .get(&id)
            .cloned()
            .ok_or(RuntimeError::ComponentNotFound(id))
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Remove a component, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ComponentNotFound`] for an unknown id.
    pub fn remove(&mut self, id: ComponentId) -> RuntimeResult<SharedComponent> {
        let component = self
            .entries
            .remove(&id)
            .ok_or(RuntimeError::ComponentNotFound(id))?;
        debug!(component_id = %id, "Removed component");
        Ok(component)
    }

    /// Registered ids, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<ComponentId> {
        self.entries.keys().copied().collect()
    }

    /// `(id, component)` pairs, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, &SharedComponent)> {
        self.entries.iter().map(|(id, c)| (*id, c))
    }

    /// Number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every component. The id counter is left where it is.
    pub fn clear(&mut self) {
        let count = self.entries.len();
        self.entries.clear();
        info!(count, next_id = self.next_id, "Cleared component registry");
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("ids", &self.ids())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refuse(_id: ComponentId) -> RuntimeResult<Component> {
        Err(RuntimeError::load("missing.unit", "no such file"))
    }

    #[test]
    fn test_empty_registry() {
        let registry = ComponentRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.peek_next_id(), ComponentId::new(0));
        assert!(matches!(
            registry.get(ComponentId::new(0)),
            Err(RuntimeError::ComponentNotFound(id)) if id == ComponentId::new(0)
        ));
    }

    #[test]
    fn test_failed_build_does_not_consume_id() {
        let mut registry = ComponentRegistry::new();
        assert!(registry.insert_with(refuse).is_err());
        assert!(registry.insert_with(refuse).is_err());
        assert_eq!(registry.peek_next_id(), ComponentId::new(0));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_id() {
        let mut registry = ComponentRegistry::new();
        assert!(matches!(
            registry.remove(ComponentId::new(7)),
            Err(RuntimeError::ComponentNotFound(_))
        ));
    }

    #[test]
    fn test_clear_keeps_counter() {
        let mut registry = ComponentRegistry {
            entries: BTreeMap::new(),
            next_id: 5,
        };
        registry.clear();
        assert_eq!(registry.peek_next_id(), ComponentId::new(5));
    }

    #[test]
    fn test_exhausted_id_space() {
        let mut registry = ComponentRegistry {
            entries: BTreeMap::new(),
            next_id: u64::MAX,
        };
        assert!(matches!(
            registry.insert_with(refuse),
            Err(RuntimeError::IdsExhausted)
        ));
    }
}

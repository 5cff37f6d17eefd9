use std::collections::BTreeMap;
use std::sync::Arc;

use crate::identifier::Identifier;
use crate::wrappers::{File, PostgresDb, Systemd, Wrapper};

/// Builds a wrapper instance.
pub type WrapperFactory = fn() -> Arc<dyn Wrapper>;

fn file() -> Arc<dyn Wrapper> {
    Arc::new(File::default())
}

fn systemd() -> Arc<dyn Wrapper> {
    Arc::new(Systemd)
}

fn postgres_db() -> Arc<dyn Wrapper> {
    Arc::new(PostgresDb::default())
}

/// Identifier to wrapper table, populated once at startup.
#[derive(Clone, Default)]
pub struct Registry {
    wrappers: BTreeMap<Identifier, Arc<dyn Wrapper>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All wrappers shipped with drift.
    pub fn builtin() -> Self {
        Self::new()
            .register(file)
            .register(systemd)
            .register(postgres_db)
    }

    /// Adds a wrapper kind. A later factory with the same identifier
    /// replaces the earlier one.
    pub fn register(mut self, factory: WrapperFactory) -> Self {
        let wrapper = factory();
        let id = wrapper.identifier();
        if self.wrappers.insert(id.clone(), wrapper).is_some() {
            log::warn!("Wrapper {id} registered twice, keeping the latest");
        }
        self
    }

    pub fn resolve(&self, id: &Identifier) -> Option<Arc<dyn Wrapper>> {
        self.wrappers.get(id).cloned()
    }

    /// Identifiers in a stable order.
    pub fn identifiers(&self) -> Vec<Identifier> {
        self.wrappers.keys().cloned().collect()
    }

    pub fn wrappers(&self) -> impl Iterator<Item = &Arc<dyn Wrapper>> {
        self.wrappers.values()
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.wrappers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_identifiers_are_stable() {
        let registry = Registry::builtin();
        let ids: Vec<String> = registry.identifiers().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["file", "postgres_db", "systemd"]);
    }

    #[test]
    fn test_identifier_equality_matches_kind() {
        let registry = Registry::builtin();
        for id in registry.identifiers() {
            let a = registry.resolve(&id).unwrap();
            let b = registry.resolve(&id).unwrap();
            assert_eq!(a.identifier(), b.identifier());
            assert_eq!(a.identifier(), id);
        }
        let file = registry.resolve(&Identifier::new("file")).unwrap();
        let systemd = registry.resolve(&Identifier::new("systemd")).unwrap();
        assert_ne!(file.identifier(), systemd.identifier());
        assert!(registry.resolve(&Identifier::new("apt")).is_none());
    }
}

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use anyhow::{Context, Result};

use crate::types::{Template, TemplateId};

/// A change to the template set that the matcher must react to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateEvent {
    Inserted(TemplateId),
    Updated { id: TemplateId, previous_hash: u64 },
    Removed { id: TemplateId, content_hash: u64 },
}

impl TemplateEvent {
    pub fn id(&self) -> TemplateId {
        match self {
            TemplateEvent::Inserted(id) => *id,
            TemplateEvent::Updated { id, .. } => *id,
            TemplateEvent::Removed { id, .. } => *id,
        }
    }

    /// Content hash of the sequence the event replaced or removed.
    pub fn previous_hash(&self) -> Option<u64> {
        match self {
            TemplateEvent::Inserted(_) => None,
            TemplateEvent::Updated { previous_hash, .. } => Some(*previous_hash),
            TemplateEvent::Removed { content_hash, .. } => Some(*content_hash),
        }
    }
}

/// Source of the templates a matcher scores against.
///
/// Implementations must be safe to read from many query threads at once.
pub trait TemplateStore: Send + Sync {
    /// Every template with `meta.active` set, in ascending id order.
    fn active_templates(&self) -> Vec<Template>;

    fn get(&self, id: TemplateId) -> Option<Template>;

    /// Inserts or replaces the template with the same id.
    fn upsert(&self, template: Template) -> TemplateEvent;

    fn remove(&self, id: TemplateId) -> Option<TemplateEvent>;
}

#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<BTreeMap<TemplateId, Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates(templates: impl IntoIterator<Item = Template>) -> Self {
        Self {
            templates: RwLock::new(templates.into_iter().map(|t| (t.id, t)).collect()),
        }
    }

    /// Loads a JSON array of templates.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read templates {}", path.display()))?;
        let templates: Vec<Template> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse templates {}", path.display()))?;
        log::info!("loaded {} templates from {}", templates.len(), path.display());
        Ok(Self::from_templates(templates))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<TemplateId, Template>> {
        match self.templates.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<TemplateId, Template>> {
        match self.templates.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn active_templates(&self) -> Vec<Template> {
        self.read()
            .values()
            .filter(|t| t.meta.active)
            .cloned()
            .collect()
    }

    fn get(&self, id: TemplateId) -> Option<Template> {
        self.read().get(&id).cloned()
    }

    fn upsert(&self, template: Template) -> TemplateEvent {
        let id = template.id;
        match self.write().insert(id, template) {
            Some(previous) => TemplateEvent::Updated {
                id,
                previous_hash: previous.sequence.content_hash(),
            },
            None => TemplateEvent::Inserted(id),
        }
    }

    fn remove(&self, id: TemplateId) -> Option<TemplateEvent> {
        self.write().remove(&id).map(|removed| TemplateEvent::Removed {
            id,
            content_hash: removed.sequence.content_hash(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sequence;

    #[test]
    fn test_upsert_reports_insert_then_update() {
        let store = InMemoryTemplateStore::new();
        let event = store.upsert(Template::new(3, "wave", Sequence::default()));
        assert_eq!(event, TemplateEvent::Inserted(TemplateId(3)));

        let event = store.upsert(Template::new(3, "wave again", Sequence::default()));
        assert_eq!(event.id(), TemplateId(3));
        assert_eq!(event.previous_hash(), Some(Sequence::default().content_hash()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(TemplateId(3)).map(|t| t.meta.name), Some("wave again".into()));
    }

    #[test]
    fn test_inactive_templates_are_hidden() {
        let mut hidden = Template::new(1, "hidden", Sequence::default());
        hidden.meta.active = false;
        let store = InMemoryTemplateStore::from_templates([
            Template::new(2, "b", Sequence::default()),
            hidden,
            Template::new(0, "a", Sequence::default()),
        ]);
        let ids: Vec<u64> = store.active_templates().iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_remove_missing_is_none() {
        let store = InMemoryTemplateStore::new();
        assert_eq!(store.remove(TemplateId(9)), None);
    }
}

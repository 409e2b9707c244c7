//! The process-wide compiled-template cache.
//!
//! Template GUIDs are the only identifier that stays meaningful across
//! chunks, so compiled templates are keyed by GUID: a record in a later
//! chunk (or a headerless-recovery pass) can render against a definition
//! that physically lives in an earlier chunk.
//!
//! Workers stage their inserts in a per-chunk [`CacheSession`] and merge
//! into the shared map once per chunk, keeping the write lock off the
//! per-record path. Duplicate inserts keep the first winner, so merging is
//! idempotent. A `Failed` sentinel remembers definitions that did not
//! compile so repeated records do not retry them.

use crate::AHashMap;
use crate::binxml::ir::Element;
use crate::binxml::value_variant::BinXmlValueType;
use crate::err::{DeserializationError, DeserializationResult};
use crate::guid::Guid;
use std::cell::RefCell;
use std::sync::{Arc, RwLock};

/// A substitution slot of a compiled template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotDescriptor {
    pub index: u16,
    pub value_type: BinXmlValueType,
    pub array: bool,
    pub optional: bool,
}

/// A template definition compiled into an owned, pre-interpreted tree.
/// Placeholder nodes in the tree carry the slot index and expected type;
/// rendering binds a record's substitution array over them.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTemplate {
    pub(crate) guid: Guid,
    pub(crate) root: Element<'static>,
    pub(crate) slots: Vec<SlotDescriptor>,
}

impl CompiledTemplate {
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Number of substitution slots the template references.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum CacheEntry {
    Compiled(Arc<CompiledTemplate>),
    /// Compilation failed before; do not retry for every record.
    Failed,
}

impl CacheEntry {
    fn as_result(&self, guid: Guid) -> DeserializationResult<Arc<CompiledTemplate>> {
        match self {
            CacheEntry::Compiled(template) => Ok(Arc::clone(template)),
            CacheEntry::Failed => Err(DeserializationError::TemplateCompilationFailed { guid }),
        }
    }
}

/// Shared, GUID-keyed template cache. One cache lives per parse invocation;
/// callers may pre-populate it (e.g. from provider binaries) before parsing.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: RwLock<AHashMap<Guid, CacheEntry>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a compiled template. The first entry for a GUID wins;
    /// re-adding is a no-op.
    pub fn add(&self, template: CompiledTemplate) {
        let guid = template.guid;
        let mut entries = self.entries.write().expect("template cache lock poisoned");
        entries
            .entry(guid)
            .or_insert_with(|| CacheEntry::Compiled(Arc::new(template)));
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("template cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn lookup(&self, guid: &Guid) -> Option<CacheEntry> {
        self.entries
            .read()
            .expect("template cache lock poisoned")
            .get(guid)
            .cloned()
    }

    pub(crate) fn merge(&self, staged: AHashMap<Guid, CacheEntry>) {
        if staged.is_empty() {
            return;
        }
        let mut entries = self.entries.write().expect("template cache lock poisoned");
        for (guid, entry) in staged {
            entries.entry(guid).or_insert(entry);
        }
    }
}

/// A worker's chunk-scoped view of the cache: local hits are lock-free,
/// shared lookups take the read lock once per GUID, and everything staged
/// locally is merged back when the chunk completes.
#[derive(Debug)]
pub(crate) struct CacheSession<'s> {
    shared: &'s TemplateCache,
    local: RefCell<AHashMap<Guid, CacheEntry>>,
}

impl<'s> CacheSession<'s> {
    pub(crate) fn new(shared: &'s TemplateCache) -> Self {
        CacheSession {
            shared,
            local: RefCell::new(AHashMap::default()),
        }
    }

    pub(crate) fn get_or_compile<F>(
        &self,
        guid: Guid,
        compile: F,
    ) -> DeserializationResult<Arc<CompiledTemplate>>
    where
        F: FnOnce() -> DeserializationResult<CompiledTemplate>,
    {
        if let Some(entry) = self.local.borrow().get(&guid) {
            return entry.as_result(guid);
        }

        if let Some(entry) = self.shared.lookup(&guid) {
            let result = entry.as_result(guid);
            self.local.borrow_mut().insert(guid, entry);
            return result;
        }

        match compile() {
            Ok(template) => {
                let template = Arc::new(template);
                self.local
                    .borrow_mut()
                    .insert(guid, CacheEntry::Compiled(Arc::clone(&template)));
                Ok(template)
            }
            Err(e) => {
                self.local.borrow_mut().insert(guid, CacheEntry::Failed);
                Err(e)
            }
        }
    }

    /// Merge everything staged in this session into the shared cache.
    pub(crate) fn finish(self) {
        self.shared.merge(self.local.into_inner());
    }
}

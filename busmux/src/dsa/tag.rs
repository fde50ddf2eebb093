//! Registry of tagging protocols.
//!
//! A tagging protocol describes the header a switch inserts into frames
//! exchanged with its CPU port. Protocol entries are reference counted: a
//! [`TagRef`] keeps its protocol pinned, and the count drops again when the
//! reference goes out of scope.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagProtocolId {
    None,
    Brcm,
    BrcmLegacy,
    BrcmPrepend,
    Dsa,
    Edsa,
    Vlan8021q,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagProtocol {
    pub id: TagProtocolId,
    pub name: &'static str,
    /// Bytes the tag adds to every frame on the master device
    pub overhead: usize,
    /// Whether the master device must run in promiscuous mode
    pub promisc_on_master: bool,
}

const BUILTIN: [TagProtocol; 7] = [
    TagProtocol {
        id: TagProtocolId::None,
        name: "none",
        overhead: 0,
        promisc_on_master: false,
    },
    TagProtocol {
        id: TagProtocolId::Brcm,
        name: "brcm",
        overhead: 4,
        promisc_on_master: false,
    },
    TagProtocol {
        id: TagProtocolId::BrcmLegacy,
        name: "brcm-legacy",
        overhead: 6,
        promisc_on_master: false,
    },
    TagProtocol {
        id: TagProtocolId::BrcmPrepend,
        name: "brcm-prepend",
        overhead: 4,
        promisc_on_master: true,
    },
    TagProtocol {
        id: TagProtocolId::Dsa,
        name: "dsa",
        overhead: 4,
        promisc_on_master: false,
    },
    TagProtocol {
        id: TagProtocolId::Edsa,
        name: "edsa",
        overhead: 8,
        promisc_on_master: false,
    },
    TagProtocol {
        id: TagProtocolId::Vlan8021q,
        name: "8021q",
        overhead: 4,
        promisc_on_master: false,
    },
];

#[derive(Debug)]
struct TagEntry {
    protocol: TagProtocol,
    available: AtomicBool,
    refs: AtomicUsize,
}

/// All known tagging protocols, and which of them can currently be used.
#[derive(Debug)]
pub struct TagRegistry {
    entries: Vec<Arc<TagEntry>>,
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TagRegistry {
    /// A registry holding every built-in protocol, all available
    pub fn new() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|&protocol| {
                Arc::new(TagEntry {
                    protocol,
                    available: AtomicBool::new(true),
                    refs: AtomicUsize::new(0),
                })
            })
            .collect();
        Self { entries }
    }

    fn entry(&self, id: TagProtocolId) -> Option<&Arc<TagEntry>> {
        self.entries.iter().find(|e| e.protocol.id == id)
    }

    /// Mark a protocol as (un)loadable. Existing references stay valid.
    pub fn set_available(&self, id: TagProtocolId, available: bool) {
        if let Some(entry) = self.entry(id) {
            entry.available.store(available, Ordering::Release);
        }
    }

    /// Description of a protocol, without taking a reference
    pub fn protocol(&self, id: TagProtocolId) -> Option<TagProtocol> {
        self.entry(id).map(|e| e.protocol)
    }

    /// Number of live references to a protocol
    pub fn refcount(&self, id: TagProtocolId) -> usize {
        self.entry(id)
            .map(|e| e.refs.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn take(entry: &Arc<TagEntry>) -> Result<TagRef> {
        if !entry.available.load(Ordering::Acquire) {
            return Err(Error::NotFound(format!(
                "tag protocol {} is not loaded",
                entry.protocol.name
            )));
        }
        entry.refs.fetch_add(1, Ordering::AcqRel);
        Ok(TagRef {
            entry: entry.clone(),
        })
    }

    /// Take a reference to a protocol by id
    pub fn get(&self, id: TagProtocolId) -> Result<TagRef> {
        let entry = self
            .entry(id)
            .ok_or_else(|| Error::NotFound(format!("tag protocol {id:?}")))?;
        Self::take(entry)
    }

    /// Take a reference to a protocol by name. A trailing newline on `name`
    /// is ignored.
    pub fn find_by_name(&self, name: &str) -> Result<TagRef> {
        let name = crate::attr::trim_terminator(name);
        let entry = self
            .entries
            .iter()
            .find(|e| e.protocol.name == name)
            .ok_or_else(|| Error::NotFound(format!("tag protocol {name:?}")))?;
        Self::take(entry)
    }
}

/// Counted reference to a registered tagging protocol
#[derive(Debug)]
pub struct TagRef {
    entry: Arc<TagEntry>,
}

impl TagRef {
    pub fn protocol(&self) -> &TagProtocol {
        &self.entry.protocol
    }

    pub fn id(&self) -> TagProtocolId {
        self.entry.protocol.id
    }
}

impl Drop for TagRef {
    fn drop(&mut self) {
        self.entry.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let registry = TagRegistry::new();
        let tag = registry.find_by_name("brcm-prepend\n").unwrap();
        assert_eq!(tag.id(), TagProtocolId::BrcmPrepend);
        assert_eq!(tag.protocol().overhead, 4);
        assert!(tag.protocol().promisc_on_master);

        assert!(matches!(
            registry.find_by_name("bogus"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn references_are_counted() {
        let registry = TagRegistry::new();
        assert_eq!(registry.refcount(TagProtocolId::Edsa), 0);

        let a = registry.get(TagProtocolId::Edsa).unwrap();
        let b = registry.find_by_name("edsa").unwrap();
        assert_eq!(registry.refcount(TagProtocolId::Edsa), 2);

        drop(a);
        assert_eq!(registry.refcount(TagProtocolId::Edsa), 1);
        drop(b);
        assert_eq!(registry.refcount(TagProtocolId::Edsa), 0);
    }

    #[test]
    fn unavailable_protocol() {
        let registry = TagRegistry::new();
        let held = registry.get(TagProtocolId::Dsa).unwrap();

        registry.set_available(TagProtocolId::Dsa, false);
        assert!(matches!(
            registry.find_by_name("dsa"),
            Err(Error::NotFound(_))
        ));
        assert_eq!(registry.refcount(TagProtocolId::Dsa), 1);
        assert_eq!(held.protocol().name, "dsa");
        assert_eq!(
            registry.protocol(TagProtocolId::Dsa).map(|p| p.name),
            Some("dsa")
        );
    }
}

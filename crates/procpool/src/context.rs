//! Browser contexts (profiles) that every pool and registry is keyed by

use crate::{ids::BrowserContextId, site::StoragePartitionConfig};

/// One browsing profile
#[derive(Debug, Clone)]
pub struct BrowserContext {
    id: BrowserContextId,
    name: String,
    off_the_record: bool,
    destroyed: bool,
}

impl BrowserContext {
    pub(crate) fn new(id: BrowserContextId, name: impl Into<String>, off_the_record: bool) -> Self {
        Self {
            id,
            name: name.into(),
            off_the_record,
            destroyed: false,
        }
    }

    pub fn id(&self) -> BrowserContextId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_off_the_record(&self) -> bool {
        self.off_the_record
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    /// Partition used when nothing more specific applies
    pub fn default_storage_partition(&self) -> StoragePartitionConfig {
        StoragePartitionConfig::default_for(self.off_the_record)
    }
}

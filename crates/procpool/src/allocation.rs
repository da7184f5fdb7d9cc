//! Per-attempt allocation context

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::NavigationId;

/// Who is asking for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ProcessAllocationSource {
    /// Initialising a root frame host
    RfhInitRoot = 0,
    NavigationRequest = 1,
    ServiceWorkerProcessManager = 2,
    SharedWorker = 3,
    Embedder = 4,
    Test = 5,
    NoProcessCreationExpected = 6,
}

impl ProcessAllocationSource {
    /// Name used in histogram suffixes
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RfhInitRoot => "RFHInitRoot",
            Self::NavigationRequest => "NavigationRequest",
            Self::ServiceWorkerProcessManager => "ServiceWorkerProcessManager",
            Self::SharedWorker => "SharedWorker",
            Self::Embedder => "Embedder",
            Self::Test => "Test",
            Self::NoProcessCreationExpected => "NoProcessCreationExpected",
        }
    }
}

impl fmt::Display for ProcessAllocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a navigation had progressed when it asked for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum NavigationStage {
    BeforeNetworkRequest = 0,
    AfterRedirect = 1,
    AfterResponse = 2,
}

impl NavigationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeNetworkRequest => "BeforeNetworkRequest",
            Self::AfterRedirect => "AfterRedirect",
            Self::AfterResponse => "AfterResponse",
        }
    }
}

/// Navigation details attached to an allocation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NavigationProcessAllocationContext {
    pub stage: NavigationStage,
    pub navigation_id: NavigationId,
    pub requires_new_browsing_context_group_for_coop: bool,
}

/// Immutable description of one allocation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessAllocationContext {
    pub source: ProcessAllocationSource,
    pub navigation: Option<NavigationProcessAllocationContext>,
}

impl ProcessAllocationContext {
    /// Context for a non-navigation source
    pub fn new(source: ProcessAllocationSource) -> Self {
        Self {
            source,
            navigation: None,
        }
    }

    /// Context for a navigation request
    pub fn for_navigation(
        stage: NavigationStage,
        navigation_id: NavigationId,
        requires_new_browsing_context_group_for_coop: bool,
    ) -> Self {
        Self {
            source: ProcessAllocationSource::NavigationRequest,
            navigation: Some(NavigationProcessAllocationContext {
                stage,
                navigation_id,
                requires_new_browsing_context_group_for_coop,
            }),
        }
    }

    pub fn is_navigation(&self) -> bool {
        self.source == ProcessAllocationSource::NavigationRequest
    }

    pub fn stage(&self) -> Option<NavigationStage> {
        self.navigation.map(|nav| nav.stage)
    }

    pub fn requires_coop_group(&self) -> bool {
        self.navigation
            .map(|nav| nav.requires_new_browsing_context_group_for_coop)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_context() {
        let ctx = ProcessAllocationContext::for_navigation(
            NavigationStage::AfterResponse,
            NavigationId(7),
            true,
        );
        assert!(ctx.is_navigation());
        assert_eq!(ctx.stage(), Some(NavigationStage::AfterResponse));
        assert!(ctx.requires_coop_group());

        let worker = ProcessAllocationContext::new(ProcessAllocationSource::SharedWorker);
        assert!(!worker.is_navigation());
        assert_eq!(worker.stage(), None);
        assert!(!worker.requires_coop_group());
    }

    #[test]
    fn test_stable_values() {
        assert_eq!(ProcessAllocationSource::NavigationRequest as i32, 1);
        assert_eq!(NavigationStage::AfterResponse as i32, 2);
    }
}

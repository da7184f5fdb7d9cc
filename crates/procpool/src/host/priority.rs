//! Process priority derived from the host's inputs

use std::collections::BTreeMap;

use procpool_config::Platform;
use serde::{Deserialize, Serialize};

/// Scheduling class pushed to the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum PriorityLevel {
    #[default]
    BestEffort,
    UserVisible,
    UserBlocking,
}

/// Importance hint consumed by mobile OS reclaimers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ChildProcessImportance {
    #[default]
    Normal,
    Moderate,
    Important,
}

/// One frame or widget's view of how important the process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityClient {
    pub visible: bool,
    pub frame_depth: u32,
    pub intersects_viewport: bool,
    pub importance: ChildProcessImportance,
}

impl PriorityClient {
    pub fn visible(frame_depth: u32) -> Self {
        Self {
            visible: true,
            frame_depth,
            intersects_viewport: true,
            importance: ChildProcessImportance::Normal,
        }
    }

    pub fn hidden(frame_depth: u32) -> Self {
        Self {
            visible: false,
            frame_depth,
            intersects_viewport: false,
            importance: ChildProcessImportance::Normal,
        }
    }
}

/// Handle for a registered [`PriorityClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriorityClientId(pub u64);

/// The derived priority of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessPriority {
    pub level: PriorityLevel,
    pub visible: bool,
    pub frame_depth: u32,
    pub intersects_viewport: bool,
    pub boost_for_loading: bool,
    pub is_spare: bool,
    /// Only reported on mobile
    pub importance: Option<ChildProcessImportance>,
}

impl Default for ProcessPriority {
    fn default() -> Self {
        Self {
            level: PriorityLevel::BestEffort,
            visible: false,
            frame_depth: u32::MAX,
            intersects_viewport: false,
            boost_for_loading: false,
            is_spare: false,
            importance: None,
        }
    }
}

/// Every input the priority is computed from
#[derive(Debug, Clone, Default)]
pub(crate) struct PriorityInputs {
    pub(crate) clients: BTreeMap<PriorityClientId, PriorityClient>,
    pub(crate) next_client: u64,
    pub(crate) media_streams: u32,
    pub(crate) foreground_service_workers: u32,
    pub(crate) loading_boosts: u32,
    pub(crate) immersive_xr: bool,
    pub(crate) spare: bool,
    pub(crate) override_level: Option<PriorityLevel>,
}

impl PriorityInputs {
    pub(crate) fn compute(&self, platform: Platform) -> ProcessPriority {
        let visible = self.clients.values().any(|c| c.visible);
        let intersects_viewport = self
            .clients
            .values()
            .any(|c| c.visible && c.intersects_viewport);
        let frame_depth = self
            .clients
            .values()
            .filter(|c| c.visible)
            .map(|c| c.frame_depth)
            .min()
            .or_else(|| self.clients.values().map(|c| c.frame_depth).min())
            .unwrap_or(u32::MAX);
        let boost_for_loading = self.loading_boosts > 0;

        let derived = if visible || self.immersive_xr {
            PriorityLevel::UserBlocking
        } else if self.media_streams > 0
            || self.foreground_service_workers > 0
            || boost_for_loading
            || self.spare
        {
            PriorityLevel::UserVisible
        } else {
            PriorityLevel::BestEffort
        };

        let importance = (platform == Platform::Mobile).then(|| {
            self.clients
                .values()
                .map(|c| c.importance)
                .max()
                .unwrap_or_default()
        });

        ProcessPriority {
            level: self.override_level.unwrap_or(derived),
            visible,
            frame_depth,
            intersects_viewport,
            boost_for_loading,
            is_spare: self.spare,
            importance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_clients(clients: &[PriorityClient]) -> PriorityInputs {
        let mut inputs = PriorityInputs::default();
        for (i, client) in clients.iter().enumerate() {
            inputs.clients.insert(PriorityClientId(i as u64), *client);
        }
        inputs
    }

    #[test]
    fn test_no_inputs_is_best_effort() {
        let priority = PriorityInputs::default().compute(Platform::Desktop);
        assert_eq!(priority, ProcessPriority::default());
    }

    #[test]
    fn test_visible_client_blocks() {
        let inputs = with_clients(&[PriorityClient::hidden(0), PriorityClient::visible(2)]);
        let priority = inputs.compute(Platform::Desktop);
        assert_eq!(priority.level, PriorityLevel::UserBlocking);
        assert_eq!(priority.frame_depth, 2);
        assert!(priority.intersects_viewport);
    }

    #[test]
    fn test_hidden_depth_used_without_visible_clients() {
        let inputs = with_clients(&[PriorityClient::hidden(3), PriorityClient::hidden(1)]);
        let priority = inputs.compute(Platform::Desktop);
        assert_eq!(priority.level, PriorityLevel::BestEffort);
        assert_eq!(priority.frame_depth, 1);
    }

    #[test]
    fn test_background_work_is_user_visible() {
        let mut inputs = PriorityInputs::default();
        inputs.media_streams = 1;
        assert_eq!(inputs.compute(Platform::Desktop).level, PriorityLevel::UserVisible);

        let mut inputs = PriorityInputs::default();
        inputs.loading_boosts = 2;
        let priority = inputs.compute(Platform::Desktop);
        assert!(priority.boost_for_loading);
        assert_eq!(priority.level, PriorityLevel::UserVisible);
    }

    #[test]
    fn test_override_wins() {
        let mut inputs = with_clients(&[PriorityClient::visible(0)]);
        inputs.override_level = Some(PriorityLevel::BestEffort);
        assert_eq!(inputs.compute(Platform::Desktop).level, PriorityLevel::BestEffort);
    }

    #[test]
    fn test_importance_only_on_mobile() {
        let mut client = PriorityClient::hidden(0);
        client.importance = ChildProcessImportance::Moderate;
        let inputs = with_clients(&[client]);
        assert_eq!(inputs.compute(Platform::Desktop).importance, None);
        assert_eq!(
            inputs.compute(Platform::Mobile).importance,
            Some(ChildProcessImportance::Moderate)
        );
    }
}

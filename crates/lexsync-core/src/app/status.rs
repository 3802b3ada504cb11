//! Status - 同期状態のスナップショット
//!
//! RealtimeSync::status() が返す表示用のビューです。

use std::collections::BTreeMap;

use serde::Serialize;

use super::channel::ChannelState;
use crate::domain::{ChangeEvent, EntityType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub channel: ChannelState,
    pub polling_fallback: bool,
    pub buffered_changes: usize,
    /// Buffered change count per entity type; types with no changes are omitted.
    pub per_entity: BTreeMap<EntityType, usize>,
}

impl SyncStatus {
    pub fn new(channel: ChannelState, buffered: &[ChangeEvent]) -> Self {
        let mut per_entity = BTreeMap::new();
        for event in buffered {
            *per_entity.entry(event.entity_type).or_insert(0) += 1;
        }
        Self {
            channel,
            polling_fallback: !channel.is_connected(),
            buffered_changes: buffered.len(),
            per_entity,
        }
    }
}

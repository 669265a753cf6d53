use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::Rng;
use time::OffsetDateTime;
use tracing::warn;

use crate::channel::{Channel, ChannelId, ChannelStatus};
use crate::state::{ChannelStateEvent, StateSink};

/// Shared, lock-free view of every configured channel.
///
/// Readers take a snapshot; status flips replace the snapshot with `rcu` so a
/// concurrent reader never sees a half-applied update.
pub struct ChannelPool {
    snapshot: ArcSwap<Vec<Arc<Channel>>>,
    sink: Option<Arc<dyn StateSink>>,
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("ChannelPool")
            .field("channel_count", &snapshot.len())
            .field(
                "enabled_count",
                &snapshot.iter().filter(|channel| channel.is_enabled()).count(),
            )
            .finish()
    }
}

impl ChannelPool {
    pub fn new(channels: Vec<Channel>, sink: Option<Arc<dyn StateSink>>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(channels.into_iter().map(Arc::new).collect()),
            sink,
        }
    }

    pub fn replace_snapshot(&self, channels: Vec<Channel>) {
        self.snapshot
            .store(Arc::new(channels.into_iter().map(Arc::new).collect()));
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<Channel>>> {
        self.snapshot.load_full()
    }

    pub fn get(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.snapshot
            .load()
            .iter()
            .find(|channel| channel.id == id)
            .cloned()
    }

    /// Picks an enabled channel serving `model`, skipping `exclude`.
    ///
    /// Only the highest priority tier is considered; inside it the pick is
    /// weighted random.
    pub fn select(&self, model: &str, exclude: &[ChannelId]) -> Option<Arc<Channel>> {
        let snapshot = self.snapshot.load();
        let candidates: Vec<&Arc<Channel>> = snapshot
            .iter()
            .filter(|channel| channel.is_enabled())
            .filter(|channel| channel.supports_model(model))
            .filter(|channel| !exclude.contains(&channel.id))
            .collect();
        let top = candidates.iter().map(|channel| channel.priority).max()?;
        let tier: Vec<&Arc<Channel>> = candidates
            .into_iter()
            .filter(|channel| channel.priority == top)
            .collect();
        let weights: Vec<u32> = tier.iter().map(|channel| channel.weight).collect();
        let index = pick_weighted_index(&weights);
        tier.get(index).map(|channel| Arc::clone(channel))
    }

    /// Marks a channel auto-disabled. Returns `true` only for the call that
    /// actually flipped the status.
    pub async fn disable(&self, id: ChannelId, reason: &str) -> bool {
        let previous = self.snapshot.rcu(|current| {
            current
                .iter()
                .map(|channel| {
                    if channel.id == id && channel.is_enabled() {
                        let mut next = Channel::clone(channel);
                        next.status = ChannelStatus::AutoDisabled;
                        Arc::new(next)
                    } else {
                        Arc::clone(channel)
                    }
                })
                .collect::<Vec<_>>()
        });
        let flipped = previous
            .iter()
            .any(|channel| channel.id == id && channel.is_enabled());
        if !flipped {
            return false;
        }

        warn!(event = "channel_disabled", channel_id = id, reason = %reason);
        if let Some(sink) = &self.sink {
            sink.submit(ChannelStateEvent::StatusChanged {
                channel_id: id,
                status: ChannelStatus::AutoDisabled,
                reason: Some(reason.to_string()),
                at: OffsetDateTime::now_utc(),
            })
            .await;
        }
        true
    }
}

fn pick_weighted_index(weights: &[u32]) -> usize {
    if weights.is_empty() {
        return 0;
    }

    let total: u64 = weights.iter().map(|weight| *weight as u64).sum();
    if total == 0 {
        return rand::rng().random_range(0..weights.len());
    }

    let mut roll = rand::rng().random_range(0..total);
    for (index, weight) in weights.iter().enumerate() {
        let weight = *weight as u64;
        if roll < weight {
            return index;
        }
        roll -= weight;
    }

    weights.len() - 1
}

//! Outgoing message routing.
//!
//! Envelopes whose receiver lives in the same region go to a local inbox
//! and are dispatched before the region's turn ends. Everything else is
//! aggregated into one [`MessageBatch`] per destination region.

use indexmap::IndexMap;

use runnel_core::RegionId;
use runnel_neighbor::{Envelope, MessageBatch};

/// Sorts a region's outgoing envelopes by destination.
#[derive(Debug)]
pub struct Router {
    region: RegionId,
    local: Vec<Envelope>,
    outgoing: IndexMap<RegionId, MessageBatch>,
}

impl Router {
    /// A router for `region` with nothing queued.
    pub fn new(region: RegionId) -> Self {
        Self {
            region,
            local: Vec::new(),
            outgoing: IndexMap::new(),
        }
    }

    /// Queue `envelope` for the region owning its receiver.
    pub fn route(&mut self, envelope: Envelope, destination: RegionId) {
        if destination == self.region {
            self.local.push(envelope);
        } else {
            let from = self.region;
            self.outgoing
                .entry(destination)
                .or_insert_with(|| MessageBatch::new(from, destination))
                .envelopes
                .push(envelope);
        }
    }

    /// Whether any same-region envelope is waiting.
    pub fn has_local(&self) -> bool {
        !self.local.is_empty()
    }

    /// Drain the local inbox in arrival order.
    pub fn take_local(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.local)
    }

    /// Number of envelopes waiting for other regions.
    pub fn pending_remote(&self) -> usize {
        self.outgoing.values().map(MessageBatch::len).sum()
    }

    /// Drain one batch per destination, in order of first use.
    pub fn take_batches(&mut self) -> Vec<MessageBatch> {
        self.outgoing.drain(..).map(|(_, batch)| batch).collect()
    }
}

use std::sync::Arc;

use log::debug;
use tokio::time::Instant;

use mir_core::{Data, FaceId, Interest, Nack, NackReason, PushPacket};

use super::{propagate_aggregated_nack, DefaultTriggers, Strategy, BEST_ROUTE};
use crate::forwarder::Forwarder;
use crate::pit::PitEntry;

/// Forward each Interest to the single cheapest next hop.
///
/// An Interest arriving while an upstream is still pending is aggregated
/// into the existing PIT entry instead of being forwarded again.
#[derive(Debug, Default)]
pub struct BestRoute {
    defaults: DefaultTriggers,
}

impl BestRoute {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for BestRoute {
    fn name(&self) -> &str {
        BEST_ROUTE
    }

    fn after_receive_interest(
        &self,
        fw: &Forwarder,
        ingress: FaceId,
        interest: &Interest,
        pit_entry: &Arc<PitEntry>,
    ) {
        if pit_entry.has_pending_out_records(Instant::now()) {
            debug!("Suppressing {} from {}: upstream pending", interest.name, ingress);
            return;
        }

        let next_hop = fw.fib_lookup(&interest.name).and_then(|entry| {
            entry.lowest_cost_next_hop(|face| face != ingress && fw.has_face(face))
        });
        match next_hop {
            Some(hop) => {
                debug!("Forwarding {} to {} (cost: {})", interest.name, hop.face, hop.cost);
                fw.send_interest(pit_entry, hop.face, interest);
            }
            None => {
                debug!("No route for {} from {}", interest.name, ingress);
                fw.send_nack(pit_entry, ingress, NackReason::NoRoute);
                fw.set_expiry_now(pit_entry);
            }
        }
    }

    fn after_content_store_hit(
        &self,
        fw: &Forwarder,
        ingress: FaceId,
        data: &Data,
        pit_entry: &Arc<PitEntry>,
    ) {
        self.defaults.after_content_store_hit(fw, ingress, data, pit_entry);
    }

    fn after_receive_data(
        &self,
        fw: &Forwarder,
        ingress: FaceId,
        data: &Data,
        pit_entry: &Arc<PitEntry>,
    ) {
        self.defaults.after_receive_data(fw, ingress, data, pit_entry);
    }

    fn after_receive_nack(
        &self,
        fw: &Forwarder,
        _ingress: FaceId,
        _nack: &Nack,
        pit_entry: &Arc<PitEntry>,
    ) {
        propagate_aggregated_nack(fw, pit_entry);
    }

    fn after_receive_push_packet(&self, fw: &Forwarder, ingress: FaceId, packet: &PushPacket) {
        self.defaults.after_receive_push_packet(fw, ingress, packet);
    }
}

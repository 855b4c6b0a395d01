//! Forwarding strategies.
//!
//! A strategy decides where, and whether, a request is forwarded. The
//! forwarder calls one trigger per pipeline point; the strategy answers by
//! calling the forwarder's send actions.

use std::sync::Arc;

use log::{debug, trace};

use mir_core::{Data, FaceId, Interest, Nack, NackReason, PushPacket};

use crate::error::{FwError, Result};
use crate::forwarder::Forwarder;
use crate::pit::PitEntry;

mod best_route;
mod multicast;

pub use best_route::BestRoute;
pub use multicast::Multicast;

pub const BEST_ROUTE: &str = "best-route";
pub const MULTICAST: &str = "multicast";

/// Names accepted by [`create_strategy`]
pub const KNOWN_STRATEGIES: &[&str] = &[BEST_ROUTE, MULTICAST];

/// Forwarding decision policy
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// The Interest is not looping and missed the cache. Must either forward
    /// it or force expiry of `pit_entry`.
    fn after_receive_interest(
        &self,
        fw: &Forwarder,
        ingress: FaceId,
        interest: &Interest,
        pit_entry: &Arc<PitEntry>,
    );

    fn after_content_store_hit(
        &self,
        fw: &Forwarder,
        ingress: FaceId,
        data: &Data,
        pit_entry: &Arc<PitEntry>,
    );

    fn after_receive_data(
        &self,
        fw: &Forwarder,
        ingress: FaceId,
        data: &Data,
        pit_entry: &Arc<PitEntry>,
    );

    /// The Nack reason is already stored on the out-record for `ingress`.
    fn after_receive_nack(
        &self,
        fw: &Forwarder,
        ingress: FaceId,
        nack: &Nack,
        pit_entry: &Arc<PitEntry>,
    );

    fn after_receive_push_packet(&self, fw: &Forwarder, ingress: FaceId, packet: &PushPacket);
}

/// Stock trigger behavior that concrete strategies delegate to.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTriggers;

impl DefaultTriggers {
    /// Answer the requester from the cache.
    pub fn after_content_store_hit(
        &self,
        fw: &Forwarder,
        ingress: FaceId,
        data: &Data,
        pit_entry: &Arc<PitEntry>,
    ) {
        fw.send_data(pit_entry, ingress, data);
    }

    /// Relay to every downstream except the one the Data came from, then let the entry expire.
    pub fn after_receive_data(
        &self,
        fw: &Forwarder,
        ingress: FaceId,
        data: &Data,
        pit_entry: &Arc<PitEntry>,
    ) {
        fw.send_data_to_all(pit_entry, Some(ingress), data);
        fw.set_expiry_now(pit_entry);
    }

    pub fn after_receive_nack(
        &self,
        _fw: &Forwarder,
        ingress: FaceId,
        nack: &Nack,
        pit_entry: &Arc<PitEntry>,
    ) {
        trace!(
            "Nack {} for {} from {} left to expire",
            nack.reason,
            pit_entry.name(),
            ingress
        );
    }

    /// Forward to the cheapest next hop other than `ingress`.
    pub fn after_receive_push_packet(&self, fw: &Forwarder, ingress: FaceId, packet: &PushPacket) {
        let next_hop = fw.fib_lookup(&packet.name).and_then(|entry| {
            entry.lowest_cost_next_hop(|face| face != ingress && fw.has_face(face))
        });
        match next_hop {
            Some(hop) => fw.send_push_packet(hop.face, packet),
            None => debug!("No route for push packet {} from {}", packet.name, ingress),
        }
    }
}

/// Least severe reason once every out-record of `pit_entry` has been Nacked.
///
/// Returns `None` while any upstream is still unanswered.
pub fn aggregate_nacks(pit_entry: &PitEntry) -> Option<NackReason> {
    let mut least_severe: Option<NackReason> = None;
    for record in pit_entry.out_records() {
        let reason = record.nack?;
        if least_severe.map_or(true, |current| reason.is_less_severe_than(current)) {
            least_severe = Some(reason);
        }
    }
    least_severe
}

/// Propagate the aggregated Nack downstream once all upstreams have given up.
pub(crate) fn propagate_aggregated_nack(fw: &Forwarder, pit_entry: &Arc<PitEntry>) {
    match aggregate_nacks(pit_entry) {
        Some(reason) => {
            debug!("All upstreams Nacked {}; sending {}", pit_entry.name(), reason);
            fw.send_nack_to_all(pit_entry, reason, None);
            fw.set_expiry_now(pit_entry);
        }
        None => trace!("Waiting on remaining upstreams for {}", pit_entry.name()),
    }
}

pub fn is_known(name: &str) -> bool {
    KNOWN_STRATEGIES.contains(&name)
}

/// Instantiate a strategy by name
pub fn create_strategy(name: &str) -> Result<Arc<dyn Strategy>> {
    match name {
        BEST_ROUTE => Ok(Arc::new(BestRoute::new())),
        MULTICAST => Ok(Arc::new(Multicast::new())),
        other => Err(FwError::UnknownStrategy(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mir_core::Name;
    use std::time::Duration;

    #[test]
    fn test_create_strategy() {
        assert_eq!(create_strategy(BEST_ROUTE).unwrap().name(), BEST_ROUTE);
        assert_eq!(create_strategy(MULTICAST).unwrap().name(), MULTICAST);
        assert!(matches!(
            create_strategy("ncc"),
            Err(FwError::UnknownStrategy(name)) if name == "ncc"
        ));
        assert!(is_known("multicast"));
        assert!(!is_known("random"));
    }

    #[test]
    fn test_aggregate_nacks_waits_for_every_upstream() {
        let interest = Interest::new(Name::from_str("/n"));
        let entry = PitEntry::new(interest.clone());
        assert_eq!(aggregate_nacks(&entry), None);

        for face in 1..=3 {
            entry.insert_or_update_out_record(FaceId(face), &interest, Duration::from_secs(1));
        }
        entry.record_nack(FaceId(1), NackReason::NoRoute).unwrap();
        entry.record_nack(FaceId(2), NackReason::Duplicate).unwrap();
        assert_eq!(aggregate_nacks(&entry), None);

        entry.record_nack(FaceId(3), NackReason::Congestion).unwrap();
        assert_eq!(aggregate_nacks(&entry), Some(NackReason::Congestion));
    }
}

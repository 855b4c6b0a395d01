use std::sync::Arc;

use log::debug;
use tokio::time::Instant;

use mir_core::{Data, FaceId, Interest, Nack, NackReason, PushPacket};

use super::{propagate_aggregated_nack, DefaultTriggers, Strategy, MULTICAST};
use crate::forwarder::Forwarder;
use crate::pit::PitEntry;

/// Forward each Interest to every eligible next hop.
#[derive(Debug, Default)]
pub struct Multicast {
    defaults: DefaultTriggers,
}

impl Multicast {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for Multicast {
    fn name(&self) -> &str {
        MULTICAST
    }

    fn after_receive_interest(
        &self,
        fw: &Forwarder,
        ingress: FaceId,
        interest: &Interest,
        pit_entry: &Arc<PitEntry>,
    ) {
        let now = Instant::now();
        let candidates: Vec<FaceId> = fw
            .fib_lookup(&interest.name)
            .map(|entry| {
                entry
                    .next_hops()
                    .into_iter()
                    .map(|hop| hop.face)
                    .filter(|&face| face != ingress && fw.has_face(face))
                    .collect()
            })
            .unwrap_or_default();

        if candidates.is_empty() {
            debug!("No route for {} from {}", interest.name, ingress);
            fw.send_nack(pit_entry, ingress, NackReason::NoRoute);
            fw.set_expiry_now(pit_entry);
            return;
        }

        let mut forwarded = 0;
        for face in candidates {
            let pending = pit_entry
                .out_record(face)
                .is_some_and(|record| record.is_pending(now));
            if !pending {
                fw.send_interest(pit_entry, face, interest);
                forwarded += 1;
            }
        }
        debug!("Multicast {} to {} upstreams", interest.name, forwarded);
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

#[cfg(test)]
mod tests {
    use mir_core::{Name, Packet};

    use crate::test_support::forwarder_with_faces;

    use super::*;

    #[tokio::test]
    async fn test_multicast_reaches_every_next_hop() {
        let (fw, faces) = forwarder_with_faces(4);
        let prefix = Name::from_str("/group");
        fw.strategy_table().set(&prefix, MULTICAST).unwrap();
        for face in 1..=4 {
            fw.fib().add_or_update(&prefix, FaceId(face), face);
        }

        let interest = Interest::new(Name::from_str("/group/chat"));
        fw.receive(FaceId(2), interest.clone().into());

        for (index, face) in faces.iter().enumerate() {
            let expected = if index == 1 { 0 } else { 1 };
            assert_eq!(face.interests().len(), expected, "face {}", index + 1);
        }
        let entry = fw.pit().find(&interest.name).unwrap();
        assert_eq!(entry.out_records().len(), 3);
    }

    #[tokio::test]
    async fn test_multicast_data_reaches_all_downstreams() {
        let (fw, faces) = forwarder_with_faces(3);
        let prefix = Name::from_str("/group");
        fw.strategy_table().set(&prefix, MULTICAST).unwrap();
        fw.fib().add_or_update(&prefix, FaceId(3), 1);

        fw.receive(FaceId(1), Interest::new(Name::from_str("/group/x")).into());
        fw.receive(FaceId(2), Interest::new(Name::from_str("/group/x")).into());
        assert_eq!(faces[2].interests().len(), 1);

        let data = mir_core::Data::new(Name::from_str("/group/x"), b"hi".to_vec());
        fw.receive(FaceId(3), data.clone().into());

        assert_eq!(faces[0].sent(), vec![Packet::Data(data.clone())]);
        assert_eq!(faces[1].sent(), vec![Packet::Data(data)]);
        assert!(fw.pit().is_empty());
    }
}

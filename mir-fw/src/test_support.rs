use std::sync::{Arc, Mutex};
use std::time::Duration;

use mir_core::{Data, FaceId, Interest, Nack, Packet};

use crate::config::ForwarderConfig;
use crate::error::Result;
use crate::face::{Face, FaceCounters};
use crate::forwarder::Forwarder;

/// Face that keeps every packet sent through it
pub(crate) struct RecordingFace {
    id: FaceId,
    sent: Mutex<Vec<Packet>>,
    counters: FaceCounters,
}

impl RecordingFace {
    pub(crate) fn new(id: FaceId) -> Arc<Self> {
        Arc::new(Self {
            id,
            sent: Mutex::new(Vec::new()),
            counters: FaceCounters::default(),
        })
    }

    pub(crate) fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn interests(&self) -> Vec<Interest> {
        self.sent()
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::Interest(interest) => Some(interest),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn data(&self) -> Vec<Data> {
        self.sent()
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::Data(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn nacks(&self) -> Vec<Nack> {
        self.sent()
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::Nack(nack) => Some(nack),
                _ => None,
            })
            .collect()
    }
}

impl Face for RecordingFace {
    fn id(&self) -> FaceId {
        self.id
    }

    fn send(&self, packet: Packet) -> Result<()> {
        self.counters.record_out();
        self.sent.lock().unwrap().push(packet);
        Ok(())
    }

    fn counters(&self) -> &FaceCounters {
        &self.counters
    }
}

/// Forwarder with recording faces `1..=count`; `faces[i]` has id `i + 1`.
pub(crate) fn forwarder_with_config(
    config: ForwarderConfig,
    count: u64,
) -> (Arc<Forwarder>, Vec<Arc<RecordingFace>>) {
    let forwarder = Forwarder::new(config).unwrap();
    let faces: Vec<Arc<RecordingFace>> = (1..=count).map(|id| RecordingFace::new(FaceId(id))).collect();
    for face in &faces {
        forwarder.add_face(face.clone());
    }
    (forwarder, faces)
}

pub(crate) fn forwarder_with_faces(count: u64) -> (Arc<Forwarder>, Vec<Arc<RecordingFace>>) {
    forwarder_with_config(ForwarderConfig::default(), count)
}

/// Let pending expiry timers run.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

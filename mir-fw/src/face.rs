//! Faces: the forwarder's attachment points to neighbors.
//!
//! The transport behind a face is not part of this crate. A face only needs
//! a non-blocking `send`; inbound packets reach the forwarder through one
//! ingress task per face.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mir_core::{FaceId, Packet};

use crate::error::{FwError, Result};
use crate::forwarder::Forwarder;

/// Per-face traffic counters
#[derive(Debug, Default)]
pub struct FaceCounters {
    in_packets: AtomicU64,
    out_packets: AtomicU64,
    dropped: AtomicU64,
}

impl FaceCounters {
    pub fn record_in(&self) {
        self.in_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out(&self) {
        self.out_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, id: FaceId) -> FaceStats {
        FaceStats {
            id,
            in_packets: self.in_packets.load(Ordering::Relaxed),
            out_packets: self.out_packets.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Face statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaceStats {
    pub id: FaceId,
    pub in_packets: u64,
    pub out_packets: u64,
    pub dropped: u64,
}

/// Endpoint the forwarder can send packets to
pub trait Face: Send + Sync {
    fn id(&self) -> FaceId;

    fn description(&self) -> &str {
        ""
    }

    /// Hand `packet` to the transport without blocking.
    fn send(&self, packet: Packet) -> Result<()>;

    fn counters(&self) -> &FaceCounters;
}

/// Face backed by a bounded outbound queue drained by the transport layer.
#[derive(Debug)]
pub struct QueueFace {
    id: FaceId,
    description: String,
    outbound: mpsc::Sender<Packet>,
    counters: FaceCounters,
}

impl QueueFace {
    /// Create the face and the receiving end of its outbound queue.
    pub fn new(
        id: FaceId,
        description: impl Into<String>,
        queue_size: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Packet>) {
        let (outbound, receiver) = mpsc::channel(queue_size.max(1));
        let face = Arc::new(Self {
            id,
            description: description.into(),
            outbound,
            counters: FaceCounters::default(),
        });
        (face, receiver)
    }
}

impl Face for QueueFace {
    fn id(&self) -> FaceId {
        self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn send(&self, packet: Packet) -> Result<()> {
        match self.outbound.try_send(packet) {
            Ok(()) => {
                self.counters.record_out();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(packet)) => {
                self.counters.record_dropped();
                warn!("Outbound queue of {} full, dropping {} {}", self.id, packet.kind(), packet.name());
                Err(FwError::QueueFull(self.id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.record_dropped();
                Err(FwError::FaceClosed(self.id))
            }
        }
    }

    fn counters(&self) -> &FaceCounters {
        &self.counters
    }
}

/// Registry of the faces attached to a forwarder
pub struct FaceTable {
    faces: RwLock<HashMap<FaceId, Arc<dyn Face>>>,
    next_id: AtomicU64,
}

impl Default for FaceTable {
    fn default() -> Self {
        Self {
            faces: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl FaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id no face of this table has used.
    pub fn allocate_id(&self) -> FaceId {
        FaceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register `face`, returning the face it replaced, if any.
    pub fn add(&self, face: Arc<dyn Face>) -> Option<Arc<dyn Face>> {
        let id = face.id();
        self.next_id.fetch_max(id.0 + 1, Ordering::Relaxed);
        self.faces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, face)
    }

    pub fn remove(&self, id: FaceId) -> Option<Arc<dyn Face>> {
        self.faces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn get(&self, id: FaceId) -> Option<Arc<dyn Face>> {
        self.faces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn contains(&self, id: FaceId) -> bool {
        self.faces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Registered face ids, ascending.
    pub fn ids(&self) -> Vec<FaceId> {
        let mut ids: Vec<FaceId> = self
            .faces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> Vec<FaceStats> {
        let mut stats: Vec<FaceStats> = self
            .faces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|face| face.counters().snapshot(face.id()))
            .collect();
        stats.sort_by_key(|face| face.id);
        stats
    }

    pub fn len(&self) -> usize {
        self.faces.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deliver packets from `inbound` into the forwarder until the queue closes
/// or nothing arrives for `idle_timeout`; the face is then torn down.
pub fn spawn_face_ingress(
    forwarder: Arc<Forwarder>,
    face: FaceId,
    mut inbound: mpsc::Receiver<Packet>,
    idle_timeout: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, inbound.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        info!("{} idle for {:?}, closing", face, limit);
                        break;
                    }
                },
                None => inbound.recv().await,
            };
            match received {
                Some(packet) => forwarder.receive(face, packet),
                None => {
                    debug!("Inbound queue of {} closed", face);
                    break;
                }
            }
        }
        forwarder.remove_face(face);
    })
}

/// Transport-side ends of a queue face attached with [`attach_queue_face`]
#[derive(Debug)]
pub struct FaceHandle {
    pub id: FaceId,
    /// Packets pushed here enter the forwarder's pipelines
    pub inbound: mpsc::Sender<Packet>,
    /// Packets the forwarder sends out through this face
    pub outbound: mpsc::Receiver<Packet>,
    pub ingress_task: JoinHandle<()>,
}

/// Create a [`QueueFace`], register it and start its ingress task, sizing
/// queues and idle timeout from the forwarder's configuration.
pub fn attach_queue_face(forwarder: &Arc<Forwarder>, description: impl Into<String>) -> FaceHandle {
    let config = forwarder.config();
    let id = forwarder.faces().allocate_id();
    let (face, outbound) = QueueFace::new(id, description, config.face_queue_size);
    let (inbound, inbound_rx) = mpsc::channel(config.face_queue_size.max(1));
    forwarder.add_face(face);
    let ingress_task = spawn_face_ingress(
        Arc::clone(forwarder),
        id,
        inbound_rx,
        config.face_idle_timeout(),
    );
    FaceHandle {
        id,
        inbound,
        outbound,
        ingress_task,
    }
}

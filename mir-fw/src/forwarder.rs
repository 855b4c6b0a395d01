//! Forwarding pipelines.
//!
//! Pipelines run inline on whichever task delivered the packet; there is no
//! dedicated forwarding thread. Everything shared between concurrent packets
//! is serialized by the tables themselves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, info, trace, warn};
use serde::Serialize;
use tokio::time::Instant;

use mir_core::{
    Data, FaceId, Interest, Nack, NackReason, Name, Packet, PushPacket, ValidationConfig,
};

use crate::config::ForwarderConfig;
use crate::cs::{new_content_store, ContentStore, CsStats};
use crate::error::Result;
use crate::face::{Face, FaceStats, FaceTable};
use crate::fib::{Fib, FibEntry};
use crate::pit::{Pit, PitEntry};
use crate::plugin::{Plugin, PluginChain};
use crate::strategy_table::StrategyTable;

#[derive(Debug, Default)]
struct Counters {
    in_interests: AtomicU64,
    in_data: AtomicU64,
    in_nacks: AtomicU64,
    in_push_packets: AtomicU64,
    out_interests: AtomicU64,
    out_data: AtomicU64,
    out_nacks: AtomicU64,
    out_push_packets: AtomicU64,
    satisfied_interests: AtomicU64,
    unsatisfied_interests: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_loops: AtomicU64,
    dropped_unsolicited: AtomicU64,
    dropped_hop_limit: AtomicU64,
    dropped_unknown_face: AtomicU64,
    dropped_by_plugin: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Snapshot of the pipeline counters and table sizes
#[derive(Debug, Clone, Serialize)]
pub struct ForwarderStats {
    pub in_interests: u64,
    pub in_data: u64,
    pub in_nacks: u64,
    pub in_push_packets: u64,
    pub out_interests: u64,
    pub out_data: u64,
    pub out_nacks: u64,
    pub out_push_packets: u64,
    pub satisfied_interests: u64,
    pub unsatisfied_interests: u64,
    pub dropped_malformed: u64,
    pub dropped_loops: u64,
    pub dropped_unsolicited: u64,
    pub dropped_hop_limit: u64,
    pub dropped_unknown_face: u64,
    pub dropped_by_plugin: u64,
    pub fib_entries: usize,
    pub fib_version: u64,
    pub pit_entries: usize,
    pub strategy_choices: usize,
    pub cs: CsStats,
    pub faces: Vec<FaceStats>,
}

/// The forwarding engine: owns every table and runs the packet pipelines.
pub struct Forwarder {
    me: Weak<Forwarder>,
    config: ForwarderConfig,
    validation: ValidationConfig,
    fib: Fib,
    pit: Pit,
    cs: Box<dyn ContentStore>,
    strategy_table: StrategyTable,
    faces: FaceTable,
    plugins: PluginChain,
    counters: Counters,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let strategy_table = StrategyTable::new(&config.default_strategy)?;
        let validation = ValidationConfig {
            max_name_components: config.max_name_components,
            ..Default::default()
        };
        let cs = new_content_store(config.cs_policy, config.cs_capacity);
        info!(
            "Forwarder created (cs: {} x{}, default strategy: {})",
            config.cs_policy, config.cs_capacity, config.default_strategy
        );
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            validation,
            fib: Fib::new(),
            pit: Pit::new(),
            cs,
            strategy_table,
            faces: FaceTable::new(),
            plugins: PluginChain::new(),
            counters: Counters::default(),
        }))
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn fib(&self) -> &Fib {
        &self.fib
    }

    pub fn pit(&self) -> &Pit {
        &self.pit
    }

    pub fn cs(&self) -> &dyn ContentStore {
        self.cs.as_ref()
    }

    pub fn strategy_table(&self) -> &StrategyTable {
        &self.strategy_table
    }

    pub fn faces(&self) -> &FaceTable {
        &self.faces
    }

    pub fn plugins(&self) -> &PluginChain {
        &self.plugins
    }

    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) {
        self.plugins.register(plugin);
    }

    pub fn add_face(&self, face: Arc<dyn Face>) {
        let id = face.id();
        if self.faces.add(face).is_some() {
            warn!("{} replaced an existing face", id);
        }
        info!("{} attached", id);
    }

    pub fn has_face(&self, face: FaceId) -> bool {
        self.faces.contains(face)
    }

    /// Detach `face` and purge it from the FIB and the PIT. PIT entries
    /// left without records are finalized as unsatisfied.
    pub fn remove_face(&self, face: FaceId) -> bool {
        let removed = self.faces.remove(face).is_some();
        let routes = self.fib.remove_next_hop_by_endpoint(face);
        let erased = self.pit.erase_by_endpoint(face);
        for entry in &erased.orphaned {
            self.on_interest_finalize(entry);
        }
        if removed {
            info!(
                "{} detached ({} routes, {} PIT records removed, {} entries finalized)",
                face,
                routes,
                erased.records,
                erased.orphaned.len()
            );
        }
        removed
    }

    /// Entry point for every packet a face delivers.
    pub fn receive(&self, ingress: FaceId, packet: Packet) {
        let Some(face) = self.faces.get(ingress) else {
            bump(&self.counters.dropped_unknown_face);
            debug!("Dropping {} {} from unknown {}", packet.kind(), packet.name(), ingress);
            return;
        };
        face.counters().record_in();

        if let Err(e) = packet.validate(&self.validation) {
            bump(&self.counters.dropped_malformed);
            warn!("Dropping malformed {} from {}: {}", packet.kind(), ingress, e);
            return;
        }

        match packet {
            Packet::Interest(interest) => self.on_incoming_interest(ingress, interest),
            Packet::Data(data) => self.on_incoming_data(ingress, data),
            Packet::Nack(nack) => self.on_incoming_nack(ingress, nack),
            Packet::Push(push) => self.on_incoming_push_packet(ingress, push),
        }
    }

    fn on_incoming_interest(&self, ingress: FaceId, interest: Interest) {
        bump(&self.counters.in_interests);
        trace!("Interest {} from {} (nonce {})", interest.name, ingress, interest.nonce);

        if self.plugins.run(|plugin| plugin.on_incoming_interest(ingress, &interest)) != 0 {
            bump(&self.counters.dropped_by_plugin);
            return;
        }

        if interest.hop_limit == Some(0) {
            bump(&self.counters.dropped_hop_limit);
            debug!("Dropping {} from {}: hop limit exhausted", interest.name, ingress);
            return;
        }

        let strategy = self.strategy_table.find_effective(&interest.name);
        let lifetime = interest.lifetime.unwrap_or_else(|| self.config.pit_lifetime());

        // An entry can close between lookup and recording (Data consumed it
        // or it finalized); start over on a fresh entry when that happens.
        let pit_entry = loop {
            let pit_entry = self.pit.insert(&interest);
            let duplicate = pit_entry.find_duplicate_nonce(interest.nonce, ingress);
            if duplicate.is_loop() {
                self.on_interest_loop(ingress, &interest, &pit_entry);
                return;
            }

            if let Some(entry) = self.cs.find(&interest) {
                debug!("CS hit for {} from {}", interest.name, ingress);
                strategy.after_content_store_hit(self, ingress, &entry.data, &pit_entry);
                if pit_entry.close_if_idle() {
                    pit_entry.set_satisfied(true);
                    self.on_interest_finalize(&pit_entry);
                }
                return;
            }

            match pit_entry.insert_or_update_in_record(ingress, &interest, lifetime) {
                Ok(_) => break pit_entry,
                Err(e) => debug!("Retrying {} from {}: {}", interest.name, ingress, e),
            }
        };
        self.arm_expiry_timer(&pit_entry);

        strategy.after_receive_interest(self, ingress, &interest, &pit_entry);
    }

    fn on_interest_loop(&self, ingress: FaceId, interest: &Interest, pit_entry: &Arc<PitEntry>) {
        bump(&self.counters.dropped_loops);
        debug!(
            "Dropping looping {} from {} (nonce {})",
            interest.name, ingress, interest.nonce
        );
        // The lookup may have created the entry; don't leave it without records.
        if pit_entry.close_if_idle() {
            self.on_interest_finalize(pit_entry);
        }
    }

    fn on_incoming_data(&self, ingress: FaceId, data: Data) {
        bump(&self.counters.in_data);
        trace!("Data {} from {}", data.name, ingress);

        if self.plugins.run(|plugin| plugin.on_incoming_data(ingress, &data)) != 0 {
            bump(&self.counters.dropped_by_plugin);
            return;
        }

        let Some(pit_entry) = self.pit.find_data_matches(&data) else {
            bump(&self.counters.dropped_unsolicited);
            debug!("Dropping unsolicited Data {} from {}", data.name, ingress);
            return;
        };

        self.cs.insert(data.clone());
        pit_entry.set_satisfied(true);

        let strategy = self.strategy_table.find_effective(pit_entry.name());
        strategy.after_receive_data(self, ingress, &data, &pit_entry);
        self.on_interest_finalize(&pit_entry);
    }

    fn on_incoming_nack(&self, ingress: FaceId, nack: Nack) {
        bump(&self.counters.in_nacks);
        trace!("Nack {} for {} from {}", nack.reason, nack.name(), ingress);

        if self.plugins.run(|plugin| plugin.on_incoming_nack(ingress, &nack)) != 0 {
            bump(&self.counters.dropped_by_plugin);
            return;
        }

        let Some(pit_entry) = self.pit.find(nack.name()) else {
            debug!("Dropping Nack for {} from {}: no PIT entry", nack.name(), ingress);
            return;
        };
        let Some(out_record) = pit_entry.out_record(ingress) else {
            debug!("Dropping Nack for {} from {}: not forwarded there", nack.name(), ingress);
            return;
        };
        if out_record.nonce != nack.interest.nonce {
            debug!(
                "Dropping Nack for {} from {}: nonce {} does not match {}",
                nack.name(),
                ingress,
                nack.interest.nonce,
                out_record.nonce
            );
            return;
        }
        if let Err(e) = pit_entry.record_nack(ingress, nack.reason) {
            debug!("Nack for {} lost its out-record: {}", nack.name(), e);
            return;
        }

        let strategy = self.strategy_table.find_effective(pit_entry.name());
        strategy.after_receive_nack(self, ingress, &nack, &pit_entry);
    }

    fn on_incoming_push_packet(&self, ingress: FaceId, packet: PushPacket) {
        bump(&self.counters.in_push_packets);
        trace!("Push packet {} from {}", packet.name, ingress);

        if self.plugins.run(|plugin| plugin.on_incoming_push_packet(ingress, &packet)) != 0 {
            bump(&self.counters.dropped_by_plugin);
            return;
        }

        let strategy = self.strategy_table.find_effective(&packet.name);
        strategy.after_receive_push_packet(self, ingress, &packet);
    }

    /// Remove `pit_entry` from service. Safe to call more than once.
    pub fn on_interest_finalize(&self, pit_entry: &Arc<PitEntry>) {
        if !pit_entry.mark_finalized() {
            return;
        }
        pit_entry.cancel_expiry_timer();
        if pit_entry.is_satisfied() {
            bump(&self.counters.satisfied_interests);
        } else {
            bump(&self.counters.unsatisfied_interests);
        }
        pit_entry.clear_in_records();
        pit_entry.clear_out_records();
        self.pit.erase_by_entry(pit_entry);
        debug!(
            "PIT entry {} finalized ({})",
            pit_entry.name(),
            if pit_entry.is_satisfied() { "satisfied" } else { "unsatisfied" }
        );
    }

    /// Forward `interest` to `egress`, recording the out-record first.
    pub fn send_interest(&self, pit_entry: &Arc<PitEntry>, egress: FaceId, interest: &Interest) {
        let mut outgoing = interest.clone();
        if let Some(hop_limit) = outgoing.hop_limit {
            outgoing.hop_limit = Some(hop_limit.saturating_sub(1));
        }

        if self.plugins.run(|plugin| plugin.on_outgoing_interest(egress, &outgoing)) != 0 {
            bump(&self.counters.dropped_by_plugin);
            return;
        }

        let lifetime = outgoing.lifetime.unwrap_or_else(|| self.config.pit_lifetime());
        pit_entry.insert_or_update_out_record(egress, &outgoing, lifetime);
        bump(&self.counters.out_interests);
        self.dispatch(egress, outgoing.into());
    }

    /// Send `data` to `egress`, consuming that downstream's in-record.
    pub fn send_data(&self, pit_entry: &Arc<PitEntry>, egress: FaceId, data: &Data) {
        // Missing records are expected on races and for cache hits.
        let _ = pit_entry.delete_in_record(egress);

        if self.plugins.run(|plugin| plugin.on_outgoing_data(egress, data)) != 0 {
            bump(&self.counters.dropped_by_plugin);
            return;
        }

        bump(&self.counters.out_data);
        self.dispatch(egress, data.clone().into());
    }

    /// Send `data` to every unexpired downstream except `except`.
    pub fn send_data_to_all(&self, pit_entry: &Arc<PitEntry>, except: Option<FaceId>, data: &Data) {
        let now = Instant::now();
        for record in pit_entry.in_records() {
            if Some(record.face) != except && record.expiry > now {
                self.send_data(pit_entry, record.face, data);
            }
        }
    }

    /// Nack the Interest `egress` sent, consuming its in-record.
    pub fn send_nack(&self, pit_entry: &Arc<PitEntry>, egress: FaceId, reason: NackReason) {
        let Ok(record) = pit_entry.delete_in_record(egress) else {
            debug!("No in-record on {} to Nack for {}", egress, pit_entry.name());
            return;
        };
        let nack = Nack::new(record.interest, reason);

        if self.plugins.run(|plugin| plugin.on_outgoing_nack(egress, &nack)) != 0 {
            bump(&self.counters.dropped_by_plugin);
            return;
        }

        bump(&self.counters.out_nacks);
        self.dispatch(egress, nack.into());
    }

    /// Nack every downstream except `except`.
    pub fn send_nack_to_all(&self, pit_entry: &Arc<PitEntry>, reason: NackReason, except: Option<FaceId>) {
        for record in pit_entry.in_records() {
            if Some(record.face) != except {
                self.send_nack(pit_entry, record.face, reason);
            }
        }
    }

    pub fn send_push_packet(&self, egress: FaceId, packet: &PushPacket) {
        if self.plugins.run(|plugin| plugin.on_outgoing_push_packet(egress, packet)) != 0 {
            bump(&self.counters.dropped_by_plugin);
            return;
        }
        bump(&self.counters.out_push_packets);
        self.dispatch(egress, packet.clone().into());
    }

    /// Expire `pit_entry` as soon as the runtime gets to it.
    pub fn set_expiry_now(&self, pit_entry: &Arc<PitEntry>) {
        self.set_expiry_timer(pit_entry, Duration::ZERO);
    }

    /// Expire `pit_entry` after `after`, replacing its pending timer.
    pub fn set_expiry_timer(&self, pit_entry: &Arc<PitEntry>, after: Duration) {
        let forwarder = self.me.clone();
        pit_entry.set_expiry_timer(after, move |entry| {
            if let Some(forwarder) = forwarder.upgrade() {
                forwarder.on_interest_finalize(&entry);
            }
        });
    }

    pub fn fib_lookup(&self, name: &Name) -> Option<Arc<FibEntry>> {
        self.fib.find_longest_prefix_match(name)
    }

    pub fn stats(&self) -> ForwarderStats {
        let c = &self.counters;
        ForwarderStats {
            in_interests: load(&c.in_interests),
            in_data: load(&c.in_data),
            in_nacks: load(&c.in_nacks),
            in_push_packets: load(&c.in_push_packets),
            out_interests: load(&c.out_interests),
            out_data: load(&c.out_data),
            out_nacks: load(&c.out_nacks),
            out_push_packets: load(&c.out_push_packets),
            satisfied_interests: load(&c.satisfied_interests),
            unsatisfied_interests: load(&c.unsatisfied_interests),
            dropped_malformed: load(&c.dropped_malformed),
            dropped_loops: load(&c.dropped_loops),
            dropped_unsolicited: load(&c.dropped_unsolicited),
            dropped_hop_limit: load(&c.dropped_hop_limit),
            dropped_unknown_face: load(&c.dropped_unknown_face),
            dropped_by_plugin: load(&c.dropped_by_plugin),
            fib_entries: self.fib.len(),
            fib_version: self.fib.version(),
            pit_entries: self.pit.len(),
            strategy_choices: self.strategy_table.len(),
            cs: self.cs.stats(),
            faces: self.faces.stats(),
        }
    }

    // Expire the entry when its last downstream stops waiting. A downstream
    // recorded while the timer fired pushes expiry back instead.
    fn arm_expiry_timer(&self, pit_entry: &Arc<PitEntry>) {
        let after = pit_entry
            .latest_in_record_expiry()
            .map(|expiry| expiry.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO);
        let forwarder = self.me.clone();
        pit_entry.set_expiry_timer(after, move |entry| {
            let Some(forwarder) = forwarder.upgrade() else {
                return;
            };
            if entry.close_unless_pending(Instant::now()) {
                forwarder.on_interest_finalize(&entry);
            } else {
                forwarder.arm_expiry_timer(&entry);
            }
        });
    }

    fn dispatch(&self, egress: FaceId, packet: Packet) {
        let Some(face) = self.faces.get(egress) else {
            debug!("Dropping {} {} to unknown {}", packet.kind(), packet.name(), egress);
            return;
        };
        if let Err(e) = face.send(packet) {
            debug!("Send to {} failed: {}", egress, e);
        }
    }
}

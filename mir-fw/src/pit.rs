//! Pending Interest Table.
//!
//! Entries are keyed by exact name. Each entry guards its in-record and
//! out-record maps with locks of their own, independent of the trie node
//! that stores the entry, and owns at most one pending expiry timer.
//!
//! An entry is closed once Data consumed it or it started finalizing. A
//! closed entry refuses new in-records, and the check happens under the
//! in-record lock, so a downstream is either recorded before the entry
//! closes (and served with it) or told to retry on a fresh entry.

use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use mir_core::{Data, FaceId, Interest, NackReason, Name};

use crate::error::{FwError, Result};
use crate::trie::PrefixTrie;

/// Downstream awaiting a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InRecord {
    pub face: FaceId,
    pub interest: Interest,
    pub nonce: u32,
    pub expiry: Instant,
    pub last_renewed: Instant,
}

/// Upstream the Interest was forwarded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutRecord {
    pub face: FaceId,
    pub nonce: u32,
    pub expiry: Instant,
    pub last_renewed: Instant,
    /// Reason of the Nack received from this upstream, if any
    pub nack: Option<NackReason>,
}

impl OutRecord {
    /// Still waiting for this upstream: not expired and not Nacked.
    pub fn is_pending(&self, now: Instant) -> bool {
        self.nack.is_none() && self.expiry > now
    }
}

/// Result of a duplicate-nonce check, one bit per kind of collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DuplicateNonce(u8);

impl DuplicateNonce {
    pub const NONE: Self = Self(0);
    /// Same nonce in the in-record of the face the Interest arrived on
    pub const IN_SAME: Self = Self(1 << 0);
    /// Same nonce in an in-record of another face
    pub const IN_OTHER: Self = Self(1 << 1);
    /// Same nonce in the out-record of the face the Interest arrived on
    pub const OUT_SAME: Self = Self(1 << 2);
    /// Same nonce in an out-record of another face
    pub const OUT_OTHER: Self = Self(1 << 3);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The nonce came back through a different face: a forwarding loop.
    ///
    /// A repeat from the face that already holds the nonce in its in-record
    /// is a retransmission, not a loop.
    pub fn is_loop(self) -> bool {
        self.intersects(Self::IN_OTHER | Self::OUT_OTHER) && !self.contains(Self::IN_SAME)
    }
}

impl BitOr for DuplicateNonce {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DuplicateNonce {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// PIT entry
#[derive(Debug)]
pub struct PitEntry {
    name: Name,
    interest: Interest,
    in_records: RwLock<BTreeMap<FaceId, InRecord>>,
    out_records: RwLock<BTreeMap<FaceId, OutRecord>>,
    satisfied: AtomicBool,
    closed: AtomicBool,
    finalized: AtomicBool,
    expiry_timer: Mutex<Option<JoinHandle<()>>>,
    timer_generation: AtomicU64,
}

impl PitEntry {
    pub fn new(interest: Interest) -> Self {
        Self {
            name: interest.name.clone(),
            interest,
            in_records: RwLock::new(BTreeMap::new()),
            out_records: RwLock::new(BTreeMap::new()),
            satisfied: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            expiry_timer: Mutex::new(None),
            timer_generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The Interest that created this entry
    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// Whether `data` answers this entry: same name, or a longer name under
    /// a prefix-matching Interest.
    pub fn can_be_satisfied_by(&self, data: &Data) -> bool {
        self.interest.matches_data(data)
            || read(&self.in_records)
                .values()
                .any(|record| record.interest.matches_data(data))
    }

    /// Record that `face` awaits a response. Fails with
    /// [`FwError::EntryClosed`] once the entry stopped accepting downstreams.
    pub fn insert_or_update_in_record(
        &self,
        face: FaceId,
        interest: &Interest,
        lifetime: Duration,
    ) -> Result<InRecord> {
        let mut records = write(&self.in_records);
        if self.is_closed() {
            return Err(FwError::EntryClosed(self.name.to_string()));
        }
        let now = Instant::now();
        let record = InRecord {
            face,
            interest: interest.clone(),
            nonce: interest.nonce,
            expiry: now + lifetime,
            last_renewed: now,
        };
        records.insert(face, record.clone());
        trace!("In-record for {} on {} (nonce {})", self.name, face, interest.nonce);
        Ok(record)
    }

    pub fn in_record(&self, face: FaceId) -> Option<InRecord> {
        read(&self.in_records).get(&face).cloned()
    }

    pub fn delete_in_record(&self, face: FaceId) -> Result<InRecord> {
        write(&self.in_records)
            .remove(&face)
            .ok_or(FwError::RecordNotFound(face))
    }

    pub fn has_in_records(&self) -> bool {
        !read(&self.in_records).is_empty()
    }

    /// Snapshot of the in-records, ordered by face id.
    pub fn in_records(&self) -> Vec<InRecord> {
        read(&self.in_records).values().cloned().collect()
    }

    pub fn clear_in_records(&self) {
        write(&self.in_records).clear();
    }

    /// Latest expiry among the in-records
    pub fn latest_in_record_expiry(&self) -> Option<Instant> {
        read(&self.in_records).values().map(|record| record.expiry).max()
    }

    /// Record that `interest` was forwarded to `face`; clears any Nack previously recorded there.
    pub fn insert_or_update_out_record(
        &self,
        face: FaceId,
        interest: &Interest,
        lifetime: Duration,
    ) -> OutRecord {
        let now = Instant::now();
        let record = OutRecord {
            face,
            nonce: interest.nonce,
            expiry: now + lifetime,
            last_renewed: now,
            nack: None,
        };
        write(&self.out_records).insert(face, record.clone());
        trace!("Out-record for {} on {} (nonce {})", self.name, face, interest.nonce);
        record
    }

    pub fn out_record(&self, face: FaceId) -> Option<OutRecord> {
        read(&self.out_records).get(&face).cloned()
    }

    pub fn delete_out_record(&self, face: FaceId) -> Result<OutRecord> {
        write(&self.out_records)
            .remove(&face)
            .ok_or(FwError::RecordNotFound(face))
    }

    pub fn has_out_records(&self) -> bool {
        !read(&self.out_records).is_empty()
    }

    /// Snapshot of the out-records, ordered by face id.
    pub fn out_records(&self) -> Vec<OutRecord> {
        read(&self.out_records).values().cloned().collect()
    }

    pub fn clear_out_records(&self) {
        write(&self.out_records).clear();
    }

    /// Store the reason of a Nack received from `face` on its out-record.
    pub fn record_nack(&self, face: FaceId, reason: NackReason) -> Result<OutRecord> {
        let mut records = write(&self.out_records);
        let record = records.get_mut(&face).ok_or(FwError::RecordNotFound(face))?;
        record.nack = Some(reason);
        Ok(record.clone())
    }

    /// Any out-record still waiting for an answer
    pub fn has_pending_out_records(&self, now: Instant) -> bool {
        read(&self.out_records)
            .values()
            .any(|record| record.is_pending(now))
    }

    /// Compare `nonce`, arriving on `ingress`, against every record of this entry.
    pub fn find_duplicate_nonce(&self, nonce: u32, ingress: FaceId) -> DuplicateNonce {
        let mut found = DuplicateNonce::NONE;
        for record in read(&self.in_records).values() {
            if record.nonce == nonce {
                found |= if record.face == ingress {
                    DuplicateNonce::IN_SAME
                } else {
                    DuplicateNonce::IN_OTHER
                };
            }
        }
        for record in read(&self.out_records).values() {
            if record.nonce == nonce {
                found |= if record.face == ingress {
                    DuplicateNonce::OUT_SAME
                } else {
                    DuplicateNonce::OUT_OTHER
                };
            }
        }
        found
    }

    /// Drop every record referencing `face`; returns how many were removed.
    pub fn remove_face(&self, face: FaceId) -> u64 {
        let in_removed = write(&self.in_records).remove(&face).is_some();
        let out_removed = write(&self.out_records).remove(&face).is_some();
        u64::from(in_removed) + u64::from(out_removed)
    }

    pub fn is_satisfied(&self) -> bool {
        self.satisfied.load(Ordering::Acquire)
    }

    pub fn set_satisfied(&self, satisfied: bool) {
        self.satisfied.store(satisfied, Ordering::Release);
    }

    /// Stop accepting in-records. Returns false if the entry was already closed.
    pub fn close(&self) -> bool {
        let _records = write(&self.in_records);
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Close the entry only if it holds no record at all.
    pub fn close_if_idle(&self) -> bool {
        let records = write(&self.in_records);
        if !records.is_empty() || self.has_out_records() || self.is_closed() {
            return false;
        }
        self.closed.store(true, Ordering::Release);
        true
    }

    /// Close the entry unless an in-record is still unexpired at `now`.
    /// Returns whether the entry is closed.
    pub fn close_unless_pending(&self, now: Instant) -> bool {
        let records = write(&self.in_records);
        if !self.is_closed() && records.values().any(|record| record.expiry > now) {
            return false;
        }
        self.closed.store(true, Ordering::Release);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the entry as leaving service, closing it first. Returns false
    /// if it already was.
    pub fn mark_finalized(&self) -> bool {
        self.close();
        !self.finalized.swap(true, Ordering::AcqRel)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Arm the expiry timer, replacing any pending one.
    ///
    /// `on_expiry` runs on a tokio task once `after` has elapsed, unless the
    /// timer is replaced or cancelled first. Outside a tokio runtime the
    /// timer cannot be armed and the call only logs.
    pub fn set_expiry_timer<F>(self: &Arc<Self>, after: Duration, on_expiry: F)
    where
        F: FnOnce(Arc<PitEntry>) + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime to arm expiry timer of PIT entry {}", self.name);
            return;
        };
        let generation = self.timer_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let entry = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let Some(entry) = entry.upgrade() else {
                return;
            };
            if entry.timer_generation.load(Ordering::Acquire) != generation {
                return;
            }
            debug!("PIT entry {} expired", entry.name);
            on_expiry(entry);
        });
        if let Some(previous) = lock(&self.expiry_timer).replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn cancel_expiry_timer(&self) {
        self.timer_generation.fetch_add(1, Ordering::AcqRel);
        if let Some(timer) = lock(&self.expiry_timer).take() {
            timer.abort();
        }
    }
}

/// Outcome of [`Pit::erase_by_endpoint`]
#[derive(Debug, Default)]
pub struct EndpointErasure {
    /// Records removed across all entries
    pub records: u64,
    /// Entries left without records, already detached from the table
    pub orphaned: Vec<Arc<PitEntry>>,
}

/// Pending Interest Table (PIT)
#[derive(Default)]
pub struct Pit {
    trie: PrefixTrie<Arc<PitEntry>>,
}

impl Pit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, name: &Name) -> Option<Arc<PitEntry>> {
        self.trie.exact_match(name.components()).into_value()
    }

    /// Entry for `interest`'s name, created if missing.
    ///
    /// An entry already closed by another task is replaced, so the
    /// returned entry was open when the call returned.
    pub fn insert(&self, interest: &Interest) -> Arc<PitEntry> {
        self.trie.add_or_update(interest.name.components(), |current| match current {
            Some(entry) if !entry.is_closed() => Arc::clone(entry),
            _ => {
                debug!("Creating PIT entry for {}", interest.name);
                Arc::new(PitEntry::new(interest.clone()))
            }
        })
    }

    /// Find the entry `data` satisfies, close it and remove it from the table.
    ///
    /// The exact name is tried first, then shorter prefixes whose entries
    /// accept prefix matches. Entries already closed are skipped.
    pub fn find_data_matches(&self, data: &Data) -> Option<Arc<PitEntry>> {
        let components = data.name.components();
        (0..=components.len()).rev().find_map(|depth| {
            self.trie.remove_if(&components[..depth], |entry| {
                entry.can_be_satisfied_by(data) && entry.close()
            })
        })
    }

    /// Remove `entry` from the table, if it is still the one stored under its name.
    pub fn erase_by_entry(&self, entry: &Arc<PitEntry>) -> bool {
        self.trie
            .remove_if(entry.name().components(), |current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    /// Remove every record referencing `face` across all entries.
    ///
    /// Entries left without records are closed and detached from the
    /// table; they are returned so the caller can finalize them.
    pub fn erase_by_endpoint(&self, face: FaceId) -> EndpointErasure {
        let mut orphaned = Vec::new();
        let records = self.trie.traverse(|_, slot| {
            let Some(entry) = slot.as_ref() else {
                return 0;
            };
            let removed = entry.remove_face(face);
            if removed > 0 && entry.close_if_idle() {
                orphaned.extend(slot.take());
            }
            removed
        });
        if records > 0 {
            debug!(
                "Removed {} PIT records referencing {} ({} entries orphaned)",
                records,
                face,
                orphaned.len()
            );
        }
        EndpointErasure { records, orphaned }
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    /// Length of the longest name with a pending entry
    pub fn depth(&self) -> usize {
        self.trie.depth()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }
}

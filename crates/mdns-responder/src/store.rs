//! Storage for the two kinds of record a responder deals in: *owned*
//! records it answers for authoritatively, and *cached* records
//! learned from other responders on the link.

use priority_queue::PriorityQueue;
use slab::Slab;
use std::cmp::Reverse;
use std::collections::HashMap;

use mdns_types::protocol::types::*;

/// Records are keyed by name and type.  Names are lowercased at
/// construction, so the key is already case-folded.
pub type RecordKey = (DomainName, RecordType);

/// How long a cache-flush record tolerates same-key entries before
/// evicting them (RFC 6762 section 10.2).
pub const CACHE_FLUSH_GRACE_MS: u64 = 1000;

/// A stable identifier for an owned record.
///
/// Handles are held by the scheduler, by pending responses, and by the
/// embedder, all of which can outlive the record itself.  The
/// generation tag means a handle to a removed record resolves to
/// `None` even if the slab slot has been reused.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RecordHandle {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

/// Where an owned record is in its life, from first publish to
/// removal.  Unique records start at `Probing`; shared records start
/// at `Announcing`.  `Leaving` is entered on withdrawal and counts
/// down goodbye transmissions.
///
/// Deadlines are absolute milliseconds on the caller's clock.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PublishState {
    /// Querying the link for the record's name to check nobody else
    /// claims it.  `sent` counts probes already transmitted.
    Probing { sent: u8, next: u64 },

    /// Telling the link about the record with unsolicited responses.
    Announcing { sent: u8, next: u64 },

    /// Steady state: answer matching queries.
    Published,

    /// Withdrawn: transmitting TTL-zero goodbyes, then removal.
    Leaving { sent: u8, next: u64 },
}

impl PublishState {
    /// Whether a record in this state may be used to answer queries.
    pub fn is_answerable(&self) -> bool {
        matches!(
            self,
            PublishState::Published | PublishState::Announcing { .. }
        )
    }

    /// The next time this state wants the scheduler to act, if any.
    pub fn deadline(&self) -> Option<u64> {
        match self {
            PublishState::Probing { next, .. } => Some(*next),
            PublishState::Announcing { next, .. } => Some(*next),
            PublishState::Published => None,
            PublishState::Leaving { next, .. } => Some(*next),
        }
    }
}

/// A record this responder has published.
#[derive(Debug, Clone)]
pub struct OwnedRecord {
    pub record: ResourceRecord,
    pub unique: bool,
    pub state: PublishState,
}

impl OwnedRecord {
    pub fn key(&self) -> RecordKey {
        (self.record.name.clone(), self.record.rtype())
    }
}

/// A record learned from the network.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: RecordTypeWithData,
    /// TTL as it arrived on the wire, in seconds.
    pub ttl: u32,
    /// Absolute expiry, milliseconds.
    pub expires_at: u64,
    /// When this entry was inserted or last refreshed, milliseconds.
    pub refreshed_at: u64,
    /// Whether the last refresh carried the cache-flush flag.
    pub cache_flush: bool,
}

impl CacheEntry {
    /// Remaining TTL in whole seconds at `now`, for putting the entry
    /// back on the wire.
    pub fn remaining_ttl(&self, now: u64) -> u32 {
        let remaining_ms = self.expires_at.saturating_sub(now);
        u32::try_from(remaining_ms / 1000).unwrap_or(u32::MAX)
    }
}

/// The record store.
///
/// Owned records live in a generation-tagged slab; `owned_order`
/// remembers insertion order so answers come out in the order records
/// went in.  Cached records are grouped by key, with a priority queue
/// over the per-key minimum expiry for cheap eviction scanning.
pub struct RecordStore {
    owned: Slab<(u64, OwnedRecord)>,
    owned_order: Vec<RecordHandle>,
    next_generation: u64,

    cached: HashMap<RecordKey, Vec<CacheEntry>>,
    // INVARIANT: the keys in here are exactly the keys in `cached`,
    // with priority equal to the minimum expiry of the key's entries
    expiry_priority: PriorityQueue<RecordKey, Reverse<u64>>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            owned: Slab::new(),
            owned_order: Vec::new(),
            next_generation: 0,
            cached: HashMap::new(),
            expiry_priority: PriorityQueue::new(),
        }
    }

    // -- owned records --

    pub fn insert_owned(&mut self, record: ResourceRecord, unique: bool, state: PublishState) -> RecordHandle {
        self.next_generation += 1;
        let generation = self.next_generation;
        let index = self.owned.insert((
            generation,
            OwnedRecord {
                record,
                unique,
                state,
            },
        ));
        let handle = RecordHandle { index, generation };
        self.owned_order.push(handle);
        handle
    }

    pub fn owned(&self, handle: RecordHandle) -> Option<&OwnedRecord> {
        match self.owned.get(handle.index) {
            Some((generation, record)) if *generation == handle.generation => Some(record),
            _ => None,
        }
    }

    pub fn owned_mut(&mut self, handle: RecordHandle) -> Option<&mut OwnedRecord> {
        match self.owned.get_mut(handle.index) {
            Some((generation, record)) if *generation == handle.generation => Some(record),
            _ => None,
        }
    }

    pub fn remove_owned(&mut self, handle: RecordHandle) -> Option<OwnedRecord> {
        if self.owned(handle).is_none() {
            return None;
        }
        self.owned_order.retain(|h| *h != handle);
        let (_, record) = self.owned.remove(handle.index);
        Some(record)
    }

    /// All live owned records, oldest first.
    pub fn iter_owned(&self) -> impl Iterator<Item = (RecordHandle, &OwnedRecord)> {
        self.owned_order
            .iter()
            .filter_map(|handle| self.owned(*handle).map(|record| (*handle, record)))
    }

    /// The owned record with this exact (name, type, data), if any.
    pub fn find_owned(&self, record: &ResourceRecord) -> Option<RecordHandle> {
        self.iter_owned()
            .find(|(_, owned)| {
                owned.record.name == record.name
                    && owned.record.rtype_with_data == record.rtype_with_data
            })
            .map(|(handle, _)| handle)
    }

    /// Owned records at a key, oldest first.
    pub fn owned_at_key(&self, name: &DomainName, rtype: RecordType) -> Vec<RecordHandle> {
        self.iter_owned()
            .filter(|(_, owned)| owned.record.name == *name && owned.record.rtype() == rtype)
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Owned records matching a question, oldest first.  This is the
    /// answer set before known-answer suppression; records still
    /// probing are excluded.
    pub fn answerable(&self, name: &DomainName, qtype: QueryType) -> Vec<RecordHandle> {
        self.iter_owned()
            .filter(|(_, owned)| {
                owned.state.is_answerable()
                    && owned.record.name == *name
                    && owned.record.rtype().matches(qtype)
            })
            .map(|(handle, _)| handle)
            .collect()
    }

    // -- cached records --

    /// Insert or refresh a cached record.  Returns `true` if the
    /// record was not in the cache before (so watchers can be told
    /// about new arrivals but not refreshes).
    ///
    /// A TTL of zero is a goodbye: the matching entry is evicted and
    /// nothing is stored.  A record with the cache-flush flag evicts
    /// all other same-key entries which were themselves claimed with
    /// cache-flush and have not been refreshed within the last second.
    pub fn put_cached(&mut self, record: &ResourceRecord, now: u64) -> bool {
        let key = (record.name.clone(), record.rtype());

        if record.ttl == 0 {
            if let Some(entries) = self.cached.get_mut(&key) {
                entries.retain(|entry| entry.data != record.rtype_with_data);
            }
            self.fix_expiry(&key);
            return false;
        }

        let expires_at = now + u64::from(record.ttl) * 1000;
        let entries = self.cached.entry(key.clone()).or_default();

        if record.cache_flush {
            entries.retain(|entry| {
                !entry.cache_flush || entry.refreshed_at + CACHE_FLUSH_GRACE_MS > now
            });
        }

        let mut fresh = true;
        if let Some(entry) = entries
            .iter_mut()
            .find(|entry| entry.data == record.rtype_with_data)
        {
            entry.ttl = record.ttl;
            entry.expires_at = expires_at;
            entry.refreshed_at = now;
            entry.cache_flush = record.cache_flush;
            fresh = false;
        } else {
            entries.push(CacheEntry {
                data: record.rtype_with_data.clone(),
                ttl: record.ttl,
                expires_at,
                refreshed_at: now,
                cache_flush: record.cache_flush,
            });
        }

        self.fix_expiry(&key);
        fresh
    }

    /// Cached records matching a question, with TTLs rewritten to the
    /// time remaining at `now`.  Entries that have expired are not
    /// returned (but are not evicted either - that is `expire_due`'s
    /// job).
    pub fn lookup_cached(&self, name: &DomainName, qtype: QueryType, now: u64) -> Vec<ResourceRecord> {
        let mut records = Vec::new();
        for ((key_name, rtype), entries) in &self.cached {
            if key_name != name || !rtype.matches(qtype) {
                continue;
            }
            for entry in entries {
                if entry.expires_at > now {
                    records.push(ResourceRecord {
                        name: name.clone(),
                        rtype_with_data: entry.data.clone(),
                        rclass: RecordClass::IN,
                        cache_flush: entry.cache_flush,
                        ttl: entry.remaining_ttl(now),
                    });
                }
            }
        }
        records
    }

    /// Cached records fit for the known-answer section of an outgoing
    /// question: at least half their original TTL remaining.
    pub fn known_answers(&self, name: &DomainName, qtype: QueryType, now: u64) -> Vec<ResourceRecord> {
        let mut records = self.lookup_cached(name, qtype, now);
        records.retain(|record| {
            let original = self
                .cached
                .get(&(record.name.clone(), record.rtype()))
                .and_then(|entries| {
                    entries
                        .iter()
                        .find(|entry| entry.data == record.rtype_with_data)
                })
                .map_or(0, |entry| entry.ttl);
            u64::from(record.ttl) * 2 >= u64::from(original)
        });
        records
    }

    /// Everything matching a question: answerable owned records plus
    /// live cached records.
    pub fn lookup(&self, name: &DomainName, qtype: QueryType, now: u64) -> Vec<ResourceRecord> {
        let mut records: Vec<ResourceRecord> = self
            .answerable(name, qtype)
            .into_iter()
            .filter_map(|handle| self.owned(handle).map(|owned| owned.record.clone()))
            .collect();
        records.append(&mut self.lookup_cached(name, qtype, now));
        records
    }

    /// Evict expired cache entries, returning them with TTL zero so
    /// watchers can be told they are gone.
    pub fn expire_due(&mut self, now: u64) -> Vec<ResourceRecord> {
        let mut gone = Vec::new();

        while let Some((key, Reverse(expiry))) = self.expiry_priority.peek() {
            if *expiry > now {
                break;
            }
            let key = key.clone();

            if let Some(entries) = self.cached.get_mut(&key) {
                for entry in entries.iter().filter(|entry| entry.expires_at <= now) {
                    gone.push(ResourceRecord {
                        name: key.0.clone(),
                        rtype_with_data: entry.data.clone(),
                        rclass: RecordClass::IN,
                        cache_flush: entry.cache_flush,
                        ttl: 0,
                    });
                }
                entries.retain(|entry| entry.expires_at > now);
            }

            self.fix_expiry(&key);
        }

        gone
    }

    /// When the next cached record expires, if any.
    pub fn next_expiry(&self) -> Option<u64> {
        self.expiry_priority
            .peek()
            .map(|(_, Reverse(expiry))| *expiry)
    }

    /// Re-derive the expiry priority for a key from its entries,
    /// dropping empty keys entirely.
    fn fix_expiry(&mut self, key: &RecordKey) {
        let min_expiry = self
            .cached
            .get(key)
            .and_then(|entries| entries.iter().map(|entry| entry.expires_at).min());

        match min_expiry {
            Some(expiry) => {
                if self
                    .expiry_priority
                    .change_priority(key, Reverse(expiry))
                    .is_none()
                {
                    self.expiry_priority.push(key.clone(), Reverse(expiry));
                }
            }
            None => {
                self.cached.remove(key);
                self.expiry_priority.remove(key);
            }
        }
    }
}

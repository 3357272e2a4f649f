//! The responder: one per link, holding the record store, the query
//! tracker, and the transmission schedule, behind the `input` /
//! `output` / `sleep` pump the embedder drives.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};

use mdns_types::protocol::serialise::WritableBuffer;
use mdns_types::protocol::types::*;

use crate::store::{PublishState, RecordHandle, RecordStore};
use crate::tracker::{AnswerCallback, QueryHandle, QueryTracker};

/// Where all multicast traffic goes.
pub const MULTICAST_DESTINATION: SocketAddrV4 = SocketAddrV4::new(MULTICAST_GROUP_V4, MDNS_PORT);

/// How many times a unique record is probed before being announced.
const PROBE_COUNT: u8 = 3;

/// Nominal gap between probes (RFC 6762 section 8.1).
const PROBE_INTERVAL_MS: u64 = 250;

/// Jitter applied around the probe interval.
const PROBE_JITTER_MS: u64 = 50;

/// How many unsolicited announcements a record gets.
const ANNOUNCE_COUNT: u8 = 2;

/// Gap between the first and second announcements.
const ANNOUNCE_INTERVAL_MS: u64 = 1000;

/// How many goodbye responses a withdrawn record gets.
const GOODBYE_COUNT: u8 = 3;

/// Gap between goodbyes.
const GOODBYE_INTERVAL_MS: u64 = 250;

/// Bounds of the random delay before a multicast response carrying
/// shared records, during which further questions merge in and
/// answers from other responders suppress ours (RFC 6762 section 6).
const RESPONSE_DELAY_MIN_MS: u64 = 20;
const RESPONSE_DELAY_MAX_MS: u64 = 120;

/// Plain counters for what the responder has seen and done, for the
/// embedder to log or export.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Stats {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub malformed_packets: u64,
    pub conflicts: u64,
}

/// Callback invoked with the key of each owned record lost to a
/// conflict.
pub type ConflictCallback = Box<dyn FnMut(&DomainName, RecordType)>;

/// Callback invoked with every resource record in every inbound
/// message.
pub type RecordCallback = Box<dyn FnMut(&ResourceRecord)>;

/// A multicast response being held back for aggregation.
struct PendingResponse {
    send_at: u64,
    answers: Vec<RecordHandle>,
    additionals: Vec<RecordHandle>,
}

/// Which message section a packed record lands in.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Section {
    Answer,
    Authority,
    Additional,
}

/// A multicast DNS responder and querier for a single link.
///
/// All methods take the current time as a monotonic millisecond
/// counter; the responder never reads a clock itself.  After any call
/// the embedder should drain [`Responder::output`] until it returns
/// `None`, then wait until [`Responder::sleep`] says there is more to
/// do or a packet arrives.
pub struct Responder {
    address: Ipv4Addr,
    store: RecordStore,
    tracker: QueryTracker,
    rng: StdRng,
    pending: Option<PendingResponse>,
    outbound: VecDeque<(Message, SocketAddrV4)>,
    on_conflict: Option<ConflictCallback>,
    on_record: Option<RecordCallback>,
    shutting_down: bool,
    stats: Stats,
}

impl Responder {
    /// A responder for the link with the given local address.
    pub fn new(address: Ipv4Addr) -> Self {
        Self::with_rng(address, StdRng::from_entropy())
    }

    /// A responder with a fixed random seed, for deterministic timing
    /// under test.
    pub fn with_seed(address: Ipv4Addr, seed: u64) -> Self {
        Self::with_rng(address, StdRng::seed_from_u64(seed))
    }

    fn with_rng(address: Ipv4Addr, rng: StdRng) -> Self {
        Self {
            address,
            store: RecordStore::new(),
            tracker: QueryTracker::new(),
            rng,
            pending: None,
            outbound: VecDeque::new(),
            on_conflict: None,
            on_record: None,
            shutting_down: false,
            stats: Stats::default(),
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Tell the responder the embedder dropped an undecodable packet,
    /// so the count shows up in [`Responder::stats`].
    pub fn note_malformed_packet(&mut self) {
        self.stats.malformed_packets += 1;
    }

    /// Register a callback for conflicts: another responder was found
    /// holding one of our unique names with different data.  The
    /// losing record has already been withdrawn when this fires; the
    /// embedder decides whether to rename and republish.
    pub fn on_conflict(&mut self, callback: ConflictCallback) {
        self.on_conflict = Some(callback);
    }

    /// Register a callback for every record in every valid inbound
    /// message, before any other processing.
    pub fn on_record_received(&mut self, callback: RecordCallback) {
        self.on_record = Some(callback);
    }

    /// The link-local address records are published against.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Change the local address, rewriting and re-announcing any owned
    /// address records that pointed at the old one.
    pub fn set_address(&mut self, address: Ipv4Addr, now: u64) {
        let old = self.address;
        self.address = address;
        if old == address {
            return;
        }

        let handles: Vec<RecordHandle> = self
            .store
            .iter_owned()
            .filter(|(_, owned)| {
                owned.record.rtype_with_data == RecordTypeWithData::A { address: old }
            })
            .map(|(handle, _)| handle)
            .collect();

        for handle in handles {
            if let Some(owned) = self.store.owned_mut(handle) {
                owned.record.rtype_with_data = RecordTypeWithData::A { address };
                if owned.state.is_answerable() {
                    owned.state = PublishState::Announcing { sent: 0, next: now };
                }
            }
        }
    }

    // -- publishing --

    /// Publish a record.  Unique records are probed for before being
    /// announced; shared records are announced straight away.
    ///
    /// Publishing a record identical to an owned one is a no-op and
    /// returns the existing handle.  Publishing a unique record whose
    /// key is already owned replaces the data and re-announces,
    /// without re-probing the name.
    pub fn publish(&mut self, mut record: ResourceRecord, unique: bool, now: u64) -> RecordHandle {
        record.rclass = RecordClass::IN;
        record.cache_flush = unique;

        if let Some(existing) = self.store.find_owned(&record) {
            tracing::debug!(name = %record.name, rtype = %record.rtype(), "already published");
            return existing;
        }

        if unique {
            let replaceable = self
                .store
                .owned_at_key(&record.name, record.rtype())
                .into_iter()
                .find(|handle| {
                    self.store.owned(*handle).is_some_and(|owned| {
                        owned.unique && !matches!(owned.state, PublishState::Leaving { .. })
                    })
                });

            if let Some(handle) = replaceable {
                if let Some(owned) = self.store.owned_mut(handle) {
                    tracing::debug!(name = %record.name, rtype = %record.rtype(), "updating record data");
                    owned.record = record;
                    owned.state = PublishState::Announcing { sent: 0, next: now };
                }
                return handle;
            }

            let first_probe = now + self.rng.gen_range(0..=PROBE_INTERVAL_MS);
            tracing::debug!(name = %record.name, rtype = %record.rtype(), "probing");
            self.store.insert_owned(
                record,
                true,
                PublishState::Probing {
                    sent: 0,
                    next: first_probe,
                },
            )
        } else {
            tracing::debug!(name = %record.name, rtype = %record.rtype(), "announcing");
            self.store.insert_owned(
                record,
                false,
                PublishState::Announcing { sent: 0, next: now },
            )
        }
    }

    /// Withdraw all owned records at a key.  Records that reached the
    /// network get goodbye transmissions first; records still probing
    /// just disappear.  Unknown keys are a no-op.
    pub fn withdraw(&mut self, name: &DomainName, rtype: RecordType, now: u64) {
        for handle in self.store.owned_at_key(name, rtype) {
            self.withdraw_handle(handle, now);
        }
    }

    fn withdraw_handle(&mut self, handle: RecordHandle, now: u64) {
        let Some(owned) = self.store.owned_mut(handle) else {
            return;
        };
        match owned.state {
            PublishState::Probing { .. } => {
                self.store.remove_owned(handle);
            }
            PublishState::Leaving { .. } => {}
            _ => {
                owned.state = PublishState::Leaving { sent: 0, next: now };
            }
        }
    }

    /// Queue goodbyes for everything owned and stop accepting input.
    /// The embedder keeps pumping [`Responder::output`] until it
    /// returns `None`, at which point the goodbyes have all gone out.
    pub fn shutdown(&mut self, now: u64) {
        self.shutting_down = true;
        self.pending = None;
        self.tracker = QueryTracker::new();

        let handles: Vec<RecordHandle> =
            self.store.iter_owned().map(|(handle, _)| handle).collect();
        for handle in handles {
            self.withdraw_handle(handle, now);
        }
    }

    // -- querying --

    /// Ask the link a question.  The callback fires once for every
    /// record already in the cache, then again for each matching
    /// record that arrives, until the query is cancelled.  The
    /// question is retransmitted on a doubling backoff for as long as
    /// the query is registered.
    pub fn query(
        &mut self,
        name: DomainName,
        qtype: QueryType,
        callback: AnswerCallback,
        now: u64,
    ) -> QueryHandle {
        self.register_query(name, qtype, false, callback, now)
    }

    /// Like [`Responder::query`], but the callback is also invoked
    /// with a TTL of zero when a previously reported record goes away
    /// (by goodbye or by cache expiry).
    pub fn monitor(
        &mut self,
        name: DomainName,
        qtype: QueryType,
        callback: AnswerCallback,
        now: u64,
    ) -> QueryHandle {
        self.register_query(name, qtype, true, callback, now)
    }

    fn register_query(
        &mut self,
        name: DomainName,
        qtype: QueryType,
        monitor: bool,
        callback: AnswerCallback,
        now: u64,
    ) -> QueryHandle {
        let cached = self.store.lookup_cached(&name, qtype, now);
        let handle = self.tracker.register(name, qtype, monitor, callback, now);
        for record in &cached {
            self.tracker.dispatch_to(handle, record);
        }
        handle
    }

    /// Cancel a query.  The callback never fires after this returns.
    /// Idempotent.
    pub fn cancel_query(&mut self, handle: QueryHandle) {
        self.tracker.cancel(handle);
    }

    /// Everything known for a question without asking the network:
    /// owned records plus live cached ones.
    pub fn lookup(&self, name: &DomainName, qtype: QueryType, now: u64) -> Vec<ResourceRecord> {
        self.store.lookup(name, qtype, now)
    }

    // -- the pump --

    /// Feed in a decoded inbound message.  After calling this, drain
    /// [`Responder::output`].
    pub fn input(&mut self, message: &Message, src: SocketAddrV4, now: u64) {
        if self.shutting_down {
            return;
        }
        self.stats.packets_received += 1;

        if message.header.opcode != Opcode::Standard {
            return;
        }

        if let Some(callback) = self.on_record.as_mut() {
            for record in message
                .answers
                .iter()
                .chain(&message.authority)
                .chain(&message.additional)
            {
                callback(record);
            }
        }

        if message.header.is_response {
            self.handle_response(message, now);
        } else {
            self.handle_query(message, src, now);
        }
    }

    /// The next message to transmit, if any.  Also advances all the
    /// internal schedules to `now`, so this is what drives probing,
    /// announcements, goodbyes, held-back responses, query
    /// retransmission, and cache expiry.
    pub fn output(&mut self, now: u64) -> Option<(Message, SocketAddrV4)> {
        self.tick(now);
        let out = self.outbound.pop_front();
        if out.is_some() {
            self.stats.packets_sent += 1;
        }
        out
    }

    /// The next moment something is scheduled to happen, or `None`
    /// when fully idle.  The embedder sleeps until this deadline (or
    /// an inbound packet) and then drains [`Responder::output`].
    pub fn sleep(&self, now: u64) -> Option<u64> {
        if !self.outbound.is_empty() {
            return Some(now);
        }

        let mut deadline: Option<u64> = None;
        let mut consider = |candidate: Option<u64>| match (deadline, candidate) {
            (None, Some(c)) => deadline = Some(c),
            (Some(d), Some(c)) if c < d => deadline = Some(c),
            _ => (),
        };

        consider(self.store.next_expiry());
        consider(self.tracker.next_send());
        consider(self.pending.as_ref().map(|pending| pending.send_at));
        for (_, owned) in self.store.iter_owned() {
            consider(owned.state.deadline());
        }

        deadline
    }

    // -- inbound processing --

    fn handle_response(&mut self, message: &Message, now: u64) {
        if message.header.rcode != Rcode::NoError {
            return;
        }

        for record in message.answers.iter().chain(&message.additional) {
            self.check_conflict(record, false);
            self.suppress_pending(record);
            self.tracker.dispatch(record);
            if self.store.find_owned(record).is_none() {
                self.store.put_cached(record, now);
            }
        }
    }

    fn handle_query(&mut self, message: &Message, src: SocketAddrV4, now: u64) {
        // proposed records from other probing responders
        for record in &message.authority {
            self.check_conflict(record, true);
        }

        let legacy = src.port() != MDNS_PORT;

        let mut immediate_answers: Vec<RecordHandle> = Vec::new();
        let mut immediate_additionals: Vec<RecordHandle> = Vec::new();
        let mut delayed_answers: Vec<RecordHandle> = Vec::new();
        let mut delayed_additionals: Vec<RecordHandle> = Vec::new();

        for question in &message.questions {
            let matched = self.store.answerable(&question.name, question.qtype);
            let unicast = legacy || question.unicast_response;

            for handle in matched {
                let Some(owned) = self.store.owned(handle) else {
                    continue;
                };
                let unique = owned.unique;
                let suppressed = known_answer_suppresses(&message.answers, &owned.record);

                let (answers, additionals) = if unicast || unique {
                    (&mut immediate_answers, &mut immediate_additionals)
                } else {
                    (&mut delayed_answers, &mut delayed_additionals)
                };

                if !suppressed && !answers.contains(&handle) {
                    answers.push(handle);
                }

                // additionals ride along even when the answer itself
                // was suppressed, each subject to its own suppression
                for additional in self.additionals_for(handle) {
                    let Some(owned) = self.store.owned(additional) else {
                        continue;
                    };
                    if known_answer_suppresses(&message.answers, &owned.record) {
                        continue;
                    }
                    if !additionals.contains(&additional) {
                        additionals.push(additional);
                    }
                }
            }
        }

        if !immediate_answers.is_empty() || !immediate_additionals.is_empty() {
            let destination = if legacy { src } else { MULTICAST_DESTINATION };
            self.emit_response(&immediate_answers, &immediate_additionals, destination);
        }

        if !delayed_answers.is_empty() || !delayed_additionals.is_empty() {
            match self.pending.as_mut() {
                Some(pending) => {
                    for handle in delayed_answers {
                        if !pending.answers.contains(&handle) {
                            pending.answers.push(handle);
                        }
                    }
                    for handle in delayed_additionals {
                        if !pending.additionals.contains(&handle) {
                            pending.additionals.push(handle);
                        }
                    }
                }
                None => {
                    let delay = self
                        .rng
                        .gen_range(RESPONSE_DELAY_MIN_MS..=RESPONSE_DELAY_MAX_MS);
                    self.pending = Some(PendingResponse {
                        send_at: now + delay,
                        answers: delayed_answers,
                        additionals: delayed_additionals,
                    });
                }
            }
        }
    }

    /// Check an inbound record against our owned unique records,
    /// losing ours when the other side wins.  While we are probing,
    /// an established answer always beats us, and a simultaneous
    /// probe is settled by the lexicographic tiebreaker; once we are
    /// announced, only a cache-flush claim counts as a conflict.
    fn check_conflict(&mut self, record: &ResourceRecord, from_probe_authority: bool) {
        let mut lost = Vec::new();

        for handle in self.store.owned_at_key(&record.name, record.rtype()) {
            let Some(owned) = self.store.owned(handle) else {
                continue;
            };
            if !owned.unique || owned.record.rtype_with_data == record.rtype_with_data {
                continue;
            }

            let conflicted = match owned.state {
                PublishState::Probing { .. } => {
                    if from_probe_authority {
                        tiebreak(&owned.record, record) == Ordering::Less
                    } else {
                        true
                    }
                }
                PublishState::Announcing { .. } | PublishState::Published => record.cache_flush,
                PublishState::Leaving { .. } => false,
            };

            if conflicted {
                lost.push(handle);
            }
        }

        for handle in lost {
            let Some(owned) = self.store.remove_owned(handle) else {
                continue;
            };
            let (name, rtype) = owned.key();
            tracing::warn!(%name, %rtype, "lost record to a conflict");
            self.stats.conflicts += 1;
            if let Some(callback) = self.on_conflict.as_mut() {
                callback(&name, rtype);
            }
        }
    }

    /// Drop pending answers another responder has just multicast with
    /// at least half our TTL: no point repeating them.
    fn suppress_pending(&mut self, record: &ResourceRecord) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };

        let store = &self.store;
        let duplicated = |handle: &RecordHandle| {
            store.owned(*handle).is_some_and(|owned| {
                owned.record.name == record.name
                    && owned.record.rtype_with_data == record.rtype_with_data
                    && u64::from(record.ttl) * 2 >= u64::from(owned.record.ttl)
            })
        };

        pending.answers.retain(|handle| !duplicated(handle));
        pending.additionals.retain(|handle| !duplicated(handle));
        if pending.answers.is_empty() && pending.additionals.is_empty() {
            self.pending = None;
        }
    }

    /// The additional records to attach when a record answers a
    /// question: SRV and TXT for an answered PTR's instance, address
    /// records for an answered SRV's target (RFC 6763 section 12).
    fn additionals_for(&self, handle: RecordHandle) -> Vec<RecordHandle> {
        let Some(owned) = self.store.owned(handle) else {
            return Vec::new();
        };

        let mut additionals = Vec::new();
        match &owned.record.rtype_with_data {
            RecordTypeWithData::PTR { ptrdname } => {
                let srvs = self
                    .store
                    .answerable(ptrdname, QueryType::Record(RecordType::SRV));
                additionals.extend(srvs.iter().copied());
                additionals.extend(self.store.answerable(ptrdname, QueryType::Record(RecordType::TXT)));
                // and the addresses those instances resolve to
                for srv in srvs {
                    additionals.extend(self.address_additionals(srv));
                }
            }
            RecordTypeWithData::SRV { .. } => {
                additionals.extend(self.address_additionals(handle));
            }
            _ => (),
        }
        additionals
    }

    fn address_additionals(&self, handle: RecordHandle) -> Vec<RecordHandle> {
        let Some(owned) = self.store.owned(handle) else {
            return Vec::new();
        };
        let RecordTypeWithData::SRV { target, .. } = &owned.record.rtype_with_data else {
            return Vec::new();
        };

        let mut additionals = self.store.answerable(target, QueryType::Record(RecordType::A));
        additionals.extend(self.store.answerable(target, QueryType::Record(RecordType::AAAA)));
        additionals
    }

    // -- schedules --

    fn tick(&mut self, now: u64) {
        for gone in self.store.expire_due(now) {
            self.tracker.dispatch(&gone);
        }

        self.tick_queries(now);
        self.tick_records(now);
        self.tick_pending(now);
    }

    fn tick_queries(&mut self, now: u64) {
        let due = self.tracker.due(now);
        if due.is_empty() {
            return;
        }

        let mut questions = Vec::with_capacity(due.len());
        let mut known = Vec::new();
        for (name, qtype) in due {
            known.extend(self.store.known_answers(&name, qtype, now));
            questions.push(Question {
                name,
                qtype,
                qclass: QueryClass::Record(RecordClass::IN),
                unicast_response: false,
            });
        }

        let records: Vec<(Section, ResourceRecord)> = known
            .into_iter()
            .map(|record| (Section::Answer, record))
            .collect();
        self.emit(Message::query(questions), &records, MULTICAST_DESTINATION);
    }

    fn tick_records(&mut self, now: u64) {
        let handles: Vec<RecordHandle> =
            self.store.iter_owned().map(|(handle, _)| handle).collect();

        let mut probe_names: Vec<DomainName> = Vec::new();
        let mut probe_proposals: Vec<ResourceRecord> = Vec::new();
        let mut announcements: Vec<ResourceRecord> = Vec::new();
        let mut goodbyes: Vec<ResourceRecord> = Vec::new();
        let mut finished: Vec<RecordHandle> = Vec::new();

        for handle in handles {
            // two borrows: peek at the state, then write it back, so
            // the rng can be used in between
            let Some(owned) = self.store.owned(handle) else {
                continue;
            };
            let state = owned.state;
            let record = owned.record.clone();

            match state {
                PublishState::Probing { sent, next } if next <= now => {
                    if !probe_names.contains(&record.name) {
                        probe_names.push(record.name.clone());
                    }
                    probe_proposals.push(record);

                    let sent = sent + 1;
                    let new_state = if sent == PROBE_COUNT {
                        PublishState::Announcing {
                            sent: 0,
                            next: now + PROBE_INTERVAL_MS,
                        }
                    } else {
                        let jitter = self.rng.gen_range(0..=2 * PROBE_JITTER_MS);
                        PublishState::Probing {
                            sent,
                            next: now + PROBE_INTERVAL_MS - PROBE_JITTER_MS + jitter,
                        }
                    };
                    if let Some(owned) = self.store.owned_mut(handle) {
                        owned.state = new_state;
                    }
                }
                PublishState::Announcing { sent, next } if next <= now => {
                    announcements.push(record);

                    let sent = sent + 1;
                    let new_state = if sent == ANNOUNCE_COUNT {
                        PublishState::Published
                    } else {
                        PublishState::Announcing {
                            sent,
                            next: now + ANNOUNCE_INTERVAL_MS,
                        }
                    };
                    if let Some(owned) = self.store.owned_mut(handle) {
                        owned.state = new_state;
                    }
                }
                PublishState::Leaving { sent, next } if next <= now => {
                    let mut goodbye = record;
                    goodbye.ttl = 0;
                    goodbyes.push(goodbye);

                    let sent = sent + 1;
                    if sent == GOODBYE_COUNT {
                        finished.push(handle);
                    } else if let Some(owned) = self.store.owned_mut(handle) {
                        owned.state = PublishState::Leaving {
                            sent,
                            next: now + GOODBYE_INTERVAL_MS,
                        };
                    }
                }
                _ => (),
            }
        }

        for handle in finished {
            self.store.remove_owned(handle);
        }

        if !probe_proposals.is_empty() {
            let questions = probe_names
                .into_iter()
                .map(|name| Question {
                    name,
                    qtype: QueryType::Wildcard,
                    qclass: QueryClass::Record(RecordClass::IN),
                    unicast_response: false,
                })
                .collect();
            let records: Vec<(Section, ResourceRecord)> = probe_proposals
                .into_iter()
                .map(|record| (Section::Authority, record))
                .collect();
            self.emit(Message::query(questions), &records, MULTICAST_DESTINATION);
        }

        if !announcements.is_empty() {
            let records: Vec<(Section, ResourceRecord)> = announcements
                .into_iter()
                .map(|record| (Section::Answer, record))
                .collect();
            self.emit(Message::response(), &records, MULTICAST_DESTINATION);
        }

        if !goodbyes.is_empty() {
            let records: Vec<(Section, ResourceRecord)> = goodbyes
                .into_iter()
                .map(|record| (Section::Answer, record))
                .collect();
            self.emit(Message::response(), &records, MULTICAST_DESTINATION);
        }
    }

    fn tick_pending(&mut self, now: u64) {
        let due = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.send_at <= now);
        if !due {
            return;
        }

        if let Some(pending) = self.pending.take() {
            self.emit_response(&pending.answers, &pending.additionals, MULTICAST_DESTINATION);
        }
    }

    // -- assembly --

    /// Resolve handles to records and queue a response.  Handles whose
    /// records were withdrawn in the meantime resolve to nothing.
    fn emit_response(
        &mut self,
        answers: &[RecordHandle],
        additionals: &[RecordHandle],
        destination: SocketAddrV4,
    ) {
        let mut records: Vec<(Section, ResourceRecord)> = Vec::new();
        for handle in answers {
            if let Some(owned) = self.store.owned(*handle) {
                if owned.state.is_answerable() {
                    records.push((Section::Answer, owned.record.clone()));
                }
            }
        }
        for handle in additionals {
            if answers.contains(handle) {
                continue;
            }
            if let Some(owned) = self.store.owned(*handle) {
                if owned.state.is_answerable() {
                    records.push((Section::Additional, owned.record.clone()));
                }
            }
        }

        if records.is_empty() {
            return;
        }
        self.emit(Message::response(), &records, destination);
    }

    /// Pack records into as many messages as the packet size needs,
    /// TC-flagged on all but the last, and queue them.
    fn emit(&mut self, base: Message, records: &[(Section, ResourceRecord)], destination: SocketAddrV4) {
        for message in pack_messages(&base, records) {
            self.outbound.push_back((message, destination));
        }
    }
}

/// Whether a record in an inbound known-answer section makes
/// repeating ours pointless: same data, at least half the TTL left
/// (RFC 6762 section 7.1).
fn known_answer_suppresses(known_answers: &[ResourceRecord], ours: &ResourceRecord) -> bool {
    known_answers.iter().any(|known| {
        known.name == ours.name
            && known.rtype_with_data == ours.rtype_with_data
            && u64::from(known.ttl) * 2 >= u64::from(ours.ttl)
    })
}

/// The RFC 6762 section 8.2 probe tiebreaker: compare class, then
/// type, then raw rdata, octet by octet.  `Less` means ours loses.
fn tiebreak(ours: &ResourceRecord, theirs: &ResourceRecord) -> Ordering {
    (u16::from(ours.rclass), u16::from(ours.rtype()))
        .cmp(&(u16::from(theirs.rclass), u16::from(theirs.rtype())))
        .then_with(|| {
            ours.rtype_with_data
                .to_octets()
                .cmp(&theirs.rtype_with_data.to_octets())
        })
}

/// Distribute records over as few messages as fit the packet size.
/// The base message's questions travel in the first packet only.
/// Every packet but the last has TC set.
fn pack_messages(base: &Message, records: &[(Section, ResourceRecord)]) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut current = base.clone();
    let mut current_records = 0;

    let mut buffer = measuring_buffer(&current);

    for (section, record) in records {
        let mark = buffer.mark();
        let mut fits = record.serialise(&mut buffer).is_ok() && buffer.index() <= PACKET_MAX_LEN;

        if !fits && (current_records > 0 || !current.questions.is_empty()) {
            buffer.rollback_to(mark);

            current.header.is_truncated = true;
            messages.push(std::mem::replace(
                &mut current,
                Message {
                    header: base.header,
                    questions: Vec::new(),
                    answers: Vec::new(),
                    authority: Vec::new(),
                    additional: Vec::new(),
                },
            ));
            current_records = 0;

            buffer = measuring_buffer(&current);
            let mark = buffer.mark();
            fits = record.serialise(&mut buffer).is_ok() && buffer.index() <= PACKET_MAX_LEN;
            if !fits {
                buffer.rollback_to(mark);
            }
        }

        if !fits {
            tracing::warn!(name = %record.name, rtype = %record.rtype(), "record too large for any packet, dropping");
            continue;
        }

        match section {
            Section::Answer => current.answers.push(record.clone()),
            Section::Authority => current.authority.push(record.clone()),
            Section::Additional => current.additional.push(record.clone()),
        }
        current_records += 1;
    }

    if current_records > 0 || !current.questions.is_empty() || messages.is_empty() {
        messages.push(current);
    }
    messages
}

/// A buffer pre-loaded with a message's header and questions, for
/// sizing the records that follow.
fn measuring_buffer(message: &Message) -> WritableBuffer {
    let mut buffer = WritableBuffer::default();
    WireHeader {
        header: message.header,
        qdcount: message.questions.len() as u16,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    }
    .serialise(&mut buffer);
    for question in &message.questions {
        question.serialise(&mut buffer);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdns_types::protocol::types::test_util::*;

    fn drain(responder: &mut Responder, now: u64) -> Vec<(Message, SocketAddrV4)> {
        let mut messages = Vec::new();
        while let Some(out) = responder.output(now) {
            messages.push(out);
        }
        messages
    }

    fn run_until_published(responder: &mut Responder, mut now: u64) -> u64 {
        // long enough for probe and announce cycles to finish
        for _ in 0..32 {
            drain(responder, now);
            match responder.sleep(now) {
                Some(deadline) => now = deadline,
                None => break,
            }
        }
        drain(responder, now);
        now
    }

    #[test]
    fn unique_records_probe_then_announce() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(a_record("host.local.", "192.0.2.5".parse().unwrap()), true, 0);

        let mut probes = 0;
        let mut announcements = 0;
        let mut now = 0;
        for _ in 0..16 {
            for (message, destination) in drain(&mut responder, now) {
                assert_eq!(MULTICAST_DESTINATION, destination);
                if message.header.is_response {
                    announcements += 1;
                    assert!(message.answers[0].cache_flush);
                    assert!(probes == 3);
                } else {
                    probes += 1;
                    assert_eq!(QueryType::Wildcard, message.questions[0].qtype);
                    assert_eq!(1, message.authority.len());
                }
            }
            match responder.sleep(now) {
                Some(deadline) => now = deadline,
                None => break,
            }
        }

        assert_eq!(3, probes);
        assert_eq!(2, announcements);
        assert!(now <= 3000);
    }

    #[test]
    fn shared_records_skip_probing() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(
            ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."),
            false,
            0,
        );

        let messages = drain(&mut responder, 0);
        assert_eq!(1, messages.len());
        assert!(messages[0].0.header.is_response);
        assert!(!messages[0].0.answers[0].cache_flush);
    }

    #[test]
    fn publish_is_idempotent() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        let record = a_record("host.local.", "192.0.2.5".parse().unwrap());
        let first = responder.publish(record.clone(), true, 0);
        let second = responder.publish(record, true, 0);
        assert_eq!(first, second);

        // still only one probe in flight
        let messages = drain(&mut responder, 300);
        assert_eq!(1, messages.len());
        assert_eq!(1, messages[0].0.authority.len());
    }

    #[test]
    fn answers_queries_once_published() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(a_record("host.local.", "192.0.2.5".parse().unwrap()), true, 0);
        let now = run_until_published(&mut responder, 0);

        let query = Message::query(vec![question(
            "host.local.",
            QueryType::Record(RecordType::A),
        )]);
        responder.input(
            &query,
            SocketAddrV4::new("192.0.2.7".parse().unwrap(), MDNS_PORT),
            now,
        );

        // unique record: no aggregation delay
        let messages = drain(&mut responder, now);
        assert_eq!(1, messages.len());
        let (message, destination) = &messages[0];
        assert_eq!(MULTICAST_DESTINATION, *destination);
        assert!(message.header.is_response);
        assert!(message.header.is_authoritative);
        assert_eq!(0, message.header.id);
        assert_eq!(1, message.answers.len());
        assert!(message.answers[0].cache_flush);
    }

    #[test]
    fn replies_to_legacy_source_by_unicast() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(a_record("host.local.", "192.0.2.5".parse().unwrap()), true, 0);
        let now = run_until_published(&mut responder, 0);

        let src = SocketAddrV4::new("192.0.2.7".parse().unwrap(), 51234);
        let query = Message::query(vec![question(
            "host.local.",
            QueryType::Record(RecordType::A),
        )]);
        responder.input(&query, src, now);

        let messages = drain(&mut responder, now);
        assert_eq!(1, messages.len());
        assert_eq!(src, messages[0].1);
    }

    #[test]
    fn shared_answers_are_delayed_and_aggregated() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(
            ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."),
            false,
            0,
        );
        let now = run_until_published(&mut responder, 0);

        let src = SocketAddrV4::new("192.0.2.7".parse().unwrap(), MDNS_PORT);
        let query = Message::query(vec![question(
            "_ipp._tcp.local.",
            QueryType::Record(RecordType::PTR),
        )]);
        responder.input(&query, src, now);

        // nothing yet: the response is being held for aggregation
        assert!(drain(&mut responder, now).is_empty());

        let deadline = responder.sleep(now).unwrap();
        assert!(deadline > now + RESPONSE_DELAY_MIN_MS - 1);
        assert!(deadline <= now + RESPONSE_DELAY_MAX_MS);

        // a duplicate question merges rather than double-scheduling
        responder.input(&query, src, now + 5);

        let messages = drain(&mut responder, deadline);
        assert_eq!(1, messages.len());
        assert_eq!(1, messages[0].0.answers.len());
    }

    #[test]
    fn identical_multicast_answer_suppresses_pending_response() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        let record = ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local.");
        responder.publish(record.clone(), false, 0);
        let now = run_until_published(&mut responder, 0);

        let src = SocketAddrV4::new("192.0.2.7".parse().unwrap(), MDNS_PORT);
        let query = Message::query(vec![question(
            "_ipp._tcp.local.",
            QueryType::Record(RecordType::PTR),
        )]);
        responder.input(&query, src, now);
        let deadline = responder.sleep(now).unwrap();

        // another responder answers the same thing first
        let mut other = Message::response();
        other.answers.push(record);
        let other_src = SocketAddrV4::new("192.0.2.9".parse().unwrap(), MDNS_PORT);
        responder.input(&other, other_src, now + 2);

        assert!(drain(&mut responder, deadline).is_empty());
    }

    #[test]
    fn known_answer_suppression_still_sends_additionals() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(
            ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."),
            false,
            0,
        );
        responder.publish(
            srv_record("printer._ipp._tcp.local.", 631, "host.local."),
            true,
            0,
        );
        responder.publish(txt_record("printer._ipp._tcp.local.", &["paper=a4"]), true, 0);
        responder.publish(a_record("host.local.", "192.0.2.5".parse().unwrap()), true, 0);
        let now = run_until_published(&mut responder, 0);

        // the querier already has the PTR with 80% TTL remaining
        let mut query = Message::query(vec![question(
            "_ipp._tcp.local.",
            QueryType::Record(RecordType::PTR),
        )]);
        let mut known = ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local.");
        known.ttl = known.ttl / 5 * 4;
        query.answers.push(known);

        let src = SocketAddrV4::new("192.0.2.7".parse().unwrap(), MDNS_PORT);
        responder.input(&query, src, now);

        let deadline = responder.sleep(now).unwrap();
        let messages = drain(&mut responder, deadline);
        assert_eq!(1, messages.len());
        let message = &messages[0].0;
        assert!(message.answers.is_empty());
        let additional_types: Vec<RecordType> =
            message.additional.iter().map(|rr| rr.rtype()).collect();
        assert!(additional_types.contains(&RecordType::SRV));
        assert!(additional_types.contains(&RecordType::TXT));
        assert!(additional_types.contains(&RecordType::A));
    }

    #[test]
    fn known_answer_with_low_ttl_does_not_suppress() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(
            ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."),
            false,
            0,
        );
        let now = run_until_published(&mut responder, 0);

        let mut query = Message::query(vec![question(
            "_ipp._tcp.local.",
            QueryType::Record(RecordType::PTR),
        )]);
        let mut known = ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local.");
        known.ttl /= 4;
        query.answers.push(known);

        let src = SocketAddrV4::new("192.0.2.7".parse().unwrap(), MDNS_PORT);
        responder.input(&query, src, now);

        let deadline = responder.sleep(now).unwrap();
        let messages = drain(&mut responder, deadline);
        assert_eq!(1, messages.len());
        assert_eq!(1, messages[0].0.answers.len());
    }

    #[test]
    fn ptr_answer_carries_srv_txt_and_addresses() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(
            ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."),
            false,
            0,
        );
        responder.publish(
            srv_record("printer._ipp._tcp.local.", 631, "host.local."),
            true,
            0,
        );
        responder.publish(txt_record("printer._ipp._tcp.local.", &["paper=a4"]), true, 0);
        responder.publish(a_record("host.local.", "192.0.2.5".parse().unwrap()), true, 0);
        let now = run_until_published(&mut responder, 0);

        let src = SocketAddrV4::new("192.0.2.7".parse().unwrap(), MDNS_PORT);
        let query = Message::query(vec![question(
            "_ipp._tcp.local.",
            QueryType::Record(RecordType::PTR),
        )]);
        responder.input(&query, src, now);

        let deadline = responder.sleep(now).unwrap();
        let messages = drain(&mut responder, deadline);
        assert_eq!(1, messages.len());
        let message = &messages[0].0;
        assert_eq!(1, message.answers.len());
        assert_eq!(RecordType::PTR, message.answers[0].rtype());

        let additional_types: Vec<RecordType> =
            message.additional.iter().map(|rr| rr.rtype()).collect();
        assert!(additional_types.contains(&RecordType::SRV));
        assert!(additional_types.contains(&RecordType::TXT));
        assert!(additional_types.contains(&RecordType::A));
    }

    #[test]
    fn srv_answer_carries_address_additionals() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(
            srv_record("printer._ipp._tcp.local.", 631, "host.local."),
            true,
            0,
        );
        responder.publish(a_record("host.local.", "192.0.2.5".parse().unwrap()), true, 0);
        let now = run_until_published(&mut responder, 0);

        let src = SocketAddrV4::new("192.0.2.7".parse().unwrap(), MDNS_PORT);
        let query = Message::query(vec![question(
            "printer._ipp._tcp.local.",
            QueryType::Record(RecordType::SRV),
        )]);
        responder.input(&query, src, now);

        let messages = drain(&mut responder, now);
        assert_eq!(1, messages.len());
        let message = &messages[0].0;
        assert_eq!(1, message.answers.len());
        assert_eq!(
            vec![RecordType::A],
            message
                .additional
                .iter()
                .map(|rr| rr.rtype())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn withdraw_sends_three_goodbyes() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        let record = ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local.");
        responder.publish(record.clone(), false, 0);
        let mut now = run_until_published(&mut responder, 0);

        responder.withdraw(&record.name, RecordType::PTR, now);

        let mut goodbye_times = Vec::new();
        for _ in 0..8 {
            for (message, _) in drain(&mut responder, now) {
                assert!(message.header.is_response);
                assert_eq!(1, message.answers.len());
                assert_eq!(0, message.answers[0].ttl);
                goodbye_times.push(now);
            }
            match responder.sleep(now) {
                Some(deadline) => now = deadline,
                None => break,
            }
        }

        assert_eq!(3, goodbye_times.len());
        assert_eq!(250, goodbye_times[1] - goodbye_times[0]);
        assert_eq!(250, goodbye_times[2] - goodbye_times[1]);

        // and afterwards the responder is idle and the record gone
        assert_eq!(None, responder.sleep(now));
        let query = Message::query(vec![question(
            "_ipp._tcp.local.",
            QueryType::Record(RecordType::PTR),
        )]);
        responder.input(
            &query,
            SocketAddrV4::new("192.0.2.7".parse().unwrap(), MDNS_PORT),
            now,
        );
        assert!(drain(&mut responder, now + 500).is_empty());
    }

    #[test]
    fn withdraw_of_probing_record_is_silent() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        let record = a_record("host.local.", "192.0.2.5".parse().unwrap());
        responder.publish(record.clone(), true, 0);
        responder.withdraw(&record.name, RecordType::A, 0);

        assert!(drain(&mut responder, 1000).is_empty());
        assert_eq!(None, responder.sleep(1000));
    }

    #[test]
    fn withdraw_of_unknown_key_is_a_noop() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.withdraw(&domain("nothing.local."), RecordType::A, 0);
        assert_eq!(None, responder.sleep(0));
    }

    #[test]
    fn probe_conflict_reports_and_withdraws() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        let conflicts = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen = std::rc::Rc::clone(&conflicts);
        responder.on_conflict(Box::new(move |name, rtype| {
            seen.borrow_mut().push((name.clone(), rtype));
        }));

        responder.publish(a_record("host.local.", "192.0.2.5".parse().unwrap()), true, 0);

        // a competing probe for the same name with higher rdata wins
        // the tiebreak
        let mut competing = Message::query(vec![question("host.local.", QueryType::Wildcard)]);
        competing
            .authority
            .push(a_record("host.local.", "192.0.2.9".parse().unwrap()));
        let src = SocketAddrV4::new("192.0.2.9".parse().unwrap(), MDNS_PORT);
        responder.input(&competing, src, 10);

        assert_eq!(1, conflicts.borrow().len());
        assert_eq!(domain("host.local."), conflicts.borrow()[0].0);
        assert_eq!(RecordType::A, conflicts.borrow()[0].1);
        assert_eq!(1, responder.stats().conflicts);

        // the record is gone: no probes go out
        assert!(drain(&mut responder, 1000).is_empty());
    }

    #[test]
    fn probe_tiebreak_win_keeps_record() {
        let mut responder = Responder::with_seed("192.0.2.9".parse().unwrap(), 1);
        responder.on_conflict(Box::new(|_, _| panic!("should not conflict")));

        responder.publish(a_record("host.local.", "192.0.2.9".parse().unwrap()), true, 0);

        // the competing probe has lexicographically smaller rdata, so
        // we win and carry on probing
        let mut competing = Message::query(vec![question("host.local.", QueryType::Wildcard)]);
        competing
            .authority
            .push(a_record("host.local.", "192.0.2.5".parse().unwrap()));
        let src = SocketAddrV4::new("192.0.2.5".parse().unwrap(), MDNS_PORT);
        responder.input(&competing, src, 10);

        let now = run_until_published(&mut responder, 10);
        let query = Message::query(vec![question(
            "host.local.",
            QueryType::Record(RecordType::A),
        )]);
        responder.input(
            &query,
            SocketAddrV4::new("192.0.2.7".parse().unwrap(), MDNS_PORT),
            now,
        );
        assert_eq!(1, drain(&mut responder, now).len());
    }

    #[test]
    fn published_conflict_on_cache_flush_claim() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        let conflicts = std::rc::Rc::new(std::cell::RefCell::new(0));
        let seen = std::rc::Rc::clone(&conflicts);
        responder.on_conflict(Box::new(move |_, _| *seen.borrow_mut() += 1));

        responder.publish(a_record("host.local.", "192.0.2.5".parse().unwrap()), true, 0);
        let now = run_until_published(&mut responder, 0);

        let mut claim = Message::response();
        let mut record = a_record("host.local.", "192.0.2.9".parse().unwrap());
        record.cache_flush = true;
        claim.answers.push(record);
        let src = SocketAddrV4::new("192.0.2.9".parse().unwrap(), MDNS_PORT);
        responder.input(&claim, src, now);

        assert_eq!(1, *conflicts.borrow());
    }

    #[test]
    fn query_callback_fires_for_cached_then_inbound_records() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

        // prime the cache
        let mut response = Message::response();
        response
            .answers
            .push(ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."));
        let src = SocketAddrV4::new("192.0.2.9".parse().unwrap(), MDNS_PORT);
        responder.input(&response, src, 0);

        let cloned = std::rc::Rc::clone(&seen);
        responder.query(
            domain("_ipp._tcp.local."),
            QueryType::Record(RecordType::PTR),
            Box::new(move |record| cloned.borrow_mut().push(record.clone())),
            1000,
        );
        assert_eq!(1, seen.borrow().len());

        let mut response = Message::response();
        response
            .answers
            .push(ptr_record("_ipp._tcp.local.", "other._ipp._tcp.local."));
        responder.input(&response, src, 2000);
        assert_eq!(2, seen.borrow().len());
    }

    #[test]
    fn cancelled_query_never_fires_again() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        let seen = std::rc::Rc::new(std::cell::RefCell::new(0));
        let cloned = std::rc::Rc::clone(&seen);
        let handle = responder.query(
            domain("_ipp._tcp.local."),
            QueryType::Record(RecordType::PTR),
            Box::new(move |_| *cloned.borrow_mut() += 1),
            0,
        );

        responder.cancel_query(handle);
        responder.cancel_query(handle);

        let mut response = Message::response();
        response
            .answers
            .push(ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."));
        let src = SocketAddrV4::new("192.0.2.9".parse().unwrap(), MDNS_PORT);
        responder.input(&response, src, 100);

        assert_eq!(0, *seen.borrow());
        // the question schedule stopped with the last registration
        assert_eq!(None, responder.sleep(100));
    }

    #[test]
    fn queries_go_out_with_known_answers() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);

        let mut response = Message::response();
        response
            .answers
            .push(ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."));
        let src = SocketAddrV4::new("192.0.2.9".parse().unwrap(), MDNS_PORT);
        responder.input(&response, src, 0);

        responder.query(
            domain("_ipp._tcp.local."),
            QueryType::Record(RecordType::PTR),
            Box::new(|_| ()),
            1000,
        );

        let messages = drain(&mut responder, 1000);
        assert_eq!(1, messages.len());
        let (message, destination) = &messages[0];
        assert_eq!(MULTICAST_DESTINATION, *destination);
        assert!(!message.header.is_response);
        assert_eq!(1, message.questions.len());
        assert_eq!(1, message.answers.len());
        assert_eq!(RecordType::PTR, message.answers[0].rtype());
    }

    #[test]
    fn monitor_sees_cache_expiry_as_goodbye() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);

        let mut record = ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local.");
        record.ttl = 5;
        let mut response = Message::response();
        response.answers.push(record);
        let src = SocketAddrV4::new("192.0.2.9".parse().unwrap(), MDNS_PORT);
        responder.input(&response, src, 0);

        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let cloned = std::rc::Rc::clone(&seen);
        responder.monitor(
            domain("_ipp._tcp.local."),
            QueryType::Record(RecordType::PTR),
            Box::new(move |record| cloned.borrow_mut().push(record.ttl)),
            0,
        );

        // cached hit, then the expiry notification
        drain(&mut responder, 6000);
        assert_eq!(vec![5, 0], *seen.borrow());
    }

    #[test]
    fn shutdown_sends_goodbyes_then_drops_input() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(
            ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."),
            false,
            0,
        );
        let mut now = run_until_published(&mut responder, 0);

        responder.shutdown(now);

        let mut goodbyes = 0;
        for _ in 0..8 {
            for (message, _) in drain(&mut responder, now) {
                assert_eq!(0, message.answers[0].ttl);
                goodbyes += 1;
            }
            match responder.sleep(now) {
                Some(deadline) => now = deadline,
                None => break,
            }
        }
        assert_eq!(3, goodbyes);
        assert_eq!(None, responder.sleep(now));

        let received = responder.stats().packets_received;
        let query = Message::query(vec![question("_ipp._tcp.local.", QueryType::Wildcard)]);
        responder.input(
            &query,
            SocketAddrV4::new("192.0.2.7".parse().unwrap(), MDNS_PORT),
            now,
        );
        assert_eq!(received, responder.stats().packets_received);
        assert!(drain(&mut responder, now + 1000).is_empty());
    }

    #[test]
    fn announcements_split_with_truncation() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        for i in 0..1000 {
            responder.publish(
                a_record(
                    &format!("host-{i}.local."),
                    format!("192.0.{}.{}", i / 250, i % 250).parse().unwrap(),
                ),
                false,
                0,
            );
        }

        let messages = drain(&mut responder, 0);
        assert!(messages.len() > 1);
        for (i, (message, _)) in messages.iter().enumerate() {
            let octets = message.to_octets().unwrap();
            assert!(octets.len() <= PACKET_MAX_LEN);
            let last = i == messages.len() - 1;
            assert_eq!(!last, message.header.is_truncated);
        }

        let total: usize = messages.iter().map(|(message, _)| message.answers.len()).sum();
        assert_eq!(1000, total);
    }

    #[test]
    fn set_address_rewrites_address_records() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.publish(a_record("host.local.", "192.0.2.5".parse().unwrap()), true, 0);
        let now = run_until_published(&mut responder, 0);

        responder.set_address("192.0.2.99".parse().unwrap(), now);
        let messages = drain(&mut responder, now);
        assert!(!messages.is_empty());
        assert_eq!(
            RecordTypeWithData::A {
                address: "192.0.2.99".parse().unwrap()
            },
            messages[0].0.answers[0].rtype_with_data,
        );
    }

    #[test]
    fn malformed_packets_are_counted() {
        let mut responder = Responder::with_seed("192.0.2.5".parse().unwrap(), 1);
        responder.note_malformed_packet();
        responder.note_malformed_packet();
        assert_eq!(2, responder.stats().malformed_packets);
    }
}

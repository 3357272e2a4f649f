//! Outstanding local queries: who asked, what for, and when the
//! question next goes out on the wire.

use slab::Slab;
use std::collections::HashMap;

use mdns_types::protocol::types::*;

/// Gap between the first and second transmissions of an unanswered
/// question.
const QUERY_INTERVAL_INITIAL_MS: u64 = 1000;

/// Retransmission intervals double up to this (RFC 6762 section 5.2
/// caps the interval at one hour).
const QUERY_INTERVAL_MAX_MS: u64 = 3_600_000;

/// A stable identifier for a registered query, generation-tagged the
/// same way as record handles: cancelling twice, or using a stale
/// handle, is harmless.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct QueryHandle {
    index: usize,
    generation: u64,
}

/// The callback invoked with each record answering a query.
pub type AnswerCallback = Box<dyn FnMut(&ResourceRecord)>;

struct ActiveQuery {
    name: DomainName,
    qtype: QueryType,
    /// Monitor queries are also told when records go away, via a
    /// record with TTL zero.
    monitor: bool,
    callback: AnswerCallback,
}

/// The per-(name, type) transmission schedule.  Multiple
/// registrations of the same question share one schedule; it stops
/// when the last of them is cancelled.
struct QuestionSchedule {
    next_send: u64,
    interval: u64,
    /// The interval does not double until the second transmission has
    /// gone out, giving send times of 0, 1, 2, 4, 8, ... seconds.
    sent_once: bool,
    registrations: usize,
}

pub struct QueryTracker {
    queries: Slab<(u64, ActiveQuery)>,
    next_generation: u64,
    schedules: HashMap<(DomainName, QueryType), QuestionSchedule>,
}

impl Default for QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryTracker {
    pub fn new() -> Self {
        Self {
            queries: Slab::new(),
            next_generation: 0,
            schedules: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: DomainName,
        qtype: QueryType,
        monitor: bool,
        callback: AnswerCallback,
        now: u64,
    ) -> QueryHandle {
        self.next_generation += 1;
        let generation = self.next_generation;

        let schedule = self
            .schedules
            .entry((name.clone(), qtype))
            .or_insert(QuestionSchedule {
                next_send: now,
                interval: QUERY_INTERVAL_INITIAL_MS,
                sent_once: false,
                registrations: 0,
            });
        schedule.registrations += 1;

        let index = self.queries.insert((
            generation,
            ActiveQuery {
                name,
                qtype,
                monitor,
                callback,
            },
        ));

        QueryHandle { index, generation }
    }

    /// Cancel a registration.  The callback will never be invoked
    /// again.  Unknown or already-cancelled handles are a no-op.
    pub fn cancel(&mut self, handle: QueryHandle) {
        let live = matches!(
            self.queries.get(handle.index),
            Some((generation, _)) if *generation == handle.generation
        );
        if !live {
            return;
        }
        let (_, query) = self.queries.remove(handle.index);

        let key = (query.name, query.qtype);
        if let Some(schedule) = self.schedules.get_mut(&key) {
            schedule.registrations -= 1;
            if schedule.registrations == 0 {
                self.schedules.remove(&key);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Questions due to go out at `now`.  Each is rescheduled on a
    /// doubling backoff: 1 s, 2 s, 4 s, ... capped at one hour.
    pub fn due(&mut self, now: u64) -> Vec<(DomainName, QueryType)> {
        let mut due = Vec::new();
        for ((name, qtype), schedule) in &mut self.schedules {
            if schedule.next_send <= now {
                due.push((name.clone(), *qtype));
                schedule.next_send = now + schedule.interval;
                if schedule.sent_once {
                    schedule.interval = (schedule.interval * 2).min(QUERY_INTERVAL_MAX_MS);
                } else {
                    schedule.sent_once = true;
                }
            }
        }
        due
    }

    /// When the next question goes out, if any are scheduled.
    pub fn next_send(&self) -> Option<u64> {
        self.schedules
            .values()
            .map(|schedule| schedule.next_send)
            .min()
    }

    /// Hand an arriving record to every matching query.  Records with
    /// TTL zero are disappearances and go to monitor queries only.
    pub fn dispatch(&mut self, record: &ResourceRecord) {
        for (_, (_, query)) in self.queries.iter_mut() {
            if record.name != query.name || !record.rtype().matches(query.qtype) {
                continue;
            }
            if record.ttl == 0 && !query.monitor {
                continue;
            }
            (query.callback)(record);
        }
    }

    /// Hand a record to one specific query, used to replay cache hits
    /// to a freshly registered query without involving the others.
    pub fn dispatch_to(&mut self, handle: QueryHandle, record: &ResourceRecord) {
        if let Some((generation, query)) = self.queries.get_mut(handle.index) {
            if *generation == handle.generation {
                (query.callback)(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdns_types::protocol::types::test_util::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_callback() -> (AnswerCallback, Rc<RefCell<Vec<ResourceRecord>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let cloned = Rc::clone(&seen);
        let callback = Box::new(move |record: &ResourceRecord| {
            cloned.borrow_mut().push(record.clone());
        });
        (callback, seen)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut tracker = QueryTracker::new();
        let (callback, _) = recording_callback();
        tracker.register(
            domain("_ipp._tcp.local."),
            QueryType::Record(RecordType::PTR),
            false,
            callback,
            0,
        );

        let mut sends = Vec::new();
        for _ in 0..16 {
            let now = tracker.next_send().unwrap();
            assert_eq!(1, tracker.due(now).len());
            sends.push(now);
        }

        assert_eq!(
            vec![0, 1000, 2000, 4000, 8000, 16_000, 32_000],
            sends[..7].to_vec()
        );

        // once at the cap, sends are an hour apart
        let last_gap = sends[15] - sends[14];
        assert_eq!(3_600_000, last_gap);
    }

    #[test]
    fn duplicate_questions_share_a_schedule() {
        let mut tracker = QueryTracker::new();
        let (cb1, _) = recording_callback();
        let (cb2, _) = recording_callback();
        let name = domain("_ipp._tcp.local.");
        let qtype = QueryType::Record(RecordType::PTR);

        let first = tracker.register(name.clone(), qtype, false, cb1, 0);
        tracker.register(name.clone(), qtype, false, cb2, 0);

        assert_eq!(1, tracker.due(0).len());

        // cancelling one registration keeps the schedule alive
        tracker.cancel(first);
        assert_eq!(Some(1000), tracker.next_send());
    }

    #[test]
    fn cancel_stops_schedule_and_callbacks() {
        let mut tracker = QueryTracker::new();
        let (callback, seen) = recording_callback();
        let handle = tracker.register(
            domain("_ipp._tcp.local."),
            QueryType::Record(RecordType::PTR),
            false,
            callback,
            0,
        );

        tracker.cancel(handle);
        tracker.cancel(handle);

        assert_eq!(None, tracker.next_send());
        tracker.dispatch(&ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn dispatch_matches_name_and_type() {
        let mut tracker = QueryTracker::new();
        let (callback, seen) = recording_callback();
        tracker.register(
            domain("_ipp._tcp.local."),
            QueryType::Record(RecordType::PTR),
            false,
            callback,
            0,
        );

        tracker.dispatch(&ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local."));
        tracker.dispatch(&ptr_record("_http._tcp.local.", "web._http._tcp.local."));
        tracker.dispatch(&txt_record("_ipp._tcp.local.", &["k=v"]));

        assert_eq!(1, seen.borrow().len());
    }

    #[test]
    fn goodbyes_reach_monitors_only() {
        let mut tracker = QueryTracker::new();
        let (plain_cb, plain_seen) = recording_callback();
        let (monitor_cb, monitor_seen) = recording_callback();
        let name = domain("_ipp._tcp.local.");
        let qtype = QueryType::Record(RecordType::PTR);

        tracker.register(name.clone(), qtype, false, plain_cb, 0);
        tracker.register(name.clone(), qtype, true, monitor_cb, 0);

        let mut goodbye = ptr_record("_ipp._tcp.local.", "printer._ipp._tcp.local.");
        goodbye.ttl = 0;
        tracker.dispatch(&goodbye);

        assert!(plain_seen.borrow().is_empty());
        assert_eq!(1, monitor_seen.borrow().len());
        assert_eq!(0, monitor_seen.borrow()[0].ttl);
    }
}

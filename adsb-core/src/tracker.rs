//! Per-aircraft state tracking.
//!
//! Merges decoded messages into a per-ICAO state table, resolves CPR
//! position pairs into WGS-84 coordinates, gates positions by range from a
//! configured receiver anchor, expires stale aircraft lazily, and fans out
//! update events to subscribers. Pure logic — no I/O, no database; the
//! caller persists `TrackEvent::Persist` events and forwards `Updated`
//! events to whatever transport it owns (websocket, log, etc).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

use crate::config::ReceiverConfig;
use crate::cpr;
use crate::decode::decode;
use crate::frame::ModeFrame;
use crate::geo::haversine_nm;
use crate::types::*;

/// Aircraft considered gone after this many seconds of silence.
pub const AIRCRAFT_TIMEOUT_SEC: f64 = 60.0;
/// Even/odd CPR frames older than this relative to each other can't be paired.
pub const CPR_FRAME_MAX_AGE_SEC: f64 = 10.0;
/// Ring buffer length for position history.
pub const MAX_POSITION_HISTORY: usize = 100;
/// Persist (history-store write) throttle, per ICAO.
pub const HISTORY_SAVE_INTERVAL_SEC: f64 = 30.0;

/// Depth of each subscriber's event queue before the oldest entry is dropped.
const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

// ---------------------------------------------------------------------------
// Snapshot / events
// ---------------------------------------------------------------------------

/// A single fix in an aircraft's position history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionPoint {
    pub lat: f64,
    pub lon: f64,
    pub altitude_ft: Option<i32>,
    pub timestamp: f64,
}

/// Read-only copy of an aircraft's state for external consumers. Excludes
/// the internal even/odd CPR slots, which have no meaning outside the
/// tracker's own pairing logic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftSnapshot {
    pub icao: Icao,
    pub callsign: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude_ft: Option<i32>,
    pub speed_kts: Option<f64>,
    pub heading_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub squawk: Option<String>,
    pub signal_strength: Option<f64>,
    pub last_seen: f64,
    pub messages: u64,
    pub selected_altitude_ft: Option<i32>,
    pub roll_deg: Option<f64>,
    pub magnetic_heading_deg: Option<f64>,
    pub ias_kt: Option<u16>,
    pub distance_nm: Option<f64>,
}

/// Events the tracker hands to its caller.
#[derive(Debug, Clone)]
pub enum TrackEvent {
    /// Fired on every merged message; intended for live subscribers
    /// (websocket push, TUI refresh) rather than durable storage.
    Updated(AircraftSnapshot),
    /// Fired at most once per ICAO per [`HISTORY_SAVE_INTERVAL_SEC`];
    /// the caller should write this to the history store.
    Persist(AircraftSnapshot),
    /// An aircraft aged out of the table on a [`Tracker::prune_stale`] sweep.
    Expired(Icao),
}

// ---------------------------------------------------------------------------
// Aircraft state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct CprSlot {
    lat: u32,
    lon: u32,
    time: f64,
    set: bool,
}

/// Mutable state for a single tracked aircraft.
#[derive(Debug, Clone)]
pub struct AircraftState {
    pub icao: Icao,
    pub callsign: Option<String>,
    pub squawk: Option<String>,

    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude_ft: Option<i32>,

    pub speed_kts: Option<f64>,
    pub heading_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,

    pub signal_strength: Option<f64>,

    pub selected_altitude_ft: Option<i32>,
    pub roll_deg: Option<f64>,
    pub magnetic_heading_deg: Option<f64>,
    pub ias_kt: Option<u16>,

    pub first_seen: f64,
    pub last_seen: f64,
    pub message_count: u64,

    pub position_history: VecDeque<PositionPoint>,

    cpr_even: CprSlot,
    cpr_odd: CprSlot,
}

impl AircraftState {
    fn new(icao: Icao, timestamp: f64) -> Self {
        AircraftState {
            icao,
            callsign: None,
            squawk: None,
            lat: None,
            lon: None,
            altitude_ft: None,
            speed_kts: None,
            heading_deg: None,
            vertical_rate_fpm: None,
            signal_strength: None,
            selected_altitude_ft: None,
            roll_deg: None,
            magnetic_heading_deg: None,
            ias_kt: None,
            first_seen: timestamp,
            last_seen: timestamp,
            message_count: 0,
            position_history: VecDeque::new(),
            cpr_even: CprSlot::default(),
            cpr_odd: CprSlot::default(),
        }
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.last_seen
    }

    pub fn is_stale(&self, now: f64) -> bool {
        self.age(now) > AIRCRAFT_TIMEOUT_SEC
    }

    /// Update the exponential moving average signal strength. Resets
    /// (rather than averages) on the first sample.
    fn update_signal(&mut self, sample: f64) {
        let next = match self.signal_strength {
            Some(prev) => 0.7 * prev + 0.3 * sample,
            None => sample,
        };
        self.signal_strength = Some((next * 1_000_000.0).round() / 1_000_000.0);
    }

    fn push_position(&mut self, point: PositionPoint) {
        self.position_history.push_back(point);
        while self.position_history.len() > MAX_POSITION_HISTORY {
            self.position_history.pop_front();
        }
    }

    pub fn snapshot(&self, anchor: Option<(f64, f64)>) -> AircraftSnapshot {
        let distance_nm = match (anchor, self.lat, self.lon) {
            (Some((rlat, rlon)), Some(lat), Some(lon)) => {
                Some(haversine_nm(rlat, rlon, lat, lon))
            }
            _ => None,
        };
        AircraftSnapshot {
            icao: self.icao,
            callsign: self.callsign.clone(),
            lat: self.lat,
            lon: self.lon,
            altitude_ft: self.altitude_ft,
            speed_kts: self.speed_kts,
            heading_deg: self.heading_deg,
            vertical_rate_fpm: self.vertical_rate_fpm,
            squawk: self.squawk.clone(),
            signal_strength: self.signal_strength,
            last_seen: self.last_seen,
            messages: self.message_count,
            selected_altitude_ft: self.selected_altitude_ft,
            roll_deg: self.roll_deg,
            magnetic_heading_deg: self.magnetic_heading_deg,
            ias_kt: self.ias_kt,
            distance_nm,
        }
    }
}

/// Try to resolve a lat/lon from this aircraft's CPR slots: global decode
/// first (no reference needed), then local decode against `anchor` or the
/// aircraft's last known fix.
fn try_cpr_decode(ac: &AircraftState, anchor: Option<(f64, f64)>) -> Option<(f64, f64)> {
    if ac.cpr_even.set && ac.cpr_odd.set {
        if let Some(fix) = cpr::global_decode(
            ac.cpr_even.lat,
            ac.cpr_even.lon,
            ac.cpr_odd.lat,
            ac.cpr_odd.lon,
            ac.cpr_even.time,
            ac.cpr_odd.time,
        ) {
            return Some(fix);
        }
    }

    let (ref_lat, ref_lon) = anchor.or(match (ac.lat, ac.lon) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => None,
    })?;

    if ac.cpr_odd.set && ac.cpr_odd.time >= ac.cpr_even.time {
        Some(cpr::local_decode(
            ac.cpr_odd.lat,
            ac.cpr_odd.lon,
            true,
            ref_lat,
            ref_lon,
        ))
    } else if ac.cpr_even.set {
        Some(cpr::local_decode(
            ac.cpr_even.lat,
            ac.cpr_even.lon,
            false,
            ref_lat,
            ref_lon,
        ))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Bounded drop-oldest subscriber queue
// ---------------------------------------------------------------------------

/// A bounded event queue that drops the oldest pending event rather than
/// blocking the publisher when full. The standard library's channels have
/// no drop-oldest mode, so subscribers get one of these instead.
pub struct Subscription {
    queue: std::sync::Arc<Mutex<VecDeque<TrackEvent>>>,
}

impl Subscription {
    /// Drain all events currently queued, oldest first.
    pub fn drain(&self) -> Vec<TrackEvent> {
        let mut q = self.queue.lock().unwrap();
        q.drain(..).collect()
    }

    /// Pop the next queued event, if any.
    pub fn try_recv(&self) -> Option<TrackEvent> {
        self.queue.lock().unwrap().pop_front()
    }
}

struct SubscriberSlot {
    queue: std::sync::Arc<Mutex<VecDeque<TrackEvent>>>,
}

impl SubscriberSlot {
    fn push(&self, event: TrackEvent) {
        let mut q = self.queue.lock().unwrap();
        if q.len() >= SUBSCRIBER_QUEUE_DEPTH {
            q.pop_front();
        }
        q.push_back(event);
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

struct Inner {
    aircraft: HashMap<Icao, AircraftState>,
    last_persisted: HashMap<Icao, f64>,
    subscribers: Vec<SubscriberSlot>,
}

/// Multi-aircraft state machine. Thread-safe: a single internal mutex
/// serializes all mutations; reads return owned copies.
pub struct Tracker {
    inner: Mutex<Inner>,
    anchor: Option<(f64, f64)>,
    max_range_nm: f64,
    show_only: Option<Icao>,
}

impl Tracker {
    pub fn new(config: &ReceiverConfig) -> Self {
        Tracker {
            inner: Mutex::new(Inner {
                aircraft: HashMap::new(),
                last_persisted: HashMap::new(),
                subscribers: Vec::new(),
            }),
            anchor: config.anchor(),
            max_range_nm: config.max_range_nm,
            show_only: config.show_only.as_deref().and_then(icao_from_hex),
        }
    }

    /// Construct a tracker directly from an anchor/range pair, bypassing
    /// `ReceiverConfig` (used by tests and by callers without a CLI).
    pub fn with_anchor(anchor: Option<(f64, f64)>, max_range_nm: f64) -> Self {
        Tracker {
            inner: Mutex::new(Inner {
                aircraft: HashMap::new(),
                last_persisted: HashMap::new(),
                subscribers: Vec::new(),
            }),
            anchor,
            max_range_nm,
            show_only: None,
        }
    }

    /// Register a new subscriber; events published after this call (not
    /// before) are delivered to the returned handle.
    pub fn subscribe(&self) -> Subscription {
        let queue = std::sync::Arc::new(Mutex::new(VecDeque::new()));
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.push(SubscriberSlot {
            queue: queue.clone(),
        });
        Subscription { queue }
    }

    fn publish(inner: &Inner, event: TrackEvent) {
        for sub in &inner.subscribers {
            sub.push(event.clone());
        }
    }

    /// Candidate ICAOs currently tracked, for short-frame recovery. The
    /// caller is expected to union this with recent history-store ICAOs
    /// per `ICAO_CANDIDATE_HOURS` and re-derive the set it passes to
    /// `frame::parse_frame` roughly every `ICAO_CANDIDATE_REFRESH_SEC`.
    pub fn live_icaos(&self) -> Vec<Icao> {
        self.inner.lock().unwrap().aircraft.keys().copied().collect()
    }

    /// Merge a parsed, CRC-valid frame into the tracker. Returns the
    /// decoded message (for callers that want to log/inspect it) alongside
    /// any events to persist or forward.
    pub fn update(&self, frame: &ModeFrame) -> (Option<DecodedMsg>, Vec<TrackEvent>) {
        let mut events = Vec::new();

        let msg = match decode(frame) {
            Some(m) => m,
            None => return (None, events),
        };

        let icao = *msg.icao();
        if let Some(only) = self.show_only {
            if icao != only {
                crate::demod::record_message_filtered();
                return (None, events);
            }
        }
        let timestamp = msg.timestamp();

        let mut inner = self.inner.lock().unwrap();
        let is_new = !inner.aircraft.contains_key(&icao);
        if is_new {
            inner.aircraft.insert(icao, AircraftState::new(icao, timestamp));
        }

        let ac = inner.aircraft.get_mut(&icao).unwrap();
        ac.last_seen = timestamp;
        ac.message_count += 1;
        if let Some(signal) = frame.signal_level {
            ac.update_signal(signal);
        }

        match &msg {
            DecodedMsg::Identification(m) => {
                let cs = m.callsign.trim().to_string();
                if !cs.is_empty() {
                    ac.callsign = Some(cs);
                }
            }
            DecodedMsg::Position(m) => {
                if let Some(alt) = m.altitude_ft {
                    ac.altitude_ft = Some(alt);
                }

                let slot = CprSlot {
                    lat: m.cpr_lat,
                    lon: m.cpr_lon,
                    time: m.timestamp,
                    set: true,
                };
                if m.cpr_odd {
                    ac.cpr_odd = slot;
                } else {
                    ac.cpr_even = slot;
                }

                if let Some((lat, lon)) = try_cpr_decode(ac, self.anchor) {
                    let in_range = match self.anchor {
                        Some((rlat, rlon)) => {
                            let range_nm = haversine_nm(rlat, rlon, lat, lon);
                            if range_nm > self.max_range_nm {
                                tracing::debug!(
                                    icao = %icao_to_string(&icao),
                                    range_nm,
                                    max_range_nm = self.max_range_nm,
                                    "dropping out-of-range position"
                                );
                            }
                            range_nm <= self.max_range_nm
                        }
                        None => true,
                    };
                    if in_range {
                        ac.lat = Some(lat);
                        ac.lon = Some(lon);
                        ac.push_position(PositionPoint {
                            lat,
                            lon,
                            altitude_ft: ac.altitude_ft,
                            timestamp,
                        });
                    }
                }
            }
            DecodedMsg::Velocity(m) => {
                if let Some(spd) = m.speed_kts {
                    ac.speed_kts = Some(spd);
                }
                if let Some(hdg) = m.heading_deg {
                    ac.heading_deg = Some(hdg);
                }
                if let Some(vr) = m.vertical_rate_fpm {
                    ac.vertical_rate_fpm = Some(vr);
                }
            }
            DecodedMsg::Altitude(m) => {
                if let Some(alt) = m.altitude_ft {
                    ac.altitude_ft = Some(alt);
                }
            }
            DecodedMsg::Squawk(m) => {
                ac.squawk = Some(m.squawk.clone());
            }
            DecodedMsg::CommB(m) => match m.bds {
                Bds::Bds40 => ac.selected_altitude_ft = m.selected_altitude_ft,
                Bds::Bds50 => ac.roll_deg = m.roll_deg,
                Bds::Bds60 => {
                    ac.magnetic_heading_deg = m.magnetic_heading_deg;
                    ac.ias_kt = m.ias_kt;
                }
            },
        }

        let snapshot = ac.snapshot(self.anchor);
        events.push(TrackEvent::Updated(snapshot.clone()));
        Self::publish(&inner, events[0].clone());

        let due = match inner.last_persisted.get(&icao) {
            Some(&last) => timestamp - last >= HISTORY_SAVE_INTERVAL_SEC,
            None => true,
        };
        if due {
            inner.last_persisted.insert(icao, timestamp);
            let persist = TrackEvent::Persist(snapshot);
            events.push(persist.clone());
            Self::publish(&inner, persist);
        }

        (Some(msg), events)
    }

    /// Return a snapshot of a single tracked aircraft.
    pub fn snapshot(&self, icao: &Icao) -> Option<AircraftSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.aircraft.get(icao).map(|ac| ac.snapshot(self.anchor))
    }

    /// All non-stale aircraft, most recently seen first.
    pub fn snapshots(&self, now: f64) -> Vec<AircraftSnapshot> {
        let inner = self.inner.lock().unwrap();
        let mut list: Vec<_> = inner
            .aircraft
            .values()
            .filter(|ac| !ac.is_stale(now))
            .map(|ac| ac.snapshot(self.anchor))
            .collect();
        list.sort_by(|a, b| b.last_seen.partial_cmp(&a.last_seen).unwrap());
        list
    }

    /// Copy of a tracked aircraft's full internal state (including position
    /// history), for callers that need more than the public snapshot.
    pub fn aircraft_state(&self, icao: &Icao) -> Option<AircraftState> {
        self.inner.lock().unwrap().aircraft.get(icao).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove aircraft that have been silent longer than
    /// [`AIRCRAFT_TIMEOUT_SEC`]. Publishes `Expired` to subscribers.
    /// Returns the number removed.
    pub fn prune_stale(&self, now: f64) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<Icao> = inner
            .aircraft
            .iter()
            .filter(|(_, ac)| ac.is_stale(now))
            .map(|(k, _)| *k)
            .collect();
        for icao in &stale {
            inner.aircraft.remove(icao);
            inner.last_persisted.remove(icao);
            Self::publish(&inner, TrackEvent::Expired(*icao));
        }
        stale.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_frame_uncached;

    fn make_tracker() -> Tracker {
        Tracker::with_anchor(None, 300.0)
    }

    fn parse(hex: &str, ts: f64) -> ModeFrame {
        parse_frame_uncached(hex, ts, None).expect("valid frame")
    }

    #[test]
    fn test_new_aircraft_creates_state() {
        let tracker = make_tracker();
        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        let (msg, events) = tracker.update(&frame);

        assert!(msg.is_some());
        assert_eq!(tracker.len(), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackEvent::Updated(_))));
    }

    #[test]
    fn test_callsign_set() {
        let tracker = make_tracker();
        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        tracker.update(&frame);

        let icao = [0x48, 0x40, 0xD6];
        let snap = tracker.snapshot(&icao).unwrap();
        assert_eq!(snap.callsign.as_deref(), Some("KLM1023"));
    }

    #[test]
    fn test_position_cpr_pairing() {
        let tracker = make_tracker();

        let frame = parse("8D40621D58C382D690C8AC2863A7", 1.0); // even
        tracker.update(&frame);

        let icao = [0x40, 0x62, 0x1D];
        assert!(!tracker.snapshot(&icao).unwrap().lat.is_some());

        let frame = parse("8D40621D58C386435CC412692AD6", 2.0); // odd
        let (_, events) = tracker.update(&frame);

        let snap = tracker.snapshot(&icao).unwrap();
        assert!(snap.lat.is_some(), "should have position after CPR pair");
        assert_eq!(snap.altitude_ft, Some(38000));
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackEvent::Persist(_))));
    }

    #[test]
    fn test_position_history_accumulates() {
        let tracker = make_tracker();
        tracker.update(&parse("8D40621D58C382D690C8AC2863A7", 1.0));
        tracker.update(&parse("8D40621D58C386435CC412692AD6", 2.0));

        let icao = [0x40, 0x62, 0x1D];
        let ac = tracker.aircraft_state(&icao).unwrap();
        assert_eq!(ac.position_history.len(), 1);
    }

    #[test]
    fn test_velocity_update() {
        let tracker = make_tracker();
        let frame = parse("8D485020994409940838175B284F", 1.0);
        tracker.update(&frame);

        let icao = [0x48, 0x50, 0x20];
        let snap = tracker.snapshot(&icao).unwrap();
        assert!(snap.speed_kts.is_some());
        assert!(snap.heading_deg.is_some());
        assert_eq!(snap.vertical_rate_fpm, Some(-832));
    }

    #[test]
    fn test_signal_strength_ema() {
        let tracker = make_tracker();
        let mut frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        frame.signal_level = Some(0.5);
        tracker.update(&frame);

        let icao = [0x48, 0x40, 0xD6];
        assert_eq!(tracker.snapshot(&icao).unwrap().signal_strength, Some(0.5));

        let mut frame2 = parse("8D4840D6202CC371C32CE0576098", 2.0);
        frame2.signal_level = Some(1.0);
        tracker.update(&frame2);

        let expected = ((0.7 * 0.5 + 0.3 * 1.0_f64) * 1_000_000.0).round() / 1_000_000.0;
        assert_eq!(tracker.snapshot(&icao).unwrap().signal_strength, Some(expected));
    }

    #[test]
    fn test_stale_detection() {
        let ac = AircraftState::new([0x01, 0x02, 0x03], 1.0);
        assert!(!ac.is_stale(2.0));
        assert!(ac.is_stale(62.0));
    }

    #[test]
    fn test_prune_stale_emits_expired() {
        let tracker = make_tracker();
        tracker.update(&parse("8D4840D6202CC371C32CE0576098", 1.0));

        let sub = tracker.subscribe();
        assert_eq!(tracker.prune_stale(2.0), 0);
        assert_eq!(tracker.prune_stale(62.0), 1);
        assert_eq!(tracker.len(), 0);

        let events = sub.drain();
        assert!(events.iter().any(|e| matches!(e, TrackEvent::Expired(_))));
    }

    #[test]
    fn test_snapshots_excludes_stale() {
        let tracker = make_tracker();
        tracker.update(&parse("8D4840D6202CC371C32CE0576098", 1.0));

        assert_eq!(tracker.snapshots(2.0).len(), 1);
        assert_eq!(tracker.snapshots(62.0).len(), 0);
    }

    #[test]
    fn test_show_only_filters() {
        let mut config = ReceiverConfig::default();
        config.show_only = Some("4840D6".to_string());
        let tracker = Tracker::new(&config);

        tracker.update(&parse("8D4840D6202CC371C32CE0576098", 1.0));
        tracker.update(&parse("8D406B902015A678D4D220AA4BDA", 2.0));

        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_max_range_rejects_far_position() {
        // Anchor far from the decoded fix (~52.26N, 3.92E); 1nm max range.
        let tracker = Tracker::with_anchor(Some((0.0, 0.0)), 1.0);
        tracker.update(&parse("8D40621D58C382D690C8AC2863A7", 1.0));
        tracker.update(&parse("8D40621D58C386435CC412692AD6", 2.0));

        let icao = [0x40, 0x62, 0x1D];
        assert!(tracker.snapshot(&icao).unwrap().lat.is_none());
    }

    #[test]
    fn test_multiple_aircraft() {
        let tracker = make_tracker();
        tracker.update(&parse("8D4840D6202CC371C32CE0576098", 1.0));
        tracker.update(&parse("8D406B902015A678D4D220AA4BDA", 2.0));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_persist_throttled_per_icao() {
        let tracker = make_tracker();
        let (_, events1) = tracker.update(&parse("8D4840D6202CC371C32CE0576098", 1.0));
        assert!(events1.iter().any(|e| matches!(e, TrackEvent::Persist(_))));

        let (_, events2) = tracker.update(&parse("8D4840D6202CC371C32CE0576098", 5.0));
        assert!(!events2.iter().any(|e| matches!(e, TrackEvent::Persist(_))));

        let (_, events3) = tracker.update(&parse("8D4840D6202CC371C32CE0576098", 35.0));
        assert!(events3.iter().any(|e| matches!(e, TrackEvent::Persist(_))));
    }

    #[test]
    fn test_live_icaos() {
        let tracker = make_tracker();
        tracker.update(&parse("8D4840D6202CC371C32CE0576098", 1.0));
        let live = tracker.live_icaos();
        assert_eq!(live, vec![[0x48, 0x40, 0xD6]]);
    }
}

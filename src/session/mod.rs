// src/session/mod.rs
//
// Race session coordinator. Joins the broadcast room, pairs with the peer,
// drives the sync burst, and turns local gate crossings plus peer messages
// into the final split:
//
//   idle -> pairing -> syncing -> ready -> armed -> running -> finished
//
// `reset` returns to ready; `disconnect` returns to idle. All peer input
// arrives through `handle_raw` after the transport shim has handed it off
// into the control context.

pub mod dedup;
pub mod messages;
pub mod room;
pub mod split;

use crate::error::RaceError;
use crate::sync::{convert_remote_to_local, ClockSync, SyncStatus};
use crate::transport::Transport;
use crate::types::{Config, Crossing, Role, SessionState};
use self::dedup::DedupFilter;
use self::messages::{MessageBody, RaceMessage};
use self::split::{compute_split, crossing_to_uptime, RaceOutcome};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_PENDING_EVENTS: usize = 64;

/// Observable session side effects, drained by the owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    PartnerConnected { role: Role },
    /// The peer claims the same role as this device
    RoleConflict { role: Role },
    SyncStatusChanged(SyncStatus),
    PeerReady { role: Role },
    RaceStarted,
    RaceFinished(RaceOutcome),
    /// A finish result whose split clamped to zero
    ImplausibleSplit,
    /// Session cancelled mid-run
    Aborted,
}

/// Bounded event queue; subsystems publish, the owner drains.
#[derive(Debug, Default)]
struct SessionEvents {
    events: VecDeque<SessionEvent>,
}

impl SessionEvents {
    fn publish(&mut self, event: SessionEvent) {
        if self.events.len() >= MAX_PENDING_EVENTS {
            warn!("Session event queue full, dropping oldest");
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn drain(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }
}

#[derive(Debug, Clone)]
struct Partner {
    sender_id: String,
    role: Role,
    last_seen_nanos: i64,
}

pub struct RaceSession {
    config: Config,
    role: Role,
    state: SessionState,
    transport: Box<dyn Transport>,
    sync: ClockSync,

    sender_id: String,
    session_id: Option<String>,
    room_code: Option<String>,
    next_seq: u64,
    dedup: DedupFilter,

    partner: Option<Partner>,
    peer_armed: bool,
    offset_nanos: i64,
    t_start_local: Option<i64>,
    outcome: Option<RaceOutcome>,

    pings_sent: u32,
    burst_cancel: Arc<AtomicBool>,

    events: SessionEvents,
}

impl RaceSession {
    pub fn new(role: Role, transport: Box<dyn Transport>, sync: ClockSync, config: Config) -> Self {
        Self {
            config,
            role,
            state: SessionState::Idle,
            transport,
            sync,
            sender_id: room::new_sender_id(),
            session_id: None,
            room_code: None,
            next_seq: 1,
            dedup: DedupFilter::new(),
            partner: None,
            peer_armed: false,
            offset_nanos: 0,
            t_start_local: None,
            outcome: None,
            pings_sent: 0,
            burst_cancel: Arc::new(AtomicBool::new(false)),
            events: SessionEvents::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn room_code(&self) -> Option<&str> {
        self.room_code.as_deref()
    }

    pub fn outcome(&self) -> Option<RaceOutcome> {
        self.outcome
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn offset_nanos(&self) -> i64 {
        self.offset_nanos
    }

    /// Role the confirmed partner announced, if paired.
    pub fn partner_role(&self) -> Option<Role> {
        self.partner.as_ref().map(|p| p.role)
    }

    /// Whether the peer has announced itself armed via `ready`.
    pub fn peer_armed(&self) -> bool {
        self.peer_armed
    }

    /// Cancellation flag for the sync burst task; checked by the driver
    /// after each sleep.
    pub fn burst_token(&self) -> Arc<AtomicBool> {
        self.burst_cancel.clone()
    }

    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain()
    }

    // ------------------------------------------------------------------
    // Pairing
    // ------------------------------------------------------------------

    /// Create a room: fresh code and session id, join the channel, announce
    /// our role. Returns the code to share with the peer.
    pub fn create_room(&mut self) -> Result<String, RaceError> {
        if self.state != SessionState::Idle {
            return Err(RaceError::wrong_state("create_room", self.state));
        }
        let code = room::generate_room_code();
        let session_id = room::new_session_id();
        self.transport.connect(&room::channel_for(&code))?;
        self.dedup.begin_session(&session_id);
        self.session_id = Some(session_id);
        self.room_code = Some(code.clone());
        self.set_state(SessionState::Pairing);
        self.send(MessageBody::RoleConfirm { role: self.role });
        info!("🏠 Room {} created as {}", code, self.role);
        Ok(code)
    }

    /// Join an existing room by code. The session id is adopted from the
    /// creator's role confirmation.
    pub fn join_room(&mut self, code: &str) -> Result<(), RaceError> {
        if self.state != SessionState::Idle {
            return Err(RaceError::wrong_state("join_room", self.state));
        }
        let code = code.to_uppercase();
        self.transport.connect(&room::channel_for(&code))?;
        self.room_code = Some(code.clone());
        self.set_state(SessionState::Pairing);
        self.send(MessageBody::RoleConfirm { role: self.role });
        info!("🚪 Joined room {} as {}", code, self.role);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync burst
    // ------------------------------------------------------------------

    /// Reset the synchronizer and begin a fresh ping burst. Valid while
    /// syncing (retry) and called internally when pairing completes.
    pub fn start_sync(&mut self) -> Result<(), RaceError> {
        match self.state {
            SessionState::Syncing => {}
            SessionState::Pairing if self.partner.is_some() => {
                self.set_state(SessionState::Syncing);
            }
            s => return Err(RaceError::wrong_state("start_sync", s)),
        }
        self.sync.reset();
        self.pings_sent = 0;
        self.burst_cancel.store(false, Ordering::SeqCst);
        info!("⏱ Sync burst started");
        Ok(())
    }

    /// Send one sync ping. Returns true while the burst should continue;
    /// the driver sleeps the configured interval between calls.
    pub fn sync_tick(&mut self) -> bool {
        if self.state != SessionState::Syncing {
            return false;
        }
        if self.burst_cancel.load(Ordering::SeqCst) {
            return false;
        }
        if self.pings_sent >= self.config.sync.ping_count {
            warn!(
                "Sync burst exhausted after {} pings without readiness",
                self.pings_sent
            );
            return false;
        }
        let t1 = self.sync.now_nanos();
        self.send(MessageBody::SyncPing { t1 });
        self.pings_sent += 1;
        true
    }

    // ------------------------------------------------------------------
    // Arming and crossings
    // ------------------------------------------------------------------

    /// Declare this device armed. Requires a synced, paired session.
    pub fn arm(&mut self) -> Result<(), RaceError> {
        if self.state != SessionState::Ready {
            return Err(RaceError::wrong_state("arm", self.state));
        }
        if self.partner.is_none() {
            return Err(RaceError::PartnerMissing);
        }
        if !self.sync.status().is_ready {
            return Err(RaceError::SyncNotReady);
        }
        self.send(MessageBody::Ready { role: self.role });
        self.set_state(SessionState::Armed);
        Ok(())
    }

    /// Feed a confirmed local gate crossing. On the start device this
    /// broadcasts the start event; on the finish device it computes and
    /// broadcasts the final split.
    pub fn handle_crossing(&mut self, crossing: Crossing) -> Result<Option<RaceOutcome>, RaceError> {
        if self.state == SessionState::Finished {
            // stale trigger after the race; ignored until reset
            return Ok(None);
        }

        match self.role {
            Role::Start => {
                if self.state != SessionState::Armed {
                    warn!(
                        "Start crossing ignored in state {} (need ARMED)",
                        self.state
                    );
                    return Ok(None);
                }
                let t_cross = crossing_to_uptime(&crossing);
                self.send(MessageBody::StartEvent { t_start: t_cross });
                self.set_state(SessionState::Running);
                self.events.publish(SessionEvent::RaceStarted);
                info!("🏁 Start crossing at {} ns (local clock)", t_cross);
                Ok(None)
            }
            Role::Finish => {
                if self.state != SessionState::Running {
                    warn!(
                        "Finish crossing ignored in state {} (no start event yet)",
                        self.state
                    );
                    return Ok(None);
                }
                let t_start = match self.t_start_local {
                    Some(t) => t,
                    None => return Err(RaceError::SyncNotReady),
                };
                let t_finish = crossing_to_uptime(&crossing);
                let split_nanos = compute_split(t_start, t_finish);
                let outcome = RaceOutcome {
                    split_nanos,
                    uncertainty_ms: self.sync.status().uncertainty_ms,
                };
                self.send(MessageBody::FinishResult {
                    split_nanos,
                    uncertainty_ms: outcome.uncertainty_ms,
                });
                self.outcome = Some(outcome);
                self.set_state(SessionState::Finished);
                self.events.publish(SessionEvent::RaceFinished(outcome));
                info!(
                    "🏆 Finish crossing: split {:.2} ms ± {:.2} ms",
                    outcome.split_ms(),
                    outcome.uncertainty_ms
                );
                if outcome.is_implausible() {
                    self.events.publish(SessionEvent::ImplausibleSplit);
                    return Err(RaceError::ImplausibleSplit);
                }
                Ok(Some(outcome))
            }
        }
    }

    // ------------------------------------------------------------------
    // Heartbeats and liveness
    // ------------------------------------------------------------------

    /// Emit one heartbeat; the driver calls this on its own cadence.
    pub fn heartbeat_tick(&mut self) -> bool {
        if self.state == SessionState::Idle {
            return false;
        }
        self.send(MessageBody::Heartbeat {})
    }

    /// Whether the partner has been heard from within the configured
    /// timeout. False when no partner has paired.
    pub fn partner_alive(&self) -> bool {
        match &self.partner {
            Some(partner) => {
                let silence = self.sync.now_nanos() - partner.last_seen_nanos;
                silence <= self.config.session.partner_timeout_ms as i64 * 1_000_000
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Clear race results and return to ready for another run. No-op while
    /// idle.
    pub fn reset(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.t_start_local = None;
        self.outcome = None;
        self.peer_armed = false;
        if self.state != SessionState::Ready {
            self.set_state(SessionState::Ready);
        }
    }

    /// Tear the session down: cancel the burst, leave the channel, reset
    /// sync and dedup state. Idempotent. Disconnecting mid-run surfaces
    /// `Aborted`.
    pub fn disconnect(&mut self) {
        self.burst_cancel.store(true, Ordering::SeqCst);
        if self.state == SessionState::Running {
            warn!("Session aborted mid-run");
            self.events.publish(SessionEvent::Aborted);
        }
        self.transport.disconnect();
        self.sync.reset();
        self.dedup.reset();
        self.session_id = None;
        self.room_code = None;
        self.partner = None;
        self.peer_armed = false;
        self.offset_nanos = 0;
        self.t_start_local = None;
        self.outcome = None;
        self.pings_sent = 0;
        if self.state != SessionState::Idle {
            self.set_state(SessionState::Idle);
        }
    }

    // ------------------------------------------------------------------
    // Incoming messages
    // ------------------------------------------------------------------

    /// Process one raw payload from the transport shim. Malformed payloads,
    /// foreign sessions, and replayed sequence numbers are dropped here.
    pub fn handle_raw(&mut self, payload: &str) {
        let Some(msg) = RaceMessage::decode(payload) else {
            warn!("Dropping undecodable payload ({} bytes)", payload.len());
            return;
        };
        if msg.sender_id == self.sender_id {
            return;
        }

        // The first role confirmation carries the session id the creator
        // generated; a joiner adopts it here. A joiner's own confirmation
        // is sent before it knows the id and arrives with an empty one.
        let is_role_confirm = matches!(msg.body, MessageBody::RoleConfirm { .. });
        if is_role_confirm && self.session_id.is_none() && !msg.session_id.is_empty() {
            self.dedup.begin_session(&msg.session_id);
            self.session_id = Some(msg.session_id.clone());
        }
        let dedup_session = if is_role_confirm && msg.session_id.is_empty() {
            match &self.session_id {
                Some(current) => current.clone(),
                None => return,
            }
        } else {
            msg.session_id.clone()
        };

        if !self.dedup.accept(&dedup_session, &msg.sender_id, msg.seq) {
            return;
        }

        if let Some(partner) = &mut self.partner {
            if partner.sender_id == msg.sender_id {
                partner.last_seen_nanos = self.sync.now_nanos();
            }
        }

        match msg.body {
            MessageBody::RoleConfirm { role } => self.on_role_confirm(&msg.sender_id, role),
            MessageBody::SyncPing { t1 } => self.on_sync_ping(t1),
            MessageBody::SyncPong { t1, t2, t3 } => self.on_sync_pong(t1, t2, t3),
            MessageBody::Ready { role } => {
                self.peer_armed = true;
                self.events.publish(SessionEvent::PeerReady { role });
            }
            MessageBody::StartEvent { t_start } => self.on_start_event(t_start),
            MessageBody::FinishResult {
                split_nanos,
                uncertainty_ms,
            } => self.on_finish_result(split_nanos, uncertainty_ms),
            MessageBody::Heartbeat {} => {}
        }
    }

    fn on_role_confirm(&mut self, sender_id: &str, role: Role) {
        if role == self.role {
            warn!("Peer claims the same role {} as this device", role);
            self.events.publish(SessionEvent::RoleConflict { role });
        }
        let newly_paired = self.partner.is_none();
        if newly_paired {
            self.partner = Some(Partner {
                sender_id: sender_id.to_string(),
                role,
                last_seen_nanos: self.sync.now_nanos(),
            });
            self.events.publish(SessionEvent::PartnerConnected { role });
            info!("🤝 Partner connected as {}", role);
            // re-announce so a peer that joined after our first confirmation
            // still learns our role and the session id
            self.send(MessageBody::RoleConfirm { role: self.role });
            if self.state == SessionState::Pairing {
                let _ = self.start_sync();
            }
        }
    }

    fn on_sync_ping(&mut self, t1: i64) {
        let (t2, t3) = self.sync.handle_ping(t1);
        self.send(MessageBody::SyncPong { t1, t2, t3 });
    }

    fn on_sync_pong(&mut self, t1: i64, t2: i64, t3: i64) {
        let t4 = self.sync.now_nanos();
        self.sync.add_sample(t1, t2, t3, t4);
        let status = self.sync.status();
        self.events.publish(SessionEvent::SyncStatusChanged(status));
        if status.is_ready {
            self.offset_nanos = status.offset_nanos;
            if self.state == SessionState::Syncing {
                self.set_state(SessionState::Ready);
                info!(
                    "✓ Session ready: offset {} ns, quality {}",
                    status.offset_nanos, status.quality
                );
            }
        }
    }

    fn on_start_event(&mut self, t_start_remote: i64) {
        if self.role != Role::Finish {
            return;
        }
        match self.state {
            SessionState::Finished => {
                // late or replayed start after the race already resolved
                info!("Ignoring start event after finish");
            }
            SessionState::Armed | SessionState::Ready => {
                let t_start_local = convert_remote_to_local(t_start_remote, self.offset_nanos);
                self.t_start_local = Some(t_start_local);
                self.set_state(SessionState::Running);
                self.events.publish(SessionEvent::RaceStarted);
                info!(
                    "🏁 Start event received: {} ns remote -> {} ns local",
                    t_start_remote, t_start_local
                );
            }
            s => warn!("Start event ignored in state {}", s),
        }
    }

    fn on_finish_result(&mut self, split_nanos: i64, uncertainty_ms: f64) {
        if self.state == SessionState::Finished {
            return;
        }
        let outcome = RaceOutcome {
            split_nanos,
            uncertainty_ms,
        };
        self.outcome = Some(outcome);
        self.set_state(SessionState::Finished);
        self.events.publish(SessionEvent::RaceFinished(outcome));
        if outcome.is_implausible() {
            self.events.publish(SessionEvent::ImplausibleSplit);
        }
        info!(
            "🏆 Finish result received: {:.2} ms ± {:.2} ms",
            outcome.split_ms(),
            uncertainty_ms
        );
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn send(&mut self, body: MessageBody) -> bool {
        let msg = RaceMessage {
            session_id: self.session_id.clone().unwrap_or_default(),
            sender_id: self.sender_id.clone(),
            seq: self.next_seq,
            body,
        };
        self.next_seq += 1;
        self.transport.send(&msg.encode())
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("Session state: {} -> {}", self.state, state);
            self.state = state;
            self.events.publish(SessionEvent::StateChanged(state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::transport::{LoopbackHub, Transport as _};
    use crate::types::SyncConfig;
    use std::sync::mpsc;

    struct TestDevice {
        session: RaceSession,
        rx: mpsc::Receiver<String>,
    }

    fn device(hub: &LoopbackHub, role: Role, skew_nanos: i64) -> TestDevice {
        let mut endpoint = hub.endpoint();
        let (tx, rx) = mpsc::channel::<String>();
        endpoint.subscribe_messages(Box::new(move |payload| {
            tx.send(payload.to_string()).ok();
        }));
        let sync = ClockSync::new(MonotonicClock::with_skew(skew_nanos), SyncConfig::default());
        let session = RaceSession::new(role, Box::new(endpoint), sync, Config::default());
        TestDevice { session, rx }
    }

    /// Deliver queued messages to both sessions until everything settles.
    fn pump(a: &mut TestDevice, b: &mut TestDevice) {
        loop {
            let mut delivered = false;
            while let Ok(payload) = a.rx.try_recv() {
                a.session.handle_raw(&payload);
                delivered = true;
            }
            while let Ok(payload) = b.rx.try_recv() {
                b.session.handle_raw(&payload);
                delivered = true;
            }
            if !delivered {
                break;
            }
        }
    }

    fn paired() -> (TestDevice, TestDevice) {
        let hub = LoopbackHub::new();
        let mut start = device(&hub, Role::Start, 0);
        let mut finish = device(&hub, Role::Finish, 1_000_000);
        let code = start.session.create_room().unwrap();
        finish.session.join_room(&code).unwrap();
        pump(&mut start, &mut finish);
        (start, finish)
    }

    fn synced() -> (TestDevice, TestDevice) {
        let (mut start, mut finish) = paired();
        for _ in 0..SyncConfig::default().ping_count {
            let more_start = start.session.sync_tick();
            let more_finish = finish.session.sync_tick();
            pump(&mut start, &mut finish);
            if !more_start && !more_finish {
                break;
            }
        }
        assert_eq!(start.session.state(), SessionState::Ready);
        assert_eq!(finish.session.state(), SessionState::Ready);
        (start, finish)
    }

    fn crossing_now(session: &RaceSession) -> Crossing {
        Crossing {
            trigger_pts: 1.0,
            pts_seconds: 1.0,
            uptime_nanos: session.sync.now_nanos(),
        }
    }

    /// Run a full start -> finish race with a real gap between crossings so
    /// the split comfortably exceeds any sync estimation error.
    fn run_race(start: &mut TestDevice, finish: &mut TestDevice) -> RaceOutcome {
        start.session.arm().unwrap();
        finish.session.arm().unwrap();
        pump(start, finish);
        assert!(start.session.peer_armed());
        assert!(finish.session.peer_armed());

        let result = start.session.handle_crossing(crossing_now(&start.session));
        assert!(matches!(result, Ok(None)));
        pump(start, finish);
        assert_eq!(finish.session.state(), SessionState::Running);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let outcome = finish
            .session
            .handle_crossing(crossing_now(&finish.session))
            .unwrap()
            .expect("finish crossing yields the split");
        pump(start, finish);
        outcome
    }

    #[test]
    fn test_pairing_transitions_both_to_syncing() {
        let (start, finish) = paired();
        assert_eq!(start.session.state(), SessionState::Syncing);
        assert_eq!(finish.session.state(), SessionState::Syncing);
        assert!(start.session.partner_alive());
        assert!(finish.session.partner_alive());
        assert_eq!(start.session.partner_role(), Some(Role::Finish));
        assert_eq!(finish.session.partner_role(), Some(Role::Start));
    }

    #[test]
    fn test_room_code_is_normalized() {
        let hub = LoopbackHub::new();
        let mut start = device(&hub, Role::Start, 0);
        let mut finish = device(&hub, Role::Finish, 0);
        let code = start.session.create_room().unwrap();
        finish.session.join_room(&code.to_lowercase()).unwrap();
        pump(&mut start, &mut finish);
        assert_eq!(finish.session.state(), SessionState::Syncing);
    }

    #[test]
    fn test_duplicate_role_confirm_fires_partner_event_once() {
        let hub = LoopbackHub::new();
        let mut start = device(&hub, Role::Start, 0);
        start.session.create_room().unwrap();
        let session_id = start.session.session_id.clone().unwrap();

        let confirm = RaceMessage {
            session_id,
            sender_id: "peer-device".to_string(),
            seq: 1,
            body: MessageBody::RoleConfirm { role: Role::Finish },
        }
        .encode();

        for _ in 0..3 {
            start.session.handle_raw(&confirm);
        }
        let connected = start
            .session
            .poll_events()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::PartnerConnected { .. }))
            .count();
        assert_eq!(connected, 1);
    }

    #[test]
    fn test_role_conflict_is_surfaced() {
        let hub = LoopbackHub::new();
        let mut a = device(&hub, Role::Start, 0);
        let mut b = device(&hub, Role::Start, 0);
        let code = a.session.create_room().unwrap();
        b.session.join_room(&code).unwrap();
        pump(&mut a, &mut b);
        assert!(a
            .session
            .poll_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::RoleConflict { .. })));
    }

    #[test]
    fn test_foreign_session_messages_dropped() {
        let (mut start, _finish) = paired();
        let stray = RaceMessage {
            session_id: "someone-elses-race".to_string(),
            sender_id: "stranger".to_string(),
            seq: 1,
            body: MessageBody::StartEvent { t_start: 42 },
        }
        .encode();
        let state = start.session.state();
        start.session.handle_raw(&stray);
        assert_eq!(start.session.state(), state);
    }

    #[test]
    fn test_sync_burst_reaches_ready() {
        let (start, finish) = synced();
        let status = start.session.sync_status();
        assert!(status.is_ready);
        assert!(status.sample_count >= 10);
        // loopback RTT is microseconds; the skew estimate lands near 1 ms
        let offset = finish.session.offset_nanos();
        assert!(
            (offset + 1_000_000).abs() < 500_000,
            "finish sees start {} ns away",
            offset
        );
    }

    #[test]
    fn test_arm_requires_ready() {
        let (mut start, _finish) = paired();
        assert!(matches!(
            start.session.arm().unwrap_err(),
            RaceError::WrongState { .. }
        ));
    }

    #[test]
    fn test_full_race_produces_matching_outcomes() {
        let (mut start, mut finish) = synced();
        let outcome = run_race(&mut start, &mut finish);

        assert_eq!(finish.session.state(), SessionState::Finished);
        assert_eq!(start.session.state(), SessionState::Finished);
        assert_eq!(start.session.outcome().unwrap(), outcome);
        // ~5 ms of real time passed between the two crossings
        assert!(outcome.split_nanos > 1_000_000);
        assert!(outcome.split_nanos < 1_000_000_000);
    }

    #[test]
    fn test_crossings_ignored_after_finish() {
        let (mut start, mut finish) = synced();
        run_race(&mut start, &mut finish);

        // another trigger on either side changes nothing
        let again = finish
            .session
            .handle_crossing(crossing_now(&finish.session))
            .unwrap();
        assert!(again.is_none());
        let again = start
            .session
            .handle_crossing(crossing_now(&start.session))
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_start_event_after_finish_is_ignored() {
        let (mut start, mut finish) = synced();
        run_race(&mut start, &mut finish);

        let outcome = finish.session.outcome().unwrap();
        let replayed = RaceMessage {
            session_id: finish.session.session_id.clone().unwrap(),
            sender_id: start.session.sender_id().to_string(),
            seq: 10_000,
            body: MessageBody::StartEvent { t_start: 1 },
        }
        .encode();
        finish.session.handle_raw(&replayed);
        assert_eq!(finish.session.state(), SessionState::Finished);
        assert_eq!(finish.session.outcome().unwrap(), outcome);
    }

    #[test]
    fn test_reset_returns_to_ready_for_a_rerun() {
        let (mut start, mut finish) = synced();
        run_race(&mut start, &mut finish);

        finish.session.reset();
        assert_eq!(finish.session.state(), SessionState::Ready);
        assert!(finish.session.outcome().is_none());
        finish.session.reset();
        assert_eq!(finish.session.state(), SessionState::Ready);
    }

    #[test]
    fn test_disconnect_mid_run_surfaces_aborted() {
        let (mut start, mut finish) = synced();
        start.session.arm().unwrap();
        finish.session.arm().unwrap();
        pump(&mut start, &mut finish);
        start
            .session
            .handle_crossing(crossing_now(&start.session))
            .unwrap();
        pump(&mut start, &mut finish);
        assert_eq!(finish.session.state(), SessionState::Running);

        finish.session.disconnect();
        assert_eq!(finish.session.state(), SessionState::Idle);
        assert!(finish
            .session
            .poll_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Aborted)));
        // idempotent
        finish.session.disconnect();
        assert_eq!(finish.session.state(), SessionState::Idle);
    }

    #[test]
    fn test_heartbeat_requires_session() {
        let hub = LoopbackHub::new();
        let mut lone = device(&hub, Role::Start, 0);
        assert!(!lone.session.heartbeat_tick());
        lone.session.create_room().unwrap();
        assert!(lone.session.heartbeat_tick());
    }

    #[test]
    fn test_seq_numbers_increase_per_message() {
        let hub = LoopbackHub::new();
        let mut a = device(&hub, Role::Start, 0);
        let mut b = device(&hub, Role::Finish, 0);
        let code = a.session.create_room().unwrap();
        b.session.join_room(&code).unwrap();
        pump(&mut a, &mut b);

        // the b endpoint receives everything a broadcasts
        let mut last_seq = 0;
        a.session.heartbeat_tick();
        a.session.heartbeat_tick();
        a.session.heartbeat_tick();
        while let Ok(payload) = b.rx.try_recv() {
            let msg = RaceMessage::decode(&payload).unwrap();
            if msg.sender_id == a.session.sender_id() {
                assert!(msg.seq > last_seq);
                last_seq = msg.seq;
            }
            b.session.handle_raw(&payload);
        }
        assert!(last_seq >= 3);
    }
}

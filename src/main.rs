// src/main.rs
//
// Two-device race simulation over the in-process loopback bus. Builds a
// full START and FINISH stack (detector + synchronizer + session), pairs
// them, runs the sync burst, pushes a synthetic subject through both gates,
// and reports the split. The finish device's clock is deliberately skewed
// so the sync layer has real work to do.

use anyhow::Result;
use photofinish::detector::GateDetector;
use photofinish::session::{RaceSession, SessionEvent};
use photofinish::sync::ClockSync;
use photofinish::transport::{LoopbackHub, Transport};
use photofinish::types::{Config, Crossing, LumaFrame, Role, SessionState};
use photofinish::MonotonicClock;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use tracing::{error, info, warn};

const FRAME_W: usize = 320;
const FRAME_H: usize = 240;
const BACKDROP_LUMA: u8 = 120;
/// Simulated skew of the finish device's clock, nanoseconds
const FINISH_CLOCK_SKEW: i64 = 1_500_000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("photofinish=info")
        .init();

    info!("🏁 Photo-Finish Timer Simulation Starting");

    let config = Config::load("config.yaml").unwrap_or_else(|e| {
        warn!("config.yaml not loaded ({}), using defaults", e);
        Config::default()
    });

    let hub = LoopbackHub::new();
    let mut start = Device::new("start", &hub, Role::Start, 0, &config);
    let mut finish = Device::new("finish", &hub, Role::Finish, FINISH_CLOCK_SKEW, &config);

    // ── Pairing ──
    let code = start.session.create_room()?;
    info!("Room code: {}", code);
    finish.session.join_room(&code)?;
    pump(&mut start, &mut finish);
    anyhow::ensure!(
        start.session.state() == SessionState::Syncing,
        "pairing did not reach syncing"
    );

    // ── Sync burst: a cooperative ping loop with a cancellation token ──
    let cancel = start.session.burst_token();
    loop {
        let more_start = start.session.sync_tick();
        let more_finish = finish.session.sync_tick();
        pump(&mut start, &mut finish);
        if !more_start && !more_finish {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(
            config.sync.ping_interval_ms,
        ))
        .await;
        if cancel.load(Ordering::SeqCst) {
            break;
        }
    }
    let status = finish.session.sync_status();
    if !status.is_ready {
        error!("Clock sync failed to converge, aborting");
        return Ok(());
    }
    info!(
        "✓ Clocks synced: offset {} ns, uncertainty {:.3} ms, quality {}",
        finish.session.offset_nanos(),
        status.uncertainty_ms,
        status.quality
    );

    // ── Calibrate and arm both gates ──
    start.calibrate_gate()?;
    finish.calibrate_gate()?;
    start.session.arm()?;
    finish.session.arm()?;
    pump(&mut start, &mut finish);
    start.session.heartbeat_tick();
    finish.session.heartbeat_tick();
    pump(&mut start, &mut finish);

    // ── The race: subject crosses the start gate, then the finish gate ──
    let crossing = start.run_subject_through_gate()?;
    start.session.handle_crossing(crossing)?;
    pump(&mut start, &mut finish);

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let crossing = finish.run_subject_through_gate()?;
    match finish.session.handle_crossing(crossing) {
        Ok(Some(_)) => {}
        Ok(None) => warn!("Finish crossing produced no outcome"),
        Err(e) => error!("Finish crossing failed: {}", e),
    }
    pump(&mut start, &mut finish);

    // ── Results ──
    for device in [&mut start, &mut finish] {
        for event in device.session.poll_events() {
            if let SessionEvent::RaceFinished(outcome) = event {
                info!(
                    "[{}] 🏆 Split: {:.2} ms ± {:.2} ms",
                    device.name,
                    outcome.split_ms(),
                    outcome.uncertainty_ms
                );
            }
        }
        match device.detector.write_composite() {
            Ok(path) => info!("[{}] composite: {}", device.name, path.display()),
            Err(e) => warn!("[{}] no composite written: {}", device.name, e),
        }
    }

    info!("🎉 Simulation complete");
    Ok(())
}

struct Device {
    name: &'static str,
    detector: GateDetector,
    session: RaceSession,
    rx: mpsc::Receiver<String>,
    next_pts: f64,
    frame_interval: f64,
}

impl Device {
    fn new(name: &'static str, hub: &LoopbackHub, role: Role, skew: i64, config: &Config) -> Self {
        let clock = MonotonicClock::with_skew(skew);
        let mut endpoint = hub.endpoint();
        let (tx, rx) = mpsc::channel::<String>();
        // hand transport callbacks off into this device's control queue
        endpoint.subscribe_messages(Box::new(move |payload| {
            tx.send(payload.to_string()).ok();
        }));
        let sync = ClockSync::new(clock.clone(), config.sync.clone());
        let session = RaceSession::new(role, Box::new(endpoint), sync, config.clone());
        let detector = GateDetector::new(config.detector.clone(), clock);
        Self {
            name,
            detector,
            session,
            rx,
            next_pts: 0.0,
            frame_interval: 1.0 / config.detector.reference_fps,
        }
    }

    fn next_frame(&mut self, with_subject: bool) -> LumaFrame {
        let pts = self.next_pts;
        self.next_pts += self.frame_interval;
        let mut frame = LumaFrame::uniform(FRAME_W, FRAME_H, BACKDROP_LUMA, pts);
        if with_subject {
            // dark runner torso covering most of the band at the gate line
            let band_top = (0.30 * FRAME_H as f64) as usize;
            let band_bottom = (0.85 * FRAME_H as f64) as usize;
            let gate = (self.detector.line_x() * FRAME_W as f64) as usize;
            for row in band_top..band_bottom {
                for x in gate.saturating_sub(4)..(gate + 4).min(FRAME_W) {
                    frame.data[row * FRAME_W + x] = 10;
                }
            }
        }
        frame
    }

    fn calibrate_gate(&mut self) -> Result<()> {
        let first = self.next_frame(false);
        self.detector.start_calibration(&first)?;
        loop {
            let frame = self.next_frame(false);
            if self.detector.calibrate(&frame)?.complete {
                break;
            }
        }
        let frame = self.next_frame(false);
        self.detector.arm(&frame)?;
        info!("[{}] gate calibrated and armed", self.name);
        Ok(())
    }

    /// Feed empty frames, then the subject, until the detector confirms the
    /// crossing; keep feeding until the composite window completes.
    fn run_subject_through_gate(&mut self) -> Result<Crossing> {
        for _ in 0..30 {
            let frame = self.next_frame(false);
            self.detector.process(&frame)?;
        }

        let mut crossing = None;
        for _ in 0..10 {
            let frame = self.next_frame(true);
            let report = self.detector.process(&frame)?;
            if let Some(event) = report.crossing {
                crossing = Some(event);
                break;
            }
        }
        let crossing =
            crossing.ok_or_else(|| anyhow::anyhow!("subject did not trigger the gate"))?;

        // post-trigger collection, then let the gate clear
        loop {
            let frame = self.next_frame(true);
            if self.detector.process(&frame)?.composite_ready {
                break;
            }
        }
        for _ in 0..10 {
            let frame = self.next_frame(false);
            self.detector.process(&frame)?;
        }

        info!(
            "[{}] crossing at pts {:.4}s (interpolated {:.4}s)",
            self.name, crossing.pts_seconds, crossing.trigger_pts
        );
        Ok(crossing)
    }
}

/// Drain both control queues until no messages remain in flight.
fn pump(a: &mut Device, b: &mut Device) {
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

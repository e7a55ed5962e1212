// Activity monitor for keep-alive pings

//! Session inference and keep-alive loop
//!
//! The host platform suspends the machine when no requests reach it. While a
//! VPN client is connected there is no HTTP traffic, so this loop pings the
//! public URL on its behalf. Client activity is inferred from WireGuard
//! handshake recency; once every peer has been idle past the threshold (or no
//! peer ever connected) the loop exits for good and lets the machine sleep.

use crate::handshake::{ActivitySample, HandshakeSource};
use crate::keepalive::KeepAlive;
use crate::types::MonitorConfig;
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// What to do at the end of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Keep the machine awake
    Ping,
    /// Exit the loop and allow suspension
    Stop(StopReason),
}

/// Designed termination conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No peer ever completed a handshake
    NeverHandshaken,
    /// All peers idle longer than the threshold
    IdleExceeded { idle: Duration },
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    Stopped(StopReason),
    Cancelled,
}

/// Inferred client session, owned by the monitor loop
#[derive(Debug, Default)]
pub struct SessionTracker {
    connected_since: Option<Instant>,
    last_idle: Option<Duration>,
}

impl SessionTracker {
    pub fn is_connected(&self) -> bool {
        self.connected_since.is_some()
    }

    pub fn connected_since(&self) -> Option<Instant> {
        self.connected_since
    }

    /// Previous tick's idle value
    #[cfg(test)]
    fn last_idle(&self) -> Option<Duration> {
        self.last_idle
    }

    /// Record this tick's idle value.
    /// Returns the previous value if idle went down, i.e. a fresh handshake happened.
    pub fn observe_idle(&mut self, idle: Duration) -> Option<Duration> {
        let previous = self.last_idle.replace(idle);
        previous.filter(|&prev| idle < prev)
    }

    /// Mark connected. Returns true on the disconnected -> connected transition.
    pub fn connect(&mut self, now: Instant) -> bool {
        if self.connected_since.is_some() {
            return false;
        }
        self.connected_since = Some(now);
        true
    }

    /// Mark disconnected. Returns the session length if one was running.
    pub fn disconnect(&mut self, now: Instant) -> Option<Duration> {
        self.connected_since
            .take()
            .map(|since| now.saturating_duration_since(since))
    }

    pub fn session_duration(&self, now: Instant) -> Option<Duration> {
        self.connected_since
            .map(|since| now.saturating_duration_since(since))
    }
}

/// Render a duration as a compact "XdYhZmWs" string
pub fn format_duration(d: Duration) -> String {
    let mut secs = d.as_secs();
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3_600;
    secs %= 3_600;
    let mins = secs / 60;
    secs %= 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}d", days));
    }
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if mins > 0 {
        out.push_str(&format!("{}m", mins));
    }
    if secs > 0 || out.is_empty() {
        out.push_str(&format!("{}s", secs));
    }
    out
}

/// Current wall-clock time for session log lines
fn wall_clock() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn round_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs_f64().round() as u64)
}

/// Background keep-alive loop
pub struct ActivityMonitor<S, K> {
    source: S,
    keepalive: K,
    timing: MonitorConfig,
    tracker: SessionTracker,
}

impl<S: HandshakeSource, K: KeepAlive> ActivityMonitor<S, K> {
    pub fn new(source: S, keepalive: K, timing: MonitorConfig) -> Self {
        Self {
            source,
            keepalive,
            timing,
            tracker: SessionTracker::default(),
        }
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Decide a post-startup tick from a poll result
    pub fn evaluate(&mut self, sample: Result<ActivitySample>, now: Instant) -> TickDecision {
        let max_idle = self.timing.max_idle;

        let idle = match sample {
            Err(e) => {
                // Unknown state keeps the machine awake
                log::warn!(
                    "keepalive: tick, error checking wg status: {:#} (still sending ping)",
                    e
                );
                return TickDecision::Ping;
            }
            Ok(ActivitySample::NeverHandshaken) => {
                match self.tracker.disconnect(now) {
                    Some(session) => log::info!(
                        "keepalive: WireGuard has never seen a handshake; ending session (duration={}) and allowing suspend",
                        format_duration(session)
                    ),
                    None => log::info!(
                        "keepalive: WireGuard has never seen a handshake; stopping keepalive to allow suspend"
                    ),
                }
                return TickDecision::Stop(StopReason::NeverHandshaken);
            }
            Ok(ActivitySample::Idle(idle)) => idle,
        };

        if let Some(previous) = self.tracker.observe_idle(idle) {
            log::info!(
                "keepalive: handshake detected, idle reset from {:?} to {:?}",
                round_secs(previous),
                round_secs(idle)
            );
        }

        if idle > max_idle {
            match self.tracker.disconnect(now) {
                Some(session) => log::info!(
                    "keepalive: tick, status=disconnected, idle={:?} (max {:?}); ending session duration={} and stopping keepalive to allow suspend",
                    round_secs(idle),
                    max_idle,
                    format_duration(session)
                ),
                None => log::info!(
                    "keepalive: tick, status=disconnected, idle={:?} (max {:?}); stopping keepalive to allow suspend",
                    round_secs(idle),
                    max_idle
                ),
            }
            return TickDecision::Stop(StopReason::IdleExceeded { idle });
        }

        if self.tracker.connect(now) {
            log::info!(
                "keepalive: tick, status=connected, idle={:?} (max {:?}); starting session at {}",
                round_secs(idle),
                max_idle,
                wall_clock()
            );
        } else {
            log::info!(
                "keepalive: tick, status=connected, idle={:?} (max {:?}); session_duration={}; sending ping to {}",
                round_secs(idle),
                max_idle,
                format_duration(self.tracker.session_duration(now).unwrap_or_default()),
                self.keepalive.target()
            );
        }
        TickDecision::Ping
    }

    /// Run one tick, `since_start` after the loop began
    pub async fn tick(&mut self, since_start: Duration) -> TickDecision {
        if since_start <= self.timing.startup_window {
            log::info!(
                "keepalive: tick (startup window), sending ping to {}",
                self.keepalive.target()
            );
            return TickDecision::Ping;
        }

        let sample = match timeout(self.timing.ping_timeout, self.source.sample()).await {
            Ok(sample) => sample,
            Err(_) => Err(anyhow::anyhow!(
                "handshake poll timed out after {:?}",
                self.timing.ping_timeout
            )),
        };
        self.evaluate(sample, Instant::now())
    }

    async fn ping(&self) {
        match timeout(self.timing.ping_timeout, self.keepalive.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("keepalive: ping failed: {:#}", e),
            Err(_) => log::warn!(
                "keepalive: ping to {} timed out after {:?}",
                self.keepalive.target(),
                self.timing.ping_timeout
            ),
        }
    }

    /// Loop until a termination condition holds or `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) -> MonitorExit {
        let start = Instant::now();
        log::info!(
            "keepalive: starting loop for {} (interval={:?}, startup={:?}, max_idle={:?})",
            self.keepalive.target(),
            self.timing.tick_interval,
            self.timing.startup_window,
            self.timing.max_idle
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("keepalive: cancelled");
                    return MonitorExit::Cancelled;
                }
                _ = tokio::time::sleep(self.timing.tick_interval) => {}
            }

            match self.tick(start.elapsed()).await {
                TickDecision::Ping => self.ping().await,
                TickDecision::Stop(reason) => return MonitorExit::Stopped(reason),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::HandshakeTable;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Idle(u64),
        Never,
        Fail,
        Hang,
    }

    /// Replays a fixed sequence of polls; runs dry as "never handshaken"
    struct ScriptedSource {
        steps: Mutex<VecDeque<Step>>,
        polls: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(steps: &[Step]) -> (Self, Arc<AtomicUsize>) {
            let polls = Arc::new(AtomicUsize::new(0));
            let source = Self {
                steps: Mutex::new(steps.iter().copied().collect()),
                polls: polls.clone(),
            };
            (source, polls)
        }
    }

    #[async_trait]
    impl HandshakeSource for ScriptedSource {
        async fn latest_handshakes(&self) -> Result<HandshakeTable> {
            unreachable!("sample is overridden")
        }

        async fn sample(&self) -> Result<ActivitySample> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Never);
            match step {
                Step::Idle(secs) => Ok(ActivitySample::Idle(Duration::from_secs(secs))),
                Step::Never => Ok(ActivitySample::NeverHandshaken),
                Step::Fail => anyhow::bail!("wg show failed: Unable to access interface"),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ActivitySample::Idle(Duration::ZERO))
                }
            }
        }
    }

    struct CountingKeepAlive {
        pings: Arc<AtomicUsize>,
        fail: bool,
    }

    impl CountingKeepAlive {
        fn new(fail: bool) -> (Self, Arc<AtomicUsize>) {
            let pings = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    pings: pings.clone(),
                    fail,
                },
                pings,
            )
        }
    }

    #[async_trait]
    impl KeepAlive for CountingKeepAlive {
        async fn ping(&self) -> Result<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(())
        }

        fn target(&self) -> &str {
            "https://myvpn.fly.dev"
        }
    }

    fn timing(startup_secs: u64) -> MonitorConfig {
        MonitorConfig {
            tick_interval: Duration::from_secs(30),
            startup_window: Duration::from_secs(startup_secs),
            max_idle: Duration::from_secs(300),
            ping_timeout: Duration::from_secs(5),
        }
    }

    struct Harness {
        polls: Arc<AtomicUsize>,
        pings: Arc<AtomicUsize>,
        monitor: ActivityMonitor<ScriptedSource, CountingKeepAlive>,
    }

    fn harness(steps: &[Step], startup_secs: u64, failing_pings: bool) -> Harness {
        let (source, polls) = ScriptedSource::new(steps);
        let (keepalive, pings) = CountingKeepAlive::new(failing_pings);
        Harness {
            polls,
            pings,
            monitor: ActivityMonitor::new(source, keepalive, timing(startup_secs)),
        }
    }

    fn idle(secs: u64) -> Result<ActivitySample> {
        Ok(ActivitySample::Idle(Duration::from_secs(secs)))
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
        assert_eq!(format_duration(Duration::from_secs(3_661)), "1h1m1s");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "1d1h");
        assert_eq!(format_duration(Duration::from_millis(999)), "0s");
    }

    #[test]
    fn test_wall_clock_is_rfc3339_utc() {
        let stamp = wall_clock();
        assert!(stamp.ends_with('Z'));
        let parsed = chrono::DateTime::parse_from_rfc3339(&stamp).unwrap();
        assert!((Utc::now() - parsed.with_timezone(&Utc)).num_seconds().abs() < 5);
    }

    #[test]
    fn test_tracker_transitions() {
        let mut tracker = SessionTracker::default();
        let t0 = Instant::now();
        assert!(!tracker.is_connected());

        assert!(tracker.connect(t0));
        assert_eq!(tracker.connected_since(), Some(t0));

        // Staying connected keeps the original start
        assert!(!tracker.connect(t0 + Duration::from_secs(30)));
        assert_eq!(tracker.connected_since(), Some(t0));
        assert_eq!(
            tracker.session_duration(t0 + Duration::from_secs(90)),
            Some(Duration::from_secs(90))
        );

        assert_eq!(
            tracker.disconnect(t0 + Duration::from_secs(120)),
            Some(Duration::from_secs(120))
        );
        assert!(!tracker.is_connected());
        assert_eq!(tracker.disconnect(t0 + Duration::from_secs(150)), None);
    }

    #[test]
    fn test_tracker_idle_reset() {
        let mut tracker = SessionTracker::default();
        assert_eq!(tracker.observe_idle(Duration::from_secs(100)), None);
        assert_eq!(tracker.observe_idle(Duration::from_secs(130)), None);
        assert_eq!(
            tracker.observe_idle(Duration::from_secs(5)),
            Some(Duration::from_secs(130))
        );
        // Equal is not a reset
        assert_eq!(tracker.observe_idle(Duration::from_secs(5)), None);
        assert_eq!(tracker.last_idle(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_evaluate_poll_failure_pings() {
        let mut h = harness(&[], 0, false);
        let decision = h
            .monitor
            .evaluate(Err(anyhow::anyhow!("netlink error")), Instant::now());
        assert_eq!(decision, TickDecision::Ping);
        assert!(!h.monitor.tracker().is_connected());
        assert_eq!(h.monitor.tracker().last_idle(), None);
    }

    #[tokio::test]
    async fn test_evaluate_connect_sets_start_once() {
        let mut h = harness(&[], 0, false);
        let t0 = Instant::now();

        assert_eq!(h.monitor.evaluate(idle(10), t0), TickDecision::Ping);
        assert_eq!(h.monitor.tracker().connected_since(), Some(t0));

        let t1 = t0 + Duration::from_secs(30);
        assert_eq!(h.monitor.evaluate(idle(40), t1), TickDecision::Ping);
        assert_eq!(h.monitor.tracker().connected_since(), Some(t0));
    }

    #[tokio::test]
    async fn test_evaluate_idle_decrease_is_not_termination() {
        let mut h = harness(&[], 0, false);
        let t0 = Instant::now();
        assert_eq!(h.monitor.evaluate(idle(290), t0), TickDecision::Ping);
        assert_eq!(h.monitor.evaluate(idle(3), t0), TickDecision::Ping);
        assert!(h.monitor.tracker().is_connected());
    }

    #[tokio::test]
    async fn test_evaluate_threshold_is_strict() {
        let mut h = harness(&[], 0, false);
        assert_eq!(h.monitor.evaluate(idle(300), Instant::now()), TickDecision::Ping);
        assert_eq!(
            h.monitor.evaluate(idle(301), Instant::now()),
            TickDecision::Stop(StopReason::IdleExceeded {
                idle: Duration::from_secs(301)
            })
        );
        assert!(!h.monitor.tracker().is_connected());
    }

    #[tokio::test]
    async fn test_evaluate_never_ends_session() {
        let mut h = harness(&[], 0, false);
        let t0 = Instant::now();
        h.monitor.evaluate(idle(10), t0);
        assert_eq!(
            h.monitor.evaluate(Ok(ActivitySample::NeverHandshaken), t0),
            TickDecision::Stop(StopReason::NeverHandshaken)
        );
        assert!(!h.monitor.tracker().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_tick_exceeding_threshold() {
        let h = harness(&[Step::Idle(60), Step::Idle(120), Step::Idle(400)], 0, false);
        let exit = h.monitor.run(CancellationToken::new()).await;

        assert_eq!(
            exit,
            MonitorExit::Stopped(StopReason::IdleExceeded {
                idle: Duration::from_secs(400)
            })
        );
        assert_eq!(h.polls.load(Ordering::SeqCst), 3);
        assert_eq!(h.pings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_idle_decrease_keeps_running() {
        let steps = [Step::Idle(200), Step::Idle(10), Step::Idle(50), Step::Idle(400)];
        let h = harness(&steps, 0, false);
        let exit = h.monitor.run(CancellationToken::new()).await;

        assert!(matches!(
            exit,
            MonitorExit::Stopped(StopReason::IdleExceeded { .. })
        ));
        assert_eq!(h.polls.load(Ordering::SeqCst), 4);
        assert_eq!(h.pings.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_never_handshaken_stops_without_ping() {
        let h = harness(&[Step::Never], 0, false);
        let exit = h.monitor.run(CancellationToken::new()).await;

        assert_eq!(exit, MonitorExit::Stopped(StopReason::NeverHandshaken));
        assert_eq!(h.polls.load(Ordering::SeqCst), 1);
        assert_eq!(h.pings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_startup_window_pings_without_polling() {
        // Ticks at 30/60/90s fall inside the 100s window, 120s polls
        let h = harness(&[Step::Never], 100, false);
        let start = Instant::now();
        let exit = h.monitor.run(CancellationToken::new()).await;

        assert_eq!(exit, MonitorExit::Stopped(StopReason::NeverHandshaken));
        assert_eq!(h.pings.load(Ordering::SeqCst), 3);
        assert_eq!(h.polls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_secs(120));
        assert!(start.elapsed() < Duration::from_secs(121));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_poll_failure_still_pings() {
        let h = harness(&[Step::Fail, Step::Fail, Step::Idle(400)], 0, false);
        let exit = h.monitor.run(CancellationToken::new()).await;

        assert!(matches!(exit, MonitorExit::Stopped(StopReason::IdleExceeded { .. })));
        assert_eq!(h.pings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_hung_poll_times_out_and_pings() {
        let h = harness(&[Step::Hang, Step::Never], 0, false);
        let start = Instant::now();
        let exit = h.monitor.run(CancellationToken::new()).await;

        assert_eq!(exit, MonitorExit::Stopped(StopReason::NeverHandshaken));
        assert_eq!(h.pings.load(Ordering::SeqCst), 1);
        // Two ticks plus one poll timeout
        assert!(start.elapsed() >= Duration::from_secs(65));
        assert!(start.elapsed() < Duration::from_secs(66));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ping_failures_do_not_stop() {
        let h = harness(&[Step::Idle(10), Step::Idle(20), Step::Idle(400)], 0, true);
        let exit = h.monitor.run(CancellationToken::new()).await;

        assert!(matches!(exit, MonitorExit::Stopped(StopReason::IdleExceeded { .. })));
        assert_eq!(h.pings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cancelled() {
        let steps = [Step::Idle(10); 10];
        let h = harness(&steps, 0, false);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.monitor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(95)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap(), MonitorExit::Cancelled);
        assert_eq!(h.pings.load(Ordering::SeqCst), 3);
    }
}

use crate::config::PowerConfig;
use crate::events::{lock_or_recover, EventBus, Subscription};
use crate::power::battery::{adjust_for_battery, BatterySource};
use crate::power::mode::{resolve_mode, ModeInputs, PowerMode, SamplingConfig};
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

/// Emitted once per transition that changes the resolved mode
#[derive(Debug, Clone, PartialEq)]
pub enum PowerEvent {
    ModeChanged {
        old_mode: PowerMode,
        new_mode: PowerMode,
        config: SamplingConfig,
    },
}

struct ControllerState {
    mode: PowerMode,
    visible: bool,
    focused: bool,
    last_activity: Instant,
    /// Deferred re-check so an idle session goes inactive without further events
    inactivity_check: Option<JoinHandle<()>>,
}

struct ControllerInner {
    config: PowerConfig,
    state: Mutex<ControllerState>,
    events: EventBus<PowerEvent>,
    battery: Arc<dyn BatterySource>,
}

/// Tracks visibility, focus and user activity and maintains the power mode
/// and the GPS sampling configuration it implies.
///
/// # State machine
/// - `Foreground` (initial), `Background`, `Inactive`
/// - Re-evaluated after every input with `resolve_mode`; only changes of
///   the resolved mode emit `PowerEvent::ModeChanged`
/// - Every activity event resets the idle clock and re-arms a single
///   deferred check at `now + inactivity_timeout`
///
/// Cheap to clone; all clones share one controller.
#[derive(Clone)]
pub struct PowerModeController {
    inner: Arc<ControllerInner>,
}

impl PowerModeController {
    /// Create a controller in `Foreground` mode.
    ///
    /// When called inside a tokio runtime the first inactivity check is armed
    /// immediately; otherwise it is armed on the first activity event.
    pub fn new(config: PowerConfig, battery: Arc<dyn BatterySource>) -> Self {
        let controller = PowerModeController {
            inner: Arc::new(ControllerInner {
                config,
                state: Mutex::new(ControllerState {
                    mode: PowerMode::Foreground,
                    visible: true,
                    focused: true,
                    last_activity: Instant::now(),
                    inactivity_check: None,
                }),
                events: EventBus::new("power"),
                battery,
            }),
        };
        controller.arm_inactivity_check();
        controller
    }

    pub fn current_mode(&self) -> PowerMode {
        lock_or_recover(&self.inner.state).mode
    }

    /// Base sampling config for the current mode
    pub fn current_config(&self) -> SamplingConfig {
        self.inner.config.sampling_for(self.current_mode())
    }

    pub fn inputs(&self) -> ModeInputs {
        let state = lock_or_recover(&self.inner.state);
        ModeInputs {
            visible: state.visible,
            focused: state.focused,
            last_activity_age: state.last_activity.elapsed(),
        }
    }

    /// Register a mode-change listener, invoked synchronously on each transition
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PowerEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    /// Current config widened for battery level.
    ///
    /// Never fails: an unavailable or unreadable battery yields the base config.
    pub async fn adaptive_config(&self) -> SamplingConfig {
        let base = self.current_config();
        match self.inner.battery.read().await {
            Ok(status) => adjust_for_battery(base, status, &self.inner.config.battery),
            Err(e) => {
                log::debug!("[power] battery read failed, using base config: {}", e);
                base
            }
        }
    }

    /// Document visibility changed
    pub fn set_visibility(&self, visible: bool) {
        lock_or_recover(&self.inner.state).visible = visible;
        self.inner.evaluate();
    }

    /// Window focus changed. Gaining focus counts as user activity.
    pub fn set_focus(&self, focused: bool) {
        lock_or_recover(&self.inner.state).focused = focused;
        if focused {
            self.record_activity();
        } else {
            self.inner.evaluate();
        }
    }

    /// Pointer, key, scroll or touch input
    pub fn record_activity(&self) {
        lock_or_recover(&self.inner.state).last_activity = Instant::now();
        self.arm_inactivity_check();
        self.inner.evaluate();
    }

    /// Cancel the deferred inactivity check
    pub fn shutdown(&self) {
        if let Some(handle) = lock_or_recover(&self.inner.state).inactivity_check.take() {
            handle.abort();
        }
    }

    fn arm_inactivity_check(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("[power] no runtime, inactivity check not armed");
            return;
        };

        let mut state = lock_or_recover(&self.inner.state);
        if let Some(previous) = state.inactivity_check.take() {
            previous.abort();
        }

        // Strictly past the timeout, since the rule compares with `>`
        let deadline = state.last_activity
            + self.inner.config.inactivity_timeout()
            + Duration::from_millis(1);
        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);

        state.inactivity_check = Some(runtime.spawn(async move {
            sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.evaluate();
            }
        }));
    }
}

impl ControllerInner {
    /// Apply the transition rule; emit only when the resolved mode changes.
    fn evaluate(&self) {
        let transition = {
            let mut state = lock_or_recover(&self.state);
            let inputs = ModeInputs {
                visible: state.visible,
                focused: state.focused,
                last_activity_age: state.last_activity.elapsed(),
            };
            let new_mode = resolve_mode(&inputs, self.config.inactivity_timeout());
            if new_mode == state.mode {
                None
            } else {
                let old_mode = state.mode;
                state.mode = new_mode;
                Some((old_mode, new_mode))
            }
        };

        if let Some((old_mode, new_mode)) = transition {
            let config = self.config.sampling_for(new_mode);
            log::info!(
                "[power] {} -> {} (interval {} ms, high accuracy {})",
                old_mode,
                new_mode,
                config.interval_ms,
                config.high_accuracy
            );
            self.events.emit(&PowerEvent::ModeChanged {
                old_mode,
                new_mode,
                config,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatteryError;
    use crate::power::battery::{BatteryStatus, FixedBattery, NoBattery};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct BrokenBattery;

    #[async_trait]
    impl BatterySource for BrokenBattery {
        async fn read(&self) -> Result<Option<BatteryStatus>, BatteryError> {
            Err(BatteryError::Io("permission denied".to_string()))
        }
    }

    fn controller() -> PowerModeController {
        PowerModeController::new(PowerConfig::default(), Arc::new(NoBattery))
    }

    fn recorder(controller: &PowerModeController) -> Arc<Mutex<Vec<PowerEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        controller.add_listener(move |e| sink.lock().unwrap().push(e.clone()));
        events
    }

    fn modes(events: &Arc<Mutex<Vec<PowerEvent>>>) -> Vec<(PowerMode, PowerMode)> {
        events
            .lock()
            .unwrap()
            .iter()
            .map(|PowerEvent::ModeChanged { old_mode, new_mode, .. }| (*old_mode, *new_mode))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state() {
        let controller = controller();
        assert_eq!(controller.current_mode(), PowerMode::Foreground);
        assert_eq!(controller.current_config(), PowerConfig::default().foreground);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_flip_round_trip() {
        let controller = controller();
        let original = controller.current_config();
        let events = recorder(&controller);

        controller.set_visibility(false);
        sleep(Duration::from_millis(500)).await;
        controller.set_visibility(true);

        assert_eq!(
            modes(&events),
            vec![
                (PowerMode::Foreground, PowerMode::Background),
                (PowerMode::Background, PowerMode::Foreground),
            ]
        );
        assert_eq!(controller.current_config(), original);

        match &events.lock().unwrap()[0] {
            PowerEvent::ModeChanged { config, .. } => {
                assert_eq!(*config, PowerConfig::default().background)
            }
        };
    }

    #[tokio::test(start_paused = true)]
    async fn test_inputs_snapshot() {
        let controller = controller();
        controller.set_visibility(false);
        controller.set_focus(false);
        sleep(Duration::from_secs(40)).await;

        let inputs = controller.inputs();
        assert!(!inputs.visible);
        assert!(!inputs.focused);
        assert_eq!(inputs.last_activity_age, Duration::from_secs(40));

        controller.record_activity();
        assert_eq!(controller.inputs().last_activity_age, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_inputs_suppressed() {
        let controller = controller();
        let events = recorder(&controller);

        controller.set_visibility(true);
        controller.record_activity();
        controller.set_focus(false);
        assert!(events.lock().unwrap().is_empty());

        controller.set_visibility(false);
        controller.set_visibility(false);
        controller.record_activity();
        assert_eq!(modes(&events).len(), 1);
        assert_eq!(controller.current_mode(), PowerMode::Background);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_goes_inactive() {
        let controller = controller();
        let events = recorder(&controller);

        sleep(Duration::from_secs(299)).await;
        assert_eq!(controller.current_mode(), PowerMode::Foreground);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(controller.current_mode(), PowerMode::Inactive);
        assert_eq!(modes(&events), vec![(PowerMode::Foreground, PowerMode::Inactive)]);
        assert_eq!(controller.current_config(), PowerConfig::default().inactive);

        controller.record_activity();
        assert_eq!(controller.current_mode(), PowerMode::Foreground);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_rearms_check() {
        let controller = controller();

        sleep(Duration::from_secs(240)).await;
        controller.record_activity();
        sleep(Duration::from_secs(120)).await;
        // 360s since start but only 120s idle
        assert_eq!(controller.current_mode(), PowerMode::Foreground);

        sleep(Duration::from_secs(181)).await;
        assert_eq!(controller.current_mode(), PowerMode::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_idle_stays_background() {
        let controller = controller();
        controller.set_visibility(false);

        sleep(Duration::from_secs(600)).await;
        assert_eq!(controller.current_mode(), PowerMode::Background);

        // Becoming visible after a long idle resolves straight to inactive
        controller.set_visibility(true);
        assert_eq!(controller.current_mode(), PowerMode::Inactive);

        controller.set_focus(true);
        assert_eq!(controller.current_mode(), PowerMode::Foreground);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_listener_does_not_corrupt_state() {
        let controller = controller();
        let calls = Arc::new(AtomicUsize::new(0));

        controller.add_listener(|_| panic!("bad listener"));
        let counter = calls.clone();
        controller.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        controller.set_visibility(false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.current_mode(), PowerMode::Background);

        controller.set_visibility(true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe() {
        let controller = controller();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = controller.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        controller.set_visibility(false);
        sub.unsubscribe();
        sub.unsubscribe();
        controller.set_visibility(true);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_config() {
        let low = PowerModeController::new(
            PowerConfig::default(),
            Arc::new(FixedBattery(BatteryStatus {
                level_percent: 10.0,
                charging: false,
            })),
        );
        let adapted = low.adaptive_config().await;
        let base = low.current_config();
        assert!(!adapted.high_accuracy);
        assert!(adapted.interval_ms > base.interval_ms);
        assert!(adapted.max_age_ms > base.max_age_ms);

        let charging = PowerModeController::new(
            PowerConfig::default(),
            Arc::new(FixedBattery(BatteryStatus {
                level_percent: 10.0,
                charging: true,
            })),
        );
        assert_eq!(charging.adaptive_config().await, charging.current_config());

        let none = controller();
        assert_eq!(none.adaptive_config().await, none.current_config());

        let broken = PowerModeController::new(PowerConfig::default(), Arc::new(BrokenBattery));
        assert_eq!(broken.adaptive_config().await, broken.current_config());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_check() {
        let controller = controller();
        controller.shutdown();

        sleep(Duration::from_secs(600)).await;
        assert_eq!(controller.current_mode(), PowerMode::Foreground);
    }
}

//! Polling supervisor
//!
//! Owns the display controller and the sensor provider and drives them from a
//! single task: discover the device, open it, then refresh the display on a
//! fixed interval. Failures while running send the loop back through full
//! discovery after a backoff. A stop request is only observed between cycles,
//! so a frame is never left half written.

use crate::hardware::{DeviceLocator, LcdController};
use crate::sensors::SensorProvider;
use midas_core::{
    format_readings, is_recoverable, DeviceIdentity, MidasError, ReconnectConfig, Result,
    SerialEndpoint, StaticConfig,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Status text shown while the sensors are being acquired
pub const INITIALIZING_TEXT: &str = "Initializing    Sensors ...";

/// Lifecycle of the polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Discovering the device and acquiring the sensors
    Starting,
    /// Steady read/format/write cycle
    Running,
    /// Stop observed, closing the display and the sensors
    Draining,
    /// Terminal
    Stopped,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Starting => "starting",
            LoopState::Running => "running",
            LoopState::Draining => "draining",
            LoopState::Stopped => "stopped",
        }
    }
}

/// Values the supervisor needs from the configuration
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub identity: DeviceIdentity,
    pub baud_rate: u32,
    pub poll_interval: Duration,
    pub cpu_sensor: String,
    pub gpu_sensor: String,
    pub reconnect: ReconnectConfig,
}

impl SupervisorSettings {
    pub fn from_config(config: &StaticConfig) -> Result<Self> {
        Ok(Self {
            identity: config.device.identity()?,
            baud_rate: config.device.baud_rate,
            poll_interval: config.polling.interval(),
            cpu_sensor: config.polling.cpu_sensor.clone(),
            gpu_sensor: config.polling.gpu_sensor.clone(),
            reconnect: config.reconnect.clone(),
        })
    }
}

pub struct PollingSupervisor {
    settings: SupervisorSettings,
    locator: DeviceLocator,
    lcd: LcdController,
    provider: Box<dyn SensorProvider>,
    provider_open: bool,
    state: watch::Sender<LoopState>,
}

impl PollingSupervisor {
    pub fn new(
        settings: SupervisorSettings,
        locator: DeviceLocator,
        lcd: LcdController,
        provider: Box<dyn SensorProvider>,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Starting);
        Self {
            settings,
            locator,
            lcd,
            provider,
            provider_open: false,
            state,
        }
    }

    /// Watch the loop state
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Run the loop on its own task
    pub fn spawn(self) -> SupervisorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = self.subscribe();
        let task = tokio::spawn(self.run(stop_rx));

        SupervisorHandle {
            stop: stop_tx,
            state,
            task,
        }
    }

    /// Drive the loop until `stop` turns true or its sender is dropped
    ///
    /// A failure of the very first start is returned without retrying. Later
    /// failures are retried according to the reconnect policy.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<()> {
        if let Err(e) = self.start().await {
            error!("Startup failed: {}", e);
            self.shut_down().await;
            return Err(e);
        }

        let result = loop {
            self.set_state(LoopState::Running);

            let Err(e) = self.poll_until_stopped(&mut stop).await else {
                break Ok(());
            };

            if !self.settings.reconnect.enabled || !is_recoverable(&e) {
                error!("Polling loop failed: {}", e);
                break Err(e);
            }

            warn!("Polling loop failed, restarting: {}", e);
            self.release().await;

            match self.reconnect(&mut stop).await {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.shut_down().await;
        result
    }

    /// Discover the device, open it and acquire the sensors
    async fn start(&mut self) -> Result<()> {
        self.set_state(LoopState::Starting);

        let result = self.acquire().await;
        if result.is_err() {
            self.release().await;
        }
        result
    }

    async fn acquire(&mut self) -> Result<()> {
        let port_name = self.locator.locate(&self.settings.identity)?;
        let endpoint = SerialEndpoint::new(port_name, self.settings.baud_rate);

        self.lcd.open(&endpoint).await?;
        self.lcd.write_text(INITIALIZING_TEXT).await?;
        self.provider.open().await?;
        self.provider_open = true;
        self.lcd.clear().await?;

        info!("Displaying temperatures on {}", endpoint);
        Ok(())
    }

    async fn poll_until_stopped(&mut self, stop: &mut watch::Receiver<bool>) -> Result<()> {
        loop {
            if stop_requested(stop) {
                return Ok(());
            }

            self.refresh().await?;

            if wait_for_stop(stop, self.settings.poll_interval).await {
                return Ok(());
            }
        }
    }

    /// One read/format/write cycle
    async fn refresh(&mut self) -> Result<()> {
        self.provider.update().await?;

        let cpu = self.provider.reading(&self.settings.cpu_sensor);
        let gpu = self.provider.reading(&self.settings.gpu_sensor);
        if cpu.is_none() {
            debug!("No reading for '{}'", self.settings.cpu_sensor);
        }
        if gpu.is_none() {
            debug!("No reading for '{}'", self.settings.gpu_sensor);
        }

        let [line1, line2] = format_readings(cpu.as_ref(), gpu.as_ref());
        debug!("Display: [{}] [{}]", line1, line2);
        self.lcd.write_text(&format!("{}{}", line1, line2)).await
    }

    /// Retry [`Self::start`] until it succeeds
    ///
    /// Returns `Ok(false)` when a stop arrives during the backoff.
    async fn reconnect(&mut self, stop: &mut watch::Receiver<bool>) -> Result<bool> {
        let policy = self.settings.reconnect.clone();
        let mut delay = policy.initial_delay();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.set_state(LoopState::Starting);

            info!(
                "Reconnection attempt {}/{} in {:?}",
                attempt,
                if policy.max_attempts == 0 {
                    "unlimited".to_string()
                } else {
                    policy.max_attempts.to_string()
                },
                delay
            );

            if wait_for_stop(stop, delay).await {
                return Ok(false);
            }

            let e = match self.start().await {
                Ok(()) => {
                    info!("Reconnected after {} attempt(s)", attempt);
                    return Ok(true);
                }
                Err(e) => e,
            };

            if !is_recoverable(&e) {
                return Err(e);
            }
            warn!("Reconnection attempt {} failed: {}", attempt, e);

            if policy.max_attempts > 0 && attempt >= policy.max_attempts {
                error!("Reconnection failed after {} attempts, giving up", attempt);
                return Err(MidasError::ReconnectionFailed {
                    attempts: attempt,
                    reason: e.to_string(),
                });
            }

            delay = policy.next_delay(delay);
        }
    }

    /// Drop the connection and the sensors without the farewell
    async fn release(&mut self) {
        self.lcd.disconnect().await;
        self.close_provider().await;
    }

    async fn close_provider(&mut self) {
        if !self.provider_open {
            return;
        }
        self.provider_open = false;
        if let Err(e) = self.provider.close().await {
            warn!("Failed to close sensor provider: {}", e);
        }
    }

    async fn shut_down(&mut self) {
        self.set_state(LoopState::Draining);

        self.lcd.close().await;
        self.close_provider().await;

        self.set_state(LoopState::Stopped);
        info!("Polling loop stopped");
    }

    fn set_state(&self, state: LoopState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Loop state: {} -> {}", previous.as_str(), state.as_str());
        }
    }
}

/// Control side of a spawned [`PollingSupervisor`]
pub struct SupervisorHandle {
    stop: watch::Sender<bool>,
    state: watch::Receiver<LoopState>,
    task: JoinHandle<Result<()>>,
}

impl SupervisorHandle {
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Request a stop and wait for the loop to reach Stopped
    ///
    /// Returns the loop's own error if it had already failed.
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(MidasError::Other(format!("Polling task failed: {}", e))),
        }
    }
}

fn stop_requested(stop: &mut watch::Receiver<bool>) -> bool {
    *stop.borrow_and_update()
}

/// Sleep for `delay` unless a stop arrives first
///
/// Returns `true` on stop. A dropped sender counts as a stop.
async fn wait_for_stop(stop: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    // An unrepresentable deadline means waiting for the stop alone
    let deadline = Instant::now().checked_add(delay);

    loop {
        if stop_requested(stop) {
            return true;
        }

        tokio::select! {
            _ = sleep_until_deadline(deadline) => return false,
            changed = stop.changed() => {
                if changed.is_err() {
                    return true;
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use midas_core::SensorReading;
    use midas_hardware::lcd_controller::{FAREWELL, GREETING};
    use midas_hardware::mock::{device_node, MockConnector, MockDatabase};
    use midas_hardware::Command;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    const SETTLE: Duration = Duration::from_millis(100);

    /// Counters shared between a test and its [`ScriptedProvider`]
    #[derive(Debug, Default)]
    struct ProviderStats {
        opens: AtomicUsize,
        closes: AtomicUsize,
        updates: AtomicUsize,
        /// Update call (1-based) that fails, 0 for never
        fail_update: AtomicUsize,
    }

    struct ScriptedProvider {
        stats: Arc<ProviderStats>,
    }

    #[async_trait]
    impl SensorProvider for ScriptedProvider {
        async fn open(&mut self) -> Result<()> {
            self.stats.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update(&mut self) -> Result<()> {
            let call = self.stats.updates.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.stats.fail_update.load(Ordering::SeqCst) {
                return Err(MidasError::Provider("sensor went away".to_string()));
            }
            Ok(())
        }

        fn reading(&self, label: &str) -> Option<SensorReading> {
            match label {
                "CPU Package" => Some(SensorReading::new(label, 45.3, 78.0)),
                "GPU Core" => Some(SensorReading::new(label, 50.0, 82.5)),
                _ => None,
            }
        }
    }

    struct Rig {
        connector: MockConnector,
        database: MockDatabase,
        stats: Arc<ProviderStats>,
        identity: DeviceIdentity,
    }

    fn settings(reconnect: ReconnectConfig) -> SupervisorSettings {
        SupervisorSettings {
            identity: DeviceIdentity::from_ids(0x04D8, 0xF9C3),
            baud_rate: 9600,
            poll_interval: Duration::from_secs(5),
            cpu_sensor: "CPU Package".to_string(),
            gpu_sensor: "GPU Core".to_string(),
            reconnect,
        }
    }

    fn rig_with(reconnect: ReconnectConfig, ports: &[&str]) -> (Rig, PollingSupervisor) {
        let settings = settings(reconnect);
        let identity = settings.identity.clone();

        let tree = ports.iter().map(|p| device_node(&identity, p)).collect();
        let database = MockDatabase::new(tree);
        let connector = MockConnector::new(ports.iter().copied());
        let stats = Arc::new(ProviderStats::default());

        let locator = DeviceLocator::new(Box::new(database.clone()), Arc::new(connector.clone()));
        let lcd = LcdController::new(Arc::new(connector.clone()), SETTLE);
        let provider = Box::new(ScriptedProvider {
            stats: Arc::clone(&stats),
        });

        let supervisor = PollingSupervisor::new(settings, locator, lcd, provider);
        let rig = Rig {
            connector,
            database,
            stats,
            identity,
        };
        (rig, supervisor)
    }

    fn rig() -> (Rig, PollingSupervisor) {
        rig_with(ReconnectConfig::default(), &["COM5"])
    }

    fn cmd(command: Command) -> Vec<u8> {
        command.bytes().to_vec()
    }

    fn text(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    fn refresh_frames() -> Vec<Vec<u8>> {
        vec![
            cmd(Command::Home),
            text("CPU 45.3C 78.0C "),
            cmd(Command::NextLine),
            text("GPU 50.0C 82.5C "),
        ]
    }

    #[test]
    fn test_loop_state_as_str() {
        assert_eq!(LoopState::Starting.as_str(), "starting");
        assert_eq!(LoopState::Running.as_str(), "running");
        assert_eq!(LoopState::Draining.as_str(), "draining");
        assert_eq!(LoopState::Stopped.as_str(), "stopped");
    }

    #[test]
    fn test_settings_from_config() {
        let config = StaticConfig::default();
        let settings = SupervisorSettings::from_config(&config).unwrap();
        assert_eq!(settings.identity.to_string(), "VID:04D8 PID:F9C3");
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.cpu_sensor, "CPU Package");
        assert_eq!(settings.gpu_sensor, "GPU Core");
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_sequence_and_first_refresh() {
        let (rig, supervisor) = rig();
        let handle = supervisor.spawn();

        sleep(Duration::from_millis(1600)).await;
        assert_eq!(handle.state(), LoopState::Running);

        let mut expected = vec![
            cmd(Command::Clear),
            cmd(Command::Home),
            cmd(Command::Enable2x16),
            cmd(Command::Home),
            text(GREETING),
            cmd(Command::Home),
            text("Initializing    "),
            cmd(Command::NextLine),
            text("Sensors ..."),
            cmd(Command::Clear),
            cmd(Command::Home),
        ];
        expected.extend(refresh_frames());
        assert_eq!(rig.connector.frames(), expected);
        assert_eq!(rig.stats.opens.load(Ordering::SeqCst), 1);
        assert_eq!(rig.stats.updates.load(Ordering::SeqCst), 1);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_on_interval() {
        let (rig, supervisor) = rig();
        let handle = supervisor.spawn();

        // Startup ends at 1.1 s, refreshes start at 1.1 s, 6.5 s and 11.9 s
        sleep(Duration::from_millis(12_500)).await;
        assert_eq!(rig.stats.updates.load(Ordering::SeqCst), 3);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_rediscovers_device() {
        let (rig, supervisor) = rig();
        let handle = supervisor.spawn();

        sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.state(), LoopState::Running);
        assert_eq!(rig.database.enumeration_count(), 1);

        // Replug on another port; the second write of the next cycle fails
        rig.connector.fail_write_after(1);
        rig.connector.set_ports(["COM7"]);
        rig.database.set_tree(vec![device_node(&rig.identity, "COM7")]);

        // Failure at 6.6 s, 2 s backoff, restart takes 1.1 s
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(handle.state(), LoopState::Starting);

        sleep(Duration::from_millis(3_000)).await;
        assert_eq!(handle.state(), LoopState::Running);
        assert_eq!(rig.database.enumeration_count(), 2);

        let ports: Vec<String> = rig
            .connector
            .opened()
            .into_iter()
            .map(|e| e.port_name)
            .collect();
        assert_eq!(ports, vec!["COM5".to_string(), "COM7".to_string()]);
        assert_eq!(rig.stats.opens.load(Ordering::SeqCst), 2);
        assert_eq!(rig.stats.closes.load(Ordering::SeqCst), 1);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_failure_restarts_loop() {
        let (rig, supervisor) = rig();
        rig.stats.fail_update.store(2, Ordering::SeqCst);
        let handle = supervisor.spawn();

        // Second update at 6.5 s fails before anything is written
        sleep(Duration::from_millis(7_000)).await;
        assert_eq!(handle.state(), LoopState::Starting);
        assert_eq!(rig.connector.close_count(), 1);

        sleep(Duration::from_millis(3_000)).await;
        assert_eq!(handle.state(), LoopState::Running);
        assert_eq!(rig.stats.opens.load(Ordering::SeqCst), 2);
        assert_eq!(rig.connector.opened().len(), 2);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_device_on_first_start_is_fatal() {
        let (rig, supervisor) = rig_with(ReconnectConfig::default(), &[]);
        let mut state = supervisor.subscribe();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result = supervisor.run(stop_rx).await;

        assert!(matches!(result, Err(MidasError::DeviceNotFound { .. })));
        assert_eq!(*state.borrow_and_update(), LoopState::Stopped);
        assert_eq!(rig.stats.updates.load(Ordering::SeqCst), 0);
        assert!(rig.connector.frames().is_empty());
        assert!(rig.connector.opened().is_empty());
        assert_eq!(rig.stats.opens.load(Ordering::SeqCst), 0);
        assert_eq!(rig.stats.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_on_first_start_is_fatal() {
        let (rig, supervisor) = rig();
        rig.connector.fail_next_opens(1);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result = supervisor.run(stop_rx).await;

        assert!(matches!(result, Err(MidasError::Connection(_))));
        assert_eq!(rig.stats.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_cycle_finishes_write_then_says_goodbye() {
        let (rig, supervisor) = rig();
        let handle = supervisor.spawn();

        // First refresh runs from 1.1 s to 1.5 s
        sleep(Duration::from_millis(1_250)).await;
        handle.stop().await.unwrap();

        let frames = rig.connector.frames();
        assert_eq!(frames.len(), 19);

        let mut tail = refresh_frames();
        tail.extend([
            cmd(Command::Clear),
            cmd(Command::Home),
            cmd(Command::Home),
            text(FAREWELL),
        ]);
        assert_eq!(frames[11..].to_vec(), tail);
        assert_eq!(rig.stats.closes.load(Ordering::SeqCst), 1);
        assert_eq!(rig.connector.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reaches_stopped_state() {
        let (_rig, supervisor) = rig();
        let mut state = supervisor.subscribe();
        let handle = supervisor.spawn();

        sleep(Duration::from_secs(3)).await;
        handle.stop().await.unwrap();

        assert_eq!(*state.borrow_and_update(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff() {
        let (rig, supervisor) = rig();
        let handle = supervisor.spawn();

        sleep(Duration::from_secs(2)).await;
        rig.connector.fail_write_after(0);

        // Failure at 6.5 s, stop while waiting to reconnect
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(handle.state(), LoopState::Starting);
        handle.stop().await.unwrap();

        assert_eq!(rig.database.enumeration_count(), 1);
        assert_eq!(rig.connector.opened().len(), 1);
        assert_eq!(rig.stats.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let reconnect = ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::default()
        };
        let (rig, supervisor) = rig_with(reconnect, &["COM5"]);
        let handle = supervisor.spawn();

        sleep(Duration::from_secs(2)).await;
        rig.connector.fail_write_after(0);
        rig.connector.set_ports(Vec::<String>::new());
        rig.database.set_tree(Vec::new());

        // Failure at 6.5 s, attempts at 8.5 s and 10.5 s
        sleep(Duration::from_secs(9)).await;
        assert_eq!(handle.state(), LoopState::Stopped);

        match handle.stop().await {
            Err(MidasError::ReconnectionFailed { attempts, reason }) => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("Device not found"), "reason: {}", reason);
                assert!(reason.contains("VID:04D8 PID:F9C3"), "reason: {}", reason);
            }
            other => panic!("Expected ReconnectionFailed, got {:?}", other),
        }
        assert_eq!(rig.stats.closes.load(Ordering::SeqCst), 1);
        assert_eq!(rig.database.enumeration_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_disabled_stops_on_failure() {
        let reconnect = ReconnectConfig {
            enabled: false,
            ..ReconnectConfig::default()
        };
        let (rig, supervisor) = rig_with(reconnect, &["COM5"]);
        let handle = supervisor.spawn();

        sleep(Duration::from_secs(2)).await;
        rig.connector.fail_write_after(0);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.state(), LoopState::Stopped);
        assert!(matches!(
            handle.stop().await,
            Err(MidasError::Connection(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_delay_waits_for_stop() {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let waiter =
            tokio::spawn(async move { wait_for_stop(&mut stop_rx, Duration::MAX).await });

        sleep(Duration::from_secs(3600)).await;
        assert!(!waiter.is_finished());

        stop_tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stop_sender_stops_loop() {
        let (_rig, supervisor) = rig();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(supervisor.run(stop_rx));

        sleep(Duration::from_secs(2)).await;
        drop(stop_tx);

        assert!(task.await.unwrap().is_ok());
    }
}

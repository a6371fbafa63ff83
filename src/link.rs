use crate::config::LinkConfig;
use crate::error::{LinkError, Result, TransportError};
use crate::protocol::{encode_with_delay, Command};
use crate::safety::{SafetyMonitor, SafetyThresholds, StopReason, SuppressionFlags};
use crate::telemetry::{self, Battery, Telemetry, TelemetryState};
use crate::transport::{self, DisconnectedWriter, LineReader, LineWriter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_BUFFER_SIZE: usize = 256;

/// Process-wide link state shared by the operator thread and the receive loop.
#[derive(Debug)]
pub struct LinkState {
    enabled: AtomicBool,
    controls_enabled: AtomicBool,
    suppression: SuppressionFlags,
    firmware_version: Mutex<Option<String>>,
}

impl LinkState {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            controls_enabled: AtomicBool::new(true),
            suppression: SuppressionFlags::new(),
            firmware_version: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Ask the receive loop to finish. It notices after its current line.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Whether the robot currently allows actuation commands from the remote.
    pub fn controls_enabled(&self) -> bool {
        self.controls_enabled.load(Ordering::Acquire)
    }

    fn set_controls_enabled(&self, enabled: bool) {
        self.controls_enabled.store(enabled, Ordering::Release);
    }

    pub fn suppression(&self) -> &SuppressionFlags {
        &self.suppression
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.firmware_version.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_firmware_version(&self, version: impl Into<String>) {
        *self.firmware_version.lock().unwrap_or_else(PoisonError::into_inner) = Some(version.into());
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Notifications for whatever draws the operator's screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkEvent {
    Telemetry(Telemetry),
    /// The motor-stop pair was sent because of a threshold breach.
    SafetyStop(StopReason),
    BatteryWarning { battery: Battery, volts: f32 },
    MotorOverheat { left_c: f32, right_c: f32 },
    ControlsEnabled(bool),
    ReceiverStopped { reason: String },
}

#[derive(Debug)]
pub enum ReceiverExit {
    /// The enabled flag was cleared.
    Disabled,
    TransportFailed(TransportError),
}

struct LinkInner {
    config: LinkConfig,
    state: Arc<LinkState>,
    safety: SafetyMonitor,
    writer: Mutex<Box<dyn LineWriter>>,
    telemetry: Mutex<TelemetryState>,
    events: broadcast::Sender<LinkEvent>,
}

/// The link protocol engine: encodes outbound commands and runs the
/// telemetry receive loop on its own thread.
pub struct CommandLink {
    inner: Arc<LinkInner>,
    receiver: Mutex<Option<JoinHandle<ReceiverExit>>>,
}

impl CommandLink {
    pub fn new(config: LinkConfig, writer: impl LineWriter + 'static) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        let safety = SafetyMonitor::new(SafetyThresholds::from(&config));

        Self {
            inner: Arc::new(LinkInner {
                config,
                state: Arc::new(LinkState::new()),
                safety,
                writer: Mutex::new(Box::new(writer)),
                telemetry: Mutex::new(TelemetryState::new()),
                events,
            }),
            receiver: Mutex::new(None),
        }
    }

    /// Open the configured serial port and start the receive loop.
    pub fn connect(config: LinkConfig) -> Result<Self> {
        config.validate()?;
        let (writer, reader) = transport::open_serial(&config.port, config.baud, config.read_timeout())?;
        let link = Self::new(config, writer);
        link.start_receiver(reader)?;
        Ok(link)
    }

    /// Like [`connect`](Self::connect), but an unopenable port leaves the link
    /// running without a radio instead of failing. The open error is returned
    /// alongside so it can be shown to the operator once.
    pub fn connect_or_degraded(config: LinkConfig) -> (Self, Option<LinkError>) {
        match Self::connect(config.clone()) {
            Ok(link) => (link, None),
            Err(e) => {
                warn!("running without a radio link: {}", e);
                (Self::new(config, DisconnectedWriter), Some(e))
            }
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    pub fn state(&self) -> &Arc<LinkState> {
        &self.inner.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    pub fn telemetry(&self) -> TelemetryState {
        self.inner.telemetry_state().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.writer().is_connected()
    }

    pub fn send(&self, command: &Command) -> Result<()> {
        self.inner.send(command)
    }

    /// Send, then hold the calling thread for `delay` so the robot's
    /// microcontroller can keep up.
    pub fn send_paced(&self, command: &Command, delay: Duration) -> Result<()> {
        self.inner.send_paced(command, delay)
    }

    /// Send each command with the configured inter-command delay.
    pub fn send_all(&self, commands: &[Command]) -> Result<()> {
        let delay = self.inner.config.command_delay();
        for command in commands {
            self.inner.send_paced(command, delay)?;
        }
        Ok(())
    }

    /// Send an actuation command, unless the robot has disabled the controls.
    /// Administrative `no-pass.` commands are never held back.
    pub fn send_control(&self, command: &Command) -> Result<()> {
        if !command.is_administrative() && !self.inner.state.controls_enabled() {
            return Err(LinkError::ControlsDisabled(command.encode()));
        }
        self.send_paced(command, self.inner.config.command_delay())
    }

    pub fn motor_stop(&self) -> Result<()> {
        self.inner.motor_stop()
    }

    /// Operator chose "ignore" on the low-battery warning.
    pub fn suppress_battery_warnings(&self) {
        info!("battery warnings suppressed for this session");
        self.inner.state.suppression().suppress_battery();
    }

    /// Operator chose "ignore" on the motor temperature warning.
    pub fn suppress_temperature_warnings(&self) {
        info!("motor temperature warnings suppressed for this session");
        self.inner.state.suppression().suppress_temperature();
    }

    /// Decode and dispatch one inbound line on the calling thread.
    ///
    /// Returns the decoded sentence, or `None` when it was dropped.
    pub fn handle_line(&self, line: &str) -> Option<Telemetry> {
        self.inner.dispatch(line)
    }

    /// Run the receive loop over `reader` on a dedicated thread.
    pub fn start_receiver(&self, reader: impl LineReader + 'static) -> Result<()> {
        let mut slot = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(LinkError::ReceiverRunning);
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("kevinbot-rx".into())
            .spawn(move || run_receiver(&inner, reader))
            .map_err(LinkError::Spawn)?;
        *slot = Some(handle);
        Ok(())
    }

    pub fn receiver_running(&self) -> bool {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the receive loop and close the connection. Only the first call
    /// does anything; it returns how the receive loop ended, if one ran.
    pub fn shutdown(&self) -> Option<ReceiverExit> {
        if !self.inner.state.is_enabled() && !self.receiver_running() && !self.is_connected() {
            return None;
        }

        info!("shutting down command link");
        self.inner.state.disable();
        self.inner.writer().close();

        let handle = self.receiver.lock().unwrap_or_else(PoisonError::into_inner).take()?;
        match handle.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                error!("receive loop panicked");
                None
            }
        }
    }
}

impl Drop for CommandLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl LinkInner {
    fn writer(&self) -> MutexGuard<'_, Box<dyn LineWriter>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn telemetry_state(&self) -> MutexGuard<'_, TelemetryState> {
        self.telemetry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: LinkEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn send(&self, command: &Command) -> Result<()> {
        let line = command.encode();
        debug!("tx {}", line);
        self.writer().write_line(&line)?;
        Ok(())
    }

    fn send_paced(&self, command: &Command, delay: Duration) -> Result<()> {
        let paced = encode_with_delay(&command.key, &command.value, delay);
        debug!("tx {} (then wait {:?})", paced.line, paced.delay);
        self.writer().write_line(&paced.line)?;
        if !paced.delay.is_zero() {
            thread::sleep(paced.delay);
        }
        Ok(())
    }

    fn motor_stop(&self) -> Result<()> {
        let delay = self.config.command_delay();
        for command in Command::motor_stop(self.config.neutral_us) {
            self.send_paced(&command, delay)?;
        }
        Ok(())
    }

    fn dispatch(&self, line: &str) -> Option<Telemetry> {
        let telemetry = match telemetry::decode(line) {
            Ok(t) => t,
            Err(e) => {
                debug!("dropping {:?}: {}", line, e);
                if e.is_malformed() {
                    self.telemetry_state().record_dropped();
                }
                return None;
            }
        };

        let actions = self.safety.evaluate(&telemetry, self.state.suppression());

        {
            let mut state = self.telemetry_state();
            state.apply(&telemetry);
            actions.flags.apply_to(&mut state.flags);
        }

        if let Telemetry::RemoteDisable(disabled) = telemetry {
            let enabled = !disabled;
            if self.state.controls_enabled() != enabled {
                info!("robot {} the remote controls", if enabled { "enabled" } else { "disabled" });
            }
            self.state.set_controls_enabled(enabled);
            self.publish(LinkEvent::ControlsEnabled(enabled));
        }

        self.publish(LinkEvent::Telemetry(telemetry.clone()));

        if let Some(reason) = actions.motor_stop {
            self.safety_stop(reason);
        }

        Some(telemetry)
    }

    /// Stop the motors first, then tell the operator why.
    fn safety_stop(&self, reason: StopReason) {
        warn!("safety stop: {:?}", reason);
        if let Err(e) = self.motor_stop() {
            error!("failed to send safety stop: {}", e);
        }
        self.publish(LinkEvent::SafetyStop(reason));

        match reason {
            StopReason::BatteryLow { battery, volts } => {
                self.publish(LinkEvent::BatteryWarning { battery, volts });
            }
            StopReason::MotorOverheat { left_c, right_c } => {
                self.publish(LinkEvent::MotorOverheat { left_c, right_c });
            }
        }
    }
}

fn run_receiver(inner: &LinkInner, mut reader: impl LineReader) -> ReceiverExit {
    info!("telemetry receiver listening");

    let exit = loop {
        if !inner.state.is_enabled() {
            break ReceiverExit::Disabled;
        }
        match reader.read_line() {
            Ok(line) => {
                inner.dispatch(&line);
            }
            Err(TransportError::Closed) if !inner.state.is_enabled() => break ReceiverExit::Disabled,
            Err(e) => {
                error!("telemetry read failed, receiver stopping: {}", e);
                break ReceiverExit::TransportFailed(e);
            }
        }
    };

    let reason = match &exit {
        ReceiverExit::Disabled => "link disabled".to_string(),
        ReceiverExit::TransportFailed(e) => e.to_string(),
    };
    info!("telemetry receiver stopped: {}", reason);
    inner.publish(LinkEvent::ReceiverStopped { reason });

    exit
}

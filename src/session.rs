//! Device session: connection state machine and control loop.
//!
//! One session per physical device. A single cooperatively-scheduled task
//! owns the transport, the active algorithm and both channel states; every
//! external request arrives as a fire-and-forget message consumed at the top
//! of each tick, so no state is ever read mid-mutation and no caller blocks
//! on the loop.

use bytes::Bytes;
use strum_macros::Display;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use crate::algorithm::{Algorithm, AlgorithmMode};
use crate::channel::{Channel, ChannelState};
use crate::config::{ChannelConfig, SessionConfig};
use crate::error::Error;
use crate::packet::PulseCommand;
use crate::pulse::PulseTrain;
use crate::scheduler::PacketScheduler;
use crate::transport::Transport;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Pausing,
    Paused,
    Resetting,
    ShuttingDown,
}

/// Status events emitted to observers. At most one event per kind (per
/// channel, for pulses) is emitted per tick.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    ConnectionStatusChanged(SessionState),
    BatteryLevelChanged(u8),
    /// A pulse run was accepted by the transport; drives visualization.
    PulseSent {
        channel: Channel,
        frequency: u16,
        intensity: u16,
        timestamp: f64,
    },
    ParametersChanged,
    PowerLevelsChanged {
        intensity_a: u16,
        intensity_b: u16,
    },
}

/// Requests from the outside world, consumed at the top of each tick.
enum SessionCommand {
    SetPosition {
        alpha: f64,
        beta: f64,
        volume: f64,
        timestamp: f64,
    },
    SetMode(AlgorithmMode),
    SetChannelConfig {
        channel: Channel,
        config: ChannelConfig,
    },
    Pause,
    Resume,
    ResetConnection,
    Shutdown,
}

/// The most recent position signal sample.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PositionSignal {
    alpha: f64,
    beta: f64,
    volume: f64,
    timestamp: f64,
}

impl Default for PositionSignal {
    fn default() -> Self {
        // Zero volume until the signal source speaks: a fresh session never
        // produces felt output on its own.
        PositionSignal {
            alpha: 0.0,
            beta: 0.0,
            volume: 0.0,
            timestamp: 0.0,
        }
    }
}

/// Fire-and-forget control surface for a running session.
///
/// Every method enqueues a request the control loop applies at its next tick
/// boundary; none of them block on the loop.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn set_position(&self, alpha: f64, beta: f64, volume: f64, timestamp: f64) {
        let _ = self.command_tx.send(SessionCommand::SetPosition {
            alpha,
            beta,
            volume,
            timestamp,
        });
    }

    pub fn set_mode(&self, mode: AlgorithmMode) {
        let _ = self.command_tx.send(SessionCommand::SetMode(mode));
    }

    pub fn set_channel_config(&self, channel: Channel, config: ChannelConfig) {
        let _ = self
            .command_tx
            .send(SessionCommand::SetChannelConfig { channel, config });
    }

    /// Stop advancing algorithm output; the loop keeps the link alive with
    /// keep-alive packets.
    pub fn pause(&self) {
        let _ = self.command_tx.send(SessionCommand::Pause);
    }

    /// Resume algorithm output. A no-op while output is already running, so
    /// repeated start requests never stack a second loop.
    pub fn resume(&self) {
        let _ = self.command_tx.send(SessionCommand::Resume);
    }

    /// Tear the link down and reconnect from scratch.
    pub fn reset_connection(&self) {
        let _ = self.command_tx.send(SessionCommand::ResetConnection);
    }

    /// End the session. The loop sends a final safety reset (bounded) and
    /// releases the link.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown);
    }
}

/// A device session over some transport.
pub struct DeviceSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    scheduler: PacketScheduler,
    algorithm: Algorithm,
    channel_a: ChannelState,
    channel_b: ChannelState,
    state: SessionState,
    had_successful_connection: bool,
    signal: PositionSignal,
    seq: u8,
    next_update: Instant,
    last_power_levels: Option<(u16, u16)>,
    last_battery: Option<u8>,
    last_battery_poll: Option<Instant>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl<T: Transport> DeviceSession<T> {
    /// Build a session around a transport. Returns the session (to be driven
    /// with [`DeviceSession::run`]), its control handle, and the event
    /// stream.
    pub fn new(
        transport: T,
        config: SessionConfig,
        algorithm: Algorithm,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let config = config.sanitized();
        let now = Instant::now();
        let session = DeviceSession {
            transport,
            scheduler: PacketScheduler::new(config.packet_margin),
            config,
            algorithm,
            channel_a: ChannelState::new(now),
            channel_b: ChannelState::new(now),
            state: SessionState::Disconnected,
            had_successful_connection: false,
            signal: PositionSignal::default(),
            seq: 0,
            next_update: now,
            last_power_levels: None,
            last_battery: None,
            last_battery_poll: None,
            command_rx,
            event_tx,
        };
        (session, SessionHandle { command_tx }, event_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion: connect, run the control loop,
    /// reconnect and reset as needed, and tear down on shutdown.
    ///
    /// This is the session's single control task; spawn it once. Everything
    /// else talks to it through the [`SessionHandle`].
    pub async fn run(mut self) {
        self.set_state(SessionState::Connecting);
        loop {
            self.drain_commands();
            match self.state {
                SessionState::Connecting => self.establish().await,
                SessionState::Connected | SessionState::Pausing | SessionState::Paused => {
                    self.update_loop().await
                }
                SessionState::Resetting => self.reset_link().await,
                SessionState::ShuttingDown => {
                    self.teardown().await;
                    break;
                }
                SessionState::Disconnected => break,
            }
        }
        info!("Session ended");
    }

    /// One connection attempt, including the mandatory safety reset.
    async fn establish(&mut self) {
        let outcome = match self.transport.connect().await {
            // The device must never inherit stale output from a prior
            // session: zero both channels before any algorithm output.
            Ok(()) => self.send_with_retry(PulseCommand::Reset).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                self.had_successful_connection = true;
                let now = Instant::now();
                self.channel_a = ChannelState::new(now);
                self.channel_b = ChannelState::new(now);
                self.next_update = now;
                self.poll_battery(now, true).await;
                self.set_state(SessionState::Connected);
            }
            Err(err) if self.had_successful_connection => {
                warn!("Reconnect attempt failed: {err}; retrying");
                let _ = self.transport.disconnect().await;
                sleep(self.config.reconnect_delay).await;
            }
            Err(err) => {
                // Never-connected setups surface the failure instead of
                // retrying forever against a device that may not exist.
                error!("Initial connection failed: {err}");
                let _ = self.transport.disconnect().await;
                self.set_state(SessionState::Disconnected);
            }
        }
    }

    /// The control loop: sleep until the scheduled send time, apply pending
    /// requests, then run the tick for the current state.
    async fn update_loop(&mut self) {
        while matches!(
            self.state,
            SessionState::Connected | SessionState::Pausing | SessionState::Paused
        ) {
            sleep_until(self.next_update).await;
            self.drain_commands();
            match self.state {
                SessionState::Connected => self.tick_active().await,
                SessionState::Pausing | SessionState::Paused => self.tick_keep_alive().await,
                // A request moved us out; the outer loop takes over.
                _ => break,
            }
        }
    }

    /// Advance algorithm output by one tick and transmit it.
    async fn tick_active(&mut self) {
        let levels = self.algorithm.compute(
            self.signal.timestamp,
            self.signal.volume,
            self.signal.alpha,
            self.signal.beta,
        );
        let params = self.algorithm.params();
        let a = PulseTrain::from_levels(
            levels.intensity_a,
            levels.frequency_a,
            params.channel_a.intensity_ceiling,
        );
        let b = PulseTrain::from_levels(
            levels.intensity_b,
            levels.frequency_b,
            params.channel_b.intensity_ceiling,
        );
        self.transmit_pulses(PulseCommand::Data { a, b }).await;
    }

    /// Silent tick: zero intensity at the keep-alive frequency, so the
    /// device's inactivity timeout never fires while output is paused.
    async fn tick_keep_alive(&mut self) {
        self.transmit_pulses(PulseCommand::keep_alive()).await;
        if self.state == SessionState::Pausing {
            // Output is silenced on the wire; the pause is now observable.
            self.set_state(SessionState::Paused);
        }
    }

    /// Commit a data command to channel state, send it, emit observation
    /// events, and schedule the next tick.
    async fn transmit_pulses(&mut self, command: PulseCommand) {
        let PulseCommand::Data { a, b } = command else {
            return;
        };
        let now = Instant::now();
        self.channel_a
            .update(a.level(), a.frequency_hz(), a.total_duration_ms(), now);
        self.channel_b
            .update(b.level(), b.frequency_hz(), b.total_duration_ms(), now);

        match self.send_with_retry(command).await {
            Ok(()) => {
                let timestamp = self.signal.timestamp;
                self.emit(DeviceEvent::PulseSent {
                    channel: Channel::A,
                    frequency: a.frequency_hz(),
                    intensity: a.level(),
                    timestamp,
                });
                self.emit(DeviceEvent::PulseSent {
                    channel: Channel::B,
                    frequency: b.frequency_hz(),
                    intensity: b.level(),
                    timestamp,
                });
                if self.last_power_levels != Some((a.level(), b.level())) {
                    self.last_power_levels = Some((a.level(), b.level()));
                    self.emit(DeviceEvent::PowerLevelsChanged {
                        intensity_a: a.level(),
                        intensity_b: b.level(),
                    });
                }
                self.next_update =
                    Instant::now() + self.scheduler.delay_after_send(&command.durations_ms());
                self.poll_battery(Instant::now(), false).await;
            }
            Err(err) => {
                warn!("Transmission failed, resetting link: {err}");
                self.set_state(SessionState::Resetting);
            }
        }
    }

    /// Send one frame with the per-send retry budget. Retries reuse the same
    /// sequence number; only a fresh frame advances it.
    async fn send_with_retry(&mut self, command: PulseCommand) -> Result<(), Error> {
        let frame = command.encode(self.next_seq());
        let attempts = self.config.send_retry_limit;
        let mut last_error = Error::NotConnected;
        for attempt in 1..=attempts {
            match self.transport.send(frame.clone()).await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("Send recovered on attempt {attempt}/{attempts}");
                    }
                    return Ok(());
                }
                Err(err) => {
                    warn!("Send attempt {attempt}/{attempts} failed: {err}");
                    last_error = err;
                    if attempt < attempts {
                        sleep(self.config.send_retry_delay).await;
                    }
                }
            }
        }
        Err(Error::RetryExhausted {
            attempts,
            source: Box::new(last_error),
        })
    }

    /// Best-effort disconnect, then back to Connecting.
    async fn reset_link(&mut self) {
        if let Err(err) = self.transport.disconnect().await {
            debug!("Disconnect during reset failed: {err}");
        }
        self.set_state(SessionState::Connecting);
    }

    /// Final teardown: one bounded safety-reset send, then release the link.
    /// An unreachable device never blocks teardown.
    async fn teardown(&mut self) {
        let frame: Bytes = PulseCommand::Reset.encode(self.next_seq());
        match timeout(self.config.shutdown_timeout, self.transport.send(frame)).await {
            Ok(Ok(())) => debug!("Final safety reset sent"),
            Ok(Err(err)) => warn!("Final safety reset failed: {err}"),
            Err(err) => warn!("Final safety reset timed out: {err}"),
        }
        if let Err(err) = self.transport.disconnect().await {
            debug!("Disconnect during teardown failed: {err}");
        }
        self.set_state(SessionState::Disconnected);
    }

    /// Apply every pending external request. Called at the top of each tick
    /// and between state-machine phases.
    fn drain_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(command) => self.apply(command),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    // Every handle is gone; nobody can ever resume or stop
                    // us, so tear down instead of pulsing forever.
                    if self.state != SessionState::ShuttingDown {
                        info!("All session handles dropped, shutting down");
                        self.set_state(SessionState::ShuttingDown);
                    }
                    break;
                }
            }
        }
    }

    fn apply(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetPosition {
                alpha,
                beta,
                volume,
                timestamp,
            } => {
                self.signal = PositionSignal {
                    alpha,
                    beta,
                    volume,
                    timestamp,
                };
            }
            SessionCommand::SetMode(mode) => {
                if mode != self.algorithm.mode() {
                    info!("Switching algorithm to {mode}");
                    self.algorithm = Algorithm::new(mode, *self.algorithm.params());
                    self.emit(DeviceEvent::ParametersChanged);
                }
            }
            SessionCommand::SetChannelConfig { channel, config } => {
                let mut params = *self.algorithm.params();
                match channel {
                    Channel::A => params.channel_a = config,
                    Channel::B => params.channel_b = config,
                }
                self.algorithm = Algorithm::new(self.algorithm.mode(), params);
                self.emit(DeviceEvent::ParametersChanged);
            }
            SessionCommand::Pause => {
                if self.state == SessionState::Connected {
                    self.set_state(SessionState::Pausing);
                    self.next_update = Instant::now();
                }
            }
            SessionCommand::Resume => match self.state {
                SessionState::Paused | SessionState::Pausing => {
                    self.set_state(SessionState::Connected);
                    self.next_update = Instant::now();
                }
                SessionState::Connected => {
                    debug!("Resume ignored; update loop already active");
                }
                _ => debug!("Resume ignored in state {}", self.state),
            },
            SessionCommand::ResetConnection => {
                if matches!(
                    self.state,
                    SessionState::Connected | SessionState::Pausing | SessionState::Paused
                ) {
                    info!("Connection reset requested");
                    self.set_state(SessionState::Resetting);
                } else {
                    debug!("Reset ignored in state {}", self.state);
                }
            }
            SessionCommand::Shutdown => {
                self.set_state(SessionState::ShuttingDown);
            }
        }
    }

    /// Poll the battery characteristic at the configured cadence. Battery is
    /// advisory: a failed read is logged, never escalated.
    async fn poll_battery(&mut self, now: Instant, force: bool) {
        let due = match self.last_battery_poll {
            Some(last) => now.saturating_duration_since(last) >= self.config.battery_poll_interval,
            None => true,
        };
        if !(force || due) {
            return;
        }
        self.last_battery_poll = Some(now);
        match self.transport.read_battery().await {
            Ok(percent) => {
                if self.last_battery != Some(percent) {
                    self.last_battery = Some(percent);
                    self.emit(DeviceEvent::BatteryLevelChanged(percent));
                }
            }
            Err(err) => debug!("Battery read failed: {err}"),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state: {} -> {}", self.state, state);
            self.state = state;
            self.emit(DeviceEvent::ConnectionStatusChanged(state));
        }
    }

    fn emit(&self, event: DeviceEvent) {
        // A dropped observer must never stall the control loop.
        let _ = self.event_tx.send(event);
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }
}

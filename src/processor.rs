//! Per-train event processor.
//!
//! Every train runs as one tokio task that owns its state machine and
//! consumes a mailbox of [`TrainMessage`]s: filtered signal colors, operator
//! commands, emergency stops, and the completions of its own timers and
//! resource waits. One message is processed to completion before the next
//! is taken, which gives each train a strictly ordered sequence of
//! transitions. Trains only meet on the shared [`Track`], whose claims are
//! atomic.
//!
//! # Motion
//!
//! | From | Signal | To |
//! |------|--------|----|
//! | gap | any sector color | entered sector (blind for `sector_time`) |
//! | plain sector | own color | gap, ramp to `exit_speed` |
//! | structured, fast | own color | slow; claim next if free |
//! | structured, slow | own color | gap, or stop and wait for next |
//! | anywhere | station color of the next sector | station, dwell |
//! | anywhere | crossing color | book / free the crossing, or brake and wait |
//!
//! Signals are ignored in manual mode, during the post-restart blind
//! window, while stopped at a station and while waiting for a resource.
//!
//! # Timers
//!
//! Dwell, entry blind, signal blind and return-to-cruise are
//! [`TimerSlot`]s that post back into the mailbox. Resource waits run the
//! same way. Every message carries the generation it was armed with, so a
//! timer cancelled after it fired can never act.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::commands::OperatorCommand;
use crate::config::{Config, SpuriousSignalPolicy, TimingConfig, TrainConfig};
use crate::drive::{Drive, DriveSettings};
use crate::error::{ControlError, TrackError};
use crate::power::MAX_POWER_INDEX;
use crate::ramp::RampController;
use crate::reservation::CrossingOutcome;
use crate::status::StatusReport;
use crate::timer::TimerSlot;
use crate::track::{Color, CrossingId, SectorId, SectorKind, SubSector, Track};
use crate::train::{MotionState, TrainId, TrainSnapshot};
use crate::traits::{StatusSink, TrainHardware};

// ============================================================================
// Messages
// ============================================================================

/// Timers owned by a train.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Station dwell.
    Dwell,
    /// Post-entry window in which the own color is not an exit.
    EntryBlind,
    /// Post-restart window in which every signal is ignored.
    SignalBlind,
    /// Ease back from `max_speed` to `exit_speed`.
    Cruise,
}

/// What a train is waiting for, and what to do once it has it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaitPurpose {
    /// Leave `station` once `next` is claimed.
    Departure { station: SectorId, next: SectorId },
    /// Leave structured sector `from` once `to` is claimed.
    SectorExit { from: SectorId, to: SectorId },
    /// Finish entering `sector` once claimed.
    SectorEntry { sector: SectorId },
    /// Resume at `resume` once the crossing is booked.
    Crossing { crossing: CrossingId, resume: i8 },
}

impl WaitPurpose {
    fn sector(&self) -> Option<SectorId> {
        match *self {
            WaitPurpose::Departure { next: s, .. }
            | WaitPurpose::SectorExit { to: s, .. }
            | WaitPurpose::SectorEntry { sector: s } => Some(s),
            WaitPurpose::Crossing { .. } => None,
        }
    }

    fn crossing(&self) -> Option<CrossingId> {
        match *self {
            WaitPurpose::Crossing { crossing, .. } => Some(crossing),
            _ => None,
        }
    }
}

/// Mailbox message of a train actor.
#[derive(Debug)]
pub(crate) enum TrainMessage {
    /// A debounced signal color.
    Signal(Color),
    /// An operator command; the result is sent back on `reply`.
    Command {
        command: OperatorCommand,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    /// Stop and reset tracking; acknowledge on `ack`.
    EmergencyStop { ack: oneshot::Sender<()> },
    /// Report a snapshot.
    Snapshot { reply: oneshot::Sender<TrainSnapshot> },
    /// A timer expired.
    TimerFired { timer: TimerKind, generation: u64 },
    /// A resource wait succeeded; the resource is held.
    Acquired { purpose: WaitPurpose, generation: u64 },
    /// A resource wait hit its bound.
    WaitTimedOut { purpose: WaitPurpose, generation: u64 },
    /// Stop the actor.
    Shutdown,
}

/// Request from a train for a layout-wide emergency stop.
#[derive(Clone, Debug)]
pub(crate) struct Escalation {
    pub(crate) train: TrainId,
    pub(crate) reason: String,
}

// ============================================================================
// Setup
// ============================================================================

/// Hardware and settings for one train, consumed by
/// [`Dispatcher::spawn_train`](crate::dispatcher::Dispatcher::spawn_train).
pub struct TrainSetup<H> {
    /// Train settings.
    pub config: TrainConfig,
    /// Hub of the (lead) engine.
    pub primary: H,
    /// Hub of the coupled second engine of a compound train.
    pub secondary: Option<H>,
}

impl<H> TrainSetup<H> {
    /// A single-engine train.
    pub fn new(config: TrainConfig, primary: H) -> Self {
        Self {
            config,
            primary,
            secondary: None,
        }
    }

    /// Couple a second engine.
    pub fn with_secondary(mut self, secondary: H) -> Self {
        self.config.kind.is_compound = true;
        self.secondary = Some(secondary);
        self
    }
}

#[derive(Debug, Default)]
struct Timers {
    dwell: TimerSlot,
    entry_blind: TimerSlot,
    signal_blind: TimerSlot,
    cruise: TimerSlot,
}

impl Timers {
    fn slot(&mut self, kind: TimerKind) -> &mut TimerSlot {
        match kind {
            TimerKind::Dwell => &mut self.dwell,
            TimerKind::EntryBlind => &mut self.entry_blind,
            TimerKind::SignalBlind => &mut self.signal_blind,
            TimerKind::Cruise => &mut self.cruise,
        }
    }

    fn cancel_all(&mut self) {
        self.dwell.cancel();
        self.entry_blind.cancel();
        self.signal_blind.cancel();
        self.cruise.cancel();
    }
}

// ============================================================================
// Controller
// ============================================================================

pub(crate) struct TrainController<H> {
    config: TrainConfig,
    home: SectorId,
    track: Arc<Track>,
    timing: TimingConfig,
    policy: SpuriousSignalPolicy,
    ramp: RampController<H>,
    timers: Timers,
    wait: TimerSlot,
    waiting: Option<WaitPurpose>,
    mailbox: mpsc::UnboundedSender<TrainMessage>,
    escalation: mpsc::UnboundedSender<Escalation>,
    status: Arc<dyn StatusSink>,
    rng: StdRng,

    auto_mode: bool,
    current: Option<SectorId>,
    previous: SectorId,
    sub_sector: SubSector,
    just_entered: bool,
    signal_blind: bool,
    last_signal: Option<Color>,
    fault: Option<String>,
}

/// Channels a controller is wired to.
pub(crate) struct Wiring {
    pub(crate) mailbox: mpsc::UnboundedSender<TrainMessage>,
    pub(crate) escalation: mpsc::UnboundedSender<Escalation>,
    pub(crate) faults: mpsc::UnboundedSender<ControlError>,
    pub(crate) status: Arc<dyn StatusSink>,
}

impl<H> TrainController<H>
where
    H: TrainHardware + Send + 'static,
{
    pub(crate) fn new(
        setup: TrainSetup<H>,
        track: Arc<Track>,
        config: &Config,
        wiring: Wiring,
    ) -> Result<Self, ControlError> {
        let TrainSetup {
            config: train,
            primary,
            secondary,
        } = setup;

        let home = track
            .sector_by_name(&train.home_station)
            .filter(|&id| track.sector(id).is_station())
            .ok_or_else(|| TrackError::UnknownSector(train.home_station.to_string()))?;
        if train.kind.is_compound != secondary.is_some() {
            return Err(ControlError::Config(format!(
                "train {}: a compound train needs exactly one secondary engine",
                train.id
            )));
        }

        let settings = DriveSettings {
            curve: config.power.curve(),
            retries: config.timing.hardware_retries,
            moving_led: train.moving_led,
            stopped_led: train.stopped_led,
            headlight: train.kind.has_headlight,
            led_delay: config.timing.stopped_led_delay(),
            dim_delay: config.timing.headlight_dim_delay(),
        };
        let primary = Drive::new(train.id, primary, settings);
        let secondary = secondary.map(|hw| {
            Drive::new(
                train.id,
                hw,
                DriveSettings {
                    headlight: false,
                    ..settings
                },
            )
        });

        Ok(Self {
            home,
            track,
            timing: config.timing.clone(),
            policy: config.policy.spurious_signal,
            ramp: RampController::new(primary, secondary, wiring.faults),
            timers: Timers::default(),
            wait: TimerSlot::new(),
            waiting: None,
            mailbox: wiring.mailbox,
            escalation: wiring.escalation,
            status: wiring.status,
            rng: StdRng::from_entropy(),
            auto_mode: false,
            current: None,
            previous: home,
            sub_sector: SubSector::Fast,
            just_entered: false,
            signal_blind: false,
            last_signal: None,
            fault: None,
            config: train,
        })
    }

    fn id(&self) -> TrainId {
        self.config.id
    }

    /// Actor loop. Returns after [`TrainMessage::Shutdown`].
    pub(crate) async fn run(
        mut self,
        mut mailbox: mpsc::UnboundedReceiver<TrainMessage>,
        mut faults: mpsc::UnboundedReceiver<ControlError>,
    ) {
        info!(train = %self.id(), name = %self.config.name, "train started");
        self.publish().await;
        loop {
            tokio::select! {
                biased;
                Some(fault) = faults.recv() => self.on_fault(fault).await,
                Some(msg) = mailbox.recv() => {
                    if matches!(msg, TrainMessage::Shutdown) {
                        break;
                    }
                    self.handle(msg).await;
                }
                else => break,
            }
            self.publish().await;
        }
        self.cancel_automation().await;
        self.ramp.force_stop().await;
        self.track.release_all(self.id());
        info!(train = %self.id(), "train stopped");
    }

    async fn handle(&mut self, msg: TrainMessage) {
        match msg {
            TrainMessage::Signal(color) => self.on_signal(color).await,
            TrainMessage::Command { command, reply } => {
                let result = self.on_command(command).await;
                let _ = reply.send(result);
            }
            TrainMessage::EmergencyStop { ack } => {
                self.emergency_stop().await;
                let _ = ack.send(());
            }
            TrainMessage::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            TrainMessage::TimerFired { timer, generation } => {
                if self.timers.slot(timer).accept(generation) {
                    self.on_timer(timer).await;
                } else {
                    trace!(train = %self.id(), ?timer, "stale timer ignored");
                }
            }
            TrainMessage::Acquired {
                purpose,
                generation,
            } => {
                if self.wait.accept(generation) && self.waiting == Some(purpose) {
                    self.waiting = None;
                    self.on_acquired(purpose).await;
                } else {
                    self.drop_stale_claim(purpose);
                }
            }
            TrainMessage::WaitTimedOut {
                purpose,
                generation,
            } => {
                if self.wait.accept(generation) && self.waiting == Some(purpose) {
                    self.on_wait_timeout(purpose);
                }
            }
            TrainMessage::Shutdown => {}
        }
    }

    // ========================================================================
    // Signals
    // ========================================================================

    async fn on_signal(&mut self, color: Color) {
        self.last_signal = Some(color);
        if !self.auto_mode {
            trace!(train = %self.id(), %color, "signal ignored in manual mode");
            return;
        }
        if self.signal_blind {
            debug!(train = %self.id(), %color, "signal ignored, blind after restart");
            return;
        }
        if self.waiting.is_some() || self.is_at_station() {
            debug!(train = %self.id(), %color, "signal ignored while stopped");
            return;
        }

        let track = Arc::clone(&self.track);
        if track.is_crossing_color(color) {
            return self.on_crossing_signal(color).await;
        }

        let context = self.current.unwrap_or(self.previous);
        let next = track.sector(track.next(context, self.config.direction));
        if next.is_station() && next.color() == color {
            return self.arrive_at_station(next.id()).await;
        }

        match self.current {
            None => self.enter_sector(color).await,
            Some(sector) if track.sector(sector).color() == color => {
                if self.just_entered {
                    debug!(
                        train = %self.id(),
                        sector = track.sector(sector).name(),
                        "entry tile seen again"
                    );
                } else {
                    self.on_own_color(sector).await;
                }
            }
            Some(_) => self.recover(color, "signal does not match the current sector").await,
        }
    }

    async fn enter_sector(&mut self, color: Color) {
        let track = Arc::clone(&self.track);
        let sector = track.sector(track.next(self.previous, self.config.direction));
        if sector.is_station() {
            return self.recover(color, "station ahead but signal is not its color").await;
        }
        if sector.color() != color {
            warn!(
                train = %self.id(),
                expected = %sector.color(),
                got = %color,
                sector = sector.name(),
                "entering next sector on a foreign color"
            );
        }
        if !track.try_claim(sector.id(), self.id()) {
            info!(
                train = %self.id(),
                sector = sector.name(),
                holder = ?sector.occupier(),
                "sector ahead occupied, waiting"
            );
            return self
                .stop_and_wait(WaitPurpose::SectorEntry {
                    sector: sector.id(),
                })
                .await;
        }
        self.complete_entry(sector.id(), false).await;
    }

    async fn complete_entry(&mut self, sector: SectorId, from_standstill: bool) {
        let track = Arc::clone(&self.track);
        if self.previous != sector {
            track.release(self.previous, self.id());
        }
        let s = track.sector(sector);
        self.current = Some(sector);
        self.sub_sector = SubSector::Fast;
        self.just_entered = true;
        self.arm(TimerKind::EntryBlind, s.sector_time());
        self.arm(TimerKind::Cruise, s.max_speed_time());
        if from_standstill {
            self.arm_signal_blind();
        }
        info!(train = %self.id(), sector = s.name(), "entered sector");
        self.ramp_to(s.max_speed(), self.timing.ramp()).await;
    }

    async fn on_own_color(&mut self, sector: SectorId) {
        let track = Arc::clone(&self.track);
        let s = track.sector(sector);
        let next = track.next(sector, self.config.direction);
        match (s.kind(), self.sub_sector) {
            (SectorKind::Plain | SectorKind::Station, _) => {
                self.exit_sector(sector, s.exit_speed(), self.timing.ramp()).await;
            }
            (SectorKind::Structured { slow_speed }, SubSector::Fast) => {
                self.sub_sector = SubSector::Slow;
                if track.is_held_by_other(next, self.id()) {
                    info!(
                        train = %self.id(),
                        sector = s.name(),
                        next = track.sector(next).name(),
                        "next sector occupied, slowing"
                    );
                    self.ramp_to(s.exit_speed(), self.timing.ramp()).await;
                } else if track.try_claim(next, self.id()) {
                    debug!(
                        train = %self.id(),
                        sector = s.name(),
                        next = track.sector(next).name(),
                        "next sector claimed early"
                    );
                    self.ramp_to(slow_speed, self.timing.ramp()).await;
                } else {
                    self.ramp_to(s.exit_speed(), self.timing.ramp()).await;
                }
            }
            (SectorKind::Structured { .. }, SubSector::Slow) => {
                if track.try_claim(next, self.id()) {
                    self.exit_sector(sector, s.exit_speed(), self.timing.ramp()).await;
                } else {
                    info!(
                        train = %self.id(),
                        sector = s.name(),
                        next = track.sector(next).name(),
                        "next sector occupied, stopping"
                    );
                    self.stop_and_wait(WaitPurpose::SectorExit {
                        from: sector,
                        to: next,
                    })
                    .await;
                }
            }
        }
    }

    async fn exit_sector(&mut self, sector: SectorId, speed: u8, duration: Duration) {
        self.timers.entry_blind.cancel();
        self.timers.cruise.cancel();
        self.just_entered = false;
        self.track.release(sector, self.id());
        self.current = None;
        self.previous = sector;
        self.sub_sector = SubSector::Fast;
        info!(train = %self.id(), sector = self.track.sector(sector).name(), "left sector");
        self.ramp_to(speed, duration).await;
    }

    async fn arrive_at_station(&mut self, station: SectorId) {
        let track = Arc::clone(&self.track);
        self.timers.cancel_all();
        self.just_entered = false;
        self.signal_blind = false;
        if let Err(e) = self.ramp.stop().await {
            return self.on_fault(e).await;
        }

        if let Some(current) = self.current.filter(|&s| s != station) {
            track.release(current, self.id());
        }
        if self.previous != station {
            track.release(self.previous, self.id());
        }
        if !track.try_claim(station, self.id()) {
            warn!(
                train = %self.id(),
                station = track.sector(station).name(),
                holder = ?track.sector(station).occupier(),
                "stopped at an occupied station"
            );
        }
        self.current = Some(station);
        self.sub_sector = SubSector::Fast;

        let min = self.timing.dwell_min_ms;
        let max = self.timing.dwell_max_ms.max(min);
        let dwell_ms = self.rng.gen_range(min..=max);
        info!(
            train = %self.id(),
            station = track.sector(station).name(),
            dwell_ms,
            "arrived at station"
        );
        self.arm(TimerKind::Dwell, Duration::from_millis(dwell_ms));
    }

    async fn on_crossing_signal(&mut self, color: Color) {
        let track = Arc::clone(&self.track);
        let context = self.current.unwrap_or(self.previous);
        let Some(crossing) = track.crossing_for(context, color) else {
            return self.recover(color, "no crossing for this color here").await;
        };
        let c = track.crossing(crossing);
        match c.reservation().toggle(self.id()) {
            CrossingOutcome::Booked => {
                info!(train = %self.id(), crossing = c.name(), "crossing booked");
            }
            CrossingOutcome::Released => {
                info!(train = %self.id(), crossing = c.name(), "crossing released");
            }
            CrossingOutcome::Blocked { holder } => {
                let resume = self.ramp.target().unwrap_or_else(|| self.ramp.power_index());
                info!(
                    train = %self.id(),
                    crossing = c.name(),
                    ?holder,
                    resume,
                    "crossing blocked, braking"
                );
                self.timers.cruise.cancel();
                if let Err(e) = self.ramp.ramp(0, self.timing.crossing_brake()).await {
                    return self.on_fault(e).await;
                }
                self.start_wait(WaitPurpose::Crossing { crossing, resume });
            }
        }
    }

    async fn recover(&mut self, color: Color, reason: &str) {
        let sector = self.current.map(|s| self.track.sector(s).name().to_string());
        match self.policy {
            SpuriousSignalPolicy::Report => {
                warn!(train = %self.id(), %color, ?sector, reason, "spurious signal");
            }
            SpuriousSignalPolicy::StopTrain => {
                warn!(
                    train = %self.id(),
                    %color,
                    ?sector,
                    reason,
                    "spurious signal, stopping train"
                );
                self.cancel_automation().await;
                self.auto_mode = false;
                if let Err(e) = self.ramp.stop().await {
                    self.on_fault(e).await;
                }
            }
            SpuriousSignalPolicy::EmergencyStop => {
                error!(
                    train = %self.id(),
                    %color,
                    ?sector,
                    reason,
                    "spurious signal, requesting emergency stop"
                );
                let _ = self.escalation.send(Escalation {
                    train: self.id(),
                    reason: format!("spurious {color} signal: {reason}"),
                });
            }
        }
    }

    // ========================================================================
    // Timers and waits
    // ========================================================================

    async fn on_timer(&mut self, timer: TimerKind) {
        match timer {
            TimerKind::Dwell => {
                let Some(station) = self.current else {
                    return;
                };
                let next = self.track.next(station, self.config.direction);
                debug!(train = %self.id(), "dwell over");
                self.start_wait(WaitPurpose::Departure { station, next });
            }
            TimerKind::EntryBlind => self.just_entered = false,
            TimerKind::SignalBlind => self.signal_blind = false,
            TimerKind::Cruise => {
                let track = Arc::clone(&self.track);
                if let Some(sector) = self.current.map(|s| track.sector(s)) {
                    if !sector.is_station() {
                        debug!(train = %self.id(), sector = sector.name(), "back to cruise");
                        self.ramp_to(sector.exit_speed(), self.timing.ramp()).await;
                    }
                }
            }
        }
    }

    async fn on_acquired(&mut self, purpose: WaitPurpose) {
        let track = Arc::clone(&self.track);
        match purpose {
            WaitPurpose::Departure { station, .. } => {
                track.release(station, self.id());
                self.current = None;
                self.previous = station;
                self.sub_sector = SubSector::Fast;
                self.arm_signal_blind();
                info!(train = %self.id(), station = track.sector(station).name(), "departing");
                self.ramp_to(self.timing.restart_power, self.timing.restart_ramp()).await;
            }
            WaitPurpose::SectorExit { from, .. } => {
                self.arm_signal_blind();
                self.exit_sector(from, track.sector(from).exit_speed(), self.timing.restart_ramp())
                    .await;
            }
            WaitPurpose::SectorEntry { sector } => self.complete_entry(sector, true).await,
            WaitPurpose::Crossing { crossing, resume } => {
                self.arm_signal_blind();
                info!(
                    train = %self.id(),
                    crossing = track.crossing(crossing).name(),
                    resume,
                    "crossing free, resuming"
                );
                if let Err(e) = self.ramp.ramp(resume, self.timing.ramp()).await {
                    self.on_fault(e).await;
                }
            }
        }
    }

    fn on_wait_timeout(&mut self, purpose: WaitPurpose) {
        self.waiting = None;
        error!(train = %self.id(), ?purpose, "resource wait timed out");
        let _ = self.escalation.send(Escalation {
            train: self.id(),
            reason: format!("waited too long for {purpose:?}"),
        });
    }

    /// A wait that completed after being cancelled may still have claimed
    /// its resource; give it back unless the train uses it now.
    fn drop_stale_claim(&mut self, purpose: WaitPurpose) {
        let wanted = self.waiting;
        if let Some(sector) = purpose.sector() {
            let in_use = self.current == Some(sector)
                || wanted.and_then(|w| w.sector()) == Some(sector);
            if !in_use && self.track.release(sector, self.id()) {
                debug!(train = %self.id(), ?purpose, "stale sector claim returned");
            }
        }
        if let Some(crossing) = purpose.crossing() {
            if wanted.and_then(|w| w.crossing()) != Some(crossing)
                && self.track.crossing(crossing).reservation().release(self.id())
            {
                debug!(train = %self.id(), ?purpose, "stale crossing booking returned");
            }
        }
    }

    fn start_wait(&mut self, purpose: WaitPurpose) {
        let track = Arc::clone(&self.track);
        let train = self.id();
        let poll = self.timing.poll_interval();
        let limit = self.timing.resource_wait_timeout();
        let tx = self.mailbox.clone();
        self.waiting = Some(purpose);
        self.wait.start(move |generation| async move {
            let acquire = async {
                match purpose {
                    WaitPurpose::Departure { next: s, .. }
                    | WaitPurpose::SectorExit { to: s, .. }
                    | WaitPurpose::SectorEntry { sector: s } => {
                        track.sector(s).reservation().claim(train, poll).await
                    }
                    WaitPurpose::Crossing { crossing, .. } => {
                        track.crossing(crossing).reservation().book(train, poll).await
                    }
                }
            };
            let message = match limit {
                Some(limit) => match tokio::time::timeout(limit, acquire).await {
                    Ok(()) => TrainMessage::Acquired {
                        purpose,
                        generation,
                    },
                    Err(_) => TrainMessage::WaitTimedOut {
                        purpose,
                        generation,
                    },
                },
                None => {
                    acquire.await;
                    TrainMessage::Acquired {
                        purpose,
                        generation,
                    }
                }
            };
            let _ = tx.send(message);
        });
    }

    fn arm(&mut self, timer: TimerKind, delay: Duration) {
        let tx = self.mailbox.clone();
        self.timers
            .slot(timer)
            .arm(delay, tx, move |generation| TrainMessage::TimerFired { timer, generation });
    }

    fn arm_signal_blind(&mut self) {
        self.signal_blind = true;
        self.arm(TimerKind::SignalBlind, self.timing.blind_after_restart());
    }

    async fn stop_and_wait(&mut self, purpose: WaitPurpose) {
        self.timers.cruise.cancel();
        if let Err(e) = self.ramp.stop().await {
            return self.on_fault(e).await;
        }
        self.start_wait(purpose);
    }

    async fn ramp_to(&mut self, magnitude: u8, duration: Duration) {
        let target = self.config.polarity() * magnitude.min(MAX_POWER_INDEX as u8) as i8;
        if let Err(e) = self.ramp.ramp(target, duration).await {
            self.on_fault(e).await;
        }
    }

    /// Cancel every timer, wait and ramp, and withdraw any claim on a
    /// crossing's right of way.
    async fn cancel_automation(&mut self) {
        self.timers.cancel_all();
        self.wait.cancel();
        self.waiting = None;
        self.ramp.cancel().await;
        self.just_entered = false;
        self.signal_blind = false;
        for crossing in self.track.crossings() {
            crossing.reservation().withdraw(self.id());
        }
    }

    // ========================================================================
    // Commands and faults
    // ========================================================================

    async fn on_command(&mut self, command: OperatorCommand) -> Result<(), ControlError> {
        info!(train = %self.id(), %command, "operator command");
        match command {
            OperatorCommand::IncreaseSpeed
            | OperatorCommand::DecreaseSpeed
            | OperatorCommand::Stop => {
                self.cancel_automation().await;
                if self.auto_mode {
                    info!(train = %self.id(), "manual override");
                }
                self.auto_mode = false;
                let index = self.ramp.power_index();
                let result = match command {
                    OperatorCommand::IncreaseSpeed => {
                        self.ramp.set(index.saturating_add(1).min(MAX_POWER_INDEX)).await
                    }
                    OperatorCommand::DecreaseSpeed => {
                        self.ramp.set(index.saturating_sub(1).max(-MAX_POWER_INDEX)).await
                    }
                    _ => self.ramp.stop().await,
                };
                if let Err(e) = &result {
                    self.fault = Some(e.to_string());
                }
                result
            }
            OperatorCommand::Restart => self.restart().await,
            OperatorCommand::ResetAll => {
                self.emergency_stop().await;
                Ok(())
            }
        }
    }

    async fn restart(&mut self) -> Result<(), ControlError> {
        if !self.config.kind.has_sensor {
            return Err(ControlError::RestartUnsupported(self.id()));
        }
        self.cancel_automation().await;
        if let Err(e) = self.ramp.stop().await {
            self.fault = Some(e.to_string());
            return Err(e);
        }
        let track = Arc::clone(&self.track);
        track.release_all(self.id());
        if !track.try_claim(self.home, self.id()) {
            warn!(
                train = %self.id(),
                station = track.sector(self.home).name(),
                holder = ?track.sector(self.home).occupier(),
                "home station occupied"
            );
        }
        self.fault = None;
        self.auto_mode = true;
        self.current = Some(self.home);
        self.previous = self.home;
        self.sub_sector = SubSector::Fast;
        info!(train = %self.id(), station = track.sector(self.home).name(), "restart");
        let next = track.next(self.home, self.config.direction);
        self.start_wait(WaitPurpose::Departure {
            station: self.home,
            next,
        });
        Ok(())
    }

    async fn emergency_stop(&mut self) {
        self.cancel_automation().await;
        if let Err(e) = self.ramp.stop().await {
            self.fault = Some(e.to_string());
            self.ramp.force_stop().await;
        }
        self.auto_mode = false;
        self.current = None;
        self.previous = self.home;
        self.sub_sector = SubSector::Fast;
        self.track.release_all(self.id());
        warn!(train = %self.id(), "emergency stop");
    }

    async fn on_fault(&mut self, fault: ControlError) {
        error!(train = %self.id(), error = %fault, "train fault");
        self.fault = Some(fault.to_string());
        if matches!(fault, ControlError::Hardware { .. }) {
            self.cancel_automation().await;
            self.ramp.force_stop().await;
            self.auto_mode = false;
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    fn is_at_station(&self) -> bool {
        self.current
            .is_some_and(|s| self.track.sector(s).is_station())
    }

    fn motion_state(&self) -> MotionState {
        if !self.auto_mode {
            return MotionState::Manual;
        }
        match self.waiting {
            Some(WaitPurpose::Departure { .. }) => return MotionState::AtStation,
            Some(WaitPurpose::SectorExit { .. } | WaitPurpose::SectorEntry { .. }) => {
                return MotionState::WaitingForSector
            }
            Some(WaitPurpose::Crossing { .. }) => return MotionState::WaitingForCrossing,
            None => {}
        }
        match self.current {
            None => MotionState::InterSector,
            Some(_) if self.is_at_station() => MotionState::AtStation,
            Some(_) if self.just_entered => MotionState::JustEnteredSector,
            Some(_) if self.sub_sector == SubSector::Slow => MotionState::InSectorSlow,
            Some(_) => MotionState::InSectorFast,
        }
    }

    fn dwell_remaining_ms(&self) -> Option<u64> {
        self.timers
            .dwell
            .remaining()
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    fn snapshot(&self) -> TrainSnapshot {
        TrainSnapshot {
            id: self.id(),
            direction: self.config.direction,
            state: self.motion_state(),
            current_sector: self.current,
            previous_sector: self.previous,
            sub_sector: self.sub_sector,
            power_index: self.ramp.power_index(),
            auto_mode: self.auto_mode,
            just_entered_sector: self.just_entered,
            signal_blind: self.signal_blind,
            dwell_remaining_ms: self.dwell_remaining_ms(),
            fault: self.fault.clone(),
        }
    }

    async fn publish(&self) {
        let telemetry = self.ramp.primary().telemetry().await;
        let sector = self.current.map(|s| self.track.sector(s));
        self.status.report(StatusReport {
            id: self.id(),
            name: self.config.name.clone(),
            voltage: telemetry.voltage,
            current_ma: telemetry.current_ma,
            power_index: self.ramp.power_index(),
            power: self.ramp.primary().power(),
            state: self.motion_state(),
            auto_mode: self.auto_mode,
            sector_color: sector.map(|s| s.color()),
            sub_sector: sector
                .filter(|s| s.is_structured())
                .map(|_| self.sub_sector),
            signal: self.last_signal,
            dwell_remaining_ms: self.dwell_remaining_ms(),
            fault: self.fault.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::standard_loop;

    #[test]
    fn wait_purpose_resources() {
        let track = standard_loop();
        let red_1 = track.sector_by_name("RED_1").unwrap();
        let green = track.sector_by_name("GREEN").unwrap();
        let crossing = track.crossings().next().unwrap().id();

        let departure = WaitPurpose::Departure {
            station: red_1,
            next: green,
        };
        assert_eq!(departure.sector(), Some(green));
        assert_eq!(departure.crossing(), None);

        let crossing_wait = WaitPurpose::Crossing { crossing, resume: 4 };
        assert_eq!(crossing_wait.sector(), None);
        assert_eq!(crossing_wait.crossing(), Some(crossing));
    }

    #[test]
    fn compound_setup_marks_kind() {
        let setup = TrainSetup::new(TrainConfig::new(1, "big"), ()).with_secondary(());
        assert!(setup.config.kind.is_compound);
        assert!(setup.secondary.is_some());
    }
}

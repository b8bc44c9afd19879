//! Entry point that owns the trains.
//!
//! The [`Dispatcher`] spawns one actor per train, puts the shared
//! [`SensorEventFilter`] in front of their signal streams, routes operator
//! commands and is the only place where an action reaches across trains:
//! [`emergency_stop`](Dispatcher::emergency_stop) and
//! [`reset_all`](Dispatcher::reset_all).
//!
//! Trains escalate to the dispatcher when a resource wait exceeds its bound
//! or, under [`SpuriousSignalPolicy::EmergencyStop`], on a spurious signal.
//! A watch task turns every escalation into an emergency stop.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trainz_autopilot::config::{Config, TrainConfig};
//! use trainz_autopilot::dispatcher::Dispatcher;
//! use trainz_autopilot::hal::{MockHardware, MockStatusSink};
//! use trainz_autopilot::processor::TrainSetup;
//! use trainz_autopilot::track::standard_loop;
//! use trainz_autopilot::train::MotionState;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), trainz_autopilot::error::ControlError> {
//! let dispatcher = Dispatcher::new(Arc::new(standard_loop()), Config::default())?;
//! let train = dispatcher.spawn_train(
//!     TrainSetup::new(TrainConfig::new(1, "cargo"), MockHardware::new()),
//!     Arc::new(MockStatusSink::new()),
//! )?;
//!
//! let snapshot = dispatcher.snapshot(train).await?;
//! assert_eq!(snapshot.state, MotionState::Manual);
//!
//! dispatcher.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`SpuriousSignalPolicy::EmergencyStop`]: crate::config::SpuriousSignalPolicy::EmergencyStop

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::commands::OperatorCommand;
use crate::config::Config;
use crate::error::ControlError;
use crate::filter::SensorEventFilter;
use crate::processor::{Escalation, TrainController, TrainMessage, TrainSetup, Wiring};
use crate::track::{Color, Track};
use crate::train::{TrainId, TrainSnapshot};
use crate::traits::{StatusSink, TrainHardware};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct TrainHandle {
    mailbox: mpsc::UnboundedSender<TrainMessage>,
    task: JoinHandle<()>,
}

struct Inner {
    track: Arc<Track>,
    filter: Mutex<SensorEventFilter>,
    trains: Mutex<BTreeMap<TrainId, TrainHandle>>,
}

impl Inner {
    fn mailbox(&self, train: TrainId) -> Result<mpsc::UnboundedSender<TrainMessage>, ControlError> {
        lock(&self.trains)
            .get(&train)
            .map(|h| h.mailbox.clone())
            .ok_or(ControlError::UnknownTrain(train))
    }

    async fn emergency_stop(&self) {
        let mailboxes: Vec<_> = lock(&self.trains)
            .iter()
            .map(|(&id, h)| (id, h.mailbox.clone()))
            .collect();

        let mut acks = Vec::with_capacity(mailboxes.len());
        for (id, mailbox) in mailboxes {
            let (ack, done) = oneshot::channel();
            match mailbox.send(TrainMessage::EmergencyStop { ack }) {
                Ok(()) => acks.push((id, done)),
                Err(_) => warn!(train = %id, "train not running during emergency stop"),
            }
        }
        for (id, done) in acks {
            if done.await.is_err() {
                warn!(train = %id, "train did not acknowledge emergency stop");
            }
        }
        self.track.clear_track();
        warn!("emergency stop complete");
    }
}

/// Owner of the train actors and the shared sensor filter.
pub struct Dispatcher {
    inner: Arc<Inner>,
    config: Config,
    started: Instant,
    escalations: mpsc::UnboundedSender<Escalation>,
    watch: JoinHandle<()>,
}

impl Dispatcher {
    /// Create a dispatcher for `track`. Must be called inside a tokio
    /// runtime.
    pub fn new(track: Arc<Track>, config: Config) -> Result<Self, ControlError> {
        config.validate()?;
        let inner = Arc::new(Inner {
            track,
            filter: Mutex::new(SensorEventFilter::new(config.filter.debounce_ms)),
            trains: Mutex::new(BTreeMap::new()),
        });

        let (escalations, mut requests) = mpsc::unbounded_channel::<Escalation>();
        let watched = Arc::clone(&inner);
        let watch = tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                error!(
                    train = %request.train,
                    reason = %request.reason,
                    "escalating to emergency stop"
                );
                watched.emergency_stop().await;
            }
        });

        Ok(Self {
            inner,
            config,
            started: Instant::now(),
            escalations,
            watch,
        })
    }

    /// Shared layout.
    pub fn track(&self) -> &Arc<Track> {
        &self.inner.track
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Milliseconds since the dispatcher was created.
    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Ids of the registered trains.
    pub fn trains(&self) -> Vec<TrainId> {
        lock(&self.inner.trains).keys().copied().collect()
    }

    /// Start the actor for one train.
    pub fn spawn_train<H>(
        &self,
        setup: TrainSetup<H>,
        status: Arc<dyn StatusSink>,
    ) -> Result<TrainId, ControlError>
    where
        H: TrainHardware + Send + 'static,
    {
        let id = setup.config.id;
        let mut trains = lock(&self.inner.trains);
        if trains.contains_key(&id) {
            return Err(ControlError::TrainExists(id));
        }

        let (mailbox, messages) = mpsc::unbounded_channel();
        let (faults, fault_rx) = mpsc::unbounded_channel();
        let controller = TrainController::new(
            setup,
            Arc::clone(&self.inner.track),
            &self.config,
            Wiring {
                mailbox: mailbox.clone(),
                escalation: self.escalations.clone(),
                faults,
                status,
            },
        )?;
        let task = tokio::spawn(controller.run(messages, fault_rx));
        trains.insert(id, TrainHandle { mailbox, task });
        info!(train = %id, "train registered");
        Ok(id)
    }

    /// Feed a classified color detection through the debounce filter.
    ///
    /// Returns `true` if the detection was forwarded to the train.
    pub fn on_detection(&self, train: TrainId, color: Color) -> Result<bool, ControlError> {
        let mailbox = self.inner.mailbox(train)?;
        let forwarded = lock(&self.inner.filter).filter(train, color, self.now_ms());
        match forwarded {
            Some(color) => {
                mailbox
                    .send(TrainMessage::Signal(color))
                    .map_err(|_| ControlError::TrainGone(train))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply an operator command and wait until the train has applied it.
    pub async fn command(
        &self,
        train: TrainId,
        command: OperatorCommand,
    ) -> Result<(), ControlError> {
        if command == OperatorCommand::ResetAll {
            self.inner.mailbox(train)?;
            self.reset_all().await;
            return Ok(());
        }
        let mailbox = self.inner.mailbox(train)?;
        let (reply, result) = oneshot::channel();
        mailbox
            .send(TrainMessage::Command { command, reply })
            .map_err(|_| ControlError::TrainGone(train))?;
        result.await.map_err(|_| ControlError::TrainGone(train))?
    }

    /// Current state of one train.
    pub async fn snapshot(&self, train: TrainId) -> Result<TrainSnapshot, ControlError> {
        let mailbox = self.inner.mailbox(train)?;
        let (reply, snapshot) = oneshot::channel();
        mailbox
            .send(TrainMessage::Snapshot { reply })
            .map_err(|_| ControlError::TrainGone(train))?;
        snapshot.await.map_err(|_| ControlError::TrainGone(train))
    }

    /// Stop every train, switch all to manual, reset their tracking to the
    /// home station and clear every sector and crossing claim.
    pub async fn emergency_stop(&self) {
        warn!("emergency stop requested");
        self.inner.emergency_stop().await;
    }

    /// Emergency stop plus a fresh debounce history.
    pub async fn reset_all(&self) {
        self.inner.emergency_stop().await;
        lock(&self.inner.filter).reset();
        info!("all trains reset");
    }

    /// Stop every train actor and the escalation watch.
    pub async fn shutdown(self) {
        let handles: Vec<_> = std::mem::take(&mut *lock(&self.inner.trains))
            .into_iter()
            .collect();
        for (id, handle) in handles {
            let _ = handle.mailbox.send(TrainMessage::Shutdown);
            if let Err(e) = handle.task.await {
                error!(train = %id, error = %e, "train task failed");
            }
        }
        self.watch.abort();
    }
}

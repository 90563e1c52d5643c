//! Guarded command dispatch.
//!
//! Physical controllers behind the store execute one command at a time and signal this through a
//! guard variable: it holds an idle sentinel while the controller is ready and something else
//! while a command is being executed. Before writing a command the dispatcher reads the guard
//! and refuses to write if the controller is busy, or if the device already reports the state
//! the operator is asking for.
//!
//! The guard read and the command write are two separate store operations. Another console
//! session can slip a command in between them; the store offers no transactions to close that
//! window. The guard reduces command races, it does not rule them out.

use crate::connection::{self, Store};
use crate::console::Event;
use crate::schema::VariableKey;
use crate::value::{self, RawValue};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::broadcast::Sender;
use tracing::{debug, error, info, warn};

/// The interlock checked before a command is written.
#[derive(Clone, Debug)]
pub struct Guard {
    pub key: VariableKey,
    /// The value the guard holds while the controller accepts commands.
    pub idle: RawValue,
    /// Shown to the operator when the controller is busy.
    pub busy_label: Cow<'static, str>,
    pub state: Option<StateCheck>,
}

/// Compares the device's reported state with the state a command requests.
#[derive(Clone, Debug)]
pub struct StateCheck {
    pub key: VariableKey,
    pub requested: RawValue,
}

/// A command issued by a single operator action.
#[derive(Clone, Debug, Default)]
pub struct CommandSpec {
    pub guard: Option<Guard>,
    /// Written in this order, as one batch.
    pub writes: Vec<(VariableKey, RawValue)>,
}

impl CommandSpec {
    pub fn unguarded(writes: Vec<(VariableKey, RawValue)>) -> Self {
        Self { guard: None, writes }
    }

    pub fn guarded(guard: Guard, writes: Vec<(VariableKey, RawValue)>) -> Self {
        Self { guard: Some(guard), writes }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardState {
    /// The controller is ready and the command would change something.
    Idle,
    /// The controller is still executing an earlier command.
    Busy,
    /// The controller is ready, but the device already is in the requested state.
    Mismatch,
}

impl Guard {
    /// Classify the values read for this guard. `state` is the value read for
    /// [`Guard::state`], if there is one.
    pub fn evaluate(&self, guard: &RawValue, state: Option<&RawValue>) -> GuardState {
        if !value::loosely_equal(guard, &self.idle) {
            return GuardState::Busy;
        }
        match (&self.state, state) {
            (Some(check), Some(current)) if value::loosely_equal(current, &check.requested) => {
                GuardState::Mismatch
            }
            _ => GuardState::Idle,
        }
    }

    fn keys(&self) -> Vec<VariableKey> {
        let mut keys = vec![self.key.clone()];
        keys.extend(self.state.as_ref().map(|s| s.key.clone()));
        keys
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    #[error("command in progress")]
    InProgress { busy_label: Cow<'static, str> },
    #[error("already in requested state")]
    AlreadyInState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected(Rejection),
}

#[derive(thiserror::Error, Clone, Debug)]
pub enum Error {
    #[error("could not read the command guard")]
    GuardRead(#[source] Arc<connection::Error>),
    #[error("could not write the command")]
    Write(#[source] Arc<connection::Error>),
}

pub struct Dispatcher<S> {
    store: Arc<S>,
    events: Sender<Event>,
}

impl<S: Store> Dispatcher<S> {
    pub fn new(store: Arc<S>, events: Sender<Event>) -> Self {
        Self { store, events }
    }

    /// Arbitrate and, if allowed, write `cmd`.
    ///
    /// Rejections and failures are returned to the caller and also broadcast as events.
    pub async fn dispatch(&self, cmd: &CommandSpec) -> Result<Outcome, Error> {
        let result = self.arbitrate(cmd).await;
        match &result {
            Ok(Outcome::Accepted) => {
                info!(message = "command accepted", writes = cmd.writes.len());
            }
            Ok(Outcome::Rejected(rejection)) => {
                warn!(message = "command rejected", reason = %rejection);
                let event = Event::CommandRejected(rejection.clone());
                let _ignore_no_receivers = self.events.send(event);
            }
            Err(e) => {
                error!(message = "command failed", error = (e as &dyn std::error::Error));
                let _ignore_no_receivers = self.events.send(Event::CommandFailed(e.clone()));
            }
        }
        result
    }

    async fn arbitrate(&self, cmd: &CommandSpec) -> Result<Outcome, Error> {
        if let Some(guard) = &cmd.guard {
            let keys = guard.keys();
            let values = self
                .store
                .read_batch(&keys)
                .await
                .map_err(|e| Error::GuardRead(Arc::new(e)))?;
            let Some(current) = values.first().filter(|_| values.len() == keys.len()) else {
                let e = connection::Error::Misaligned { requested: keys.len(), got: values.len() };
                return Err(Error::GuardRead(Arc::new(e)));
            };
            let state = guard.evaluate(current, values.get(1));
            debug!(message = "evaluated guard", key = %guard.key, ?state);
            match state {
                GuardState::Busy => {
                    return Ok(Outcome::Rejected(Rejection::InProgress {
                        busy_label: guard.busy_label.clone(),
                    }));
                }
                GuardState::Mismatch => return Ok(Outcome::Rejected(Rejection::AlreadyInState)),
                GuardState::Idle => {}
            }
        }
        let (keys, values): (Vec<_>, Vec<_>) = cmd.writes.iter().cloned().unzip();
        self.store.write_batch(&keys, &values).await.map_err(|e| Error::Write(Arc::new(e)))?;
        Ok(Outcome::Accepted)
    }
}

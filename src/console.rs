//! A console session: one page polled by one [`Scheduler`] plus a [`Dispatcher`] for the page's
//! commands, both reporting on a shared event channel.

use crate::connection::{self, Store};
use crate::decode::DecodedRecord;
use crate::dispatch::{self, CommandSpec, Dispatcher, Outcome, Rejection};
use crate::schema::{ArgumentError, PageSchema};
use crate::scheduler::{Latest, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub enum Event {
    /// A poll cycle completed and replaced the latest record.
    RecordPublished(Arc<DecodedRecord>),
    /// A poll cycle's batched read failed. The loop keeps going.
    ReadFailed(Arc<connection::Error>),
    CommandRejected(Rejection),
    CommandFailed(dispatch::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("page `{page}` has no command named `{command}`")]
    UnknownCommand { page: &'static str, command: String },
    #[error(transparent)]
    Arguments(#[from] ArgumentError),
    #[error(transparent)]
    Dispatch(#[from] dispatch::Error),
}

pub struct Console<S> {
    scheduler: Scheduler<S>,
    dispatcher: Dispatcher<S>,
    events: broadcast::Sender<Event>,
}

impl<S: Store> Console<S> {
    pub fn new(store: Arc<S>, page: &'static PageSchema) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            scheduler: Scheduler::new(Arc::clone(&store), page, events.clone()),
            dispatcher: Dispatcher::new(store, events.clone()),
            events,
        }
    }

    pub fn page(&self) -> &'static PageSchema {
        self.scheduler.page()
    }

    pub fn start(&self, interval: Duration) {
        self.scheduler.start(interval)
    }

    pub fn stop(&self) {
        self.scheduler.stop()
    }

    pub fn poll_once(&self) {
        self.scheduler.poll_once()
    }

    pub fn latest(&self) -> Latest {
        self.scheduler.latest()
    }

    pub fn records(&self) -> watch::Receiver<Latest> {
        self.scheduler.records()
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub async fn dispatch(&self, cmd: &CommandSpec) -> Result<Outcome, dispatch::Error> {
        self.dispatcher.dispatch(cmd).await
    }

    /// Dispatch the page command called `name` with the operator's `args`.
    ///
    /// An accepted command is followed by an immediate poll so that its effect shows up without
    /// waiting for the next scheduled cycle.
    pub async fn send<A: AsRef<str>>(&self, name: &str, args: &[A]) -> Result<Outcome, Error> {
        let page = self.page();
        let entry = page.command(name).ok_or_else(|| Error::UnknownCommand {
            page: page.name,
            command: name.to_string(),
        })?;
        let cmd = entry.with_args(args)?;
        let outcome = self.dispatch(&cmd).await?;
        if outcome == Outcome::Accepted {
            self.poll_once();
        }
        Ok(outcome)
    }
}

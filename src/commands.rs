fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

pub mod keys {
    use crate::output;
    use crate::pages::Page;
    use crate::schema::{PageSchema, VariableSpec};

    /// Search and output the store keys read by the console pages.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Only list the keys of this page.
        page: Option<Page>,
        /// Only list fields whose name or key contains this text.
        filter: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the key listing")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct KeyRow {
        pub page: &'static str,
        pub field: &'static str,
        pub key: String,
        pub kind: String,
    }

    impl KeyRow {
        fn new(page: &PageSchema, variable: &VariableSpec) -> Self {
            KeyRow {
                page: page.name,
                field: variable.name,
                key: variable.key.to_string(),
                kind: variable.kind.name().into_owned(),
            }
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_lowercase();
            self.field.contains(&pattern) || self.key.to_lowercase().contains(&pattern)
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let pages: Box<dyn Iterator<Item = &'static PageSchema>> = match args.page {
            Some(page) => Box::new(std::iter::once(page.schema())),
            None => Box::new(Page::all()),
        };
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output.table_headers(vec!["Page", "Field", "Key", "Kind"]).map_err(Error::Output)?;
        for page in pages {
            for variable in page.variables {
                let row = KeyRow::new(page, variable);
                if let Some(pattern) = &args.filter {
                    if !row.is_match(pattern) {
                        continue;
                    }
                }
                output
                    .result(
                        || {
                            vec![
                                row.page.to_string(),
                                row.field.to_string(),
                                row.key.clone(),
                                row.kind.clone(),
                            ]
                        },
                        || &row,
                    )
                    .map_err(Error::Output)?;
            }
        }
        output.commit().map_err(Error::Output)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn filter_matches_field_or_key() {
            let page = Page::Trolley.schema();
            let row = KeyRow::new(page, page.variable("mean-tension").unwrap());
            assert_eq!(row.kind, "min-max");
            assert!(row.is_match("TENSION"));
            assert!(row.is_match("analogs[0-1]"));
            assert!(!row.is_match("argonne"));
        }
    }
}

pub mod watch {
    use crate::connection::{self, Connection};
    use crate::console::{Console, Event};
    use crate::output;
    use crate::pages::Page;
    use futures::StreamExt as _;
    use std::sync::Arc;
    use tokio_stream::wrappers::BroadcastStream;
    use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

    /// Poll a page periodically and output every record read.
    #[derive(clap::Parser)]
    pub struct Args {
        page: Page,
        /// Time between the end of one read and the start of the next. `0s` reads once.
        #[arg(long, short = 'i', default_value = "500ms")]
        interval: humantime::Duration,
        /// Stop after this many records have been output.
        #[arg(long, short = 'n')]
        cycles: Option<u64>,
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not set up the store connection")]
        Connect(#[source] connection::Error),
        #[error("could not read the page")]
        Read(#[source] Arc<connection::Error>),
        #[error("could not output the records")]
        Output(#[source] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        runtime.block_on(watch(args))
    }

    async fn watch(args: Args) -> Result<(), Error> {
        let interval = *args.interval;
        let cycles = if interval.is_zero() { Some(1) } else { args.cycles };
        let store = Connection::new(args.connection).await.map_err(Error::Connect)?;
        let console = Console::new(Arc::new(store), args.page.schema());
        let mut events = BroadcastStream::new(console.events());
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output.record_headers().map_err(Error::Output)?;
        console.start(interval);
        let mut published = 0;
        while cycles.is_none_or(|c| published < c) {
            let Some(event) = events.next().await else {
                break;
            };
            match event {
                Ok(Event::RecordPublished(record)) => {
                    output.record(&record).map_err(Error::Output)?;
                    output.flush().map_err(Error::Output)?;
                    published += 1;
                }
                // Nothing else is going to be read.
                Ok(Event::ReadFailed(e)) if interval.is_zero() => return Err(Error::Read(e)),
                Ok(_) => {}
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(message = "output fell behind, skipped events", skipped);
                }
            }
        }
        console.stop();
        output.commit().map_err(Error::Output)
    }
}

pub mod poll {
    use crate::connection::{self, Connection};
    use crate::console::{Console, Event};
    use crate::output;
    use crate::pages::Page;
    use futures::StreamExt as _;
    use std::sync::Arc;
    use tokio_stream::wrappers::BroadcastStream;

    /// Read a page once and output the record.
    #[derive(clap::Parser)]
    pub struct Args {
        page: Page,
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not set up the store connection")]
        Connect(#[source] connection::Error),
        #[error("could not read the page")]
        Read(#[source] Arc<connection::Error>),
        #[error("the console shut down before the page was read")]
        Closed,
        #[error("could not output the record")]
        Output(#[source] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = super::runtime().map_err(Error::Runtime)?;
        runtime.block_on(async {
            let store = Connection::new(args.connection).await.map_err(Error::Connect)?;
            let console = Console::new(Arc::new(store), args.page.schema());
            let mut events = BroadcastStream::new(console.events());
            console.poll_once();
            let record = loop {
                match events.next().await {
                    Some(Ok(Event::RecordPublished(record))) => break record,
                    Some(Ok(Event::ReadFailed(e))) => return Err(Error::Read(e)),
                    Some(_) => {}
                    None => return Err(Error::Closed),
                }
            };
            let mut output = args.output.to_output().map_err(Error::Output)?;
            output.record_headers().map_err(Error::Output)?;
            output.record(&record).map_err(Error::Output)?;
            output.commit().map_err(Error::Output)
        })
    }
}

pub mod send {
    use crate::connection::{self, Connection};
    use crate::console::{self, Console, Event};
    use crate::dispatch::{Outcome, Rejection};
    use crate::output;
    use crate::pages::Page;
    use crate::schema::ArgumentError;
    use futures::StreamExt as _;
    use std::sync::Arc;
    use tokio_stream::wrappers::BroadcastStream;

    /// Send one of a page's commands to the equipment and output the page as read right after.
    #[derive(clap::Parser)]
    pub struct Args {
        page: Page,
        command: String,
        /// Values for the command's parameters, in order.
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,
        /// Confirm that the command should really be sent.
        #[arg(long)]
        yes: bool,
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("refusing to send `{0}` without `--yes`")]
        NotConfirmed(String),
        #[error("page `{page}` has no command `{command}`, try one of: {available}")]
        UnknownCommand { page: &'static str, command: String, available: String },
        #[error("invalid arguments for `{1}`")]
        Arguments(#[source] ArgumentError, String),
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not set up the store connection")]
        Connect(#[source] connection::Error),
        #[error("could not send `{1}`")]
        Send(#[source] console::Error, String),
        #[error("`{command}` was not sent")]
        Rejected {
            command: String,
            #[source]
            reason: Rejection,
        },
        #[error("could not output the page")]
        Output(#[source] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let page = args.page.schema();
        let Some(entry) = page.command(&args.command) else {
            let available = page.commands.iter().map(|c| c.usage()).collect::<Vec<_>>().join(", ");
            return Err(Error::UnknownCommand { page: page.name, command: args.command, available });
        };
        if let Err(e) = entry.with_args(&args.args) {
            return Err(Error::Arguments(e, args.command));
        }
        if !args.yes {
            return Err(Error::NotConfirmed(args.command));
        }
        let runtime = super::runtime().map_err(Error::Runtime)?;
        runtime.block_on(async {
            let store = Connection::new(args.connection).await.map_err(Error::Connect)?;
            let console = Console::new(Arc::new(store), page);
            let mut events = BroadcastStream::new(console.events());
            match console.send(&args.command, &args.args).await {
                Ok(Outcome::Accepted) => eprintln!("{}: sent `{}`", page.title, args.command),
                Ok(Outcome::Rejected(reason)) => {
                    if let Rejection::InProgress { busy_label } = &reason {
                        eprintln!("{busy_label}");
                    }
                    return Err(Error::Rejected { command: args.command, reason });
                }
                Err(e) => return Err(Error::Send(e, args.command)),
            }
            // The console reads the page again right after an accepted command.
            let record = loop {
                match events.next().await {
                    Some(Ok(Event::RecordPublished(record))) => break record,
                    Some(Ok(Event::ReadFailed(e))) => {
                        tracing::warn!(
                            message = "command was sent, but the page could not be read back",
                            error = (&*e as &dyn std::error::Error)
                        );
                        return Ok(());
                    }
                    Some(_) => {}
                    None => return Ok(()),
                }
            };
            let mut output = args.output.to_output().map_err(Error::Output)?;
            output.record_headers().map_err(Error::Output)?;
            output.record(&record).map_err(Error::Output)?;
            output.commit().map_err(Error::Output)
        })
    }

}

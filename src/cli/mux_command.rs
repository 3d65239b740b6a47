use crate::cli::Command;
use blobmux::{
    BlobmuxError, Consumer, Multiplexer, MuxConfig, MuxOptions, ObjectStore, Result, SessionId,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

pub fn execute_mux(store: Arc<dyn ObjectStore>, config: MuxConfig, cmd: Command) -> Result<()> {
    match cmd {
        Command::New {
            location,
            input,
            overwrite,
        } => execute_new(store, config, &location, input, overwrite),
        Command::Session { location } => {
            let mux = Multiplexer::open(store, &location, config)?;
            println!("{}", mux.create_read_session()?);
            Ok(())
        }
        Command::Drain {
            session,
            limit,
            worker,
        } => execute_drain(store, config, &session, limit, worker),
        Command::Done { session } => {
            let session: SessionId = session.parse()?;
            let mux = Multiplexer::from_session(store, &session, config)?;
            println!("{}", mux.done(&session)?);
            Ok(())
        }
        Command::Stat { session } => {
            let session: SessionId = session.parse()?;
            let mux = Multiplexer::from_session(store, &session, config)?;
            let state = mux.stat(&session)?;
            let json = serde_json::to_string_pretty(&state)
                .map_err(|e| BlobmuxError::Other(e.to_string()))?;
            println!("{}", json);
            Ok(())
        }
        Command::Destroy { location } => {
            let removed = Multiplexer::destroy_location(store.as_ref(), &location, &config.retry)?;
            if removed == 0 {
                return Err(BlobmuxError::NotFound(location));
            }
            eprintln!("Removed {} object(s) at {}", removed, location);
            Ok(())
        }
        Command::Housekeep { .. } => Err(BlobmuxError::Other(
            "Internal error: housekeep is not a multiplexer command".to_string(),
        )),
    }
}

fn execute_new(
    store: Arc<dyn ObjectStore>,
    config: MuxConfig,
    location: &str,
    input: Option<PathBuf>,
    overwrite: bool,
) -> Result<()> {
    let input: Box<dyn Read> = match input {
        Some(path) => Box::new(File::open(&path).map_err(|e| {
            BlobmuxError::Other(format!("Failed to open input file {}: {}", path.display(), e))
        })?),
        None => Box::new(io::stdin()),
    };

    let mut elements = Vec::new();
    for line in BufReader::new(input).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            elements.push(line);
        }
    }

    let options = MuxOptions::default()
        .with_overwrite(overwrite)
        .with_config(config);
    let mux = Multiplexer::new(store, elements, location, &options)?;
    println!("{}", mux.session_id());
    Ok(())
}

fn execute_drain(
    store: Arc<dyn ObjectStore>,
    config: MuxConfig,
    session: &str,
    limit: Option<usize>,
    worker: Option<String>,
) -> Result<()> {
    let session: SessionId = session.parse()?;
    let mut consumer: Consumer<String> = Consumer::attach(store, &session, &config);
    if let Some(worker) = worker {
        consumer = consumer.with_worker_id(worker);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut drained = 0;
    while limit.map_or(true, |limit| drained < limit) {
        match consumer.next_element()? {
            Some(element) => {
                writeln!(out, "{}", element)?;
                drained += 1;
            }
            None => break,
        }
    }
    out.flush()?;
    Ok(())
}

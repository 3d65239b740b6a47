mod args;
mod housekeep_command;
mod mux_command;

use blobmux::{LocalStore, ObjectStore, Result};
pub use args::{Args, Command};
use std::sync::Arc;
use tracing::debug;

pub fn run(args: Args) -> Result<()> {
    let root = match &args.root {
        Some(root) => root.clone(),
        None => LocalStore::default_root()?,
    };
    debug!("Using store root: {}", root.display());
    let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(root));
    let config = args.mux_config();

    match args.command {
        cmd @ Command::Housekeep { .. } => housekeep_command::execute_housekeep(store.as_ref(), cmd),
        cmd => mux_command::execute_mux(store, config, cmd),
    }
}

use crate::cli::Command;
use blobmux::housekeep::{clean_stale_locks, CleanLockConfig};
use blobmux::{BlobmuxError, ObjectStore, Result};

pub fn execute_housekeep(store: &dyn ObjectStore, cmd: Command) -> Result<()> {
    let Command::Housekeep { prefix, dry_run } = cmd else {
        return Err(BlobmuxError::Other(
            "Internal error: expected Housekeep command".to_string(),
        ));
    };

    let config = CleanLockConfig { dry_run };
    let cleaned = clean_stale_locks(store, &prefix, &config)?;

    for key in &cleaned {
        println!(
            "{}{}",
            if dry_run {
                "[DRY RUN] Would delete: "
            } else {
                "Deleted: "
            },
            key
        );
    }
    eprintln!("Cleaned {} lock record(s)", cleaned.len());

    Ok(())
}

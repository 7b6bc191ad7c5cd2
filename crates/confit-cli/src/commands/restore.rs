use super::{confirm, json_pretty, Context, EXIT_ABORTED, EXIT_SUCCESS};
use confit_backup::{BackupLayout, BackupStore, Snapshot};
use confit_engine::EngineLock;
use std::path::Path;

pub fn run(ctx: &Context, reference: &str) -> Result<u8, String> {
    let store = BackupStore::new(BackupLayout::new(&ctx.backup_dir));
    let snapshot = resolve(&store, reference)?;

    if !confirm(
        ctx,
        &format!(
            "restore host state from snapshot {} ({})?",
            snapshot.id, snapshot.operation
        ),
    )? {
        eprintln!("aborted; nothing was changed");
        return Ok(EXIT_ABORTED);
    }

    // Same exclusion rule as transactions: never restore under a
    // concurrent mutation.
    let _lock =
        EngineLock::acquire(&store.layout().lock_file()).map_err(|e| e.to_string())?;
    store.restore(&snapshot).map_err(|e| e.to_string())?;

    if ctx.json {
        println!(
            "{}",
            json_pretty(&serde_json::json!({
                "restored": snapshot.id,
                "operation": snapshot.operation,
            }))?
        );
    } else {
        println!("restored snapshot {} ({})", snapshot.id, snapshot.operation);
    }
    Ok(EXIT_SUCCESS)
}

/// Accepts a snapshot id (unique prefix is enough) or a path to a
/// snapshot directory.
fn resolve(store: &BackupStore, reference: &str) -> Result<Snapshot, String> {
    let as_path = Path::new(reference);
    if as_path.is_dir() {
        return BackupStore::load(as_path).map_err(|e| e.to_string());
    }

    let snapshots = store.list(None).map_err(|e| e.to_string())?;
    let matches: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|s| s.id.starts_with(reference))
        .collect();
    match matches.len() {
        0 => Err(format!("no snapshot matching '{reference}'")),
        1 => Ok(matches[0].clone()),
        n => Err(format!("ambiguous snapshot id '{reference}': {n} matches")),
    }
}

use super::{json_pretty, Context, EXIT_SUCCESS};
use confit_backup::{BackupLayout, BackupStore};
use confit_engine::load_result;

pub fn run(ctx: &Context, operation: Option<&str>) -> Result<u8, String> {
    let store = BackupStore::new(BackupLayout::new(&ctx.backup_dir));
    let snapshots = store.list(operation).map_err(|e| e.to_string())?;

    if ctx.json {
        let mut entries = Vec::new();
        for snapshot in &snapshots {
            let outcome = load_result(&snapshot.dir)
                .map_err(|e| e.to_string())?
                .map(|r| r.outcome);
            entries.push(serde_json::json!({
                "id": snapshot.id,
                "operation": snapshot.operation,
                "created_at": snapshot.created_at,
                "dir": snapshot.dir,
                "outcome": outcome,
            }));
        }
        println!("{}", json_pretty(&entries)?);
    } else if snapshots.is_empty() {
        match operation {
            Some(op) => println!("no snapshots for {op}"),
            None => println!("no snapshots"),
        }
    } else {
        for snapshot in &snapshots {
            let outcome = load_result(&snapshot.dir)
                .map_err(|e| e.to_string())?
                .map_or_else(|| "unknown".to_owned(), |r| r.outcome.to_string());
            println!(
                "{}  {:<14} {}  ({outcome})",
                snapshot.created_at, snapshot.operation, snapshot.id
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

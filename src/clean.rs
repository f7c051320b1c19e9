use crate::tree::{ProtectedNames, Snapshot, SnapshotTree, parse_listing};
use crate::utils;
use crate::vbox::Vbox;
use anyhow::{Context, Result, bail};
use log::{debug, info};

const DEFAULT_PROTECTED: &str = "clean,done";

#[derive(clap::Parser)]
pub struct Clean {
    /// Name of the VM to clean up
    pub vm_name: String,
    /// Snapshot to delete, together with its children recursively.
    /// Leave empty to clean the whole snapshot tree
    #[arg(short = 'r', long, default_value = "")]
    pub root_snapshot: String,
    /// Comma-separated substrings; snapshots whose name contains any of
    /// them (case insensitive) are kept. Pass "" to protect nothing
    #[arg(short = 'p', long)]
    pub protected_snapshots: Option<String>,
    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl Clean {
    pub fn execute(self, vbox: &Vbox, config_protected: Option<Vec<String>>) -> Result<()> {
        let protected = match self.protected_snapshots {
            Some(arg) => ProtectedNames::parse(&arg),
            None => match config_protected {
                Some(entries) => ProtectedNames::new(entries),
                None => ProtectedNames::parse(DEFAULT_PROTECTED),
            },
        };

        let listing = vbox.list_snapshots(&self.vm_name)?;
        let tree = SnapshotTree::new(parse_listing(&listing).snapshots);
        if tree.is_empty() {
            bail!("Found no snapshots for VM '{}'", self.vm_name);
        }
        let plan = tree
            .cleanup_plan(&self.root_snapshot, &protected)
            .context(format!(
                "Could not select snapshots to delete for '{}'",
                self.vm_name
            ))?;

        if plan.root_blocked {
            println!("Root snapshot cannot be deleted as a child snapshot is protected");
        }
        if plan.doomed.is_empty() {
            println!("{} is clean, nothing to delete", self.vm_name);
            return Ok(());
        }

        println!("Cleaning {}, snapshots to delete:", self.vm_name);
        for snapshot in &plan.doomed {
            println!("  {}", snapshot.name);
        }

        let state = vbox.vm_state(&self.vm_name)?;
        if state.is_stable() {
            debug!("VM state: {state}");
        } else {
            println!("\nVM state: {state}");
            println!("Warning: snapshot deletion is slower in a running VM and may fail in a changing state");
        }

        if !self.yes && !utils::confirm("\nConfirm deletion (press 'y'): ")? {
            println!("Aborted, no snapshots deleted");
            return Ok(());
        }

        println!("\nDeleting... (this may take some time)");
        let failures = delete_batch(&plan.doomed, |name| {
            vbox.delete_snapshot(&self.vm_name, name)
        });
        if failures > 0 {
            bail!("{failures} snapshot(s) could not be deleted");
        }
        Ok(())
    }
}

/// Deletes every snapshot in plan order. A failed deletion is reported and
/// counted; the remaining snapshots are still attempted.
fn delete_batch(doomed: &[Snapshot], mut delete: impl FnMut(&str) -> Result<()>) -> usize {
    let mut failures = 0usize;
    for snapshot in doomed {
        info!("Deleting snapshot '{}'", snapshot.name);
        match delete(&snapshot.name) {
            Ok(()) => println!("  DELETED '{}'", snapshot.name),
            Err(e) => {
                failures += 1;
                println!("  ERROR '{}': {e:#}", snapshot.name);
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn deletion_failure_does_not_stop_the_batch() {
        let doomed = parse_listing(
            "SnapshotName=\"base\"\n\
             SnapshotName-1=\"busy\"\n\
             SnapshotName-2=\"stale\"\n",
        )
        .snapshots;

        let mut attempted = Vec::new();
        let failures = delete_batch(&doomed, |name| {
            attempted.push(name.to_string());
            if name == "busy" {
                Err(anyhow!("session is locked"))
            } else {
                Ok(())
            }
        });

        assert_eq!(attempted, ["base", "busy", "stale"]);
        assert_eq!(failures, 1);
    }

    #[test]
    fn clean_batch_reports_no_failures() {
        let doomed = parse_listing("SnapshotName=\"base\"\n").snapshots;
        let failures = delete_batch(&doomed, |_| Ok(()));
        assert_eq!(failures, 0);
    }
}

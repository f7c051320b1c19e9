use crate::tree::{Listing, SnapshotTree, parse_listing};
use crate::vbox::Vbox;
use anyhow::{Result, bail};
use log::info;

#[derive(clap::Parser)]
pub struct List {
    /// Name of the VM whose snapshot tree to print
    pub vm_name: String,
}

impl List {
    pub fn execute(self, vbox: &Vbox) -> Result<()> {
        info!("Listing snapshots of {}", self.vm_name);
        let Listing { snapshots, current } = parse_listing(&vbox.list_snapshots(&self.vm_name)?);
        let tree = SnapshotTree::new(snapshots);
        if tree.is_empty() {
            bail!("Found no snapshots for VM '{}'", self.vm_name);
        }
        for (depth, snapshot) in tree.walk() {
            let marker = if current.as_ref() == Some(&snapshot.id) {
                " *"
            } else {
                ""
            };
            println!("{}{}{}", "  ".repeat(depth), snapshot.name, marker);
        }
        Ok(())
    }
}

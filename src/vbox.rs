use anyhow::{Context, Result, bail};
use log::debug;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

/// Wrapper around the VBoxManage command-line tool.
pub struct Vbox {
    program: PathBuf,
}

impl Vbox {
    pub fn new(program: Option<PathBuf>) -> Self {
        Self {
            program: program.unwrap_or_else(|| PathBuf::from("VBoxManage")),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        debug!("Running {} {}", self.program.display(), args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .context(format!("Failed to run {}", self.program.display()))?;
        if !output.status.success() {
            bail!(
                "{} {} failed: {}",
                self.program.display(),
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn list_snapshots(&self, vm_name: &str) -> Result<String> {
        self.run(&["snapshot", vm_name, "list", "--machinereadable"])
            .context(format!("Failed to list snapshots of '{vm_name}'"))
    }

    pub fn delete_snapshot(&self, vm_name: &str, snapshot_name: &str) -> Result<()> {
        self.run(&["snapshot", vm_name, "delete", snapshot_name])
            .context(format!("Failed to delete snapshot '{snapshot_name}'"))?;
        Ok(())
    }

    pub fn vm_state(&self, vm_name: &str) -> Result<VmState> {
        let info = self
            .run(&["showvminfo", vm_name, "--machinereadable"])
            .context(format!("Failed to query state of '{vm_name}'"))?;
        parse_vm_state(&info)
    }
}

/// Coarse VM state from `showvminfo`; transitional states are carried
/// through verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VmState {
    PoweredOff,
    Saved,
    Running,
    Other(String),
}

impl VmState {
    /// Snapshot deletion is only reliable when the VM is not live.
    pub fn is_stable(&self) -> bool {
        matches!(self, VmState::PoweredOff | VmState::Saved)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::PoweredOff => f.write_str("poweroff"),
            VmState::Saved => f.write_str("saved"),
            VmState::Running => f.write_str("running"),
            VmState::Other(tag) => f.write_str(tag),
        }
    }
}

fn parse_vm_state(info: &str) -> Result<VmState> {
    for line in info.lines() {
        if let Some(rest) = line.strip_prefix("VMState=") {
            let tag = rest.trim().trim_matches('"');
            return Ok(match tag {
                "poweroff" => VmState::PoweredOff,
                "saved" => VmState::Saved,
                "running" => VmState::Running,
                other => VmState::Other(other.to_string()),
            });
        }
    }
    bail!("No VMState in showvminfo output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vm_state_line() {
        let info = "name=\"FLARE-VM\"\nVMState=\"poweroff\"\nVMStateChangeTime=\"2024-06-04\"\n";
        assert_eq!(parse_vm_state(info).unwrap(), VmState::PoweredOff);
        assert_eq!(
            parse_vm_state("VMState=\"saved\"\n").unwrap(),
            VmState::Saved
        );
        assert_eq!(
            parse_vm_state("VMState=\"running\"\n").unwrap(),
            VmState::Running
        );
    }

    #[test]
    fn transitional_states_are_not_stable() {
        let state = parse_vm_state("VMState=\"restoring\"\n").unwrap();
        assert_eq!(state, VmState::Other("restoring".to_string()));
        assert!(!state.is_stable());
        assert!(VmState::PoweredOff.is_stable());
        assert!(VmState::Saved.is_stable());
        assert!(!VmState::Running.is_stable());
    }

    #[test]
    fn missing_vm_state_is_an_error() {
        assert!(parse_vm_state("name=\"FLARE-VM\"\n").is_err());
    }
}

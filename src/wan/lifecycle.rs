//! WAN lifecycle state machine
//!
//! Type-safe state machine for the uplink status using the state-machines
//! crate, in dynamic mode so it can be rebuilt from the persisted status.

use crate::error::Error;
use crate::store::ModuleStatus;
use state_machines::state_machine;
use std::fmt;

state_machine! {
    name: WanMachine,
    dynamic: true,
    initial: Inactive,
    states: [Inactive, Pending, Active],
    events {
        negotiate {
            transition: { from: [Inactive, Active], to: Pending }
        }
        confirm {
            transition: { from: Pending, to: Active }
        }
        configure {
            transition: { from: [Inactive, Pending], to: Active }
        }
        deactivate {
            transition: { from: [Pending, Active], to: Inactive }
        }
    }
}

/// Lifecycle events of the uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WanEvent {
    /// DHCP client launched, lease not yet confirmed
    Negotiate,
    /// Background verification saw a complete lease
    Confirm,
    /// Static addressing applied and verified
    Configure,
    /// Stopped, failed or superseded
    Deactivate,
}

impl WanEvent {
    fn target(self) -> ModuleStatus {
        match self {
            WanEvent::Negotiate => ModuleStatus::Pending,
            WanEvent::Confirm | WanEvent::Configure => ModuleStatus::Active,
            WanEvent::Deactivate => ModuleStatus::Inactive,
        }
    }

    fn machine_event(self) -> WanMachineEvent {
        match self {
            WanEvent::Negotiate => WanMachineEvent::Negotiate,
            WanEvent::Confirm => WanMachineEvent::Confirm,
            WanEvent::Configure => WanMachineEvent::Configure,
            WanEvent::Deactivate => WanMachineEvent::Deactivate,
        }
    }
}

impl fmt::Display for WanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WanEvent::Negotiate => "negotiate",
            WanEvent::Confirm => "confirm",
            WanEvent::Configure => "configure",
            WanEvent::Deactivate => "deactivate",
        };
        f.write_str(s)
    }
}

/// Uplink lifecycle rebuilt from a persisted status
pub struct WanLifecycle {
    machine: DynamicWanMachine<()>,
}

impl WanLifecycle {
    pub fn from_status(status: ModuleStatus) -> Self {
        let mut machine = WanMachine::new(()).into_dynamic();
        match status {
            ModuleStatus::Inactive => {}
            ModuleStatus::Pending => {
                machine.handle(WanMachineEvent::Negotiate).ok();
            }
            ModuleStatus::Active => {
                machine.handle(WanMachineEvent::Configure).ok();
            }
        }
        Self { machine }
    }

    pub fn status(&self) -> ModuleStatus {
        match self.machine.current_state() {
            "Active" => ModuleStatus::Active,
            "Pending" => ModuleStatus::Pending,
            _ => ModuleStatus::Inactive,
        }
    }

    /// Apply an event and return the resulting status
    ///
    /// Re-entering the current state is a no-op, except `Confirm`, which
    /// only ever leaves `Pending`.
    pub fn apply(&mut self, event: WanEvent) -> crate::error::Result<ModuleStatus> {
        let from = self.status();
        if from == event.target() && event != WanEvent::Confirm {
            return Ok(from);
        }
        self.machine
            .handle(event.machine_event())
            .map_err(|e| {
                Error::StateConflict(format!("cannot {} WAN while {}: {:?}", event, from, e))
            })?;
        Ok(self.status())
    }
}

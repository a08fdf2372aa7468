//! Impairment controller.
//!
//! Installs a profile as a root netem qdisc on a container interface and
//! removes it again. At most one profile may be active per interface:
//! `apply()` refuses an interface that already carries a profile (in the
//! controller's registry or in the kernel) until `clear()` has run.
//!
//! `clear()` is idempotent; clearing a clean interface succeeds.

use crate::backend::{ContainerBackend, ExecResult};
use crate::error::ImpairmentError;
use crate::netem::{parse_qdisc_show, tc_del_args, tc_show_args, NetemCommand, QdiscState};
use crate::topology::InterfaceHandle;
use async_trait::async_trait;
use bench_types::NetworkConditionProfile;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Runs `tc` against an interface.
#[async_trait]
pub trait ImpairmentBackend: Send + Sync {
    /// Run `tc <args>` in the namespace of `target`.
    async fn run_tc(
        &self,
        target: &InterfaceHandle,
        args: Vec<String>,
    ) -> Result<ExecResult, ImpairmentError>;
}

/// Runs `tc` inside the target's container through a [`ContainerBackend`].
pub struct ContainerTcBackend {
    backend: Arc<dyn ContainerBackend>,
}

impl ContainerTcBackend {
    /// Wrap a container backend.
    pub fn new(backend: Arc<dyn ContainerBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ImpairmentBackend for ContainerTcBackend {
    async fn run_tc(
        &self,
        target: &InterfaceHandle,
        args: Vec<String>,
    ) -> Result<ExecResult, ImpairmentError> {
        let mut cmd = Vec::with_capacity(args.len() + 1);
        cmd.push("tc".to_string());
        cmd.extend(args);
        Ok(self.backend.exec(&target.container, cmd).await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Applying(NetworkConditionProfile),
    Active(NetworkConditionProfile),
}

impl Slot {
    fn profile(&self) -> NetworkConditionProfile {
        match self {
            Slot::Applying(p) | Slot::Active(p) => *p,
        }
    }
}

/// Applies and clears profiles, one per interface at a time.
pub struct ImpairmentController {
    backend: Arc<dyn ImpairmentBackend>,
    queue_limit: Option<u32>,
    slots: Mutex<HashMap<InterfaceHandle, Slot>>,
}

impl ImpairmentController {
    /// Create a controller over an impairment backend.
    pub fn new(backend: Arc<dyn ImpairmentBackend>) -> Self {
        Self {
            backend,
            queue_limit: None,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Pass a netem queue limit (packets) with every apply.
    pub fn with_queue_limit(mut self, packets: Option<u32>) -> Self {
        self.queue_limit = packets;
        self
    }

    /// Install `profile` on `target`.
    ///
    /// Fails with [`ImpairmentError::AlreadyActive`] or
    /// [`ImpairmentError::NotClean`] if a profile or foreign qdisc is
    /// present, and [`ImpairmentError::CommandFailed`] if `tc` exits non-zero.
    pub async fn apply(
        &self,
        target: &InterfaceHandle,
        profile: &NetworkConditionProfile,
    ) -> Result<(), ImpairmentError> {
        {
            let mut slots = self.slots();
            if let Some(slot) = slots.get(target) {
                return Err(ImpairmentError::AlreadyActive {
                    target: target.to_string(),
                    profile: slot.profile().label(),
                });
            }
            slots.insert(target.clone(), Slot::Applying(*profile));
        }

        let result = self.install(target, profile).await;

        let mut slots = self.slots();
        match &result {
            Ok(()) => {
                slots.insert(target.clone(), Slot::Active(*profile));
            }
            Err(_) => {
                slots.remove(target);
            }
        }
        result
    }

    /// Remove any qdisc from `target`. Clearing a clean interface is a no-op.
    pub async fn clear(&self, target: &InterfaceHandle) -> Result<(), ImpairmentError> {
        let del = self.backend.run_tc(target, tc_del_args(&target.interface)).await?;

        if !del.success() {
            // Nothing to delete is fine as long as the interface really is clean.
            if let QdiscState::Installed(qdisc) = self.state(target).await? {
                warn!("Clear failed on {}: {} still installed", target, qdisc);
                return Err(ImpairmentError::ClearFailed {
                    target: target.to_string(),
                    exit_code: del.exit_code,
                    stderr: del.stderr.trim().to_string(),
                });
            }
            debug!("{} was already clean", target);
        } else {
            info!("Cleared impairment on {}", target);
        }

        self.slots().remove(target);
        Ok(())
    }

    /// Probe the kernel qdisc state of `target`.
    pub async fn state(&self, target: &InterfaceHandle) -> Result<QdiscState, ImpairmentError> {
        let show = self.backend.run_tc(target, tc_show_args(&target.interface)).await?;
        if !show.success() {
            return Err(ImpairmentError::CommandFailed {
                target: target.to_string(),
                exit_code: show.exit_code,
                stderr: show.stderr.trim().to_string(),
            });
        }
        Ok(parse_qdisc_show(&show.stdout))
    }

    /// Profile currently applied to `target`, if any.
    pub fn active_profile(&self, target: &InterfaceHandle) -> Option<NetworkConditionProfile> {
        match self.slots().get(target) {
            Some(Slot::Active(p)) => Some(*p),
            _ => None,
        }
    }

    /// Number of interfaces with an applied or in-flight profile.
    pub fn active_count(&self) -> usize {
        self.slots().len()
    }

    async fn install(
        &self,
        target: &InterfaceHandle,
        profile: &NetworkConditionProfile,
    ) -> Result<(), ImpairmentError> {
        if let QdiscState::Installed(qdisc) = self.state(target).await? {
            return Err(ImpairmentError::NotClean {
                target: target.to_string(),
                qdisc,
            });
        }

        let mut cmd = NetemCommand::for_profile(&target.interface, profile);
        if let Some(limit) = self.queue_limit {
            cmd = cmd.limit(limit);
        }
        debug!("{} on {}", cmd.to_tc_command(), target.container);

        let add = self.backend.run_tc(target, cmd.to_tc_add_args()).await?;
        if !add.success() {
            return Err(ImpairmentError::CommandFailed {
                target: target.to_string(),
                exit_code: add.exit_code,
                stderr: add.stderr.trim().to_string(),
            });
        }

        info!("Applied {} on {}", profile, target);
        Ok(())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<InterfaceHandle, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

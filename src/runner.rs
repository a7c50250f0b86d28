//! Lifecycle of a program on a device: delayed start, panic reporting and
//! restarts.

use crate::config::{RunnerConfig, VmConfig};
use crate::env::Environment;
use crate::error::{Result, VmError};
use crate::packet::{DeviceId, Packet};
use crate::vm::Vm;
use jacscript_core::PanicCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Waiting out the start delay; roles are already being bound.
    Initializing,
    Running,
    /// Stopped after a panic.
    Error,
}

/// Drives a [`Vm`] from creation to panic.
///
/// ```ignore
/// let mut runner = Runner::new(&image, env, VmConfig::new(), RunnerConfig::new())?;
/// loop {
///     if let Some(code) = runner.poll()? {
///         eprintln!("program stopped with {code}");
///     }
///     // sleep until runner.next_deadline() or the next packet
/// }
/// ```
pub struct Runner<E: Environment> {
    vm: Vm<E>,
    config: RunnerConfig,
    state: RunnerState,
    start_at: u64,
}

impl<E: Environment> Runner<E> {
    pub fn new(image: &[u8], env: E, vm_config: VmConfig, config: RunnerConfig) -> Result<Self> {
        let vm = Vm::new(image, env, vm_config)?;
        let start_at = vm.env().now() + config.start_delay;
        Ok(Runner {
            vm,
            config,
            state: RunnerState::Initializing,
            start_at,
        })
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn vm(&self) -> &Vm<E> {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm<E> {
        &mut self.vm
    }

    /// Advance the program to the current time. Returns the panic code when
    /// the program stops; a restart request is reported as 0.
    pub fn poll(&mut self) -> Result<Option<u32>> {
        match self.state {
            RunnerState::Error => Ok(None),
            RunnerState::Initializing => {
                let res = self.vm.tick();
                if res.is_err() || self.vm.env().now() < self.start_at {
                    return self.settle(res);
                }
                self.state = RunnerState::Running;
                let res = self.vm.start();
                self.settle(res)
            }
            RunnerState::Running => {
                let res = self.vm.tick();
                self.settle(res)
            }
        }
    }

    pub fn process_packet(&mut self, pkt: Packet) -> Result<Option<u32>> {
        if self.state == RunnerState::Error {
            return Ok(None);
        }
        let res = self.vm.process_packet(pkt);
        self.settle(res)
    }

    pub fn device_connected(&mut self, device: DeviceId) -> Result<Option<u32>> {
        if self.state == RunnerState::Error {
            return Ok(None);
        }
        let res = self.vm.device_connected(device);
        self.settle(res)
    }

    pub fn device_disconnected(&mut self, device: DeviceId) -> Result<Option<u32>> {
        if self.state == RunnerState::Error {
            return Ok(None);
        }
        let res = self.vm.device_disconnected(device);
        self.settle(res)
    }

    /// When [`Runner::poll`] should next be called.
    pub fn next_deadline(&self) -> Option<u64> {
        match self.state {
            RunnerState::Error => None,
            RunnerState::Initializing => Some(
                self.vm
                    .next_deadline()
                    .map_or(self.start_at, |t| t.min(self.start_at)),
            ),
            RunnerState::Running => self.vm.next_deadline(),
        }
    }

    fn settle(&mut self, res: Result<()>) -> Result<Option<u32>> {
        match res {
            Ok(()) => Ok(None),
            Err(VmError::Panic(code)) => {
                let reported = match code {
                    PanicCode::Restart => 0,
                    other => other.code(),
                };
                if code == PanicCode::Restart || self.config.auto_restart {
                    self.restart();
                } else {
                    tracing::info!(code = reported, "program stopped");
                    self.state = RunnerState::Error;
                }
                Ok(Some(reported))
            }
            Err(err @ VmError::Host(_)) => {
                if self.config.auto_restart {
                    self.restart();
                } else {
                    self.state = RunnerState::Error;
                }
                Err(err)
            }
            // the runaway fiber is gone; the rest of the program carries on
            Err(err) => Err(err),
        }
    }

    fn restart(&mut self) {
        tracing::info!(delay = self.config.start_delay, "program restarting");
        self.vm.reset();
        self.state = RunnerState::Initializing;
        self.start_at = self.vm.env().now() + self.config.start_delay;
    }
}

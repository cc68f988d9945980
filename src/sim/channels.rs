// Voltage-gated membrane channels.
//
// Each configured channel runs one state machine per cell:
// closed -> activating -> open -> inactivating -> closed. While open it adds
// its permeability on top of the cell's baseline for the carried ion.
// Inactivation is absolute for its duration; the machine re-arms only after
// the membrane voltage has fallen back below the deactivation level.

use serde::{Deserialize, Serialize};

use crate::config::ChannelConfig;
use crate::ion::Ion;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChannelState {
    Closed,
    /// Time spent activating so far [s].
    Activating(f64),
    /// Time spent open so far [s].
    Open(f64),
    /// Time spent refractory so far [s].
    Inactivating(f64),
}

/// Runtime of one configured channel population across the cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelRuntime {
    pub cfg: ChannelConfig,
    pub ion: Ion,
    pub states: Vec<ChannelState>,
}

impl ChannelRuntime {
    pub fn new(cfg: ChannelConfig, n_cells: usize) -> Self {
        // Config validation resolved the symbol already.
        let ion = Ion::from_symbol(&cfg.ion).unwrap_or(Ion::Na);
        Self {
            cfg,
            ion,
            states: vec![ChannelState::Closed; n_cells],
        }
    }

    /// Advance every state machine by `dt` against the per-cell voltage and
    /// return the open permeability contribution per cell [m/s].
    pub fn step(&mut self, vm_cell: &[f64], dt: f64) -> Vec<f64> {
        let mut perm = vec![0.0f64; vm_cell.len()];
        for (i, state) in self.states.iter_mut().enumerate() {
            let vm = vm_cell[i];
            *state = match *state {
                ChannelState::Closed => {
                    if vm > self.cfg.v_on {
                        ChannelState::Activating(0.0)
                    } else {
                        ChannelState::Closed
                    }
                }
                ChannelState::Activating(t) => {
                    if vm < self.cfg.v_off {
                        // Voltage collapsed before the channel could open.
                        ChannelState::Closed
                    } else if t + dt >= self.cfg.tau_activate {
                        ChannelState::Open(0.0)
                    } else {
                        ChannelState::Activating(t + dt)
                    }
                }
                ChannelState::Open(t) => {
                    if t + dt >= self.cfg.tau_open || vm < self.cfg.v_off {
                        ChannelState::Inactivating(0.0)
                    } else {
                        ChannelState::Open(t + dt)
                    }
                }
                ChannelState::Inactivating(t) => {
                    // Re-arm only once refractory time has passed and the
                    // membrane has repolarised.
                    if t + dt >= self.cfg.tau_inactivate && vm < self.cfg.v_on {
                        ChannelState::Closed
                    } else {
                        ChannelState::Inactivating(t + dt)
                    }
                }
            };
            if matches!(*state, ChannelState::Open(_)) {
                perm[i] = self.cfg.perm_open;
            }
        }
        perm
    }
}

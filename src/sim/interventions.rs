// Scheduled interventions.
//
// Interventions perturb a running simulation inside a time window with a
// smooth on/off envelope: concentration ramps in cells or the environment,
// externally applied voltage, or a one-shot cutting event that wounds the
// cluster.

use serde::{Deserialize, Serialize};

use crate::config::InterventionConfig;
use crate::ion::{Ion, IonSet};
use crate::mesh::Mesh;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum InterventionKind {
    ChangeIonCell,
    ChangeIonEnv,
    ApplyVoltage,
    Cut,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterventionRuntime {
    pub cfg: InterventionConfig,
    pub kind: InterventionKind,
    /// Active-ion index for concentration perturbations.
    pub ion_idx: Option<usize>,
    /// Resolved cell indices; re-resolved after every cutting event.
    pub targets: Vec<usize>,
    /// Cutting events fire exactly once.
    pub fired: bool,
}

fn sigm(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl InterventionRuntime {
    /// Build from a validated config record. Unknown kinds and ions were
    /// already rejected by `Parameters::from_config`.
    pub fn new(cfg: InterventionConfig, ions: &IonSet, mesh: &Mesh) -> Self {
        let kind = match cfg.kind.as_str() {
            "change_ion_env" => InterventionKind::ChangeIonEnv,
            "apply_voltage" => InterventionKind::ApplyVoltage,
            "cut" => InterventionKind::Cut,
            _ => InterventionKind::ChangeIonCell,
        };
        let ion_idx = cfg
            .ion
            .as_deref()
            .and_then(Ion::from_symbol)
            .and_then(|i| ions.index_of(i));
        let targets = mesh.cells_in_target(&cfg.target);
        Self {
            cfg,
            kind,
            ion_idx,
            targets,
            fired: false,
        }
    }

    /// Smooth window weight at time `t`, in [0, 1].
    pub fn envelope(&self, t: f64) -> f64 {
        let ramp = self.cfg.ramp.max(1e-6);
        sigm((t - self.cfg.t_on) / ramp) * sigm((self.cfg.t_off - t) / ramp)
    }

    /// Whether a cutting event is due at `t`.
    pub fn cut_due(&self, t: f64) -> bool {
        self.kind == InterventionKind::Cut && !self.fired && t >= self.cfg.t_on
    }

    /// Re-resolve targets against a rebuilt mesh.
    pub fn retarget(&mut self, mesh: &Mesh) {
        self.targets = mesh.cells_in_target(&self.cfg.target);
    }

    /// Ramp `conc` toward `magnitude * baseline` over one step.
    pub fn ramp_concentration(&self, conc: f64, baseline: f64, t: f64, dt: f64) -> f64 {
        let goal = self.cfg.magnitude * baseline;
        let next = conc + self.cfg.rate * (goal - conc) * self.envelope(t) * dt;
        next.max(0.0)
    }
}

// Raw simulation configuration, loaded from a TOML file.
//
// This is the validated key-value tree the engine is driven by. Nothing in
// the core reads it directly; `Parameters::from_config` turns it into the
// frozen parameter store. The `general` and `world` sections derive
// `PartialEq` because checkpoints embed them for the seed consistency check.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::SimError;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfigFile {
    pub general: GeneralConfig,
    pub world: WorldConfig,
    pub time: TimeConfig,
    pub gap_junctions: GapJunctionConfig,
    pub membrane: MembraneConfig,
    pub pumps: PumpConfig,
    pub deformation: DeformationConfig,
    pub flow: FlowConfig,
    pub tissues: Vec<TissueConfig>,
    pub interventions: Vec<InterventionConfig>,
    pub channels: Vec<ChannelConfig>,
    /// Ion table for the `custom` profile; ignored by the built-in profiles.
    pub custom_ions: Vec<CustomIonConfig>,
    pub grn: GrnConfig,
}

/// One ion of a custom profile. The balancing anion M is always appended
/// automatically and must not be listed here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomIonConfig {
    /// Ion symbol: `Na`, `K`, `Cl`, `Ca`, `H` or `P`.
    pub ion: String,
    /// Environmental concentration [mol/m^3].
    pub conc_env: f64,
    /// Cytosolic concentration [mol/m^3].
    pub conc_cell: f64,
}

impl Default for CustomIonConfig {
    fn default() -> Self {
        Self {
            ion: "Na".into(),
            conc_env: 0.0,
            conc_cell: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// One of `basic`, `basic_ca`, `animal`, `invertebrate`, `custom`.
    pub ion_profile: String,
    /// Model the extracellular space as a discrete grid.
    pub sim_ecm: bool,
    /// Voltage solver: `fast` (equivalent circuit) or `full` (Poisson).
    pub solver: String,
    /// Transparently run a missing upstream phase instead of failing.
    pub auto_init: bool,
    /// Directory for checkpoint files and exports.
    pub out_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            ion_profile: "basic".into(),
            sim_ecm: false,
            solver: "fast".into(),
            auto_init: true,
            out_dir: "tissue_sim_out".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Side length of the square world [m].
    pub world_size: f64,
    /// Radius of a single cell [m].
    pub cell_radius: f64,
    /// Height of a cell in the z-direction [m].
    pub cell_height: f64,
    /// True cell-to-cell spacing [m].
    pub cell_spacing: f64,
    /// Lattice disorder in [0, 1).
    pub lattice_disorder: f64,
    /// Temperature [K].
    pub temperature: f64,
    /// Fraction of the world size kept when cropping the cluster to a disc.
    pub crop_fraction: f64,
    /// Seed for the lattice-perturbation RNG, for reproducible clusters.
    pub rng_seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_size: 150e-6,
            cell_radius: 5e-6,
            cell_height: 10e-6,
            cell_spacing: 26e-9,
            lattice_disorder: 0.4,
            temperature: 310.0,
            crop_fraction: 0.4,
            rng_seed: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// World time simulated by the `init` phase [s].
    pub time4init: f64,
    /// World time simulated by the `sim` phase [s].
    pub time4sim: f64,
    /// Optional overrides of the built-in per-phase profiles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_init: Option<CustomTimeProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_sim: Option<CustomTimeProfile>,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            time4init: 5.0,
            time4sim: 5.0,
            custom_init: None,
            custom_sim: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomTimeProfile {
    /// Integration step [s].
    pub dt: f64,
    /// Total simulated time [s].
    pub total_time: f64,
    /// Interval between history samples [s].
    pub sampling: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GapJunctionConfig {
    /// Transjunctional voltage at which junctions begin to close [V].
    pub voltage_threshold: f64,
    /// Width of the closing transition window [V].
    pub voltage_window: f64,
    /// Minimum open fraction of a fully gated junction.
    pub min_open: f64,
    /// Fraction of membrane surface area occupied by junction pores.
    pub surface_fraction: f64,
    /// Gate junctions on transjunctional voltage at all.
    pub voltage_gated: bool,
}

impl Default for GapJunctionConfig {
    fn default() -> Self {
        Self {
            voltage_threshold: 60e-3,
            voltage_window: 15e-3,
            min_open: 0.1,
            surface_fraction: 0.05,
            voltage_gated: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MembraneConfig {
    /// Membrane permeability to Na [m/s].
    pub dm_na: f64,
    /// Membrane permeability to K [m/s].
    pub dm_k: f64,
    /// Membrane permeability to Cl [m/s].
    pub dm_cl: f64,
    /// Membrane permeability to Ca [m/s].
    pub dm_ca: f64,
    /// Membrane permeability to H [m/s].
    pub dm_h: f64,
    /// Membrane permeability to proteins [m/s].
    pub dm_p: f64,
    /// Membrane permeability to the balancing anion [m/s].
    pub dm_m: f64,
}

impl Default for MembraneConfig {
    fn default() -> Self {
        // Default tissue permeabilities, same relative ordering as the
        // mammalian resting membrane (K >> Na).
        Self {
            dm_na: 1.0e-10,
            dm_k: 1.5e-9,
            dm_cl: 2.0e-10,
            dm_ca: 1.0e-11,
            dm_h: 1.0e-10,
            dm_p: 0.0,
            dm_m: 1.0e-10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Maximum Na/K-ATPase rate constant per unit membrane area.
    pub alpha_nak: f64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self { alpha_nak: 1.0e-8 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeformationConfig {
    pub enabled: bool,
    /// Solve the full time-dependent elasticity equation instead of the
    /// steady-state form.
    pub time_dependent: bool,
    /// `fixed` (zero displacement on every boundary cell) or `pinned`
    /// (single fixed boundary point).
    pub boundary: String,
    /// Include osmotic/hydrostatic body forces.
    pub osmotic: bool,
    /// Galvanotropic sensitivity [m^3/A.s].
    pub galvanotropism: f64,
    /// Young's modulus of the tissue [Pa].
    pub young_modulus: f64,
    /// Poisson ratio of the tissue.
    pub poisson_ratio: f64,
    /// Viscous damping of the tissue medium [Pa.s].
    pub viscous_damping: f64,
}

impl Default for DeformationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            time_dependent: false,
            boundary: "fixed".into(),
            osmotic: false,
            galvanotropism: 1.0e-9,
            young_modulus: 1000.0,
            poisson_ratio: 0.49,
            viscous_damping: 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub enabled: bool,
    /// Viscosity of water [Pa.s].
    pub water_viscosity: f64,
    /// Conductivity of the surrounding media [S/m].
    pub media_sigma: f64,
    /// Zeta potential of the screening double layer [V].
    pub zeta: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            water_viscosity: 1.0e-3,
            media_sigma: 1.0,
            zeta: -70e-3,
        }
    }
}

/// A named tissue region. Insular regions keep their interior gap junctions
/// but sever every junction crossing the region border, so they exchange ions
/// with the rest of the cluster only through the environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TissueConfig {
    pub name: String,
    pub insular: bool,
    pub target: TargetSelector,
}

impl Default for TissueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            insular: true,
            target: TargetSelector::All,
        }
    }
}

/// Which cells an intervention or cutting profile applies to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TargetSelector {
    All,
    Boundary,
    /// Disc in world coordinates, relative to the cluster centre [m].
    Circle { x: f64, y: f64, radius: f64 },
}

impl Default for TargetSelector {
    fn default() -> Self {
        TargetSelector::All
    }
}

/// One scheduled intervention record (redesigned from the original's
/// string-keyed scheduled/global option dictionaries).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionConfig {
    /// `change_ion_cell`, `change_ion_env`, `apply_voltage` or `cut`.
    pub kind: String,
    /// Ion symbol for concentration perturbations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ion: Option<String>,
    /// Window start [s].
    pub t_on: f64,
    /// Window end [s].
    pub t_off: f64,
    /// Ramp smoothing width of the on/off envelope [s].
    pub ramp: f64,
    /// Approach rate of concentration ramps [1/s].
    pub rate: f64,
    /// Target multiplier relative to the profile's initial value, or the
    /// applied voltage [V] for `apply_voltage`.
    pub magnitude: f64,
    pub target: TargetSelector,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            kind: "change_ion_cell".into(),
            ion: None,
            t_on: 0.0,
            t_off: 0.0,
            ramp: 0.1,
            rate: 1.0,
            magnitude: 1.0,
            target: TargetSelector::All,
        }
    }
}

/// A gated membrane channel: a small state machine advancing
/// closed -> activating -> open -> inactivating -> closed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Ion whose permeability the channel carries.
    pub ion: String,
    /// Membrane voltage above which the channel activates [V].
    pub v_on: f64,
    /// Membrane voltage below which an open channel deactivates [V].
    pub v_off: f64,
    /// Time spent activating before the channel opens [s].
    pub tau_activate: f64,
    /// Maximum time the channel stays open before inactivating [s].
    pub tau_open: f64,
    /// Recovery time before the channel can activate again [s].
    pub tau_inactivate: f64,
    /// Permeability carried by the open channel [m/s].
    pub perm_open: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ion: "Na".into(),
            v_on: -40e-3,
            v_off: -55e-3,
            tau_activate: 1e-3,
            tau_open: 5e-3,
            tau_inactivate: 10e-3,
            perm_open: 1.0e-16,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GrnConfig {
    pub enabled: bool,
    /// Checkpoint the GRN run consumes: `seed`, `init`, `sim` or `isolated`.
    pub piggyback: String,
    /// Run the rate optimizer before the main loop.
    pub optimize: bool,
    pub optimization_steps: usize,
    /// Rate adjustment factor per optimizer iteration.
    pub optimization_step: f64,
    /// Target steady-state membrane voltage [V].
    pub target_vmem: f64,
    pub molecules: Vec<GrnMoleculeConfig>,
    pub reactions: Vec<GrnReactionConfig>,
    pub transporters: Vec<GrnTransporterConfig>,
    pub grn_channels: Vec<GrnChannelConfig>,
}

impl Default for GrnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            piggyback: "seed".into(),
            optimize: false,
            optimization_steps: 50,
            optimization_step: 0.1,
            target_vmem: -50e-3,
            molecules: Vec::new(),
            reactions: Vec::new(),
            transporters: Vec::new(),
            grn_channels: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GrnMoleculeConfig {
    pub name: String,
    /// Initial cytosolic concentration [mol/m^3].
    pub init_conc: f64,
    /// Initial environmental concentration [mol/m^3].
    pub init_conc_env: f64,
    /// First-order decay rate [1/s].
    pub decay: f64,
}

impl Default for GrnMoleculeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            init_conc: 0.0,
            init_conc_env: 0.0,
            decay: 0.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GrnReactionConfig {
    pub name: String,
    /// Consumed molecules with stoichiometric coefficients.
    pub reactants: Vec<(String, f64)>,
    /// Produced molecules with stoichiometric coefficients.
    pub products: Vec<(String, f64)>,
    /// Maximum rate constant.
    pub rate: f64,
    /// Half-maximum constant of the Hill form; zero selects mass action.
    pub km: f64,
    /// Hill coefficient.
    pub n: f64,
    /// Activating molecules `(name, km, n)`.
    pub activators: Vec<(String, f64, f64)>,
    /// Inhibiting molecules `(name, km, n)`.
    pub inhibitors: Vec<(String, f64, f64)>,
}

impl Default for GrnReactionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            reactants: Vec::new(),
            products: Vec::new(),
            rate: 1.0,
            km: 0.0,
            n: 1.0,
            activators: Vec::new(),
            inhibitors: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GrnTransporterConfig {
    pub name: String,
    pub molecule: String,
    /// Positive rates move molecule into the cell.
    pub rate: f64,
    pub km: f64,
    pub n: f64,
}

impl Default for GrnTransporterConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            molecule: String::new(),
            rate: 0.0,
            km: 1.0,
            n: 1.0,
        }
    }
}

/// A ligand-gated ion channel expressed by the network: modulates the
/// membrane permeability of `ion` as a Hill function of `ligand`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GrnChannelConfig {
    pub name: String,
    pub ion: String,
    pub ligand: String,
    /// Peak permeability multiplier at ligand saturation.
    pub max_multiplier: f64,
    pub km: f64,
    pub n: f64,
}

impl Default for GrnChannelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            ion: "K".into(),
            ligand: String::new(),
            max_multiplier: 1.0,
            km: 1.0,
            n: 1.0,
        }
    }
}

impl SimConfigFile {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: SimConfigFile = toml::from_str(&content)
            .map_err(|e| SimError::config(format!("{}: {e}", path.as_ref().display())))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = SimConfigFile::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: SimConfigFile = toml::from_str(&text).unwrap();
        assert_eq!(back.general, cfg.general);
        assert_eq!(back.world, cfg.world);
    }

    #[test]
    fn world_sections_compare_structurally() {
        let a = WorldConfig::default();
        let mut b = WorldConfig::default();
        assert_eq!(a, b);
        b.cell_radius = 7e-6;
        assert_ne!(a, b);
    }
}

// Frozen parameter store.
//
// `Parameters::from_config` validates the raw TOML tree once, derives every
// secondary quantity the solvers need, and resolves the ion profile. After
// construction nothing mutates it except `set_time_profile`, which swaps in
// the per-phase integration settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ChannelConfig, GrnConfig, InterventionConfig, SimConfigFile, TissueConfig};
use crate::error::SimError;
use crate::ion::{Ion, IonSet};
use crate::phase::PhaseKind;
use crate::units::{EPS0, R};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    /// Equivalent-circuit voltage update: vm = Q / (cm * sa).
    Fast,
    /// Poisson solve over the cell cluster.
    Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeformBoundary {
    /// Zero displacement on every boundary cell.
    Fixed,
    /// A single boundary cell pinned; the rest of the rim moves freely.
    Pinned,
}

/// Integration settings of the currently active phase.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TimeProfile {
    /// Step size [s].
    pub dt: f64,
    /// Total simulated time [s].
    pub total_time: f64,
    /// Interval between history samples [s].
    pub sampling: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parameters {
    // World geometry.
    pub world_size: f64,
    pub cell_radius: f64,
    pub cell_height: f64,
    pub cell_space: f64,
    pub lattice_disorder: f64,
    pub crop_fraction: f64,
    pub temperature: f64,
    pub rng_seed: u64,
    /// Lattice spacing, one cell diameter.
    pub d_cell: f64,
    /// Lattice points per side.
    pub n_lattice: usize,

    // Membrane electrics.
    /// Membrane thickness [m].
    pub tm: f64,
    /// Membrane capacitance per unit area [F/m^2].
    pub cm: f64,
    /// Self-capacitance of a cell body [F].
    pub self_cap: f64,
    /// Gap junction channel length [m].
    pub gjl: f64,

    // Gap junctions.
    pub gj_surface: f64,
    pub gj_vthresh: f64,
    pub gj_vgrad: f64,
    pub gj_min: f64,
    pub gj_voltage_gated: bool,

    // Solver selection and phase behaviour.
    pub solver: SolverKind,
    pub sim_ecm: bool,
    pub auto_init: bool,
    pub time: TimeProfile,
    time4init: f64,
    time4sim: f64,
    custom_init: Option<TimeProfile>,
    custom_sim: Option<TimeProfile>,

    // Auxiliary physics.
    pub deformation: bool,
    pub td_deform: bool,
    pub osmotic: bool,
    pub fluid_flow: bool,
    pub deform_boundary: DeformBoundary,
    pub galvanotropism: f64,
    /// Second Lame parameter (shear modulus) of the tissue [Pa].
    pub lame_mu: f64,
    pub mu_tissue: f64,
    pub mu_water: f64,
    pub media_sigma: f64,
    /// Zeta potential for electroosmotic slip [V].
    pub zeta: f64,

    // Pumps.
    pub alpha_nak: f64,
    /// Free energy of ATP hydrolysis [J/mol].
    pub delta_g_atp: f64,

    // Ion profile, index-aligned vectors.
    pub ions: IonSet,
    pub conc_env: Vec<f64>,
    pub conc_cell: Vec<f64>,
    pub z: Vec<f64>,
    /// Membrane permeability per ion [m/s].
    pub dm: Vec<f64>,
    /// Free-water diffusion constant per ion [m^2/s].
    pub d_free: Vec<f64>,

    pub out_dir: PathBuf,
    pub tissues: Vec<TissueConfig>,
    pub interventions: Vec<InterventionConfig>,
    pub channels: Vec<ChannelConfig>,
    pub grn: GrnConfig,
}

/// Free-water diffusion constants [m^2/s].
fn free_diffusion(ion: Ion) -> f64 {
    match ion {
        Ion::Na => 1.33e-9,
        Ion::K => 1.96e-9,
        Ion::Cl => 2.03e-9,
        Ion::Ca => 0.79e-9,
        Ion::H => 9.31e-9,
        Ion::P => 5.0e-10,
        Ion::M => 1.0e-9,
    }
}

/// Solve for the balancing ion that renders a compartment exactly neutral.
/// Returns `(concentration, valence)`.
fn bal_charge(concs: &[f64], zs: &[f64]) -> (f64, f64) {
    let q: f64 = concs.iter().zip(zs).map(|(c, z)| c * z).sum();
    if q == 0.0 {
        (0.0, -1.0)
    } else {
        (q.abs(), -q.signum())
    }
}

impl Parameters {
    pub fn from_config(cfg: &SimConfigFile) -> Result<Self, SimError> {
        let w = &cfg.world;
        if w.cell_radius <= 0.0 {
            return Err(SimError::config("world.cell_radius must be positive"));
        }
        if w.world_size < 6.0 * w.cell_radius {
            return Err(SimError::config(format!(
                "world.world_size = {} m is too small to hold a cluster of cells \
                 with radius {} m",
                w.world_size, w.cell_radius
            )));
        }
        if !(0.0..1.0).contains(&w.lattice_disorder) {
            return Err(SimError::config(
                "world.lattice_disorder must lie in [0, 1)",
            ));
        }
        if !(0.0..=0.5).contains(&w.crop_fraction) || w.crop_fraction == 0.0 {
            return Err(SimError::config("world.crop_fraction must lie in (0, 0.5]"));
        }
        if w.temperature <= 0.0 {
            return Err(SimError::config("world.temperature must be positive"));
        }

        let solver = match cfg.general.solver.as_str() {
            "fast" => SolverKind::Fast,
            "full" => SolverKind::Full,
            other => {
                return Err(SimError::config(format!(
                    "general.solver must be `fast` or `full`, got `{other}`"
                )))
            }
        };

        let deform_boundary = match cfg.deformation.boundary.as_str() {
            "fixed" => DeformBoundary::Fixed,
            "pinned" => DeformBoundary::Pinned,
            other => {
                return Err(SimError::config(format!(
                    "deformation.boundary must be `fixed` or `pinned`, got `{other}`"
                )))
            }
        };

        let (ions, conc_env, conc_cell, z, dm) = build_ion_profile(cfg)?;

        for ch in &cfg.channels {
            let ion = Ion::from_symbol(&ch.ion).ok_or_else(|| {
                SimError::config(format!("channel references unknown ion `{}`", ch.ion))
            })?;
            if !ions.contains(ion) {
                return Err(SimError::config(format!(
                    "channel ion `{}` is not part of the `{}` profile",
                    ch.ion, cfg.general.ion_profile
                )));
            }
        }
        for iv in &cfg.interventions {
            match iv.kind.as_str() {
                "change_ion_cell" | "change_ion_env" => {
                    let sym = iv.ion.as_deref().ok_or_else(|| {
                        SimError::config(format!("intervention `{}` needs an ion", iv.kind))
                    })?;
                    let ion = Ion::from_symbol(sym).ok_or_else(|| {
                        SimError::config(format!("intervention references unknown ion `{sym}`"))
                    })?;
                    if !ions.contains(ion) {
                        return Err(SimError::config(format!(
                            "intervention ion `{sym}` is not part of the `{}` profile",
                            cfg.general.ion_profile
                        )));
                    }
                }
                "apply_voltage" | "cut" => {}
                other => {
                    return Err(SimError::config(format!(
                        "unknown intervention kind `{other}`"
                    )))
                }
            }
            if iv.t_off < iv.t_on {
                return Err(SimError::config(format!(
                    "intervention `{}` ends before it starts",
                    iv.kind
                )));
            }
        }

        let tm = 7.5e-9;
        let d_cell = 2.0 * w.cell_radius;
        let n_lattice = (w.world_size / d_cell).ceil() as usize;
        let rt = R * w.temperature;

        let lame_mu =
            cfg.deformation.young_modulus / (2.0 * (1.0 + cfg.deformation.poisson_ratio));

        let d_free = ions.list.iter().map(|&i| free_diffusion(i)).collect();

        let custom_init = cfg.time.custom_init.as_ref().map(|c| TimeProfile {
            dt: c.dt,
            total_time: c.total_time,
            sampling: c.sampling,
        });
        let custom_sim = cfg.time.custom_sim.as_ref().map(|c| TimeProfile {
            dt: c.dt,
            total_time: c.total_time,
            sampling: c.sampling,
        });

        let mut params = Parameters {
            world_size: w.world_size,
            cell_radius: w.cell_radius,
            cell_height: w.cell_height,
            cell_space: w.cell_spacing,
            lattice_disorder: w.lattice_disorder,
            crop_fraction: w.crop_fraction,
            temperature: w.temperature,
            rng_seed: w.rng_seed,
            d_cell,
            n_lattice,

            tm,
            cm: 0.022,
            // Self-capacitance of a disc-shaped cell body in water.
            self_cap: (8.0 + 4.1 * (w.cell_height / w.cell_radius).powf(0.76))
                * EPS0
                * 80.0
                * w.cell_radius,
            gjl: 2.0 * tm + w.cell_spacing,

            gj_surface: cfg.gap_junctions.surface_fraction,
            gj_vthresh: cfg.gap_junctions.voltage_threshold,
            gj_vgrad: cfg.gap_junctions.voltage_window,
            gj_min: cfg.gap_junctions.min_open,
            gj_voltage_gated: cfg.gap_junctions.voltage_gated,

            solver,
            sim_ecm: cfg.general.sim_ecm,
            auto_init: cfg.general.auto_init,
            time: TimeProfile {
                dt: 1e-3,
                total_time: cfg.time.time4sim,
                sampling: 0.1,
            },
            time4init: cfg.time.time4init,
            time4sim: cfg.time.time4sim,
            custom_init,
            custom_sim,

            deformation: cfg.deformation.enabled,
            td_deform: cfg.deformation.time_dependent,
            osmotic: cfg.deformation.osmotic,
            fluid_flow: cfg.flow.enabled,
            deform_boundary,
            galvanotropism: cfg.deformation.galvanotropism,
            lame_mu,
            mu_tissue: cfg.deformation.viscous_damping,
            mu_water: cfg.flow.water_viscosity,
            media_sigma: cfg.flow.media_sigma,
            zeta: cfg.flow.zeta,

            alpha_nak: cfg.pumps.alpha_nak,
            delta_g_atp: 20.0 * rt,

            ions,
            conc_env,
            conc_cell,
            z,
            dm,
            d_free,

            out_dir: PathBuf::from(&cfg.general.out_dir),
            tissues: cfg.tissues.clone(),
            interventions: cfg.interventions.clone(),
            channels: cfg.channels.clone(),
            grn: cfg.grn.clone(),
        };
        params.set_time_profile(PhaseKind::Sim);
        Ok(params)
    }

    /// Install the integration settings for `phase`. Custom overrides win;
    /// otherwise a built-in per-phase profile applies. The extracellular grid
    /// needs a smaller step because its volumes are far below cell volumes.
    pub fn set_time_profile(&mut self, phase: PhaseKind) {
        self.time = match phase {
            PhaseKind::Seed => self.time,
            PhaseKind::Init => self.custom_init.unwrap_or(TimeProfile {
                dt: if self.sim_ecm { 1e-3 } else { 5e-3 },
                total_time: self.time4init,
                sampling: 0.1,
            }),
            PhaseKind::Sim | PhaseKind::SimGrn => self.custom_sim.unwrap_or(TimeProfile {
                dt: if self.sim_ecm { 1e-4 } else { 1e-3 },
                total_time: self.time4sim,
                sampling: 0.1,
            }),
        };
    }

    /// RT in joules per mole at the configured temperature.
    pub fn rt(&self) -> f64 {
        R * self.temperature
    }
}

/// Resolve the configured ion profile into the active set plus its
/// index-aligned concentration, valence and permeability vectors. The
/// balancing anion M is solved last so both compartments start exactly
/// neutral.
fn build_ion_profile(
    cfg: &SimConfigFile,
) -> Result<(IonSet, Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>), SimError> {
    let m = &cfg.membrane;
    let dm_of = |ion: Ion| match ion {
        Ion::Na => m.dm_na,
        Ion::K => m.dm_k,
        Ion::Cl => m.dm_cl,
        Ion::Ca => m.dm_ca,
        Ion::H => m.dm_h,
        Ion::P => m.dm_p,
        Ion::M => m.dm_m,
    };

    // (ion, conc_env, conc_cell) per profile, M excluded.
    let table: Vec<(Ion, f64, f64)> = match cfg.general.ion_profile.as_str() {
        "basic" => vec![
            (Ion::Na, 145.0, 12.0),
            (Ion::K, 5.0, 139.0),
            (Ion::P, 10.0, 135.0),
        ],
        "basic_ca" => vec![
            (Ion::Na, 145.0, 12.0),
            (Ion::K, 5.0, 139.0),
            (Ion::Ca, 1.0, 5.0e-5),
            (Ion::P, 10.0, 135.0),
        ],
        "animal" => vec![
            (Ion::Na, 145.0, 12.0),
            (Ion::K, 5.0, 139.0),
            (Ion::Cl, 115.0, 4.0),
            (Ion::Ca, 1.0, 5.0e-5),
            (Ion::H, 3.98e-5, 6.31e-5),
            (Ion::P, 10.0, 135.0),
        ],
        "invertebrate" => vec![
            (Ion::Na, 8.7, 5.0),
            (Ion::K, 0.31, 406.09),
            (Ion::Cl, 5.64, 45.56),
            (Ion::Ca, 3.75, 3.0e-4),
            (Ion::H, 3.98e-8, 6.31e-8),
            (Ion::P, 7.0, 350.0),
        ],
        "custom" => {
            if cfg.custom_ions.is_empty() {
                return Err(SimError::config(
                    "the `custom` ion profile needs at least one [[custom_ions]] entry",
                ));
            }
            let mut rows = Vec::with_capacity(cfg.custom_ions.len());
            for c in &cfg.custom_ions {
                let ion = Ion::from_symbol(&c.ion).ok_or_else(|| {
                    SimError::config(format!("custom profile lists unknown ion `{}`", c.ion))
                })?;
                if ion == Ion::M {
                    return Err(SimError::config(
                        "the balancing anion M is derived and cannot be listed directly",
                    ));
                }
                if c.conc_env < 0.0 || c.conc_cell < 0.0 {
                    return Err(SimError::config(format!(
                        "custom ion `{}` has a negative concentration",
                        c.ion
                    )));
                }
                if rows.iter().any(|&(i, _, _)| i == ion) {
                    return Err(SimError::config(format!(
                        "custom profile lists ion `{}` twice",
                        c.ion
                    )));
                }
                rows.push((ion, c.conc_env, c.conc_cell));
            }
            rows
        }
        other => {
            return Err(SimError::config(format!(
                "unknown ion profile `{other}`; expected basic, basic_ca, animal, \
                 invertebrate or custom"
            )))
        }
    };

    let mut list: Vec<Ion> = table.iter().map(|&(i, _, _)| i).collect();
    let mut conc_env: Vec<f64> = table.iter().map(|&(_, e, _)| e).collect();
    let mut conc_cell: Vec<f64> = table.iter().map(|&(_, _, c)| c).collect();
    let mut z: Vec<f64> = list.iter().map(|&i| i.valence()).collect();
    let mut dm: Vec<f64> = list.iter().map(|&i| dm_of(i)).collect();

    let (m_env, z_env) = bal_charge(&conc_env, &z);
    let (m_cell, z_cell) = bal_charge(&conc_cell, &z);
    let z_m = if m_env > 0.0 { z_env } else { z_cell };
    if (m_env > 0.0 && z_env != -1.0) || (m_cell > 0.0 && z_cell != -1.0) {
        return Err(SimError::config(
            "ion profile cannot be balanced by an anion: fixed charge already \
             sums negative; adjust the cation concentrations",
        ));
    }

    list.push(Ion::M);
    conc_env.push(m_env);
    conc_cell.push(m_cell);
    z.push(if m_env > 0.0 || m_cell > 0.0 { z_m } else { -1.0 });
    dm.push(dm_of(Ion::M));

    Ok((IonSet::new(list), conc_env, conc_cell, z, dm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfigFile;

    fn net_charge(concs: &[f64], zs: &[f64]) -> f64 {
        concs.iter().zip(zs).map(|(c, z)| c * z).sum()
    }

    #[test]
    fn every_builtin_profile_starts_neutral() {
        for profile in ["basic", "basic_ca", "animal", "invertebrate"] {
            let mut cfg = SimConfigFile::default();
            cfg.general.ion_profile = profile.into();
            let p = Parameters::from_config(&cfg).unwrap();
            assert!(
                net_charge(&p.conc_env, &p.z).abs() < 1e-9,
                "env compartment of `{profile}` is not neutral"
            );
            assert!(
                net_charge(&p.conc_cell, &p.z).abs() < 1e-9,
                "cell compartment of `{profile}` is not neutral"
            );
        }
    }

    #[test]
    fn balancing_anion_is_always_last() {
        let cfg = SimConfigFile::default();
        let p = Parameters::from_config(&cfg).unwrap();
        assert_eq!(*p.ions.list.last().unwrap(), Ion::M);
        assert_eq!(*p.z.last().unwrap(), -1.0);
    }

    #[test]
    fn unbalanceable_profile_is_rejected() {
        let mut cfg = SimConfigFile::default();
        cfg.general.ion_profile = "custom".into();
        cfg.custom_ions = vec![crate::config::CustomIonConfig {
            ion: "Cl".into(),
            conc_env: 100.0,
            conc_cell: 100.0,
        }];
        match Parameters::from_config(&cfg) {
            Err(SimError::Config(_)) => {}
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn time_profile_tracks_the_phase() {
        let cfg = SimConfigFile::default();
        let mut p = Parameters::from_config(&cfg).unwrap();
        p.set_time_profile(PhaseKind::Init);
        assert_eq!(p.time.dt, 5e-3);
        p.set_time_profile(PhaseKind::Sim);
        assert_eq!(p.time.dt, 1e-3);
    }

    #[test]
    fn ecm_runs_take_a_smaller_step() {
        let mut cfg = SimConfigFile::default();
        cfg.general.sim_ecm = true;
        let mut p = Parameters::from_config(&cfg).unwrap();
        p.set_time_profile(PhaseKind::Init);
        assert_eq!(p.time.dt, 1e-3);
    }

    #[test]
    fn tiny_world_is_rejected() {
        let mut cfg = SimConfigFile::default();
        cfg.world.world_size = 1e-6;
        assert!(Parameters::from_config(&cfg).is_err());
    }

    #[test]
    fn channel_ion_must_be_in_profile() {
        let mut cfg = SimConfigFile::default();
        // Cl is absent from the basic profile.
        cfg.channels = vec![crate::config::ChannelConfig {
            ion: "Cl".into(),
            ..Default::default()
        }];
        assert!(Parameters::from_config(&cfg).is_err());
    }
}

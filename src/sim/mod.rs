// Transport simulator.
//
// Holds the complete mutable state of a run and advances it with explicit
// Euler steps: transmembrane electrodiffusion, active pumping, gap-junction
// exchange, voltage, junction gating, scheduled interventions and the
// auxiliary physics, in that order. Concentrations are clipped at zero
// after every update.

pub mod channels;
pub mod flux;
pub mod history;
pub mod interventions;
pub mod voltage;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::ion::Ion;
use crate::mesh::Mesh;
use crate::parameters::Parameters;
use crate::physics;

use channels::ChannelRuntime;
use history::History;
use interventions::{InterventionKind, InterventionRuntime};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Simulator {
    /// World time [s].
    pub time: f64,
    /// Cytosolic concentrations [ion][cell] [mol/m^3].
    pub cc_cells: Vec<Vec<f64>>,
    /// Environmental concentrations [ion][node]; a single node when the
    /// extracellular space is well mixed.
    pub cc_env: Vec<Vec<f64>>,
    /// Membrane voltage per cell [V].
    pub vm_cell: Vec<f64>,
    /// Gap junction open fraction per membrane.
    pub gj_open: Vec<f64>,
    /// Permeability multipliers [ion][cell], driven by the gene network.
    pub dm_mod: Vec<Vec<f64>>,
    /// Transmembrane fluxes [ion][membrane], positive inward [mol/(m^2 s)].
    pub fluxes_mem: Vec<Vec<f64>>,
    /// Gap-junction fluxes [ion][membrane], positive inward.
    pub fluxes_gj: Vec<Vec<f64>>,

    pub channels: Vec<ChannelRuntime>,
    pub interventions: Vec<InterventionRuntime>,

    /// Net transmembrane current density per membrane [A/m^2].
    pub i_mem: Vec<f64>,
    /// Cell-centred current density [A/m^2].
    pub j_cell_x: Vec<f64>,
    pub j_cell_y: Vec<f64>,
    /// Electroosmotic flow velocity per cell [m/s].
    pub u_cell_x: Vec<f64>,
    pub u_cell_y: Vec<f64>,
    /// Environmental current density and flow on the grid; empty without an
    /// extracellular grid.
    pub j_env_x: Vec<f64>,
    pub j_env_y: Vec<f64>,
    pub u_env_x: Vec<f64>,
    pub u_env_y: Vec<f64>,
    /// Environmental charge density per node at the end of the last step
    /// [C/m^3], for the charge continuity term of the current correction.
    pub rho_env: Vec<f64>,
    /// Tissue displacement per cell [m], plus the previous level of the
    /// wave integrator.
    pub d_cell_x: Vec<f64>,
    pub d_cell_y: Vec<f64>,
    pub d_prev_x: Vec<f64>,
    pub d_prev_y: Vec<f64>,

    pub history: History,

    /// Volume behind one environmental node [m^3].
    vol_env_node: f64,
}

impl Simulator {
    /// Fresh state at the configured profile concentrations. Both
    /// compartments start exactly charge neutral, so vm starts at zero.
    pub fn base_init(p: &Parameters, mesh: &Mesh) -> Simulator {
        let n_cells = mesh.n_cells();
        let n_mems = mesh.n_mems();
        let n_ions = p.ions.len();

        let env_len = mesh.env.as_ref().map_or(1, |e| e.len());
        let vol_env_node = match &mesh.env {
            Some(e) => e.delta * e.delta * p.cell_height,
            None => p.world_size * p.world_size * p.cell_height,
        };

        let cc_cells = p.conc_cell.iter().map(|&c| vec![c; n_cells]).collect();
        let cc_env = p.conc_env.iter().map(|&c| vec![c; env_len]).collect();

        let channels = p
            .channels
            .iter()
            .map(|c| ChannelRuntime::new(c.clone(), n_cells))
            .collect();
        let interventions = p
            .interventions
            .iter()
            .map(|c| InterventionRuntime::new(c.clone(), &p.ions, mesh))
            .collect();

        Simulator {
            time: 0.0,
            cc_cells,
            cc_env,
            vm_cell: vec![0.0; n_cells],
            gj_open: vec![1.0; n_mems],
            dm_mod: vec![vec![1.0; n_cells]; n_ions],
            fluxes_mem: vec![vec![0.0; n_mems]; n_ions],
            fluxes_gj: vec![vec![0.0; n_mems]; n_ions],
            channels,
            interventions,
            i_mem: vec![0.0; n_mems],
            j_cell_x: vec![0.0; n_cells],
            j_cell_y: vec![0.0; n_cells],
            u_cell_x: vec![0.0; n_cells],
            u_cell_y: vec![0.0; n_cells],
            j_env_x: vec![0.0; if mesh.env.is_some() { env_len } else { 0 }],
            j_env_y: vec![0.0; if mesh.env.is_some() { env_len } else { 0 }],
            u_env_x: vec![0.0; if mesh.env.is_some() { env_len } else { 0 }],
            u_env_y: vec![0.0; if mesh.env.is_some() { env_len } else { 0 }],
            // Profiles start charge neutral, so the environment carries none.
            rho_env: vec![0.0; if mesh.env.is_some() { env_len } else { 0 }],
            d_cell_x: vec![0.0; n_cells],
            d_cell_y: vec![0.0; n_cells],
            d_prev_x: vec![0.0; n_cells],
            d_prev_y: vec![0.0; n_cells],
            history: History::default(),
            vol_env_node,
        }
    }

    fn env_node(&self, mesh: &Mesh, m: usize) -> usize {
        mesh.env.as_ref().map_or(0, |e| e.mem_to_grid[m])
    }

    /// Advance the state by one step of `dt`. The mesh is mutable because a
    /// cutting event rebuilds it mid-run.
    pub fn step(&mut self, p: &Parameters, mesh: &mut Mesh, dt: f64) -> Result<(), SimError> {
        let n_cells = mesh.n_cells();
        let rt = p.rt();

        self.vm_cell = voltage::solve(p, mesh, &self.cc_cells);

        // Externally applied voltage overrides the solved value.
        for iv in &self.interventions {
            if iv.kind == InterventionKind::ApplyVoltage {
                let w = iv.envelope(self.time);
                for &c in &iv.targets {
                    self.vm_cell[c] += w * (iv.cfg.magnitude - self.vm_cell[c]);
                }
            }
        }

        // Gated channel permeability on top of the baseline.
        let mut chan_perm = vec![vec![0.0f64; n_cells]; p.ions.len()];
        for ch in &mut self.channels {
            let k = p.ions.index_of(ch.ion).unwrap_or(0);
            let add = ch.step(&self.vm_cell, dt);
            for (i, a) in add.into_iter().enumerate() {
                chan_perm[k][i] += a;
            }
        }

        // Transmembrane electrodiffusion and pumping.
        let i_na = p.ions.index_of(Ion::Na);
        let i_k = p.ions.index_of(Ion::K);
        for m in 0..mesh.n_mems() {
            let i = mesh.mem_to_cell[m];
            let e = self.env_node(mesh, m);
            for (k, _) in p.ions.iter() {
                let perm = p.dm[k] * self.dm_mod[k][i] + chan_perm[k][i];
                self.fluxes_mem[k][m] = if perm > 0.0 {
                    flux::ghk_flux(
                        perm,
                        p.z[k],
                        self.cc_cells[k][i],
                        self.cc_env[k][e],
                        self.vm_cell[i],
                        rt,
                    )
                } else {
                    0.0
                };
            }
            if let (Some(kn), Some(kk)) = (i_na, i_k) {
                let (f_na, f_k) = flux::pump_nak(
                    self.cc_cells[kn][i],
                    self.cc_env[kn][e],
                    self.cc_cells[kk][i],
                    self.cc_env[kk][e],
                    self.vm_cell[i],
                    p.alpha_nak,
                    p.delta_g_atp,
                    rt,
                );
                self.fluxes_mem[kn][m] += f_na;
                self.fluxes_mem[kk][m] += f_k;
            }
        }

        // Gap-junction exchange.
        for m in 0..mesh.n_mems() {
            let i = mesh.mem_to_cell[m];
            let Some(pm) = mesh.mem_gj[m] else {
                for (k, _) in p.ions.iter() {
                    self.fluxes_gj[k][m] = 0.0;
                }
                continue;
            };
            let j = mesh.mem_to_cell[pm];
            for (k, _) in p.ions.iter() {
                self.fluxes_gj[k][m] = flux::gj_flux(
                    self.gj_open[m],
                    p.gj_surface,
                    p.d_free[k],
                    self.cc_cells[k][i],
                    self.cc_cells[k][j],
                    p.gjl,
                );
            }
        }

        // Euler update, clipped at zero.
        for m in 0..mesh.n_mems() {
            let i = mesh.mem_to_cell[m];
            let e = self.env_node(mesh, m);
            let sa_dt = mesh.mem_sa[m] * dt;
            for (k, _) in p.ions.iter() {
                let moles_mem = self.fluxes_mem[k][m] * sa_dt;
                let moles_gj = self.fluxes_gj[k][m] * sa_dt;
                self.cc_cells[k][i] += (moles_mem + moles_gj) / mesh.cell_vol[i];
                self.cc_env[k][e] -= moles_mem / self.vol_env_node;
            }
        }
        for cc in self.cc_cells.iter_mut().chain(self.cc_env.iter_mut()) {
            for c in cc.iter_mut() {
                if *c < 0.0 {
                    *c = 0.0;
                }
            }
        }

        // Free diffusion over the environmental grid.
        if let Some(env) = &mesh.env {
            for (k, _) in p.ions.iter() {
                let c = nalgebra::DVector::from_vec(self.cc_env[k].clone());
                let lap_c = &env.lap_free * &c;
                for (ce, l) in self.cc_env[k].iter_mut().zip(lap_c.iter()) {
                    *ce = (*ce + p.d_free[k] * l * dt).max(0.0);
                }
            }
        }

        // Junction gating on the transjunctional voltage.
        for m in 0..mesh.n_mems() {
            self.gj_open[m] = match mesh.mem_gj[m] {
                Some(pm) if p.gj_voltage_gated => {
                    let i = mesh.mem_to_cell[m];
                    let j = mesh.mem_to_cell[pm];
                    flux::gj_gate(
                        self.vm_cell[j] - self.vm_cell[i],
                        p.gj_vthresh,
                        p.gj_vgrad,
                        p.gj_min,
                    )
                }
                Some(_) => 1.0,
                None => 0.0,
            };
        }

        // Concentration interventions.
        for iv in &self.interventions {
            match iv.kind {
                InterventionKind::ChangeIonCell => {
                    if let Some(k) = iv.ion_idx {
                        let baseline = p.conc_cell[k];
                        for &c in &iv.targets {
                            self.cc_cells[k][c] = iv.ramp_concentration(
                                self.cc_cells[k][c],
                                baseline,
                                self.time,
                                dt,
                            );
                        }
                    }
                }
                InterventionKind::ChangeIonEnv => {
                    if let Some(k) = iv.ion_idx {
                        let baseline = p.conc_env[k];
                        for ce in self.cc_env[k].iter_mut() {
                            *ce = iv.ramp_concentration(*ce, baseline, self.time, dt);
                        }
                    }
                }
                InterventionKind::ApplyVoltage | InterventionKind::Cut => {}
            }
        }

        // Cutting events: rebuild the mesh and regather state.
        let due: Vec<usize> = self
            .interventions
            .iter()
            .enumerate()
            .filter(|(_, iv)| iv.cut_due(self.time))
            .map(|(idx, _)| idx)
            .collect();
        for idx in due {
            let targets = mesh.cells_in_target(&self.interventions[idx].cfg.target);
            log::info!(
                "cutting event at t = {:.3} s removes {} cells",
                self.time,
                targets.len()
            );
            let keep = mesh.cut_cells(p, &targets)?;
            self.regather(mesh, &keep);
            self.interventions[idx].fired = true;
            for iv in self.interventions.iter_mut() {
                iv.retarget(mesh);
            }
        }

        physics::current::compute(p, mesh, self, dt);
        if p.fluid_flow {
            physics::flow::step(p, mesh, self);
        }
        if p.deformation {
            physics::deform::step(p, mesh, self, dt);
        }

        self.time += dt;
        self.check_finite()
    }

    /// Shrink per-cell and per-membrane state to a rebuilt mesh. Derived
    /// quantities (vm, junction gates, channel timers) restart from the
    /// surviving concentrations on the next step.
    fn regather(&mut self, mesh: &Mesh, keep: &[usize]) {
        let gather = |v: &[f64]| -> Vec<f64> { keep.iter().map(|&i| v[i]).collect() };

        for cc in self.cc_cells.iter_mut() {
            *cc = gather(cc);
        }
        for dm in self.dm_mod.iter_mut() {
            *dm = gather(dm);
        }
        self.vm_cell = gather(&self.vm_cell);
        self.j_cell_x = gather(&self.j_cell_x);
        self.j_cell_y = gather(&self.j_cell_y);
        self.u_cell_x = gather(&self.u_cell_x);
        self.u_cell_y = gather(&self.u_cell_y);
        self.d_cell_x = gather(&self.d_cell_x);
        self.d_cell_y = gather(&self.d_cell_y);
        self.d_prev_x = gather(&self.d_prev_x);
        self.d_prev_y = gather(&self.d_prev_y);

        let n_mems = mesh.n_mems();
        self.gj_open = vec![1.0; n_mems];
        self.i_mem = vec![0.0; n_mems];
        for f in self.fluxes_mem.iter_mut().chain(self.fluxes_gj.iter_mut()) {
            *f = vec![0.0; n_mems];
        }
        for ch in self.channels.iter_mut() {
            ch.states = keep.iter().map(|&i| ch.states[i]).collect();
        }
        // A rebuilt environment grid remaps membranes; concentrations on a
        // well-mixed environment carry over unchanged.
        if let Some(env) = &mesh.env {
            for ce in self.cc_env.iter_mut() {
                ce.resize(env.len(), 0.0);
            }
            self.rho_env.resize(env.len(), 0.0);
        }
    }

    /// Run the active time profile to completion, sampling on the way.
    pub fn run_loop(&mut self, p: &Parameters, mesh: &mut Mesh) -> Result<(), SimError> {
        if p.deformation && p.td_deform {
            physics::deform::check_stability(p)?;
        }

        let dt = p.time.dt;
        let t_end = self.time + p.time.total_time;
        let mut next_sample = self.time;

        while self.time < t_end - 0.5 * dt {
            if self.time >= next_sample - 0.5 * dt {
                self.sample(p);
                next_sample += p.time.sampling;
            }
            self.step(p, mesh, dt)?;
        }
        self.sample(p);
        Ok(())
    }

    fn sample(&mut self, p: &Parameters) {
        let disp = if p.deformation {
            Some((self.d_cell_x.as_slice(), self.d_cell_y.as_slice()))
        } else {
            None
        };
        self.history
            .record(self.time, &self.vm_cell, &self.cc_cells, disp);
        log::info!(
            "t = {:.3} s, mean vm = {:.2} mV",
            self.time,
            1e3 * self.vm_cell.iter().sum::<f64>() / self.vm_cell.len() as f64
        );
    }

    fn check_finite(&self) -> Result<(), SimError> {
        if self.cc_cells.iter().flatten().any(|c| !c.is_finite()) {
            return Err(SimError::NumericalBlowup {
                field: "cc_cells",
                time: self.time,
            });
        }
        if self.vm_cell.iter().any(|v| !v.is_finite()) {
            return Err(SimError::NumericalBlowup {
                field: "vm_cell",
                time: self.time,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfigFile;
    use crate::phase::PhaseKind;

    fn setup(cfg: SimConfigFile) -> (Parameters, Mesh, Simulator) {
        let mut p = Parameters::from_config(&cfg).unwrap();
        p.set_time_profile(PhaseKind::Init);
        let mesh = Mesh::build(&p).unwrap();
        let sim = Simulator::base_init(&p, &mesh);
        (p, mesh, sim)
    }

    fn small_cfg() -> SimConfigFile {
        let mut cfg = SimConfigFile::default();
        cfg.world.world_size = 80e-6;
        cfg
    }

    #[test]
    fn fresh_state_is_neutral_and_resting() {
        let (_, mesh, sim) = setup(small_cfg());
        assert_eq!(sim.vm_cell.len(), mesh.n_cells());
        assert!(sim.vm_cell.iter().all(|&v| v == 0.0));
        assert!(sim.gj_open.iter().all(|&g| g == 1.0));
    }

    #[test]
    fn concentrations_stay_non_negative() {
        let (p, mut mesh, mut sim) = setup(small_cfg());
        for _ in 0..200 {
            sim.step(&p, &mut mesh, p.time.dt).unwrap();
        }
        for cc in sim.cc_cells.iter().chain(sim.cc_env.iter()) {
            assert!(cc.iter().all(|&c| c >= 0.0));
        }
    }

    #[test]
    fn pumping_polarises_the_cluster_negative() {
        let (p, mut mesh, mut sim) = setup(small_cfg());
        for _ in 0..500 {
            sim.step(&p, &mut mesh, p.time.dt).unwrap();
        }
        let mean_vm = sim.vm_cell.iter().sum::<f64>() / sim.vm_cell.len() as f64;
        assert!(mean_vm < 0.0, "pump failed to polarise, vm = {mean_vm}");
    }

    #[test]
    fn run_loop_samples_on_the_configured_interval() {
        let mut cfg = small_cfg();
        cfg.time.time4init = 0.5;
        let (p, mut mesh, mut sim) = setup(cfg);
        sim.run_loop(&p, &mut mesh).unwrap();
        // 0.0 through 0.5 inclusive at 0.1 spacing.
        assert!(sim.history.len() >= 5);
        assert!(sim.history.times[0] == 0.0);
        assert!((sim.history.times.last().unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn cut_event_shrinks_the_cluster_mid_run() {
        let mut cfg = small_cfg();
        cfg.interventions = vec![crate::config::InterventionConfig {
            kind: "cut".into(),
            ion: None,
            t_on: 0.01,
            t_off: 0.01,
            target: crate::config::TargetSelector::Circle {
                x: 25e-6,
                y: 0.0,
                radius: 8e-6,
            },
            ..Default::default()
        }];
        let (p, mut mesh, mut sim) = setup(cfg);
        let n_before = mesh.n_cells();
        for _ in 0..10 {
            sim.step(&p, &mut mesh, p.time.dt).unwrap();
        }
        assert!(mesh.n_cells() < n_before, "no cells were removed");
        assert_eq!(sim.vm_cell.len(), mesh.n_cells());
        assert_eq!(sim.gj_open.len(), mesh.n_mems());
        assert!(sim.interventions[0].fired);
    }

    #[test]
    fn nan_in_state_aborts_with_blowup() {
        let (p, mut mesh, mut sim) = setup(small_cfg());
        sim.cc_cells[0][0] = f64::NAN;
        let err = sim.step(&p, &mut mesh, p.time.dt);
        assert!(matches!(
            err,
            Err(SimError::NumericalBlowup { field: "vm_cell", .. })
                | Err(SimError::NumericalBlowup { field: "cc_cells", .. })
        ));
    }
}

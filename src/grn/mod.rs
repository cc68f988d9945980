// Gene regulatory network runs.
//
// A network run piggybacks on a transport checkpoint: the network advances
// in lockstep with the transport solver and feeds its expressed channels
// back as permeability multipliers. In isolated mode there is no transport
// at all, the membrane is clamped to a fixed voltage and only the network
// dynamics run.

pub mod network;
pub mod optimizer;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::mesh::Mesh;
use crate::parameters::Parameters;
use crate::sim::interventions::InterventionKind;
use crate::sim::Simulator;
use network::GeneNetwork;

/// Voltage clamp applied in isolated mode [V].
pub const ISOLATED_VM: f64 = -50e-3;

/// Sampled molecule trace of a network run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GrnTrace {
    pub times: Vec<f64>,
    pub molecule_names: Vec<String>,
    /// Cluster-mean concentration per sample per molecule.
    pub mean_conc: Vec<Vec<f64>>,
    pub vm_mean: Vec<f64>,
}

impl GrnTrace {
    fn record(&mut self, t: f64, net: &GeneNetwork, vm: &[f64]) {
        let n = net.n_cells().max(1) as f64;
        self.times.push(t);
        self.mean_conc.push(
            net.molecules
                .iter()
                .map(|m| m.conc.iter().sum::<f64>() / n)
                .collect(),
        );
        self.vm_mean
            .push(vm.iter().sum::<f64>() / vm.len().max(1) as f64);
    }

    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> Result<(), SimError> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer(BufWriter::new(file), self)
            .map_err(|e| SimError::config(format!("trace export failed: {e}")))?;
        Ok(())
    }
}

/// Run the network to the end of the active time profile. With `clamped_vm`
/// set the transport solver is bypassed entirely.
pub fn run_core_sim(
    p: &Parameters,
    mesh: &mut Mesh,
    sim: &mut Simulator,
    net: &mut GeneNetwork,
    clamped_vm: Option<f64>,
) -> Result<GrnTrace, SimError> {
    if p.grn.optimize {
        optimizer::optimize(net, p);
        net.reinitialize(mesh.n_cells());
    }

    // The network state is indexed per cell; a mid-run mesh rebuild would
    // orphan it, so cutting events do not apply to network runs.
    let had_cuts = sim
        .interventions
        .iter()
        .any(|iv| iv.kind == InterventionKind::Cut);
    if had_cuts {
        log::warn!("cutting events are skipped during gene network runs");
        sim.interventions
            .retain(|iv| iv.kind != InterventionKind::Cut);
    }

    let mut trace = GrnTrace {
        molecule_names: net.molecules.iter().map(|m| m.name.clone()).collect(),
        ..Default::default()
    };

    let dt = p.time.dt;
    let t_end = sim.time + p.time.total_time;
    let mut next_sample = sim.time;
    let n_ions = p.ions.len();

    while sim.time < t_end - 0.5 * dt {
        if sim.time >= next_sample - 0.5 * dt {
            trace.record(sim.time, net, &sim.vm_cell);
            next_sample += p.time.sampling;
        }
        net.apply_to(sim, n_ions);
        match clamped_vm {
            Some(vm) => {
                sim.vm_cell.fill(vm);
                sim.time += dt;
            }
            None => sim.step(p, mesh, dt)?,
        }
        net.advance(dt);
    }
    trace.record(sim.time, net, &sim.vm_cell);
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GrnChannelConfig, GrnMoleculeConfig, SimConfigFile};
    use crate::phase::PhaseKind;

    fn grn_sim_cfg() -> SimConfigFile {
        let mut cfg = SimConfigFile::default();
        cfg.world.world_size = 80e-6;
        cfg.time.time4sim = 0.5;
        cfg.grn.enabled = true;
        cfg.grn.molecules = vec![GrnMoleculeConfig {
            name: "opener".into(),
            init_conc: 2.0,
            decay: 0.0,
            ..Default::default()
        }];
        cfg.grn.grn_channels = vec![GrnChannelConfig {
            name: "k_boost".into(),
            ion: "K".into(),
            ligand: "opener".into(),
            max_multiplier: 3.0,
            km: 1.0,
            n: 2.0,
        }];
        cfg
    }

    fn setup(cfg: SimConfigFile) -> (Parameters, Mesh, Simulator, GeneNetwork) {
        let mut p = Parameters::from_config(&cfg).unwrap();
        p.set_time_profile(PhaseKind::SimGrn);
        let mesh = Mesh::build(&p).unwrap();
        let sim = Simulator::base_init(&p, &mesh);
        let net = GeneNetwork::from_config(&p.grn, &p.ions, mesh.n_cells()).unwrap();
        (p, mesh, sim, net)
    }

    #[test]
    fn isolated_run_keeps_the_clamp_and_skips_transport() {
        let (p, mut mesh, mut sim, mut net) = setup(grn_sim_cfg());
        let trace =
            run_core_sim(&p, &mut mesh, &mut sim, &mut net, Some(ISOLATED_VM)).unwrap();
        assert!(sim.vm_cell.iter().all(|&v| v == ISOLATED_VM));
        // Transport never ran: concentrations are untouched.
        let k = p.ions.index_of(crate::ion::Ion::K).unwrap();
        assert!(sim.cc_cells[k].iter().all(|&c| c == p.conc_cell[k]));
        assert!(trace.times.len() >= 5);
        assert_eq!(trace.molecule_names, vec!["opener".to_string()]);
    }

    #[test]
    fn piggybacked_run_modulates_transport() {
        let (p, mut mesh, mut sim, mut net) = setup(grn_sim_cfg());
        run_core_sim(&p, &mut mesh, &mut sim, &mut net, None).unwrap();
        let k = p.ions.index_of(crate::ion::Ion::K).unwrap();
        // The expressed channel saturates near its peak multiplier.
        assert!(sim.dm_mod[k].iter().all(|&m| m > 2.5));
        // And the extra K leak polarises the tissue.
        let vm = sim.vm_cell.iter().sum::<f64>() / sim.vm_cell.len() as f64;
        assert!(vm < 0.0);
    }

    #[test]
    fn cut_interventions_are_stripped_from_network_runs() {
        let mut cfg = grn_sim_cfg();
        cfg.interventions = vec![crate::config::InterventionConfig {
            kind: "cut".into(),
            ion: None,
            t_on: 0.1,
            t_off: 0.1,
            ..Default::default()
        }];
        let (p, mut mesh, mut sim, mut net) = setup(cfg);
        let n_before = mesh.n_cells();
        run_core_sim(&p, &mut mesh, &mut sim, &mut net, None).unwrap();
        assert_eq!(mesh.n_cells(), n_before);
        assert!(sim.interventions.is_empty());
    }
}

// Net electrical currents.
//
// Membrane current density is the charge-weighted sum of the step's fluxes.
// The cell-centred current vector is the area-weighted sum over membranes,
// pointing along the direction charge actually moves. On an extracellular
// grid the raw injected current picks up a correction enforcing charge
// continuity: the divergence left after it equals the local charge drain,
// div J = -d(rho)/dt.

use crate::mesh::Mesh;
use crate::parameters::Parameters;
use crate::sim::Simulator;
use crate::units::F;
use nalgebra::DVector;

pub fn compute(p: &Parameters, mesh: &Mesh, sim: &mut Simulator, dt: f64) {
    let n_mems = mesh.n_mems();

    for m in 0..n_mems {
        let mut i_m = 0.0;
        for (k, _) in p.ions.iter() {
            i_m += F * p.z[k] * (sim.fluxes_mem[k][m] + sim.fluxes_gj[k][m]);
        }
        sim.i_mem[m] = i_m;
    }

    // Cell-centred current density: inward current flows against the
    // outward membrane normal.
    for i in 0..mesh.n_cells() {
        let mut jx = 0.0;
        let mut jy = 0.0;
        for &m in &mesh.cell_mems[i] {
            jx -= sim.i_mem[m] * mesh.mem_norms[m].x * mesh.mem_sa[m];
            jy -= sim.i_mem[m] * mesh.mem_norms[m].y * mesh.mem_sa[m];
        }
        sim.j_cell_x[i] = jx / mesh.cell_sa[i];
        sim.j_cell_y[i] = jy / mesh.cell_sa[i];
    }

    if let Some(env) = &mesh.env {
        let n = env.len();
        let mut jx = vec![0.0f64; n];
        let mut jy = vec![0.0f64; n];
        for m in 0..n_mems {
            // Current entering a cell leaves the environment through the
            // membrane along the outward normal.
            let node = env.mem_to_grid[m];
            jx[node] -= sim.i_mem[m] * mesh.mem_norms[m].x;
            jy[node] -= sim.i_mem[m] * mesh.mem_norms[m].y;
        }

        // Charge continuity: the Poisson right-hand side carries the rate
        // of change of the node charge density, so the corrected field
        // satisfies div J = -d(rho)/dt instead of a spurious div J = 0.
        let mut rho = vec![0.0f64; n];
        for (k, _) in p.ions.iter() {
            for (r, c) in rho.iter_mut().zip(&sim.cc_env[k]) {
                *r += F * p.z[k] * c;
            }
        }

        let mut div = env.divergence(&jx, &jy);
        for (d, (now, prev)) in div.iter_mut().zip(rho.iter().zip(&sim.rho_env)) {
            *d += (now - prev) / dt;
        }
        env.zero_frame(&mut div);
        let rhs = DVector::from_vec(div);
        let phi: Vec<f64> = (&env.lap_free_inv * &rhs).iter().copied().collect();
        let (gx, gy) = env.gradient(&phi);
        for k in 0..n {
            jx[k] -= gx[k];
            jy[k] -= gy[k];
        }
        env.zero_frame(&mut jx);
        env.zero_frame(&mut jy);
        sim.j_env_x = jx;
        sim.j_env_y = jy;
        sim.rho_env = rho;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfigFile;
    use crate::phase::PhaseKind;

    fn setup(sim_ecm: bool) -> (Parameters, Mesh, Simulator) {
        let mut cfg = SimConfigFile::default();
        cfg.world.world_size = 80e-6;
        cfg.general.sim_ecm = sim_ecm;
        let mut p = Parameters::from_config(&cfg).unwrap();
        p.set_time_profile(PhaseKind::Init);
        let mesh = Mesh::build(&p).unwrap();
        let sim = Simulator::base_init(&p, &mesh);
        (p, mesh, sim)
    }

    #[test]
    fn quiescent_state_carries_no_current() {
        let (p, mesh, mut sim) = setup(false);
        compute(&p, &mesh, &mut sim, p.time.dt);
        assert!(sim.i_mem.iter().all(|&i| i == 0.0));
        assert!(sim.j_cell_x.iter().all(|&j| j == 0.0));
    }

    #[test]
    fn cation_influx_registers_as_inward_current() {
        let (p, mesh, mut sim) = setup(false);
        let k = p.ions.index_of(crate::ion::Ion::Na).unwrap();
        sim.fluxes_mem[k][0] = 1e-7;
        compute(&p, &mesh, &mut sim, p.time.dt);
        assert!(sim.i_mem[0] > 0.0);
        let cell = mesh.mem_to_cell[0];
        let j = (sim.j_cell_x[cell].powi(2) + sim.j_cell_y[cell].powi(2)).sqrt();
        assert!(j > 0.0, "single-membrane influx must leave a directed current");
    }

    #[test]
    fn env_current_is_divergence_corrected() {
        let (p, mut mesh, mut sim) = setup(true);
        sim.step(&p, &mut mesh, p.time.dt).unwrap();
        let env = mesh.env.as_ref().unwrap();
        assert_eq!(sim.j_env_x.len(), env.len());
        assert!(sim.j_env_x.iter().all(|j| j.is_finite()));
        // The frame is grounded.
        for i in 0..env.nx {
            assert_eq!(sim.j_env_x[i], 0.0);
            assert_eq!(sim.j_env_y[i], 0.0);
        }
    }

    #[test]
    fn changing_env_charge_drives_a_correction_current() {
        let (p, mesh, mut sim) = setup(true);
        let env = mesh.env.as_ref().unwrap();
        compute(&p, &mesh, &mut sim, p.time.dt);
        let mid = (env.ny / 2) * env.nx + env.nx / 2;
        let rho_before = sim.rho_env[mid];

        // Deposit a smooth cation bump with no membrane activity at all;
        // the node charge now changes in time.
        let k = p.ions.index_of(crate::ion::Ion::Na).unwrap();
        for j in 0..env.ny {
            for i in 0..env.nx {
                let x = i as f64 / (env.nx - 1) as f64 - 0.5;
                let y = j as f64 / (env.ny - 1) as f64 - 0.5;
                sim.cc_env[k][j * env.nx + i] += 1e-3 * (-20.0 * (x * x + y * y)).exp();
            }
        }
        compute(&p, &mesh, &mut sim, p.time.dt);

        // The stored charge density tracks the concentrations.
        let gained = sim.rho_env[mid] - rho_before;
        assert!((gained - F * 1e-3).abs() <= 1e-9 * F * 1e-3);
        // The accumulating charge must be fed by a real current.
        let peak = sim
            .j_env_x
            .iter()
            .chain(&sim.j_env_y)
            .fold(0.0f64, |a, &j| a.max(j.abs()));
        assert!(peak > 1e-6, "charge accumulation left no trace: {peak}");
    }
}

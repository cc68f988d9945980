// Electroosmotic fluid flow.
//
// Inside the cluster, the net charge a cell carries feels the local field
// and drags cytosol with it; the creeping-flow velocity comes from a Stokes
// solve over the gap-junction Laplacian followed by a projection onto the
// divergence-free component, since water is incompressible. On the
// extracellular grid the double layer against the membranes produces a
// Helmholtz-Smoluchowski slip velocity, divergence-corrected the same way.

use crate::mesh::{ops, Mesh};
use crate::parameters::Parameters;
use crate::sim::{voltage, Simulator};
use crate::units::{EPS0, EPS_WATER};
use nalgebra::DVector;

pub fn step(p: &Parameters, mesh: &Mesh, sim: &mut Simulator) {
    let n = mesh.n_cells();

    // Body force: local charge density times the in-plane field.
    let q = voltage::cell_charge(p, mesh, &sim.cc_cells);
    let e_field = ops::cell_gradient(mesh, &sim.vm_cell);
    let mut fx = vec![0.0f64; n];
    let mut fy = vec![0.0f64; n];
    for i in 0..n {
        let rho = q[i] / mesh.cell_vol[i];
        fx[i] = -rho * e_field[i].x;
        fy[i] = -rho * e_field[i].y;
    }

    // Stokes flow: mu * lap(u) = -F over the free gap-junction Laplacian;
    // the rim is handled by the projection, not the solve.
    let rhs_x = DVector::from_iterator(n, fx.iter().map(|f| -f / p.mu_water));
    let rhs_y = DVector::from_iterator(n, fy.iter().map(|f| -f / p.mu_water));
    let ux: Vec<f64> = (&mesh.lap_gj_inv * &rhs_x).iter().copied().collect();
    let uy: Vec<f64> = (&mesh.lap_gj_inv * &rhs_y).iter().copied().collect();

    let projected = ops::hh_cells(mesh, &ux, &uy);
    sim.u_cell_x = projected.free_x;
    sim.u_cell_y = projected.free_y;

    if let Some(env) = &mesh.env {
        // Slip velocity u = -eps * zeta * E / mu, with E = J / sigma.
        let coef = -EPS0 * EPS_WATER * p.zeta / (p.mu_water * p.media_sigma);
        let ux: Vec<f64> = sim.j_env_x.iter().map(|j| coef * j).collect();
        let uy: Vec<f64> = sim.j_env_y.iter().map(|j| coef * j).collect();
        let (mut ex, mut ey, _) = env.hh_decomp(&ux, &uy);
        env.zero_frame(&mut ex);
        env.zero_frame(&mut ey);
        sim.u_env_x = ex;
        sim.u_env_y = ey;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfigFile;
    use crate::mesh::ops::div_norm;
    use crate::phase::PhaseKind;

    fn setup() -> (Parameters, Mesh, Simulator) {
        let mut cfg = SimConfigFile::default();
        cfg.world.world_size = 80e-6;
        cfg.flow.enabled = true;
        let mut p = Parameters::from_config(&cfg).unwrap();
        p.set_time_profile(PhaseKind::Init);
        let mesh = Mesh::build(&p).unwrap();
        let sim = Simulator::base_init(&p, &mesh);
        (p, mesh, sim)
    }

    #[test]
    fn neutral_tissue_does_not_flow() {
        let (p, mesh, mut sim) = setup();
        step(&p, &mesh, &mut sim);
        let peak = sim
            .u_cell_x
            .iter()
            .chain(&sim.u_cell_y)
            .fold(0.0f64, |a, &u| a.max(u.abs()));
        assert!(peak < 1e-12, "flow without charge or field: {peak}");
    }

    #[test]
    fn polarised_tissue_yields_a_finite_incompressible_flow() {
        let (p, mut mesh, mut sim) = setup();
        // Let the transport polarise the tissue, then solve the flow.
        for _ in 0..100 {
            sim.step(&p, &mut mesh, p.time.dt).unwrap();
        }
        assert!(sim.u_cell_x.iter().all(|u| u.is_finite()));
        assert!(sim.u_cell_y.iter().all(|u| u.is_finite()));
        let projected = div_norm(&mesh, &sim.u_cell_x, &sim.u_cell_y);
        let speed: f64 = sim
            .u_cell_x
            .iter()
            .zip(&sim.u_cell_y)
            .map(|(x, y)| (x * x + y * y).sqrt())
            .sum();
        // The projection zeroes the measured divergence up to rounding,
        // on any mesh.
        assert!(projected <= 1e-9 * (speed / p.cell_radius).max(1e-30));
    }
}

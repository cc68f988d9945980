// Tissue deformation.
//
// Galvanotropism: cells remodel along the local current density, so the
// body force driving the elastic problem is proportional to J. The
// steady-state solve treats each step as quasi-static; the time-dependent
// solve integrates a damped wave equation on two displacement levels.
// Either way the displacement field is projected onto its divergence-free
// component, since the tissue conserves volume, and the configured boundary
// condition is applied last.

use crate::error::SimError;
use crate::mesh::{ops, Mesh};
use crate::parameters::{DeformBoundary, Parameters};
use crate::sim::Simulator;
use crate::units::R;
use nalgebra::DVector;

/// Mass density of the tissue medium [kg/m^3].
const TISSUE_DENSITY: f64 = 1000.0;

/// The explicit wave integrator is CFL-limited by the shear wave speed over
/// one cell diameter. Violations abort before the run starts, reporting a
/// step that would work.
pub fn check_stability(p: &Parameters) -> Result<(), SimError> {
    let wave_speed = (p.lame_mu / TISSUE_DENSITY).sqrt();
    let ratio = p.time.dt * wave_speed / (2.0 * p.cell_radius);
    if ratio > 1.0 {
        return Err(SimError::TimestepTooLarge {
            solver: "time-dependent deformation",
            dt: p.time.dt,
            suggested: 0.9 * 2.0 * p.cell_radius / wave_speed,
        });
    }
    Ok(())
}

pub fn step(p: &Parameters, mesh: &Mesh, sim: &mut Simulator, dt: f64) {
    let n = mesh.n_cells();

    // Galvanotropic target displacement per cell.
    let mut goal_x: Vec<f64> = sim.j_cell_x.iter().map(|j| p.galvanotropism * j).collect();
    let mut goal_y: Vec<f64> = sim.j_cell_y.iter().map(|j| p.galvanotropism * j).collect();

    if p.osmotic {
        // Osmotic pressure gradients push tissue toward dilute regions.
        let rt = R * p.temperature;
        let pi: Vec<f64> = (0..n)
            .map(|i| rt * sim.cc_cells.iter().map(|cc| cc[i]).sum::<f64>())
            .collect();
        let grad = ops::cell_gradient(mesh, &pi);
        let scale = p.cell_radius * p.cell_radius / p.lame_mu;
        for i in 0..n {
            goal_x[i] -= scale * grad[i].x;
            goal_y[i] -= scale * grad[i].y;
        }
    }

    let (mut dx, mut dy) = if p.td_deform {
        // Two-level damped wave integration. Force density recovers the
        // galvanotropic displacement as its steady state.
        let k = dt * dt * p.lame_mu / TISSUE_DENSITY;
        let gamma = dt * dt * p.mu_tissue * p.lame_mu / (TISSUE_DENSITY * 2.0 * p.cell_radius);
        let f_scale = k / (p.cell_radius * p.cell_radius);

        let d_x = DVector::from_vec(sim.d_cell_x.clone());
        let d_y = DVector::from_vec(sim.d_cell_y.clone());
        let lap_x = &mesh.lap_gj * &d_x;
        let lap_y = &mesh.lap_gj * &d_y;

        let first_step = sim.time == 0.0;
        let mut dx = vec![0.0f64; n];
        let mut dy = vec![0.0f64; n];
        for i in 0..n {
            if first_step {
                dx[i] = sim.d_cell_x[i] + 0.5 * k * lap_x[i] + 0.5 * f_scale * goal_x[i];
                dy[i] = sim.d_cell_y[i] + 0.5 * k * lap_y[i] + 0.5 * f_scale * goal_y[i];
            } else {
                let vel_x = sim.d_cell_x[i] - sim.d_prev_x[i];
                let vel_y = sim.d_cell_y[i] - sim.d_prev_y[i];
                dx[i] = 2.0 * sim.d_cell_x[i] - sim.d_prev_x[i] - gamma * vel_x
                    + k * lap_x[i]
                    + f_scale * goal_x[i];
                dy[i] = 2.0 * sim.d_cell_y[i] - sim.d_prev_y[i] - gamma * vel_y
                    + k * lap_y[i]
                    + f_scale * goal_y[i];
            }
        }
        (dx, dy)
    } else {
        // Quasi-static: the goal field is the displacement proposal.
        (goal_x, goal_y)
    };

    // Volume conservation.
    let projected = ops::hh_cells(mesh, &dx, &dy);
    dx = projected.free_x;
    dy = projected.free_y;

    match p.deform_boundary {
        DeformBoundary::Fixed => {
            for (i, &b) in mesh.is_boundary_cell.iter().enumerate() {
                if b {
                    dx[i] = 0.0;
                    dy[i] = 0.0;
                }
            }
        }
        DeformBoundary::Pinned => {
            if let Some(pin) = mesh.is_boundary_cell.iter().position(|&b| b) {
                let (px, py) = (dx[pin], dy[pin]);
                for i in 0..n {
                    dx[i] -= px;
                    dy[i] -= py;
                }
            }
        }
    }

    sim.d_prev_x = std::mem::take(&mut sim.d_cell_x);
    sim.d_prev_y = std::mem::take(&mut sim.d_cell_y);
    sim.d_cell_x = dx;
    sim.d_cell_y = dy;
}

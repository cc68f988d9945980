// Membrane voltage solvers.
//
// The fast solver treats each cell as an isolated capacitor charged by its
// net ionic content. The full solver couples the cells through a Poisson
// solve over the cluster, screened by the permittivity of water.

use crate::mesh::Mesh;
use crate::parameters::{Parameters, SolverKind};
use crate::units::{EPS0, EPS_WATER, F};
use nalgebra::DVector;

/// Net charge of every cell [C], from the signed ionic content.
pub fn cell_charge(p: &Parameters, mesh: &Mesh, cc_cells: &[Vec<f64>]) -> Vec<f64> {
    let n = mesh.n_cells();
    let mut q = vec![0.0f64; n];
    for (k, _) in p.ions.iter() {
        let z = p.z[k];
        for i in 0..n {
            q[i] += F * z * cc_cells[k][i] * mesh.cell_vol[i];
        }
    }
    q
}

/// Compute the per-cell membrane voltage [V].
pub fn solve(p: &Parameters, mesh: &Mesh, cc_cells: &[Vec<f64>]) -> Vec<f64> {
    let q = cell_charge(p, mesh, cc_cells);
    match p.solver {
        SolverKind::Fast => q
            .iter()
            .zip(&mesh.cell_sa)
            .map(|(qi, sa)| qi / (p.cm * sa))
            .collect(),
        SolverKind::Full => {
            let rho: Vec<f64> = q
                .iter()
                .zip(&mesh.cell_vol)
                .map(|(qi, vol)| qi / vol)
                .collect();
            let rhs = DVector::from_iterator(
                rho.len(),
                rho.iter().map(|r| -r / (EPS0 * EPS_WATER)),
            );
            (&mesh.lap_gj_p_inv * &rhs).iter().copied().collect()
        }
    }
}

// Discrete operators over the cell cluster and the environmental grid.
//
// The gap-junction Laplacian treats each cell as a finite volume whose
// exchange weights are membrane-area over centre distance. Poisson problems
// are solved through Moore-Penrose pseudo-inverses computed once at build
// time, which keeps the per-step cost at a matrix-vector product.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use ultraviolet::DVec2;

use super::Mesh;
use crate::error::SimError;
use crate::parameters::Parameters;

const PINV_EPS: f64 = 1e-12;

/// Moore-Penrose pseudo-inverse with a cutoff relative to the matrix norm,
/// so null singular values are truncated whatever the operator's scale.
fn pinv(m: DMatrix<f64>) -> Result<DMatrix<f64>, SimError> {
    let eps = PINV_EPS * m.norm().max(1.0);
    m.pseudo_inverse(eps).map_err(SimError::geometry)
}

/// Side length of the environmental grid in nodes.
pub const ENV_GRID_N: usize = 25;

pub struct Laplacians {
    pub lap_gj: DMatrix<f64>,
    pub lap_gj_inv: DMatrix<f64>,
    /// Variant with identity rows at boundary cells, for problems with the
    /// cluster rim held at zero.
    pub lap_gj_p: DMatrix<f64>,
    pub lap_gj_p_inv: DMatrix<f64>,
    /// Orthogonal projector onto divergence-free stacked (x, y) cell fields.
    pub hh_proj: DMatrix<f64>,
}

/// Assemble the gap-junction Laplacians from the mesh connectivity.
pub fn build_laplacians(
    centres: &[DVec2],
    cell_vol: &[f64],
    mem_to_cell: &[usize],
    mem_sa: &[f64],
    mem_norms: &[DVec2],
    mem_gj: &[Option<usize>],
    is_boundary_cell: &[bool],
) -> Result<Laplacians, SimError> {
    let n = centres.len();
    let mut lap = DMatrix::<f64>::zeros(n, n);

    for (m, partner) in mem_gj.iter().enumerate() {
        let Some(pm) = partner else { continue };
        let i = mem_to_cell[m];
        let j = mem_to_cell[*pm];
        let dist = (centres[j] - centres[i]).mag();
        if dist <= 0.0 {
            return Err(SimError::geometry("coincident cell centres in cluster"));
        }
        let w = mem_sa[m] / (dist * cell_vol[i]);
        lap[(i, j)] += w;
        lap[(i, i)] -= w;
    }

    let mut lap_p = lap.clone();
    for (i, &b) in is_boundary_cell.iter().enumerate() {
        if b {
            for j in 0..n {
                lap_p[(i, j)] = 0.0;
            }
            lap_p[(i, i)] = 1.0;
        }
    }

    let lap_inv = pinv(lap.clone())?;
    let lap_p_inv = pinv(lap_p.clone())?;

    // Membrane-normal divergence over stacked (x, y) cell fields, the same
    // stencil `hh_cells` removes. Boundary-cell rows are left empty since no
    // incompressibility is enforced on the rim. Its least-squares
    // pseudo-inverse yields an exact projector: D pinv(D) D = D, so the
    // projected field has zero measured divergence and projecting twice
    // changes nothing.
    let mut div_op = DMatrix::<f64>::zeros(n, 2 * n);
    for (m, partner) in mem_gj.iter().enumerate() {
        let i = mem_to_cell[m];
        if is_boundary_cell[i] {
            continue;
        }
        let w = mem_sa[m] / cell_vol[i];
        let nx = w * mem_norms[m].x;
        let ny = w * mem_norms[m].y;
        match partner {
            Some(pm) => {
                let j = mem_to_cell[*pm];
                div_op[(i, i)] += 0.5 * nx;
                div_op[(i, n + i)] += 0.5 * ny;
                div_op[(i, j)] += 0.5 * nx;
                div_op[(i, n + j)] += 0.5 * ny;
            }
            None => {
                div_op[(i, i)] += nx;
                div_op[(i, n + i)] += ny;
            }
        }
    }
    let hh_proj = DMatrix::<f64>::identity(2 * n, 2 * n) - pinv(div_op.clone())? * div_op;

    Ok(Laplacians {
        lap_gj: lap,
        lap_gj_inv: lap_inv,
        lap_gj_p: lap_p,
        lap_gj_p_inv: lap_p_inv,
        hh_proj,
    })
}

/// Result of a Helmholtz-Hodge projection over the cluster.
pub struct HhFields {
    pub free_x: Vec<f64>,
    pub free_y: Vec<f64>,
}

/// Project a cell-centred vector field onto its divergence-free component.
///
/// A matrix-vector product with the precomputed projector. The result has
/// zero membrane-normal divergence on interior cells up to rounding, and
/// re-projecting it returns the same field.
pub fn hh_cells(mesh: &Mesh, fx: &[f64], fy: &[f64]) -> HhFields {
    let n = mesh.n_cells();
    let mut f = DVector::<f64>::zeros(2 * n);
    for i in 0..n {
        f[i] = fx[i];
        f[n + i] = fy[i];
    }
    let free = &mesh.hh_proj * f;
    HhFields {
        free_x: free.as_slice()[..n].to_vec(),
        free_y: free.as_slice()[n..].to_vec(),
    }
}

/// Cell-averaged gradient of a scalar cell field, from membrane-normal
/// differences weighted by membrane area. Boundary membranes contribute
/// nothing, so rim gradients are one-sided.
pub fn cell_gradient(mesh: &Mesh, f: &[f64]) -> Vec<DVec2> {
    let n = mesh.n_cells();
    let mut grad = vec![DVec2::zero(); n];
    let mut weight = vec![0.0f64; n];
    for m in 0..mesh.n_mems() {
        let Some(pm) = mesh.mem_gj[m] else { continue };
        let i = mesh.mem_to_cell[m];
        let j = mesh.mem_to_cell[pm];
        let dist = (mesh.cell_centres[j] - mesh.cell_centres[i]).mag();
        let g_n = (f[j] - f[i]) / dist;
        grad[i] += mesh.mem_norms[m] * g_n * mesh.mem_sa[m];
        weight[i] += mesh.mem_sa[m];
    }
    for i in 0..n {
        if weight[i] > 0.0 {
            grad[i] /= weight[i];
        }
    }
    grad
}

/// Net gj-graph divergence magnitude of a cell field, for diagnostics.
pub fn div_norm(mesh: &Mesh, fx: &[f64], fy: &[f64]) -> f64 {
    let n = mesh.n_cells();
    let mut div = vec![0.0f64; n];
    for m in 0..mesh.n_mems() {
        let Some(pm) = mesh.mem_gj[m] else { continue };
        let i = mesh.mem_to_cell[m];
        let j = mesh.mem_to_cell[pm];
        let f_at_mem = DVec2::new(0.5 * (fx[i] + fx[j]), 0.5 * (fy[i] + fy[j]));
        div[i] += f_at_mem.dot(mesh.mem_norms[m]) * mesh.mem_sa[m] / mesh.cell_vol[i];
    }
    div.iter()
        .zip(&mesh.is_boundary_cell)
        .filter(|(_, &b)| !b)
        .map(|(d, _)| d * d)
        .sum::<f64>()
        .sqrt()
}

/// Regular square grid discretising the extracellular environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvGrid {
    pub nx: usize,
    pub ny: usize,
    /// Node spacing [m].
    pub delta: f64,
    /// Laplacian with zero-normal-gradient boundaries.
    pub lap_free: DMatrix<f64>,
    pub lap_free_inv: DMatrix<f64>,
    /// Laplacian with the boundary frame held at zero.
    pub lap_dirichlet_inv: DMatrix<f64>,
    /// Nearest grid node per membrane midpoint.
    pub mem_to_grid: Vec<usize>,
}

impl EnvGrid {
    pub fn build(p: &Parameters, mem_mids: &[DVec2]) -> Result<Self, SimError> {
        let nx = ENV_GRID_N;
        let ny = ENV_GRID_N;
        let delta = p.world_size / (nx as f64 - 1.0);
        let n = nx * ny;
        let inv_d2 = 1.0 / (delta * delta);

        let idx = |i: usize, j: usize| j * nx + i;
        let mut lap_free = DMatrix::<f64>::zeros(n, n);
        let mut lap_dir = DMatrix::<f64>::zeros(n, n);
        for j in 0..ny {
            for i in 0..nx {
                let k = idx(i, j);
                let mut neighbors = Vec::with_capacity(4);
                if i > 0 {
                    neighbors.push(idx(i - 1, j));
                }
                if i + 1 < nx {
                    neighbors.push(idx(i + 1, j));
                }
                if j > 0 {
                    neighbors.push(idx(i, j - 1));
                }
                if j + 1 < ny {
                    neighbors.push(idx(i, j + 1));
                }

                // Missing neighbors mirror the centre value, which is the
                // zero-normal-gradient condition.
                for &nb in &neighbors {
                    lap_free[(k, nb)] = inv_d2;
                }
                lap_free[(k, k)] = -(neighbors.len() as f64) * inv_d2;

                let on_frame = i == 0 || j == 0 || i + 1 == nx || j + 1 == ny;
                if on_frame {
                    lap_dir[(k, k)] = 1.0;
                } else {
                    for &nb in &neighbors {
                        lap_dir[(k, nb)] = inv_d2;
                    }
                    lap_dir[(k, k)] = -4.0 * inv_d2;
                }
            }
        }

        let lap_free_inv = pinv(lap_free.clone())?;
        let lap_dirichlet_inv = pinv(lap_dir)?;

        let mem_to_grid = mem_mids
            .iter()
            .map(|mid| {
                let gi = ((mid.x / delta).round() as isize).clamp(0, nx as isize - 1) as usize;
                let gj = ((mid.y / delta).round() as isize).clamp(0, ny as isize - 1) as usize;
                idx(gi, gj)
            })
            .collect();

        Ok(EnvGrid {
            nx,
            ny,
            delta,
            lap_free,
            lap_free_inv,
            lap_dirichlet_inv,
            mem_to_grid,
        })
    }

    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    fn idx(&self, i: usize, j: usize) -> usize {
        j * self.nx + i
    }

    /// Central-difference gradient, one-sided on the frame.
    pub fn gradient(&self, phi: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = self.len();
        let mut gx = vec![0.0; n];
        let mut gy = vec![0.0; n];
        for j in 0..self.ny {
            for i in 0..self.nx {
                let k = self.idx(i, j);
                gx[k] = match i {
                    0 => (phi[self.idx(1, j)] - phi[k]) / self.delta,
                    i if i + 1 == self.nx => (phi[k] - phi[self.idx(i - 1, j)]) / self.delta,
                    _ => (phi[self.idx(i + 1, j)] - phi[self.idx(i - 1, j)]) / (2.0 * self.delta),
                };
                gy[k] = match j {
                    0 => (phi[self.idx(i, 1)] - phi[k]) / self.delta,
                    j if j + 1 == self.ny => (phi[k] - phi[self.idx(i, j - 1)]) / self.delta,
                    _ => (phi[self.idx(i, j + 1)] - phi[self.idx(i, j - 1)]) / (2.0 * self.delta),
                };
            }
        }
        (gx, gy)
    }

    pub fn divergence(&self, fx: &[f64], fy: &[f64]) -> Vec<f64> {
        let (dfx_dx, _) = self.gradient(fx);
        let (_, dfy_dy) = self.gradient(fy);
        dfx_dx.iter().zip(&dfy_dy).map(|(a, b)| a + b).collect()
    }

    /// Zero the outermost node frame of a grid field in place.
    pub fn zero_frame(&self, f: &mut [f64]) {
        for i in 0..self.nx {
            f[self.idx(i, 0)] = 0.0;
            f[self.idx(i, self.ny - 1)] = 0.0;
        }
        for j in 0..self.ny {
            f[self.idx(0, j)] = 0.0;
            f[self.idx(self.nx - 1, j)] = 0.0;
        }
    }

    /// Remove the curl-free component of a grid vector field. Returns the
    /// corrected field and the scalar potential that was subtracted.
    pub fn hh_decomp(&self, fx: &[f64], fy: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut div = self.divergence(fx, fy);
        self.zero_frame(&mut div);
        let rhs = DVector::from_vec(div);
        let phi: Vec<f64> = (&self.lap_dirichlet_inv * &rhs).iter().copied().collect();
        let (gpx, gpy) = self.gradient(&phi);
        let out_x = fx.iter().zip(&gpx).map(|(f, g)| f - g).collect();
        let out_y = fy.iter().zip(&gpy).map(|(f, g)| f - g).collect();
        (out_x, out_y, phi)
    }
}

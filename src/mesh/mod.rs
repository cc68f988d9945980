// Cell cluster mesh.
//
// The cluster is an irregular Voronoi tessellation cropped to a disc. Every
// polygon edge is a membrane domain; edges shared between two polygons are
// paired into gap junctions, unshared edges face the environment. All
// transport and field solves run over this connectivity.

pub mod ops;
pub mod voronoi;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use ultraviolet::DVec2;

use crate::config::TargetSelector;
use crate::error::SimError;
use crate::parameters::Parameters;
use nalgebra::DMatrix;

pub use ops::EnvGrid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mesh {
    /// Area centroids.
    pub cell_centres: Vec<DVec2>,
    /// Vertex loops, kept for rebuilds after cutting events.
    pub cell_polys: Vec<Vec<DVec2>>,
    /// Cytosolic volume [m^3].
    pub cell_vol: Vec<f64>,
    /// Total membrane surface area [m^2].
    pub cell_sa: Vec<f64>,
    /// Membrane indices owned by each cell.
    pub cell_mems: Vec<SmallVec<[usize; 8]>>,
    pub is_boundary_cell: Vec<bool>,

    pub mem_to_cell: Vec<usize>,
    pub mem_mids: Vec<DVec2>,
    /// Outward unit normals.
    pub mem_norms: Vec<DVec2>,
    /// Edge length times cell height [m^2].
    pub mem_sa: Vec<f64>,
    /// Partner membrane on the adjacent cell. `None` on the cluster rim and
    /// across severed insular-tissue borders.
    pub mem_gj: Vec<Option<usize>>,

    pub lap_gj: DMatrix<f64>,
    pub lap_gj_inv: DMatrix<f64>,
    pub lap_gj_p: DMatrix<f64>,
    pub lap_gj_p_inv: DMatrix<f64>,
    /// Orthogonal projector onto divergence-free stacked (x, y) cell fields.
    pub hh_proj: DMatrix<f64>,

    /// Present only when the extracellular space is gridded.
    pub env: Option<EnvGrid>,
}

impl Mesh {
    pub fn build(p: &Parameters) -> Result<Mesh, SimError> {
        let seeds = voronoi::seed_points(p);
        let raw = voronoi::tessellate(p, &seeds)?;
        Self::assemble(p, raw.centres, raw.polys)
    }

    fn assemble(
        p: &Parameters,
        centres: Vec<DVec2>,
        polys: Vec<Vec<DVec2>>,
    ) -> Result<Mesh, SimError> {
        let n_cells = centres.len();
        let mut cell_vol = Vec::with_capacity(n_cells);
        let mut cell_sa = vec![0.0f64; n_cells];
        let mut cell_mems: Vec<SmallVec<[usize; 8]>> = vec![SmallVec::new(); n_cells];

        let mut mem_to_cell = Vec::new();
        let mut mem_mids = Vec::new();
        let mut mem_norms = Vec::new();
        let mut mem_sa = Vec::new();

        for (ci, poly) in polys.iter().enumerate() {
            let (area, _) = voronoi::polygon_area_centroid(poly);
            cell_vol.push(area * p.cell_height);

            let nv = poly.len();
            for vi in 0..nv {
                let a = poly[vi];
                let b = poly[(vi + 1) % nv];
                let edge = b - a;
                let len = edge.mag();
                if len <= 0.0 {
                    continue;
                }
                let mid = (a + b) * 0.5;
                let mut norm = DVec2::new(edge.y, -edge.x) / len;
                if norm.dot(mid - centres[ci]) < 0.0 {
                    norm = -norm;
                }
                let sa = len * p.cell_height;

                let m = mem_to_cell.len();
                mem_to_cell.push(ci);
                mem_mids.push(mid);
                mem_norms.push(norm);
                mem_sa.push(sa);
                cell_mems[ci].push(m);
                cell_sa[ci] += sa;
            }
        }

        let mut mem_gj = pair_membranes(p, &mem_mids, &mem_norms, &mem_to_cell);

        // Boundary flags describe the geometric hull, so they are fixed
        // before any insular severing; severed cells stay interior cells.
        let is_boundary_cell: Vec<bool> = cell_mems
            .iter()
            .map(|mems| mems.iter().any(|&m| mem_gj[m].is_none()))
            .collect();

        check_connectivity(n_cells, &mem_to_cell, &mem_gj)?;
        sever_insular(p, &centres, &is_boundary_cell, &mem_to_cell, &mut mem_gj);

        let laps = ops::build_laplacians(
            &centres,
            &cell_vol,
            &mem_to_cell,
            &mem_sa,
            &mem_norms,
            &mem_gj,
            &is_boundary_cell,
        )?;

        let env = if p.sim_ecm {
            Some(EnvGrid::build(p, &mem_mids)?)
        } else {
            None
        };

        Ok(Mesh {
            cell_centres: centres,
            cell_polys: polys,
            cell_vol,
            cell_sa,
            cell_mems,
            is_boundary_cell,
            mem_to_cell,
            mem_mids,
            mem_norms,
            mem_sa,
            mem_gj,
            lap_gj: laps.lap_gj,
            lap_gj_inv: laps.lap_gj_inv,
            lap_gj_p: laps.lap_gj_p,
            lap_gj_p_inv: laps.lap_gj_p_inv,
            hh_proj: laps.hh_proj,
            env,
        })
    }

    pub fn n_cells(&self) -> usize {
        self.cell_centres.len()
    }

    pub fn n_mems(&self) -> usize {
        self.mem_to_cell.len()
    }

    /// Geometric centre of the cluster.
    pub fn centre(&self) -> DVec2 {
        let mut c = DVec2::zero();
        for p in &self.cell_centres {
            c += *p;
        }
        c / self.n_cells() as f64
    }

    /// Cells matched by a target selector. Circle coordinates are relative
    /// to the cluster centre.
    pub fn cells_in_target(&self, target: &TargetSelector) -> Vec<usize> {
        select_cells(&self.cell_centres, &self.is_boundary_cell, target)
            .into_iter()
            .enumerate()
            .filter(|(_, hit)| *hit)
            .map(|(i, _)| i)
            .collect()
    }

    /// Remove the given cells and rebuild connectivity and operators.
    ///
    /// Fails without modifying the mesh when the remainder would be
    /// disconnected or empty. On success returns the old index of every
    /// surviving cell, in new-index order, so callers can regather their
    /// per-cell state.
    pub fn cut_cells(&mut self, p: &Parameters, targets: &[usize]) -> Result<Vec<usize>, SimError> {
        let mut remove = vec![false; self.n_cells()];
        for &t in targets {
            if t >= self.n_cells() {
                return Err(SimError::geometry(format!(
                    "cut target {t} is out of range"
                )));
            }
            remove[t] = true;
        }

        let keep: Vec<usize> = (0..self.n_cells()).filter(|&i| !remove[i]).collect();
        if keep.len() < 2 {
            return Err(SimError::geometry(
                "cutting event would remove the whole cluster",
            ));
        }
        if keep.len() == self.n_cells() {
            return Ok(keep);
        }

        let centres: Vec<DVec2> = keep.iter().map(|&i| self.cell_centres[i]).collect();
        let polys: Vec<Vec<DVec2>> = keep.iter().map(|&i| self.cell_polys[i].clone()).collect();

        let rebuilt = Mesh::assemble(p, centres, polys).map_err(|e| match e {
            SimError::Geometry(msg) => SimError::geometry(format!(
                "cutting event rejected, the wound would split the cluster: {msg}"
            )),
            other => other,
        })?;
        *self = rebuilt;
        Ok(keep)
    }
}

/// Per-cell membership mask of a target selector. Circle coordinates are
/// relative to the mean of the cell centres.
fn select_cells(
    centres: &[DVec2],
    is_boundary_cell: &[bool],
    target: &TargetSelector,
) -> Vec<bool> {
    match target {
        TargetSelector::All => vec![true; centres.len()],
        TargetSelector::Boundary => is_boundary_cell.to_vec(),
        TargetSelector::Circle { x, y, radius } => {
            let mut c = DVec2::zero();
            for p in centres {
                c += *p;
            }
            let c = c / centres.len() as f64 + DVec2::new(*x, *y);
            centres.iter().map(|p| (*p - c).mag() <= *radius).collect()
        }
    }
}

/// Unpair every gap junction crossing the border of an insular tissue
/// region. The severed membranes then face the environment like rim
/// membranes do.
fn sever_insular(
    p: &Parameters,
    centres: &[DVec2],
    is_boundary_cell: &[bool],
    mem_to_cell: &[usize],
    mem_gj: &mut [Option<usize>],
) {
    for tissue in p.tissues.iter().filter(|t| t.insular) {
        let member = select_cells(centres, is_boundary_cell, &tissue.target);
        for m in 0..mem_gj.len() {
            if let Some(pm) = mem_gj[m] {
                if member[mem_to_cell[m]] != member[mem_to_cell[pm]] {
                    mem_gj[pm] = None;
                    mem_gj[m] = None;
                }
            }
        }
    }
}

/// Pair membranes whose midpoints coincide into gap junctions. Edges shared
/// by two Voronoi regions have identical endpoints, so a tight tolerance is
/// enough; anything unpaired faces the environment.
fn pair_membranes(
    p: &Parameters,
    mem_mids: &[DVec2],
    mem_norms: &[DVec2],
    mem_to_cell: &[usize],
) -> Vec<Option<usize>> {
    let n = mem_mids.len();
    let tol = 1e-3 * p.cell_radius;
    let bucket = p.cell_radius;

    let key = |pt: DVec2| {
        (
            (pt.x / bucket).floor() as i64,
            (pt.y / bucket).floor() as i64,
        )
    };
    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (m, mid) in mem_mids.iter().enumerate() {
        grid.entry(key(*mid)).or_default().push(m);
    }

    let mut pairs: Vec<Option<usize>> = vec![None; n];
    for m in 0..n {
        if pairs[m].is_some() {
            continue;
        }
        let (kx, ky) = key(mem_mids[m]);
        let mut best: Option<(usize, f64)> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(cands) = grid.get(&(kx + dx, ky + dy)) else {
                    continue;
                };
                for &c in cands {
                    if c == m
                        || pairs[c].is_some()
                        || mem_to_cell[c] == mem_to_cell[m]
                        || mem_norms[c].dot(mem_norms[m]) >= 0.0
                    {
                        continue;
                    }
                    let d = (mem_mids[c] - mem_mids[m]).mag();
                    if d < tol && best.map_or(true, |(_, bd)| d < bd) {
                        best = Some((c, d));
                    }
                }
            }
        }
        if let Some((c, _)) = best {
            pairs[m] = Some(c);
            pairs[c] = Some(m);
        }
    }
    pairs
}

/// Breadth-first reachability over the gap-junction graph.
fn check_connectivity(
    n_cells: usize,
    mem_to_cell: &[usize],
    mem_gj: &[Option<usize>],
) -> Result<(), SimError> {
    if n_cells == 0 {
        return Err(SimError::geometry("empty cluster"));
    }
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n_cells];
    for (m, partner) in mem_gj.iter().enumerate() {
        if let Some(pm) = partner {
            adj[mem_to_cell[m]].push(mem_to_cell[*pm]);
        }
    }
    let mut seen = vec![false; n_cells];
    let mut queue = std::collections::VecDeque::from([0usize]);
    seen[0] = true;
    let mut count = 1;
    while let Some(i) = queue.pop_front() {
        for &j in &adj[i] {
            if !seen[j] {
                seen[j] = true;
                count += 1;
                queue.push_back(j);
            }
        }
    }
    if count != n_cells {
        return Err(SimError::geometry(format!(
            "gap-junction graph is disconnected: {count} of {n_cells} cells reachable"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfigFile;
    use crate::mesh::ops::{div_norm, hh_cells};
    use crate::parameters::Parameters;

    fn small_mesh() -> (Parameters, Mesh) {
        let mut cfg = SimConfigFile::default();
        cfg.world.world_size = 100e-6;
        cfg.world.lattice_disorder = 0.3;
        let p = Parameters::from_config(&cfg).unwrap();
        let mesh = Mesh::build(&p).unwrap();
        (p, mesh)
    }

    #[test]
    fn gap_junction_pairing_is_symmetric() {
        let (_, mesh) = small_mesh();
        for m in 0..mesh.n_mems() {
            if let Some(pm) = mesh.mem_gj[m] {
                assert_eq!(mesh.mem_gj[pm], Some(m), "membrane {m} pairs one way only");
                assert_ne!(mesh.mem_to_cell[m], mesh.mem_to_cell[pm]);
            }
        }
    }

    #[test]
    fn interior_cells_are_fully_paired() {
        let (_, mesh) = small_mesh();
        for (ci, mems) in mesh.cell_mems.iter().enumerate() {
            if !mesh.is_boundary_cell[ci] {
                for &m in mems {
                    assert!(
                        mesh.mem_gj[m].is_some(),
                        "interior cell {ci} has an unpaired membrane"
                    );
                }
            }
        }
    }

    #[test]
    fn cluster_has_a_boundary() {
        let (_, mesh) = small_mesh();
        assert!(mesh.is_boundary_cell.iter().any(|&b| b));
        assert!(mesh.is_boundary_cell.iter().any(|&b| !b));
    }

    #[test]
    fn membrane_normals_are_unit_and_outward() {
        let (_, mesh) = small_mesh();
        for m in 0..mesh.n_mems() {
            let norm = mesh.mem_norms[m];
            assert!((norm.mag() - 1.0).abs() < 1e-9);
            let ci = mesh.mem_to_cell[m];
            assert!(norm.dot(mesh.mem_mids[m] - mesh.cell_centres[ci]) >= 0.0);
        }
    }

    #[test]
    fn laplacian_rows_sum_to_zero_for_interior_cells() {
        let (_, mesh) = small_mesh();
        for i in 0..mesh.n_cells() {
            if mesh.is_boundary_cell[i] {
                continue;
            }
            let row_sum: f64 = (0..mesh.n_cells()).map(|j| mesh.lap_gj[(i, j)]).sum();
            let scale: f64 = (0..mesh.n_cells())
                .map(|j| mesh.lap_gj[(i, j)].abs())
                .sum();
            assert!(row_sum.abs() <= 1e-9 * scale.max(1.0));
        }
    }

    #[test]
    fn projection_removes_divergence() {
        let (_, mesh) = small_mesh();
        let centre = mesh.centre();
        // A radially expanding field carries strong divergence.
        let fx: Vec<f64> = mesh.cell_centres.iter().map(|c| c.x - centre.x).collect();
        let fy: Vec<f64> = mesh.cell_centres.iter().map(|c| c.y - centre.y).collect();

        let before = div_norm(&mesh, &fx, &fy);
        let first = hh_cells(&mesh, &fx, &fy);
        let after = div_norm(&mesh, &first.free_x, &first.free_y);
        assert!(
            after <= 1e-9 * before,
            "projection left divergence behind: {after} of {before}"
        );

        // Projecting an already-projected field moves it only by rounding.
        let second = hh_cells(&mesh, &first.free_x, &first.free_y);
        let moved: f64 = first
            .free_x
            .iter()
            .zip(&second.free_x)
            .chain(first.free_y.iter().zip(&second.free_y))
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        let correction: f64 = fx
            .iter()
            .zip(&first.free_x)
            .chain(fy.iter().zip(&first.free_y))
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        assert!(
            moved <= 1e-9 * correction.max(1e-30),
            "projection is not idempotent: moved {moved}, first correction {correction}"
        );
    }

    #[test]
    fn insular_tissue_keeps_no_junction_across_its_border() {
        let island = TargetSelector::Circle {
            x: 0.0,
            y: 0.0,
            radius: 12e-6,
        };
        let mut cfg = SimConfigFile::default();
        cfg.world.world_size = 100e-6;
        cfg.world.lattice_disorder = 0.3;
        cfg.tissues = vec![crate::config::TissueConfig {
            name: "island".into(),
            insular: true,
            target: island.clone(),
        }];
        let p = Parameters::from_config(&cfg).unwrap();
        let mesh = Mesh::build(&p).unwrap();

        let inside = mesh.cells_in_target(&island);
        assert!(!inside.is_empty() && inside.len() < mesh.n_cells());
        let mut member = vec![false; mesh.n_cells()];
        for &i in &inside {
            member[i] = true;
        }

        for m in 0..mesh.n_mems() {
            if let Some(pm) = mesh.mem_gj[m] {
                assert_eq!(
                    member[mesh.mem_to_cell[m]],
                    member[mesh.mem_to_cell[pm]],
                    "junction {m} crosses the insular border"
                );
            }
        }
        // The island keeps its internal junctions.
        let internal = (0..mesh.n_mems())
            .filter(|&m| member[mesh.mem_to_cell[m]] && mesh.mem_gj[m].is_some())
            .count();
        assert!(internal > 0);
    }

    #[test]
    fn cutting_remaps_surviving_cells() {
        let (p, mut mesh) = small_mesh();
        let n_before = mesh.n_cells();
        // Remove one boundary cell; the cluster stays connected.
        let victim = mesh.is_boundary_cell.iter().position(|&b| b).unwrap();
        let keep = mesh.cut_cells(&p, &[victim]).unwrap();
        assert_eq!(keep.len(), n_before - 1);
        assert!(!keep.contains(&victim));
        assert_eq!(mesh.n_cells(), n_before - 1);
    }

    #[test]
    fn cutting_everything_is_rejected() {
        let (p, mut mesh) = small_mesh();
        let all: Vec<usize> = (0..mesh.n_cells()).collect();
        let n = mesh.n_cells();
        assert!(mesh.cut_cells(&p, &all).is_err());
        assert_eq!(mesh.n_cells(), n, "failed cut must not modify the mesh");
    }

    #[test]
    fn env_grid_appears_only_with_ecm() {
        let (_, mesh) = small_mesh();
        assert!(mesh.env.is_none());

        let mut cfg = SimConfigFile::default();
        cfg.world.world_size = 100e-6;
        cfg.general.sim_ecm = true;
        let p = Parameters::from_config(&cfg).unwrap();
        let mesh = Mesh::build(&p).unwrap();
        let env = mesh.env.as_ref().unwrap();
        assert_eq!(env.mem_to_grid.len(), mesh.n_mems());
    }
}

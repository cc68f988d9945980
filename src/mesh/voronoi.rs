// Cluster geometry generation.
//
// A hexagonal lattice of seed points fills the world, gets perturbed by the
// configured disorder, is cropped to a disc, and is handed to the Voronoi
// tessellator. Each finite Voronoi region becomes one cell polygon.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ultraviolet::DVec2;
use voronoice::{BoundingBox, Point, VoronoiBuilder};

use crate::error::SimError;
use crate::parameters::Parameters;

/// Raw polygon soup before membranes and operators are derived.
pub struct RawCells {
    /// Area centroid of each polygon.
    pub centres: Vec<DVec2>,
    /// Counter-clockwise vertex loops.
    pub polys: Vec<Vec<DVec2>>,
}

/// Perturbed hexagonal seed lattice cropped to the cluster disc.
pub fn seed_points(p: &Parameters) -> Vec<DVec2> {
    let mut rng = StdRng::seed_from_u64(p.rng_seed);
    let d = p.d_cell;
    let row_h = d * 3.0f64.sqrt() / 2.0;
    let n_rows = (p.world_size / row_h).ceil() as usize;
    let n_cols = p.n_lattice;

    let centre = DVec2::new(p.world_size / 2.0, p.world_size / 2.0);
    let crop_r = p.crop_fraction * p.world_size;
    let noise = p.lattice_disorder * d;

    let mut pts = Vec::new();
    for j in 0..n_rows {
        let y = (j as f64 + 0.5) * row_h;
        let x_off = if j % 2 == 1 { d / 2.0 } else { 0.0 };
        for i in 0..n_cols {
            let x = (i as f64 + 0.5) * d + x_off;
            let pt = DVec2::new(
                x + noise * rng.gen_range(-0.5..0.5),
                y + noise * rng.gen_range(-0.5..0.5),
            );
            if (pt - centre).mag() <= crop_r {
                pts.push(pt);
            }
        }
    }
    pts
}

/// Tessellate the seed points and return one polygon per surviving point.
pub fn tessellate(p: &Parameters, seeds: &[DVec2]) -> Result<RawCells, SimError> {
    if seeds.len() < 4 {
        return Err(SimError::geometry(format!(
            "only {} seed points survived cropping; enlarge world_size or \
             crop_fraction",
            seeds.len()
        )));
    }

    let sites: Vec<Point> = seeds.iter().map(|s| Point { x: s.x, y: s.y }).collect();
    let half = p.world_size / 2.0;
    let diagram = VoronoiBuilder::default()
        .set_sites(sites)
        .set_bounding_box(BoundingBox::new(
            Point { x: half, y: half },
            p.world_size,
            p.world_size,
        ))
        .build()
        .ok_or_else(|| SimError::geometry("voronoi tessellation failed"))?;

    let mut centres = Vec::with_capacity(seeds.len());
    let mut polys = Vec::with_capacity(seeds.len());
    for vcell in diagram.iter_cells() {
        let verts: Vec<DVec2> = vcell
            .iter_vertices()
            .map(|v| DVec2::new(v.x, v.y))
            .collect();
        if verts.len() < 3 {
            continue;
        }
        let (area, centroid) = polygon_area_centroid(&verts);
        if area <= 0.0 {
            continue;
        }
        centres.push(centroid);
        polys.push(verts);
    }

    if polys.len() < 4 {
        return Err(SimError::geometry(
            "tessellation produced too few usable cell polygons",
        ));
    }
    Ok(RawCells { centres, polys })
}

/// Shoelace area and centroid of a simple polygon. The area comes back
/// positive regardless of winding.
pub fn polygon_area_centroid(verts: &[DVec2]) -> (f64, DVec2) {
    let n = verts.len();
    let mut twice_area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..n {
        let a = verts[i];
        let b = verts[(i + 1) % n];
        let cross = a.x * b.y - b.x * a.y;
        twice_area += cross;
        cx += (a.x + b.x) * cross;
        cy += (a.y + b.y) * cross;
    }
    if twice_area.abs() < f64::EPSILON {
        return (0.0, verts[0]);
    }
    let area = twice_area / 2.0;
    let centroid = DVec2::new(cx / (6.0 * area), cy / (6.0 * area));
    (area.abs(), centroid)
}

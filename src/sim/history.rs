// Sampled time series of a run.
//
// Snapshots are taken on the sampling interval of the active time profile,
// not every step, so history size is independent of dt. The final state
// itself travels in the checkpoint; this is the trace users plot.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct History {
    pub times: Vec<f64>,
    /// Cluster-mean membrane voltage per sample [V].
    pub vm_mean: Vec<f64>,
    /// Per-cell membrane voltage snapshots [V].
    pub vm_cells: Vec<Vec<f64>>,
    /// Cluster-mean cytosolic concentration per sample, index-aligned with
    /// the active ion set [mol/m^3].
    pub cc_mean: Vec<Vec<f64>>,
    /// Mean displacement magnitude per sample [m]; empty unless deformation
    /// is enabled.
    pub disp_mean: Vec<f64>,
}

impl History {
    pub fn record(
        &mut self,
        t: f64,
        vm_cell: &[f64],
        cc_cells: &[Vec<f64>],
        displacement: Option<(&[f64], &[f64])>,
    ) {
        let n = vm_cell.len() as f64;
        self.times.push(t);
        self.vm_mean.push(vm_cell.iter().sum::<f64>() / n);
        self.vm_cells.push(vm_cell.to_vec());
        self.cc_mean.push(
            cc_cells
                .iter()
                .map(|cc| cc.iter().sum::<f64>() / n)
                .collect(),
        );
        if let Some((dx, dy)) = displacement {
            let mag = dx
                .iter()
                .zip(dy)
                .map(|(x, y)| (x * x + y * y).sqrt())
                .sum::<f64>()
                / n;
            self.disp_mean.push(mag);
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Write the trace as JSON next to the checkpoints.
    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> Result<(), SimError> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer(BufWriter::new(file), self)
            .map_err(|e| SimError::config(format!("history export failed: {e}")))?;
        Ok(())
    }
}

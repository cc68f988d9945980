// Simulation phases.
//
// A run moves through seed (geometry), init (settle to steady state) and
// sim (the experiment proper); the gene network run piggybacks on any of
// their checkpoints. Each phase hands the next one a `Phase` bundle.

use serde::{Deserialize, Serialize};

use crate::grn::network::GeneNetwork;
use crate::mesh::Mesh;
use crate::parameters::Parameters;
use crate::sim::Simulator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseKind {
    Seed,
    Init,
    Sim,
    SimGrn,
}

impl PhaseKind {
    pub fn name(self) -> &'static str {
        match self {
            PhaseKind::Seed => "seed",
            PhaseKind::Init => "init",
            PhaseKind::Sim => "sim",
            PhaseKind::SimGrn => "sim-grn",
        }
    }
}

/// Everything a completed phase produced.
#[derive(Debug)]
pub struct Phase {
    pub kind: PhaseKind,
    pub params: Parameters,
    pub mesh: Mesh,
    pub sim: Simulator,
    /// Present only after a gene network run.
    pub grn: Option<GeneNetwork>,
}

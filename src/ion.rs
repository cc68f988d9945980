// Ion species handled by the transport solver.
//
// Which ions are active depends on the configured ion profile; the
// `IonSet` records the active species in a fixed order so every per-ion
// array in the simulator is index-aligned with it.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ion {
    /// Sodium
    Na,
    /// Potassium
    K,
    /// Chloride
    Cl,
    /// Calcium
    Ca,
    /// Protons
    H,
    /// Anionic proteins (impermeant)
    P,
    /// Balancing anion solved for exact charge neutrality
    M,
}

impl Ion {
    pub fn symbol(self) -> &'static str {
        match self {
            Ion::Na => "Na",
            Ion::K => "K",
            Ion::Cl => "Cl",
            Ion::Ca => "Ca",
            Ion::H => "H",
            Ion::P => "P",
            Ion::M => "M",
        }
    }

    /// Default valence.
    pub fn valence(self) -> f64 {
        match self {
            Ion::Na | Ion::K | Ion::H => 1.0,
            Ion::Cl => -1.0,
            Ion::Ca => 2.0,
            Ion::P => -1.0,
            // The balancing ion's valence is solved at profile build time;
            // the default is only a placeholder.
            Ion::M => -1.0,
        }
    }

    pub fn from_symbol(s: &str) -> Option<Ion> {
        match s {
            "Na" => Some(Ion::Na),
            "K" => Some(Ion::K),
            "Cl" => Some(Ion::Cl),
            "Ca" => Some(Ion::Ca),
            "H" => Some(Ion::H),
            "P" => Some(Ion::P),
            "M" => Some(Ion::M),
            _ => None,
        }
    }
}

/// The ordered set of ions active in a run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IonSet {
    pub list: Vec<Ion>,
}

impl IonSet {
    pub fn new(list: Vec<Ion>) -> Self {
        Self { list }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn index_of(&self, ion: Ion) -> Option<usize> {
        self.list.iter().position(|&i| i == ion)
    }

    pub fn contains(&self, ion: Ion) -> bool {
        self.index_of(ion).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Ion)> + '_ {
        self.list.iter().copied().enumerate()
    }
}

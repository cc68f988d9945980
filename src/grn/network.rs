// Gene and reaction network core.
//
// Molecules live per cell with a scalar environmental pool. Reactions are
// mass action by default, Hill-saturated when a km is given, and modulated
// by activator and inhibitor ligands. Transporters exchange a molecule with
// the environment; expressed channels convert a ligand concentration into a
// membrane permeability multiplier for one of the transport solver's ions.

use serde::{Deserialize, Serialize};

use crate::config::GrnConfig;
use crate::error::SimError;
use crate::ion::{Ion, IonSet};
use crate::sim::flux::hill;
use crate::sim::Simulator;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Molecule {
    pub name: String,
    pub init_conc: f64,
    pub init_conc_env: f64,
    pub decay: f64,
    /// Per-cell concentration [mol/m^3].
    pub conc: Vec<f64>,
    /// Well-mixed environmental pool [mol/m^3].
    pub conc_env: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reaction {
    pub name: String,
    /// Molecule index and stoichiometric coefficient.
    pub reactants: Vec<(usize, f64)>,
    pub products: Vec<(usize, f64)>,
    pub rate: f64,
    /// Zero selects mass action kinetics.
    pub km: f64,
    pub n: f64,
    /// Ligand index, km, n.
    pub activators: Vec<(usize, f64, f64)>,
    pub inhibitors: Vec<(usize, f64, f64)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transporter {
    pub name: String,
    pub molecule: usize,
    /// Positive rates move the molecule into the cell.
    pub rate: f64,
    pub km: f64,
    pub n: f64,
}

/// A ligand-gated channel the network expresses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelMod {
    pub name: String,
    pub ion_idx: usize,
    pub ligand: usize,
    pub max_multiplier: f64,
    pub km: f64,
    pub n: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneNetwork {
    pub molecules: Vec<Molecule>,
    pub reactions: Vec<Reaction>,
    pub transporters: Vec<Transporter>,
    pub channel_mods: Vec<ChannelMod>,
}

impl GeneNetwork {
    pub fn from_config(grn: &GrnConfig, ions: &IonSet, n_cells: usize) -> Result<Self, SimError> {
        let molecules: Vec<Molecule> = grn
            .molecules
            .iter()
            .map(|m| Molecule {
                name: m.name.clone(),
                init_conc: m.init_conc,
                init_conc_env: m.init_conc_env,
                decay: m.decay,
                conc: vec![m.init_conc; n_cells],
                conc_env: m.init_conc_env,
            })
            .collect();

        let find = |name: &str| -> Result<usize, SimError> {
            molecules
                .iter()
                .position(|m| m.name == name)
                .ok_or_else(|| {
                    SimError::config(format!("gene network references unknown molecule `{name}`"))
                })
        };

        let mut reactions = Vec::with_capacity(grn.reactions.len());
        for r in &grn.reactions {
            let resolve_pairs = |pairs: &[(String, f64)]| -> Result<Vec<(usize, f64)>, SimError> {
                pairs.iter().map(|(n, s)| Ok((find(n)?, *s))).collect()
            };
            let resolve_ligands =
                |lig: &[(String, f64, f64)]| -> Result<Vec<(usize, f64, f64)>, SimError> {
                    lig.iter().map(|(n, km, h)| Ok((find(n)?, *km, *h))).collect()
                };
            reactions.push(Reaction {
                name: r.name.clone(),
                reactants: resolve_pairs(&r.reactants)?,
                products: resolve_pairs(&r.products)?,
                rate: r.rate,
                km: r.km,
                n: r.n,
                activators: resolve_ligands(&r.activators)?,
                inhibitors: resolve_ligands(&r.inhibitors)?,
            });
        }

        let mut transporters = Vec::with_capacity(grn.transporters.len());
        for t in &grn.transporters {
            transporters.push(Transporter {
                name: t.name.clone(),
                molecule: find(&t.molecule)?,
                rate: t.rate,
                km: t.km,
                n: t.n,
            });
        }

        let mut channel_mods = Vec::with_capacity(grn.grn_channels.len());
        for c in &grn.grn_channels {
            let ion = Ion::from_symbol(&c.ion).ok_or_else(|| {
                SimError::config(format!("gene network channel gates unknown ion `{}`", c.ion))
            })?;
            let ion_idx = ions.index_of(ion).ok_or_else(|| {
                SimError::config(format!(
                    "gene network channel ion `{}` is not in the active profile",
                    c.ion
                ))
            })?;
            channel_mods.push(ChannelMod {
                name: c.name.clone(),
                ion_idx,
                ligand: find(&c.ligand)?,
                max_multiplier: c.max_multiplier,
                km: c.km,
                n: c.n,
            });
        }

        Ok(GeneNetwork {
            molecules,
            reactions,
            transporters,
            channel_mods,
        })
    }

    pub fn n_cells(&self) -> usize {
        self.molecules.first().map_or(0, |m| m.conc.len())
    }

    /// Reset concentrations to their configured initial values, keeping the
    /// (possibly optimised) rate constants.
    pub fn reinitialize(&mut self, n_cells: usize) {
        for m in self.molecules.iter_mut() {
            m.conc = vec![m.init_conc; n_cells];
            m.conc_env = m.init_conc_env;
        }
    }

    fn reaction_velocity(&self, r: &Reaction, cell: usize) -> f64 {
        let mut v = r.rate;
        for &(mi, stoich) in &r.reactants {
            let c = self.molecules[mi].conc[cell];
            if r.km > 0.0 {
                v *= hill(c, r.km, r.n).powf(stoich);
            } else {
                v *= c.powf(stoich);
            }
        }
        for &(mi, km, n) in &r.activators {
            v *= hill(self.molecules[mi].conc[cell], km, n);
        }
        for &(mi, km, n) in &r.inhibitors {
            v *= 1.0 - hill(self.molecules[mi].conc[cell], km, n);
        }
        v
    }

    /// Advance every cell's network by `dt` with explicit Euler, clipping
    /// concentrations at zero.
    pub fn advance(&mut self, dt: f64) {
        let n_cells = self.n_cells();
        let n_mols = self.molecules.len();
        let mut delta = vec![vec![0.0f64; n_cells]; n_mols];

        for r in &self.reactions {
            for cell in 0..n_cells {
                let v = self.reaction_velocity(r, cell);
                for &(mi, stoich) in &r.reactants {
                    delta[mi][cell] -= stoich * v;
                }
                for &(mi, stoich) in &r.products {
                    delta[mi][cell] += stoich * v;
                }
            }
        }
        for t in &self.transporters {
            let source = if t.rate > 0.0 {
                self.molecules[t.molecule].conc_env
            } else {
                0.0
            };
            for cell in 0..n_cells {
                let gating = if t.rate > 0.0 {
                    hill(source, t.km, t.n)
                } else {
                    hill(self.molecules[t.molecule].conc[cell], t.km, t.n)
                };
                delta[t.molecule][cell] += t.rate * gating;
            }
        }
        for (mi, m) in self.molecules.iter().enumerate() {
            for cell in 0..n_cells {
                delta[mi][cell] -= m.decay * m.conc[cell];
            }
        }

        for (mi, m) in self.molecules.iter_mut().enumerate() {
            for cell in 0..n_cells {
                m.conc[cell] = (m.conc[cell] + delta[mi][cell] * dt).max(0.0);
            }
        }
    }

    /// Permeability multiplier this cell's expressed channels give `ion`.
    pub fn perm_multiplier(&self, ion_idx: usize, cell: usize) -> f64 {
        let mut mult = 1.0;
        for ch in &self.channel_mods {
            if ch.ion_idx == ion_idx {
                let ligand = self.molecules[ch.ligand].conc[cell];
                mult *= 1.0 + (ch.max_multiplier - 1.0) * hill(ligand, ch.km, ch.n);
            }
        }
        mult
    }

    /// Write the channel modulation into the transport solver.
    pub fn apply_to(&self, sim: &mut Simulator, n_ions: usize) {
        for k in 0..n_ions {
            for cell in 0..self.n_cells() {
                sim.dm_mod[k][cell] = self.perm_multiplier(k, cell);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GrnChannelConfig, GrnConfig, GrnMoleculeConfig, GrnReactionConfig};
    use crate::ion::{Ion, IonSet};

    fn ions() -> IonSet {
        IonSet::new(vec![Ion::Na, Ion::K, Ion::M])
    }

    fn two_molecule_grn() -> GrnConfig {
        GrnConfig {
            enabled: true,
            molecules: vec![
                GrnMoleculeConfig {
                    name: "A".into(),
                    init_conc: 1.0,
                    ..Default::default()
                },
                GrnMoleculeConfig {
                    name: "B".into(),
                    init_conc: 0.0,
                    decay: 0.1,
                    ..Default::default()
                },
            ],
            reactions: vec![GrnReactionConfig {
                name: "a_to_b".into(),
                reactants: vec![("A".into(), 1.0)],
                products: vec![("B".into(), 1.0)],
                rate: 0.5,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn mass_action_moves_a_into_b() {
        let mut net = GeneNetwork::from_config(&two_molecule_grn(), &ions(), 4).unwrap();
        for _ in 0..100 {
            net.advance(1e-2);
        }
        assert!(net.molecules[0].conc[0] < 1.0);
        assert!(net.molecules[1].conc[0] > 0.0);
        // All cells evolve identically from identical initial conditions.
        let b = &net.molecules[1].conc;
        assert!(b.iter().all(|&c| (c - b[0]).abs() < 1e-12));
    }

    #[test]
    fn concentrations_never_go_negative() {
        let mut cfg = two_molecule_grn();
        cfg.reactions[0].rate = 100.0;
        let mut net = GeneNetwork::from_config(&cfg, &ions(), 2).unwrap();
        for _ in 0..1000 {
            net.advance(1e-2);
        }
        for m in &net.molecules {
            assert!(m.conc.iter().all(|&c| c >= 0.0));
        }
    }

    #[test]
    fn unknown_molecule_reference_is_a_config_error() {
        let mut cfg = two_molecule_grn();
        cfg.reactions[0].products = vec![("C".into(), 1.0)];
        assert!(matches!(
            GeneNetwork::from_config(&cfg, &ions(), 1),
            Err(SimError::Config(_))
        ));
    }

    #[test]
    fn ligand_gated_channel_scales_permeability() {
        let mut cfg = two_molecule_grn();
        cfg.grn_channels = vec![GrnChannelConfig {
            name: "b_gated_k".into(),
            ion: "K".into(),
            ligand: "B".into(),
            max_multiplier: 5.0,
            km: 0.5,
            n: 2.0,
        }];
        let net = GeneNetwork::from_config(&cfg, &ions(), 1).unwrap();
        let k = ions().index_of(Ion::K).unwrap();
        // No ligand yet: baseline permeability.
        assert!((net.perm_multiplier(k, 0) - 1.0).abs() < 1e-12);

        let mut saturated = net.clone();
        saturated.molecules[1].conc[0] = 100.0;
        let m = saturated.perm_multiplier(k, 0);
        assert!(m > 4.9 && m <= 5.0);
    }

    #[test]
    fn reinitialize_keeps_rates_but_resets_state() {
        let mut net = GeneNetwork::from_config(&two_molecule_grn(), &ions(), 2).unwrap();
        net.reactions[0].rate = 7.0;
        net.advance(1.0);
        net.reinitialize(3);
        assert_eq!(net.reactions[0].rate, 7.0);
        assert_eq!(net.n_cells(), 3);
        assert_eq!(net.molecules[0].conc, vec![1.0; 3]);
    }
}

// Phase orchestration.
//
// The runner owns the loaded configuration and drives phases in order,
// persisting a checkpoint after each one. A phase whose prerequisite
// checkpoint is missing either runs the upstream phase transparently
// (auto-init) or refuses with a pointer at the command to run. Checkpoints
// carry the config sections that shaped them; a mismatch against the
// currently loaded config aborts before any time is spent.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{GeneralConfig, SimConfigFile, TissueConfig, WorldConfig};
use crate::error::SimError;
use crate::grn::network::GeneNetwork;
use crate::grn::{self, ISOLATED_VM};
use crate::io::{self, GrnCheckpoint, SimCheckpoint, WorldCheckpoint};
use crate::mesh::Mesh;
use crate::parameters::Parameters;
use crate::phase::{Phase, PhaseKind};
use crate::sim::history::History;
use crate::sim::Simulator;

pub struct SimRunner {
    cfg: SimConfigFile,
    params: Parameters,
}

impl SimRunner {
    pub fn new(cfg: SimConfigFile) -> Result<Self, SimError> {
        let params = Parameters::from_config(&cfg)?;
        // History and trace exports write into out_dir directly, so it must
        // exist before the first phase saves anything.
        fs::create_dir_all(&params.out_dir)?;
        Ok(SimRunner { cfg, params })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        Self::new(SimConfigFile::load_from_file(path)?)
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    fn out_path(&self, file: &str) -> PathBuf {
        self.params.out_dir.join(file)
    }

    /// Geometry-shaping options must match the ones the seed was built
    /// under; otherwise every index in the checkpoint is meaningless.
    fn check_seed_sync(
        &self,
        general: &GeneralConfig,
        world: &WorldConfig,
        tissues: &[TissueConfig],
        phase: PhaseKind,
    ) -> Result<(), SimError> {
        if *general != self.cfg.general
            || *world != self.cfg.world
            || tissues != self.cfg.tissues.as_slice()
        {
            return Err(SimError::SeedOutOfSync {
                phase: phase.name().into(),
            });
        }
        Ok(())
    }

    /// Build the cluster geometry and checkpoint it.
    pub fn seed(&mut self) -> Result<Phase, SimError> {
        let mut params = self.params.clone();
        params.set_time_profile(PhaseKind::Seed);

        log::info!("seeding a new cell cluster");
        let mesh = Mesh::build(&params)?;
        log::info!(
            "cluster ready: {} cells, {} membrane domains",
            mesh.n_cells(),
            mesh.n_mems()
        );

        io::save(
            &self.out_path(io::SEED_FILE),
            &WorldCheckpoint {
                general: self.cfg.general.clone(),
                world: self.cfg.world.clone(),
                tissues: self.cfg.tissues.clone(),
                mesh: mesh.clone(),
            },
        )?;

        let sim = Simulator::base_init(&params, &mesh);
        Ok(Phase {
            kind: PhaseKind::Seed,
            params,
            mesh,
            sim,
            grn: None,
        })
    }

    /// Settle a fresh cluster toward its electrochemical steady state.
    pub fn init(&mut self) -> Result<Phase, SimError> {
        let seed_path = self.out_path(io::SEED_FILE);
        if !io::exists(&seed_path) {
            if self.params.auto_init {
                log::warn!("no seed checkpoint found; seeding first");
                self.seed()?;
            } else {
                return Err(SimError::MissingPrerequisite {
                    missing: "seed".into(),
                    required: "seed".into(),
                });
            }
        }

        let ckpt: WorldCheckpoint = io::load(&seed_path)?;
        self.check_seed_sync(&ckpt.general, &ckpt.world, &ckpt.tissues, PhaseKind::Init)?;

        let mut params = self.params.clone();
        params.set_time_profile(PhaseKind::Init);

        let mut mesh = ckpt.mesh;
        let mut sim = Simulator::base_init(&params, &mesh);
        log::info!(
            "initializing for {} s of world time at dt = {} s",
            params.time.total_time,
            params.time.dt
        );
        sim.run_loop(&params, &mut mesh)?;

        sim.history.export_json(self.out_path("init_history.json"))?;
        io::save(
            &self.out_path(io::INIT_FILE),
            &SimCheckpoint {
                general: self.cfg.general.clone(),
                world: self.cfg.world.clone(),
                tissues: self.cfg.tissues.clone(),
                mesh: mesh.clone(),
                sim: sim.clone(),
            },
        )?;
        Ok(Phase {
            kind: PhaseKind::Init,
            params,
            mesh,
            sim,
            grn: None,
        })
    }

    /// Run the experiment proper on top of an initialized state.
    pub fn sim(&mut self) -> Result<Phase, SimError> {
        let init_path = self.out_path(io::INIT_FILE);
        if !io::exists(&init_path) {
            if self.params.auto_init {
                log::warn!("no init checkpoint found; initializing first");
                self.init()?;
            } else {
                return Err(SimError::MissingPrerequisite {
                    missing: "init".into(),
                    required: "init".into(),
                });
            }
        }

        let ckpt: SimCheckpoint = io::load(&init_path)?;
        self.check_seed_sync(&ckpt.general, &ckpt.world, &ckpt.tissues, PhaseKind::Sim)?;

        let mut params = self.params.clone();
        params.set_time_profile(PhaseKind::Sim);

        let mut mesh = ckpt.mesh;
        let mut sim = ckpt.sim;
        sim.history = History::default();
        log::info!(
            "simulating {} s of world time from t = {:.3} s",
            params.time.total_time,
            sim.time
        );
        sim.run_loop(&params, &mut mesh)?;

        sim.history.export_json(self.out_path("sim_history.json"))?;
        io::save(
            &self.out_path(io::SIM_FILE),
            &SimCheckpoint {
                general: self.cfg.general.clone(),
                world: self.cfg.world.clone(),
                tissues: self.cfg.tissues.clone(),
                mesh: mesh.clone(),
                sim: sim.clone(),
            },
        )?;
        Ok(Phase {
            kind: PhaseKind::Sim,
            params,
            mesh,
            sim,
            grn: None,
        })
    }

    /// Run the gene network on top of the configured piggyback checkpoint.
    pub fn sim_grn(&mut self) -> Result<Phase, SimError> {
        let mut params = self.params.clone();
        params.set_time_profile(PhaseKind::SimGrn);

        let (mut mesh, mut sim, clamp) = match self.params.grn.piggyback.as_str() {
            "seed" => {
                let path = self.out_path(io::SEED_FILE);
                if !io::exists(&path) {
                    if self.params.auto_init {
                        log::warn!("no seed checkpoint found; seeding first");
                        self.seed()?;
                    } else {
                        return Err(SimError::MissingPrerequisite {
                            missing: "seed".into(),
                            required: "seed".into(),
                        });
                    }
                }
                let ckpt: WorldCheckpoint = io::load(&path)?;
                self.check_seed_sync(&ckpt.general, &ckpt.world, &ckpt.tissues, PhaseKind::SimGrn)?;
                let sim = Simulator::base_init(&params, &ckpt.mesh);
                (ckpt.mesh, sim, None)
            }
            which @ ("init" | "sim") => {
                let (file, required) = if which == "init" {
                    (io::INIT_FILE, "init")
                } else {
                    (io::SIM_FILE, "sim")
                };
                let path = self.out_path(file);
                if !io::exists(&path) {
                    if self.params.auto_init {
                        log::warn!("no {required} checkpoint found; running `{required}` first");
                        if which == "init" {
                            self.init()?;
                        } else {
                            self.sim()?;
                        }
                    } else {
                        return Err(SimError::MissingPrerequisite {
                            missing: required.into(),
                            required: required.into(),
                        });
                    }
                }
                let ckpt: SimCheckpoint = io::load(&path)?;
                self.check_seed_sync(&ckpt.general, &ckpt.world, &ckpt.tissues, PhaseKind::SimGrn)?;
                (ckpt.mesh, ckpt.sim, None)
            }
            "isolated" => {
                let mesh = Mesh::build(&params)?;
                let sim = Simulator::base_init(&params, &mesh);
                (mesh, sim, Some(ISOLATED_VM))
            }
            other => {
                return Err(SimError::config(format!(
                    "grn.piggyback must be seed, init, sim or isolated, got `{other}`"
                )))
            }
        };

        let mut net = GeneNetwork::from_config(&params.grn, &params.ions, mesh.n_cells())?;
        log::info!(
            "gene network run: {} molecules, {} reactions, piggyback `{}`",
            net.molecules.len(),
            net.reactions.len(),
            self.params.grn.piggyback
        );
        let trace = grn::run_core_sim(&params, &mut mesh, &mut sim, &mut net, clamp)?;
        trace.export_json(self.out_path("grn_history.json"))?;

        io::save(
            &self.out_path(io::GRN_FILE),
            &GrnCheckpoint {
                general: self.cfg.general.clone(),
                world: self.cfg.world.clone(),
                tissues: self.cfg.tissues.clone(),
                mesh: mesh.clone(),
                sim: sim.clone(),
                network: net.clone(),
            },
        )?;
        Ok(Phase {
            kind: PhaseKind::SimGrn,
            params,
            mesh,
            sim,
            grn: Some(net),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn quick_cfg(tag: &str) -> SimConfigFile {
        let mut cfg = SimConfigFile::default();
        cfg.world.world_size = 80e-6;
        cfg.time.time4init = 0.2;
        cfg.time.time4sim = 0.2;
        cfg.general.out_dir = std::env::temp_dir()
            .join(format!("tissue_sim_runner_{tag}_{}", std::process::id()))
            .to_string_lossy()
            .into_owned();
        cfg
    }

    fn cleanup(cfg: &SimConfigFile) {
        fs::remove_dir_all(&cfg.general.out_dir).ok();
    }

    #[test]
    fn seed_init_sim_chain_round_trips_through_checkpoints() {
        let cfg = quick_cfg("chain");
        let mut runner = SimRunner::new(cfg.clone()).unwrap();

        let seeded = runner.seed().unwrap();
        let n_cells = seeded.mesh.n_cells();

        let inited = runner.init().unwrap();
        assert_eq!(inited.mesh.n_cells(), n_cells);
        assert!((inited.sim.time - 0.2).abs() < 1e-6);

        let simmed = runner.sim().unwrap();
        assert_eq!(simmed.mesh.n_cells(), n_cells);
        // Sim continues from the init state rather than restarting.
        assert!((simmed.sim.time - 0.4).abs() < 1e-6);
        assert!(!simmed.sim.history.is_empty());

        for file in [io::SEED_FILE, io::INIT_FILE, io::SIM_FILE] {
            assert!(io::exists(&runner.out_path(file)), "missing {file}");
        }
        cleanup(&cfg);
    }

    #[test]
    fn sim_without_init_fails_when_auto_init_is_off() {
        let mut cfg = quick_cfg("noauto");
        cfg.general.auto_init = false;
        let mut runner = SimRunner::new(cfg.clone()).unwrap();
        match runner.sim() {
            Err(SimError::MissingPrerequisite { missing, .. }) => assert_eq!(missing, "init"),
            other => panic!("expected MissingPrerequisite, got {other:?}"),
        }
        cleanup(&cfg);
    }

    #[test]
    fn sim_with_auto_init_runs_the_whole_chain() {
        let cfg = quick_cfg("auto");
        let mut runner = SimRunner::new(cfg.clone()).unwrap();
        let phase = runner.sim().unwrap();
        assert_eq!(phase.kind, PhaseKind::Sim);
        assert!(io::exists(&runner.out_path(io::SEED_FILE)));
        assert!(io::exists(&runner.out_path(io::INIT_FILE)));
        cleanup(&cfg);
    }

    #[test]
    fn changed_geometry_invalidates_the_seed() {
        let cfg = quick_cfg("sync");
        let mut runner = SimRunner::new(cfg.clone()).unwrap();
        runner.seed().unwrap();

        let mut changed = cfg.clone();
        changed.world.cell_radius = 6e-6;
        let mut runner2 = SimRunner::new(changed).unwrap();
        match runner2.init() {
            Err(SimError::SeedOutOfSync { phase }) => assert_eq!(phase, "init"),
            other => panic!("expected SeedOutOfSync, got {other:?}"),
        }
        cleanup(&cfg);
    }

    #[test]
    fn isolated_grn_needs_no_checkpoints() {
        let mut cfg = quick_cfg("grn_iso");
        cfg.time.time4sim = 0.3;
        cfg.grn.enabled = true;
        cfg.grn.piggyback = "isolated".into();
        cfg.grn.molecules = vec![crate::config::GrnMoleculeConfig {
            name: "A".into(),
            init_conc: 1.0,
            decay: 0.5,
            ..Default::default()
        }];
        let mut runner = SimRunner::new(cfg.clone()).unwrap();
        let phase = runner.sim_grn().unwrap();
        assert_eq!(phase.kind, PhaseKind::SimGrn);
        let net = phase.grn.unwrap();
        // Pure decay: the molecule runs down.
        assert!(net.molecules[0].conc[0] < 1.0);
        assert!(io::exists(&runner.out_path(io::GRN_FILE)));
        // The trace lands in a directory nothing else created first.
        assert!(runner.out_path("grn_history.json").is_file());
        cleanup(&cfg);
    }
}

// Checkpoint persistence.
//
// Checkpoints are gzip-compressed bincode behind a fixed magic and a format
// version, written to a temp file and renamed into place so a crash never
// leaves a half-written checkpoint. Every checkpoint embeds the general,
// world and tissue config sections it was produced under, which is what the
// seed consistency check compares.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{GeneralConfig, TissueConfig, WorldConfig};
use crate::error::SimError;
use crate::grn::network::GeneNetwork;
use crate::mesh::Mesh;
use crate::sim::Simulator;

const MAGIC: [u8; 4] = *b"TSCK";
const VERSION: u32 = 1;

pub const SEED_FILE: &str = "world.seed";
pub const INIT_FILE: &str = "sim.init";
pub const SIM_FILE: &str = "sim.final";
pub const GRN_FILE: &str = "grn.net";

/// Output of the seed phase: geometry only, no transport state.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorldCheckpoint {
    pub general: GeneralConfig,
    pub world: WorldConfig,
    pub tissues: Vec<TissueConfig>,
    pub mesh: Mesh,
}

/// Output of the init and sim phases.
#[derive(Serialize, Deserialize)]
pub struct SimCheckpoint {
    pub general: GeneralConfig,
    pub world: WorldConfig,
    pub tissues: Vec<TissueConfig>,
    pub mesh: Mesh,
    pub sim: Simulator,
}

/// Output of a gene network run.
#[derive(Serialize, Deserialize)]
pub struct GrnCheckpoint {
    pub general: GeneralConfig,
    pub world: WorldConfig,
    pub tissues: Vec<TissueConfig>,
    pub mesh: Mesh,
    pub sim: Simulator,
    pub network: GeneNetwork,
}

pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<(), SimError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp: PathBuf = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(&MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        let mut enc = GzEncoder::new(writer, Compression::default());
        bincode::serialize_into(&mut enc, value).map_err(|e| SimError::BadCheckpoint {
            path: tmp.clone(),
            reason: format!("serialization failed: {e}"),
        })?;
        let mut writer = enc.finish()?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    log::info!("wrote checkpoint {}", path.display());
    Ok(())
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, SimError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(SimError::BadCheckpoint {
            path: path.to_path_buf(),
            reason: "not a checkpoint file".into(),
        });
    }
    let mut ver = [0u8; 4];
    reader.read_exact(&mut ver)?;
    let version = u32::from_le_bytes(ver);
    if version != VERSION {
        return Err(SimError::BadCheckpoint {
            path: path.to_path_buf(),
            reason: format!("unsupported format version {version}"),
        });
    }

    let dec = GzDecoder::new(reader);
    bincode::deserialize_from(dec).map_err(|e| SimError::BadCheckpoint {
        path: path.to_path_buf(),
        reason: format!("corrupt payload: {e}"),
    })
}

pub fn exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfigFile;
    use crate::parameters::Parameters;
    use std::io::Write as _;

    fn tmp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tissue_sim_io_{tag}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn seed_checkpoint_round_trips() {
        let cfg = SimConfigFile::default();
        let mut world = cfg.world.clone();
        world.world_size = 90e-6;
        let mut cfg2 = cfg.clone();
        cfg2.world = world;
        let p = Parameters::from_config(&cfg2).unwrap();
        let mesh = Mesh::build(&p).unwrap();

        let dir = tmp_dir("seed");
        let path = dir.join(SEED_FILE);
        let ckpt = WorldCheckpoint {
            general: cfg2.general.clone(),
            world: cfg2.world.clone(),
            tissues: cfg2.tissues.clone(),
            mesh,
        };
        save(&path, &ckpt).unwrap();

        let back: WorldCheckpoint = load(&path).unwrap();
        assert_eq!(back.general, ckpt.general);
        assert_eq!(back.world, ckpt.world);
        assert_eq!(back.mesh.n_cells(), ckpt.mesh.n_cells());
        assert_eq!(back.mesh.n_mems(), ckpt.mesh.n_mems());
        let vol = |m: &Mesh| m.cell_vol.iter().sum::<f64>();
        assert!((vol(&back.mesh) - vol(&ckpt.mesh)).abs() <= 1e-12 * vol(&ckpt.mesh));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn garbage_file_is_a_bad_checkpoint() {
        let dir = tmp_dir("garbage");
        let path = dir.join("junk.bin");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"definitely not a checkpoint").unwrap();
        drop(f);

        match load::<WorldCheckpoint>(&path) {
            Err(SimError::BadCheckpoint { .. }) => {}
            other => panic!("expected BadCheckpoint, got {other:?}"),
        }
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = Path::new("/nonexistent/never/world.seed");
        assert!(matches!(
            load::<WorldCheckpoint>(path),
            Err(SimError::Io(_))
        ));
    }

    #[test]
    fn save_replaces_atomically() {
        let cfg = SimConfigFile::default();
        let p = Parameters::from_config(&cfg).unwrap();
        let mesh = Mesh::build(&p).unwrap();
        let dir = tmp_dir("atomic");
        let path = dir.join(SEED_FILE);
        let ckpt = WorldCheckpoint {
            general: cfg.general.clone(),
            world: cfg.world.clone(),
            tissues: cfg.tissues.clone(),
            mesh,
        };
        save(&path, &ckpt).unwrap();
        save(&path, &ckpt).unwrap();
        assert!(!path.with_extension("tmp").exists());
        let back: WorldCheckpoint = load(&path).unwrap();
        assert_eq!(back.world, ckpt.world);
        fs::remove_dir_all(dir).ok();
    }
}

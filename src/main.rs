use std::env;
use std::path::Path;
use std::process;

use tissue_sim::config::SimConfigFile;
use tissue_sim::error::SimError;
use tissue_sim::phase::Phase;
use tissue_sim::runner::SimRunner;

struct CommandSpec {
    name: &'static str,
    about: &'static str,
    run: fn(&mut SimRunner) -> Result<Phase, SimError>,
}

fn run_seed(runner: &mut SimRunner) -> Result<Phase, SimError> {
    runner.seed()
}

fn run_init(runner: &mut SimRunner) -> Result<Phase, SimError> {
    runner.init()
}

fn run_sim(runner: &mut SimRunner) -> Result<Phase, SimError> {
    runner.sim()
}

fn run_sim_grn(runner: &mut SimRunner) -> Result<Phase, SimError> {
    runner.sim_grn()
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "seed",
        about: "generate the cell cluster geometry",
        run: run_seed,
    },
    CommandSpec {
        name: "init",
        about: "settle the cluster to its electrochemical steady state",
        run: run_init,
    },
    CommandSpec {
        name: "sim",
        about: "run the experiment on top of an initialized state",
        run: run_sim,
    },
    CommandSpec {
        name: "sim-grn",
        about: "run the gene regulatory network",
        run: run_sim_grn,
    },
];

fn usage() {
    eprintln!("usage: tissue_sim <command> [config.toml]");
    eprintln!();
    eprintln!("commands:");
    for cmd in COMMANDS {
        eprintln!("  {:<8} {}", cmd.name, cmd.about);
    }
}

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(name) = args.next() else {
        usage();
        process::exit(2);
    };
    let explicit_config = args.next();

    let Some(spec) = COMMANDS.iter().find(|c| c.name == name) else {
        eprintln!("unknown command `{name}`");
        usage();
        process::exit(2);
    };

    // An explicitly named config must exist; the implicit default may be
    // absent, in which case the built-in defaults apply.
    let built = match &explicit_config {
        Some(path) => SimRunner::from_file(path),
        None if Path::new("sim_config.toml").is_file() => SimRunner::from_file("sim_config.toml"),
        None => {
            log::warn!("no sim_config.toml found; using built-in defaults");
            SimRunner::new(SimConfigFile::default())
        }
    };
    let mut runner = match built {
        Ok(runner) => runner,
        Err(e) => {
            log::error!("{e}");
            eprintln!("{e}");
            process::exit(1);
        }
    };

    match (spec.run)(&mut runner) {
        Ok(phase) => log::info!("{} phase complete", phase.kind.name()),
        Err(e) => {
            log::error!("{e}");
            eprintln!("{e}");
            process::exit(1);
        }
    }
}

// Network rate optimisation.
//
// Before the main run, rate constants can be tuned so the expressed
// channels hold the membrane near a target voltage. The evaluation uses a
// single well-mixed cell: the network relaxes on its own, and the resulting
// permeabilities go through the Goldman voltage equation as a cheap
// steady-state surrogate for the full transport solve. Coordinate descent
// over the rate constants is crude but robust for the handful of rates a
// network carries.

use crate::grn::network::GeneNetwork;
use crate::parameters::Parameters;
use crate::units::F;

const RELAX_STEPS: usize = 500;
const RELAX_DT: f64 = 1e-2;

/// Goldman-Hodgkin-Katz steady-state voltage for the given effective
/// permeabilities [m/s], with anions entering the numerator from the inside.
pub fn goldman_vm(p: &Parameters, perms: &[f64]) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (k, _) in p.ions.iter() {
        if perms[k] <= 0.0 {
            continue;
        }
        if p.z[k] > 0.0 {
            num += perms[k] * p.conc_env[k];
            den += perms[k] * p.conc_cell[k];
        } else if p.z[k] < 0.0 {
            num += perms[k] * p.conc_cell[k];
            den += perms[k] * p.conc_env[k];
        }
    }
    if num <= 0.0 || den <= 0.0 {
        return 0.0;
    }
    (p.rt() / F) * (num / den).ln()
}

/// Relax a single-cell copy of the network and score the distance between
/// the surrogate voltage and the target.
fn evaluate(net: &GeneNetwork, p: &Parameters) -> f64 {
    let mut probe = net.clone();
    probe.reinitialize(1);
    for _ in 0..RELAX_STEPS {
        probe.advance(RELAX_DT);
    }
    let perms: Vec<f64> = p
        .ions
        .iter()
        .map(|(k, _)| p.dm[k] * probe.perm_multiplier(k, 0))
        .collect();
    (goldman_vm(p, &perms) - p.grn.target_vmem).abs()
}

/// Tune reaction and transporter rates in place. Returns the final error.
pub fn optimize(net: &mut GeneNetwork, p: &Parameters) -> f64 {
    let factor = 1.0 + p.grn.optimization_step.abs().max(1e-3);
    let mut best = evaluate(net, p);
    log::info!(
        "network optimisation: starting error {:.3} mV against target {:.1} mV",
        1e3 * best,
        1e3 * p.grn.target_vmem
    );

    for iteration in 0..p.grn.optimization_steps {
        let mut improved = false;
        let n_reactions = net.reactions.len();
        let n_transporters = net.transporters.len();

        for slot in 0..n_reactions + n_transporters {
            let read = |n: &GeneNetwork| {
                if slot < n_reactions {
                    n.reactions[slot].rate
                } else {
                    n.transporters[slot - n_reactions].rate
                }
            };
            let write = |n: &mut GeneNetwork, v: f64| {
                if slot < n_reactions {
                    n.reactions[slot].rate = v;
                } else {
                    n.transporters[slot - n_reactions].rate = v;
                }
            };

            let original = read(net);
            for candidate in [original * factor, original / factor] {
                write(net, candidate);
                let err = evaluate(net, p);
                if err < best {
                    best = err;
                    improved = true;
                } else {
                    write(net, original);
                }
            }
        }

        if !improved {
            log::info!(
                "network optimisation converged after {} iterations, error {:.3} mV",
                iteration,
                1e3 * best
            );
            break;
        }
    }
    best
}

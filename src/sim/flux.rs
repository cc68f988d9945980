// Membrane and gap-junction flux kernels.
//
// All fluxes are in mol/(m^2 s) through the membrane domain they belong to,
// positive into the owning cell.

use crate::units::F;

/// Electrodiffusive flux across a membrane, Goldman-Hodgkin-Katz form.
///
/// `perm` is the effective permeability [m/s], `vm` the membrane voltage
/// (inside minus outside). Degenerates to the Fickian form as the voltage
/// term vanishes, which also covers uncharged solutes.
pub fn ghk_flux(perm: f64, z: f64, c_in: f64, c_out: f64, vm: f64, rt: f64) -> f64 {
    let u = z * F * vm / rt;
    if u.abs() < 1e-9 {
        perm * (c_out - c_in)
    } else {
        let e = (-u).exp();
        perm * u * (c_out * e - c_in) / (1.0 - e)
    }
}

/// Fickian flux through the gap junctions of one membrane domain.
///
/// `open` is the junction open fraction, `surface` the fraction of the
/// membrane area occupied by pores, `d_free` the solute's free diffusion
/// constant and `gjl` the junction channel length.
pub fn gj_flux(open: f64, surface: f64, d_free: f64, c_self: f64, c_partner: f64, gjl: f64) -> f64 {
    open * surface * d_free * (c_partner - c_self) / gjl
}

/// Hill kinetics saturation term.
pub fn hill(x: f64, km: f64, n: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let xn = (x / km).powf(n);
    xn / (1.0 + xn)
}

/// Na/K-ATPase fluxes on one membrane, thermodynamically limited.
///
/// Returns `(f_na, f_k)`: 3 Na out and 2 K in per pump cycle, so `f_na` is
/// negative and `f_k` positive under physiological gradients. The pump rate
/// saturates on the free energy remaining after moving the ions uphill.
#[allow(clippy::too_many_arguments)]
pub fn pump_nak(
    c_na_in: f64,
    c_na_out: f64,
    c_k_in: f64,
    c_k_out: f64,
    vm: f64,
    alpha: f64,
    delta_g_atp: f64,
    rt: f64,
) -> (f64, f64) {
    if c_na_in <= 0.0 || c_na_out <= 0.0 || c_k_in <= 0.0 || c_k_out <= 0.0 {
        return (0.0, 0.0);
    }
    let dg_na = rt * (c_na_out / c_na_in).ln() + F * vm;
    let dg_k = rt * (c_k_in / c_k_out).ln() - F * vm;
    let dg_pump = (delta_g_atp - (3.0 * dg_na + 2.0 * dg_k)) / 1000.0;
    let gate = hill(dg_pump, 6.0, 3.0);

    let f_na = -alpha * gate * c_na_in * c_k_out;
    let f_k = -(2.0 / 3.0) * f_na;
    (f_na, f_k)
}

/// Open fraction of a junction under a transjunctional voltage difference.
/// Junctions close smoothly above the threshold, down to `min_open`.
pub fn gj_gate(v_diff: f64, vthresh: f64, vgrad: f64, min_open: f64) -> f64 {
    let x = (v_diff.abs() - vthresh) / vgrad;
    min_open + (1.0 - min_open) / (1.0 + x.exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RT: f64 = 8.314 * 310.0;

    #[test]
    fn ghk_matches_fick_at_zero_voltage() {
        let fick = 1e-9 * (145.0 - 12.0);
        let ghk = ghk_flux(1e-9, 1.0, 12.0, 145.0, 0.0, RT);
        assert!((ghk - fick).abs() < 1e-18);
    }

    #[test]
    fn ghk_is_continuous_around_the_fick_branch() {
        let near = ghk_flux(1e-9, 1.0, 12.0, 145.0, 1e-12, RT);
        let at = ghk_flux(1e-9, 1.0, 12.0, 145.0, 0.0, RT);
        assert!((near - at).abs() / at.abs() < 1e-6);
    }

    #[test]
    fn negative_voltage_pulls_cations_inward() {
        let rest = ghk_flux(1e-9, 1.0, 12.0, 145.0, -70e-3, RT);
        let depol = ghk_flux(1e-9, 1.0, 12.0, 145.0, 0.0, RT);
        assert!(rest > depol, "hyperpolarisation should boost cation influx");
    }

    #[test]
    fn ghk_flux_vanishes_at_nernst_equilibrium() {
        let c_in: f64 = 12.0;
        let c_out: f64 = 145.0;
        let v_nernst = (RT / F) * (c_out / c_in).ln();
        let f = ghk_flux(1e-9, 1.0, c_in, c_out, v_nernst, RT);
        assert!(f.abs() < 1e-15);
    }

    #[test]
    fn gj_flux_runs_down_the_gradient_and_balances() {
        let a = gj_flux(1.0, 0.05, 1e-9, 10.0, 20.0, 1e-7);
        let b = gj_flux(1.0, 0.05, 1e-9, 20.0, 10.0, 1e-7);
        assert!(a > 0.0);
        assert_eq!(a, -b);
    }

    #[test]
    fn pump_moves_na_out_and_k_in_at_rest() {
        let (f_na, f_k) = pump_nak(12.0, 145.0, 139.0, 5.0, -70e-3, 1e-7, 20.0 * RT, RT);
        assert!(f_na < 0.0, "Na should leave the cell");
        assert!(f_k > 0.0, "K should enter the cell");
        assert!((f_k / f_na + 2.0 / 3.0).abs() < 1e-12, "3:2 stoichiometry");
    }

    #[test]
    fn pump_stalls_without_free_energy() {
        // Zero ATP energy leaves nothing to drive the uphill transport.
        let (f_na, f_k) = pump_nak(12.0, 145.0, 139.0, 5.0, -70e-3, 1e-7, 0.0, RT);
        assert!(f_na.abs() < 1e-12);
        assert!(f_k.abs() < 1e-12);
    }

    #[test]
    fn junction_gate_spans_open_to_min() {
        let open = gj_gate(0.0, 60e-3, 15e-3, 0.1);
        let closed = gj_gate(0.5, 60e-3, 15e-3, 0.1);
        assert!(open > 0.95);
        assert!((closed - 0.1).abs() < 1e-6);
        // Gating depends on magnitude only.
        assert_eq!(
            gj_gate(80e-3, 60e-3, 15e-3, 0.1),
            gj_gate(-80e-3, 60e-3, 15e-3, 0.1)
        );
    }
}

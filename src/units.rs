//! Physical constants used throughout the solvers.
//!
//! The engine works in SI units:
//! - Length: meter (m)
//! - Time: second (s)
//! - Concentration: mol/m^3 (numerically equal to mmol/L)
//! - Voltage: volt (V)

/// Faraday constant [C/mol].
pub const F: f64 = 96485.0;
/// Universal gas constant [J/(K*mol)].
pub const R: f64 = 8.314;
/// Permittivity of free space [F/m].
pub const EPS0: f64 = 8.854e-12;
/// Relative permittivity of water.
pub const EPS_WATER: f64 = 80.0;
/// Boltzmann constant [m^2 kg / (s^2 K)].
pub const KB: f64 = 1.3806e-23;
/// Elementary charge [C].
pub const Q_E: f64 = 1.602e-19;

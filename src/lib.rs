pub mod config;
pub mod error;
pub mod grn;
pub mod io;
pub mod ion;
pub mod mesh;
pub mod parameters;
pub mod phase;
pub mod physics;
pub mod runner;
pub mod sim;
pub mod units;

// Auxiliary physics layered on top of the ion transport core: net currents,
// electroosmotic flow and tissue deformation. Each module reads the fluxes
// the transport step just produced and writes its fields back onto the
// simulator.

pub mod current;
pub mod deform;
pub mod flow;

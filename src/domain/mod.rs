//! Domain layer: batch and item records, status derivation, and the ports the
//! application layer depends on.

pub mod batch;
pub mod ports;
pub mod recipient;

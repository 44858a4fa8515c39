//! Simulation socket plumbing

pub mod correlator;
pub mod framing;
pub mod link;
pub mod protocol;

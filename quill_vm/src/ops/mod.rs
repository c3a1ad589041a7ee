//! Call instructions.

pub mod invoke_virtual;

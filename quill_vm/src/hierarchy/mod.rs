//! Class hierarchy analysis consumed by call sites.

mod oracle;

pub use oracle::ClassHierarchyOracle;

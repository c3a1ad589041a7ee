//! INVOKEVIRTUAL: tiered virtual method dispatch.
//!
//! - [`ResolutionSeed`]: what a call site was linked against
//! - [`generic_method_lookup`]: uncached vtable resolution
//! - [`InvokeVirtualNode`]: the call site with its dispatch cache

mod lookup;
mod node;
mod seed;

pub use lookup::generic_method_lookup;
pub use node::InvokeVirtualNode;
pub use seed::ResolutionSeed;

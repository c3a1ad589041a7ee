//! Classes, vtables and methods.

pub mod class;
pub mod method;

//! Hot method redefinition.

mod coordinator;

pub use coordinator::RedefinitionCoordinator;

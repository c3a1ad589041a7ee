//! Virtual method dispatch for the Quill interpreter.
//!
//! Each INVOKEVIRTUAL call site resolves its receiver through four tiers:
//! single-implementor speculation, leaf-method speculation, a bounded
//! monomorphic/polymorphic inline cache, and a megamorphic generic lookup.
//! Speculation is guarded by revocable assumptions, so class loading and hot
//! method redefinition make call sites fall through to the next tier instead
//! of invoking stale code.
//!
//! # Usage
//!
//! ```ignore
//! let engine = DispatchEngine::with_defaults(object.clone());
//! engine.load_class(&circle);
//! let site = engine.link_call_site(ResolutionSeed::link(&shape, 2)?);
//! let area = site.dispatch(&[Value::new_object(&circle)])?;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod ic_manager;
pub mod inline_cache;
pub mod ops;
pub mod redefinition;
pub mod stats;

pub use config::{ConfigError, DispatchConfig};
pub use engine::DispatchEngine;
pub use error::{DispatchError, RedefinitionError};
pub use hierarchy::ClassHierarchyOracle;
pub use ic_manager::{CallSiteBreakdown, CallSiteId, CallSiteRegistry};
pub use inline_cache::{CACHE_LIMIT, CallSiteClassification, CallSiteProfile, DispatchState};
pub use ops::invoke_virtual::{InvokeVirtualNode, ResolutionSeed, generic_method_lookup};
pub use redefinition::RedefinitionCoordinator;
pub use stats::{CallKind, DispatchSnapshot, DispatchTier};

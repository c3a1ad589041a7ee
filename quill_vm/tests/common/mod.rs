//! Shared fixtures for integration tests.
//!
//! ```text
//! Object  [0: hashCode, 1: equals, 2: toString]
//!   │
//! Base    [.., 3: compute (abstract)]
//!   │
//! A, B, … [.., 3: compute → own tag]
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use quill_runtime::{ClassBuilder, ClassFlags, ConcreteType, MethodBody, Signature, Value};
use quill_vm::{DispatchConfig, DispatchEngine, InvokeVirtualNode, ResolutionSeed};

/// Slot of `Base.compute()`.
pub const COMPUTE_SLOT: u32 = 3;

pub fn compute() -> Signature {
    Signature::new("compute", "()I")
}

pub fn to_string() -> Signature {
    Signature::new("toString", "()S")
}

/// Body returning a fixed integer.
pub fn constant(value: i64) -> MethodBody {
    Arc::new(move |_args: &[Value]| Ok(Value::Int(value)))
}

/// Body returning a fixed string.
pub fn tagged(tag: &str) -> MethodBody {
    let tag: Arc<str> = Arc::from(tag);
    Arc::new(move |_args: &[Value]| Ok(Value::Str(tag.clone())))
}

pub struct World {
    pub engine: Arc<DispatchEngine>,
    pub object: ConcreteType,
    pub base: ConcreteType,
}

pub fn world() -> World {
    world_with(DispatchConfig::default())
}

pub fn world_with(config: DispatchConfig) -> World {
    let object = ClassBuilder::new("Object")
        .method(Signature::new("hashCode", "()I"), constant(0))
        .method(Signature::new("equals", "(LObject;)Z"), constant(0))
        .method(to_string(), tagged("Object"))
        .build()
        .expect("root type");
    let engine = DispatchEngine::new(object.clone(), config).expect("valid config");

    let base = ClassBuilder::new("Base")
        .extends(&object)
        .flags(ClassFlags::ABSTRACT)
        .abstract_method(compute())
        .build()
        .expect("base type");
    engine.load_class(&base);

    World {
        engine,
        object,
        base,
    }
}

impl World {
    /// Load a subclass of `Base` whose `compute()` runs `body`.
    pub fn implementor(&self, name: &str, body: MethodBody) -> ConcreteType {
        let ty = ClassBuilder::new(name)
            .extends(&self.base)
            .method(compute(), body)
            .build()
            .expect("implementor");
        self.engine.load_class(&ty);
        ty
    }

    /// Load a subclass of `Base` that does not implement `compute()`.
    pub fn hollow(&self, name: &str) -> ConcreteType {
        let ty = ClassBuilder::new(name)
            .extends(&self.base)
            .build()
            .expect("hollow type");
        self.engine.load_class(&ty);
        ty
    }

    /// Call site for `Base.compute()`.
    pub fn compute_site(&self) -> InvokeVirtualNode {
        let seed = ResolutionSeed::link(&self.base, COMPUTE_SLOT).expect("compute slot");
        self.engine.link_call_site(seed)
    }

    /// Call site for `Object.toString()`.
    pub fn to_string_site(&self) -> InvokeVirtualNode {
        let seed = ResolutionSeed::for_signature(&self.object, &to_string()).expect("toString slot");
        self.engine.link_call_site(seed)
    }
}

/// A fresh instance of `ty` as receiver argument list.
pub fn args(ty: &ConcreteType) -> [Value; 1] {
    [Value::new_object(ty)]
}

pub fn str_value(value: &Value) -> &str {
    match value {
        Value::Str(s) => s,
        other => panic!("expected string, got {other:?}"),
    }
}

//! Uncached virtual method resolution.
//!
//! This is the ground truth every cached tier must agree with, and the
//! per-call lookup of a megamorphic site.

use std::sync::Arc;

use quill_runtime::{ConcreteType, MethodVersion};

use crate::error::DispatchError;
use crate::ops::invoke_virtual::ResolutionSeed;
use crate::redefinition::RedefinitionCoordinator;

/// Resolve the seed's vtable slot on `receiver`.
///
/// Array receivers use the root type's vtable. Removed methods, whether the
/// seed itself or the method found in the slot, are re-resolved through the
/// coordinator. A slot without an executable body is an
/// `AbstractMethodError`.
pub fn generic_method_lookup(
    coordinator: &RedefinitionCoordinator,
    root: &ConcreteType,
    seed: &ResolutionSeed,
    receiver: &ConcreteType,
) -> Result<Arc<MethodVersion>, DispatchError> {
    let target = if seed.method().is_removed() {
        coordinator.handle_removed_method(seed, receiver)?
    } else {
        let holder = if receiver.is_array() { root } else { receiver };
        let method = holder
            .vtable_method(seed.vtable_index())
            .ok_or_else(|| abstract_method(seed, receiver))?;
        if method.is_removed() {
            coordinator.handle_removed_method(seed, receiver)?
        } else {
            method.method_version()
        }
    };

    if !target.is_executable() {
        return Err(abstract_method(seed, receiver));
    }
    Ok(target)
}

fn abstract_method(seed: &ResolutionSeed, receiver: &ConcreteType) -> DispatchError {
    DispatchError::AbstractMethod {
        class: Arc::from(receiver.name()),
        method: Arc::from(seed.qualified_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::hierarchy::ClassHierarchyOracle;
    use quill_runtime::{ClassBuilder, ClassFlags, MethodBody, Signature, Value};

    fn body(value: i64) -> MethodBody {
        Arc::new(move |_args: &[Value]| Ok(Value::Int(value)))
    }

    fn hash_code() -> Signature {
        Signature::new("hashCode", "()I")
    }

    fn area() -> Signature {
        Signature::new("area", "()I")
    }

    struct Fixture {
        coordinator: RedefinitionCoordinator,
        object: ConcreteType,
        shape: ConcreteType,
        circle: ConcreteType,
    }

    fn fixture() -> Fixture {
        let object = ClassBuilder::new("Object")
            .method(hash_code(), body(0))
            .build()
            .unwrap();
        let shape = ClassBuilder::new("Shape")
            .extends(&object)
            .flags(ClassFlags::ABSTRACT)
            .abstract_method(area())
            .build()
            .unwrap();
        let circle = ClassBuilder::new("Circle")
            .extends(&shape)
            .method(hash_code(), body(7))
            .method(area(), body(3))
            .build()
            .unwrap();
        let coordinator = RedefinitionCoordinator::new(
            Arc::new(ClassHierarchyOracle::new()),
            object.clone(),
            &DispatchConfig::default(),
        );
        Fixture {
            coordinator,
            object,
            shape,
            circle,
        }
    }

    fn lookup(f: &Fixture, seed: &ResolutionSeed, receiver: &ConcreteType) -> Result<Arc<MethodVersion>, DispatchError> {
        generic_method_lookup(&f.coordinator, &f.object, seed, receiver)
    }

    #[test]
    fn test_resolves_receiver_slot() {
        let f = fixture();
        let seed = ResolutionSeed::for_signature(&f.shape, &area()).unwrap();
        let target = lookup(&f, &seed, &f.circle).unwrap();
        assert_eq!(target.qualified_name(), "Circle.area()I");
        assert_eq!(target.invoke(&[]).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_array_uses_root_vtable() {
        let f = fixture();
        let array = ClassBuilder::array_of(&f.circle, &f.object);
        let seed = ResolutionSeed::for_signature(&f.object, &hash_code()).unwrap();
        let target = lookup(&f, &seed, &array).unwrap();
        assert_eq!(target.qualified_name(), "Object.hashCode()I");
    }

    #[test]
    fn test_abstract_slot_fails() {
        let f = fixture();
        let seed = ResolutionSeed::for_signature(&f.shape, &area()).unwrap();
        let err = lookup(&f, &seed, &f.shape).unwrap_err();
        assert!(matches!(err, DispatchError::AbstractMethod { .. }));
    }

    #[test]
    fn test_slot_past_vtable_is_abstract() {
        let f = fixture();
        let seed = ResolutionSeed::for_signature(&f.shape, &area()).unwrap();
        let err = lookup(&f, &seed, &f.object).unwrap_err();
        assert!(matches!(err, DispatchError::AbstractMethod { .. }));
    }

    #[test]
    fn test_removed_target_is_re_resolved() {
        let f = fixture();
        let seed = ResolutionSeed::for_signature(&f.object, &hash_code()).unwrap();
        let circle_hash = f.circle.find_declared(&hash_code()).unwrap();
        f.coordinator.remove_method(circle_hash);

        let target = lookup(&f, &seed, &f.circle).unwrap();
        assert_eq!(target.qualified_name(), "Object.hashCode()I");
        assert_eq!(f.coordinator.slow_path_count(), 1);
    }

    #[test]
    fn test_removed_seed_is_re_resolved() {
        let f = fixture();
        let seed = ResolutionSeed::for_signature(&f.circle, &area()).unwrap();
        f.coordinator.remove_method(seed.method());

        // Nothing else declares area() with a body
        let err = lookup(&f, &seed, &f.circle).unwrap_err();
        assert!(matches!(err, DispatchError::AbstractMethod { .. }));
    }
}

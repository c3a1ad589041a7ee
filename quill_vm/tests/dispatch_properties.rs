//! Dispatch correctness properties.

mod common;

use std::sync::Arc;

use common::{args, compute, constant, str_value, tagged, to_string, world, world_with};
use quill_runtime::{ClassBuilder, ExceptionKind, Value};
use quill_vm::{
    CallSiteClassification, CallSiteProfile, DispatchConfig, DispatchError, DispatchState,
    DispatchTier, ResolutionSeed,
};

fn no_speculation() -> DispatchConfig {
    DispatchConfig {
        single_implementor_speculation: false,
        leaf_method_speculation: false,
        ..Default::default()
    }
}

// =============================================================================
// Ground Truth
// =============================================================================

#[test]
fn test_cached_targets_match_generic_lookup() {
    let w = world();
    let types: Vec<_> = (0..5)
        .map(|i| w.implementor(&format!("T{i}"), constant(i)))
        .collect();
    let site = w.compute_site();

    for ty in &types {
        let expected = w.engine.method_lookup(site.seed(), ty).unwrap();
        let result = site.dispatch(&args(ty)).unwrap();
        assert_eq!(result, expected.invoke(&args(ty)).unwrap());
    }

    match site.profile() {
        CallSiteProfile::Polymorphic(pairs) => {
            assert_eq!(pairs.len(), types.len());
            for (guard, target) in pairs {
                let truth = w.engine.method_lookup(site.seed(), &guard).unwrap();
                assert!(Arc::ptr_eq(&target, &truth));
            }
        }
        other => panic!("expected polymorphic profile, got {other:?}"),
    }
}

// =============================================================================
// Cache Bound
// =============================================================================

#[test]
fn test_entry_count_never_exceeds_limit() {
    let w = world_with(no_speculation());
    let site = w.compute_site();

    for i in 0..8 {
        let ty = w.implementor(&format!("T{i}"), constant(i));
        site.dispatch(&args(&ty)).unwrap();
        match &*site.state() {
            DispatchState::Cached(table) => assert_eq!(table.len(), i as usize + 1),
            other => panic!("expected cached state, got {other:?}"),
        }
    }

    let ninth = w.implementor("T8", constant(8));
    assert_eq!(site.dispatch(&args(&ninth)).unwrap(), Value::Int(8));
    assert!(matches!(*site.state(), DispatchState::Megamorphic));

    // Megamorphic is permanent
    let tenth = w.implementor("T9", constant(9));
    assert_eq!(site.dispatch(&args(&tenth)).unwrap(), Value::Int(9));
    assert_eq!(site.classification(), CallSiteClassification::Megamorphic);
    assert_eq!(site.stats().megamorphic_transitions, 1);
}

#[test]
fn test_invalid_entries_free_their_slot() {
    let config = DispatchConfig {
        cache_limit: 2,
        ..no_speculation()
    };
    let w = world_with(config);
    let a = w.implementor("A", constant(1));
    let b = w.implementor("B", constant(2));
    let c = w.implementor("C", constant(3));
    let site = w.compute_site();

    site.dispatch(&args(&a)).unwrap();
    site.dispatch(&args(&b)).unwrap();

    // Retire A's entry; C takes the freed slot instead of saturating
    w.engine
        .redefine_method(a.find_declared(&compute()).unwrap(), Some(constant(10)));
    assert_eq!(site.dispatch(&args(&c)).unwrap(), Value::Int(3));
    assert_eq!(site.classification(), CallSiteClassification::Polymorphic);

    // A now needs a third slot
    assert_eq!(site.dispatch(&args(&a)).unwrap(), Value::Int(10));
    assert_eq!(site.classification(), CallSiteClassification::Megamorphic);
}

// =============================================================================
// Invalidation
// =============================================================================

#[test]
fn test_redefined_version_is_never_invoked_again() {
    let w = world();
    let a = w.implementor("A", constant(1));
    let site = w.compute_site();
    let method = a.find_declared(&compute()).unwrap().clone();

    assert_eq!(site.dispatch(&args(&a)).unwrap(), Value::Int(1));
    for round in 2..6 {
        w.engine.redefine_method(&method, Some(constant(round)));
        assert_eq!(site.dispatch(&args(&a)).unwrap(), Value::Int(round));
        assert_eq!(site.dispatch(&args(&a)).unwrap(), Value::Int(round));
    }
}

#[test]
fn test_tiers_only_move_down() {
    let w = world();
    let a = w.implementor("A", constant(1));
    let site = w.compute_site();
    site.dispatch(&args(&a)).unwrap();
    assert!(matches!(*site.state(), DispatchState::SingleImplementor(_)));

    // Unloading B makes A the single implementor again, but the site stays cached
    let b = w.implementor("B", constant(2));
    site.dispatch(&args(&a)).unwrap();
    assert!(w.engine.unload_class(b.id()));
    for _ in 0..3 {
        assert_eq!(site.dispatch(&args(&a)).unwrap(), Value::Int(1));
    }
    assert!(matches!(*site.state(), DispatchState::Cached(_)));
    assert_eq!(site.stats().hits(DispatchTier::Cached), 4);
}

#[test]
fn test_removed_method_resolves_without_deopt_loop() {
    let w = world();
    let a = ClassBuilder::new("A")
        .extends(&w.object)
        .method(to_string(), tagged("A"))
        .build()
        .unwrap();
    w.engine.load_class(&a);
    let site = w.to_string_site();
    assert_eq!(str_value(&site.dispatch(&args(&a)).unwrap()), "A");

    w.engine.remove_method(a.find_declared(&to_string()).unwrap());
    for _ in 0..10 {
        assert_eq!(str_value(&site.dispatch(&args(&a)).unwrap()), "Object");
    }

    let stats = site.stats();
    assert_eq!(stats.transitions, 2);
    assert_eq!(stats.resolutions, 2);
    assert_eq!(stats.fallthroughs, 1);
    assert_eq!(stats.hits(DispatchTier::Cached), 11);
    assert_eq!(w.engine.stats().redefinition_slow_paths, 1);
}

// =============================================================================
// Receivers
// =============================================================================

#[test]
fn test_array_receiver_uses_root_vtable() {
    let w = world();
    let a = ClassBuilder::new("A")
        .extends(&w.object)
        .method(to_string(), tagged("A"))
        .build()
        .unwrap();
    w.engine.load_class(&a);
    let array = ClassBuilder::array_of(&a, &w.object);
    w.engine.load_class(&array);
    let site = w.to_string_site();

    assert_eq!(str_value(&site.dispatch(&args(&array)).unwrap()), "Object");
    assert_eq!(str_value(&site.dispatch(&args(&a)).unwrap()), "A");
    assert_eq!(str_value(&site.dispatch(&args(&array)).unwrap()), "Object");
}

#[test]
fn test_null_receiver_touches_nothing() {
    let w = world();
    w.implementor("A", constant(1));
    let site = w.compute_site();

    let err = site.dispatch(&[Value::Null]).unwrap_err();
    assert!(matches!(err, DispatchError::NullReceiver { .. }));
    assert_eq!(
        err.to_guest_exception().unwrap().kind(),
        &ExceptionKind::NullPointer
    );
    assert!(matches!(*site.state(), DispatchState::Uninitialized));
    assert_eq!(site.stats(), Default::default());
    assert_eq!(w.engine.stats().transitions, 0);
}

// =============================================================================
// Abstract Methods
// =============================================================================

#[test]
fn test_abstract_slot_via_cached_tier() {
    let w = world();
    let hollow = w.hollow("Hollow");
    let site = w.compute_site();

    // Tier 1 skips the codeless implementor; tier 3 reports the error
    let err = site.dispatch(&args(&hollow)).unwrap_err();
    assert!(matches!(err, DispatchError::AbstractMethod { .. }));
    assert_eq!(
        err.to_guest_exception().unwrap().kind(),
        &ExceptionKind::AbstractMethod
    );

    let a = w.implementor("A", constant(1));
    assert_eq!(site.dispatch(&args(&a)).unwrap(), Value::Int(1));
    assert!(site.dispatch(&args(&hollow)).is_err());
}

#[test]
fn test_abstract_slot_via_megamorphic_tier() {
    let config = DispatchConfig {
        cache_limit: 1,
        ..Default::default()
    };
    let w = world_with(config);
    let a = w.implementor("A", constant(1));
    let b = w.implementor("B", constant(2));
    let hollow = w.hollow("Hollow");
    let site = w.compute_site();

    site.dispatch(&args(&a)).unwrap();
    site.dispatch(&args(&b)).unwrap();
    assert!(matches!(*site.state(), DispatchState::Megamorphic));

    let err = site.dispatch(&args(&hollow)).unwrap_err();
    assert!(matches!(err, DispatchError::AbstractMethod { .. }));
    assert!(matches!(*site.state(), DispatchState::Megamorphic));
}

#[test]
fn test_redefining_to_abstract_raises() {
    let w = world_with(no_speculation());
    let a = w.implementor("A", constant(1));
    let site = w.compute_site();
    site.dispatch(&args(&a)).unwrap();

    w.engine
        .redefine_method(a.find_declared(&compute()).unwrap(), None);
    let err = site.dispatch(&args(&a)).unwrap_err();
    assert!(matches!(err, DispatchError::AbstractMethod { .. }));
}

#[test]
fn test_seed_links_by_slot_or_signature() {
    let w = world();
    let by_slot = ResolutionSeed::link(&w.base, common::COMPUTE_SLOT).unwrap();
    let by_sig = ResolutionSeed::for_signature(&w.base, &compute()).unwrap();
    assert!(Arc::ptr_eq(by_slot.method(), by_sig.method()));
    assert!(ResolutionSeed::link(&w.base, 4).is_err());
}

use reef_vm::{
    Compartment, Error, FeatureSpec, Global, GlobalType, Linker, Memory, MemoryType, Module,
    Limits, Val, ValType,
};

fn module(wat: &str) -> Module {
    let bytes = wat::parse_str(wat).unwrap();
    Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap()
}

#[test_log::test]
fn missing_import_is_a_link_error() {
    let module = module(r#"(module (import "env" "f" (func)))"#);
    let mut compartment = Compartment::new();
    let err = Linker::new()
        .instantiate(&mut compartment, &module)
        .unwrap_err();
    assert!(matches!(err, Error::Link(_)), "{err}");
}

#[test_log::test]
fn import_type_mismatch_is_a_link_error() {
    let module = module(r#"(module (import "env" "thing" (func (param i32))))"#);
    let mut compartment = Compartment::new();
    let global = Global::new(
        &mut compartment,
        GlobalType {
            content: ValType::I32,
            mutable: false,
        },
        Val::I32(1),
    )
    .unwrap();
    let mut linker = Linker::new();
    linker.define("env", "thing", global).unwrap();
    let err = linker.instantiate(&mut compartment, &module).unwrap_err();
    assert!(matches!(err, Error::Link(_)));
}

#[test_log::test]
fn memory_import_respects_limits() {
    let module = module(r#"(module (import "env" "mem" (memory 2)))"#);
    let mut compartment = Compartment::new();

    // One page provided where at least two are demanded.
    let too_small = Memory::new(
        &mut compartment,
        MemoryType {
            shared: false,
            limits: Limits::new(1, None),
        },
    )
    .unwrap();
    let mut linker = Linker::new();
    linker.define("env", "mem", too_small).unwrap();
    let err = linker.instantiate(&mut compartment, &module).unwrap_err();
    assert!(matches!(err, Error::Link(_)));

    // Two pages satisfy the subset rule.
    let big_enough = Memory::new(
        &mut compartment,
        MemoryType {
            shared: false,
            limits: Limits::new(2, Some(4)),
        },
    )
    .unwrap();
    let mut linker = Linker::new();
    linker.define("env", "mem", big_enough).unwrap();
    linker.instantiate(&mut compartment, &module).unwrap();
}

#[test_log::test]
fn instances_link_through_the_linker() {
    let provider = module(
        r#"(module
             (func (export "triple") (param i32) (result i32)
               local.get 0
               i32.const 3
               i32.mul))"#,
    );
    let consumer = module(
        r#"(module
             (import "math" "triple" (func $triple (param i32) (result i32)))
             (func (export "nine_times") (param i32) (result i32)
               local.get 0
               call $triple
               call $triple))"#,
    );

    let mut compartment = Compartment::new();
    let mut linker = Linker::new();

    let provider_instance = linker.instantiate(&mut compartment, &provider).unwrap();
    linker.define_instance("math", provider_instance).unwrap();

    let instance = linker.instantiate(&mut compartment, &consumer).unwrap();
    let func = instance.get_func(&compartment, "nine_times").unwrap();
    let mut results = [Val::I32(0)];
    func.call(&mut compartment, &[Val::I32(5)], &mut results)
        .unwrap();
    assert_eq!(results[0], Val::I32(45));
}

#[test_log::test]
fn global_initializer_reads_imported_global() {
    let module = module(
        r#"(module
             (import "env" "base" (global $base i32))
             (global $derived i32 (global.get $base))
             (func (export "read") (result i32) global.get $derived))"#,
    );
    let mut compartment = Compartment::new();
    let base = Global::new(
        &mut compartment,
        GlobalType {
            content: ValType::I32,
            mutable: false,
        },
        Val::I32(1234),
    )
    .unwrap();
    let mut linker = Linker::new();
    linker.define("env", "base", base).unwrap();
    let instance = linker.instantiate(&mut compartment, &module).unwrap();

    let func = instance.get_func(&compartment, "read").unwrap();
    let mut results = [Val::I32(0)];
    func.call(&mut compartment, &[], &mut results).unwrap();
    assert_eq!(results[0], Val::I32(1234));
}

#[test_log::test]
fn failed_instantiation_leaves_no_visible_state() {
    // The second module's data segment overflows the shared (imported)
    // memory; the write into it must not be observable afterwards.
    let provider = module(
        r#"(module
             (memory (export "mem") 1 1)
             (func (export "peek") (param i32) (result i32)
               local.get 0
               i32.load8_u))"#,
    );
    let broken = module(
        r#"(module
             (import "env" "mem" (memory 1))
             ;; starts in bounds, ends out of bounds
             (data (i32.const 65530) "0123456789"))"#,
    );

    let mut compartment = Compartment::new();
    let mut linker = Linker::new();
    let provider_instance = linker.instantiate(&mut compartment, &provider).unwrap();
    let memory = provider_instance.get_memory(&compartment, "mem").unwrap();
    linker.define("env", "mem", memory).unwrap();

    let err = linker.instantiate(&mut compartment, &broken).unwrap_err();
    assert!(err.as_trap().is_some(), "{err}");

    // No partial segment copy is visible through the surviving instance.
    let peek = provider_instance.get_func(&compartment, "peek").unwrap();
    let mut results = [Val::I32(0)];
    peek.call(&mut compartment, &[Val::I32(65530)], &mut results)
        .unwrap();
    assert_eq!(results[0], Val::I32(0));

    // And the compartment still works for new instantiations.
    let ok = module("(module (func (export \"nop\")))");
    Linker::new().instantiate(&mut compartment, &ok).unwrap();
}

#[test_log::test]
fn start_trap_fails_instantiation_atomically() {
    let module = module(
        r#"(module
             (func $bad unreachable)
             (start $bad)
             (func (export "never")))"#,
    );
    let mut compartment = Compartment::new();
    let err = Linker::new()
        .instantiate(&mut compartment, &module)
        .unwrap_err();
    assert!(err.as_trap().is_some());
}

#[test_log::test]
fn tags_are_fresh_per_instance() {
    let mut features = FeatureSpec::default();
    features.exceptions = true;
    let bytes = wat::parse_str(
        r#"(module (tag (export "t") (param i32)))"#,
    )
    .unwrap();
    let module = Module::from_bytes(&features, &bytes).unwrap();

    let mut compartment = Compartment::new();
    let linker = Linker::new();
    let a = linker.instantiate(&mut compartment, &module).unwrap();
    let b = linker.instantiate(&mut compartment, &module).unwrap();

    let tag_a = a.get_tag(&compartment, "t").unwrap();
    let tag_b = b.get_tag(&compartment, "t").unwrap();
    assert_ne!(tag_a, tag_b);
    assert_eq!(tag_a, a.get_tag(&compartment, "t").unwrap());
}

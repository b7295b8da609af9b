use reef_vm::{
    Compartment, Error, FeatureSpec, Linker, Module, Trap, TrapKind, Val,
};

fn module(wat: &str) -> Module {
    let bytes = wat::parse_str(wat).unwrap();
    Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap()
}

fn module_with(features: &FeatureSpec, wat: &str) -> Module {
    let bytes = wat::parse_str(wat).unwrap();
    Module::from_bytes(features, &bytes).unwrap()
}

fn instantiate(compartment: &mut Compartment, module: &Module) -> reef_vm::Instance {
    Linker::new().instantiate(compartment, module).unwrap()
}

fn call1(
    compartment: &mut Compartment,
    instance: reef_vm::Instance,
    name: &str,
    args: &[Val],
) -> reef_vm::Result<Val> {
    let func = instance.get_func(compartment, name).unwrap();
    let mut results = [Val::I32(0)];
    func.call(compartment, args, &mut results)?;
    Ok(results[0])
}

fn expect_trap(result: reef_vm::Result<Val>) -> Trap {
    match result.unwrap_err() {
        Error::Trap(trap) => trap,
        other => panic!("expected a trap, got {other}"),
    }
}

#[test_log::test]
fn add_two_numbers() {
    let module = module(
        r#"(module
             (func (export "add") (param i32 i32) (result i32)
               local.get 0
               local.get 1
               i32.add))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);
    let result = call1(&mut compartment, instance, "add", &[Val::I32(2), Val::I32(3)]).unwrap();
    assert_eq!(result, Val::I32(5));
}

#[test_log::test]
fn data_segments_and_bounds() {
    let module = module(
        r#"(module
             (memory (export "mem") 1)
             (data (i32.const 0) "hi")
             (func (export "first") (result i32)
               i32.const 0
               i32.load8_u)
             (func (export "oob") (param i32) (result i32)
               local.get 0
               i32.load offset=65532))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);

    let result = call1(&mut compartment, instance, "first", &[]).unwrap();
    assert_eq!(result, Val::I32(0x68));

    // The very last in-bounds 4-byte access of a one-page memory.
    let ok = call1(&mut compartment, instance, "oob", &[Val::I32(0)]).unwrap();
    assert_eq!(ok, Val::I32(0));

    // One past it: every escape of the reservation is a trap, not a crash.
    let trap = expect_trap(call1(&mut compartment, instance, "oob", &[Val::I32(4)]));
    assert_eq!(trap.kind(), TrapKind::AccessViolation);

    let trap = expect_trap(call1(
        &mut compartment,
        instance,
        "oob",
        &[Val::I32(i32::MIN)],
    ));
    assert_eq!(trap.kind(), TrapKind::AccessViolation);
}

#[test_log::test]
fn call_indirect_checks_signatures() {
    let module = module(
        r#"(module
             (type $ret_i32 (func (result i32)))
             (table 3 funcref)
             (elem (i32.const 0) $forty_two $wrong)
             (func $forty_two (result i32) i32.const 42)
             (func $wrong (param i32))
             (func (export "ci") (param i32) (result i32)
               local.get 0
               call_indirect (type $ret_i32)))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);

    let result = call1(&mut compartment, instance, "ci", &[Val::I32(0)]).unwrap();
    assert_eq!(result, Val::I32(42));

    // Signature mismatch: the target must not be entered.
    let trap = expect_trap(call1(&mut compartment, instance, "ci", &[Val::I32(1)]));
    assert_eq!(trap.kind(), TrapKind::InvalidIndirectCall);

    // Null slot.
    let trap = expect_trap(call1(&mut compartment, instance, "ci", &[Val::I32(2)]));
    assert_eq!(trap.kind(), TrapKind::InvalidIndirectCall);

    // Out of bounds index.
    let trap = expect_trap(call1(&mut compartment, instance, "ci", &[Val::I32(9)]));
    assert_eq!(trap.kind(), TrapKind::AccessViolation);
}

#[test_log::test]
fn numeric_traps() {
    let module = module(
        r#"(module
             (func (export "div") (param i32 i32) (result i32)
               local.get 0 local.get 1 i32.div_s)
             (func (export "trunc") (param f64) (result i32)
               local.get 0 i32.trunc_f64_s)
             (func (export "boom")
               unreachable))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);

    let trap = expect_trap(call1(
        &mut compartment,
        instance,
        "div",
        &[Val::I32(1), Val::I32(0)],
    ));
    assert_eq!(trap.kind(), TrapKind::IntegerDivideByZero);

    let trap = expect_trap(call1(
        &mut compartment,
        instance,
        "div",
        &[Val::I32(i32::MIN), Val::I32(-1)],
    ));
    assert_eq!(trap.kind(), TrapKind::IntegerOverflow);

    let trap = expect_trap(call1(
        &mut compartment,
        instance,
        "trunc",
        &[Val::from(f64::NAN)],
    ));
    assert_eq!(trap.kind(), TrapKind::InvalidFloatConversion);

    let trap = expect_trap(call1(
        &mut compartment,
        instance,
        "trunc",
        &[Val::from(1e18)],
    ));
    assert_eq!(trap.kind(), TrapKind::IntegerOverflow);

    let boom = instance.get_func(&compartment, "boom").unwrap();
    let err = boom.call(&mut compartment, &[], &mut []).unwrap_err();
    let trap = err.as_trap().unwrap();
    assert_eq!(trap.kind(), TrapKind::Unreachable);
    assert_eq!(trap.frames().len(), 1);
}

#[test_log::test]
fn control_flow_and_locals() {
    let module = module(
        r#"(module
             ;; sum of 1..=n the long way around
             (func (export "sum") (param $n i32) (result i32)
               (local $acc i32)
               block $done
                 loop $top
                   local.get $n
                   i32.eqz
                   br_if $done
                   local.get $n
                   local.get $acc
                   i32.add
                   local.set $acc
                   local.get $n
                   i32.const 1
                   i32.sub
                   local.set $n
                   br $top
                 end
               end
               local.get $acc)
             (func (export "pick") (param i32) (result i32)
               block $a
                 block $b
                   block $c
                     local.get 0
                     br_table $a $b $c
                   end
                   i32.const 30
                   return
                 end
                 i32.const 20
                 return
               end
               i32.const 10)
             (func (export "fib") (param i32) (result i32)
               local.get 0
               i32.const 2
               i32.lt_s
               if (result i32)
                 local.get 0
               else
                 local.get 0 i32.const 1 i32.sub call 2
                 local.get 0 i32.const 2 i32.sub call 2
                 i32.add
               end))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);

    let result = call1(&mut compartment, instance, "sum", &[Val::I32(10)]).unwrap();
    assert_eq!(result, Val::I32(55));

    for (arg, expected) in [(0, 10), (1, 20), (2, 30), (7, 30)] {
        let result = call1(&mut compartment, instance, "pick", &[Val::I32(arg)]).unwrap();
        assert_eq!(result, Val::I32(expected), "pick({arg})");
    }

    let result = call1(&mut compartment, instance, "fib", &[Val::I32(12)]).unwrap();
    assert_eq!(result, Val::I32(144));
}

#[test_log::test]
fn multi_value_blocks() {
    let module = module(
        r#"(module
             (func (export "swap_sub") (param i32 i32) (result i32)
               local.get 0
               local.get 1
               block (param i32 i32) (result i32 i32)
                 ;; leave both, swapped by hand
               end
               i32.sub))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);
    let result = call1(
        &mut compartment,
        instance,
        "swap_sub",
        &[Val::I32(10), Val::I32(4)],
    )
    .unwrap();
    assert_eq!(result, Val::I32(6));
}

#[test_log::test]
fn globals_and_memory_ops() {
    let module = module(
        r#"(module
             (memory 1 2)
             (global $counter (mut i32) (i32.const 0))
             (global (export "answer") i32 (i32.const 42))
             (func (export "bump") (result i32)
               global.get $counter
               i32.const 1
               i32.add
               global.set $counter
               global.get $counter)
             (func (export "grow") (result i32)
               i32.const 1
               memory.grow)
             (func (export "size") (result i32)
               memory.size)
             (func (export "fill_and_read") (result i32)
               i32.const 16
               i32.const 0xab
               i32.const 8
               memory.fill
               i32.const 20
               i32.load8_u))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);

    assert_eq!(
        call1(&mut compartment, instance, "bump", &[]).unwrap(),
        Val::I32(1)
    );
    assert_eq!(
        call1(&mut compartment, instance, "bump", &[]).unwrap(),
        Val::I32(2)
    );

    let answer = instance.get_global(&compartment, "answer").unwrap();
    assert_eq!(answer.get(&compartment), Val::I32(42));

    assert_eq!(
        call1(&mut compartment, instance, "size", &[]).unwrap(),
        Val::I32(1)
    );
    assert_eq!(
        call1(&mut compartment, instance, "grow", &[]).unwrap(),
        Val::I32(1)
    );
    assert_eq!(
        call1(&mut compartment, instance, "size", &[]).unwrap(),
        Val::I32(2)
    );
    // Already at the declared maximum.
    assert_eq!(
        call1(&mut compartment, instance, "grow", &[]).unwrap(),
        Val::I32(-1)
    );

    assert_eq!(
        call1(&mut compartment, instance, "fill_and_read", &[]).unwrap(),
        Val::I32(0xab)
    );
}

#[test_log::test]
fn host_functions() {
    let module = module(
        r#"(module
             (import "env" "mul2" (func $mul2 (param i32) (result i32)))
             (import "env" "fail" (func $fail))
             (func (export "twice") (param i32) (result i32)
               local.get 0
               call $mul2
               call $mul2)
             (func (export "bad")
               call $fail))"#,
    );
    let mut compartment = Compartment::new();
    let mut linker = Linker::new();
    linker
        .func_wrap(&mut compartment, "env", "mul2", |x: i32| x * 2)
        .unwrap();
    linker
        .func_new(&mut compartment, "env", "fail", &[], &[], |_, _, _| {
            Err(Error::Trap(reef_vm::Trap::from_host("host said no")))
        })
        .unwrap();

    let instance = linker.instantiate(&mut compartment, &module).unwrap();
    let result = call1(&mut compartment, instance, "twice", &[Val::I32(5)]).unwrap();
    assert_eq!(result, Val::I32(20));

    let bad = instance.get_func(&compartment, "bad").unwrap();
    let err = bad.call(&mut compartment, &[], &mut []).unwrap_err();
    assert!(err.as_trap().is_some());
}

#[test_log::test]
fn start_function_runs_at_instantiation() {
    let module = module(
        r#"(module
             (global $ran (mut i32) (i32.const 0))
             (func $init global.get $ran i32.const 1 i32.add global.set $ran)
             (start $init)
             (func (export "ran") (result i32) global.get $ran))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);
    assert_eq!(
        call1(&mut compartment, instance, "ran", &[]).unwrap(),
        Val::I32(1)
    );
}

#[test_log::test]
fn runaway_recursion_traps() {
    let module = module(
        r#"(module
             (func (export "spin") (result i32)
               call 0))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);
    let trap = expect_trap(call1(&mut compartment, instance, "spin", &[]));
    assert_eq!(trap.kind(), TrapKind::StackOverflow);
}

#[test_log::test]
fn tail_calls_run_in_constant_stack() {
    let mut features = FeatureSpec::default();
    features.tail_calls = true;
    let module = module_with(
        &features,
        r#"(module
             (func $countdown (param i32) (result i32)
               local.get 0
               i32.eqz
               if (result i32)
                 i32.const 7
               else
                 local.get 0
                 i32.const 1
                 i32.sub
                 return_call $countdown
               end)
             (func (export "run") (result i32)
               i32.const 1000000
               return_call $countdown))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);
    // A million frames would blow the depth limit; tail calls must not.
    let result = call1(&mut compartment, instance, "run", &[]).unwrap();
    assert_eq!(result, Val::I32(7));
}

// The module is assembled by hand: two tags, a function that throws and
// catches, one whose tag never matches, and one whose exception escapes.
//
//   (tag $err (param i32)) (tag $other)
//   (func (export "catches") (param i32) (result i32)
//     try (result i32) local.get 0  throw $err
//     catch $err       i32.const 1  i32.add
//     catch_all        i32.const -1
//     end)
//   (func (export "wrong_tag") (result i32)
//     try (result i32) throw $other catch $err i32.const 0 end)
//   (func (export "escapes") i32.const 3 throw $err)
fn exceptions_module_bytes() -> Vec<u8> {
    fn section(out: &mut Vec<u8>, id: u8, body: &[u8]) {
        out.push(id);
        out.push(u8::try_from(body.len()).unwrap());
        out.extend_from_slice(body);
    }
    fn export(body: &mut Vec<u8>, name: &str, func: u8) {
        body.push(u8::try_from(name.len()).unwrap());
        body.extend_from_slice(name.as_bytes());
        body.extend_from_slice(&[0x00, func]);
    }

    let mut bytes = b"\0asm\x01\0\0\0".to_vec();
    #[rustfmt::skip]
    section(&mut bytes, 1, &[
        0x04,
        0x60, 0x01, 0x7f, 0x00,       // (i32) -> ()
        0x60, 0x00, 0x00,             // () -> ()
        0x60, 0x01, 0x7f, 0x01, 0x7f, // (i32) -> (i32)
        0x60, 0x00, 0x01, 0x7f,       // () -> (i32)
    ]);
    section(&mut bytes, 3, &[0x03, 0x02, 0x03, 0x01]);
    // Tags: $err with type 0, $other with type 1.
    section(&mut bytes, 13, &[0x02, 0x00, 0x00, 0x00, 0x01]);
    let mut exports = vec![0x03];
    export(&mut exports, "catches", 0);
    export(&mut exports, "wrong_tag", 1);
    export(&mut exports, "escapes", 2);
    section(&mut bytes, 7, &exports);
    #[rustfmt::skip]
    section(&mut bytes, 10, &[
        0x03,
        0x11, 0x00,
            0x06, 0x7f,       // try (result i32)
            0x20, 0x00,       // local.get 0
            0x08, 0x00,       // throw $err
            0x07, 0x00,       // catch $err
            0x41, 0x01, 0x6a, // i32.const 1, i32.add
            0x19,             // catch_all
            0x41, 0x7f,       // i32.const -1
            0x0b, 0x0b,
        0x0b, 0x00,
            0x06, 0x7f,       // try (result i32)
            0x08, 0x01,       // throw $other
            0x07, 0x00,       // catch $err
            0x41, 0x00,       // i32.const 0
            0x0b, 0x0b,
        0x06, 0x00,
            0x41, 0x03,       // i32.const 3
            0x08, 0x00,       // throw $err
            0x0b,
    ]);
    bytes
}

#[test_log::test]
fn exceptions_catch_and_rethrow() {
    let mut features = FeatureSpec::default();
    features.exceptions = true;
    let module = Module::from_bytes(&features, &exceptions_module_bytes()).unwrap();
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);

    let result = call1(&mut compartment, instance, "catches", &[Val::I32(41)]).unwrap();
    assert_eq!(result, Val::I32(42));

    // A non-matching tag is not caught by `catch $err` and crosses the host
    // boundary.
    let trap = expect_trap(call1(&mut compartment, instance, "wrong_tag", &[]));
    assert_eq!(trap.kind(), TrapKind::UncaughtException);

    let escapes = instance.get_func(&compartment, "escapes").unwrap();
    let err = escapes.call(&mut compartment, &[], &mut []).unwrap_err();
    assert_eq!(err.as_trap().unwrap().kind(), TrapKind::UncaughtException);
}

#[test_log::test]
fn simd_lanes() {
    let mut features = FeatureSpec::default();
    features.simd = true;
    let module = module_with(
        &features,
        r#"(module
             (func (export "dot_ish") (result i32)
               v128.const i32x4 1 2 3 4
               v128.const i32x4 10 20 30 40
               i32x4.add
               i32x4.extract_lane 2)
             (func (export "splat_all") (param i32) (result i32)
               local.get 0
               i8x16.splat
               i8x16.all_true))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);

    let result = call1(&mut compartment, instance, "dot_ish", &[]).unwrap();
    assert_eq!(result, Val::I32(33));

    assert_eq!(
        call1(&mut compartment, instance, "splat_all", &[Val::I32(7)]).unwrap(),
        Val::I32(1)
    );
    assert_eq!(
        call1(&mut compartment, instance, "splat_all", &[Val::I32(0)]).unwrap(),
        Val::I32(0)
    );
}

#[test_log::test]
fn bulk_memory_segments() {
    let module = module(
        r#"(module
             (memory 1)
             (data $greeting "wasm!")
             (func (export "init_and_read") (result i32)
               i32.const 100     ;; dst
               i32.const 0       ;; src
               i32.const 5       ;; len
               memory.init $greeting
               i32.const 100
               i32.load8_u)
             (func (export "drop_then_init") (result i32)
               data.drop $greeting
               i32.const 0
               i32.const 0
               i32.const 1
               memory.init $greeting
               i32.const 0))"#,
    );
    let mut compartment = Compartment::new();
    let instance = instantiate(&mut compartment, &module);

    let result = call1(&mut compartment, instance, "init_and_read", &[]).unwrap();
    assert_eq!(result, Val::I32(b'w' as i32));

    // Initializing from a dropped segment with nonzero length traps.
    let trap = expect_trap(call1(&mut compartment, instance, "drop_then_init", &[]));
    assert_eq!(trap.kind(), TrapKind::AccessViolation);
}

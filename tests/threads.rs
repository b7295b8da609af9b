use reef_vm::{
    Compartment, FeatureSpec, Limits, Linker, Memory, MemoryType, Module, SharedMemory, TrapKind,
    Val,
};
use std::thread;
use std::time::Duration;

fn features() -> FeatureSpec {
    let mut features = FeatureSpec::default();
    features.threads = true;
    features
}

fn module(wat: &str) -> Module {
    let bytes = wat::parse_str(wat).unwrap();
    Module::from_bytes(&features(), &bytes).unwrap()
}

fn shared_memory() -> SharedMemory {
    SharedMemory::new(MemoryType {
        shared: true,
        limits: Limits::new(1, Some(1)),
    })
    .unwrap()
}

const WAIT_NOTIFY: &str = r#"(module
  (import "env" "mem" (memory 1 1 shared))
  (func (export "wait32") (param i32 i32 i64) (result i32)
    local.get 0
    local.get 1
    local.get 2
    memory.atomic.wait32)
  (func (export "notify") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    memory.atomic.notify)
  (func (export "add") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    i32.atomic.rmw.add)
  (func (export "load") (param i32) (result i32)
    local.get 0
    i32.atomic.load))"#;

fn instantiate_with_memory(
    compartment: &mut Compartment,
    shared: &SharedMemory,
    module: &Module,
) -> reef_vm::Instance {
    let memory = Memory::from_shared(compartment, shared.clone());
    let mut linker = Linker::new();
    linker.define("env", "mem", memory).unwrap();
    linker.instantiate(compartment, module).unwrap()
}

fn call(
    compartment: &mut Compartment,
    instance: reef_vm::Instance,
    name: &str,
    args: &[Val],
) -> i32 {
    let func = instance.get_func(compartment, name).unwrap();
    let mut results = [Val::I32(0)];
    func.call(compartment, args, &mut results).unwrap();
    results[0].unwrap_i32()
}

#[test_log::test]
fn wait_returns_not_equal_on_mismatch() {
    let module = module(WAIT_NOTIFY);
    let shared = shared_memory();
    let mut compartment = Compartment::new();
    let instance = instantiate_with_memory(&mut compartment, &shared, &module);

    // Memory starts zeroed; expecting 7 fails immediately.
    let result = call(
        &mut compartment,
        instance,
        "wait32",
        &[Val::I32(0), Val::I32(7), Val::I64(1_000_000_000)],
    );
    assert_eq!(result, 1);
}

#[test_log::test]
fn wait_times_out() {
    let module = module(WAIT_NOTIFY);
    let shared = shared_memory();
    let mut compartment = Compartment::new();
    let instance = instantiate_with_memory(&mut compartment, &shared, &module);

    let result = call(
        &mut compartment,
        instance,
        "wait32",
        &[Val::I32(0), Val::I32(0), Val::I64(10_000_000)],
    );
    assert_eq!(result, 2);
}

#[test_log::test]
fn notify_wakes_a_waiting_thread() {
    let module = module(WAIT_NOTIFY);
    let shared = shared_memory();

    let waiter = {
        let module = module.clone();
        let shared = shared.clone();
        thread::spawn(move || {
            let mut compartment = Compartment::new();
            let instance = instantiate_with_memory(&mut compartment, &shared, &module);
            call(
                &mut compartment,
                instance,
                "wait32",
                &[Val::I32(0), Val::I32(0), Val::I64(10_000_000_000)],
            )
        })
    };

    let mut compartment = Compartment::new();
    let instance = instantiate_with_memory(&mut compartment, &shared, &module);
    // Keep notifying until the waiter has actually parked and been woken.
    let mut woken = 0;
    while woken == 0 && !waiter.is_finished() {
        woken = call(
            &mut compartment,
            instance,
            "notify",
            &[Val::I32(0), Val::I32(1)],
        );
        thread::yield_now();
    }

    // Woken within the timeout window, not timed out.
    assert_eq!(waiter.join().unwrap(), 0);
}

#[test_log::test]
fn atomic_rmw_is_atomic_across_threads() {
    let module = module(WAIT_NOTIFY);
    let shared = shared_memory();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let module = module.clone();
        let shared = shared.clone();
        handles.push(thread::spawn(move || {
            let mut compartment = Compartment::new();
            let instance = instantiate_with_memory(&mut compartment, &shared, &module);
            for _ in 0..1000 {
                call(
                    &mut compartment,
                    instance,
                    "add",
                    &[Val::I32(16), Val::I32(1)],
                );
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut compartment = Compartment::new();
    let instance = instantiate_with_memory(&mut compartment, &shared, &module);
    assert_eq!(call(&mut compartment, instance, "load", &[Val::I32(16)]), 4000);
}

#[test_log::test]
fn wait_on_unshared_memory_traps() {
    let bytes = wat::parse_str(
        r#"(module
             (memory 1)
             (func (export "wait32") (param i32 i32 i64) (result i32)
               local.get 0
               local.get 1
               local.get 2
               memory.atomic.wait32))"#,
    )
    .unwrap();
    let module = Module::from_bytes(&features(), &bytes).unwrap();
    let mut compartment = Compartment::new();
    let instance = Linker::new().instantiate(&mut compartment, &module).unwrap();

    let func = instance.get_func(&compartment, "wait32").unwrap();
    let mut results = [Val::I32(0)];
    let err = func
        .call(
            &mut compartment,
            &[Val::I32(0), Val::I32(0), Val::I64(0)],
            &mut results,
        )
        .unwrap_err();
    assert_eq!(err.as_trap().unwrap().kind(), TrapKind::AccessViolation);
}

#[test_log::test]
fn termination_stops_running_guest_code() {
    let bytes = wat::parse_str(
        r#"(module
             (func (export "spin")
               loop
                 br 0
               end))"#,
    )
    .unwrap();
    let module = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap();

    let mut compartment = Compartment::new();
    let instance = Linker::new().instantiate(&mut compartment, &module).unwrap();
    let signal = compartment.termination_signal();

    let guest = thread::spawn(move || {
        let func = instance.get_func(&compartment, "spin").unwrap();
        func.call(&mut compartment, &[], &mut []).unwrap_err()
    });

    thread::sleep(Duration::from_millis(50));
    signal.terminate();

    let err = guest.join().unwrap();
    assert_eq!(err.as_trap().unwrap().kind(), TrapKind::Terminated);
}

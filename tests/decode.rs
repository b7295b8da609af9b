use reef_vm::{Error, FeatureSpec, Module};

fn module(wat: &str) -> Module {
    let bytes = wat::parse_str(wat).unwrap();
    Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap()
}

#[test_log::test]
fn rejects_bad_magic() {
    let err = Module::from_bytes(&FeatureSpec::default(), b"\0wasm\x01\0\0\0").unwrap_err();
    assert!(matches!(err, Error::MalformedModule { offset: 0, .. }));
}

#[test_log::test]
fn rejects_bad_version() {
    let err =
        Module::from_bytes(&FeatureSpec::default(), b"\0asm\x02\0\0\0\0\0\0\0").unwrap_err();
    assert!(matches!(err, Error::MalformedModule { offset: 4, .. }));
}

#[test_log::test]
fn rejects_overlong_leb_in_type_section() {
    // Header, then a type section whose size field is zero encoded in six
    // LEB bytes; five is the most a u32 may use.
    let mut bytes = b"\0asm\x01\0\0\0".to_vec();
    bytes.push(0x01);
    bytes.extend_from_slice(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]);
    let err = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap_err();
    assert!(matches!(err, Error::MalformedModule { .. }));
    assert!(err.offset().unwrap() >= 8);
}

#[test_log::test]
fn rejects_out_of_order_sections() {
    // A function section (id 3) before a type section (id 1).
    let mut bytes = b"\0asm\x01\0\0\0".to_vec();
    bytes.extend_from_slice(&[0x03, 0x01, 0x00]); // empty function section
    bytes.extend_from_slice(&[0x01, 0x01, 0x00]); // empty type section
    let err = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap_err();
    assert!(matches!(err, Error::MalformedModule { .. }));
}

#[test_log::test]
fn rejects_trailing_section_bytes() {
    // Type section claims 3 bytes but holds a single zero count.
    let mut bytes = b"\0asm\x01\0\0\0".to_vec();
    bytes.extend_from_slice(&[0x01, 0x03, 0x00, 0x00, 0x00]);
    let err = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap_err();
    assert!(matches!(err, Error::MalformedModule { .. }));
}

#[test_log::test]
fn rejects_gated_opcode_when_feature_off() {
    let bytes = wat::parse_str(
        r#"(module
             (memory 1 1 shared)
             (func (result i32)
               i32.const 0 i32.const 1 memory.atomic.notify))"#,
    )
    .unwrap();
    let err = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap_err();
    // Shared limits already require threads at decode time.
    assert!(matches!(err, Error::MalformedModule { .. }));
}

#[test_log::test]
fn rejects_value_left_on_stack() {
    let bytes = wat::parse_str("(module (func (result i32) i32.const 1 drop))").unwrap();
    let err = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test_log::test]
fn rejects_type_mismatch() {
    let bytes =
        wat::parse_str("(module (func (result i32) i64.const 1))").unwrap();
    let err = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test_log::test]
fn rejects_bad_alignment() {
    let bytes = wat::parse_str(
        "(module (memory 1) (func (result i32) i32.const 0 i32.load align=8))",
    )
    .unwrap();
    let err = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test_log::test]
fn rejects_duplicate_export_names() {
    let bytes = wat::parse_str(
        r#"(module
             (func (export "f"))
             (global (export "f") i32 (i32.const 0)))"#,
    )
    .unwrap();
    let err = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test_log::test]
fn rejects_mutable_global_in_initializer() {
    let bytes = wat::parse_str(
        r#"(module
             (import "env" "g" (global (mut i32)))
             (global i32 (global.get 0)))"#,
    )
    .unwrap();
    let err = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test_log::test]
fn accepts_stack_polymorphic_code() {
    // After `unreachable`/`br`, demanded operands are conjured until the
    // enclosing `end`.
    module(
        r#"(module
             (func (result i32)
               unreachable
               i32.add)
             (func (result i32)
               block (result i32)
                 i32.const 1
                 br 0
                 f64.mul
                 drop
                 i32.const 7
               end))"#,
    );
}

#[test_log::test]
fn accepts_nested_control_flow() {
    module(
        r#"(module
             (func (param i32) (result i32)
               (local i32)
               block
                 loop
                   local.get 0
                   i32.eqz
                   br_if 1
                   local.get 0
                   local.get 1
                   i32.add
                   local.set 1
                   local.get 0
                   i32.const 1
                   i32.sub
                   local.set 0
                   br 0
                 end
               end
               local.get 1))"#,
    );
}

#[test_log::test]
fn decode_encode_round_trips() {
    let wat = r#"(module
      (type $t (func (param i32 i32) (result i32)))
      (import "env" "inc" (func (type $t)))
      (memory 1 4)
      (table 2 2 funcref)
      (global $g (mut i32) (i32.const 41))
      (func $add (type $t) local.get 0 local.get 1 i32.add)
      (func $use (result i32)
        i32.const 1 i32.const 2 call $add
        global.get $g
        i32.add)
      (elem (i32.const 0) $add $use)
      (data (i32.const 8) "hi\00wasm")
      (export "add" (func $add))
      (export "mem" (memory 0)))"#;
    let bytes = wat::parse_str(wat).unwrap();
    let features = FeatureSpec::default();

    let first = Module::from_bytes(&features, &bytes).unwrap();
    let reencoded = first.to_bytes();
    let second = Module::from_bytes(&features, &reencoded).unwrap();

    // The round-tripped module is equivalent: same text rendering and a
    // stable re-encoding.
    assert_eq!(first.to_wat(), second.to_wat());
    assert_eq!(reencoded, second.to_bytes());
    assert_eq!(
        first.exports().collect::<Vec<_>>(),
        second.exports().collect::<Vec<_>>()
    );
}

#[test_log::test]
fn round_trip_preserves_user_sections() {
    let mut bytes = wat::parse_str("(module (func))").unwrap();
    // Append two custom sections and check they survive in order.
    for (name, payload) in [("first", b"aaa".as_slice()), ("second", b"bb".as_slice())] {
        bytes.push(0x00);
        bytes.push(u8::try_from(1 + name.len() + payload.len()).unwrap());
        bytes.push(u8::try_from(name.len()).unwrap());
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(payload);
    }
    let features = FeatureSpec::default();
    let first = Module::from_bytes(&features, &bytes).unwrap();
    let second = Module::from_bytes(&features, &first.to_bytes()).unwrap();
    assert_eq!(first.to_bytes(), second.to_bytes());
}

#[test_log::test]
fn printer_renders_readable_text() {
    let module = module(
        r#"(module
             (memory 1)
             (global $flag (mut i32) (i32.const 0))
             (func $answer (export "answer") (result i32)
               block (result i32)
                 i32.const 42
               end)
             (data (i32.const 0) "hi"))"#,
    );
    let wat = module.to_wat();
    assert!(wat.starts_with("(module\n"));
    assert!(wat.contains("(memory 1)"));
    assert!(wat.contains("(export \"answer\" (func $answer))"));
    assert!(wat.contains("i32.const 42"));
    assert!(wat.contains("end ;; $L0"));
    assert!(wat.contains("(data (i32.const 0) \"hi\")"));
    // Indentation comes from the marker expansion pass.
    assert!(wat.contains("\n  (func $answer"));
}

#[test_log::test]
fn printer_uses_name_section_names() {
    let module = module(
        r#"(module
             (func $fibonacci (param $n i32) (result i32)
               local.get $n))"#,
    );
    let wat = module.to_wat();
    assert!(wat.contains("$fibonacci"));
    assert!(wat.contains("(param $n i32)"));
}

#[test_log::test]
fn printer_degrades_on_malformed_linking_section() {
    let mut bytes = wat::parse_str("(module)").unwrap();
    let name = b"linking";
    let payload = [0xff, 0xff, 0xff]; // nonsense
    bytes.push(0x00);
    bytes.push(u8::try_from(1 + name.len() + payload.len()).unwrap());
    bytes.push(u8::try_from(name.len()).unwrap());
    bytes.extend_from_slice(name);
    bytes.extend_from_slice(&payload);

    let module = Module::from_bytes(&FeatureSpec::default(), &bytes).unwrap();
    let wat = module.to_wat();
    assert!(wat.contains("linking section:"));
}

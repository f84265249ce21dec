use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use kwire::buffer::{ArgBuffer, ArgReader, ResultSlot};
use kwire::context::FfiContext;
use kwire::library::SharedLibrary;
use kwire::platform::DispatchStrategy;
use kwire::upcall::UpcallHandler;
use kwire::{BuiltinTag, CallConvention};
use tempfile::tempdir;

fn clang_available() -> bool {
    Command::new("clang")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn dynamic_library_filename(base: &str) -> String {
    if cfg!(target_os = "macos") {
        format!("lib{base}.dylib")
    } else if cfg!(target_os = "windows") {
        format!("{base}.dll")
    } else {
        format!("lib{base}.so")
    }
}

fn compile_shared_library(dir: &Path, stem: &str) -> PathBuf {
    let source_path = dir.join(format!("{stem}.c"));
    fs::write(&source_path, c_program()).expect("write c program");
    let lib_path = dir.join(dynamic_library_filename(stem));

    let mut cmd = Command::new("clang");
    if cfg!(target_os = "macos") {
        cmd.arg("-dynamiclib");
    } else {
        cmd.args(["-shared", "-fPIC"]);
    }
    cmd.args([
        source_path.to_str().expect("utf8 source"),
        "-o",
        lib_path.to_str().expect("utf8 output"),
    ]);
    let status = cmd.status().expect("run clang");
    assert!(status.success(), "clang failed to build the fixture");
    lib_path
}

fn c_program() -> &'static str {
    r#"
#if defined(_WIN32)
#define EXPORT __declspec(dllexport)
#else
#define EXPORT
#endif

EXPORT int kw_add(int left, int right) { return left + right; }
EXPORT unsigned int kw_invert(unsigned int value) { return ~value; }
EXPORT double kw_scale(double value, double factor) { return value * factor; }
EXPORT short kw_clamp_byte(int value) {
    if (value > 127) return 127;
    if (value < -128) return -128;
    return (short)value;
}
EXPORT int kw_apply(int (*op)(int, int), int left, int right) {
    return op(left, right);
}
"#
}

fn exercise_library(strategy: DispatchStrategy, lib_path: &Path) {
    let context = FfiContext::with_strategy(strategy);
    let library =
        SharedLibrary::open(&[lib_path.to_str().expect("utf8 lib path")]).expect("open fixture");

    let add = library
        .find("kw_add")
        .expect("lookup")
        .expect("kw_add present");
    let descriptor = context
        .descriptor(
            BuiltinTag::Int,
            &[BuiltinTag::Int, BuiltinTag::Int],
            CallConvention::C,
        )
        .expect("descriptor");
    let mut frame = ArgBuffer::new();
    frame.push_i32(19);
    frame.push_i32(23);
    let sum = unsafe { context.dispatcher().call_i32(add, &descriptor, &mut frame) }
        .expect("kw_add call");
    assert_eq!(sum, 42);

    let invert = library
        .find("kw_invert")
        .expect("lookup")
        .expect("kw_invert present");
    let descriptor = context
        .descriptor(BuiltinTag::UInt, &[BuiltinTag::UInt], CallConvention::C)
        .expect("descriptor");
    frame.rewind();
    frame.push_u32(0x0000_ffff);
    let inverted = unsafe { context.dispatcher().call_u32(invert, &descriptor, &mut frame) }
        .expect("kw_invert call");
    assert_eq!(inverted, 0xffff_0000);

    let scale = library
        .find("kw_scale")
        .expect("lookup")
        .expect("kw_scale present");
    let descriptor = context
        .descriptor(
            BuiltinTag::Double,
            &[BuiltinTag::Double, BuiltinTag::Double],
            CallConvention::C,
        )
        .expect("descriptor");
    frame.rewind();
    frame.push_f64(10.5);
    frame.push_f64(4.0);
    let scaled = unsafe { context.dispatcher().call_f64(scale, &descriptor, &mut frame) }
        .expect("kw_scale call");
    assert_eq!(scaled, 42.0);

    let clamp = library
        .find("kw_clamp_byte")
        .expect("lookup")
        .expect("kw_clamp_byte present");
    let descriptor = context
        .descriptor(BuiltinTag::Short, &[BuiltinTag::Int], CallConvention::C)
        .expect("descriptor");
    frame.rewind();
    frame.push_i32(-4000);
    let clamped = unsafe { context.dispatcher().call_i16(clamp, &descriptor, &mut frame) }
        .expect("kw_clamp_byte call");
    assert_eq!(clamped, -128);

    // Native code calling back through one of our stubs.
    let apply = library
        .find("kw_apply")
        .expect("lookup")
        .expect("kw_apply present");
    let callback_descriptor = context
        .descriptor(
            BuiltinTag::Int,
            &[BuiltinTag::Int, BuiltinTag::Int],
            CallConvention::C,
        )
        .expect("callback descriptor");
    let handler: Arc<dyn UpcallHandler> =
        Arc::new(|args: &ArgReader<'_>, out: &mut ResultSlot| {
            out.write_i32(args.i32_at(0).unwrap_or(0) * args.i32_at(1).unwrap_or(0));
        });
    let stub = context
        .upcalls()
        .stub(&callback_descriptor, handler)
        .expect("stub");
    let descriptor = context
        .descriptor(
            BuiltinTag::Int,
            &[BuiltinTag::Address, BuiltinTag::Int, BuiltinTag::Int],
            CallConvention::C,
        )
        .expect("apply descriptor");
    frame.rewind();
    frame.push_address(stub.0);
    frame.push_i32(6);
    frame.push_i32(7);
    let product = unsafe { context.dispatcher().call_i32(apply, &descriptor, &mut frame) }
        .expect("kw_apply call");
    assert_eq!(product, 42);

    assert!(library.find("kw_absent").expect("lookup").is_none());
    context.shutdown();
}

#[test]
fn dispatch_against_a_clang_built_library() {
    if !clang_available() {
        eprintln!("skipping native call test: clang not available");
        return;
    }
    let dir = tempdir().expect("temp dir");
    let lib_path = compile_shared_library(dir.path(), "kwire_fixture");

    exercise_library(DispatchStrategy::Cif, &lib_path);
    exercise_library(DispatchStrategy::probe(), &lib_path);
}

#[test]
fn missing_library_candidates_resolve_to_none() {
    assert!(SharedLibrary::open(&[
        dynamic_library_filename("kwire_nonexistent_fixture").as_str()
    ])
    .is_none());
}

//! Thin driver around the `vesper` runtime: runs a `postcard`-serialized
//! script image, optionally tracing execution to stderr, or prints the
//! built-in demo program.

use std::process::ExitCode;

use vesper::{
    Runtime, StderrTracer, UnlimitedTracker,
    bytecode::{Op, Reg, ScriptBuilder},
};

fn usage() -> ExitCode {
    eprintln!("usage: vesper [--trace] <image.vsc>");
    eprintln!("       vesper --demo");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let mut trace = false;
    let mut demo = false;
    let mut path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--trace" => trace = true,
            "--demo" => demo = true,
            "--help" | "-h" => return usage(),
            other if path.is_none() => path = Some(other.to_string()),
            _ => return usage(),
        }
    }

    let image = if demo {
        demo_image()
    } else {
        let Some(path) = path else {
            return usage();
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("vesper: cannot read {path}: {err}");
                return ExitCode::FAILURE;
            }
        };
        match postcard::from_bytes(&bytes) {
            Ok(image) => image,
            Err(err) => {
                eprintln!("vesper: {path} is not a script image: {err}");
                return ExitCode::FAILURE;
            }
        }
    };

    let result = if trace {
        let mut rt = Runtime::with_tracker_and_tracer(UnlimitedTracker, StderrTracer::new());
        rt.run_script_image(image)
    } else {
        let mut rt = Runtime::new();
        rt.run_script_image(image)
    };

    match result {
        Ok(value) => {
            println!("{value:?}");
            ExitCode::SUCCESS
        }
        Err(exception) => {
            eprintln!("{exception}");
            ExitCode::FAILURE
        }
    }
}

/// fib(10) assembled by hand; exercises recursion, branches, and calls.
fn demo_image() -> vesper::ScriptImage {
    let mut b = ScriptBuilder::new();
    let fib = b.begin_function(
        vesper::FuncFlags::default(),
        1,
        Some("fib"),
    );
    {
        let two = b.const_number(2.0);
        let one = b.const_number(1.0);
        // if (n < 2) return n
        b.emit(Op::LoadArg { dst: Reg(0), index: 0 });
        b.emit(Op::LoadConst { dst: Reg(1), index: two });
        b.emit(Op::Lt { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
        let recurse = b.emit(Op::JumpFalse { cond: Reg(2), offset: 0 });
        b.emit(Op::ReturnValue { src: Reg(0) });
        b.patch_jump(recurse);
        // fib(n - 1) + fib(n - 2)
        let fib_binding = b.binding("fib");
        b.emit(Op::LoadConst { dst: Reg(1), index: one });
        b.emit(Op::Sub { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
        b.emit(Op::BindingGet { dst: Reg(3), binding: fib_binding });
        b.emit(Op::LoadUndefined { dst: Reg(4) });
        b.emit(Op::PushCall { func: Reg(3), this: Reg(4) });
        b.emit(Op::ArgAdd { src: Reg(2) });
        b.emit(Op::Call { dst: Reg(5) });
        let two_idx = b.const_number(2.0);
        b.emit(Op::LoadConst { dst: Reg(1), index: two_idx });
        b.emit(Op::Sub { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
        b.emit(Op::PushCall { func: Reg(3), this: Reg(4) });
        b.emit(Op::ArgAdd { src: Reg(2) });
        b.emit(Op::Call { dst: Reg(6) });
        b.emit(Op::Add { dst: Reg(0), lhs: Reg(5), rhs: Reg(6) });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();

    // var fib = <fn>; fib(10)
    let group = b.decl_group(vec![vesper::DeclItem {
        name: "fib".to_string(),
        kind: vesper::DeclKind::Function,
        func: Some(fib),
    }]);
    let ten = b.const_number(10.0);
    b.emit(Op::PushLexEnv { decl: Some(group) });
    let fib_binding = b.binding("fib");
    b.emit(Op::BindingGet { dst: Reg(0), binding: fib_binding });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
    b.emit(Op::LoadConst { dst: Reg(2), index: ten });
    b.emit(Op::ArgAdd { src: Reg(2) });
    b.emit(Op::Call { dst: Reg(3) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(3) });
    b.build().expect("demo image validates")
}

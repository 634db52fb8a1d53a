//! Shared helpers for assembling and running script images in tests.

use vesper::{Exception, HostValue, Runtime, ScriptImage};

/// Runs an image in a fresh runtime, panicking on an uncaught error.
pub fn run(image: ScriptImage) -> HostValue {
    let mut rt = Runtime::new();
    rt.run_script_image(image).expect("script completes")
}

/// Runs an image in a fresh runtime, expecting an uncaught error.
pub fn run_err(image: ScriptImage) -> Exception {
    let mut rt = Runtime::new();
    rt.run_script_image(image).expect_err("script throws")
}

#![forbid(unsafe_code)]

mod arguments;
mod logging;

use arguments::Arguments;
use clap::Parser;
use std::process::ExitCode;
use tracing::debug;
use velocity_vm::{ModulePath, Settings, Vm};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> ExitCode {
    let arguments = Arguments::parse();
    if let Err(error) = logging::initialize() {
        eprintln!("velocity: {error}");
        return ExitCode::FAILURE;
    }

    match run(&arguments) {
        Ok(exit_code) => u8::try_from(exit_code.rem_euclid(256))
            .map(ExitCode::from)
            .unwrap_or(ExitCode::FAILURE),
        Err(error) => {
            eprintln!("velocity: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(arguments: &Arguments) -> velocity_vm::Result<i32> {
    debug!("velocity/{VERSION}");

    let mut module_path = match &arguments.module_path {
        Some(module_path) => ModulePath::from(module_path),
        None => ModulePath::default(),
    };
    if let Some(parent) = arguments.module.parent() {
        // The directory of the module itself always participates in resolution.
        module_path.push(parent.to_path_buf());
    }

    let mut settings = Settings::builder()
        .module_path(module_path)
        .stack_depth(arguments.stack_depth)
        .entry_point(arguments.entry_point.clone());
    if let Some(library_path) = &arguments.library_path {
        settings = settings.library_path(library_path.clone());
    }
    let settings = settings.build()?;

    let vm = Vm::new(settings);
    let exit_code = vm.start(&arguments.module, &arguments.args)?;
    print!("{}", vm.output());
    Ok(exit_code)
}

//! calx - evaluate a set of named Rhai formulas concurrently

mod config;
mod definitions;
mod error;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use calx_core::{ERROR_MARKER, Kernel, RhaiEvaluator};
use tracing_subscriber::EnvFilter;

use crate::definitions::{Definition, build_registry};
use crate::error::CliError;

fn print_usage() {
    eprintln!("Usage: calx [OPTIONS] <NAME=CODE>...");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <NAME=CODE>               Define a variable; other definitions are");
    eprintln!("                            referenced by name inside CODE");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>       Kernel config (default: <config dir>/calx/config.toml)");
    eprintln!("  -f, --functions <FILE>    Load custom Rhai functions (can be repeated)");
    eprintln!("  -h, --help                Print help");
    eprintln!();
    eprintln!("Set RUST_LOG (e.g. RUST_LOG=debug) for diagnostics on stderr.");
}

struct Options {
    config: Option<PathBuf>,
    functions: Vec<PathBuf>,
    definitions: Vec<Definition>,
}

/// `Ok(None)` means help was printed.
fn parse_args(args: &[String]) -> Result<Option<Options>, CliError> {
    let mut options = Options {
        config: None,
        functions: Vec::new(),
        definitions: Vec::new(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(None);
            }
            "-c" | "--config" => {
                i += 1;
                let path = args
                    .get(i)
                    .ok_or_else(|| CliError::Usage("--config requires a file path".to_string()))?;
                options.config = Some(PathBuf::from(path));
            }
            "-f" | "--functions" => {
                i += 1;
                let path = args.get(i).ok_or_else(|| {
                    CliError::Usage("--functions requires a file path".to_string())
                })?;
                options.functions.push(PathBuf::from(path));
            }
            arg if arg.starts_with('-') && !arg.contains('=') => {
                return Err(CliError::Usage(format!("Unknown option: {}", arg)));
            }
            arg => options.definitions.push(Definition::parse(arg)?),
        }
        i += 1;
    }

    if options.definitions.is_empty() {
        return Err(CliError::Usage("no definitions given".to_string()));
    }
    Ok(Some(options))
}

fn build_evaluator(functions: &[PathBuf], max_operations: u64) -> Result<RhaiEvaluator, CliError> {
    if functions.is_empty() {
        return Ok(RhaiEvaluator::new().with_max_operations(max_operations));
    }

    let mut script = String::new();
    for path in functions {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::Functions {
            path: path.clone(),
            source,
        })?;
        script.push_str(&content);
        script.push('\n');
    }
    Ok(RhaiEvaluator::with_functions(&script)?.with_max_operations(max_operations))
}

/// Evaluate the definitions and print `name = output` lines.
/// Returns whether every variable succeeded.
fn run(options: Options) -> anyhow::Result<bool> {
    let config = config::load_config(options.config.as_deref())?;
    let evaluator = build_evaluator(&options.functions, config.engine.max_operations)?;
    let registry = build_registry(&options.definitions)?;

    let kernel = Kernel::with_config(Arc::new(evaluator), config.kernel);
    let outputs = kernel.update_registry(&registry).map_err(CliError::from)?;

    for (name, result) in &outputs {
        match result {
            Ok(output) => println!("{} = {}", name, output),
            Err(err) => {
                println!("{} = {}", name, ERROR_MARKER);
                eprintln!("Error: {}", err);
            }
        }
    }
    Ok(outputs.is_success())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args) {
        Ok(Some(options)) => options,
        Ok(None) => return ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            if matches!(err, CliError::Usage(_)) {
                print_usage();
            }
            return ExitCode::FAILURE;
        }
    };

    match run(options) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("calx")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args_collects_options() {
        let options = parse_args(&args(&["-c", "calx.toml", "-f", "a.rhai", "--functions", "b.rhai", "x=1"]))
            .unwrap()
            .unwrap();
        assert_eq!(options.config, Some(PathBuf::from("calx.toml")));
        assert_eq!(options.functions.len(), 2);
        assert_eq!(options.definitions[0].name, "x");
    }

    #[test]
    fn test_parse_args_negative_literal_is_definition() {
        let options = parse_args(&args(&["x=-1"])).unwrap().unwrap();
        assert_eq!(options.definitions[0].code, "-1");
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(matches!(parse_args(&args(&[])), Err(CliError::Usage(_))));
        assert!(matches!(parse_args(&args(&["--bogus"])), Err(CliError::Usage(_))));
        assert!(matches!(parse_args(&args(&["-c"])), Err(CliError::Usage(_))));
    }
}

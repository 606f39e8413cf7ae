use std::env;
use std::fs;
use std::path::Path;
use std::process;

use snafu::ResultExt;

use cmm::error::OpenFileSnafu;
use cmm::{CompileError, CompileResult, config};

fn main() {
  init_logging();

  let args: Vec<String> = env::args().collect();
  if args.len() != 2 {
    let program = args.first().map(String::as_str).unwrap_or("cmm");
    eprintln!("{}", CompileError::InvalidUsage);
    eprintln!("usage: {program} <source-file>");
    process::exit(1);
  }

  if let Err(err) = run(&args[1]) {
    eprintln!("{err}");
    process::exit(1);
  }
}

fn run(source_path: &str) -> CompileResult<()> {
  let source = fs::read_to_string(source_path).context(OpenFileSnafu { path: source_path })?;
  let assembly = cmm::generate_assembly(&source)?;

  let output_path = Path::new(config::OUTPUT_PATH);
  if let Some(dir) = output_path.parent() {
    fs::create_dir_all(dir).context(OpenFileSnafu {
      path: config::OUTPUT_PATH,
    })?;
  }
  fs::write(output_path, assembly).context(OpenFileSnafu {
    path: config::OUTPUT_PATH,
  })?;
  Ok(())
}

fn init_logging() {
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .compact()
    .try_init();
}

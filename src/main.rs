use anyhow::{bail, Context, Result};
use clap::Parser;
use storegen::compiler::{CompileOutput, Compiler, RunReport};
use storegen::config::load_config;
use storegen::errors::ErrorSet;
use storegen::sources::load_documents;
use storegen::staging::write_outputs;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{Command, InputArgs, RootArgs};

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_logging(args.command.input().verbose);

    match args.command {
        Command::Compile(args) => {
            let result = run(&args.input)?;
            if let Ok(output) = &result {
                let published = write_outputs(&args.out, &output.files)
                    .with_context(|| format!("write outputs to {}", args.out.display()))?;
                if !args.input.json {
                    eprintln!("wrote {} files to {}", published.len(), args.out.display());
                }
            }
            finish(&args.input, &result)
        }
        Command::Check(args) => {
            let result = run(&args.input)?;
            if result.is_ok() && !args.input.json {
                eprintln!("ok");
            }
            finish(&args.input, &result)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "storegen=debug" } else { "storegen=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load config and documents, then compile. The outer error covers I/O and
/// config problems; the inner result is the compilation outcome.
fn run(input: &InputArgs) -> Result<Result<CompileOutput, ErrorSet>> {
    let config = load_config(&input.config)?;
    let batch = load_documents(&input.documents)
        .with_context(|| format!("load documents from {}", input.documents.display()))?;
    Ok(Compiler::new(&config).compile_batch(batch))
}

fn finish(input: &InputArgs, result: &Result<CompileOutput, ErrorSet>) -> Result<()> {
    if input.json {
        let report = RunReport::from_result(result);
        let text = serde_json::to_string_pretty(&report).context("serialize run report")?;
        println!("{text}");
    }
    if let Err(errors) = result {
        if !input.json {
            eprintln!("{errors}");
        }
        bail!("compilation failed with {} error(s)", errors.len());
    }
    Ok(())
}

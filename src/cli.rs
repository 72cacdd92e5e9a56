//! CLI argument parsing for the store compiler.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "storegen",
    version,
    about = "Compile GraphQL documents into cache artifacts and store modules",
    after_help = "Commands:\n  compile --config <file> --documents <dir> --out <dir>  Compile and publish outputs\n  check --config <file> --documents <dir>                Compile without writing\n\nExamples:\n  storegen compile --config storegen.json --documents src --out generated\n  storegen check --config storegen.json --documents src --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Compile(CompileArgs),
    Check(CheckArgs),
}

/// Inputs shared by every command.
#[derive(Args, Debug)]
pub struct InputArgs {
    /// Config file (storegen.json)
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    /// Directory scanned recursively for .graphql and .gql documents
    #[arg(long, value_name = "DIR")]
    pub documents: PathBuf,

    /// Emit the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Log pass and stage timings to stderr
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Compile documents and publish artifacts and stores")]
pub struct CompileArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output root; artifacts and stores are written beneath it
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,
}

#[derive(Parser, Debug)]
#[command(about = "Validate and generate without writing any output")]
pub struct CheckArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

impl Command {
    pub fn input(&self) -> &InputArgs {
        match self {
            Command::Compile(args) => &args.input,
            Command::Check(args) => &args.input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        RootArgs::command().debug_assert();
    }

    #[test]
    fn compile_requires_out() {
        let parsed = RootArgs::try_parse_from([
            "storegen",
            "compile",
            "--config",
            "storegen.json",
            "--documents",
            "src",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn check_parses_shared_flags() {
        let parsed = RootArgs::try_parse_from([
            "storegen",
            "check",
            "--config",
            "storegen.json",
            "--documents",
            "src",
            "--json",
        ])
        .expect("parse");
        let input = parsed.command.input();
        assert!(input.json);
        assert!(!input.verbose);
        assert_eq!(input.documents, PathBuf::from("src"));
    }
}

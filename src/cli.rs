//! Command line interface of `hookc`

use crate::compiler::CompileOptions;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "hookc")]
#[command(version)]
#[command(about = "Compile hookscript sources into an eBPF object source and its libbpf loader")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compile a source file into <base>.ebpf.c, <base>.c and a Makefile
    Compile(CompileArgs),
}

#[derive(Debug, clap::Args)]
pub struct CompileArgs {
    /// Hookscript source file
    pub input: PathBuf,

    /// Output directory (defaults to the input's base name)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Log every pipeline stage, including JSON dumps of the plan and IR
    #[arg(short, long)]
    pub verbose: bool,

    /// Skip writing the Makefile
    #[arg(long)]
    pub no_makefile: bool,

    /// Directory holding the <kind>.hs builtin header sources
    #[arg(long, value_name = "PATH", env = "HOOKSCRIPT_BUILTIN_PATH", default_value = "builtin")]
    pub builtin_path: PathBuf,
}

impl CompileArgs {
    pub fn options(&self) -> CompileOptions {
        CompileOptions {
            output_dir: self.output.clone(),
            verbose: self.verbose,
            makefile: !self.no_makefile,
            builtin_path: self.builtin_path.clone(),
            ..CompileOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("hookc").chain(args.iter().copied()))
    }

    #[test]
    fn test_compile_flags() {
        let cli = parse(&["compile", "filter.hs", "-o", "out", "-v", "--no-makefile"]).unwrap();
        let Commands::Compile(args) = cli.command;
        let options = args.options();
        assert_eq!(options.output_dir, Some(PathBuf::from("out")));
        assert!(options.verbose);
        assert!(!options.makefile);
        assert_eq!(options.opt_level, 1);
    }

    #[test]
    fn test_missing_input_and_unknown_flags_fail() {
        assert!(parse(&["compile"]).is_err());
        assert!(parse(&["compile", "filter.hs", "--bogus"]).is_err());
    }
}

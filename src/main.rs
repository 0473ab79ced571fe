use anyhow::{Context, Result};
use clap::Parser;
use hookscript::cli::{Cli, Commands};
use hookscript::compiler::Compiler;
use hookscript::logging::initialize_logging;
use tracing::warn;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile(args) => {
            initialize_logging(args.verbose);
            let compiler = Compiler::new(args.options());
            let result = compiler
                .compile_file(&args.input)
                .with_context(|| format!("failed to compile {}", args.input.display()))?;

            for warning in &result.warnings {
                warn!("{}", warning);
            }
            println!("{}", result.kernel_path.display());
            println!("{}", result.userspace_path.display());
            for header in &result.headers {
                println!("{}", header.display());
            }
            if let Some(makefile) = &result.makefile {
                println!("{}", makefile.display());
            }
        }
    }

    Ok(())
}

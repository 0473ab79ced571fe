//! # Hookscript Compiler - S-expressions to cooperating eBPF programs
//!
//! Compiles one source unit describing several kernel-hook programs into two
//! ABI-coupled C files: the kernel object source and the libbpf coordinator
//! that loads, configures and polls it.
//!
//! ## Architecture
//!
//! ```text
//! Source → AST → Type Check → Analysis → IR → Plan → Strategies → Optimize
//!                                                                   ├→ B.ebpf.c
//!                                                                   └→ B.c
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use hookscript::compiler::{Compiler, CompileOptions};
//!
//! let compiler = Compiler::new(CompileOptions::default());
//! let result = compiler.compile_file(Path::new("filter.hs"))?;
//! println!("wrote {}", result.kernel_path.display());
//! ```

pub mod abi;
pub mod analysis;
pub mod builtins;
pub mod debug;
pub mod ebpf_codegen;
pub mod ir;
pub mod makefile;
pub mod optimizer;
pub mod output;
pub mod resource_plan;
pub mod strategy;
pub mod types;
pub mod userspace_codegen;

pub use abi::AbiContract;
pub use analysis::{AnalysisResult, MultiProgramAnalyzer};
pub use ir::{IrGenerator, OptimizedIr};
pub use optimizer::Optimizer;
pub use resource_plan::{Ownership, ResourcePlan, ResourcePlanner};
pub use strategy::{Strategy, StrategyGenerator};
pub use types::{CheckedUnit, TypeChecker};

use crate::parser::ConfigDecl;
use crate::{Error, Result, SExprParser as Parser, SExprScanner as Scanner};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Pipeline stage, carried by every fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Lexing and parsing
    Parse,
    /// Symbol table and type checking
    TypeCheck,
    /// Multi-program analysis and conflict detection
    Analysis,
    /// Lowering to IR
    Lowering,
    /// Resource planning
    Planning,
    /// Strategy generation
    Strategy,
    /// IR optimization
    Optimization,
    /// C generation
    CodeGeneration,
    /// Builtin headers
    BuiltinHeaders,
    /// Writing artifacts
    Output,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Parse => "parsing",
            Phase::TypeCheck => "type checking",
            Phase::Analysis => "multi-program analysis",
            Phase::Lowering => "IR lowering",
            Phase::Planning => "resource planning",
            Phase::Strategy => "strategy generation",
            Phase::Optimization => "IR optimization",
            Phase::CodeGeneration => "code generation",
            Phase::BuiltinHeaders => "builtin header compilation",
            Phase::Output => "artifact output",
        })
    }
}

/// Compilation options
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Output directory (`None`: a directory named after the input)
    pub output_dir: Option<PathBuf>,
    /// Log intermediate artifacts as JSON
    pub verbose: bool,
    /// Emit a Makefile next to the sources
    pub makefile: bool,
    /// Directory holding `<kind>.hs` builtin sources
    pub builtin_path: PathBuf,
    /// Optimization level (0 disables folding)
    pub opt_level: u8,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            output_dir: None,
            verbose: false,
            makefile: true,
            builtin_path: PathBuf::from("builtin"),
            opt_level: 1,
        }
    }
}

/// Every intermediate result of one run, before anything is written
#[derive(Debug)]
pub struct Pipeline {
    /// Checked front-end output
    pub unit: CheckedUnit,
    /// Config declarations in source order
    pub configs: Vec<ConfigDecl>,
    /// Multi-program analysis
    pub analysis: AnalysisResult,
    /// Resource plan
    pub plan: ResourcePlan,
    /// Cross-program directives
    pub strategies: Vec<Strategy>,
    /// Optimized IR
    pub ir: OptimizedIr,
    /// Shared declarations and fingerprint
    pub contract: AbiContract,
}

impl Pipeline {
    /// Render the kernel-side source
    ///
    /// Units with configs resolve their schemas from the declarations, the
    /// rest render straight from the plan. Both paths yield the same
    /// resource section.
    pub fn kernel_source(&self) -> Result<String> {
        let aliases = &self.unit.aliases;
        if self.configs.is_empty() {
            ebpf_codegen::generate_from_plan(&self.ir, &self.analysis, &self.plan, &self.strategies, aliases)
        } else {
            ebpf_codegen::generate(&self.ir, &self.configs, aliases)
        }
        .map_err(|e| e.in_phase(Phase::CodeGeneration))
    }

    /// Render the userspace coordinator source
    pub fn userspace_source(&self, object: &str) -> Result<String> {
        userspace_codegen::render(&self.ir, &self.configs, &self.unit.aliases, object)
            .map_err(|e| e.in_phase(Phase::CodeGeneration))
    }
}

/// Compilation result with metadata
#[derive(Debug)]
pub struct CompileResult {
    /// Directory every artifact was written to
    pub output_dir: PathBuf,
    /// `B.ebpf.c`
    pub kernel_path: PathBuf,
    /// `B.c`
    pub userspace_path: PathBuf,
    /// Builtin headers written
    pub headers: Vec<PathBuf>,
    /// Makefile, unless disabled
    pub makefile: Option<PathBuf>,
    /// ABI fingerprint embedded in both sources
    pub fingerprint: String,
    /// Warnings generated during compilation
    pub warnings: Vec<String>,
}

/// Hookscript compiler
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a new compiler with options
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Options in effect
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Run every in-memory stage on `source`
    pub fn run(&self, source: &str) -> Result<Pipeline> {
        let tagged = |phase: Phase| move |e: Error| e.in_phase(phase);

        // Phase 1: Parse
        let tokens = Scanner::new(source).scan_tokens().map_err(tagged(Phase::Parse))?;
        let program = Parser::new(tokens).parse().map_err(tagged(Phase::Parse))?;
        debug!(declarations = program.declarations.len(), "parsed");

        // Phase 2: Type check
        let unit = TypeChecker::new().check(program).map_err(tagged(Phase::TypeCheck))?;
        let configs: Vec<ConfigDecl> = unit.configs().cloned().collect();

        // Phase 3: Multi-program analysis
        let analysis = MultiProgramAnalyzer::new(&unit).analyze();
        analysis.ensure_conflict_free().map_err(tagged(Phase::Analysis))?;
        debug!(programs = analysis.programs.len(), "analyzed");

        // Phase 4: Lower
        let lowered = IrGenerator::new(&unit).lower().map_err(tagged(Phase::Lowering))?;

        // Phase 5: Plan
        let plan = ResourcePlanner::new()
            .plan(&lowered, &analysis)
            .map_err(tagged(Phase::Planning))?;

        // Phase 6: Strategies
        let strategies = StrategyGenerator::new().generate(&analysis);
        debug!(directives = strategies.len(), "generated strategies");

        // Phase 7: Optimize
        let ir = Optimizer::new(self.options.opt_level)
            .optimize(lowered, &analysis, &plan, &strategies)
            .map_err(tagged(Phase::Optimization))?;

        // Every emitted file-scope symbol must be unique
        let contract = AbiContract::from_ir(&ir, &unit.aliases).map_err(tagged(Phase::Planning))?;

        if self.options.verbose {
            debug::dump_pipeline(&analysis, &plan, &strategies, &ir)
                .map_err(tagged(Phase::Optimization))?;
        }

        Ok(Pipeline {
            unit,
            configs,
            analysis,
            plan,
            strategies,
            ir,
            contract,
        })
    }

    /// Compile a source file and write every artifact
    pub fn compile_file(&self, input: &Path) -> Result<CompileResult> {
        let base = base_name(input).map_err(|e| e.in_phase(Phase::Parse))?;
        let source = std::fs::read_to_string(input)
            .map_err(|e| Error::io(input, e).in_phase(Phase::Parse))?;
        self.compile_source(&source, &base)
    }

    /// Compile `source` under base name `base` and write every artifact
    ///
    /// Both C sources are rendered before anything touches the disk. If the
    /// second write fails, the first file is removed again.
    pub fn compile_source(&self, source: &str, base: &str) -> Result<CompileResult> {
        let pipeline = self.run(source)?;
        let out_dir = self
            .options
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(base));

        // Phase 8: Generate
        let kernel = pipeline.kernel_source()?;
        let userspace = pipeline.userspace_source(&format!("{}.ebpf.o", base))?;

        output::ensure_dir(&out_dir).map_err(|e| e.in_phase(Phase::Output))?;
        let kernel_path = output::write_atomic(&out_dir.join(format!("{}.ebpf.c", base)), &kernel)
            .map_err(|e| e.in_phase(Phase::Output))?;
        let userspace_path = userspace_codegen::write(&out_dir, base, &userspace).map_err(|e| {
            output::discard(&kernel_path);
            e.in_phase(Phase::Output)
        })?;

        // Phase 9: Builtin headers (best effort)
        let reserved: BTreeSet<&str> = pipeline
            .contract
            .symbols()
            .chain(pipeline.unit.symbols.constants.keys().map(String::as_str))
            .collect();
        let report = builtins::compile_all(
            &pipeline.ir.kinds(),
            &self.options.builtin_path,
            &out_dir,
            &reserved,
        );
        let mut warnings = pipeline.unit.warnings.clone();
        warnings.extend(
            report
                .warnings
                .into_iter()
                .map(|w| w.in_phase(Phase::BuiltinHeaders).to_string()),
        );

        // Phase 10: Makefile
        let makefile = if self.options.makefile {
            Some(makefile::generate(&out_dir, base).map_err(|e| e.in_phase(Phase::Output))?)
        } else {
            None
        };

        let fingerprint = pipeline.contract.fingerprint().to_string();

        info!(
            dir = %out_dir.display(),
            programs = pipeline.ir.programs.len(),
            warnings = warnings.len(),
            "compilation finished"
        );

        Ok(CompileResult {
            output_dir: out_dir,
            kernel_path,
            userspace_path,
            headers: report.written,
            makefile,
            fingerprint,
            warnings,
        })
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

/// Input file name without its extension
pub fn base_name(input: &Path) -> Result<String> {
    input
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::compiler(format!("cannot derive a base name from {}", input.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Analysis.to_string(), "multi-program analysis");
        assert_eq!(Phase::CodeGeneration.to_string(), "code generation");
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Path::new("dir/filter.hs")).unwrap(), "filter");
        assert_eq!(base_name(Path::new("plain")).unwrap(), "plain");
        assert!(base_name(Path::new("/")).is_err());
    }

    #[test]
    fn test_errors_carry_their_phase() {
        let compiler = Compiler::default();
        let err = compiler.run("(defprogram p :kind xdp").unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Parse));

        let err = compiler
            .run("(defprogram p :kind xdp :attach \"eth0\" (defn main [] (return TC_ACT_OK)))")
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::TypeCheck));
    }

    #[test]
    fn test_kernel_paths_agree() {
        let source = r#"
(defconfig Limits (max u32 10))
(defmap seen :type hash :key u32 :value u64 :max-entries 128)
(defprogram a :kind xdp :attach "eth0"
  (defn main []
    (map-update seen (pid) (. Limits max))
    (return XDP_PASS)))
"#;
        let pipeline = Compiler::default().run(source).unwrap();
        let from_decls = pipeline.kernel_source().unwrap();
        let from_plan = ebpf_codegen::generate_from_plan(
            &pipeline.ir,
            &pipeline.analysis,
            &pipeline.plan,
            &pipeline.strategies,
            &pipeline.unit.aliases,
        )
        .unwrap();
        assert_eq!(from_decls, from_plan);
    }
}

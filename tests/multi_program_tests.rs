//! Cross-program behavior of the whole pipeline: conflicts, sharing,
//! canonical naming, alias fidelity and dead-resource elimination.

use hookscript::compiler::strategy::parse_strategies;
use hookscript::compiler::{
    ebpf_codegen, CompileOptions, Compiler, IrGenerator, MultiProgramAnalyzer, Optimizer,
    Ownership, Phase, ResourcePlanner, StrategyGenerator, TypeChecker,
};
use hookscript::{Error, SExprParser, SExprScanner};

fn run(source: &str) -> hookscript::Result<hookscript::compiler::Pipeline> {
    Compiler::default().run(source)
}

#[test]
fn test_same_point_xdp_programs_conflict() {
    let source = r#"
(defprogram first :kind xdp :attach "eth0"
  (defn main [] (return XDP_PASS)))
(defprogram second :kind xdp :attach "eth0"
  (defn main [] (return XDP_DROP)))
"#;
    let err = run(source).unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Analysis));
    match err.root() {
        Error::ProgramConflict(conflicts) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].programs, vec!["first", "second"]);
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.starts_with("multi-program analysis failed"));
    assert!(message.contains("first") && message.contains("second"));
}

#[test]
fn test_unrelated_programs_compile_side_by_side() {
    let source = r#"
(defprogram ingress_guard :kind xdp :attach "eth0"
  (defn main [] (return XDP_PASS)))
(defprogram egress_guard :kind xdp :attach "eth1"
  (defn main [] (return XDP_PASS)))
(defprogram opens :kind kprobe :attach "do_sys_openat2"
  (defn main [] (return 0)))
"#;
    let pipeline = run(source).unwrap();
    assert!(pipeline.analysis.conflicts.is_empty());
    assert!(pipeline.ir.dispatchers.is_empty());
    assert_eq!(pipeline.ir.entry_points().len(), 3);
}

#[test]
fn test_prioritized_programs_chain_in_priority_order() {
    let source = r#"
(defprogram late :kind xdp :attach "eth0" :priority 20
  (defn main [] (return XDP_PASS)))
(defprogram early :kind xdp :attach "eth0" :priority 10
  (defn main [] (return XDP_PASS)))
"#;
    let pipeline = run(source).unwrap();
    assert_eq!(pipeline.ir.dispatchers.len(), 1);
    assert_eq!(pipeline.ir.dispatchers[0].programs, vec!["early", "late"]);

    let kernel = pipeline.kernel_source().unwrap();
    let early = kernel.find("hs_rc = hs_run_early(ctx);").unwrap();
    let late = kernel.find("return hs_run_late(ctx);").unwrap();
    assert!(early < late);
}

#[test]
fn test_chains_on_similar_interface_names_get_their_own_dispatchers() {
    let source = r#"
(defprogram a1 :kind xdp :attach "veth-a" :priority 1 (defn main [] (return XDP_PASS)))
(defprogram a2 :kind xdp :attach "veth-a" :priority 2 (defn main [] (return XDP_PASS)))
(defprogram b1 :kind xdp :attach "veth_a" :priority 1 (defn main [] (return XDP_PASS)))
(defprogram b2 :kind xdp :attach "veth_a" :priority 2 (defn main [] (return XDP_PASS)))
"#;
    let pipeline = run(source).unwrap();
    let symbols: Vec<&str> = pipeline.ir.dispatchers.iter().map(|d| d.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["hs_dispatch_xdp_veth_2da", "hs_dispatch_xdp_veth_5fa"]);

    let kernel = pipeline.kernel_source().unwrap();
    for symbol in symbols {
        let definition = format!("int {}(struct xdp_md *ctx)", symbol);
        assert_eq!(kernel.matches(&definition).count(), 1);
    }
}

#[test]
fn test_shared_and_local_resources_get_canonical_names() {
    let source = r#"
(defmap flows :type lru-hash :key u32 :value u64 :max-entries 1024)
(defmap scratch :type percpu-array :key u32 :value u64 :max-entries 1)
(defprogram rx :kind xdp :attach "eth0"
  (defn main []
    (map-update flows (ifindex) (packet-len))
    (map-update scratch 0 1)
    (return XDP_PASS)))
(defprogram tx :kind tc :attach "eth0"
  (defn main []
    (map-delete flows (ifindex))
    (return TC_ACT_OK)))
"#;
    let pipeline = run(source).unwrap();
    let flows = pipeline.plan.entry("flows").unwrap();
    assert_eq!(flows.ownership, Ownership::Shared);
    assert_eq!(flows.canonical, "flows");
    let scratch = pipeline.plan.entry("scratch").unwrap();
    assert_eq!(scratch.ownership, Ownership::Program("rx".to_string()));
    assert_eq!(scratch.canonical, "rx__scratch");

    let kernel = pipeline.kernel_source().unwrap();
    assert!(kernel.contains("/* resource flows: shared by rx, tx */"));
    assert!(kernel.contains("} rx__scratch SEC(\".maps\");"));
    assert!(!kernel.contains("} scratch SEC"));
}

#[test]
fn test_aliases_survive_into_both_files() {
    let source = r#"
(deftype Counter u64)
(defprogram counter :kind xdp :attach "eth0"
  (defmap stats :type array :key u32 :value Counter :max-entries 1)
  (defn main []
    (let (pkt_count Counter) (map-lookup stats 0))
    (map-update stats 0 (+ pkt_count 1))
    (return XDP_PASS)))
"#;
    let pipeline = run(source).unwrap();
    let kernel = pipeline.kernel_source().unwrap();
    let userspace = pipeline.userspace_source("counter.ebpf.o").unwrap();

    assert!(kernel.contains("Counter pkt_count = "));
    assert!(kernel.contains("typedef __u64 Counter;"));
    assert!(userspace.contains("typedef __u64 Counter;"));
}

#[test]
fn test_unreferenced_resources_and_helpers_are_dropped() {
    let source = r#"
(defconfig Unused (level u32 3))
(defmap orphan :type hash :key u32 :value u32 :max-entries 16)
(defmap used :type array :key u32 :value u64 :max-entries 1)
(defn never_called [] u32 (return 7))
(defprogram p :kind xdp :attach "eth0"
  (defn main [] (map-update used 0 1) (return XDP_PASS)))
"#;
    let pipeline = run(source).unwrap();
    let names: Vec<&str> = pipeline.ir.resources.iter().map(|r| r.canonical.as_str()).collect();
    assert_eq!(names, vec!["p__used"]);
    assert!(pipeline.ir.functions.is_empty());

    let kernel = pipeline.kernel_source().unwrap();
    let userspace = pipeline.userspace_source("x.ebpf.o").unwrap();
    for text in [&kernel, &userspace] {
        assert!(!text.contains("orphan"));
        assert!(!text.contains("Unused"));
        assert!(!text.contains("never_called"));
    }
}

#[test]
fn test_unknown_directives_are_ignored() {
    let source = r#"
(defmap hits :type hash :key u32 :value u64 :max-entries 8)
(defprogram p :kind xdp :attach "eth0"
  (defn main [] (map-update hits 1 1) (return XDP_PASS)))
"#;
    let tokens = SExprScanner::new(source).scan_tokens().unwrap();
    let program = SExprParser::new(tokens).parse().unwrap();
    let unit = TypeChecker::new().check(program).unwrap();
    let analysis = MultiProgramAnalyzer::new(&unit).analyze();
    let lowered = IrGenerator::new(&unit).lower().unwrap();
    let plan = ResourcePlanner::new().plan(&lowered, &analysis).unwrap();

    let mut strategies = StrategyGenerator::new().generate(&analysis);
    strategies.extend(
        parse_strategies(r#"[{"directive": "inline_everything", "budget": 3}]"#).unwrap(),
    );

    let baseline = Optimizer::default()
        .optimize(lowered.clone(), &analysis, &plan, &StrategyGenerator::new().generate(&analysis))
        .unwrap();
    let with_unknown = Optimizer::default()
        .optimize(lowered, &analysis, &plan, &strategies)
        .unwrap();
    assert_eq!(baseline.programs, with_unknown.programs);
    assert_eq!(baseline.resources, with_unknown.resources);

    let a = ebpf_codegen::generate_from_plan(&baseline, &analysis, &plan, &strategies, &unit.aliases).unwrap();
    let b = ebpf_codegen::generate_from_plan(&with_unknown, &analysis, &plan, &strategies, &unit.aliases).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_optimization_level_zero_keeps_constant_expressions() {
    let source = r#"
(defmap out :type array :key u32 :value u64 :max-entries 1)
(defprogram p :kind xdp :attach "eth0"
  (defn main [] (map-update out 0 (* 2 3)) (return XDP_PASS)))
"#;
    let folded = run(source).unwrap().kernel_source().unwrap();
    let options = CompileOptions {
        opt_level: 0,
        ..CompileOptions::default()
    };
    let unfolded = Compiler::new(options).run(source).unwrap().kernel_source().unwrap();
    assert!(!folded.contains("(2 * 3)"));
    assert!(unfolded.contains("(2 * 3)"));
}

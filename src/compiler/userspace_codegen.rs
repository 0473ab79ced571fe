//! # Userspace Coordinator Generator
//!
//! Renders `B.c`, the libbpf loader that opens and loads the kernel object,
//! injects config defaults, attaches every entry point, polls ring buffers
//! and detaches everything on SIGINT/SIGTERM. The shared declarations come
//! from an [`AbiContract`] this generator builds on its own, so the two C
//! files agree without either reading the other.

use super::abi::{type_name, AbiContract, AbiMap};
use super::ebpf_codegen::int_literal;
use super::ir::{EntryPoint, IrType, OptimizedIr, PrimitiveType};
use super::output::write_atomic;
use super::types::AliasTables;
use crate::parser::{ConfigDecl, HookKind, MapType, TcDirection};
use crate::Result;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Render `B.c` and write it to `<out_dir>/<base>.c`
pub fn generate(
    ir: &OptimizedIr,
    configs: &[ConfigDecl],
    aliases: &AliasTables,
    out_dir: &Path,
    base: &str,
) -> Result<PathBuf> {
    let source = render(ir, configs, aliases, &format!("{}.ebpf.o", base))?;
    write(out_dir, base, &source)
}

/// Write an already rendered coordinator to `<out_dir>/<base>.c`
pub fn write(out_dir: &Path, base: &str, source: &str) -> Result<PathBuf> {
    write_atomic(&out_dir.join(format!("{}.c", base)), source)
}

/// Render the coordinator source for the given kernel object file name
pub fn render(
    ir: &OptimizedIr,
    configs: &[ConfigDecl],
    aliases: &AliasTables,
    object: &str,
) -> Result<String> {
    let contract = AbiContract::from_config_decls(ir, configs, aliases)?;
    let entry_points = ir.entry_points();
    let ringbufs: Vec<&AbiMap> = contract
        .maps()
        .filter(|m| m.map_type == MapType::Ringbuf)
        .collect();

    let mut out = String::new();
    out.push_str("/* Generated by hookc. Do not edit. */\n");
    out.push_str(&contract.fingerprint_line());
    out.push_str("\n\n");

    if !contract.resources.is_empty() {
        out.push_str("/*\n * Resources:\n");
        for resource in &contract.resources {
            let _ = writeln!(out, " *   {}: {}", resource.canonical(), resource.ownership_note());
        }
        out.push_str(" */\n\n");
    }

    for header in [
        "errno.h", "net/if.h", "signal.h", "stdio.h", "string.h", "unistd.h",
        "linux/types.h", "bpf/bpf.h", "bpf/libbpf.h",
    ] {
        let _ = writeln!(out, "#include <{}>", header);
    }
    out.push('\n');

    out.push_str(&contract.render_shared());
    out.push('\n');

    out.push_str("static volatile sig_atomic_t hs_exiting;\n\n");
    out.push_str("static void hs_on_signal(int sig)\n{\n    (void)sig;\n    hs_exiting = 1;\n}\n\n");

    for rb in &ringbufs {
        out.push_str(&event_printer(rb));
    }

    emit_main(&mut out, &contract, &entry_points, &ringbufs, object);

    debug!(
        entry_points = entry_points.len(),
        ring_buffers = ringbufs.len(),
        "generated userspace source"
    );
    Ok(out)
}

fn emit_main(
    out: &mut String,
    contract: &AbiContract,
    entry_points: &[EntryPoint],
    ringbufs: &[&AbiMap],
    object: &str,
) {
    out.push_str("int main(int argc, char **argv)\n{\n");
    let _ = writeln!(out, "    const char *hs_path = argc > 1 ? argv[1] : \"{}\";", object);
    out.push_str("    struct bpf_object *hs_obj;\n");
    out.push_str("    struct bpf_program *hs_prog;\n");
    out.push_str("    struct bpf_map *hs_map;\n");
    if !ringbufs.is_empty() {
        out.push_str("    struct ring_buffer *hs_rb = NULL;\n");
    }
    out.push_str("    int hs_err = 0;\n");
    for (i, ep) in entry_points.iter().enumerate() {
        match ep.kind {
            HookKind::Xdp => {
                let _ = writeln!(out, "    int hs_ifindex_{} = 0;", i);
            }
            HookKind::Tc => {
                let point = match ep.direction.unwrap_or(TcDirection::Ingress) {
                    TcDirection::Ingress => "BPF_TC_INGRESS",
                    TcDirection::Egress => "BPF_TC_EGRESS",
                };
                let _ = writeln!(
                    out,
                    "    DECLARE_LIBBPF_OPTS(bpf_tc_hook, hs_tc_hook_{}, .attach_point = {});",
                    i, point
                );
                let _ = writeln!(
                    out,
                    "    DECLARE_LIBBPF_OPTS(bpf_tc_opts, hs_tc_opts_{}, .handle = 1, .priority = 1);",
                    i
                );
                let _ = writeln!(out, "    int hs_tc_attached_{} = 0;", i);
            }
            HookKind::Kprobe => {
                let _ = writeln!(out, "    struct bpf_link *hs_link_{} = NULL;", i);
            }
        }
    }
    out.push('\n');

    out.push_str("    signal(SIGINT, hs_on_signal);\n");
    out.push_str("    signal(SIGTERM, hs_on_signal);\n\n");

    out.push_str("    hs_obj = bpf_object__open_file(hs_path, NULL);\n");
    out.push_str("    if (!hs_obj) {\n");
    out.push_str("        fprintf(stderr, \"failed to open %s: %s\\n\", hs_path, strerror(errno));\n");
    out.push_str("        return 1;\n    }\n");
    out.push_str("    if (bpf_object__load(hs_obj)) {\n");
    out.push_str("        fprintf(stderr, \"failed to load %s\\n\", hs_path);\n");
    out.push_str(FAIL);
    out.push_str("    }\n\n");

    for config in contract.configs() {
        let _ = writeln!(
            out,
            "    /* config {}: {} */",
            config.canonical,
            super::abi::ownership_note(&config.ownership, &config.permitted)
        );
        out.push_str("    {\n");
        let _ = writeln!(out, "        struct {} hs_cfg;", config.canonical);
        out.push_str("        __u32 hs_zero = 0;\n\n");
        out.push_str("        memset(&hs_cfg, 0, sizeof(hs_cfg));\n");
        for (field, default) in config.fields.iter().zip(&config.defaults) {
            if let Some(value) = default {
                let _ = writeln!(out, "        hs_cfg.{} = {};", field.name, int_literal(*value));
            }
        }
        let _ = writeln!(
            out,
            "        hs_map = bpf_object__find_map_by_name(hs_obj, \"{}\");",
            config.canonical
        );
        out.push_str("        if (!hs_map || bpf_map__update_elem(hs_map, &hs_zero, sizeof(hs_zero), &hs_cfg, sizeof(hs_cfg), BPF_ANY)) {\n");
        let _ = writeln!(
            out,
            "            fprintf(stderr, \"failed to initialize config {}\\n\");",
            config.canonical
        );
        out.push_str("            hs_err = 1;\n            goto cleanup;\n        }\n");
        out.push_str("    }\n\n");
    }

    for (i, ep) in entry_points.iter().enumerate() {
        emit_attach(out, i, ep);
    }

    for (i, rb) in ringbufs.iter().enumerate() {
        let _ = writeln!(
            out,
            "    /* ring buffer {}: {} */",
            rb.canonical,
            super::abi::ownership_note(&rb.ownership, &rb.permitted)
        );
        let _ = writeln!(
            out,
            "    hs_map = bpf_object__find_map_by_name(hs_obj, \"{}\");",
            rb.canonical
        );
        out.push_str("    if (!hs_map) {\n");
        let _ = writeln!(out, "        fprintf(stderr, \"missing ring buffer {}\\n\");", rb.canonical);
        out.push_str(FAIL);
        out.push_str("    }\n");
        if i == 0 {
            let _ = writeln!(
                out,
                "    hs_rb = ring_buffer__new(bpf_map__fd(hs_map), hs_print_{}, NULL, NULL);",
                rb.canonical
            );
            out.push_str("    if (!hs_rb) {\n");
        } else {
            let _ = writeln!(
                out,
                "    if (ring_buffer__add(hs_rb, bpf_map__fd(hs_map), hs_print_{}, NULL)) {{",
                rb.canonical
            );
        }
        let _ = writeln!(out, "        fprintf(stderr, \"failed to poll ring buffer {}\\n\");", rb.canonical);
        out.push_str(FAIL);
        out.push_str("    }\n\n");
    }

    let _ = writeln!(
        out,
        "    printf(\"%d entry point(s) attached, Ctrl-C to detach\\n\", {});",
        entry_points.len()
    );
    out.push_str("    while (!hs_exiting) {\n");
    if ringbufs.is_empty() {
        out.push_str("        sleep(1);\n");
    } else {
        out.push_str("        int hs_n = ring_buffer__poll(hs_rb, 100);\n\n");
        out.push_str("        if (hs_n < 0 && hs_n != -EINTR) {\n");
        out.push_str("            fprintf(stderr, \"ring buffer poll failed: %d\\n\", hs_n);\n");
        out.push_str("            hs_err = 1;\n            break;\n        }\n");
    }
    out.push_str("    }\n\n");

    out.push_str("cleanup:\n");
    if !ringbufs.is_empty() {
        out.push_str("    ring_buffer__free(hs_rb);\n");
    }
    for (i, ep) in entry_points.iter().enumerate().rev() {
        match ep.kind {
            HookKind::Xdp => {
                let _ = writeln!(out, "    if (hs_ifindex_{})", i);
                let _ = writeln!(out, "        bpf_xdp_detach(hs_ifindex_{}, 0, NULL);", i);
            }
            HookKind::Tc => {
                let _ = writeln!(out, "    if (hs_tc_attached_{}) {{", i);
                let _ = writeln!(
                    out,
                    "        hs_tc_opts_{i}.flags = hs_tc_opts_{i}.prog_fd = hs_tc_opts_{i}.prog_id = 0;",
                    i = i
                );
                let _ = writeln!(out, "        bpf_tc_detach(&hs_tc_hook_{i}, &hs_tc_opts_{i});", i = i);
                out.push_str("    }\n");
            }
            HookKind::Kprobe => {
                let _ = writeln!(out, "    bpf_link__destroy(hs_link_{});", i);
            }
        }
    }
    out.push_str("    bpf_object__close(hs_obj);\n");
    out.push_str("    return hs_err;\n}\n");
}

const FAIL: &str = "        hs_err = 1;\n        goto cleanup;\n";

fn emit_attach(out: &mut String, i: usize, ep: &EntryPoint) {
    let _ = writeln!(
        out,
        "    /* {} {} on {} ({}) */",
        ep.kind,
        ep.symbol,
        ep.attach,
        ep.programs.join(", ")
    );
    let _ = writeln!(
        out,
        "    hs_prog = bpf_object__find_program_by_name(hs_obj, \"{}\");",
        ep.symbol
    );
    match ep.kind {
        HookKind::Xdp => {
            let _ = writeln!(out, "    hs_ifindex_{} = if_nametoindex(\"{}\");", i, ep.attach);
            let _ = writeln!(out, "    if (!hs_prog || !hs_ifindex_{}) {{", i);
            let _ = writeln!(out, "        fprintf(stderr, \"cannot resolve {} on {}\\n\");", ep.symbol, ep.attach);
            out.push_str(FAIL);
            out.push_str("    }\n");
            let _ = writeln!(
                out,
                "    if (bpf_xdp_attach(hs_ifindex_{}, bpf_program__fd(hs_prog), 0, NULL)) {{",
                i
            );
            let _ = writeln!(out, "        fprintf(stderr, \"failed to attach {} to {}\\n\");", ep.symbol, ep.attach);
            let _ = writeln!(out, "        hs_ifindex_{} = 0;", i);
            out.push_str(FAIL);
            out.push_str("    }\n\n");
        }
        HookKind::Tc => {
            let _ = writeln!(out, "    hs_tc_hook_{}.ifindex = if_nametoindex(\"{}\");", i, ep.attach);
            let _ = writeln!(out, "    if (!hs_prog || !hs_tc_hook_{}.ifindex) {{", i);
            let _ = writeln!(out, "        fprintf(stderr, \"cannot resolve {} on {}\\n\");", ep.symbol, ep.attach);
            out.push_str(FAIL);
            out.push_str("    }\n");
            let _ = writeln!(out, "    hs_err = bpf_tc_hook_create(&hs_tc_hook_{});", i);
            out.push_str("    if (hs_err && hs_err != -EEXIST) {\n");
            let _ = writeln!(out, "        fprintf(stderr, \"failed to create tc hook on {}\\n\");", ep.attach);
            out.push_str(FAIL);
            out.push_str("    }\n");
            let _ = writeln!(out, "    hs_tc_opts_{}.prog_fd = bpf_program__fd(hs_prog);", i);
            let _ = writeln!(out, "    if (bpf_tc_attach(&hs_tc_hook_{i}, &hs_tc_opts_{i})) {{", i = i);
            let _ = writeln!(out, "        fprintf(stderr, \"failed to attach {} to {}\\n\");", ep.symbol, ep.attach);
            out.push_str(FAIL);
            out.push_str("    }\n");
            let _ = writeln!(out, "    hs_tc_attached_{} = 1;", i);
            out.push_str("    hs_err = 0;\n\n");
        }
        HookKind::Kprobe => {
            out.push_str("    if (!hs_prog) {\n");
            let _ = writeln!(out, "        fprintf(stderr, \"cannot resolve {}\\n\");", ep.symbol);
            out.push_str(FAIL);
            out.push_str("    }\n");
            let _ = writeln!(
                out,
                "    hs_link_{} = bpf_program__attach_kprobe(hs_prog, false, \"{}\");",
                i, ep.attach
            );
            let _ = writeln!(out, "    if (!hs_link_{}) {{", i);
            let _ = writeln!(out, "        fprintf(stderr, \"failed to attach {} to {}\\n\");", ep.symbol, ep.attach);
            out.push_str(FAIL);
            out.push_str("    }\n\n");
        }
    }
}

/// Ring buffer callback printing one event per line
fn event_printer(rb: &AbiMap) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "static int hs_print_{}(void *ctx, void *data, size_t len)\n{{",
        rb.canonical
    );
    let _ = writeln!(out, "    const {} *hs_ev = data;\n", type_name(&rb.value));
    out.push_str("    (void)ctx;\n");
    out.push_str("    if (len < sizeof(*hs_ev))\n        return 0;\n");

    let mut format = format!("{}:", rb.declared);
    let mut args = Vec::new();
    match &rb.value.ty {
        IrType::Primitive(p) => {
            format.push(' ');
            format.push_str(p.printf_format());
            args.push(printf_arg(*p, "*hs_ev"));
        }
        IrType::Struct(fields) => {
            for field in fields {
                match field.ty.primitive() {
                    Some(p) => {
                        let _ = write!(format, " {}={}", field.name, p.printf_format());
                        args.push(printf_arg(p, &format!("hs_ev->{}", field.name)));
                    }
                    None => {
                        let placeholder = match field.ty {
                            IrType::Array(..) => "<array>",
                            _ => "<struct>",
                        };
                        let _ = write!(format, " {}={}", field.name, placeholder);
                    }
                }
            }
        }
        _ => format.push_str(" <array>"),
    }

    if args.is_empty() {
        let _ = writeln!(out, "    printf(\"{}\\n\");", format);
    } else {
        let _ = writeln!(out, "    printf(\"{}\\n\", {});", format, args.join(", "));
    }
    out.push_str("    return 0;\n}\n\n");
    out
}

/// Argument cast matching [`PrimitiveType::printf_format`]
fn printf_arg(p: PrimitiveType, expr: &str) -> String {
    let cast = match p {
        PrimitiveType::U64 => "unsigned long long",
        PrimitiveType::I64 => "long long",
        PrimitiveType::I8 | PrimitiveType::I16 | PrimitiveType::I32 => "int",
        PrimitiveType::U8 | PrimitiveType::U16 | PrimitiveType::U32 | PrimitiveType::Bool => {
            "unsigned int"
        }
    };
    format!("({}){}", cast, expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::analysis::MultiProgramAnalyzer;
    use crate::compiler::ir::IrGenerator;
    use crate::compiler::optimizer::Optimizer;
    use crate::compiler::resource_plan::ResourcePlanner;
    use crate::compiler::strategy::StrategyGenerator;
    use crate::compiler::types::{CheckedUnit, TypeChecker};
    use crate::{SExprParser, SExprScanner};

    fn build(source: &str) -> (CheckedUnit, OptimizedIr) {
        let tokens = SExprScanner::new(source).scan_tokens().unwrap();
        let program = SExprParser::new(tokens).parse().unwrap();
        let unit = TypeChecker::new().check(program).unwrap();
        let analysis = MultiProgramAnalyzer::new(&unit).analyze();
        let lowered = IrGenerator::new(&unit).lower().unwrap();
        let plan = ResourcePlanner::new().plan(&lowered, &analysis).unwrap();
        let strategies = StrategyGenerator::new().generate(&analysis);
        let ir = Optimizer::default()
            .optimize(lowered, &analysis, &plan, &strategies)
            .unwrap();
        (unit, ir)
    }

    const SOURCE: &str = r#"
(deftype Event (struct (pid u32) (bytes u64) (comm (array u8 16))))
(defconfig Settings (threshold u32 100) (verbose bool))
(defmap events :type ringbuf :value Event :max-entries 4096)
(defprogram guard :kind xdp :attach "eth0"
  (defn main []
    (when (> (packet-len) (. Settings threshold))
      (emit events (make Event :pid (pid) :bytes (packet-len))))
    (return XDP_PASS)))
(defprogram shaper :kind tc :attach "eth0" :direction egress
  (defn main []
    (if (. Settings verbose) (emit events (make Event :pid 0 :bytes (packet-len))))
    (return TC_ACT_OK)))
"#;

    #[test]
    fn test_coordinator_injects_defaults_and_attaches() {
        let (unit, ir) = build(SOURCE);
        let configs: Vec<ConfigDecl> = unit.configs().cloned().collect();
        let src = render(&ir, &configs, &unit.aliases, "demo.ebpf.o").unwrap();

        assert!(src.contains("argc > 1 ? argv[1] : \"demo.ebpf.o\""));
        assert!(src.contains("hs_cfg.threshold = 100;"));
        assert!(!src.contains("hs_cfg.verbose ="));
        assert!(src.contains("bpf_xdp_attach(hs_ifindex_0"));
        assert!(src.contains(".attach_point = BPF_TC_EGRESS"));
        assert!(src.contains("bpf_tc_attach(&hs_tc_hook_1, &hs_tc_opts_1)"));
        assert!(src.contains("/* config Settings: shared by guard, shaper */"));
        assert!(src.contains("ring_buffer__new(bpf_map__fd(hs_map), hs_print_events, NULL, NULL)"));
    }

    #[test]
    fn test_event_printer_formats_fields() {
        let (unit, ir) = build(SOURCE);
        let configs: Vec<ConfigDecl> = unit.configs().cloned().collect();
        let src = render(&ir, &configs, &unit.aliases, "demo.ebpf.o").unwrap();
        assert!(src.contains("const Event *hs_ev = data;"));
        assert!(src.contains(
            "printf(\"events: pid=%u bytes=%llu comm=<array>\\n\", (unsigned int)hs_ev->pid, (unsigned long long)hs_ev->bytes);"
        ));
    }

    #[test]
    fn test_writes_artifact() {
        let (unit, ir) = build(SOURCE);
        let configs: Vec<ConfigDecl> = unit.configs().cloned().collect();
        let dir = tempfile::tempdir().unwrap();
        let path = generate(&ir, &configs, &unit.aliases, dir.path(), "demo").unwrap();
        assert_eq!(path, dir.path().join("demo.c"));
        assert!(std::fs::read_to_string(path).unwrap().contains("hookscript-abi: sha256:"));
    }
}

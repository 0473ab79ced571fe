//! End-to-end: source file in, every artifact on disk

use hookscript::compiler::{CompileOptions, Compiler, Phase};
use std::fs;
use std::path::Path;

const SETTINGS_SOURCE: &str = r#"
; Settings shared by an XDP guard and a TC shaper
(defconfig Settings (threshold u32 1500))
(defmap drops :type array :key u32 :value u64 :max-entries 1)

(defprogram guard :kind xdp :attach "eth0"
  (defn main []
    (when (> (packet-len) (. Settings threshold))
      (map-update drops 0 (+ (map-lookup drops 0) 1))
      (return XDP_DROP))
    (return XDP_PASS)))

(defprogram shaper :kind tc :attach "eth0" :direction ingress
  (defn main []
    (when (> (packet-len) (. Settings threshold))
      (return TC_ACT_SHOT))
    (return TC_ACT_OK)))
"#;

fn options(out: &Path, builtins: &Path) -> CompileOptions {
    CompileOptions {
        output_dir: Some(out.to_path_buf()),
        builtin_path: builtins.to_path_buf(),
        ..CompileOptions::default()
    }
}

#[test]
fn test_settings_shared_by_xdp_and_tc() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("B.hs");
    fs::write(&input, SETTINGS_SOURCE).unwrap();
    let out = work.path().join("out");

    let result = Compiler::new(options(&out, &work.path().join("no-builtins")))
        .compile_file(&input)
        .unwrap();

    assert_eq!(result.kernel_path, out.join("B.ebpf.c"));
    assert_eq!(result.userspace_path, out.join("B.c"));

    let kernel = fs::read_to_string(&result.kernel_path).unwrap();
    let userspace = fs::read_to_string(&result.userspace_path).unwrap();
    let config = "struct Settings {\n    __u32 threshold;\n};";
    assert!(kernel.contains(config));
    assert!(userspace.contains(config));
    assert!(kernel.contains("/* config Settings: shared by guard, shaper */"));
    assert!(kernel.contains("SEC(\"xdp\")\nint guard(struct xdp_md *ctx)"));
    assert!(kernel.contains("SEC(\"tc\")\nint shaper(struct __sk_buff *ctx)"));
    assert!(userspace.contains("hs_cfg.threshold = 1500;"));
    assert!(userspace.contains("bpf_object__find_map_by_name(hs_obj, \"Settings\")"));

    let line = format!("/* hookscript-abi: sha256:{} */", result.fingerprint);
    assert!(kernel.contains(&line));
    assert!(userspace.contains(&line));

    let makefile = fs::read_to_string(result.makefile.unwrap()).unwrap();
    for target in ["B.ebpf.c", "B.ebpf.o", "B.c", "all: B.ebpf.o B\n"] {
        assert!(makefile.contains(target), "Makefile lacks {target}");
    }
}

#[test]
fn test_builtin_headers_are_best_effort() {
    let work = tempfile::tempdir().unwrap();
    let builtins = work.path().join("builtin");
    fs::create_dir(&builtins).unwrap();
    fs::write(builtins.join("xdp.hs"), "(deftype ipv4 u32)\n(defconst ETH_P_IP 2048)").unwrap();
    fs::write(builtins.join("tc.hs"), "(deftype broken").unwrap();

    let out = work.path().join("out");
    let result = Compiler::new(options(&out, &builtins))
        .compile_source(SETTINGS_SOURCE, "B")
        .unwrap();

    assert_eq!(result.headers, vec![out.join("xdp.h")]);
    assert!(fs::read_to_string(out.join("xdp.h")).unwrap().contains("typedef __u32 ipv4;"));
    assert!(!out.join("tc.h").exists());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("builtin header compilation failed"));
    assert!(result.warnings[0].contains("'tc'"));
    assert!(out.join("B.ebpf.c").exists());
}

#[test]
fn test_user_type_named_like_builtin_skips_that_header() {
    let source = r#"
(deftype eth_hdr (struct (proto u16) (len u16)))
(defmap last :type hash :key u32 :value eth_hdr :max-entries 16)
(defprogram guard :kind xdp :attach "eth0"
  (defn main []
    (map-delete last 0)
    (return XDP_PASS)))
"#;
    let builtins = Path::new(env!("CARGO_MANIFEST_DIR")).join("builtin");
    let work = tempfile::tempdir().unwrap();
    let out = work.path().join("out");
    let result = Compiler::new(options(&out, &builtins))
        .compile_source(source, "B")
        .unwrap();

    assert!(result.headers.is_empty());
    assert!(!out.join("xdp.h").exists());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("`eth_hdr`"));
    let kernel = fs::read_to_string(&result.kernel_path).unwrap();
    assert!(kernel.contains("typedef struct { __u16 proto; __u16 len; } eth_hdr;"));
}

#[test]
fn test_no_makefile_and_clean_output_dir() {
    let work = tempfile::tempdir().unwrap();
    let out = work.path().join("out");
    let opts = CompileOptions {
        makefile: false,
        ..options(&out, work.path())
    };
    let result = Compiler::new(opts).compile_source(SETTINGS_SOURCE, "B").unwrap();
    assert!(result.makefile.is_none());

    let mut names: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["B.c", "B.ebpf.c"]);
}

#[test]
fn test_failed_compile_writes_nothing() {
    let work = tempfile::tempdir().unwrap();
    let out = work.path().join("out");
    let err = Compiler::new(options(&out, work.path()))
        .compile_source("(defprogram p :kind xdp :attach \"eth0\" (defn main [] (return nope)))", "B")
        .unwrap_err();
    assert_eq!(err.phase(), Some(Phase::TypeCheck));
    assert!(!out.exists());
}

#[test]
fn test_userspace_write_failure_removes_kernel_source() {
    let work = tempfile::tempdir().unwrap();
    let out = work.path().join("out");
    // A directory squatting on B.c makes the coordinator write fail
    fs::create_dir_all(out.join("B.c")).unwrap();

    let err = Compiler::new(options(&out, work.path()))
        .compile_source(SETTINGS_SOURCE, "B")
        .unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Output));
    assert!(matches!(err.root(), hookscript::Error::Io { .. }));

    let names: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["B.c"]);
    assert!(out.join("B.c").is_dir());
}

#[test]
fn test_shared_declarations_are_emitted_once() {
    let source = r#"
(defconfig Settings (threshold u32 1500))
(defmap flows :type lru-hash :key u32 :value u64 :max-entries 1024)

(defprogram guard :kind xdp :attach "eth0"
  (defn main []
    (map-update flows (ifindex) (packet-len))
    (when (> (packet-len) (. Settings threshold)) (return XDP_DROP))
    (return XDP_PASS)))

(defprogram shaper :kind tc :attach "eth0" :direction egress
  (defn main []
    (map-delete flows (ifindex))
    (when (> (packet-len) (. Settings threshold)) (return TC_ACT_SHOT))
    (return TC_ACT_OK)))
"#;
    let work = tempfile::tempdir().unwrap();
    let out = work.path().join("out");
    let result = Compiler::new(options(&out, work.path()))
        .compile_source(source, "B")
        .unwrap();
    let kernel = fs::read_to_string(&result.kernel_path).unwrap();
    let userspace = fs::read_to_string(&result.userspace_path).unwrap();

    for text in [&kernel, &userspace] {
        assert_eq!(text.matches("struct Settings {").count(), 1);
    }
    assert_eq!(kernel.matches("} Settings SEC(\".maps\");").count(), 1);
    assert_eq!(kernel.matches("} flows SEC(\".maps\");").count(), 1);
    assert_eq!(kernel.matches("/* resource flows: shared by guard, shaper */").count(), 1);
    assert_eq!(userspace.matches(" *   flows: shared by guard, shaper\n").count(), 1);
    assert!(!kernel.contains("guard__flows") && !kernel.contains("shaper__flows"));
}

#[test]
fn test_missing_input_is_reported() {
    let work = tempfile::tempdir().unwrap();
    let err = Compiler::default()
        .compile_file(&work.path().join("absent.hs"))
        .unwrap_err();
    assert!(matches!(err.root(), hookscript::Error::Io { .. }));
}

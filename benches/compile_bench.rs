use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hookscript::compiler::Compiler;
use hookscript::Scanner;

const SOURCE: &str = r#"
(deftype Event (struct (pid u32) (len u32)))
(defconfig Settings (threshold u32 1500) (sample u32 64))
(defmap flows :type lru-hash :key u32 :value u64 :max-entries 4096)
(defmap events :type ringbuf :value Event :max-entries 65536)

(defn over [(len u32)] bool (return (> len 1500)))

(defprogram first :kind xdp :attach "eth0" :priority 1
  (defn main []
    (map-update flows (ifindex) (packet-len))
    (return XDP_PASS)))

(defprogram second :kind xdp :attach "eth0" :priority 2
  (defn main []
    (when (> (packet-len) (. Settings threshold))
      (emit events (make Event :pid 0 :len (packet-len)))
      (return XDP_DROP))
    (return XDP_PASS)))

(defprogram shaper :kind tc :attach "eth0" :direction egress
  (defn main []
    (if (over (packet-len)) (return TC_ACT_SHOT))
    (return TC_ACT_OK)))

(defprogram opens :kind kprobe :attach "do_sys_openat2"
  (defn main []
    (emit events (make Event :pid (pid) :len (. Settings sample)))
    (return 0)))
"#;

fn lexer_benchmark(c: &mut Criterion) {
    c.bench_function("tokenize multi-program unit", |b| {
        b.iter(|| Scanner::new(black_box(SOURCE)).scan_tokens().unwrap())
    });
}

fn pipeline_benchmark(c: &mut Criterion) {
    let compiler = Compiler::default();
    c.bench_function("compile multi-program unit", |b| {
        b.iter(|| {
            let pipeline = compiler.run(black_box(SOURCE)).unwrap();
            let kernel = pipeline.kernel_source().unwrap();
            let userspace = pipeline.userspace_source("bench.ebpf.o").unwrap();
            (kernel, userspace)
        })
    });
}

criterion_group!(benches, lexer_benchmark, pipeline_benchmark);
criterion_main!(benches);

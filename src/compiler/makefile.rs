//! Makefile template for the generated pair

use super::output::write_atomic;
use crate::Result;
use std::path::{Path, PathBuf};

/// Render the Makefile building `<base>.ebpf.o` and the `<base>` loader
pub fn render(base: &str) -> String {
    format!(
        "# Generated by hookc. Do not edit.\n\
         CLANG ?= clang\n\
         CC ?= cc\n\
         ARCH ?= x86\n\
         BPF_CFLAGS ?= -O2 -g -target bpf -D__TARGET_ARCH_$(ARCH)\n\
         CFLAGS ?= -O2 -g -Wall\n\
         LDLIBS ?= -lbpf -lelf -lz\n\
         \n\
         all: {b}.ebpf.o {b}\n\
         \n\
         {b}.ebpf.o: {b}.ebpf.c\n\
         \t$(CLANG) $(BPF_CFLAGS) -I. -c $< -o $@\n\
         \n\
         {b}: {b}.c\n\
         \t$(CC) $(CFLAGS) $< -o $@ $(LDLIBS)\n\
         \n\
         clean:\n\
         \trm -f {b}.ebpf.o {b}\n\
         \n\
         .PHONY: all clean\n",
        b = base
    )
}

/// Write `<out_dir>/Makefile`
pub fn generate(out_dir: &Path, base: &str) -> Result<PathBuf> {
    write_atomic(&out_dir.join("Makefile"), &render(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_reference_both_artifacts() {
        let makefile = render("demo");
        assert!(makefile.contains("all: demo.ebpf.o demo\n"));
        assert!(makefile.contains("demo.ebpf.o: demo.ebpf.c\n\t$(CLANG)"));
        assert!(makefile.contains("demo: demo.c\n\t$(CC)"));
        assert!(makefile.contains("-D__TARGET_ARCH_$(ARCH)"));
    }
}

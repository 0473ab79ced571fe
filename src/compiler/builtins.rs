//! Builtin header compiler
//!
//! Each hook kind may ship a `<kind>.hs` source restricted to `deftype` and
//! `defconst` forms. It compiles to a guarded `<kind>.h` next to the kernel
//! source. Any failure is downgraded to a warning. So is a builtin name the
//! unit already uses for one of its own C symbols; the header is then left
//! out and the kernel source's `__has_include` guard skips it.

use super::abi::declarator;
use super::output::{discard, write_atomic};
use super::types::TypeAliasTable;
use crate::parser::{Declaration, HookKind, TypeExpr};
use crate::{Error, Result, SExprParser, SExprScanner};
use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of compiling the builtin headers of every kind present
#[derive(Debug, Default)]
pub struct BuiltinReport {
    /// Headers written
    pub written: Vec<PathBuf>,
    /// Downgraded failures, one per kind at most
    pub warnings: Vec<Error>,
}

/// Compile `<builtin_path>/<kind>.hs` into `<out_dir>/<kind>.h` once per kind
///
/// `reserved` holds every name the unit's own C output defines.
pub fn compile_all(
    kinds: &[HookKind],
    builtin_path: &Path,
    out_dir: &Path,
    reserved: &BTreeSet<&str>,
) -> BuiltinReport {
    let mut report = BuiltinReport::default();
    for &kind in kinds {
        match compile_one(kind, builtin_path, out_dir, reserved) {
            Ok(path) => report.written.push(path),
            Err(reason) => {
                let stale = out_dir.join(format!("{}.h", kind));
                if stale.exists() {
                    discard(&stale);
                }
                let err = Error::BuiltinHeader {
                    kind: kind.to_string(),
                    reason: reason.to_string(),
                };
                warn!("{}", err);
                report.warnings.push(err);
            }
        }
    }
    report
}

fn compile_one(
    kind: HookKind,
    builtin_path: &Path,
    out_dir: &Path,
    reserved: &BTreeSet<&str>,
) -> Result<PathBuf> {
    let source_path = builtin_path.join(format!("{}.hs", kind));
    let source = std::fs::read_to_string(&source_path).map_err(|e| Error::io(&source_path, e))?;
    let header = compile(kind, &source)?;
    if let Some(name) = header.names.iter().find(|n| reserved.contains(n.as_str())) {
        return Err(Error::compiler(format!(
            "builtin `{}` is also defined by the unit",
            name
        )));
    }
    debug!(kind = %kind, source = %source_path.display(), "compiled builtin header");
    write_atomic(&out_dir.join(format!("{}.h", kind)), &header.text)
}

/// A rendered builtin header and the names it defines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinHeader {
    /// Header text
    pub text: String,
    /// Typedef and macro names, in source order
    pub names: Vec<String>,
}

/// Render the guarded header for one builtin source
pub fn render(kind: HookKind, source: &str) -> Result<String> {
    compile(kind, source).map(|h| h.text)
}

/// Render the header and collect the names it defines
pub fn compile(kind: HookKind, source: &str) -> Result<BuiltinHeader> {
    let tokens = SExprScanner::new(source).scan_tokens()?;
    let program = SExprParser::new(tokens).parse()?;

    let guard = format!("HOOKSCRIPT_BUILTIN_{}_H", kind.as_str().to_ascii_uppercase());
    let mut out = String::new();
    let _ = writeln!(out, "/* Generated by hookc from {}.hs. Do not edit. */", kind);
    let _ = writeln!(out, "#ifndef {}\n#define {}\n", guard, guard);
    out.push_str("#include <linux/types.h>\n\n");

    let mut types = TypeAliasTable::new();
    let mut names = Vec::new();
    for decl in &program.declarations {
        names.push(decl.name().to_string());
        match decl {
            Declaration::TypeAlias(alias) => {
                types.insert(&alias.name, &alias.ty, alias.span)?;
                let named = match &alias.ty {
                    TypeExpr::Named(n) if types.get(n).is_some() => Some(n.as_str()),
                    _ => None,
                };
                let resolved = types.resolve(&alias.ty, alias.span)?;
                let _ = writeln!(out, "typedef {};", declarator(&resolved, named, &alias.name));
            }
            Declaration::Constant(c) => {
                let _ = writeln!(
                    out,
                    "#ifndef {name}\n#define {name} {value}\n#endif",
                    name = c.name,
                    value = c.value
                );
            }
            other => {
                return Err(Error::compiler(format!(
                    "only deftype and defconst are allowed in builtin sources, found `{}`",
                    other.name()
                )))
            }
        }
    }

    let _ = writeln!(out, "\n#endif /* {} */", guard);
    Ok(BuiltinHeader { text: out, names })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_typedefs_and_constants() {
        let header = render(
            HookKind::Xdp,
            "(deftype ipv4 u32)\n(deftype addr ipv4)\n(deftype mac (array u8 6))\n(defconst ETH_P_IP 2048)",
        )
        .unwrap();
        assert!(header.contains("#ifndef HOOKSCRIPT_BUILTIN_XDP_H"));
        assert!(header.contains("typedef __u32 ipv4;"));
        assert!(header.contains("typedef ipv4 addr;"));
        assert!(header.contains("typedef __u8 mac[6];"));
        assert!(header.contains("#define ETH_P_IP 2048"));
        assert!(header.trim_end().ends_with("#endif /* HOOKSCRIPT_BUILTIN_XDP_H */"));
    }

    #[test]
    fn test_programs_are_rejected() {
        let err = render(
            HookKind::Tc,
            "(defprogram p :kind tc :attach \"eth0\" (defn main [] (return TC_ACT_OK)))",
        )
        .unwrap_err();
        assert!(err.to_string().contains("deftype and defconst"));
    }

    #[test]
    fn test_missing_source_becomes_warning() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("xdp.hs"), "(defconst MAX_HOPS 8)").unwrap();

        let report = compile_all(
            &[HookKind::Xdp, HookKind::Kprobe],
            src.path(),
            out.path(),
            &BTreeSet::new(),
        );
        assert_eq!(report.written, vec![out.path().join("xdp.h")]);
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(&report.warnings[0], Error::BuiltinHeader { kind, .. } if kind == "kprobe"));
        assert!(!out.path().join("kprobe.h").exists());
    }

    #[test]
    fn test_names_taken_by_the_unit_drop_the_header() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(
            src.path().join("xdp.hs"),
            "(deftype eth_hdr (struct (proto u16)))\n(defconst ETH_HLEN 14)",
        )
        .unwrap();
        std::fs::write(out.path().join("xdp.h"), "/* from an earlier run */").unwrap();

        let reserved: BTreeSet<&str> = ["eth_hdr", "drops"].into_iter().collect();
        let report = compile_all(&[HookKind::Xdp], src.path(), out.path(), &reserved);
        assert!(report.written.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].to_string().contains("`eth_hdr`"));
        assert!(!out.path().join("xdp.h").exists());

        let header = compile(HookKind::Xdp, "(deftype ipv4 u32)\n(defconst ETH_HLEN 14)").unwrap();
        assert_eq!(header.names, vec!["ipv4", "ETH_HLEN"]);
    }
}

//! # ABI Contract
//!
//! Every declaration the kernel object and the userspace coordinator must
//! agree on: alias typedefs, synthesized key/value typedefs, config structs
//! and map shapes under their canonical names. Both generators build the
//! contract independently from the optimized IR and render the shared part
//! with the same code, then embed its SHA-256 fingerprint.

use crate::compiler::ir::{
    IrField, IrFunction, IrStmt, IrType, OptimizedIr, PlannedResource, ResourceKind, TypeUse,
};
use crate::compiler::resource_plan::Ownership;
use crate::compiler::types::AliasTables;
use crate::parser::{ConfigDecl, MapType};
use crate::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

lazy_static! {
    static ref C_IDENT: Option<Regex> = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok();
}

/// Marker line opening the shared section in both files
pub const SHARED_BEGIN: &str = "/* hookscript-abi: begin */";
/// Marker line closing the shared section in both files
pub const SHARED_END: &str = "/* hookscript-abi: end */";

/// A `typedef` both files emit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbiTypedef {
    /// Type name
    pub name: String,
    /// Structural type (field aliases kept)
    pub ty: IrType,
}

/// Config struct plus its single-entry array map
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbiConfig {
    /// Declared name
    pub declared: String,
    /// Struct tag and map variable name
    pub canonical: String,
    /// Plan ownership
    pub ownership: Ownership,
    /// Programs permitted to read it
    pub permitted: BTreeSet<String>,
    /// Ordered fields
    pub fields: Vec<IrField>,
    /// Defaults in field order
    pub defaults: Vec<Option<i64>>,
}

impl AbiConfig {
    /// Field by name
    pub fn field(&self, name: &str) -> Option<&IrField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Kernel map shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbiMap {
    /// Declared name
    pub declared: String,
    /// Map variable name
    pub canonical: String,
    /// Plan ownership
    pub ownership: Ownership,
    /// Programs permitted to use it
    pub permitted: BTreeSet<String>,
    /// Map flavour
    pub map_type: MapType,
    /// Key spelling (alias or synthesized typedef for aggregates)
    pub key: Option<TypeUse>,
    /// Value spelling
    pub value: TypeUse,
    /// Capacity
    pub max_entries: u32,
}

/// One resource of the contract, in resource-section order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "resource", rename_all = "lowercase")]
pub enum AbiResource {
    /// Configuration
    Config(AbiConfig),
    /// Map
    Map(AbiMap),
}

impl AbiResource {
    /// Canonical name
    pub fn canonical(&self) -> &str {
        match self {
            AbiResource::Config(c) => &c.canonical,
            AbiResource::Map(m) => &m.canonical,
        }
    }

    /// Ownership annotation, e.g. `shared by a, b`
    pub fn ownership_note(&self) -> String {
        match self {
            AbiResource::Config(c) => ownership_note(&c.ownership, &c.permitted),
            AbiResource::Map(m) => ownership_note(&m.ownership, &m.permitted),
        }
    }
}

/// Immutable ABI contract shared by both generators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbiContract {
    /// Alias typedefs in declaration order
    pub typedefs: Vec<AbiTypedef>,
    /// Typedefs synthesized for aggregate map keys and values without an alias
    pub synthesized: Vec<AbiTypedef>,
    /// Resources in resource-section order
    pub resources: Vec<AbiResource>,
    #[serde(skip)]
    symbols: BTreeMap<String, String>,
    #[serde(skip)]
    fingerprint: String,
}

impl AbiContract {
    /// Build from the optimized IR alone
    pub fn from_ir(ir: &OptimizedIr, aliases: &AliasTables) -> Result<Self> {
        Self::build(ir, aliases, |resource| match &resource.kind {
            ResourceKind::Config { fields, defaults } => Ok(Some((fields.clone(), defaults.clone()))),
            ResourceKind::Map { .. } => Ok(None),
        })
    }

    /// Build with config schemas taken from their source declarations
    ///
    /// The first declaration of each config name is the one the resource
    /// planner kept, so this yields the same contract as [`Self::from_ir`].
    pub fn from_config_decls(
        ir: &OptimizedIr,
        configs: &[ConfigDecl],
        aliases: &AliasTables,
    ) -> Result<Self> {
        Self::build(ir, aliases, |resource| {
            if !matches!(resource.kind, ResourceKind::Config { .. }) {
                return Ok(None);
            }
            let decl = configs
                .iter()
                .find(|c| c.name == resource.declared)
                .ok_or_else(|| {
                    Error::codegen(format!("No declaration for config '{}'", resource.declared))
                })?;
            let mut fields = Vec::with_capacity(decl.fields.len());
            for field in &decl.fields {
                let ty = aliases.types.resolve_use(&field.ty, decl.span)?;
                fields.push(IrField {
                    name: field.name.clone(),
                    ty: ty.ty,
                    alias: ty.alias,
                });
            }
            Ok(Some((fields, decl.fields.iter().map(|f| f.default).collect())))
        })
    }

    fn build<F>(ir: &OptimizedIr, aliases: &AliasTables, mut config_schema: F) -> Result<Self>
    where
        F: FnMut(&PlannedResource) -> Result<Option<(Vec<IrField>, Vec<Option<i64>>)>>,
    {
        let typedefs: Vec<AbiTypedef> = aliases
            .types
            .iter()
            .map(|a| AbiTypedef {
                name: a.name.clone(),
                ty: a.ty.clone(),
            })
            .collect();

        let mut synthesized = Vec::new();
        let mut resources = Vec::with_capacity(ir.resources.len());
        for resource in &ir.resources {
            check_ident(&resource.canonical)?;
            match &resource.kind {
                ResourceKind::Config { .. } => {
                    let (fields, defaults) = config_schema(resource)?.ok_or_else(|| {
                        Error::codegen(format!("Config '{}' has no schema", resource.declared))
                    })?;
                    resources.push(AbiResource::Config(AbiConfig {
                        declared: resource.declared.clone(),
                        canonical: resource.canonical.clone(),
                        ownership: resource.ownership.clone(),
                        permitted: resource.permitted.clone(),
                        fields,
                        defaults,
                    }));
                }
                ResourceKind::Map {
                    map_type,
                    key,
                    value,
                    max_entries,
                } => {
                    let key = key
                        .as_ref()
                        .map(|k| spelled(k, &resource.canonical, "key", &mut synthesized));
                    let value = spelled(value, &resource.canonical, "value", &mut synthesized);
                    resources.push(AbiResource::Map(AbiMap {
                        declared: resource.declared.clone(),
                        canonical: resource.canonical.clone(),
                        ownership: resource.ownership.clone(),
                        permitted: resource.permitted.clone(),
                        map_type: *map_type,
                        key,
                        value,
                        max_entries: *max_entries,
                    }));
                }
            }
        }

        for typedef in typedefs.iter().chain(&synthesized) {
            check_ident(&typedef.name)?;
        }
        let symbols = object_symbols(ir, &typedefs, &synthesized)?;

        let mut contract = Self {
            typedefs,
            synthesized,
            resources,
            symbols,
            fingerprint: String::new(),
        };
        let bytes = serde_json::to_vec(&contract)
            .map_err(|e| Error::codegen(format!("Cannot serialize ABI contract: {}", e)))?;
        contract.fingerprint = hex::encode(Sha256::digest(&bytes));
        Ok(contract)
    }

    /// Hex SHA-256 of the contract
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Every file-scope identifier of the kernel object
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    /// Comment line both files carry
    pub fn fingerprint_line(&self) -> String {
        format!("/* hookscript-abi: sha256:{} */", self.fingerprint)
    }

    /// Config by canonical name
    pub fn config(&self, canonical: &str) -> Option<&AbiConfig> {
        self.configs().find(|c| c.canonical == canonical)
    }

    /// Map by canonical name
    pub fn map(&self, canonical: &str) -> Option<&AbiMap> {
        self.maps().find(|m| m.canonical == canonical)
    }

    /// Configs in order
    pub fn configs(&self) -> impl Iterator<Item = &AbiConfig> {
        self.resources.iter().filter_map(|r| match r {
            AbiResource::Config(c) => Some(c),
            AbiResource::Map(_) => None,
        })
    }

    /// Maps in order
    pub fn maps(&self) -> impl Iterator<Item = &AbiMap> {
        self.resources.iter().filter_map(|r| match r {
            AbiResource::Map(m) => Some(m),
            AbiResource::Config(_) => None,
        })
    }

    /// Typedefs and config structs, identical in both files
    pub fn render_shared(&self) -> String {
        let mut out = String::new();
        out.push_str(SHARED_BEGIN);
        out.push('\n');

        if !self.typedefs.is_empty() {
            out.push('\n');
            for t in &self.typedefs {
                let _ = writeln!(out, "typedef {};", declarator(&t.ty, None, &t.name));
            }
        }
        if !self.synthesized.is_empty() {
            out.push('\n');
            for t in &self.synthesized {
                let _ = writeln!(out, "typedef {};", declarator(&t.ty, None, &t.name));
            }
        }
        for config in self.configs() {
            out.push('\n');
            let _ = writeln!(
                out,
                "/* config {}: {} */",
                config.canonical,
                ownership_note(&config.ownership, &config.permitted)
            );
            let _ = writeln!(out, "struct {} {{", config.canonical);
            for field in &config.fields {
                let _ = writeln!(
                    out,
                    "    {};",
                    declarator(&field.ty, field.alias.as_deref(), &field.name)
                );
            }
            out.push_str("};\n");
        }

        out.push('\n');
        out.push_str(SHARED_END);
        out.push('\n');
        out
    }

    /// BTF-style map definitions for the kernel object
    pub fn render_kernel_maps(&self) -> String {
        let mut out = String::new();
        for resource in &self.resources {
            let _ = writeln!(
                out,
                "/* resource {}: {} */",
                resource.canonical(),
                resource.ownership_note()
            );
            out.push_str("struct {\n");
            match resource {
                AbiResource::Config(c) => {
                    out.push_str("    __uint(type, BPF_MAP_TYPE_ARRAY);\n");
                    out.push_str("    __uint(max_entries, 1);\n");
                    out.push_str("    __type(key, __u32);\n");
                    let _ = writeln!(out, "    __type(value, struct {});", c.canonical);
                }
                AbiResource::Map(m) => {
                    let _ = writeln!(out, "    __uint(type, {});", m.map_type.bpf_constant());
                    let _ = writeln!(out, "    __uint(max_entries, {});", m.max_entries);
                    if m.map_type != MapType::Ringbuf {
                        if let Some(key) = &m.key {
                            let _ = writeln!(out, "    __type(key, {});", type_name(key));
                        }
                        let _ = writeln!(out, "    __type(value, {});", type_name(&m.value));
                    }
                }
            }
            let _ = writeln!(out, "}} {} SEC(\".maps\");\n", resource.canonical());
        }
        out
    }
}

/// Aggregates without an alias get a `<canonical>__<role>_t` typedef
fn spelled(ty: &TypeUse, canonical: &str, role: &str, synthesized: &mut Vec<AbiTypedef>) -> TypeUse {
    if ty.alias.is_some() || ty.ty.is_scalar() {
        return ty.clone();
    }
    let name = format!("{}__{}_t", canonical, role);
    synthesized.push(AbiTypedef {
        name: name.clone(),
        ty: ty.ty.clone(),
    });
    TypeUse {
        ty: ty.ty.clone(),
        alias: Some(name),
    }
}

/// File-scope identifiers of the kernel object, each with what it names
///
/// Typedefs, map variables, functions, `SEC` entries and dispatchers share
/// one C namespace, so any repeat is a [`Error::NameCollision`]. Locals and
/// parameters may not reuse one of these names either.
fn object_symbols(
    ir: &OptimizedIr,
    typedefs: &[AbiTypedef],
    synthesized: &[AbiTypedef],
) -> Result<BTreeMap<String, String>> {
    let mut symbols = BTreeMap::new();
    for t in typedefs {
        claim(&mut symbols, &t.name, format!("type {}", t.name))?;
    }
    for t in synthesized {
        claim(&mut symbols, &t.name, format!("synthesized type {}", t.name))?;
    }
    for r in &ir.resources {
        claim(&mut symbols, &r.canonical, format!("{} {}", r.kind.tag(), r.declared))?;
        if matches!(r.kind, ResourceKind::Config { .. }) {
            claim(
                &mut symbols,
                &format!("hs_load_{}", r.canonical),
                format!("loader of config {}", r.declared),
            )?;
        }
    }
    for f in &ir.functions {
        claim(&mut symbols, &f.symbol, format!("global function {}", f.name))?;
    }
    for program in &ir.programs {
        claim(
            &mut symbols,
            &program.entry.symbol,
            format!("body of program {}", program.name),
        )?;
        for helper in &program.helpers {
            claim(
                &mut symbols,
                &helper.symbol,
                format!("function {} of program {}", helper.name, program.name),
            )?;
        }
    }
    for entry in ir.entry_points() {
        let what = match entry.programs.as_slice() {
            [single] if *single == entry.symbol => format!("program {}", single),
            many => format!("dispatcher for {}", many.join(", ")),
        };
        claim(&mut symbols, &entry.symbol, what)?;
    }

    let functions = ir
        .functions
        .iter()
        .chain(ir.programs.iter().flat_map(|p| p.functions()));
    for function in functions {
        check_locals(function, &symbols)?;
    }
    Ok(symbols)
}

fn claim(symbols: &mut BTreeMap<String, String>, name: &str, what: String) -> Result<()> {
    match symbols.entry(name.to_string()) {
        Entry::Vacant(slot) => {
            slot.insert(what);
            Ok(())
        }
        Entry::Occupied(slot) => Err(Error::NameCollision {
            canonical: name.to_string(),
            first: slot.get().clone(),
            second: what,
        }),
    }
}

fn check_locals(function: &IrFunction, symbols: &BTreeMap<String, String>) -> Result<()> {
    let mut names: Vec<&str> = function.params.iter().map(|(n, _)| n.as_str()).collect();
    collect_locals(&function.body, &mut names);
    for name in names {
        if let Some(global) = symbols.get(name) {
            return Err(Error::NameCollision {
                canonical: name.to_string(),
                first: global.clone(),
                second: format!("local variable of {}", function.symbol),
            });
        }
    }
    Ok(())
}

fn collect_locals<'a>(body: &'a [IrStmt], names: &mut Vec<&'a str>) {
    for stmt in body {
        match stmt {
            IrStmt::Declare { name, .. } => names.push(name),
            IrStmt::Loop { var, body, .. } => {
                names.push(var);
                collect_locals(body, names);
            }
            IrStmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_locals(then_body, names);
                collect_locals(else_body, names);
            }
            _ => {}
        }
    }
}

fn check_ident(name: &str) -> Result<()> {
    if C_IDENT.as_ref().is_some_and(|re| re.is_match(name)) {
        Ok(())
    } else {
        Err(Error::codegen(format!("'{}' is not a valid C identifier", name)))
    }
}

/// Human-readable ownership, e.g. `shared by a, b` or `local to a`
pub fn ownership_note(ownership: &Ownership, permitted: &BTreeSet<String>) -> String {
    match ownership {
        Ownership::Shared => format!(
            "shared by {}",
            permitted.iter().cloned().collect::<Vec<_>>().join(", ")
        ),
        other => other.to_string(),
    }
}

/// C declaration of `name` with type `ty`, spelled through `alias` when given
///
/// Arrays put their dimensions after the name (`__u8 addr[4]`), anonymous
/// structs render inline.
pub fn declarator(ty: &IrType, alias: Option<&str>, name: &str) -> String {
    if let Some(alias) = alias {
        return join_decl(alias, name);
    }
    match ty {
        IrType::Void => join_decl("void", name),
        IrType::Primitive(p) => join_decl(p.c_name(), name),
        IrType::Array(elem, count) => declarator(elem, None, &format!("{}[{}]", name, count)),
        IrType::Struct(fields) => {
            let mut s = String::from("struct {");
            for field in fields {
                let _ = write!(
                    s,
                    " {};",
                    declarator(&field.ty, field.alias.as_deref(), &field.name)
                );
            }
            s.push_str(" }");
            join_decl(&s, name)
        }
    }
}

/// Abstract type name, as used in casts, `sizeof` and `__type(...)`
pub fn type_name(ty: &TypeUse) -> String {
    declarator(&ty.ty, ty.alias.as_deref(), "")
}

fn join_decl(base: &str, name: &str) -> String {
    if name.is_empty() {
        base.to_string()
    } else if name.starts_with('[') {
        format!("{} {}", base, name).replace(" [", "[")
    } else {
        format!("{} {}", base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::PrimitiveType;
    use crate::compiler::{Compiler, Phase};

    fn collision(source: &str) -> (String, String, String) {
        let err = Compiler::default().run(source).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Planning));
        match err.root() {
            Error::NameCollision {
                canonical,
                first,
                second,
            } => (canonical.clone(), first.clone(), second.clone()),
            other => panic!("expected a name collision, got {other:?}"),
        }
    }

    fn prim(p: PrimitiveType) -> IrType {
        IrType::prim(p)
    }

    #[test]
    fn test_declarators() {
        assert_eq!(declarator(&prim(PrimitiveType::U32), None, "x"), "__u32 x");
        assert_eq!(declarator(&prim(PrimitiveType::U64), Some("Counter"), "n"), "Counter n");
        let nested = IrType::Array(Box::new(IrType::Array(Box::new(prim(PrimitiveType::U8)), 4)), 2);
        assert_eq!(declarator(&nested, None, "grid"), "__u8 grid[2][4]");
        let s = IrType::Struct(vec![
            IrField {
                name: "pid".to_string(),
                ty: prim(PrimitiveType::U32),
                alias: None,
            },
            IrField {
                name: "count".to_string(),
                ty: prim(PrimitiveType::U64),
                alias: Some("Counter".to_string()),
            },
        ]);
        assert_eq!(
            declarator(&s, None, "ev"),
            "struct { __u32 pid; Counter count; } ev"
        );
    }

    #[test]
    fn test_abstract_type_names() {
        let arr = TypeUse::plain(IrType::Array(Box::new(prim(PrimitiveType::U8)), 16));
        assert_eq!(type_name(&arr), "__u8[16]");
        assert_eq!(type_name(&TypeUse::plain(prim(PrimitiveType::Bool))), "__u8");
    }

    #[test]
    fn test_ownership_note() {
        let permitted: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ownership_note(&Ownership::Shared, &permitted), "shared by a, b");
        assert_eq!(
            ownership_note(&Ownership::Program("a".to_string()), &permitted),
            "local to a"
        );
    }

    #[test]
    fn test_identifier_validation() {
        assert!(check_ident("a__hits").is_ok());
        assert!(check_ident("9lives").is_err());
        assert!(check_ident("has-dash").is_err());
    }

    #[test]
    fn test_global_function_named_like_local_map() {
        let (name, first, second) = collision(
            r#"
(defn a__hits [] u32 (return 1))
(defprogram a :kind xdp :attach "eth0"
  (defmap hits :type hash :key u32 :value u64 :max-entries 8)
  (defn main [] (when (> (a__hits) 0) (map-update hits 1 1)) (return XDP_PASS)))
"#,
        );
        assert_eq!(name, "a__hits");
        assert_eq!(first, "map hits");
        assert_eq!(second, "global function a__hits");
    }

    #[test]
    fn test_program_named_like_local_map() {
        let (name, first, second) = collision(
            r#"
(defprogram a :kind xdp :attach "eth0"
  (defmap hits :type hash :key u32 :value u64 :max-entries 8)
  (defn main [] (map-update hits 1 1) (return XDP_PASS)))
(defprogram a__hits :kind xdp :attach "eth1"
  (defn main [] (return XDP_PASS)))
"#,
        );
        assert_eq!(name, "a__hits");
        assert_eq!(first, "map hits");
        assert_eq!(second, "program a__hits");
    }

    #[test]
    fn test_program_helper_named_like_shared_map() {
        let (name, first, second) = collision(
            r#"
(defmap a__step :type array :key u32 :value u64 :max-entries 1)
(defprogram a :kind xdp :attach "eth0"
  (defn main [] (when (> (step) 0) (map-update a__step 0 1)) (return XDP_PASS))
  (defn step [] u32 (return 1)))
(defprogram b :kind xdp :attach "eth1"
  (defn main [] (map-delete a__step 0) (return XDP_PASS)))
"#,
        );
        assert_eq!(name, "a__step");
        assert_eq!(first, "map a__step");
        assert_eq!(second, "function step of program a");
    }

    #[test]
    fn test_local_variable_named_like_canonical_map() {
        let (name, first, second) = collision(
            r#"
(defprogram a :kind xdp :attach "eth0"
  (defmap hits :type hash :key u32 :value u64 :max-entries 8)
  (defn main [] (let a__hits 1) (map-update hits 1 a__hits) (return XDP_PASS)))
"#,
        );
        assert_eq!(name, "a__hits");
        assert_eq!(first, "map hits");
        assert_eq!(second, "local variable of hs_run_a");
    }

    #[test]
    fn test_distinct_symbols_are_listed() {
        let pipeline = Compiler::default()
            .run(
                r#"
(defconfig Settings (threshold u32 1))
(defprogram a :kind xdp :attach "eth0"
  (defmap hits :type hash :key u32 :value u64 :max-entries 8)
  (defn main [] (map-update hits 1 (. Settings threshold)) (return XDP_PASS)))
"#,
            )
            .unwrap();
        let symbols: Vec<&str> = pipeline.contract.symbols().collect();
        assert_eq!(symbols, vec!["a", "a__Settings", "a__hits", "hs_load_a__Settings", "hs_run_a"]);
    }
}

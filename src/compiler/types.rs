//! # Symbol Table and Type Checking for Hookscript
//!
//! Builds the symbol table and the two alias side tables, resolves every
//! declared type to its structural form and rejects ill-typed programs
//! before the multi-program core runs.

use crate::compiler::ir::{literal_type, loop_counter_type, IrField, IrType, PrimitiveType, TypeUse};
use crate::parser::{
    ConfigDecl, Declaration, Expression, FunctionDecl, HookKind, MapDecl, MapType, Program,
    ProgramDecl, Span, Statement, TypeExpr, UnaryOp,
};
use crate::{Error, Result};
use lazy_static::lazy_static;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Prefix reserved for compiler-generated C identifiers
pub const RESERVED_PREFIX: &str = "hs_";

/// Name of the context parameter of every generated function
pub const CONTEXT_PARAM: &str = "ctx";

lazy_static! {
    /// C11 keywords plus the GNU spellings clang accepts in BPF sources
    static ref C_KEYWORDS: HashSet<&'static str> = [
        "auto", "break", "case", "char", "const", "continue", "default", "do", "double",
        "else", "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long",
        "register", "restrict", "return", "short", "signed", "sizeof", "static", "struct",
        "switch", "typedef", "union", "unsigned", "void", "volatile", "while", "_Alignas",
        "_Alignof", "_Atomic", "_Bool", "_Complex", "_Generic", "_Imaginary", "_Noreturn",
        "_Static_assert", "_Thread_local", "asm", "typeof",
    ]
    .into_iter()
    .collect();

    /// Return-code constants provided by the kernel headers, per hook kind
    static ref HOOK_CONSTANTS: HashMap<&'static str, (HookKind, i64)> = {
        let mut m = HashMap::new();
        m.insert("XDP_ABORTED", (HookKind::Xdp, 0));
        m.insert("XDP_DROP", (HookKind::Xdp, 1));
        m.insert("XDP_PASS", (HookKind::Xdp, 2));
        m.insert("XDP_TX", (HookKind::Xdp, 3));
        m.insert("XDP_REDIRECT", (HookKind::Xdp, 4));
        m.insert("TC_ACT_UNSPEC", (HookKind::Tc, -1));
        m.insert("TC_ACT_OK", (HookKind::Tc, 0));
        m.insert("TC_ACT_SHOT", (HookKind::Tc, 2));
        m.insert("TC_ACT_PIPE", (HookKind::Tc, 3));
        m.insert("TC_ACT_REDIRECT", (HookKind::Tc, 7));
        m
    };
}

/// Look up a hook return-code constant
pub fn hook_constant(name: &str) -> Option<(HookKind, i64)> {
    HOOK_CONSTANTS.get(name).copied()
}

/// Result a program falls back to when its entry ends without `return`
pub fn default_action(kind: HookKind) -> &'static str {
    match kind {
        HookKind::Xdp => "XDP_PASS",
        HookKind::Tc => "TC_ACT_OK",
        HookKind::Kprobe => "0",
    }
}

/// A global type alias
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAlias {
    /// Alias name
    pub name: String,
    /// Type expression as written
    pub source: TypeExpr,
    /// Structural type
    pub ty: IrType,
}

/// Alias name → underlying type, in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeAliasTable {
    entries: Vec<TypeAlias>,
}

impl TypeAliasTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an alias; each alias binds exactly once per unit
    pub fn insert(&mut self, name: &str, source: &TypeExpr, span: Span) -> Result<()> {
        if PrimitiveType::parse(name).is_some() {
            return Err(Error::type_error(
                format!("Alias '{}' shadows a primitive type", name),
                span.line,
                span.col,
            ));
        }
        if self.get(name).is_some() {
            return Err(Error::type_error(
                format!("Type alias '{}' is already defined", name),
                span.line,
                span.col,
            ));
        }
        let ty = self.resolve(source, span)?;
        if ty == IrType::Void {
            return Err(Error::type_error(
                format!("Alias '{}' cannot name void", name),
                span.line,
                span.col,
            ));
        }
        self.entries.push(TypeAlias {
            name: name.to_string(),
            source: source.clone(),
            ty,
        });
        Ok(())
    }

    /// Alias by name
    pub fn get(&self, name: &str) -> Option<&TypeAlias> {
        self.entries.iter().find(|a| a.name == name)
    }

    /// Aliases in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &TypeAlias> {
        self.entries.iter()
    }

    /// Number of aliases
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no alias is defined
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves a type expression to its structural type
    pub fn resolve(&self, ty: &TypeExpr, span: Span) -> Result<IrType> {
        match ty {
            TypeExpr::Named(name) => {
                if name == "void" {
                    return Ok(IrType::Void);
                }
                if let Some(p) = PrimitiveType::parse(name) {
                    return Ok(IrType::prim(p));
                }
                self.get(name).map(|a| a.ty.clone()).ok_or_else(|| {
                    Error::type_error(format!("Unknown type '{}'", name), span.line, span.col)
                })
            }
            TypeExpr::Array(elem, count) => {
                let elem = self.resolve(elem, span)?;
                if elem == IrType::Void {
                    return Err(Error::type_error("Array of void", span.line, span.col));
                }
                Ok(IrType::Array(Box::new(elem), *count))
            }
            TypeExpr::Struct(fields) => {
                let mut seen = HashSet::new();
                let mut out = Vec::with_capacity(fields.len());
                for field in fields {
                    check_field_name(&field.name, span)?;
                    if !seen.insert(field.name.as_str()) {
                        return Err(Error::type_error(
                            format!("Duplicate struct field '{}'", field.name),
                            span.line,
                            span.col,
                        ));
                    }
                    let resolved = self.resolve_use(&field.ty, span)?;
                    out.push(IrField {
                        name: field.name.clone(),
                        ty: resolved.ty,
                        alias: resolved.alias,
                    });
                }
                Ok(IrType::Struct(out))
            }
        }
    }

    /// Resolves a type expression, keeping the alias it was spelled with
    pub fn resolve_use(&self, ty: &TypeExpr, span: Span) -> Result<TypeUse> {
        let resolved = self.resolve(ty, span)?;
        let alias = match ty {
            TypeExpr::Named(name) if self.get(name).is_some() => Some(name.clone()),
            _ => None,
        };
        Ok(TypeUse {
            ty: resolved,
            alias,
        })
    }
}

/// Scope of a variable: optional program plus function
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarScope {
    /// Owning program, `None` inside global functions
    pub program: Option<String>,
    /// Function name
    pub function: String,
}

/// (scope, variable) → alias used at its declaration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarAliasTable {
    entries: BTreeMap<(VarScope, String), String>,
}

impl VarAliasTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, scope: &VarScope, variable: &str, alias: &str) {
        self.entries
            .insert((scope.clone(), variable.to_string()), alias.to_string());
    }

    /// Alias a variable was declared with
    pub fn alias_of(&self, program: Option<&str>, function: &str, variable: &str) -> Option<&str> {
        let key = (
            VarScope {
                program: program.map(str::to_string),
                function: function.to_string(),
            },
            variable.to_string(),
        );
        self.entries.get(&key).map(String::as_str)
    }

    /// Number of recorded variables
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Both alias side tables; immutable once checking is done
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasTables {
    /// Global type aliases
    pub types: TypeAliasTable,
    /// Variable aliases
    pub vars: VarAliasTable,
}

/// Function signature
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    /// Parameter types
    pub params: Vec<IrType>,
    /// Return type
    pub ret: TypeUse,
}

/// Config schema as first declared
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSymbol {
    /// Ordered fields
    pub fields: Vec<IrField>,
    /// Defaults in field order
    pub defaults: Vec<Option<i64>>,
}

/// Map shape as first declared
#[derive(Debug, Clone, PartialEq)]
pub struct MapSymbol {
    /// Map flavour
    pub map_type: MapType,
    /// Key type
    pub key: Option<TypeUse>,
    /// Value type
    pub value: TypeUse,
    /// Capacity
    pub max_entries: u32,
    /// Declared at top level
    pub global: bool,
    /// Programs declaring it in their body
    pub declared_in: BTreeSet<String>,
}

impl MapSymbol {
    /// Whether code in `program` may name this map
    pub fn visible_in(&self, program: Option<&str>) -> bool {
        self.global || program.is_some_and(|p| self.declared_in.contains(p))
    }
}

/// Program-level symbols
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramSymbol {
    /// Hook kind
    pub kind: HookKind,
    /// Entry function name
    pub entry: String,
    /// Functions by name, entry included
    pub functions: BTreeMap<String, FunctionSig>,
}

/// Everything the checker learned about top-level names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    /// User constants
    pub constants: BTreeMap<String, i64>,
    /// Configs
    pub configs: BTreeMap<String, ConfigSymbol>,
    /// Maps
    pub maps: BTreeMap<String, MapSymbol>,
    /// Global functions
    pub functions: BTreeMap<String, FunctionSig>,
    /// Programs
    pub programs: BTreeMap<String, ProgramSymbol>,
}

impl SymbolTable {
    /// Whether a name denotes a config or map
    pub fn is_resource(&self, name: &str) -> bool {
        self.configs.contains_key(name) || self.maps.contains_key(name)
    }
}

/// Annotated declaration list plus side tables
#[derive(Debug, Clone)]
pub struct CheckedUnit {
    /// Declarations with resolved `let` types
    pub program: Program,
    /// Symbol table
    pub symbols: SymbolTable,
    /// Alias side tables
    pub aliases: AliasTables,
    /// Non-fatal diagnostics
    pub warnings: Vec<String>,
}

impl CheckedUnit {
    /// Program declarations in source order
    pub fn programs(&self) -> impl Iterator<Item = &ProgramDecl> {
        self.program.declarations.iter().filter_map(|d| match d {
            Declaration::Program(p) => Some(p),
            _ => None,
        })
    }

    /// Global function declarations in source order
    pub fn global_functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.program.declarations.iter().filter_map(|d| match d {
            Declaration::GlobalFunction(f) => Some(f),
            _ => None,
        })
    }

    /// Config declarations in source order
    pub fn configs(&self) -> impl Iterator<Item = &ConfigDecl> {
        self.program.declarations.iter().filter_map(|d| match d {
            Declaration::Config(c) => Some(c),
            _ => None,
        })
    }
}

/// Per-function checking state
struct FnCtx {
    scope: VarScope,
    kind: Option<HookKind>,
    is_entry: bool,
    ret: TypeUse,
    env: Vec<HashMap<String, IrType>>,
    declared: HashSet<String>,
}

impl FnCtx {
    fn lookup(&self, name: &str) -> Option<&IrType> {
        self.env.iter().rev().find_map(|scope| scope.get(name))
    }

    fn define(&mut self, name: &str, ty: IrType) {
        if let Some(scope) = self.env.last_mut() {
            scope.insert(name.to_string(), ty);
        }
    }
}

/// Type checker: symbol collection, type resolution and body checking
pub struct TypeChecker {
    symbols: SymbolTable,
    aliases: AliasTables,
    warnings: Vec<String>,
}

impl TypeChecker {
    /// Creates a new type checker
    pub fn new() -> Self {
        Self {
            symbols: SymbolTable::default(),
            aliases: AliasTables::default(),
            warnings: Vec::new(),
        }
    }

    /// Type check a declaration list, annotating `let` statements in place
    pub fn check(mut self, mut program: Program) -> Result<CheckedUnit> {
        self.collect_types(&program)?;
        self.collect_symbols(&program)?;
        self.check_symbol_clashes(&program)?;

        for decl in program.declarations.iter_mut() {
            match decl {
                Declaration::GlobalFunction(f) => {
                    let sig = self.symbols.functions.get(&f.name).cloned();
                    if let Some(sig) = sig {
                        self.check_function(None, None, f, false, sig)?;
                    }
                }
                Declaration::Program(p) => {
                    let name = p.name.clone();
                    let kind = p.kind;
                    for (i, f) in p.functions.iter_mut().enumerate() {
                        let sig = self
                            .symbols
                            .programs
                            .get(&name)
                            .and_then(|s| s.functions.get(&f.name))
                            .cloned();
                        if let Some(sig) = sig {
                            self.check_function(Some(&name), Some(kind), f, i == 0, sig)?;
                        }
                    }
                }
                _ => {}
            }
        }

        self.check_recursion(&program)?;

        Ok(CheckedUnit {
            program,
            symbols: self.symbols,
            aliases: self.aliases,
            warnings: self.warnings,
        })
    }

    fn collect_types(&mut self, program: &Program) -> Result<()> {
        for decl in &program.declarations {
            match decl {
                Declaration::TypeAlias(alias) => {
                    check_identifier(&alias.name, alias.span)?;
                    self.aliases.types.insert(&alias.name, &alias.ty, alias.span)?;
                }
                Declaration::Constant(c) => {
                    check_identifier(&c.name, c.span)?;
                    if hook_constant(&c.name).is_some()
                        || self.symbols.constants.insert(c.name.clone(), c.value).is_some()
                    {
                        return Err(Error::type_error(
                            format!("Constant '{}' is already defined", c.name),
                            c.span.line,
                            c.span.col,
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn collect_symbols(&mut self, program: &Program) -> Result<()> {
        for decl in &program.declarations {
            match decl {
                Declaration::Config(c) => {
                    check_identifier(&c.name, c.span)?;
                    let mut fields = Vec::with_capacity(c.fields.len());
                    let mut seen = HashSet::new();
                    for field in &c.fields {
                        check_field_name(&field.name, c.span)?;
                        if !seen.insert(field.name.as_str()) {
                            return Err(Error::type_error(
                                format!("Duplicate field '{}' in config '{}'", field.name, c.name),
                                c.span.line,
                                c.span.col,
                            ));
                        }
                        let ty = self.aliases.types.resolve_use(&field.ty, c.span)?;
                        if field.default.is_some() && !ty.ty.is_scalar() {
                            return Err(Error::type_error(
                                format!("Default for non-scalar field '{}'", field.name),
                                c.span.line,
                                c.span.col,
                            ));
                        }
                        fields.push(IrField {
                            name: field.name.clone(),
                            ty: ty.ty,
                            alias: ty.alias,
                        });
                    }
                    self.symbols
                        .configs
                        .entry(c.name.clone())
                        .or_insert(ConfigSymbol {
                            fields,
                            defaults: c.fields.iter().map(|f| f.default).collect(),
                        });
                }
                Declaration::Map(m) => self.collect_map(m, None)?,
                Declaration::GlobalFunction(f) => {
                    check_identifier(&f.name, f.span)?;
                    let sig = self.signature(f)?;
                    if self.symbols.functions.insert(f.name.clone(), sig).is_some() {
                        return Err(Error::type_error(
                            format!("Function '{}' is already defined", f.name),
                            f.span.line,
                            f.span.col,
                        ));
                    }
                }
                Declaration::Program(p) => {
                    check_identifier(&p.name, p.span)?;
                    let mut functions = BTreeMap::new();
                    for f in &p.functions {
                        check_identifier(&f.name, f.span)?;
                        let sig = self.signature(f)?;
                        if functions.insert(f.name.clone(), sig).is_some() {
                            return Err(Error::type_error(
                                format!("Function '{}' is already defined in program '{}'", f.name, p.name),
                                f.span.line,
                                f.span.col,
                            ));
                        }
                    }
                    for m in &p.maps {
                        self.collect_map(m, Some(&p.name))?;
                    }
                    let symbol = ProgramSymbol {
                        kind: p.kind,
                        entry: p.entry().map(|f| f.name.clone()).unwrap_or_default(),
                        functions,
                    };
                    if self.symbols.programs.insert(p.name.clone(), symbol).is_some() {
                        return Err(Error::type_error(
                            format!("Program '{}' is already defined", p.name),
                            p.span.line,
                            p.span.col,
                        ));
                    }
                }
                Declaration::TypeAlias(_) | Declaration::Constant(_) => {}
            }
        }
        Ok(())
    }

    fn collect_map(&mut self, m: &MapDecl, program: Option<&str>) -> Result<()> {
        check_identifier(&m.name, m.span)?;
        let key = match &m.key {
            Some(k) => Some(self.storable(k, m.span)?),
            None => None,
        };
        let value = self.storable(&m.value, m.span)?;
        let entry = self.symbols.maps.entry(m.name.clone()).or_insert(MapSymbol {
            map_type: m.map_type,
            key,
            value,
            max_entries: m.max_entries,
            global: false,
            declared_in: BTreeSet::new(),
        });
        match program {
            Some(p) => {
                entry.declared_in.insert(p.to_string());
            }
            None => entry.global = true,
        }
        Ok(())
    }

    fn storable(&self, ty: &TypeExpr, span: Span) -> Result<TypeUse> {
        let resolved = self.aliases.types.resolve_use(ty, span)?;
        if resolved.ty == IrType::Void {
            return Err(Error::type_error("Maps cannot hold void", span.line, span.col));
        }
        Ok(resolved)
    }

    fn signature(&self, f: &FunctionDecl) -> Result<FunctionSig> {
        let mut params = Vec::with_capacity(f.params.len());
        for p in &f.params {
            let ty = self.aliases.types.resolve_use(&p.ty, f.span)?;
            require_spellable(&ty, &p.name, f.span)?;
            params.push(ty.ty);
        }
        let ret = match &f.ret {
            Some(ty) => self.aliases.types.resolve_use(ty, f.span)?,
            None => TypeUse::plain(IrType::Void),
        };
        if ret.ty != IrType::Void {
            require_spellable(&ret, &f.name, f.span)?;
        }
        Ok(FunctionSig { params, ret })
    }

    /// Resource names share the C identifier space with functions and programs
    fn check_symbol_clashes(&self, program: &Program) -> Result<()> {
        let mut functions: BTreeSet<&str> = self.symbols.functions.keys().map(String::as_str).collect();
        functions.extend(self.symbols.programs.keys().map(String::as_str));
        for p in self.symbols.programs.values() {
            functions.extend(p.functions.keys().map(String::as_str));
        }
        for name in self.symbols.programs.keys() {
            if self.symbols.functions.contains_key(name) {
                return Err(clash(program, name, "a program and a global function"));
            }
        }
        for name in self.symbols.configs.keys() {
            if self.symbols.maps.contains_key(name) {
                // Same name with two shapes: reported by the resource planner
                continue;
            }
            if functions.contains(name.as_str()) {
                return Err(clash(program, name, "a config and a function"));
            }
        }
        for name in self.symbols.maps.keys() {
            if functions.contains(name.as_str()) {
                return Err(clash(program, name, "a map and a function"));
            }
        }
        Ok(())
    }

    fn check_function(
        &mut self,
        program: Option<&str>,
        kind: Option<HookKind>,
        f: &mut FunctionDecl,
        is_entry: bool,
        sig: FunctionSig,
    ) -> Result<()> {
        let scope = VarScope {
            program: program.map(str::to_string),
            function: f.name.clone(),
        };
        let mut cx = FnCtx {
            scope,
            kind,
            is_entry,
            ret: sig.ret.clone(),
            env: vec![HashMap::new()],
            declared: HashSet::new(),
        };

        if is_entry && !f.params.is_empty() {
            return Err(Error::type_error(
                format!("Entry function '{}' takes no parameters", f.name),
                f.span.line,
                f.span.col,
            ));
        }

        for (param, ty) in f.params.iter().zip(sig.params) {
            self.declare_variable(&mut cx, &param.name, f.span)?;
            if let TypeExpr::Named(alias) = &param.ty {
                if self.aliases.types.get(alias).is_some() {
                    self.aliases.vars.record(&cx.scope, &param.name, alias);
                }
            }
            cx.define(&param.name, ty);
        }

        for stmt in f.body.iter_mut() {
            self.check_statement(&mut cx, stmt)?;
        }
        Ok(())
    }

    fn declare_variable(&self, cx: &mut FnCtx, name: &str, span: Span) -> Result<()> {
        check_identifier(name, span)?;
        if !cx.declared.insert(name.to_string()) {
            return Err(Error::type_error(
                format!("Variable '{}' is already declared in '{}'", name, cx.scope.function),
                span.line,
                span.col,
            ));
        }
        if self.symbols.is_resource(name) || self.symbols.constants.contains_key(name) {
            return Err(Error::type_error(
                format!("Variable '{}' shadows a top-level declaration", name),
                span.line,
                span.col,
            ));
        }
        Ok(())
    }

    fn check_statement(&mut self, cx: &mut FnCtx, stmt: &mut Statement) -> Result<()> {
        match stmt {
            Statement::Let {
                name,
                ty,
                value,
                resolved,
                span,
            } => {
                let value_ty = self.infer(cx, value)?;
                let declared = match ty {
                    Some(declared) => {
                        let declared = self.aliases.types.resolve_use(declared, *span)?;
                        if !assignable(&declared.ty, &value_ty) {
                            return Err(Error::type_error(
                                format!(
                                    "Cannot initialize '{}' of type {} with {}",
                                    name, declared.ty, value_ty
                                ),
                                span.line,
                                span.col,
                            ));
                        }
                        declared
                    }
                    None => TypeUse::plain(value_ty),
                };
                if !declared.ty.is_scalar() && !matches!(declared.ty, IrType::Struct(_)) {
                    return Err(Error::type_error(
                        format!("Variable '{}' must be a scalar or struct, got {}", name, declared.ty),
                        span.line,
                        span.col,
                    ));
                }
                self.declare_variable(cx, name, *span)?;
                if let Some(alias) = &declared.alias {
                    self.aliases.vars.record(&cx.scope, name, alias);
                }
                cx.define(name, declared.ty.clone());
                *resolved = Some(declared.ty);
            }

            Statement::Assign { name, value, span } => {
                let target = cx.lookup(name).cloned().ok_or_else(|| {
                    Error::type_error(
                        format!("Assignment to undeclared variable '{}'", name),
                        span.line,
                        span.col,
                    )
                })?;
                let value_ty = self.infer(cx, value)?;
                if !assignable(&target, &value_ty) {
                    return Err(Error::type_error(
                        format!("Cannot assign {} to '{}' of type {}", value_ty, name, target),
                        span.line,
                        span.col,
                    ));
                }
            }

            Statement::If {
                condition,
                then_branch,
                else_branch,
                span,
            } => {
                let cond_ty = self.infer(cx, condition)?;
                if !cond_ty.is_scalar() {
                    return Err(Error::type_error(
                        format!("Condition must be scalar, got {}", cond_ty),
                        span.line,
                        span.col,
                    ));
                }
                cx.env.push(HashMap::new());
                for s in then_branch.iter_mut() {
                    self.check_statement(cx, s)?;
                }
                cx.env.pop();
                if let Some(else_branch) = else_branch {
                    cx.env.push(HashMap::new());
                    for s in else_branch.iter_mut() {
                        self.check_statement(cx, s)?;
                    }
                    cx.env.pop();
                }
            }

            Statement::For {
                variable,
                start,
                end,
                body,
                span,
            } => {
                if end < start {
                    self.warnings.push(format!(
                        "line {}: loop over {}..{} never runs",
                        span.line, start, end
                    ));
                }
                self.declare_variable(cx, variable, *span)?;
                cx.env.push(HashMap::new());
                cx.define(variable, IrType::prim(loop_counter_type(*start)));
                for s in body.iter_mut() {
                    self.check_statement(cx, s)?;
                }
                cx.env.pop();
            }

            Statement::Return { value, span } => match value {
                Some(value) => {
                    let value_ty = self.infer(cx, value)?;
                    let ok = if cx.is_entry {
                        value_ty.is_scalar()
                    } else {
                        cx.ret.ty != IrType::Void && assignable(&cx.ret.ty, &value_ty)
                    };
                    if !ok {
                        return Err(Error::type_error(
                            format!(
                                "Function '{}' cannot return {}",
                                cx.scope.function, value_ty
                            ),
                            span.line,
                            span.col,
                        ));
                    }
                }
                None => {
                    if !cx.is_entry && cx.ret.ty != IrType::Void {
                        return Err(Error::type_error(
                            format!("Function '{}' must return {}", cx.scope.function, cx.ret.ty),
                            span.line,
                            span.col,
                        ));
                    }
                }
            },

            Statement::Expression(expr) => {
                if !matches!(expr, Expression::Call { .. }) {
                    let span = expr.span();
                    self.warnings.push(format!(
                        "line {}: expression statement has no effect",
                        span.line
                    ));
                }
                self.infer(cx, expr)?;
            }
        }
        Ok(())
    }

    fn infer(&self, cx: &FnCtx, expr: &Expression) -> Result<IrType> {
        match expr {
            Expression::IntLiteral(n, _) => Ok(IrType::prim(literal_type(*n))),
            Expression::BoolLiteral(_, _) => Ok(IrType::prim(PrimitiveType::Bool)),

            Expression::Variable(name, span) => {
                if let Some(ty) = cx.lookup(name) {
                    return Ok(ty.clone());
                }
                if let Some(value) = self.symbols.constants.get(name) {
                    return Ok(IrType::prim(literal_type(*value)));
                }
                if let Some((kind, _)) = hook_constant(name) {
                    if cx.kind == Some(kind) {
                        return Ok(IrType::prim(PrimitiveType::I32));
                    }
                    return Err(Error::type_error(
                        format!("'{}' is only available in {} programs", name, kind),
                        span.line,
                        span.col,
                    ));
                }
                if self.symbols.configs.contains_key(name) {
                    return Err(Error::type_error(
                        format!("Config '{}' must be read through (. {} field)", name, name),
                        span.line,
                        span.col,
                    ));
                }
                if self.symbols.maps.contains_key(name) {
                    return Err(Error::type_error(
                        format!("Map '{}' can only be used with map builtins", name),
                        span.line,
                        span.col,
                    ));
                }
                Err(Error::type_error(
                    format!("Undefined variable '{}'", name),
                    span.line,
                    span.col,
                ))
            }

            Expression::Binary {
                op,
                left,
                right,
                span,
            } => {
                let lt = self.infer(cx, left)?;
                let rt = self.infer(cx, right)?;
                if !lt.is_scalar() || !rt.is_scalar() {
                    return Err(Error::type_error(
                        format!("Operator '{}' needs scalar operands, got {} and {}", op.c_symbol(), lt, rt),
                        span.line,
                        span.col,
                    ));
                }
                if op.is_predicate() {
                    Ok(IrType::prim(PrimitiveType::Bool))
                } else if matches!(**left, Expression::IntLiteral(..)) {
                    Ok(rt)
                } else {
                    Ok(lt)
                }
            }

            Expression::Unary { op, operand, span } => {
                let ty = self.infer(cx, operand)?;
                if !ty.is_scalar() {
                    return Err(Error::type_error(
                        format!("Operator '{}' needs a scalar operand, got {}", op.c_symbol(), ty),
                        span.line,
                        span.col,
                    ));
                }
                Ok(match op {
                    UnaryOp::Not => IrType::prim(PrimitiveType::Bool),
                    UnaryOp::Neg | UnaryOp::BitNot => ty,
                })
            }

            Expression::Field { base, field, span } => {
                if let Expression::Variable(name, _) = base.as_ref() {
                    if cx.lookup(name).is_none() {
                        if let Some(config) = self.symbols.configs.get(name) {
                            let f = config.fields.iter().find(|f| &f.name == field).ok_or_else(|| {
                                Error::type_error(
                                    format!("Config '{}' has no field '{}'", name, field),
                                    span.line,
                                    span.col,
                                )
                            })?;
                            return readable(&f.ty, field, *span);
                        }
                    }
                }
                let base_ty = self.infer(cx, base)?;
                let f = base_ty.field(field).ok_or_else(|| {
                    Error::type_error(
                        format!("Type {} has no field '{}'", base_ty, field),
                        span.line,
                        span.col,
                    )
                })?;
                readable(&f.ty, field, *span)
            }

            Expression::Make {
                type_name,
                fields,
                span,
            } => {
                let alias = self.aliases.types.get(type_name).ok_or_else(|| {
                    Error::type_error(
                        format!("Unknown struct type '{}'", type_name),
                        span.line,
                        span.col,
                    )
                })?;
                if !matches!(alias.ty, IrType::Struct(_)) {
                    return Err(Error::type_error(
                        format!("'{}' is not a struct type", type_name),
                        span.line,
                        span.col,
                    ));
                }
                let mut seen = HashSet::new();
                for (name, value) in fields {
                    if !seen.insert(name.as_str()) {
                        return Err(Error::type_error(
                            format!("Field '{}' initialized twice", name),
                            span.line,
                            span.col,
                        ));
                    }
                    let field = alias.ty.field(name).ok_or_else(|| {
                        Error::type_error(
                            format!("Struct '{}' has no field '{}'", type_name, name),
                            span.line,
                            span.col,
                        )
                    })?;
                    let value_ty = self.infer(cx, value)?;
                    if !assignable(&field.ty, &value_ty) {
                        return Err(Error::type_error(
                            format!("Field '{}' expects {}, got {}", name, field.ty, value_ty),
                            span.line,
                            span.col,
                        ));
                    }
                }
                Ok(alias.ty.clone())
            }

            Expression::Call { name, args, span } => self.infer_call(cx, name, args, *span),
        }
    }

    fn infer_call(&self, cx: &FnCtx, name: &str, args: &[Expression], span: Span) -> Result<IrType> {
        let err = |msg: String| Error::type_error(msg, span.line, span.col);
        let arity = |n: usize| -> Result<()> {
            if args.len() != n {
                return Err(err(format!("'{}' expects {} argument(s), got {}", name, n, args.len())));
            }
            Ok(())
        };
        let program = cx.scope.program.as_deref();

        match name {
            "map-lookup" | "map-update" | "map-delete" | "emit" => {
                let (map_name, map) = match args.first() {
                    Some(Expression::Variable(m, _)) => {
                        let map = self
                            .symbols
                            .maps
                            .get(m)
                            .filter(|s| s.visible_in(program))
                            .ok_or_else(|| err(format!("Unknown map '{}'", m)))?;
                        (m, map)
                    }
                    _ => return Err(err(format!("'{}' expects a map name first", name))),
                };
                let is_ringbuf = map.map_type == MapType::Ringbuf;
                if (name == "emit") != is_ringbuf {
                    return Err(err(if is_ringbuf {
                        format!("Ring buffer '{}' only supports emit", map_name)
                    } else {
                        format!("emit needs a ring buffer, '{}' is a {} map", map_name, map.map_type.as_str())
                    }));
                }
                let expect = |arg: &Expression, want: &IrType, what: &str| -> Result<()> {
                    let got = self.infer(cx, arg)?;
                    if !assignable(want, &got) {
                        return Err(err(format!("{} of '{}' expects {}, got {}", what, map_name, want, got)));
                    }
                    Ok(())
                };
                let key_ty = map.key.as_ref().map(|k| k.ty.clone()).unwrap_or(IrType::Void);
                match name {
                    "map-lookup" => {
                        arity(2)?;
                        expect(&args[1], &key_ty, "key")?;
                        readable(&map.value.ty, map_name, span)
                    }
                    "map-update" => {
                        arity(3)?;
                        expect(&args[1], &key_ty, "key")?;
                        expect(&args[2], &map.value.ty, "value")?;
                        Ok(IrType::Void)
                    }
                    "map-delete" => {
                        arity(2)?;
                        expect(&args[1], &key_ty, "key")?;
                        Ok(IrType::Void)
                    }
                    _ => {
                        arity(2)?;
                        expect(&args[1], &map.value.ty, "event")?;
                        Ok(IrType::Void)
                    }
                }
            }

            "packet-len" | "ifindex" | "pid" | "ktime" | "arg" => {
                let kind = cx
                    .kind
                    .ok_or_else(|| err(format!("'{}' is only available inside programs", name)))?;
                match name {
                    "packet-len" | "ifindex" => {
                        arity(0)?;
                        if kind == HookKind::Kprobe {
                            return Err(err(format!("'{}' is not available in kprobe programs", name)));
                        }
                        Ok(IrType::prim(PrimitiveType::U32))
                    }
                    "pid" => {
                        arity(0)?;
                        Ok(IrType::prim(PrimitiveType::U32))
                    }
                    "ktime" => {
                        arity(0)?;
                        Ok(IrType::prim(PrimitiveType::U64))
                    }
                    _ => {
                        arity(1)?;
                        if kind != HookKind::Kprobe {
                            return Err(err("'arg' is only available in kprobe programs".to_string()));
                        }
                        match &args[0] {
                            Expression::IntLiteral(n, _) if (1..=5).contains(n) => {
                                Ok(IrType::prim(PrimitiveType::U64))
                            }
                            _ => Err(err("'arg' expects a literal index between 1 and 5".to_string())),
                        }
                    }
                }
            }

            _ => {
                let owner = program.and_then(|p| self.symbols.programs.get(p));
                let local = owner.and_then(|p| p.functions.get(name));
                let sig = local
                    .or_else(|| self.symbols.functions.get(name))
                    .ok_or_else(|| err(format!("Undefined function '{}'", name)))?;
                if local.is_some() && owner.is_some_and(|p| p.entry == name) {
                    return Err(err(format!("Entry function '{}' cannot be called", name)));
                }
                arity(sig.params.len())?;
                for (i, (arg, want)) in args.iter().zip(&sig.params).enumerate() {
                    let got = self.infer(cx, arg)?;
                    if !assignable(want, &got) {
                        return Err(err(format!(
                            "Argument {} of '{}' expects {}, got {}",
                            i + 1,
                            name,
                            want,
                            got
                        )));
                    }
                }
                Ok(sig.ret.ty.clone())
            }
        }
    }

    /// Inlined helpers cannot recurse
    fn check_recursion(&self, program: &Program) -> Result<()> {
        let mut graph: BTreeMap<String, (BTreeSet<String>, Span)> = BTreeMap::new();
        for decl in &program.declarations {
            match decl {
                Declaration::GlobalFunction(f) => {
                    graph.insert(f.name.clone(), (called_names(f, None, &self.symbols), f.span));
                }
                Declaration::Program(p) => {
                    for f in &p.functions {
                        graph.insert(
                            format!("{}::{}", p.name, f.name),
                            (called_names(f, Some(&p.name), &self.symbols), f.span),
                        );
                    }
                }
                _ => {}
            }
        }

        fn visit(
            node: &str,
            graph: &BTreeMap<String, (BTreeSet<String>, Span)>,
            stack: &mut Vec<String>,
            done: &mut HashSet<String>,
        ) -> Option<String> {
            if done.contains(node) {
                return None;
            }
            if stack.iter().any(|n| n == node) {
                return Some(node.to_string());
            }
            stack.push(node.to_string());
            if let Some((callees, _)) = graph.get(node) {
                for callee in callees {
                    if let Some(cycle) = visit(callee, graph, stack, done) {
                        return Some(cycle);
                    }
                }
            }
            stack.pop();
            done.insert(node.to_string());
            None
        }

        let mut done = HashSet::new();
        for node in graph.keys() {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(node, &graph, &mut stack, &mut done) {
                let span = graph.get(&cycle).map(|(_, s)| *s).unwrap_or_default();
                return Err(Error::type_error(
                    format!("Recursive call through '{}'", cycle),
                    span.line,
                    span.col,
                ));
            }
        }
        Ok(())
    }

    /// Get warnings generated during type checking
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Call-graph node names reached from a function body
fn called_names(f: &FunctionDecl, program: Option<&str>, symbols: &SymbolTable) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for stmt in &f.body {
        visit_statement_calls(stmt, &mut |callee| {
            let local = program
                .and_then(|p| symbols.programs.get(p))
                .is_some_and(|p| p.functions.contains_key(callee));
            match program {
                Some(p) if local => {
                    names.insert(format!("{}::{}", p, callee));
                }
                _ if symbols.functions.contains_key(callee) => {
                    names.insert(callee.to_string());
                }
                _ => {}
            }
        });
    }
    names
}

/// Visit every called name in a statement tree
pub(crate) fn visit_statement_calls(stmt: &Statement, f: &mut dyn FnMut(&str)) {
    match stmt {
        Statement::Let { value, .. } | Statement::Assign { value, .. } => visit_expression_calls(value, f),
        Statement::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            visit_expression_calls(condition, f);
            then_branch.iter().for_each(|s| visit_statement_calls(s, f));
            if let Some(else_branch) = else_branch {
                else_branch.iter().for_each(|s| visit_statement_calls(s, f));
            }
        }
        Statement::For { body, .. } => body.iter().for_each(|s| visit_statement_calls(s, f)),
        Statement::Return { value, .. } => {
            if let Some(value) = value {
                visit_expression_calls(value, f);
            }
        }
        Statement::Expression(e) => visit_expression_calls(e, f),
    }
}

fn visit_expression_calls(expr: &Expression, f: &mut dyn FnMut(&str)) {
    match expr {
        Expression::Call { name, args, .. } => {
            f(name);
            args.iter().for_each(|a| visit_expression_calls(a, f));
        }
        Expression::Binary { left, right, .. } => {
            visit_expression_calls(left, f);
            visit_expression_calls(right, f);
        }
        Expression::Unary { operand, .. } => visit_expression_calls(operand, f),
        Expression::Field { base, .. } => visit_expression_calls(base, f),
        Expression::Make { fields, .. } => fields.iter().for_each(|(_, e)| visit_expression_calls(e, f)),
        Expression::IntLiteral(..) | Expression::BoolLiteral(..) | Expression::Variable(..) => {}
    }
}

/// Scalars convert implicitly; aggregates must match structurally
fn assignable(target: &IrType, value: &IrType) -> bool {
    (target.is_scalar() && value.is_scalar()) || target.same_layout(value)
}

fn readable(ty: &IrType, what: &str, span: Span) -> Result<IrType> {
    if matches!(ty, IrType::Array(..)) {
        return Err(Error::type_error(
            format!("Array '{}' cannot be read by value", what),
            span.line,
            span.col,
        ));
    }
    Ok(ty.clone())
}

/// Aggregates in signatures must be spelled through an alias
fn require_spellable(ty: &TypeUse, what: &str, span: Span) -> Result<()> {
    if ty.ty.is_scalar() || (ty.alias.is_some() && matches!(ty.ty, IrType::Struct(_))) {
        return Ok(());
    }
    Err(Error::type_error(
        format!("'{}' must be a scalar or a struct alias, got {}", what, ty.ty),
        span.line,
        span.col,
    ))
}

fn check_identifier(name: &str, span: Span) -> Result<()> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(Error::type_error(
            format!("'{}' is not a valid identifier", name),
            span.line,
            span.col,
        ));
    }
    if name.starts_with(RESERVED_PREFIX) {
        return Err(Error::type_error(
            format!("'{}' uses the reserved prefix '{}'", name, RESERVED_PREFIX),
            span.line,
            span.col,
        ));
    }
    if name == CONTEXT_PARAM {
        return Err(Error::type_error(
            format!("'{}' is reserved for the hook context", name),
            span.line,
            span.col,
        ));
    }
    check_field_name(name, span)
}

/// Member names only need to avoid C keywords
fn check_field_name(name: &str, span: Span) -> Result<()> {
    if C_KEYWORDS.contains(name) {
        return Err(Error::type_error(
            format!("'{}' is a C keyword", name),
            span.line,
            span.col,
        ));
    }
    Ok(())
}

fn clash(program: &Program, name: &str, what: &str) -> Error {
    let span = program
        .declarations
        .iter()
        .find(|d| d.name() == name)
        .map(Declaration::span)
        .unwrap_or_default();
    Error::type_error(format!("'{}' names both {}", name, what), span.line, span.col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SExprParser, SExprScanner};

    fn check(source: &str) -> Result<CheckedUnit> {
        let tokens = SExprScanner::new(source).scan_tokens()?;
        let program = SExprParser::new(tokens).parse()?;
        TypeChecker::new().check(program)
    }

    #[test]
    fn test_alias_tables_record_declared_alias() {
        let unit = check(
            r#"
(deftype Counter u64)
(defprogram counter :kind xdp :attach "eth0"
  (defn main []
    (let (pkt_count Counter) 0)
    (let plain 1)
    (return XDP_PASS)))
"#,
        )
        .unwrap();

        let counter = unit.aliases.types.get("Counter").unwrap();
        assert_eq!(counter.ty, IrType::prim(PrimitiveType::U64));
        assert_eq!(
            unit.aliases.vars.alias_of(Some("counter"), "main", "pkt_count"),
            Some("Counter")
        );
        assert_eq!(unit.aliases.vars.alias_of(Some("counter"), "main", "plain"), None);
        assert_eq!(unit.aliases.vars.len(), 1);
    }

    #[test]
    fn test_let_is_annotated() {
        let unit = check(
            r#"
(defprogram p :kind kprobe :attach "do_sys_open"
  (defn main []
    (let t (ktime))
    (return 0)))
"#,
        )
        .unwrap();
        let Declaration::Program(p) = &unit.program.declarations[0] else {
            panic!("expected program");
        };
        match &p.functions[0].body[0] {
            Statement::Let { resolved, .. } => {
                assert_eq!(resolved, &Some(IrType::prim(PrimitiveType::U64)))
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let err = check(
            r#"
(defn f [] u32
  (let x 1)
  (if true (let x 2))
  (return x))
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("already declared"));
    }

    #[test]
    fn test_reserved_prefix_rejected() {
        let err = check("(defconfig hs_settings (x u32))").unwrap_err();
        assert!(err.to_string().contains("reserved prefix"));
    }

    #[test]
    fn test_context_name_reserved_for_variables() {
        let err = check(
            r#"
(defprogram p :kind xdp :attach "eth0"
  (defn main [] (let ctx 5) (return XDP_PASS)))
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("reserved for the hook context"));
    }

    #[test]
    fn test_c_keywords_rejected_as_names() {
        let err = check(
            r#"
(defprogram p :kind xdp :attach "eth0"
  (defn main [] (let int 5) (return XDP_PASS)))
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'int' is a C keyword"));

        let err = check("(defn f [(unsigned u32)] u32 (return 0))").unwrap_err();
        assert!(err.to_string().contains("'unsigned' is a C keyword"));

        let err = check("(defconfig Settings (default u32 1))").unwrap_err();
        assert!(err.to_string().contains("'default' is a C keyword"));

        let err = check("(deftype pair (struct (char u8)))").unwrap_err();
        assert!(err.to_string().contains("'char' is a C keyword"));
    }

    #[test]
    fn test_hook_constants_are_per_kind() {
        let err = check(
            r#"
(defprogram p :kind xdp :attach "eth0"
  (defn main [] (return TC_ACT_OK)))
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("only available in tc programs"));
    }

    #[test]
    fn test_packet_len_not_in_kprobe() {
        let err = check(
            r#"
(defprogram p :kind kprobe :attach "tcp_sendmsg"
  (defn main [] (return (packet-len))))
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not available in kprobe"));
    }

    #[test]
    fn test_program_scoped_map_invisible_elsewhere() {
        let err = check(
            r#"
(defprogram a :kind xdp :attach "eth0"
  (defmap hits :type array :key u32 :value u64 :max-entries 1)
  (defn main [] (return XDP_PASS)))
(defprogram b :kind xdp :attach "eth1"
  (defn main [] (map-update hits 0 1) (return XDP_PASS)))
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown map 'hits'"));
    }

    #[test]
    fn test_recursion_rejected() {
        let err = check(
            r#"
(defn ping [(n u32)] u32 (return (pong n)))
(defn pong [(n u32)] u32 (return (ping n)))
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Recursive call"));
    }

    #[test]
    fn test_arity_checked() {
        let err = check(
            r#"
(defn add [(a u32) (b u32)] u32 (return (+ a b)))
(defn caller [] u32 (return (add 1)))
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("expects 2 argument(s), got 1"));
    }
}

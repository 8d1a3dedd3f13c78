//! Type representations for Weka.
//!
//! This crate defines the semantic types used by the inference engine and
//! the bytecode generator: the kind lattice, the generic type tree (with
//! row extensions, dotted sequences, and Abelian equations), qualified
//! types, schemes, and substitutions. Syntax trees live in `weka-ast`.

pub mod abelian;

use std::collections::BTreeSet;
use std::fmt;

pub use abelian::Equation;

// ---------------------------------------------------------------------------
// Sized numbers
// ---------------------------------------------------------------------------

/// Bit-width and signedness of an integer primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntSize {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    ISize,
    USize,
}

impl IntSize {
    pub const ALL: [IntSize; 10] = [
        IntSize::I8,
        IntSize::U8,
        IntSize::I16,
        IntSize::U16,
        IntSize::I32,
        IntSize::U32,
        IntSize::I64,
        IntSize::U64,
        IntSize::ISize,
        IntSize::USize,
    ];

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntSize::I8 | IntSize::I16 | IntSize::I32 | IntSize::I64 | IntSize::ISize
        )
    }

    /// The `-<size>` suffix used by primitive names (`add-i32`).
    pub fn suffix(self) -> &'static str {
        match self {
            IntSize::I8 => "i8",
            IntSize::U8 => "u8",
            IntSize::I16 => "i16",
            IntSize::U16 => "u16",
            IntSize::I32 => "i32",
            IntSize::U32 => "u32",
            IntSize::I64 => "i64",
            IntSize::U64 => "u64",
            IntSize::ISize => "isize",
            IntSize::USize => "usize",
        }
    }
}

impl fmt::Display for IntSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntSize::I8 => write!(f, "I8"),
            IntSize::U8 => write!(f, "U8"),
            IntSize::I16 => write!(f, "I16"),
            IntSize::U16 => write!(f, "U16"),
            IntSize::I32 => write!(f, "I32"),
            IntSize::U32 => write!(f, "U32"),
            IntSize::I64 => write!(f, "I64"),
            IntSize::U64 => write!(f, "U64"),
            IntSize::ISize => write!(f, "ISize"),
            IntSize::USize => write!(f, "USize"),
        }
    }
}

/// Bit-width of a floating-point primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloatSize {
    F32,
    F64,
}

impl FloatSize {
    pub const ALL: [FloatSize; 2] = [FloatSize::F32, FloatSize::F64];

    pub fn suffix(self) -> &'static str {
        match self {
            FloatSize::F32 => "f32",
            FloatSize::F64 => "f64",
        }
    }
}

impl fmt::Display for FloatSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FloatSize::F32 => write!(f, "F32"),
            FloatSize::F64 => write!(f, "F64"),
        }
    }
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Kind of a type term.
///
/// Kinds form a finite lattice; they select fresh-variable prefixes and
/// guard substitution. Every type node has a well-defined kind, and a kind
/// mismatch anywhere is a fatal invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Value,
    Data,
    Trust,
    Sharing,
    Clearance,
    Heap,
    Totality,
    Fixed,
    Unit,
    Effect,
    Permission,
    Field,
    Row(Box<Kind>),
    Seq(Box<Kind>),
    Arrow(Box<Kind>, Box<Kind>),
}

impl Kind {
    pub fn row(inner: Kind) -> Kind {
        Kind::Row(Box::new(inner))
    }

    pub fn seq(inner: Kind) -> Kind {
        Kind::Seq(Box::new(inner))
    }

    pub fn arrow(from: Kind, to: Kind) -> Kind {
        Kind::Arrow(Box::new(from), Box::new(to))
    }

    /// Fresh-variable prefix for this kind.
    ///
    /// User-provided names are renamed before they reach the core and never
    /// end in digits, so `<prefix><counter>` can never collide with them.
    pub fn prefix(&self) -> &'static str {
        match self {
            Kind::Value => "t",
            Kind::Data => "d",
            Kind::Trust => "v",
            Kind::Sharing => "s",
            Kind::Clearance => "k",
            Kind::Heap => "h",
            Kind::Totality => "q",
            Kind::Fixed => "x",
            Kind::Unit => "u",
            Kind::Effect => "e",
            Kind::Permission => "p",
            Kind::Field => "f",
            Kind::Row(_) => "r",
            Kind::Seq(_) => "z",
            Kind::Arrow(_, _) => "c",
        }
    }

    /// Kinds whose equations live in the two-valued attribute group.
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            Kind::Sharing | Kind::Totality | Kind::Trust | Kind::Clearance
        )
    }

    /// Kinds solved by the Abelian equation engine.
    pub fn is_abelian(&self) -> bool {
        self.is_boolean() || matches!(self, Kind::Unit)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Value => write!(f, "Value"),
            Kind::Data => write!(f, "Data"),
            Kind::Trust => write!(f, "Trust"),
            Kind::Sharing => write!(f, "Sharing"),
            Kind::Clearance => write!(f, "Clearance"),
            Kind::Heap => write!(f, "Heap"),
            Kind::Totality => write!(f, "Totality"),
            Kind::Fixed => write!(f, "Fixed"),
            Kind::Unit => write!(f, "Unit"),
            Kind::Effect => write!(f, "Effect"),
            Kind::Permission => write!(f, "Permission"),
            Kind::Field => write!(f, "Field"),
            Kind::Row(inner) => write!(f, "Row({inner})"),
            Kind::Seq(inner) => write!(f, "Seq({inner})"),
            Kind::Arrow(from, to) => write!(f, "({from} -> {to})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Kind mismatches
// ---------------------------------------------------------------------------

/// Fatal kinding violation raised by application or substitution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("kind mismatch: expected `{expected}`, found `{found}` in {context}")]
pub struct KindMismatch {
    pub expected: Kind,
    pub found: Kind,
    pub context: String,
}

impl KindMismatch {
    pub fn new(expected: Kind, found: Kind, context: impl Into<String>) -> Self {
        Self {
            expected,
            found,
            context: context.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Type terms
// ---------------------------------------------------------------------------

/// Primitive data types with dedicated VM support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimType {
    Int(IntSize),
    Float(FloatSize),
    Bool,
    String,
}

impl fmt::Display for PrimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimType::Int(size) => write!(f, "{size}"),
            PrimType::Float(size) => write!(f, "{size}"),
            PrimType::Bool => write!(f, "Bool"),
            PrimType::String => write!(f, "String"),
        }
    }
}

/// One element of a dotted sequence.
///
/// Dotted elements stand for zero-or-more expansion; in normalized form a
/// dotted element only terminates its sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeqItem {
    pub ty: Type,
    pub dotted: bool,
}

impl SeqItem {
    pub fn indexed(ty: Type) -> Self {
        Self { ty, dotted: false }
    }

    pub fn dotted(ty: Type) -> Self {
        Self { ty, dotted: true }
    }
}

/// A semantic type term.
///
/// The tree is generic: domain structure (functions, values, references,
/// records) is built from rigid constructors and `App` nodes; the helpers
/// in [`build`] construct and destructure the well-known shapes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Type {
    /// Unification variable.
    Var { name: String, kind: Kind },
    /// Rigid constant (type constructor, unit constant, permission name).
    Ctor { name: String, kind: Kind },
    /// Primitive data type.
    Prim(PrimType),
    /// Boolean attribute constant at an attribute kind.
    True(Kind),
    False(Kind),
    /// Abelian equation at a unit or attribute kind; the empty equation is
    /// the group identity (`abelian-one`).
    Abelian { kind: Kind, eq: Equation },
    /// Empty row; the kind is the element kind.
    RowEmpty(Kind),
    /// Row extension `⟨label = elem | rest⟩`.
    RowExtend {
        label: String,
        elem: Box<Type>,
        rest: Box<Type>,
    },
    /// Dotted or indexed sequence; the element kind is stored so the empty
    /// sequence stays well-kinded.
    Seq { elem: Kind, items: Vec<SeqItem> },
    /// Type application.
    App(Box<Type>, Box<Type>),
    /// Fixed type-level integer.
    Fixed(i64),
}

impl Type {
    pub fn var(name: impl Into<String>, kind: Kind) -> Type {
        Type::Var {
            name: name.into(),
            kind,
        }
    }

    pub fn ctor(name: impl Into<String>, kind: Kind) -> Type {
        Type::Ctor {
            name: name.into(),
            kind,
        }
    }

    pub fn seq(elem: Kind, items: Vec<SeqItem>) -> Type {
        Type::Seq { elem, items }
    }

    /// The kind of this term. Total: `App` of a non-arrow head cannot be
    /// constructed through [`Type::app`], and `debug_assert`s guard the
    /// remaining paths.
    pub fn kind(&self) -> Kind {
        match self {
            Type::Var { kind, .. } | Type::Ctor { kind, .. } => kind.clone(),
            Type::Prim(_) => Kind::Data,
            Type::True(kind) | Type::False(kind) => kind.clone(),
            Type::Abelian { kind, .. } => kind.clone(),
            Type::RowEmpty(elem) => Kind::row(elem.clone()),
            Type::RowExtend { rest, .. } => rest.kind(),
            Type::Seq { elem, .. } => Kind::seq(elem.clone()),
            Type::App(f, _) => match f.kind() {
                Kind::Arrow(_, to) => *to,
                other => {
                    debug_assert!(false, "application head has non-arrow kind {other}");
                    other
                }
            },
            Type::Fixed(_) => Kind::Fixed,
        }
    }

    /// Kind-checked application.
    pub fn app(f: Type, x: Type) -> Result<Type, KindMismatch> {
        match f.kind() {
            Kind::Arrow(from, _) => {
                let got = x.kind();
                if *from != got {
                    return Err(KindMismatch::new(
                        *from,
                        got,
                        format!("application of `{f}` to `{x}`"),
                    ));
                }
                Ok(Type::App(Box::new(f), Box::new(x)))
            }
            other => Err(KindMismatch::new(
                Kind::arrow(x.kind(), Kind::Data),
                other,
                format!("`{f}` is not a type constructor"),
            )),
        }
    }

    /// Apply a constructor to several arguments in order.
    pub fn app_all(f: Type, args: impl IntoIterator<Item = Type>) -> Result<Type, KindMismatch> {
        let mut out = f;
        for arg in args {
            out = Type::app(out, arg)?;
        }
        Ok(out)
    }

    /// Flatten an application spine into `(head, arguments)`.
    pub fn spine(&self) -> (&Type, Vec<&Type>) {
        let mut head = self;
        let mut args = Vec::new();
        while let Type::App(f, x) = head {
            args.push(x.as_ref());
            head = f.as_ref();
        }
        args.reverse();
        (head, args)
    }

    /// Free variables with their kinds.
    pub fn free_vars(&self) -> BTreeSet<(String, Kind)> {
        let mut vars = BTreeSet::new();
        self.collect_free_vars(&mut vars);
        vars
    }

    fn collect_free_vars(&self, vars: &mut BTreeSet<(String, Kind)>) {
        match self {
            Type::Var { name, kind } => {
                vars.insert((name.clone(), kind.clone()));
            }
            Type::Abelian { kind, eq } => {
                for name in eq.variables().keys() {
                    vars.insert((name.clone(), kind.clone()));
                }
            }
            Type::RowExtend { elem, rest, .. } => {
                elem.collect_free_vars(vars);
                rest.collect_free_vars(vars);
            }
            Type::Seq { items, .. } => {
                for item in items {
                    item.ty.collect_free_vars(vars);
                }
            }
            Type::App(f, x) => {
                f.collect_free_vars(vars);
                x.collect_free_vars(vars);
            }
            Type::Ctor { .. }
            | Type::Prim(_)
            | Type::True(_)
            | Type::False(_)
            | Type::RowEmpty(_)
            | Type::Fixed(_) => {}
        }
    }

    /// View an Abelian-kinded term as an equation.
    ///
    /// `True`/`False` normalize into the order-2 encoding: `False` is the
    /// identity, `True` the distinguished constant of exponent 1.
    pub fn to_equation(&self) -> Option<Equation> {
        match self {
            Type::Var { name, kind } if kind.is_abelian() => Some(Equation::variable(name.clone())),
            Type::Ctor { name, kind } if kind.is_abelian() => Some(Equation::constant(name.clone())),
            Type::True(_) => Some(Equation::constant(ATTR_TRUE)),
            Type::False(_) => Some(Equation::identity()),
            Type::Abelian { eq, .. } => Some(eq.clone()),
            _ => None,
        }
    }

    /// Rebuild an Abelian term from an equation, collapsing the Boolean
    /// encodings back to `True`/`False` where possible.
    pub fn from_equation(kind: &Kind, eq: Equation) -> Type {
        let eq = if kind.is_boolean() { eq.modulo(2) } else { eq };
        if eq.is_identity() {
            return if kind.is_boolean() {
                Type::False(kind.clone())
            } else {
                Type::Abelian {
                    kind: kind.clone(),
                    eq,
                }
            };
        }
        if kind.is_boolean()
            && eq.variables().is_empty()
            && eq.constants().len() == 1
            && eq.constants().get(ATTR_TRUE) == Some(&1)
        {
            return Type::True(kind.clone());
        }
        Type::Abelian {
            kind: kind.clone(),
            eq,
        }
    }
}

/// Constant name encoding Boolean `true` in attribute equations.
pub const ATTR_TRUE: &str = "true";

/// Numeric suffix of a generated variable name, used as its age.
///
/// User names are renamed upstream and never end in digits, so `None`
/// means "user-provided" (always older than any generated variable).
pub fn generated_suffix(name: &str) -> Option<u64> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.chars().rev().collect::<String>().parse().ok()
}

// ---------------------------------------------------------------------------
// Well-known constructors
// ---------------------------------------------------------------------------

/// Builders and views for the structured types of the surface calculus:
/// function (word) types, stack values, references, records, variants,
/// unit-tagged numerics, and the `st!` state effect.
pub mod build {
    use super::*;

    pub const FN: &str = "fn";
    pub const VAL: &str = "val";
    pub const REF: &str = "ref";
    pub const RECORD: &str = "record";
    pub const VARIANT: &str = "variant";
    pub const TAGGED: &str = "tagged";
    pub const LIST: &str = "list";
    pub const STATE: &str = "st!";

    pub fn fn_ctor() -> Type {
        Type::ctor(
            FN,
            Kind::arrow(
                Kind::row(Kind::Effect),
                Kind::arrow(
                    Kind::row(Kind::Permission),
                    Kind::arrow(
                        Kind::Totality,
                        Kind::arrow(
                            Kind::seq(Kind::Value),
                            Kind::arrow(Kind::seq(Kind::Value), Kind::Data),
                        ),
                    ),
                ),
            ),
        )
    }

    pub fn val_ctor() -> Type {
        Type::ctor(
            VAL,
            Kind::arrow(Kind::Data, Kind::arrow(Kind::Sharing, Kind::Value)),
        )
    }

    pub fn ref_ctor() -> Type {
        Type::ctor(REF, Kind::arrow(Kind::Heap, Kind::arrow(Kind::Value, Kind::Data)))
    }

    pub fn record_ctor() -> Type {
        Type::ctor(RECORD, Kind::arrow(Kind::row(Kind::Value), Kind::Data))
    }

    pub fn variant_ctor() -> Type {
        Type::ctor(VARIANT, Kind::arrow(Kind::row(Kind::Value), Kind::Data))
    }

    pub fn tagged_ctor() -> Type {
        Type::ctor(TAGGED, Kind::arrow(Kind::Data, Kind::arrow(Kind::Unit, Kind::Data)))
    }

    pub fn list_ctor() -> Type {
        Type::ctor(LIST, Kind::arrow(Kind::Value, Kind::Data))
    }

    pub fn state_ctor() -> Type {
        Type::ctor(STATE, Kind::arrow(Kind::Heap, Kind::Effect))
    }

    /// A word type `(e, p, t, ins → outs)` of kind `Data`.
    pub fn fn_type(effects: Type, perms: Type, totality: Type, ins: Type, outs: Type) -> Type {
        Type::app_all(fn_ctor(), [effects, perms, totality, ins, outs])
            .expect("function type components are well-kinded")
    }

    /// A stack value `val(data, sharing)` of kind `Value`.
    pub fn val(data: Type, sharing: Type) -> Type {
        Type::app_all(val_ctor(), [data, sharing]).expect("value components are well-kinded")
    }

    pub fn reference(heap: Type, value: Type) -> Type {
        Type::app_all(ref_ctor(), [heap, value]).expect("reference components are well-kinded")
    }

    pub fn record(row: Type) -> Type {
        Type::app_all(record_ctor(), [row]).expect("record row is well-kinded")
    }

    pub fn variant(row: Type) -> Type {
        Type::app_all(variant_ctor(), [row]).expect("variant row is well-kinded")
    }

    pub fn tagged(data: Type, unit: Type) -> Type {
        Type::app_all(tagged_ctor(), [data, unit]).expect("tagged components are well-kinded")
    }

    pub fn list(elem: Type) -> Type {
        Type::app_all(list_ctor(), [elem]).expect("list element is well-kinded")
    }

    pub fn state_effect(heap: Type) -> Type {
        Type::app_all(state_ctor(), [heap]).expect("state heap is well-kinded")
    }

    /// Decomposed view of a word type.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FnView {
        pub effects: Type,
        pub perms: Type,
        pub totality: Type,
        pub ins: Type,
        pub outs: Type,
    }

    pub fn as_fn(ty: &Type) -> Option<FnView> {
        let (head, args) = ty.spine();
        match head {
            Type::Ctor { name, .. } if name.as_str() == FN && args.len() == 5 => Some(FnView {
                effects: args[0].clone(),
                perms: args[1].clone(),
                totality: args[2].clone(),
                ins: args[3].clone(),
                outs: args[4].clone(),
            }),
            _ => None,
        }
    }

    /// Decomposed view of a stack value.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ValView {
        pub data: Type,
        pub sharing: Type,
    }

    pub fn as_val(ty: &Type) -> Option<ValView> {
        let (head, args) = ty.spine();
        match head {
            Type::Ctor { name, .. } if name.as_str() == VAL && args.len() == 2 => Some(ValView {
                data: args[0].clone(),
                sharing: args[1].clone(),
            }),
            _ => None,
        }
    }

    pub fn as_tagged(ty: &Type) -> Option<(Type, Type)> {
        let (head, args) = ty.spine();
        match head {
            Type::Ctor { name, .. } if name.as_str() == TAGGED && args.len() == 2 => {
                Some((args[0].clone(), args[1].clone()))
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Qualified types and schemes
// ---------------------------------------------------------------------------

/// A predicate: a type-class-style constraint applied to a type argument.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pred {
    pub name: String,
    pub arg: Type,
}

impl Pred {
    pub fn new(name: impl Into<String>, arg: Type) -> Self {
        Self {
            name: name.into(),
            arg,
        }
    }
}

impl fmt::Display for Pred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.arg)
    }
}

/// A qualified type: `context => head`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualType {
    pub context: Vec<Pred>,
    pub head: Type,
}

impl QualType {
    pub fn unqualified(head: Type) -> Self {
        Self {
            context: Vec::new(),
            head,
        }
    }

    pub fn free_vars(&self) -> BTreeSet<(String, Kind)> {
        let mut vars = self.head.free_vars();
        for pred in &self.context {
            vars.extend(pred.arg.free_vars());
        }
        vars
    }
}

impl fmt::Display for QualType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "(")?;
            for (i, pred) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{pred}")?;
            }
            write!(f, ") => ")?;
        }
        write!(f, "{}", self.head)
    }
}

/// An implicitly-universal type scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheme {
    pub quantified: Vec<(String, Kind)>,
    pub qual: QualType,
}

impl Scheme {
    /// Monomorphic scheme with an empty context.
    pub fn mono(ty: Type) -> Self {
        Self {
            quantified: Vec::new(),
            qual: QualType::unqualified(ty),
        }
    }

    /// Quantify over every free variable of a qualified type.
    pub fn close_over(qual: QualType) -> Self {
        let quantified = qual.free_vars().into_iter().collect();
        Self { quantified, qual }
    }

    pub fn is_mono(&self) -> bool {
        self.quantified.is_empty()
    }

    /// Free variables not bound by the quantifier prefix.
    pub fn free_vars(&self) -> BTreeSet<(String, Kind)> {
        let mut vars = self.qual.free_vars();
        for bound in &self.quantified {
            vars.remove(bound);
        }
        vars
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.quantified.is_empty() {
            write!(f, "forall")?;
            for (name, _) in &self.quantified {
                write!(f, " {name}")?;
            }
            write!(f, ". ")?;
        }
        write!(f, "{}", self.qual)
    }
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// A kind-preserving map from variable names to type terms.
///
/// Substitutions are immutable snapshots once solved: `solve_all` composes
/// them left to right and the result is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subst {
    map: std::collections::BTreeMap<String, Type>,
}

impl Subst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(name: impl Into<String>, ty: Type) -> Self {
        let mut subst = Self::new();
        subst.map.insert(name.into(), ty);
        subst
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<&Type> {
        self.map.get(name)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&String, &Type)> {
        self.map.iter()
    }

    pub fn domain(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    /// Bind a variable, checking that the kind is preserved.
    pub fn bind(&mut self, name: impl Into<String>, kind: &Kind, ty: Type) -> Result<(), KindMismatch> {
        let name = name.into();
        let got = ty.kind();
        if *kind != got {
            return Err(KindMismatch::new(
                kind.clone(),
                got,
                format!("binding of variable `{name}`"),
            ));
        }
        self.map.insert(name, ty);
        Ok(())
    }

    /// `self ∘ earlier`: apply `self` to `earlier`'s range, then extend
    /// with `self`'s own bindings.
    pub fn compose(&self, earlier: &Subst) -> Subst {
        let mut map = std::collections::BTreeMap::new();
        for (name, ty) in &earlier.map {
            map.insert(name.clone(), self.apply(ty));
        }
        for (name, ty) in &self.map {
            map.entry(name.clone()).or_insert_with(|| ty.clone());
        }
        Subst { map }
    }

    /// Apply the substitution to a type. Kind preservation is guaranteed by
    /// the `bind`-time check.
    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Var { name, kind } => match self.map.get(name) {
                Some(resolved) => {
                    debug_assert_eq!(resolved.kind(), *kind, "substitution broke kinding");
                    self.apply(resolved)
                }
                None => ty.clone(),
            },
            Type::Abelian { kind, eq } => self.apply_equation(kind, eq),
            Type::RowExtend { label, elem, rest } => Type::RowExtend {
                label: label.clone(),
                elem: Box::new(self.apply(elem)),
                rest: Box::new(self.apply(rest)),
            },
            Type::Seq { elem, items } => Type::Seq {
                elem: elem.clone(),
                items: self.apply_seq(items),
            },
            Type::App(f, x) => Type::App(Box::new(self.apply(f)), Box::new(self.apply(x))),
            Type::Ctor { .. }
            | Type::Prim(_)
            | Type::True(_)
            | Type::False(_)
            | Type::RowEmpty(_)
            | Type::Fixed(_) => ty.clone(),
        }
    }

    fn apply_equation(&self, kind: &Kind, eq: &Equation) -> Type {
        let mut out = eq.clone();
        for (name, _) in eq.variables().clone() {
            if let Some(replacement) = self.map.get(&name) {
                let applied = self.apply(replacement);
                let rep_eq = applied
                    .to_equation()
                    .expect("abelian variable bound to non-abelian term");
                out = out.substitute(&name, &rep_eq);
            }
        }
        Type::from_equation(kind, out)
    }

    /// Apply to sequence items, splicing substituted dotted variables.
    fn apply_seq(&self, items: &[SeqItem]) -> Vec<SeqItem> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if item.dotted {
                match self.apply(&item.ty) {
                    Type::Seq { items: spliced, .. } => out.extend(spliced),
                    other => out.push(SeqItem::dotted(other)),
                }
            } else {
                out.push(SeqItem::indexed(self.apply(&item.ty)));
            }
        }
        out
    }

    pub fn apply_pred(&self, pred: &Pred) -> Pred {
        Pred {
            name: pred.name.clone(),
            arg: self.apply(&pred.arg),
        }
    }

    pub fn apply_qual(&self, qual: &QualType) -> QualType {
        QualType {
            context: qual.context.iter().map(|p| self.apply_pred(p)).collect(),
            head: self.apply(&qual.head),
        }
    }

    /// Apply to a scheme, skipping quantified variables.
    pub fn apply_scheme(&self, scheme: &Scheme) -> Scheme {
        let mut shadowed = self.clone();
        for (name, _) in &scheme.quantified {
            shadowed.map.remove(name);
        }
        Scheme {
            quantified: scheme.quantified.clone(),
            qual: shadowed.apply_qual(&scheme.qual),
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type(self, f)
    }
}

fn write_type(ty: &Type, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match ty {
        Type::Var { name, .. } | Type::Ctor { name, .. } => write!(f, "{name}"),
        Type::Prim(prim) => write!(f, "{prim}"),
        Type::True(_) => write!(f, "true"),
        Type::False(_) => write!(f, "false"),
        Type::Abelian { eq, .. } => write!(f, "{eq}"),
        Type::RowEmpty(_) => write!(f, "⟨⟩"),
        Type::RowExtend { .. } => write_row(ty, f),
        Type::Seq { items, .. } => {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item.ty)?;
                if item.dotted {
                    write!(f, "...")?;
                }
            }
            write!(f, "]")
        }
        Type::App(_, _) => {
            let (head, args) = ty.spine();
            if let (Type::Ctor { name, .. }, [effects, perms, totality, ins, outs]) =
                (head, args.as_slice())
            {
                if name.as_str() == build::FN {
                    return write!(f, "({ins} --{effects}|{perms}|{totality}--> {outs})");
                }
            }
            write!(f, "{head}(")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ")")
        }
        Type::Fixed(n) => write!(f, "{n}"),
    }
}

fn write_row(ty: &Type, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "⟨")?;
    let mut cursor = ty;
    let mut first = true;
    loop {
        match cursor {
            Type::RowExtend { label, elem, rest } => {
                if !first {
                    write!(f, ", ")?;
                }
                first = false;
                write!(f, "{label}: {elem}")?;
                cursor = rest;
            }
            Type::RowEmpty(_) => break,
            tail => {
                write!(f, " | {tail}")?;
                break;
            }
        }
    }
    write!(f, "⟩")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{as_fn, as_val, fn_type, val};

    fn value_var(name: &str) -> Type {
        Type::var(name, Kind::Value)
    }

    fn stack(items: Vec<SeqItem>) -> Type {
        Type::seq(Kind::Value, items)
    }

    #[test]
    fn app_checks_kinds() {
        let list = build::list_ctor();
        let ok = Type::app(list.clone(), val(Type::Prim(PrimType::Bool), Type::False(Kind::Sharing)));
        assert!(ok.is_ok());
        let bad = Type::app(list, Type::Prim(PrimType::Bool));
        assert!(bad.is_err());
    }

    #[test]
    fn fn_view_round_trips() {
        let effects = Type::RowEmpty(Kind::Effect);
        let perms = Type::RowEmpty(Kind::Permission);
        let tot = Type::True(Kind::Totality);
        let ins = stack(vec![SeqItem::dotted(Type::var("z0", Kind::seq(Kind::Value)))]);
        let outs = stack(vec![
            SeqItem::indexed(value_var("t0")),
            SeqItem::dotted(Type::var("z0", Kind::seq(Kind::Value))),
        ]);
        let ty = fn_type(effects.clone(), perms.clone(), tot.clone(), ins.clone(), outs.clone());
        assert_eq!(ty.kind(), Kind::Data);
        let view = as_fn(&ty).unwrap();
        assert_eq!(view.effects, effects);
        assert_eq!(view.outs, outs);
    }

    #[test]
    fn substitution_preserves_kind() {
        let mut subst = Subst::new();
        assert!(subst
            .bind("t0", &Kind::Value, val(Type::Prim(PrimType::Bool), Type::False(Kind::Sharing)))
            .is_ok());
        assert!(subst
            .bind("t1", &Kind::Value, Type::Prim(PrimType::Bool))
            .is_err());
    }

    #[test]
    fn substitution_splices_dotted_sequences() {
        let rest = Type::var("z0", Kind::seq(Kind::Value));
        let seq = stack(vec![SeqItem::indexed(value_var("t0")), SeqItem::dotted(rest)]);
        let mut subst = Subst::new();
        subst
            .bind(
                "z0",
                &Kind::seq(Kind::Value),
                stack(vec![
                    SeqItem::indexed(value_var("t1")),
                    SeqItem::dotted(Type::var("z1", Kind::seq(Kind::Value))),
                ]),
            )
            .unwrap();
        let applied = subst.apply(&seq);
        let Type::Seq { items, .. } = applied else {
            panic!("expected sequence");
        };
        assert_eq!(items.len(), 3);
        assert!(!items[0].dotted);
        assert!(!items[1].dotted);
        assert!(items[2].dotted);
    }

    #[test]
    fn abelian_substitution_folds_equations() {
        // u0 · m  with  u0 := m^-1  reduces to the identity.
        let ty = Type::Abelian {
            kind: Kind::Unit,
            eq: Equation::variable("u0").add(&Equation::constant("m")),
        };
        let mut subst = Subst::new();
        subst
            .bind(
                "u0",
                &Kind::Unit,
                Type::Abelian {
                    kind: Kind::Unit,
                    eq: Equation::constant("m").invert(),
                },
            )
            .unwrap();
        let applied = subst.apply(&ty);
        let Type::Abelian { eq, .. } = applied else {
            panic!("expected abelian term");
        };
        assert!(eq.is_identity());
    }

    #[test]
    fn boolean_substitution_collapses_to_constants() {
        let sharing = Type::var("s0", Kind::Sharing);
        let mut subst = Subst::new();
        subst.bind("s0", &Kind::Sharing, Type::True(Kind::Sharing)).unwrap();
        assert_eq!(subst.apply(&sharing), Type::True(Kind::Sharing));
    }

    #[test]
    fn scheme_quantifiers_shadow_substitution() {
        let scheme = Scheme {
            quantified: vec![("t0".to_string(), Kind::Value)],
            qual: QualType::unqualified(value_var("t0")),
        };
        let subst = Subst::singleton("t0", value_var("t9"));
        assert_eq!(subst.apply_scheme(&scheme), scheme);
    }

    #[test]
    fn generated_suffix_orders_ages() {
        assert_eq!(generated_suffix("t12"), Some(12));
        assert_eq!(generated_suffix("z0"), Some(0));
        assert_eq!(generated_suffix("widget"), None);
    }

    #[test]
    fn row_display_lists_labels() {
        let row = Type::RowExtend {
            label: "x".into(),
            elem: Box::new(value_var("t0")),
            rest: Box::new(Type::var("r0", Kind::row(Kind::Value))),
        };
        assert_eq!(format!("{row}"), "⟨x: t0 | r0⟩");
    }
}

//! Bytecode generation for the Weka VM.
//!
//! The generator consumes core IR and emits an ordered list of labeled
//! blocks. It performs closure conversion (free variables become explicit
//! frame loads), effect-handler lowering (return closure first, handlers
//! in reverse declared order), and primitive instruction selection.
//!
//! Offset convention: every relative jump is interpreted against the index
//! of the jumping instruction itself, `target = index + offset`. The
//! post-handle offset of `IHandle` therefore equals the length of the
//! handled body (including its terminating `IComplete`) plus one.

pub mod primitives;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use weka_core::{CaseKind, CoreExpr, CoreProgram, CoreWord};
use weka_diag::{Category, Diagnostic};
use weka_types::{FloatSize, IntSize};

// ---------------------------------------------------------------------------
// Instructions and blocks
// ---------------------------------------------------------------------------

/// A load from the environment stack: `(frame, entry)` with frame 0 the
/// innermost frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRef {
    pub frame: usize,
    pub index: usize,
}

/// The flat instruction set of the Weka VM.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // Stack shuffling.
    IDup,
    ISwap,
    IZap,
    INip,

    // Sized integer immediates.
    II8(i8),
    IU8(u8),
    II16(i16),
    IU16(u16),
    II32(i32),
    IU32(u32),
    II64(i64),
    IU64(u64),
    IISize(i64),
    IUSize(u64),

    // Integer arithmetic, keyed by size.
    IIntAdd(IntSize),
    IIntSub(IntSize),
    IIntMul(IntSize),
    IIntDiv(IntSize),
    IIntRem(IntSize),
    IIntAnd(IntSize),
    IIntOr(IntSize),
    IIntXor(IntSize),
    IIntShl(IntSize),
    IIntShr(IntSize),
    IIntNeg(IntSize),
    IIntEq(IntSize),
    IIntNeq(IntSize),
    IIntLt(IntSize),
    IIntGt(IntSize),
    IIntLte(IntSize),
    IIntGte(IntSize),
    /// Convert a sized integer to Bool (nonzero is true).
    IConvBool(IntSize),
    /// Convert between integer sizes.
    IConvInt(IntSize, IntSize),

    // Float immediates (bit patterns) and arithmetic.
    IF32(u32),
    IF64(u64),
    IFloatAdd(FloatSize),
    IFloatSub(FloatSize),
    IFloatMul(FloatSize),
    IFloatDiv(FloatSize),
    IFloatNeg(FloatSize),
    IFloatEq(FloatSize),
    IFloatNeq(FloatSize),
    IFloatLt(FloatSize),
    IFloatGt(FloatSize),
    IFloatLte(FloatSize),
    IFloatGte(FloatSize),

    // Booleans.
    ITrue,
    IFalse,
    IBoolAnd,
    IBoolOr,
    IBoolNot,
    IBoolXor,

    // Strings.
    IString(String),

    // Lists.
    IListNil,
    IListCons,
    IListHead,
    IListTail,
    IListIsEmpty,
    IListAppend,

    // Reference cells.
    INewRef,
    IGetRef,
    IPutRef,

    // Records.
    IRecordEmpty,
    IRecordExtend(String),
    IRecordRestrict(String),
    IRecordSelect(String),

    // Variants and structs.
    IVariant(String),
    /// Pop a variant; on tag match push the payload and continue, else
    /// jump `else_offset` with the variant restored.
    ICaseVariant {
        label: String,
        else_offset: i32,
    },
    /// Pop a struct and push its fields in declaration order.
    IUnstruct(u32),

    // Control.
    IOffset(i32),
    IOffsetIf(i32),
    IOffsetIfNot(i32),
    ICall(String),
    ITailCall(String),
    IReturn,
    IHandle {
        handle_id: u32,
        after_offset: i32,
        params: usize,
        handlers: usize,
    },
    IComplete,
    IEscape {
        handle_id: u32,
        handler_index: usize,
    },
    ICallClosure,
    ICallContinuation,
    IClosure {
        label: String,
        args: usize,
        closed: Vec<FrameRef>,
    },
    IMutual(usize),
    IStore(usize),
    IFind {
        frame: usize,
        index: usize,
    },
    IForget,
    IConstruct {
        id: u32,
        args: usize,
    },
    IIsStruct(u32),
    INop,
}

/// A bytecode block.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Labeled(String, Vec<Instr>),
    Anonymous(Vec<Instr>),
}

impl Block {
    pub fn instrs(&self) -> &[Instr] {
        match self {
            Block::Labeled(_, instrs) | Block::Anonymous(instrs) => instrs,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Block::Labeled(name, _) => Some(name),
            Block::Anonymous(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration and environment maps
// ---------------------------------------------------------------------------

/// Generation options owned by the external driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenConfig {
    pub main_label: String,
    pub end_label: String,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            main_label: "main".to_string(),
            end_label: "end".to_string(),
        }
    }
}

/// Where an effect operation escapes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerLoc {
    pub handle_id: u32,
    pub index: usize,
}

/// Runtime identity of a data constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtorLoc {
    pub id: u32,
    pub args: usize,
}

/// Fatal code-generation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    #[error("duplicate block label `{0}`")]
    DuplicateLabel(String),
    #[error("unknown name `{0}` during code generation")]
    UnknownName(String),
}

impl From<CodegenError> for Diagnostic {
    fn from(err: CodegenError) -> Self {
        let category = match &err {
            CodegenError::DuplicateLabel(_) => Category::TypeMismatch,
            CodegenError::UnknownName(_) => Category::UndefinedName,
        };
        Diagnostic::error(category, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Kind of an environment-stack entry, selecting the call instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CgKind {
    Value,
    Closure,
    Continuation,
}

#[derive(Debug, Clone)]
struct CgEntry {
    name: String,
    kind: CgKind,
}

impl CgEntry {
    fn value(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: CgKind::Value,
        }
    }
}

pub struct Codegen {
    handlers: BTreeMap<String, HandlerLoc>,
    effects: BTreeMap<String, u32>,
    constructors: BTreeMap<String, CtorLoc>,
    primitives: BTreeMap<String, Vec<Instr>>,
    block_id: u32,
    blocks: Vec<Block>,
    frames: Vec<Vec<CgEntry>>,
    labels: BTreeSet<String>,
}

impl Codegen {
    pub fn new(
        handlers: BTreeMap<String, HandlerLoc>,
        effects: BTreeMap<String, u32>,
        constructors: BTreeMap<String, CtorLoc>,
    ) -> Self {
        Self {
            handlers,
            effects,
            constructors,
            primitives: primitives::instruction_table(),
            block_id: 0,
            blocks: Vec::new(),
            frames: Vec::new(),
            labels: BTreeSet::new(),
        }
    }

    /// Look a name up on the environment stack. Frame 0 is innermost.
    fn lookup(&self, name: &str) -> Option<(FrameRef, CgKind)> {
        for (depth, frame) in self.frames.iter().rev().enumerate() {
            if let Some(index) = frame.iter().position(|e| e.name == name) {
                return Some((
                    FrameRef {
                        frame: depth,
                        index,
                    },
                    frame[index].kind,
                ));
            }
        }
        None
    }

    fn add_block(&mut self, name: String, instrs: Vec<Instr>) -> Result<(), CodegenError> {
        if !self.labels.insert(name.clone()) {
            return Err(CodegenError::DuplicateLabel(name));
        }
        self.blocks.push(Block::Labeled(name, instrs));
        Ok(())
    }

    /// Closure conversion.
    ///
    /// Emits the body as a fresh labeled block whose innermost frame holds
    /// `call_append` entries followed by the closed-over entries, and
    /// returns the `IClosure` site instruction.
    fn gen_closure(
        &mut self,
        prefix: &str,
        call_append: Vec<CgEntry>,
        args: usize,
        free: &[String],
        body: &CoreExpr,
    ) -> Result<Instr, CodegenError> {
        self.block_id += 1;
        let name = format!("{prefix}{}", self.block_id);

        let mut closed_finds = Vec::with_capacity(free.len());
        let mut closed_entries = Vec::with_capacity(free.len());
        for var in free {
            let (frame_ref, kind) = self
                .lookup(var)
                .ok_or_else(|| CodegenError::UnknownName(var.clone()))?;
            closed_finds.push(frame_ref);
            closed_entries.push(CgEntry {
                name: var.clone(),
                kind,
            });
        }

        let mut entries = call_append;
        entries.extend(closed_entries);

        let saved = std::mem::take(&mut self.frames);
        self.frames = vec![entries];
        let mut code = self.gen_expr(body)?;
        code.push(Instr::IReturn);
        self.frames = saved;

        self.add_block(name.clone(), code)?;
        Ok(Instr::IClosure {
            label: name,
            args,
            closed: closed_finds,
        })
    }

    pub fn gen_expr(&mut self, expr: &CoreExpr) -> Result<Vec<Instr>, CodegenError> {
        let mut out = Vec::new();
        for word in &expr.words {
            self.gen_word(word, &mut out)?;
        }
        Ok(out)
    }

    fn gen_word(&mut self, word: &CoreWord, out: &mut Vec<Instr>) -> Result<(), CodegenError> {
        match word {
            CoreWord::Integer { value, size } => out.push(integer_immediate(*value, *size)),
            CoreWord::Float { bits, size } => out.push(match size {
                FloatSize::F32 => Instr::IF32(*bits as u32),
                FloatSize::F64 => Instr::IF64(*bits),
            }),
            CoreWord::BoolLit(true) => out.push(Instr::ITrue),
            CoreWord::BoolLit(false) => out.push(Instr::IFalse),
            CoreWord::StrLit(s) => out.push(Instr::IString(s.clone())),
            CoreWord::Do => out.push(Instr::ICallClosure),
            CoreWord::NewRef => out.push(Instr::INewRef),
            CoreWord::GetRef => out.push(Instr::IGetRef),
            CoreWord::PutRef => out.push(Instr::IPutRef),
            CoreWord::PrimCall(name) => {
                let instrs = self
                    .primitives
                    .get(name)
                    .ok_or_else(|| CodegenError::UnknownName(name.clone()))?;
                out.extend(instrs.iter().cloned());
            }
            CoreWord::RecordExtend(label) => out.push(Instr::IRecordExtend(label.clone())),
            CoreWord::RecordRestrict(label) => out.push(Instr::IRecordRestrict(label.clone())),
            CoreWord::RecordSelect(label) => out.push(Instr::IRecordSelect(label.clone())),
            CoreWord::Variant(label) => out.push(Instr::IVariant(label.clone())),
            CoreWord::If {
                then_branch,
                else_branch,
            } => {
                let then_code = self.gen_expr(then_branch)?;
                if else_branch.words.is_empty() {
                    out.push(Instr::IOffsetIfNot(then_code.len() as i32 + 1));
                    out.extend(then_code);
                } else {
                    let else_code = self.gen_expr(else_branch)?;
                    out.push(Instr::IOffsetIfNot(then_code.len() as i32 + 2));
                    out.extend(then_code);
                    out.push(Instr::IOffset(else_code.len() as i32 + 1));
                    out.extend(else_code);
                }
            }
            CoreWord::While { cond, body } => {
                let body_code = self.gen_expr(body)?;
                let cond_code = self.gen_expr(cond)?;
                let body_len = body_code.len() as i32;
                let cond_len = cond_code.len() as i32;
                out.push(Instr::IOffset(body_len + 1));
                out.extend(body_code);
                out.extend(cond_code);
                out.push(Instr::IOffsetIf(-(body_len + cond_len)));
            }
            CoreWord::Vars { names, body } => {
                out.push(Instr::IStore(names.len()));
                self.frames
                    .push(names.iter().map(|n| CgEntry::value(n)).collect());
                let body_code = self.gen_expr(body)?;
                self.frames.pop();
                out.extend(body_code);
                out.push(Instr::IForget);
            }
            CoreWord::LetRecs { recs, body } => {
                // Emit in reverse so the first member ends on top and the
                // frame keeps declaration order.
                let entries: Vec<CgEntry> = recs
                    .iter()
                    .map(|r| CgEntry {
                        name: r.name.clone(),
                        kind: CgKind::Closure,
                    })
                    .collect();
                self.frames.push(entries);
                let mut sites = Vec::with_capacity(recs.len());
                for rec in recs.iter().rev() {
                    let site = self.gen_closure("rec", Vec::new(), 0, &rec.free, &rec.body)?;
                    sites.push(site);
                }
                self.frames.pop();
                out.extend(sites);
                out.push(Instr::IMutual(recs.len()));
                out.push(Instr::IStore(recs.len()));
                self.frames.push(
                    recs.iter()
                        .map(|r| CgEntry {
                            name: r.name.clone(),
                            kind: CgKind::Closure,
                        })
                        .collect(),
                );
                let body_code = self.gen_expr(body)?;
                self.frames.pop();
                out.extend(body_code);
                out.push(Instr::IForget);
            }
            CoreWord::Closure { free, body } => {
                let site = self.gen_closure("fn", Vec::new(), 0, free, body)?;
                out.push(site);
            }
            CoreWord::Handle {
                params,
                effect,
                body,
                handlers,
                ret,
            } => {
                let handle_id = *self
                    .effects
                    .get(effect)
                    .ok_or_else(|| CodegenError::UnknownName(effect.clone()))?;

                let param_entries: Vec<CgEntry> =
                    params.iter().map(|p| CgEntry::value(p)).collect();

                // Return closure first, to occupy the frame slot the VM
                // expects. Free names that are not frame-bound are calls to
                // labeled blocks and need no capture.
                let mut ret_free = ret_free_vars(ret, params);
                ret_free.retain(|name| self.lookup(name).is_some());
                let ret_site =
                    self.gen_closure("handler", param_entries.clone(), 0, &ret_free, ret)?;
                out.push(ret_site);

                // Handlers in reverse declared order; the VM indexes them
                // top-down on the handler stack.
                for handler in handlers.iter().rev() {
                    let mut call_append = param_entries.clone();
                    call_append.extend(handler.params.iter().map(|p| CgEntry::value(p)));
                    call_append.push(CgEntry {
                        name: "resume".to_string(),
                        kind: CgKind::Continuation,
                    });
                    let mut free = handler_free_vars(handler, params);
                    free.retain(|name| self.lookup(name).is_some());
                    let site = self.gen_closure(
                        "handler",
                        call_append,
                        handler.params.len(),
                        &free,
                        &handler.body,
                    )?;
                    out.push(site);
                }

                self.frames.push(param_entries);
                let mut body_code = self.gen_expr(body)?;
                self.frames.pop();
                body_code.push(Instr::IComplete);

                out.push(Instr::IHandle {
                    handle_id,
                    after_offset: body_code.len() as i32 + 1,
                    params: params.len(),
                    handlers: handlers.len(),
                });
                out.extend(body_code);
            }
            CoreWord::Case {
                tag,
                kind,
                then_branch,
                else_branch,
            } => {
                let then_code = self.gen_expr(then_branch)?;
                let else_code = self.gen_expr(else_branch)?;
                match kind {
                    CaseKind::Variant => {
                        out.push(Instr::ICaseVariant {
                            label: tag.clone(),
                            else_offset: then_code.len() as i32 + 2,
                        });
                        out.extend(then_code);
                        out.push(Instr::IOffset(else_code.len() as i32 + 1));
                        out.extend(else_code);
                    }
                    CaseKind::Struct => {
                        let ctor = self
                            .constructors
                            .get(tag)
                            .copied()
                            .ok_or_else(|| CodegenError::UnknownName(tag.clone()))?;
                        out.push(Instr::IIsStruct(ctor.id));
                        out.push(Instr::IOffsetIfNot(then_code.len() as i32 + 3));
                        out.push(Instr::IUnstruct(ctor.id));
                        out.extend(then_code);
                        out.push(Instr::IOffset(else_code.len() as i32 + 1));
                        out.extend(else_code);
                    }
                }
            }
            CoreWord::WithPermission { body, .. } => {
                // Permissions are erased at runtime.
                let body_code = self.gen_expr(body)?;
                out.extend(body_code);
            }
            CoreWord::CallVar(name) => match self.lookup(name) {
                Some((frame_ref, kind)) => {
                    out.push(Instr::IFind {
                        frame: frame_ref.frame,
                        index: frame_ref.index,
                    });
                    out.push(match kind {
                        CgKind::Continuation => Instr::ICallContinuation,
                        _ => Instr::ICallClosure,
                    });
                }
                None => out.push(Instr::ICall(name.clone())),
            },
            CoreWord::ValueVar(name) => {
                let (frame_ref, _) = self
                    .lookup(name)
                    .ok_or_else(|| CodegenError::UnknownName(name.clone()))?;
                out.push(Instr::IFind {
                    frame: frame_ref.frame,
                    index: frame_ref.index,
                });
            }
            CoreWord::OperatorVar(name) => {
                let loc = self
                    .handlers
                    .get(name)
                    .copied()
                    .ok_or_else(|| CodegenError::UnknownName(name.clone()))?;
                out.push(Instr::IEscape {
                    handle_id: loc.handle_id,
                    handler_index: loc.index,
                });
            }
            CoreWord::ConstructorVar(name) => {
                let ctor = self
                    .constructors
                    .get(name)
                    .copied()
                    .ok_or_else(|| CodegenError::UnknownName(name.clone()))?;
                out.push(Instr::IConstruct {
                    id: ctor.id,
                    args: ctor.args,
                });
            }
            CoreWord::TestConstructorVar(name) => {
                let ctor = self
                    .constructors
                    .get(name)
                    .copied()
                    .ok_or_else(|| CodegenError::UnknownName(name.clone()))?;
                out.push(Instr::IIsStruct(ctor.id));
            }
        }
        Ok(())
    }
}

fn integer_immediate(value: i64, size: IntSize) -> Instr {
    match size {
        IntSize::I8 => Instr::II8(value as i8),
        IntSize::U8 => Instr::IU8(value as u8),
        IntSize::I16 => Instr::II16(value as i16),
        IntSize::U16 => Instr::IU16(value as u16),
        IntSize::I32 => Instr::II32(value as i32),
        IntSize::U32 => Instr::IU32(value as u32),
        IntSize::I64 => Instr::II64(value),
        IntSize::U64 => Instr::IU64(value as u64),
        IntSize::ISize => Instr::IISize(value),
        IntSize::USize => Instr::IUSize(value as u64),
    }
}

/// Free variables of a return clause, minus the handle parameters the
/// closure receives through `call_append`.
fn ret_free_vars(ret: &CoreExpr, params: &[String]) -> Vec<String> {
    weka_core::free_vars(ret)
        .into_iter()
        .filter(|name| !params.iter().any(|p| p == name))
        .collect()
}

fn handler_free_vars(handler: &weka_core::CoreHandler, params: &[String]) -> Vec<String> {
    weka_core::free_vars(&handler.body)
        .into_iter()
        .filter(|name| {
            name != "resume"
                && !params.iter().any(|p| p == name)
                && !handler.params.iter().any(|p| p == name)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Program assembly
// ---------------------------------------------------------------------------

/// Generate the full block list for a program.
///
/// Layout contract: an anonymous entry block (`ICall main; ITailCall
/// end`), the main block, user definitions, generated closure blocks, and
/// the terminal `end: INop`.
pub fn generate(
    program: &CoreProgram,
    handlers: BTreeMap<String, HandlerLoc>,
    effects: BTreeMap<String, u32>,
    constructors: BTreeMap<String, CtorLoc>,
    config: &CodegenConfig,
) -> Result<Vec<Block>, CodegenError> {
    let mut cg = Codegen::new(handlers, effects, constructors);
    // Reserve the structural labels before any definition can claim them.
    cg.labels.insert(config.main_label.clone());
    cg.labels.insert(config.end_label.clone());

    let mut main_code = cg.gen_expr(&program.main)?;
    main_code.push(Instr::IReturn);

    let mut def_blocks = Vec::with_capacity(program.defs.len());
    for (name, body) in &program.defs {
        if !cg.labels.insert(name.clone()) {
            return Err(CodegenError::DuplicateLabel(name.clone()));
        }
        let mut code = cg.gen_expr(body)?;
        code.push(Instr::IReturn);
        def_blocks.push(Block::Labeled(name.clone(), code));
    }

    let mut blocks = Vec::with_capacity(def_blocks.len() + cg.blocks.len() + 3);
    blocks.push(Block::Anonymous(vec![
        Instr::ICall(config.main_label.clone()),
        Instr::ITailCall(config.end_label.clone()),
    ]));
    blocks.push(Block::Labeled(config.main_label.clone(), main_code));
    blocks.extend(def_blocks);
    blocks.append(&mut cg.blocks);
    blocks.push(Block::Labeled(config.end_label.clone(), vec![Instr::INop]));
    Ok(blocks)
}

// ---------------------------------------------------------------------------
// Disassembly
// ---------------------------------------------------------------------------

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::IDup => write!(f, "dup"),
            Instr::ISwap => write!(f, "swap"),
            Instr::IZap => write!(f, "zap"),
            Instr::INip => write!(f, "nip"),
            Instr::II8(v) => write!(f, "i8 {v}"),
            Instr::IU8(v) => write!(f, "u8 {v}"),
            Instr::II16(v) => write!(f, "i16 {v}"),
            Instr::IU16(v) => write!(f, "u16 {v}"),
            Instr::II32(v) => write!(f, "i32 {v}"),
            Instr::IU32(v) => write!(f, "u32 {v}"),
            Instr::II64(v) => write!(f, "i64 {v}"),
            Instr::IU64(v) => write!(f, "u64 {v}"),
            Instr::IISize(v) => write!(f, "isize {v}"),
            Instr::IUSize(v) => write!(f, "usize {v}"),
            Instr::IIntAdd(s) => write!(f, "add-{}", s.suffix()),
            Instr::IIntSub(s) => write!(f, "sub-{}", s.suffix()),
            Instr::IIntMul(s) => write!(f, "mul-{}", s.suffix()),
            Instr::IIntDiv(s) => write!(f, "div-{}", s.suffix()),
            Instr::IIntRem(s) => write!(f, "rem-{}", s.suffix()),
            Instr::IIntAnd(s) => write!(f, "and-{}", s.suffix()),
            Instr::IIntOr(s) => write!(f, "or-{}", s.suffix()),
            Instr::IIntXor(s) => write!(f, "xor-{}", s.suffix()),
            Instr::IIntShl(s) => write!(f, "shl-{}", s.suffix()),
            Instr::IIntShr(s) => write!(f, "shr-{}", s.suffix()),
            Instr::IIntNeg(s) => write!(f, "neg-{}", s.suffix()),
            Instr::IIntEq(s) => write!(f, "eq-{}", s.suffix()),
            Instr::IIntNeq(s) => write!(f, "neq-{}", s.suffix()),
            Instr::IIntLt(s) => write!(f, "lt-{}", s.suffix()),
            Instr::IIntGt(s) => write!(f, "gt-{}", s.suffix()),
            Instr::IIntLte(s) => write!(f, "lte-{}", s.suffix()),
            Instr::IIntGte(s) => write!(f, "gte-{}", s.suffix()),
            Instr::IConvBool(s) => write!(f, "conv-bool-{}", s.suffix()),
            Instr::IConvInt(a, b) => write!(f, "conv-{}-{}", a.suffix(), b.suffix()),
            Instr::IF32(bits) => write!(f, "f32 {}", f32::from_bits(*bits)),
            Instr::IF64(bits) => write!(f, "f64 {}", f64::from_bits(*bits)),
            Instr::IFloatAdd(s) => write!(f, "add-{}", s.suffix()),
            Instr::IFloatSub(s) => write!(f, "sub-{}", s.suffix()),
            Instr::IFloatMul(s) => write!(f, "mul-{}", s.suffix()),
            Instr::IFloatDiv(s) => write!(f, "div-{}", s.suffix()),
            Instr::IFloatNeg(s) => write!(f, "neg-{}", s.suffix()),
            Instr::IFloatEq(s) => write!(f, "eq-{}", s.suffix()),
            Instr::IFloatNeq(s) => write!(f, "neq-{}", s.suffix()),
            Instr::IFloatLt(s) => write!(f, "lt-{}", s.suffix()),
            Instr::IFloatGt(s) => write!(f, "gt-{}", s.suffix()),
            Instr::IFloatLte(s) => write!(f, "lte-{}", s.suffix()),
            Instr::IFloatGte(s) => write!(f, "gte-{}", s.suffix()),
            Instr::ITrue => write!(f, "true"),
            Instr::IFalse => write!(f, "false"),
            Instr::IBoolAnd => write!(f, "and-bool"),
            Instr::IBoolOr => write!(f, "or-bool"),
            Instr::IBoolNot => write!(f, "not-bool"),
            Instr::IBoolXor => write!(f, "xor-bool"),
            Instr::IString(s) => write!(f, "string {s:?}"),
            Instr::IListNil => write!(f, "nil"),
            Instr::IListCons => write!(f, "cons"),
            Instr::IListHead => write!(f, "head"),
            Instr::IListTail => write!(f, "tail"),
            Instr::IListIsEmpty => write!(f, "is-nil"),
            Instr::IListAppend => write!(f, "list-append"),
            Instr::INewRef => write!(f, "new-ref"),
            Instr::IGetRef => write!(f, "get-ref"),
            Instr::IPutRef => write!(f, "put-ref"),
            Instr::IRecordEmpty => write!(f, "record-empty"),
            Instr::IRecordExtend(l) => write!(f, "record-extend {l}"),
            Instr::IRecordRestrict(l) => write!(f, "record-restrict {l}"),
            Instr::IRecordSelect(l) => write!(f, "record-select {l}"),
            Instr::IVariant(l) => write!(f, "variant {l}"),
            Instr::ICaseVariant { label, else_offset } => {
                write!(f, "case-variant {label} else {else_offset}")
            }
            Instr::IUnstruct(id) => write!(f, "unstruct {id}"),
            Instr::IOffset(k) => write!(f, "offset {k}"),
            Instr::IOffsetIf(k) => write!(f, "offset-if {k}"),
            Instr::IOffsetIfNot(k) => write!(f, "offset-if-not {k}"),
            Instr::ICall(l) => write!(f, "call {l}"),
            Instr::ITailCall(l) => write!(f, "tail-call {l}"),
            Instr::IReturn => write!(f, "return"),
            Instr::IHandle {
                handle_id,
                after_offset,
                params,
                handlers,
            } => write!(f, "handle {handle_id} after {after_offset} params {params} handlers {handlers}"),
            Instr::IComplete => write!(f, "complete"),
            Instr::IEscape {
                handle_id,
                handler_index,
            } => write!(f, "escape {handle_id} {handler_index}"),
            Instr::ICallClosure => write!(f, "call-closure"),
            Instr::ICallContinuation => write!(f, "call-continuation"),
            Instr::IClosure {
                label,
                args,
                closed,
            } => {
                write!(f, "closure {label} args {args} closed [")?;
                for (i, fr) in closed.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}.{}", fr.frame, fr.index)?;
                }
                write!(f, "]")
            }
            Instr::IMutual(n) => write!(f, "mutual {n}"),
            Instr::IStore(n) => write!(f, "store {n}"),
            Instr::IFind { frame, index } => write!(f, "find {frame}.{index}"),
            Instr::IForget => write!(f, "forget"),
            Instr::IConstruct { id, args } => write!(f, "construct {id} {args}"),
            Instr::IIsStruct(id) => write!(f, "is-struct {id}"),
            Instr::INop => write!(f, "nop"),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Block::Labeled(name, instrs) => {
                writeln!(f, "{name}:")?;
                for instr in instrs {
                    writeln!(f, "  {instr}")?;
                }
                Ok(())
            }
            Block::Anonymous(instrs) => {
                for instr in instrs {
                    writeln!(f, "  {instr}")?;
                }
                Ok(())
            }
        }
    }
}

/// Render a whole program listing.
pub fn disassemble(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        out.push_str(&block.to_string());
    }
    out
}

#[cfg(test)]
mod tests;

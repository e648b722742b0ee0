//! Target Code Generation
//!
//! Compiler pass that lowers the optimized intermediate representation (_IR_)
//! of one function into structured _x86_ (32-bit, _cdecl_) assembly, then
//! renders it as NASM Intel syntax.
//!
//! Every variable lives in a stack slot of the function's frame. `eax`, `ecx`,
//! `edx`, `xmm0` and `xmm1` are scratch registers within the template of a
//! single _IR_ instruction, and nothing is kept in registers across _IR_
//! instructions. Floating-point constants and string literals are hoisted to
//! the data segment.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use crate::compiler::ir::{self, Value};
use crate::compiler::parser::ast::{BinaryOperator, UnaryOperator};
use crate::compiler::parser::types::ValueType;
use crate::{CompileError, Result};

/// Stack-frame offsets from `ebp`, keyed by function and variable name.
///
/// Entries are append-only: a name keeps its first offset for the whole run.
/// Parameters sit above the return address (`ebp + 8 + 4i`), locals and
/// temporaries below the saved `ebp` (`ebp - 4k`).
#[derive(Debug, Default)]
pub struct OffsetTable {
    offsets: HashMap<(String, String), i32>,
    /// Bytes of locals allocated so far per function.
    frames: HashMap<String, i32>,
}

impl OffsetTable {
    /// Binds parameter `index` of `func`, returning its offset.
    pub fn bind_param(&mut self, func: &str, name: &str, index: usize) -> i32 {
        let offset = 8 + 4 * index as i32;

        *self
            .offsets
            .entry((func.to_string(), name.to_string()))
            .or_insert(offset)
    }

    /// Returns the offset of `name` in `func`, allocating a new 4-byte slot
    /// the first time the name is seen.
    pub fn offset_of(&mut self, func: &str, name: &str) -> i32 {
        match self.offsets.entry((func.to_string(), name.to_string())) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let frame = self.frames.entry(func.to_string()).or_insert(0);
                *frame += 4;

                *entry.insert(-*frame)
            }
        }
    }

    #[must_use]
    pub fn get(&self, func: &str, name: &str) -> Option<i32> {
        self.offsets
            .get(&(func.to_string(), name.to_string()))
            .copied()
    }

    /// Bytes of locals allocated for `func`.
    #[must_use]
    pub fn frame_size(&self, func: &str) -> i32 {
        self.frames.get(func).copied().unwrap_or(0)
    }
}

/// Data-segment labels of floating-point constants, keyed by bit pattern.
///
/// Labels are `__float<N>`, numbered in order of first use across the run.
#[derive(Debug, Default)]
pub struct FloatConstantTable {
    labels: HashMap<u32, String>,
    counts: HashMap<String, usize>,
}

impl FloatConstantTable {
    /// Returns the label of `value`, along with its data entry if this is the
    /// first time the value is seen.
    pub fn intern(&mut self, value: f32) -> (String, Option<DataEntry>) {
        let next = self.labels.len();

        let (label, entry) = match self.labels.entry(value.to_bits()) {
            Entry::Occupied(entry) => (entry.get().clone(), None),
            Entry::Vacant(entry) => {
                let label = entry.insert(format!("__float{next}")).clone();
                let data = DataEntry::Float {
                    label: label.clone(),
                    value,
                };
                (label, Some(data))
            }
        };

        *self.counts.entry(label.clone()).or_insert(0) += 1;

        (label, entry)
    }

    /// Number of times the constant labeled `label` was referenced.
    #[must_use]
    pub fn occurrences(&self, label: &str) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Data-segment labels of string literals (`__string<N>`).
#[derive(Debug, Default)]
pub struct StringTable {
    labels: HashMap<String, String>,
}

impl StringTable {
    /// Returns the label of `value`, along with its data entry if this is the
    /// first time the literal is seen.
    pub fn intern(&mut self, value: &str) -> (String, Option<DataEntry>) {
        if let Some(label) = self.labels.get(value) {
            return (label.clone(), None);
        }

        let label = format!("__string{}", self.labels.len());
        self.labels.insert(value.to_string(), label.clone());

        let data = DataEntry::Str {
            label: label.clone(),
            value: value.to_string(),
        };

        (label, Some(data))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Entry of the `.data` section.
#[derive(Debug, Clone, PartialEq)]
pub enum DataEntry {
    Float { label: String, value: f32 },
    /// NUL-terminated string.
    Str { label: String, value: String },
}

impl fmt::Display for DataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataEntry::Float { label, value } => {
                write!(f, "{label} dd 0x{:08X}", value.to_bits())
            }
            DataEntry::Str { label, value } => {
                write!(f, "{label} db ")?;

                let mut quoted = false;

                for byte in value.bytes() {
                    let printable = (0x20..0x7f).contains(&byte) && byte != b'"';

                    match (printable, quoted) {
                        (true, true) => write!(f, "{}", byte as char)?,
                        (true, false) => {
                            write!(f, "\"{}", byte as char)?;
                            quoted = true;
                        }
                        (false, true) => {
                            write!(f, "\", {byte}, ")?;
                            quoted = false;
                        }
                        (false, false) => write!(f, "{byte}, ")?,
                    }
                }

                if quoted {
                    write!(f, "\", ")?;
                }

                write!(f, "0")
            }
        }
    }
}

/// Assembly of one function.
#[derive(Debug, Clone)]
pub struct AsmBlock {
    /// Function name (without the symbol prefix).
    pub name: String,
    pub lines: Vec<String>,
    /// Data entries first introduced by this function.
    pub data: Vec<DataEntry>,
}

impl fmt::Display for AsmBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }

        Ok(())
    }
}

/// One _IR_ instruction and the assembly it was lowered to.
#[derive(Debug, Clone)]
pub struct LoweringRecord {
    pub ir: String,
    /// Source line of the statement the instruction came from.
    pub line: usize,
    pub asm: Vec<String>,
}

impl fmt::Display for LoweringRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "IR (line {})", self.line)?;
        writeln!(f, "{}", self.ir.trim())?;
        writeln!(f, "Was converted to:")?;

        for line in &self.asm {
            writeln!(f, "{line}")?;
        }

        Ok(())
    }
}

/// Result of lowering one function.
#[derive(Debug)]
pub struct CodegenOutput {
    pub block: AsmBlock,
    /// Parallel to the _IR_ instructions.
    pub lowering: Vec<LoweringRecord>,
}

/// _x86_ registers used by the generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Eax,
    Ecx,
    Edx,
    Esp,
    Ebp,
    /// Low byte of `eax`.
    Al,
    /// Low byte of `ecx`.
    Cl,
    Xmm0,
    Xmm1,
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reg::Eax => "eax",
            Reg::Ecx => "ecx",
            Reg::Edx => "edx",
            Reg::Esp => "esp",
            Reg::Ebp => "ebp",
            Reg::Al => "al",
            Reg::Cl => "cl",
            Reg::Xmm0 => "xmm0",
            Reg::Xmm1 => "xmm1",
        };

        write!(f, "{name}")
    }
}

/// _x86_ operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Immediate value (32-bit).
    Imm(i32),
    Reg(Reg),
    /// _IR_ variable, replaced by its stack slot before rendering.
    Symbol(String),
    /// `dword` at the specified offset from `ebp`.
    Stack(i32),
    /// `dword` stored at a data-segment label.
    Data(String),
    /// Address of a data-segment label.
    Address(String),
    /// `qword` at the top of the stack.
    StackTop,
}

impl Operand {
    /// Returns `true` if the operand refers to a memory location.
    const fn is_memory(&self) -> bool {
        matches!(
            self,
            Operand::Stack(_) | Operand::Data(_) | Operand::StackTop | Operand::Symbol(_)
        )
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(v) => write!(f, "{v}"),
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Symbol(name) => write!(f, "{name}"),
            Operand::Stack(offset) if *offset >= 0 => write!(f, "dword [ebp+{offset}]"),
            Operand::Stack(offset) => write!(f, "dword [ebp-{}]", -offset),
            Operand::Data(label) => write!(f, "dword [{label}]"),
            Operand::Address(label) => write!(f, "{label}"),
            Operand::StackTop => write!(f, "qword [esp]"),
        }
    }
}

/// Conditional codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondCode {
    /// Equal.
    E,
    /// Not-equal.
    NE,
    /// Less (signed).
    L,
    /// Less-or-equal (signed).
    LE,
    /// Greater (signed).
    G,
    /// Greater-or-equal (signed).
    GE,
    /// Below (unsigned, `comiss`).
    B,
    /// Below-or-equal (unsigned, `comiss`).
    BE,
    /// Above (unsigned, `comiss`).
    A,
    /// Above-or-equal (unsigned, `comiss`).
    AE,
    /// Parity (unordered `comiss`).
    P,
    /// No parity (ordered `comiss`).
    NP,
}

impl fmt::Display for CondCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            CondCode::E => "e",
            CondCode::NE => "ne",
            CondCode::L => "l",
            CondCode::LE => "le",
            CondCode::G => "g",
            CondCode::GE => "ge",
            CondCode::B => "b",
            CondCode::BE => "be",
            CondCode::A => "a",
            CondCode::AE => "ae",
            CondCode::P => "p",
            CondCode::NP => "np",
        };

        write!(f, "{code}")
    }
}

/// Two-operand arithmetic (`dst = dst op src`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Imul,
    Xor,
    And,
    Or,
    Addss,
    Subss,
    Mulss,
    Divss,
    Xorps,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Imul => "imul",
            BinaryOp::Xor => "xor",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Addss => "addss",
            BinaryOp::Subss => "subss",
            BinaryOp::Mulss => "mulss",
            BinaryOp::Divss => "divss",
            BinaryOp::Xorps => "xorps",
        };

        write!(f, "{op}")
    }
}

/// Conversions between `int`, `float` and `double`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvtOp {
    /// `int` to `float`.
    Cvtsi2ss,
    /// `float` to `int`, truncating.
    Cvttss2si,
    /// `float` to `double`.
    Cvtss2sd,
}

impl fmt::Display for CvtOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CvtOp::Cvtsi2ss => "cvtsi2ss",
            CvtOp::Cvttss2si => "cvttss2si",
            CvtOp::Cvtss2sd => "cvtss2sd",
        };

        write!(f, "{op}")
    }
}

/// _x86_ instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Moves `src` to `dst` (32-bit).
    Mov { src: Operand, dst: Operand },
    /// Zero-extends `src` into `dst`.
    Movzx { src: Operand, dst: Operand },
    /// Moves a scalar single-precision value.
    Movss { src: Operand, dst: Operand },
    /// Moves a scalar double-precision value.
    Movsd { src: Operand, dst: Operand },
    /// Two's complement negation in place.
    Neg(Operand),
    Binary {
        op: BinaryOp,
        src: Operand,
        dst: Operand,
    },
    /// Compares `lhs - rhs`, updating `EFLAGS`.
    Cmp { lhs: Operand, rhs: Operand },
    /// Compares two single-precision values, updating `EFLAGS`.
    Comiss { lhs: Operand, rhs: Operand },
    /// Sign-extends `eax` into `edx:eax`.
    Cdq,
    /// Signed division of `edx:eax` (quotient in `eax`, remainder in `edx`).
    Idiv(Operand),
    Cvt {
        op: CvtOp,
        src: Operand,
        dst: Operand,
    },
    /// Sets the byte register `dst` to the flag condition `code`.
    SetC { code: CondCode, dst: Reg },
    Jmp(String),
    JmpC { code: CondCode, label: String },
    Label(String),
    Push(Operand),
    Pop(Operand),
    Call(String),
    /// Subtract the specified number of bytes from `esp`.
    StackAlloc(i32),
    /// Add the specified number of bytes to `esp`.
    StackDealloc(i32),
    /// Loads a single-precision value onto the x87 stack.
    Fld(Operand),
    /// Pops `st0`, storing it to the operand (or discarding it).
    Fstp(Option<Operand>),
    /// Yields control back to the caller.
    Ret,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Mov { src, dst } => write!(f, "mov {dst}, {src}"),
            Instruction::Movzx { src, dst } => write!(f, "movzx {dst}, {src}"),
            Instruction::Movss { src, dst } => write!(f, "movss {dst}, {src}"),
            Instruction::Movsd { src, dst } => write!(f, "movsd {dst}, {src}"),
            Instruction::Neg(op) => write!(f, "neg {op}"),
            Instruction::Binary { op, src, dst } => write!(f, "{op} {dst}, {src}"),
            Instruction::Cmp { lhs, rhs } => write!(f, "cmp {lhs}, {rhs}"),
            Instruction::Comiss { lhs, rhs } => write!(f, "comiss {lhs}, {rhs}"),
            Instruction::Cdq => write!(f, "cdq"),
            Instruction::Idiv(op) => write!(f, "idiv {op}"),
            Instruction::Cvt { op, src, dst } => write!(f, "{op} {dst}, {src}"),
            Instruction::SetC { code, dst } => write!(f, "set{code} {dst}"),
            Instruction::Jmp(label) => write!(f, "jmp {label}"),
            Instruction::JmpC { code, label } => write!(f, "j{code} {label}"),
            Instruction::Label(label) => write!(f, "{label}:"),
            Instruction::Push(op) => write!(f, "push {op}"),
            Instruction::Pop(op) => write!(f, "pop {op}"),
            Instruction::Call(symbol) => write!(f, "call {symbol}"),
            Instruction::StackAlloc(n) => write!(f, "sub esp, {n}"),
            Instruction::StackDealloc(n) => write!(f, "add esp, {n}"),
            Instruction::Fld(op) => write!(f, "fld {op}"),
            Instruction::Fstp(Some(op)) => write!(f, "fstp {op}"),
            Instruction::Fstp(None) => write!(f, "fstp st0"),
            Instruction::Ret => write!(f, "ret"),
        }
    }
}

/// Generates the assembly block of `func`, allocating stack slots in
/// `offsets` and data-segment labels in `floats` and `strings`.
///
/// # Errors
///
/// Returns `CompileError::Internal` if the _IR_ contains an operation with no
/// instruction template (which lowering never produces).
pub fn generate_asm(
    func: &ir::Function,
    offsets: &mut OffsetTable,
    floats: &mut FloatConstantTable,
    strings: &mut StringTable,
) -> Result<CodegenOutput> {
    for (i, param) in func.params.iter().enumerate() {
        offsets.bind_param(&func.name, &param.name, i);
    }

    let mut lowering = Lowering {
        floats,
        strings,
        data: Vec::new(),
    };

    // Pass 1 - Structured assembly for each _IR_ instruction.
    let mut chunks = func
        .instructions
        .iter()
        .map(|inst| lowering.instruction(inst))
        .collect::<Result<Vec<_>>>()?;

    for chunk in &mut chunks {
        // Pass 2 - Each symbol replaced with its stack slot.
        replace_symbols(chunk, &func.name, offsets);

        // Pass 3 - Rewrite invalid instructions (operands may now be memory
        // addresses).
        rewrite_invalid_instructions(chunk);
    }

    // Pass 4 - Frame setup, reserving 16-byte aligned local storage.
    let frame = (offsets.frame_size(&func.name) + 15) & !15;

    let mut lines = vec![format!("_{}:", func.name)];
    lines.extend(
        [
            Instruction::Push(Operand::Reg(Reg::Ebp)),
            Instruction::Mov {
                src: Operand::Reg(Reg::Esp),
                dst: Operand::Reg(Reg::Ebp),
            },
            Instruction::StackAlloc(frame),
        ]
        .iter()
        .map(render),
    );

    let mut records = Vec::with_capacity(chunks.len());

    for ((inst, line), chunk) in func.instructions.iter().zip(&func.lines).zip(chunks) {
        let asm: Vec<String> = chunk.iter().map(render).collect();
        lines.extend(asm.iter().cloned());

        records.push(LoweringRecord {
            ir: inst.to_string(),
            line: *line,
            asm,
        });
    }

    Ok(CodegenOutput {
        block: AsmBlock {
            name: func.name.clone(),
            lines,
            data: lowering.data,
        },
        lowering: records,
    })
}

/// Tears down the frame set up by the function prologue and returns.
fn epilogue() -> [Instruction; 3] {
    [
        Instruction::Mov {
            src: Operand::Reg(Reg::Ebp),
            dst: Operand::Reg(Reg::Esp),
        },
        Instruction::Pop(Operand::Reg(Reg::Ebp)),
        Instruction::Ret,
    ]
}

/// Renders one instruction as an assembly line (labels unindented).
fn render(inst: &Instruction) -> String {
    match inst {
        Instruction::Label(_) => inst.to_string(),
        _ => format!("    {inst}"),
    }
}

struct Lowering<'a> {
    floats: &'a mut FloatConstantTable,
    strings: &'a mut StringTable,
    /// Data entries introduced by the current function.
    data: Vec<DataEntry>,
}

impl Lowering<'_> {
    fn operand(&mut self, value: &Value) -> Operand {
        match value {
            Value::Int(v) => Operand::Imm(*v),
            Value::Float(v) => {
                let (label, entry) = self.floats.intern(*v);
                self.data.extend(entry);
                Operand::Data(label)
            }
            Value::Str(s) => {
                let (label, entry) = self.strings.intern(s);
                self.data.extend(entry);
                Operand::Address(label)
            }
            Value::Var(var) => Operand::Symbol(var.name.clone()),
        }
    }

    fn instruction(&mut self, inst: &ir::Instruction) -> Result<Vec<Instruction>> {
        let eax = Operand::Reg(Reg::Eax);
        let xmm0 = Operand::Reg(Reg::Xmm0);

        let out = match inst {
            ir::Instruction::Return(None) => epilogue().to_vec(),
            ir::Instruction::Return(Some(v)) if v.ty() == ValueType::Float => {
                let mut out = vec![Instruction::Fld(self.operand(v))];
                out.extend(epilogue());
                out
            }
            ir::Instruction::Return(Some(v)) => {
                let mut out = vec![Instruction::Mov {
                    src: self.operand(v),
                    dst: eax,
                }];
                out.extend(epilogue());
                out
            }
            // A float is copied as its 32-bit pattern.
            ir::Instruction::Copy { src, dst } => vec![Instruction::Mov {
                src: self.operand(src),
                dst: symbol(dst),
            }],
            ir::Instruction::Convert { src, dst } => match dst.ty {
                ValueType::Float => vec![
                    Instruction::Cvt {
                        op: CvtOp::Cvtsi2ss,
                        src: self.operand(src),
                        dst: xmm0.clone(),
                    },
                    Instruction::Movss {
                        src: xmm0,
                        dst: symbol(dst),
                    },
                ],
                _ => vec![
                    Instruction::Cvt {
                        op: CvtOp::Cvttss2si,
                        src: self.operand(src),
                        dst: eax.clone(),
                    },
                    Instruction::Mov {
                        src: eax,
                        dst: symbol(dst),
                    },
                ],
            },
            ir::Instruction::Unary { op, src, dst } => self.unary(*op, src, dst),
            ir::Instruction::Binary { op, lhs, rhs, dst } => {
                if lhs.ty() == ValueType::Float {
                    self.float_binary(*op, lhs, rhs, dst)?
                } else {
                    self.int_binary(*op, lhs, rhs, dst)?
                }
            }
            ir::Instruction::Jump(target) => vec![Instruction::Jmp(target.clone())],
            ir::Instruction::JumpIfZero { cond, target } => {
                self.jump_on_zero(cond, target, CondCode::E)
            }
            ir::Instruction::JumpIfNotZero { cond, target } => {
                self.jump_on_zero(cond, target, CondCode::NE)
            }
            ir::Instruction::Label(label) => vec![Instruction::Label(label.clone())],
            ir::Instruction::Call {
                callee,
                args,
                dst,
                ret,
                varargs_at,
            } => self.call(callee, args, dst.as_ref(), *ret, *varargs_at),
        };

        Ok(out)
    }

    fn unary(&mut self, op: UnaryOperator, src: &Value, dst: &ir::Var) -> Vec<Instruction> {
        let eax = Operand::Reg(Reg::Eax);
        let float = src.ty() == ValueType::Float;
        let src = self.operand(src);
        let dst = symbol(dst);

        match (op, float) {
            (UnaryOperator::Negate, false) => vec![
                Instruction::Mov {
                    src,
                    dst: dst.clone(),
                },
                Instruction::Neg(dst),
            ],
            // Flip the sign bit of the 32-bit pattern.
            (UnaryOperator::Negate, true) => vec![
                Instruction::Mov {
                    src,
                    dst: eax.clone(),
                },
                Instruction::Binary {
                    op: BinaryOp::Xor,
                    src: Operand::Imm(i32::MIN),
                    dst: eax.clone(),
                },
                Instruction::Mov { src: eax, dst },
            ],
            (UnaryOperator::Not, true) => {
                let mut out = float_truth(src);
                out.extend([
                    Instruction::Binary {
                        op: BinaryOp::Xor,
                        src: Operand::Imm(1),
                        dst: Operand::Reg(Reg::Al),
                    },
                    Instruction::Movzx {
                        src: Operand::Reg(Reg::Al),
                        dst: eax.clone(),
                    },
                    Instruction::Mov { src: eax, dst },
                ]);
                out
            }
            (UnaryOperator::Not, false) => vec![
                Instruction::Cmp {
                    lhs: src,
                    rhs: Operand::Imm(0),
                },
                Instruction::SetC {
                    code: CondCode::E,
                    dst: Reg::Al,
                },
                Instruction::Movzx {
                    src: Operand::Reg(Reg::Al),
                    dst: eax.clone(),
                },
                Instruction::Mov { src: eax, dst },
            ],
        }
    }

    fn int_binary(
        &mut self,
        op: BinaryOperator,
        lhs: &Value,
        rhs: &Value,
        dst: &ir::Var,
    ) -> Result<Vec<Instruction>> {
        let eax = Operand::Reg(Reg::Eax);
        let lhs = self.operand(lhs);
        let rhs = self.operand(rhs);
        let dst = symbol(dst);

        let load = Instruction::Mov {
            src: lhs,
            dst: eax.clone(),
        };

        let out = match op {
            BinaryOperator::Add | BinaryOperator::Subtract | BinaryOperator::Multiply => {
                let op = match op {
                    BinaryOperator::Add => BinaryOp::Add,
                    BinaryOperator::Subtract => BinaryOp::Sub,
                    _ => BinaryOp::Imul,
                };

                vec![
                    load,
                    Instruction::Binary {
                        op,
                        src: rhs,
                        dst: eax.clone(),
                    },
                    Instruction::Mov { src: eax, dst },
                ]
            }
            BinaryOperator::Divide | BinaryOperator::Remainder => {
                let result = if op == BinaryOperator::Divide {
                    Reg::Eax
                } else {
                    Reg::Edx
                };

                vec![
                    load,
                    Instruction::Cdq,
                    Instruction::Idiv(rhs),
                    Instruction::Mov {
                        src: Operand::Reg(result),
                        dst,
                    },
                ]
            }
            BinaryOperator::LogAnd | BinaryOperator::LogOr => {
                return Err(CompileError::Internal(format!(
                    "'{op}' reached code generation without being lowered to jumps"
                )));
            }
            _ => {
                let code = match op {
                    BinaryOperator::Eq => CondCode::E,
                    BinaryOperator::NotEq => CondCode::NE,
                    BinaryOperator::OrdLess => CondCode::L,
                    BinaryOperator::OrdLessEq => CondCode::LE,
                    BinaryOperator::OrdGreater => CondCode::G,
                    _ => CondCode::GE,
                };

                vec![
                    load,
                    Instruction::Cmp {
                        lhs: eax.clone(),
                        rhs,
                    },
                    Instruction::SetC {
                        code,
                        dst: Reg::Al,
                    },
                    Instruction::Movzx {
                        src: Operand::Reg(Reg::Al),
                        dst: eax.clone(),
                    },
                    Instruction::Mov { src: eax, dst },
                ]
            }
        };

        Ok(out)
    }

    fn float_binary(
        &mut self,
        op: BinaryOperator,
        lhs: &Value,
        rhs: &Value,
        dst: &ir::Var,
    ) -> Result<Vec<Instruction>> {
        let eax = Operand::Reg(Reg::Eax);
        let xmm0 = Operand::Reg(Reg::Xmm0);
        let lhs = self.operand(lhs);
        let rhs = self.operand(rhs);
        let dst = symbol(dst);

        let arith = match op {
            BinaryOperator::Add => Some(BinaryOp::Addss),
            BinaryOperator::Subtract => Some(BinaryOp::Subss),
            BinaryOperator::Multiply => Some(BinaryOp::Mulss),
            BinaryOperator::Divide => Some(BinaryOp::Divss),
            _ => None,
        };

        if let Some(op) = arith {
            return Ok(vec![
                Instruction::Movss {
                    src: lhs,
                    dst: xmm0.clone(),
                },
                Instruction::Binary {
                    op,
                    src: rhs,
                    dst: xmm0.clone(),
                },
                Instruction::Movss { src: xmm0, dst },
            ]);
        }

        // `comiss` sets the flags of an unsigned comparison. An unordered
        // result sets ZF, PF and CF, so only `!=` may read it as true.
        let (first, second, code) = match op {
            BinaryOperator::Eq => (lhs, rhs, CondCode::E),
            BinaryOperator::NotEq => (lhs, rhs, CondCode::NE),
            BinaryOperator::OrdLess => (rhs, lhs, CondCode::A),
            BinaryOperator::OrdLessEq => (rhs, lhs, CondCode::AE),
            BinaryOperator::OrdGreater => (lhs, rhs, CondCode::A),
            BinaryOperator::OrdGreaterEq => (lhs, rhs, CondCode::AE),
            _ => {
                return Err(CompileError::Internal(format!(
                    "no float instruction for '{op}'"
                )));
            }
        };

        let mut out = vec![
            Instruction::Movss {
                src: first,
                dst: xmm0.clone(),
            },
            Instruction::Comiss {
                lhs: xmm0,
                rhs: second,
            },
            Instruction::SetC {
                code,
                dst: Reg::Al,
            },
        ];

        match op {
            BinaryOperator::Eq => out.extend(parity(CondCode::NP, BinaryOp::And)),
            BinaryOperator::NotEq => out.extend(parity(CondCode::P, BinaryOp::Or)),
            _ => {}
        }

        out.extend([
            Instruction::Movzx {
                src: Operand::Reg(Reg::Al),
                dst: eax.clone(),
            },
            Instruction::Mov { src: eax, dst },
        ]);

        Ok(out)
    }

    fn jump_on_zero(&mut self, cond: &Value, target: &str, code: CondCode) -> Vec<Instruction> {
        let float = cond.ty() == ValueType::Float;
        let cond = self.operand(cond);
        let jump = Instruction::JmpC {
            code,
            label: target.to_string(),
        };

        if float {
            let mut out = float_truth(cond);
            out.extend([
                Instruction::Cmp {
                    lhs: Operand::Reg(Reg::Al),
                    rhs: Operand::Imm(0),
                },
                jump,
            ]);
            out
        } else {
            vec![
                Instruction::Cmp {
                    lhs: cond,
                    rhs: Operand::Imm(0),
                },
                jump,
            ]
        }
    }

    /// _cdecl_ call: arguments pushed right to left, caller cleans up. Float
    /// variadic arguments are promoted to `double`.
    fn call(
        &mut self,
        callee: &str,
        args: &[Value],
        dst: Option<&ir::Var>,
        ret: ValueType,
        varargs_at: Option<usize>,
    ) -> Vec<Instruction> {
        let mut out = Vec::new();
        let mut bytes = 0;

        for (i, arg) in args.iter().enumerate().rev() {
            let promote = arg.ty() == ValueType::Float && varargs_at.is_some_and(|at| i >= at);
            let arg = self.operand(arg);

            if promote {
                out.extend([
                    Instruction::StackAlloc(8),
                    Instruction::Cvt {
                        op: CvtOp::Cvtss2sd,
                        src: arg,
                        dst: Operand::Reg(Reg::Xmm0),
                    },
                    Instruction::Movsd {
                        src: Operand::Reg(Reg::Xmm0),
                        dst: Operand::StackTop,
                    },
                ]);
                bytes += 8;
            } else {
                out.push(Instruction::Push(arg));
                bytes += 4;
            }
        }

        out.push(Instruction::Call(format!("_{callee}")));

        if bytes > 0 {
            out.push(Instruction::StackDealloc(bytes));
        }

        match (ret, dst) {
            (ValueType::Float, dst) => out.push(Instruction::Fstp(dst.map(symbol))),
            (ValueType::Void, _) | (_, None) => {}
            (_, Some(dst)) => out.push(Instruction::Mov {
                src: Operand::Reg(Reg::Eax),
                dst: symbol(dst),
            }),
        }

        out
    }
}

fn symbol(var: &ir::Var) -> Operand {
    Operand::Symbol(var.name.clone())
}

/// Sets `al` to 1 when the float `src` is non-zero. NaN counts as non-zero.
fn float_truth(src: Operand) -> Vec<Instruction> {
    let xmm0 = Operand::Reg(Reg::Xmm0);
    let xmm1 = Operand::Reg(Reg::Xmm1);

    let mut out = vec![
        Instruction::Movss {
            src,
            dst: xmm0.clone(),
        },
        Instruction::Binary {
            op: BinaryOp::Xorps,
            src: xmm1.clone(),
            dst: xmm1.clone(),
        },
        Instruction::Comiss {
            lhs: xmm0,
            rhs: xmm1,
        },
        Instruction::SetC {
            code: CondCode::NE,
            dst: Reg::Al,
        },
    ];
    out.extend(parity(CondCode::P, BinaryOp::Or));
    out
}

/// Combines the parity flag, via `cl`, into the condition already in `al`.
fn parity(code: CondCode, op: BinaryOp) -> [Instruction; 2] {
    [
        Instruction::SetC { code, dst: Reg::Cl },
        Instruction::Binary {
            op,
            src: Operand::Reg(Reg::Cl),
            dst: Operand::Reg(Reg::Al),
        },
    ]
}

/// Replaces each symbolic operand with its stack slot in `func`.
fn replace_symbols(instructions: &mut [Instruction], func: &str, offsets: &mut OffsetTable) {
    let mut convert = |op: &mut Operand| {
        if let Operand::Symbol(name) = op {
            *op = Operand::Stack(offsets.offset_of(func, name));
        }
    };

    for inst in instructions {
        match inst {
            Instruction::Mov { src, dst }
            | Instruction::Movzx { src, dst }
            | Instruction::Movss { src, dst }
            | Instruction::Movsd { src, dst }
            | Instruction::Binary { src, dst, .. }
            | Instruction::Cvt { src, dst, .. } => {
                convert(src);
                convert(dst);
            }
            Instruction::Cmp { lhs, rhs } | Instruction::Comiss { lhs, rhs } => {
                convert(lhs);
                convert(rhs);
            }
            Instruction::Neg(op)
            | Instruction::Idiv(op)
            | Instruction::Push(op)
            | Instruction::Pop(op)
            | Instruction::Fld(op)
            | Instruction::Fstp(Some(op)) => convert(op),
            _ => {}
        }
    }
}

/// Rewrite instructions with invalid operands to valid _x86_ equivalents,
/// using `ecx` as temporary storage.
fn rewrite_invalid_instructions(instructions: &mut Vec<Instruction>) {
    let ecx = Operand::Reg(Reg::Ecx);

    let mut i = 0;

    while i < instructions.len() {
        let replacement = match &instructions[i] {
            Instruction::Mov { src, dst } if src.is_memory() && dst.is_memory() => Some([
                Instruction::Mov {
                    src: src.clone(),
                    dst: ecx.clone(),
                },
                Instruction::Mov {
                    src: ecx.clone(),
                    dst: dst.clone(),
                },
            ]),
            Instruction::Idiv(div @ Operand::Imm(_)) => Some([
                Instruction::Mov {
                    src: div.clone(),
                    dst: ecx.clone(),
                },
                Instruction::Idiv(ecx.clone()),
            ]),
            Instruction::Cmp { lhs, rhs }
                if matches!(lhs, Operand::Imm(_)) || (lhs.is_memory() && rhs.is_memory()) =>
            {
                Some([
                    Instruction::Mov {
                        src: lhs.clone(),
                        dst: ecx.clone(),
                    },
                    Instruction::Cmp {
                        lhs: ecx.clone(),
                        rhs: rhs.clone(),
                    },
                ])
            }
            Instruction::Cvt {
                op: CvtOp::Cvtsi2ss,
                src: src @ Operand::Imm(_),
                dst,
            } => Some([
                Instruction::Mov {
                    src: src.clone(),
                    dst: ecx.clone(),
                },
                Instruction::Cvt {
                    op: CvtOp::Cvtsi2ss,
                    src: ecx.clone(),
                    dst: dst.clone(),
                },
            ]),
            _ => None,
        };

        if let Some(replacement) = replacement {
            instructions.splice(i..=i, replacement);

            // Ensures the two new instructions are skipped when processing.
            i += 1;
        }

        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{Function, Var};

    fn var(name: &str, ty: ValueType) -> Var {
        Var {
            name: name.into(),
            ty,
        }
    }

    fn func(name: &str, params: Vec<Var>, instructions: Vec<ir::Instruction>) -> Function {
        Function {
            name: name.into(),
            params,
            ret: ValueType::Int,
            lines: vec![1; instructions.len()],
            instructions,
        }
    }

    fn lower(f: &Function) -> CodegenOutput {
        generate_asm(
            f,
            &mut OffsetTable::default(),
            &mut FloatConstantTable::default(),
            &mut StringTable::default(),
        )
        .expect("function should lower")
    }

    #[test]
    fn offsets_are_injective_and_stable() {
        let mut table = OffsetTable::default();

        let a = table.offset_of("f", "a");
        let b = table.offset_of("f", "b");
        let c = table.offset_of("f", "c");

        assert_eq!((a, b, c), (-4, -8, -12));
        assert_eq!(table.offset_of("f", "a"), a);
        assert_eq!(table.get("f", "b"), Some(b));
        assert_eq!(table.frame_size("f"), 12);

        // Another function starts its own frame.
        assert_eq!(table.offset_of("g", "a"), -4);
        assert_eq!(table.offset_of("f", "a"), a);

        assert_eq!(table.bind_param("g", "n", 0), 8);
        assert_eq!(table.bind_param("g", "m", 1), 12);
        assert_eq!(table.offset_of("g", "m"), 12);
        assert_eq!(table.frame_size("g"), 4);
    }

    #[test]
    fn float_constants_are_deduplicated() {
        let mut table = FloatConstantTable::default();

        let (first, entry) = table.intern(3.5);
        assert_eq!(first, "__float0");
        assert_eq!(
            entry.map(|e| e.to_string()),
            Some("__float0 dd 0x40600000".to_string())
        );

        let (again, entry) = table.intern(3.5);
        assert_eq!(again, first);
        assert!(entry.is_none());

        let (other, _) = table.intern(-3.5);
        assert_eq!(other, "__float1");

        assert_eq!(table.occurrences("__float0"), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn string_data_entry() {
        let mut table = StringTable::default();

        let (label, entry) = table.intern("x = %d\n");
        assert_eq!(label, "__string0");
        assert_eq!(
            entry.map(|e| e.to_string()),
            Some("__string0 db \"x = %d\", 10, 0".to_string())
        );

        let (_, entry) = table.intern("");
        assert_eq!(entry.map(|e| e.to_string()), Some("__string1 db 0".to_string()));
        assert!(table.intern("x = %d\n").1.is_none());
    }

    #[test]
    fn codegen_return_constant() {
        let out = lower(&func("main", Vec::new(), vec![ir::Instruction::Return(Some(Value::Int(3)))]));

        assert_eq!(
            out.block.lines,
            vec![
                "_main:",
                "    push ebp",
                "    mov ebp, esp",
                "    sub esp, 0",
                "    mov eax, 3",
                "    mov esp, ebp",
                "    pop ebp",
                "    ret",
            ]
        );
        assert!(out.block.data.is_empty());
        assert_eq!(out.lowering.len(), 1);
    }

    #[test]
    fn codegen_params_and_memory_moves() {
        let n = var("n", ValueType::Int);
        let x = var("x", ValueType::Int);

        let out = lower(&func(
            "f",
            vec![n.clone()],
            vec![
                ir::Instruction::Copy {
                    src: Value::Var(n),
                    dst: x.clone(),
                },
                ir::Instruction::Return(Some(Value::Var(x))),
            ],
        ));

        assert_eq!(
            out.lowering[0].asm,
            vec!["    mov ecx, dword [ebp+8]", "    mov dword [ebp-4], ecx"]
        );
        assert_eq!(out.lowering[1].asm[0], "    mov eax, dword [ebp-4]");
        assert_eq!(out.block.lines[3], "    sub esp, 16");
    }

    #[test]
    fn codegen_division_by_immediate() {
        let x = var("x", ValueType::Int);

        let out = lower(&func(
            "f",
            vec![x.clone()],
            vec![ir::Instruction::Binary {
                op: BinaryOperator::Remainder,
                lhs: Value::Var(x),
                rhs: Value::Int(3),
                dst: var("tmp.0", ValueType::Int),
            }],
        ));

        assert_eq!(
            out.lowering[0].asm,
            vec![
                "    mov eax, dword [ebp+8]",
                "    cdq",
                "    mov ecx, 3",
                "    idiv ecx",
                "    mov dword [ebp-4], edx",
            ]
        );
    }

    #[test]
    fn codegen_variadic_float_promoted() {
        let y = var("y", ValueType::Float);

        let out = lower(&func(
            "f",
            vec![y.clone()],
            vec![ir::Instruction::Call {
                callee: "printf".into(),
                args: vec![Value::Str("%f\n".into()), Value::Var(y)],
                dst: None,
                ret: ValueType::Int,
                varargs_at: Some(1),
            }],
        ));

        assert_eq!(
            out.lowering[0].asm,
            vec![
                "    sub esp, 8",
                "    cvtss2sd xmm0, dword [ebp+8]",
                "    movsd qword [esp], xmm0",
                "    push __string0",
                "    call _printf",
                "    add esp, 12",
            ]
        );
        assert_eq!(out.block.data.len(), 1);
    }

    #[test]
    fn codegen_float_return_and_comparison() {
        let t = var("tmp.0", ValueType::Int);

        let mut f = func(
            "g",
            Vec::new(),
            vec![
                ir::Instruction::Binary {
                    op: BinaryOperator::OrdLess,
                    lhs: Value::Float(1.0),
                    rhs: Value::Float(2.0),
                    dst: t,
                },
                ir::Instruction::Return(Some(Value::Float(1.0))),
            ],
        );
        f.ret = ValueType::Float;

        let mut floats = FloatConstantTable::default();
        let out = generate_asm(
            &f,
            &mut OffsetTable::default(),
            &mut floats,
            &mut StringTable::default(),
        )
        .expect("function should lower");

        assert_eq!(
            out.lowering[0].asm,
            vec![
                "    movss xmm0, dword [__float1]",
                "    comiss xmm0, dword [__float0]",
                "    seta al",
                "    movzx eax, al",
                "    mov dword [ebp-4], eax",
            ]
        );
        assert_eq!(out.lowering[1].asm[0], "    fld dword [__float0]");
        assert_eq!(out.block.data.len(), 2);
        assert_eq!(floats.occurrences("__float0"), 2);
    }

    #[test]
    fn codegen_float_comparisons_are_false_when_unordered() {
        let a = var("a", ValueType::Float);
        let b = var("b", ValueType::Float);
        let compare = |op| ir::Instruction::Binary {
            op,
            lhs: Value::Var(a.clone()),
            rhs: Value::Var(b.clone()),
            dst: var("tmp.0", ValueType::Int),
        };

        let out = lower(&func(
            "f",
            vec![a.clone(), b.clone()],
            vec![
                compare(BinaryOperator::Eq),
                compare(BinaryOperator::NotEq),
                compare(BinaryOperator::OrdLessEq),
                ir::Instruction::JumpIfZero {
                    cond: Value::Var(a.clone()),
                    target: "end".into(),
                },
            ],
        ));

        assert_eq!(
            out.lowering[0].asm[..5],
            [
                "    movss xmm0, dword [ebp+8]",
                "    comiss xmm0, dword [ebp+12]",
                "    sete al",
                "    setnp cl",
                "    and al, cl",
            ]
        );
        assert_eq!(out.lowering[1].asm[2..5], ["    setne al", "    setp cl", "    or al, cl"]);
        assert_eq!(
            out.lowering[2].asm[..3],
            [
                "    movss xmm0, dword [ebp+12]",
                "    comiss xmm0, dword [ebp+8]",
                "    setae al",
            ]
        );
        assert_eq!(
            out.lowering[3].asm,
            vec![
                "    movss xmm0, dword [ebp+8]",
                "    xorps xmm1, xmm1",
                "    comiss xmm0, xmm1",
                "    setne al",
                "    setp cl",
                "    or al, cl",
                "    cmp al, 0",
                "    je end",
            ]
        );
    }

    #[test]
    fn codegen_float_constants_shared_across_functions() {
        let mut offsets = OffsetTable::default();
        let mut floats = FloatConstantTable::default();
        let mut strings = StringTable::default();

        let body = || {
            vec![ir::Instruction::Copy {
                src: Value::Float(0.25),
                dst: var("x", ValueType::Float),
            }]
        };

        let first = generate_asm(&func("a", Vec::new(), body()), &mut offsets, &mut floats, &mut strings)
            .expect("function should lower");
        let second = generate_asm(&func("b", Vec::new(), body()), &mut offsets, &mut floats, &mut strings)
            .expect("function should lower");

        assert_eq!(first.block.data.len(), 1);
        assert!(second.block.data.is_empty());
        assert_eq!(second.lowering[0].asm[0], "    mov ecx, dword [__float0]");
    }
}

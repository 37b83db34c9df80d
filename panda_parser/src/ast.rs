//! Typed AST produced by the three startup-database loaders. The entity
//! layer (`panda_entity`) walks these trees once at startup and never
//! touches `IndentNode` directly.

use panda_types::FieldType;
use panda_types::TableField;

use crate::error::Position;

/// One `config` database: every block type, its field declarations, in
/// file order (field order matters for `*BLOCKS?`/`*CAPTURE.LABELS?`
/// stability).
#[derive(Debug, Clone, Default)]
pub struct ConfigDb {
    pub blocks: Vec<ConfigBlock>,
}

#[derive(Debug, Clone)]
pub struct ConfigBlock {
    pub name: String,
    pub count: u32,
    pub fields: Vec<ConfigField>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct ConfigField {
    pub name: String,
    pub class: ClassSpec,
    pub pos: Position,
}

/// Pre-hardware-binding description of a field's class, mirroring the
/// class-variant capability set. Register bindings are attached later
/// from the `registers` database.
#[derive(Debug, Clone)]
pub enum ClassSpec {
    Param(FieldType),
    Read(FieldType),
    Write(FieldType),
    BitIn,
    PosIn,
    /// Wired bit-bus slot (0..127), fixed by the FPGA build.
    BitOut(u32),
    /// Wired position-bus slot (0..31) plus the input family.
    PosOut(u32, PosOutKind),
    ExtOut(ExtOutKind),
    Table(TableSpec),
}

/// Which hardware-input family a `pos_out` field is wired to; bounds
/// which `CAPTURE` options the entity layer allows for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosOutKind {
    Plain,
    Adc,
    Encoder,
}

impl ClassSpec {
    pub fn keyword(&self) -> &'static str {
        match self {
            ClassSpec::Param(_) => "param",
            ClassSpec::Read(_) => "read",
            ClassSpec::Write(_) => "write",
            ClassSpec::BitIn => "bit_in",
            ClassSpec::PosIn => "pos_in",
            ClassSpec::BitOut(_) => "bit_out",
            ClassSpec::PosOut(..) => "pos_out",
            ClassSpec::ExtOut(_) => "ext_out",
            ClassSpec::Table(_) => "table",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtOutKind {
    Timestamp,
    Samples,
    Bits,
}

#[derive(Debug, Clone)]
pub struct TableSpec {
    pub long: bool,
    pub max_length: u32,
    pub fields: Vec<TableField>,
}

/// One `registers` database: the fixed `*REG` constant block plus each
/// block's base address and its fields' register offsets.
#[derive(Debug, Clone, Default)]
pub struct RegistersDb {
    pub named_registers: Vec<(String, u32)>,
    pub blocks: Vec<RegisterBlock>,
}

#[derive(Debug, Clone)]
pub struct RegisterBlock {
    pub name: String,
    pub base: u32,
    pub fields: Vec<RegisterField>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct RegisterField {
    pub name: String,
    pub binding: RegisterBinding,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub enum RegisterBinding {
    /// A single-register field: `param`/`read`/`write`/mux/bit_out/pos_out.
    Single(u32),
    /// Short (register-burst) table: reset, fill, length registers.
    ShortTable { reset: u32, fill: u32, length: u32 },
    /// Long (DMA) table: page order, base register (block device index),
    /// length register.
    LongTable { order: u32, base: u32, length: u32 },
}

/// One `description` database: free-text per block and per field.
#[derive(Debug, Clone, Default)]
pub struct DescriptionDb {
    pub blocks: Vec<DescriptionBlock>,
}

#[derive(Debug, Clone)]
pub struct DescriptionBlock {
    pub name: String,
    pub text: String,
    pub fields: Vec<DescriptionField>,
}

#[derive(Debug, Clone)]
pub struct DescriptionField {
    pub name: String,
    pub text: String,
}

//! Indentation-sensitive parser for the three startup databases:
//! `config` (block/field declarations), `registers` (block bases and
//! field register offsets plus named `*REG` constants), and
//! `description` (human text per block/field).
//!
//! Each loader consumes the shared [`indent::parse_tree`] forest and
//! produces a typed AST (see [`ast`]) that the entity layer combines into
//! the live block/field registry. Reading files from disk is the caller's
//! job (`panda_entity`/the binary crate); this crate only ever sees text.

pub mod ast;
mod config;
mod description;
mod error;
pub mod indent;
mod registers;

pub use ast::ClassSpec;
pub use ast::ConfigBlock;
pub use ast::ConfigDb;
pub use ast::ConfigField;
pub use ast::DescriptionDb;
pub use ast::ExtOutKind;
pub use ast::PosOutKind;
pub use ast::RegisterBinding;
pub use ast::RegistersDb;
pub use ast::TableSpec;
pub use config::parse_config;
pub use description::parse_description;
pub use error::ParseError;
pub use error::Position;
pub use error::Result;
pub use indent::IndentNode;
pub use indent::MAX_DEPTH;
pub use registers::parse_registers;

//! Loader for the `config` database: block and field declarations.
//!
//! Grammar (one indent level per nesting):
//! ```text
//! <Block> <count>
//!     <field> param <type> [<type args>]
//!         <enum-value> <enum-name>        # only under `enum`
//!     <field> read <type> ...
//!     <field> write <type> ...
//!     <field> bit_in
//!     <field> pos_in
//!     <field> bit_out
//!     <field> pos_out
//!     <field> ext_out timestamp|samples|bits
//!     <field> table short|long <max-length>
//!         <name> <bit>[:<bit>] uint|int|enum
//!             <value> <name>              # only under `enum`
//! ```

use panda_types::FieldType;
use panda_types::TableField;
use panda_types::TableFieldType;
use panda_types::TimeUnit;

use crate::ast::ClassSpec;
use crate::ast::ConfigBlock;
use crate::ast::ConfigDb;
use crate::ast::ConfigField;
use crate::ast::ExtOutKind;
use crate::ast::TableSpec;
use crate::error::ParseError;
use crate::error::Position;
use crate::error::Result;
use crate::indent::parse_tree;
use crate::indent::IndentNode;

pub fn parse_config(file: &str, text: &str) -> Result<ConfigDb> {
    let tree = parse_tree(file, text)?;
    let mut blocks = Vec::new();
    let mut seen_names = std::collections::HashSet::new();
    for node in &tree {
        let block = parse_block(file, node)?;
        if !seen_names.insert(block.name.clone()) {
            return Err(ParseError::DuplicateName(file.to_string(), block.pos, block.name));
        }
        blocks.push(block);
    }
    Ok(ConfigDb { blocks })
}

fn parse_block(file: &str, node: &IndentNode) -> Result<ConfigBlock> {
    if node.tokens.len() != 2 {
        return Err(ParseError::malformed(file, node.pos, "expected '<Block> <count>'"));
    }
    let name = node.tokens[0].clone();
    let count: u32 = node.tokens[1]
        .parse()
        .map_err(|_| ParseError::malformed(file, node.pos, "instance count must be an integer"))?;

    let mut fields = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for child in &node.children {
        let field = parse_field(file, child)?;
        if !seen.insert(field.name.clone()) {
            return Err(ParseError::DuplicateName(file.to_string(), field.pos, field.name));
        }
        fields.push(field);
    }

    Ok(ConfigBlock { name, count, fields, pos: node.pos })
}

fn parse_field(file: &str, node: &IndentNode) -> Result<ConfigField> {
    if node.tokens.len() < 2 {
        return Err(ParseError::malformed(file, node.pos, "expected '<field> <class> ...'"));
    }
    let name = node.tokens[0].clone();
    let class_kw = node.tokens[1].as_str();
    let rest = &node.tokens[2..];

    let class = match class_kw {
        "param" => ClassSpec::Param(parse_type(file, node, rest)?),
        "read" => ClassSpec::Read(parse_type(file, node, rest)?),
        "write" => ClassSpec::Write(parse_type(file, node, rest)?),
        "bit_in" => ClassSpec::BitIn,
        "pos_in" => ClassSpec::PosIn,
        "bit_out" => {
            let index = rest
                .first()
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| ParseError::malformed(file, node.pos, "bit_out requires a bus index"))?;
            ClassSpec::BitOut(index)
        }
        "pos_out" => {
            let index = rest
                .first()
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| ParseError::malformed(file, node.pos, "pos_out requires a bus index"))?;
            let kind = match rest.get(1).map(String::as_str) {
                None | Some("plain") => crate::ast::PosOutKind::Plain,
                Some("adc") => crate::ast::PosOutKind::Adc,
                Some("encoder") => crate::ast::PosOutKind::Encoder,
                Some(other) => {
                    return Err(ParseError::malformed(file, node.pos, format!("unknown pos_out kind {other:?}")))
                }
            };
            ClassSpec::PosOut(index, kind)
        }
        "ext_out" => {
            let kind = match rest.first().map(String::as_str) {
                Some("timestamp") => ExtOutKind::Timestamp,
                Some("samples") => ExtOutKind::Samples,
                Some("bits") => ExtOutKind::Bits,
                _ => {
                    return Err(ParseError::malformed(
                        file,
                        node.pos,
                        "ext_out requires timestamp|samples|bits",
                    ))
                }
            };
            ClassSpec::ExtOut(kind)
        }
        "table" => ClassSpec::Table(parse_table_spec(file, node, rest)?),
        other => return Err(ParseError::UnknownClass(file.to_string(), node.pos, other.to_string())),
    };

    Ok(ConfigField { name, class, pos: node.pos })
}

fn parse_type(file: &str, node: &IndentNode, rest: &[String]) -> Result<FieldType> {
    let kw = rest.first().map(String::as_str).ok_or_else(|| {
        ParseError::malformed(file, node.pos, "field missing type keyword")
    })?;
    match kw {
        "uint" => {
            let max = rest.get(1).map(|s| {
                s.parse::<u64>()
                    .map_err(|_| ParseError::malformed(file, node.pos, "uint max must be an integer"))
            });
            Ok(FieldType::Uint { max: max.transpose()? })
        }
        "int" => Ok(FieldType::Int),
        "bit" => Ok(FieldType::Bit),
        "scalar" => {
            if rest.len() < 4 {
                return Err(ParseError::malformed(
                    file,
                    node.pos,
                    "scalar requires '<scale> <offset> <units>'",
                ));
            }
            let scale: f64 = rest[1]
                .parse()
                .map_err(|_| ParseError::malformed(file, node.pos, "scalar scale must be numeric"))?;
            let offset: f64 = rest[2]
                .parse()
                .map_err(|_| ParseError::malformed(file, node.pos, "scalar offset must be numeric"))?;
            Ok(FieldType::Scalar { scale, offset, units: rest[3].clone() })
        }
        "time" => {
            let unit_name = rest.get(1).map(String::as_str).unwrap_or("s");
            let unit = TimeUnit::from_name(unit_name)
                .ok_or_else(|| ParseError::malformed(file, node.pos, format!("unknown time unit {unit_name:?}")))?;
            Ok(FieldType::Time { unit })
        }
        "enum" => Ok(FieldType::Enum { entries: parse_enum_entries(file, node)? }),
        "lut" => Ok(FieldType::Lut),
        "position" => Ok(FieldType::Position),
        "bit_mux" => Ok(FieldType::BitMux),
        "pos_mux" => Ok(FieldType::PosMux),
        other => Err(ParseError::malformed(file, node.pos, format!("unknown type {other:?}"))),
    }
}

fn parse_enum_entries(file: &str, node: &IndentNode) -> Result<Vec<(u32, String)>> {
    let mut entries = Vec::new();
    for child in &node.children {
        if child.tokens.len() != 2 {
            return Err(ParseError::malformed(file, child.pos, "expected '<value> <name>'"));
        }
        let value: u32 = child.tokens[0]
            .parse()
            .map_err(|_| ParseError::malformed(file, child.pos, "enum value must be an integer"))?;
        entries.push((value, child.tokens[1].clone()));
    }
    if entries.is_empty() {
        return Err(ParseError::malformed(file, node.pos, "enum requires at least one value"));
    }
    Ok(entries)
}

fn parse_table_spec(file: &str, node: &IndentNode, rest: &[String]) -> Result<TableSpec> {
    if rest.len() < 2 {
        return Err(ParseError::malformed(file, node.pos, "table requires 'short|long <max-length>'"));
    }
    let long = match rest[0].as_str() {
        "short" => false,
        "long" => true,
        other => return Err(ParseError::malformed(file, node.pos, format!("unknown table kind {other:?}"))),
    };
    let max_length: u32 = rest[1]
        .parse()
        .map_err(|_| ParseError::malformed(file, node.pos, "table max length must be an integer"))?;

    let mut fields = Vec::new();
    for child in &node.children {
        fields.push(parse_table_field(file, child)?);
    }
    Ok(TableSpec { long, max_length, fields })
}

fn parse_table_field(file: &str, node: &IndentNode) -> Result<TableField> {
    if node.tokens.len() < 3 {
        return Err(ParseError::malformed(file, node.pos, "expected '<name> <bits> <type>'"));
    }
    let name = node.tokens[0].clone();
    let (bit_low, bit_high) = parse_bit_range(file, node.pos, &node.tokens[1])?;
    let field_type = match node.tokens[2].as_str() {
        "uint" => TableFieldType::Uint,
        "int" => TableFieldType::Int,
        "enum" => TableFieldType::Enum(parse_enum_entries(file, node)?),
        other => return Err(ParseError::malformed(file, node.pos, format!("unknown table field type {other:?}"))),
    };
    Ok(TableField { name, bit_low, bit_high, field_type })
}

fn parse_bit_range(file: &str, pos: Position, text: &str) -> Result<(u32, u32)> {
    if let Some((low, high)) = text.split_once(':') {
        let low: u32 = low.parse().map_err(|_| ParseError::malformed(file, pos, "bad bit range"))?;
        let high: u32 = high.parse().map_err(|_| ParseError::malformed(file, pos, "bad bit range"))?;
        Ok((low, high))
    } else {
        let bit: u32 = text.parse().map_err(|_| ParseError::malformed(file, pos, "bad bit index"))?;
        Ok((bit, bit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_block_with_enum_param() {
        let text = "TTLIN 6\n    VAL bit_mux\n    TERM param enum\n        0 50-Ohm\n        1 High-Z\n";
        let db = parse_config("config", text).unwrap();
        assert_eq!(db.blocks.len(), 1);
        let block = &db.blocks[0];
        assert_eq!(block.name, "TTLIN");
        assert_eq!(block.count, 6);
        assert_eq!(block.fields.len(), 2);
        match &block.fields[1].class {
            ClassSpec::Param(FieldType::Enum { entries }) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0], (0, "50-Ohm".to_string()));
            }
            other => panic!("unexpected class {other:?}"),
        }
    }

    #[test]
    fn parses_table_with_subfields() {
        let text = "SEQ 1\n    TABLE table long 1024\n        REPEATS 16:31 uint\n        TRIGGER 0:3 enum\n            0 Immediate\n            1 BITA=0\n";
        let db = parse_config("config", text).unwrap();
        let field = &db.blocks[0].fields[0];
        match &field.class {
            ClassSpec::Table(spec) => {
                assert!(spec.long);
                assert_eq!(spec.max_length, 1024);
                assert_eq!(spec.fields.len(), 2);
                assert_eq!(spec.fields[0].bit_low, 16);
                assert_eq!(spec.fields[0].bit_high, 31);
            }
            other => panic!("unexpected class {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_class() {
        let text = "PCAP 1\n    ARM bogus_class\n";
        let err = parse_config("config", text).unwrap_err();
        assert!(matches!(err, ParseError::UnknownClass(..)));
    }

    #[test]
    fn rejects_duplicate_field_name() {
        let text = "PCAP 1\n    TERM param uint 255\n    TERM param uint 255\n";
        let err = parse_config("config", text).unwrap_err();
        assert!(matches!(err, ParseError::DuplicateName(..)));
    }
}

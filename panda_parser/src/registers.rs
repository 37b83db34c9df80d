//! Loader for the `registers` database: the `*REG` named-constant block
//! plus each block's base address and field register bindings.
//!
//! Grammar:
//! ```text
//! *REG
//!     <NAME> <value>
//! <Block> <base>
//!     <field> <reg>
//!     <field> short <reset> <fill> <length>
//!     <field> long <order> <base-reg> <length-reg>
//! ```

use crate::ast::RegisterBinding;
use crate::ast::RegisterBlock;
use crate::ast::RegisterField;
use crate::ast::RegistersDb;
use crate::error::ParseError;
use crate::error::Result;
use crate::indent::parse_tree;
use crate::indent::IndentNode;

pub fn parse_registers(file: &str, text: &str) -> Result<RegistersDb> {
    let tree = parse_tree(file, text)?;
    let mut named_registers = Vec::new();
    let mut blocks = Vec::new();
    let mut seen_blocks = std::collections::HashSet::new();

    for node in &tree {
        if node.tokens.first().map(String::as_str) == Some("*REG") {
            for child in &node.children {
                if child.tokens.len() != 2 {
                    return Err(ParseError::malformed(file, child.pos, "expected '<NAME> <value>'"));
                }
                let value: u32 = child.tokens[1]
                    .parse()
                    .map_err(|_| ParseError::malformed(file, child.pos, "register value must be an integer"))?;
                named_registers.push((child.tokens[0].clone(), value));
            }
            continue;
        }

        let block = parse_register_block(file, node)?;
        if !seen_blocks.insert(block.name.clone()) {
            return Err(ParseError::DuplicateName(file.to_string(), block.pos, block.name));
        }
        blocks.push(block);
    }

    Ok(RegistersDb { named_registers, blocks })
}

fn parse_register_block(file: &str, node: &IndentNode) -> Result<RegisterBlock> {
    if node.tokens.len() != 2 {
        return Err(ParseError::malformed(file, node.pos, "expected '<Block> <base>'"));
    }
    let name = node.tokens[0].clone();
    let base: u32 = node.tokens[1]
        .parse()
        .map_err(|_| ParseError::malformed(file, node.pos, "block base must be an integer"))?;

    let mut fields = Vec::new();
    for child in &node.children {
        fields.push(parse_register_field(file, child)?);
    }
    Ok(RegisterBlock { name, base, fields, pos: node.pos })
}

fn parse_register_field(file: &str, node: &IndentNode) -> Result<RegisterField> {
    if node.tokens.len() < 2 {
        return Err(ParseError::malformed(file, node.pos, "expected '<field> <binding>'"));
    }
    let name = node.tokens[0].clone();
    let rest = &node.tokens[1..];
    let binding = match rest[0].as_str() {
        "short" => {
            if rest.len() != 4 {
                return Err(ParseError::malformed(file, node.pos, "short table requires 3 register numbers"));
            }
            RegisterBinding::ShortTable {
                reset: parse_u32(file, node, &rest[1])?,
                fill: parse_u32(file, node, &rest[2])?,
                length: parse_u32(file, node, &rest[3])?,
            }
        }
        "long" => {
            if rest.len() != 4 {
                return Err(ParseError::malformed(file, node.pos, "long table requires order, base, length"));
            }
            RegisterBinding::LongTable {
                order: parse_u32(file, node, &rest[1])?,
                base: parse_u32(file, node, &rest[2])?,
                length: parse_u32(file, node, &rest[3])?,
            }
        }
        single => RegisterBinding::Single(parse_u32(file, node, single)?),
    };
    Ok(RegisterField { name, binding, pos: node.pos })
}

fn parse_u32(file: &str, node: &IndentNode, text: &str) -> Result<u32> {
    text.parse()
        .map_err(|_| ParseError::malformed(file, node.pos, format!("expected register number, got {text:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_registers_and_block() {
        let text = "*REG\n    BIT_READ_RST 1\n    PCAP_ARM 14\nTTLIN 0\n    TERM 2\n";
        let db = parse_registers("registers", text).unwrap();
        assert_eq!(db.named_registers, vec![("BIT_READ_RST".to_string(), 1), ("PCAP_ARM".to_string(), 14)]);
        assert_eq!(db.blocks.len(), 1);
        assert_eq!(db.blocks[0].fields[0].name, "TERM");
        assert!(matches!(db.blocks[0].fields[0].binding, RegisterBinding::Single(2)));
    }

    #[test]
    fn parses_short_and_long_table_bindings() {
        let text = "SEQ 5\n    TABLE short 0 1 2\nPCAP 6\n    TABLE2 long 8 3 4\n";
        let db = parse_registers("registers", text).unwrap();
        assert!(matches!(
            db.blocks[0].fields[0].binding,
            RegisterBinding::ShortTable { reset: 0, fill: 1, length: 2 }
        ));
        assert!(matches!(
            db.blocks[1].fields[0].binding,
            RegisterBinding::LongTable { order: 8, base: 3, length: 4 }
        ));
    }
}

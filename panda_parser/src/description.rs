//! Loader for the `description` database: free-text human documentation
//! per block and per field, surfaced by `*DESC.<block>[.<field>]?`.
//!
//! Grammar:
//! ```text
//! <Block> <description text...>
//!     <field> <description text...>
//! ```

use crate::ast::DescriptionBlock;
use crate::ast::DescriptionDb;
use crate::ast::DescriptionField;
use crate::error::ParseError;
use crate::error::Result;
use crate::indent::parse_tree;
use crate::indent::IndentNode;

pub fn parse_description(file: &str, text: &str) -> Result<DescriptionDb> {
    let tree = parse_tree(file, text)?;
    let mut blocks = Vec::new();
    for node in &tree {
        blocks.push(parse_description_block(file, node)?);
    }
    Ok(DescriptionDb { blocks })
}

fn parse_description_block(file: &str, node: &IndentNode) -> Result<DescriptionBlock> {
    let (name, text) = split_name_and_text(file, node)?;
    let mut fields = Vec::new();
    for child in &node.children {
        let (fname, ftext) = split_name_and_text(file, child)?;
        fields.push(DescriptionField { name: fname, text: ftext });
    }
    Ok(DescriptionBlock { name, text, fields })
}

fn split_name_and_text(file: &str, node: &IndentNode) -> Result<(String, String)> {
    let name = node
        .tokens
        .first()
        .cloned()
        .ok_or_else(|| ParseError::malformed(file, node.pos, "expected '<name> <text...>'"))?;
    let text = node.tokens[1..].join(" ");
    Ok((name, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_and_field_text() {
        let text = "TTLIN TTL input\n    VAL Output value\n    TERM Input termination\n";
        let db = parse_description("description", text).unwrap();
        assert_eq!(db.blocks.len(), 1);
        assert_eq!(db.blocks[0].name, "TTLIN");
        assert_eq!(db.blocks[0].text, "TTL input");
        assert_eq!(db.blocks[0].fields[1].text, "Input termination");
    }
}

//! Indentation-sensitive tokenizer shared by all three startup databases.
//!
//! Each non-blank, non-comment line is `<whitespace><tokens>`. A line
//! indented further than its predecessor becomes a child of that
//! predecessor; a line returning to an equal or lower indent closes every
//! level in between. This builds the tree once, rather than pushing a
//! callback per level, and hands each database loader a typed
//! `IndentNode` to walk however its grammar requires.

use crate::error::ParseError;
use crate::error::Position;
use crate::error::Result;

pub const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct IndentNode {
    pub tokens: Vec<String>,
    pub pos: Position,
    pub children: Vec<IndentNode>,
}

/// Parses `text` (the contents of `file`) into a forest of top-level nodes.
struct Frame {
    indent: usize,
    node: IndentNode,
}

pub fn parse_tree(file: &str, text: &str) -> Result<Vec<IndentNode>> {
    let mut roots: Vec<IndentNode> = Vec::new();
    // Stack of (indent, open node); top of stack is the innermost open node.
    let mut stack: Vec<Frame> = Vec::new();

    for (line_no, raw_line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let stripped = raw_line.trim_end();
        if stripped.trim().is_empty() {
            continue;
        }
        let indent = stripped.len() - stripped.trim_start().len();
        let content = stripped.trim_start();
        if content.starts_with('#') {
            continue;
        }

        if stack.len() >= MAX_DEPTH {
            return Err(ParseError::TooDeep(
                file.to_string(),
                Position { line: line_no, column: indent },
                MAX_DEPTH,
            ));
        }

        let tokens: Vec<String> = content.split_whitespace().map(str::to_string).collect();
        let pos = Position { line: line_no, column: indent };
        let node = IndentNode { tokens, pos, children: Vec::new() };

        // Pop every frame whose indent is >= this line's indent: those
        // blocks have closed.
        while let Some(top) = stack.last() {
            if indent <= top.indent {
                let finished = stack.pop().unwrap();
                attach(&mut stack, &mut roots, finished.node);
            } else {
                break;
            }
        }

        match stack.last() {
            Some(top) if indent <= top.indent => {
                return Err(ParseError::WrongIndent(file.to_string(), pos));
            }
            _ => {}
        }

        stack.push(Frame { indent, node });
    }

    while let Some(finished) = stack.pop() {
        attach(&mut stack, &mut roots, finished.node);
    }

    Ok(roots)
}

fn attach(stack: &mut [Frame], roots: &mut Vec<IndentNode>, node: IndentNode) {
    if let Some(parent) = stack.last_mut() {
        parent.node.children.push(node);
    } else {
        roots.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_nested_tree() {
        let text = "TTLIN 6\n    VAL bit_mux\n    TERM param enum\n        0 50-Ohm\n        1 High-Z\nPCAP 1\n    ARM write\n";
        let tree = parse_tree("config", text).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].tokens, vec!["TTLIN", "6"]);
        assert_eq!(tree[0].children.len(), 2);
        assert_eq!(tree[0].children[1].tokens, vec!["TERM", "param", "enum"]);
        assert_eq!(tree[0].children[1].children.len(), 2);
        assert_eq!(tree[1].tokens, vec!["PCAP", "1"]);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let text = "# a comment\n\nPCAP 1\n    ARM write\n";
        let tree = parse_tree("config", text).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children.len(), 1);
    }

    #[test]
    fn rejects_indent_without_parent() {
        let text = "    VAL bit_mux\n";
        let err = parse_tree("config", text).unwrap_err();
        assert!(matches!(err, ParseError::WrongIndent(..)));
    }

    #[test]
    fn rejects_excessive_depth() {
        let mut text = String::new();
        for level in 0..MAX_DEPTH + 1 {
            text.push_str(&"    ".repeat(level));
            text.push_str("X\n");
        }
        let err = parse_tree("config", &text).unwrap_err();
        assert!(matches!(err, ParseError::TooDeep(..)));
    }
}

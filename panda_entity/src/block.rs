//! A block type: its name, instance count, and ordered field map.

use std::collections::HashMap;

use crate::field::Field;

pub struct Block {
    pub name: String,
    pub count: u32,
    pub description: Option<String>,
    field_order: Vec<String>,
    fields: HashMap<String, Field>,
}

impl Block {
    pub fn new(name: String, count: u32, description: Option<String>) -> Block {
        Block { name, count, description, field_order: Vec::new(), fields: HashMap::new() }
    }

    pub fn insert(&mut self, field: Field) {
        self.field_order.push(field.name.clone());
        self.fields.insert(field.name.clone(), field);
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Fields in declaration order, matching `*BLOCKS?`/`*CAPTURE.LABELS?`
    /// stability requirements.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.field_order.iter().map(move |name| &self.fields[name])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Class;
    use panda_hw::RegAddr;
    use panda_types::FieldType;

    #[test]
    fn preserves_field_declaration_order() {
        let mut block = Block::new("PCAP".to_string(), 1, None);
        block.insert(Field::new(
            "ARM".to_string(),
            None,
            Class::Write { field_type: FieldType::Bit, regs: vec![RegAddr::new(0, 0, 0)] },
        ));
        block.insert(Field::new(
            "DISARM".to_string(),
            None,
            Class::Write { field_type: FieldType::Bit, regs: vec![RegAddr::new(0, 0, 1)] },
        ));
        let names: Vec<_> = block.fields().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["ARM", "DISARM"]);
    }
}

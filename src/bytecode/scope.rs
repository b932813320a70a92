//! Name resolution for the code generator.
//!
//! A [`Frame`] models the runtime stack of the function being compiled as a
//! stack of blocks. Each block holds the variables it declared plus a running
//! count of temporary bytes pushed above them. Offsets are computed by walking
//! from the stack top downward, so they are always relative to the current
//! stack pointer and negative.
//!
//! Globals live below the saved base pointer and are addressed through
//! [`GlobalScope`] relative to it.

use crate::lang::types::{Type, WORD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Relative to the stack pointer (`CPTOPSP`, `CPDOWNSP`, `INCISP`).
    Stack,
    /// Relative to the base pointer (`CPTOPBP`, `CPDOWNBP`, `INCIBP`).
    Base,
}

/// Where a name lives.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub storage: Storage,
    pub offset: i32,
    pub ty: Type,
    pub is_const: bool,
}

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    ty: Type,
    size: i32,
    is_const: bool,
}

#[derive(Debug, Default)]
struct Block {
    /// Declaration order; the last entry is nearest the stack top.
    vars: Vec<Variable>,
    temp: i32,
}

impl Block {
    fn scope_size(&self) -> i32 {
        self.vars.iter().map(|v| v.size).sum()
    }

    fn height(&self) -> i32 {
        self.scope_size() + self.temp
    }

    fn declares(&self, name: &str) -> bool {
        self.vars.iter().any(|v| v.name == name)
    }
}

#[derive(Debug)]
pub struct Frame {
    blocks: Vec<Block>,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    /// A frame with one (root) block.
    pub fn new() -> Self {
        Frame {
            blocks: vec![Block::default()],
        }
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn push_block(&mut self) {
        self.blocks.push(Block::default());
    }

    /// Closes the innermost block and returns the bytes its variables occupy.
    /// The root block is never removed.
    pub fn pop_block(&mut self) -> i32 {
        if self.blocks.len() == 1 {
            return 0;
        }
        self.blocks.pop().map(|b| b.scope_size()).unwrap_or(0)
    }

    fn innermost(&mut self) -> &mut Block {
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    /// Declares a variable in the innermost block. Returns `false` when the
    /// block already declares the name.
    pub fn declare(&mut self, name: &str, ty: Type, size: i32, is_const: bool) -> bool {
        let block = self.innermost();
        if block.declares(name) {
            return false;
        }
        block.vars.push(Variable {
            name: name.to_string(),
            ty,
            size,
            is_const,
        });
        true
    }

    /// Temporary bytes in the innermost block.
    pub fn temp(&self) -> i32 {
        self.blocks.last().map(|b| b.temp).unwrap_or(0)
    }

    pub fn set_temp(&mut self, temp: i32) {
        self.innermost().temp = temp;
    }

    pub fn bump(&mut self, delta: i32) {
        self.innermost().temp += delta;
    }

    /// Bytes of the whole frame: every variable and temporary.
    pub fn height(&self) -> i32 {
        self.height_from(0)
    }

    /// Bytes held by blocks `depth..`, i.e. what leaving them must pop.
    pub fn height_from(&self, depth: usize) -> i32 {
        self.blocks.iter().skip(depth).map(Block::height).sum()
    }

    pub fn lookup(&self, name: &str) -> Option<Lookup> {
        let mut offset = 0;
        for block in self.blocks.iter().rev() {
            offset -= block.temp;
            for var in block.vars.iter().rev() {
                offset -= var.size;
                if var.name == name {
                    return Some(Lookup {
                        storage: Storage::Stack,
                        offset,
                        ty: var.ty.clone(),
                        is_const: var.is_const,
                    });
                }
            }
        }
        None
    }
}

/// Globals in declaration order.
#[derive(Debug, Default)]
pub struct GlobalScope {
    vars: Vec<Variable>,
}

impl GlobalScope {
    pub fn declare(&mut self, name: &str, ty: Type, size: i32, is_const: bool) -> bool {
        if self.vars.iter().any(|v| v.name == name) {
            return false;
        }
        self.vars.push(Variable {
            name: name.to_string(),
            ty,
            size,
            is_const,
        });
        true
    }

    /// Total bytes of all globals.
    pub fn size(&self) -> i32 {
        self.vars.iter().map(|v| v.size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Base-pointer relative location. `SAVEBP` pushes one word above the
    /// globals, so every offset is one word further down.
    pub fn lookup(&self, name: &str) -> Option<Lookup> {
        let mut offset = -WORD;
        for var in self.vars.iter().rev() {
            offset -= var.size;
            if var.name == name {
                return Some(Lookup {
                    storage: Storage::Base,
                    offset,
                    ty: var.ty.clone(),
                    is_const: var.is_const,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_variable_is_nearest_the_top() {
        let mut frame = Frame::new();
        frame.declare("a", Type::Int, 4, false);
        frame.declare("v", Type::Vector, 12, false);

        assert_eq!(frame.lookup("v").unwrap().offset, -12);
        assert_eq!(frame.lookup("a").unwrap().offset, -16);
        assert_eq!(frame.height(), 16);
    }

    #[test]
    fn test_temporaries_shift_offsets() {
        let mut frame = Frame::new();
        frame.declare("a", Type::Int, 4, false);
        frame.bump(8);
        assert_eq!(frame.lookup("a").unwrap().offset, -12);
        frame.bump(-8);
        assert_eq!(frame.lookup("a").unwrap().offset, -4);
    }

    #[test]
    fn test_inner_block_shadows_outer() {
        let mut frame = Frame::new();
        frame.declare("x", Type::Int, 4, false);
        frame.push_block();
        frame.declare("x", Type::Float, 4, false);

        let inner = frame.lookup("x").unwrap();
        assert_eq!(inner.offset, -4);
        assert_eq!(inner.ty, Type::Float);

        assert_eq!(frame.pop_block(), 4);
        let outer = frame.lookup("x").unwrap();
        assert_eq!(outer.offset, -4);
        assert_eq!(outer.ty, Type::Int);
    }

    #[test]
    fn test_outer_lookup_skips_inner_temps() {
        let mut frame = Frame::new();
        frame.declare("x", Type::Int, 4, false);
        frame.bump(4);
        frame.push_block();
        frame.declare("y", Type::Int, 4, false);
        frame.bump(4);

        assert_eq!(frame.lookup("y").unwrap().offset, -8);
        assert_eq!(frame.lookup("x").unwrap().offset, -16);
        assert_eq!(frame.height_from(1), 8);
    }

    #[test]
    fn test_redeclaration_in_same_block() {
        let mut frame = Frame::new();
        assert!(frame.declare("x", Type::Int, 4, false));
        assert!(!frame.declare("x", Type::Int, 4, false));
    }

    #[test]
    fn test_root_block_is_never_popped() {
        let mut frame = Frame::new();
        frame.declare("p", Type::Int, 4, false);
        assert_eq!(frame.pop_block(), 0);
        assert!(frame.lookup("p").is_some());
    }

    #[test]
    fn test_global_offsets_skip_saved_base_pointer() {
        let mut globals = GlobalScope::default();
        globals.declare("a", Type::Int, 4, true);
        globals.declare("b", Type::String, 4, false);

        let b = globals.lookup("b").unwrap();
        assert_eq!(b.storage, Storage::Base);
        assert_eq!(b.offset, -8);
        let a = globals.lookup("a").unwrap();
        assert_eq!(a.offset, -12);
        assert!(a.is_const);
        assert_eq!(globals.size(), 8);
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of covenant.

//! The generator's image of the VM data stack.
//!
//! Each entry is labeled with the identifier it holds ("" for expression
//! temporaries) and carries the number of references the clause has left to
//! it, which decides between copying (PICK family) and consuming (ROLL
//! family) access at each use site.

use crate::error::{Error, Result};
use crate::types::Type;

#[derive(Clone, Debug)]
pub struct Entry {
    pub id: u32,
    pub label: String,
    pub ty: Type,
    pub refs_left: usize,
    /// `if` nesting depth at creation. Entries from outside the current arm
    /// must never be consumed inside it, or the arms' stacks would diverge.
    pub branch_depth: usize,
}

/// Stack image, top first.
#[derive(Clone, Debug, Default)]
pub struct Model {
    entries: Vec<Entry>,
}

impl Model {
    pub fn push(&mut self, entry: Entry) {
        self.entries.insert(0, entry);
    }

    pub fn pop(&mut self) -> Result<Entry> {
        if self.entries.is_empty() {
            return Err(Error::internal("stack model underflow"));
        }
        Ok(self.entries.remove(0))
    }

    pub fn pop_n(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            self.pop()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, depth: usize) -> Result<&Entry> {
        self.entries
            .get(depth)
            .ok_or_else(|| Error::internal(format!("no stack entry at depth {depth}")))
    }

    pub fn get_mut(&mut self, depth: usize) -> Result<&mut Entry> {
        self.entries
            .get_mut(depth)
            .ok_or_else(|| Error::internal(format!("no stack entry at depth {depth}")))
    }

    /// Depth of the topmost entry labeled `label`.
    pub fn find(&self, label: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.label == label)
    }

    pub fn find_id(&self, id: u32) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Move the entry at `depth` to the top, mirroring ROLL/ROT/SWAP.
    pub fn lift(&mut self, depth: usize) -> Result<()> {
        if depth >= self.entries.len() {
            return Err(Error::internal(format!("cannot lift depth {depth}")));
        }
        let e = self.entries.remove(depth);
        self.entries.insert(0, e);
        Ok(())
    }

    /// Swap the two topmost entries.
    pub fn swap(&mut self) -> Result<()> {
        if self.entries.len() < 2 {
            return Err(Error::internal("stack model underflow in swap"));
        }
        self.entries.swap(0, 1);
        Ok(())
    }

    /// Element-wise agreement of labels and types; used at `if` joins.
    pub fn same_shape(&self, other: &Model) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(a, b)| a.label == b.label && a.ty == b.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, label: &str) -> Entry {
        Entry {
            id,
            label: label.to_string(),
            ty: Type::Integer,
            refs_left: 1,
            branch_depth: 0,
        }
    }

    #[test]
    fn find_and_lift() {
        let mut m = Model::default();
        m.push(entry(0, "a"));
        m.push(entry(1, "b"));
        m.push(entry(2, "c")); // top
        assert_eq!(m.find("a"), Some(2));
        m.lift(2).unwrap();
        assert_eq!(m.find("a"), Some(0));
        assert_eq!(m.find("c"), Some(1));
    }

    #[test]
    fn underflow_is_internal() {
        let mut m = Model::default();
        let err = m.pop().unwrap_err();
        assert!(err.message.starts_with("internal:"));
    }

    #[test]
    fn shape_comparison() {
        let mut a = Model::default();
        let mut b = Model::default();
        a.push(entry(0, "x"));
        b.push(entry(9, "x")); // ids differ, shapes agree
        assert!(a.same_shape(&b));
        b.push(entry(10, ""));
        assert!(!a.same_shape(&b));
    }
}

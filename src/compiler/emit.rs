// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of covenant.

//! Opcode stream builder and wire encodings.
//!
//! Opcodes append to a flat byte stream; jumps reference labels and carry a
//! 4-byte little-endian absolute address, patched by `freeze` once every
//! label's offset is known. Integers use the shortest legal encoding: the
//! one-byte small-int opcodes where possible, a minimal data push otherwise.

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Nop,
    Jump,
    JumpIf,
    Verify,
    Fail,
    Depth,
    Drop,
    Dup,
    Over,
    Pick,
    Roll,
    Rot,
    Swap,
    Cat,
    Size,
    Equal,
    CatPushdata,
    Negate,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BoolAnd,
    BoolOr,
    NumEqual,
    NumNotEqual,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Sha256,
    Sha3,
    CheckSig,
    CheckMultiSig,
    TxSigHash,
    CheckPredicate,
    CheckOutput,
    Asset,
    Amount,
    BlockHeight,
}

impl Op {
    pub const fn byte(self) -> u8 {
        match self {
            Op::Nop => 0x61,
            Op::Jump => 0x63,
            Op::JumpIf => 0x64,
            Op::Verify => 0x69,
            Op::Fail => 0x6a,
            Op::Depth => 0x74,
            Op::Drop => 0x75,
            Op::Dup => 0x76,
            Op::Over => 0x78,
            Op::Pick => 0x79,
            Op::Roll => 0x7a,
            Op::Rot => 0x7b,
            Op::Swap => 0x7c,
            Op::Cat => 0x7e,
            Op::Size => 0x82,
            Op::Equal => 0x87,
            Op::CatPushdata => 0x89,
            Op::Negate => 0x8f,
            Op::Not => 0x91,
            Op::Add => 0x93,
            Op::Sub => 0x94,
            Op::Mul => 0x95,
            Op::Div => 0x96,
            Op::Mod => 0x97,
            Op::BoolAnd => 0x9a,
            Op::BoolOr => 0x9b,
            Op::NumEqual => 0x9c,
            Op::NumNotEqual => 0x9e,
            Op::Less => 0x9f,
            Op::Greater => 0xa0,
            Op::LessEq => 0xa1,
            Op::GreaterEq => 0xa2,
            Op::Sha256 => 0xa8,
            Op::Sha3 => 0xaa,
            Op::CheckSig => 0xac,
            Op::CheckMultiSig => 0xad,
            Op::TxSigHash => 0xae,
            Op::CheckPredicate => 0xc0,
            Op::CheckOutput => 0xc1,
            Op::Asset => 0xc2,
            Op::Amount => 0xc3,
            Op::BlockHeight => 0xcd,
        }
    }
}

const OP_FALSE: u8 = 0x00;
const OP_1NEGATE: u8 = 0x4f;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_BASE_SMALL_INT: u8 = 0x50; // OP_1..OP_16 are 0x51..0x60

/// Little-endian bytes of `n` with trailing zero bytes stripped. Negative
/// values keep all eight bytes (the sign lives in the top byte).
pub fn int_bytes(n: i64) -> Vec<u8> {
    let mut bytes = (n as u64).to_le_bytes().to_vec();
    while let Some(&last) = bytes.last() {
        if last == 0 {
            bytes.pop();
        } else {
            break;
        }
    }
    bytes
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(usize);

enum Item {
    Raw(Vec<u8>),
    Jump { op: Op, target: Label },
    Anchor(Label),
}

#[derive(Default)]
pub struct Builder {
    items: Vec<Item>,
    labels: usize,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    fn raw(&mut self, bytes: &[u8]) {
        if let Some(Item::Raw(tail)) = self.items.last_mut() {
            tail.extend_from_slice(bytes);
        } else {
            self.items.push(Item::Raw(bytes.to_vec()));
        }
    }

    pub fn op(&mut self, op: Op) {
        self.raw(&[op.byte()]);
    }

    pub fn push_int(&mut self, n: i64) {
        match n {
            0 => self.raw(&[OP_FALSE]),
            1..=16 => self.raw(&[OP_BASE_SMALL_INT + n as u8]),
            -1 => self.raw(&[OP_1NEGATE]),
            _ => self.push_data(&int_bytes(n)),
        }
    }

    pub fn push_data(&mut self, data: &[u8]) {
        match data.len() {
            0 => self.raw(&[OP_FALSE]),
            n @ 1..=75 => {
                self.raw(&[n as u8]);
                self.raw(data);
            }
            n @ 76..=0xff => {
                self.raw(&[OP_PUSHDATA1, n as u8]);
                self.raw(data);
            }
            n @ 0x100..=0xffff => {
                self.raw(&[OP_PUSHDATA2]);
                self.raw(&(n as u16).to_le_bytes());
                self.raw(data);
            }
            n => {
                self.raw(&[OP_PUSHDATA4]);
                self.raw(&(n as u32).to_le_bytes());
                self.raw(data);
            }
        }
    }

    pub fn label(&mut self) -> Label {
        self.labels += 1;
        Label(self.labels - 1)
    }

    pub fn jump(&mut self, target: Label) {
        self.items.push(Item::Jump {
            op: Op::Jump,
            target,
        });
    }

    pub fn jump_if(&mut self, target: Label) {
        self.items.push(Item::Jump {
            op: Op::JumpIf,
            target,
        });
    }

    /// Pin `label` to the current end of the stream.
    pub fn anchor(&mut self, label: Label) {
        self.items.push(Item::Anchor(label));
    }

    /// Resolve labels and return the final byte body.
    pub fn freeze(self) -> Result<Vec<u8>> {
        let mut offsets = vec![None; self.labels];
        let mut at = 0usize;
        for item in &self.items {
            match item {
                Item::Raw(bytes) => at += bytes.len(),
                Item::Jump { .. } => at += 5,
                Item::Anchor(Label(i)) => offsets[*i] = Some(at),
            }
        }
        let mut body = Vec::with_capacity(at);
        for item in &self.items {
            match item {
                Item::Raw(bytes) => body.extend_from_slice(bytes),
                Item::Jump { op, target } => {
                    let Some(target_at) = offsets[target.0] else {
                        return Err(Error::internal("jump to an unanchored label"));
                    };
                    body.push(op.byte());
                    body.extend_from_slice(&(target_at as u32).to_le_bytes());
                }
                Item::Anchor(_) => {}
            }
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frozen(f: impl FnOnce(&mut Builder)) -> Vec<u8> {
        let mut b = Builder::new();
        f(&mut b);
        b.freeze().unwrap()
    }

    #[test]
    fn small_int_encodings() {
        assert_eq!(frozen(|b| b.push_int(0)), [0x00]);
        assert_eq!(frozen(|b| b.push_int(1)), [0x51]);
        assert_eq!(frozen(|b| b.push_int(16)), [0x60]);
        assert_eq!(frozen(|b| b.push_int(-1)), [0x4f]);
        assert_eq!(frozen(|b| b.push_int(17)), [0x01, 0x11]);
        assert_eq!(
            frozen(|b| b.push_int(100_000_000)),
            [0x04, 0x00, 0xe1, 0xf5, 0x05]
        );
    }

    #[test]
    fn negative_ints_keep_all_bytes() {
        assert_eq!(
            frozen(|b| b.push_int(-2)),
            [8, 0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn data_push_boundaries() {
        let body = frozen(|b| b.push_data(&[0xab; 75]));
        assert_eq!(body[0], 75);
        assert_eq!(body.len(), 76);

        let body = frozen(|b| b.push_data(&[0xab; 76]));
        assert_eq!(&body[..2], &[0x4c, 76]);

        let body = frozen(|b| b.push_data(&[0xab; 256]));
        assert_eq!(&body[..3], &[0x4d, 0x00, 0x01]);

        assert_eq!(frozen(|b| b.push_data(&[])), [0x00]);
    }

    #[test]
    fn jumps_are_absolute_little_endian() {
        let mut b = Builder::new();
        let end = b.label();
        b.jump_if(end);
        b.op(Op::Nop);
        b.anchor(end);
        let body = b.freeze().unwrap();
        assert_eq!(body, [0x64, 0x06, 0x00, 0x00, 0x00, 0x61]);
    }

    #[test]
    fn unanchored_label_is_internal() {
        let mut b = Builder::new();
        let l = b.label();
        b.jump(l);
        let err = b.freeze().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Internal);
    }
}

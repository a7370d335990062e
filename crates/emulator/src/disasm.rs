//! Instruction disassembly over a live memory image.
//!
//! Addresses whose memory still holds the linked encoding keep their symbol
//! operands. Anything else is decoded from memory and rendered with numeric
//! immediates.

use armlet_isa::syntax::render_plain;
use armlet_isa::WORD_BYTES;
use armlet_linker::{InstructionResolver, Program};

use crate::decoder::Decoder;
use crate::memory::Memory;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single disassembled instruction row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DisassemblyRow {
    /// Address of the word.
    pub address: u32,
    /// Word read from memory.
    pub word: u32,
    /// Mnemonic, or `.word` for an illegal encoding.
    pub mnemonic: String,
    /// Operand text (e.g. "r0, r1, r2" or "0x0000001F ; ILLEGAL").
    pub operands: String,
    /// Whether this word fails to decode.
    pub is_illegal: bool,
}

impl DisassemblyRow {
    /// Mnemonic and operands as one line.
    #[must_use]
    pub fn text(&self) -> String {
        if self.operands.is_empty() {
            self.mnemonic.clone()
        } else {
            format!("{} {}", self.mnemonic, self.operands)
        }
    }
}

/// Disassembles up to `count` consecutive words starting at `address`.
///
/// Rows stop at the first address that cannot be read.
#[must_use]
pub fn disassemble(
    program: &Program,
    memory: &Memory,
    decoder: &Decoder,
    address: u32,
    count: usize,
) -> Vec<DisassemblyRow> {
    let mut rows = Vec::with_capacity(count);
    let mut pc = address;
    for _ in 0..count {
        let Some(row) = disassemble_one(program, memory, decoder, pc) else {
            break;
        };
        rows.push(row);
        let Some(next) = pc.checked_add(WORD_BYTES) else {
            break;
        };
        pc = next;
    }
    rows
}

fn disassemble_one(
    program: &Program,
    memory: &Memory,
    decoder: &Decoder,
    pc: u32,
) -> Option<DisassemblyRow> {
    let word = memory.read_u32(pc).ok()?;

    if let Some(text) = linked_text(program, decoder, pc, word) {
        return Some(row(pc, word, &text));
    }

    let rendered = decoder.decode(word).ok().and_then(|(instruction, _)| {
        let descriptor = decoder.codec().descriptor(instruction.opcode).ok()?;
        Some(render_plain(&instruction, descriptor))
    });
    Some(match rendered {
        Some(text) => row(pc, word, &text),
        None => DisassemblyRow {
            address: pc,
            word,
            mnemonic: ".word".to_string(),
            operands: format!("0x{word:08X} ; ILLEGAL"),
            is_illegal: true,
        },
    })
}

fn row(address: u32, word: u32, text: &str) -> DisassemblyRow {
    let (mnemonic, operands) = text.split_once(' ').unwrap_or((text, ""));
    DisassemblyRow {
        address,
        word,
        mnemonic: mnemonic.to_string(),
        operands: operands.to_string(),
        is_illegal: false,
    }
}

/// Canonical text for `pc` with symbol operands, if memory still holds what
/// the linker produced.
fn linked_text(program: &Program, decoder: &Decoder, pc: u32, word: u32) -> Option<String> {
    let instruction = program.instruction_at(pc)?;
    let decoded = instruction.decoded.as_ref()?;
    if decoder.codec().encode_instruction(decoded).ok()? != word {
        return None;
    }
    InstructionResolver::new(decoder.codec().clone())
        .render(program, instruction, decoded)
        .ok()
}

//! Representation reconciliation: third resolution stage.
//!
//! Every instruction leaves this stage with text, raw and decoded forms that
//! agree. Text is authoritative when present, then the decoded form, then
//! the raw form.

use armlet_isa::syntax::{parse_immediate, parse_register, render_instruction, tokenize};
use armlet_isa::{
    CodecError, Instruction, InstructionCodec, InstructionDescriptor, Operand, OperandKind,
};
use thiserror::Error;
use tracing::{debug, trace};

use crate::model::{Program, ProgramInstruction, SymbolReference, SymbolUsage};

/// What went wrong with one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstructionErrorKind {
    /// No text, raw or decoded form is present.
    #[error("instruction has no representation")]
    Empty,
    /// The mnemonic names no implemented opcode.
    #[error("unknown mnemonic `{mnemonic}`")]
    UnknownMnemonic {
        /// Offending mnemonic.
        mnemonic: String,
    },
    /// Visible operand count differs from the layout.
    #[error("{mnemonic} takes {expected} operands, got {found}")]
    OperandCount {
        /// Instruction mnemonic.
        mnemonic: String,
        /// Visible operands in the layout.
        expected: usize,
        /// Operands in the text.
        found: usize,
    },
    /// A register operand is not a register name.
    #[error("`{token}` is not a register")]
    InvalidRegister {
        /// Offending token.
        token: String,
    },
    /// An immediate operand is neither a literal nor a symbol.
    #[error("`{token}` is not an immediate or symbol")]
    InvalidImmediate {
        /// Offending token.
        token: String,
    },
    /// The text names a symbol the instruction does not reference.
    #[error("symbol `{name}` is not referenced by this instruction")]
    UnknownSymbol {
        /// Symbol name.
        name: String,
    },
    /// An attached symbol reference is still unbound.
    #[error("symbol `{name}` is unresolved")]
    UnresolvedSymbol {
        /// Symbol name.
        name: String,
    },
    /// A symbol is bound but its entity has no address yet.
    #[error("symbol `{name}` has no address")]
    UnresolvedAddress {
        /// Symbol name.
        name: String,
    },
    /// A hidden operand differs from the operand it is tied to.
    #[error("{mnemonic}: hidden operand {operand} differs from the operand before it")]
    TiedOperandMismatch {
        /// Instruction mnemonic.
        mnemonic: String,
        /// Index of the hidden operand.
        operand: usize,
    },
    /// The codec rejected the instruction.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Instruction resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("instruction {index}: {kind}")]
pub struct InstructionError {
    /// Index in [`Program::instructions`].
    pub index: usize,
    /// Failure detail.
    pub kind: InstructionErrorKind,
}

/// Fills in the missing representations of every instruction.
#[derive(Debug, Clone, Default)]
pub struct InstructionResolver {
    codec: InstructionCodec,
}

impl InstructionResolver {
    /// Creates a resolver over `codec`.
    #[must_use]
    pub const fn new(codec: InstructionCodec) -> Self {
        Self { codec }
    }

    /// Codec in use.
    #[must_use]
    pub const fn codec(&self) -> &InstructionCodec {
        &self.codec
    }

    /// Returns a copy of `program` whose instructions carry all three forms.
    ///
    /// # Errors
    ///
    /// Returns the first failing instruction with its index.
    pub fn resolve(&self, program: &Program) -> Result<Program, InstructionError> {
        let instructions = (0..program.instructions.len())
            .map(|index| self.resolve_instruction(program, index))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            file = %program.file_name,
            count = instructions.len(),
            "instructions reconciled"
        );
        Ok(Program {
            instructions,
            ..program.clone()
        })
    }

    /// Resolves the instruction at `index` against `program`'s tables.
    ///
    /// # Errors
    ///
    /// See [`InstructionErrorKind`].
    pub fn resolve_instruction(
        &self,
        program: &Program,
        index: usize,
    ) -> Result<ProgramInstruction, InstructionError> {
        let fail = |kind| InstructionError { index, kind };
        let Some(instruction) = program.instructions.get(index) else {
            return Err(fail(InstructionErrorKind::Empty));
        };
        self.reconcile(program, instruction).map_err(fail)
    }

    fn reconcile(
        &self,
        program: &Program,
        instruction: &ProgramInstruction,
    ) -> Result<ProgramInstruction, InstructionErrorKind> {
        if let Some(reference) = instruction.symbols.iter().find(|r| !r.is_resolved()) {
            return Err(InstructionErrorKind::UnresolvedSymbol {
                name: reference.name.clone(),
            });
        }

        let mut resolved = instruction.clone();
        if let Some(text) = &instruction.text {
            let (decoded, bindings) = self.parse(program, instruction, text)?;
            for (reference, operand) in bindings {
                resolved.symbols[reference].operand = Some(operand);
            }
            resolved.raw = Some(self.codec.lower(&decoded)?);
            resolved.decoded = Some(decoded);
        } else if let Some(decoded) = &instruction.decoded {
            resolved.raw = Some(self.codec.lower(decoded)?);
            self.check_tied(decoded)?;
            resolved.text = Some(self.render(program, instruction, decoded)?);
        } else if let Some(raw) = &instruction.raw {
            let decoded = self.codec.lift(raw)?;
            self.check_tied(&decoded)?;
            resolved.text = Some(self.render(program, instruction, &decoded)?);
            resolved.decoded = Some(decoded);
        } else {
            return Err(InstructionErrorKind::Empty);
        }
        trace!(
            text = resolved.text.as_deref().unwrap_or(""),
            "instruction resolved"
        );
        Ok(resolved)
    }

    // Hidden operands carry no text, so only the decoded and raw forms can
    // disagree with the tie.
    fn check_tied(&self, decoded: &Instruction) -> Result<(), InstructionErrorKind> {
        let descriptor = self.codec.descriptor(decoded.opcode)?;
        let mismatch = descriptor
            .operands
            .iter()
            .enumerate()
            .skip(1)
            .find(|(index, layout)| {
                layout.hidden
                    && decoded.operands.get(*index) != decoded.operands.get(index - 1)
            });
        match mismatch {
            Some((operand, _)) => Err(InstructionErrorKind::TiedOperandMismatch {
                mnemonic: descriptor.opcode.mnemonic().to_string(),
                operand,
            }),
            None => Ok(()),
        }
    }

    /// Parses `text`, returning the instruction and, for each symbol token,
    /// the reference index paired with the operand index it fills.
    fn parse(
        &self,
        program: &Program,
        instruction: &ProgramInstruction,
        text: &str,
    ) -> Result<(Instruction, Vec<(usize, usize)>), InstructionErrorKind> {
        let mut tokens = tokenize(text);
        let mnemonic = tokens.next().ok_or(InstructionErrorKind::Empty)?;
        let descriptor = self.codec.registry().by_mnemonic(mnemonic).ok_or_else(|| {
            InstructionErrorKind::UnknownMnemonic {
                mnemonic: mnemonic.to_string(),
            }
        })?;
        let tokens: Vec<&str> = tokens.collect();
        if tokens.len() != descriptor.visible_arity() {
            return Err(InstructionErrorKind::OperandCount {
                mnemonic: descriptor.opcode.mnemonic().to_string(),
                expected: descriptor.visible_arity(),
                found: tokens.len(),
            });
        }

        let mut visible = tokens.into_iter();
        let mut operands: Vec<Operand> = Vec::with_capacity(descriptor.arity());
        let mut bindings = Vec::new();
        for (index, layout) in descriptor.operands.iter().enumerate() {
            if layout.hidden {
                // Tied operand: same value as the operand before it.
                let tied = operands.last().copied().ok_or(CodecError::ArityMismatch {
                    opcode: descriptor.opcode,
                    expected: descriptor.arity(),
                    found: operands.len(),
                })?;
                operands.push(tied);
                continue;
            }
            let token = visible.next().ok_or_else(|| InstructionErrorKind::OperandCount {
                mnemonic: descriptor.opcode.mnemonic().to_string(),
                expected: descriptor.visible_arity(),
                found: operands.len(),
            })?;
            let operand = match layout.kind {
                OperandKind::Register => parse_register(token)
                    .map(Operand::Register)
                    .ok_or_else(|| InstructionErrorKind::InvalidRegister {
                        token: token.to_string(),
                    })?,
                OperandKind::Immediate => {
                    let (value, reference) = immediate_value(program, instruction, token)?;
                    if let Some(reference) = reference {
                        bindings.push((reference, index));
                    }
                    Operand::Immediate(value)
                }
            };
            operands.push(operand);
        }
        Ok((Instruction::new(descriptor.opcode, operands), bindings))
    }

    /// Renders `decoded` as assembly text. An immediate is written as a
    /// symbol only when one of `instruction`'s references is bound to that
    /// operand and resolves to its value; everything else renders as a
    /// literal.
    ///
    /// # Errors
    ///
    /// Returns [`InstructionErrorKind::Codec`] when the opcode has no
    /// descriptor.
    pub fn render(
        &self,
        program: &Program,
        instruction: &ProgramInstruction,
        decoded: &Instruction,
    ) -> Result<String, InstructionErrorKind> {
        let descriptor: &InstructionDescriptor = self.codec.descriptor(decoded.opcode)?;
        let mut consumed = vec![false; instruction.symbols.len()];
        Ok(render_instruction(decoded, descriptor, |operand, value| {
            symbol_text(program, &instruction.symbols, &mut consumed, operand, value)
        }))
    }
}

// Literal tokens yield no reference index.
fn immediate_value(
    program: &Program,
    instruction: &ProgramInstruction,
    token: &str,
) -> Result<(i64, Option<usize>), InstructionErrorKind> {
    if token.starts_with('#') {
        let value =
            parse_immediate(token).ok_or_else(|| InstructionErrorKind::InvalidImmediate {
                token: token.to_string(),
            })?;
        return Ok((value, None));
    }
    let (name, usage) =
        SymbolUsage::split(token).ok_or_else(|| InstructionErrorKind::InvalidImmediate {
            token: token.to_string(),
        })?;
    if !is_symbol_name(name) {
        return Err(InstructionErrorKind::InvalidImmediate {
            token: token.to_string(),
        });
    }
    let symbols = &instruction.symbols;
    let position = symbols
        .iter()
        .position(|reference| reference.name == name && reference.usage == usage)
        .or_else(|| symbols.iter().position(|reference| reference.name == name))
        .ok_or_else(|| InstructionErrorKind::UnknownSymbol {
            name: name.to_string(),
        })?;
    let reference = &symbols[position];
    let target = reference
        .target
        .ok_or_else(|| InstructionErrorKind::UnresolvedSymbol {
            name: name.to_string(),
        })?;
    let address = program
        .target_address(target)
        .ok_or_else(|| InstructionErrorKind::UnresolvedAddress {
            name: name.to_string(),
        })?;
    Ok((i64::from(usage.apply(address)), Some(position)))
}

fn is_symbol_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || matches!(first, '_' | '.' | '$'))
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'))
}

// A reference renders only at the operand it is bound to, in declaration
// order, each at most once.
fn symbol_text(
    program: &Program,
    symbols: &[SymbolReference],
    consumed: &mut [bool],
    operand: usize,
    value: i64,
) -> Option<String> {
    let index = symbols.iter().enumerate().position(|(index, reference)| {
        !consumed[index]
            && reference.operand == Some(operand)
            && program
                .reference_value(reference)
                .is_some_and(|resolved| i64::from(resolved) == value)
    })?;
    consumed[index] = true;
    let reference = &symbols[index];
    Some(format!("{}{}", reference.name, reference.usage.suffix()))
}

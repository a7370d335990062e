//! Assembly text conventions shared by the resolver and the disassembler.
//!
//! Grammar: `MNEMONIC op1, op2, ...`. Registers are bare names, immediates
//! carry a `#` prefix in decimal or `0x` hex, hidden operands never appear.

use crate::codec::{Instruction, Operand};
use crate::descriptor::InstructionDescriptor;
use crate::register::Register;

/// Splits assembly text on whitespace and commas, dropping empty tokens.
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
}

/// Parses a register token such as `r3` or `SP`.
#[must_use]
pub fn parse_register(token: &str) -> Option<Register> {
    Register::from_name(token)
}

/// Parses an immediate token such as `#10`, `#-4` or `#0x1F`.
#[must_use]
pub fn parse_immediate(token: &str) -> Option<i64> {
    let body = token.strip_prefix('#')?;
    let (negative, digits) = body
        .strip_prefix('-')
        .map_or((false, body), |rest| (true, rest));
    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits.bytes().all(|b| b.is_ascii_digit()) && !digits.is_empty() {
        digits.parse::<i64>().ok()?
    } else {
        return None;
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// Formats an immediate operand.
#[must_use]
pub fn format_immediate(value: i64) -> String {
    format!("#{value}")
}

/// Renders an instruction, skipping hidden operands.
///
/// `immediate` may replace an immediate operand's text (for example with a
/// symbol name); it receives the operand index and value.
#[must_use]
pub fn render_instruction<F>(
    instruction: &Instruction,
    descriptor: &InstructionDescriptor,
    mut immediate: F,
) -> String
where
    F: FnMut(usize, i64) -> Option<String>,
{
    let operands: Vec<String> = descriptor
        .operands
        .iter()
        .zip(&instruction.operands)
        .enumerate()
        .filter(|(_, (layout, _))| !layout.hidden)
        .map(|(index, (_, operand))| match *operand {
            Operand::Register(register) => register.name().to_string(),
            Operand::Immediate(value) => {
                immediate(index, value).unwrap_or_else(|| format_immediate(value))
            }
        })
        .collect();

    let mnemonic = instruction.opcode.mnemonic();
    if operands.is_empty() {
        mnemonic.to_string()
    } else {
        format!("{mnemonic} {}", operands.join(", "))
    }
}

/// Renders an instruction with plain numeric immediates.
#[must_use]
pub fn render_plain(instruction: &Instruction, descriptor: &InstructionDescriptor) -> String {
    render_instruction(instruction, descriptor, |_, _| None)
}

/// Collapses whitespace so two renderings can be compared token by token.
#[must_use]
pub fn normalize(text: &str) -> String {
    tokenize(text).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{
        normalize, parse_immediate, parse_register, render_instruction, render_plain, tokenize,
    };
    use crate::codec::{Instruction, Operand};
    use crate::opcode::Opcode;
    use crate::register::Register;
    use crate::registry::IsaRegistry;

    #[test]
    fn commas_and_whitespace_both_separate() {
        let tokens: Vec<_> = tokenize("MOVIMM16L #10,r0").collect();
        assert_eq!(tokens, vec!["MOVIMM16L", "#10", "r0"]);
        let spaced: Vec<_> = tokenize("  ADD r0 ,  r1,r2 ").collect();
        assert_eq!(spaced, vec!["ADD", "r0", "r1", "r2"]);
    }

    #[rstest]
    #[case("#10", Some(10))]
    #[case("#-4", Some(-4))]
    #[case("#0x1F", Some(31))]
    #[case("#0X10", Some(16))]
    #[case("#-0x10", Some(-16))]
    #[case("10", None)]
    #[case("#", None)]
    #[case("#1a", None)]
    #[case("#0xZZ", None)]
    fn immediates_parse(#[case] token: &str, #[case] expected: Option<i64>) {
        assert_eq!(parse_immediate(token), expected);
    }

    #[test]
    fn register_tokens_parse() {
        assert_eq!(parse_register("LR"), Some(Register::Lr));
        assert_eq!(parse_register("#1"), None);
    }

    #[test]
    fn hidden_operand_is_not_rendered() {
        let registry = IsaRegistry::standard();
        let descriptor = registry.descriptor(Opcode::MovImm16H).expect("implemented");
        let instruction = Instruction::new(
            Opcode::MovImm16H,
            vec![
                Operand::Immediate(1),
                Operand::Register(Register::R4),
                Operand::Register(Register::R4),
            ],
        );
        assert_eq!(render_plain(&instruction, descriptor), "MOVIMM16H #1, r4");
    }

    #[test]
    fn immediate_hook_substitutes_text() {
        let registry = IsaRegistry::standard();
        let descriptor = registry.descriptor(Opcode::JmpImm).expect("implemented");
        let instruction = Instruction::new(Opcode::JmpImm, vec![Operand::Immediate(0x1000)]);
        let text = render_instruction(&instruction, descriptor, |index, value| {
            (index == 0 && value == 0x1000).then(|| "main".to_string())
        });
        assert_eq!(text, "JMPIMM main");
    }

    #[test]
    fn operandless_instruction_renders_bare_mnemonic() {
        let registry = IsaRegistry::standard();
        let descriptor = registry.descriptor(Opcode::Halt).expect("implemented");
        assert_eq!(
            render_plain(&Instruction::new(Opcode::Halt, vec![]), descriptor),
            "HALT"
        );
    }

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(normalize("ADD  r0,r1,   r2"), "ADD r0 r1 r2");
    }
}

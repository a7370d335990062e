//! Symbol, memory and instruction resolution chained into one pass.

use armlet_isa::InstructionCodec;
use thiserror::Error;
use tracing::info;

use crate::instructions::{InstructionError, InstructionResolver};
use crate::layout::{LayoutConfig, LayoutError, MemoryResolver};
use crate::model::Program;
use crate::symbols::{SymbolError, SymbolResolver};

/// Failure of any resolution stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Symbol binding failed.
    #[error(transparent)]
    Symbol(#[from] SymbolError),
    /// Address assignment failed.
    #[error(transparent)]
    Layout(#[from] LayoutError),
    /// Instruction reconciliation failed.
    #[error(transparent)]
    Instruction(#[from] InstructionError),
}

/// Runs the three resolvers in order over a program.
#[derive(Debug, Clone, Default)]
pub struct Linker {
    symbols: SymbolResolver,
    memory: MemoryResolver,
    instructions: InstructionResolver,
}

impl Linker {
    /// Creates a linker with the given codec and layout settings.
    #[must_use]
    pub const fn new(codec: InstructionCodec, config: LayoutConfig) -> Self {
        Self {
            symbols: SymbolResolver::new(),
            memory: MemoryResolver::new(config),
            instructions: InstructionResolver::new(codec),
        }
    }

    /// Codec used for instruction reconciliation.
    #[must_use]
    pub const fn codec(&self) -> &InstructionCodec {
        self.instructions.codec()
    }

    /// Layout settings.
    #[must_use]
    pub const fn layout_config(&self) -> &LayoutConfig {
        self.memory.config()
    }

    /// Produces an executable program: every reference bound, every address
    /// assigned, every instruction complete.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure; `program` is never modified.
    pub fn link(&self, program: &Program) -> Result<Program, LinkError> {
        let bound = self.symbols.resolve(program)?;
        let placed = self.memory.resolve(&bound)?;
        let linked = self.instructions.resolve(&placed)?;
        if let Some(layout) = linked.layout {
            info!(
                file = %linked.file_name,
                instructions = linked.instructions.len(),
                globals = linked.globals.len(),
                code_start = layout.code_start,
                total_size = layout.total_size,
                "program linked"
            );
        }
        Ok(linked)
    }
}

#[cfg(test)]
mod tests {
    use super::{LinkError, Linker};
    use crate::layout::LayoutConfig;
    use crate::model::{Function, Program, ProgramInstruction, SymbolUsage};
    use crate::symbols::SymbolError;

    #[test]
    fn stage_errors_surface_unchanged() {
        let mut program = Program::new("unit.o");
        program.push_instruction(
            ProgramInstruction::from_text("JMPIMM nowhere")
                .with_symbol("nowhere", SymbolUsage::Full),
        );
        assert_eq!(
            Linker::default().link(&program),
            Err(LinkError::Symbol(SymbolError::UnresolvedSymbols {
                names: vec!["nowhere".to_string()],
            }))
        );
    }

    #[test]
    fn layout_limits_are_enforced() {
        let mut program = Program::new("unit.o");
        for _ in 0..4 {
            program.push_instruction(ProgramInstruction::from_text("NOP"));
        }
        let linker = Linker::new(
            armlet_isa::InstructionCodec::default(),
            LayoutConfig {
                max_size: 8,
                ..LayoutConfig::default()
            },
        );
        assert!(matches!(linker.link(&program), Err(LinkError::Layout(_))));
    }

    #[test]
    fn linked_program_is_executable() {
        let mut program = Program::new("unit.o");
        program.push_instruction(
            ProgramInstruction::from_text("CALLIMM leaf").with_symbol("leaf", SymbolUsage::Full),
        );
        program.push_instruction(ProgramInstruction::from_text("HALT"));
        program.push_instruction(ProgramInstruction::from_text("JMP lr"));
        program.add_function(Function::new("main", 0..2));
        program.add_function(Function::new("leaf", 2..3));

        let linked = Linker::default().link(&program).expect("links");
        assert!(linked.is_laid_out());
        assert!(linked.instructions.iter().all(ProgramInstruction::is_complete));
        assert_eq!(linked.function_address("leaf"), Some(0x1008));
        assert_eq!(
            linked.instructions[0].decoded.as_ref().and_then(|d| d.immediate(0)),
            Some(0x1008)
        );
    }
}

//! Address assignment: second resolution stage.

use armlet_isa::WORD_BYTES;
use thiserror::Error;
use tracing::debug;

use crate::model::{MemoryLayout, Program};
use crate::symbols::bind_references;

/// Default load address.
pub const DEFAULT_BASE_ADDRESS: u32 = 0x1000;
/// Default data-segment alignment.
pub const DEFAULT_DATA_ALIGNMENT: u32 = 4;

/// Memory resolver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LayoutConfig {
    /// First code address.
    pub base_address: u32,
    /// Upper bound on total size; zero means unbounded.
    pub max_size: u32,
    /// Alignment of the data segment start; zero means none.
    pub data_alignment: u32,
    /// Bytes per instruction slot.
    pub instruction_size: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            base_address: DEFAULT_BASE_ADDRESS,
            max_size: 0,
            data_alignment: DEFAULT_DATA_ALIGNMENT,
            instruction_size: WORD_BYTES,
        }
    }
}

/// Address assignment failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Total size exceeds the configured maximum.
    #[error("program needs {size} bytes but the maximum is {max_size}")]
    ProgramTooLarge {
        /// Required total size.
        size: u64,
        /// Configured maximum.
        max_size: u32,
    },
    /// The layout runs past the 32-bit address space.
    #[error("layout ends at {end:#x}, past the 32-bit address space")]
    AddressOverflow {
        /// One past the last byte.
        end: u64,
    },
    /// A global's initializer is longer than the global.
    #[error("global {name}: {initializer} initializer bytes exceed size {size}")]
    InitializerTooLarge {
        /// Global name.
        name: String,
        /// Declared size.
        size: u32,
        /// Initializer length.
        initializer: usize,
    },
    /// Instruction slots must be at least one byte.
    #[error("instruction size must be non-zero")]
    ZeroInstructionSize,
    /// References that no longer match any entity after rebinding.
    #[error("unresolved symbols after layout: {}", names.join(", "))]
    UnresolvedSymbols {
        /// Each unmatched name once, in first-use order.
        names: Vec<String>,
    },
}

/// Rounds `value` up to a multiple of `alignment`; zero alignment is a no-op.
#[must_use]
pub const fn align(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Computes a layout without touching any program.
///
/// # Errors
///
/// Fails on a zero instruction size, an address-space overflow, or a total
/// size above a positive `max_size`.
pub fn plan_layout(
    config: &LayoutConfig,
    instruction_count: usize,
    global_sizes: impl IntoIterator<Item = u32>,
) -> Result<MemoryLayout, LayoutError> {
    if config.instruction_size == 0 {
        return Err(LayoutError::ZeroInstructionSize);
    }
    let base = u64::from(config.base_address);
    let code_size = instruction_count as u64 * u64::from(config.instruction_size);
    let data_start = align(base + code_size, u64::from(config.data_alignment));
    let data_size: u64 = global_sizes.into_iter().map(u64::from).sum();
    let total_size = (data_start - base) + data_size;
    let end = data_start + data_size;

    if config.max_size > 0 && total_size > u64::from(config.max_size) {
        return Err(LayoutError::ProgramTooLarge {
            size: total_size,
            max_size: config.max_size,
        });
    }
    if end > 1 << 32 {
        return Err(LayoutError::AddressOverflow { end });
    }

    let narrow =
        |value: u64| u32::try_from(value).map_err(|_| LayoutError::AddressOverflow { end });
    Ok(MemoryLayout {
        base: config.base_address,
        code_start: config.base_address,
        code_size: narrow(code_size)?,
        data_start: narrow(data_start)?,
        data_size: narrow(data_size)?,
        total_size: narrow(total_size)?,
        instruction_size: config.instruction_size,
    })
}

/// Assigns concrete addresses to code and data.
///
/// Code fills `[base, base + N * instruction_size)` in program order; data
/// starts at the aligned end of code, globals laid out in declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryResolver {
    config: LayoutConfig,
}

impl MemoryResolver {
    /// Creates a resolver.
    #[must_use]
    pub const fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    /// Active settings.
    #[must_use]
    pub const fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Returns a laid-out copy of `program`.
    ///
    /// Symbol references are rebound against the new tables and debug
    /// addresses are moved to the code start. No address is assigned when
    /// any check fails.
    ///
    /// # Errors
    ///
    /// See [`plan_layout`]; also fails when an initializer exceeds its
    /// global or a symbol reference matches no entity.
    pub fn resolve(&self, program: &Program) -> Result<Program, LayoutError> {
        for global in &program.globals {
            let initializer = global.initial.as_ref().map_or(0, Vec::len);
            if initializer as u64 > u64::from(global.size) {
                return Err(LayoutError::InitializerTooLarge {
                    name: global.name.clone(),
                    size: global.size,
                    initializer,
                });
            }
        }

        let layout = plan_layout(
            &self.config,
            program.instructions.len(),
            program.globals.iter().map(|global| global.size),
        )?;

        let mut resolved = program.clone();
        let unresolved = bind_references(&mut resolved);
        if !unresolved.is_empty() {
            debug!(count = unresolved.len(), "references left unbound by layout");
            return Err(LayoutError::UnresolvedSymbols { names: unresolved });
        }
        let mut address = layout.code_start;
        for instruction in &mut resolved.instructions {
            instruction.address = Some(address);
            address = address.wrapping_add(self.config.instruction_size);
        }
        let mut address = layout.data_start;
        for global in &mut resolved.globals {
            global.address = Some(address);
            address = address.wrapping_add(global.size);
        }
        resolved.layout = Some(layout);
        resolved.debug_info = resolved
            .debug_info
            .take()
            .map(|info| info.relocated(layout.code_start));

        debug!(
            file = %program.file_name,
            code_start = layout.code_start,
            code_size = layout.code_size,
            data_start = layout.data_start,
            data_size = layout.data_size,
            "addresses assigned"
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{align, plan_layout, LayoutConfig, LayoutError, MemoryResolver};
    use crate::debug_info::{DebugInfo, SourceLocation};
    use crate::model::{Function, Global, Program, ProgramInstruction, SymbolUsage};

    fn program(instructions: usize, globals: &[u32]) -> Program {
        let mut program = Program::new("unit.o");
        for _ in 0..instructions {
            program.push_instruction(ProgramInstruction::from_text("NOP"));
        }
        for (index, size) in globals.iter().enumerate() {
            program.add_global(Global::new(format!("g{index}"), *size));
        }
        program
    }

    #[rstest]
    #[case(0, 4, 0)]
    #[case(1, 4, 4)]
    #[case(4, 4, 4)]
    #[case(5, 8, 8)]
    #[case(7, 3, 9)]
    #[case(7, 0, 7)]
    fn align_rounds_up(#[case] value: u64, #[case] alignment: u64, #[case] expected: u64) {
        assert_eq!(align(value, alignment), expected);
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = LayoutConfig::default();
        assert_eq!(config.base_address, 0x1000);
        assert_eq!(config.max_size, 0);
        assert_eq!(config.data_alignment, 4);
        assert_eq!(config.instruction_size, 4);
    }

    #[test]
    fn code_then_aligned_data() {
        let config = LayoutConfig {
            data_alignment: 16,
            ..LayoutConfig::default()
        };
        let resolved = MemoryResolver::new(config)
            .resolve(&program(3, &[4, 2, 8]))
            .expect("fits");

        let layout = resolved.layout.expect("laid out");
        assert_eq!(layout.code_start, 0x1000);
        assert_eq!(layout.code_size, 12);
        assert_eq!(layout.data_start, 0x1010);
        assert_eq!(layout.data_size, 14);
        assert_eq!(layout.total_size, 0x10 + 14);
        assert_eq!(layout.instruction_size, 4);

        let addresses: Vec<_> = resolved.globals.iter().map(|g| g.address).collect();
        assert_eq!(addresses, vec![Some(0x1010), Some(0x1014), Some(0x1016)]);
        assert_eq!(resolved.instructions[2].address, Some(0x1008));
    }

    #[test]
    fn oversized_program_fails_without_partial_assignment() {
        let config = LayoutConfig {
            max_size: 16,
            ..LayoutConfig::default()
        };
        let input = program(4, &[4]);
        let error = MemoryResolver::new(config)
            .resolve(&input)
            .expect_err("20 bytes exceed 16");
        assert_eq!(
            error,
            LayoutError::ProgramTooLarge {
                size: 20,
                max_size: 16
            }
        );
        assert!(input.instructions.iter().all(|i| i.address.is_none()));
        assert!(input.layout.is_none());
    }

    #[test]
    fn layout_past_address_space_fails() {
        let config = LayoutConfig {
            base_address: 0xFFFF_FFF8,
            ..LayoutConfig::default()
        };
        assert_eq!(
            plan_layout(&config, 3, []),
            Err(LayoutError::AddressOverflow {
                end: 0x1_0000_0004
            })
        );
        assert!(plan_layout(&config, 1, []).is_ok());
    }

    #[test]
    fn zero_instruction_size_is_rejected() {
        let config = LayoutConfig {
            instruction_size: 0,
            ..LayoutConfig::default()
        };
        assert_eq!(plan_layout(&config, 1, []), Err(LayoutError::ZeroInstructionSize));
    }

    #[test]
    fn long_initializer_is_rejected() {
        let mut input = program(1, &[]);
        input.add_global(Global::new("table", 2).with_initial(vec![1, 2, 3]));
        assert!(matches!(
            MemoryResolver::default().resolve(&input),
            Err(LayoutError::InitializerTooLarge { initializer: 3, .. })
        ));
    }

    #[test]
    fn references_and_debug_info_follow_new_addresses() {
        let mut input = program(2, &[4]);
        input.instructions[0] =
            ProgramInstruction::from_text("CALLIMM f").with_symbol("f", SymbolUsage::Full);
        input.add_function(Function::new("f", 1..2));
        let mut info = DebugInfo::new();
        info.add_line(4, SourceLocation::new("f.c", 10));
        input.debug_info = Some(info);

        let resolved = MemoryResolver::default().resolve(&input).expect("fits");
        let reference = &resolved.instructions[0].symbols[0];
        assert!(reference.is_resolved());
        assert_eq!(resolved.reference_value(reference), Some(0x1004));
        let info = resolved.debug_info.as_ref().expect("kept");
        assert_eq!(
            info.exact_location(0x1004),
            Some(&SourceLocation::new("f.c", 10))
        );
    }

    #[test]
    fn unbound_reference_fails_layout() {
        let mut input = program(2, &[]);
        input.instructions[1] =
            ProgramInstruction::from_text("JMPIMM gone").with_symbol("gone", SymbolUsage::Full);
        assert_eq!(
            MemoryResolver::default().resolve(&input),
            Err(LayoutError::UnresolvedSymbols {
                names: vec!["gone".to_string()],
            })
        );
    }

    #[test]
    fn resolving_twice_reproduces_addresses() {
        let mut input = program(3, &[5, 3]);
        let mut info = DebugInfo::new();
        info.add_line(0, SourceLocation::new("a.c", 1));
        input.debug_info = Some(info);
        let resolver = MemoryResolver::default();

        let once = resolver.resolve(&input).expect("fits");
        let twice = resolver.resolve(&once).expect("fits");
        assert_eq!(once, twice);
    }
}

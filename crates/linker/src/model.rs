//! In-memory representation of one compiled unit.
//!
//! Entities live in ordered tables and reference each other by index, so a
//! resolution stage can rebuild the tables and repoint every reference
//! without dangling pointers.

use std::ops::{Range, RangeInclusive};

use armlet_isa::{Instruction, RawInstruction};
use indexmap::IndexMap;

use crate::debug_info::DebugInfo;

/// Index of a function in [`Program::functions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FunctionId(pub usize);

/// Index of a global in [`Program::globals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct GlobalId(pub usize);

/// Index of a label in [`Program::labels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LabelId(pub usize);

/// Entity a symbol reference is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SymbolTarget {
    /// A function; its address is the address of its first instruction.
    Function(FunctionId),
    /// A global datum.
    Global(GlobalId),
    /// A code label.
    Label(LabelId),
}

/// Which part of a symbol's address an operand uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SymbolUsage {
    /// Whole address, written `name`.
    #[default]
    Full,
    /// Low 16 bits, written `name@lo`.
    Lo16,
    /// High 16 bits, written `name@hi`.
    Hi16,
}

impl SymbolUsage {
    /// Applies the usage to a resolved address.
    #[must_use]
    pub const fn apply(self, address: u32) -> u32 {
        match self {
            Self::Full => address,
            Self::Lo16 => address & 0xFFFF,
            Self::Hi16 => address >> 16,
        }
    }

    /// Assembly suffix for this usage.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Full => "",
            Self::Lo16 => "@lo",
            Self::Hi16 => "@hi",
        }
    }

    /// Parses `name`, `name@lo` or `name@hi`.
    #[must_use]
    pub fn split(token: &str) -> Option<(&str, Self)> {
        match token.split_once('@') {
            None => Some((token, Self::Full)),
            Some((name, "lo")) => Some((name, Self::Lo16)),
            Some((name, "hi")) => Some((name, Self::Hi16)),
            Some(_) => None,
        }
    }
}

/// Use of a named symbol by one instruction.
///
/// Unresolved iff `target` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SymbolReference {
    /// Referenced name.
    pub name: String,
    /// Address part used.
    pub usage: SymbolUsage,
    /// Bound entity.
    pub target: Option<SymbolTarget>,
    /// Index of the immediate operand this reference supplies. Only that
    /// operand renders as the symbol name.
    pub operand: Option<usize>,
}

impl SymbolReference {
    /// Unresolved reference to `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, usage: SymbolUsage) -> Self {
        Self {
            name: name.into(),
            usage,
            target: None,
            operand: None,
        }
    }

    /// Same reference, supplying the immediate operand at `operand`.
    #[must_use]
    pub const fn at_operand(mut self, operand: usize) -> Self {
        self.operand = Some(operand);
        self
    }

    /// True once bound.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.target.is_some()
    }
}

/// One instruction with every representation it may carry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ProgramInstruction {
    /// Resolved address.
    pub address: Option<u32>,
    /// Source line this instruction was generated from.
    pub source_line: Option<u32>,
    /// Assembly text.
    pub text: Option<String>,
    /// Field values ready to bit-pack.
    pub raw: Option<RawInstruction>,
    /// Typed form.
    pub decoded: Option<Instruction>,
    /// Symbols used by this instruction, in declaration order.
    pub symbols: Vec<SymbolReference>,
}

impl ProgramInstruction {
    /// Instruction known only by its text.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Instruction known only by its field values.
    #[must_use]
    pub fn from_raw(raw: RawInstruction) -> Self {
        Self {
            raw: Some(raw),
            ..Self::default()
        }
    }

    /// Instruction known only by its typed form.
    #[must_use]
    pub fn from_decoded(decoded: Instruction) -> Self {
        Self {
            decoded: Some(decoded),
            ..Self::default()
        }
    }

    /// Attaches a symbol reference. Parsing the text records which operand
    /// it supplies.
    #[must_use]
    pub fn with_symbol(mut self, name: impl Into<String>, usage: SymbolUsage) -> Self {
        self.symbols.push(SymbolReference::new(name, usage));
        self
    }

    /// Attaches a symbol reference supplying the immediate operand at
    /// `operand`, for instructions that carry no text.
    #[must_use]
    pub fn with_symbol_at(
        mut self,
        name: impl Into<String>,
        usage: SymbolUsage,
        operand: usize,
    ) -> Self {
        self.symbols
            .push(SymbolReference::new(name, usage).at_operand(operand));
        self
    }

    /// Sets the source line.
    #[must_use]
    pub const fn with_source_line(mut self, line: u32) -> Self {
        self.source_line = Some(line);
        self
    }

    /// True once text, raw and decoded forms are all present.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.text.is_some() && self.raw.is_some() && self.decoded.is_some()
    }
}

/// A function made of one or more instruction ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Function {
    /// Symbol name.
    pub name: String,
    /// Declaring source file.
    pub source_file: Option<String>,
    /// Declaring source lines.
    pub line_range: Option<RangeInclusive<u32>>,
    /// Disjoint instruction index ranges; the first holds the entry point.
    pub ranges: Vec<Range<usize>>,
}

impl Function {
    /// Function covering one contiguous instruction range.
    #[must_use]
    pub fn new(name: impl Into<String>, range: Range<usize>) -> Self {
        Self {
            name: name.into(),
            source_file: None,
            line_range: None,
            ranges: vec![range],
        }
    }

    /// Index of the entry instruction.
    #[must_use]
    pub fn entry_index(&self) -> Option<usize> {
        self.ranges
            .first()
            .filter(|range| !range.is_empty())
            .map(|range| range.start)
    }

    /// True when `index` falls in any range.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.ranges.iter().any(|range| range.contains(&index))
    }
}

/// Kind of a global symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum GlobalKind {
    /// Code symbol.
    Function,
    /// Data object.
    Object,
    /// Untyped symbol.
    #[default]
    Unknown,
}

/// A global datum occupying `size` bytes in the data segment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Global {
    /// Symbol name.
    pub name: String,
    /// Size in bytes.
    pub size: u32,
    /// Initial bytes; missing trailing bytes are zero.
    pub initial: Option<Vec<u8>>,
    /// Symbol kind.
    pub kind: GlobalKind,
    /// Resolved address.
    pub address: Option<u32>,
}

impl Global {
    /// Zero-initialized object.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u32) -> Self {
        Self {
            name: name.into(),
            size,
            initial: None,
            kind: GlobalKind::Object,
            address: None,
        }
    }

    /// Sets the initial bytes.
    #[must_use]
    pub fn with_initial(mut self, bytes: Vec<u8>) -> Self {
        self.initial = Some(bytes);
        self
    }
}

/// A named instruction position.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Label {
    /// Symbol name.
    pub name: String,
    /// Instruction index; `None` while unresolved.
    pub instruction_index: Option<usize>,
}

impl Label {
    /// Label at an instruction index.
    #[must_use]
    pub fn new(name: impl Into<String>, instruction_index: usize) -> Self {
        Self {
            name: name.into(),
            instruction_index: Some(instruction_index),
        }
    }
}

/// Address assignment produced by the memory resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryLayout {
    /// Configured base address.
    pub base: u32,
    /// First code address.
    pub code_start: u32,
    /// Code bytes.
    pub code_size: u32,
    /// First data address, aligned.
    pub data_start: u32,
    /// Data bytes.
    pub data_size: u32,
    /// Bytes from `base` to the end of data.
    pub total_size: u32,
    /// Address stride between consecutive instructions.
    pub instruction_size: u32,
}

impl MemoryLayout {
    /// One past the last code byte.
    #[must_use]
    pub const fn code_end(&self) -> u32 {
        self.code_start.wrapping_add(self.code_size)
    }

    /// One past the last data byte, widened so a layout ending at the top of
    /// the address space is representable.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.base) + u64::from(self.total_size)
    }
}

/// One compiled unit, produced by an external parser.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Program {
    /// Object file name.
    pub file_name: String,
    /// Primary source file.
    pub source_file: Option<String>,
    /// Functions by name.
    pub functions: IndexMap<String, Function>,
    /// Instructions in program order.
    pub instructions: Vec<ProgramInstruction>,
    /// Globals in declaration order.
    pub globals: Vec<Global>,
    /// Labels in declaration order.
    pub labels: Vec<Label>,
    /// Layout, once addresses are assigned.
    pub layout: Option<MemoryLayout>,
    /// Debug information, if any.
    pub debug_info: Option<DebugInfo>,
}

impl Program {
    /// Empty program for `file_name`.
    #[must_use]
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    /// Appends an instruction and returns its index.
    pub fn push_instruction(&mut self, instruction: ProgramInstruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    /// Adds or replaces a function.
    pub fn add_function(&mut self, function: Function) -> FunctionId {
        let (index, _) = self.functions.insert_full(function.name.clone(), function);
        FunctionId(index)
    }

    /// Appends a global.
    pub fn add_global(&mut self, global: Global) -> GlobalId {
        self.globals.push(global);
        GlobalId(self.globals.len() - 1)
    }

    /// Appends a label.
    pub fn add_label(&mut self, label: Label) -> LabelId {
        self.labels.push(label);
        LabelId(self.labels.len() - 1)
    }

    /// Function by id.
    #[must_use]
    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get_index(id.0).map(|(_, function)| function)
    }

    /// Resolved address of a function's entry instruction.
    #[must_use]
    pub fn function_address(&self, name: &str) -> Option<u32> {
        self.functions
            .get(name)
            .and_then(Function::entry_index)
            .and_then(|index| self.instructions.get(index)?.address)
    }

    /// Resolved address of a label.
    #[must_use]
    pub fn label_address(&self, name: &str) -> Option<u32> {
        self.labels
            .iter()
            .find(|label| label.name == name)
            .and_then(|label| self.instructions.get(label.instruction_index?)?.address)
    }

    /// Global by name.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|global| global.name == name)
    }

    /// Resolved address of a bound symbol target.
    ///
    /// Function and label addresses are derived from instruction addresses,
    /// never stored.
    #[must_use]
    pub fn target_address(&self, target: SymbolTarget) -> Option<u32> {
        match target {
            SymbolTarget::Function(id) => {
                let index = self.function(id)?.entry_index()?;
                self.instructions.get(index)?.address
            }
            SymbolTarget::Global(id) => self.globals.get(id.0)?.address,
            SymbolTarget::Label(id) => {
                let index = self.labels.get(id.0)?.instruction_index?;
                self.instructions.get(index)?.address
            }
        }
    }

    /// Resolved value of a reference, with its usage applied.
    #[must_use]
    pub fn reference_value(&self, reference: &SymbolReference) -> Option<u32> {
        self.target_address(reference.target?)
            .map(|address| reference.usage.apply(address))
    }

    /// Index of the instruction at `address`.
    #[must_use]
    pub fn instruction_index_at(&self, address: u32) -> Option<usize> {
        let index = self
            .instructions
            .partition_point(|instruction| instruction.address.is_some_and(|a| a < address));
        (self.instructions.get(index)?.address == Some(address)).then_some(index)
    }

    /// Instruction at `address`.
    #[must_use]
    pub fn instruction_at(&self, address: u32) -> Option<&ProgramInstruction> {
        self.instruction_index_at(address)
            .and_then(|index| self.instructions.get(index))
    }

    /// Function whose ranges hold the instruction at `address`.
    #[must_use]
    pub fn function_at(&self, address: u32) -> Option<&Function> {
        let index = self.instruction_index_at(address)?;
        self.functions
            .values()
            .find(|function| function.contains(index))
    }

    /// True once every instruction has an address.
    #[must_use]
    pub fn is_laid_out(&self) -> bool {
        self.layout.is_some()
            && self
                .instructions
                .iter()
                .all(|instruction| instruction.address.is_some())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{
        Function, Global, Label, Program, ProgramInstruction, SymbolTarget, SymbolUsage,
    };
    use crate::model::{FunctionId, GlobalId, LabelId};

    fn addressed(count: usize, base: u32) -> Program {
        let mut program = Program::new("unit.o");
        for index in 0..count {
            let mut instruction = ProgramInstruction::from_text("NOP");
            instruction.address = Some(base + 4 * u32::try_from(index).expect("small"));
            program.push_instruction(instruction);
        }
        program
    }

    #[rstest]
    #[case(SymbolUsage::Full, 0x0012_3456)]
    #[case(SymbolUsage::Lo16, 0x3456)]
    #[case(SymbolUsage::Hi16, 0x0012)]
    fn usage_selects_address_part(#[case] usage: SymbolUsage, #[case] expected: u32) {
        assert_eq!(usage.apply(0x0012_3456), expected);
    }

    #[rstest]
    #[case("main", Some(("main", SymbolUsage::Full)))]
    #[case("buf@lo", Some(("buf", SymbolUsage::Lo16)))]
    #[case("buf@hi", Some(("buf", SymbolUsage::Hi16)))]
    #[case("buf@mid", None)]
    fn usage_suffix_parses(#[case] token: &str, #[case] expected: Option<(&str, SymbolUsage)>) {
        assert_eq!(SymbolUsage::split(token), expected);
    }

    #[test]
    fn function_address_is_first_instruction_of_first_range() {
        let mut program = addressed(6, 0x1000);
        let mut split = Function::new("split", 4..6);
        split.ranges.push(1..2);
        let id = program.add_function(split);

        assert_eq!(program.function_address("split"), Some(0x1010));
        assert_eq!(
            program.target_address(SymbolTarget::Function(id)),
            Some(0x1010)
        );
        assert_eq!(program.function_at(0x1004).map(|f| f.name.as_str()), Some("split"));
        assert!(program.function_at(0x1008).is_none());
    }

    #[test]
    fn label_and_global_targets_resolve_through_tables() {
        let mut program = addressed(3, 0x2000);
        let label = program.add_label(Label::new("loop", 2));
        let mut counter = Global::new("counter", 4);
        counter.address = Some(0x3000);
        let global = program.add_global(counter);

        assert_eq!(program.target_address(SymbolTarget::Label(label)), Some(0x2008));
        assert_eq!(program.target_address(SymbolTarget::Global(global)), Some(0x3000));
        assert_eq!(program.label_address("loop"), Some(0x2008));
        assert_eq!(program.target_address(SymbolTarget::Label(LabelId(9))), None);
        assert_eq!(program.target_address(SymbolTarget::Global(GlobalId(9))), None);
        assert_eq!(program.target_address(SymbolTarget::Function(FunctionId(0))), None);
    }

    #[test]
    fn unresolved_label_has_no_address() {
        let mut program = addressed(1, 0);
        program.add_label(Label {
            name: "dangling".to_string(),
            instruction_index: None,
        });
        assert_eq!(program.label_address("dangling"), None);
    }

    #[test]
    fn instruction_lookup_by_address() {
        let program = addressed(4, 0x1000);
        assert_eq!(program.instruction_index_at(0x1000), Some(0));
        assert_eq!(program.instruction_index_at(0x100C), Some(3));
        assert_eq!(program.instruction_index_at(0x1002), None);
        assert_eq!(program.instruction_index_at(0x1010), None);
        assert_eq!(program.instruction_index_at(0x0FFC), None);
    }

    #[test]
    fn unaddressed_program_is_not_laid_out() {
        let mut program = Program::new("unit.o");
        program.push_instruction(ProgramInstruction::from_text("NOP"));
        assert!(!program.is_laid_out());
        assert_eq!(program.instruction_index_at(0), None);
    }
}

//! Symbol binding: first resolution stage.

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{FunctionId, GlobalId, LabelId, Program, SymbolTarget};

/// Symbol binding failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    /// References with no matching function, global or label.
    #[error("unresolved symbols: {}", names.join(", "))]
    UnresolvedSymbols {
        /// Each unmatched name once, in first-use order.
        names: Vec<String>,
    },
}

/// Binds symbol-reference names to the entities of that exact name.
///
/// Lookup order is function, then global, then label; when a name exists in
/// more than one table the first match wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolResolver;

impl SymbolResolver {
    /// Creates a resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns a copy of `program` with every reference bound.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError::UnresolvedSymbols`] listing every name that
    /// matched nothing.
    pub fn resolve(&self, program: &Program) -> Result<Program, SymbolError> {
        let mut resolved = program.clone();
        let unresolved = bind_references(&mut resolved);
        if unresolved.is_empty() {
            debug!(
                file = %program.file_name,
                references = resolved.instructions.iter().map(|i| i.symbols.len()).sum::<usize>(),
                "symbols bound"
            );
            Ok(resolved)
        } else {
            Err(SymbolError::UnresolvedSymbols { names: unresolved })
        }
    }

    /// Looks up `name` in lookup order.
    #[must_use]
    pub fn lookup(&self, program: &Program, name: &str) -> Option<SymbolTarget> {
        lookup(program, name)
    }
}

/// Rebinds every reference in place against the program's current tables.
///
/// Returns the names that matched nothing, each once.
pub(crate) fn bind_references(program: &mut Program) -> Vec<String> {
    let mut unresolved: Vec<String> = Vec::new();
    let targets: Vec<Vec<Option<SymbolTarget>>> = program
        .instructions
        .iter()
        .map(|instruction| {
            instruction
                .symbols
                .iter()
                .map(|reference| lookup(program, &reference.name))
                .collect()
        })
        .collect();

    for (instruction, targets) in program.instructions.iter_mut().zip(targets) {
        for (reference, target) in instruction.symbols.iter_mut().zip(targets) {
            reference.target = target;
            if target.is_none() && !unresolved.contains(&reference.name) {
                unresolved.push(reference.name.clone());
            }
        }
    }
    unresolved
}

fn lookup(program: &Program, name: &str) -> Option<SymbolTarget> {
    let function = program.functions.get_index_of(name).map(FunctionId);
    let global = program
        .globals
        .iter()
        .position(|global| global.name == name)
        .map(GlobalId);
    let label = program
        .labels
        .iter()
        .position(|label| label.name == name)
        .map(LabelId);

    let matches = usize::from(function.is_some())
        + usize::from(global.is_some())
        + usize::from(label.is_some());
    if matches > 1 {
        warn!(
            symbol = name,
            function = function.is_some(),
            global = global.is_some(),
            label = label.is_some(),
            "symbol defined in several tables, first match wins"
        );
    }

    function
        .map(SymbolTarget::Function)
        .or_else(|| global.map(SymbolTarget::Global))
        .or_else(|| label.map(SymbolTarget::Label))
}

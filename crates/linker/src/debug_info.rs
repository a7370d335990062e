//! Source-level debug information attached to a program.
//!
//! Produced externally with object-relative addresses; the memory resolver
//! relocates it once code addresses are known.

use std::collections::{BTreeMap, HashMap};

use armlet_isa::Register;
use indexmap::IndexMap;

/// File and line for an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SourceLocation {
    /// Source file path as recorded by the compiler.
    pub file: String,
    /// 1-based line.
    pub line: u32,
}

impl SourceLocation {
    /// Creates a location.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Where a variable's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum VariableLocation {
    /// Held in a register.
    Register(Register),
    /// Fixed memory address.
    Address(u32),
    /// Offset from `sp`.
    FrameOffset(i32),
}

/// A named source variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Variable {
    /// Source name.
    pub name: String,
    /// Source type name.
    pub type_name: String,
    /// Size in bytes.
    pub size: u32,
    /// Storage location.
    pub location: VariableLocation,
}

/// Lexical scope covering `[low, high)`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Scope {
    /// First covered address.
    pub low: u32,
    /// One past the last covered address.
    pub high: u32,
    /// Variables declared in this scope.
    pub variables: Vec<Variable>,
    /// Nested scopes.
    pub children: Vec<Scope>,
}

impl Scope {
    /// True when `address` lies in `[low, high)`.
    #[must_use]
    pub const fn contains(&self, address: u32) -> bool {
        self.low <= address && address < self.high
    }

    fn collect_visible<'a>(&'a self, address: u32, out: &mut Vec<&'a Variable>) {
        if !self.contains(address) {
            return;
        }
        out.extend(self.variables.iter());
        for child in &self.children {
            child.collect_visible(address, out);
        }
    }

    fn shift(&mut self, delta: i64) {
        self.low = shift_address(self.low, delta);
        self.high = shift_address(self.high, delta);
        for variable in &mut self.variables {
            variable.shift(delta);
        }
        for child in &mut self.children {
            child.shift(delta);
        }
    }
}

impl Variable {
    fn shift(&mut self, delta: i64) {
        if let VariableLocation::Address(address) = &mut self.location {
            *address = shift_address(*address, delta);
        }
    }
}

/// Line table, variable table, per-function scopes and source text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DebugInfo {
    /// Address to source location.
    pub line_table: BTreeMap<u32, SourceLocation>,
    /// Address to variables live from that address.
    pub variables: BTreeMap<u32, Vec<Variable>>,
    /// Scope tree per function name.
    pub scopes: IndexMap<String, Scope>,
    /// Source text cache, one entry per line.
    pub sources: HashMap<String, Vec<String>>,
    relocated_to: u32,
}

impl DebugInfo {
    /// Empty debug info with object-relative addresses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a line mapping.
    pub fn add_line(&mut self, address: u32, location: SourceLocation) {
        self.line_table.insert(address, location);
    }

    /// Caches the text of a source file.
    pub fn add_source(&mut self, file: impl Into<String>, text: &str) {
        self.sources
            .insert(file.into(), text.lines().map(str::to_string).collect());
    }

    /// Offset applied to every address so far.
    #[must_use]
    pub const fn relocated_to(&self) -> u32 {
        self.relocated_to
    }

    /// Copy with every address moved so the object origin sits at `origin`.
    ///
    /// Relocating twice to the same origin yields the same addresses.
    #[must_use]
    pub fn relocated(&self, origin: u32) -> Self {
        let delta = i64::from(origin) - i64::from(self.relocated_to);
        if delta == 0 {
            return self.clone();
        }
        let line_table = self
            .line_table
            .iter()
            .map(|(address, location)| (shift_address(*address, delta), location.clone()))
            .collect();
        let variables = self
            .variables
            .iter()
            .map(|(address, variables)| {
                let mut variables = variables.clone();
                for variable in &mut variables {
                    variable.shift(delta);
                }
                (shift_address(*address, delta), variables)
            })
            .collect();
        let mut scopes = self.scopes.clone();
        for scope in scopes.values_mut() {
            scope.shift(delta);
        }
        Self {
            line_table,
            variables,
            scopes,
            sources: self.sources.clone(),
            relocated_to: origin,
        }
    }

    /// Exact line mapping for `address`.
    #[must_use]
    pub fn exact_location(&self, address: u32) -> Option<&SourceLocation> {
        self.line_table.get(&address)
    }

    /// Nearest line mapping at or below `address`.
    #[must_use]
    pub fn location_at(&self, address: u32) -> Option<&SourceLocation> {
        self.line_table
            .range(..=address)
            .next_back()
            .map(|(_, location)| location)
    }

    /// Lowest address mapped to `file:line`.
    #[must_use]
    pub fn address_of_line(&self, file: &str, line: u32) -> Option<u32> {
        self.line_table
            .iter()
            .find(|(_, location)| location.line == line && location.file == file)
            .map(|(address, _)| *address)
    }

    /// Variables visible at `address`: scope variables outermost first, then
    /// any recorded in the variable table at or below `address`.
    #[must_use]
    pub fn variables_at(&self, address: u32) -> Vec<&Variable> {
        let mut visible = Vec::new();
        for scope in self.scopes.values() {
            scope.collect_visible(address, &mut visible);
        }
        if let Some((_, variables)) = self.variables.range(..=address).next_back() {
            for variable in variables {
                if !visible.iter().any(|seen| seen.name == variable.name) {
                    visible.push(variable);
                }
            }
        }
        visible
    }

    /// Text of `file:line`, if cached.
    #[must_use]
    pub fn source_line(&self, file: &str, line: u32) -> Option<&str> {
        let index = usize::try_from(line.checked_sub(1)?).ok()?;
        self.sources.get(file)?.get(index).map(String::as_str)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn shift_address(address: u32, delta: i64) -> u32 {
    (address as i64 + delta) as u32
}

#[cfg(test)]
mod tests {
    use armlet_isa::Register;

    use super::{DebugInfo, Scope, SourceLocation, Variable, VariableLocation};

    fn variable(name: &str, location: VariableLocation) -> Variable {
        Variable {
            name: name.to_string(),
            type_name: "int".to_string(),
            size: 4,
            location,
        }
    }

    fn sample() -> DebugInfo {
        let mut info = DebugInfo::new();
        info.add_line(0, SourceLocation::new("main.c", 3));
        info.add_line(8, SourceLocation::new("main.c", 4));
        info.add_source("main.c", "int g;\n\nint main() {\n  return 30;\n}\n");
        info.scopes.insert(
            "main".to_string(),
            Scope {
                low: 0,
                high: 16,
                variables: vec![variable("x", VariableLocation::FrameOffset(-4))],
                children: vec![Scope {
                    low: 8,
                    high: 12,
                    variables: vec![variable("y", VariableLocation::Register(Register::R1))],
                    children: Vec::new(),
                }],
            },
        );
        info.variables
            .insert(0, vec![variable("g", VariableLocation::Address(0x20))]);
        info
    }

    #[test]
    fn nearest_mapping_at_or_below() {
        let info = sample();
        assert_eq!(info.location_at(4), Some(&SourceLocation::new("main.c", 3)));
        assert_eq!(info.location_at(8), Some(&SourceLocation::new("main.c", 4)));
        assert_eq!(info.exact_location(4), None);
        assert_eq!(info.address_of_line("main.c", 4), Some(8));
        assert_eq!(info.address_of_line("other.c", 4), None);
    }

    #[test]
    fn relocation_shifts_every_address_once() {
        let info = sample().relocated(0x1000);
        assert_eq!(info.relocated_to(), 0x1000);
        assert!(info.line_table.contains_key(&0x1008));
        assert_eq!(info.scopes["main"].low, 0x1000);
        assert_eq!(info.scopes["main"].children[0].high, 0x100C);
        assert_eq!(
            info.variables[&0x1000][0].location,
            VariableLocation::Address(0x1020)
        );

        let again = info.relocated(0x1000);
        assert_eq!(again, info);

        let moved = info.relocated(0x2000);
        assert!(moved.line_table.contains_key(&0x2008));
        assert_eq!(moved, sample().relocated(0x2000));
    }

    #[test]
    fn inner_scope_variables_follow_outer_ones() {
        let info = sample();
        let names: Vec<_> = info.variables_at(9).iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "g"]);
        let outer: Vec<_> = info.variables_at(2).iter().map(|v| v.name.as_str()).collect();
        assert_eq!(outer, vec!["x", "g"]);
    }

    #[test]
    fn source_lines_are_one_based() {
        let info = sample();
        assert_eq!(info.source_line("main.c", 4), Some("  return 30;"));
        assert_eq!(info.source_line("main.c", 0), None);
        assert_eq!(info.source_line("main.c", 99), None);
        assert_eq!(info.source_line("nope.c", 1), None);
    }
}

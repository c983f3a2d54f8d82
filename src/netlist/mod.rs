//! In-memory model of a hierarchical SPICE netlist.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use itertools::Itertools;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::tech::DeviceModels;

pub mod text;
pub mod trace;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StatementKind {
    /// A MOSFET: `name d g s b model params...`.
    Transistor,
    /// A subcircuit instance: `xname conn... child [params...]`.
    Instance,
    /// Any other element. Ignored by the tracer.
    Other,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Statement {
    kind: StatementKind,
    tokens: Vec<String>,
}

impl Statement {
    /// Classifies a normalized netlist line.
    pub fn parse(line: &str, models: &DeviceModels) -> Self {
        let tokens = line
            .split_whitespace()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        let first = tokens.first().map(|s| s.as_str()).unwrap_or_default();
        let kind = if first.starts_with('m') || tokens.iter().any(|t| models.is_model(t)) {
            StatementKind::Transistor
        } else if first.starts_with('x') {
            StatementKind::Instance
        } else {
            StatementKind::Other
        };
        Self { kind, tokens }
    }

    #[inline]
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    #[inline]
    pub fn is_transistor(&self) -> bool {
        self.kind == StatementKind::Transistor
    }

    #[inline]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The element name (first token).
    pub fn name(&self) -> &str {
        self.tokens.first().map(|s| s.as_str()).unwrap_or_default()
    }

    /// The statement text with whitespace collapsed to single spaces.
    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }

    /// Position of `token` among the whitespace-delimited tokens.
    pub fn position(&self, token: &str) -> Option<usize> {
        self.tokens.iter().position(|t| t == token)
    }

    fn child_index(&self) -> Option<usize> {
        if self.kind != StatementKind::Instance {
            return None;
        }
        self.tokens
            .iter()
            .rposition(|t| !t.contains('='))
            .filter(|&i| i > 0)
    }

    /// The child module referenced by an instance statement.
    pub fn child_module(&self) -> Option<&str> {
        self.child_index().map(|i| self.tokens[i].as_str())
    }

    /// The nets connected to an instance, in child pin order.
    pub fn connections(&self) -> &[String] {
        match self.child_index() {
            Some(i) => &self.tokens[1..i],
            None => &[],
        }
    }

    /// The nets on the drain, gate, source and body of a transistor.
    pub fn terminals(&self) -> Option<&[String]> {
        if self.kind == StatementKind::Transistor && self.tokens.len() >= 5 {
            Some(&self.tokens[1..5])
        } else {
            None
        }
    }

    fn set_child_module(&mut self, name: String) {
        if let Some(i) = self.child_index() {
            self.tokens[i] = name;
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SpiceModule {
    pub name: String,
    pub pins: Vec<String>,
    pub statements: Vec<Statement>,
}

impl SpiceModule {
    pub fn new(name: impl Into<String>, pins: Vec<String>) -> Self {
        Self {
            name: name.into(),
            pins,
            statements: Vec::new(),
        }
    }

    /// Appends `suffix` to this module's name and to every child module it
    /// instantiates, except those listed in `exclusions`.
    pub fn add_module_suffix(&mut self, suffix: &str, exclusions: &HashSet<String>) {
        self.name = format!("{}{suffix}", self.name);
        for statement in self.statements.iter_mut() {
            if let Some(child) = statement.child_module() {
                if !exclusions.contains(child) {
                    let renamed = format!("{child}{suffix}");
                    statement.set_child_module(renamed);
                }
            }
        }
    }

    /// Finds the statement whose element name is `instance`.
    pub fn instance(&self, instance: &str) -> Option<&Statement> {
        self.statements.iter().find(|s| s.name() == instance)
    }
}

#[derive(Debug, Clone)]
pub struct SpiceHierarchy {
    modules: Vec<SpiceModule>,
    index: HashMap<String, usize>,
    models: DeviceModels,
}

impl SpiceHierarchy {
    pub fn parse(text: &str, models: &DeviceModels) -> Self {
        Self::from_lines(text::normalize(text), models)
    }

    pub fn from_file(path: impl AsRef<Path>, models: &DeviceModels) -> Result<Self> {
        let lines = text::normalize_file(path)?;
        Ok(Self::from_lines(lines, models))
    }

    /// Groups normalized lines into `.subckt`/`.ends` blocks.
    ///
    /// Lines outside of any block are ignored. A block left open at the end of
    /// input is kept.
    pub fn from_lines(lines: Vec<String>, models: &DeviceModels) -> Self {
        let mut hier = Self {
            modules: Vec::new(),
            index: HashMap::new(),
            models: models.clone(),
        };
        let mut current: Option<SpiceModule> = None;

        for line in lines {
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some(".subckt") => {
                    if let Some(module) = current.take() {
                        warn!("subcircuit `{}` is missing .ends", module.name);
                        hier.push(module);
                    }
                    let Some(name) = tokens.next() else {
                        warn!("ignoring .subckt without a name");
                        continue;
                    };
                    let pins = tokens
                        .filter(|t| !t.contains('='))
                        .map(|t| t.to_string())
                        .collect();
                    current = Some(SpiceModule::new(name, pins));
                }
                Some(".ends") => {
                    if let Some(module) = current.take() {
                        hier.push(module);
                    }
                }
                _ => {
                    if let Some(module) = current.as_mut() {
                        module.statements.push(Statement::parse(&line, models));
                    }
                }
            }
        }

        if let Some(module) = current.take() {
            warn!("subcircuit `{}` is missing .ends", module.name);
            hier.push(module);
        }

        debug!("parsed {} subcircuits", hier.modules.len());
        hier
    }

    fn push(&mut self, module: SpiceModule) {
        if self.index.contains_key(&module.name) {
            warn!(
                "duplicate definition of subcircuit `{}`; keeping the first",
                module.name
            );
            return;
        }
        self.index.insert(module.name.clone(), self.modules.len());
        self.modules.push(module);
    }

    fn reindex(&mut self) {
        self.index = self
            .modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();
    }

    #[inline]
    pub fn models(&self) -> &DeviceModels {
        &self.models
    }

    pub fn modules(&self) -> impl Iterator<Item = &SpiceModule> {
        self.modules.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Case-insensitive module lookup.
    pub fn get_module(&self, name: &str) -> Result<&SpiceModule> {
        self.index
            .get(&name.to_lowercase())
            .map(|&i| &self.modules[i])
            .ok_or_else(|| Error::ModuleNotFound(name.to_string()))
    }

    /// Renames every module not listed in `exclusions` by appending `suffix`,
    /// along with every instance that refers to one.
    pub fn rename_modules(&mut self, suffix: &str, exclusions: &[&str]) {
        let exclusions = exclusions
            .iter()
            .map(|s| s.to_lowercase())
            .collect::<HashSet<_>>();
        let suffix = suffix.to_lowercase();
        for module in self.modules.iter_mut() {
            if exclusions.contains(&module.name) {
                continue;
            }
            module.add_module_suffix(&suffix, &exclusions);
        }
        self.reindex();
    }

    pub fn export_spice(&self) -> String {
        let mut out = String::new();
        for module in self.modules.iter() {
            let header = std::iter::once(".subckt")
                .chain(std::iter::once(module.name.as_str()))
                .chain(module.pins.iter().map(|p| p.as_str()))
                .join(" ");
            out.push_str(&header);
            out.push('\n');
            for statement in module.statements.iter() {
                out.push_str(&statement.text());
                out.push('\n');
            }
            out.push_str(".ends\n");
        }
        out
    }

    pub fn write_spice(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.export_spice())?;
        Ok(())
    }
}

//! Resolution of pins and nodes down to the transistor terminals they touch.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use arcstr::ArcStr;
use itertools::Itertools;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::Serialize;

use super::{SpiceHierarchy, Statement, StatementKind};
use crate::error::{Error, Result};
use crate::tech::TechConfig;

lazy_static! {
    static ref PARAM_M: Regex = param_regex("m");
    static ref PARAM_NF: Regex = param_regex("nf");
    static ref PARAM_W: Regex = param_regex("w");
}

fn param_regex(name: &str) -> Regex {
    Regex::new(&format!(
        r"(?:^|\s){name}\s*=\s*([0-9]*\.?[0-9]+(?:e[+-]?[0-9]+)?)([munpf])?"
    ))
    .expect("parameter regex is valid")
}

fn suffix_scale(suffix: &str) -> f64 {
    match suffix {
        "m" => 1e-3,
        "u" => 1e-6,
        "n" => 1e-9,
        "p" => 1e-12,
        "f" => 1e-15,
        _ => 1.0,
    }
}

/// Extracts `name=value[suffix]` from a statement.
///
/// A value that does not match (for example a quoted expression) is reported
/// as absent.
fn extract_param(text: &str, re: &Regex) -> Option<f64> {
    let caps = re.captures(text)?;
    let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let scale = caps.get(2).map(|s| suffix_scale(s.as_str())).unwrap_or(1.0);
    Some(value * scale)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub enum TerminalKind {
    D,
    G,
    S,
    B,
}

impl TerminalKind {
    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Self::D),
            1 => Some(Self::G),
            2 => Some(Self::S),
            3 => Some(Self::B),
            _ => None,
        }
    }
}

impl Display for TerminalKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::D => write!(f, "d"),
            Self::G => write!(f, "g"),
            Self::S => write!(f, "s"),
            Self::B => write!(f, "b"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub enum TxType {
    Nmos,
    Pmos,
}

impl Display for TxType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nmos => write!(f, "n"),
            Self::Pmos => write!(f, "p"),
        }
    }
}

/// One step down the hierarchy.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Hop {
    pub instance: ArcStr,
    pub module: ArcStr,
    /// Child pin the net enters through. Empty when the hop names the
    /// instance directly, as the leading parts of a dotted node do.
    pub pin: ArcStr,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Terminal {
    pub kind: TerminalKind,
    pub statement: Statement,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HierarchyPath {
    pub hops: Vec<Hop>,
    pub terminal: Terminal,
}

impl HierarchyPath {
    /// The module that contains the terminal statement.
    pub fn module<'a>(&'a self, root: &'a str) -> &'a str {
        self.hops.last().map(|h| h.module.as_str()).unwrap_or(root)
    }

    fn prefixed(mut self, prefix: &[Hop]) -> Self {
        if !prefix.is_empty() {
            self.hops.splice(0..0, prefix.iter().cloned());
        }
        self
    }
}

impl Display for HierarchyPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for hop in self.hops.iter() {
            if hop.pin.is_empty() {
                write!(f, "{}({}) / ", hop.instance, hop.module)?;
            } else {
                write!(f, "{}({}:{}) / ", hop.instance, hop.module, hop.pin)?;
            }
        }
        write!(f, "{}: {}", self.terminal.kind, self.terminal.statement.text())
    }
}

/// Multiplier, finger count and per-finger width of a transistor.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct TxProps {
    pub m: f64,
    pub nf: f64,
    pub width: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct TxInfo {
    pub tx_type: TxType,
    pub props: TxProps,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TerminalCaps {
    /// Summed effective width.
    pub total: f64,
    pub devices: Vec<TxProps>,
}

/// Effective device widths seen by a net, grouped by device type and terminal.
///
/// Sources are folded into drains.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PinCaps {
    caps: BTreeMap<TxType, BTreeMap<TerminalKind, TerminalCaps>>,
}

impl PinCaps {
    pub fn get(&self, tx_type: TxType, terminal: TerminalKind) -> Option<&TerminalCaps> {
        self.caps.get(&tx_type).and_then(|t| t.get(&terminal))
    }

    pub fn width(&self, tx_type: TxType, terminal: TerminalKind) -> f64 {
        self.get(tx_type, terminal).map(|c| c.total).unwrap_or(0.0)
    }

    pub fn gate_width(&self) -> f64 {
        self.width(TxType::Nmos, TerminalKind::G) + self.width(TxType::Pmos, TerminalKind::G)
    }

    pub fn total_width(&self) -> f64 {
        self.caps
            .values()
            .flat_map(|t| t.values())
            .map(|c| c.total)
            .sum()
    }

    /// Gate capacitance of the net, relative to the technology's 1x inverter.
    pub fn gate_cap(&self, tech: &TechConfig) -> f64 {
        tech.gate_cap_for_width(self.gate_width())
    }

    fn add(&mut self, info: TxInfo, terminal: TerminalKind) {
        let terminal = match terminal {
            TerminalKind::S => TerminalKind::D,
            t => t,
        };
        let TxProps { m, nf, width } = info.props;
        let num_drains = 1.0 + ((nf - 1.0) / 2.0).floor();
        let entry = self
            .caps
            .entry(info.tx_type)
            .or_default()
            .entry(terminal)
            .or_default();
        entry.total += width * m * num_drains;
        entry.devices.push(info.props);
    }
}

/// A series path from a node to the supply rail that `rail` pulls toward.
#[derive(Debug, Clone, PartialEq)]
pub struct ResPath {
    pub rail: TxType,
    pub devices: Vec<TxInfo>,
}

/// Pull-down (`n`) and pull-up (`p`) paths out of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PullNetworks {
    pub n: Vec<Vec<TxProps>>,
    pub p: Vec<Vec<TxProps>>,
}

impl PullNetworks {
    pub fn paths(&self, tx_type: TxType) -> &[Vec<TxProps>] {
        match tx_type {
            TxType::Nmos => &self.n,
            TxType::Pmos => &self.p,
        }
    }

    /// Series resistance of the weakest path toward the given rail, treating
    /// every device in a path as the path's device type.
    pub fn worst_resistance(&self, tech: &TechConfig, tx_type: TxType) -> Option<f64> {
        let unit_width = match tx_type {
            TxType::Nmos => tech.min_width,
            TxType::Pmos => tech.min_width * tech.beta,
        };
        self.paths(tx_type)
            .iter()
            .map(|path| {
                path.iter()
                    .map(|tx| tech.r_intrinsic * unit_width / (tx.width * tx.nf * tx.m))
                    .sum::<f64>()
            })
            .fold(None, |worst: Option<f64>, r| {
                Some(worst.map_or(r, |w| w.max(r)))
            })
    }
}

struct Frame {
    hops: Vec<Hop>,
    module: String,
    pin: String,
}

pub struct HierarchyTracer<'a> {
    hier: &'a SpiceHierarchy,
}

impl<'a> HierarchyTracer<'a> {
    pub fn new(hier: &'a SpiceHierarchy) -> Self {
        Self { hier }
    }

    /// Every transistor terminal reachable from `pin` in `module`.
    ///
    /// Terminals in `module` itself come first, followed by the terminals of
    /// each matching child instance in statement order.
    pub fn deduce_hierarchy_for_pin(&self, pin: &str, module: &str) -> Result<Vec<HierarchyPath>> {
        let mut out = Vec::new();
        let mut stack = vec![Frame {
            hops: Vec::new(),
            module: module.to_lowercase(),
            pin: pin.to_lowercase(),
        }];

        while let Some(frame) = stack.pop() {
            let current = self.hier.get_module(&frame.module)?;
            let mut children = Vec::new();

            for statement in current.statements.iter() {
                let Some(pos) = statement.position(&frame.pin) else {
                    continue;
                };
                match statement.kind() {
                    StatementKind::Transistor => {
                        if let Some(kind) = pos.checked_sub(1).and_then(TerminalKind::from_index) {
                            out.push(HierarchyPath {
                                hops: frame.hops.clone(),
                                terminal: Terminal {
                                    kind,
                                    statement: statement.clone(),
                                },
                            });
                        }
                    }
                    StatementKind::Instance => {
                        let Some(child) = statement.child_module() else {
                            continue;
                        };
                        if pos == 0 || pos > statement.connections().len() {
                            continue;
                        }
                        let child = self.hier.get_module(child)?;
                        let child_pin = child.pins.get(pos - 1).ok_or_else(|| Error::PinNotFound {
                            index: pos - 1,
                            module: child.name.clone(),
                            num_pins: child.pins.len(),
                        })?;
                        let mut hops = frame.hops.clone();
                        hops.push(Hop {
                            instance: statement.name().into(),
                            module: child.name.as_str().into(),
                            pin: child_pin.as_str().into(),
                        });
                        children.push(Frame {
                            hops,
                            module: child.name.clone(),
                            pin: child_pin.clone(),
                        });
                    }
                    StatementKind::Other => {}
                }
            }

            stack.extend(children.into_iter().rev());
        }

        Ok(out)
    }

    /// Resolves a dotted node name such as `xmaster.int1`.
    pub fn deduce_hierarchy_for_node(
        &self,
        node: &str,
        module: &str,
    ) -> Result<Vec<HierarchyPath>> {
        let node = node.to_lowercase();
        let parts = node.split('.').collect::<Vec<_>>();
        let (last, instances) = parts
            .split_last()
            .ok_or_else(|| Error::InstanceNotFound {
                instance: node.clone(),
                module: module.to_string(),
            })?;

        let mut module = module.to_lowercase();
        let mut prefix = Vec::with_capacity(instances.len());
        for &instance in instances {
            let current = self.hier.get_module(&module)?;
            let child = current
                .instance(instance)
                .and_then(|s| s.child_module())
                .ok_or_else(|| Error::InstanceNotFound {
                    instance: instance.to_string(),
                    module: module.clone(),
                })?;
            let child = self.hier.get_module(child)?;
            prefix.push(Hop {
                instance: instance.into(),
                module: child.name.as_str().into(),
                pin: ArcStr::new(),
            });
            module = child.name.clone();
        }

        Ok(self
            .deduce_hierarchy_for_pin(last, &module)?
            .into_iter()
            .map(|p| p.prefixed(&prefix))
            .collect())
    }

    /// Device type, multiplier, finger count and per-finger width.
    ///
    /// Missing or malformed `m`/`nf` values default to 1.
    pub fn extract_all_tx_properties(&self, statement: &Statement) -> Result<TxInfo> {
        if !statement.is_transistor() {
            return Err(Error::NotATransistor(statement.text()));
        }
        let models = self.hier.models();
        let tx_type = match statement.tokens().get(5).map(|s| s.as_str()) {
            Some(t) if t == models.nmos => TxType::Nmos,
            Some(t) if t == models.pmos => TxType::Pmos,
            _ => return Err(Error::UnrecognizedDeviceModel(statement.text())),
        };

        let text = statement.text();
        let m = extract_param(&text, &PARAM_M).unwrap_or(1.0);
        let mut nf = extract_param(&text, &PARAM_NF).unwrap_or(1.0);
        if nf <= 0.0 {
            warn!("non-positive finger count in `{text}`; using 1");
            nf = 1.0;
        }
        let w = extract_param(&text, &PARAM_W).unwrap_or_else(|| {
            warn!("no width found in `{text}`");
            0.0
        });

        Ok(TxInfo {
            tx_type,
            props: TxProps {
                m,
                nf,
                width: w / nf,
            },
        })
    }

    pub fn extract_caps_for_pin(&self, pin: &str, module: &str) -> Result<PinCaps> {
        self.caps_for_paths(self.deduce_hierarchy_for_pin(pin, module)?)
    }

    pub fn extract_caps_for_node(&self, node: &str, module: &str) -> Result<PinCaps> {
        self.caps_for_paths(self.deduce_hierarchy_for_node(node, module)?)
    }

    fn caps_for_paths(&self, paths: Vec<HierarchyPath>) -> Result<PinCaps> {
        let mut caps = PinCaps::default();
        for path in paths {
            if !path.terminal.statement.is_transistor() {
                continue;
            }
            let info = self.extract_all_tx_properties(&path.terminal.statement)?;
            caps.add(info, path.terminal.kind);
        }
        Ok(caps)
    }

    /// Series transistor paths from `node` to a rail, at most `max_depth`
    /// devices past the first.
    ///
    /// A path ends when a pmos reaches `vdd` or an nmos reaches `gnd`, and is
    /// dropped when a device reaches the other rail. `adjacent_in` is the net
    /// the search just came from; it is never stepped back onto. The depth
    /// limit is what stops the search on feedback loops.
    #[allow(clippy::too_many_arguments)]
    pub fn extract_res_paths_for_pin(
        &self,
        node: &str,
        module: &str,
        adjacent_in: Option<&str>,
        vdd: &str,
        gnd: &str,
        depth: usize,
        max_depth: usize,
    ) -> Result<Vec<ResPath>> {
        if depth > max_depth {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for path in self.deduce_hierarchy_for_pin(node, module)? {
            let kind = path.terminal.kind;
            let (here, other) = match (kind, path.terminal.statement.terminals()) {
                (TerminalKind::D, Some(t)) => (&t[0], &t[2]),
                (TerminalKind::S, Some(t)) => (&t[2], &t[0]),
                _ => continue,
            };
            if Some(other.as_str()) == adjacent_in {
                continue;
            }

            let info = self.extract_all_tx_properties(&path.terminal.statement)?;
            if other == vdd || other == gnd {
                let reached = match info.tx_type {
                    TxType::Pmos => other == vdd,
                    TxType::Nmos => other == gnd,
                };
                if reached {
                    found.push(ResPath {
                        rail: info.tx_type,
                        devices: vec![info],
                    });
                }
                continue;
            }

            let owner = path.module(module);
            for rest in self.extract_res_paths_for_pin(
                other,
                owner,
                Some(here),
                vdd,
                gnd,
                depth + 1,
                max_depth,
            )? {
                let mut devices = Vec::with_capacity(rest.devices.len() + 1);
                devices.push(info);
                devices.extend(rest.devices);
                found.push(ResPath {
                    rail: rest.rail,
                    devices,
                });
            }
        }

        Ok(found)
    }

    pub fn extract_res_for_pin(
        &self,
        node: &str,
        module: &str,
        vdd: &str,
        gnd: &str,
        max_depth: usize,
    ) -> Result<PullNetworks> {
        let paths = self.extract_res_paths_for_pin(
            &node.to_lowercase(),
            module,
            None,
            &vdd.to_lowercase(),
            &gnd.to_lowercase(),
            0,
            max_depth,
        )?;
        let (n, p): (Vec<_>, Vec<_>) = paths.into_iter().partition(|p| p.rail == TxType::Nmos);
        let props = |paths: Vec<ResPath>| {
            paths
                .into_iter()
                .map(|p| p.devices.iter().map(|d| d.props).collect_vec())
                .collect_vec()
        };
        Ok(PullNetworks {
            n: props(n),
            p: props(p),
        })
    }
}

//! Processing of VM profiler log.
//!
//! Log arrives in chunks of comma separated records, chunk bounds are not aligned with record
//! bounds. Records of interest:
//! - `code-creation,<type>,<address>,<size>,"<name>"`
//! - `code-move,<from>,<to>`
//! - `code-delete,<address>`
//! - `tick,<pc>,<sp>,<vm state>[,<caller pc>...]`
//! - `profiler,<begin|resume|pause|end>[,...]`

use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
struct CodeEntry {
    size: u64,
    name: String,
}

/// Per function tick statistic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionProfile {
    pub name: String,
    /// Ticks where the function is on the stack top.
    pub self_ticks: u64,
    /// Ticks where the function is anywhere on the stack.
    pub total_ticks: u64,
}

/// Flat CPU profile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub total_ticks: u64,
    /// Ticks with program counter outside of any known code.
    pub unaccounted_ticks: u64,
    /// Functions ordered by self ticks, most expensive first.
    pub functions: Vec<FunctionProfile>,
}

#[derive(Debug, Default)]
struct TickCounter {
    self_ticks: u64,
    total_ticks: u64,
}

#[derive(Debug, Default)]
pub struct ProfileProcessor {
    code: BTreeMap<u64, CodeEntry>,
    counters: HashMap<String, TickCounter>,
    total_ticks: u64,
    unaccounted_ticks: u64,
    /// Last incomplete line of previous chunk.
    tail: String,
    paused: bool,
}

fn split_record(line: &str) -> Vec<String> {
    let mut fields = vec![];
    let mut field = String::new();
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field).trim().to_string()),
            c => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

fn parse_address(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

impl ProfileProcessor {
    /// Process a portion of profiler log.
    pub fn process_log_chunk(&mut self, chunk: &str) {
        let mut data = std::mem::take(&mut self.tail);
        data.push_str(chunk);

        let complete = match data.rfind('\n') {
            Some(pos) => {
                self.tail = data[pos + 1..].to_string();
                &data[..pos]
            }
            None => {
                self.tail = data;
                return;
            }
        };

        for line in complete.lines().filter(|l| !l.trim().is_empty()) {
            self.process_record(&split_record(line));
        }
    }

    fn process_record(&mut self, fields: &[String]) {
        let Some((kind, args)) = fields.split_first() else {
            return;
        };
        match kind.as_str() {
            "code-creation" => {
                let (Some(addr), Some(size)) = (
                    args.get(1).and_then(|a| parse_address(a)),
                    args.get(2).and_then(|s| parse_address(s)),
                ) else {
                    log::debug!(target: "agent", "malformed code-creation record: {fields:?}");
                    return;
                };
                let name = args.get(3).cloned().unwrap_or_default();
                self.code.insert(addr, CodeEntry { size, name });
            }
            "code-move" => {
                if let (Some(from), Some(to)) = (
                    args.first().and_then(|a| parse_address(a)),
                    args.get(1).and_then(|a| parse_address(a)),
                ) {
                    if let Some(entry) = self.code.remove(&from) {
                        self.code.insert(to, entry);
                    }
                }
            }
            "code-delete" => {
                if let Some(addr) = args.first().and_then(|a| parse_address(a)) {
                    self.code.remove(&addr);
                }
            }
            "tick" => {
                if self.paused {
                    return;
                }
                let Some(pc) = args.first().and_then(|a| parse_address(a)) else {
                    return;
                };
                let stack = args
                    .iter()
                    .skip(3)
                    .filter_map(|a| parse_address(a))
                    .collect::<Vec<_>>();
                self.process_tick(pc, &stack);
            }
            "profiler" => match args.first().map(String::as_str) {
                Some("pause") => self.paused = true,
                Some("resume") | Some("begin") => self.paused = false,
                _ => {}
            },
            _ => {}
        }
    }

    fn find_entry(&self, addr: u64) -> Option<&CodeEntry> {
        let (start, entry) = self.code.range(..=addr).next_back()?;
        // `start <= addr` by range, the end of an entry may not fit into u64
        (addr - start < entry.size).then_some(entry)
    }

    fn process_tick(&mut self, pc: u64, stack: &[u64]) {
        self.total_ticks += 1;

        let Some(top) = self.find_entry(pc).map(|e| e.name.clone()) else {
            self.unaccounted_ticks += 1;
            return;
        };

        let on_stack = stack
            .iter()
            .filter_map(|addr| self.find_entry(*addr))
            .map(|e| e.name.clone())
            .chain(std::iter::once(top.clone()))
            .unique()
            .collect::<Vec<_>>();

        self.counters.entry(top).or_default().self_ticks += 1;
        for name in on_stack {
            self.counters.entry(name).or_default().total_ticks += 1;
        }
    }

    /// Build profile from all ticks processed so far. A last record without line terminator
    /// is processed too.
    pub fn create_profile(&mut self) -> Profile {
        let tail = std::mem::take(&mut self.tail);
        if !tail.trim().is_empty() {
            self.process_record(&split_record(&tail));
        }

        let functions = self
            .counters
            .iter()
            .map(|(name, counter)| FunctionProfile {
                name: name.clone(),
                self_ticks: counter.self_ticks,
                total_ticks: counter.total_ticks,
            })
            .sorted_by(|a, b| {
                b.self_ticks
                    .cmp(&a.self_ticks)
                    .then(b.total_ticks.cmp(&a.total_ticks))
                    .then(a.name.cmp(&b.name))
            })
            .collect();

        Profile {
            total_ticks: self.total_ticks,
            unaccounted_ticks: self.unaccounted_ticks,
            functions,
        }
    }
}

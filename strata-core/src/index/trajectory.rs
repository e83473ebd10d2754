//! Execution trajectories: parsing runtime logs and mapping them to symbols.

use crate::analyze::Analysis;
use crate::symbol::SymbolId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// One observed runtime occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryEvent {
    /// Function identifier as logged (`pkg.mod.func`, `Class.method`, `func`)
    pub function: String,
    pub calls: u64,
    pub file: Option<String>,
    pub line: Option<usize>,
    /// Exception text when the event is part of an error trace
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct JsonEvent {
    function: String,
    calls: Option<u64>,
    file: Option<String>,
    line: Option<usize>,
    error: Option<String>,
}

/// Parsed execution log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Trajectory {
    pub events: Vec<TrajectoryEvent>,
}

impl Trajectory {
    pub fn load(path: &Path) -> crate::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Parse a log mixing JSON lines, cProfile rows, Python tracebacks and
    /// plain `function count` lines. Unrecognised lines are ignored.
    pub fn parse(text: &str) -> Self {
        let mut events = Vec::new();
        // Frames of the traceback being read, waiting for the exception line
        let mut frames: Vec<TrajectoryEvent> = Vec::new();
        let mut in_traceback = false;

        for raw in text.lines() {
            let line = raw.trim_end();
            let trimmed = line.trim_start();
            if trimmed.is_empty() {
                continue;
            }

            if trimmed.starts_with("Traceback (most recent call last)") {
                events.append(&mut frames);
                in_traceback = true;
                continue;
            }

            if in_traceback {
                if let Some(frame) = parse_frame(trimmed) {
                    frames.push(frame);
                    continue;
                }
                if line.starts_with(char::is_whitespace) {
                    // Source excerpt under a frame
                    continue;
                }
                for frame in &mut frames {
                    frame.error = Some(trimmed.to_string());
                }
                events.append(&mut frames);
                in_traceback = false;
                continue;
            }

            let event = if trimmed.starts_with('{') {
                parse_json(trimmed)
            } else {
                parse_frame(trimmed)
                    .or_else(|| parse_profile_row(trimmed))
                    .or_else(|| parse_plain(trimmed))
            };
            if let Some(event) = event {
                events.push(event);
            }
        }
        events.append(&mut frames);

        Self {
            events: merge(events),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn total_calls(&self) -> u64 {
        self.events
            .iter()
            .fold(0u64, |total, e| total.saturating_add(e.calls))
    }
}

/// Sum counts of events with the same identifier and location, keeping
/// first-seen order
fn merge(events: Vec<TrajectoryEvent>) -> Vec<TrajectoryEvent> {
    let mut merged: Vec<TrajectoryEvent> = Vec::new();
    let mut index: HashMap<(String, Option<String>, Option<usize>), usize> = HashMap::new();
    for event in events {
        let key = (event.function.clone(), event.file.clone(), event.line);
        match index.get(&key) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.calls = existing.calls.saturating_add(event.calls);
                if existing.error.is_none() {
                    existing.error = event.error;
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(event);
            }
        }
    }
    merged
}

fn parse_json(line: &str) -> Option<TrajectoryEvent> {
    let e: JsonEvent = serde_json::from_str(line).ok()?;
    if e.function.is_empty() {
        return None;
    }
    Some(TrajectoryEvent {
        function: e.function,
        calls: e.calls.unwrap_or(1),
        file: e.file,
        line: e.line,
        error: e.error,
    })
}

/// `File "path", line N, in func`
fn parse_frame(line: &str) -> Option<TrajectoryEvent> {
    let rest = line.strip_prefix("File \"")?;
    let (file, rest) = rest.split_once('"')?;
    let rest = rest.strip_prefix(", line ")?;
    let (number, rest) = rest.split_once(',').unwrap_or((rest, ""));
    let line_no: usize = number.trim().parse().ok()?;
    let function = rest.trim().strip_prefix("in ").unwrap_or("<module>").trim();
    Some(TrajectoryEvent {
        function: function.to_string(),
        calls: 1,
        file: Some(file.to_string()),
        line: Some(line_no),
        error: None,
    })
}

/// `ncalls tottime percall cumtime percall file:line(function)`
fn parse_profile_row(line: &str) -> Option<TrajectoryEvent> {
    let mut parts = line.split_whitespace();
    let ncalls = parts.next()?;
    let calls: u64 = ncalls.split('/').next()?.parse().ok()?;
    for _ in 0..4 {
        parts.next()?.parse::<f64>().ok()?;
    }
    let location = parts.collect::<Vec<_>>().join(" ");

    if let Some(inner) = location.strip_prefix('{').and_then(|l| l.strip_suffix('}')) {
        return Some(TrajectoryEvent {
            function: inner.to_string(),
            calls,
            file: None,
            line: None,
            error: None,
        });
    }

    let open = location.rfind('(')?;
    let function = location[open + 1..].strip_suffix(')')?;
    let (file, line_no) = location[..open].rsplit_once(':')?;
    Some(TrajectoryEvent {
        function: function.to_string(),
        calls,
        file: Some(file.to_string()),
        line: line_no.parse().ok(),
        error: None,
    })
}

/// `function count`
fn parse_plain(line: &str) -> Option<TrajectoryEvent> {
    let mut parts = line.split_whitespace();
    let function = parts.next()?;
    let count: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let valid = function
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && function
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | ':' | '<' | '>'));
    valid.then(|| TrajectoryEvent {
        function: function.to_string(),
        calls: count,
        file: None,
        line: None,
        error: None,
    })
}

/// Where one event landed in the code
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryMapping {
    pub event: TrajectoryEvent,
    pub symbol: Option<SymbolId>,
    /// `path::Qualified.name` of the mapped symbol
    pub target: Option<String>,
}

/// Mapped events plus call counts per symbol and per file
#[derive(Debug, Clone, Default)]
pub struct Heatmap {
    pub mappings: Vec<TrajectoryMapping>,
    pub symbols: HashMap<SymbolId, u64>,
    pub files: BTreeMap<String, u64>,
}

impl Heatmap {
    pub fn symbol_heat(&self, id: SymbolId) -> u64 {
        self.symbols.get(&id).copied().unwrap_or(0)
    }

    pub fn file_heat(&self, path: &str) -> u64 {
        self.files.get(path).copied().unwrap_or(0)
    }
}

/// Map every event to a symbol and accumulate heat
pub fn map_trajectory(analysis: &Analysis, trajectory: &Trajectory) -> Heatmap {
    let mut heat = Heatmap::default();
    for event in &trajectory.events {
        let symbol = map_event(analysis, event);
        let target = symbol
            .and_then(|id| analysis.symbols.get(id))
            .map(|s| s.display_name());
        if let Some(s) = symbol.and_then(|id| analysis.symbols.get(id)) {
            let calls = heat.symbols.entry(s.id).or_default();
            *calls = calls.saturating_add(event.calls);
            let calls = heat.files.entry(s.path.clone()).or_default();
            *calls = calls.saturating_add(event.calls);
        }
        heat.mappings.push(TrajectoryMapping {
            event: event.clone(),
            symbol,
            target,
        });
    }
    heat
}

fn map_event(analysis: &Analysis, event: &TrajectoryEvent) -> Option<SymbolId> {
    let path = event
        .file
        .as_deref()
        .and_then(|f| resolve_event_path(analysis, f));

    if let (Some(path), Some(line)) = (path.as_deref(), event.line) {
        if let Some(id) = analysis.symbols.scope_at(path, line) {
            return Some(id);
        }
    }

    // By name: last dotted segment, restricted to the file when known
    let name = event
        .function
        .rsplit(['.', ':'])
        .next()
        .unwrap_or(&event.function);
    analysis
        .symbols
        .named(name)
        .iter()
        .filter_map(|&id| analysis.symbols.get(id))
        .filter(|s| s.kind.is_callable())
        .filter(|s| path.as_deref().map_or(true, |p| s.path == p))
        .max_by(|a, b| {
            analysis
                .importance_of(a.id)
                .total_cmp(&analysis.importance_of(b.id))
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|s| s.id)
}

/// Match a logged file path to an analyzed file: exact, under the root,
/// or by unique path suffix
fn resolve_event_path(analysis: &Analysis, file: &str) -> Option<String> {
    let normalized = file.replace('\\', "/");
    if analysis.files.contains_key(&normalized) {
        return Some(normalized);
    }
    if let Ok(rel) = Path::new(file).strip_prefix(&analysis.root) {
        let rel = rel.to_string_lossy().replace('\\', "/");
        if analysis.files.contains_key(&rel) {
            return Some(rel);
        }
    }
    let candidates: Vec<&String> = analysis
        .files
        .keys()
        .filter(|k| normalized.ends_with(&format!("/{k}")))
        .collect();
    match candidates.as_slice() {
        [only] => Some((*only).clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_lines() {
        let t = Trajectory::parse(
            "{\"function\": \"app.foo\", \"calls\": 3, \"file\": \"A.py\", \"line\": 2}\n{\"function\": \"bar\"}\n",
        );
        assert_eq!(t.events.len(), 2);
        assert_eq!(t.events[0].calls, 3);
        assert_eq!(t.events[0].line, Some(2));
        assert_eq!(t.events[1].calls, 1);
    }

    #[test]
    fn test_profile_rows() {
        let log = "   ncalls  tottime  percall  cumtime  percall filename:lineno(function)\n\
                   \x20     100    0.010    0.000    0.050    0.001 A.py:1(foo)\n\
                   \x20    12/3    0.001    0.000    0.002    0.000 B.py:3(bar)\n\
                   \x20       1    0.000    0.000    0.000    0.000 {built-in method builtins.print}\n";
        let t = Trajectory::parse(log);
        assert_eq!(t.events.len(), 3);
        assert_eq!(t.events[0].function, "foo");
        assert_eq!(t.events[0].calls, 100);
        assert_eq!(t.events[0].file.as_deref(), Some("A.py"));
        assert_eq!(t.events[1].calls, 12);
        assert_eq!(t.events[2].function, "built-in method builtins.print");
    }

    #[test]
    fn test_traceback_attaches_exception() {
        let log = "Traceback (most recent call last):\n  File \"B.py\", line 4, in bar\n    return foo()\n  File \"A.py\", line 2, in foo\n    return 1 / 0\nZeroDivisionError: division by zero\n";
        let t = Trajectory::parse(log);
        assert_eq!(t.events.len(), 2);
        assert_eq!(t.events[0].function, "bar");
        assert_eq!(t.events[1].line, Some(2));
        for e in &t.events {
            assert_eq!(e.error.as_deref(), Some("ZeroDivisionError: division by zero"));
        }
    }

    #[test]
    fn test_plain_counts_merge() {
        let t = Trajectory::parse("foo 3\nfoo 2\nnot a count line\nbar 1\n");
        assert_eq!(t.events.len(), 2);
        assert_eq!(t.events[0].calls, 5);
        assert_eq!(t.total_calls(), 6);
    }

    #[test]
    fn test_huge_counts_saturate() {
        let t = Trajectory::parse("foo 18446744073709551615\nfoo 1\nbar 7\n");
        assert_eq!(t.events[0].calls, u64::MAX);
        assert_eq!(t.total_calls(), u64::MAX);
    }
}

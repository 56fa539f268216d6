//! Module list parsing - output of the runtime's `list-apps` command.
//!
//! The listing format is not stable across runtime versions. Most lines look
//! like `name 1.2.3 (abc123) [branch]`, but older runtimes print the bare
//! name and some builds add extra columns. Parsing therefore never fails on
//! a non-empty line: anything that does not match the structured shape is
//! kept as its first token.

use regex::Regex;

/// One installed module as reported by the runtime listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleRecord {
    /// A line in the usual `name version (commit) [branch]` shape.
    /// Everything after the name is optional.
    Structured {
        name: String,
        version: Option<String>,
        commit: Option<String>,
        branch: Option<String>,
        raw: String,
    },
    /// Any other non-empty line, identified by its first token.
    NameOnly { name: String, raw: String },
}

impl ModuleRecord {
    /// The module name this record identifies. Names are compared exactly,
    /// including case.
    pub fn name(&self) -> &str {
        match self {
            Self::Structured { name, .. } => name,
            Self::NameOnly { name, .. } => name,
        }
    }

    /// The original listing line.
    pub fn raw(&self) -> &str {
        match self {
            Self::Structured { raw, .. } => raw,
            Self::NameOnly { raw, .. } => raw,
        }
    }
}

fn listing_regex() -> Regex {
    Regex::new(r"^(\w+)\s+([\w.\-]+)?\s*(?:\(([\da-f]+)\))?\s*(?:\[(.+)\])?$")
        .expect("static module listing regex")
}

/// Parses the full output of the runtime's module listing.
///
/// Blank lines are skipped. Every other line yields exactly one record.
pub fn parse_module_list(output: &str) -> Vec<ModuleRecord> {
    let re = listing_regex();
    output
        .lines()
        .filter_map(|line| parse_line(&re, line))
        .collect()
}

fn parse_line(re: &Regex, line: &str) -> Option<ModuleRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(caps) = re.captures(line) {
        if let Some(name) = caps.get(1) {
            return Some(ModuleRecord::Structured {
                name: name.as_str().to_string(),
                version: caps.get(2).map(|m| m.as_str().to_string()),
                commit: caps.get(3).map(|m| m.as_str().to_string()),
                branch: caps.get(4).map(|m| m.as_str().to_string()),
                raw: line.to_string(),
            });
        }
    }

    // Fallback: first whitespace-separated token is the name.
    let name = line.split_whitespace().next()?.to_string();
    Some(ModuleRecord::NameOnly {
        name,
        raw: line.to_string(),
    })
}

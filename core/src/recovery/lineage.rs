use crate::descriptor::{CommandDescriptor, Fingerprint};

use super::controller::FailureRecord;

/// Attempts derived from one original request. All retries and substitutes
/// draw from the same budget, which only ever goes down.
#[derive(Debug, Clone)]
pub struct Lineage {
    root: Fingerprint,
    remaining: u32,
    retries: u32,
    tried_tools: Vec<String>,
    trail: Vec<FailureRecord>,
}

impl Lineage {
    pub fn new(root: &CommandDescriptor, budget: u32) -> Self {
        Self {
            root: root.fingerprint(),
            remaining: budget,
            retries: 0,
            tried_tools: vec![root.tool.trim().to_ascii_lowercase()],
            trail: Vec::new(),
        }
    }

    pub fn root(&self) -> &Fingerprint {
        &self.root
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Retries granted so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Take one unit of budget. Returns false when none is left.
    pub(crate) fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.retries += 1;
        true
    }

    pub fn has_tried(&self, tool: &str) -> bool {
        let tool = tool.trim().to_ascii_lowercase();
        self.tried_tools.iter().any(|t| *t == tool)
    }

    pub(crate) fn note_tool(&mut self, tool: &str) {
        if !self.has_tried(tool) {
            self.tried_tools.push(tool.trim().to_ascii_lowercase());
        }
    }

    pub fn tried_tools(&self) -> &[String] {
        &self.tried_tools
    }

    pub(crate) fn record(&mut self, record: FailureRecord) {
        self.trail.push(record);
    }

    pub fn trail(&self) -> &[FailureRecord] {
        &self.trail
    }

    pub fn into_trail(self) -> Vec<FailureRecord> {
        self.trail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_strictly_decreases_then_stops() {
        let d = CommandDescriptor::builder("nmap", "t").build();
        let mut l = Lineage::new(&d, 2);
        assert!(l.consume());
        assert_eq!(l.remaining(), 1);
        assert!(l.consume());
        assert!(l.is_exhausted());
        assert!(!l.consume());
        assert_eq!(l.remaining(), 0);
        assert_eq!(l.retries(), 2);
    }

    #[test]
    fn tracks_tried_tools_case_insensitively() {
        let d = CommandDescriptor::builder("Nmap", "t").build();
        let mut l = Lineage::new(&d, 1);
        assert!(l.has_tried("nmap"));
        l.note_tool("rustscan");
        l.note_tool("RustScan");
        assert_eq!(l.tried_tools(), &["nmap".to_string(), "rustscan".to_string()]);
    }
}

//! Memory bank: the evidence store shared by the planner and the writer.
//!
//! Evidence is append-only and keyed by `id_N` citation identifiers handed
//! out in creation order. The planner's tools write here; the writer reads
//! only what it retrieves by id.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Shared handle used across the two WebWeaver phases.
pub type SharedMemoryBank = Arc<RwLock<MemoryBank>>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Evidence {
    pub citation_id: String,
    pub content: String,
    pub summary: String,
    pub created_round: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("evidence '{0}' not found")]
pub struct EvidenceNotFound(pub String);

// ─────────────────────────────────────────────
// MemoryBank
// ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryBank {
    entries: HashMap<String, Evidence>,
    order: Vec<String>,
    next_id: u64,
    round: u32,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedMemoryBank {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Stamp subsequent evidence with this round.
    pub fn set_round(&mut self, round: u32) {
        self.round = round;
    }

    /// Store a piece of evidence and return its new citation id.
    pub fn add_evidence(&mut self, content: impl Into<String>, summary: impl Into<String>) -> String {
        self.next_id += 1;
        let citation_id = format!("id_{}", self.next_id);
        let evidence = Evidence {
            citation_id: citation_id.clone(),
            content: content.into(),
            summary: summary.into(),
            created_round: self.round,
        };
        debug!(id = %citation_id, round = self.round, "evidence added");
        self.order.push(citation_id.clone());
        self.entries.insert(citation_id.clone(), evidence);
        citation_id
    }

    /// Observation line announcing a freshly stored item.
    pub fn render_added(&self, citation_id: &str) -> String {
        match self.entries.get(citation_id) {
            Some(e) => format!("Evidence saved as <citation>{}</citation>: {}", e.citation_id, e.summary),
            None => EvidenceNotFound(citation_id.to_string()).to_string(),
        }
    }

    pub fn get_evidence(&self, citation_id: &str) -> Result<&Evidence, EvidenceNotFound> {
        self.entries
            .get(citation_id.trim())
            .ok_or_else(|| EvidenceNotFound(citation_id.trim().to_string()))
    }

    /// Full text of the requested ids. Unknown ids get a "not found" line.
    pub fn retrieve(&self, ids: &[String]) -> String {
        ids.iter()
            .map(|id| match self.get_evidence(id) {
                Ok(e) => format!("<evidence id='{}'>\n{}\n</evidence>", e.citation_id, e.content),
                Err(e) => format!("[retrieve] Error: {e}"),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Citation ids in creation order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, citation_id: &str) -> bool {
        self.entries.contains_key(citation_id)
    }

    pub fn size(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drop all evidence. The id counter keeps counting.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_monotonic_and_unique() {
        let mut bank = MemoryBank::new();
        let a = bank.add_evidence("alpha", "a");
        let b = bank.add_evidence("beta", "b");
        let c = bank.add_evidence("alpha", "a");
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("id_1", "id_2", "id_3"));
        assert_eq!(bank.ids(), ["id_1", "id_2", "id_3"]);
        assert_eq!(bank.size(), 3);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let bank = MemoryBank::new();
        assert_eq!(bank.get_evidence("id_9"), Err(EvidenceNotFound("id_9".into())));
    }

    #[test]
    fn test_created_round_stamp() {
        let mut bank = MemoryBank::new();
        bank.set_round(4);
        let id = bank.add_evidence("c", "s");
        assert_eq!(bank.get_evidence(&id).unwrap().created_round, 4);
    }

    #[test]
    fn test_retrieve_renders_hits_and_misses() {
        let mut bank = MemoryBank::new();
        bank.add_evidence("Population: 30,000", "pop");
        let out = bank.retrieve(&["id_1".into(), "id_7".into()]);
        assert!(out.contains("<evidence id='id_1'>\nPopulation: 30,000\n</evidence>"));
        assert!(out.contains("evidence 'id_7' not found"));
    }

    #[test]
    fn test_render_added() {
        let mut bank = MemoryBank::new();
        let id = bank.add_evidence("full", "short summary");
        assert_eq!(
            bank.render_added(&id),
            "Evidence saved as <citation>id_1</citation>: short summary"
        );
    }

    #[test]
    fn test_clear_does_not_reuse_ids() {
        let mut bank = MemoryBank::new();
        bank.add_evidence("a", "a");
        bank.clear();
        assert!(bank.is_empty());
        assert_eq!(bank.add_evidence("b", "b"), "id_2");
        assert!(!bank.contains("id_1"));
    }

    #[tokio::test]
    async fn test_shared_handle() {
        let bank = MemoryBank::shared();
        bank.write().await.add_evidence("x", "y");
        assert_eq!(bank.read().await.size(), 1);
    }
}

//! Per-entry accounting of a bundle import.

use serde::Serialize;

/// What happened to one bundle entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum EntryOutcome {
    Created { version: u64 },
    Updated { version: u64 },
    /// A replayed delete. `existed` is false when the key had no live version.
    Deleted { existed: bool },
    Failed { message: String },
}

impl EntryOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportEntryResult {
    /// Position of the entry in the bundle.
    pub index: usize,
    pub resource_type: Option<String>,
    pub id: Option<String>,
    #[serde(flatten)]
    pub outcome: EntryOutcome,
}

/// Result of an import. One row per bundle entry, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub entries: Vec<ImportEntryResult>,
}

impl ImportResult {
    pub fn push(
        &mut self,
        index: usize,
        resource_type: Option<String>,
        id: Option<String>,
        outcome: EntryOutcome,
    ) {
        self.entries.push(ImportEntryResult {
            index,
            resource_type,
            id,
            outcome,
        });
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Created { .. }))
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Updated { .. }))
    }

    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Deleted { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| !o.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ImportEntryResult> {
        self.entries.iter().filter(|e| !e.outcome.is_success())
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&EntryOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

use serde::{Deserialize, Serialize};

/// One entry of a broadcast day's schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Program {
    /// Unique within a single day's schedule only.
    pub id: i64,
    /// Display time as delivered by the schedule (never reparsed).
    pub time: String,
    pub title: String,
    pub short_title: String,
    pub info: String,
    /// Playable source; empty for listing-only entries.
    pub url: String,
    /// Broadcast day, second half of the offline matching key.
    pub day_label: String,
}

impl Program {
    pub fn is_playable(&self) -> bool {
        !self.url.is_empty()
    }

    /// The `(id, day_label)` pair used to match offline records.
    pub fn key(&self) -> (i64, &str) {
        (self.id, &self.day_label)
    }
}

/// A program saved locally for offline playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineEntry {
    #[serde(flatten)]
    pub program: Program,
    /// Local recording path; playback source and the file deleted on removal.
    pub filename: String,
}

impl OfflineEntry {
    /// Builds the record written by the offline store. The filename is the
    /// program's url verbatim.
    pub fn from_program(program: &Program) -> Self {
        Self {
            program: program.clone(),
            filename: program.url.clone(),
        }
    }

    pub fn matches(&self, id: i64, day_label: &str) -> bool {
        self.program.key() == (id, day_label)
    }
}

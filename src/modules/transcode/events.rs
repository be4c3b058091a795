use std::fmt;

/// Bus topics known to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    TranscodeStart,
    TranscodeUpdate,
}

impl Topic {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Topic::TranscodeStart => "transcode-start",
            Topic::TranscodeUpdate => "transcode-update",
        }
    }

    /// Unknown topic names map to `None` and are never an error.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "transcode-start" => Some(Topic::TranscodeStart),
            "transcode-update" => Some(Topic::TranscodeUpdate),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

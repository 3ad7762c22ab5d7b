/// Lifecycle of one open capture or playback stream.
///
/// ```text
/// closed → opening → running → stopping → closed
///                       │
///                       └── device lost ──→ closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Closed,
    Opening,
    Running,
    Stopping,
}

impl StreamState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether stream parameters (rate, channels) may still be changed.
    pub fn accepts_configuration(&self) -> bool {
        self.is_closed()
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

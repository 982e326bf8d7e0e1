use std::fmt;

/// Result alias for the dashboard computation path.
pub type DashboardResult<T> = Result<T, DashboardError>;

/// Failure classification for the dashboard pipeline.
///
/// One variant per input dataset so the caller can tell which query failed;
/// any single fetch failure aborts the whole computation and no partial
/// snapshot is produced.
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("could not load emotional check-in logs")]
    LogsFetch(#[source] sqlx::Error),

    #[error("could not load DEC incidents")]
    IncidentsFetch(#[source] sqlx::Error),

    #[error("could not load activities")]
    ActivitiesFetch(#[source] sqlx::Error),

    /// Non-query failure on the dashboard path.
    #[error("unexpected dashboard error: {0}")]
    Unexpected(String),
}

impl DashboardError {
    /// Short dataset tag used in log events.
    pub fn dataset(&self) -> Dataset {
        match self {
            Self::LogsFetch(_) => Dataset::EmotionLogs,
            Self::IncidentsFetch(_) => Dataset::Incidents,
            Self::ActivitiesFetch(_) => Dataset::Activities,
            Self::Unexpected(_) => Dataset::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    EmotionLogs,
    Incidents,
    Activities,
    None,
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dataset::EmotionLogs => "emotion_logs",
            Dataset::Incidents => "incidents",
            Dataset::Activities => "activities",
            Dataset::None => "none",
        };
        f.write_str(name)
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CourseRef {
    pub id: Uuid,
    pub name: String,
    pub section: Option<String>,
}

impl CourseRef {
    /// Display name shown on the dashboard, e.g. "5° Básico A".
    pub fn display_name(&self) -> String {
        match self.section.as_deref() {
            Some(section) if !section.is_empty() => format!("{} {}", self.name, section),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StudentRef {
    pub id: Uuid,
    pub name: String,
    pub last_name: String,
    pub course: Option<CourseRef>,
}

impl StudentRef {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            "Sin nombre".to_string()
        } else {
            full.to_string()
        }
    }
}

/// One daily emotional check-in. The student reference (and its course) can
/// be absent when the log predates the roster or the student was removed.
#[derive(Debug, Clone)]
pub struct EmotionLog {
    pub id: Uuid,
    pub emotion: String,
    pub created_at: DateTime<Utc>,
    pub student: Option<StudentRef>,
}

/// One DEC behavioral incident report.
#[derive(Debug, Clone)]
pub struct Incident {
    pub id: Uuid,
    pub folio: Option<String>,
    pub incident_type: String,
    pub severity: String,
    pub incident_date: DateTime<Utc>,
    pub student: Option<StudentRef>,
}

/// One institutional activity (workshop, talk, ...).
#[derive(Debug, Clone)]
pub struct Activity {
    pub id: Uuid,
    pub activity_type: Option<String>,
    pub title: Option<String>,
    pub start_datetime: DateTime<Utc>,
}

/// Trailing aggregation window `[now - window_days, now]`, UTC.
///
/// `window_days` is taken verbatim: zero or negative values produce an empty
/// or inverted window and the queries simply match nothing.
#[derive(Debug, Clone, Copy)]
pub struct AggregationWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl AggregationWindow {
    pub fn trailing(window_days: i64) -> Self {
        let to = Utc::now();
        Self {
            from: to - Duration::days(window_days),
            to,
        }
    }
}

// ----------------------------------------------------------------------------
// Dashboard snapshot
//
// Field names below are the consumer contract; the camelCase renames are
// deliberate and must not be normalized.
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LabelCount {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthCount {
    pub month: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentRisk {
    pub student_id: Uuid,
    pub student_name: String,
    pub average: f64,
    pub log_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseRisk {
    pub course_id: Uuid,
    pub course_name: String,
    pub average: f64,
    pub log_count: u64,
    pub low_students: Vec<StudentRisk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentIncident {
    pub id: Uuid,
    pub folio: Option<String>,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub severity: String,
    pub student_name: String,
    pub course_name: Option<String>,
    pub incident_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentActivity {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub start_datetime: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentOverview {
    #[serde(rename = "byMonth")]
    pub by_month: Vec<MonthCount>,
    #[serde(rename = "bySeverity")]
    pub by_severity: Vec<LabelCount>,
    #[serde(rename = "byType")]
    pub by_type: Vec<LabelCount>,
    pub recent: Vec<RecentIncident>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityOverview {
    #[serde(rename = "byMonth")]
    pub by_month: Vec<MonthCount>,
    #[serde(rename = "byType")]
    pub by_type: Vec<LabelCount>,
    pub recent: Vec<RecentActivity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryTotals {
    pub total_emotion_logs: u64,
    pub total_incidents: u64,
    pub total_activities: u64,
    pub low_emotion_courses: u64,
}

/// Denormalized dashboard view for one institution over one window.
/// Recomputed on every call; never cached or patched incrementally.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    #[serde(rename = "emotionDistribution")]
    pub emotion_distribution: Vec<LabelCount>,
    #[serde(rename = "courseRisks")]
    pub course_risks: Vec<CourseRisk>,
    pub incidents: IncidentOverview,
    pub activities: ActivityOverview,
    pub summary: SummaryTotals,
}

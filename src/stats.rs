use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::error::{DashboardError, DashboardResult};
use crate::models::{
    Activity, ActivityOverview, AggregationWindow, CourseRisk, DashboardSnapshot, EmotionLog,
    Incident, IncidentOverview, LabelCount, MonthCount, RecentActivity, RecentIncident,
    StudentRisk, SummaryTotals,
};

/// Wellbeing score per check-in emotion, 1 (worst) to 5 (best).
pub const EMOTION_SCORES: [(&str, f64); 6] = [
    ("triste", 1.0),
    ("muy_mal", 1.5),
    ("mal", 2.0),
    ("neutral", 3.0),
    ("bien", 4.0),
    ("muy_bien", 5.0),
];

/// Score assigned to emotions missing from `EMOTION_SCORES`.
pub const NEUTRAL_SCORE: f64 = 3.0;

/// A course is flagged at risk when its average score falls strictly below
/// this value.
pub const LOW_RISK_THRESHOLD: f64 = 2.5;

/// How many lowest-averaging students are listed per at-risk course.
pub const LOW_STUDENT_LIMIT: usize = 3;

/// Length of the recent-incidents and recent-activities lists.
pub const RECENT_LIMIT: usize = 5;

pub fn wellbeing_score(emotion: &str) -> f64 {
    EMOTION_SCORES
        .iter()
        .find(|(label, _)| *label == emotion)
        .map(|(_, score)| *score)
        .unwrap_or(NEUTRAL_SCORE)
}

/// The `average > 0` guard keeps courses without any scored log out of the
/// ranking; it is not redundant with the threshold.
pub fn is_at_risk(average: f64) -> bool {
    average > 0.0 && average < LOW_RISK_THRESHOLD
}

pub fn month_key(date: DateTime<Utc>) -> String {
    date.format("%Y-%m").to_string()
}

/// Loads the three datasets for one institution and window and builds the
/// snapshot. The reads are independent and issued concurrently; a failure in
/// any one of them aborts the whole computation.
pub async fn load_dashboard(
    pool: &PgPool,
    institution_id: Uuid,
    window_days: i64,
) -> DashboardResult<DashboardSnapshot> {
    let window = AggregationWindow::trailing(window_days);
    let (logs, incidents, activities) = tokio::join!(
        db::fetch_emotion_logs(pool, institution_id, &window),
        db::fetch_incidents(pool, institution_id, &window),
        db::fetch_activities(pool, institution_id, &window),
    );

    let snapshot = assemble_snapshot(logs, incidents, activities)?;
    tracing::debug!(
        logs = snapshot.summary.total_emotion_logs,
        incidents = snapshot.summary.total_incidents,
        activities = snapshot.summary.total_activities,
        at_risk_courses = snapshot.summary.low_emotion_courses,
        "dashboard snapshot built"
    );
    Ok(snapshot)
}

/// Classifies the three fetch outcomes (logs, then incidents, then
/// activities) and aggregates on success. No partial snapshot is ever built.
pub fn assemble_snapshot(
    logs: Result<Vec<EmotionLog>, sqlx::Error>,
    incidents: Result<Vec<Incident>, sqlx::Error>,
    activities: Result<Vec<Activity>, sqlx::Error>,
) -> DashboardResult<DashboardSnapshot> {
    let logs = logs.map_err(DashboardError::LogsFetch)?;
    let incidents = incidents.map_err(DashboardError::IncidentsFetch)?;
    let activities = activities.map_err(DashboardError::ActivitiesFetch)?;
    Ok(build_snapshot(&logs, &incidents, &activities))
}

/// Pure aggregation over three pre-scoped row sets.
pub fn build_snapshot(
    logs: &[EmotionLog],
    incidents: &[Incident],
    activities: &[Activity],
) -> DashboardSnapshot {
    let emotion_distribution = count_by_label(logs.iter().map(|log| log.emotion.clone()));
    let course_risks = rank_course_risks(logs);

    let incident_overview = IncidentOverview {
        by_month: bucket_by_month(incidents.iter().map(|incident| incident.incident_date)),
        by_severity: count_by_label(incidents.iter().map(|incident| incident.severity.clone())),
        by_type: count_by_label(incidents.iter().map(|incident| incident.incident_type.clone())),
        recent: recent_incidents(incidents),
    };

    let activity_overview = ActivityOverview {
        by_month: bucket_by_month(activities.iter().map(|activity| activity.start_datetime)),
        by_type: count_by_label(activities.iter().map(activity_label)),
        recent: recent_activities(activities),
    };

    let summary = SummaryTotals {
        // Raw totals on purpose: a log without a course still counts here
        // even though it never reaches the risk ranking.
        total_emotion_logs: logs.len() as u64,
        total_incidents: incidents.len() as u64,
        total_activities: activities.len() as u64,
        low_emotion_courses: course_risks.len() as u64,
    };

    DashboardSnapshot {
        emotion_distribution,
        course_risks,
        incidents: incident_overview,
        activities: activity_overview,
        summary,
    }
}

struct StudentAccum {
    name: String,
    total: f64,
    count: u64,
}

struct CourseAccum {
    name: String,
    total: f64,
    count: u64,
    students: IndexMap<Uuid, StudentAccum>,
}

/// Per-course risk ranking over logs that carry both a student and a course.
/// Qualifying courses come out ascending by average (most at risk first),
/// each with its `LOW_STUDENT_LIMIT` lowest-averaging students.
fn rank_course_risks(logs: &[EmotionLog]) -> Vec<CourseRisk> {
    let mut courses: IndexMap<Uuid, CourseAccum> = IndexMap::new();

    for log in logs {
        let Some(student) = &log.student else {
            continue;
        };
        let Some(course) = &student.course else {
            continue;
        };

        let score = wellbeing_score(&log.emotion);
        let entry = courses.entry(course.id).or_insert_with(|| CourseAccum {
            name: course.display_name(),
            total: 0.0,
            count: 0,
            students: IndexMap::new(),
        });
        entry.total += score;
        entry.count += 1;

        let student_entry = entry
            .students
            .entry(student.id)
            .or_insert_with(|| StudentAccum {
                name: student.display_name(),
                total: 0.0,
                count: 0,
            });
        student_entry.total += score;
        student_entry.count += 1;
    }

    let mut risks: Vec<CourseRisk> = courses
        .into_iter()
        .filter_map(|(course_id, course)| {
            let average = if course.count == 0 {
                0.0
            } else {
                course.total / course.count as f64
            };
            if !is_at_risk(average) {
                return None;
            }

            let mut low_students: Vec<StudentRisk> = course
                .students
                .into_iter()
                .map(|(student_id, student)| StudentRisk {
                    student_id,
                    student_name: student.name,
                    average: student.total / student.count as f64,
                    log_count: student.count,
                })
                .collect();
            low_students.sort_by(|a, b| {
                a.average.partial_cmp(&b.average).unwrap_or(Ordering::Equal)
            });
            low_students.truncate(LOW_STUDENT_LIMIT);

            Some(CourseRisk {
                course_id,
                course_name: course.name,
                average,
                log_count: course.count,
                low_students,
            })
        })
        .collect();

    risks.sort_by(|a, b| a.average.partial_cmp(&b.average).unwrap_or(Ordering::Equal));
    risks
}

/// Count per distinct label, first-seen insertion order.
fn count_by_label<I>(labels: I) -> Vec<LabelCount>
where
    I: IntoIterator<Item = String>,
{
    let mut counts: IndexMap<String, u64> = IndexMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(label, count)| LabelCount { label, count })
        .collect()
}

/// `YYYY-MM` buckets, ascending; lexicographic key order is chronological
/// for this format.
fn bucket_by_month<I>(dates: I) -> Vec<MonthCount>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let mut buckets: BTreeMap<String, u64> = BTreeMap::new();
    for date in dates {
        *buckets.entry(month_key(date)).or_insert(0) += 1;
    }
    buckets
        .into_iter()
        .map(|(month, count)| MonthCount { month, count })
        .collect()
}

fn recent_incidents(incidents: &[Incident]) -> Vec<RecentIncident> {
    let mut sorted = incidents.to_vec();
    sorted.sort_by(|a, b| b.incident_date.cmp(&a.incident_date));

    sorted
        .into_iter()
        .take(RECENT_LIMIT)
        .map(|incident| {
            let student_name = match &incident.student {
                Some(student) => student.display_name(),
                None => "No asignado".to_string(),
            };
            let course_name = incident
                .student
                .as_ref()
                .and_then(|student| student.course.as_ref())
                .map(|course| course.display_name());

            RecentIncident {
                id: incident.id,
                folio: incident.folio,
                incident_type: incident.incident_type,
                severity: incident.severity,
                student_name,
                course_name,
                incident_date: incident.incident_date,
            }
        })
        .collect()
}

fn recent_activities(activities: &[Activity]) -> Vec<RecentActivity> {
    let mut sorted = activities.to_vec();
    sorted.sort_by(|a, b| b.start_datetime.cmp(&a.start_datetime));

    sorted
        .into_iter()
        .take(RECENT_LIMIT)
        .map(|activity| RecentActivity {
            id: activity.id,
            title: activity_title(&activity),
            activity_type: activity_label(&activity),
            start_datetime: activity.start_datetime,
        })
        .collect()
}

fn activity_label(activity: &Activity) -> String {
    match activity.activity_type.as_deref() {
        Some(label) if !label.is_empty() => label.to_string(),
        _ => "otro".to_string(),
    }
}

fn activity_title(activity: &Activity) -> String {
    match activity.title.as_deref() {
        Some(title) if !title.trim().is_empty() => title.to_string(),
        _ => "Actividad sin título".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CourseRef, StudentRef};
    use chrono::TimeZone;

    fn course(name: &str, section: Option<&str>) -> CourseRef {
        CourseRef {
            id: Uuid::new_v4(),
            name: name.to_string(),
            section: section.map(str::to_string),
        }
    }

    fn student_in(course: &CourseRef, name: &str, last_name: &str) -> StudentRef {
        StudentRef {
            id: Uuid::new_v4(),
            name: name.to_string(),
            last_name: last_name.to_string(),
            course: Some(course.clone()),
        }
    }

    fn log(emotion: &str, student: Option<&StudentRef>) -> EmotionLog {
        EmotionLog {
            id: Uuid::new_v4(),
            emotion: emotion.to_string(),
            created_at: Utc::now(),
            student: student.cloned(),
        }
    }

    fn incident_on(date: DateTime<Utc>, student: Option<&StudentRef>) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            folio: Some("DEC-001".to_string()),
            incident_type: "disrupcion".to_string(),
            severity: "leve".to_string(),
            incident_date: date,
            student: student.cloned(),
        }
    }

    fn activity_on(date: DateTime<Utc>) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            activity_type: Some("taller".to_string()),
            title: Some("Taller de convivencia".to_string()),
            start_datetime: date,
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    #[test]
    fn score_table_matches_fixed_scale() {
        assert_eq!(wellbeing_score("triste"), 1.0);
        assert_eq!(wellbeing_score("muy_mal"), 1.5);
        assert_eq!(wellbeing_score("mal"), 2.0);
        assert_eq!(wellbeing_score("neutral"), 3.0);
        assert_eq!(wellbeing_score("bien"), 4.0);
        assert_eq!(wellbeing_score("muy_bien"), 5.0);
        assert_eq!(wellbeing_score("curioso"), NEUTRAL_SCORE);
    }

    #[test]
    fn at_risk_guard_and_threshold() {
        assert!(!is_at_risk(0.0));
        assert!(!is_at_risk(LOW_RISK_THRESHOLD));
        assert!(!is_at_risk(2.6));
        assert!(is_at_risk(2.49999));
        assert!(is_at_risk(1.0));
    }

    #[test]
    fn snapshot_is_pure_and_idempotent() {
        let quinto = course("5° Básico", Some("A"));
        let ana = student_in(&quinto, "Ana", "Rojas");
        let logs = vec![log("triste", Some(&ana)), log("bien", None)];
        let incidents = vec![incident_on(utc(2024, 3, 10, 12), Some(&ana))];
        let activities = vec![activity_on(utc(2024, 3, 12, 9))];

        let first = build_snapshot(&logs, &incidents, &activities);
        let second = build_snapshot(&logs, &incidents, &activities);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn course_on_threshold_is_excluded() {
        // avg exactly 2.5 (mal + neutral) must not qualify; 7/3 ≈ 2.33 must.
        let borderline = course("6° Básico", Some("B"));
        let at_risk = course("7° Básico", Some("A"));
        let marco = student_in(&borderline, "Marco", "Díaz");
        let paula = student_in(&at_risk, "Paula", "Soto");

        let logs = vec![
            log("mal", Some(&marco)),
            log("neutral", Some(&marco)),
            log("mal", Some(&paula)),
            log("mal", Some(&paula)),
            log("neutral", Some(&paula)),
        ];

        let snapshot = build_snapshot(&logs, &[], &[]);
        assert_eq!(snapshot.course_risks.len(), 1);
        assert_eq!(snapshot.course_risks[0].course_name, "7° Básico A");
        assert!((snapshot.course_risks[0].average - 7.0 / 3.0).abs() < 1e-9);
        assert_eq!(snapshot.summary.low_emotion_courses, 1);
    }

    #[test]
    fn low_students_keeps_three_lowest_ascending() {
        let octavo = course("8° Básico", Some("A"));
        let mut logs = Vec::new();

        // Ten students; the three lowest averages are 1.0, 1.25 and 1.5.
        let emotions_per_student: [&[&str]; 10] = [
            &["triste"],
            &["triste", "muy_mal"],
            &["triste", "mal"],
            &["muy_mal", "mal"],
            &["mal"],
            &["mal", "neutral"],
            &["neutral"],
            &["neutral"],
            &["neutral"],
            &["neutral"],
        ];
        let mut names = Vec::new();
        for (i, emotions) in emotions_per_student.iter().enumerate() {
            let student = student_in(&octavo, &format!("Estudiante{i}"), "Prueba");
            names.push(student.display_name());
            for emotion in emotions.iter().copied() {
                logs.push(log(emotion, Some(&student)));
            }
        }

        let snapshot = build_snapshot(&logs, &[], &[]);
        assert_eq!(snapshot.course_risks.len(), 1);
        let low = &snapshot.course_risks[0].low_students;
        assert_eq!(low.len(), LOW_STUDENT_LIMIT);
        assert_eq!(low[0].student_name, names[0]);
        assert_eq!(low[1].student_name, names[1]);
        assert_eq!(low[2].student_name, names[2]);
        assert!((low[0].average - 1.0).abs() < 1e-9);
        assert!((low[1].average - 1.25).abs() < 1e-9);
        assert!((low[2].average - 1.5).abs() < 1e-9);
    }

    #[test]
    fn unknown_emotion_scores_neutral_but_still_counts() {
        let cuarto = course("4° Medio", None);
        let ines = student_in(&cuarto, "Inés", "Vera");
        let logs = vec![log("curioso", Some(&ines)), log("triste", Some(&ines))];

        let snapshot = build_snapshot(&logs, &[], &[]);
        // (3 + 1) / 2 — the unknown emotion contributed the neutral score.
        assert_eq!(snapshot.course_risks.len(), 1);
        assert!((snapshot.course_risks[0].average - 2.0).abs() < 1e-9);
        assert!(snapshot
            .emotion_distribution
            .iter()
            .any(|entry| entry.label == "curioso" && entry.count == 1));
    }

    #[test]
    fn emotion_distribution_keeps_first_seen_order() {
        let logs = vec![
            log("bien", None),
            log("triste", None),
            log("bien", None),
            log("neutral", None),
        ];
        let snapshot = build_snapshot(&logs, &[], &[]);
        let labels: Vec<&str> = snapshot
            .emotion_distribution
            .iter()
            .map(|entry| entry.label.as_str())
            .collect();
        assert_eq!(labels, vec!["bien", "triste", "neutral"]);
        assert_eq!(snapshot.emotion_distribution[0].count, 2);
    }

    #[test]
    fn incidents_bucket_by_utc_month() {
        let incidents = vec![
            incident_on(utc(2024, 1, 5, 10), None),
            incident_on(utc(2024, 1, 31, 23), None),
            incident_on(utc(2024, 2, 1, 0), None),
        ];
        let snapshot = build_snapshot(&[], &incidents, &[]);
        assert_eq!(
            snapshot.incidents.by_month,
            vec![
                MonthCount {
                    month: "2024-01".to_string(),
                    count: 2
                },
                MonthCount {
                    month: "2024-02".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn recent_incidents_capped_at_five_descending() {
        let incidents: Vec<Incident> = (1..=8)
            .map(|day| incident_on(utc(2024, 3, day, 8), None))
            .collect();
        let snapshot = build_snapshot(&[], &incidents, &[]);

        let recent = &snapshot.incidents.recent;
        assert_eq!(recent.len(), RECENT_LIMIT);
        assert_eq!(recent[0].incident_date, utc(2024, 3, 8, 8));
        assert_eq!(recent[4].incident_date, utc(2024, 3, 4, 8));
        for pair in recent.windows(2) {
            assert!(pair[0].incident_date > pair[1].incident_date);
        }
    }

    #[test]
    fn logs_without_student_count_in_totals_only() {
        let logs = vec![log("triste", None), log("triste", None)];
        let snapshot = build_snapshot(&logs, &[], &[]);

        assert_eq!(snapshot.summary.total_emotion_logs, 2);
        assert_eq!(snapshot.emotion_distribution[0].count, 2);
        assert!(snapshot.course_risks.is_empty());
        assert_eq!(snapshot.summary.low_emotion_courses, 0);
    }

    #[test]
    fn incident_name_fallbacks() {
        let courseless = StudentRef {
            id: Uuid::new_v4(),
            name: "Pedro".to_string(),
            last_name: "Muñoz".to_string(),
            course: None,
        };
        let nameless = StudentRef {
            id: Uuid::new_v4(),
            name: "".to_string(),
            last_name: " ".to_string(),
            course: None,
        };
        let incidents = vec![
            incident_on(utc(2024, 4, 3, 9), Some(&courseless)),
            incident_on(utc(2024, 4, 2, 9), Some(&nameless)),
            incident_on(utc(2024, 4, 1, 9), None),
        ];

        let snapshot = build_snapshot(&[], &incidents, &[]);
        let recent = &snapshot.incidents.recent;
        assert_eq!(recent[0].student_name, "Pedro Muñoz");
        assert_eq!(recent[0].course_name, None);
        assert_eq!(recent[1].student_name, "Sin nombre");
        assert_eq!(recent[2].student_name, "No asignado");
    }

    #[test]
    fn activity_defaults_apply() {
        let bare = Activity {
            id: Uuid::new_v4(),
            activity_type: None,
            title: Some("  ".to_string()),
            start_datetime: utc(2024, 5, 2, 10),
        };
        let snapshot = build_snapshot(&[], &[], &[bare]);

        assert_eq!(snapshot.activities.by_type[0].label, "otro");
        assert_eq!(snapshot.activities.recent[0].title, "Actividad sin título");
        assert_eq!(snapshot.activities.recent[0].activity_type, "otro");
        assert_eq!(snapshot.summary.total_activities, 1);
    }

    #[test]
    fn fetch_failures_short_circuit_in_order() {
        let result = assemble_snapshot(
            Ok(Vec::new()),
            Err(sqlx::Error::PoolTimedOut),
            Ok(Vec::new()),
        );
        let err = result.expect_err("incident failure must abort");
        assert!(matches!(err, DashboardError::IncidentsFetch(_)));
        assert_eq!(err.to_string(), "could not load DEC incidents");

        // Logs are classified first when more than one dataset fails.
        let result = assemble_snapshot(
            Err(sqlx::Error::PoolTimedOut),
            Err(sqlx::Error::PoolTimedOut),
            Ok(Vec::new()),
        );
        assert!(matches!(
            result.expect_err("log failure must abort"),
            DashboardError::LogsFetch(_)
        ));
    }

    #[test]
    fn trailing_window_spans_requested_days() {
        let window = AggregationWindow::trailing(30);
        assert_eq!((window.to - window.from).num_days(), 30);

        let empty = AggregationWindow::trailing(0);
        assert_eq!(empty.from, empty.to);
    }
}

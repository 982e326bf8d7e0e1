use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Activity, AggregationWindow, CourseRef, EmotionLog, Incident, StudentRef};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Demo institution used by `seed`.
pub const SEED_INSTITUTION: &str = "9b2f5c1e-1d2a-4d5e-9c3b-7f8a6d4e2c10";

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let institution_id = Uuid::parse_str(SEED_INSTITUTION)?;

    let courses = vec![("5° Básico", "A"), ("1° Medio", "B")];
    for (name, section) in courses {
        upsert_course(pool, institution_id, name, section).await?;
    }

    let students = vec![
        ("Ana", "Rojas", "5° Básico", "A"),
        ("Benjamín", "Castro", "5° Básico", "A"),
        ("Camila", "Paredes", "1° Medio", "B"),
        ("Diego", "Fuentes", "1° Medio", "B"),
    ];
    for (first_name, last_name, course_name, section) in students {
        let course_id = upsert_course(pool, institution_id, course_name, section).await?;
        upsert_student(pool, institution_id, first_name, last_name, Some(course_id)).await?;
    }

    // Check-ins skewed low for 5° Básico A so the seeded dashboard shows an
    // at-risk course.
    let logs = vec![
        ("seed-log-001", "Ana", "Rojas", "triste", 1),
        ("seed-log-002", "Ana", "Rojas", "mal", 2),
        ("seed-log-003", "Benjamín", "Castro", "muy_mal", 1),
        ("seed-log-004", "Benjamín", "Castro", "neutral", 4),
        ("seed-log-005", "Camila", "Paredes", "bien", 1),
        ("seed-log-006", "Camila", "Paredes", "muy_bien", 3),
        ("seed-log-007", "Diego", "Fuentes", "neutral", 2),
    ];
    for (source_key, first_name, last_name, emotion, days_ago) in logs {
        let student_id = find_student(pool, institution_id, first_name, last_name).await?;
        sqlx::query(
            r#"
            INSERT INTO bienestar.emotion_logs
            (id, institution_id, student_id, emotion, log_type, source_key, created_at)
            VALUES ($1, $2, $3, $4, 'daily', $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(institution_id)
        .bind(student_id)
        .bind(emotion)
        .bind(source_key)
        .bind(Utc::now() - Duration::days(days_ago))
        .execute(pool)
        .await?;
    }

    let incidents = vec![
        (
            "7c1f3a52-8e0b-4c6d-9a21-5b3e7d9f1a04",
            "DEC-2026-001",
            "agresion_verbal",
            "grave",
            Some(("Ana", "Rojas")),
            3,
        ),
        (
            "2e9d6b17-4f3a-48c5-b0d2-8a1c5e7f3b92",
            "DEC-2026-002",
            "disrupcion",
            "leve",
            Some(("Diego", "Fuentes")),
            10,
        ),
        (
            "5a4c8e23-1b7d-4f90-a6e3-9d2b4c6f8e15",
            "DEC-2026-003",
            "disrupcion",
            "leve",
            None,
            15,
        ),
    ];
    for (id, folio, incident_type, severity, student, days_ago) in incidents {
        let student_id = match student {
            Some((first_name, last_name)) => {
                Some(find_student(pool, institution_id, first_name, last_name).await?)
            }
            None => None,
        };
        sqlx::query(
            r#"
            INSERT INTO bienestar.incidents
            (id, institution_id, student_id, folio, incident_type, severity, incident_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(institution_id)
        .bind(student_id)
        .bind(folio)
        .bind(incident_type)
        .bind(severity)
        .bind(Utc::now() - Duration::days(days_ago))
        .execute(pool)
        .await?;
    }

    let activities = vec![
        (
            "c3b8d1f6-7a25-4e94-8c07-2f5a9b3d6e81",
            Some("taller"),
            Some("Taller de regulación emocional"),
            5,
        ),
        (
            "a1e4f7c2-9d38-46b5-8e12-6c0b3f5d8a97",
            Some("charla"),
            Some("Charla para apoderados"),
            12,
        ),
        ("d6f2a9b4-3c81-4d57-9e06-1b8e4c7f2a53", None, None, 20),
    ];
    for (id, activity_type, title, days_ago) in activities {
        sqlx::query(
            r#"
            INSERT INTO bienestar.activities
            (id, institution_id, activity_type, title, status, start_datetime)
            VALUES ($1, $2, $3, $4, 'activa', $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(institution_id)
        .bind(activity_type)
        .bind(title)
        .bind(Utc::now() - Duration::days(days_ago))
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn upsert_course(
    pool: &PgPool,
    institution_id: Uuid,
    name: &str,
    section: &str,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO bienestar.courses (id, institution_id, name, section)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (institution_id, name, section) DO UPDATE
        SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(institution_id)
    .bind(name)
    .bind(section)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_student(
    pool: &PgPool,
    institution_id: Uuid,
    first_name: &str,
    last_name: &str,
    course_id: Option<Uuid>,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO bienestar.students (id, institution_id, first_name, last_name, course_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (institution_id, first_name, last_name) DO UPDATE
        SET course_id = EXCLUDED.course_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(institution_id)
    .bind(first_name)
    .bind(last_name)
    .bind(course_id)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn find_student(
    pool: &PgPool,
    institution_id: Uuid,
    first_name: &str,
    last_name: &str,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        "SELECT id FROM bienestar.students \
         WHERE institution_id = $1 AND first_name = $2 AND last_name = $3",
    )
    .bind(institution_id)
    .bind(first_name)
    .bind(last_name)
    .fetch_one(pool)
    .await
    .with_context(|| format!("student {first_name} {last_name} not seeded"))?
    .get("id");
    Ok(id)
}

fn student_from_row(row: &PgRow) -> Option<StudentRef> {
    let student_id: Option<Uuid> = row.get("student_id");
    let student_id = student_id?;

    let course_id: Option<Uuid> = row.get("course_id");
    let course = course_id.map(|id| {
        let section: String = row.get("section");
        CourseRef {
            id,
            name: row.get("course_name"),
            section: if section.is_empty() {
                None
            } else {
                Some(section)
            },
        }
    });

    Some(StudentRef {
        id: student_id,
        name: row.get("first_name"),
        last_name: row.get("last_name"),
        course,
    })
}

/// Daily check-ins for one institution inside the window, newest first, with
/// the student and course references LEFT-JOINed in (either may be absent).
///
/// The three fetches return the bare `sqlx::Error` so the aggregation layer
/// can report which dataset failed.
pub async fn fetch_emotion_logs(
    pool: &PgPool,
    institution_id: Uuid,
    window: &AggregationWindow,
) -> Result<Vec<EmotionLog>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT el.id, el.emotion, el.created_at, \
         st.id AS student_id, st.first_name, st.last_name, \
         c.id AS course_id, c.name AS course_name, c.section \
         FROM bienestar.emotion_logs el \
         LEFT JOIN bienestar.students st ON st.id = el.student_id \
         LEFT JOIN bienestar.courses c ON c.id = st.course_id \
         WHERE el.institution_id = $1 \
           AND el.log_type = 'daily' \
           AND el.created_at BETWEEN $2 AND $3 \
         ORDER BY el.created_at DESC",
    )
    .bind(institution_id)
    .bind(window.from)
    .bind(window.to)
    .fetch_all(pool)
    .await?;

    let logs: Vec<EmotionLog> = rows
        .iter()
        .map(|row| EmotionLog {
            id: row.get("id"),
            emotion: row.get("emotion"),
            created_at: row.get("created_at"),
            student: student_from_row(row),
        })
        .collect();

    tracing::debug!(count = logs.len(), "fetched emotion logs");
    Ok(logs)
}

pub async fn fetch_incidents(
    pool: &PgPool,
    institution_id: Uuid,
    window: &AggregationWindow,
) -> Result<Vec<Incident>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT i.id, i.folio, i.incident_type, i.severity, i.incident_date, \
         st.id AS student_id, st.first_name, st.last_name, \
         c.id AS course_id, c.name AS course_name, c.section \
         FROM bienestar.incidents i \
         LEFT JOIN bienestar.students st ON st.id = i.student_id \
         LEFT JOIN bienestar.courses c ON c.id = st.course_id \
         WHERE i.institution_id = $1 \
           AND i.incident_date BETWEEN $2 AND $3 \
         ORDER BY i.incident_date DESC",
    )
    .bind(institution_id)
    .bind(window.from)
    .bind(window.to)
    .fetch_all(pool)
    .await?;

    let incidents: Vec<Incident> = rows
        .iter()
        .map(|row| Incident {
            id: row.get("id"),
            folio: row.get("folio"),
            incident_type: row.get("incident_type"),
            severity: row.get("severity"),
            incident_date: row.get("incident_date"),
            student: student_from_row(row),
        })
        .collect();

    tracing::debug!(count = incidents.len(), "fetched incidents");
    Ok(incidents)
}

pub async fn fetch_activities(
    pool: &PgPool,
    institution_id: Uuid,
    window: &AggregationWindow,
) -> Result<Vec<Activity>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, activity_type, title, start_datetime \
         FROM bienestar.activities \
         WHERE institution_id = $1 \
           AND status = 'activa' \
           AND start_datetime BETWEEN $2 AND $3 \
         ORDER BY start_datetime DESC",
    )
    .bind(institution_id)
    .bind(window.from)
    .bind(window.to)
    .fetch_all(pool)
    .await?;

    let activities: Vec<Activity> = rows
        .iter()
        .map(|row| Activity {
            id: row.get("id"),
            activity_type: row.get("activity_type"),
            title: row.get("title"),
            start_datetime: row.get("start_datetime"),
        })
        .collect();

    tracing::debug!(count = activities.len(), "fetched activities");
    Ok(activities)
}

/// Bulk-loads historical check-ins from a CSV export. Courses and students
/// are upserted; logs dedup on `source_key`.
pub async fn import_csv(
    pool: &PgPool,
    institution_id: Uuid,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        first_name: String,
        last_name: String,
        course_name: String,
        section: Option<String>,
        emotion: String,
        created_at: DateTime<Utc>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let course_id = upsert_course(
            pool,
            institution_id,
            &row.course_name,
            row.section.as_deref().unwrap_or(""),
        )
        .await?;
        let student_id = upsert_student(
            pool,
            institution_id,
            &row.first_name,
            &row.last_name,
            Some(course_id),
        )
        .await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO bienestar.emotion_logs
            (id, institution_id, student_id, emotion, log_type, source_key, created_at)
            VALUES ($1, $2, $3, $4, 'daily', $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(institution_id)
        .bind(student_id)
        .bind(&row.emotion)
        .bind(source_key)
        .bind(row.created_at)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

use std::fmt::Write;

use crate::models::{AggregationWindow, DashboardSnapshot};

/// Renders a snapshot as the markdown report handed to convivencia teams.
pub fn build_report(
    snapshot: &DashboardSnapshot,
    window: &AggregationWindow,
    window_days: i64,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Reporte de bienestar escolar");
    let _ = writeln!(
        output,
        "Ventana: últimos {} días ({} a {})",
        window_days,
        window.from.format("%Y-%m-%d"),
        window.to.format("%Y-%m-%d")
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Resumen");
    let _ = writeln!(
        output,
        "- Registros emocionales: {}",
        snapshot.summary.total_emotion_logs
    );
    let _ = writeln!(
        output,
        "- Incidencias DEC: {}",
        snapshot.summary.total_incidents
    );
    let _ = writeln!(
        output,
        "- Actividades: {}",
        snapshot.summary.total_activities
    );
    let _ = writeln!(
        output,
        "- Cursos en riesgo: {}",
        snapshot.summary.low_emotion_courses
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Distribución emocional");
    if snapshot.emotion_distribution.is_empty() {
        let _ = writeln!(output, "Sin registros emocionales en la ventana.");
    } else {
        for entry in snapshot.emotion_distribution.iter() {
            let _ = writeln!(output, "- {}: {} registros", entry.label, entry.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Cursos en riesgo");
    if snapshot.course_risks.is_empty() {
        let _ = writeln!(output, "Ningún curso bajo el umbral de riesgo.");
    } else {
        for course in snapshot.course_risks.iter() {
            let _ = writeln!(
                output,
                "- {}: promedio {:.2} sobre {} registros",
                course.course_name, course.average, course.log_count
            );
            for student in course.low_students.iter() {
                let _ = writeln!(
                    output,
                    "  - {}: promedio {:.2}",
                    student.student_name, student.average
                );
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Incidencias DEC recientes");
    if snapshot.incidents.recent.is_empty() {
        let _ = writeln!(output, "Sin incidencias DEC en la ventana.");
    } else {
        for incident in snapshot.incidents.recent.iter() {
            let _ = writeln!(
                output,
                "- [{}] {} ({}) — {}{} el {}",
                incident.folio.as_deref().unwrap_or("s/f"),
                incident.incident_type,
                incident.severity,
                incident.student_name,
                incident
                    .course_name
                    .as_deref()
                    .map(|name| format!(", {name}"))
                    .unwrap_or_default(),
                incident.incident_date.format("%Y-%m-%d")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Actividades recientes");
    if snapshot.activities.recent.is_empty() {
        let _ = writeln!(output, "Sin actividades en la ventana.");
    } else {
        for activity in snapshot.activities.recent.iter() {
            let _ = writeln!(
                output,
                "- {} ({}) el {}",
                activity.title,
                activity.activity_type,
                activity.start_datetime.format("%Y-%m-%d")
            );
        }
    }

    output
}

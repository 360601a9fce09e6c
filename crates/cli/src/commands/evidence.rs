//! `pke evidence`: print a course's evidence report.

use pke_config::AppConfig;
use pke_core::store::CourseStore;
use pke_workflow::evidence_report;

pub async fn run(course_id: &str, as_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let stores = pke_store::open(&config.store).await?;

    let course = stores
        .courses
        .load(course_id)
        .await?
        .ok_or_else(|| format!("Course not found: {course_id}"))?;
    let report = evidence_report(&course);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Evidence: {} ({})", report.course_title, report.course_id);
    println!("  Stage: {}", course.current_stage);
    if report.invocations.is_empty() {
        println!("  No accepted invocations yet.");
        return Ok(());
    }

    for entry in &report.invocations {
        println!(
            "  {} {:<16} {}  {}",
            entry.number,
            entry.number.name(),
            entry.grade,
            entry.completed_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!(
        "\n  Overall: {} (score {:.2}, {} graded)",
        report.overall.overall_grade, report.overall.score, report.overall.total
    );

    Ok(())
}

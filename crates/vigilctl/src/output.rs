//! Terminal output, ASCII only

use owo_colors::OwoColorize;
use serde_json::Value;
use vigil_common::{AggregateStats, KnowledgeStatus};

const SEPARATOR: &str = "------------------------------------------------------------";

/// Colored tag for a health status string
pub fn status_tag(status: &str) -> String {
    match status {
        "healthy" => "[HEALTHY]".bright_green().to_string(),
        "warning" => "[WARNING]".yellow().to_string(),
        "critical" => "[CRITICAL]".bright_red().to_string(),
        _ => "[UNKNOWN]".dimmed().to_string(),
    }
}

fn or_dash(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

pub fn display_status(status: &KnowledgeStatus) {
    let readiness = if status.building {
        "[BUILDING]".cyan().to_string()
    } else if status.ready {
        "[READY]".bright_green().to_string()
    } else {
        "[NOT READY]".yellow().to_string()
    };

    println!("{}  Vigil knowledge base ({})", readiness, status.source);
    println!("{}", SEPARATOR);
    println!("  Generation:   {}", status.generation);
    println!("  Services:     {}", status.service_count);
    match status.last_build_time {
        Some(t) => println!("  Last build:   {}", t.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last build:   never"),
    }
    if let Some(ms) = status.last_build_duration_ms {
        println!("  Duration:     {}ms", ms);
    }
    if let Some(err) = &status.last_error {
        println!();
        println!("[ERROR] {}", err.bright_red());
    }
}

pub fn display_stats(stats: &AggregateStats) {
    println!("Fleet statistics ({})", stats.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("{}", SEPARATOR);
    println!(
        "  Services:     {} ({:.1}% healthy)",
        stats.total_services, stats.healthy_percentage
    );
    println!(
        "  Status:       {} healthy, {} warning, {} critical, {} unknown",
        stats.healthy_count.bright_green(),
        stats.warning_count.yellow(),
        stats.critical_count.bright_red(),
        stats.unknown_count
    );
    println!("  Health score: {}", or_dash(stats.avg_health_score, 1));
    println!("  Errors:       {}", or_dash(stats.avg_error_count, 1));
    println!("  Response:     {} ms", or_dash(stats.avg_response_time, 1));
    println!("  Failure rate: {} %", or_dash(stats.avg_failure_rate, 2));
    println!("  Throughput:   {} req/min", or_dash(stats.avg_throughput, 1));
    println!(
        "  Problems:     {} open of {} ({} services affected)",
        stats.open_problems, stats.total_problems, stats.services_with_problems
    );
    if stats.degraded_services > 0 {
        println!(
            "{}",
            format!("[NOTE] {} services have stale or missing metrics", stats.degraded_services).yellow()
        );
    }
}

/// One table row per service record in a JSON result
pub fn service_row(record: &Value) -> String {
    let id = record.get("id").and_then(Value::as_str).unwrap_or("?");
    let name = record.get("display_name").and_then(Value::as_str).unwrap_or("?");
    let status = record.get("status").and_then(Value::as_str).unwrap_or("unknown");
    let score = or_dash(record.get("health_score").and_then(Value::as_f64), 1);
    let stale = match record.pointer("/metrics/state").and_then(Value::as_str) {
        Some("stale") => " (stale)",
        Some("unavailable") => " (no metrics)",
        _ => "",
    };
    format!("  {:<24} {:<28} {:>6}  {}{}", id, name, score, status_tag(status), stale)
}

/// Render a query response; structured output falls back to JSON
pub fn display_query(response: &Value) {
    let result = match response.get("result") {
        Some(result) => result,
        None => {
            println!("{}", pretty(response));
            return;
        }
    };
    let generation = response.get("generation").and_then(Value::as_u64).unwrap_or(0);
    let kind = result.get("kind").and_then(Value::as_str).unwrap_or("");

    println!("[{}] generation {}", kind.to_uppercase(), generation);
    println!("{}", SEPARATOR);

    match kind {
        "count" => {
            let count = result.get("count").and_then(Value::as_u64).unwrap_or(0);
            println!("  {} matching services", count.bold());
            print_rows(result.get("services"));
        }
        "compare" => {
            print_rows(result.get("found"));
            if let Some(missing) = result.get("not_found").and_then(Value::as_array) {
                if !missing.is_empty() {
                    let names: Vec<&str> = missing.iter().filter_map(Value::as_str).collect();
                    println!();
                    println!("{}", format!("[NOTE] Not found: {}", names.join(", ")).yellow());
                }
            }
        }
        "describe" => match result.get("service") {
            Some(service) => {
                println!("{}", service_row(service));
                println!();
                println!("{}", pretty(service));
            }
            None => println!("{}", pretty(result)),
        },
        "rank" | "filter" => print_rows(result.get("services")),
        _ => println!("{}", pretty(result)),
    }
}

fn print_rows(records: Option<&Value>) {
    match records.and_then(Value::as_array) {
        Some(rows) if !rows.is_empty() => {
            for row in rows {
                println!("{}", service_row(row));
            }
        }
        _ => println!("  (no services)"),
    }
}

pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_or_dash() {
        assert_eq!(or_dash(Some(8.333), 2), "8.33");
        assert_eq!(or_dash(None, 1), "-");
    }

    #[test]
    fn test_service_row_marks_stale_metrics() {
        let record = json!({
            "id": "SERVICE-A",
            "display_name": "orders",
            "status": "warning",
            "health_score": 72.5,
            "metrics": { "state": "stale" }
        });
        let row = service_row(&record);
        assert!(row.contains("SERVICE-A"));
        assert!(row.contains("72.5"));
        assert!(row.ends_with("(stale)"));
    }

    #[test]
    fn test_service_row_without_score() {
        let record = json!({ "id": "SERVICE-B", "display_name": "cart", "status": "unknown" });
        assert!(service_row(&record).contains(" -  "));
    }
}

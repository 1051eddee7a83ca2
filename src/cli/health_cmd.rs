//! `health` subcommand: run the host resource check used for admission.

use super::exit;
use crate::config::EnvConfig;
use crate::health::{LimitReport, ResourceMonitor, SystemHealth};

/// Exits 0 when a session would be admitted, 1 otherwise.
pub async fn run_health(config: &EnvConfig, json: bool) -> i32 {
    let monitor = ResourceMonitor::new(config.thresholds, config.sandbox_root.clone());
    let report = monitor.check_resource_limits().await;

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else {
        print!("{}", render(&report));
    }

    if report.safe {
        exit::SUCCESS
    } else {
        exit::FAILURE
    }
}

fn render(report: &LimitReport) -> String {
    let mut out = String::new();
    if let Some(h) = &report.health {
        out.push_str(&format!(
            "memory: {:.1}%\ncpu: {:.1}%\ndisk: {:.1}%\n",
            h.memory_used_percent, h.cpu_load_percent, h.disk_used_percent
        ));
    }
    if report.safe {
        out.push_str("status: ok\n");
    } else {
        out.push_str(&format!("status: refusing ({})\n", report.violation_names().join(", ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{evaluate, HostHealth, ResourceThresholds};

    #[test]
    fn test_render_unhealthy() {
        let report = evaluate(
            HostHealth {
                memory_used_percent: 99.5,
                cpu_load_percent: 10.0,
                disk_used_percent: 10.0,
            },
            &ResourceThresholds::default(),
        );
        let text = render(&report);
        assert!(text.contains("memory: 99.5%"));
        assert!(text.contains("refusing (memory_critical)"));
    }
}

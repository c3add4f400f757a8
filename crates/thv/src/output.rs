//! CLI output: text tables, JSON, and `mcpServers` fragments.

use serde_json::json;
use thv_core::{OutputFormat, ThvError, Workload};

pub fn print_workloads(format: &OutputFormat, workloads: &[Workload]) {
    match format {
        OutputFormat::Text => print_table(workloads),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(workloads).expect("workloads serialize")
            );
        }
        OutputFormat::Mcpservers => {
            let mut servers = serde_json::Map::new();
            for workload in workloads {
                servers.insert(
                    workload.name.clone(),
                    json!({
                        "url": workload.url,
                        "type": facing_type(workload),
                    }),
                );
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "mcpServers": servers }))
                    .expect("fragment serialize")
            );
        }
    }
}

fn facing_type(workload: &Workload) -> String {
    match (workload.transport, workload.proxy_mode) {
        (thv_core::TransportType::Stdio, Some(mode)) => mode.as_str().to_string(),
        (transport, _) => transport.as_str().to_string(),
    }
}

fn print_table(workloads: &[Workload]) {
    if workloads.is_empty() {
        println!("No workloads found");
        return;
    }
    let headers = ["NAME", "GROUP", "STATUS", "TRANSPORT", "URL"];
    let rows: Vec<[String; 5]> = workloads
        .iter()
        .map(|w| {
            [
                w.name.clone(),
                w.group.clone().unwrap_or_else(|| "default".to_string()),
                w.status.to_string(),
                facing_type(w),
                w.url.clone(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }
    let print_row = |cells: [&str; 5]| {
        let line = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        println!("{}", line.trim_end());
    };
    print_row(headers);
    for row in &rows {
        print_row([&row[0], &row[1], &row[2], &row[3], &row[4]]);
    }
}

/// Human-readable on text mode; structured envelope on JSON modes.
pub fn print_error(format: &OutputFormat, err: &ThvError) {
    match format {
        OutputFormat::Text => eprintln!("Error: {err}"),
        OutputFormat::Json | OutputFormat::Mcpservers => {
            let envelope = json!({
                "error": {
                    "kind": err.kind(),
                    "message": err.to_string(),
                    "details": err.details(),
                }
            });
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&envelope).expect("envelope serialize")
            );
        }
    }
}

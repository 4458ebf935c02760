use comfy_table::{presets, Table};

use crate::runner::RunSummary;

/// Plain-text summary of a run: headline numbers, then one row per core and
/// one per router port that saw traffic.
pub fn render(summary: &RunSummary) -> String {
    let mut text = String::new();
    let s = &summary.stats;

    let headline = [
        ("Timeslots", summary.timeslots.to_string()),
        ("Cancelled", summary.cancelled.to_string()),
        ("Elapsed", format!("{} ms", summary.elapsed_ms)),
        ("Timeslots/s", format!("{:.0}", summary.timeslots_per_sec())),
        ("Requests", format!(
            "{} generated, {} issued, {} pending, {} refused",
            summary.requests_generated,
            summary.requests_issued,
            summary.requests_pending,
            summary.requests_refused
        )),
        ("Final mean gap", format!("{:.1}", summary.final_mean_gap)),
        ("Delivered", summary.totals.delivered.to_string()),
        ("Dropped", summary.totals.dropped.to_string()),
        ("Marked", summary.totals.marked.to_string()),
        ("Throughput", format!("{:.3} MTU/timeslot", summary.throughput())),
        ("Lost on full rings", (s.total.packets_lost_ring_full + s.admission.backlog_packets_lost).to_string()),
        ("Backlog refused", s.admission.backlog_rejected.to_string()),
        ("Pool starved", s.pool.starved.to_string()),
        ("Reclaimed", summary.reclaimed.to_string()),
    ];
    let width = headline.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
    for (label, value) in &headline {
        text.push_str(&format!("  {:width$}  {}\n", format!("{label}:"), value, width = width + 1));
    }

    let mut cores = Table::new();
    cores.load_preset(presets::NOTHING);
    cores.set_header(vec![
        "Core", "Timeslots", "Endpoint TX", "Router TX", "Delivered", "Dropped", "Marked",
        "Send Fails", "Admit Waits",
    ]);
    for (i, c) in s.cores.iter().enumerate() {
        cores.add_row(vec![
            i.to_string(),
            c.timeslots.to_string(),
            c.endpoint_sent.to_string(),
            c.router_sent.to_string(),
            c.delivered.to_string(),
            c.dropped.to_string(),
            c.marked.to_string(),
            c.send_failed.to_string(),
            c.wait_for_admitted_enqueue.to_string(),
        ]);
    }
    text.push('\n');
    text.push_str(&cores.to_string());
    text.push('\n');

    let mut ports = Table::new();
    ports.load_preset(presets::NOTHING);
    ports.set_header(vec![
        "Router", "Policy", "Port", "Enqueued", "Dequeued", "Dropped", "Marked", "Peak", "Now",
    ]);
    let mut rows = 0;
    for router in &s.routers {
        for (port, p) in router.ports.iter().enumerate() {
            if p.enqueued == 0 && p.dropped == 0 {
                continue;
            }
            ports.add_row(vec![
                router.id.to_string(),
                router.policy.to_string(),
                port.to_string(),
                p.enqueued.to_string(),
                p.dequeued.to_string(),
                p.dropped.to_string(),
                p.marked.to_string(),
                p.peak_occupancy.to_string(),
                p.occupancy.to_string(),
            ]);
            rows += 1;
        }
    }
    text.push('\n');
    if rows == 0 {
        text.push_str("No router traffic.\n");
    } else {
        text.push_str(&ports.to_string());
        text.push('\n');
    }
    text
}

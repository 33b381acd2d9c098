//! Human-readable rendering of reports.

use std::fmt::Write as _;

use cimigrate_core::{GenesisSummary, RunReport, SchemaAnalysis, SchemaCounts};

/// Failed addresses listed before the rest are summarized as a count.
const MAX_LISTED_FAILURES: usize = 20;

fn schema_line(counts: &SchemaCounts) -> String {
    format!(
        "legacy {}, broken {}, canonical {}, unknown {}",
        counts.legacy, counts.broken, counts.canonical, counts.unknown
    )
}

fn list_failures<'a>(out: &mut String, addresses: impl ExactSizeIterator<Item = &'a str>) {
    let count = addresses.len();
    if count == 0 {
        return;
    }
    let _ = writeln!(out, "  failed addresses:");
    for address in addresses.take(MAX_LISTED_FAILURES) {
        let _ = writeln!(out, "    {address}");
    }
    if count > MAX_LISTED_FAILURES {
        let _ = writeln!(out, "    ... and {} more", count - MAX_LISTED_FAILURES);
    }
}

pub fn run_report(report: &RunReport) -> String {
    let m = &report.migration;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Contract-info migration ({}, {} mode{})",
        report.network,
        report.mode.as_str(),
        if m.dry_run { ", dry run" } else { "" }
    );
    let _ = writeln!(out, "  records:   {} found, {} processed", m.total, m.processed);
    let _ = writeln!(
        out,
        "  migrated:  {}{}",
        m.migrated,
        if m.dry_run { " (not written)" } else { "" }
    );
    let _ = writeln!(out, "  skipped:   {} already canonical", m.skipped);
    let _ = writeln!(out, "  failed:    {}", m.failed);
    let _ = writeln!(out, "  schemas:   {}", schema_line(&m.schema_counts));
    let _ = writeln!(
        out,
        "  timing:    discovery {} ms, migration {} ms, {:.1} records/s",
        m.discovery_ms, m.migration_ms, m.throughput
    );
    let _ = writeln!(
        out,
        "  store:     {} workers, page size {}, {} scanned, {} written",
        m.workers, m.batch_size, m.session_metrics.scanned, m.session_metrics.sets
    );
    list_failures(&mut out, m.failed_addresses.iter().map(String::as_str));

    match (&report.validation, &report.validation_skipped) {
        (Some(v), _) => {
            let verdict = if v.passed() { "passed" } else { "FAILED" };
            let _ = writeln!(
                out,
                "Validation: {verdict} ({} of {} sampled records failed, seed {})",
                v.failed, v.sample_size, v.seed
            );
            for failure in v.failures().take(MAX_LISTED_FAILURES) {
                let _ = writeln!(
                    out,
                    "    {}: {}",
                    failure.address,
                    failure.error.as_deref().unwrap_or("invalid")
                );
            }
        }
        (None, Some(reason)) => {
            let _ = writeln!(out, "Validation: not run ({reason})");
        }
        (None, None) => {
            let _ = writeln!(out, "Validation: not run");
        }
    }
    let _ = writeln!(
        out,
        "Distribution check: {}",
        if report.distribution_ok { "ok" } else { "MISMATCH" }
    );
    let _ = writeln!(out, "Total time: {} ms", report.phases.total_ms);
    out
}

pub fn analysis(address_hex: &str, a: &SchemaAnalysis) -> String {
    fn describe(present: bool, wire: Option<impl std::fmt::Display>, len: Option<usize>) -> String {
        match (present, wire, len) {
            (true, Some(wire), Some(len)) => format!("present, {wire}, {len} bytes"),
            _ => "absent".to_owned(),
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "Contract {address_hex}");
    let _ = writeln!(out, "  schema:        {}", a.schema);
    let _ = writeln!(out, "  action:        {}", a.action);
    let _ = writeln!(out, "  size:          {} bytes, {} fields", a.size, a.field_count);
    let _ = writeln!(
        out,
        "  field 7 (ext): {}",
        describe(a.has_extension, a.extension_wire_type, a.extension_len)
    );
    let _ = writeln!(
        out,
        "  field 8 (port): {}",
        describe(a.has_port_id, a.port_id_wire_type, a.port_id_len)
    );
    if !a.dropped_fields.is_empty() {
        let _ = writeln!(out, "  dropped by rewrite: {:?}", a.dropped_fields);
    }
    if let Some(error) = &a.parse_error {
        let _ = writeln!(out, "  parse error:   {error}");
    }
    out
}

pub fn genesis_summary(summary: &GenesisSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Genesis contracts: {}", summary.total);
    let _ = writeln!(out, "  migrated:  {}", summary.migrated);
    let _ = writeln!(out, "  unchanged: {}", summary.unchanged);
    let _ = writeln!(out, "  failed:    {}", summary.failed);
    let _ = writeln!(out, "  schemas:   {}", schema_line(&summary.schema_counts));
    list_failures(
        &mut out,
        summary.failures.iter().map(|f| f.address.as_str()),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cimigrate_core::stats::RunTiming;
    use cimigrate_core::{
        MigrationStats, Network, PhaseDurations, RunMode, ValidationReport, analyze,
    };
    use cimigrate_wire::MessageBuilder;

    fn sample_report(failed: u64) -> RunReport {
        let stats = MigrationStats::new();
        let mut migration = stats.report(RunTiming::default(), false, 4);
        migration.total = 30 + failed;
        migration.processed = 30 + failed;
        migration.migrated = 20;
        migration.skipped = 10;
        migration.failed = failed;
        migration.failed_addresses = (0..failed).map(|i| format!("{i:04x}")).collect();
        RunReport {
            network: Network::Testnet,
            mode: RunMode::Lenient,
            migration,
            validation: Some(ValidationReport {
                total: 30,
                sample_size: 30,
                seed: 5,
                failed: 0,
                results: Vec::new(),
            }),
            validation_skipped: None,
            distribution_ok: true,
            phases: PhaseDurations::default(),
        }
    }

    #[test]
    fn run_report_lists_counts() {
        let text = run_report(&sample_report(2));
        assert!(text.starts_with("Contract-info migration (testnet, lenient mode)"));
        assert!(text.contains("migrated:  20"));
        assert!(text.contains("failed addresses:\n    0000\n    0001\n"));
        assert!(text.contains("Validation: passed (0 of 30 sampled records failed, seed 5)"));
        assert!(text.contains("Distribution check: ok"));
    }

    #[test]
    fn run_report_truncates_long_failure_lists() {
        let text = run_report(&sample_report(25));
        assert!(text.contains("... and 5 more"));
        assert!(!text.contains("    0014\n"));
    }

    #[test]
    fn skipped_validation_is_explained() {
        let mut report = sample_report(0);
        report.validation = None;
        report.validation_skipped = Some("dry run wrote nothing".to_owned());
        let text = run_report(&report);
        assert!(text.contains("Validation: not run (dry run wrote nothing)"));
        assert!(text.contains("Distribution check: ok"));
        assert!(!text.contains("failed addresses"));
    }

    #[test]
    fn analysis_text() {
        let data = MessageBuilder::new().bytes(7, b"port").bytes(8, b"ext").finish();
        let text = analysis("abcd", &analyze(&data));
        assert!(text.contains("schema:        broken"));
        assert!(text.contains("field 7 (ext): present, bytes, 4 bytes"));
        assert!(text.contains("field 8 (port): present, bytes, 3 bytes"));
    }
}

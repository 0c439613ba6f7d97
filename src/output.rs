use std::io::{self, Write};

use serde::Serialize;

use crate::app::{IdentifierReport, RunReport};
use crate::store::StoredRun;

#[derive(Serialize)]
struct RunOutput<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    stored: &'a StoredRun,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(report: &RunReport, stored: &StoredRun) -> io::Result<()> {
        Self::print_json(&RunOutput { report, stored })
    }

    pub fn print_resolve(report: &IdentifierReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_run(report: &RunReport, stored: &StoredRun) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        Self::write_run(&mut stdout, report, stored)
    }

    pub fn write_run<W: Write>(out: &mut W, report: &RunReport, stored: &StoredRun) -> io::Result<()> {
        writeln!(out, "release {}", report.release)?;
        for source in &report.sources {
            let stats = &source.stats;
            writeln!(
                out,
                "  {:<15} rows={} pairs={} unresolved={} retired={} cycles={} malformed={}",
                source.source.as_str(),
                stats.input_rows,
                stats.output_pairs,
                stats.unresolved_count,
                stats.retired_worm_ids,
                stats.lifecycle_cycles,
                stats.malformed_rows
            )?;
        }
        let consensus = &report.consensus;
        writeln!(
            out,
            "consensus: {} pairs, {} worm genes, {} human genes",
            consensus.pairs, consensus.unique_worm_genes, consensus.unique_human_genes
        )?;
        for (score, count) in &consensus.pairs_per_score {
            writeln!(out, "  score {score}: {count}")?;
        }
        if report.dropped_by_reference > 0 {
            writeln!(
                out,
                "dropped {} pairs outside the human reference",
                report.dropped_by_reference
            )?;
        }
        for path in &stored.files {
            writeln!(out, "wrote {path}")?;
        }
        Ok(())
    }

    pub fn print_resolve(report: &IdentifierReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        Self::write_resolve(&mut stdout, report)
    }

    pub fn write_resolve<W: Write>(out: &mut W, report: &IdentifierReport) -> io::Result<()> {
        let resolved = &report.resolved;
        writeln!(out, "{} ({})", resolved.raw, resolved.raw.organism)?;
        writeln!(out, "  path: [{}]", resolved.path_summary())?;
        writeln!(
            out,
            "  {}: {}",
            resolved.target_namespace,
            resolved.canonical().unwrap_or("unresolved")
        )?;
        if let Some(outcome) = &report.lifecycle {
            for event in &outcome.events {
                match &event.to_id {
                    Some(to) => writeln!(out, "  {} {} -> {}", event.kind, event.from_id, to)?,
                    None => writeln!(out, "  {} {}", event.kind, event.from_id)?,
                }
            }
        }
        if let Some(error) = &report.lifecycle_error {
            writeln!(out, "  lifecycle error: {error}")?;
        }
        writeln!(out, "  current: {}", report.final_id().unwrap_or("none"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Namespace, RawIdentifier};
    use crate::resolver::{ResolutionStatus, ResolutionStep, ResolvedIdentifier, StepOutcome, Strategy};

    #[test]
    fn resolve_text_shows_path() {
        let report = IdentifierReport {
            resolved: ResolvedIdentifier {
                raw: RawIdentifier::worm("Q9XXX1", Namespace::UniProtId).unwrap(),
                canonical_value: Some("WBGene00019439".to_string()),
                target_namespace: Namespace::WormBaseId,
                resolution_path: vec![
                    ResolutionStep::new(Strategy::BulkLookup, StepOutcome::NotFound),
                    ResolutionStep::new(
                        Strategy::HistoryLookup,
                        StepOutcome::Found("WBGene00019439".to_string()),
                    ),
                ],
                status: ResolutionStatus::Resolved,
            },
            lifecycle: None,
            lifecycle_error: None,
        };
        let mut out = Vec::new();
        TextOutput::write_resolve(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("path: [bulk_lookup: not_found, history_lookup: WBGene00019439]"));
        assert!(text.contains("current: WBGene00019439"));
    }
}

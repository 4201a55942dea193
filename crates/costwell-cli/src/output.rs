//! Result rendering for stdout

use anyhow::Result;
use clap::ValueEnum;
use std::io::Write;

use costwell::{ActualCostResult, CostResult, CostSummary, Engine, PluginDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns
    #[default]
    Table,
    /// One JSON document
    Json,
    /// One JSON object per line
    Ndjson,
}

fn write_row(out: &mut impl Write, widths: &[usize], cells: &[&str]) -> Result<()> {
    let mut text = String::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            text.push_str("  ");
        }
        text.push_str(cell);
        let pad = widths[i].saturating_sub(cell.chars().count());
        text.extend(std::iter::repeat(' ').take(pad));
    }
    writeln!(out, "{}", text.trim_end())?;
    Ok(())
}

/// Left-aligned columns separated by two spaces
fn write_table(out: &mut impl Write, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    write_row(out, &widths, headers)?;
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        write_row(out, &widths, &cells)?;
    }
    Ok(())
}

fn money(amount: f64) -> String {
    format!("{:.2}", amount)
}

pub fn plugins(out: &mut impl Write, plugins: &[PluginDescriptor], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if plugins.is_empty() {
                writeln!(out, "No plugins installed")?;
                return Ok(());
            }
            let rows: Vec<_> = plugins
                .iter()
                .map(|p| {
                    vec![
                        p.name.clone(),
                        p.version.to_string(),
                        p.transport.to_string(),
                        p.binary.display().to_string(),
                    ]
                })
                .collect();
            write_table(out, &["NAME", "VERSION", "TRANSPORT", "BINARY"], &rows)
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, plugins)?;
            writeln!(out)?;
            Ok(())
        }
        OutputFormat::Ndjson => {
            for plugin in plugins {
                serde_json::to_writer(&mut *out, plugin)?;
                writeln!(out)?;
            }
            Ok(())
        }
    }
}

fn summary_lines(out: &mut impl Write, summary: &CostSummary) -> Result<()> {
    writeln!(out)?;
    if summary.totals.is_empty() {
        writeln!(out, "Total: -")?;
    }
    for (currency, total) in &summary.totals {
        writeln!(out, "Total: {} {}/month", money(*total), currency)?;
    }
    writeln!(
        out,
        "{} resolved, {} without a price",
        summary.resolved, summary.unresolved
    )?;
    Ok(())
}

pub fn projected(out: &mut impl Write, results: &[CostResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let rows: Vec<_> = results
                .iter()
                .map(|r| {
                    vec![
                        r.resource.resource_type.clone(),
                        r.resource.sku.clone(),
                        r.resource.region.clone(),
                        r.adapter_source.to_string(),
                        money(r.monthly_cost),
                        r.currency.clone(),
                        r.note.clone(),
                    ]
                })
                .collect();
            write_table(
                out,
                &["RESOURCE", "SKU", "REGION", "SOURCE", "MONTHLY", "CURRENCY", "NOTE"],
                &rows,
            )?;
            summary_lines(out, &Engine::summarize(results))
        }
        OutputFormat::Json => {
            let document = serde_json::json!({
                "results": results,
                "summary": Engine::summarize(results),
            });
            serde_json::to_writer_pretty(&mut *out, &document)?;
            writeln!(out)?;
            Ok(())
        }
        OutputFormat::Ndjson => {
            for result in results {
                serde_json::to_writer(&mut *out, result)?;
                writeln!(out)?;
            }
            Ok(())
        }
    }
}

pub fn actual(out: &mut impl Write, results: &[ActualCostResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let rows: Vec<_> = results
                .iter()
                .map(|r| {
                    vec![
                        r.query.resource_id.clone(),
                        r.adapter_source.to_string(),
                        r.entries.len().to_string(),
                        money(r.total_cost),
                        r.note.clone(),
                    ]
                })
                .collect();
            write_table(out, &["RESOURCE ID", "SOURCE", "ENTRIES", "TOTAL", "NOTE"], &rows)
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, results)?;
            writeln!(out)?;
            Ok(())
        }
        OutputFormat::Ndjson => {
            for result in results {
                serde_json::to_writer(&mut *out, result)?;
                writeln!(out)?;
            }
            Ok(())
        }
    }
}

mod contract_class;
mod contracts;
mod engine;
mod fix;
mod ir;
mod model;
mod rules;
mod scan;
mod syntax;
mod telemetry;
#[cfg(test)]
mod test_harness;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, PropertyBag, ReportingDescriptor, Result as SarifResult, Run, Sarif,
    SCHEMA_URL, Tool, ToolComponent,
};
use tracing::{info, warn};

use crate::engine::{CancellationToken, Engine, FixOutcome};
use crate::scan::scan_inputs;
use crate::telemetry::{Telemetry, current_trace_id, init_logging, with_span};

/// CLI arguments for contracts-interop execution.
#[derive(Parser, Debug)]
#[command(
    name = "contracts-interop",
    about = "Keeps Code Contracts assertions and JetBrains [NotNull] annotations in sync, with SARIF output.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Restrict analysis to the given rule id; repeatable.
    #[arg(long = "rule", value_name = "ID")]
    rules: Vec<String>,
    /// Apply every available fix and rewrite the files in place.
    #[arg(long)]
    fix: bool,
    /// OTLP/HTTP endpoint receiving trace spans.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    let telemetry = match &cli.otel {
        Some(endpoint) => Some(Arc::new(Telemetry::new(endpoint.clone())?)),
        None => None,
    };
    let result = with_span(telemetry.as_deref(), "contracts-interop", &[], || {
        let result = run(&cli, telemetry.clone());
        if telemetry.is_some() {
            if let Some(trace_id) = current_trace_id() {
                info!(trace_id = %trace_id, "trace exported");
            }
        }
        result
    });
    if let Some(telemetry) = &telemetry {
        if let Err(err) = telemetry.shutdown() {
            warn!("{err:#}");
        }
    }
    result
}

fn run(cli: &Cli, telemetry: Option<Arc<Telemetry>>) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    let engine = Engine::with_rules(&cli.rules)?;
    let cancellation = CancellationToken::default();

    let started_at = Instant::now();
    let scan_started_at = Instant::now();
    let mut scan = scan_inputs(&cli.input, telemetry.as_deref())?;
    let mut scan_duration_ms = scan_started_at.elapsed().as_millis();

    let mut fixed_count = 0;
    if cli.fix {
        let outcomes = engine.fix(&scan.documents, telemetry.clone(), &cancellation)?;
        fixed_count = write_fixed(&outcomes)?;
        if fixed_count > 0 {
            let rescan_started_at = Instant::now();
            scan = scan_inputs(&cli.input, telemetry.as_deref())?;
            scan_duration_ms += rescan_started_at.elapsed().as_millis();
        }
    }

    let file_count = scan.documents.len();
    let output = with_span(
        telemetry.as_deref(),
        "analysis",
        &[KeyValue::new("contracts_interop.file_count", file_count as i64)],
        || engine.analyze(&scan.documents, telemetry.clone(), &cancellation),
    )?;
    let invocation_stats = InvocationStats {
        scan_duration_ms,
        file_count,
        fixed_count,
    };
    let invocation = build_invocation(&invocation_stats);
    let result_count = output.results.len();
    let sarif = build_sarif(scan.artifacts, invocation, output.rules, output.results);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} files={} fixed={} results={}",
            started_at.elapsed().as_millis(),
            scan_duration_ms,
            file_count,
            fixed_count,
            result_count
        );
    }

    Ok(())
}

/// Write back every document the fix pass changed; returns the number of files written.
fn write_fixed(outcomes: &[FixOutcome]) -> Result<usize> {
    let mut written = 0;
    for outcome in outcomes.iter().filter(|outcome| outcome.applied > 0) {
        let mut bytes = Vec::with_capacity(outcome.text.len() + 3);
        if outcome.bom {
            bytes.extend_from_slice("\u{feff}".as_bytes());
        }
        bytes.extend_from_slice(outcome.text.as_bytes());
        fs::write(&outcome.path, bytes)
            .with_context(|| format!("failed to write {}", outcome.path.display()))?;
        info!(
            path = %outcome.path.display(),
            fixes = outcome.applied,
            "rewrote file"
        );
        written += 1;
    }
    Ok(written)
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    scan_duration_ms: u128,
    file_count: usize,
    fixed_count: usize,
}

fn build_invocation(stats: &InvocationStats) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert(
        "contracts_interop.scan_ms".to_string(),
        json!(stats.scan_duration_ms),
    );
    properties.insert(
        "contracts_interop.file_count".to_string(),
        json!(stats.file_count),
    );
    properties.insert(
        "contracts_interop.fixed_count".to_string(),
        json!(stats.fixed_count),
    );

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: Vec<ReportingDescriptor>,
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = if rules.is_empty() {
        ToolComponent::builder()
            .name("contracts-interop")
            .version(env!("CARGO_PKG_VERSION"))
            .build()
    } else {
        ToolComponent::builder()
            .name("contracts-interop")
            .version(env!("CARGO_PKG_VERSION"))
            .rules(rules)
            .build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_harness::{CSharpTestHarness, SourceFile};

    #[test]
    fn sarif_is_minimal_and_valid_shape() {
        let invocation = build_invocation(&InvocationStats {
            scan_duration_ms: 0,
            file_count: 0,
            fixed_count: 0,
        });
        let sarif = build_sarif(Vec::new(), invocation, Vec::new(), Vec::new());
        let value = serde_json::to_value(&sarif).expect("serialize SARIF");

        assert_eq!(value["version"], "2.1.0");
        assert_eq!(value["$schema"], SCHEMA_URL);
        assert_eq!(
            value["runs"][0]["tool"]["driver"]["name"],
            "contracts-interop"
        );
        assert!(
            value["runs"][0]["results"]
                .as_array()
                .expect("results array")
                .is_empty()
        );
        assert_eq!(
            value["runs"][0]["invocations"][0]["executionSuccessful"],
            true
        );
        assert_eq!(
            value["runs"][0]["invocations"][0]["properties"]["contracts_interop.fixed_count"],
            0
        );
    }

    #[test]
    fn sarif_reports_rules_and_results_of_all_rules() {
        let harness = CSharpTestHarness::new();
        let tree = harness
            .write(&[SourceFile::new(
                "Sample.cs",
                r#"
using System.Diagnostics.Contracts;
using JetBrains.Annotations;

namespace Test
{
    class ClassA
    {
        void MethodX(object varOne, [NotNull] object varTwo)
        {
            Contract.Requires(varOne != null);
        }
    }
}"#,
            )])
            .expect("write sources");
        let scan = scan_inputs(tree.root(), None).expect("scan");
        let output = harness.analyze(tree.root()).expect("analyze");
        let sarif = build_sarif(
            scan.artifacts,
            build_invocation(&InvocationStats {
                scan_duration_ms: 0,
                file_count: 1,
                fixed_count: 0,
            }),
            output.rules,
            output.results,
        );
        let value = serde_json::to_value(&sarif).expect("serialize SARIF");

        let rule_ids: Vec<_> = value["runs"][0]["tool"]["driver"]["rules"]
            .as_array()
            .expect("rules array")
            .iter()
            .filter_map(|rule| rule["id"].as_str())
            .collect();
        assert_eq!(
            rule_ids,
            vec![
                "ConditionalForContractInvariant",
                "ContractForNotNull",
                "CreateContractClass",
                "CreateContractInvariantMethod",
                "NotNullForContract",
            ]
        );
        let results = value["runs"][0]["results"]
            .as_array()
            .expect("results array");
        let reported: Vec<_> = results
            .iter()
            .filter_map(|result| result["ruleId"].as_str())
            .collect();
        assert_eq!(reported, vec!["ContractForNotNull", "NotNullForContract"]);
        assert_eq!(
            results[1]["locations"][0]["logicalLocations"][0]["name"],
            "varOne"
        );
        assert_eq!(
            value["runs"][0]["artifacts"]
                .as_array()
                .expect("artifacts array")
                .len(),
            1
        );
    }

    #[test]
    fn write_fixed_restores_byte_order_mark() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let path = temp_dir.path().join("A.cs");
        let outcomes = [
            FixOutcome {
                path: path.clone(),
                bom: true,
                text: "class A { }".to_string(),
                applied: 1,
            },
            FixOutcome {
                path: temp_dir.path().join("Untouched.cs"),
                bom: false,
                text: "class B { }".to_string(),
                applied: 0,
            },
        ];

        assert_eq!(write_fixed(&outcomes).expect("write"), 1);
        let bytes = fs::read(&path).expect("read fixed file");
        assert_eq!(bytes, "\u{feff}class A { }".as_bytes());
        assert!(!temp_dir.path().join("Untouched.cs").exists());
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::engine::{CancellationToken, Engine, EngineOutput};
use crate::scan::scan_inputs;

/// Source file definition written into the harness workspace.
pub(crate) struct SourceFile {
    pub(crate) path: String,
    pub(crate) contents: String,
}

impl SourceFile {
    pub(crate) fn new(path: &str, contents: &str) -> Self {
        Self {
            path: path.to_string(),
            contents: contents.to_string(),
        }
    }
}

/// Temporary directory holding the written sources.
pub(crate) struct SourceTree {
    #[allow(dead_code)]
    temp_dir: TempDir,
    root: PathBuf,
}

impl SourceTree {
    pub(crate) fn root(&self) -> &Path {
        &self.root
    }
}

/// Reported finding reduced to what rule tests compare.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Finding {
    pub(crate) line: i64,
    pub(crate) column: i64,
    pub(crate) name: String,
    pub(crate) message: String,
}

/// Test harness that writes C# sources to disk and runs them through the engine.
pub(crate) struct CSharpTestHarness {
    rules: Vec<String>,
}

impl CSharpTestHarness {
    pub(crate) fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Harness restricted to the given rule ids.
    pub(crate) fn with_rules(ids: &[&str]) -> Self {
        Self {
            rules: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    pub(crate) fn write(&self, sources: &[SourceFile]) -> Result<SourceTree> {
        let temp_dir = tempfile::tempdir().context("create temp dir")?;
        let root = temp_dir.path().join("src");
        fs::create_dir_all(&root).context("create src dir")?;
        for source in sources {
            let path = root.join(&source.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("create source parent dir")?;
            }
            fs::write(&path, source.contents.as_bytes()).context("write source file")?;
        }
        Ok(SourceTree { temp_dir, root })
    }

    pub(crate) fn analyze(&self, root: &Path) -> Result<EngineOutput> {
        let scan = scan_inputs(root, None).context("scan sources")?;
        let engine = Engine::with_rules(&self.rules)?;
        engine
            .analyze(&scan.documents, None, &CancellationToken::default())
            .context("run analysis")
    }

    pub(crate) fn write_and_analyze(&self, sources: &[SourceFile]) -> Result<EngineOutput> {
        let tree = self.write(sources)?;
        self.analyze(tree.root())
    }

    /// Apply every available fix to a single source and return the fixed text.
    pub(crate) fn fix(&self, contents: &str) -> Result<String> {
        let tree = self.write(&[SourceFile::new("Sample.cs", contents)])?;
        let scan = scan_inputs(tree.root(), None).context("scan sources")?;
        let engine = Engine::with_rules(&self.rules)?;
        let document = scan.documents.first().context("scanned document")?;
        let outcome = engine.fix_document(document, None, &CancellationToken::default())?;
        Ok(outcome.text)
    }
}

/// Findings of one rule, in reporting order.
pub(crate) fn findings(output: &EngineOutput, rule_id: &str) -> Vec<Finding> {
    output
        .results
        .iter()
        .filter(|result| result.rule_id.as_deref() == Some(rule_id))
        .map(|result| {
            let location = result
                .locations
                .as_ref()
                .and_then(|locations| locations.first());
            let region = location
                .and_then(|location| location.physical_location.as_ref())
                .and_then(|physical| physical.region.as_ref());
            let name = location
                .and_then(|location| location.logical_locations.as_ref())
                .and_then(|logicals| logicals.first())
                .and_then(|logical| logical.name.clone())
                .unwrap_or_default();
            Finding {
                line: region.and_then(|region| region.start_line).unwrap_or(0),
                column: region.and_then(|region| region.start_column).unwrap_or(0),
                name,
                message: result.message.text.clone().unwrap_or_default(),
            }
        })
        .collect()
}

/// `(line, column)` of each finding of one rule.
pub(crate) fn positions(output: &EngineOutput, rule_id: &str) -> Vec<(i64, i64)> {
    findings(output, rule_id)
        .into_iter()
        .map(|finding| (finding.line, finding.column))
        .collect()
}

/// Analyze a single source with one rule enabled.
pub(crate) fn analyze_source(rule_id: &str, contents: &str) -> EngineOutput {
    CSharpTestHarness::with_rules(&[rule_id])
        .write_and_analyze(&[SourceFile::new("Sample.cs", contents)])
        .expect("run harness analysis")
}

/// Fix a single source with one rule enabled.
pub(crate) fn fix_source(rule_id: &str, contents: &str) -> String {
    CSharpTestHarness::with_rules(&[rule_id])
        .fix(contents)
        .expect("run harness fix")
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use tracing::debug;

use crate::telemetry::{Telemetry, with_span};

/// C# source file read from disk.
#[derive(Clone, Debug)]
pub(crate) struct SourceDocument {
    pub(crate) path: PathBuf,
    pub(crate) uri: String,
    pub(crate) text: String,
    /// The file started with a UTF-8 byte order mark, which `text` omits.
    pub(crate) bom: bool,
}

/// Snapshot of scanned documents and their SARIF artifacts.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) documents: Vec<SourceDocument>,
}

/// Collect `.cs` files under `input`, in sorted path order.
pub(crate) fn scan_inputs(input: &Path, telemetry: Option<&Telemetry>) -> Result<ScanOutput> {
    let mut output = ScanOutput {
        artifacts: Vec::new(),
        documents: Vec::new(),
    };
    with_span(
        telemetry,
        "scan",
        &[KeyValue::new(
            "contracts_interop.input",
            input.to_string_lossy().to_string(),
        )],
        || scan_path(input, true, &mut output),
    )?;
    Ok(output)
}

fn scan_path(path: &Path, strict: bool, output: &mut ScanOutput) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, output);
    }
    if !is_source_path(path) {
        if strict {
            anyhow::bail!("unsupported input file: {}", path.display());
        }
        return Ok(());
    }
    scan_source_file(path, output)
}

fn scan_dir(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        scan_path(&entry, false, output)?;
    }
    Ok(())
}

fn scan_source_file(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let len = data.len() as u64;
    let text = String::from_utf8(data)
        .with_context(|| format!("{} is not valid UTF-8", path.display()))?;
    let (text, bom) = match text.strip_prefix('\u{feff}') {
        Some(stripped) => (stripped.to_string(), true),
        None => (text, false),
    };
    let uri = path_to_uri(path);
    let roles = vec![serde_json::to_value(ArtifactRoles::AnalysisTarget)
        .context("serialize artifact role")?];
    push_artifact(uri.clone(), len, roles, &mut output.artifacts);
    debug!(uri = %uri, "scanned source file");
    output.documents.push(SourceDocument {
        path: path.to_path_buf(),
        uri,
        text,
        bom,
    });
    Ok(())
}

fn push_artifact(uri: String, len: u64, roles: Vec<Value>, artifacts: &mut Vec<Artifact>) {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = Artifact::builder()
        .location(location)
        .length(len as i64)
        .roles(roles)
        .build();
    artifacts.push(artifact);
}

fn is_source_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("cs"))
}

fn path_to_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("file://{}", absolute.to_string_lossy())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_inputs_walks_directories_in_sorted_order() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let nested = temp_dir.path().join("Nested");
        fs::create_dir_all(&nested).expect("create nested dir");
        fs::write(temp_dir.path().join("B.cs"), "class B { }").expect("write B.cs");
        fs::write(temp_dir.path().join("A.cs"), "class A { }").expect("write A.cs");
        fs::write(nested.join("C.cs"), "class C { }").expect("write C.cs");
        fs::write(temp_dir.path().join("notes.txt"), "ignored").expect("write notes");

        let output = scan_inputs(temp_dir.path(), None).expect("scan");

        let names: Vec<_> = output
            .documents
            .iter()
            .filter_map(|document| document.path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["A.cs", "B.cs", "C.cs"]);
        assert_eq!(output.artifacts.len(), 3);
        let first_uri = output
            .artifacts
            .first()
            .and_then(|artifact| artifact.location.as_ref())
            .and_then(|location| location.uri.as_ref())
            .expect("artifact uri");
        assert!(first_uri.starts_with("file://"));
        assert!(first_uri.ends_with("A.cs"));
    }

    #[test]
    fn scan_inputs_rejects_non_source_file() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let path = temp_dir.path().join("Program.vb");
        fs::write(&path, "Module Program\nEnd Module").expect("write file");

        assert!(scan_inputs(&path, None).is_err());
    }

    #[test]
    fn scan_inputs_strips_byte_order_mark() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let path = temp_dir.path().join("A.cs");
        fs::write(&path, "\u{feff}class A { }").expect("write file");

        let output = scan_inputs(&path, None).expect("scan");
        assert_eq!(output.documents[0].text, "class A { }");
        assert!(output.documents[0].bom);
    }
}

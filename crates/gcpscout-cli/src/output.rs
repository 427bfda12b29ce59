use anyhow::{Context, Result};
use gcpscout_core::pipeline::{Args, Message};
use gcpscout_core::OutputKind;
use serde_json::Value;
use std::io::Write;
use std::path::Path;

/// Scope id used in output file names: the org, folder or project given, filesystem-safe.
pub fn scope_id(args: &Args) -> String {
    let raw = ["org", "folder", "project"]
        .iter()
        .find_map(|name| args.str(name).filter(|v| !v.is_empty()))
        .unwrap_or("all");
    let id = raw.rsplit('/').next().unwrap_or(raw);
    id.chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c,
            '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

pub fn output_file_name(module_id: &str, scope: &str, unix_ts: i64) -> String {
    format!("{}-{}-{}.json", module_id, scope, unix_ts)
}

/// Records and errors emitted by a runtime module. Seeds and text passthrough are left out.
pub fn runtime_records(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| !matches!(m, Message::Text(_))).collect()
}

pub fn findings(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| matches!(m, Message::Finding(_))).collect()
}

pub fn stdout_payload(kind: OutputKind, messages: &[Message]) -> Value {
    let selected = match kind {
        OutputKind::Runtime => runtime_records(messages),
        OutputKind::SecurityFindings => findings(messages),
    };
    serde_json::to_value(selected).unwrap_or(Value::Null)
}

fn write_json(path: &Path, messages: &[&Message]) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory '{}'", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(messages)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write output file '{}'", path.display()))?;
    Ok(messages.len())
}

pub fn write_runtime_json(path: &Path, messages: &[Message]) -> Result<usize> {
    write_json(path, &runtime_records(messages))
}

pub fn write_findings_json(path: &Path, messages: &[Message]) -> Result<usize> {
    write_json(path, &findings(messages))
}

/// One scanner input per line, for an external secret scanner.
pub fn write_np_inputs(path: &Path, messages: &[Message]) -> Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create export file '{}'", path.display()))?;
    let mut out = std::io::BufWriter::new(file);
    let mut count = 0;
    for msg in messages {
        if let Message::NpInput(input) = msg {
            serde_json::to_writer(&mut out, input)?;
            out.write_all(b"\n")?;
            count += 1;
        }
    }
    out.flush().with_context(|| format!("Failed to write export file '{}'", path.display()))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcpscout_core::record::{NpInput, Properties, Provenance};
    use gcpscout_core::{Resource, ResourceType};

    fn bucket() -> Message {
        let record = Resource::new("b1", "alpha", ResourceType::Bucket, Properties::new());
        Message::Resource(record.unwrap())
    }

    #[test]
    fn test_scope_id_prefers_org_and_strips_prefix() {
        let args = Args::new().with("org", "organizations/1234").with("project", "alpha");
        assert_eq!(scope_id(&args), "1234");
        assert_eq!(scope_id(&Args::new().with("project", "my proj")), "my_proj");
        assert_eq!(scope_id(&Args::new()), "all");
    }

    #[test]
    fn test_file_name_template() {
        assert_eq!(
            output_file_name("list-resources", "alpha", 1700000000),
            "list-resources-alpha-1700000000.json"
        );
    }

    #[test]
    fn test_runtime_output_drops_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("run.json");
        let messages = vec![Message::Text(String::new()), bucket()];
        assert_eq!(write_runtime_json(&path, &messages).unwrap(), 1);
        let content = std::fs::read_to_string(&path).unwrap();
        let written: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(written[0]["kind"], "resource");
        assert_eq!(written[0]["data"]["name"], "b1");
    }

    #[test]
    fn test_findings_output_only_has_findings() {
        let payload = stdout_payload(OutputKind::SecurityFindings, &[bucket()]);
        assert_eq!(payload, serde_json::json!([]));
    }

    #[test]
    fn test_np_export_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.jsonl");
        let provenance = Provenance::cloud("storage.googleapis.com/Object", "b1/k");
        let input = NpInput::text("KEY=1", provenance);
        let messages = vec![bucket(), Message::NpInput(input.clone()), Message::NpInput(input)];
        assert_eq!(write_np_inputs(&path, &messages).unwrap(), 2);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().all(|l| serde_json::from_str::<Value>(l).is_ok()));
    }
}

use colored::*;
use gcpscout_core::finding::Evidence;
use gcpscout_core::pipeline::{ArgValue, Message, ParamKind};
use gcpscout_core::rules::org_policy::ConstraintViolation;
use gcpscout_core::{Finding, Module, OutputKind, Registry, ResourceError, SecretMatch, Severity};
use std::collections::BTreeMap;
use std::path::Path;

pub fn print_modules(registry: &Registry) {
    println!();
    println!("{}", format!(" gcpscout modules ({})", registry.len()).bold());
    println!();

    let mut category = "";
    for module in registry.modules() {
        if module.key.category != category {
            category = module.key.category;
            println!(" {}", category.to_uppercase().cyan().bold());
        }
        let output = match module.output {
            OutputKind::Runtime => "",
            OutputKind::SecurityFindings => " [findings]",
        };
        println!("   {:<28} {}{}", module.key.id.bold(), module.name, output.dimmed());
        println!("   {:<28} {}", "", module.description.dimmed());
    }
    println!();
}

pub fn print_module_params(module: &Module) {
    println!();
    println!(" {} {}", module.key.to_string().bold(), format!("({})", module.name).dimmed());
    println!("   {} {}", "|".dimmed(), module.description);
    println!("   {} Opsec: {:?}", "|".dimmed(), module.opsec);
    for reference in module.references {
        println!("   {} {}", "|".dimmed(), reference.cyan());
    }
    println!();
    println!(" {}", "Parameters".bold());
    for param in module.params() {
        let kind = match param.kind {
            ParamKind::String => "string",
            ParamKind::Bool => "bool",
            ParamKind::Int => "int",
            ParamKind::StringList => "list",
        };
        let default = param.default.as_ref().map(format_arg).unwrap_or_default();
        let required = if param.required { " (required)".red().to_string() } else { String::new() };
        let default = if default.is_empty() {
            String::new()
        } else {
            format!(" [default: {}]", default).dimmed().to_string()
        };
        println!(
            "   --{:<34} {:<7} {}{}{}",
            param.name,
            kind.dimmed(),
            param.description,
            default,
            required
        );
    }
    println!();
}

fn format_arg(value: &ArgValue) -> String {
    match value {
        ArgValue::Bool(b) => b.to_string(),
        ArgValue::Int(i) => i.to_string(),
        ArgValue::Str(s) => s.clone(),
        ArgValue::List(l) => l.join(","),
    }
}

/// Console report for a finished module run.
pub fn print_run_report(module: &Module, messages: &[Message], written: Option<(&Path, usize)>) {
    println!();
    println!("{}", format!(" gcpscout {} ", module.key).bold());
    println!();

    let findings: Vec<&Finding> = messages
        .iter()
        .filter_map(|m| match m {
            Message::Finding(f) => Some(f),
            _ => None,
        })
        .collect();
    let errors: Vec<&ResourceError> = messages
        .iter()
        .filter_map(|m| match m {
            Message::ResourceError(e) => Some(e),
            _ => None,
        })
        .collect();
    let matches: Vec<&SecretMatch> = messages
        .iter()
        .filter_map(|m| match m {
            Message::SecretMatch(s) => Some(s),
            _ => None,
        })
        .collect();

    match module.output {
        OutputKind::SecurityFindings => print_security_report(&findings),
        OutputKind::Runtime => {
            let table = format_resource_table(messages);
            if !table.is_empty() {
                println!("{}", table);
            }
            if !matches.is_empty() || module.key.category == "secrets" {
                print_secret_matches(&matches);
            }
        }
    }

    if !errors.is_empty() {
        print_resource_errors(&errors);
    }

    if let Some((path, count)) = written {
        let path = path.display().to_string();
        println!(" {} {} record(s) written to {}", "->".green(), count, path.cyan());
        println!();
    }
}

/// Markdown table of emitted resources per type and account.
pub fn format_resource_table(messages: &[Message]) -> String {
    let mut counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for resource in messages.iter().filter_map(Message::as_resource) {
        let key = (resource.resource_type.as_str(), resource.account_ref.as_str());
        *counts.entry(key).or_default() += 1;
    }
    if counts.is_empty() {
        return String::new();
    }

    let mut md = String::new();
    md.push_str("| Resource Type | Account | Count |\n");
    md.push_str("|---------------|---------|-------|\n");
    for ((resource_type, account), count) in &counts {
        md.push_str(&format!("| {} | {} | {} |\n", resource_type, account, count));
    }
    md.push_str(&format!("| **Total** | | **{}** |\n", counts.values().sum::<usize>()));
    md
}

/// Markdown table of organization policy violations.
pub fn format_constraint_table(violations: &[ConstraintViolation]) -> String {
    let mut md = String::new();
    md.push_str("| Severity | Resource | Constraint | Expected | Actual |\n");
    md.push_str("|----------|----------|------------|----------|--------|\n");
    for v in violations {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            v.severity.symbol(),
            v.resource_name,
            v.constraint_id,
            v.expected_config,
            v.actual_config
        ));
    }
    md
}

fn severity_tag(severity: Severity) -> String {
    let tag = format!(" {} ", severity.symbol());
    match severity {
        Severity::Critical => tag.on_red().white().bold().to_string(),
        Severity::High => tag.on_yellow().black().bold().to_string(),
        Severity::Medium => tag.on_blue().white().bold().to_string(),
        Severity::Low | Severity::Informational => tag.dimmed().to_string(),
    }
}

fn print_finding(finding: &Finding) {
    println!(" {} {}", severity_tag(finding.severity), finding.title.bold());
    println!("   {} {}", "|".dimmed(), finding.description);

    if finding.risk_level != finding.severity {
        println!("   {} Risk level: {}", "|".dimmed(), finding.risk_level.symbol());
    }
    if let Some(principal) = &finding.principal {
        println!("   {} Principal: {}", "|".dimmed(), principal.cyan());
    }
    if let Some(resource) = &finding.resource {
        println!("   {} Resource: {}", "|".dimmed(), resource.cyan());
    }

    match &finding.evidence {
        Evidence::OrgPolicyConstraints { violations, summary } => {
            println!(
                "   {} {} violation(s) across {} resource(s)",
                "|".dimmed(),
                summary.total_violations,
                summary.resources_affected
            );
            println!();
            for line in format_constraint_table(violations).lines() {
                println!("     {}", line);
            }
        }
        Evidence::SubdomainTakeover(e) => {
            println!(
                "   {} {} {} -> {} ({})",
                "|".dimmed(),
                e.record_type,
                e.domain,
                e.record_value,
                e.service
            );
        }
        other => {
            println!("   {} {} violation(s)", "|".dimmed(), other.violation_count());
        }
    }

    if let Some(remediation) = &finding.remediation {
        println!("   {} {}", "|".dimmed(), remediation.dimmed());
    }
}

pub fn print_security_report(findings: &[&Finding]) {
    if findings.is_empty() {
        println!(" {} No security issues detected!", "OK".green().bold());
        println!();
        return;
    }

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    let mut ordered = findings.to_vec();
    ordered.sort_by_key(|f| std::cmp::Reverse(f.severity.priority()));
    for finding in ordered {
        print_finding(finding);
        println!();
    }

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    let critical = findings.iter().filter(|f| f.severity == Severity::Critical).count();
    let high = findings.iter().filter(|f| f.severity == Severity::High).count();
    println!(
        " {} security findings: {} critical, {} high, {} other",
        findings.len(),
        if critical > 0 { critical.to_string().red().bold().to_string() } else { "0".to_string() },
        if high > 0 { high.to_string().yellow().bold().to_string() } else { "0".to_string() },
        findings.len() - critical - high,
    );
    println!();
}

pub fn print_secret_matches(matches: &[&SecretMatch]) {
    if matches.is_empty() {
        println!(" {} No secrets found.", "OK".green().bold());
        println!();
        return;
    }

    for m in matches {
        println!(" {} {}", severity_tag(m.severity), m.description.bold());
        println!(
            "   {} {} {}",
            "|".dimmed(),
            m.provenance.resource_type,
            m.provenance.resource_id.cyan()
        );
        if !m.provenance.account_id.is_empty() {
            println!("   {} Project: {}", "|".dimmed(), m.provenance.account_id);
        }
        println!("   {} Line {}: {}", "|".dimmed(), m.line, m.snippet.yellow());
        println!();
    }
    println!(" {} secret match(es)", matches.len().to_string().bold());
    println!();
}

pub fn print_resource_errors(errors: &[&ResourceError]) {
    println!(" {} {} resource error(s)", "!".yellow().bold(), errors.len());
    for e in errors {
        let code = e.error_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "   {} {} {} [{}] {}",
            "|".dimmed(),
            e.project,
            e.resource_type,
            code,
            e.error_message.dimmed()
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcpscout_core::record::Properties;
    use gcpscout_core::{Resource, ResourceType};

    fn resource(name: &str, project: &str, kind: ResourceType) -> Message {
        Message::Resource(Resource::new(name, project, kind, Properties::new()).unwrap())
    }

    #[test]
    fn test_resource_table_counts_per_type_and_account() {
        let messages = vec![
            Message::Text(String::new()),
            resource("b1", "alpha", ResourceType::Bucket),
            resource("b2", "alpha", ResourceType::Bucket),
            resource("vm-1", "beta", ResourceType::ComputeInstance),
        ];
        let table = format_resource_table(&messages);
        assert!(table.contains(&format!("| {} | alpha | 2 |", ResourceType::Bucket.as_str())));
        let instances = format!("| {} | beta | 1 |", ResourceType::ComputeInstance.as_str());
        assert!(table.contains(&instances));
        assert!(table.contains("| **Total** | | **3** |"));
    }

    #[test]
    fn test_resource_table_empty_without_resources() {
        assert!(format_resource_table(&[Message::Text("x".into())]).is_empty());
    }

    #[test]
    fn test_constraint_table_rows() {
        let violation = ConstraintViolation {
            resource_type: ResourceType::SqlInstance,
            resource_name: "projects/alpha".into(),
            constraint_id: "sql.restrictPublicIp".into(),
            expected_config: "enforced".into(),
            actual_config: "not enforced".into(),
            severity: Severity::Critical,
            description: String::new(),
            rationale: String::new(),
        };
        let table = format_constraint_table(&[violation]);
        assert_eq!(table.lines().count(), 3);
        assert!(table.contains(
            "| CRITICAL | projects/alpha | sql.restrictPublicIp | enforced | not enforced |"
        ));
    }
}

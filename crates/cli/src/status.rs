//! `scorebook status`: query a node's consensus status over its
//! secret-gated internal route.

use std::process;
use std::time::Duration;

use scorebook_cluster::{cluster_secret_from_env, CLUSTER_SECRET_ENV, CLUSTER_SECRET_HEADER};

use crate::{print_json, report_error, OutputFormat};

pub(crate) fn node_url(node: &str, path: &str) -> String {
    let base = node.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}{path}")
    } else {
        format!("http://{base}{path}")
    }
}

pub(crate) fn cmd_status(node: &str, output: OutputFormat, quiet: bool) {
    let Some(secret) = cluster_secret_from_env() else {
        report_error(
            &format!("error: {} is not set", CLUSTER_SECRET_ENV),
            output,
            quiet,
        );
        process::exit(1);
    };

    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(10)))
        .build();
    let agent: ureq::Agent = config.into();
    let url = node_url(node, "/cluster/status");

    let response = match agent.get(&url).header(CLUSTER_SECRET_HEADER, &secret).call() {
        Ok(r) => r,
        Err(e) => {
            report_error(
                &format!("error: cannot reach {}: {}", node, e),
                output,
                quiet,
            );
            process::exit(1);
        }
    };
    let status = response.status().as_u16();
    let body: serde_json::Value = match response.into_body().read_json() {
        Ok(v) => v,
        Err(e) => {
            report_error(
                &format!("error: unreadable response from {}: {}", node, e),
                output,
                quiet,
            );
            process::exit(1);
        }
    };
    if status != 200 {
        let msg = body
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("request failed");
        report_error(&format!("error: {} ({}): {}", node, status, msg), output, quiet);
        process::exit(1);
    }

    match output {
        OutputFormat::Json => print_json(&body),
        OutputFormat::Text => {
            let field = |name: &str| {
                body.get(name)
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Null => "-".to_string(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "-".to_string())
            };
            println!("node:      {}", field("nodeId"));
            println!("state:     {}", field("state"));
            println!("term:      {}", field("term"));
            println!("leader:    {} ({})", field("leaderId"), field("leaderAddr"));
            println!(
                "log:       commit {} / applied {} / last {} / snapshot {}",
                field("commitIndex"),
                field("appliedIndex"),
                field("lastLogIndex"),
                field("snapshotIndex")
            );
            println!("voters:    {}", field("voters"));
            println!("learners:  {}", field("learners"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_address_gets_http_scheme() {
        assert_eq!(
            node_url("10.0.0.1:7401", "/cluster/status"),
            "http://10.0.0.1:7401/cluster/status"
        );
        assert_eq!(
            node_url("https://n1.example/", "/health"),
            "https://n1.example/health"
        );
    }
}

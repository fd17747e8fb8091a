// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "k8sinv")]
#[command(author, version, about = "Inventory Kubernetes workloads and their container images")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Kubernetes context to use (kubeconfig default when omitted)
    #[arg(short, long, value_name = "CONTEXT", global = true)]
    pub context: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Omit column headers in table output
    #[arg(long, global = true)]
    pub no_headers: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Namespace selection shared by the listing commands
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Namespace to scan (current namespace by default)
    #[arg(short, long, conflicts_with = "all_namespaces")]
    pub namespace: Option<String>,

    /// Scan every namespace, including cluster-scoped kinds
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List cluster objects as artifacts
    K8s {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Drop objects owned by another listed object (config default when omitted)
        #[arg(long, value_name = "BOOL")]
        exclude_owned: Option<bool>,

        /// Also collect host-level node information
        #[arg(long)]
        node_info: bool,

        /// Comma-separated kinds (e.g. "deploy,cm") or a single KIND/NAME
        #[arg(value_name = "RESOURCES")]
        resources: Option<String>,
    },

    /// Collect host-level information from every node
    Nodes {
        #[command(flatten)]
        probe: ProbeArgs,
    },

    /// Print the image bill of materials
    Bom {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

/// Probe workload overrides
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ProbeArgs {
    /// Namespace for probe pods
    #[arg(long, value_name = "NS")]
    pub namespace: Option<String>,

    /// Name prefix for probe pods
    #[arg(long, default_value = "k8sinv-node")]
    pub prefix: String,

    /// Extra label for probe pods (repeatable)
    #[arg(short = 'l', long = "label", value_name = "KEY=VALUE", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

/// What the positional argument of `k8s` asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every listable kind
    All,
    /// Comma-separated kind names
    Kinds(String),
    /// One object
    Single { kind: String, name: String },
}

impl Selector {
    pub fn parse(input: Option<&str>) -> Result<Self, String> {
        let Some(input) = input.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Selector::All);
        };

        match input.split_once('/') {
            Some((kind, name)) => {
                let (kind, name) = (kind.trim(), name.trim());
                if kind.is_empty() || name.is_empty() || kind.contains(',') || name.contains('/') {
                    return Err(format!("invalid selector '{}', expected KIND/NAME", input));
                }
                Ok(Selector::Single {
                    kind: kind.to_string(),
                    name: name.to_string(),
                })
            }
            None => Ok(Selector::Kinds(input.to_string())),
        }
    }
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid label '{}', expected KEY=VALUE", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid label '{}', empty key", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_empty_is_all() {
        assert_eq!(Selector::parse(None), Ok(Selector::All));
        assert_eq!(Selector::parse(Some("  ")), Ok(Selector::All));
    }

    #[test]
    fn test_selector_kinds() {
        assert_eq!(
            Selector::parse(Some("cm,pods")),
            Ok(Selector::Kinds("cm,pods".to_string()))
        );
    }

    #[test]
    fn test_selector_single() {
        assert_eq!(
            Selector::parse(Some("deploy/orion")),
            Ok(Selector::Single {
                kind: "deploy".to_string(),
                name: "orion".to_string()
            })
        );
    }

    #[test]
    fn test_selector_invalid() {
        assert!(Selector::parse(Some("deploy/")).is_err());
        assert!(Selector::parse(Some("/orion")).is_err());
        assert!(Selector::parse(Some("cm,deploy/orion")).is_err());
        assert!(Selector::parse(Some("deploy/a/b")).is_err());
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(
            parse_label("chen=test"),
            Ok(("chen".to_string(), "test".to_string()))
        );
        assert_eq!(parse_label("flag="), Ok(("flag".to_string(), String::new())));
        assert!(parse_label("novalue").is_err());
        assert!(parse_label("=x").is_err());
    }

    #[test]
    fn test_args_k8s_command() {
        let args = Args::parse_from([
            "k8sinv",
            "-o",
            "json",
            "k8s",
            "-n",
            "default",
            "--exclude-owned=false",
            "cm,pods",
        ]);
        assert!(matches!(args.output, OutputFormat::Json));
        let Command::K8s {
            scope,
            exclude_owned,
            node_info,
            resources,
        } = args.command
        else {
            panic!("expected k8s command");
        };
        assert_eq!(scope.namespace.as_deref(), Some("default"));
        assert_eq!(exclude_owned, Some(false));
        assert!(!node_info);
        assert_eq!(resources.as_deref(), Some("cm,pods"));
    }

    #[test]
    fn test_args_nodes_labels() {
        let args = Args::parse_from([
            "k8sinv",
            "nodes",
            "--namespace",
            "scan-temp",
            "-l",
            "chen=test",
            "-l",
            "team=sec",
        ]);
        let Command::Nodes { probe } = args.command else {
            panic!("expected nodes command");
        };
        assert_eq!(probe.namespace.as_deref(), Some("scan-temp"));
        assert_eq!(probe.prefix, "k8sinv-node");
        assert_eq!(probe.labels.len(), 2);
    }

    #[test]
    fn test_args_namespace_conflicts_with_all() {
        assert!(Args::try_parse_from(["k8sinv", "bom", "-n", "x", "-A"]).is_err());
    }
}

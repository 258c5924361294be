//! CLI subcommands.
//!
//! Each command returns the text to print so it can be tested without a
//! terminal.

use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use polyver_core::{LoadedLibrary, Metadata, VersionInfo, VersionManager, VersionSpec};
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List registered versions
    List {
        component: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Register a version installed at PATH
    Register {
        component: String,
        name: String,
        path: PathBuf,
        /// Metadata entry, repeatable (value parsed as JSON when possible)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },
    /// Register the default-resolvable installation as `main`
    RegisterPrimary { component: String },
    /// Remove a version
    Unregister { component: String, name: String },
    /// Make a version the active one
    Use { component: String, name: String },
    /// Load a version (the resolved one by default) and report what was opened
    Probe {
        component: String,
        name: Option<String>,
    },
}

impl Command {
    pub fn component(&self) -> &str {
        match self {
            Command::List { component, .. }
            | Command::Register { component, .. }
            | Command::RegisterPrimary { component }
            | Command::Unregister { component, .. }
            | Command::Use { component, .. }
            | Command::Probe { component, .. } => component,
        }
    }

    pub fn run(&self, manager: &VersionManager) -> Result<String> {
        match self {
            Command::List { json, .. } => list(manager, *json),
            Command::Register {
                name, path, meta, ..
            } => {
                let spec = VersionSpec::new(name.as_str(), path.as_path())?
                    .with_metadata(parse_metadata(meta)?);
                let spec = manager.register_spec(spec)?;
                Ok(format!("Registered {} at {}", spec.name(), spec.location()))
            }
            Command::RegisterPrimary { .. } => {
                let spec = manager.register_primary()?;
                Ok(format!("Registered {} as the primary installation", spec.name()))
            }
            Command::Unregister { name, .. } => {
                manager.unregister_version(name)?;
                Ok(format!("Unregistered {}", name))
            }
            Command::Use { name, .. } => {
                let previous = manager.select_version(name)?;
                Ok(match previous {
                    Some(previous) if previous != *name => {
                        format!("Active version: {} (was {})", name, previous)
                    }
                    _ => format!("Active version: {}", name),
                })
            }
            Command::Probe { name, .. } => probe(manager, name.as_deref()),
        }
    }
}

fn list(manager: &VersionManager, json: bool) -> Result<String> {
    let versions = manager.list_versions();
    if json {
        return serde_json::to_string_pretty(&versions).context("Failed to serialize versions");
    }
    if versions.is_empty() {
        return Ok(format!("No versions registered for {}", manager.component()));
    }
    Ok(format_table(&versions))
}

fn format_table(versions: &[VersionInfo]) -> String {
    let width = versions.iter().map(|v| v.name.len()).max().unwrap_or(0);
    versions
        .iter()
        .map(|v| {
            let marker = if v.active { '*' } else { ' ' };
            format!("{} {:width$}  {}", marker, v.name, v.location, width = width)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn probe(manager: &VersionManager, name: Option<&str>) -> Result<String> {
    let binding = match name {
        Some(name) => manager.get_version(name)?,
        None => manager.current()?,
    };

    let mut lines = vec![
        format!("version:  {}", binding.version()),
        format!("identity: {}", binding.identity()),
    ];
    if let Some(library) = binding.downcast_ref::<LoadedLibrary>() {
        match library.source() {
            Some(source) => lines.push(format!("source:   {}", source.display())),
            None => lines.push("source:   <default lookup>".to_string()),
        }
        if let Some(staged) = library.staged_path() {
            lines.push(format!("staged:   {}", staged.display()));
        }
    }
    Ok(lines.join("\n"))
}

/// Parse `KEY=VALUE` pairs. Values that parse as JSON keep their type.
fn parse_metadata(entries: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("metadata entry '{}' is not KEY=VALUE", entry))?;
        if key.is_empty() {
            bail!("metadata entry '{}' has an empty key", entry);
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyver_core::{Binding, FnLoader, LoadRequest, ManagerConfig};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn manager(store: &std::path::Path) -> VersionManager {
        let loader = FnLoader::new(|req: &LoadRequest<'_>| {
            Ok(Binding::new(req.component, req.version(), req.alias(), ()))
        });
        VersionManager::with_config(
            "widgets",
            Arc::new(loader),
            ManagerConfig::in_memory().with_store_path(store),
        )
        .unwrap()
    }

    fn register(name: &str, path: &str, meta: &[&str]) -> Command {
        Command::Register {
            component: "widgets".into(),
            name: name.into(),
            path: path.into(),
            meta: meta.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_metadata() {
        let metadata =
            parse_metadata(&["channel=lts".to_string(), "abi=3".to_string()]).unwrap();
        assert_eq!(metadata["channel"], "lts");
        assert_eq!(metadata["abi"], 3);

        assert!(parse_metadata(&["novalue".to_string()]).is_err());
        assert!(parse_metadata(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_commands_persist_between_runs() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("widgets.json");

        let first = manager(&store);
        Command::RegisterPrimary {
            component: "widgets".into(),
        }
        .run(&first)
        .unwrap();
        register("legacy", "/opt/legacy", &["channel=lts"])
            .run(&first)
            .unwrap();
        let out = Command::Use {
            component: "widgets".into(),
            name: "legacy".into(),
        }
        .run(&first)
        .unwrap();
        assert_eq!(out, "Active version: legacy (was main)");

        let second = manager(&store);
        let table = Command::List {
            component: "widgets".into(),
            json: false,
        }
        .run(&second)
        .unwrap();
        assert_eq!(table, "  main    <primary>\n* legacy  /opt/legacy");
    }

    #[test]
    fn test_list_json() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir.path().join("widgets.json"));
        register("legacy", "/opt/legacy", &["abi=3"]).run(&manager).unwrap();

        let out = Command::List {
            component: "widgets".into(),
            json: true,
        }
        .run(&manager)
        .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["name"], "legacy");
        assert_eq!(parsed[0]["isPrimary"], false);
        assert_eq!(parsed[0]["metadata"]["abi"], 3);
    }

    #[test]
    fn test_unregister_active_fails() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir.path().join("widgets.json"));
        register("legacy", "/opt/legacy", &[]).run(&manager).unwrap();
        manager.select_version("legacy").unwrap();

        let result = Command::Unregister {
            component: "widgets".into(),
            name: "legacy".into(),
        }
        .run(&manager);
        assert!(result.is_err());
    }

    #[test]
    fn test_probe_reports_version() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir.path().join("widgets.json"));
        register("legacy", "/opt/legacy", &[]).run(&manager).unwrap();

        let out = Command::Probe {
            component: "widgets".into(),
            name: None,
        }
        .run(&manager)
        .unwrap();
        assert!(out.contains("version:  legacy"));
        assert!(out.contains("identity: widgets__legacy"));
    }
}

use std::sync::{Arc, LazyLock};
use crate::errors::WardenError;
use crate::process::ProcessExecutor;
use super::runner::{ToolCategory, ToolRunner};
use super::runners::*;
use tracing::warn;

pub struct ToolEntry {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub category: ToolCategory,
    pub description: &'static str,
    pub build: fn(Arc<ProcessExecutor>) -> Box<dyn ToolRunner>,
}

pub static TOOL_REGISTRY: LazyLock<Vec<ToolEntry>> = LazyLock::new(|| vec![
    ToolEntry {
        name: "nmap",
        aliases: &[],
        category: ToolCategory::NetworkScanning,
        description: "Port, service and OS discovery",
        build: |e| Box::new(NmapRunner::new(e)),
    },
    ToolEntry {
        name: "masscan",
        aliases: &[],
        category: ToolCategory::NetworkScanning,
        description: "High-rate TCP port sweep",
        build: |e| Box::new(MasscanRunner::new(e)),
    },
    ToolEntry {
        name: "nuclei",
        aliases: &[],
        category: ToolCategory::VulnerabilityScanning,
        description: "Template-based vulnerability scanner",
        build: |e| Box::new(NucleiRunner::new(e)),
    },
    ToolEntry {
        name: "nikto",
        aliases: &[],
        category: ToolCategory::WebScanning,
        description: "Web server misconfiguration scanner",
        build: |e| Box::new(NiktoRunner::new(e)),
    },
    ToolEntry {
        name: "whatweb",
        aliases: &[],
        category: ToolCategory::WebScanning,
        description: "Web technology fingerprinting",
        build: |e| Box::new(WhatwebRunner::new(e)),
    },
    ToolEntry {
        name: "feroxbuster",
        aliases: &["ferox"],
        category: ToolCategory::WebFuzzing,
        description: "Recursive content discovery",
        build: |e| Box::new(FeroxbusterRunner::new(e)),
    },
    ToolEntry {
        name: "subfinder",
        aliases: &[],
        category: ToolCategory::ReconOsint,
        description: "Passive subdomain enumeration",
        build: |e| Box::new(SubfinderRunner::new(e)),
    },
    ToolEntry {
        name: "sqlmap",
        aliases: &[],
        category: ToolCategory::SqlInjection,
        description: "SQL injection detection",
        build: |e| Box::new(SqlmapRunner::new(e)),
    },
    ToolEntry {
        name: "hydra",
        aliases: &[],
        category: ToolCategory::CredentialAttack,
        description: "Online credential brute forcing",
        build: |e| Box::new(HydraRunner::new(e)),
    },
    ToolEntry {
        name: "metasploit",
        aliases: &["msfconsole", "msf"],
        category: ToolCategory::Exploitation,
        description: "Exploit module execution",
        build: |e| Box::new(MetasploitRunner::new(e)),
    },
]);

fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace('_', "-")
}

pub fn find_entry(name: &str) -> Option<&'static ToolEntry> {
    let wanted = normalize(name);
    TOOL_REGISTRY
        .iter()
        .find(|e| e.name == wanted || e.aliases.contains(&wanted.as_str()))
}

/// Builds runners bound to one process executor.
#[derive(Clone)]
pub struct ToolRegistry {
    executor: Arc<ProcessExecutor>,
}

impl ToolRegistry {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<ProcessExecutor> {
        &self.executor
    }

    /// Case-insensitive lookup by name or alias.
    pub fn get(&self, name: &str) -> Result<Box<dyn ToolRunner>, WardenError> {
        match find_entry(name) {
            Some(entry) => Ok((entry.build)(self.executor.clone())),
            None => {
                warn!(tool = %name, "Unknown tool requested");
                Err(WardenError::ToolNotFound(name.to_string()))
            }
        }
    }

    /// Canonical name for `name`, resolving aliases.
    pub fn canonical_name(&self, name: &str) -> Option<&'static str> {
        find_entry(name).map(|e| e.name)
    }

    pub fn category_of(&self, name: &str) -> Option<ToolCategory> {
        find_entry(name).map(|e| e.category)
    }

    pub fn by_category(&self, category: ToolCategory) -> Vec<&'static str> {
        TOOL_REGISTRY.iter().filter(|e| e.category == category).map(|e| e.name).collect()
    }

    pub fn entries(&self) -> &'static [ToolEntry] {
        TOOL_REGISTRY.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandPolicy, LocalBackend};

    fn registry() -> ToolRegistry {
        ToolRegistry::new(Arc::new(ProcessExecutor::new(CommandPolicy::default(), Arc::new(LocalBackend::new()))))
    }

    #[test]
    fn test_case_insensitive_and_aliases() {
        let r = registry();
        assert_eq!(r.get("NMAP").unwrap().name(), "nmap");
        assert_eq!(r.get("msfconsole").unwrap().name(), "metasploit");
        assert_eq!(r.get("Ferox").unwrap().name(), "feroxbuster");
        assert_eq!(r.canonical_name("msf"), Some("metasploit"));
    }

    #[test]
    fn test_unknown_tool_is_not_found() {
        assert!(matches!(registry().get("nessus"), Err(WardenError::ToolNotFound(n)) if n == "nessus"));
    }

    #[test]
    fn test_categories() {
        let r = registry();
        assert_eq!(r.by_category(ToolCategory::Exploitation), vec!["metasploit"]);
        assert_eq!(r.category_of("hydra"), Some(ToolCategory::CredentialAttack));
        assert!(r.by_category(ToolCategory::Pivoting).is_empty());
    }

    #[test]
    fn test_runner_names_match_entries() {
        let r = registry();
        for entry in r.entries() {
            let runner = r.get(entry.name).unwrap();
            assert_eq!(runner.name(), entry.name);
            assert_eq!(runner.category(), entry.category);
        }
    }

    #[test]
    fn test_every_binary_is_allow_listed() {
        let policy = CommandPolicy::default();
        for binary in ["nmap", "masscan", "nuclei", "nikto", "whatweb", "feroxbuster", "subfinder", "sqlmap", "hydra", "msfconsole"] {
            assert!(policy.is_allowed(binary), "{} missing from allow-list", binary);
        }
    }
}

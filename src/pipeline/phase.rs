use std::collections::HashMap;
use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use crate::errors::WardenError;
use crate::models::ScanType;

/// One ordered stage of a methodology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub tools: Vec<String>,
    #[serde(default)]
    pub techniques: Vec<String>,
}

/// A methodology override file: the phases for one scan type.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodologyFile {
    pub scan_type: ScanType,
    pub phases: Vec<Phase>,
}

pub struct PhaseDefinition {
    pub name: &'static str,
    pub tools: &'static [&'static str],
    pub techniques: &'static [&'static str],
}

impl PhaseDefinition {
    fn to_phase(&self) -> Phase {
        Phase {
            name: self.name.to_string(),
            tools: self.tools.iter().map(|t| t.to_string()).collect(),
            techniques: self.techniques.iter().map(|t| t.to_string()).collect(),
        }
    }
}

pub static NETWORK_PHASES: &[PhaseDefinition] = &[
    PhaseDefinition {
        name: "Reconnaissance",
        tools: &["nmap", "masscan"],
        techniques: &["port scanning", "service enumeration", "os detection"],
    },
    PhaseDefinition {
        name: "Vulnerability Scanning",
        tools: &["nmap", "nuclei"],
        techniques: &["vulnerability scanning", "version detection"],
    },
    PhaseDefinition {
        name: "Exploitation",
        tools: &["metasploit"],
        techniques: &["exploitation"],
    },
];

pub static WEB_PHASES: &[PhaseDefinition] = &[
    PhaseDefinition {
        name: "Reconnaissance",
        tools: &["whatweb", "nikto"],
        techniques: &["web enumeration", "technology detection"],
    },
    PhaseDefinition {
        name: "Vulnerability Assessment",
        tools: &["nuclei", "sqlmap"],
        techniques: &["sql injection", "xss"],
    },
    PhaseDefinition {
        name: "Exploitation",
        tools: &["sqlmap", "metasploit"],
        techniques: &["exploitation"],
    },
];

pub static DIRECTORY_PHASES: &[PhaseDefinition] = &[
    PhaseDefinition {
        name: "Reconnaissance",
        tools: &["whatweb"],
        techniques: &["technology detection"],
    },
    PhaseDefinition {
        name: "Content Discovery",
        tools: &["feroxbuster"],
        techniques: &["directory brute forcing"],
    },
    PhaseDefinition {
        name: "Vulnerability Assessment",
        tools: &["nuclei"],
        techniques: &["vulnerability scanning"],
    },
];

pub static FULL_PHASES: &[PhaseDefinition] = &[
    PhaseDefinition {
        name: "Reconnaissance",
        tools: &["subfinder", "nmap", "whatweb"],
        techniques: &["subdomain enumeration", "port scanning", "technology detection"],
    },
    PhaseDefinition {
        name: "Vulnerability Scanning",
        tools: &["nuclei", "nikto"],
        techniques: &["vulnerability scanning"],
    },
    PhaseDefinition {
        name: "Credential Attacks",
        tools: &["hydra"],
        techniques: &["password attacks"],
    },
    PhaseDefinition {
        name: "Exploitation",
        tools: &["metasploit"],
        techniques: &["exploitation"],
    },
];

fn defaults_for(scan_type: ScanType) -> &'static [PhaseDefinition] {
    match scan_type {
        ScanType::Network => NETWORK_PHASES,
        ScanType::Web => WEB_PHASES,
        ScanType::Directory => DIRECTORY_PHASES,
        ScanType::Full => FULL_PHASES,
    }
}

/// Returns the ordered phases for a scan type: built-in defaults unless a
/// YAML override was loaded for that type.
#[derive(Debug, Default)]
pub struct MethodologyPlanner {
    overrides: HashMap<ScanType, Vec<Phase>>,
}

impl MethodologyPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.yaml` / `*.yml` file in `dir`. A later file for the
    /// same scan type replaces an earlier one.
    pub fn load(dir: &Path) -> Result<Self, WardenError> {
        let mut planner = Self::new();
        if !dir.exists() {
            return Err(WardenError::Config(format!(
                "Methodology directory not found: {}",
                dir.display()
            )));
        }

        let mut paths = Vec::new();
        for ext in ["yaml", "yml"] {
            let pattern = dir.join(format!("*.{}", ext));
            let pattern_str = pattern.to_string_lossy();
            let entries = glob::glob(&pattern_str)
                .map_err(|e| WardenError::Config(format!("Invalid glob pattern: {}", e)))?;
            paths.extend(entries.flatten());
        }
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let file: MethodologyFile = serde_yaml::from_str(&content).map_err(|e| {
                WardenError::Config(format!("Invalid methodology file {}: {}", path.display(), e))
            })?;
            if file.phases.is_empty() {
                return Err(WardenError::Config(format!(
                    "Methodology file {} defines no phases",
                    path.display()
                )));
            }
            debug!(path = %path.display(), scan_type = %file.scan_type, phases = file.phases.len(), "Loaded methodology");
            planner.overrides.insert(file.scan_type, file.phases);
        }

        info!(overrides = planner.overrides.len(), "Methodology planner ready");
        Ok(planner)
    }

    pub fn with_override(mut self, scan_type: ScanType, phases: Vec<Phase>) -> Self {
        self.overrides.insert(scan_type, phases);
        self
    }

    pub fn plan(&self, scan_type: ScanType) -> Vec<Phase> {
        match self.overrides.get(&scan_type) {
            Some(phases) => phases.clone(),
            None => defaults_for(scan_type).iter().map(PhaseDefinition::to_phase).collect(),
        }
    }
}

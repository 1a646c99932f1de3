//! Facts about the machine a job actually runs on.

use crate::fields::FieldMap;
use serde::{Deserialize, Serialize};

/// Read-only fact sheet supplied by the invoking environment at plan time.
///
/// `os` is the concrete runner OS and is independent of a job's declared
/// `os` field. Everything else (GPU availability, driver versions) lives in
/// `facts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFacts {
    pub os: String,
    #[serde(default)]
    pub facts: FieldMap,
}

impl HostFacts {
    pub fn new(os: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            facts: FieldMap::new(),
        }
    }

    /// Facts for the machine this process is running on.
    pub fn current() -> Self {
        Self::new(normalize_os(std::env::consts::OS))
    }

    pub fn with_fact(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Record a fact. An `os` fact replaces the runner OS.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if name == "os" {
            self.os = value;
        } else {
            self.facts.insert(name, value);
        }
    }

    /// Look up a fact. `os` always resolves.
    pub fn get(&self, name: &str) -> Option<&str> {
        if name == "os" {
            return Some(&self.os);
        }
        self.facts.get(name).map(String::as_str)
    }
}

/// Map Rust's target OS names onto the names runners usually advertise.
pub fn normalize_os(os: &str) -> &str {
    match os {
        "macos" | "darwin" | "osx" => "macos",
        "win" | "win32" | "windows" => "windows",
        other => other,
    }
}

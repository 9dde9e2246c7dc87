//! Carrier catalog configuration.
//!
//! Loaded from data/carriers.json when a data directory is given;
//! falls back to a compiled-in default catalog otherwise. In tests,
//! use DeskConfig::default_test().

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    pub id: String,
    pub label: String,
    /// Prepended verbatim to the digits-only phone number at dial time.
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CarrierCatalogFile {
    carriers: Vec<CarrierConfig>,
}

#[derive(Debug, Clone)]
pub struct DeskConfig {
    pub carriers: Vec<CarrierConfig>,
}

impl DeskConfig {
    /// Load from the data/ directory, falling back to the compiled-in
    /// catalog when the file is absent.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/carriers.json");
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Ok(Self::defaults()),
        };
        let file: CarrierCatalogFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        Ok(Self {
            carriers: file.carriers,
        })
    }

    pub fn defaults() -> Self {
        Self {
            carriers: vec![
                CarrierConfig {
                    id: "carrier_a".into(),
                    label: "Carrier A".into(),
                    prefix: "1801".into(),
                },
                CarrierConfig {
                    id: "carrier_b".into(),
                    label: "Carrier B".into(),
                    prefix: "1802".into(),
                },
                CarrierConfig {
                    id: "direct".into(),
                    label: "Direct".into(),
                    prefix: "".into(),
                },
            ],
        }
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self::defaults()
    }

    pub fn find_carrier(&self, carrier_id: &str) -> Option<&CarrierConfig> {
        self.carriers.iter().find(|c| c.id == carrier_id)
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{TargetDocument, TargetLoader};
use crate::error::CollectorError;

/// Reads target documents as JSON from a directory. `tomcat.xml` resolves to `<dir>/tomcat.json`.
#[derive(Debug, Clone)]
pub struct JsonTargetLoader {
    base_dir: PathBuf,
}

impl JsonTargetLoader {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        JsonTargetLoader {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, config_file: &str) -> PathBuf {
        self.base_dir.join(Path::new(config_file).with_extension("json"))
    }
}

impl TargetLoader for JsonTargetLoader {
    fn load(&self, config_file: &str) -> Result<TargetDocument, CollectorError> {
        let path = self.resolve(config_file);
        debug!("Loading target document {}", path.display());
        let content = std::fs::read_to_string(&path).map_err(|e| CollectorError::TargetLoad {
            name: config_file.to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;
        serde_json::from_str(&content).map_err(|e| CollectorError::TargetLoad {
            name: config_file.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Serves documents registered in memory, keyed by resolved name (`<name>.xml`).
#[derive(Debug, Clone, Default)]
pub struct StaticTargetLoader {
    documents: HashMap<String, TargetDocument>,
}

impl StaticTargetLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_document(mut self, config_file: impl Into<String>, document: TargetDocument) -> Self {
        self.documents.insert(config_file.into(), document);
        self
    }
}

impl TargetLoader for StaticTargetLoader {
    fn load(&self, config_file: &str) -> Result<TargetDocument, CollectorError> {
        self.documents
            .get(config_file)
            .cloned()
            .ok_or_else(|| CollectorError::TargetLoad {
                name: config_file.to_string(),
                reason: "no such document".to_string(),
            })
    }
}

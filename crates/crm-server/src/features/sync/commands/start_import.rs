use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::config::ImportConfig;
use crate::features::shared::validation::{
    validate_batch_size, validate_progress_every_ms, validate_total_rows,
};
use crate::import::jobs::ImportJob;
use crate::import::supervisor::{StartError, StartOptions};

/// Body of `POST /customers/sync`. Unknown fields are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StartImportCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_update_every_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<i64>,
}

impl Request<Result<ImportJob, StartError>> for StartImportCommand {}

impl StartImportCommand {
    /// Validate knob ranges and fill defaults from configuration.
    pub fn resolve(self, config: &ImportConfig) -> Result<StartOptions, String> {
        let batch_size = self.batch_size.unwrap_or(config.batch_size);
        validate_batch_size(batch_size).map_err(|e| e.to_string())?;

        let progress_every_ms = self
            .progress_update_every_ms
            .unwrap_or(config.progress_every_ms);
        validate_progress_every_ms(progress_every_ms).map_err(|e| e.to_string())?;

        let total_rows = self.total_rows.unwrap_or(config.total_rows);
        validate_total_rows(total_rows).map_err(|e| e.to_string())?;

        Ok(StartOptions {
            file_path: self
                .file_path
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            batch_size,
            progress_every_ms,
            total_rows,
        })
    }
}

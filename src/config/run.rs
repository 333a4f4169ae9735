//! Per-invocation parameters supplied by the command line layer

use super::{DiscoveryParameters, ExportSettings};
use std::path::PathBuf;

/// Typed run parameters; `None` keeps the persisted or default value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunParameters {
    pub collection: String,
    pub sample_size: Option<usize>,
    pub expansion_depth: Option<usize>,
    pub batch_size: Option<usize>,
    /// Stop after this many rows (test runs)
    pub row_limit: Option<u64>,
    pub output_path: Option<PathBuf>,
}

impl RunParameters {
    pub fn new(collection: impl Into<String>) -> Self {
        RunParameters {
            collection: collection.into(),
            ..Default::default()
        }
    }

    /// Discovery parameters with this run's overrides applied
    pub fn discovery_parameters(&self, mut base: DiscoveryParameters) -> DiscoveryParameters {
        if let Some(sample_size) = self.sample_size {
            base.sample_size = sample_size;
        }
        if let Some(depth) = self.expansion_depth {
            base.expansion_depth = depth;
        }
        base
    }

    /// Apply the batch size override onto persisted export settings
    pub fn apply_export_settings(&self, settings: &mut ExportSettings) {
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
    }

    /// Output path, defaulting to `<collection>_export.csv`
    pub fn output_path(&self) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}_export.csv", self.collection)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_only_when_set() {
        let mut run = RunParameters::new("listings");
        run.expansion_depth = Some(1);

        let params = run.discovery_parameters(DiscoveryParameters::default());
        assert_eq!(params.expansion_depth, 1);
        assert_eq!(params.sample_size, 10_000);

        let mut settings = ExportSettings::default();
        run.apply_export_settings(&mut settings);
        assert_eq!(settings.batch_size, 5_000);
        assert_eq!(run.output_path(), PathBuf::from("listings_export.csv"));
    }
}

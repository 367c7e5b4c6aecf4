//! Tuning knobs for one pipeline run, sourced from `AppConfig` at the call site.

use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub streaming_threshold_bytes: u64,
    pub max_section_size: usize,
    pub concurrency: usize,
    pub clean_before_ingest: bool,
    pub skip_graph_building: bool,
    pub graph_episode_delay_ms: u64,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            streaming_threshold_bytes: 5 * 1024 * 1024,
            max_section_size: 2000,
            concurrency: 4,
            clean_before_ingest: false,
            skip_graph_building: false,
            graph_episode_delay_ms: 500,
        }
    }
}

impl IngestionTuning {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            streaming_threshold_bytes: config.streaming_threshold_bytes,
            max_section_size: config.max_section_size,
            concurrency: config.ingest_concurrency,
            clean_before_ingest: false,
            skip_graph_building: false,
            graph_episode_delay_ms: 500,
        }
    }

    pub const fn with_clean_before_ingest(mut self, clean: bool) -> Self {
        self.clean_before_ingest = clean;
        self
    }

    pub const fn with_skip_graph_building(mut self, skip: bool) -> Self {
        self.skip_graph_building = skip;
        self
    }
}

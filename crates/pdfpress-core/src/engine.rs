//! Engine: configuration, rasterizer and worker pool in one place

use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::cancel::CancelToken;
use crate::compress::{decide, CompressionResult};
use crate::config::EngineConfig;
use crate::error::{ConfigError, RenderError};
use crate::page::{Page, Profile};
use crate::raster::{BuiltinRasterizer, Rasterizer};

pub struct Engine {
    config: EngineConfig,
    rasterizer: Arc<dyn Rasterizer>,
    pool: ThreadPool,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("workers", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine using the builtin rasterizer
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_rasterizer(config, Arc::new(BuiltinRasterizer))
    }

    pub fn with_rasterizer(
        config: EngineConfig,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        // Zero lets rayon pick the number of available cores
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.unwrap_or(0))
            .thread_name(|i| format!("pdfpress-worker-{}", i))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("worker pool: {}", e)))?;

        Ok(Self {
            config,
            rasterizer,
            pool,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rasterizer(&self) -> &dyn Rasterizer {
        self.rasterizer.as_ref()
    }

    pub fn decide(
        &self,
        page: &Page,
        profile: Profile,
        cancel: &CancelToken,
    ) -> Result<CompressionResult, RenderError> {
        decide(page, profile, &self.config, self.rasterizer.as_ref(), cancel)
    }

    /// Run `decide` for every job on the worker pool
    ///
    /// Results come back in job order. Jobs not yet started when the batch
    /// is cancelled report `Cancelled` without rendering.
    pub fn decide_all(
        &self,
        jobs: &[(&Page, Profile)],
        cancel: &CancelToken,
    ) -> Vec<Result<CompressionResult, RenderError>> {
        self.pool.install(|| {
            jobs.par_iter()
                .map(|(page, profile)| {
                    cancel.check()?;
                    self.decide(page, *profile, cancel)
                })
                .collect()
        })
    }
}

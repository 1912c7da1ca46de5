//! IIS worker process (w3wp) metrics per application pool.

mod engine;
mod state;

pub use engine::{CounterBatch, EngineSettings, W3wpEngine};
pub use state::{AppPoolMetric, AppPoolMetrics, ProcessIdentityMap};

use crate::config::{W3wpConfig, parse_interval};
use crate::emit::emit_app_pool;
use crate::input::Input;
use crate::management::PerformanceQueryClient;
use crate::metric::Accumulator;
use crate::utils::errors::MonitoringError;

pub struct W3wp<C: PerformanceQueryClient> {
    config: W3wpConfig,
    engine: W3wpEngine<C>,
}

impl<C: PerformanceQueryClient> W3wp<C> {
    pub fn new(config: W3wpConfig, client: C) -> Self {
        Self {
            config,
            engine: W3wpEngine::new(client),
        }
    }

    pub fn engine(&self) -> &W3wpEngine<C> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut W3wpEngine<C> {
        &mut self.engine
    }
}

impl<C: PerformanceQueryClient> Input for W3wp<C> {
    fn name(&self) -> &'static str {
        "win_w3wp"
    }

    fn init(&mut self) -> Result<(), MonitoringError> {
        let settings = EngineSettings {
            interval: parse_interval(&self.config.interval)?,
            executable: self.config.executable.clone(),
            group_flag: self.config.group_flag.clone(),
        };
        self.engine.commence(settings)
    }

    /// Emits whatever the engine has aggregated so far; nothing before the
    /// first successful poll.
    fn gather(&self, acc: &mut dyn Accumulator) -> Result<(), MonitoringError> {
        for (app_pool, metric) in self.engine.snapshot() {
            emit_app_pool(acc, &app_pool, &metric);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.engine.shutdown();
    }
}

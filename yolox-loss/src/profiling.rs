//! Checkpoint timing of the loss stages, compiled out unless the `profiling`
//! feature is enabled.

use crate::common::*;

pub use timing::*;

/// Settings read from `YOLOX_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingConfig {
    /// `YOLOX_PROFILING_WHITELIST`, the comma-separated names of reported timings.
    /// All timings are reported when absent.
    pub profiling_whitelist: Option<Vec<String>>,
}

impl ProfilingConfig {
    pub fn is_reported(&self, name: &str) -> bool {
        self.profiling_whitelist
            .as_ref()
            .map(|whitelist| whitelist.iter().any(|allowed| allowed == name))
            .unwrap_or(true)
    }
}

#[cfg(feature = "profiling")]
mod timing {
    use super::*;

    lazy_static! {
        static ref PROFILING_CONFIG: ProfilingConfig =
            envy::prefixed("YOLOX_").from_env().unwrap_or_else(|err| {
                warn!("ignore invalid profiling environment variables: {}", err);
                ProfilingConfig::default()
            });
        static ref REGISTERED_TIMINGS: dashmap::DashSet<&'static str> = dashmap::DashSet::new();
    }

    /// Elapsed time between named checkpoints.
    #[derive(Debug)]
    pub struct Timing {
        name: &'static str,
        since: Instant,
        stages: Vec<(&'static str, Duration)>,
    }

    impl Timing {
        pub fn new(name: &'static str) -> Self {
            if REGISTERED_TIMINGS.insert(name) {
                info!("registered timing profile '{}'", name);
            }

            Self {
                name,
                since: Instant::now(),
                stages: vec![],
            }
        }

        pub fn add_event(&mut self, stage: &'static str) {
            let now = Instant::now();
            self.stages.push((stage, now - self.since));
            self.since = now;
        }

        pub fn report(&self) {
            if !PROFILING_CONFIG.is_reported(self.name) {
                return;
            }

            let total: Duration = self.stages.iter().map(|(_, elapsed)| *elapsed).sum();
            info!("profiling report for '{}', total {:?}", self.name, total);
            for (stage, elapsed) in &self.stages {
                info!("- {}\t{:?}", stage, elapsed);
            }
        }
    }
}

#[cfg(not(feature = "profiling"))]
mod timing {
    #[derive(Debug)]
    pub struct Timing;

    impl Timing {
        pub fn new(_name: &'static str) -> Self {
            Self
        }

        pub fn add_event(&mut self, _stage: &'static str) {}

        pub fn report(&self) {}
    }
}

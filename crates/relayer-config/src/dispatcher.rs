// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use attestation_relayer_utils::retry::RetrySchedule;
use serde::{Deserialize, Serialize};

use crate::defaults;

/// DispatcherConfig is the configuration for the dispatch retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DispatcherConfig {
    /// Maximum number of dispatch attempts running at the same time.
    #[serde(default = "defaults::workers")]
    pub workers: usize,
    /// A message fails permanently after this many attempts.
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(default = "defaults::backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Growth factor of the retry delay.
    #[serde(default = "defaults::backoff_factor")]
    pub backoff_factor: u32,
    /// Cap of a single retry delay.
    #[serde(default = "defaults::backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Maximum random jitter added to each retry delay.
    #[serde(default = "defaults::jitter_ms")]
    pub jitter_ms: u64,
    /// How often due retries are looked for when nothing new arrives.
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout of a single submit call.
    #[serde(default = "defaults::submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    /// Maximum number of entries claimed per dispatcher pass.
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: defaults::workers(),
            max_attempts: defaults::max_attempts(),
            backoff_base_ms: defaults::backoff_base_ms(),
            backoff_factor: defaults::backoff_factor(),
            backoff_max_ms: defaults::backoff_max_ms(),
            jitter_ms: defaults::jitter_ms(),
            poll_interval_ms: defaults::poll_interval_ms(),
            submit_timeout_ms: defaults::submit_timeout_ms(),
            batch_size: defaults::batch_size(),
        }
    }
}

impl DispatcherConfig {
    /// The retry schedule described by this config.
    pub fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule {
            base: Duration::from_millis(self.backoff_base_ms),
            factor: self.backoff_factor,
            max_interval: Duration::from_millis(self.backoff_max_ms),
            max_jitter: Duration::from_millis(self.jitter_ms),
        }
    }

    /// Submit timeout as a [`Duration`].
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

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

/// The default port the metrics and query server listens on.
pub const fn port() -> u16 {
    8081
}
/// The `app` label attached to every metric.
pub fn app_name() -> String {
    String::from("attestation_relayer")
}
/// Connecting to the attestation source times out after 10 seconds.
pub const fn connect_timeout_ms() -> u64 {
    10_000
}
/// A source that stays silent for 2 minutes is considered dead.
pub const fn read_timeout_ms() -> u64 {
    120_000
}
/// Decoding a single attestation times out after 1 second.
pub const fn decode_timeout_ms() -> u64 {
    1_000
}
/// Upper bound between two reconnect attempts.
pub const fn reconnect_max_interval_ms() -> u64 {
    30_000
}
/// Number of concurrent dispatch attempts.
pub const fn workers() -> usize {
    4
}
/// Attempts before a message is given up.
pub const fn max_attempts() -> u32 {
    5
}
/// Delay after the first failed attempt.
pub const fn backoff_base_ms() -> u64 {
    2_000
}
/// Growth factor of the retry delay.
pub const fn backoff_factor() -> u32 {
    2
}
/// Cap of a single retry delay.
pub const fn backoff_max_ms() -> u64 {
    60_000
}
/// Maximum random jitter added to a retry delay.
pub const fn jitter_ms() -> u64 {
    500
}
/// How often the dispatcher looks for due retries without being notified.
pub const fn poll_interval_ms() -> u64 {
    1_000
}
/// A single submit call times out after 30 seconds.
pub const fn submit_timeout_ms() -> u64 {
    30_000
}
/// Maximum number of entries claimed per dispatcher pass.
pub const fn batch_size() -> usize {
    64
}
/// How often destination account balances are refreshed.
pub const fn balance_interval_ms() -> u64 {
    60_000
}
/// Destinations are enabled unless turned off.
pub const fn enabled() -> bool {
    true
}

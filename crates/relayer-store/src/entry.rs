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

use attestation_relayer_types::{MessageKey, Receipt};
use attestation_relayer_utils::{now_millis, Error};
use serde::{Deserialize, Serialize};

/// The status of a message in the relay pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum MessageStatus {
    /// First observation, not classified yet.
    #[default]
    New,
    /// Did not match the configured filters. Recorded for audit only.
    Filtered,
    /// Matched and waiting to be picked up by the dispatcher.
    Queued,
    /// A dispatch attempt is in flight.
    Dispatching,
    /// Delivered, or reported as already delivered by the destination.
    Succeeded,
    /// The last attempt failed with a retryable error.
    Retrying,
    /// Gave up on this message.
    FailedPermanent,
}

impl MessageStatus {
    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedPermanent)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (New, Filtered)
                | (New, Queued)
                | (Queued, Dispatching)
                | (Retrying, Dispatching)
                | (Dispatching, Succeeded)
                | (Dispatching, Retrying)
                | (Dispatching, FailedPermanent)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Filtered => "Filtered",
            Self::Queued => "Queued",
            Self::Dispatching => "Dispatching",
            Self::Succeeded => "Succeeded",
            Self::Retrying => "Retrying",
            Self::FailedPermanent => "FailedPermanent",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The relay's bookkeeping record for one identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEntry {
    pub key: MessageKey,
    pub status: MessageStatus,
    /// Raw attestation bytes, kept for audit and for re-decoding at dispatch.
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    /// Destination chosen when the message was queued.
    #[serde(default)]
    pub destination: Option<String>,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Unix milliseconds.
    pub first_seen_at: u64,
    /// Unix milliseconds.
    pub last_updated_at: u64,
    /// Unix milliseconds, only set while [`MessageStatus::Retrying`].
    #[serde(default)]
    pub next_attempt_at: Option<u64>,
    #[serde(default)]
    pub receipt: Option<Receipt>,
}

impl StoreEntry {
    /// A fresh entry in the [`MessageStatus::New`] state.
    pub fn new(key: MessageKey) -> Self {
        let now = now_millis();
        Self {
            key,
            status: MessageStatus::New,
            payload: Vec::new(),
            destination: None,
            attempts: 0,
            last_error: None,
            first_seen_at: now,
            last_updated_at: now,
            next_attempt_at: None,
            receipt: None,
        }
    }

    /// Moves the entry to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: MessageStatus) -> Result<(), Error> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                key: self.key.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next != MessageStatus::Retrying {
            self.next_attempt_at = None;
        }
        self.touch();
        Ok(())
    }

    /// Claims the entry for a dispatch attempt and counts it.
    pub fn begin_attempt(&mut self) -> Result<(), Error> {
        self.transition(MessageStatus::Dispatching)?;
        self.attempts += 1;
        Ok(())
    }

    /// Whether the dispatcher should pick this entry up at `now`.
    pub fn is_due(&self, now: u64) -> bool {
        match self.status {
            MessageStatus::Queued => true,
            MessageStatus::Retrying => {
                self.next_attempt_at.map_or(true, |at| at <= now)
            }
            _ => false,
        }
    }

    /// Whether this entry was just created by the current upsert.
    pub fn is_new(&self) -> bool {
        self.status == MessageStatus::New
    }

    pub fn touch(&mut self) {
        self.last_updated_at = now_millis().max(self.last_updated_at);
    }
}

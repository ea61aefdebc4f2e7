//! The message that travels through the pipeline.

use serde_json::Value;
use std::collections::HashMap;

/// Per-message options consumed by stages (e.g. a batch group or an
/// endpoint override). Stages ignore keys they do not know.
pub type Options = HashMap<String, Value>;

/// A payload in flight, together with the routing state the engine
/// tracks for it.
///
/// Producers hand over the payload, the options and an opaque value;
/// the engine stamps the sequence number and the retry budget. The
/// opaque value is never inspected, it is returned verbatim in the
/// final [`Report`](crate::report::Report).
#[derive(Debug, Clone)]
pub struct Message {
    sequence: u64,
    payload: Vec<u8>,
    options: Options,
    opaque: Value,
    retries_left: u32,
    stage_index: usize,
}

impl Message {
    /// Creates a message at the head of the pipeline with an empty
    /// retry budget. The engine resets the budget on intake.
    #[must_use]
    pub fn new(sequence: u64, payload: Vec<u8>, options: Options, opaque: Value) -> Self {
        Self {
            sequence,
            payload,
            options,
            opaque,
            retries_left: 0,
            stage_index: 0,
        }
    }

    /// The engine-assigned sequence number, unique within a run.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// All options attached to this message.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Looks up a single option by key.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Attaches or overwrites an option.
    pub fn set_option(&mut self, key: impl Into<String>, value: Value) {
        self.options.insert(key.into(), value);
    }

    /// The producer-supplied correlation value.
    #[must_use]
    pub fn opaque(&self) -> &Value {
        &self.opaque
    }

    /// Consumes the message and returns only its correlation value.
    #[must_use]
    pub fn into_opaque(self) -> Value {
        self.opaque
    }

    /// Consumes the message into its producer-facing parts.
    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, Options, Value) {
        (self.payload, self.options, self.opaque)
    }

    /// Retries still available at the current stage.
    #[must_use]
    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    /// Index of the stage currently responsible for this message.
    #[must_use]
    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    /// Refills the retry budget. Called on intake and on every stage
    /// advance, so each stage gets the full budget.
    pub(crate) fn reset_retries(&mut self, retries: u32) {
        self.retries_left = retries;
    }

    /// Spends one retry. Returns `false` when the budget is exhausted.
    pub(crate) fn consume_retry(&mut self) -> bool {
        if self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        true
    }

    /// Moves the message to the next stage with a fresh retry budget.
    pub(crate) fn advance(&mut self, retries: u32) {
        self.stage_index += 1;
        self.retries_left = retries;
    }
}

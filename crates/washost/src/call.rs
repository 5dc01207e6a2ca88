//! Call records: the unit of work pulled from the queue and the child
//! records produced by chaining.

use crate::layout::{
    MAX_CHAINS, MAX_INPUT_BYTES, MAX_INPUT_PAYLOAD, MAX_NAME_LENGTH, MAX_OUTPUT_PAYLOAD,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("name is empty")]
    EmptyName,
    #[error("name is {0} bytes, limit is {MAX_NAME_LENGTH}")]
    NameTooLong(usize),
    #[error("input is {0} bytes, limit is {1}")]
    InputTooLarge(usize, usize),
    #[error("output is {0} bytes, limit is {MAX_OUTPUT_PAYLOAD}")]
    OutputTooLarge(usize),
    #[error("chain list is full ({MAX_CHAINS})")]
    TooManyChains,
}

/// Terminal state of a call. The failure tags mirror the trap taxonomy so
/// the caller's edge can tell a guest bug from a host refusal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Pending,
    Success,
    UnimplementedIntrinsic,
    Cancelled,
    GuestFault,
    InternalError,
}

/// A nested invocation requested by the guest. Children are published to
/// the queue in the order the guest issued them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainedCall {
    /// Nonzero, unique within the parent call.
    pub id: u32,
    pub function: String,
    pub input: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub user: String,
    pub function: String,
    pub input: Vec<u8>,
    pub output: Vec<u8>,
    pub chains: Vec<ChainedCall>,
    pub status: CallStatus,
    /// Populated on fatal failures.
    pub error: Option<String>,
    /// Guest stdout, when capture is configured on.
    pub captured_stdout: Option<Vec<u8>>,
}

fn check_name(name: &str) -> Result<(), CallError> {
    if name.is_empty() {
        return Err(CallError::EmptyName);
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(CallError::NameTooLong(name.len()));
    }
    Ok(())
}

impl FunctionCall {
    /// Limits are checked here, at ingress, and again wherever bytes leave
    /// the module (`set_output`, `add_chain`).
    pub fn new(user: &str, function: &str, input: Vec<u8>) -> Result<Self, CallError> {
        check_name(user)?;
        check_name(function)?;
        if input.len() > MAX_INPUT_PAYLOAD {
            return Err(CallError::InputTooLarge(input.len(), MAX_INPUT_PAYLOAD));
        }
        Ok(Self {
            user: user.to_string(),
            function: function.to_string(),
            input,
            output: Vec::new(),
            chains: Vec::new(),
            status: CallStatus::Pending,
            error: None,
            captured_stdout: None,
        })
    }

    pub fn set_output(&mut self, output: Vec<u8>) -> Result<(), CallError> {
        if output.len() > MAX_OUTPUT_PAYLOAD {
            return Err(CallError::OutputTooLarge(output.len()));
        }
        self.output = output;
        Ok(())
    }

    /// Append a child record, returning its call id.
    ///
    /// Chain inputs ride the chain-input table, whose slots are the full
    /// 1 MiB with no length prefix, so the bound here is `MAX_INPUT_BYTES`.
    pub fn add_chain(&mut self, function: &str, input: Vec<u8>) -> Result<u32, CallError> {
        check_name(function)?;
        if input.len() > MAX_INPUT_BYTES {
            return Err(CallError::InputTooLarge(input.len(), MAX_INPUT_BYTES));
        }
        if self.chains.len() >= MAX_CHAINS {
            return Err(CallError::TooManyChains);
        }
        let id = self.chains.len() as u32 + 1;
        self.chains.push(ChainedCall {
            id,
            function: function.to_string(),
            input,
        });
        Ok(id)
    }

    /// The queue entry for a chained child, inheriting the parent's user.
    /// The name and input were validated when the chain was appended, so
    /// this does not re-apply the direct-ingress input bound.
    pub fn child_call(&self, chain: &ChainedCall) -> Self {
        Self {
            user: self.user.clone(),
            function: chain.function.clone(),
            input: chain.input.clone(),
            output: Vec::new(),
            chains: Vec::new(),
            status: CallStatus::Pending,
            error: None,
            captured_stdout: None,
        }
    }
}

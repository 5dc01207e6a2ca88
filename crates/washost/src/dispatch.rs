//! Import resolution and the trap taxonomy.
//!
//! Intrinsics are host functions keyed by `(module, name)` with a declared
//! guest-ABI signature. Instantiation resolves the guest's import list
//! against the table; any unresolved symbol or signature mismatch fails the
//! instantiation. At call time, handlers run synchronously on the thread
//! that entered the guest.

use crate::module::CallCtx;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValType {
    I32,
    I64,
    U32,
    U64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
}

impl Value {
    pub fn ty(&self) -> ValType {
        match self {
            Self::I32(_) => ValType::I32,
            Self::I64(_) => ValType::I64,
            Self::U32(_) => ValType::U32,
            Self::U64(_) => ValType::U64,
        }
    }
}

/// Fatal conditions that unwind the guest. Where an exception would be
/// thrown in other runtimes, every intrinsic here propagates `Trap` through
/// its `Err` arm and the executor catches it at the boundary.
#[derive(Debug, Error)]
pub enum Trap {
    #[error("unimplemented intrinsic: {0}")]
    UnimplementedIntrinsic(&'static str),
    #[error("call cancelled")]
    Cancelled,
    #[error("guest memory fault")]
    MemoryFault,
    #[error("host error: {0}")]
    Internal(String),
}

impl Trap {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Argument list as handed to a handler. The signature was checked at
/// instantiation, so variant mismatches here indicate a host bug and trap.
pub struct Args<'a>(pub &'a [Value]);

impl Args<'_> {
    fn get(&self, idx: usize) -> Result<Value, Trap> {
        self.0
            .get(idx)
            .copied()
            .ok_or_else(|| Trap::internal(format!("missing intrinsic argument {idx}")))
    }

    pub fn i32(&self, idx: usize) -> Result<i32, Trap> {
        match self.get(idx)? {
            Value::I32(v) => Ok(v),
            Value::U32(v) => Ok(v as i32),
            other => Err(Trap::internal(format!(
                "argument {idx} is {:?}, expected 32-bit",
                other.ty()
            ))),
        }
    }

    pub fn u32(&self, idx: usize) -> Result<u32, Trap> {
        Ok(self.i32(idx)? as u32)
    }

    pub fn i64(&self, idx: usize) -> Result<i64, Trap> {
        match self.get(idx)? {
            Value::I64(v) => Ok(v),
            Value::U64(v) => Ok(v as i64),
            other => Err(Trap::internal(format!(
                "argument {idx} is {:?}, expected 64-bit",
                other.ty()
            ))),
        }
    }

    pub fn u64(&self, idx: usize) -> Result<u64, Trap> {
        Ok(self.i64(idx)? as u64)
    }
}

pub type HostFn = fn(&mut CallCtx<'_>, &Args<'_>) -> Result<Option<Value>, Trap>;

#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ValType>,
    pub result: Option<ValType>,
}

impl Signature {
    pub fn new(params: &[ValType], result: Option<ValType>) -> Self {
        Self {
            params: params.to_vec(),
            result,
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:?}) -> {:?}", self.params, self.result)
    }
}

#[derive(Clone)]
pub struct Intrinsic {
    pub signature: Signature,
    pub func: HostFn,
}

#[derive(Hash, PartialEq, Eq, Clone)]
struct ImportKey {
    module: Arc<str>,
    name: Arc<str>,
}

/// What a guest asks for at instantiation time.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub module: String,
    pub name: String,
    pub signature: Signature,
}

impl ImportRequest {
    pub fn new(module: &str, name: &str, params: &[ValType], result: Option<ValType>) -> Self {
        Self {
            module: module.to_string(),
            name: name.to_string(),
            signature: Signature::new(params, result),
        }
    }
}

#[derive(Debug, Error)]
pub enum InstantiationError {
    #[error("unresolved import {module}!{name}")]
    UnresolvedImport { module: String, name: String },
    #[error("signature mismatch for {module}!{name}: guest wants {wanted:?}, host has {offered:?}")]
    SignatureMismatch {
        module: String,
        name: String,
        wanted: Signature,
        offered: Signature,
    },
}

/// The intrinsic table. Built once at startup and shared read-only by every
/// executor.
#[derive(Default)]
pub struct Resolver {
    map: HashMap<ImportKey, Intrinsic>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(
        &mut self,
        module: &str,
        name: &str,
        signature: Signature,
        func: HostFn,
    ) -> anyhow::Result<&mut Self> {
        let key = ImportKey {
            module: module.into(),
            name: name.into(),
        };
        if self.map.contains_key(&key) {
            anyhow::bail!("import {module}!{name} defined twice");
        }
        self.map.insert(key, Intrinsic { signature, func });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Resolve one import against the table, checking the declared
    /// signature.
    pub fn resolve(
        &self,
        request: &ImportRequest,
    ) -> Result<&Intrinsic, InstantiationError> {
        let key = ImportKey {
            module: request.module.as_str().into(),
            name: request.name.as_str().into(),
        };
        let intrinsic = self
            .map
            .get(&key)
            .ok_or_else(|| InstantiationError::UnresolvedImport {
                module: request.module.clone(),
                name: request.name.clone(),
            })?;
        if intrinsic.signature != request.signature {
            return Err(InstantiationError::SignatureMismatch {
                module: request.module.clone(),
                name: request.name.clone(),
                wanted: request.signature.clone(),
                offered: intrinsic.signature.clone(),
            });
        }
        Ok(intrinsic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_: &mut CallCtx<'_>, _: &Args<'_>) -> Result<Option<Value>, Trap> {
        Ok(Some(Value::I32(0)))
    }

    fn i32_sig(n: usize) -> Signature {
        Signature::new(&vec![ValType::I32; n], Some(ValType::I32))
    }

    #[test]
    fn resolve_checks_name_and_signature() {
        let mut resolver = Resolver::new();
        resolver.define("env", "dup", i32_sig(1), nop).unwrap();

        let ok = ImportRequest::new("env", "dup", &[ValType::I32], Some(ValType::I32));
        assert!(resolver.resolve(&ok).is_ok());

        let missing = ImportRequest::new("env", "nope", &[], None);
        assert!(matches!(
            resolver.resolve(&missing),
            Err(InstantiationError::UnresolvedImport { .. })
        ));

        let wrong = ImportRequest::new("env", "dup", &[ValType::I64], Some(ValType::I32));
        assert!(matches!(
            resolver.resolve(&wrong),
            Err(InstantiationError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn double_definition_is_rejected() {
        let mut resolver = Resolver::new();
        resolver.define("env", "dup", i32_sig(1), nop).unwrap();
        assert!(resolver.define("env", "dup", i32_sig(1), nop).is_err());
    }
}

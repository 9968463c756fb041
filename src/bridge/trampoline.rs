//! Trampolines: callable entry points into code behind the bridge.

use std::fmt;
use std::sync::Arc;

use crate::bridge::shorty::{check_args, GuestAbi, MarshalError, Shorty, ShortyType, Value};

/// Host-side code a trampoline relays to.
pub type HostFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// An entry point for `symbol`, called with the convention of `guest_abi`.
///
/// Calls are synchronous: the caller is suspended until the target returns.
/// There is no cancellation.
#[derive(Clone)]
pub struct Trampoline {
    symbol: String,
    shorty: Shorty,
    guest_abi: GuestAbi,
    target: HostFn,
}

impl Trampoline {
    pub fn new(symbol: impl Into<String>, shorty: Shorty, guest_abi: GuestAbi, target: HostFn) -> Self {
        Trampoline {
            symbol: symbol.into(),
            shorty,
            guest_abi,
            target,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn shorty(&self) -> &Shorty {
        &self.shorty
    }

    pub fn guest_abi(&self) -> GuestAbi {
        self.guest_abi
    }

    /// Call with typed arguments.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, MarshalError> {
        check_args(&self.shorty, args)?;
        tracing::trace!("trampoline {} ({})", self.symbol, self.shorty);

        let ret = (self.target)(args);

        let expected = self.shorty.ret();
        if ret.kind() != expected {
            return Err(MarshalError::ReturnType {
                expected,
                found: ret.kind(),
            });
        }
        Ok(ret)
    }

    /// Call with raw guest argument words; returns the guest return registers.
    pub fn invoke_guest(&self, words: &[u64]) -> Result<Vec<u64>, MarshalError> {
        let args = self.guest_abi.unmarshal_args(&self.shorty, words)?;
        let ret = self.invoke(&args)?;
        Ok(self.guest_abi.encode_return(ret))
    }

    pub fn returns(&self) -> ShortyType {
        self.shorty.ret()
    }
}

impl fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampoline")
            .field("symbol", &self.symbol)
            .field("shorty", &self.shorty.to_string())
            .field("guest_abi", &self.guest_abi)
            .finish_non_exhaustive()
    }
}

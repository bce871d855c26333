//! # Sentinel Reliability
//!
//! The reliability envelope around every external dependency: per-dependency
//! circuit breakers with CLOSED/OPEN/HALF_OPEN states, and a scoped fault
//! injector for chaos testing at the KMS, database, and external-API seams.
//!
//! Validator and verifier failures never pass through this crate — those are
//! terminal. Only transient infrastructure calls are breaker-wrapped.

#![forbid(unsafe_code)]

pub mod breaker;
pub mod fault;

pub use breaker::{
    BreakerConfig, BreakerError, BreakerObserver, BreakerRegistry, BreakerState, CircuitBreaker,
};
pub use fault::{ActiveFault, FaultInjector, FaultRule, FaultType, Seam};

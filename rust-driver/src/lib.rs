//! Configuration runtime for PCI capture cards.
//!
//! A card is modelled as a tree of [`Component`]s, each owning typed
//! [`Attribute`]s that read and write device state through a
//! [`GenericReadWrite`] accessor. The accessor hides whether a value lives in a
//! memory-mapped register, behind a register-mediated bus controller, or on a
//! bit-banged two-wire bus.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

/// Component attributes and the generic attribute factory
pub mod attribute;

/// Bit-banged two-wire bus engine and bus controller
pub mod bus;

/// Card context, card models and stream locks
pub mod card;

/// Component tree and lifecycle hooks
pub mod component;

/// Runtime configuration
pub mod config;

/// Device constants
mod constants;

/// Register access adaptors
pub mod device;

/// Error types
pub mod error;

/// Generic read-write accessors
pub mod grw;

/// Register enumeration and resolution
pub mod regs;

pub use attribute::{
    AccessCtx, AttrValue, Attribute, AttributeCode, AttributeFactory, ConfigStatus,
    CustomAccessor, LatchedCounterRead, ValueAccessor, ValueType,
};
pub use bus::{BusLines, RetryBudget, TwoWireBus};
pub use card::{Card, CardContext, CardModel, StreamGuard};
pub use component::{Component, ComponentCode, Lifecycle};
pub use config::{CardConfig, ConfigLoader};
pub use device::DeviceAdaptor;
pub use error::{Error, LastError, Result};
pub use grw::{GenericReadWrite, GrwTransport, OnOperation};
pub use regs::{EnumerationTable, ModuleCode, RegisterDescriptor};

use std::fmt;

use crate::{card::CardContext, error::Result};

use super::Component;

/// Hooks run by the card's orchestration on one component.
///
/// The hook receives the component it is installed on; while a hook runs the
/// component carries no lifecycle of its own. Every hook defaults to doing
/// nothing.
pub trait Lifecycle: Send + fmt::Debug {
    /// Creates the component's attributes once the tree is built
    ///
    /// # Errors
    /// Returns an error if the component cannot be brought up
    fn post_initialize(&mut self, ctx: &CardContext, component: &mut Component) -> Result<()> {
        let _ = (ctx, component);
        Ok(())
    }

    /// Returns the hardware unit to its power-on state
    ///
    /// # Errors
    /// Returns an error if the unit does not respond
    fn reset(&mut self, ctx: &CardContext, component: &mut Component) -> Result<()> {
        let _ = (ctx, component);
        Ok(())
    }

    /// Writes the default configuration
    ///
    /// # Errors
    /// Returns an error if the unit does not respond
    fn apply_defaults(&mut self, ctx: &CardContext, component: &mut Component) -> Result<()> {
        let _ = (ctx, component);
        Ok(())
    }

    /// Re-resolves register offsets after firmware was reloaded
    ///
    /// # Errors
    /// Returns an error if the unit's registers are no longer present
    fn update_register_base(&mut self, ctx: &CardContext, component: &mut Component) -> Result<()> {
        let _ = (ctx, component);
        Ok(())
    }

    /// Runs after attributes and children are gone, before private state is
    /// dropped
    fn dispose(&mut self, ctx: &CardContext, component: &mut Component) {
        let _ = (ctx, component);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Hook {
    PostInitialize,
    Reset,
    ApplyDefaults,
    UpdateRegisterBase,
}

impl Hook {
    pub(super) fn call(
        self,
        lifecycle: &mut dyn Lifecycle,
        ctx: &CardContext,
        component: &mut Component,
    ) -> Result<()> {
        match self {
            Hook::PostInitialize => lifecycle.post_initialize(ctx, component),
            Hook::Reset => lifecycle.reset(ctx, component),
            Hook::ApplyDefaults => lifecycle.apply_defaults(ctx, component),
            Hook::UpdateRegisterBase => lifecycle.update_register_base(ctx, component),
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Hook::PostInitialize => "post-initialize",
            Hook::Reset => "reset",
            Hook::ApplyDefaults => "apply-defaults",
            Hook::UpdateRegisterBase => "update-register-base",
        })
    }
}

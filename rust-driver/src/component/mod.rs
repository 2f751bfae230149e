mod lifecycle;

use std::{any::Any, fmt, ops::Range};

use log::{debug, warn};

use crate::{
    attribute::{AccessCtx, AttrValue, Attribute, AttributeCode, LatchedCounterRead},
    card::CardContext,
    error::{Error, Result},
};

pub use lifecycle::Lifecycle;

use lifecycle::Hook;

/// Kind of hardware unit a component represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentCode {
    /// The card itself
    Root,
    /// Physical network port
    Port,
    /// Line framer
    Framer,
    /// Physical layer transceiver
    Phy,
    /// Two-wire bus master
    TwoWireBus,
    /// Monitoring sensor on a two-wire bus
    Sensor,
    /// Packet buffer manager
    Pbm,
    /// Transmit/receive timestamp unit
    Terf,
    /// Capture stream
    Stream,
    /// General card registers
    General,
    /// Card specific unit
    Other(u32),
}

impl fmt::Display for ComponentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ComponentCode::Root => f.write_str("root"),
            ComponentCode::Port => f.write_str("port"),
            ComponentCode::Framer => f.write_str("framer"),
            ComponentCode::Phy => f.write_str("phy"),
            ComponentCode::TwoWireBus => f.write_str("two-wire bus"),
            ComponentCode::Sensor => f.write_str("sensor"),
            ComponentCode::Pbm => f.write_str("pbm"),
            ComponentCode::Terf => f.write_str("terf"),
            ComponentCode::Stream => f.write_str("stream"),
            ComponentCode::General => f.write_str("general"),
            ComponentCode::Other(code) => write!(f, "component {code:#x}"),
        }
    }
}

/// A node of the card's configuration tree.
///
/// Children keep their insertion order. Attributes are looked up by code.
pub struct Component {
    code: ComponentCode,
    name: String,
    children: Vec<Component>,
    attributes: Vec<Attribute>,
    private: Option<Box<dyn Any + Send>>,
    lifecycle: Option<Box<dyn Lifecycle>>,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("code", &self.code)
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl Component {
    /// Empty component without private state or lifecycle hooks
    pub fn new(code: ComponentCode, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            children: Vec::new(),
            attributes: Vec::new(),
            private: None,
            lifecycle: None,
        }
    }

    /// Installs lifecycle hooks
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: impl Lifecycle + 'static) -> Self {
        self.lifecycle = Some(Box::new(lifecycle));
        self
    }

    /// Replaces the private state
    pub fn set_private<T: Any + Send>(&mut self, state: T) {
        self.private = Some(Box::new(state));
    }

    /// Private state, if it is a `T`
    pub fn private<T: Any>(&self) -> Option<&T> {
        self.private.as_deref().and_then(|p| p.downcast_ref())
    }

    /// Mutable private state, if it is a `T`
    pub fn private_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.private.as_deref_mut().and_then(|p| p.downcast_mut())
    }

    /// Component code
    pub fn code(&self) -> ComponentCode {
        self.code
    }

    /// Name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn access<'a>(&'a self, ctx: &'a CardContext) -> AccessCtx<'a> {
        AccessCtx::new(ctx).with_private(self.private.as_deref())
    }

    /// Appends a child
    pub fn add_subcomponent(&mut self, child: Component) {
        self.children.push(child);
    }

    /// The `n`-th child with code `code`
    pub fn subcomponent(&self, code: ComponentCode, n: usize) -> Option<&Component> {
        self.children.iter().filter(|c| c.code == code).nth(n)
    }

    /// Mutable access to the `n`-th child with code `code`
    pub fn subcomponent_mut(&mut self, code: ComponentCode, n: usize) -> Option<&mut Component> {
        self.children.iter_mut().filter(|c| c.code == code).nth(n)
    }

    /// The `n`-th child in insertion order
    pub fn indexed_subcomponent(&self, n: usize) -> Option<&Component> {
        self.children.get(n)
    }

    /// Mutable access to the `n`-th child in insertion order
    pub fn indexed_subcomponent_mut(&mut self, n: usize) -> Option<&mut Component> {
        self.children.get_mut(n)
    }

    /// Number of children with code `code`
    pub fn subcomponent_count(&self, code: ComponentCode) -> usize {
        self.children.iter().filter(|c| c.code == code).count()
    }

    /// Number of children
    pub fn subcomponents_len(&self) -> usize {
        self.children.len()
    }

    /// This component and all its descendants, parents before children
    pub fn descendants(&self) -> Vec<&Component> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.descendants());
        }
        out
    }

    /// Adds an attribute.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if the attribute has no name
    pub fn add_attribute(&mut self, attribute: Attribute) -> Result<()> {
        if attribute.name().is_empty() {
            return Err(Error::InvalidInput(format!(
                "{} on {}: attribute has no name",
                attribute.code(),
                self.name
            )));
        }
        self.attributes.push(attribute);
        Ok(())
    }

    /// Attribute with code `code`
    pub fn attribute(&self, code: AttributeCode) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.code() == code)
    }

    /// Mutable access to the attribute with code `code`
    pub fn attribute_mut(&mut self, code: AttributeCode) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.code() == code)
    }

    /// The `n`-th attribute
    pub fn indexed_attribute(&self, n: usize) -> Option<&Attribute> {
        self.attributes.get(n)
    }

    /// Number of attributes
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    fn missing(&self, code: AttributeCode) -> Error {
        Error::NotFound(format!("{code} on {}", self.name))
    }

    /// Reads attribute `code`
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no such attribute, or the
    /// accessor's error
    pub fn get_value(&self, ctx: &CardContext, code: AttributeCode) -> Result<AttrValue> {
        let attr = self.attribute(code).ok_or_else(|| self.missing(code))?;
        attr.get_value(&self.access(ctx))
    }

    /// Writes attribute `code`
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no such attribute,
    /// [`Error::TypeMismatch`] for a value of the wrong type, or the
    /// accessor's error
    pub fn set_value(
        &mut self,
        ctx: &CardContext,
        code: AttributeCode,
        value: &AttrValue,
    ) -> Result<()> {
        let missing = self.missing(code);
        let access = AccessCtx::new(ctx).with_private(self.private.as_deref());
        let attr = self
            .attributes
            .iter_mut()
            .find(|a| a.code() == code)
            .ok_or(missing)?;
        attr.set_value(&access, value)
    }

    /// Text form of attribute `code`
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no such attribute, or the
    /// accessor's error
    pub fn get_value_string(&self, ctx: &CardContext, code: AttributeCode) -> Result<String> {
        let attr = self.attribute(code).ok_or_else(|| self.missing(code))?;
        attr.to_string(&self.access(ctx))
    }

    /// Parses and writes attribute `code`
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no such attribute,
    /// [`Error::Parse`] for malformed text, or the accessor's error
    pub fn set_value_string(
        &mut self,
        ctx: &CardContext,
        code: AttributeCode,
        text: &str,
    ) -> Result<()> {
        let missing = self.missing(code);
        let access = AccessCtx::new(ctx).with_private(self.private.as_deref());
        let attr = self
            .attributes
            .iter_mut()
            .find(|a| a.code() == code)
            .ok_or(missing)?;
        attr.from_string(&access, text)
    }

    /// Latches and reads a counter in one call
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if either attribute is missing, or the
    /// latch or counter accessor's error
    pub fn read_latched(&mut self, ctx: &CardContext, pair: LatchedCounterRead) -> Result<AttrValue> {
        if self.attribute(pair.counter).is_none() {
            return Err(self.missing(pair.counter));
        }
        let missing = self.missing(pair.latch);
        let access = AccessCtx::new(ctx).with_private(self.private.as_deref());
        let latch_pos = self
            .attributes
            .iter()
            .position(|a| a.code() == pair.latch)
            .ok_or(missing)?;
        let latch = self
            .attributes
            .get_mut(latch_pos)
            .ok_or_else(|| Error::NotFound(pair.latch.to_string()))?;
        latch.set_value(&access, &AttrValue::Boolean(true))?;
        let counter = self
            .attributes
            .iter()
            .find(|a| a.code() == pair.counter)
            .ok_or_else(|| Error::NotFound(pair.counter.to_string()))?;
        counter.get_value(&access)
    }

    /// Shifts every register accessor bound inside `old` to the same offset
    /// from `new_base`
    pub fn rebase_registers(&mut self, old: Range<u64>, new_base: u64) {
        for attr in &mut self.attributes {
            if let Some(grw) = attr.grw_mut() {
                let addr = grw.address();
                if old.contains(&addr) {
                    grw.set_address(new_base.wrapping_add(addr - old.start));
                }
            }
        }
    }

    fn call_hook(&mut self, ctx: &CardContext, hook: Hook) -> Result<()> {
        let Some(mut lifecycle) = self.lifecycle.take() else {
            return Ok(());
        };
        let result = hook.call(lifecycle.as_mut(), ctx, self);
        self.lifecycle = Some(lifecycle);
        result
    }

    /// Runs `hook` on this component then on its children in order.
    ///
    /// A failing hook is logged and recorded as the card's last error; the
    /// walk carries on. Returns the number of failures.
    fn walk(&mut self, ctx: &CardContext, hook: Hook) -> usize {
        let mut failures = 0;
        if let Err(err) = self.call_hook(ctx, hook) {
            warn!("{} {}: {hook} failed: {err}", self.code, self.name);
            ctx.set_last_error(&err);
            failures += 1;
        }
        if hook == Hook::PostInitialize {
            let access = AccessCtx::new(ctx).with_private(self.private.as_deref());
            for attr in &mut self.attributes {
                if let Err(err) = attr.post_initialize(&access) {
                    warn!("{}: post-initialize of {} failed: {err}", self.name, attr.name());
                    ctx.set_last_error(&err);
                    failures += 1;
                }
            }
        }
        for child in &mut self.children {
            failures += child.walk(ctx, hook);
        }
        failures
    }

    /// Post-initialise pass over the subtree, returning the number of failures
    pub fn post_initialize(&mut self, ctx: &CardContext) -> usize {
        self.walk(ctx, Hook::PostInitialize)
    }

    /// Reset pass over the subtree, returning the number of failures
    pub fn reset(&mut self, ctx: &CardContext) -> usize {
        self.walk(ctx, Hook::Reset)
    }

    /// Default configuration pass over the subtree, returning the number of
    /// failures
    pub fn apply_defaults(&mut self, ctx: &CardContext) -> usize {
        self.walk(ctx, Hook::ApplyDefaults)
    }

    /// Register-base refresh over the subtree, returning the number of
    /// failures
    pub fn update_register_base(&mut self, ctx: &CardContext) -> usize {
        self.walk(ctx, Hook::UpdateRegisterBase)
    }

    /// Tears the subtree down.
    ///
    /// Attributes are disposed first, then children, then this component's
    /// own hook runs; the private state is dropped last.
    pub fn dispose(mut self, ctx: &CardContext) {
        debug!("disposing {} {}", self.code, self.name);
        {
            let access = AccessCtx::new(ctx).with_private(self.private.as_deref());
            for attr in &mut self.attributes {
                attr.dispose(&access);
            }
        }
        for child in std::mem::take(&mut self.children) {
            child.dispose(ctx);
        }
        if let Some(mut lifecycle) = self.lifecycle.take() {
            lifecycle.dispose(ctx, &mut self);
        }
        drop(self.attributes);
        drop(self.private);
    }
}

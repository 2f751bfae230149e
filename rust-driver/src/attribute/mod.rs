mod factory;
mod value;

use std::{any::Any, fmt};

use crate::{
    card::CardContext,
    error::{Error, Result},
    grw::GenericReadWrite,
};

pub use factory::AttributeFactory;
pub use value::{AttrValue, ValueType};

/// Whether an attribute configures the card or only reports state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigStatus {
    /// Writable configuration
    #[default]
    Config,
    /// Read-only status
    Status,
}

/// Identifies the kind of an attribute within its component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeCode(pub u32);

impl AttributeCode {
    /// Port or stream enabled
    pub const ACTIVE: Self = Self(0x01);
    /// Link established
    pub const LINK: Self = Self(0x02);
    /// Local loopback enabled
    pub const LOOPBACK: Self = Self(0x03);
    /// Writing true resets the unit
    pub const RESET: Self = Self(0x04);
    /// Writing true snapshots the counters
    pub const COUNTER_LATCH: Self = Self(0x05);
    /// Received frames
    pub const RX_FRAMES: Self = Self(0x06);
    /// Transmitted frames
    pub const TX_FRAMES: Self = Self(0x07);
    /// Frames dropped by the packet buffer
    pub const DROP_COUNT: Self = Self(0x08);
    /// Frames with a bad checksum
    pub const BAD_CRC_COUNT: Self = Self(0x09);
    /// Line rate selection
    pub const LINE_RATE: Self = Self(0x0a);
    /// Sensor temperature in degrees Celsius
    pub const TEMPERATURE: Self = Self(0x0b);
    /// Board supply voltage
    pub const VOLTAGE: Self = Self(0x0c);
    /// Sensor answered on the bus
    pub const SENSOR_PRESENT: Self = Self(0x0d);
    /// Firmware revision of the unit
    pub const FIRMWARE_VERSION: Self = Self(0x0e);
    /// Latched event bits
    pub const EVENT_STATUS: Self = Self(0x0f);
    /// Trigger timestamp of a TERF unit
    pub const TRIGGER_TIMESTAMP: Self = Self(0x10);

    const NAMES: [(Self, &'static str); 16] = [
        (Self::ACTIVE, "active"),
        (Self::LINK, "link"),
        (Self::LOOPBACK, "loopback"),
        (Self::RESET, "reset"),
        (Self::COUNTER_LATCH, "counter_latch"),
        (Self::RX_FRAMES, "rx_frames"),
        (Self::TX_FRAMES, "tx_frames"),
        (Self::DROP_COUNT, "drop_count"),
        (Self::BAD_CRC_COUNT, "bad_crc_count"),
        (Self::LINE_RATE, "line_rate"),
        (Self::TEMPERATURE, "temperature"),
        (Self::VOLTAGE, "voltage"),
        (Self::SENSOR_PRESENT, "sensor_present"),
        (Self::FIRMWARE_VERSION, "firmware_version"),
        (Self::EVENT_STATUS, "event_status"),
        (Self::TRIGGER_TIMESTAMP, "trigger_timestamp"),
    ];

    /// Canonical name of a well-known code
    #[must_use]
    pub fn canonical_name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|&&(code, _)| code == self)
            .map(|&(_, name)| name)
    }
}

impl fmt::Display for AttributeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "attribute {:#x}", self.0),
        }
    }
}

/// What an accessor sees of the card and of the component that owns it
#[derive(Clone, Copy)]
pub struct AccessCtx<'a> {
    /// The card the attribute belongs to
    pub card: &'a CardContext,
    private: Option<&'a (dyn Any + Send)>,
}

impl fmt::Debug for AccessCtx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCtx")
            .field("card", &self.card.model_name())
            .field("has_private", &self.private.is_some())
            .finish()
    }
}

impl<'a> AccessCtx<'a> {
    /// Context without component state
    #[must_use]
    pub fn new(card: &'a CardContext) -> Self {
        Self {
            card,
            private: None,
        }
    }

    /// Context carrying the owning component's private state
    #[must_use]
    pub fn with_private(mut self, private: Option<&'a (dyn Any + Send)>) -> Self {
        self.private = private;
        self
    }

    /// Owning component's private state, if it is a `T`
    #[must_use]
    pub fn private<T: 'static>(&self) -> Option<&'a T> {
        self.private.and_then(|p| p.downcast_ref())
    }
}

/// Reads and writes the state behind one attribute.
///
/// Only [`get`](Self::get) is required; the string forms are layered over
/// get/set and the remaining hooks do nothing by default.
pub trait ValueAccessor: Send + fmt::Debug {
    /// Performs one logical read
    ///
    /// # Errors
    /// Returns an error if the underlying state cannot be read
    fn get(&self, ctx: &AccessCtx<'_>) -> Result<AttrValue>;

    /// Writes `value`, already checked against the declared type
    ///
    /// # Errors
    /// Returns [`Error::ReadOnly`] unless the accessor supports writes
    fn set(&mut self, ctx: &AccessCtx<'_>, value: &AttrValue) -> Result<()> {
        let _ = (ctx, value);
        Err(Error::ReadOnly("attribute has no setter".into()))
    }

    /// Called once after the owning component is initialised
    ///
    /// # Errors
    /// Returns an error if the accessor cannot be prepared
    fn post_initialize(&mut self, ctx: &AccessCtx<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called once before the owning component's private state is freed
    fn dispose(&mut self, ctx: &AccessCtx<'_>) {
        let _ = ctx;
    }

    /// Text form of the current value
    ///
    /// # Errors
    /// Returns an error if the value cannot be read
    fn to_string(&self, ctx: &AccessCtx<'_>) -> Result<String> {
        self.get(ctx).map(|v| v.to_display_string())
    }

    /// Parses and writes a text value of type `value_type`
    ///
    /// # Errors
    /// Returns [`Error::Parse`] for malformed text, or the error of
    /// [`set`](Self::set)
    fn from_string(&mut self, ctx: &AccessCtx<'_>, value_type: ValueType, text: &str) -> Result<()> {
        let value = AttrValue::parse(value_type, text)?;
        self.set(ctx, &value)
    }

    /// Whether reads observe state captured by a separate latch
    fn is_latching(&self) -> bool {
        false
    }

    /// Register accessor backing this attribute, if any
    fn grw_mut(&mut self) -> Option<&mut GenericReadWrite> {
        None
    }
}

type Getter = Box<dyn Fn(&AccessCtx<'_>) -> Result<AttrValue> + Send>;
type Setter = Box<dyn FnMut(&AccessCtx<'_>, &AttrValue) -> Result<()> + Send>;
type Disposer = Box<dyn FnMut(&AccessCtx<'_>) + Send>;

/// Accessor assembled from closures, for attributes with bespoke semantics
pub struct CustomAccessor {
    get: Getter,
    set: Option<Setter>,
    dispose: Option<Disposer>,
    latching: bool,
}

impl fmt::Debug for CustomAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAccessor")
            .field("writable", &self.set.is_some())
            .field("latching", &self.latching)
            .finish_non_exhaustive()
    }
}

impl CustomAccessor {
    /// Read-only accessor
    pub fn new(get: impl Fn(&AccessCtx<'_>) -> Result<AttrValue> + Send + 'static) -> Self {
        Self {
            get: Box::new(get),
            set: None,
            dispose: None,
            latching: false,
        }
    }

    /// Adds a setter
    #[must_use]
    pub fn with_setter(
        mut self,
        set: impl FnMut(&AccessCtx<'_>, &AttrValue) -> Result<()> + Send + 'static,
    ) -> Self {
        self.set = Some(Box::new(set));
        self
    }

    /// Adds a teardown hook
    #[must_use]
    pub fn with_dispose(mut self, dispose: impl FnMut(&AccessCtx<'_>) + Send + 'static) -> Self {
        self.dispose = Some(Box::new(dispose));
        self
    }

    /// Marks reads as depending on a latch
    #[must_use]
    pub fn latching(mut self) -> Self {
        self.latching = true;
        self
    }
}

impl ValueAccessor for CustomAccessor {
    fn get(&self, ctx: &AccessCtx<'_>) -> Result<AttrValue> {
        (self.get)(ctx)
    }

    fn set(&mut self, ctx: &AccessCtx<'_>, value: &AttrValue) -> Result<()> {
        match self.set {
            Some(ref mut set) => set(ctx, value),
            None => Err(Error::ReadOnly("attribute has no setter".into())),
        }
    }

    fn dispose(&mut self, ctx: &AccessCtx<'_>) {
        if let Some(ref mut dispose) = self.dispose {
            dispose(ctx);
        }
    }

    fn is_latching(&self) -> bool {
        self.latching
    }
}

/// A typed, named value owned by a component
#[derive(Debug)]
pub struct Attribute {
    code: AttributeCode,
    name: String,
    description: String,
    value_type: ValueType,
    config_status: ConfigStatus,
    accessor: Box<dyn ValueAccessor>,
}

impl Attribute {
    /// Attribute of `value_type` served by `accessor`.
    ///
    /// Well-known codes start with their canonical name; others must be named
    /// with [`with_name`](Self::with_name) before being added to a component.
    pub fn new(
        code: AttributeCode,
        value_type: ValueType,
        accessor: impl ValueAccessor + 'static,
    ) -> Self {
        Self::from_boxed(code, value_type, Box::new(accessor))
    }

    pub(crate) fn from_boxed(
        code: AttributeCode,
        value_type: ValueType,
        accessor: Box<dyn ValueAccessor>,
    ) -> Self {
        Self {
            code,
            name: code.canonical_name().unwrap_or_default().to_owned(),
            description: String::new(),
            value_type,
            config_status: ConfigStatus::Config,
            accessor,
        }
    }

    /// Sets the name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the configuration status
    #[must_use]
    pub fn with_config_status(mut self, status: ConfigStatus) -> Self {
        self.config_status = status;
        self
    }

    /// Attribute code
    pub fn code(&self) -> AttributeCode {
        self.code
    }

    /// Name, empty if none was set
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared value type
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Configuration status
    pub fn config_status(&self) -> ConfigStatus {
        self.config_status
    }

    /// Whether reads depend on a separate latch
    pub fn is_latching(&self) -> bool {
        self.accessor.is_latching()
    }

    /// Register accessor backing this attribute, if any
    pub fn grw_mut(&mut self) -> Option<&mut GenericReadWrite> {
        self.accessor.grw_mut()
    }

    /// Reads the current value
    ///
    /// # Errors
    /// Returns the accessor's error
    pub fn get_value(&self, ctx: &AccessCtx<'_>) -> Result<AttrValue> {
        self.accessor.get(ctx)
    }

    /// Writes `value` after checking it against the declared type
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] for a value of another type, or the
    /// accessor's error
    pub fn set_value(&mut self, ctx: &AccessCtx<'_>, value: &AttrValue) -> Result<()> {
        if value.value_type() != self.value_type {
            return Err(Error::TypeMismatch {
                expected: self.value_type.name(),
                actual: value.value_type().name(),
            });
        }
        self.accessor.set(ctx, value)
    }

    /// Text form of the current value
    ///
    /// # Errors
    /// Returns the accessor's error
    pub fn to_string(&self, ctx: &AccessCtx<'_>) -> Result<String> {
        self.accessor.to_string(ctx)
    }

    /// Parses and writes a text value
    ///
    /// # Errors
    /// Returns [`Error::Parse`] for malformed text, or the accessor's error
    pub fn from_string(&mut self, ctx: &AccessCtx<'_>, text: &str) -> Result<()> {
        self.accessor.from_string(ctx, self.value_type, text)
    }

    pub(crate) fn post_initialize(&mut self, ctx: &AccessCtx<'_>) -> Result<()> {
        self.accessor.post_initialize(ctx)
    }

    pub(crate) fn dispose(&mut self, ctx: &AccessCtx<'_>) {
        self.accessor.dispose(ctx);
    }
}

/// A counter that must be latched before it is read.
///
/// Writing `true` to the latch attribute makes the hardware snapshot its
/// live counters; the counter attribute then reports that snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatchedCounterRead {
    /// Attribute that triggers the snapshot
    pub latch: AttributeCode,
    /// Attribute reporting the snapshot
    pub counter: AttributeCode,
}

impl LatchedCounterRead {
    /// Pairs `latch` with `counter`
    #[must_use]
    pub const fn new(latch: AttributeCode, counter: AttributeCode) -> Self {
        Self { latch, counter }
    }

    /// Latches, then reads the counter
    ///
    /// # Errors
    /// Returns the latch or counter accessor's error
    pub fn read(
        &self,
        ctx: &AccessCtx<'_>,
        latch: &mut Attribute,
        counter: &Attribute,
    ) -> Result<AttrValue> {
        latch.set_value(ctx, &AttrValue::Boolean(true))?;
        counter.get_value(ctx)
    }
}

//! Device capability probing
//!
//! The constant-buffer offset alignment is a platform property, not something
//! we can query portably, so it is fixed per target at build time.

/// Broad class of GPU the backend runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Desktop GPUs (macOS, discrete and integrated)
    Desktop,
    /// iOS / iPadOS devices
    Mobile,
    /// The iOS simulator, which has its own alignment rules
    Simulator,
}

impl DeviceClass {
    /// Required alignment, in bytes, of constant-buffer binding offsets.
    pub const fn constant_buffer_offset_alignment(self) -> usize {
        match self {
            Self::Desktop => 32,
            Self::Mobile => 4,
            Self::Simulator => 256,
        }
    }

    /// Device class of the build target.
    pub const fn current() -> Self {
        if cfg!(all(target_os = "ios", target_abi = "sim")) {
            Self::Simulator
        } else if cfg!(target_os = "ios") {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }
}

/// Constant-buffer offset alignment of the build target.
pub const CONSTANT_BUFFER_OFFSET_ALIGNMENT: usize =
    DeviceClass::current().constant_buffer_offset_alignment();

/// Capability probe result
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub device_class: DeviceClass,
    pub constant_buffer_offset_alignment: usize,
}

impl DeviceCapabilities {
    /// Capabilities with the alignment replaced, e.g. from settings.
    ///
    /// # Panics
    ///
    /// If `alignment` is not a power of two.
    pub fn with_constant_buffer_offset_alignment(mut self, alignment: usize) -> Self {
        assert!(
            alignment.is_power_of_two(),
            "constant buffer alignment must be a power of two, got {alignment}"
        );
        self.constant_buffer_offset_alignment = alignment;
        self
    }
}

/// Probe available rendering capabilities
pub fn probe_capabilities() -> DeviceCapabilities {
    let device_class = DeviceClass::current();
    DeviceCapabilities {
        device_class,
        constant_buffer_offset_alignment: device_class.constant_buffer_offset_alignment(),
    }
}

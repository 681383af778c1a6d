//! Generic register abstractions for type-safe register decoding

/// Trait for register layouts that can be converted to/from raw values
///
/// The same layout is used whether the value came from an MSR or from an
/// MMIO window, so conversions work on plain `u64` values.
///
/// # Example
///
/// ```ignore
/// use plctl_raw::register::RegisterLayout;
///
/// #[derive(Debug, Default)]
/// struct MyControl {
///     enable: bool,
///     threshold: u8,
/// }
///
/// impl RegisterLayout for MyControl {
///     fn to_raw(&self) -> u64 {
///         (if self.enable { 1 } else { 0 })
///             | ((self.threshold as u64) << 8)
///     }
///
///     fn from_raw(value: u64) -> Self {
///         Self {
///             enable: (value & 1) != 0,
///             threshold: ((value >> 8) & 0xFF) as u8,
///         }
///     }
/// }
/// ```
pub trait RegisterLayout: Sized {
    /// Convert this register layout to a raw register value
    fn to_raw(&self) -> u64;

    /// Parse a raw register value into this register layout
    fn from_raw(value: u64) -> Self;

    /// Validate that the register values are within acceptable ranges
    ///
    /// Returns `Ok(())` if valid, or an error message if invalid.
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

/// Extract the bit field `[high:low]` from `value`
pub const fn field(value: u64, high: u32, low: u32) -> u64 {
    let width = high - low + 1;
    if width >= 64 {
        return value >> low;
    }
    (value >> low) & ((1u64 << width) - 1)
}

/// Test a single bit
pub const fn bit(value: u64, bit: u32) -> bool {
    (value >> bit) & 1 != 0
}

//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Strongly typed target-process address
///
/// Wraps a `u64` so stack slots, code addresses and plain counts cannot be
/// mixed up. 32-bit targets store their addresses zero-extended.
///
/// ## Serialization
///
/// Addresses serialize as `0x`-prefixed lowercase hex strings so frame lists
/// stay readable in crash reports. Deserialization accepts either a hex string
/// or a plain JSON integer.
///
/// ## Example
///
/// ```rust
/// use retrace_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100;
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value in const contexts.
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// `true` for the null address.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use retrace_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Add an offset to this address, saturating at the maximum value
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
    }

    /// Distance in bytes from `lower` up to `self`, zero when `lower` is above.
    pub fn distance_from(self, lower: Address) -> u64
    {
        self.0.saturating_sub(lower.0)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

impl FromStr for Address
{
    type Err = String;

    /// Parse `0x`-prefixed hex or plain decimal.
    ///
    /// ```rust
    /// use retrace_core::types::Address;
    ///
    /// assert_eq!("0x401000".parse::<Address>(), Ok(Address::new(0x401000)));
    /// assert_eq!("4096".parse::<Address>(), Ok(Address::new(4096)));
    /// assert!("0xzz".parse::<Address>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let trimmed = s.trim();
        let parsed = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16)
        } else {
            trimmed.parse::<u64>()
        };
        parsed.map(Address).map_err(|err| format!("invalid address {s:?}: {err}"))
    }
}

impl Serialize for Address
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error>
    {
        serializer.serialize_str(&format!("0x{:x}", self.0))
    }
}

struct AddressVisitor;

impl Visitor<'_> for AddressVisitor
{
    type Value = Address;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        formatter.write_str("a hex address string or an unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Address, E>
    {
        Ok(Address(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Address, E>
    {
        u64::try_from(value)
            .map(Address)
            .map_err(|_| E::custom(format!("negative address {value}")))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Address, E>
    {
        value.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Address
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error>
    {
        deserializer.deserialize_any(AddressVisitor)
    }
}

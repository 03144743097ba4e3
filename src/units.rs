//! Physical quantities handled by the instruments and the reforming controller

use std::{
    fmt::{ self, Write },
    ops::{ Add, Sub, Mul, Div },
};
use serde::{ Deserialize, Serialize };

/// Defines a scalar prefix type for displaying units without changing the underlying value e.g.
/// "kilo-" or "milli-"
pub trait Scalar
{
    /// Return the power of 10 of this scalar
    ///
    /// For example, a prefix of "milli-" should return -3.
    fn magnitude() -> i32;

    /// Return this scalar's written shorthand notation
    ///
    /// For example, a prefix of "kilo-" should return "k"
    fn notation() -> &'static str;
}

macro_rules! impl_prefix
{
    { $name:ident, $magnitude:literal, $notation:literal } => {
        pub struct $name {}

        impl $name
        {
            pub const MAGNITUDE: i32 = $magnitude;
            pub const NOTATION: &'static str = $notation;
        }

        impl Scalar for $name
        {
            fn magnitude() -> i32
            {
                Self::MAGNITUDE
            }

            fn notation() -> &'static str
            {
                Self::NOTATION
            }
        }
    }
}

impl_prefix!{ Nano, -9, "n" }
impl_prefix!{ Micro, -6, "u" }
impl_prefix!{ Milli, -3, "m" }
impl_prefix!{ Base, 0, "" }
impl_prefix!{ Kilo, 3, "k" }

/// A quantity rendered with a scalar prefix
///
/// The precision of the formatter, if any, applies to the prefixed number: `{:.1}` of 6.27 mA
/// under `Milli` is `6.3mA`. Without a precision the shortest exact representation is written.
pub struct UnitDisplay
{
    symbol: &'static str,
    notation: &'static str,
    magnitude: i32,
    value: f64,
    hide_unit: bool,
}

impl fmt::Display for UnitDisplay
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let scaled = self.value / 10f64.powi(self.magnitude);

        if let Some(precision) = f.precision() {
            write!(f, "{:.*}", precision, scaled)?;
        }
        else {
            write!(f, "{}", scaled)?;
        }

        if self.hide_unit {
            Ok(())
        }
        else {
            f.write_str(self.notation)?;
            f.write_str(self.symbol)
        }
    }
}

/// An electrical potential in volts
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Volt
{
    value: f64,
}

/// An electrical current in amperes
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ampere
{
    value: f64,
}

/// A power in watts
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watt
{
    value: f64,
}

/// A capacitance in farads
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Farad
{
    value: f64,
}

macro_rules! impl_unit
{
    { $u:ident, $symbol:literal } => {
        impl $u
        {
            /// The written shorthand symbol
            pub const SYMBOL: &'static str = $symbol;

            pub const ZERO: Self = Self { value: 0.0 };

            /// Constructs a new value from a number of base units
            pub const fn new(value: f64) -> Self
            {
                Self { value: value }
            }

            /// Constructs a new value from a number expressed with the given scalar
            ///
            /// For example, 6 mA is `Ampere::from::<Milli>(6.0)`
            pub fn from<S: Scalar>(num: f64) -> Self
            {
                Self { value: num * 10f64.powi(S::magnitude()) }
            }

            /// The value in base units
            pub fn value(&self) -> f64
            {
                self.value
            }

            /// The value expressed with the given scalar
            pub fn as_f64<S: Scalar>(&self) -> f64
            {
                self.value / 10f64.powi(S::magnitude())
            }

            pub fn abs(self) -> Self
            {
                Self { value: self.value.abs() }
            }

            pub fn is_finite(&self) -> bool
            {
                self.value.is_finite()
            }

            /// Returns the smaller of two values
            pub fn min(self, other: Self) -> Self
            {
                Self { value: self.value.min(other.value) }
            }

            /// Displays the unit with a given scalar prefix
            pub fn display<S: Scalar>(&self) -> UnitDisplay
            {
                UnitDisplay {
                    symbol: Self::SYMBOL,
                    notation: S::notation(),
                    magnitude: S::magnitude(),
                    value: self.value,
                    hide_unit: false,
                }
            }

            /// Displays the unit with a given scalar prefix but hides the symbol and prefix in the
            /// output
            pub fn display_anon<S: Scalar>(&self) -> UnitDisplay
            {
                UnitDisplay {
                    symbol: Self::SYMBOL,
                    notation: S::notation(),
                    magnitude: S::magnitude(),
                    value: self.value,
                    hide_unit: true,
                }
            }

            /// Displays the unit with no scalar prefix and with its symbol
            pub fn display_base(&self) -> UnitDisplay
            {
                self.display::<Base>()
            }

            /// Displays the unit with no scalar prefix and hides the symbol in the output
            pub fn display_anon_base(&self) -> UnitDisplay
            {
                self.display_anon::<Base>()
            }
        }

        impl fmt::Display for $u
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
            {
                fmt::Display::fmt(&self.display_base(), f)
            }
        }

        impl Add for $u
        {
            type Output = Self;

            fn add(self, rhs: Self) -> Self
            {
                Self { value: self.value + rhs.value }
            }
        }

        impl Sub for $u
        {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self
            {
                Self { value: self.value - rhs.value }
            }
        }

        impl Mul<f64> for $u
        {
            type Output = Self;

            fn mul(self, rhs: f64) -> Self
            {
                Self { value: self.value * rhs }
            }
        }

        impl Div<f64> for $u
        {
            type Output = Self;

            fn div(self, rhs: f64) -> Self
            {
                Self { value: self.value / rhs }
            }
        }
    }
}

impl_unit!{ Volt, "V" }
impl_unit!{ Ampere, "A" }
impl_unit!{ Watt, "W" }
impl_unit!{ Farad, "F" }

impl Div<Volt> for Watt
{
    type Output = Ampere;

    fn div(self, rhs: Volt) -> Ampere
    {
        Ampere::new(self.value / rhs.value)
    }
}

impl Mul<Ampere> for Volt
{
    type Output = Watt;

    fn mul(self, rhs: Ampere) -> Watt
    {
        Watt::new(self.value * rhs.value)
    }
}

/// Constructs a quantity, optionally with a scalar prefix
///
/// `val!(0.5, Volt)` or `val!(6.0, Milli Ampere)`
#[macro_export]
macro_rules! val
{
    ( $num:expr, $u:ident ) => {
        $crate::units::$u::new($num)
    };
    ( $num:expr, $prefix:ident $u:ident ) => {
        $crate::units::$u::from::<$crate::units::$prefix>($num)
    };
}

/// Displays a quantity with its symbol, optionally with a scalar prefix
#[macro_export]
macro_rules! view
{
    ( $u:expr ) => {
        $u.display_base()
    };
    ( $u:expr, $prefix:ident ) => {
        $u.display::<$crate::units::$prefix>()
    };
}

/// Displays the number of a quantity only, optionally with a scalar prefix
#[macro_export]
macro_rules! view_anon
{
    ( $u:expr ) => {
        $u.display_anon_base()
    };
    ( $u:expr, $prefix:ident ) => {
        $u.display_anon::<$crate::units::$prefix>()
    };
}

/// Writes a number the way SCPI instruments expect it: plain decimal, no unit, no exponent
///
/// The shortest decimal that reads back as the same `f64` is written, so small setpoints reach the
/// instrument unrounded.
pub(crate) fn write_scpi_number(f: &mut impl Write, value: f64) -> fmt::Result
{
    if value == 0.0 {
        f.write_char('0')
    }
    else {
        write!(f, "{}", value)
    }
}

//! **A**synchronous-Rust **R**emote **C**ontrol for **S**upply-driven capacitor **reform**ing
//!
//! Reforming slowly re-grows the oxide dielectric of a capacitor that has sat unused. The supply
//! walks the voltage up in small steps while the current limit keeps the delivered power within
//! the capacitor's budget, and each step waits until the leakage current has dropped.
//!
//! ```no_run
//! use arcs_reform::{ Capacitor, Reformer, ReformSettings, devices, resource::Resource, val };
//!
//! # async fn reform() -> arcs_reform::Result<()> {
//! let resource: Resource = "ASRL/dev/ttyUSB0".parse()?;
//! let supply = devices::open_power_supply(&resource, &Default::default(), false).await?;
//!
//! let capacitor = Capacitor::new(
//!     val!(23_000.0, Micro Farad),
//!     val!(18.0, Volt),
//!     val!(6.0, Milli Ampere),
//!     val!(150.0, Milli Watt),
//! )?;
//!
//! let mut reformer = Reformer::new(supply, capacitor, ReformSettings::default())?;
//! let report = reformer.run().await?;
//! println!("reformed to {} in {} steps", report.final_voltage, report.steps);
//! # Ok(())
//! # }
//! ```
//!
//! Instruments are reached through the [`PowerSource`] and [`Meter`] traits, so any supply can be
//! driven by implementing them. SCPI drivers for serial instruments live in [`devices`].

#[macro_use]
pub mod units;
pub mod error;
pub mod cmd;
pub mod executor;
pub mod resource;
pub mod capability;
pub mod devices;
pub mod capacitor;
pub mod reform;
pub mod config;

pub use capability::{ Meter, NoMeter, PowerSource };
pub use capacitor::Capacitor;
pub use error::{ CommError, Error, Result };
pub use reform::{ MeterRole, ReformReport, ReformSettings, Reformer, Session };
pub use units::{ Ampere, Farad, Volt, Watt };

//! Capacitor reforming control
//!
//! Reforming re-grows the oxide dielectric of an electrolytic capacitor by walking the applied
//! voltage up in small steps. At each step the supply's current limit is set so the delivered
//! power never exceeds the capacitor's power limit, and the next step is only taken once the
//! terminal voltage has reached the setpoint and the leakage current has fallen below the
//! capacitor's threshold.
//!
//! ```text
//!  prepare ──► advance ──► wait ──► read back ──► settled? ──no──► wait ...
//!                            ▲                       │yes
//!                            └──────── advance ◄─────┘
//!                                         │ at rated voltage
//!                                         ▼
//!                                      shutdown
//! ```
//!
//! The shutdown sequence runs on every exit path: normal completion, an instrument error, an
//! expired settle wait, or a stop signal.

use std::{
    future::Future,
    pin::Pin,
    time::Duration,
};
use serde::{ Deserialize, Serialize };
use tokio::time::Instant;
use tracing::{ debug, info, warn };
use crate::{
    capability::{ Meter, NoMeter, PowerSource },
    capacitor::Capacitor,
    error::{ Error, Result },
    units::{ Ampere, Milli, Volt },
};

/// What the meter's readings are used for, when a meter is attached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterRole
{
    /// Readings are logged next to the supply's readbacks and never affect a decision
    #[default]
    Advisory,
    /// Readings replace the supply's readbacks in the settle test
    Authoritative,
}

/// Session constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReformSettings
{
    /// Voltage increment per advancement
    pub voltage_step: Volt,
    /// Largest distance between readback and setpoint that still counts as "at voltage"
    pub voltage_tolerance: Volt,
    /// Current limit applied before the first step, while the setpoint is still zero
    pub initial_current_limit: Ampere,
    /// Time between readbacks
    #[serde(with = "crate::config::seconds")]
    pub poll_interval: Duration,
    /// Pause after writing a setpoint during preparation
    #[serde(with = "crate::config::seconds")]
    pub setpoint_delay: Duration,
    /// Pause after switching the output, on the way up and on the way down
    #[serde(with = "crate::config::seconds")]
    pub output_delay: Duration,
    /// Longest a single step may stay unsettled before the session is abandoned
    ///
    /// `None` polls forever, which will never finish on a capacitor that cannot get its leakage
    /// down at some voltage.
    #[serde(with = "crate::config::optional_seconds")]
    pub max_settle_wait: Option<Duration>,
    #[serde(skip)]
    pub meter_role: MeterRole,
}

impl Default for ReformSettings
{
    fn default() -> Self
    {
        Self {
            voltage_step: Volt::new(0.5),
            voltage_tolerance: Volt::new(0.05),
            initial_current_limit: Ampere::new(0.1),
            poll_interval: Duration::from_secs(1),
            setpoint_delay: Duration::from_millis(200),
            output_delay: Duration::from_millis(500),
            max_settle_wait: None,
            meter_role: MeterRole::Advisory,
        }
    }
}

impl ReformSettings
{
    pub fn validate(&self) -> Result<()>
    {
        if !(self.voltage_step.is_finite() && self.voltage_step > Volt::ZERO) {
            return Err(Error::InvalidSettings("voltage step must be a positive number of volts"));
        }
        if !(self.voltage_tolerance.is_finite() && self.voltage_tolerance > Volt::ZERO) {
            return Err(Error::InvalidSettings("voltage tolerance must be a positive number of volts"));
        }
        if !(self.initial_current_limit.is_finite() && self.initial_current_limit > Ampere::ZERO) {
            return Err(Error::InvalidSettings("initial current limit must be a positive number of amperes"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidSettings("poll interval must be longer than zero"));
        }
        if self.max_settle_wait.is_some_and(|wait| wait.is_zero()) {
            return Err(Error::InvalidSettings("maximum settle wait must be longer than zero"));
        }

        Ok(())
    }
}

/// Most advancements a session may take to reach the rated voltage
pub const MAX_STEPS: u32 = 100_000;

/// Number of advancements from zero to the rated voltage
///
/// Fails when the voltage step is so small relative to the rating that the session would exceed
/// [`MAX_STEPS`].
pub fn step_count(capacitor: &Capacitor, settings: &ReformSettings) -> Result<u32>
{
    let steps = (capacitor.rated_voltage.value() / settings.voltage_step.value()).ceil();

    if steps <= f64::from(MAX_STEPS) {
        Ok(steps as u32)
    }
    else {
        Err(Error::InvalidSettings("voltage step is too small for the rated voltage"))
    }
}

/// Setpoint state of one reforming session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Session
{
    steps: u32,
    voltage_limit: Volt,
    voltage_step: Volt,
    current_limit: Ampere,
}

impl Session
{
    /// A session at zero volts with the fixed floor current limit
    pub fn start(voltage_step: Volt, initial_current_limit: Ampere) -> Self
    {
        Self {
            steps: 0,
            voltage_limit: Volt::ZERO,
            voltage_step: voltage_step,
            current_limit: initial_current_limit,
        }
    }

    pub fn voltage_limit(&self) -> Volt
    {
        self.voltage_limit
    }

    pub fn voltage_step(&self) -> Volt
    {
        self.voltage_step
    }

    pub fn current_limit(&self) -> Ampere
    {
        self.current_limit
    }

    /// Number of advancements taken so far
    pub fn steps(&self) -> u32
    {
        self.steps
    }

    /// Moves the setpoint one step closer to the rated voltage
    ///
    /// Returns the new voltage and current limits, or `None` once the rated voltage has been
    /// reached. The voltage is computed as a multiple of the step rather than a running sum so
    /// rounding does not accumulate, and lands exactly on the rated voltage at the end.
    pub fn advance(&mut self, capacitor: &Capacitor) -> Option<(Volt, Ampere)>
    {
        let rated = capacitor.rated_voltage;

        if self.voltage_limit >= rated {
            return None;
        }

        let steps = self.steps.saturating_add(1);
        let mut next = (self.voltage_step * f64::from(steps)).min(rated);
        // within rounding of the rating
        if (rated - next).value() <= rated.value() * 1e-12 {
            next = rated;
        }

        self.steps = steps;
        self.voltage_limit = next;
        self.current_limit = capacitor.current_limit_at(next);

        Some((self.voltage_limit, self.current_limit))
    }
}

/// The full sequence of voltage and current limits a session would step through
pub fn plan(capacitor: &Capacitor, settings: &ReformSettings) -> impl Iterator<Item = (Volt, Ampere)>
{
    let capacitor = *capacitor;
    let mut session = Session::start(settings.voltage_step, settings.initial_current_limit);

    std::iter::from_fn(move || session.advance(&capacitor))
}

/// Whether a step is done: the terminal voltage is at the setpoint and the leakage is low enough
///
/// Both must hold. A capacitor sitting at the right voltage while still drawing heavy current has
/// not settled.
pub fn is_settled(
    voltage: Volt,
    current: Ampere,
    voltage_limit: Volt,
    capacitor: &Capacitor,
    tolerance: Volt,
)
    -> bool
{
    (voltage - voltage_limit).abs() < tolerance && current < capacitor.max_leakage_current
}

/// Summary of a completed session
#[derive(Debug, Clone, PartialEq)]
pub struct ReformReport
{
    pub final_voltage: Volt,
    pub steps: u32,
    pub elapsed: Duration,
}

/// Drives a power source through a reforming session
pub struct Reformer<P, M = NoMeter>
{
    source: P,
    meter: Option<M>,
    capacitor: Capacitor,
    settings: ReformSettings,
    session: Session,
}

impl <P: PowerSource> Reformer<P>
{
    pub fn new(source: P, capacitor: Capacitor, settings: ReformSettings) -> Result<Self>
    {
        capacitor.validate()?;
        settings.validate()?;
        step_count(&capacitor, &settings)?;

        Ok(Self {
            source: source,
            meter: None,
            session: Session::start(settings.voltage_step, settings.initial_current_limit),
            capacitor: capacitor,
            settings: settings,
        })
    }
}

impl <P: PowerSource, M: Meter> Reformer<P, M>
{
    /// Attach an independent meter
    ///
    /// How its readings are used is set by [`ReformSettings::meter_role`].
    pub fn with_meter<N: Meter>(self, meter: N) -> Reformer<P, N>
    {
        Reformer {
            source: self.source,
            meter: Some(meter),
            capacitor: self.capacitor,
            settings: self.settings,
            session: self.session,
        }
    }

    pub fn capacitor(&self) -> &Capacitor
    {
        &self.capacitor
    }

    pub fn settings(&self) -> &ReformSettings
    {
        &self.settings
    }

    pub fn session(&self) -> &Session
    {
        &self.session
    }

    /// Give back the instruments
    pub fn into_parts(self) -> (P, Option<M>)
    {
        (self.source, self.meter)
    }

    /// Whether the given readings settle the current step
    pub fn is_settled(&self, voltage: Volt, current: Ampere) -> bool
    {
        is_settled(
            voltage,
            current,
            self.session.voltage_limit(),
            &self.capacitor,
            self.settings.voltage_tolerance,
        )
    }

    /// Advance the setpoint by one step and send the new limits to the source
    ///
    /// Returns `false` without touching the source once the rated voltage has been reached. The
    /// voltage limit is written before the current limit; if the second write fails the source is
    /// left at the new voltage with the previous current limit.
    pub async fn advance_step(&mut self) -> Result<bool>
    {
        let (voltage_limit, current_limit) = match self.session.advance(&self.capacitor) {
            Some(limits) => limits,
            None => return Ok(false),
        };

        info!("stepping to {}, current limit {:.3}", voltage_limit, current_limit.display::<Milli>());
        self.source.set_voltage_limit(voltage_limit).await?;
        self.source.set_current_limit(current_limit).await?;

        Ok(true)
    }

    /// Reform the capacitor up to its rated voltage
    ///
    /// Runs until the rated voltage is reached and settled, or until an error. The source is shut
    /// down in either case.
    pub async fn run(&mut self) -> Result<ReformReport>
    {
        self.run_until(std::future::pending()).await
    }

    /// Like [`run`](Self::run), but ends the session with [`Error::Interrupted`] once `stop`
    /// completes
    ///
    /// `stop` is only observed while the controller is waiting, never in the middle of an
    /// instrument transaction, and the shutdown sequence still runs afterwards.
    pub async fn run_until<F>(&mut self, stop: F) -> Result<ReformReport>
        where F: Future<Output = ()>
    {
        let started = Instant::now();
        tokio::pin!(stop);

        let outcome = self.reform(stop.as_mut()).await;
        let shutdown = self.shutdown().await;

        match (outcome, shutdown) {
            (Ok(steps), Ok(())) => Ok(ReformReport {
                final_voltage: self.session.voltage_limit(),
                steps: steps,
                elapsed: started.elapsed(),
            }),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(shutdown_err)) => {
                warn!(error = %shutdown_err, "shutdown after failure was incomplete");
                Err(err)
            },
        }
    }

    async fn reform<F>(&mut self, mut stop: Pin<&mut F>) -> Result<u32>
        where F: Future<Output = ()>
    {
        let settings = self.settings.clone();

        self.source.set_remote(true).await?;
        self.source.set_voltage_limit(Volt::ZERO).await?;
        pause(settings.setpoint_delay, stop.as_mut()).await?;
        self.source.set_current_limit(settings.initial_current_limit).await?;
        pause(settings.setpoint_delay, stop.as_mut()).await?;
        self.source.set_output_enable(true).await?;
        pause(settings.output_delay, stop.as_mut()).await?;

        self.session = Session::start(settings.voltage_step, settings.initial_current_limit);
        self.advance_step().await?;
        let mut step_started = Instant::now();

        loop {
            pause(settings.poll_interval, stop.as_mut()).await?;
            let (voltage, current) = self.read_back().await?;

            if self.is_settled(voltage, current) {
                if !self.advance_step().await? {
                    break;
                }
                step_started = Instant::now();
            }
            else if let Some(limit) = settings.max_settle_wait {
                let waited = step_started.elapsed();

                if waited >= limit {
                    return Err(Error::SettleTimeout {
                        voltage: self.session.voltage_limit(),
                        waited: waited,
                    });
                }
            }
        }

        info!(steps = self.session.steps(), "reached rated voltage {}", self.session.voltage_limit());
        Ok(self.session.steps())
    }

    /// Reads the values the settle test is run on
    async fn read_back(&mut self) -> Result<(Volt, Ampere)>
    {
        let voltage = self.source.measure_voltage().await?;
        let current = self.source.measure_current().await?;
        debug!("readback {} {:.4}", voltage, current.display::<Milli>());

        let meter = match self.meter.as_mut() {
            Some(meter) => meter,
            None => return Ok((voltage, current)),
        };

        match self.settings.meter_role {
            MeterRole::Advisory => {
                match read_meter(meter).await {
                    Ok((meter_voltage, meter_current)) => {
                        debug!("meter {} {:.4}", meter_voltage, meter_current.display::<Milli>());
                    },
                    Err(err) => warn!(error = %err, "meter reading failed"),
                }

                Ok((voltage, current))
            },
            MeterRole::Authoritative => {
                let (meter_voltage, meter_current) = read_meter(meter).await?;
                debug!("meter {} {:.4}", meter_voltage, meter_current.display::<Milli>());

                Ok((meter_voltage, meter_current))
            },
        }
    }

    /// Switches the output off and returns the source to a safe, local state
    ///
    /// Every step is attempted even if an earlier one fails; the first failure is returned.
    async fn shutdown(&mut self) -> Result<()>
    {
        info!("shutting down");
        let mut first_err = None;

        keep_first(&mut first_err, self.source.set_output_enable(false).await);
        tokio::time::sleep(self.settings.output_delay).await;
        keep_first(&mut first_err, self.source.set_voltage_limit(Volt::ZERO).await);
        keep_first(&mut first_err, self.source.set_current_limit(Ampere::ZERO).await);
        keep_first(&mut first_err, self.source.set_remote(false).await);

        match first_err {
            Some(err) => Err(err),
            None => {
                info!("done");
                Ok(())
            },
        }
    }
}

async fn read_meter<M: Meter>(meter: &mut M) -> Result<(Volt, Ampere)>
{
    let voltage = meter.measure_voltage().await?;
    let current = meter.measure_current().await?;

    Ok((voltage, current))
}

/// Waits for the given time unless `stop` completes first
async fn pause<F>(duration: Duration, stop: Pin<&mut F>) -> Result<()>
    where F: Future<Output = ()>
{
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = stop => Err(Error::Interrupted),
    }
}

fn keep_first(slot: &mut Option<Error>, result: Result<()>)
{
    if let Err(err) = result {
        warn!(error = %err, "shutdown step failed");

        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

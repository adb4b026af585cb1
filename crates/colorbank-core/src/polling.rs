//! Polling engine
//!
//! One poll cycle visits every slot in order. Each slot is (re)initialized
//! lazily through [`ColorSensor::prepare`]; a change of its presence is
//! reported once, and a measurement is reported only when the device had a
//! new conversion ready. Slots are independent: an absent or failing device
//! never stops the cycle from reaching the others.

use embedded_hal::delay::DelayNs;
use log::{debug, info};

use crate::bus::{BusKind, Transport};
use crate::sensors::{ColorSensor, Measurement, SensorError};

/// Most slots a bank can hold.
pub const MAX_SLOTS: usize = 6;

/// Something the operator should hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    PresenceChanged { slot: usize, present: bool },
    Measurement { slot: usize, measurement: Measurement },
    /// The slot could not be brought up this cycle.
    ProbeFailed { slot: usize, error: SensorError },
}

/// One configured sensor with its indicator LED.
pub struct Slot<T, L> {
    pub sensor: ColorSensor<T>,
    pub led: Option<L>,
    pub bus: BusKind,
    reported_present: bool,
}

impl<T: Transport, L> Slot<T, L> {
    pub fn new(sensor: ColorSensor<T>, bus: BusKind, led: Option<L>) -> Self {
        Self {
            sensor,
            led,
            bus,
            reported_present: false,
        }
    }

    /// Presence as last announced to the operator.
    pub fn reported_present(&self) -> bool {
        self.reported_present
    }

    /// Run this slot's part of a poll cycle.
    pub fn poll<D: DelayNs>(
        &mut self,
        index: usize,
        delay: &mut D,
        verbose: bool,
        emit: &mut impl FnMut(SlotEvent),
    ) {
        let present = match self.sensor.prepare(delay) {
            Ok(()) => true,
            Err(error) => {
                if verbose {
                    emit(SlotEvent::ProbeFailed { slot: index, error });
                }
                false
            }
        };

        if present != self.reported_present {
            self.reported_present = present;
            info!(
                "slot {} ({} on {} bus): {}",
                index,
                self.sensor.family().name,
                self.bus.label(),
                if present { "present" } else { "gone" }
            );
            emit(SlotEvent::PresenceChanged {
                slot: index,
                present,
            });
        }

        if !present {
            return;
        }

        match self.sensor.read_measurement() {
            Ok(Some(measurement)) => emit(SlotEvent::Measurement {
                slot: index,
                measurement,
            }),
            Ok(None) => {}
            Err(err) => debug!("slot {}: measurement skipped: {}", index, err),
        }
    }
}

/// Poll every slot once.
pub fn poll_cycle<T, L, D>(
    slots: &mut [Slot<T, L>],
    delay: &mut D,
    verbose: bool,
    mut emit: impl FnMut(SlotEvent),
) where
    T: Transport,
    D: DelayNs,
{
    for (index, slot) in slots.iter_mut().enumerate() {
        slot.poll(index, delay, verbose, &mut emit);
    }
}

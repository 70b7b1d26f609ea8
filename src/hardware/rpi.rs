// src/hardware/rpi.rs - Raspberry Pi GPIO binding (feature "rpi")
//
// Encoder pins fire on both edges into `EncoderTrack::on_edge`; this is the only
// place pin numbers are mapped onto axes. Servos use software PWM.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};

use crate::config::PinConfig;
use super::{Actuators, Axis, ChannelLevels, EdgeClock, EncoderTrack, HardwareError, Joint};

const SERVO_PERIOD: Duration = Duration::from_millis(20);
const NEUTRAL_US: i64 = 1500;
const US_PER_SPEED_UNIT: i64 = 10;

impl From<rppal::gpio::Error> for HardwareError {
    fn from(e: rppal::gpio::Error) -> Self {
        HardwareError::Gpio(e.to_string())
    }
}

/// Pulse width for a continuous-rotation servo at signed `speed`.
pub fn speed_pulse_us(speed: i32) -> u64 {
    let speed = i64::from(speed.clamp(-100, 100));
    (NEUTRAL_US + US_PER_SPEED_UNIT * speed) as u64
}

/// Pulse width for the positional claw servo at `angle_deg`.
pub fn claw_pulse_us(angle_deg: i32) -> u64 {
    let angle = u64::from(angle_deg.clamp(0, 180).unsigned_abs());
    500 + angle * 2000 / 180
}

/// Latest levels of one encoder's A/B pins, written from interrupt callbacks.
#[derive(Debug, Default)]
struct PinLevels {
    a: AtomicBool,
    b: AtomicBool,
}

impl PinLevels {
    fn snapshot(&self) -> ChannelLevels {
        ChannelLevels::new(self.a.load(Ordering::Acquire), self.b.load(Ordering::Acquire))
    }
}

pub struct RpiArm {
    step: OutputPin,
    dir: OutputPin,
    base: [OutputPin; 2],
    elbow: OutputPin,
    claw: OutputPin,
    elbow_inverted: bool,
    // Dropping an input pin cancels its interrupt.
    _encoder_pins: Vec<InputPin>,
}

impl RpiArm {
    pub fn new(pins: &PinConfig, tracks: Arc<EncoderTrack>) -> Result<Self, HardwareError> {
        let gpio = Gpio::new()?;
        let clock = EdgeClock::new();
        let mut encoder_pins = Vec::with_capacity(8);
        for (axis, [pin_a, pin_b]) in [
            (Axis::Vertical, pins.encoder_stepper),
            (Axis::Base, pins.encoder_base),
            (Axis::Elbow, pins.encoder_elbow),
            (Axis::Claw, pins.encoder_claw),
        ] {
            let levels = Arc::new(PinLevels::default());
            let mut a = gpio.get(pin_a)?.into_input();
            let mut b = gpio.get(pin_b)?.into_input();
            levels.a.store(a.is_high(), Ordering::Release);
            levels.b.store(b.is_high(), Ordering::Release);

            for (pin, is_a) in [(&mut a, true), (&mut b, false)] {
                let levels = levels.clone();
                let tracks = tracks.clone();
                pin.set_async_interrupt(Trigger::Both, move |level: Level| {
                    let high = level == Level::High;
                    if is_a {
                        levels.a.store(high, Ordering::Release);
                    } else {
                        levels.b.store(high, Ordering::Release);
                    }
                    tracks.on_edge(axis, clock.now_us(), || levels.snapshot());
                })?;
            }
            tracing::info!("Encoder {:?} on GPIO {}/{}", axis, pin_a, pin_b);
            encoder_pins.push(a);
            encoder_pins.push(b);
        }

        let arm = Self {
            step: gpio.get(pins.step)?.into_output_low(),
            dir: gpio.get(pins.dir)?.into_output_low(),
            base: [
                gpio.get(pins.base_servos[0])?.into_output(),
                gpio.get(pins.base_servos[1])?.into_output(),
            ],
            elbow: gpio.get(pins.elbow_servo)?.into_output(),
            claw: gpio.get(pins.claw_servo)?.into_output(),
            elbow_inverted: pins.elbow_inverted,
            _encoder_pins: encoder_pins,
        };
        tracing::info!("Raspberry Pi GPIO backend ready");
        Ok(arm)
    }
}

fn set_pulse(pin: &mut OutputPin, pulse_us: u64) -> Result<(), HardwareError> {
    pin.set_pwm(SERVO_PERIOD, Duration::from_micros(pulse_us))?;
    Ok(())
}

impl Actuators for RpiArm {
    fn set_joint_speed(&mut self, joint: Joint, speed: i32) -> Result<(), HardwareError> {
        match joint {
            Joint::Base => {
                // Both base servos drive the same joint.
                for pin in self.base.iter_mut() {
                    set_pulse(pin, speed_pulse_us(speed))?;
                }
            }
            Joint::Elbow => {
                let speed = if self.elbow_inverted { -speed } else { speed };
                set_pulse(&mut self.elbow, speed_pulse_us(speed))?;
            }
        }
        Ok(())
    }

    fn set_claw_angle(&mut self, angle_deg: i32) -> Result<(), HardwareError> {
        set_pulse(&mut self.claw, claw_pulse_us(angle_deg))
    }

    fn set_step_direction(&mut self, up: bool) -> Result<(), HardwareError> {
        self.dir.write(if up { Level::High } else { Level::Low });
        Ok(())
    }

    fn set_step_level(&mut self, high: bool) -> Result<(), HardwareError> {
        self.step.write(if high { Level::High } else { Level::Low });
        Ok(())
    }

    fn stop_all(&mut self) -> Result<(), HardwareError> {
        for pin in self.base.iter_mut() {
            set_pulse(pin, speed_pulse_us(0))?;
        }
        set_pulse(&mut self.elbow, speed_pulse_us(0))?;
        self.claw.clear_pwm()?;
        self.step.set_low();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_widths() {
        assert_eq!(speed_pulse_us(0), 1500);
        assert_eq!(speed_pulse_us(100), 2500);
        assert_eq!(speed_pulse_us(-30), 1200);
        assert_eq!(speed_pulse_us(500), 2500);
        assert_eq!(claw_pulse_us(0), 500);
        assert_eq!(claw_pulse_us(90), 1500);
        assert_eq!(claw_pulse_us(180), 2500);
    }
}

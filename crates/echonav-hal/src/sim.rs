//! In-process simulated drivers for tests and the demo CLI.
//!
//! Every simulated driver is a cheap `Clone` around shared state: box one
//! clone into the system under test and keep another to steer the
//! simulation (move obstacles, change the yaw rate, inject faults) and to
//! assert on what the system did.
//!
//! [`SimGpio`] runs on a virtual microsecond clock.  Each
//! [`GpioBus::read_input`] advances the clock by a fixed poll cost and each
//! [`GpioBus::delay`] advances it by the requested duration, so echo timing
//! is exact and tests never sleep for real.  [`SimGpio::set_paced`] makes
//! the bus also sleep for the virtual time it consumes, for tests that need
//! real-time sweeps.
//!
//! # Example
//!
//! ```rust
//! use echonav_hal::sim::SimRig;
//! use echonav_types::CarCorner;
//!
//! let rig = SimRig::new().with_obstacle(CarCorner::BackLeft, 25.0);
//! let ctx = rig.context();
//! assert!(!ctx.is_released());
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use echonav_types::{CarCorner, NavError};
use parking_lot::Mutex;

use crate::audio::{AudioSink, Tone};
use crate::context::HardwareContext;
use crate::display::{DisplayDriver, Pattern};
use crate::gpio::{GpioBus, Level};
use crate::gyro::Gyroscope;

/// Delay between the trigger falling edge and the echo rising edge.
const ECHO_LEAD_US: u64 = 200;

/// Half the speed of sound in cm/s (the echo covers the distance twice).
const HALF_SPEED_CM_PER_S: f64 = 17_150.0;

// ────────────────────────────────────────────────────────────────────────────
// Simulated GPIO
// ────────────────────────────────────────────────────────────────────────────

struct GpioState {
    clock_us: u64,
    poll_cost_us: u64,
    paced: bool,
    outputs: HashMap<u8, Level>,
    inputs: HashSet<u8>,
    obstacles: HashMap<CarCorner, f64>,
    scripts: HashMap<CarCorner, VecDeque<Option<f64>>>,
    /// Active echo window per echo pin: `[start, end)` in virtual µs.
    echoes: HashMap<u8, (u64, u64)>,
    faulty: HashSet<u8>,
    triggers: HashMap<CarCorner, usize>,
    release_count: usize,
}

impl Default for GpioState {
    fn default() -> Self {
        Self {
            clock_us: 0,
            poll_cost_us: 1,
            paced: false,
            outputs: HashMap::new(),
            inputs: HashSet::new(),
            obstacles: HashMap::new(),
            scripts: HashMap::new(),
            echoes: HashMap::new(),
            faulty: HashSet::new(),
            triggers: HashMap::new(),
            release_count: 0,
        }
    }
}

impl GpioState {
    fn check_pin(&self, pin: u8) -> Result<(), NavError> {
        if self.faulty.contains(&pin) {
            return Err(NavError::hardware(format!("gpio pin {pin}"), "simulated fault"));
        }
        Ok(())
    }

    /// Schedule the echo for the ranger whose trigger just fell.
    fn fire(&mut self, corner: CarCorner) {
        *self.triggers.entry(corner).or_default() += 1;
        let distance = match self.scripts.get_mut(&corner).and_then(VecDeque::pop_front) {
            Some(scripted) => scripted,
            None => self.obstacles.get(&corner).copied(),
        };
        let echo_pin = corner.echo_pin();
        match distance {
            Some(cm) if cm >= 0.0 => {
                let round_trip = (cm / HALF_SPEED_CM_PER_S * 1e6).round() as u64;
                let start = self.clock_us + ECHO_LEAD_US;
                self.echoes.insert(echo_pin, (start, start + round_trip));
            }
            _ => {
                self.echoes.remove(&echo_pin);
            }
        }
    }
}

/// Simulated GPIO bus with one virtual ultrasonic ranger per [`CarCorner`].
///
/// A corner with no obstacle never answers, which the ranger sees as a
/// timeout.
#[derive(Clone, Default)]
pub struct SimGpio {
    state: Arc<Mutex<GpioState>>,
}

impl SimGpio {
    /// Create a bus with no obstacles and a 1 µs poll cost.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place (or with `None`, remove) a static obstacle in front of `corner`.
    pub fn set_obstacle(&self, corner: CarCorner, distance_cm: Option<f64>) {
        let mut state = self.state.lock();
        match distance_cm {
            Some(cm) => {
                state.obstacles.insert(corner, cm);
            }
            None => {
                state.obstacles.remove(&corner);
            }
        }
    }

    /// Queue per-pulse distances for `corner`.  Each trigger consumes one
    /// entry (`None` = no echo) before falling back to the static obstacle.
    pub fn script(&self, corner: CarCorner, distances: impl IntoIterator<Item = Option<f64>>) {
        self.state
            .lock()
            .scripts
            .entry(corner)
            .or_default()
            .extend(distances);
    }

    /// Make every access to `pin` fail until [`heal_pin`](Self::heal_pin).
    pub fn fail_pin(&self, pin: u8) {
        self.state.lock().faulty.insert(pin);
    }

    /// Undo [`fail_pin`](Self::fail_pin).
    pub fn heal_pin(&self, pin: u8) {
        self.state.lock().faulty.remove(&pin);
    }

    /// Virtual time consumed by each input read.
    pub fn set_poll_cost(&self, micros: u64) {
        self.state.lock().poll_cost_us = micros.max(1);
    }

    /// Sleep for real whenever the virtual clock advances.
    pub fn set_paced(&self, paced: bool) {
        self.state.lock().paced = paced;
    }

    /// Number of trigger pulses emitted on `corner`.
    pub fn triggers(&self, corner: CarCorner) -> usize {
        self.state.lock().triggers.get(&corner).copied().unwrap_or(0)
    }

    /// Number of times the bus has been released.
    pub fn release_count(&self) -> usize {
        self.state.lock().release_count
    }
}

impl GpioBus for SimGpio {
    fn setup_output(&mut self, pin: u8) -> Result<(), NavError> {
        let mut state = self.state.lock();
        state.check_pin(pin)?;
        state.inputs.remove(&pin);
        state.outputs.insert(pin, Level::Low);
        Ok(())
    }

    fn setup_input(&mut self, pin: u8) -> Result<(), NavError> {
        let mut state = self.state.lock();
        state.check_pin(pin)?;
        state.outputs.remove(&pin);
        state.inputs.insert(pin);
        Ok(())
    }

    fn set_output(&mut self, pin: u8, level: Level) -> Result<(), NavError> {
        let mut state = self.state.lock();
        state.check_pin(pin)?;
        let previous = match state.outputs.get_mut(&pin) {
            Some(current) => std::mem::replace(current, level),
            None => {
                return Err(NavError::hardware(
                    format!("gpio pin {pin}"),
                    "pin is not configured as an output",
                ));
            }
        };
        if previous == Level::High && level == Level::Low
            && let Some(corner) = CarCorner::ALL.into_iter().find(|c| c.trigger_pin() == pin)
        {
            state.fire(corner);
        }
        Ok(())
    }

    fn read_input(&mut self, pin: u8) -> Result<Level, NavError> {
        let mut state = self.state.lock();
        state.check_pin(pin)?;
        if !state.inputs.contains(&pin) {
            return Err(NavError::hardware(
                format!("gpio pin {pin}"),
                "pin is not configured as an input",
            ));
        }
        let cost = state.poll_cost_us;
        state.clock_us += cost;
        let now = state.clock_us;
        let level = match state.echoes.get(&pin) {
            Some(&(start, end)) => Level::from(now >= start && now < end),
            None => Level::Low,
        };
        let paced = state.paced;
        drop(state);
        if paced {
            thread::sleep(Duration::from_micros(cost));
        }
        Ok(level)
    }

    fn now_micros(&self) -> u64 {
        self.state.lock().clock_us
    }

    fn delay(&mut self, duration: Duration) {
        let paced = {
            let mut state = self.state.lock();
            state.clock_us += duration.as_micros() as u64;
            state.paced
        };
        if paced {
            thread::sleep(duration);
        }
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.outputs.clear();
        state.inputs.clear();
        state.echoes.clear();
        state.release_count += 1;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated gyroscope
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct GyroState {
    rate: f64,
    bias: f64,
    script: VecDeque<Option<f64>>,
    failing: bool,
    reads: usize,
    release_count: usize,
}

/// Simulated yaw-rate gyroscope reporting `rate + bias`.
#[derive(Clone, Default)]
pub struct SimGyro {
    state: Arc<Mutex<GyroState>>,
}

impl SimGyro {
    /// Stationary gyroscope with zero bias.
    pub fn new() -> Self {
        Self::default()
    }

    /// True angular rate in °/s (bias is added on top).
    pub fn set_rate(&self, deg_per_sec: f64) {
        self.state.lock().rate = deg_per_sec;
    }

    /// Constant offset added to every reading.
    pub fn set_bias(&self, deg_per_sec: f64) {
        self.state.lock().bias = deg_per_sec;
    }

    /// Queue raw readings returned verbatim before the steady rate; `None`
    /// produces a read fault.
    pub fn script(&self, readings: impl IntoIterator<Item = Option<f64>>) {
        self.state.lock().script.extend(readings);
    }

    /// Make every read fail while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Number of read attempts so far.
    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    /// Number of times the device has been released.
    pub fn release_count(&self) -> usize {
        self.state.lock().release_count
    }
}

impl Gyroscope for SimGyro {
    fn read_rate_z(&mut self) -> Result<f64, NavError> {
        let mut state = self.state.lock();
        state.reads += 1;
        if let Some(scripted) = state.script.pop_front() {
            return scripted.ok_or_else(|| NavError::hardware("gyroscope", "simulated read fault"));
        }
        if state.failing {
            return Err(NavError::hardware("gyroscope", "simulated read fault"));
        }
        Ok(state.rate + state.bias)
    }

    fn release(&mut self) {
        self.state.lock().release_count += 1;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated display
// ────────────────────────────────────────────────────────────────────────────

/// One call recorded by [`SimDisplay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    Show(Pattern),
    Clear,
}

#[derive(Default)]
struct DisplayState {
    events: Vec<DisplayEvent>,
    failing: bool,
}

/// Simulated LED matrix that records every call.
#[derive(Clone, Default)]
pub struct SimDisplay {
    state: Arc<Mutex<DisplayState>>,
}

impl SimDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful call, oldest first.
    pub fn events(&self) -> Vec<DisplayEvent> {
        self.state.lock().events.clone()
    }

    /// Number of `show_pattern` calls.
    pub fn show_count(&self) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, DisplayEvent::Show(_)))
            .count()
    }

    /// Pattern currently lit, or `None` if blank.
    pub fn current(&self) -> Option<Pattern> {
        match self.state.lock().events.last() {
            Some(DisplayEvent::Show(p)) => Some(*p),
            _ => None,
        }
    }

    /// Make every call fail while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    fn record(&self, event: DisplayEvent) -> Result<(), NavError> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(NavError::hardware("display", "simulated write fault"));
        }
        state.events.push(event);
        Ok(())
    }
}

impl DisplayDriver for SimDisplay {
    fn show_pattern(&mut self, pattern: Pattern) -> Result<(), NavError> {
        self.record(DisplayEvent::Show(pattern))
    }

    fn clear(&mut self) -> Result<(), NavError> {
        self.record(DisplayEvent::Clear)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated audio
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct AudioState {
    played: usize,
    stopped: usize,
    failing: bool,
}

/// Simulated speaker that counts tones instead of playing them.
#[derive(Clone, Default)]
pub struct SimAudio {
    state: Arc<Mutex<AudioState>>,
}

impl SimAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tones played successfully.
    pub fn played(&self) -> usize {
        self.state.lock().played
    }

    /// Number of `stop` calls.
    pub fn stopped(&self) -> usize {
        self.state.lock().stopped
    }

    /// Make playback fail while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }
}

impl AudioSink for SimAudio {
    fn play_tone(&self, _tone: &Tone) -> Result<(), NavError> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(NavError::hardware("audio", "simulated playback fault"));
        }
        state.played += 1;
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().stopped += 1;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRig builder
// ────────────────────────────────────────────────────────────────────────────

/// A complete simulated vehicle: rangers, gyroscope, display and speaker.
///
/// Use the `with_*` methods to shape the scene, then hand
/// [`context`](Self::context), [`display_driver`](Self::display_driver) and
/// [`audio_sink`](Self::audio_sink) to the system under test.
#[derive(Clone, Default)]
pub struct SimRig {
    gpio: SimGpio,
    gyro: SimGyro,
    display: SimDisplay,
    audio: SimAudio,
}

impl SimRig {
    /// Empty scene: no obstacles, stationary gyroscope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a static obstacle `distance_cm` in front of `corner`.
    pub fn with_obstacle(self, corner: CarCorner, distance_cm: f64) -> Self {
        self.gpio.set_obstacle(corner, Some(distance_cm));
        self
    }

    /// Give the gyroscope a constant bias.
    pub fn with_gyro_bias(self, deg_per_sec: f64) -> Self {
        self.gyro.set_bias(deg_per_sec);
        self
    }

    pub fn gpio(&self) -> &SimGpio {
        &self.gpio
    }

    pub fn gyro(&self) -> &SimGyro {
        &self.gyro
    }

    pub fn display(&self) -> &SimDisplay {
        &self.display
    }

    pub fn audio(&self) -> &SimAudio {
        &self.audio
    }

    /// Build a fresh [`HardwareContext`] over the simulated buses.
    pub fn context(&self) -> HardwareContext {
        HardwareContext::init(Box::new(self.gpio.clone()), Box::new(self.gyro.clone()))
    }

    /// Boxed display driver sharing this rig's recorder.
    pub fn display_driver(&self) -> Box<dyn DisplayDriver> {
        Box::new(self.display.clone())
    }

    /// Shared audio sink sharing this rig's counters.
    pub fn audio_sink(&self) -> Arc<dyn AudioSink> {
        Arc::new(self.audio.clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn armed(corner: CarCorner) -> SimGpio {
        let gpio = SimGpio::new();
        let mut bus = gpio.clone();
        bus.setup_output(corner.trigger_pin()).unwrap();
        bus.setup_input(corner.echo_pin()).unwrap();
        gpio
    }

    fn pulse(bus: &mut SimGpio, corner: CarCorner) {
        bus.set_output(corner.trigger_pin(), Level::High).unwrap();
        bus.delay(Duration::from_micros(10));
        bus.set_output(corner.trigger_pin(), Level::Low).unwrap();
    }

    /// Poll the echo pin and return (rise, fall) timestamps.
    fn measure(bus: &mut SimGpio, corner: CarCorner) -> Option<(u64, u64)> {
        let pin = corner.echo_pin();
        let mut rise = None;
        for _ in 0..100_000 {
            let level = bus.read_input(pin).unwrap();
            let now = bus.now_micros();
            match (rise, level) {
                (None, Level::High) => rise = Some(now),
                (Some(r), Level::Low) => return Some((r, now)),
                _ => {}
            }
        }
        None
    }

    #[test]
    fn paced_bus_sleeps_for_virtual_time() {
        let gpio = armed(CarCorner::BackRight);
        let mut bus = gpio.clone();
        bus.delay(Duration::from_millis(20));

        gpio.set_paced(true);
        gpio.set_poll_cost(1_000);
        let started = std::time::Instant::now();
        bus.delay(Duration::from_millis(20));
        for _ in 0..10 {
            bus.read_input(CarCorner::BackRight.echo_pin()).unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(bus.now_micros(), 50_000);
    }

    #[test]
    fn echo_width_matches_obstacle_distance() {
        let gpio = armed(CarCorner::BackLeft);
        gpio.set_obstacle(CarCorner::BackLeft, Some(25.0));
        let mut bus = gpio.clone();

        pulse(&mut bus, CarCorner::BackLeft);
        let (rise, fall) = measure(&mut bus, CarCorner::BackLeft).expect("echo");
        // 25 cm / 17150 cm/s = 1457.7 µs
        assert_eq!(fall - rise, 1458);
        assert_eq!(gpio.triggers(CarCorner::BackLeft), 1);
    }

    #[test]
    fn no_obstacle_means_no_echo() {
        let gpio = armed(CarCorner::FrontLeft);
        let mut bus = gpio.clone();
        pulse(&mut bus, CarCorner::FrontLeft);
        assert!(measure(&mut bus, CarCorner::FrontLeft).is_none());
    }

    #[test]
    fn script_overrides_static_obstacle_once() {
        let gpio = armed(CarCorner::BackRight);
        gpio.set_obstacle(CarCorner::BackRight, Some(10.0));
        gpio.script(CarCorner::BackRight, [None]);
        let mut bus = gpio.clone();

        pulse(&mut bus, CarCorner::BackRight);
        assert!(measure(&mut bus, CarCorner::BackRight).is_none());

        pulse(&mut bus, CarCorner::BackRight);
        assert!(measure(&mut bus, CarCorner::BackRight).is_some());
    }

    #[test]
    fn unconfigured_and_faulty_pins_error() {
        let mut bus = SimGpio::new();
        assert!(bus.read_input(26).is_err());
        assert!(bus.set_output(16, Level::High).is_err());

        let gpio = armed(CarCorner::BackLeft);
        gpio.fail_pin(CarCorner::BackLeft.echo_pin());
        let mut bus = gpio.clone();
        assert!(bus.read_input(CarCorner::BackLeft.echo_pin()).is_err());
        gpio.heal_pin(CarCorner::BackLeft.echo_pin());
        assert!(bus.read_input(CarCorner::BackLeft.echo_pin()).is_ok());
    }

    #[test]
    fn gyro_adds_bias_and_replays_script() {
        let gyro = SimGyro::new();
        gyro.set_bias(0.5);
        gyro.set_rate(10.0);
        gyro.script([Some(1.0), None]);
        let mut dev = gyro.clone();

        assert_eq!(dev.read_rate_z().unwrap(), 1.0);
        assert!(dev.read_rate_z().is_err());
        assert_eq!(dev.read_rate_z().unwrap(), 10.5);
        assert_eq!(gyro.reads(), 3);

        gyro.set_failing(true);
        assert!(dev.read_rate_z().is_err());
    }

    #[test]
    fn display_records_patterns() {
        let display = SimDisplay::new();
        let mut driver = display.clone();
        driver.show_pattern(Pattern::ArrowLeft).unwrap();
        assert_eq!(display.current(), Some(Pattern::ArrowLeft));
        driver.clear().unwrap();
        assert_eq!(display.current(), None);
        assert_eq!(display.show_count(), 1);
        assert_eq!(
            display.events(),
            vec![DisplayEvent::Show(Pattern::ArrowLeft), DisplayEvent::Clear]
        );
    }

    #[test]
    fn audio_counts_and_fails_on_demand() {
        let audio = SimAudio::new();
        let tone = Tone::new(vec![0.0; 4], 44_100);
        audio.play_tone(&tone).unwrap();
        audio.set_failing(true);
        assert!(audio.play_tone(&tone).is_err());
        audio.stop();
        assert_eq!(audio.played(), 1);
        assert_eq!(audio.stopped(), 1);
    }

    #[test]
    fn rig_builder_wires_shared_state() {
        let rig = SimRig::new()
            .with_obstacle(CarCorner::FrontRight, 30.0)
            .with_gyro_bias(-0.3);
        let ctx = rig.context();
        let rate = ctx.gyro().unwrap().read_rate_z().unwrap();
        assert!((rate + 0.3).abs() < 1e-9);
        assert_eq!(rig.gyro().reads(), 1);

        let sink = rig.audio_sink();
        sink.play_tone(&Tone::new(vec![0.0], 8_000)).unwrap();
        assert_eq!(rig.audio().played(), 1);
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SignalParseError;

/// Simulated time in whole seconds. Signed because fairness counters start
/// at `-max_red_time`.
pub type Time = i64;

/// A unique identifier for a signalized intersection (the simulator's id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntersectionId(pub String);

/// A unique identifier for an incoming lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaneId(pub String);

impl IntersectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl LaneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IntersectionId {
    fn from(s: &str) -> Self {
        IntersectionId(s.to_string())
    }
}

impl From<&str> for LaneId {
    fn from(s: &str) -> Self {
        LaneId(s.to_string())
    }
}

/// The indication shown on a single controlled link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalColor {
    /// `G`: protected green.
    Green,
    /// `g`: permissive green, vehicles must yield.
    GreenMinor,
    Yellow,
    Red,
}

impl SignalColor {
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'G' => Some(SignalColor::Green),
            'g' => Some(SignalColor::GreenMinor),
            'y' | 'Y' => Some(SignalColor::Yellow),
            'r' | 'R' => Some(SignalColor::Red),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            SignalColor::Green => 'G',
            SignalColor::GreenMinor => 'g',
            SignalColor::Yellow => 'y',
            SignalColor::Red => 'r',
        }
    }

    pub fn is_green(self) -> bool {
        matches!(self, SignalColor::Green | SignalColor::GreenMinor)
    }
}

/// One color per controlled link, in link order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignalString(Vec<SignalColor>);

impl SignalString {
    pub fn new(colors: Vec<SignalColor>) -> Self {
        SignalString(colors)
    }

    pub fn colors(&self) -> &[SignalColor] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_green(&self) -> bool {
        self.0.iter().any(|c| c.is_green())
    }

    pub fn has_yellow(&self) -> bool {
        self.0.iter().any(|c| *c == SignalColor::Yellow)
    }

    /// Indices of the links showing green or green-minor.
    pub fn green_links(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_green())
            .map(|(i, _)| i)
    }
}

impl FromStr for SignalString {
    type Err = SignalParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.chars()
            .enumerate()
            .map(|(position, code)| {
                SignalColor::from_code(code).ok_or_else(|| SignalParseError {
                    raw: raw.to_string(),
                    position,
                    code,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(SignalString)
    }
}

impl fmt::Display for SignalString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for color in &self.0 {
            write!(f, "{}", color.code())?;
        }
        Ok(())
    }
}

/// A fixed assignment of colors to every controlled link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    signal: SignalString,
    /// Duration the simulator's own program gives this phase, in seconds.
    nominal_duration: f64,
    is_green: bool,
}

impl Phase {
    pub fn new(signal: SignalString, nominal_duration: f64) -> Self {
        let is_green = signal.is_green();
        Self {
            signal,
            nominal_duration,
            is_green,
        }
    }

    pub fn parse(raw: &str, nominal_duration: f64) -> Result<Self, SignalParseError> {
        Ok(Self::new(raw.parse()?, nominal_duration))
    }

    pub fn signal(&self) -> &SignalString {
        &self.signal
    }

    pub fn nominal_duration(&self) -> f64 {
        self.nominal_duration
    }

    pub fn is_green(&self) -> bool {
        self.is_green
    }
}

/// Per-lane counters for a single decision tick, as reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LaneSnapshot {
    pub vehicle_count: u32,
    /// Vehicles currently stopped, i.e. the queue length.
    pub halted_count: u32,
    /// Accumulated waiting time of vehicles on the lane, in seconds.
    pub waiting_time: f64,
    /// Mean speed of vehicles on the lane, in m/s.
    pub mean_speed: f64,
    /// Lane length in meters.
    pub lane_length: f64,
}

/// What a decision source asks of one intersection on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Action {
    #[default]
    Keep,
    Switch,
}

impl Action {
    /// Discrete policy outputs: 0 keeps, anything else switches.
    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            Action::Keep
        } else {
            Action::Switch
        }
    }
}

/// The outcome of phase arbitration for one intersection on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Keep,
    Switch(usize),
    /// Anti-starvation override. Takes precedence over any caller action.
    EmergencyOverride(usize),
}

impl Decision {
    pub fn target(&self) -> Option<usize> {
        match *self {
            Decision::Keep => None,
            Decision::Switch(phase) | Decision::EmergencyOverride(phase) => Some(phase),
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, Decision::EmergencyOverride(_))
    }
}

/// A telemetry value that either came from the simulator or was substituted
/// with a neutral default because the lookup failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading<T> {
    Live(T),
    Degraded(T),
}

impl<T> Reading<T> {
    pub fn value(&self) -> &T {
        match self {
            Reading::Live(v) | Reading::Degraded(v) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Reading::Live(v) | Reading::Degraded(v) => v,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Reading::Degraded(_))
    }

    /// The value only if it came from the simulator.
    pub fn live(self) -> Option<T> {
        match self {
            Reading::Live(v) => Some(v),
            Reading::Degraded(_) => None,
        }
    }
}

impl<T: Default, E> From<Result<T, E>> for Reading<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Reading::Live(v),
            Err(_) => Reading::Degraded(T::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_codes() {
        let signal: SignalString = "GgyrR".parse().unwrap();
        assert_eq!(
            signal.colors(),
            &[
                SignalColor::Green,
                SignalColor::GreenMinor,
                SignalColor::Yellow,
                SignalColor::Red,
                SignalColor::Red
            ]
        );
        assert_eq!(signal.to_string(), "Ggyrr");
        assert_eq!(signal.green_links().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn rejects_unknown_code() {
        let err = "GrX".parse::<SignalString>().unwrap_err();
        assert_eq!(err.position, 2);
        assert_eq!(err.code, 'X');
    }

    #[test]
    fn malformed_program_phase_is_rejected_when_parsed() {
        let err = Phase::parse("GxGr", 30.0).unwrap_err();
        assert_eq!(err.raw, "GxGr");
        assert_eq!(err.position, 1);
    }

    #[test]
    fn phase_green_flag_is_computed_once() {
        assert!(Phase::parse("rrgr", 30.0).unwrap().is_green());
        assert!(!Phase::parse("yyrr", 4.0).unwrap().is_green());
        assert!(!Phase::parse("rrrr", 2.0).unwrap().is_green());
    }

    #[test]
    fn failed_lookup_degrades_to_default() {
        let failed: Result<LaneSnapshot, String> = Err("gone".into());
        let reading: Reading<LaneSnapshot> = failed.into();
        assert!(reading.is_degraded());
        assert_eq!(*reading.value(), LaneSnapshot::default());
    }
}

use log::{debug, warn};
use std::collections::HashSet;

use crate::control_system::intersection::Intersection;
use crate::data_structures::{IntersectionId, LaneId, LaneSnapshot, Reading, SignalString};
use crate::simulation_engine::simulator::Simulator;

/// One lane's counters for the current tick.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneReading {
    pub lane: LaneId,
    pub snapshot: Reading<LaneSnapshot>,
}

/// Everything read from the simulator about one intersection on one tick.
/// Discarded at the end of the tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntersectionTelemetry {
    /// `None` when the lookup failed or returned an unparsable string.
    pub current_signal: Option<SignalString>,
    pub simulator_phase: Option<usize>,
    /// In the intersection's controlled-lane order.
    pub lanes: Vec<LaneReading>,
    pub degraded_reads: u32,
}

impl IntersectionTelemetry {
    /// Telemetry with live readings, mostly for tests and benches.
    pub fn from_snapshots(
        current_signal: Option<SignalString>,
        lanes: impl IntoIterator<Item = (LaneId, LaneSnapshot)>,
    ) -> Self {
        Self {
            current_signal,
            simulator_phase: None,
            lanes: lanes
                .into_iter()
                .map(|(lane, snapshot)| LaneReading {
                    lane,
                    snapshot: Reading::Live(snapshot),
                })
                .collect(),
            degraded_reads: 0,
        }
    }

    pub fn snapshot(&self, lane: &LaneId) -> Option<&LaneSnapshot> {
        self.lanes
            .iter()
            .find(|r| &r.lane == lane)
            .map(|r| r.snapshot.value())
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &LaneSnapshot> {
        self.lanes.iter().map(|r| r.snapshot.value())
    }

    pub fn total_queue(&self) -> f64 {
        self.snapshots().map(|s| s.halted_count as f64).sum()
    }

    pub fn total_waiting(&self) -> f64 {
        self.snapshots().map(|s| s.waiting_time).sum()
    }

    /// Sum over lanes of vehicles times mean speed.
    pub fn total_flow(&self) -> f64 {
        self.snapshots()
            .map(|s| s.vehicle_count as f64 * s.mean_speed.max(0.0))
            .sum()
    }

    pub fn total_vehicles(&self) -> f64 {
        self.snapshots().map(|s| s.vehicle_count as f64).sum()
    }

    pub fn mean_speed(&self) -> f64 {
        if self.lanes.is_empty() {
            return 0.0;
        }
        self.snapshots().map(|s| s.mean_speed).sum::<f64>() / self.lanes.len() as f64
    }

    /// Signal actually shown, falling back to the controller's own phase.
    pub fn effective_signal<'a>(&'a self, intersection: &'a Intersection) -> &'a SignalString {
        self.current_signal
            .as_ref()
            .filter(|s| s.len() == intersection.link_count())
            .unwrap_or_else(|| intersection.current_phase().signal())
    }
}

/// Reads per-tick telemetry and applies the degradation contract: every
/// failed lookup becomes a neutral value. The first failure for a given
/// lane or intersection is logged as a warning, later ones at debug level.
#[derive(Debug, Default)]
pub struct TelemetryReader {
    warned_lanes: HashSet<LaneId>,
    warned_intersections: HashSet<IntersectionId>,
    degraded_total: u64,
}

impl TelemetryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn degraded_total(&self) -> u64 {
        self.degraded_total
    }

    pub fn read<S: Simulator + ?Sized>(
        &mut self,
        sim: &S,
        intersection: &Intersection,
    ) -> IntersectionTelemetry {
        let mut degraded_reads = 0;
        let id = &intersection.id;

        let current_signal = match sim.current_signal(id) {
            Ok(raw) => match raw.parse::<SignalString>() {
                Ok(signal) => Some(signal),
                Err(e) => {
                    degraded_reads += 1;
                    self.note_intersection(id, &e.to_string());
                    None
                }
            },
            Err(e) => {
                degraded_reads += 1;
                self.note_intersection(id, &e.to_string());
                None
            }
        };

        let simulator_phase = match sim.current_phase(id) {
            Ok(phase) => Some(phase),
            Err(e) => {
                degraded_reads += 1;
                self.note_intersection(id, &e.to_string());
                None
            }
        };

        let lanes = intersection
            .controlled_lanes()
            .iter()
            .map(|lane| {
                let snapshot = match sim.lane_snapshot(lane) {
                    Ok(snapshot) => Reading::Live(snapshot),
                    Err(e) => {
                        degraded_reads += 1;
                        self.note_lane(lane, &e.to_string());
                        Reading::Degraded(LaneSnapshot::default())
                    }
                };
                LaneReading {
                    lane: lane.clone(),
                    snapshot,
                }
            })
            .collect();

        self.degraded_total += degraded_reads as u64;
        IntersectionTelemetry {
            current_signal,
            simulator_phase,
            lanes,
            degraded_reads,
        }
    }

    fn note_lane(&mut self, lane: &LaneId, reason: &str) {
        if self.warned_lanes.insert(lane.clone()) {
            warn!("Lane {} telemetry unavailable ({}), using zeros", lane, reason);
        } else {
            debug!("Lane {} telemetry degraded: {}", lane, reason);
        }
    }

    fn note_intersection(&mut self, id: &IntersectionId, reason: &str) {
        if self.warned_intersections.insert(id.clone()) {
            warn!("Intersection {} signal state unavailable ({}), using program state", id, reason);
        } else {
            debug!("Intersection {} signal state degraded: {}", id, reason);
        }
    }
}

//! Status snapshots published by the control loop for display threads.
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct CellStatus {
    pub id: usize,
    /// `None` when the cell could not be read this cycle.
    pub voltage: Option<f32>,
    pub high_alarm: bool,
    pub low_alarm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Idle,
    Balancing,
    Resting,
}

impl ControllerPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Balancing => "balancing",
            Self::Resting => "resting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStatus {
    pub high_cell: usize,
    pub low_cell: usize,
    pub elapsed: Duration,
    pub planned: Duration,
    /// 0.0..=1.0
    pub progress: f32,
}

/// Immutable view of one control cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub cycle: u64,
    pub cells: Vec<CellStatus>,
    pub phase: ControllerPhase,
    pub session: Option<SessionStatus>,
    pub rest_remaining: Option<Duration>,
    pub alarm_line: bool,
    pub converter_enabled: bool,
}

impl StatusSnapshot {
    /// Snapshot before the first cycle.
    pub fn empty(cells: usize) -> Self {
        Self {
            cycle: 0,
            cells: (0..cells)
                .map(|id| CellStatus {
                    id,
                    voltage: None,
                    high_alarm: false,
                    low_alarm: false,
                })
                .collect(),
            phase: ControllerPhase::Idle,
            session: None,
            rest_remaining: None,
            alarm_line: false,
            converter_enabled: false,
        }
    }

    /// Sum of all cell voltages, `None` if any cell is unknown.
    pub fn total_voltage(&self) -> Option<f32> {
        self.cells.iter().map(|c| c.voltage).sum()
    }

    pub fn any_alarm(&self) -> bool {
        self.cells.iter().any(|c| c.high_alarm || c.low_alarm)
    }
}

/// Latest snapshot, swapped whole under a mutex.
#[derive(Debug, Clone)]
pub struct StatusBoard(Arc<Mutex<Arc<StatusSnapshot>>>);

impl StatusBoard {
    pub fn new(initial: StatusSnapshot) -> Self {
        Self(Arc::new(Mutex::new(Arc::new(initial))))
    }

    pub fn publish(&self, snapshot: StatusSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.0.lock() {
            Ok(mut g) => *g = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    pub fn latest(&self) -> Arc<StatusSnapshot> {
        match self.0.lock() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

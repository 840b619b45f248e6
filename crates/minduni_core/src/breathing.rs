//! crates/minduni_core/src/breathing.rs
//!
//! Crisis-mode guided breathing: inhale for four seconds, hold for two, exhale
//! for four, and repeat.

use futures::Stream;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreathPhase {
    Inhale,
    Hold,
    Exhale,
}

impl BreathPhase {
    pub const CYCLE: [BreathPhase; 3] = [BreathPhase::Inhale, BreathPhase::Hold, BreathPhase::Exhale];

    pub fn instruction(self) -> &'static str {
        match self {
            BreathPhase::Inhale => "Inhala lentamente...",
            BreathPhase::Hold => "Mantén...",
            BreathPhase::Exhale => "Exhala suavemente...",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            BreathPhase::Inhale | BreathPhase::Exhale => Duration::from_secs(4),
            BreathPhase::Hold => Duration::from_secs(2),
        }
    }

    /// Size of the guide circle at the end of the phase, relative to rest.
    pub fn scale(self) -> f32 {
        match self {
            BreathPhase::Inhale | BreathPhase::Hold => 1.2,
            BreathPhase::Exhale => 1.0,
        }
    }

    /// Whether a light haptic tap marks the start of this phase.
    pub fn haptic(self) -> bool {
        !matches!(self, BreathPhase::Hold)
    }
}

/// One instruction to show, emitted at the start of each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreathCue {
    pub cycle: u32,
    pub phase: BreathPhase,
    pub instruction: &'static str,
    pub haptic: bool,
}

pub fn cycle_length() -> Duration {
    BreathPhase::CYCLE.iter().map(|p| p.duration()).sum()
}

/// The phase the guide is in `elapsed` after it started.
pub fn phase_at(elapsed: Duration) -> BreathPhase {
    let cycle = cycle_length().as_millis();
    let mut offset = elapsed.as_millis() % cycle;
    for phase in BreathPhase::CYCLE {
        let len = phase.duration().as_millis();
        if offset < len {
            return phase;
        }
        offset -= len;
    }
    BreathPhase::Exhale
}

/// Emits a cue at the start of every phase for `cycles` full cycles.
/// Dropping the stream stops the guide.
pub fn cues(cycles: u32) -> impl Stream<Item = BreathCue> + Send {
    async_stream::stream! {
        for cycle in 1..=cycles {
            for phase in BreathPhase::CYCLE {
                yield BreathCue {
                    cycle,
                    phase,
                    instruction: phase.instruction(),
                    haptic: phase.haptic(),
                };
                tokio::time::sleep(phase.duration()).await;
            }
        }
    }
}

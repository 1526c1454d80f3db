//! Named simulation scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// MS-001: Skewed peer clocks, verbatim t0 and blended phase
    ClockSkew,

    /// MS-002: Start then stop, reordered delivery, late joiners
    LateJoiner,

    /// MS-003: Idle avatar walks into a performer's volume and syncs
    NeighborJoin,

    /// MS-004: Buffered start carrying the idle sentinel
    IdleSentinel,

    /// MS-005: Follow chain A <- B <- C propagates switch and stop
    ChainReaction,

    /// MS-006: Walking away stops the motion and its followers
    MoveToStop,

    /// MS-007: Source peer leaves; followers keep dancing
    PeerDeparture,

    /// MS-008: Loss, jitter, duplication and a healed partition
    LossyStage,

    /// MS-009: Wandering crowd with automatic neighbor sync
    Crowd,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ClockSkew,
            ScenarioId::LateJoiner,
            ScenarioId::NeighborJoin,
            ScenarioId::IdleSentinel,
            ScenarioId::ChainReaction,
            ScenarioId::MoveToStop,
            ScenarioId::PeerDeparture,
            ScenarioId::LossyStage,
            ScenarioId::Crowd,
        ]
    }

    /// Scripted scenarios with a fixed cast; they ignore `--peers`.
    pub fn scripted() -> Vec<ScenarioId> {
        Self::all()
            .into_iter()
            .filter(|s| !s.is_stochastic())
            .collect()
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ClockSkew => "clock_skew",
            ScenarioId::LateJoiner => "late_joiner",
            ScenarioId::NeighborJoin => "neighbor_join",
            ScenarioId::IdleSentinel => "idle_sentinel",
            ScenarioId::ChainReaction => "chain_reaction",
            ScenarioId::MoveToStop => "move_to_stop",
            ScenarioId::PeerDeparture => "peer_departure",
            ScenarioId::LossyStage => "lossy_stage",
            ScenarioId::Crowd => "crowd",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ClockSkew => "Peers at +500/-250 ms skew share t0; mirrors halve the derived phase error",
            ScenarioId::LateJoiner => "Start/stop under 80 ms jitter; late joiners replay only the latest state",
            ScenarioId::NeighborJoin => "Idle avatar walks into a performer's volume and adopts its timeline",
            ScenarioId::IdleSentinel => "A start carrying motion -1 leaves every view idle with volumes off",
            ScenarioId::ChainReaction => "A <- B <- C follow chain carries a switch and a stop down the line",
            ScenarioId::MoveToStop => "Owner walks away: its motion and its follower's motion stop",
            ScenarioId::PeerDeparture => "Source leaves; follower keeps its motion, late joiner sees no trace",
            ScenarioId::LossyStage => "30% loss, jitter, duplication and a healed partition still converge",
            ScenarioId::Crowd => "Wandering peers join nearby performances; views converge",
        }
    }

    /// Returns true if the scenario draws its script from the seed.
    pub fn is_stochastic(&self) -> bool {
        matches!(self, ScenarioId::LossyStage | ScenarioId::Crowd)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clock_skew" | "clockskew" | "ms-001" => Ok(ScenarioId::ClockSkew),
            "late_joiner" | "latejoiner" | "ms-002" => Ok(ScenarioId::LateJoiner),
            "neighbor_join" | "neighborjoin" | "ms-003" => Ok(ScenarioId::NeighborJoin),
            "idle_sentinel" | "idlesentinel" | "ms-004" => Ok(ScenarioId::IdleSentinel),
            "chain_reaction" | "chainreaction" | "ms-005" => Ok(ScenarioId::ChainReaction),
            "move_to_stop" | "movetostop" | "ms-006" => Ok(ScenarioId::MoveToStop),
            "peer_departure" | "peerdeparture" | "ms-007" => Ok(ScenarioId::PeerDeparture),
            "lossy_stage" | "lossystage" | "ms-008" => Ok(ScenarioId::LossyStage),
            "crowd" | "ms-009" => Ok(ScenarioId::Crowd),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("MS-005".parse::<ScenarioId>(), Ok(ScenarioId::ChainReaction));
        assert_eq!("lossystage".parse::<ScenarioId>(), Ok(ScenarioId::LossyStage));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_scripted_excludes_stochastic() {
        let scripted = ScenarioId::scripted();
        assert_eq!(scripted.len(), 7);
        assert!(!scripted.contains(&ScenarioId::Crowd));
    }
}

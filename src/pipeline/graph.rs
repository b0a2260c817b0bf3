//! The stage graph and the commands that move along it.

use std::fmt;

use crate::model::{PipelineState, Stage};

/// A state-changing command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Analyze,
    Plan,
    Generate,
    Run,
    Refine,
    Clean,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Plan => "plan",
            Self::Generate => "generate",
            Self::Run => "run",
            Self::Refine => "refine",
            Self::Clean => "clean",
        }
    }

    /// The stage a successful run lands in first.
    pub fn target(self) -> Stage {
        match self {
            Self::Analyze => Stage::Analyzed,
            Self::Plan => Stage::Planned,
            Self::Generate => Stage::Generated,
            Self::Run => Stage::Tested,
            Self::Refine => Stage::Refining,
            Self::Clean => Stage::Initial,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {command} from stage {from}: allowed next stages are {}", list(.allowed))]
    Invalid {
        command: Command,
        from: Stage,
        to: Stage,
        allowed: Vec<Stage>,
    },

    #[error("cannot {command}: pipeline is blocked ({reason}); run `waymark clean` to reset")]
    Blocked { command: Command, reason: String },
}

fn list(stages: &[Stage]) -> String {
    if stages.is_empty() {
        return "none".to_string();
    }
    stages
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stages reachable from `from` in one transition.
pub fn successors(from: Stage) -> &'static [Stage] {
    use Stage::{Analyzed, Blocked, Completed, Generated, Initial, Planned, Refining, Tested};
    match from {
        Initial => &[Analyzed],
        Analyzed => &[Analyzed, Planned, Initial],
        Planned => &[Planned, Generated, Analyzed, Initial],
        Generated => &[Generated, Tested, Planned, Initial],
        Tested => &[Tested, Refining, Completed, Generated, Initial],
        Refining => &[Tested, Completed, Blocked, Initial],
        Completed | Blocked => &[Initial, Analyzed],
    }
}

pub fn is_allowed(from: Stage, to: Stage) -> bool {
    successors(from).contains(&to)
}

/// Where `command` would take `state`, or why it can't run.
///
/// `clean` always runs. Nothing else runs while blocked.
pub fn check(command: Command, state: &PipelineState) -> Result<Stage, TransitionError> {
    let to = command.target();
    if command == Command::Clean {
        return Ok(to);
    }
    if state.stage == Stage::Blocked {
        let reason = state
            .blocked
            .as_ref()
            .map_or_else(|| "no reason recorded".to_string(), |b| b.reason.clone());
        return Err(TransitionError::Blocked { command, reason });
    }
    step(command, state.stage, to)
}

/// Validate one edge taken by `command`.
pub fn step(command: Command, from: Stage, to: Stage) -> Result<Stage, TransitionError> {
    if is_allowed(from, to) {
        Ok(to)
    } else {
        Err(TransitionError::Invalid {
            command,
            from,
            to,
            allowed: successors(from).to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::Timestamp;

    use crate::model::BlockedInfo;

    fn at(stage: Stage) -> PipelineState {
        PipelineState {
            stage,
            ..PipelineState::default()
        }
    }

    #[test]
    fn commands_follow_the_graph() {
        assert_eq!(check(Command::Analyze, &at(Stage::Initial)), Ok(Stage::Analyzed));
        assert_eq!(check(Command::Plan, &at(Stage::Analyzed)), Ok(Stage::Planned));
        assert_eq!(check(Command::Generate, &at(Stage::Planned)), Ok(Stage::Generated));
        assert_eq!(check(Command::Run, &at(Stage::Generated)), Ok(Stage::Tested));
        assert_eq!(check(Command::Refine, &at(Stage::Tested)), Ok(Stage::Refining));
        assert_eq!(check(Command::Analyze, &at(Stage::Completed)), Ok(Stage::Analyzed));
    }

    #[test]
    fn stages_rerun_in_place() {
        for (command, stage) in [
            (Command::Analyze, Stage::Analyzed),
            (Command::Plan, Stage::Planned),
            (Command::Generate, Stage::Generated),
            (Command::Run, Stage::Tested),
        ] {
            assert_eq!(check(command, &at(stage)), Ok(stage));
        }
    }

    #[test]
    fn skipping_ahead_is_rejected() {
        let err = check(Command::Generate, &at(Stage::Initial)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot generate from stage initial: allowed next stages are analyzed"
        );
        assert!(check(Command::Refine, &at(Stage::Generated)).is_err());
        assert!(check(Command::Refine, &at(Stage::Refining)).is_err());
    }

    #[test]
    fn blocked_only_allows_clean() {
        let mut state = at(Stage::Blocked);
        state.blocked = Some(BlockedInfo {
            reason: "JRN-1: non-convergent".into(),
            at: Timestamp::now(),
        });
        for command in [
            Command::Analyze,
            Command::Plan,
            Command::Generate,
            Command::Run,
            Command::Refine,
        ] {
            assert!(matches!(
                check(command, &state),
                Err(TransitionError::Blocked { .. })
            ));
        }
        assert_eq!(check(Command::Clean, &state), Ok(Stage::Initial));
    }

    #[test]
    fn refining_ends_in_one_of_three_places() {
        for to in [Stage::Completed, Stage::Blocked, Stage::Tested] {
            assert_eq!(step(Command::Refine, Stage::Refining, to), Ok(to));
        }
        assert!(step(Command::Refine, Stage::Tested, Stage::Blocked).is_err());
    }
}

//! Lifecycle of a network.

use crate::Error;
use std::fmt::{self, Display};
use tracing::debug;

/// Stage of a network.
///
/// ```text
/// Uninitialized -> Initialized -> GenesisAssembled -> NodesLaunched -> Live
///        \______________\_______________\__________________\_____> Failed
/// (any) -> Cleaned
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Uninitialized,
    Initialized,
    GenesisAssembled,
    NodesLaunched,
    Live,
    Failed,
    Cleaned,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Uninitialized => "uninitialized",
            Stage::Initialized => "initialized",
            Stage::GenesisAssembled => "genesis_assembled",
            Stage::NodesLaunched => "nodes_launched",
            Stage::Live => "live",
            Stage::Failed => "failed",
            Stage::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// Tracks the [Stage] of a network and rejects out-of-order operations.
#[derive(Debug)]
pub struct Lifecycle {
    chain: String,
    stage: Stage,
}

impl Lifecycle {
    pub fn new(chain: &str) -> Self {
        Self {
            chain: chain.to_string(),
            stage: Stage::Uninitialized,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Fail with [Error::InvalidStage] unless the current stage is `expected`.
    pub fn require(&self, expected: Stage, operation: &'static str) -> Result<(), Error> {
        if self.stage != expected {
            return Err(Error::InvalidStage {
                operation,
                stage: self.stage,
            });
        }
        Ok(())
    }

    /// Move to `next`.
    ///
    /// Terminal stages are never left (except for [Stage::Cleaned], which
    /// [Lifecycle::clean] re-enters).
    pub fn advance(&mut self, next: Stage) {
        if matches!(self.stage, Stage::Failed | Stage::Cleaned) && next != Stage::Cleaned {
            return;
        }
        debug!(chain = %self.chain, from = %self.stage, to = %next, "stage transition");
        self.stage = next;
    }

    /// Record the outcome of an operation, moving to [Stage::Failed] on error.
    pub fn settle<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if result.is_err() && self.stage != Stage::Cleaned {
            self.advance(Stage::Failed);
        }
        result
    }

    /// Move to [Stage::Cleaned]. Returns false if already cleaned.
    pub fn clean(&mut self) -> bool {
        if self.stage == Stage::Cleaned {
            return false;
        }
        self.advance(Stage::Cleaned);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new("gaia-1");
        assert!(lifecycle.require(Stage::Initialized, "start").is_err());
        lifecycle.require(Stage::Uninitialized, "initialize").unwrap();
        for stage in [
            Stage::Initialized,
            Stage::GenesisAssembled,
            Stage::NodesLaunched,
            Stage::Live,
        ] {
            lifecycle.advance(stage);
            assert_eq!(lifecycle.stage(), stage);
        }
        assert!(lifecycle.clean());
        assert!(!lifecycle.clean());
        assert_eq!(lifecycle.stage(), Stage::Cleaned);
    }

    #[test]
    fn test_failure_is_sticky() {
        let mut lifecycle = Lifecycle::new("gaia-1");
        lifecycle.advance(Stage::Initialized);
        let result: Result<(), Error> = lifecycle.settle(Err(Error::MissingField("x".into())));
        assert!(result.is_err());
        assert_eq!(lifecycle.stage(), Stage::Failed);
        lifecycle.advance(Stage::Live);
        assert_eq!(lifecycle.stage(), Stage::Failed);
        assert!(matches!(
            lifecycle.require(Stage::Initialized, "start"),
            Err(Error::InvalidStage {
                stage: Stage::Failed,
                ..
            })
        ));
        assert!(lifecycle.clean());
    }
}

//! Declarative persistence fallback chain
//!
//! A chain is an ordered list of stages. The coordinator walks it until a
//! stage persists something; each stage can be tested on its own by building
//! a chain that contains only that stage.

use std::time::Duration;

use crate::config::ClientConfig;

/// One persistence strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Whole map to the variant batch endpoint
    VariantBatch,
    /// Whole map to the variant-agnostic legacy batch endpoint
    LegacyBatch,
    /// One call per field, `group_size` in parallel, `group_delay` between groups
    PerField {
        group_size: usize,
        group_delay: Duration,
    },
}

/// Stage identity without parameters, reported in outcomes and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Nothing to persist; no call was made
    Skipped,
    VariantBatch,
    LegacyBatch,
    PerField,
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::VariantBatch => StageKind::VariantBatch,
            Stage::LegacyBatch => StageKind::LegacyBatch,
            Stage::PerField { .. } => StageKind::PerField,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    stages: Vec<Stage>,
}

impl FallbackChain {
    /// Variant batch, then legacy batch, then per-field
    pub fn standard(group_size: usize, group_delay: Duration) -> Self {
        Self::new(vec![
            Stage::VariantBatch,
            Stage::LegacyBatch,
            Stage::PerField {
                group_size: group_size.max(1),
                group_delay,
            },
        ])
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::standard(config.group_size, config.group_delay())
    }

    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_order() {
        let chain = FallbackChain::default();
        let kinds: Vec<_> = chain.stages().iter().map(Stage::kind).collect();
        assert_eq!(
            kinds,
            vec![StageKind::VariantBatch, StageKind::LegacyBatch, StageKind::PerField]
        );
        assert_eq!(
            chain.stages()[2],
            Stage::PerField {
                group_size: 5,
                group_delay: Duration::from_millis(300)
            }
        );
    }

    #[test]
    fn test_group_size_never_zero() {
        let chain = FallbackChain::standard(0, Duration::ZERO);
        assert!(matches!(chain.stages()[2], Stage::PerField { group_size: 1, .. }));
    }
}

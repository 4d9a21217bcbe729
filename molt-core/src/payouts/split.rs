use serde::Serialize;

use crate::config::{PayoutsSection, BASIS_POINTS_TOTAL};
use crate::models::RecipientType;

/// Revenue split in basis points. Always sums to 10_000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevenueSplit {
    creator_bps: u32,
    platform_bps: u32,
    agent_bps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitAllocation {
    pub creator: i64,
    pub platform: i64,
    pub agent: i64,
}

impl SplitAllocation {
    pub fn share(&self, recipient: RecipientType) -> i64 {
        match recipient {
            RecipientType::Creator => self.creator,
            RecipientType::Platform => self.platform,
            RecipientType::Agent => self.agent,
        }
    }

    pub fn total(&self) -> i64 {
        self.creator + self.platform + self.agent
    }
}

impl Default for RevenueSplit {
    fn default() -> Self {
        Self {
            creator_bps: 8_000,
            platform_bps: 1_900,
            agent_bps: 100,
        }
    }
}

impl RevenueSplit {
    pub fn new(creator_bps: u32, platform_bps: u32, agent_bps: u32) -> Result<Self, String> {
        let total = creator_bps + platform_bps + agent_bps;
        if total != BASIS_POINTS_TOTAL {
            return Err(format!(
                "split must sum to {BASIS_POINTS_TOTAL} basis points, got {total}"
            ));
        }
        Ok(Self {
            creator_bps,
            platform_bps,
            agent_bps,
        })
    }

    pub fn from_config(section: &PayoutsSection) -> Result<Self, String> {
        Self::new(section.creator_bps, section.platform_bps, section.agent_bps)
    }

    pub fn bps(&self, recipient: RecipientType) -> u32 {
        match recipient {
            RecipientType::Creator => self.creator_bps,
            RecipientType::Platform => self.platform_bps,
            RecipientType::Agent => self.agent_bps,
        }
    }

    /// Divides `amount_cents` exactly. The creator share rounds down, the
    /// agent share rounds up so a nonzero rate never collapses to zero on a
    /// small tip, and the platform takes what is left.
    pub fn allocate(&self, amount_cents: i64) -> SplitAllocation {
        let amount = i128::from(amount_cents.max(0));
        let whole = i128::from(BASIS_POINTS_TOTAL);
        let creator = amount * i128::from(self.creator_bps) / whole;
        let agent_exact = amount * i128::from(self.agent_bps);
        let agent = (agent_exact + whole - 1) / whole;
        let agent = agent.min(amount - creator);
        let platform = amount - creator - agent;
        SplitAllocation {
            creator: creator as i64,
            platform: platform as i64,
            agent: agent as i64,
        }
    }
}

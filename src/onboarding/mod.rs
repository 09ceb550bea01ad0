//! Wallet onboarding
//!
//! Event-driven onboarding of profiled wallets plus a periodic catchup sweep
//! for wallets that never made it into a cluster.

pub mod catchup;
pub mod onboarder;

pub use catchup::{CatchupConfig, CatchupSweep, SweepReport};
pub use onboarder::{
    quick_score, EdgeTally, NetworkOnboarder, OnboardingConfig, OnboardingResult, OnboardingStage,
    OnboardingStatus,
};

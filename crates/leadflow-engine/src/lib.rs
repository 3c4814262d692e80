//! # LeadFlow Engine
//!
//! Marketing campaign automation for the LeadFlow CRM: decides which
//! campaigns fire at a given moment, matches leads into audience segments,
//! keeps A/B traffic allocations self-consistent, advances drip funnels, and
//! converts Closed Won leads.
//!
//! ## Architecture
//! ```text
//! Tick (tokio interval, hourly)
//!   └── CampaignScheduler.tick()
//!       ├── due-ness: date gate + send window + frequency vs last_sent_at
//!       ├── claim: compare-and-set Scheduled → Active (no double-send)
//!       ├── audience: segment matcher over one bulk lead fetch
//!       ├── content: template fallback + A/B variant pick
//!       ├── dispatch: MailDispatcher per recipient, failures collected
//!       └── finalize: Once → Completed, else → Scheduled; errors → Paused
//!
//! Lead Pipeline Conversion
//!   └── Closed Won → student record or company contract
//! ```

pub mod allocation;
pub mod campaign;
pub mod conversion;
pub mod dispatch;
pub mod funnel;
pub mod notify;
pub mod persistence;
pub mod scheduler;
pub mod segment;

pub use allocation::{MAX_ALLOCATION, MIN_ALLOCATION, Variant, add_variant, rebalance, remove_variant};
pub use campaign::{
    AbTest, Audience, Campaign, CampaignContent, CampaignStatus, ChannelType, Frequency, Schedule,
};
pub use conversion::{ConversionOutcome, convert, validate_conversion};
pub use dispatch::{MailDispatcher, MemoryMailer, SendOutcome, SmtpMailer, render_template};
pub use funnel::{Funnel, FunnelStep, StepType};
pub use notify::{Notification, NotifyRouter};
pub use persistence::CampaignStore;
pub use scheduler::{CampaignScheduler, TickSummary, spawn_tick_loop};
pub use segment::{CriterionOp, Segment, SegmentCriterion, SegmentType, matches};

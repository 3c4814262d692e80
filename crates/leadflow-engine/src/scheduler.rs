//! Campaign scheduler — the periodic tick that decides which campaigns fire.
//!
//! The tick is a single-threaded cooperative loop: campaigns are processed
//! one at a time, each claimed via a compare-and-set on status before any
//! send side effect. A campaign-level failure pauses that campaign and
//! records the error; it never aborts the batch. The tick itself never
//! errors.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use leadflow_core::{Clock, EngineConfig, EngineError, Lead, Result};
use rand::Rng;
use uuid::Uuid;

use crate::campaign::{Audience, Campaign, CampaignStatus, ChannelType, Frequency};
use crate::dispatch::{MailDispatcher, render_template};
use crate::funnel::StepType;
use crate::persistence::CampaignStore;
use crate::segment::{self, SegmentType};

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickSummary {
    /// Scheduled campaigns inspected.
    pub evaluated: usize,
    /// Campaigns that fired, with recipient counts.
    pub sent: Vec<(String, usize)>,
    /// Campaigns paused with an error this tick.
    pub paused: Vec<String>,
}

/// The scheduler engine.
pub struct CampaignScheduler {
    store: Arc<CampaignStore>,
    mailer: Arc<dyn MailDispatcher>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl CampaignScheduler {
    pub fn new(
        store: Arc<CampaignStore>,
        mailer: Arc<dyn MailDispatcher>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            clock,
            config,
        }
    }

    /// One tick: evaluate every Scheduled campaign, fire the due ones.
    /// Failures are isolated per campaign; this function never errors.
    pub async fn tick(&self) -> TickSummary {
        let now = self.clock.now();
        let mut summary = TickSummary::default();

        for mut campaign in self.store.scheduled_campaigns() {
            summary.evaluated += 1;

            if !self.is_due(&campaign, now) {
                continue;
            }

            // Claim before side effects; a parallel invocation loses the CAS.
            match self.store.claim_scheduled(campaign.id) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("Campaign '{}' already claimed, skipping", campaign.name);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Claim failed for '{}': {e}", campaign.name);
                    continue;
                }
            }

            tracing::info!("🔔 Campaign due: '{}'", campaign.name);
            match self.fire(&mut campaign, now).await {
                Ok(sent) => summary.sent.push((campaign.name.clone(), sent)),
                Err(e) => {
                    self.pause_with_error(&mut campaign, &e);
                    summary.paused.push(campaign.name.clone());
                }
            }
        }

        summary
    }

    /// Manual activation: the on-demand path runs the identical send logic
    /// and failure-isolation rules as the tick.
    pub async fn activate(&self, id: Uuid) -> Result<usize> {
        let Some(mut campaign) = self.store.load_campaign(id)? else {
            return Err(EngineError::Validation(format!("Unknown campaign {id}")));
        };
        if !campaign.status.can_transition(CampaignStatus::Active) {
            return Err(EngineError::Validation(format!(
                "Campaign '{}' cannot be activated from {:?}",
                campaign.name, campaign.status
            )));
        }
        campaign.status = CampaignStatus::Scheduled;
        let now = self.clock.now();
        match self.fire(&mut campaign, now).await {
            Ok(sent) => Ok(sent),
            Err(e) => {
                self.pause_with_error(&mut campaign, &e);
                Err(e)
            }
        }
    }

    /// Send one campaign's content to a single address without touching its
    /// status. Used for pre-flight test sends.
    pub async fn test_send(&self, id: Uuid, address: &str) -> Result<()> {
        let Some(mut campaign) = self.store.load_campaign(id)? else {
            return Err(EngineError::Validation(format!("Unknown campaign {id}")));
        };
        let (subject, body) = self.resolve_content(&mut campaign);
        let outcome = self.mailer.send(address, &subject, &body).await;
        if outcome.success {
            Ok(())
        } else {
            Err(EngineError::Dispatch(
                outcome.error.unwrap_or_else(|| "send failed".into()),
            ))
        }
    }

    /// Resolve a campaign's full target audience. Dynamic criteria are
    /// evaluated in-process over one bulk lead fetch; static segments return
    /// their frozen member snapshot without recomputation.
    pub fn audience(&self, campaign: &Campaign) -> Vec<Lead> {
        match &campaign.audience {
            None => self.store.load_leads(),
            Some(Audience::Criteria(criteria)) => self
                .store
                .load_leads()
                .into_iter()
                .filter(|lead| segment::matches(lead, criteria))
                .collect(),
            Some(Audience::Segment(segment_id)) => {
                let segment = match self.store.load_segment(*segment_id) {
                    Ok(Some(s)) => s,
                    _ => {
                        tracing::warn!(
                            "⚠️ Campaign '{}' references unknown segment {segment_id}",
                            campaign.name
                        );
                        return Vec::new();
                    }
                };
                match segment.segment_type {
                    SegmentType::Static => segment
                        .members
                        .iter()
                        .filter_map(|id| self.store.load_lead(*id).ok().flatten())
                        .collect(),
                    SegmentType::Dynamic => self
                        .store
                        .load_leads()
                        .into_iter()
                        .filter(|lead| segment::matches(lead, &segment.criteria))
                        .collect(),
                }
            }
        }
    }

    // ─── Due-ness ──────────────────────────────────────

    /// Date gate + send-time window + frequency rule.
    fn is_due(&self, campaign: &Campaign, now: DateTime<Utc>) -> bool {
        let Some(schedule) = &campaign.schedule else {
            return false;
        };
        let today = now.date_naive();
        if schedule.start_date > today {
            return false;
        }
        if let Some(end) = schedule.end_date
            && end < today
        {
            return false;
        }

        let Ok((hour, minute)) = schedule.parse_send_time() else {
            tracing::warn!(
                "⚠️ Campaign '{}' has unparseable send time '{}'",
                campaign.name,
                schedule.send_time
            );
            return false;
        };
        // Fires on the tick whose hour matches, within a few minutes of
        // slack to absorb tick jitter.
        if now.hour() != hour {
            return false;
        }
        if (minute as i64 - now.minute() as i64).abs() > self.config.send_window_slack_mins {
            return false;
        }

        let threshold_days = match schedule.frequency {
            Frequency::Once => return campaign.last_sent_at.is_none(),
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
            Frequency::Monthly => self.config.monthly_threshold_days,
        };
        campaign
            .last_sent_at
            .is_none_or(|last| (now - last).num_days() >= threshold_days)
    }

    // ─── Send path ──────────────────────────────────────

    /// Steps 4–5 of the tick for one claimed campaign: activate, dispatch,
    /// finalize. Returns the number of successful sends.
    async fn fire(&self, campaign: &mut Campaign, now: DateTime<Utc>) -> Result<usize> {
        campaign.transition(CampaignStatus::Active)?;
        campaign.last_sent_at = Some(now);
        self.store.save_campaign(campaign)?;

        let mut sent = 0usize;
        let mut failures: Vec<String> = Vec::new();

        let audience = if campaign.channel == ChannelType::Email || campaign.funnel.is_some() {
            self.audience(campaign)
        } else {
            Vec::new()
        };

        if campaign.channel == ChannelType::Email {
            let (subject, body) = self.resolve_content(campaign);
            tracing::info!(
                "📨 Campaign '{}': dispatching to {} recipient(s)",
                campaign.name,
                audience.len()
            );

            // Partial failures never skip remaining recipients.
            for lead in &audience {
                let vars = personalization_vars(lead);
                let outcome = self
                    .mailer
                    .send(
                        &lead.email,
                        &render_template(&subject, &vars),
                        &render_template(&body, &vars),
                    )
                    .await;
                if outcome.success {
                    sent += 1;
                } else {
                    failures.push(format!(
                        "{}: {}",
                        lead.email,
                        outcome.error.unwrap_or_else(|| "unknown error".into())
                    ));
                }
            }
        } else {
            tracing::debug!(
                "Campaign '{}' uses {:?}; no dispatcher wired, status-only run",
                campaign.name,
                campaign.channel
            );
        }

        self.advance_funnel(campaign, &audience, &mut sent, &mut failures)
            .await;

        if !failures.is_empty() {
            return Err(EngineError::Dispatch(format!(
                "{} of {} sends failed: {}",
                failures.len(),
                failures.len() + sent,
                failures.join("; ")
            )));
        }

        // Finalize: Once completes, everything else goes back to Scheduled
        // for the next cycle's due-ness check.
        let next = match campaign.schedule.as_ref().map(|s| s.frequency) {
            Some(Frequency::Once) => CampaignStatus::Completed,
            _ => CampaignStatus::Scheduled,
        };
        campaign.transition(next)?;
        campaign.last_error = None;
        self.store.save_campaign(campaign)?;
        Ok(sent)
    }

    /// Advance the campaign's drip funnel by one step per fire. Email/Sms
    /// steps go through the mail dispatcher with the step name as subject;
    /// other step types only move the cursor. Failures join the campaign's
    /// failure list.
    async fn advance_funnel(
        &self,
        campaign: &mut Campaign,
        audience: &[Lead],
        sent: &mut usize,
        failures: &mut Vec<String>,
    ) {
        let cursor = campaign.funnel_cursor;
        let Some((step_id, order, name, step_type, content)) =
            campaign.funnel.as_ref().and_then(|funnel| {
                let step = match cursor {
                    None => funnel.steps.first(),
                    Some(order) => funnel.next_step(order),
                };
                step.map(|s| (s.id, s.order, s.name.clone(), s.step_type, s.content.clone()))
            })
        else {
            return;
        };

        let mut delivered = 0u64;
        let mut failed = 0u64;
        match step_type {
            StepType::Email | StepType::Sms => {
                let body = content.unwrap_or_default();
                tracing::info!(
                    "🪜 Campaign '{}': funnel step '{}' to {} recipient(s)",
                    campaign.name,
                    name,
                    audience.len()
                );
                for lead in audience {
                    let vars = personalization_vars(lead);
                    let outcome = self
                        .mailer
                        .send(
                            &lead.email,
                            &render_template(&name, &vars),
                            &render_template(&body, &vars),
                        )
                        .await;
                    if outcome.success {
                        delivered += 1;
                        *sent += 1;
                    } else {
                        failed += 1;
                        failures.push(format!(
                            "{}: {}",
                            lead.email,
                            outcome.error.unwrap_or_else(|| "unknown error".into())
                        ));
                    }
                }
            }
            _ => {
                tracing::debug!(
                    "Campaign '{}': funnel step '{}' ({:?}) advanced without dispatch",
                    campaign.name,
                    name,
                    step_type
                );
            }
        }

        campaign.funnel_cursor = Some(order);
        if let Some(funnel) = campaign.funnel.as_mut()
            && let Some(step) = funnel.steps.iter_mut().find(|s| s.id == step_id)
        {
            step.metrics.sent += delivered;
            step.metrics.failed += failed;
        }
    }

    /// Base content (template lookup with authored fallback) plus the A/B
    /// variant override when a test is enabled. Picking a variant records an
    /// impression on it.
    fn resolve_content(&self, campaign: &mut Campaign) -> (String, String) {
        let (mut subject, mut body) = match &campaign.content.template_id {
            Some(template_id) => match self.store.load_template(template_id) {
                Ok(Some(t)) => (t.subject, t.body),
                _ => {
                    tracing::warn!(
                        "⚠️ Template '{}' missing, using campaign content",
                        template_id
                    );
                    (campaign.content.subject.clone(), campaign.content.body.clone())
                }
            },
            None => (campaign.content.subject.clone(), campaign.content.body.clone()),
        };

        if let Some(ab) = campaign.ab_test.as_mut()
            && ab.enabled
            && !ab.variants.is_empty()
        {
            let idx = match ab.winner.and_then(|w| ab.variants.iter().position(|v| v.id == w)) {
                Some(winner_idx) => winner_idx,
                None => pick_weighted(ab.variants.iter().map(|v| v.allocation)),
            };
            let variant = &mut ab.variants[idx];
            tracing::debug!("A/B pick for '{}': variant '{}'", campaign.name, variant.name);
            if let Some(s) = &variant.subject {
                subject = s.clone();
            }
            if let Some(b) = &variant.body {
                body = b.clone();
            }
            variant.metrics.impressions += 1;
        }

        (subject, body)
    }

    fn pause_with_error(&self, campaign: &mut Campaign, error: &EngineError) {
        tracing::warn!("⚠️ Campaign '{}' paused: {error}", campaign.name);
        campaign.last_error = Some(error.to_string());
        if campaign.status.can_transition(CampaignStatus::Paused) {
            campaign.status = CampaignStatus::Paused;
        }
        if let Err(e) = self.store.save_campaign(campaign) {
            tracing::error!("Failed to persist paused campaign '{}': {e}", campaign.name);
        }
    }
}

/// `{{name}}` / `{{email}}` / `{{course}}` bindings for one recipient.
fn personalization_vars(lead: &Lead) -> HashMap<String, String> {
    let mut vars = HashMap::from([
        ("name".to_string(), lead.name.clone()),
        ("email".to_string(), lead.email.clone()),
    ]);
    if let Some(course) = lead.resolved_course() {
        vars.insert("course".to_string(), course.to_string());
    }
    vars
}

/// Weighted pick over allocations (which sum to 100 by invariant).
fn pick_weighted(allocations: impl Iterator<Item = u32> + Clone) -> usize {
    let total: u32 = allocations.clone().sum();
    if total == 0 {
        return 0;
    }
    let mut roll = rand::thread_rng().gen_range(0..total);
    for (i, alloc) in allocations.enumerate() {
        if roll < alloc {
            return i;
        }
        roll -= alloc;
    }
    0
}

/// Spawn the tick loop as a background tokio task.
pub async fn spawn_tick_loop(scheduler: Arc<CampaignScheduler>, interval_secs: u64) {
    tracing::info!("⏰ Campaign scheduler started (tick every {interval_secs}s)");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        let summary = scheduler.tick().await;
        for (name, count) in &summary.sent {
            tracing::info!("📣 [{name}] sent to {count} recipient(s)");
        }
        for name in &summary.paused {
            tracing::warn!("⏸️ [{name}] paused with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::Variant;
    use crate::campaign::{AbTest, CampaignContent, Schedule};
    use crate::dispatch::MemoryMailer;
    use crate::funnel::{Funnel, FunnelStep};
    use chrono::{NaiveDate, TimeZone};
    use leadflow_core::types::{EmailTemplate, LeadStatus, LeadType, PipelineStage};
    use leadflow_core::FixedClock;

    fn lead(name: &str, email: &str) -> Lead {
        Lead {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            status: LeadStatus::Active,
            source: Some("facebook".into()),
            lead_type: LeadType::Inbound,
            pipeline: PipelineStage::Contacted,
            date: None,
            last_interaction_date: None,
            next_contact_date: None,
            course_of_interest: Some("IELTS".into()),
            courses: vec![],
            company_id: None,
            converted: false,
        }
    }

    fn daily_campaign(send_time: &str) -> Campaign {
        let mut c = Campaign::new(
            "daily-digest",
            ChannelType::Email,
            CampaignContent {
                subject: "Hello {{name}}".into(),
                body: "About {{course}}".into(),
                template_id: None,
            },
        );
        c.set_schedule(Schedule {
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            end_date: None,
            frequency: Frequency::Daily,
            send_time: send_time.into(),
        })
        .unwrap();
        c
    }

    struct Rig {
        store: Arc<CampaignStore>,
        mailer: Arc<MemoryMailer>,
        clock: Arc<FixedClock>,
        scheduler: CampaignScheduler,
    }

    /// Engine wired to an in-memory store, a recording mailer, and a pinned
    /// clock at 2026-03-02 08:03 UTC.
    fn rig() -> Rig {
        let store = Arc::new(CampaignStore::open_in_memory().unwrap());
        let mailer = Arc::new(MemoryMailer::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 8, 3, 0).unwrap(),
        ));
        let scheduler = CampaignScheduler::new(
            store.clone(),
            mailer.clone(),
            clock.clone(),
            EngineConfig::default(),
        );
        Rig {
            store,
            mailer,
            clock,
            scheduler,
        }
    }

    #[tokio::test]
    async fn daily_campaign_fires_in_window() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();
        rig.store.save_lead(&lead("An", "an@example.com")).unwrap();
        let c = daily_campaign("08:00");
        rig.store.save_campaign(&c).unwrap();

        let summary = rig.scheduler.tick().await;
        assert_eq!(summary.sent, vec![("daily-digest".to_string(), 2)]);

        let updated = rig.store.load_campaign(c.id).unwrap().unwrap();
        assert_eq!(updated.status, CampaignStatus::Scheduled);
        assert_eq!(updated.last_sent_at, Some(rig.clock.now()));
        assert_eq!(rig.mailer.sent_count(), 2);

        // Personalization applied per recipient.
        let sent = rig.mailer.sent();
        assert!(sent.iter().any(|(_, s, b)| s == "Hello Mai" && b == "About IELTS"));
    }

    #[tokio::test]
    async fn outside_window_is_not_due() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();
        rig.store.save_campaign(&daily_campaign("09:00")).unwrap();
        rig.store.save_campaign(&daily_campaign("08:30")).unwrap();

        let summary = rig.scheduler.tick().await;
        assert_eq!(summary.evaluated, 2);
        assert!(summary.sent.is_empty());
        assert_eq!(rig.mailer.sent_count(), 0);
    }

    #[tokio::test]
    async fn once_campaign_completes_and_never_resends() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();
        let mut c = Campaign::new("launch", ChannelType::Email, CampaignContent::default());
        c.set_schedule(Schedule {
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            end_date: None,
            frequency: Frequency::Once,
            send_time: "08:00".into(),
        })
        .unwrap();
        rig.store.save_campaign(&c).unwrap();

        rig.scheduler.tick().await;
        let updated = rig.store.load_campaign(c.id).unwrap().unwrap();
        assert_eq!(updated.status, CampaignStatus::Completed);
        assert!(updated.last_sent_at.is_some());
        assert_eq!(rig.mailer.sent_count(), 1);

        // A later tick in the same window finds nothing scheduled.
        rig.clock.advance(chrono::Duration::days(1));
        let summary = rig.scheduler.tick().await;
        assert_eq!(summary.evaluated, 0);
        assert_eq!(rig.mailer.sent_count(), 1);
    }

    #[tokio::test]
    async fn daily_is_idempotent_within_a_day() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();
        let c = daily_campaign("08:00");
        rig.store.save_campaign(&c).unwrap();

        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent_count(), 1);

        // Second tick two minutes later: same day, not due.
        rig.clock.advance(chrono::Duration::minutes(2));
        let summary = rig.scheduler.tick().await;
        assert_eq!(summary.evaluated, 1);
        assert!(summary.sent.is_empty());
        assert_eq!(rig.mailer.sent_count(), 1);

        // 24h later it fires again.
        rig.clock.advance(chrono::Duration::days(1));
        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent_count(), 2);
    }

    #[tokio::test]
    async fn weekly_waits_seven_days() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();
        let mut c = daily_campaign("08:00");
        c.schedule.as_mut().unwrap().frequency = Frequency::Weekly;
        rig.store.save_campaign(&c).unwrap();

        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent_count(), 1);

        // Six days in: still inside the weekly gap.
        rig.clock.advance(chrono::Duration::days(6));
        let summary = rig.scheduler.tick().await;
        assert!(summary.sent.is_empty());
        assert_eq!(rig.mailer.sent_count(), 1);

        rig.clock.advance(chrono::Duration::days(1));
        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent_count(), 2);
    }

    #[tokio::test]
    async fn monthly_waits_thirty_days() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();
        let mut c = daily_campaign("08:00");
        c.schedule.as_mut().unwrap().frequency = Frequency::Monthly;
        rig.store.save_campaign(&c).unwrap();

        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent_count(), 1);

        rig.clock.advance(chrono::Duration::days(29));
        let summary = rig.scheduler.tick().await;
        assert!(summary.sent.is_empty());
        assert_eq!(rig.mailer.sent_count(), 1);

        rig.clock.advance(chrono::Duration::days(1));
        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent_count(), 2);
    }

    #[tokio::test]
    async fn funnel_drips_one_step_per_fire() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();

        let mut c = daily_campaign("08:00");
        let mut funnel = Funnel::default();
        let mut welcome = FunnelStep::new("Welcome aboard", StepType::Email);
        welcome.content = Some("Hi {{name}}".into());
        funnel.add_step(welcome);
        funnel.add_step(FunnelStep::new("cooldown", StepType::Wait));
        let mut picks = FunnelStep::new("Course picks", StepType::Email);
        picks.content = Some("Try {{course}}".into());
        funnel.add_step(picks);
        c.funnel = Some(funnel);
        rig.store.save_campaign(&c).unwrap();

        // Day 1: base content plus the first step.
        rig.scheduler.tick().await;
        let subjects: Vec<String> =
            rig.mailer.sent().iter().map(|(_, s, _)| s.clone()).collect();
        assert_eq!(subjects, vec!["Hello Mai".to_string(), "Welcome aboard".to_string()]);
        let saved = rig.store.load_campaign(c.id).unwrap().unwrap();
        assert_eq!(saved.funnel_cursor, Some(0));
        assert_eq!(saved.funnel.as_ref().unwrap().steps[0].metrics.sent, 1);

        // Day 2: the Wait step advances the cursor without dispatch.
        rig.clock.advance(chrono::Duration::days(1));
        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent_count(), 3);
        let saved = rig.store.load_campaign(c.id).unwrap().unwrap();
        assert_eq!(saved.funnel_cursor, Some(1));

        // Day 3: the second email step fires with its own content.
        rig.clock.advance(chrono::Duration::days(1));
        rig.scheduler.tick().await;
        let sent = rig.mailer.sent();
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[4].1, "Course picks");
        assert_eq!(sent[4].2, "Try IELTS");

        // Day 4: the funnel is exhausted, only base content goes out.
        rig.clock.advance(chrono::Duration::days(1));
        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent_count(), 6);
        let saved = rig.store.load_campaign(c.id).unwrap().unwrap();
        assert_eq!(saved.funnel_cursor, Some(2));
    }

    #[tokio::test]
    async fn date_gates_respected() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();

        let mut future = daily_campaign("08:00");
        future.schedule.as_mut().unwrap().start_date =
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        future.name = "future".into();
        rig.store.save_campaign(&future).unwrap();

        let mut ended = daily_campaign("08:00");
        ended.schedule.as_mut().unwrap().end_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        ended.name = "ended".into();
        rig.store.save_campaign(&ended).unwrap();

        let summary = rig.scheduler.tick().await;
        assert!(summary.sent.is_empty());
    }

    #[tokio::test]
    async fn partial_dispatch_failure_pauses_but_attempts_everyone() {
        let rig = rig();
        rig.store.save_lead(&lead("A", "a@example.com")).unwrap();
        rig.store.save_lead(&lead("B", "b@example.com")).unwrap();
        rig.store.save_lead(&lead("C", "c@example.com")).unwrap();
        rig.mailer.fail_recipient("b@example.com");

        let failing = daily_campaign("08:00");
        rig.store.save_campaign(&failing).unwrap();
        // A second due campaign must still run after the first one fails.
        let mut second = daily_campaign("08:05");
        second.name = "second".into();
        second.audience = Some(Audience::Criteria(vec![crate::segment::SegmentCriterion {
            field: "email".into(),
            op: crate::segment::CriterionOp::NotEquals,
            value: Some("b@example.com".into()),
        }]));
        rig.store.save_campaign(&second).unwrap();

        let summary = rig.scheduler.tick().await;
        assert_eq!(summary.paused, vec!["daily-digest".to_string()]);

        let paused = rig.store.load_campaign(failing.id).unwrap().unwrap();
        assert_eq!(paused.status, CampaignStatus::Paused);
        assert!(paused.last_error.as_deref().unwrap().contains("b@example.com"));
        assert!(paused.last_sent_at.is_some());

        // The other two recipients of the failing campaign were still
        // attempted, and the second campaign ran in the same tick.
        assert!(summary.sent.iter().any(|(n, c)| n == "second" && *c == 2));
        assert_eq!(rig.mailer.sent_count(), 2 + 2);
    }

    #[tokio::test]
    async fn segment_audience_filters_leads() {
        let rig = rig();
        let mut match_lead = lead("Mai", "mai@example.com");
        match_lead.source = Some("google".into());
        rig.store.save_lead(&match_lead).unwrap();
        rig.store.save_lead(&lead("An", "an@example.com")).unwrap();

        let mut c = daily_campaign("08:00");
        c.audience = Some(Audience::Criteria(vec![crate::segment::SegmentCriterion {
            field: "source".into(),
            op: crate::segment::CriterionOp::Equals,
            value: Some("google".into()),
        }]));
        rig.store.save_campaign(&c).unwrap();

        rig.scheduler.tick().await;
        let sent = rig.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "mai@example.com");
    }

    #[tokio::test]
    async fn missing_template_falls_back_to_campaign_content() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();

        let mut c = daily_campaign("08:00");
        c.content.template_id = Some("welcome-v2".into());
        c.content.subject = "fallback subject".into();
        rig.store.save_campaign(&c).unwrap();

        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent()[0].1, "fallback subject");

        // With the template present, the next send uses it.
        rig.store
            .save_template(&EmailTemplate {
                id: "welcome-v2".into(),
                name: "welcome".into(),
                subject: "template subject".into(),
                body: "template body".into(),
            })
            .unwrap();
        rig.clock.advance(chrono::Duration::days(1));
        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent()[1].1, "template subject");
    }

    #[tokio::test]
    async fn declared_winner_is_always_picked() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();

        let mut c = daily_campaign("08:00");
        let mut winner = Variant::new("B", 50);
        winner.subject = Some("winner subject".into());
        let winner_id = winner.id;
        c.ab_test = Some(AbTest {
            enabled: true,
            variants: vec![Variant::new("A", 50), winner],
            winner: Some(winner_id),
        });
        rig.store.save_campaign(&c).unwrap();

        rig.scheduler.tick().await;
        assert_eq!(rig.mailer.sent()[0].1, "winner subject");

        // The pick recorded an impression on the winner.
        let updated = rig.store.load_campaign(c.id).unwrap().unwrap();
        let ab = updated.ab_test.unwrap();
        assert_eq!(ab.variants[1].metrics.impressions, 1);
        assert_eq!(ab.variants[0].metrics.impressions, 0);
    }

    #[tokio::test]
    async fn manual_activation_runs_send_path() {
        let rig = rig();
        rig.store.save_lead(&lead("Mai", "mai@example.com")).unwrap();
        // Scheduled for 20:00 — the 08:03 tick would never fire it.
        let c = daily_campaign("20:00");
        rig.store.save_campaign(&c).unwrap();

        let sent = rig.scheduler.activate(c.id).await.unwrap();
        assert_eq!(sent, 1);
        let updated = rig.store.load_campaign(c.id).unwrap().unwrap();
        assert_eq!(updated.status, CampaignStatus::Scheduled);
        assert!(updated.last_sent_at.is_some());
    }

    #[tokio::test]
    async fn test_send_targets_one_address_without_status_change() {
        let rig = rig();
        let c = daily_campaign("08:00");
        rig.store.save_campaign(&c).unwrap();

        rig.scheduler.test_send(c.id, "qa@example.com").await.unwrap();
        assert_eq!(rig.mailer.sent_count(), 1);
        assert_eq!(rig.mailer.sent()[0].0, "qa@example.com");
        let unchanged = rig.store.load_campaign(c.id).unwrap().unwrap();
        assert_eq!(unchanged.status, CampaignStatus::Scheduled);
        assert!(unchanged.last_sent_at.is_none());
    }

    #[test]
    fn weighted_pick_respects_bounds() {
        for _ in 0..50 {
            let idx = pick_weighted([80u32, 20u32].into_iter());
            assert!(idx < 2);
        }
        assert_eq!(pick_weighted(std::iter::empty::<u32>()), 0);
    }
}

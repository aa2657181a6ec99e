//! # Item duplication
//!
//! Replays a decoded [`PropertyModel`] onto a freshly spawned item through a
//! [`CommandChannel`]. Each request runs its own state machine:
//!
//! ```text
//! Extracted -> SpawnRequested -> AwaitingSync -> Injecting -> Done | Partial
//!                   |                 |              |
//!                   v                 v              v
//!             Failed(spawn)    Failed(timeout)  Failed(inject)
//! ```
//!
//! There is no undo verb on the server, so nothing is ever rolled back. A job that
//! stops after the spawn leaves an orphaned item behind for the operator to reclaim;
//! a job stopped during injection leaves the copy `Partial`. Neither mutates the source.

pub mod channel;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::watch;

use crate::errors::{ChannelError, DuplicationError};
use crate::model::{PropertyModel, PropertyRecord};
use crate::schema::{ApplyVerb, CategoryHint, PropertySchema, ValueKind};

pub use channel::{
    CommandChannel, ConsoleCommand, Destination, ItemHandle, ScriptChannel, SerializedChannel,
    SpawnTicket,
};

/// Instance identity; copying it would alias the source item.
pub const INSTANCE_ID: u32 = 22;

/// Longest single wait between sync attempts, whatever the backoff says.
pub const MAX_SYNC_WAIT: Duration = Duration::from_secs(300);

/// Property ids never replayed onto a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExclusionSet(BTreeSet<u32>);

impl ExclusionSet {
    pub fn new(ids: impl IntoIterator<Item = u32>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn contains(&self, id: u32) -> bool {
        self.0.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::new([INSTANCE_ID])
    }
}

/// Ids whose application makes the server recompute dependent stats. Applied last,
/// tier before profession, or the recompute overwrites what was replayed after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecomputeIds {
    pub crafter_tier: u32,
    pub crafter_profession: u32,
}

impl Default for RecomputeIds {
    fn default() -> Self {
        Self {
            crafter_tier: 66,
            crafter_profession: 67,
        }
    }
}

impl RecomputeIds {
    pub fn contains(&self, id: u32) -> bool {
        id == self.crafter_tier || id == self.crafter_profession
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicationSettings {
    pub exclusions: ExclusionSet,
    /// Base wait before looking for the spawned item.
    pub sync_delay: Duration,
    /// How many wait-then-resolve rounds before giving up.
    pub sync_attempts: u32,
    /// Multiplier applied to the wait after each unsuccessful round.
    pub sync_backoff: f64,
    pub recompute: RecomputeIds,
}

impl Default for DuplicationSettings {
    fn default() -> Self {
        Self {
            exclusions: ExclusionSet::default(),
            sync_delay: Duration::from_secs(5),
            sync_attempts: 3,
            sync_backoff: 2.0,
            recompute: RecomputeIds::default(),
        }
    }
}

impl DuplicationSettings {
    /// Wait before resolution attempt `attempt` (0-based).
    pub fn sync_wait(&self, attempt: u32) -> Duration {
        let factor = self.sync_backoff.max(1.0).powi(attempt as i32);
        Duration::try_from_secs_f64(self.sync_delay.as_secs_f64() * factor)
            .unwrap_or(MAX_SYNC_WAIT)
            .min(MAX_SYNC_WAIT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureStage {
    Spawn,
    Timeout,
    Inject,
    /// Cancelled before injection started.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Extracted,
    SpawnRequested,
    AwaitingSync,
    Injecting,
    Done,
    Partial,
    Failed(FailureStage),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Partial | JobState::Failed(_))
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Extracted => f.write_str("extracted"),
            JobState::SpawnRequested => f.write_str("spawn-requested"),
            JobState::AwaitingSync => f.write_str("awaiting-sync"),
            JobState::Injecting => f.write_str("injecting"),
            JobState::Done => f.write_str("done"),
            JobState::Partial => f.write_str("partial"),
            JobState::Failed(FailureStage::Spawn) => f.write_str("failed(spawn)"),
            JobState::Failed(FailureStage::Timeout) => f.write_str("failed(timeout)"),
            JobState::Failed(FailureStage::Inject) => f.write_str("failed(inject)"),
            JobState::Failed(FailureStage::Aborted) => f.write_str("failed(aborted)"),
        }
    }
}

/// One duplication request and everything learned while running it. Handed back to
/// the caller when the job reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicationJob {
    pub id: u64,
    pub source: PropertyModel,
    pub destination: Destination,
    pub target: Option<ItemHandle>,
    pub state: JobState,
    pub history: Vec<JobState>,
    pub applied_count: usize,
    /// Ids the server rejected at least once.
    pub failed_ids: BTreeSet<u32>,
    /// Ids never attempted because the job was aborted mid-injection.
    pub skipped_ids: BTreeSet<u32>,
    /// Last channel error seen, for remediation notes.
    pub last_error: Option<ChannelError>,
}

impl DuplicationJob {
    fn new(id: u64, source: PropertyModel, destination: Destination) -> Self {
        Self {
            id,
            source,
            destination,
            target: None,
            state: JobState::Extracted,
            history: vec![JobState::Extracted],
            applied_count: 0,
            failed_ids: BTreeSet::new(),
            skipped_ids: BTreeSet::new(),
            last_error: None,
        }
    }

    fn transition(&mut self, next: JobState) {
        info!("DUPE: job {} {} -> {}", self.id, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, stage: FailureStage, error: Option<ChannelError>) {
        if let Some(ref e) = error {
            warn!("DUPE: job {} {:?} failure: {}", self.id, stage, e);
        }
        self.last_error = error.or(self.last_error.take());
        self.transition(JobState::Failed(stage));
    }

    pub fn is_success(&self) -> bool {
        self.state == JobState::Done
    }
}

/// Records to replay, in replay order: exclusions removed, recompute triggers last.
///
/// Each trigger is replayed once with its last-written value, so tier and profession
/// are always the final two commands even when a later block repeats one of them.
pub fn injection_order(model: &PropertyModel, settings: &DuplicationSettings) -> Vec<PropertyRecord> {
    let recompute = settings.recompute;
    let mut plan: Vec<PropertyRecord> = model
        .records()
        .iter()
        .filter(|r| !settings.exclusions.contains(r.id) && !recompute.contains(r.id))
        .copied()
        .collect();

    let mut triggers = vec![recompute.crafter_tier];
    if recompute.crafter_profession != recompute.crafter_tier {
        triggers.push(recompute.crafter_profession);
    }
    plan.extend(
        triggers
            .into_iter()
            .filter(|id| !settings.exclusions.contains(*id))
            .filter_map(|id| model.get(id).copied()),
    );
    plan
}

/// Verb used to replay `record`. An unknown id whose bits are not a finite float goes
/// out as an int: console floats are decimal text, so a NaN payload or infinity would
/// not reach the server bit for bit.
pub fn replay_verb(
    schema: &PropertySchema,
    record: &PropertyRecord,
    category: CategoryHint,
) -> ApplyVerb {
    let verb = schema.apply_verb_for(record.id, category);
    if verb == ApplyVerb::FloatApply
        && schema.resolve_kind(record.id, category) == ValueKind::RawUnknown
        && !record.as_f32().is_finite()
    {
        return ApplyVerb::IntApply;
    }
    verb
}

/// Sender half of a job cancellation pair.
#[derive(Debug)]
pub struct AbortHandle(watch::Sender<bool>);

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.0.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct AbortSignal(watch::Receiver<bool>);

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_aborted(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once abort is requested; pends forever if the handle is gone.
    async fn aborted(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle(tx), AbortSignal(rx))
}

enum SyncOutcome {
    Ready(ItemHandle),
    TimedOut,
    Aborted,
}

/// Drives duplication jobs. Cheap to clone; clones share the channel and schema.
#[derive(Clone)]
pub struct Duplicator {
    channel: Arc<dyn CommandChannel>,
    schema: Arc<PropertySchema>,
    settings: Arc<DuplicationSettings>,
    next_job: Arc<AtomicU64>,
}

impl Duplicator {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        schema: Arc<PropertySchema>,
        settings: DuplicationSettings,
    ) -> Self {
        Self {
            channel,
            schema,
            settings: Arc::new(settings),
            next_job: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Same as [`Duplicator::new`] for channels that allow a single outstanding request.
    pub fn serialized<C: CommandChannel + 'static>(
        channel: C,
        schema: Arc<PropertySchema>,
        settings: DuplicationSettings,
    ) -> Self {
        Self::new(Arc::new(SerializedChannel::new(channel)), schema, settings)
    }

    pub fn settings(&self) -> &DuplicationSettings {
        &self.settings
    }

    pub async fn duplicate(
        &self,
        source: PropertyModel,
        destination: Destination,
    ) -> Result<DuplicationJob, DuplicationError> {
        self.duplicate_with_abort(source, destination, AbortSignal::never())
            .await
    }

    /// Run one job to a terminal state. Only a refused source is an `Err`; every
    /// failure after that is reported through the returned job.
    pub async fn duplicate_with_abort(
        &self,
        source: PropertyModel,
        destination: Destination,
        mut abort: AbortSignal,
    ) -> Result<DuplicationJob, DuplicationError> {
        if let Some(t) = source.truncation() {
            return Err(DuplicationError::IncompleteModel {
                template_id: source.template_id,
                offset: t.offset,
            });
        }

        let id = self.next_job.fetch_add(1, Ordering::Relaxed);
        let category = source.category;
        let template_id = source.template_id;
        let plan = injection_order(&source, &self.settings);
        let mut job = DuplicationJob::new(id, source, destination);
        info!(
            "DUPE: job {} template {} ({}), {} of {} records to replay",
            id,
            template_id,
            category,
            plan.len(),
            job.source.len()
        );

        if abort.is_aborted() {
            job.fail(FailureStage::Aborted, None);
            return Ok(job);
        }

        job.transition(JobState::SpawnRequested);
        let ticket = match self.channel.spawn(template_id, &job.destination).await {
            Ok(ticket) => ticket,
            Err(e) => {
                job.fail(FailureStage::Spawn, Some(e));
                return Ok(job);
            }
        };

        job.transition(JobState::AwaitingSync);
        let handle = match self.await_sync(&mut job, &ticket, &mut abort).await {
            SyncOutcome::Ready(handle) => handle,
            SyncOutcome::TimedOut => {
                warn!(
                    "DUPE: job {} spawned template {} for player {} but never saw it; item may be orphaned",
                    id, template_id, job.destination.player_index
                );
                job.fail(FailureStage::Timeout, None);
                return Ok(job);
            }
            SyncOutcome::Aborted => {
                warn!("DUPE: job {} aborted after spawn; item may be orphaned", id);
                job.fail(FailureStage::Aborted, None);
                return Ok(job);
            }
        };
        job.target = Some(handle);

        job.transition(JobState::Injecting);
        for (index, record) in plan.iter().enumerate() {
            if abort.is_aborted() {
                job.skipped_ids
                    .extend(plan[index..].iter().map(|r| r.id));
                warn!(
                    "DUPE: job {} aborted mid-injection, {} records not applied",
                    id,
                    plan.len() - index
                );
                break;
            }
            let result = match replay_verb(&self.schema, record, category) {
                ApplyVerb::IntApply => {
                    self.channel
                        .apply_int_stat(&handle, record.id, record.as_i32())
                        .await
                }
                ApplyVerb::FloatApply => {
                    self.channel
                        .apply_float_stat(&handle, record.id, record.as_f32())
                        .await
                }
            };
            match result {
                Ok(()) => job.applied_count += 1,
                Err(e) => {
                    warn!("DUPE: job {} property {} rejected: {}", id, record.id, e);
                    job.failed_ids.insert(record.id);
                    job.last_error = Some(e);
                }
            }
        }

        let next = if job.failed_ids.is_empty() && job.skipped_ids.is_empty() {
            JobState::Done
        } else if job.applied_count == 0 && job.skipped_ids.is_empty() {
            JobState::Failed(FailureStage::Inject)
        } else {
            JobState::Partial
        };
        job.transition(next);
        info!(
            "DUPE: job {} finished {}: applied {}, failed {:?}, skipped {:?}",
            id, job.state, job.applied_count, job.failed_ids, job.skipped_ids
        );
        Ok(job)
    }

    async fn await_sync(
        &self,
        job: &mut DuplicationJob,
        ticket: &SpawnTicket,
        abort: &mut AbortSignal,
    ) -> SyncOutcome {
        for attempt in 0..self.settings.sync_attempts {
            let wait = self.settings.sync_wait(attempt);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = abort.aborted() => return SyncOutcome::Aborted,
            }
            match self.channel.resolve_handle(ticket).await {
                Ok(Some(handle)) => return SyncOutcome::Ready(handle),
                Ok(None) => {
                    info!(
                        "DUPE: job {} spawned item not visible yet (attempt {}/{})",
                        job.id,
                        attempt + 1,
                        self.settings.sync_attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "DUPE: job {} handle lookup failed (attempt {}/{}): {}",
                        job.id,
                        attempt + 1,
                        self.settings.sync_attempts,
                        e
                    );
                    job.last_error = Some(e);
                }
            }
        }
        SyncOutcome::TimedOut
    }

    /// Run independent jobs concurrently. One job's failure never affects another.
    pub async fn run_batch(
        &self,
        requests: Vec<(PropertyModel, Destination)>,
    ) -> Vec<Result<DuplicationJob, DuplicationError>> {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|(source, destination)| {
                let this = self.clone();
                tokio::spawn(async move { this.duplicate(source, destination).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(DuplicationError::Internal(e.to_string())),
            });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Header;

    fn model(ids: &[u32]) -> PropertyModel {
        let records = ids
            .iter()
            .enumerate()
            .map(|(order, id)| PropertyRecord {
                id: *id,
                raw: (*id as i32 * 10).to_le_bytes(),
                order,
                block: 0,
            })
            .collect();
        PropertyModel::new(
            10097,
            Header {
                magic_valid: true,
                version: 1,
                class_path: "/Game/Items/Weapons/Sword".to_string(),
                instance_name: "Sword_C_1".to_string(),
            },
            records,
            None,
        )
    }

    #[test]
    fn exclusions_are_removed_everywhere() {
        let plan = injection_order(&model(&[22, 6, 22, 8]), &DuplicationSettings::default());
        let ids: Vec<u32> = plan.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![6, 8]);
    }

    #[test]
    fn recompute_triggers_go_last_tier_first() {
        let plan = injection_order(
            &model(&[67, 6, 66, 8, 63]),
            &DuplicationSettings::default(),
        );
        let ids: Vec<u32> = plan.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![6, 8, 63, 66, 67]);
    }

    #[test]
    fn repeated_trigger_is_replayed_once_with_latest_value() {
        let mut source = model(&[66, 67, 6]);
        let mut records = source.records().to_vec();
        records.push(PropertyRecord {
            id: 67,
            raw: 3i32.to_le_bytes(),
            order: 3,
            block: 1,
        });
        records.push(PropertyRecord {
            id: 8,
            raw: 1.0f32.to_le_bytes(),
            order: 4,
            block: 1,
        });
        source = PropertyModel::new(source.template_id, source.header.clone(), records, None);

        let plan = injection_order(&source, &DuplicationSettings::default());
        let ids: Vec<u32> = plan.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![6, 8, 66, 67]);
        assert_eq!(plan[3].as_i32(), 3);
        assert_eq!(plan[3].block, 1);
    }

    #[test]
    fn unknown_non_finite_bits_replay_as_int() {
        let schema = PropertySchema::builtin().with_unknown_apply(ApplyVerb::FloatApply);
        let record = |id: u32, bits: u32| PropertyRecord {
            id,
            raw: bits.to_le_bytes(),
            order: 0,
            block: 0,
        };
        let weapon = CategoryHint::Weapon;

        assert_eq!(
            replay_verb(&schema, &record(9999, 0x7FC0_1234), weapon),
            ApplyVerb::IntApply
        );
        assert_eq!(
            replay_verb(&schema, &record(9999, f32::INFINITY.to_bits()), weapon),
            ApplyVerb::IntApply
        );
        assert_eq!(
            replay_verb(&schema, &record(9999, 2.5f32.to_bits()), weapon),
            ApplyVerb::FloatApply
        );
        // known float ids keep their verb
        assert_eq!(
            replay_verb(&schema, &record(8, 0x7FC0_1234), weapon),
            ApplyVerb::FloatApply
        );
    }

    #[test]
    fn excluded_trigger_is_not_replayed() {
        let settings = DuplicationSettings {
            exclusions: ExclusionSet::new([22, 67]),
            ..DuplicationSettings::default()
        };
        let plan = injection_order(&model(&[67, 6, 66]), &settings);
        let ids: Vec<u32> = plan.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![6, 66]);
    }

    #[test]
    fn sync_wait_backs_off_and_caps() {
        let settings = DuplicationSettings {
            sync_delay: Duration::from_millis(100),
            sync_backoff: 2.0,
            ..DuplicationSettings::default()
        };
        assert_eq!(settings.sync_wait(0), Duration::from_millis(100));
        assert_eq!(settings.sync_wait(1), Duration::from_millis(200));
        assert_eq!(settings.sync_wait(2), Duration::from_millis(400));
        assert_eq!(settings.sync_wait(60), MAX_SYNC_WAIT);

        let flat = DuplicationSettings {
            sync_backoff: f64::NAN,
            ..settings
        };
        assert_eq!(flat.sync_wait(3), Duration::from_millis(100));
    }

    #[test]
    fn state_labels() {
        assert_eq!(JobState::Failed(FailureStage::Spawn).to_string(), "failed(spawn)");
        assert!(JobState::Partial.is_terminal());
        assert!(!JobState::Injecting.is_terminal());
    }

    #[tokio::test]
    async fn abort_signal_fires_once_requested() {
        let (handle, mut signal) = abort_pair();
        assert!(!signal.is_aborted());
        handle.abort();
        tokio::time::timeout(Duration::from_secs(1), signal.aborted())
            .await
            .unwrap();
        assert!(signal.is_aborted());
        assert!(!AbortSignal::never().is_aborted());
    }
}

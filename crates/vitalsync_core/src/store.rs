//! The shared, mutable entity store.

use crate::config::MutationConfig;
use crate::error::{StoreError, StoreResult};
use crate::generator::{EntityGenerator, WardGenerator};
use crate::profile::{number_value, timestamp_value, MutationProfile, NumericField, ScheduleRule};
use crate::projection::Projection;
use crate::recorder::ChangeRecorder;
use crate::stats::{StoreStats, StoreStatsSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use vitalsync_protocol::{ChangeRecord, Snapshot};

/// Result of one tick: every change of the tick and the realtime state
/// right after it.
#[derive(Debug, Clone)]
pub struct TickOutput {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Store generation the tick ran against.
    pub generation: u64,
    /// High-frequency changes followed by status changes.
    pub changes: Vec<ChangeRecord>,
    /// Realtime projection after the tick.
    pub realtime: Arc<Snapshot>,
    /// Time of the tick.
    pub timestamp: DateTime<Utc>,
}

/// A full snapshot tagged with the generation it belongs to.
#[derive(Debug, Clone)]
pub struct VersionedSnapshot {
    /// Generation number.
    pub generation: u64,
    /// Last tick reflected in the snapshot.
    pub tick: u64,
    /// Full state.
    pub snapshot: Snapshot,
}

struct StoreState {
    snapshot: Snapshot,
    rng: StdRng,
    ticks: u64,
    generation: u64,
}

/// Owns every entity and runs mutation passes over them.
///
/// A pass and the recording of its changes happen under one lock, so the
/// changes of a pass describe exactly the deltas that pass introduced.
pub struct EntityStore {
    generator: Arc<dyn EntityGenerator>,
    profiles: Vec<MutationProfile>,
    projection: Projection,
    config: MutationConfig,
    state: Mutex<StoreState>,
    stats: StoreStats,
}

impl EntityStore {
    /// Creates a store populated by `generator`.
    pub fn new(generator: Arc<dyn EntityGenerator>, config: MutationConfig) -> StoreResult<Self> {
        config.validate()?;
        let profiles = generator.profiles();
        for profile in &profiles {
            profile.validate()?;
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let now = Utc::now();
        let collections = generator.populate(&mut rng, now);
        if let Some(missing) = profiles
            .iter()
            .find(|p| !collections.contains_key(&p.collection))
        {
            return Err(StoreError::UnknownCollection(missing.collection.clone()));
        }
        let snapshot = Snapshot::new(generator.label(), collections, now);

        info!(
            label = generator.label(),
            entities = snapshot.entity_count(),
            "entity store populated"
        );

        Ok(Self {
            projection: generator.projection(),
            generator,
            profiles,
            config,
            state: Mutex::new(StoreState {
                snapshot,
                rng,
                ticks: 0,
                generation: 0,
            }),
            stats: StoreStats::new(),
        })
    }

    /// Creates a store holding the default intensive-care ward.
    pub fn ward(config: MutationConfig) -> StoreResult<Self> {
        Self::new(Arc::new(WardGenerator::default()), config)
    }

    /// Returns the mutation configuration.
    pub fn config(&self) -> &MutationConfig {
        &self.config
    }

    /// Returns the profile of a collection.
    pub fn profile(&self, collection: &str) -> Option<&MutationProfile> {
        self.profiles.iter().find(|p| p.collection == collection)
    }

    /// Returns the realtime projection rules.
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Returns a copy of the full state.
    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().snapshot.clone()
    }

    /// Returns a copy of the full state with its generation.
    pub fn versioned_snapshot(&self) -> VersionedSnapshot {
        let state = self.state.lock();
        VersionedSnapshot {
            generation: state.generation,
            tick: state.ticks,
            snapshot: state.snapshot.clone(),
        }
    }

    /// Returns the realtime projection of the current state.
    pub fn realtime_snapshot(&self) -> Snapshot {
        self.projection.project(&self.state.lock().snapshot)
    }

    /// Returns the current generation.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Returns the number of ticks run.
    pub fn ticks(&self) -> u64 {
        self.state.lock().ticks
    }

    /// Returns the activity counters.
    pub fn stats(&self) -> StoreStatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs the high-frequency numeric pass over one collection.
    ///
    /// A random fraction of the collection is selected; selected entities
    /// are visited in id order. Unknown collections change nothing.
    pub fn mutate(&self, collection: &str) -> Vec<ChangeRecord> {
        let Some(profile) = self.profile(collection) else {
            debug!(collection, "no mutation profile");
            return Vec::new();
        };
        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let changes = numeric_pass(state, profile, &self.config, now);
        state.snapshot.refresh(now);
        drop(guard);

        self.stats.record_pass(changes.len());
        changes
    }

    /// Runs the low-frequency status pass over one collection.
    pub fn mutate_status(&self, collection: &str) -> Vec<ChangeRecord> {
        let Some(profile) = self.profile(collection) else {
            debug!(collection, "no mutation profile");
            return Vec::new();
        };
        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let changes = status_pass(state, profile, &self.config);
        state.snapshot.refresh(now);
        drop(guard);

        self.stats.record_pass(changes.len());
        changes
    }

    /// Runs one tick: the numeric pass over every collection, then the
    /// status pass when due, then refreshes aggregates and timestamp.
    pub fn tick(&self) -> TickOutput {
        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.ticks += 1;
        let tick = state.ticks;

        let mut changes = Vec::new();
        for profile in &self.profiles {
            changes.extend(numeric_pass(state, profile, &self.config, now));
        }
        if self.config.status_due(tick) {
            for profile in &self.profiles {
                changes.extend(status_pass(state, profile, &self.config));
            }
        }
        state.snapshot.refresh(now);
        let realtime = Arc::new(self.projection.project(&state.snapshot));
        let generation = state.generation;
        drop(guard);

        self.stats.record_pass(changes.len());
        debug!(tick, generation, changes = changes.len(), "mutation tick");

        TickOutput {
            tick,
            generation,
            changes,
            realtime,
            timestamp: now,
        }
    }

    /// Replaces every entity with freshly generated content and bumps the
    /// generation.
    pub fn regenerate(&self) -> VersionedSnapshot {
        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let collections = self.generator.populate(&mut state.rng, now);
        state.snapshot = Snapshot::new(self.generator.label(), collections, now);
        state.generation += 1;
        let out = VersionedSnapshot {
            generation: state.generation,
            tick: state.ticks,
            snapshot: state.snapshot.clone(),
        };
        drop(guard);

        self.stats.record_regeneration();
        info!(generation = out.generation, "entity store regenerated");
        out
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("label", &self.generator.label())
            .field("profiles", &self.profiles.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn numeric_pass(
    state: &mut StoreState,
    profile: &MutationProfile,
    config: &MutationConfig,
    now: DateTime<Utc>,
) -> Vec<ChangeRecord> {
    let StoreState { snapshot, rng, .. } = state;
    let mut changes = Vec::new();
    if !profile.has_numeric_pass() {
        return changes;
    }
    let Some(entities) = snapshot.collections.get_mut(&profile.collection) else {
        return changes;
    };

    let fraction = rng.gen_range(config.min_selection..=config.max_selection);
    let count = ((entities.len() as f64) * fraction).floor() as usize;
    let mut picked = rand::seq::index::sample(rng, entities.len(), count.min(entities.len())).into_vec();
    picked.sort_unstable();

    for (index, (id, entity)) in entities.iter_mut().enumerate() {
        if picked.binary_search(&index).is_err() {
            continue;
        }
        let mut recorder = ChangeRecorder::new(&profile.collection, id, entity, &mut changes);
        for group in &profile.numeric {
            if rng.gen_bool(group.probability) {
                for field in &group.fields {
                    adjust_field(&mut recorder, rng, field, config.precision);
                }
            }
        }
        if let Some(rule) = &profile.schedule {
            if rng.gen_bool(rule.entity_probability) {
                refresh_schedule(&mut recorder, rng, rule, now);
            }
        }
    }
    changes
}

fn status_pass(
    state: &mut StoreState,
    profile: &MutationProfile,
    config: &MutationConfig,
) -> Vec<ChangeRecord> {
    let StoreState { snapshot, rng, .. } = state;
    let mut changes = Vec::new();
    let Some(entities) = snapshot.collections.get_mut(&profile.collection) else {
        return changes;
    };

    for rule in &profile.status {
        for (id, entity) in entities.iter_mut() {
            if !rng.gen_bool(rule.probability) {
                continue;
            }
            let mut recorder = ChangeRecorder::new(&profile.collection, id, entity, &mut changes);
            if let Some(next) = rule.pick(rng) {
                recorder.set(rule.path.as_str(), Value::String(next.to_owned()));
            }
            for field in &rule.companions {
                adjust_field(&mut recorder, rng, field, config.precision);
            }
        }
    }
    changes
}

fn adjust_field(recorder: &mut ChangeRecorder<'_>, rng: &mut StdRng, field: &NumericField, precision: u32) {
    let Some(current) = recorder.get(field.path.as_str()).and_then(Value::as_f64) else {
        return;
    };
    let next = field.adjust(rng, current, precision);
    recorder.set(field.path.as_str(), number_value(next));
}

fn refresh_schedule(
    recorder: &mut ChangeRecorder<'_>,
    rng: &mut StdRng,
    rule: &ScheduleRule,
    now: DateTime<Utc>,
) {
    let items = recorder
        .get(rule.array.as_str())
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    for i in 0..items {
        if !rng.gen_bool(rule.item_probability) {
            continue;
        }
        let item = rule.array.child(&i.to_string());
        recorder.set(item.child(&rule.stamp_field).as_str(), timestamp_value(now));
        let due = rule.next_due(rng, now);
        recorder.set(item.child(&rule.due_field).as_str(), timestamp_value(due));
    }
}

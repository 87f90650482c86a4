//! Object identity tracking for the calling process.
//!
//! The tracker hands out an [`ObjectId`] for every object the application
//! passes to a task, maps it to an exchange file, and remembers which
//! objects have a newer version somewhere in the cluster. It never reads or
//! writes the exchange files themselves.

mod report;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::core::{Dynamic, ObjectId};
use crate::error::TrackerError;

pub use report::{Snapshot, TableSizes};

/// Identity token of a tracked object: the address of its `Arc` allocation.
///
/// The tracker keeps a clone of the `Arc` while the object is registered, so
/// the allocation can't be freed and the address can't be handed to another
/// object in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(usize);

impl Identity {
    pub fn of<T: ?Sized>(object: &Arc<T>) -> Self {
        Identity(Arc::as_ptr(object).cast::<()>() as usize)
    }
}

struct Entry {
    identity: Identity,
    _object: Dynamic,
}

#[derive(Default)]
struct TrackerState {
    /// Exchange file of every non-collection object.
    file_names: HashMap<ObjectId, Utf8PathBuf>,
    /// Objects whose latest version lives outside this process.
    pending: HashSet<ObjectId>,
    /// Objects produced by this process.
    written: HashSet<ObjectId>,
    objects: HashMap<ObjectId, Entry>,
    addresses: HashMap<Identity, ObjectId>,
    current_id: u64,
    reporting: bool,
    report: report::Report,
}

impl TrackerState {
    fn sizes(&self) -> TableSizes {
        TableSizes {
            file_names: self.file_names.len(),
            pending: self.pending.len(),
            written: self.written.len(),
            objects: self.objects.len(),
            addresses: self.addresses.len(),
            current_id: self.current_id,
        }
    }

    fn report_now(&mut self) {
        if self.reporting {
            let sizes = self.sizes();
            tracing::debug!(
                file_names = sizes.file_names,
                pending = sizes.pending,
                written = sizes.written,
                objects = sizes.objects,
                addresses = sizes.addresses,
                current_id = sizes.current_id,
                "object tracker status"
            );
            self.report.record(sizes);
        }
    }

    fn pop_object(&mut self, id: &ObjectId) {
        if let Some(entry) = self.objects.remove(id) {
            self.addresses.remove(&entry.identity);
        }
    }
}

/// Registry of objects shared between the calling process and its tasks.
///
/// All operations take one tracker-wide lock for their whole (constant
/// time) duration, so the tracker can be shared between every thread that
/// submits tasks.
pub struct ObjectTracker {
    runtime_id: String,
    exchange_dir: Utf8PathBuf,
    state: Mutex<TrackerState>,
}

impl Default for ObjectTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl std::fmt::Debug for ObjectTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTracker")
            .field("runtime_id", &self.runtime_id)
            .field("exchange_dir", &self.exchange_dir)
            .field("sizes", &self.sizes())
            .finish()
    }
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let tracker = Self {
            runtime_id: Uuid::new_v4().to_string(),
            exchange_dir: config.exchange_dir,
            state: Mutex::new(TrackerState {
                current_id: 1,
                ..Default::default()
            }),
        };

        if config.reporting {
            tracker.enable_report();
        }

        tracker
    }

    /// Identifier of this tracker instance, the prefix of every
    /// [`ObjectId`] it issues.
    pub fn runtime_id(&self) -> &str {
        &self.runtime_id
    }

    pub fn exchange_dir(&self) -> &Utf8Path {
        &self.exchange_dir
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self, state: &mut TrackerState) -> ObjectId {
        let id = ObjectId::new(&self.runtime_id, state.current_id);
        state.current_id += 1;
        id
    }

    fn exchange_file(&self, id: &ObjectId) -> Utf8PathBuf {
        self.exchange_dir.join(id.as_str())
    }

    /// Registers `object`, assigning a fresh identifier when it is unknown or
    /// when `force` is set.
    fn register<T>(&self, state: &mut TrackerState, object: &Arc<T>, force: bool) -> ObjectId
    where
        T: Send + Sync + 'static,
    {
        let identity = Identity::of(object);

        if let Some(id) = state.addresses.get(&identity).cloned() {
            if !force {
                return id;
            }
            state.pop_object(&id);
        }

        let id = self.next_id(state);
        let entry = Entry {
            identity,
            _object: Arc::clone(object) as Dynamic,
        };

        state.objects.insert(id.clone(), entry);
        state.addresses.insert(identity, id.clone());
        id
    }

    fn track_inner<T>(
        &self,
        object: &Arc<T>,
        collection: bool,
        force: bool,
    ) -> (ObjectId, Option<Utf8PathBuf>)
    where
        T: Send + Sync + 'static,
    {
        let mut state = self.state();
        let id = self.register(&mut state, object, force);

        let file_name = if collection {
            tracing::debug!("tracking collection {}", id);
            None
        } else {
            let file_name = state
                .file_names
                .entry(id.clone())
                .or_insert_with(|| self.exchange_file(&id))
                .clone();
            state.pending.insert(id.clone());
            tracing::debug!("tracking object {} to file {}", id, file_name);
            Some(file_name)
        };

        state.report_now();
        (id, file_name)
    }

    /// Starts tracking `object`.
    ///
    /// Collections only get an identifier; their elements are tracked on
    /// their own. Tracking an object that is already tracked returns its
    /// current identifier.
    pub fn track<T>(&self, object: &Arc<T>, collection: bool) -> (ObjectId, Option<Utf8PathBuf>)
    where
        T: Send + Sync + 'static,
    {
        self.track_inner(object, collection, false)
    }

    /// Like [`track`](Self::track), but always issues a new identifier.
    pub fn track_forced<T>(
        &self,
        object: &Arc<T>,
        collection: bool,
    ) -> (ObjectId, Option<Utf8PathBuf>)
    where
        T: Send + Sync + 'static,
    {
        self.track_inner(object, collection, true)
    }

    /// Allocates an identifier (and exchange path) without registering any
    /// object.
    pub fn not_track(&self, collection: bool) -> (ObjectId, Option<Utf8PathBuf>) {
        let mut state = self.state();
        let id = self.next_id(&mut state);
        let file_name = (!collection).then(|| self.exchange_file(&id));
        (id, file_name)
    }

    /// Drops every record of `object`. Does nothing for untracked objects.
    pub fn stop_tracking<T>(&self, object: &Arc<T>, collection: bool)
    where
        T: Send + Sync + 'static,
    {
        let mut state = self.state();
        let identity = Identity::of(object);

        if let Some(id) = state.addresses.get(&identity).cloned() {
            if collection {
                tracing::debug!("stop tracking collection {}", id);
            } else {
                tracing::debug!("stop tracking object {}", id);
                state.file_names.remove(&id);
                state.pending.remove(&id);
            }
            state.written.remove(&id);
            state.pop_object(&id);
        }

        state.report_now();
    }

    /// Retires an identifier that no longer has an object attached, such as
    /// the old identifier left behind by [`update_mapping`](Self::update_mapping).
    pub fn forget(&self, id: &ObjectId) {
        let mut state = self.state();
        state.file_names.remove(id);
        state.pending.remove(id);
        state.written.remove(id);
        state.pop_object(id);
        state.report_now();
    }

    /// Identifier of `object` if it is tracked.
    pub fn is_tracked<T: ?Sized>(&self, object: &Arc<T>) -> Option<ObjectId> {
        self.state().addresses.get(&Identity::of(object)).cloned()
    }

    /// Alias of [`is_tracked`](Self::is_tracked).
    pub fn get_object_id<T: ?Sized>(&self, object: &Arc<T>) -> Option<ObjectId> {
        self.is_tracked(object)
    }

    pub fn get_file_name(&self, id: &ObjectId) -> Result<Utf8PathBuf, TrackerError> {
        self.state()
            .file_names
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::NoExchangeFile(id.clone()))
    }

    /// Every exchange file currently known, for cleanup.
    pub fn get_all_file_names(&self) -> Vec<Utf8PathBuf> {
        self.state().file_names.values().cloned().collect()
    }

    pub fn is_obj_pending_to_synchronize<T: ?Sized>(&self, object: &Arc<T>) -> bool {
        let state = self.state();
        state
            .addresses
            .get(&Identity::of(object))
            .is_some_and(|id| state.pending.contains(id))
    }

    pub fn is_pending_to_synchronize(&self, id: &ObjectId) -> bool {
        self.state().pending.contains(id)
    }

    /// Marks `id` as overwritten remotely. Fails for identifiers this
    /// tracker holds no record of.
    pub fn set_pending_to_synchronize(&self, id: &ObjectId) -> Result<(), TrackerError> {
        let mut state = self.state();
        if !state.file_names.contains_key(id) && !state.objects.contains_key(id) {
            return Err(TrackerError::Untracked(id.clone()));
        }
        state.pending.insert(id.clone());
        state.report_now();
        Ok(())
    }

    /// Records that the latest remote version of `id` has been pulled back.
    /// Returns whether it was pending.
    pub fn mark_synchronized(&self, id: &ObjectId) -> bool {
        let mut state = self.state();
        let was_pending = state.pending.remove(id);
        state.report_now();
        was_pending
    }

    pub fn has_been_written(&self, id: &ObjectId) -> bool {
        self.state().written.contains(id)
    }

    /// Removes `id` from the written set and returns its exchange file.
    pub fn pop_written_object(&self, id: &ObjectId) -> Result<Utf8PathBuf, TrackerError> {
        let mut state = self.state();

        if !state.written.remove(id) {
            return Err(TrackerError::NotWritten(id.clone()));
        }

        let file_name = state
            .file_names
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::NoExchangeFile(id.clone()));

        state.report_now();
        file_name
    }

    /// Replaces the identity behind `old` with a fresh one for `object`.
    ///
    /// The new identifier gets an exchange path derived from the old one and
    /// is marked as written. The old identifier keeps its records until the
    /// caller retires it with [`forget`](Self::forget).
    pub fn update_mapping<T>(&self, old: &ObjectId, object: &Arc<T>) -> Result<ObjectId, TrackerError>
    where
        T: Send + Sync + 'static,
    {
        let mut state = self.state();

        let old_file_name = state
            .file_names
            .get(old)
            .cloned()
            .ok_or_else(|| TrackerError::Untracked(old.clone()))?;

        let id = self.register(&mut state, object, true);
        let file_name = Utf8PathBuf::from(old_file_name.as_str().replace(old.as_str(), id.as_str()));

        tracing::debug!("remapping {} to {} ({})", old, id, file_name);

        state.file_names.insert(id.clone(), file_name);
        state.written.insert(id.clone());
        state.report_now();

        Ok(id)
    }

    /// Clears every table. Identifiers keep increasing afterwards.
    pub fn clean_all(&self) {
        let mut state = self.state();
        state.file_names.clear();
        state.pending.clear();
        state.written.clear();
        state.objects.clear();
        state.addresses.clear();
        state.report_now();
    }

    pub fn sizes(&self) -> TableSizes {
        self.state().sizes()
    }

    /// Starts recording a snapshot after every mutation.
    ///
    /// Memory grows with every call while enabled.
    pub fn enable_report(&self) {
        let mut state = self.state();
        state.reporting = true;
        state.report.restart();
        state.report_now();
    }

    pub fn is_report_enabled(&self) -> bool {
        self.state().reporting
    }

    pub fn report(&self) -> Vec<Snapshot> {
        self.state().report.entries.clone()
    }

    pub fn clean_report(&self) {
        self.state().report.clear();
    }

    /// Stores the recorded snapshots as JSON inside `dir`.
    pub fn write_report(&self, dir: impl AsRef<Utf8Path>) -> Result<Utf8PathBuf, TrackerError> {
        let entries = self.report();
        report::write(&entries, dir.as_ref())
    }
}

//! Placement resolver — asks the hardware backend where profiles fit.
//!
//! The backend is an injected capability behind [`HardwareBackend`]. A
//! [`Session`] brackets one advertisement cycle: it initializes the
//! backend on open and shuts it down when dropped, so every exit path of
//! the cycle releases it.
//!
//! Resolution is all-or-nothing. Any backend failure, a missing
//! placement for a requested profile, or cancellation discards whatever
//! was collected so far.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use part_core::Placement;

use crate::error::{PlacementError, PlacementResult};

/// Number of profile slots enumerated per GPU.
pub const PROFILE_SLOT_LIMIT: u32 = 32;

/// Profile id → placements the hardware reports as possible.
pub type ProfilePlacements = BTreeMap<u32, Vec<Placement>>;

/// Status codes a hardware backend can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend already initialized")]
    AlreadyInitialized,

    #[error("operation not supported")]
    NotSupported,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("device not found")]
    NotFound,

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Slot-level results that mean "nothing here" rather than failure.
    fn is_skippable(&self) -> bool {
        matches!(self, BackendError::NotSupported | BackendError::InvalidArgument)
    }
}

/// Profile information reported for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileInfo {
    pub id: u32,
    pub slot: u32,
    pub slice_count: u32,
}

/// Minimal contract a hardware query backend must satisfy.
///
/// All calls are synchronous and may block.
pub trait HardwareBackend: Send + Sync {
    type Device;

    fn init(&self) -> Result<(), BackendError>;

    fn shutdown(&self) -> Result<(), BackendError>;

    fn device_by_address(&self, address: &str) -> Result<Self::Device, BackendError>;

    fn profile_info(&self, device: &Self::Device, slot: u32) -> Result<ProfileInfo, BackendError>;

    fn possible_placements(
        &self,
        device: &Self::Device,
        profile: &ProfileInfo,
    ) -> Result<Vec<Placement>, BackendError>;
}

/// Cooperative cancellation for a round of backend calls.
///
/// Checked before every call; clones share the cancel flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check(&self) -> PlacementResult<()> {
        if self.is_cancelled() {
            return Err(PlacementError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(PlacementError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// An open backend session. Shuts the backend down on drop.
pub struct Session<B: HardwareBackend> {
    backend: Arc<B>,
    closed: bool,
}

/// Initialize the backend and open a session.
///
/// "Already initialized" counts as success.
pub fn open_session<B: HardwareBackend>(backend: Arc<B>) -> PlacementResult<Session<B>> {
    match backend.init() {
        Ok(()) => {}
        Err(BackendError::AlreadyInitialized) => {
            debug!("hardware backend already initialized");
        }
        Err(e) => return Err(PlacementError::BackendUnavailable(e.to_string())),
    }
    debug!("hardware session opened");
    Ok(Session {
        backend,
        closed: false,
    })
}

impl<B: HardwareBackend> Session<B> {
    /// Resolve possible placements for `profile_ids` on the GPU at `address`.
    ///
    /// Every requested profile must end up with at least one placement.
    pub fn read_placements(
        &self,
        address: &str,
        profile_ids: &[u32],
        cancel: &Cancellation,
    ) -> PlacementResult<ProfilePlacements> {
        if address.trim().is_empty() {
            return Err(PlacementError::EmptyAddress);
        }
        let requested: BTreeSet<u32> = profile_ids.iter().copied().collect();

        cancel.check()?;
        let device = self
            .backend
            .device_by_address(address)
            .map_err(|e| query_error(address, "device_by_address", e))?;

        let mut resolved = ProfilePlacements::new();
        for slot in 0..PROFILE_SLOT_LIMIT {
            cancel.check()?;
            let info = match self.backend.profile_info(&device, slot) {
                Ok(info) => info,
                Err(e) if e.is_skippable() => continue,
                Err(e) => return Err(query_error(address, "profile_info", e)),
            };
            if !requested.contains(&info.id) {
                continue;
            }

            cancel.check()?;
            let placements = match self.backend.possible_placements(&device, &info) {
                Ok(p) => p,
                Err(e) if e.is_skippable() => {
                    debug!(%address, slot, profile_id = info.id, "placements not supported for slot");
                    continue;
                }
                Err(e) => return Err(query_error(address, "possible_placements", e)),
            };
            debug!(
                %address,
                slot,
                profile_id = info.id,
                placements = placements.len(),
                "resolved profile placements"
            );
            resolved.entry(info.id).or_default().extend(placements);
        }

        for id in &requested {
            if resolved.get(id).is_none_or(|p| p.is_empty()) {
                warn!(%address, profile_id = id, "no placement resolved for requested profile");
                return Err(PlacementError::MissingPlacement {
                    address: address.to_string(),
                    profile_id: *id,
                });
            }
        }

        resolved.retain(|id, _| requested.contains(id));
        for placements in resolved.values_mut() {
            placements.sort();
            placements.dedup();
        }

        info!(%address, profiles = resolved.len(), "placements resolved");
        Ok(resolved)
    }

    /// Shut the backend down now instead of on drop.
    pub fn close(mut self) -> PlacementResult<()> {
        self.closed = true;
        self.backend
            .shutdown()
            .map_err(|e| PlacementError::BackendUnavailable(e.to_string()))
    }
}

impl<B: HardwareBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.backend.shutdown() {
            warn!(error = %e, "hardware backend shutdown failed");
        } else {
            debug!("hardware session released");
        }
    }
}

fn query_error(address: &str, operation: &'static str, e: BackendError) -> PlacementError {
    PlacementError::Query {
        address: address.to_string(),
        operation,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Scriptable backend: slot → result, profile id → placements result.
    #[derive(Default)]
    struct FakeBackend {
        init_result: Option<BackendError>,
        slots: HashMap<u32, Result<ProfileInfo, BackendError>>,
        placements: HashMap<u32, Result<Vec<Placement>, BackendError>>,
        shutdowns: AtomicUsize,
        queried_slots: Mutex<Vec<u32>>,
        cancel_after_slot: Option<(u32, Cancellation)>,
    }

    impl FakeBackend {
        fn with_profile(mut self, slot: u32, id: u32, placements: Vec<Placement>) -> Self {
            self.slots.insert(
                slot,
                Ok(ProfileInfo {
                    id,
                    slot,
                    slice_count: 1,
                }),
            );
            self.placements.insert(id, Ok(placements));
            self
        }
    }

    impl HardwareBackend for FakeBackend {
        type Device = String;

        fn init(&self) -> Result<(), BackendError> {
            match &self.init_result {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        fn shutdown(&self) -> Result<(), BackendError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn device_by_address(&self, address: &str) -> Result<String, BackendError> {
            if address == "0000:ff:00.0" {
                return Err(BackendError::NotFound);
            }
            Ok(address.to_string())
        }

        fn profile_info(&self, _device: &String, slot: u32) -> Result<ProfileInfo, BackendError> {
            self.queried_slots.lock().unwrap().push(slot);
            if let Some((after, cancel)) = &self.cancel_after_slot {
                if slot == *after {
                    cancel.cancel();
                }
            }
            self.slots
                .get(&slot)
                .cloned()
                .unwrap_or(Err(BackendError::NotSupported))
        }

        fn possible_placements(
            &self,
            _device: &String,
            profile: &ProfileInfo,
        ) -> Result<Vec<Placement>, BackendError> {
            self.placements
                .get(&profile.id)
                .cloned()
                .unwrap_or(Err(BackendError::InvalidArgument))
        }
    }

    const ADDR: &str = "0000:3b:00.0";

    #[test]
    fn resolves_requested_profiles() {
        let backend = Arc::new(
            FakeBackend::default()
                .with_profile(0, 19, vec![Placement::new(1, 1), Placement::new(0, 1)])
                .with_profile(5, 0, vec![Placement::new(0, 8)]),
        );
        let session = open_session(backend.clone()).unwrap();
        let got = session
            .read_placements(ADDR, &[19], &Cancellation::new())
            .unwrap();

        assert_eq!(got.len(), 1);
        assert_eq!(got[&19], vec![Placement::new(0, 1), Placement::new(1, 1)]);
    }

    #[test]
    fn enumerates_all_slots() {
        let backend = Arc::new(FakeBackend::default().with_profile(31, 7, vec![Placement::new(0, 2)]));
        let session = open_session(backend.clone()).unwrap();
        let got = session
            .read_placements(ADDR, &[7], &Cancellation::new())
            .unwrap();
        assert_eq!(got[&7], vec![Placement::new(0, 2)]);
        assert_eq!(backend.queried_slots.lock().unwrap().len(), PROFILE_SLOT_LIMIT as usize);
    }

    #[test]
    fn empty_address_fails_before_backend() {
        let backend = Arc::new(FakeBackend::default());
        let session = open_session(backend.clone()).unwrap();
        let err = session
            .read_placements("  ", &[19], &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, PlacementError::EmptyAddress));
        assert!(backend.queried_slots.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_profile_fails_whole_resolution() {
        let backend = Arc::new(FakeBackend::default().with_profile(0, 19, vec![Placement::new(0, 1)]));
        let session = open_session(backend).unwrap();
        let err = session
            .read_placements(ADDR, &[19, 14], &Cancellation::new())
            .unwrap_err();
        match err {
            PlacementError::MissingPlacement { profile_id, address } => {
                assert_eq!(profile_id, 14);
                assert_eq!(address, ADDR);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_placement_list_counts_as_missing() {
        let backend = Arc::new(FakeBackend::default().with_profile(0, 19, vec![]));
        let session = open_session(backend).unwrap();
        let err = session
            .read_placements(ADDR, &[19], &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, PlacementError::MissingPlacement { profile_id: 19, .. }));
    }

    #[test]
    fn backend_failure_aborts_enumeration() {
        let mut backend = FakeBackend::default().with_profile(0, 19, vec![Placement::new(0, 1)]);
        backend
            .slots
            .insert(3, Err(BackendError::Other("GPU is lost".into())));
        let session = open_session(Arc::new(backend)).unwrap();
        let err = session
            .read_placements(ADDR, &[19], &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, PlacementError::Query { operation: "profile_info", .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn unknown_device_is_query_error() {
        let session = open_session(Arc::new(FakeBackend::default())).unwrap();
        let err = session
            .read_placements("0000:ff:00.0", &[19], &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, PlacementError::Query { operation: "device_by_address", .. }));
    }

    #[test]
    fn already_initialized_is_success() {
        let backend = FakeBackend {
            init_result: Some(BackendError::AlreadyInitialized),
            ..FakeBackend::default()
        };
        assert!(open_session(Arc::new(backend)).is_ok());
    }

    #[test]
    fn init_failure_is_backend_unavailable() {
        let backend = FakeBackend {
            init_result: Some(BackendError::Other("driver not loaded".into())),
            ..FakeBackend::default()
        };
        let err = open_session(Arc::new(backend)).err().unwrap();
        assert!(matches!(err, PlacementError::BackendUnavailable(_)));
    }

    #[test]
    fn session_released_on_drop_after_failure() {
        let backend = Arc::new(FakeBackend::default());
        {
            let session = open_session(backend.clone()).unwrap();
            assert!(session.read_placements(ADDR, &[19], &Cancellation::new()).is_err());
        }
        assert_eq!(backend.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_close_releases_once() {
        let backend = Arc::new(FakeBackend::default());
        let session = open_session(backend.clone()).unwrap();
        session.close().unwrap();
        assert_eq!(backend.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_mid_enumeration_returns_no_data() {
        let cancel = Cancellation::new();
        let mut backend = FakeBackend::default().with_profile(0, 19, vec![Placement::new(0, 1)]);
        backend.cancel_after_slot = Some((2, cancel.clone()));
        let session = open_session(Arc::new(backend)).unwrap();

        let err = session.read_placements(ADDR, &[19], &cancel).unwrap_err();
        assert!(matches!(err, PlacementError::Cancelled));
    }

    #[test]
    fn expired_deadline_is_reported() {
        let backend = Arc::new(FakeBackend::default().with_profile(0, 19, vec![Placement::new(0, 1)]));
        let session = open_session(backend).unwrap();
        let cancel = Cancellation::new().with_deadline(Instant::now() - Duration::from_secs(1));
        let err = session.read_placements(ADDR, &[19], &cancel).unwrap_err();
        assert!(matches!(err, PlacementError::DeadlineExceeded));
    }
}

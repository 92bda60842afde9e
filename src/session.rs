//! DRM session state machine.
//!
//! [`DrmSession`] owns one platform session for one scheme and walks it
//! through `Closed -> Opening -> Opened -> OpenedWithKeys`. It performs no
//! I/O: outbound license and provisioning requests, as well as listener
//! notifications, are queued as [`Effect`]s which the owner drains after
//! every call (see [`crate::driver`]). Responses come back through
//! [`DrmSession::on_response`] tagged with the [`RequestTicket`] they were
//! issued under, so answers to requests from an earlier open cycle are
//! discarded.
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;

use tracing::{debug, info, warn};

use crate::error::{DrmSessionError, Error, Result};
use crate::init_data::{DrmInitData, SchemeData};
use crate::platform::{
    DrmEvent, EventSink, KeyRequest, KeyType, MediaDrm, PlatformError, ProvisionRequest,
};
use crate::scheme::SchemeId;

/// Lifecycle state of a [`DrmSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not open. Initial state and the state after the last close.
    Closed,
    /// Waiting for the platform crypto context, possibly via provisioning.
    Opening,
    /// Crypto context available, keys not loaded yet.
    Opened,
    /// Keys loaded.
    OpenedWithKeys,
    /// Fatal failure; only `close` leaves this state.
    Error,
}

impl SessionState {
    fn is_open(self) -> bool {
        matches!(self, SessionState::Opened | SessionState::OpenedWithKeys)
    }
}

/// Kind of outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Provision,
    Keys,
}

/// Identifies an outbound request and the open cycle it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    pub epoch: u64,
    pub kind: RequestKind,
}

/// Payload of an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundRequest {
    Provision(ProvisionRequest),
    Keys(KeyRequest),
}

/// A request the owner must execute and answer through [`DrmSession::on_response`].
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub ticket: RequestTicket,
    pub scheme: SchemeId,
    pub request: OutboundRequest,
}

/// Listener notification.
#[derive(Debug, Clone)]
pub enum SessionNotification {
    KeysLoaded,
    SessionError(Error),
    KeysRestored,
    KeysRemoved,
}

impl SessionNotification {
    /// Deliver this notification to `listener`.
    pub fn dispatch(&self, listener: &dyn DrmSessionListener) {
        match self {
            SessionNotification::KeysLoaded => listener.on_keys_loaded(),
            SessionNotification::SessionError(error) => listener.on_session_error(error),
            SessionNotification::KeysRestored => listener.on_keys_restored(),
            SessionNotification::KeysRemoved => listener.on_keys_removed(),
        }
    }
}

/// Work produced by the state machine.
#[derive(Debug, Clone)]
pub enum Effect {
    Request(PendingRequest),
    Notify(SessionNotification),
}

/// Receives session notifications. Every method defaults to a no-op.
pub trait DrmSessionListener: Send + Sync {
    fn on_keys_loaded(&self) {}

    fn on_session_error(&self, _error: &Error) {}

    fn on_keys_restored(&self) {}

    fn on_keys_removed(&self) {}
}

impl DrmSessionListener for mpsc::Sender<SessionNotification> {
    fn on_keys_loaded(&self) {
        let _ = self.send(SessionNotification::KeysLoaded);
    }

    fn on_session_error(&self, error: &Error) {
        let _ = self.send(SessionNotification::SessionError(error.clone()));
    }

    fn on_keys_restored(&self) {
        let _ = self.send(SessionNotification::KeysRestored);
    }

    fn on_keys_removed(&self) {
        let _ = self.send(SessionNotification::KeysRemoved);
    }
}

/// Reference counted DRM session for one scheme.
pub struct DrmSession<M: MediaDrm> {
    scheme: SchemeId,
    drm: M,
    optional_parameters: Option<HashMap<String, String>>,
    open_count: usize,
    state: SessionState,
    epoch: u64,
    provisioning_in_progress: bool,
    key_request_in_flight: bool,
    key_provision_retry_used: bool,
    init_data: Option<SchemeData>,
    session_id: Option<Vec<u8>>,
    crypto: Option<M::Crypto>,
    last_error: Option<DrmSessionError>,
    effects: VecDeque<Effect>,
}

impl<M: MediaDrm> DrmSession<M> {
    /// Create a closed session for `scheme` backed by `drm`.
    ///
    /// `optional_parameters` are passed unchanged to every key request.
    pub fn new(
        scheme: SchemeId,
        drm: M,
        optional_parameters: Option<HashMap<String, String>>,
    ) -> Self {
        Self {
            scheme,
            drm,
            optional_parameters,
            open_count: 0,
            state: SessionState::Closed,
            epoch: 0,
            provisioning_in_progress: false,
            key_request_in_flight: false,
            key_provision_retry_used: false,
            init_data: None,
            session_id: None,
            crypto: None,
            last_error: None,
            effects: VecDeque::new(),
        }
    }

    pub fn scheme(&self) -> SchemeId {
        self.scheme
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn open_count(&self) -> usize {
        self.open_count
    }

    /// The platform engine.
    pub fn drm(&self) -> &M {
        &self.drm
    }

    /// Register the engine's event sink.
    pub fn set_event_sink(&mut self, sink: Box<dyn EventSink>) {
        self.drm.set_event_sink(sink);
    }

    /// Acquire a reference. The first reference opens the platform session.
    pub fn open(&mut self, init_data: &DrmInitData) {
        self.open_count += 1;
        if self.open_count != 1 {
            debug!(scheme = %self.scheme, open_count = self.open_count, "session already open");
            return;
        }

        self.epoch = self.epoch.wrapping_add(1);
        let Some(scheme_data) = init_data.get(self.scheme) else {
            self.on_error(Error::UnsupportedScheme(format!(
                "Content has no init data for {}",
                self.scheme
            )));
            return;
        };

        info!(scheme = %self.scheme, epoch = self.epoch, "opening session");
        self.init_data = Some(scheme_data.clone());
        self.state = SessionState::Opening;
        self.open_internal(true);
    }

    /// Release a reference. The last reference tears the session down.
    pub fn close(&mut self) -> Result<()> {
        if self.open_count == 0 {
            return Err(Error::InvalidState("Session is not open".to_string()));
        }

        self.open_count -= 1;
        if self.open_count > 0 {
            return Ok(());
        }

        info!(scheme = %self.scheme, "closing session");
        self.state = SessionState::Closed;
        self.epoch = self.epoch.wrapping_add(1);
        self.provisioning_in_progress = false;
        self.key_request_in_flight = false;
        self.key_provision_retry_used = false;
        self.effects.retain(|effect| matches!(effect, Effect::Notify(_)));
        self.init_data = None;
        self.crypto = None;
        self.last_error = None;
        if let Some(session_id) = self.session_id.take() {
            self.drm.close_session(&session_id);
        }
        Ok(())
    }

    /// Apply the answer to a request issued under `ticket`.
    pub fn on_response(&mut self, ticket: RequestTicket, response: Result<Vec<u8>>) {
        if ticket.epoch != self.epoch {
            debug!(
                scheme = %self.scheme,
                ticket_epoch = ticket.epoch,
                epoch = self.epoch,
                "dropping stale response"
            );
            return;
        }

        match ticket.kind {
            RequestKind::Provision => self.on_provision_response(response),
            RequestKind::Keys => self.on_key_response(response),
        }
    }

    /// Handle an asynchronous platform event.
    pub fn on_event(&mut self, event: DrmEvent) {
        if self.open_count == 0 || !self.state.is_open() {
            debug!(scheme = %self.scheme, ?event, state = ?self.state, "dropping event");
            return;
        }

        debug!(scheme = %self.scheme, ?event, "platform event");
        match event {
            DrmEvent::KeyRequired => self.post_key_request(),
            DrmEvent::KeyExpired => {
                if self.state == SessionState::OpenedWithKeys {
                    warn!(scheme = %self.scheme, "keys expired");
                    self.state = SessionState::Opened;
                    self.last_error = Some(DrmSessionError::new(Error::KeysExpired));
                    self.notify(SessionNotification::SessionError(Error::KeysExpired));
                }
            }
            DrmEvent::ProvisionRequired => {
                self.state = SessionState::Opened;
                self.post_provision_request();
            }
        }
    }

    /// Crypto context for decoders. Only available while open.
    pub fn crypto(&self) -> Result<&M::Crypto> {
        if !self.state.is_open() {
            return Err(self.invalid_state("crypto context"));
        }
        self.crypto
            .as_ref()
            .ok_or_else(|| self.invalid_state("crypto context"))
    }

    /// Last recorded failure.
    ///
    /// Set by every session failure, including key expiry and failures that
    /// leave a session with loaded keys open, so it is not limited to
    /// [`SessionState::Error`]. Cleared when keys load and on the final close.
    pub fn error(&self) -> Option<&DrmSessionError> {
        self.last_error.as_ref()
    }

    /// Key status reported by the engine for this session.
    pub fn query_key_status(&self) -> Result<HashMap<String, String>> {
        match (&self.session_id, self.state) {
            (Some(session_id), state) if state != SessionState::Error => {
                Ok(self.drm.query_key_status(session_id)?)
            }
            _ => Err(self.invalid_state("key status")),
        }
    }

    /// Whether decoding `mime_type` needs a secure decoder.
    pub fn requires_secure_decoder(&self, mime_type: &str) -> Result<bool> {
        let crypto = self.crypto()?;
        Ok(self.drm.requires_secure_decoder(crypto, mime_type))
    }

    /// Key set id of an offline license. Streaming sessions have none.
    pub fn offline_license_key_set_id(&self) -> &[u8] {
        &[]
    }

    /// Drain queued effects.
    pub fn take_effects(&mut self) -> VecDeque<Effect> {
        std::mem::take(&mut self.effects)
    }

    fn open_internal(&mut self, allow_provisioning: bool) {
        let result = self
            .ensure_platform_session()
            .and_then(|session_id| self.drm.create_crypto(&session_id));

        match result {
            Ok(crypto) => {
                self.crypto = Some(crypto);
                self.state = SessionState::Opened;
                debug!(scheme = %self.scheme, "session opened");
                self.post_key_request();
            }
            Err(PlatformError::NotProvisioned) if allow_provisioning => {
                debug!(scheme = %self.scheme, "device not provisioned");
                self.post_provision_request();
            }
            Err(e) => self.on_error(e.into()),
        }
    }

    /// Reuse the open platform session, or open one.
    fn ensure_platform_session(&mut self) -> std::result::Result<Vec<u8>, PlatformError> {
        if let Some(session_id) = &self.session_id {
            return Ok(session_id.clone());
        }
        let session_id = self.drm.open_session()?;
        self.session_id = Some(session_id.clone());
        Ok(session_id)
    }

    fn post_provision_request(&mut self) {
        if self.provisioning_in_progress {
            debug!(scheme = %self.scheme, "provisioning already in progress");
            return;
        }

        match self.drm.get_provision_request() {
            Ok(request) => {
                self.provisioning_in_progress = true;
                self.push_request(RequestKind::Provision, OutboundRequest::Provision(request));
            }
            Err(e) => self.on_error(e.into()),
        }
    }

    fn on_provision_response(&mut self, response: Result<Vec<u8>>) {
        self.provisioning_in_progress = false;
        if !matches!(
            self.state,
            SessionState::Opening | SessionState::Opened | SessionState::OpenedWithKeys
        ) {
            debug!(scheme = %self.scheme, state = ?self.state, "dropping provisioning response");
            return;
        }

        let applied = response.and_then(|response| {
            self.drm.provide_provision_response(&response)?;
            Ok(())
        });
        if let Err(e) = applied {
            self.on_error(e);
            return;
        }

        info!(scheme = %self.scheme, "device provisioned");
        if self.state == SessionState::Opening {
            self.open_internal(false);
        } else {
            self.post_key_request();
        }
    }

    fn post_key_request(&mut self) {
        if self.key_request_in_flight {
            debug!(scheme = %self.scheme, "key request already in flight");
            return;
        }
        let (Some(session_id), Some(init_data)) = (&self.session_id, &self.init_data) else {
            return;
        };

        let result = self.drm.get_key_request(
            session_id,
            &init_data.data,
            &init_data.mime_type,
            KeyType::Streaming,
            self.optional_parameters.as_ref(),
        );
        match result {
            Ok(request) => {
                self.key_request_in_flight = true;
                self.push_request(RequestKind::Keys, OutboundRequest::Keys(request));
            }
            Err(e) => self.on_keys_error(e.into()),
        }
    }

    fn on_key_response(&mut self, response: Result<Vec<u8>>) {
        self.key_request_in_flight = false;
        if !self.state.is_open() {
            debug!(scheme = %self.scheme, state = ?self.state, "dropping key response");
            return;
        }
        let Some(session_id) = &self.session_id else {
            return;
        };

        let applied = response.and_then(|response| {
            self.drm.provide_key_response(session_id, &response)?;
            Ok(())
        });
        match applied {
            Ok(()) => {
                info!(scheme = %self.scheme, "keys loaded");
                self.state = SessionState::OpenedWithKeys;
                self.key_provision_retry_used = false;
                self.last_error = None;
                self.notify(SessionNotification::KeysLoaded);
            }
            Err(e) => self.on_keys_error(e),
        }
    }

    fn on_keys_error(&mut self, error: Error) {
        if error.is_not_provisioned() && !self.key_provision_retry_used {
            debug!(scheme = %self.scheme, "key request needs provisioning");
            self.key_provision_retry_used = true;
            self.post_provision_request();
        } else {
            self.on_error(error);
        }
    }

    fn on_error(&mut self, error: Error) {
        warn!(scheme = %self.scheme, state = ?self.state, error = %error, "session failure");
        let error = DrmSessionError::new(error);
        self.last_error = Some(error.clone());
        self.notify(SessionNotification::SessionError(Error::DrmSession(error)));
        if self.state != SessionState::OpenedWithKeys {
            self.state = SessionState::Error;
            self.crypto = None;
        }
    }

    fn push_request(&mut self, kind: RequestKind, request: OutboundRequest) {
        self.effects.push_back(Effect::Request(PendingRequest {
            ticket: RequestTicket {
                epoch: self.epoch,
                kind,
            },
            scheme: self.scheme,
            request,
        }));
    }

    fn notify(&mut self, notification: SessionNotification) {
        self.effects.push_back(Effect::Notify(notification));
    }

    fn invalid_state(&self, what: &str) -> Error {
        Error::InvalidState(format!("{} unavailable in state {:?}", what, self.state))
    }
}

impl<M: MediaDrm> std::fmt::Debug for DrmSession<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmSession")
            .field("scheme", &self.scheme)
            .field("state", &self.state)
            .field("open_count", &self.open_count)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeDrm;
    use super::*;

    fn clearkey_init_data() -> DrmInitData {
        DrmInitData::new(vec![SchemeData::new(
            SchemeId::ClearKey.to_uuid(),
            "video/mp4",
            b"init".to_vec(),
        )])
    }

    fn new_session(drm: &FakeDrm) -> DrmSession<FakeDrm> {
        DrmSession::new(SchemeId::ClearKey, drm.clone(), None)
    }

    /// Drain effects, returning (requests, notifications).
    fn drain(
        session: &mut DrmSession<FakeDrm>,
    ) -> (Vec<PendingRequest>, Vec<SessionNotification>) {
        let mut requests = Vec::new();
        let mut notifications = Vec::new();
        for effect in session.take_effects() {
            match effect {
                Effect::Request(request) => requests.push(request),
                Effect::Notify(notification) => notifications.push(notification),
            }
        }
        (requests, notifications)
    }

    fn single_request(session: &mut DrmSession<FakeDrm>, kind: RequestKind) -> RequestTicket {
        let (requests, _) = drain(session);
        assert_eq!(requests.len(), 1, "expected one request, got {:?}", requests);
        assert_eq!(requests[0].ticket.kind, kind);
        requests[0].ticket
    }

    fn open_with_keys(drm: &FakeDrm) -> DrmSession<FakeDrm> {
        let mut session = new_session(drm);
        session.open(&clearkey_init_data());
        let ticket = single_request(&mut session, RequestKind::Keys);
        session.on_response(ticket, Ok(b"license".to_vec()));
        assert_eq!(session.state(), SessionState::OpenedWithKeys);
        drain(&mut session);
        session
    }

    #[test]
    fn open_requests_and_loads_keys() {
        let drm = FakeDrm::default();
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());
        assert_eq!(session.state(), SessionState::Opened);

        let (requests, _) = drain(&mut session);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].scheme, SchemeId::ClearKey);
        let OutboundRequest::Keys(request) = &requests[0].request else {
            panic!("expected key request");
        };
        assert_eq!(request.data, b"init");

        session.on_response(requests[0].ticket, Ok(b"license".to_vec()));
        assert_eq!(session.state(), SessionState::OpenedWithKeys);
        assert_eq!(drm.state().provided_keys, vec![b"license".to_vec()]);
        let (_, notifications) = drain(&mut session);
        assert!(matches!(
            notifications.as_slice(),
            [SessionNotification::KeysLoaded]
        ));

        assert_eq!(session.crypto().unwrap(), &"crypto");
        assert!(session.requires_secure_decoder("video/avc").unwrap());
        assert_eq!(
            session.query_key_status().unwrap().get("LicenseType").map(String::as_str),
            Some("Streaming")
        );
        assert!(session.offline_license_key_set_id().is_empty());
    }

    #[test]
    fn optional_parameters_are_forwarded() {
        let drm = FakeDrm::default();
        let mut params = HashMap::new();
        params.insert("PrivacyMode".to_string(), "enable".to_string());
        let mut session = DrmSession::new(SchemeId::ClearKey, drm.clone(), Some(params.clone()));
        session.open(&clearkey_init_data());
        assert_eq!(drm.state().key_requests, vec![Some(params)]);
    }

    #[test]
    fn reference_counting() {
        let drm = FakeDrm::default();
        let mut session = open_with_keys(&drm);
        session.open(&clearkey_init_data());
        assert_eq!(session.open_count(), 2);
        assert_eq!(drm.state().opened.len(), 1);
        assert!(drain(&mut session).0.is_empty());

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::OpenedWithKeys);
        assert!(drm.state().closed.is_empty());

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(drm.state().closed, vec![vec![1u8]]);

        assert!(matches!(session.close(), Err(Error::InvalidState(_))));
        assert_eq!(drm.state().closed.len(), 1);
    }

    #[test]
    fn provisions_once_during_open() {
        let drm = FakeDrm::default();
        drm.state()
            .crypto_results
            .push_back(Err(PlatformError::NotProvisioned));
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());
        assert_eq!(session.state(), SessionState::Opening);

        let ticket = single_request(&mut session, RequestKind::Provision);
        session.on_response(ticket, Ok(b"certificate".to_vec()));
        assert_eq!(drm.state().provided_provisions, vec![b"certificate".to_vec()]);
        assert_eq!(session.state(), SessionState::Opened);
        single_request(&mut session, RequestKind::Keys);

        // The platform session allocated before provisioning is reused.
        assert_eq!(drm.state().opened.len(), 1);
    }

    #[test]
    fn second_not_provisioned_during_open_is_fatal() {
        let drm = FakeDrm::default();
        {
            let mut state = drm.state();
            state.crypto_results.push_back(Err(PlatformError::NotProvisioned));
            state.crypto_results.push_back(Err(PlatformError::NotProvisioned));
        }
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());
        let ticket = single_request(&mut session, RequestKind::Provision);
        session.on_response(ticket, Ok(b"certificate".to_vec()));

        assert_eq!(session.state(), SessionState::Error);
        assert!(session.error().unwrap().cause().is_not_provisioned());
        let (requests, notifications) = drain(&mut session);
        assert!(requests.is_empty());
        assert!(matches!(
            notifications.as_slice(),
            [SessionNotification::SessionError(Error::DrmSession(_))]
        ));
    }

    #[test]
    fn key_path_provisions_exactly_once() {
        let drm = FakeDrm::default();
        {
            let mut state = drm.state();
            state.key_response_results.push_back(Err(PlatformError::NotProvisioned));
            state.key_response_results.push_back(Err(PlatformError::NotProvisioned));
        }
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());

        let keys = single_request(&mut session, RequestKind::Keys);
        session.on_response(keys, Ok(b"license".to_vec()));
        let provision = single_request(&mut session, RequestKind::Provision);
        session.on_response(provision, Ok(b"certificate".to_vec()));
        let keys = single_request(&mut session, RequestKind::Keys);
        session.on_response(keys, Ok(b"license".to_vec()));

        assert_eq!(session.state(), SessionState::Error);
        assert!(session.error().unwrap().cause().is_not_provisioned());
        assert!(drain(&mut session).0.is_empty());
        assert_eq!(drm.state().provided_provisions.len(), 1);
    }

    #[test]
    fn provisioning_requests_are_coalesced() {
        let drm = FakeDrm::default();
        let mut session = open_with_keys(&drm);

        session.on_event(DrmEvent::ProvisionRequired);
        assert_eq!(session.state(), SessionState::Opened);
        let ticket = single_request(&mut session, RequestKind::Provision);

        session.on_event(DrmEvent::ProvisionRequired);
        assert!(drain(&mut session).0.is_empty());

        session.on_response(ticket, Ok(b"certificate".to_vec()));
        single_request(&mut session, RequestKind::Keys);
    }

    #[test]
    fn provisioning_failures_are_fatal() {
        let drm = FakeDrm::default();
        {
            let mut state = drm.state();
            state.crypto_results.push_back(Err(PlatformError::NotProvisioned));
            state
                .provision_response_results
                .push_back(Err(PlatformError::DeniedByServer("revoked".to_string())));
        }
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());
        let ticket = single_request(&mut session, RequestKind::Provision);
        session.on_response(ticket, Ok(b"certificate".to_vec()));
        assert_eq!(session.state(), SessionState::Error);

        let mut session = new_session(&FakeDrm::default());
        session.state = SessionState::Opening;
        session.epoch = 1;
        session.provisioning_in_progress = true;
        session.on_response(
            RequestTicket {
                epoch: 1,
                kind: RequestKind::Provision,
            },
            Err(Error::Transport("timeout".to_string())),
        );
        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(
            session.error().unwrap().cause(),
            Error::Transport(_)
        ));
    }

    #[test]
    fn other_platform_failures_are_fatal() {
        let drm = FakeDrm::default();
        drm.state()
            .crypto_results
            .push_back(Err(PlatformError::Other("no hardware".to_string())));
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());

        assert_eq!(session.state(), SessionState::Error);
        assert!(drain(&mut session).0.is_empty());
        assert!(matches!(session.crypto(), Err(Error::InvalidState(_))));
        assert!(matches!(
            session.requires_secure_decoder("video/mp4"),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(session.query_key_status(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn stale_responses_are_ignored() {
        let drm = FakeDrm::default();
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());
        let ticket = single_request(&mut session, RequestKind::Keys);
        session.close().unwrap();

        session.on_response(ticket, Ok(b"license".to_vec()));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(drm.state().provided_keys.is_empty());
        assert!(session.take_effects().is_empty());

        // Reopened: the old ticket belongs to a previous cycle.
        session.open(&clearkey_init_data());
        drain(&mut session);
        session.on_response(ticket, Ok(b"license".to_vec()));
        assert_eq!(session.state(), SessionState::Opened);
        assert!(drm.state().provided_keys.is_empty());
    }

    #[test]
    fn stale_provisioning_response_is_ignored() {
        let drm = FakeDrm::default();
        drm.state()
            .crypto_results
            .push_back(Err(PlatformError::NotProvisioned));
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());
        let ticket = single_request(&mut session, RequestKind::Provision);
        session.close().unwrap();

        session.on_response(ticket, Ok(b"certificate".to_vec()));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(drm.state().provided_provisions.is_empty());
        assert!(session.take_effects().is_empty());
        assert!(session.error().is_none());
    }

    #[test]
    fn one_key_request_in_flight() {
        let drm = FakeDrm::default();
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());
        let ticket = single_request(&mut session, RequestKind::Keys);

        session.on_event(DrmEvent::KeyRequired);
        assert!(drain(&mut session).0.is_empty());

        session.on_response(ticket, Ok(b"license".to_vec()));
        assert_eq!(session.state(), SessionState::OpenedWithKeys);
        drain(&mut session);

        // Answered, so a new cycle may start.
        session.on_event(DrmEvent::KeyRequired);
        single_request(&mut session, RequestKind::Keys);
        session.on_event(DrmEvent::KeyRequired);
        assert!(drain(&mut session).0.is_empty());
        assert_eq!(drm.state().key_requests.len(), 2);
    }

    #[test]
    fn close_clears_key_request_guard() {
        let drm = FakeDrm::default();
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());
        single_request(&mut session, RequestKind::Keys);
        session.close().unwrap();

        session.open(&clearkey_init_data());
        single_request(&mut session, RequestKind::Keys);
    }

    #[test]
    fn key_expiry_keeps_session_alive() {
        let drm = FakeDrm::default();
        let mut session = open_with_keys(&drm);

        session.on_event(DrmEvent::KeyExpired);
        assert_eq!(session.state(), SessionState::Opened);
        assert!(matches!(session.error().unwrap().cause(), Error::KeysExpired));
        let (_, notifications) = drain(&mut session);
        assert!(matches!(
            notifications.as_slice(),
            [SessionNotification::SessionError(Error::KeysExpired)]
        ));
        assert!(session.crypto().is_ok());

        // Only meaningful once keys are loaded.
        session.on_event(DrmEvent::KeyExpired);
        assert!(session.take_effects().is_empty());

        session.on_event(DrmEvent::KeyRequired);
        let ticket = single_request(&mut session, RequestKind::Keys);
        session.on_response(ticket, Ok(b"renewed".to_vec()));
        assert_eq!(session.state(), SessionState::OpenedWithKeys);
        assert!(session.error().is_none());
    }

    #[test]
    fn failure_with_keys_loaded_does_not_demote() {
        let drm = FakeDrm::default();
        let mut session = open_with_keys(&drm);
        session.on_event(DrmEvent::KeyRequired);
        let ticket = single_request(&mut session, RequestKind::Keys);
        session.on_response(ticket, Err(Error::Transport("reset".to_string())));

        assert_eq!(session.state(), SessionState::OpenedWithKeys);
        assert!(matches!(session.error().unwrap().cause(), Error::Transport(_)));
        assert_eq!(drain(&mut session).1.len(), 1);
    }

    #[test]
    fn key_request_failure_before_keys_is_fatal() {
        let drm = FakeDrm::default();
        let mut session = new_session(&drm);
        session.open(&clearkey_init_data());
        let ticket = single_request(&mut session, RequestKind::Keys);
        session.on_response(ticket, Err(Error::Protocol("bad json".to_string())));
        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(session.crypto(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn missing_scheme_enters_error() {
        let drm = FakeDrm::default();
        let mut session = new_session(&drm);
        let widevine_only = DrmInitData::new(vec![SchemeData::new(
            SchemeId::Widevine.to_uuid(),
            "video/mp4",
            b"pssh".to_vec(),
        )]);
        session.open(&widevine_only);

        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(
            session.error().unwrap().cause(),
            Error::UnsupportedScheme(_)
        ));
        assert!(drm.state().opened.is_empty());

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.error().is_none());
    }

    #[test]
    fn events_are_dropped_when_not_open() {
        let drm = FakeDrm::default();
        let mut session = new_session(&drm);
        session.on_event(DrmEvent::KeyRequired);
        session.on_event(DrmEvent::ProvisionRequired);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.take_effects().is_empty());

        drm.state()
            .crypto_results
            .push_back(Err(PlatformError::NotProvisioned));
        session.open(&clearkey_init_data());
        drain(&mut session);
        session.on_event(DrmEvent::KeyRequired);
        assert_eq!(session.state(), SessionState::Opening);
        assert!(session.take_effects().is_empty());
    }

    #[test]
    fn listener_sender_receives_notifications() {
        let (tx, rx) = mpsc::channel();
        SessionNotification::KeysLoaded.dispatch(&tx);
        SessionNotification::KeysRemoved.dispatch(&tx);
        SessionNotification::SessionError(Error::KeysExpired).dispatch(&tx);

        assert!(matches!(rx.recv().unwrap(), SessionNotification::KeysLoaded));
        assert!(matches!(rx.recv().unwrap(), SessionNotification::KeysRemoved));
        assert!(matches!(
            rx.recv().unwrap(),
            SessionNotification::SessionError(Error::KeysExpired)
        ));
    }
}

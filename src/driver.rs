//! Threaded session owner.
//!
//! [`spawn_session`] moves a [`DrmSession`] onto its own owner thread. All
//! state changes happen there, one mailbox command at a time. Outbound
//! requests run on a per open cycle worker thread and their results are
//! posted back into the mailbox; listener notifications are delivered in
//! order on a notifier thread.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::callback::MediaDrmCallback;
use crate::error::{DrmSessionError, Error, Result};
use crate::init_data::DrmInitData;
use crate::platform::{DrmEvent, EventSink, MediaDrm};
use crate::scheme::SchemeId;
use crate::session::{
    DrmSession, DrmSessionListener, Effect, OutboundRequest, PendingRequest, RequestTicket,
    SessionNotification, SessionState,
};

type Query<M> = Box<dyn FnOnce(&DrmSession<M>) + Send>;

enum Command<M: MediaDrm> {
    Open(DrmInitData),
    Close(Sender<Result<()>>),
    Response(RequestTicket, Result<Vec<u8>>),
    Event(DrmEvent),
    Query(Query<M>),
    Shutdown,
}

/// Feeds platform events into the owner's mailbox.
struct MailboxSink<M: MediaDrm> {
    mailbox: Sender<Command<M>>,
}

impl<M: MediaDrm> EventSink for MailboxSink<M> {
    fn on_event(&self, event: DrmEvent) {
        if self.mailbox.send(Command::Event(event)).is_err() {
            trace!(?event, "session owner gone, dropping event");
        }
    }
}

/// Request worker for one open cycle.
///
/// Dropping it cancels the worker: queued jobs are abandoned, an in-flight
/// call is finished and its response discarded by the session as stale.
struct Worker {
    jobs: Sender<PendingRequest>,
    cancelled: Arc<AtomicBool>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Worker {
    fn spawn<M: MediaDrm>(
        callback: Arc<dyn MediaDrmCallback>,
        mailbox: Sender<Command<M>>,
    ) -> Result<Self> {
        let (jobs, queue) = mpsc::channel::<PendingRequest>();
        let cancelled = Arc::new(AtomicBool::new(false));
        let worker_cancelled = Arc::clone(&cancelled);
        thread::Builder::new()
            .name("rsmediadrm-request".to_string())
            .spawn(move || {
                for job in queue {
                    if worker_cancelled.load(Ordering::Acquire) {
                        trace!(kind = ?job.ticket.kind, "abandoning queued request");
                        break;
                    }
                    let response = match &job.request {
                        OutboundRequest::Provision(request) => {
                            callback.execute_provision_request(job.scheme, request)
                        }
                        OutboundRequest::Keys(request) => {
                            callback.execute_key_request(job.scheme, request)
                        }
                    };
                    if mailbox.send(Command::Response(job.ticket, response)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| spawn_error("request worker", e))?;
        Ok(Self { jobs, cancelled })
    }
}

fn spawn_error(what: &str, e: std::io::Error) -> Error {
    Error::InvalidState(format!("Failed to spawn {} thread: {}", what, e))
}

struct Owner<M: MediaDrm> {
    session: DrmSession<M>,
    callback: Arc<dyn MediaDrmCallback>,
    mailbox: Sender<Command<M>>,
    notifier: Sender<SessionNotification>,
    worker: Option<Worker>,
}

impl<M: MediaDrm> Owner<M> {
    fn run(mut self, commands: Receiver<Command<M>>) {
        while let Ok(command) = commands.recv() {
            match command {
                Command::Open(init_data) => self.session.open(&init_data),
                Command::Close(reply) => {
                    let result = self.session.close();
                    self.flush();
                    let _ = reply.send(result);
                    continue;
                }
                Command::Response(ticket, response) => self.session.on_response(ticket, response),
                Command::Event(event) => self.session.on_event(event),
                Command::Query(query) => query(&self.session),
                Command::Shutdown => break,
            }
            self.flush();
        }

        while self.session.open_count() > 0 {
            let _ = self.session.close();
        }
        debug!(scheme = %self.session.scheme(), "session owner stopped");
    }

    fn flush(&mut self) {
        for effect in self.session.take_effects() {
            match effect {
                Effect::Request(request) => self.dispatch(request),
                Effect::Notify(notification) => {
                    let _ = self.notifier.send(notification);
                }
            }
        }
        if self.session.state() == SessionState::Closed {
            self.worker = None;
        }
    }

    fn dispatch(&mut self, request: PendingRequest) {
        if self.worker.is_none() {
            match Worker::spawn(self.callback.clone(), self.mailbox.clone()) {
                Ok(worker) => self.worker = Some(worker),
                Err(e) => {
                    warn!(error = %e, "cannot execute request");
                    let _ = self.mailbox.send(Command::Response(request.ticket, Err(e)));
                    return;
                }
            }
        }
        if let Some(worker) = &self.worker {
            if let Err(mpsc::SendError(request)) = worker.jobs.send(request) {
                let _ = self.mailbox.send(Command::Response(
                    request.ticket,
                    Err(Error::InvalidState("Request worker stopped".to_string())),
                ));
            }
        }
    }
}

struct Inner<M: MediaDrm> {
    mailbox: Sender<Command<M>>,
    owner: Mutex<Option<JoinHandle<()>>>,
}

impl<M: MediaDrm> Drop for Inner<M> {
    fn drop(&mut self) {
        let _ = self.mailbox.send(Command::Shutdown);
        if let Ok(mut owner) = self.owner.lock() {
            if let Some(handle) = owner.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Handle to a session running on its owner thread.
///
/// Clones share the session. The owner stops, closing the platform session
/// if needed, when the last clone is dropped.
pub struct SessionHandle<M: MediaDrm> {
    scheme: SchemeId,
    inner: Arc<Inner<M>>,
}

impl<M: MediaDrm> Clone for SessionHandle<M> {
    fn clone(&self) -> Self {
        Self {
            scheme: self.scheme,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: MediaDrm> std::fmt::Debug for SessionHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl<M: MediaDrm> SessionHandle<M> {
    pub fn scheme(&self) -> SchemeId {
        self.scheme
    }

    /// Acquire a reference, opening the session on the first one.
    ///
    /// Returns once the command is queued; progress is reported to the
    /// listener.
    pub fn open(&self, init_data: &DrmInitData) -> Result<()> {
        self.send(Command::Open(init_data.clone()))
    }

    /// Release a reference, tearing the session down on the last one.
    pub fn close(&self) -> Result<()> {
        let (reply, result) = mpsc::channel();
        self.send(Command::Close(reply))?;
        result.recv().map_err(|_| owner_gone())?
    }

    pub fn state(&self) -> Result<SessionState> {
        self.query(|session| session.state())
    }

    pub fn crypto(&self) -> Result<M::Crypto> {
        self.query(|session| session.crypto().cloned())?
    }

    pub fn error(&self) -> Result<Option<DrmSessionError>> {
        self.query(|session| session.error().cloned())
    }

    pub fn query_key_status(&self) -> Result<HashMap<String, String>> {
        self.query(|session| session.query_key_status())?
    }

    pub fn requires_secure_decoder(&self, mime_type: &str) -> Result<bool> {
        let mime_type = mime_type.to_string();
        self.query(move |session| session.requires_secure_decoder(&mime_type))?
    }

    pub fn offline_license_key_set_id(&self) -> Result<Vec<u8>> {
        self.query(|session| session.offline_license_key_set_id().to_vec())
    }

    fn query<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&DrmSession<M>) -> R + Send + 'static,
    {
        let (reply, result) = mpsc::channel();
        self.send(Command::Query(Box::new(move |session| {
            let _ = reply.send(f(session));
        })))?;
        result.recv().map_err(|_| owner_gone())
    }

    fn send(&self, command: Command<M>) -> Result<()> {
        self.inner.mailbox.send(command).map_err(|_| owner_gone())
    }
}

fn owner_gone() -> Error {
    Error::InvalidState("Session owner has stopped".to_string())
}

/// Start a session for `scheme` on its own owner thread.
///
/// `callback` executes outbound requests; `listener` receives notifications
/// on a dedicated thread, in emission order.
pub fn spawn_session<M: MediaDrm>(
    scheme: SchemeId,
    drm: M,
    optional_parameters: Option<HashMap<String, String>>,
    callback: Arc<dyn MediaDrmCallback>,
    listener: Arc<dyn DrmSessionListener>,
) -> Result<SessionHandle<M>> {
    let (notifier, notifications) = mpsc::channel::<SessionNotification>();
    thread::Builder::new()
        .name("rsmediadrm-notify".to_string())
        .spawn(move || {
            for notification in notifications {
                notification.dispatch(listener.as_ref());
            }
        })
        .map_err(|e| spawn_error("notifier", e))?;

    let (mailbox, commands) = mpsc::channel::<Command<M>>();
    let mut session = DrmSession::new(scheme, drm, optional_parameters);
    session.set_event_sink(Box::new(MailboxSink {
        mailbox: mailbox.clone(),
    }));

    let owner = Owner {
        session,
        callback,
        mailbox: mailbox.clone(),
        notifier,
        worker: None,
    };
    let handle = thread::Builder::new()
        .name(format!("rsmediadrm-{}", scheme))
        .spawn(move || owner.run(commands))
        .map_err(|e| spawn_error("session owner", e))?;

    debug!(%scheme, "session owner started");
    Ok(SessionHandle {
        scheme,
        inner: Arc::new(Inner {
            mailbox,
            owner: Mutex::new(Some(handle)),
        }),
    })
}

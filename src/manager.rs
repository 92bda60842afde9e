//! Session manager.
//!
//! Keeps one session per supported scheme and hands out the one matching a
//! piece of content. Widevine is preferred over ClearKey when the content
//! carries init data for both.
use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::callback::MediaDrmCallback;
use crate::driver::{spawn_session, SessionHandle};
use crate::error::{Error, Result};
use crate::init_data::DrmInitData;
use crate::platform::MediaDrm;
use crate::scheme::SchemeId;
use crate::session::DrmSessionListener;

/// Schemes the manager recognises, in order of preference.
pub const MANAGED_SCHEMES: [SchemeId; 2] = [SchemeId::Widevine, SchemeId::ClearKey];

/// Owns the per scheme sessions.
#[derive(Debug)]
pub struct SessionManager<M: MediaDrm> {
    sessions: Vec<SessionHandle<M>>,
}

impl<M: MediaDrm> SessionManager<M> {
    /// Start a session for every managed scheme `engine` has an engine for.
    pub fn spawn<F>(
        mut engine: F,
        optional_parameters: Option<HashMap<String, String>>,
        callback: Arc<dyn MediaDrmCallback>,
        listener: Arc<dyn DrmSessionListener>,
    ) -> Result<Self>
    where
        F: FnMut(SchemeId) -> Option<M>,
    {
        let mut sessions = Vec::new();
        for scheme in MANAGED_SCHEMES {
            if let Some(drm) = engine(scheme) {
                sessions.push(spawn_session(
                    scheme,
                    drm,
                    optional_parameters.clone(),
                    Arc::clone(&callback),
                    Arc::clone(&listener),
                )?);
            }
        }
        Ok(Self { sessions })
    }

    /// Session for `scheme`, if one is running.
    pub fn session(&self, scheme: SchemeId) -> Option<&SessionHandle<M>> {
        self.sessions.iter().find(|session| session.scheme() == scheme)
    }

    /// Open and return the preferred session for `init_data`.
    pub fn acquire_session(&self, init_data: &DrmInitData) -> Result<SessionHandle<M>> {
        let session = MANAGED_SCHEMES
            .iter()
            .filter(|scheme| init_data.get(**scheme).is_some())
            .find_map(|scheme| self.session(*scheme))
            .ok_or_else(|| {
                Error::UnsupportedScheme("No session available for this content".to_string())
            })?;

        info!(scheme = %session.scheme(), "acquiring session");
        session.open(init_data)?;
        Ok(session.clone())
    }

    /// Release a session obtained from [`SessionManager::acquire_session`].
    pub fn release_session(&self, session: &SessionHandle<M>) -> Result<()> {
        session.close()
    }
}

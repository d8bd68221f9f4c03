//! Entry point wiring session, selection, caches, and both sides together.

use std::sync::Arc;

use tally_gateway::{AuthGrant, Gateway};
use tally_types::Credentials;
use tracing::info;

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::mutation::MutationCoordinator;
use crate::selection::Selection;
use crate::session::{Session, SessionStore};
use crate::store::Store;

pub struct TallyClient<G> {
    ctx: SyncContext<G>,
    store: Store<G>,
    mutations: MutationCoordinator<G>,
}

impl<G: Gateway> TallyClient<G> {
    /// `session` should be the same store the gateway reads its credential from.
    pub fn new(gateway: Arc<G>, session: SessionStore) -> Self {
        let ctx = SyncContext::new(gateway, session);
        Self {
            store: Store::new(ctx.clone()),
            mutations: MutationCoordinator::new(ctx.clone()),
            ctx,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Store<G> {
        &self.store
    }

    #[must_use]
    pub fn mutations(&self) -> &MutationCoordinator<G> {
        &self.mutations
    }

    #[must_use]
    pub fn selection(&self) -> &Selection {
        self.ctx.selection()
    }

    #[must_use]
    pub fn context(&self) -> &SyncContext<G> {
        &self.ctx
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.ctx.session().current()
    }

    /// Load the persisted session, if any.
    pub fn restore(&self) -> Result<Option<Session>, SyncError> {
        Ok(self.ctx.session().restore()?)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, SyncError> {
        let credentials = Credentials::new(username, password)?;
        let grant = self
            .ctx
            .gateway()
            .login(&credentials)
            .await
            .map_err(SyncError::from)?;
        self.establish(grant)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<Session, SyncError> {
        let credentials = Credentials::new(username, password)?;
        let grant = self
            .ctx
            .gateway()
            .register(&credentials)
            .await
            .map_err(SyncError::from)?;
        info!(username = %grant.username, "Registered");
        self.establish(grant)
    }

    /// Forget the session, the selection, and every cached entry.
    pub fn logout(&self) {
        self.ctx.sign_out();
    }

    fn establish(&self, grant: AuthGrant) -> Result<Session, SyncError> {
        let session = Session {
            user_id: grant.id,
            display_name: grant.username,
            credential: grant.token,
        };
        // A different user starts from an empty cache and no selection.
        if self.ctx.session().user_id() != Some(session.user_id) {
            self.ctx.selection().select_all();
            self.ctx.caches().clear();
        }
        self.ctx.session().set(session.clone())?;
        Ok(session)
    }
}

// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    services::{attempt::AttemptService, auth::AuthService, proctor::ProctorService},
    store::{
        AttemptRepository, ExamDirectory, RevocationList, SessionStore, Store, UserDirectory,
        ViolationStore,
    },
    utils::jwt::TokenCodec,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub attempts: Arc<AttemptService>,
    pub proctor: Arc<ProctorService>,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Wires every service onto one backing store.
    pub fn new<S>(config: Config, store: Arc<S>) -> Self
    where
        S: Store + 'static,
    {
        let exams: Arc<dyn ExamDirectory> = store.clone();
        let attempt_repo: Arc<dyn AttemptRepository> = store.clone();
        let violations: Arc<dyn ViolationStore> = store.clone();
        let users: Arc<dyn UserDirectory> = store.clone();
        let sessions: Arc<dyn SessionStore> = store.clone();
        let revocations: Arc<dyn RevocationList> = store;

        let attempts = Arc::new(AttemptService::new(
            exams.clone(),
            attempt_repo,
            config.submission_grace,
        ));
        let proctor = Arc::new(ProctorService::new(exams, violations, attempts.clone()));
        let auth = Arc::new(AuthService::new(
            users,
            sessions,
            revocations,
            TokenCodec::from_config(&config),
        ));

        Self {
            config,
            attempts,
            proctor,
            auth,
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<AttemptService> {
    fn from_ref(state: &AppState) -> Self {
        state.attempts.clone()
    }
}

impl FromRef<AppState> for Arc<ProctorService> {
    fn from_ref(state: &AppState) -> Self {
        state.proctor.clone()
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

//! Test doubles shared by the store's unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use api::{ChangeListener, GatewayError, NewNote, Note, NotePatch, NotesTable, Subscription};

use crate::capability::{
    AppleCredential, BiometricResult, BrowserOutcome, CredentialError, Device,
};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Default)]
struct Script {
    biometric_available: bool,
    biometric: VecDeque<BiometricResult>,
    apple: VecDeque<Result<AppleCredential, CredentialError>>,
    browser: VecDeque<BrowserOutcome>,
    yield_on_prompt: bool,
    prompts: Vec<String>,
    hashed_nonces: Vec<String>,
    opened_urls: Vec<String>,
}

/// Scriptable [`Device`]. Clones share the script.
#[derive(Clone, Default)]
pub(crate) struct FakeDevice {
    script: Arc<Mutex<Script>>,
}

impl FakeDevice {
    pub(crate) fn with_biometrics(self) -> Self {
        self.script.lock().unwrap().biometric_available = true;
        self
    }

    /// Biometric prompts suspend once before answering.
    pub(crate) fn slow_prompts(self) -> Self {
        self.script.lock().unwrap().yield_on_prompt = true;
        self
    }

    pub(crate) fn answer_biometric(&self, result: BiometricResult) {
        self.script.lock().unwrap().biometric.push_back(result);
    }

    pub(crate) fn answer_apple(&self, result: Result<AppleCredential, CredentialError>) {
        self.script.lock().unwrap().apple.push_back(result);
    }

    pub(crate) fn answer_browser(&self, outcome: BrowserOutcome) {
        self.script.lock().unwrap().browser.push_back(outcome);
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.script.lock().unwrap().prompts.clone()
    }

    pub(crate) fn hashed_nonces(&self) -> Vec<String> {
        self.script.lock().unwrap().hashed_nonces.clone()
    }

    pub(crate) fn opened_urls(&self) -> Vec<String> {
        self.script.lock().unwrap().opened_urls.clone()
    }
}

pub(crate) fn apple_credential(token: &str) -> AppleCredential {
    AppleCredential {
        user: "001234.apple".to_string(),
        identity_token: Some(token.to_string()),
        email: None,
    }
}

impl Device for FakeDevice {
    async fn biometric_available(&self) -> bool {
        self.script.lock().unwrap().biometric_available
    }

    async fn authenticate_biometric(&self, prompt: &str, _fallback_label: &str) -> BiometricResult {
        let slow = {
            let mut script = self.script.lock().unwrap();
            script.prompts.push(prompt.to_string());
            script.yield_on_prompt
        };
        if slow {
            tokio::task::yield_now().await;
        }
        self.script
            .lock()
            .unwrap()
            .biometric
            .pop_front()
            .unwrap_or(BiometricResult::Failed)
    }

    async fn request_apple_credential(
        &self,
        hashed_nonce: &str,
    ) -> Result<AppleCredential, CredentialError> {
        let mut script = self.script.lock().unwrap();
        script.hashed_nonces.push(hashed_nonce.to_string());
        script
            .apple
            .pop_front()
            .unwrap_or_else(|| Ok(apple_credential("apple-identity-token")))
    }

    async fn open_auth_url(&self, url: &str, _redirect_url: &str) -> BrowserOutcome {
        let mut script = self.script.lock().unwrap();
        script.opened_urls.push(url.to_string());
        script.browser.pop_front().unwrap_or(BrowserOutcome::Opened)
    }
}

/// [`NotesTable`] wrapper whose reads and writes suspend once before reaching
/// the inner table, so tests can observe state mid-operation.
#[derive(Clone)]
pub(crate) struct Yielding<T>(pub(crate) T);

impl<T: NotesTable> NotesTable for Yielding<T> {
    async fn select_by_owner(&self, user_id: &str) -> Result<Vec<Note>, GatewayError> {
        tokio::task::yield_now().await;
        self.0.select_by_owner(user_id).await
    }

    async fn insert(&self, note: NewNote) -> Result<Note, GatewayError> {
        tokio::task::yield_now().await;
        self.0.insert(note).await
    }

    async fn update(&self, id: &str, user_id: &str, patch: &NotePatch) -> Result<Note, GatewayError> {
        tokio::task::yield_now().await;
        self.0.update(id, user_id, patch).await
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<(), GatewayError> {
        tokio::task::yield_now().await;
        self.0.delete(id, user_id).await
    }

    fn subscribe(&self, user_id: &str, listener: ChangeListener) -> Subscription {
        self.0.subscribe(user_id, listener)
    }
}

//! Streaming answer sequence
//!
//! The store enforces no coupling between its fields. This module is the
//! application code that moves them together while a model answers:
//!
//! | step | data | answer | waiting | streamdiv |
//! |---|---|---|---|---|
//! | [`begin`] | + user message | cleared | true | true |
//! | [`receive`] | | + chunk | false | |
//! | [`finish`] | + assistant message | kept | false | false |
//! | [`fail`] | + error message | kept | false | false |

use anyhow::{bail, Result};

use crate::ai::OllamaClient;
use crate::state::{ChatMessage, ChatRole};
use crate::store::ChatStore;

/// Start an exchange. Returns false, changing nothing, when one is already
/// in progress; the check and the writes happen under one lock.
pub fn begin(store: &ChatStore, question: &str) -> bool {
    store.update(|state| {
        if state.waiting || state.streamdiv {
            return false;
        }
        state.data.push(ChatMessage::user(question));
        state.answer.clear();
        state.waiting = true;
        state.streamdiv = true;
        true
    })
}

pub fn receive(store: &ChatStore, chunk: &str) {
    if store.waiting() {
        store.set_waiting(false);
    }
    store.push_answer(chunk);
}

pub fn finish(store: &ChatStore) {
    let answer = store.answer();
    store.push_data(ChatMessage::assistant(answer));
    store.set_streamdiv(false);
    store.set_waiting(false);
}

pub fn fail(store: &ChatStore, error: &anyhow::Error) {
    store.push_data(ChatMessage::assistant(format!("Error: {:#}", error)));
    store.set_streamdiv(false);
    store.set_waiting(false);
}

/// An exchange is in progress
pub fn is_busy(store: &ChatStore) -> bool {
    store.waiting() || store.streamdiv()
}

/// Build the prompt for the last message in `history`, carrying earlier
/// turns as context.
pub fn build_prompt(history: &[ChatMessage]) -> String {
    let Some((last, earlier)) = history.split_last() else {
        return String::new();
    };

    if earlier.is_empty() {
        return last.content.clone();
    }

    let mut prompt = String::from("Previous conversation:\n");
    for message in earlier {
        prompt.push_str(message.role.label());
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push('\n');

    match last.role {
        ChatRole::User => prompt.push_str("Question: "),
        ChatRole::Assistant => prompt.push_str("Assistant: "),
    }
    prompt.push_str(&last.content);
    prompt
}

/// Asks a model and streams its answer into a [`ChatStore`].
#[derive(Clone)]
pub struct ChatSession {
    store: ChatStore,
    client: OllamaClient,
    model: String,
}

impl ChatSession {
    pub fn new(store: ChatStore, client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            store,
            client,
            model: model.into(),
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask and stream the answer into the store chunk by chunk.
    pub async fn ask(&self, question: &str) -> Result<String> {
        let prompt = self.start(question)?;

        let store = self.store.clone();
        let result = self
            .client
            .stream(&self.model, &prompt, |chunk| receive(&store, chunk))
            .await;
        self.complete(result)
    }

    /// Ask without streaming; the store sees the answer as a single chunk.
    pub async fn ask_whole(&self, question: &str) -> Result<String> {
        let prompt = self.start(question)?;

        let result = self.client.query(&self.model, &prompt).await;
        if let Ok(answer) = &result {
            receive(&self.store, answer);
        }
        self.complete(result)
    }

    fn start(&self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            bail!("Question is empty");
        }
        if !begin(&self.store, question) {
            bail!("A response is already in progress");
        }

        tracing::info!(model = %self.model, turns = self.store.with_data(|data| data.len()), "asking model");
        Ok(self.store.with_data(build_prompt))
    }

    fn complete(&self, result: Result<String>) -> Result<String> {
        match result {
            Ok(answer) => {
                finish(&self.store);
                tracing::info!(chars = answer.len(), "answer complete");
                Ok(answer)
            }
            Err(e) => {
                tracing::warn!(error = %e, "answer failed");
                fail(&self.store, &e);
                Err(e)
            }
        }
    }
}

//! crates/minduni_core/src/chat.rs
//!
//! The companion chat. There is no model behind it: every user message is
//! answered, after a short "typing" pause, with one of a handful of canned
//! supportive replies picked at random.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const GREETING: [&str; 2] = ["Hola, estoy aquí para todo.", "¿Quieres hablar?"];

const CANNED_REPLIES: [&str; 5] = [
    "Entiendo que te sientas estresado",
    "Cuéntame, ¿Qué pasó?",
    "Estoy aquí para escucharte",
    "Respirar profundo puede ayudar",
    "Tómate un momento para ti",
];

pub const DEFAULT_REPLY_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: u64,
    pub text: String,
    pub speaker: Speaker,
}

pub struct ChatSimulator {
    transcript: Vec<ChatMessage>,
    rng: StdRng,
    reply_delay: Duration,
    typing: bool,
}

impl ChatSimulator {
    pub fn new(reply_delay: Duration) -> Self {
        Self::with_rng(reply_delay, StdRng::from_os_rng())
    }

    /// Deterministic replies, for tests and demos.
    pub fn seeded(reply_delay: Duration, seed: u64) -> Self {
        Self::with_rng(reply_delay, StdRng::seed_from_u64(seed))
    }

    fn with_rng(reply_delay: Duration, rng: StdRng) -> Self {
        let mut chat = Self {
            transcript: Vec::new(),
            rng,
            reply_delay,
            typing: false,
        };
        for line in GREETING {
            chat.push(line.to_string(), Speaker::Assistant);
        }
        chat
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Records the user's message and answers it after the reply delay.
    ///
    /// Blank messages are ignored and return `None`.
    pub async fn send(&mut self, text: &str) -> Option<ChatMessage> {
        if text.trim().is_empty() {
            return None;
        }
        self.push(text.to_string(), Speaker::User);

        self.typing = true;
        tokio::time::sleep(self.reply_delay).await;
        self.typing = false;

        let reply = CANNED_REPLIES
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(CANNED_REPLIES[0]);
        debug!("Chat reply chosen: {}", reply);
        Some(self.push(reply.to_string(), Speaker::Assistant))
    }

    fn push(&mut self, text: String, speaker: Speaker) -> ChatMessage {
        let message = ChatMessage {
            id: self.transcript.len() as u64 + 1,
            text,
            speaker,
        };
        self.transcript.push(message.clone());
        message
    }
}

impl Default for ChatSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_DELAY)
    }
}

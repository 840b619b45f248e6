//! services/companion/src/console.rs
//!
//! A line-oriented front end over the session, the journal feed and the chat
//! simulator. `Command::parse` turns one input line into a command; `Console`
//! runs it and writes the result for the user.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use minduni_core::breathing;
use minduni_core::chat::ChatSimulator;
use minduni_core::domain::{AvatarId, DomainError, EmotionalProfile, JournalEntry, Mood, UserId};
use minduni_core::{
    JournalError, JournalFeed, NewAccount, SessionContext, SessionError, SessionState,
};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::error::AppError;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

pub const HELP: &str = "\
Comandos:
  register <email> <contraseña> <avatar_N> <nombre...>
  login <email> <contraseña>
  logout
  whoami
  avatars
  avatar <avatar_N>
  onboarding [perfil]           perfil: anxiety depression_mild academic_stress breakup self_esteem
  write <ánimo> <texto...>      ánimo: 😃 😌 😐 😔 😠 o happy/calm/neutral/sad/angry
  journal
  export
  chat <mensaje...>
  breathe [ciclos]
  help
  quit";

//=========================================================================================
// Parsing
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        email: String,
        password: String,
        avatar: AvatarId,
        display_name: String,
    },
    Login {
        email: String,
        password: String,
    },
    Logout,
    Whoami,
    Avatars,
    Avatar(AvatarId),
    /// `None` lists the options.
    Onboarding(Option<EmotionalProfile>),
    Write {
        mood: Mood,
        text: String,
    },
    Journal,
    Export,
    Chat(String),
    Breathe {
        cycles: u32,
    },
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    Invalid(#[from] DomainError),
}

/// Splits off the first whitespace-delimited word.
fn next_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.find(char::is_whitespace) {
        Some(end) => Some((&input[..end], input[end..].trim_start())),
        None => Some((input, "")),
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, ParseError> {
        let (verb, rest) = next_word(line).ok_or(ParseError::Empty)?;
        let rest = rest.trim_end();

        match verb.to_lowercase().as_str() {
            "register" => {
                const USAGE: &str = "register <email> <contraseña> <avatar_N> <nombre...>";
                let (email, rest) = next_word(rest).ok_or(ParseError::Usage(USAGE))?;
                let (password, rest) = next_word(rest).ok_or(ParseError::Usage(USAGE))?;
                let (avatar, display_name) = next_word(rest).ok_or(ParseError::Usage(USAGE))?;
                if display_name.is_empty() {
                    return Err(ParseError::Usage(USAGE));
                }
                Ok(Command::Register {
                    email: email.to_string(),
                    password: password.to_string(),
                    avatar: avatar.parse()?,
                    display_name: display_name.to_string(),
                })
            }
            "login" => {
                const USAGE: &str = "login <email> <contraseña>";
                let (email, rest) = next_word(rest).ok_or(ParseError::Usage(USAGE))?;
                let (password, extra) = next_word(rest).ok_or(ParseError::Usage(USAGE))?;
                if !extra.is_empty() {
                    return Err(ParseError::Usage(USAGE));
                }
                Ok(Command::Login {
                    email: email.to_string(),
                    password: password.to_string(),
                })
            }
            "avatar" => {
                let (avatar, _) = next_word(rest).ok_or(ParseError::Usage("avatar <avatar_N>"))?;
                Ok(Command::Avatar(avatar.parse()?))
            }
            "onboarding" => match next_word(rest) {
                Some((id, _)) => Ok(Command::Onboarding(Some(id.parse()?))),
                None => Ok(Command::Onboarding(None)),
            },
            "write" => {
                const USAGE: &str = "write <ánimo> <texto...>";
                let (mood, text) = next_word(rest).ok_or(ParseError::Usage(USAGE))?;
                Ok(Command::Write {
                    mood: mood.parse()?,
                    text: text.to_string(),
                })
            }
            "chat" => Ok(Command::Chat(rest.to_string())),
            "breathe" => {
                let cycles = match next_word(rest) {
                    Some((n, _)) => n
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or(ParseError::Usage("breathe [ciclos]"))?,
                    None => 3,
                };
                Ok(Command::Breathe { cycles })
            }
            "logout" => Ok(Command::Logout),
            "whoami" => Ok(Command::Whoami),
            "avatars" => Ok(Command::Avatars),
            "journal" => Ok(Command::Journal),
            "export" => Ok(Command::Export),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

//=========================================================================================
// Execution
//=========================================================================================

/// What `export` writes: the journal of the signed-in user, newest entry first.
#[derive(Debug, Serialize)]
pub struct JournalExport<'a> {
    pub user: Option<&'a UserId>,
    pub exported_at: DateTime<Utc>,
    pub entries: &'a [JournalEntry],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Console<W: Write> {
    session: SessionContext,
    feed: JournalFeed,
    chat: ChatSimulator,
    out: W,
}

impl<W: Write> Console<W> {
    pub fn new(session: SessionContext, feed: JournalFeed, chat: ChatSimulator, out: W) -> Self {
        Self {
            session,
            feed,
            chat,
            out,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn feed(&self) -> &JournalFeed {
        &self.feed
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Parses and runs one input line. Blank lines are ignored.
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow, AppError> {
        match Command::parse(line) {
            Ok(command) => self.execute(command).await,
            Err(ParseError::Empty) => Ok(Flow::Continue),
            Err(e) => {
                writeln!(self.out, "{}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    pub async fn execute(&mut self, command: Command) -> Result<Flow, AppError> {
        match command {
            Command::Register {
                email,
                password,
                avatar,
                display_name,
            } => {
                let account = NewAccount {
                    email,
                    password,
                    display_name,
                    avatar,
                };
                match self.session.register(account).await {
                    Ok(_) => {
                        self.await_session().await;
                        self.greet()?;
                    }
                    Err(e) => {
                        warn!("Registration failed: {}", e);
                        writeln!(self.out, "{}", e.user_message())?;
                    }
                }
            }
            Command::Login { email, password } => {
                match self.session.login(&email, &password).await {
                    Ok(()) => {
                        self.await_session().await;
                        self.greet()?;
                    }
                    Err(e) => writeln!(self.out, "{}", e.user_message())?,
                }
            }
            Command::Logout => match self.session.logout().await {
                Ok(()) => writeln!(self.out, "Sesión cerrada.")?,
                Err(e) => writeln!(self.out, "{}", e.user_message())?,
            },
            Command::Whoami => self.greet()?,
            Command::Avatars => {
                for avatar in AvatarId::all() {
                    writeln!(self.out, "{}  {}", avatar, avatar.image_asset())?;
                }
            }
            Command::Avatar(avatar) => match self.session.update_avatar(avatar).await {
                Ok(()) => writeln!(self.out, "Avatar actualizado: {}", avatar)?,
                Err(e) => writeln!(self.out, "{}", e.user_message())?,
            },
            Command::Onboarding(None) => {
                writeln!(self.out, "¿En qué te gustaría que te acompañemos?")?;
                for profile in EmotionalProfile::ALL {
                    writeln!(
                        self.out,
                        "{}  {:<16} {}",
                        profile.emoji(),
                        profile.id(),
                        profile.label()
                    )?;
                }
                writeln!(self.out, "Por favor selecciona una opción para continuar.")?;
            }
            Command::Onboarding(Some(profile)) => {
                match self.session.set_emotional_profile(profile).await {
                    Ok(()) => writeln!(
                        self.out,
                        "Perfil guardado: {} {}",
                        profile.emoji(),
                        profile.label()
                    )?,
                    Err(SessionError::NotAuthenticated) => {
                        writeln!(self.out, "No se encontró la sesión del usuario.")?
                    }
                    Err(SessionError::Persistence(e)) => {
                        warn!("Emotional profile not saved: {}", e);
                        writeln!(self.out, "Hubo un problema al guardar tu selección.")?
                    }
                    Err(e) => writeln!(self.out, "{}", e.user_message())?,
                }
            }
            Command::Write { mood, text } => {
                self.feed.set_user(self.session.current_uid());
                match self.feed.add_entry(&text, mood).await {
                    Ok(Some(_)) => writeln!(self.out, "Entrada guardada {}", mood)?,
                    Ok(None) => writeln!(self.out, "Inicia sesión para escribir en tu diario.")?,
                    Err(JournalError::EmptyText) => {
                        writeln!(self.out, "Escribe algo antes de guardar.")?
                    }
                    // The draft is still on the command line; the user can retry it as is.
                    Err(JournalError::Persistence(e)) => {
                        warn!("Journal entry not saved: {}", e);
                        writeln!(self.out, "No se pudo guardar la entrada. Inténtalo de nuevo.")?
                    }
                }
            }
            Command::Journal => {
                let view = self.await_journal().await;
                if view.user.is_none() {
                    writeln!(self.out, "Inicia sesión para ver tu diario.")?;
                } else if view.loading {
                    writeln!(self.out, "Cargando...")?;
                } else if view.entries.is_empty() {
                    writeln!(self.out, "Tu diario está vacío.")?;
                } else {
                    for entry in &view.entries {
                        writeln!(self.out, "{}  {}  {}", entry.date_label(), entry.mood, entry.text)?;
                    }
                }
            }
            Command::Export => {
                let view = self.await_journal().await;
                let export = JournalExport {
                    user: view.user.as_ref(),
                    exported_at: Utc::now(),
                    entries: &view.entries,
                };
                let json = serde_json::to_string_pretty(&export)?;
                writeln!(self.out, "{}", json)?;
            }
            Command::Chat(text) => {
                if let Some(reply) = self.chat.send(&text).await {
                    writeln!(self.out, "MindUni: {}", reply.text)?;
                }
            }
            Command::Breathe { cycles } => {
                let mut cues = Box::pin(breathing::cues(cycles));
                while let Some(cue) = cues.next().await {
                    let tap = if cue.haptic { "•" } else { " " };
                    writeln!(self.out, "{} [{}] {}", tap, cue.cycle, cue.instruction)?;
                    self.out.flush()?;
                }
            }
            Command::Help => writeln!(self.out, "{}", HELP)?,
            Command::Quit => {
                self.feed.deactivate();
                self.session.shutdown().await;
                return Ok(Flow::Quit);
            }
        }
        self.out.flush()?;
        Ok(Flow::Continue)
    }

    fn greet(&mut self) -> Result<(), AppError> {
        match self.session.state() {
            SessionState::Authenticated(identity) => {
                writeln!(
                    self.out,
                    "Hola, {} ({}, {})",
                    identity.display_name, identity.email, identity.avatar
                )?;
                if identity.emotional_profile.is_none() {
                    writeln!(self.out, "Cuéntanos qué te trae por aquí: onboarding")?;
                }
            }
            SessionState::Incomplete { principal, .. } => writeln!(
                self.out,
                "Sesión iniciada como {}, pero tu perfil no está completo.",
                principal.email
            )?,
            SessionState::Loading => writeln!(self.out, "Cargando...")?,
            SessionState::Unauthenticated => writeln!(self.out, "No has iniciado sesión.")?,
        }
        Ok(())
    }

    /// Waits for the session to leave `Loading`, giving up after a few seconds.
    async fn await_session(&self) {
        let mut states = self.session.subscribe();
        if timeout(SETTLE_TIMEOUT, states.wait_for(|s| !s.is_loading()))
            .await
            .is_err()
        {
            warn!("Session still loading after {:?}", SETTLE_TIMEOUT);
        }
    }

    /// Waits for the journal's first snapshot, giving up after a few seconds.
    async fn await_journal(&self) -> minduni_core::JournalView {
        self.feed.set_user(self.session.current_uid());
        let mut views = self.feed.subscribe();
        if timeout(SETTLE_TIMEOUT, views.wait_for(|v| !v.loading))
            .await
            .is_err()
        {
            warn!("Journal still loading after {:?}", SETTLE_TIMEOUT);
        }
        self.feed.view()
    }
}

//! Composer input handling
//!
//! Translates raw key events into composer edits, submit requests,
//! and mode hotkeys, then classifies a submit against the current run
//! state. Keys arriving mid IME composition are left to the method
//! editor.

use crate::error::{Error, Result};
use parley_api::{Attachment, ChatMode};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// What a key event did to the composer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Nothing the host needs to react to
    None,
    /// The composer text changed
    Changed,
    /// The user asked to submit
    SubmitRequested,
    /// A mode hotkey was pressed
    ModeSelected(ChatMode),
}

/// What a submit should actually do given the run state
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitIntent {
    /// Start a new turn
    Submit {
        text: String,
        attachments: Vec<Attachment>,
    },
    /// Route the text to the already-running agent
    FollowUp(String),
    /// Empty submit while the agent runs: a stop request
    Stop,
    /// Empty submit while idle: ignore
    Nothing,
}

/// Composer state
#[derive(Debug, Default)]
pub struct InputController {
    text: String,
    attachments: Vec<Attachment>,
    uploading: bool,
    composing: bool,
}

impl InputController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    pub fn uploading(&self) -> bool {
        self.uploading
    }

    pub fn set_uploading(&mut self, uploading: bool) {
        self.uploading = uploading;
    }

    /// Mark the start or end of an IME composition session
    pub fn set_composing(&mut self, composing: bool) {
        self.composing = composing;
    }

    /// Apply a key event to the composer
    pub fn handle_key(&mut self, key: KeyEvent) -> InputEvent {
        let modded = key.modifiers.contains(KeyModifiers::CONTROL)
            || key.modifiers.contains(KeyModifiers::SUPER);
        if modded {
            return match key.code {
                KeyCode::Char('1') => InputEvent::ModeSelected(ChatMode::Chat),
                KeyCode::Char('2') => InputEvent::ModeSelected(ChatMode::Adaptive),
                KeyCode::Char('3') => InputEvent::ModeSelected(ChatMode::Execute),
                _ => InputEvent::None,
            };
        }

        match key.code {
            KeyCode::Enter => {
                // Enter during IME composition commits the candidate,
                // it must not submit
                if self.composing {
                    InputEvent::None
                } else if key.modifiers.contains(KeyModifiers::SHIFT) {
                    self.text.push('\n');
                    InputEvent::Changed
                } else {
                    InputEvent::SubmitRequested
                }
            }
            KeyCode::Char(c) => {
                self.text.push(c);
                InputEvent::Changed
            }
            KeyCode::Backspace => {
                self.text.pop();
                InputEvent::Changed
            }
            _ => InputEvent::None,
        }
    }

    /// Classify a submit against the run state without consuming the
    /// composer. Fails when there is nothing to send: empty text with
    /// no attachments, or empty text while attachments are still
    /// uploading. Text always goes through.
    pub fn submit_intent(&self, agent_running: bool) -> Result<SubmitIntent> {
        let text = self.text.trim();
        if agent_running {
            return Ok(if text.is_empty() {
                SubmitIntent::Stop
            } else {
                SubmitIntent::FollowUp(text.to_string())
            });
        }
        if text.is_empty() {
            if self.attachments.is_empty() && !self.uploading {
                return Ok(SubmitIntent::Nothing);
            }
            if self.attachments.is_empty() || self.uploading {
                return Err(Error::EmptySubmit);
            }
        }
        Ok(SubmitIntent::Submit {
            text: text.to_string(),
            attachments: self.attachments.clone(),
        })
    }

    /// Take the composer contents, clearing it
    pub fn take_composer(&mut self) -> (String, Vec<Attachment>) {
        (
            std::mem::take(&mut self.text),
            std::mem::take(&mut self.attachments),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    fn attachment() -> Attachment {
        Attachment::new("notes.txt")
    }

    #[test]
    fn test_typing_and_backspace() {
        let mut input = InputController::new();
        assert_eq!(
            input.handle_key(key(KeyCode::Char('h'), KeyModifiers::NONE)),
            InputEvent::Changed
        );
        input.handle_key(key(KeyCode::Char('i'), KeyModifiers::NONE));
        assert_eq!(input.text(), "hi");

        input.handle_key(key(KeyCode::Backspace, KeyModifiers::NONE));
        assert_eq!(input.text(), "h");
    }

    #[test]
    fn test_enter_submits_shift_enter_inserts_newline() {
        let mut input = InputController::new();
        input.set_text("line one");

        assert_eq!(
            input.handle_key(key(KeyCode::Enter, KeyModifiers::SHIFT)),
            InputEvent::Changed
        );
        assert_eq!(input.text(), "line one\n");

        assert_eq!(
            input.handle_key(key(KeyCode::Enter, KeyModifiers::NONE)),
            InputEvent::SubmitRequested
        );
    }

    #[test]
    fn test_enter_during_ime_composition_is_ignored() {
        let mut input = InputController::new();
        input.set_text("こん");
        input.set_composing(true);
        assert_eq!(
            input.handle_key(key(KeyCode::Enter, KeyModifiers::NONE)),
            InputEvent::None
        );

        input.set_composing(false);
        assert_eq!(
            input.handle_key(key(KeyCode::Enter, KeyModifiers::NONE)),
            InputEvent::SubmitRequested
        );
    }

    #[test]
    fn test_mode_hotkeys() {
        let mut input = InputController::new();
        assert_eq!(
            input.handle_key(key(KeyCode::Char('1'), KeyModifiers::CONTROL)),
            InputEvent::ModeSelected(ChatMode::Chat)
        );
        assert_eq!(
            input.handle_key(key(KeyCode::Char('2'), KeyModifiers::SUPER)),
            InputEvent::ModeSelected(ChatMode::Adaptive)
        );
        assert_eq!(
            input.handle_key(key(KeyCode::Char('3'), KeyModifiers::CONTROL)),
            InputEvent::ModeSelected(ChatMode::Execute)
        );
        // The digit is not typed into the composer
        assert_eq!(input.text(), "");
    }

    #[test]
    fn test_submit_intent_while_idle() {
        let mut input = InputController::new();
        assert_eq!(input.submit_intent(false).unwrap(), SubmitIntent::Nothing);

        input.set_text("  run tests  ");
        match input.submit_intent(false).unwrap() {
            SubmitIntent::Submit { text, attachments } => {
                assert_eq!(text, "run tests");
                assert!(attachments.is_empty());
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[test]
    fn test_submit_intent_while_running() {
        let mut input = InputController::new();
        assert_eq!(input.submit_intent(true).unwrap(), SubmitIntent::Stop);

        input.set_text("also check lint");
        assert_eq!(
            input.submit_intent(true).unwrap(),
            SubmitIntent::FollowUp("also check lint".into())
        );
    }

    #[test]
    fn test_attachments_allow_empty_text_unless_uploading() {
        let mut input = InputController::new();
        input.add_attachment(attachment());
        assert!(matches!(
            input.submit_intent(false).unwrap(),
            SubmitIntent::Submit { .. }
        ));

        input.set_uploading(true);
        assert!(matches!(
            input.submit_intent(false),
            Err(Error::EmptySubmit)
        ));
    }

    #[test]
    fn test_text_submit_allowed_while_uploading() {
        let mut input = InputController::new();
        input.set_text("send this now");
        input.set_uploading(true);
        assert!(matches!(
            input.submit_intent(false).unwrap(),
            SubmitIntent::Submit { .. }
        ));
    }

    #[test]
    fn test_take_composer_clears_state() {
        let mut input = InputController::new();
        input.set_text("hello");
        input.add_attachment(attachment());

        let (text, attachments) = input.take_composer();
        assert_eq!(text, "hello");
        assert_eq!(attachments.len(), 1);
        assert_eq!(input.text(), "");
        assert!(input.attachments().is_empty());
    }
}

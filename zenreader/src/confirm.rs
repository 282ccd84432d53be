use async_trait::async_trait;
use dialoguer::{Confirm, theme::ColorfulTheme};

use zenreader_core::confirm::{ConfirmError, Confirmer, Intent};

/// Asks on the terminal. Answers "no" by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleConfirmer;

#[async_trait]
impl Confirmer for ConsoleConfirmer {
    async fn confirm(&self, intent: &Intent) -> Result<bool, ConfirmError> {
        if !console::user_attended() {
            return Err(ConfirmError::NotSupported);
        }
        let prompt = intent.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .default(false)
                .interact_opt()
        })
        .await?
        .map_err(|e| ConfirmError::Io(std::io::Error::other(e)))?;
        // Esc/q leaves no answer.
        answer.ok_or(ConfirmError::Canceled)
    }
}

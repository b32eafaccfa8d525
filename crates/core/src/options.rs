//! Option generator trait: follow-up reply suggestions.

use async_trait::async_trait;

use crate::character::Character;
use crate::error::Error;
use crate::message::Message;

/// Suggests short replies the user might send next.
///
/// Best effort: callers log and swallow failures.
#[async_trait]
pub trait OptionGenerator: Send + Sync {
    async fn suggest(
        &self,
        history: &[Message],
        character: &Character,
        last_user_message: &str,
    ) -> Result<Vec<String>, Error>;
}

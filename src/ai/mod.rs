mod gateway;
mod prompts;
mod provider;
mod recovery;

pub use gateway::{Gateway, GatewayReply, OutputMode};
pub use prompts::{diagnosis_prompt, patch_prompt, truncate_chars};
pub use provider::{Provider, ProviderError};
pub use recovery::{recover_diagnosis, recover_diff, Diagnosis};

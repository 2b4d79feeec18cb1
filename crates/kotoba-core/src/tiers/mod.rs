//! The three tier processors.
//!
//! All tiers expose the same [`Processor`] capability. Tier 1 is pure
//! rule evaluation and never suspends; tiers 2 and 3 suspend only at
//! their model client's generate call. Processors degrade internally
//! where the spec allows it and return an error only when the cascade
//! should move on to another tier.

pub mod handlers;
pub mod tier1;
pub mod tier2;
pub mod tier3;

use async_trait::async_trait;

use kotoba_types::request::{ClassifiedRequest, Tier};
use kotoba_types::Result;

pub use handlers::{HandlerRegistry, SpecializedHandler};
pub use tier1::Tier1Processor;
pub use tier2::Tier2Processor;
pub use tier3::Tier3Processor;

/// A processing strategy at one cost/quality point.
#[async_trait]
pub trait Processor: Send + Sync {
    /// The tier this processor implements.
    fn tier(&self) -> Tier;

    /// Produce a reply for the classified request.
    ///
    /// The request is mutable so rule-based flows can persist dialog-tree
    /// state into its additional params. An `Err` tells the cascade to
    /// try the next tier; processors handle their own internal fallbacks
    /// first.
    async fn process(&self, request: &mut ClassifiedRequest) -> Result<String>;
}

/// Fixed user-visible fallback messages shared by the tiers and router.
pub mod messages {
    /// Generic apology when a tier cannot produce anything better.
    pub const GENERIC_APOLOGY: &str = "I'm sorry, I'm having trouble processing your \
         request at the moment. Could you try rephrasing your question?";

    /// Returned when the input was rejected on content grounds.
    pub const CONTENT_RESTRICTED: &str = "I'm sorry, I'm unable to answer that due to \
         content restrictions. Please try asking something else.";

    /// Returned when the remote tier is over quota.
    pub const LIMIT_REACHED: &str = "I'm sorry, but I've reached my limit for complex \
         questions right now. Could you ask something simpler, or try again later?";

    /// Returned when every tier failed.
    pub const SERVICE_UNAVAILABLE: &str = "I'm sorry, my help isn't available right \
         now. Please try again in a moment.";
}

/// Strip role tags and prompt echoes a model sometimes emits around its
/// actual reply.
pub(crate) fn clean_model_output(raw: &str) -> String {
    let mut text = raw.trim().to_string();
    for tag in ["<assistant>", "</assistant>", "<response>", "</response>"] {
        text = text.replace(tag, "");
    }
    let text = text
        .trim_start_matches("Assistant:")
        .trim_start_matches("assistant:")
        .trim();

    // Collapse runs of blank lines left by tag removal.
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

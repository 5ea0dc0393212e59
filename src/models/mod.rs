pub mod event;
pub mod page;
pub mod record;
pub mod section;
pub mod session;

pub use event::ProgressEvent;
pub use page::{PageContext, ScrapeResult};
pub use record::{ClonePage, CloneRecord, CloneSummary};
pub use section::{SectionTask, SectionTracker};
pub use session::{
    short_id, CallUsage, CloneSession, GeneratedFile, Phase, Pricing, SandboxHandle, Usage,
};

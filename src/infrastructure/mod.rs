//! 基础设施层（Infrastructure）
//!
//! 持有稀缺资源，只暴露能力：
//! - `event_channel` - 单生产者 / 单消费者的有序事件流
//! - `sandbox_lease` - 沙箱只释放一次的租约
//! - `registry` - 在线会话注册表

pub mod event_channel;
pub mod registry;
pub mod sandbox_lease;

pub use event_channel::{event_channel, DisconnectSignal, EventSender, EventStream};
pub use registry::{SessionEntry, SessionRegistry};
pub use sandbox_lease::{ReleaseOutcome, SandboxLease};

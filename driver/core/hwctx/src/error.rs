use crate::config::ConfigError;
use hwctx_addresses::{ObjectClass, ObjectId};
use hwctx_cmdq::ChannelError;
use hwctx_hat::TableError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no free {0} identifier")]
    Exhausted(ObjectClass),
    #[error("out of device memory")]
    OutOfMemory,
    #[error("command channel timed out")]
    ChannelTimedOut,
    #[error("device rejected opcode {opcode:#06x} with status {code:#x}")]
    DeviceRejected { opcode: u16, code: u16 },
    #[error("device is resetting, try again later")]
    DeviceResetting,
    #[error("device was reset and must be re-initialised")]
    DeviceLost,
    #[error("object class {0} is not enabled")]
    UnknownClass(ObjectClass),
    #[error("{class} {id} is not live")]
    NotLive { class: ObjectClass, id: ObjectId },
    #[error("context of {len} bytes exceeds the {max} byte entry")]
    ContextTooLarge { len: usize, max: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("address table: {0}")]
    Table(TableError),
    #[error("command channel: {0}")]
    Channel(ChannelError),
}

impl Error {
    /// Retrying later may succeed without any other change.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::DeviceResetting | Self::OutOfMemory)
    }
}

impl From<ChannelError> for Error {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::TimedOut => Self::ChannelTimedOut,
            ChannelError::DeviceRejected { opcode, code } => Self::DeviceRejected { opcode, code },
            ChannelError::DeviceResetting => Self::DeviceResetting,
            ChannelError::ResetCompleted => Self::DeviceLost,
            ChannelError::OutOfMemory => Self::OutOfMemory,
            other => Self::Channel(other),
        }
    }
}

impl From<TableError> for Error {
    fn from(e: TableError) -> Self {
        match e {
            TableError::OutOfMemory { .. } => Self::OutOfMemory,
            other => Self::Table(other),
        }
    }
}

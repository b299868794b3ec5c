use std::os::fd::RawFd;
use std::sync::Arc;

use crate::command::{Command, Reply};
use crate::error::ChannelResult;

/// Request/response primitive bound to one pool descriptor.
///
/// All implementations must satisfy these invariants:
/// - `exchange` is synchronous; it returns only once the driver answered or
///   the exchange failed.
/// - A rejected command leaves no partial object state behind: allocations
///   and deletions either happened completely or not at all.
/// - `map_fd` names the descriptor mcache regions are mapped from. It stays
///   valid for as long as the channel lives.
pub trait CommandChannel: Send + Sync {
    /// Send one command and wait for its reply.
    fn exchange(&self, command: Command) -> ChannelResult<Reply>;

    /// Descriptor regions returned by `VmaCreate` are mapped from.
    fn map_fd(&self) -> RawFd;
}

impl<C: CommandChannel + ?Sized> CommandChannel for Arc<C> {
    fn exchange(&self, command: Command) -> ChannelResult<Reply> {
        (**self).exchange(command)
    }

    fn map_fd(&self) -> RawFd {
        (**self).map_fd()
    }
}
